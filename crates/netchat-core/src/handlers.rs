//! Incoming packet handlers
//!
//! Handlers are registered per packet type together with the payload type
//! they expect. Dispatch decodes the payload once per matching handler and
//! skips handlers whose payload type does not match the packet header.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::errors::Result;
use crate::packet::{Packet, PacketHeader, Payload};
use crate::types::ConnectionInfo;

type ErasedHandler = Arc<dyn Fn(&Packet, &ConnectionInfo) -> Result<()> + Send + Sync>;
type CloseHandler = Arc<dyn Fn(&ConnectionInfo) + Send + Sync>;

#[derive(Clone)]
struct HandlerEntry {
    payload_type: &'static str,
    handler: ErasedHandler,
}

/// Registry of packet and connection-close handlers
#[derive(Default)]
pub struct PacketHandlerRegistry {
    handlers: RwLock<HashMap<String, Vec<HandlerEntry>>>,
    close_handlers: RwLock<Vec<CloseHandler>>,
}

impl PacketHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler for `packet_type` carrying payloads of type `T`
    ///
    /// Handlers accumulate; registering twice runs both.
    pub fn append<T, F>(&self, packet_type: &str, handler: F)
    where
        T: Payload,
        F: Fn(&PacketHeader, &ConnectionInfo, T) + Send + Sync + 'static,
    {
        let erased: ErasedHandler = Arc::new(move |packet: &Packet, info: &ConnectionInfo| {
            let value = packet.decode_payload::<T>()?;
            handler(&packet.header, info, value);
            Ok(())
        });

        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(packet_type.to_string())
            .or_default()
            .push(HandlerEntry {
                payload_type: T::TYPE_TAG,
                handler: erased,
            });
        debug!(packet_type, payload_type = T::TYPE_TAG, "packet handler registered");
    }

    /// Add a handler run whenever a connection closes
    pub fn append_close_handler<F>(&self, handler: F)
    where
        F: Fn(&ConnectionInfo) + Send + Sync + 'static,
    {
        self.close_handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    /// Number of handlers registered for a packet type
    pub fn handler_count(&self, packet_type: &str) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(packet_type)
            .map_or(0, Vec::len)
    }

    /// Run every matching handler for `packet`, returning how many ran
    pub fn dispatch(&self, packet: &Packet, info: &ConnectionInfo) -> usize {
        // Snapshot so handlers may register more handlers without deadlocking
        let entries = match self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&packet.header.packet_type)
        {
            Some(entries) => entries.clone(),
            None => {
                debug!(
                    packet_type = %packet.header.packet_type,
                    "no handler registered, packet dropped"
                );
                return 0;
            }
        };

        let mut invoked = 0;
        for entry in entries {
            if entry.payload_type != packet.header.payload_type {
                warn!(
                    packet_type = %packet.header.packet_type,
                    expected = entry.payload_type,
                    actual = %packet.header.payload_type,
                    "payload type mismatch, handler skipped"
                );
                continue;
            }
            match (entry.handler)(packet, info) {
                Ok(()) => invoked += 1,
                Err(e) => warn!(
                    packet_type = %packet.header.packet_type,
                    "failed to decode payload for handler: {}", e
                ),
            }
        }
        invoked
    }

    /// Tell every close handler that `info` went away
    pub fn notify_closed(&self, info: &ConnectionInfo) {
        let handlers = self
            .close_handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers {
            handler(info);
        }
    }
}
