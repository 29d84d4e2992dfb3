//! A single established connection
//!
//! Writes are serialized through an async mutex so concurrent senders never
//! interleave frames. Reading happens on a task owned by the comms manager.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::errors::{NetchatError, Result};
use crate::packet::{ConnectionSetup, Packet, Payload};
use crate::serialization::SendReceiveOptions;
use crate::types::{ConnectionInfo, Endpoint, NetworkIdentifier};
use crate::wire::write_packet;

/// Identifies a connection within one comms manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct ConnectionInner {
    id: ConnectionId,
    info: RwLock<ConnectionInfo>,
    writer: Mutex<BoxedWriter>,
    default_options: SendReceiveOptions,
    max_frame_size: usize,
    closed: AtomicBool,
    reader_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Handle to an established connection; cheap to clone
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        info: ConnectionInfo,
        writer: BoxedWriter,
        default_options: SendReceiveOptions,
        max_frame_size: usize,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id,
                info: RwLock::new(info),
                writer: Mutex::new(writer),
                default_options,
                max_frame_size,
                closed: AtomicBool::new(false),
                reader_task: std::sync::Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Snapshot of the connection description
    pub fn info(&self) -> ConnectionInfo {
        self.inner
            .info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn remote_network_identifier(&self) -> Option<NetworkIdentifier> {
        self.inner
            .info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .remote_network_identifier
    }

    /// Record who the remote is and where it listens
    ///
    /// Announced wildcard addresses (`0.0.0.0`, `::`) are resolved against
    /// the address the remote is actually connected from.
    pub(crate) fn apply_setup(&self, setup: &ConnectionSetup) {
        let mut info = self.inner.info.write().unwrap_or_else(PoisonError::into_inner);
        let remote_ip = match &info.remote_endpoint {
            Endpoint::Tcp(addr) => Some(addr.ip()),
            Endpoint::Bluetooth(_) => None,
        };
        info.remote_network_identifier = Some(setup.network_identifier);
        info.remote_listen_endpoints = setup
            .listen_endpoints
            .iter()
            .map(|endpoint| match (endpoint, remote_ip) {
                (Endpoint::Tcp(addr), Some(ip)) if addr.ip().is_unspecified() => {
                    Endpoint::Tcp(SocketAddr::new(ip, addr.port()))
                }
                _ => endpoint.clone(),
            })
            .collect();
    }

    pub(crate) fn set_reader_task(&self, handle: JoinHandle<()>) {
        *self
            .inner
            .reader_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Mark closed; returns true only for the first caller
    pub(crate) fn mark_closed(&self) -> bool {
        !self.inner.closed.swap(true, Ordering::SeqCst)
    }

    /// Send `value` as `packet_type` using the manager's default options
    pub async fn send_object<T: Payload>(&self, packet_type: &str, value: &T) -> Result<()> {
        self.send_object_with_options(packet_type, value, self.inner.default_options)
            .await
    }

    pub async fn send_object_with_options<T: Payload>(
        &self,
        packet_type: &str,
        value: &T,
        options: SendReceiveOptions,
    ) -> Result<()> {
        let packet = Packet::new(packet_type, value, options)?;
        self.send_packet(&packet).await
    }

    pub async fn send_packet(&self, packet: &Packet) -> Result<()> {
        if self.is_closed() {
            return Err(NetchatError::connection_closed(self));
        }
        let mut writer = self.inner.writer.lock().await;
        write_packet(&mut *writer, packet, self.inner.max_frame_size).await?;
        debug!(
            connection = %self.id(),
            packet_type = %packet.header.packet_type,
            "packet sent"
        );
        Ok(())
    }

    /// Stop reading and shut down the write side
    pub(crate) async fn close(&self) {
        self.mark_closed();
        let handle = self
            .inner
            .reader_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        let mut writer = self.inner.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!(connection = %self.id(), "error shutting down writer: {}", e);
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.info())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("info", &self.info())
            .field("closed", &self.is_closed())
            .finish()
    }
}
