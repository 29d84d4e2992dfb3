//! Comms manager
//!
//! Owns the handler registry, the listeners and the table of open
//! connections. Every connection gets one reader task that decodes frames
//! and dispatches them to the registered handlers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::CommsConfig;
use crate::connection::{Connection, ConnectionId};
use crate::errors::{ConnectionError, NetchatError, Result};
use crate::handlers::PacketHandlerRegistry;
use crate::packet::{ConnectionSetup, PacketHeader, Payload, CONNECTION_SETUP_PACKET_TYPE};
use crate::types::{ConnectionInfo, ConnectionType, Endpoint, NetworkIdentifier};
use crate::wire::read_packet;

struct ListenerHandle {
    endpoint: Endpoint,
    task: JoinHandle<()>,
}

struct CommsInner {
    config: CommsConfig,
    network_identifier: NetworkIdentifier,
    handlers: PacketHandlerRegistry,
    connections: RwLock<HashMap<ConnectionId, Connection>>,
    listeners: Mutex<Vec<ListenerHandle>>,
    listen_endpoints: std::sync::RwLock<Vec<Endpoint>>,
    next_connection_id: AtomicU64,
    shut_down: AtomicBool,
}

/// Connection manager for one local comms instance; cheap to clone
#[derive(Clone)]
pub struct CommsManager {
    inner: Arc<CommsInner>,
}

impl CommsManager {
    /// Create a manager from an explicit configuration
    pub fn new(config: CommsConfig) -> Self {
        let network_identifier = NetworkIdentifier::generate();
        info!(%network_identifier, "comms manager created");
        Self {
            inner: Arc::new(CommsInner {
                config,
                network_identifier,
                handlers: PacketHandlerRegistry::new(),
                connections: RwLock::new(HashMap::new()),
                listeners: Mutex::new(Vec::new()),
                listen_endpoints: std::sync::RwLock::new(Vec::new()),
                next_connection_id: AtomicU64::new(1),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn network_identifier(&self) -> NetworkIdentifier {
        self.inner.network_identifier
    }

    pub fn config(&self) -> &CommsConfig {
        &self.inner.config
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------------
    // Handlers
    // ------------------------------------------------------------------------

    /// Register a handler for incoming `packet_type` packets carrying `T`
    pub fn append_incoming_packet_handler<T, F>(&self, packet_type: &str, handler: F)
    where
        T: Payload,
        F: Fn(&PacketHeader, &ConnectionInfo, T) + Send + Sync + 'static,
    {
        self.inner.handlers.append::<T, F>(packet_type, handler);
    }

    /// Register a handler run after any connection closes
    pub fn append_connection_close_handler<F>(&self, handler: F)
    where
        F: Fn(&ConnectionInfo) + Send + Sync + 'static,
    {
        self.inner.handlers.append_close_handler(handler);
    }

    pub fn handlers(&self) -> &PacketHandlerRegistry {
        &self.inner.handlers
    }

    // ------------------------------------------------------------------------
    // Listening
    // ------------------------------------------------------------------------

    /// Start accepting connections on `endpoint`
    ///
    /// Returns the bound endpoint, which differs from the request when port 0
    /// was asked for.
    pub async fn start_listening(&self, endpoint: &Endpoint) -> Result<Endpoint> {
        self.ensure_running()?;
        let addr = match endpoint {
            Endpoint::Tcp(addr) => *addr,
            Endpoint::Bluetooth(_) => {
                return Err(NetchatError::unsupported(ConnectionType::Bluetooth));
            }
        };

        let listener = TcpListener::bind(addr).await?;
        let bound = Endpoint::Tcp(listener.local_addr()?);
        info!(endpoint = %bound, "listening for incoming connections");

        let manager = self.clone();
        let local = bound.clone();
        let task = tokio::spawn(async move {
            let mut failures = 0u32;
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        failures = 0;
                        let accepted_on = stream
                            .local_addr()
                            .map(Endpoint::Tcp)
                            .unwrap_or_else(|_| local.clone());
                        let info =
                            ConnectionInfo::new(Endpoint::Tcp(peer)).with_local_endpoint(accepted_on);
                        if let Err(e) = manager.attach_stream(stream, info).await {
                            warn!("failed to set up incoming connection from {}: {}", peer, e);
                        }
                    }
                    Err(e) => {
                        failures = failures.saturating_add(1);
                        let delay = accept_backoff(failures);
                        warn!(endpoint = %local, ?delay, "accept failed: {}", e);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        });

        self.inner
            .listen_endpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(bound.clone());
        self.inner.listeners.lock().await.push(ListenerHandle {
            endpoint: bound.clone(),
            task,
        });
        Ok(bound)
    }

    /// Endpoints currently accepting connections of `connection_type`
    pub fn existing_local_listen_endpoints(&self, connection_type: ConnectionType) -> Vec<Endpoint> {
        self.inner
            .listen_endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.connection_type() == connection_type)
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------------

    /// Return the open connection to `target`, establishing one if needed
    pub async fn get_connection(&self, target: &ConnectionInfo) -> Result<Connection> {
        self.ensure_running()?;

        if let Some(existing) = self.find_connection(target).await {
            return Ok(existing);
        }

        let addr = match &target.remote_endpoint {
            Endpoint::Tcp(addr) => *addr,
            Endpoint::Bluetooth(_) => {
                return Err(NetchatError::unsupported(ConnectionType::Bluetooth));
            }
        };

        debug!(endpoint = %target.remote_endpoint, "establishing connection");
        let stream = match self.inner.config.connection_establish_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| {
                    NetchatError::Connection(ConnectionError::Timeout {
                        endpoint: target.remote_endpoint.to_string(),
                        duration_ms: timeout.as_millis() as u64,
                    })
                })?,
            None => TcpStream::connect(addr).await,
        }
        .map_err(|e| NetchatError::establish_failed(&target.remote_endpoint, e.to_string()))?;

        let local = Endpoint::Tcp(stream.local_addr()?);
        let info = ConnectionInfo::new(target.remote_endpoint.clone()).with_local_endpoint(local);
        self.attach_stream(stream, info).await
    }

    /// Adopt an already-open byte stream as a connection
    ///
    /// Sends the setup packet and starts the reader task.
    pub async fn attach_stream<S>(&self, stream: S, info: ConnectionInfo) -> Result<Connection>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.ensure_running()?;
        let (reader, writer) = tokio::io::split(stream);

        let id = ConnectionId(self.inner.next_connection_id.fetch_add(1, Ordering::SeqCst));
        let connection = Connection::new(
            id,
            info,
            Box::new(writer),
            self.inner.config.default_send_receive_options,
            self.inner.config.max_frame_size,
        );

        let setup = ConnectionSetup {
            network_identifier: self.inner.network_identifier,
            listen_endpoints: self
                .inner
                .listen_endpoints
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        };
        connection
            .send_object(CONNECTION_SETUP_PACKET_TYPE, &setup)
            .await?;

        self.inner
            .connections
            .write()
            .await
            .insert(id, connection.clone());

        let task = tokio::spawn(read_loop(self.clone(), connection.clone(), reader));
        connection.set_reader_task(task);

        info!(connection = %connection, id = %id, "connection established");
        Ok(connection)
    }

    /// All open connections
    pub async fn existing_connections(&self) -> Vec<Connection> {
        let mut connections: Vec<Connection> = self
            .inner
            .connections
            .read()
            .await
            .values()
            .filter(|c| !c.is_closed())
            .cloned()
            .collect();
        connections.sort_by_key(Connection::id);
        connections
    }

    /// Open connection to the peer `target` describes, in either direction
    async fn find_connection(&self, target: &ConnectionInfo) -> Option<Connection> {
        let connections = self.inner.connections.read().await;
        let mut matching: Vec<&Connection> = connections
            .values()
            .filter(|c| !c.is_closed() && c.info().reaches(target))
            .collect();
        matching.sort_by_key(|c| c.id());
        matching.first().map(|c| (*c).clone())
    }

    async fn remove_connection(&self, id: ConnectionId) {
        self.inner.connections.write().await.remove(&id);
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    /// Stop listening, close every connection and refuse further work
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("comms shutting down");

        for listener in self.inner.listeners.lock().await.drain(..) {
            listener.task.abort();
            debug!(endpoint = %listener.endpoint, "listener stopped");
        }
        self.inner
            .listen_endpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        let connections: Vec<Connection> = self
            .inner
            .connections
            .write()
            .await
            .drain()
            .map(|(_, c)| c)
            .collect();
        for connection in connections {
            let first_close = !connection.is_closed();
            connection.close().await;
            if first_close {
                self.inner.handlers.notify_closed(&connection.info());
            }
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            Err(NetchatError::ShutDown)
        } else {
            Ok(())
        }
    }
}

const ACCEPT_BACKOFF_BASE: Duration = Duration::from_millis(50);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Pause before retrying after `failures` accept errors in a row
fn accept_backoff(failures: u32) -> Duration {
    let shift = failures.saturating_sub(1).min(5);
    (ACCEPT_BACKOFF_BASE * (1u32 << shift)).min(ACCEPT_BACKOFF_MAX)
}

async fn read_loop<S>(manager: CommsManager, connection: Connection, mut reader: ReadHalf<S>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let max_frame_size = manager.inner.config.max_frame_size;
    loop {
        match read_packet(&mut reader, max_frame_size).await {
            Ok(packet) if packet.header.packet_type == CONNECTION_SETUP_PACKET_TYPE => {
                match packet.decode_payload::<ConnectionSetup>() {
                    Ok(setup) => {
                        debug!(
                            connection = %connection.id(),
                            remote = %setup.network_identifier,
                            "connection setup received"
                        );
                        connection.apply_setup(&setup);
                    }
                    Err(e) => warn!(connection = %connection.id(), "bad setup packet: {}", e),
                }
            }
            Ok(packet) => {
                let info = connection.info();
                let handled = manager.inner.handlers.dispatch(&packet, &info);
                debug!(
                    connection = %connection.id(),
                    packet_type = %packet.header.packet_type,
                    handled,
                    "packet received"
                );
            }
            Err(e) if e.is_disconnect() => {
                info!(connection = %connection, "connection closed by remote");
                break;
            }
            Err(e) => {
                warn!(connection = %connection, "closing connection after read error: {}", e);
                break;
            }
        }
    }

    manager.remove_connection(connection.id()).await;
    if connection.mark_closed() {
        manager.inner.handlers.notify_closed(&connection.info());
    }
}
