//! Chat session
//!
//! Tracks the last message seen from every peer, relays messages onward a
//! bounded number of hops, and drives a [`ChatView`]. Network callbacks only
//! enqueue [`ChatEvent`]s; one task runs [`ChatSession::run`] and does the
//! actual work.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use netchat_core::{
    ChatMessage, CommsManager, ConnectionInfo, Endpoint, NetworkIdentifier,
    CHAT_MESSAGE_PACKET_TYPE,
};

use crate::error::Result;
use crate::view::ChatView;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Chat session settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Name shown next to our messages
    pub local_name: String,
    /// Where to accept peers when the local server is enabled
    pub listen: Endpoint,
    pub local_server_enabled: bool,
    /// Peer every message is sent to first
    pub server: Option<Endpoint>,
    /// Messages are forwarded while their relay count is below this
    pub relay_maximum: u8,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            local_name: default_local_name(),
            listen: Endpoint::Tcp(std::net::SocketAddr::from(([0, 0, 0, 0], 10000))),
            local_server_enabled: true,
            server: None,
            relay_maximum: 3,
        }
    }
}

/// Host name of this machine, or "Anonymous" when it is unavailable
pub fn default_local_name() -> String {
    gethostname::gethostname()
        .to_str()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(FALLBACK_LOCAL_NAME)
        .to_string()
}

pub const FALLBACK_LOCAL_NAME: &str = "Anonymous";

// ----------------------------------------------------------------------------
// Events and Outcomes
// ----------------------------------------------------------------------------

/// Work item for the session task
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Incoming {
        from: ConnectionInfo,
        message: ChatMessage,
    },
    ConnectionClosed(ConnectionInfo),
    Send(String),
    Shutdown,
}

/// What happened to an incoming message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingOutcome {
    /// New message, shown and forwarded to this many connections
    Displayed { relayed_to: usize },
    /// Already seen, ignored
    Duplicate,
}

/// What happened to an outgoing message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Empty,
    Sent { delivered_to: usize, failed: usize },
}

// ----------------------------------------------------------------------------
// Chat Session
// ----------------------------------------------------------------------------

pub struct ChatSession<V: ChatView> {
    comms: CommsManager,
    view: V,
    config: ChatConfig,
    last_peer_messages: Arc<Mutex<HashMap<NetworkIdentifier, ChatMessage>>>,
    send_index: AtomicU64,
}

impl<V: ChatView> ChatSession<V> {
    pub fn new(comms: CommsManager, view: V, config: ChatConfig) -> Self {
        Self {
            comms,
            view,
            config,
            last_peer_messages: Arc::new(Mutex::new(HashMap::new())),
            send_index: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn comms(&self) -> &CommsManager {
        &self.comms
    }

    /// Route chat packets and connection closures into `events`
    pub fn register_handlers(&self, events: mpsc::UnboundedSender<ChatEvent>) {
        let incoming = events.clone();
        self.comms.append_incoming_packet_handler::<ChatMessage, _>(
            CHAT_MESSAGE_PACKET_TYPE,
            move |_, from, message| {
                let _ = incoming.send(ChatEvent::Incoming {
                    from: from.clone(),
                    message,
                });
            },
        );
        self.comms.append_connection_close_handler(move |info| {
            let _ = events.send(ChatEvent::ConnectionClosed(info.clone()));
        });
    }

    /// Start the local server if enabled and report where it listens
    pub async fn initialise(&self) -> Result<()> {
        if !self.config.local_server_enabled {
            self.view.append_line("Local server mode disabled.");
            return Ok(());
        }

        let connection_type = self.config.listen.connection_type();
        self.comms.start_listening(&self.config.listen).await?;
        self.view.append_line(&format!(
            "Listening for incoming {} connections on:",
            connection_type
        ));
        for endpoint in self.comms.existing_local_listen_endpoints(connection_type) {
            self.view.append_line(&endpoint.to_string());
        }
        Ok(())
    }

    /// Process events until the channel closes or a shutdown arrives
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<ChatEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ChatEvent::Incoming { from, message } => {
                    self.handle_incoming_chat_message(&from, message).await;
                }
                ChatEvent::ConnectionClosed(info) => self.handle_connection_closed(&info).await,
                ChatEvent::Send(text) => {
                    self.send_message(&text).await;
                }
                ChatEvent::Shutdown => break,
            }
        }
        debug!("chat session loop finished");
    }

    /// Base handling followed by a users box refresh
    pub async fn handle_incoming_chat_message(
        &self,
        from: &ConnectionInfo,
        message: ChatMessage,
    ) -> IncomingOutcome {
        let outcome = self.record_incoming(from, message).await;
        self.refresh_messages_from_box().await;
        outcome
    }

    async fn record_incoming(&self, from: &ConnectionInfo, message: ChatMessage) -> IncomingOutcome {
        let is_new = {
            let mut peers = self.last_peer_messages.lock().await;
            let is_new = peers
                .get(&message.source_identifier)
                .map_or(true, |last| last.message_index < message.message_index);
            if is_new {
                peers.insert(message.source_identifier, message.clone());
            }
            is_new
        };

        if !is_new {
            debug!(
                source = %message.source_identifier,
                index = message.message_index,
                "duplicate chat message ignored"
            );
            return IncomingOutcome::Duplicate;
        }

        self.view
            .append_line(&format!("{} - {}", message.source_name, message.message));

        let relayed_to = if message.relay_count < self.config.relay_maximum {
            self.relay(from, &message).await
        } else {
            0
        };
        IncomingOutcome::Displayed { relayed_to }
    }

    async fn relay(&self, from: &ConnectionInfo, message: &ChatMessage) -> usize {
        let relayed = message.relayed();
        let mut count = 0;
        for connection in self.comms.existing_connections().await {
            let info = connection.info();
            let is_origin = info.remote_endpoint == from.remote_endpoint
                && info.local_endpoint == from.local_endpoint;
            let is_hop = info.remote_network_identifier.is_some()
                && info.remote_network_identifier == from.remote_network_identifier;
            let is_author = info.remote_network_identifier == Some(message.source_identifier);
            if is_origin || is_hop || is_author {
                continue;
            }
            match connection
                .send_object(CHAT_MESSAGE_PACKET_TYPE, &relayed)
                .await
            {
                Ok(()) => count += 1,
                Err(e) => warn!(connection = %connection, "relay failed: {}", e),
            }
        }
        if count > 0 {
            debug!(relay_count = relayed.relay_count, count, "chat message relayed");
        }
        count
    }

    /// Send `text` to the server (if any) and every other open connection
    pub async fn send_message(&self, text: &str) -> SendOutcome {
        if text.trim().is_empty() {
            return SendOutcome::Empty;
        }

        let index = self.send_index.fetch_add(1, Ordering::SeqCst);
        let message = ChatMessage::new(
            self.comms.network_identifier(),
            self.config.local_name.clone(),
            text,
            index,
        );
        self.last_peer_messages
            .lock()
            .await
            .insert(message.source_identifier, message.clone());

        let mut delivered_to = 0;
        let mut failed = 0;
        let mut server_connection = None;

        if let Some(server) = &self.config.server {
            let result = match self.comms.get_connection(&ConnectionInfo::new(server.clone())).await {
                Ok(connection) => {
                    server_connection = Some(connection.id());
                    connection.send_object(CHAT_MESSAGE_PACKET_TYPE, &message).await
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => delivered_to += 1,
                Err(e) => {
                    warn!(%server, "send to server failed: {}", e);
                    failed += 1;
                    self.view.show_message(&format!(
                        "A communication error occurred while trying to send message to {}",
                        server
                    ));
                }
            }
        }

        for connection in self.comms.existing_connections().await {
            if Some(connection.id()) == server_connection {
                continue;
            }
            match connection.send_object(CHAT_MESSAGE_PACKET_TYPE, &message).await {
                Ok(()) => delivered_to += 1,
                Err(e) => {
                    warn!(connection = %connection, "send failed: {}", e);
                    failed += 1;
                }
            }
        }

        info!(index, delivered_to, failed, "chat message sent");
        self.view
            .append_line(&format!("{} - {}", self.config.local_name, text));
        self.view.clear_input_line();
        SendOutcome::Sent {
            delivered_to,
            failed,
        }
    }

    /// Forget the peer behind a closed connection
    pub async fn handle_connection_closed(&self, info: &ConnectionInfo) {
        let Some(remote) = info.remote_network_identifier else {
            return;
        };
        let removed = self.last_peer_messages.lock().await.remove(&remote);
        if let Some(last) = removed {
            self.view.append_line(&format!(
                "Connection with '{}' has been closed.",
                last.source_name
            ));
            self.refresh_messages_from_box().await;
        }
    }

    /// Rebuild the users box from the peer map
    pub async fn refresh_messages_from_box(&self) {
        let peers = self.last_peer_messages.lock().await;
        let users = sorted_unique_names(peers.values().map(|m| m.source_name.as_str()));
        // Enqueue while holding the lock so refreshes land in map order
        self.view.set_users(users);
    }
}

/// Names sorted lexicographically with duplicates removed
pub fn sorted_unique_names<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut users: Vec<String> = names.map(str::to_string).collect();
    users.sort();
    users.dedup();
    users
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::view::FontStyle;
    use netchat_core::CommsConfig;
    use proptest::prelude::*;

    /// View that records calls synchronously
    #[derive(Default, Clone)]
    struct RecordingView {
        lines: Arc<StdMutex<Vec<String>>>,
        users: Arc<StdMutex<Vec<Vec<String>>>>,
        notices: Arc<StdMutex<Vec<String>>>,
        input_clears: Arc<StdMutex<usize>>,
    }

    impl ChatView for RecordingView {
        fn append_styled_line(&self, _style: FontStyle, text: &str, _add_new_line: bool) {
            self.lines.lock().unwrap().push(text.to_string());
        }
        fn clear_chat_history(&self) {
            self.lines.lock().unwrap().clear();
        }
        fn clear_input_line(&self) {
            *self.input_clears.lock().unwrap() += 1;
        }
        fn show_message(&self, message: &str) {
            self.notices.lock().unwrap().push(message.to_string());
        }
        fn set_users(&self, users: Vec<String>) {
            self.users.lock().unwrap().push(users);
        }
    }

    fn session() -> (ChatSession<RecordingView>, RecordingView) {
        let view = RecordingView::default();
        let config = ChatConfig {
            local_name: "me".to_string(),
            local_server_enabled: false,
            ..ChatConfig::default()
        };
        let session = ChatSession::new(CommsManager::new(CommsConfig::default()), view.clone(), config);
        (session, view)
    }

    fn from() -> ConnectionInfo {
        ConnectionInfo::new("127.0.0.1:4000".parse().unwrap())
    }

    #[test]
    fn test_default_name_is_host_name() {
        let name = default_local_name();
        assert!(!name.trim().is_empty());
        let host = gethostname::gethostname();
        match host.to_str().map(str::trim).filter(|h| !h.is_empty()) {
            Some(host) => assert_eq!(name, host),
            None => assert_eq!(name, FALLBACK_LOCAL_NAME),
        }
        assert_eq!(ChatConfig::default().local_name, name);
    }

    #[test]
    fn test_sorted_unique_names() {
        let names = ["carol", "alice", "bob", "alice"];
        assert_eq!(
            sorted_unique_names(names.into_iter()),
            vec!["alice", "bob", "carol"]
        );
    }

    proptest! {
        #[test]
        fn prop_users_sorted_and_unique(names in proptest::collection::vec("[a-z]{0,6}", 0..24)) {
            let users = sorted_unique_names(names.iter().map(String::as_str));
            prop_assert!(users.windows(2).all(|w| w[0] < w[1]));
            for name in &names {
                prop_assert!(users.contains(name));
            }
        }
    }

    #[tokio::test]
    async fn test_incoming_shown_once_per_index() {
        let (session, view) = session();
        let author = NetworkIdentifier::generate();

        let first = ChatMessage::new(author, "alice", "hello", 1);
        assert_eq!(
            session.handle_incoming_chat_message(&from(), first.clone()).await,
            IncomingOutcome::Displayed { relayed_to: 0 }
        );
        assert_eq!(
            session.handle_incoming_chat_message(&from(), first).await,
            IncomingOutcome::Duplicate
        );
        let older = ChatMessage::new(author, "alice", "stale", 0);
        assert_eq!(
            session.handle_incoming_chat_message(&from(), older).await,
            IncomingOutcome::Duplicate
        );
        let newer = ChatMessage::new(author, "alice", "again", 2);
        session.handle_incoming_chat_message(&from(), newer).await;

        assert_eq!(
            *view.lines.lock().unwrap(),
            vec!["alice - hello".to_string(), "alice - again".to_string()]
        );
        // Users box refreshed after every incoming message
        assert_eq!(view.users.lock().unwrap().len(), 4);
        assert_eq!(
            view.users.lock().unwrap().last().unwrap(),
            &vec!["alice".to_string()]
        );
        session.comms().shutdown().await;
    }

    #[tokio::test]
    async fn test_users_sorted_across_peers() {
        let (session, view) = session();
        for name in ["zed", "amy", "amy"] {
            let message = ChatMessage::new(NetworkIdentifier::generate(), name, "hi", 0);
            session.handle_incoming_chat_message(&from(), message).await;
        }
        assert_eq!(
            view.users.lock().unwrap().last().unwrap(),
            &vec!["amy".to_string(), "zed".to_string()]
        );
        session.comms().shutdown().await;
    }

    #[tokio::test]
    async fn test_send_empty_is_ignored() {
        let (session, view) = session();
        assert_eq!(session.send_message("   ").await, SendOutcome::Empty);
        assert!(view.lines.lock().unwrap().is_empty());
        assert_eq!(*view.input_clears.lock().unwrap(), 0);
        session.comms().shutdown().await;
    }

    #[tokio::test]
    async fn test_send_without_peers_still_echoes() {
        let (session, view) = session();
        let outcome = session.send_message("hi all").await;
        assert_eq!(
            outcome,
            SendOutcome::Sent {
                delivered_to: 0,
                failed: 0
            }
        );
        assert_eq!(*view.lines.lock().unwrap(), vec!["me - hi all".to_string()]);
        assert_eq!(*view.input_clears.lock().unwrap(), 1);

        session.refresh_messages_from_box().await;
        assert_eq!(
            view.users.lock().unwrap().last().unwrap(),
            &vec!["me".to_string()]
        );
        session.comms().shutdown().await;
    }

    #[tokio::test]
    async fn test_unreachable_server_shows_message() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let view = RecordingView::default();
        let config = ChatConfig {
            local_name: "me".to_string(),
            local_server_enabled: false,
            server: Some(format!("127.0.0.1:{}", port).parse().unwrap()),
            ..ChatConfig::default()
        };
        let session = ChatSession::new(CommsManager::new(CommsConfig::default()), view.clone(), config);

        let outcome = session.send_message("anyone?").await;
        assert_eq!(
            outcome,
            SendOutcome::Sent {
                delivered_to: 0,
                failed: 1
            }
        );
        let notices = view.notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].starts_with("A communication error occurred"));
        drop(notices);
        session.comms().shutdown().await;
    }

    #[tokio::test]
    async fn test_closed_connection_forgets_peer() {
        let (session, view) = session();
        let author = NetworkIdentifier::generate();
        session
            .handle_incoming_chat_message(&from(), ChatMessage::new(author, "alice", "hi", 0))
            .await;

        let mut closed = from();
        closed.remote_network_identifier = Some(author);
        session.handle_connection_closed(&closed).await;

        let lines = view.lines.lock().unwrap().clone();
        assert_eq!(
            lines.last().unwrap(),
            "Connection with 'alice' has been closed."
        );
        assert!(view.users.lock().unwrap().last().unwrap().is_empty());
        session.comms().shutdown().await;
    }

    #[tokio::test]
    async fn test_initialise_without_local_server() {
        let (session, view) = session();
        session.initialise().await.unwrap();
        assert_eq!(
            *view.lines.lock().unwrap(),
            vec!["Local server mode disabled.".to_string()]
        );
        session.comms().shutdown().await;
    }
}
