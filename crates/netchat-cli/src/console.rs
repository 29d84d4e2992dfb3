//! Console messaging demo
//!
//! Prints every `"Message"` packet that arrives, then reads lines from the
//! input and sends each one to a single peer until `exit` is typed.

use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use netchat_core::{
    CommsConfig, CommsManager, ConnectionInfo, DiscoveredDevice, DiscoveryMethod, Endpoint,
    PeerDiscovery, StaticDiscovery, MESSAGE_PACKET_TYPE,
};

use crate::error::Result;

pub const EXIT_COMMAND: &str = "exit";
pub const INPUT_PROMPT: &str = "\nPlease enter your message and press enter (Type 'exit' to quit):";

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Console demo settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub listen: Endpoint,
    /// Peer every line is sent to
    pub peer: Endpoint,
    /// Unbounded when unset
    pub connection_establish_timeout_ms: Option<u64>,
    pub discovery_method: DiscoveryMethod,
    /// Devices offered by the interactive picker
    pub known_peers: Vec<DiscoveredDevice>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            listen: Endpoint::Tcp(SocketAddr::from(([0, 0, 0, 0], 10000))),
            peer: Endpoint::Tcp(SocketAddr::from(([127, 0, 0, 1], 10000))),
            connection_establish_timeout_ms: None,
            discovery_method: DiscoveryMethod::Tcp,
            known_peers: Vec::new(),
        }
    }
}

impl ConsoleConfig {
    /// Comms settings for the demo, with its own establish timeout applied
    pub fn comms_config(&self, base: &CommsConfig) -> CommsConfig {
        base.clone().with_connection_establish_timeout(
            self.connection_establish_timeout_ms.map(Duration::from_millis),
        )
    }

    pub fn discovery(&self) -> StaticDiscovery {
        StaticDiscovery::new(self.known_peers.clone())
    }
}

// ----------------------------------------------------------------------------
// Input Loop
// ----------------------------------------------------------------------------

/// Where the input loop sends each line
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Scan for peers, returning how many were found
    async fn discover(&self) -> Result<usize>;

    async fn send_message(&self, text: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub sent: usize,
    pub failed: usize,
}

/// Prompt, read and send until `exit` or end of input
pub async fn run_console_loop<R, W, S>(input: R, out: &mut W, sink: &S) -> Result<LoopSummary>
where
    R: AsyncBufRead + Unpin,
    W: Write,
    S: MessageSink + ?Sized,
{
    let mut lines = input.lines();
    let mut summary = LoopSummary::default();

    loop {
        writeln!(out, "{}", INPUT_PROMPT)?;
        out.flush()?;

        let Some(line) = lines.next_line().await? else {
            debug!("console input closed");
            break;
        };
        if line == EXIT_COMMAND {
            break;
        }

        match sink.discover().await {
            Ok(found) => debug!(found, "peer discovery finished"),
            Err(e) => warn!("peer discovery failed: {}", e),
        }

        match sink.send_message(&line).await {
            Ok(()) => summary.sent += 1,
            Err(e) => {
                warn!("send failed: {}", e);
                writeln!(out, "Failed to send message: {}", e)?;
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

/// Text printed for an incoming `"Message"` packet
pub fn format_incoming(from: &ConnectionInfo, text: &str) -> String {
    format!("\n  ... Incoming message from {} saying '{}'.", from, text)
}

// ----------------------------------------------------------------------------
// Comms-backed Sink
// ----------------------------------------------------------------------------

pub struct CommsSink {
    comms: CommsManager,
    discovery: Arc<dyn PeerDiscovery>,
    method: DiscoveryMethod,
    peer: ConnectionInfo,
}

impl CommsSink {
    pub fn new(
        comms: CommsManager,
        discovery: Arc<dyn PeerDiscovery>,
        method: DiscoveryMethod,
        peer: ConnectionInfo,
    ) -> Self {
        Self {
            comms,
            discovery,
            method,
            peer,
        }
    }
}

#[async_trait]
impl MessageSink for CommsSink {
    async fn discover(&self) -> Result<usize> {
        Ok(self.discovery.discover_peers(self.method).await?.len())
    }

    async fn send_message(&self, text: &str) -> Result<()> {
        let connection = self.comms.get_connection(&self.peer).await?;
        connection
            .send_object(MESSAGE_PACKET_TYPE, &text.to_string())
            .await?;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Demo
// ----------------------------------------------------------------------------

pub struct ConsoleDemo {
    comms: CommsManager,
    config: ConsoleConfig,
}

impl ConsoleDemo {
    pub fn new(base: &CommsConfig, config: ConsoleConfig) -> Self {
        Self {
            comms: CommsManager::new(config.comms_config(base)),
            config,
        }
    }

    pub fn comms(&self) -> &CommsManager {
        &self.comms
    }

    /// Print incoming `"Message"` strings to stdout
    pub fn register_message_handler(&self) {
        self.comms
            .append_incoming_packet_handler::<String, _>(MESSAGE_PACKET_TYPE, |_, from, text| {
                println!("{}", format_incoming(from, &text));
            });
    }

    /// Start listening and print the local endpoints
    pub async fn start<W: Write>(&self, out: &mut W) -> Result<Vec<Endpoint>> {
        self.comms.start_listening(&self.config.listen).await?;
        let endpoints = self
            .comms
            .existing_local_listen_endpoints(self.config.listen.connection_type());

        writeln!(out, "Listening for messages on:")?;
        for endpoint in &endpoints {
            writeln!(out, "{}", endpoint)?;
        }
        Ok(endpoints)
    }

    /// Full demo: handler, listener, input loop, shutdown
    pub async fn run<R, W>(&self, peer: ConnectionInfo, input: R, out: &mut W) -> Result<LoopSummary>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        self.register_message_handler();
        let outcome = match self.start(out).await {
            Ok(_) => {
                info!(peer = %peer.remote_endpoint, "console demo ready");
                let sink = CommsSink::new(
                    self.comms.clone(),
                    Arc::new(self.config.discovery()),
                    self.config.discovery_method,
                    peer,
                );
                run_console_loop(input, out, &sink).await
            }
            Err(e) => Err(e),
        };

        self.comms.shutdown().await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::CliError;

    #[derive(Default)]
    struct RecordingSink {
        discoveries: Mutex<usize>,
        sent: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn discover(&self) -> Result<usize> {
            *self.discoveries.lock().unwrap() += 1;
            Ok(0)
        }

        async fn send_message(&self, text: &str) -> Result<()> {
            self.sent.lock().unwrap().push(text.to_string());
            if self.fail {
                return Err(CliError::UI("peer gone".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_exit_sends_nothing() {
        let sink = RecordingSink::default();
        let mut out = Vec::new();
        let summary = run_console_loop("exit\n".as_bytes(), &mut out, &sink)
            .await
            .unwrap();

        assert_eq!(summary, LoopSummary::default());
        assert!(sink.sent.lock().unwrap().is_empty());
        assert_eq!(*sink.discoveries.lock().unwrap(), 0);
        let printed = String::from_utf8(out).unwrap();
        assert_eq!(printed.matches("(Type 'exit' to quit):").count(), 1);
    }

    #[tokio::test]
    async fn test_each_line_sends_once() {
        let sink = RecordingSink::default();
        let mut out = Vec::new();
        let summary = run_console_loop("hello\nthere\nexit\nignored\n".as_bytes(), &mut out, &sink)
            .await
            .unwrap();

        assert_eq!(summary.sent, 2);
        assert_eq!(*sink.sent.lock().unwrap(), vec!["hello", "there"]);
        assert_eq!(*sink.discoveries.lock().unwrap(), 2);
        let printed = String::from_utf8(out).unwrap();
        assert_eq!(printed.matches(INPUT_PROMPT).count(), 3);
    }

    #[tokio::test]
    async fn test_end_of_input_stops_loop() {
        let sink = RecordingSink::default();
        let mut out = Vec::new();
        let summary = run_console_loop("only line".as_bytes(), &mut out, &sink)
            .await
            .unwrap();
        assert_eq!(summary.sent, 1);
    }

    #[tokio::test]
    async fn test_send_failure_keeps_looping() {
        let sink = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };
        let mut out = Vec::new();
        let summary = run_console_loop("a\nb\nexit\n".as_bytes(), &mut out, &sink)
            .await
            .unwrap();

        assert_eq!(summary, LoopSummary { sent: 0, failed: 2 });
        let printed = String::from_utf8(out).unwrap();
        assert_eq!(printed.matches("Failed to send message").count(), 2);
    }

    #[test]
    fn test_format_incoming() {
        let from = ConnectionInfo::new("127.0.0.1:9000".parse().unwrap());
        let text = format_incoming(&from, "hi");
        assert!(text.starts_with("\n  ... Incoming message from "));
        assert!(text.ends_with(" saying 'hi'."));
    }

    #[test]
    fn test_default_timeout_is_unbounded() {
        let config = ConsoleConfig::default();
        let comms = config.comms_config(&CommsConfig::default());
        assert_eq!(comms.connection_establish_timeout(), None);
    }
}
