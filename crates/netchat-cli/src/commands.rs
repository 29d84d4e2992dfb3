//! Command handlers for the netchat CLI

use std::io;
use std::sync::Arc;

use figment::{providers::Serialized, Figment};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use netchat_core::{CommsManager, ConnectionInfo};

use crate::chat::{ChatEvent, ChatSession};
use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::console::{ConsoleDemo, EXIT_COMMAND};
use crate::error::{CliError, Result};
use crate::picker::{pick_device, LineKeys};
use crate::view::{ConsoleRenderer, QueuedView};

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Load configuration, apply the command's flags and run it
    pub async fn execute(cli: Cli) -> Result<()> {
        let figment = AppConfig::figment(cli.config.as_deref());

        match cli.command {
            Commands::Console {
                listen,
                peer,
                pick_peer,
            } => {
                let figment = with_override(figment, "console.listen", listen);
                let figment = with_override(figment, "console.peer", peer);
                Self::handle_console_command(AppConfig::extract(figment)?, pick_peer).await
            }
            Commands::Chat {
                name,
                listen,
                server,
                no_local_server,
            } => {
                let figment = with_override(figment, "chat.local_name", name);
                let figment = with_override(figment, "chat.listen", listen);
                let figment = with_override(figment, "chat.server", server);
                let figment = with_override(
                    figment,
                    "chat.local_server_enabled",
                    no_local_server.then_some(false),
                );
                Self::handle_chat_command(AppConfig::extract(figment)?).await
            }
            Commands::Config => Self::handle_config_command(AppConfig::extract(figment)?),
        }
    }

    /// Handle the console demo command
    async fn handle_console_command(config: AppConfig, pick_peer: bool) -> Result<()> {
        let demo = ConsoleDemo::new(&config.comms, config.console.clone());
        let stdin = BufReader::new(tokio::io::stdin());
        let mut stdout = io::stdout();

        let (peer, stdin) = if pick_peer {
            let mut keys = LineKeys::new(stdin);
            let discovery = config.console.discovery();
            let peer = pick_device(
                &discovery,
                config.console.discovery_method,
                &mut keys,
                &mut stdout,
            )
            .await?;
            (peer, keys.into_inner())
        } else {
            (ConnectionInfo::new(config.console.peer.clone()), stdin)
        };

        info!(peer = %peer.remote_endpoint, "Starting console demo");
        let summary = demo.run(peer, stdin, &mut stdout).await?;
        info!(sent = summary.sent, failed = summary.failed, "Console demo finished");
        Ok(())
    }

    /// Handle the chat command
    async fn handle_chat_command(config: AppConfig) -> Result<()> {
        info!(name = %config.chat.local_name, "Starting chat session");

        let (view, dispatcher) = QueuedView::spawn(ConsoleRenderer::stdout());
        let comms = CommsManager::new(config.comms.clone());
        let session = Arc::new(ChatSession::new(comms.clone(), view, config.chat));

        let (events, receiver) = mpsc::unbounded_channel();
        session.register_handlers(events.clone());

        let outcome = Self::run_chat(&session, events, receiver).await;

        comms.shutdown().await;
        drop(session);
        match dispatcher.await {
            Ok(state) => debug!(lines = state.history.len(), "view dispatcher stopped"),
            Err(e) => warn!("view dispatcher failed: {}", e),
        }
        outcome
    }

    async fn run_chat(
        session: &Arc<ChatSession<QueuedView>>,
        events: mpsc::UnboundedSender<ChatEvent>,
        receiver: mpsc::UnboundedReceiver<ChatEvent>,
    ) -> Result<()> {
        session.initialise().await?;

        let runner = Arc::clone(session);
        let session_task = tokio::spawn(async move { runner.run(receiver).await });

        let forwarded = Self::forward_input(&events).await;

        let _ = events.send(ChatEvent::Shutdown);
        session_task
            .await
            .map_err(|e| CliError::UI(format!("chat session task failed: {}", e)))?;
        forwarded
    }

    /// Queue each stdin line as a send until `exit` or end of input
    async fn forward_input(events: &mpsc::UnboundedSender<ChatEvent>) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if line == EXIT_COMMAND || events.send(ChatEvent::Send(line)).is_err() {
                break;
            }
        }
        Ok(())
    }

    /// Handle the config command
    fn handle_config_command(config: AppConfig) -> Result<()> {
        print!("{}", config.to_toml()?);
        Ok(())
    }
}

/// Merge a command line value over the loaded layers when present
fn with_override<T: Serialize>(figment: Figment, key: &str, value: Option<T>) -> Figment {
    match value {
        Some(value) => figment.merge(Serialized::default(key, value)),
        None => figment,
    }
}
