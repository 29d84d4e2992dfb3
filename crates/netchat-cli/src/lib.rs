//! netchat CLI library
//!
//! Console messaging demo, interactive device picker, and a relaying chat
//! session rendered through a queued terminal view.

pub mod chat;
pub mod cli;
pub mod commands;
pub mod config;
pub mod console;
pub mod error;
pub mod picker;
pub mod view;

pub use chat::{ChatConfig, ChatEvent, ChatSession};
pub use cli::{Cli, Commands};
pub use config::AppConfig;
pub use console::{ConsoleConfig, ConsoleDemo};
pub use error::{CliError, Result};
pub use view::{ChatView, ConsoleRenderer, FontStyle, QueuedView};
