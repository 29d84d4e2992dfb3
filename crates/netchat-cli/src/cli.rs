//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use netchat_core::Endpoint;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send typed lines to a single peer and print incoming messages
    Console {
        /// Local endpoint to listen on (tcp://HOST:PORT or bt://ADDRESS)
        #[arg(short, long)]
        listen: Option<Endpoint>,
        /// Peer to send every line to
        #[arg(short, long)]
        peer: Option<Endpoint>,
        /// Choose the peer from the known devices list
        #[arg(long)]
        pick_peer: bool,
    },
    /// Start the relaying chat session
    Chat {
        /// Your display name
        #[arg(short, long)]
        name: Option<String>,
        /// Local endpoint to accept peers on
        #[arg(short, long)]
        listen: Option<Endpoint>,
        /// Peer that receives every message first
        #[arg(short, long)]
        server: Option<Endpoint>,
        /// Do not accept incoming connections
        #[arg(long)]
        no_local_server: bool,
    },
    /// Print the effective configuration as TOML
    Config,
}
