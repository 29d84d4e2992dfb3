//! Error handling for the netchat CLI

use thiserror::Error;

use crate::picker::PickerError;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("netchat core error: {0}")]
    Core(#[from] netchat_core::NetchatError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration loading failed: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("UI error: {0}")]
    UI(String),

    #[error("Device selection failed: {0}")]
    Picker(#[from] PickerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

impl From<figment::Error> for CliError {
    fn from(err: figment::Error) -> Self {
        CliError::Figment(Box::new(err))
    }
}
