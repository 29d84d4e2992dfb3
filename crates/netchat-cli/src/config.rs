//! netchat CLI configuration
//!
//! Layered with figment, lowest priority first:
//! - built-in defaults
//! - `netchat.toml` in the working directory
//! - `~/.netchat/netchat.toml`
//! - the file given with `--config`
//! - `NETCHAT_` environment variables, `__` separating nested keys
//!
//! Command line flags are merged on top by the command dispatcher.

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use netchat_core::CommsConfig;

use crate::chat::ChatConfig;
use crate::console::ConsoleConfig;
use crate::error::{CliError, Result};

pub const CONFIG_FILE_NAME: &str = "netchat.toml";
pub const ENV_PREFIX: &str = "NETCHAT_";

// ----------------------------------------------------------------------------
// Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the netchat CLI
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Messaging layer settings shared by both demos
    pub comms: CommsConfig,
    pub console: ConsoleConfig,
    pub chat: ChatConfig,
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load every layer and validate the result
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::extract(Self::figment(explicit))
    }

    /// Every configuration layer, ready for further overrides
    pub fn figment(explicit: Option<&Path>) -> Figment {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE_NAME));

        if let Some(path) = Self::default_config_path() {
            figment = figment.merge(Toml::file(path));
        }
        if let Some(path) = explicit {
            debug!("Loading configuration from: {}", path.display());
            figment = figment.merge(Toml::file(path));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn extract(figment: Figment) -> Result<Self> {
        let config: AppConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// `~/.netchat/netchat.toml`, when a home directory is known
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".netchat").join(CONFIG_FILE_NAME))
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.comms.validate()?;

        if self.chat.local_name.trim().is_empty() {
            return Err(CliError::Config(
                "chat.local_name must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
