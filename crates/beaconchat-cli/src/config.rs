//! BeaconChat CLI Configuration Management
//!
//! Configuration is read from an optional TOML file given with `--config`.
//! Every section has defaults, so a file only needs the keys it changes.
//! Identity given on the command line wins over the file.

use std::path::Path;

use beaconchat_ble::BleTransportConfig;
use beaconchat_core::Identity;
use beaconchat_runtime::CoordinatorConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cli::IdentityArgs;
use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the BeaconChat CLI application
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliAppConfig {
    /// Identity used when none is given on the command line
    pub identity: IdentityConfig,

    /// CLI-specific configuration
    pub cli: CliConfig,

    /// Session coordinator configuration
    pub coordinator: CoordinatorConfig,

    /// BLE transport configuration
    pub ble: BleTransportConfig,
}

/// Identity defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub alias: Option<String>,
    pub user_id: Option<String>,
    /// Category tag attached to local messages
    pub tag: Option<String>,
}

/// CLI-specific configuration options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Print received messages as JSON lines
    pub json_output: bool,

    /// How often `presence` refreshes the nearby list, in seconds
    pub nearby_refresh_secs: u64,

    /// Capacity of the channel between the coordinator and the printer
    pub inbox_size: usize,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            json_output: false,
            nearby_refresh_secs: 5,
            inbox_size: 64,
        }
    }
}

impl CliAppConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml(&content)?;
        info!("Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), toml_string)?;
        Ok(())
    }

    /// Reject settings the application cannot run with
    pub fn validate(&self) -> Result<()> {
        self.coordinator.validate()?;
        if self.ble.max_payload_len == 0 {
            return Err(CliError::Config(
                "ble.max_payload_len must be non-zero".to_string(),
            ));
        }
        if self.cli.nearby_refresh_secs == 0 {
            return Err(CliError::Config(
                "cli.nearby_refresh_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the local identity, preferring command-line values
    pub fn resolve_identity(&self, args: &IdentityArgs) -> Result<Identity> {
        let alias = args
            .alias
            .clone()
            .or_else(|| self.identity.alias.clone())
            .ok_or_else(|| CliError::MissingIdentity("pass --alias or set identity.alias".into()))?;
        let user_id = args
            .user_id
            .clone()
            .or_else(|| self.identity.user_id.clone())
            .ok_or_else(|| {
                CliError::MissingIdentity("pass --user-id or set identity.user_id".into())
            })?;

        let identity = Identity::new(alias, user_id);
        Ok(match &self.identity.tag {
            Some(tag) => identity.with_tag(tag.clone()),
            None => identity,
        })
    }

    /// Create example configuration file content
    pub fn example_config() -> String {
        let example_config = CliAppConfig {
            identity: IdentityConfig {
                alias: Some("Alice".to_string()),
                user_id: Some("user-123".to_string()),
                tag: None,
            },
            ..Default::default()
        };

        toml::to_string_pretty(&example_config)
            .unwrap_or_else(|_| "# Failed to generate example config".to_string())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
