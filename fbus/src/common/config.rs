/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

use std::path::Path;
use std::time::Duration;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use url::Url;

use super::{BusError, ReconnectPolicy};

/// Configuration for FBus runtimes
///
/// Loaded from TOML files in XDG-compliant directories. Every value has a
/// default, so a file only needs the keys it changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Limits and capacity configuration
    pub limits: LimitsConfig,
    /// Timeout configuration
    pub timeouts: TimeoutConfig,
    /// Transport configuration
    pub transport: TransportConfig,
}

/// Limits and capacity configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Messages processed concurrently by one runtime
    pub max_concurrent_messages: usize,
}

/// Timeout-related configuration values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// How long `stop()` waits for in-flight messages, in milliseconds
    pub shutdown_drain_ms: u64,
    /// Upper bound for establishing the transport connection, in milliseconds
    pub connect_timeout_ms: u64,
}

/// Transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Endpoint used by `use_default_transport()`
    pub default_endpoint: String,
    /// Redeliveries of a requeued message before it is dead-lettered
    pub max_redeliveries: u32,
    /// Reconnection policy
    pub reconnect: ReconnectPolicy,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_messages: 16,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            shutdown_drain_ms: 10_000,
            connect_timeout_ms: 30_000,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            default_endpoint: "memory://localhost/".to_string(),
            max_redeliveries: 5,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl BusConfig {
    /// Shutdown drain timeout as a Duration
    #[must_use]
    pub const fn shutdown_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.shutdown_drain_ms)
    }

    /// Connect timeout as a Duration
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.connect_timeout_ms)
    }

    /// Parses the default transport endpoint.
    pub fn default_endpoint(&self) -> Result<Url, BusError> {
        Url::parse(&self.transport.default_endpoint).map_err(|e| {
            BusError::Configuration(format!(
                "invalid default endpoint '{}': {e}",
                self.transport.default_endpoint
            ))
        })
    }

    /// Parses a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, BusError> {
        toml::from_str(text)
            .map_err(|e| BusError::Configuration(format!("invalid configuration: {e}")))
    }

    /// Loads configuration from `path`, falling back to defaults when the
    /// file is unreadable or malformed.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(config_str) => match Self::from_toml_str(&config_str) {
                Ok(config) => {
                    info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    error!("Failed to parse configuration file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                error!("Failed to read configuration file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Load configuration from XDG-compliant locations
    ///
    /// Looks for `fbus/config.toml` under `$XDG_CONFIG_HOME` (then the XDG
    /// config dirs). Returns the defaults when no file is found.
    pub fn load() -> Self {
        let xdg_dirs = match xdg::BaseDirectories::with_prefix("fbus") {
            Ok(dirs) => dirs,
            Err(e) => {
                error!("Failed to initialize XDG directories: {}", e);
                return Self::default();
            }
        };

        if let Some(path) = xdg_dirs.find_config_file("config.toml") {
            Self::load_from(&path)
        } else {
            info!("No configuration file found, using defaults");
            Self::default()
        }
    }
}

lazy_static! {
    /// Global configuration instance loaded from XDG-compliant locations
    pub static ref CONFIG: BusConfig = BusConfig::load();
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn partial_files_keep_defaults() -> anyhow::Result<()> {
        let config = BusConfig::from_toml_str(
            r#"
            [limits]
            max_concurrent_messages = 4

            [transport.reconnect]
            max_attempts = 2
            "#,
        )?;
        assert_eq!(config.limits.max_concurrent_messages, 4);
        assert_eq!(config.transport.reconnect.max_attempts, 2);
        assert_eq!(config.timeouts, TimeoutConfig::default());
        assert_eq!(config.transport.default_endpoint, "memory://localhost/");
        assert_eq!(config.shutdown_drain_timeout(), Duration::from_secs(10));
        Ok(())
    }

    #[test]
    fn load_from_file_and_fall_back_on_garbage() -> anyhow::Result<()> {
        let mut good = tempfile::NamedTempFile::new()?;
        writeln!(good, "[timeouts]\nshutdown_drain_ms = 250")?;
        let config = BusConfig::load_from(good.path());
        assert_eq!(config.shutdown_drain_timeout(), Duration::from_millis(250));

        let mut bad = tempfile::NamedTempFile::new()?;
        writeln!(bad, "[timeouts\nshutdown_drain_ms = ")?;
        assert_eq!(BusConfig::load_from(bad.path()), BusConfig::default());
        Ok(())
    }

    #[test]
    fn malformed_text_is_a_configuration_error() {
        let err = BusConfig::from_toml_str("limits = 3").unwrap_err();
        assert!(matches!(err, BusError::Configuration(_)));
    }

    #[test]
    fn default_endpoint_parses() -> anyhow::Result<()> {
        let url = BusConfig::default().default_endpoint()?;
        assert_eq!(url.scheme(), "memory");
        Ok(())
    }
}
