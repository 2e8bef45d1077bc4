//! Configuration types for the connection pool.
//!
//! Provides serde-friendly configuration with builders for:
//! - Pool sizing and the dial target
//! - TLS settings used by the stock TLS dialer

use std::path::PathBuf;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::errors::{PoolError, PoolResult};

/// Default number of connections dialed at construction.
pub const DEFAULT_INITIAL_SIZE: usize = 5;

/// Default ceiling on total connections.
pub const DEFAULT_MAX_SIZE: usize = 30;

/// Default network type.
pub const DEFAULT_NETWORK: &str = "tcp";

/// Default timeout for a single dial.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Networks understood by the stock dialers.
pub const SUPPORTED_NETWORKS: &[&str] = &["tcp", "tcp4", "tcp6"];

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Connections dialed eagerly at construction.
    #[serde(default = "default_initial_size")]
    pub initial_size: usize,
    /// Hard ceiling on idle plus checked-out connections.
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// Network type passed to every dial.
    #[serde(default = "default_network")]
    pub network: String,
    /// Address passed to every dial.
    pub address: String,
    /// Timeout applied by the stock dialers.
    #[serde(default = "default_dial_timeout", with = "humantime_serde")]
    pub dial_timeout: Duration,
}

fn default_initial_size() -> usize { DEFAULT_INITIAL_SIZE }
fn default_max_size() -> usize { DEFAULT_MAX_SIZE }
fn default_network() -> String { DEFAULT_NETWORK.to_string() }
fn default_dial_timeout() -> Duration { DEFAULT_DIAL_TIMEOUT }

impl PoolConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> PoolResult<()> {
        validate_sizes(self.initial_size, self.max_size)?;

        if self.address.is_empty() {
            return Err(PoolError::configuration("address is required"));
        }

        if self.network.is_empty() {
            return Err(PoolError::configuration("network is required"));
        }

        if self.dial_timeout == Duration::ZERO {
            return Err(PoolError::configuration("dial_timeout must be positive"));
        }

        Ok(())
    }
}

/// Checks the sizing constraints shared by the config and the pool constructor.
pub(crate) fn validate_sizes(initial_size: usize, max_size: usize) -> PoolResult<()> {
    if max_size == 0 {
        return Err(PoolError::configuration("max_size must be positive"));
    }

    if initial_size > max_size {
        return Err(PoolError::configuration(format!(
            "initial_size ({}) cannot exceed max_size ({})",
            initial_size, max_size
        )));
    }

    Ok(())
}

/// Builder for pool configuration.
#[derive(Debug, Default)]
pub struct PoolConfigBuilder {
    initial_size: Option<usize>,
    max_size: Option<usize>,
    network: Option<String>,
    address: Option<String>,
    dial_timeout: Duration,
}

impl PoolConfigBuilder {
    /// Sets the number of warm-up connections.
    pub fn initial_size(mut self, size: usize) -> Self {
        self.initial_size = Some(size);
        self
    }

    /// Sets the connection ceiling.
    pub fn max_size(mut self, size: usize) -> Self {
        self.max_size = Some(size);
        self
    }

    /// Sets the network type.
    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    /// Sets the dial address.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Sets the dial timeout.
    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> PoolResult<PoolConfig> {
        let config = PoolConfig {
            initial_size: self.initial_size.unwrap_or(DEFAULT_INITIAL_SIZE),
            max_size: self.max_size.unwrap_or(DEFAULT_MAX_SIZE),
            network: self.network.unwrap_or_else(default_network),
            address: self.address.ok_or_else(|| PoolError::configuration("address is required"))?,
            dial_timeout: if self.dial_timeout == Duration::ZERO {
                DEFAULT_DIAL_TIMEOUT
            } else {
                self.dial_timeout
            },
        };

        config.validate()?;
        Ok(config)
    }
}

/// TLS configuration for the implicit-TLS dialer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Path to an additional PEM-encoded CA certificate file.
    pub ca_cert_path: Option<PathBuf>,
    /// Server Name Indication override.
    pub sni_override: Option<String>,
}

impl TlsConfig {
    /// Creates a new TLS config builder.
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder::default()
    }

    /// Validates the TLS configuration.
    pub fn validate(&self) -> PoolResult<()> {
        if let Some(sni) = &self.sni_override {
            if sni.is_empty() {
                return Err(PoolError::configuration("sni_override cannot be empty"));
            }
        }

        Ok(())
    }
}

/// Builder for TLS configuration.
#[derive(Debug, Default)]
pub struct TlsConfigBuilder {
    config: TlsConfig,
}

impl TlsConfigBuilder {
    /// Sets the CA certificate path.
    pub fn ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ca_cert_path = Some(path.into());
        self
    }

    /// Sets the SNI override.
    pub fn sni_override(mut self, sni: impl Into<String>) -> Self {
        self.config.sni_override = Some(sni.into());
        self
    }

    /// Builds the TLS configuration.
    pub fn build(self) -> PoolResult<TlsConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// Humantime serde support
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
