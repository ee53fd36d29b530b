//! Static exporter configuration.
//!
//! This module aggregates configuration for:
//!
//! - the metrics listener and freshness policy (`ExporterConfig`),
//! - the Bitcoin node and its external height reference (`BitcoinConfig`),
//! - the Ethereum execution + beacon nodes and their external reference
//!   (`EthereumConfig`).
//!
//! The configuration is built once at startup (the binary fills it from
//! CLI flags / environment variables) and validated with
//! [`ExporterConfig::validate`]. Nothing re-reads it while running.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::ConfigError;

/// HTTP basic-auth credentials for a node RPC endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Polling cadence of one source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Schedule {
    /// Time between the starts of two successful polls.
    pub interval: Duration,
    /// Budget for a whole poll, including every HTTP call it makes.
    pub timeout: Duration,
}

impl Schedule {
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Default cadence for node-local sources.
    pub const fn node() -> Self {
        Self::new(Duration::from_secs(15), Duration::from_secs(10))
    }

    /// Default cadence for third-party references: slower, stricter timeout.
    pub const fn external() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(5))
    }

    fn validate(&self, name: &'static str) -> Result<(), ConfigError> {
        if self.timeout.is_zero() || self.timeout >= self.interval {
            return Err(ConfigError::InvalidSchedule {
                name,
                interval: self.interval,
                timeout: self.timeout,
            });
        }
        Ok(())
    }
}

/// Bitcoin node + external height reference.
#[derive(Clone, Debug)]
pub struct BitcoinConfig {
    /// bitcoind JSON-RPC URL, e.g. `"http://127.0.0.1:8332"`.
    pub rpc_url: String,
    /// RPC user/password. Required: bitcoind always authenticates.
    pub credentials: Option<Credentials>,
    pub node: Schedule,
    /// URL returning the current chain height as plain text.
    pub external_url: String,
    pub external: Schedule,
}

impl Default for BitcoinConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8332".to_string(),
            credentials: None,
            node: Schedule::node(),
            external_url: "https://blockchain.info/q/getblockcount".to_string(),
            external: Schedule::external(),
        }
    }
}

/// Ethereum execution + consensus nodes and the external reference.
#[derive(Clone, Debug)]
pub struct EthereumConfig {
    /// Execution client JSON-RPC URL, e.g. `"http://127.0.0.1:8545"`.
    pub execution_url: String,
    /// Optional basic-auth credentials (e.g. behind a reverse proxy).
    pub execution_credentials: Option<Credentials>,
    /// Beacon node REST API base URL, e.g. `"http://127.0.0.1:5052"`.
    pub beacon_url: String,
    /// Cadence shared by the execution and beacon sources.
    pub node: Schedule,
    /// Public JSON-RPC endpoints tried in order for the reference height.
    pub external_rpc_urls: Vec<String>,
    /// Optional participation-rate reference (beaconcha.in-style
    /// `/api/v1/epoch/latest`).
    pub participation_url: Option<String>,
    pub external: Schedule,
}

impl Default for EthereumConfig {
    fn default() -> Self {
        Self {
            execution_url: "http://127.0.0.1:8545".to_string(),
            execution_credentials: None,
            beacon_url: "http://127.0.0.1:5052".to_string(),
            node: Schedule::node(),
            external_rpc_urls: vec![
                "https://cloudflare-eth.com".to_string(),
                "https://eth.llamarpc.com".to_string(),
                "https://rpc.ankr.com/eth".to_string(),
            ],
            participation_url: None,
            external: Schedule::external(),
        }
    }
}

/// Top-level exporter configuration.
#[derive(Clone, Debug)]
pub struct ExporterConfig {
    /// Address the `/metrics` listener binds to.
    pub listen_addr: SocketAddr,
    /// Consecutive failures after which a source's metrics are flagged stale.
    pub stale_after_failures: u32,
    /// Upper bound for the failure backoff of any source.
    pub max_backoff: Duration,
    /// Whether rendered samples carry their collection timestamp.
    pub expose_timestamps: bool,
    pub bitcoin: Option<BitcoinConfig>,
    pub ethereum: Option<EthereumConfig>,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 9332)),
            stale_after_failures: 3,
            max_backoff: Duration::from_secs(300),
            expose_timestamps: false,
            bitcoin: None,
            ethereum: None,
        }
    }
}

impl ExporterConfig {
    /// Checks everything that would otherwise fail later at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bitcoin.is_none() && self.ethereum.is_none() {
            return Err(ConfigError::NoChainEnabled);
        }
        if self.stale_after_failures == 0 {
            return Err(ConfigError::InvalidStaleThreshold);
        }

        if let Some(btc) = &self.bitcoin {
            require_url(&btc.rpc_url, "bitcoin.rpc_url")?;
            require_url(&btc.external_url, "bitcoin.external_url")?;
            if btc.credentials.is_none() {
                return Err(ConfigError::MissingCredentials("bitcoin.rpc_url"));
            }
            btc.node.validate("bitcoin.node")?;
            btc.external.validate("bitcoin.external")?;
        }

        if let Some(eth) = &self.ethereum {
            require_url(&eth.execution_url, "ethereum.execution_url")?;
            require_url(&eth.beacon_url, "ethereum.beacon_url")?;
            if eth.external_rpc_urls.iter().all(|u| u.trim().is_empty()) {
                return Err(ConfigError::MissingEndpoint("ethereum.external_rpc_urls"));
            }
            if let Some(url) = &eth.participation_url {
                require_url(url, "ethereum.participation_url")?;
            }
            eth.node.validate("ethereum.node")?;
            eth.external.validate("ethereum.external")?;
        }

        Ok(())
    }
}

fn require_url(url: &str, name: &'static str) -> Result<(), ConfigError> {
    if url.trim().is_empty() {
        Err(ConfigError::MissingEndpoint(name))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitcoin() -> BitcoinConfig {
        BitcoinConfig {
            credentials: Some(Credentials::new("user", "pass")),
            ..BitcoinConfig::default()
        }
    }

    #[test]
    fn requires_a_chain() {
        assert_eq!(
            ExporterConfig::default().validate(),
            Err(ConfigError::NoChainEnabled)
        );
    }

    #[test]
    fn defaults_with_credentials_are_valid() {
        let cfg = ExporterConfig {
            bitcoin: Some(bitcoin()),
            ethereum: Some(EthereumConfig::default()),
            ..ExporterConfig::default()
        };
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn bitcoin_without_credentials_is_rejected() {
        let cfg = ExporterConfig {
            bitcoin: Some(BitcoinConfig::default()),
            ..ExporterConfig::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::MissingCredentials("bitcoin.rpc_url"))
        );
    }

    #[test]
    fn timeout_must_be_shorter_than_interval() {
        let mut btc = bitcoin();
        btc.node = Schedule::new(Duration::from_secs(5), Duration::from_secs(5));
        let cfg = ExporterConfig {
            bitcoin: Some(btc),
            ..ExporterConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidSchedule {
                name: "bitcoin.node",
                ..
            })
        ));
    }

    #[test]
    fn empty_endpoint_is_fatal() {
        let eth = EthereumConfig {
            beacon_url: "  ".to_string(),
            ..EthereumConfig::default()
        };
        let cfg = ExporterConfig {
            ethereum: Some(eth),
            ..ExporterConfig::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::MissingEndpoint("ethereum.beacon_url"))
        );
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let rendered = format!("{:?}", Credentials::new("admin", "hunter2"));
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
    }
}
