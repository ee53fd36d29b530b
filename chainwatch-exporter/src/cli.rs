//! Command-line / environment configuration.
//!
//! Every flag can also be set through the environment variable shown in
//! `--help`, so the binary can be configured the same way from a shell or
//! a container spec.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, bail};
use chainwatch::{BitcoinConfig, Credentials, EthereumConfig, ExporterConfig, Schedule};
use clap::{Parser, ValueEnum};

/// Chain families that can be monitored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ChainArg {
    Bitcoin,
    Ethereum,
}

/// Chainwatch exporter CLI
#[derive(Parser, Debug)]
#[command(
    name = "chainwatch-exporter",
    version,
    about = "Prometheus exporter for Bitcoin and Ethereum nodes"
)]
pub struct Cli {
    /// Chains to monitor (repeat or comma-separate)
    #[arg(long = "chain", env = "CHAINWATCH_CHAINS", value_delimiter = ',', required = true)]
    pub chains: Vec<ChainArg>,

    /// Address the metrics listener binds to
    #[arg(long, env = "EXPORTER_LISTEN_ADDR", default_value = "0.0.0.0:9332")]
    pub listen_addr: SocketAddr,

    /// Overrides only the port of --listen-addr
    #[arg(long, env = "EXPORTER_PORT")]
    pub port: Option<u16>,

    /// Node polling interval (`15`, `15s`, `1m`)
    #[arg(long, env = "SCRAPE_INTERVAL", default_value = "15s", value_parser = parse_duration)]
    pub scrape_interval: Duration,

    /// Timeout of one node poll
    #[arg(long, env = "RPC_TIMEOUT", default_value = "10s", value_parser = parse_duration)]
    pub rpc_timeout: Duration,

    /// External reference polling interval
    #[arg(long, env = "EXTERNAL_INTERVAL", default_value = "60s", value_parser = parse_duration)]
    pub external_interval: Duration,

    /// Timeout of one external reference poll
    #[arg(long, env = "EXTERNAL_TIMEOUT", default_value = "5s", value_parser = parse_duration)]
    pub external_timeout: Duration,

    /// Consecutive failures after which a source is flagged stale
    #[arg(long, env = "STALE_AFTER_FAILURES", default_value_t = 3)]
    pub stale_after_failures: u32,

    /// Upper bound of the failure backoff
    #[arg(long, env = "MAX_BACKOFF", default_value = "5m", value_parser = parse_duration)]
    pub max_backoff: Duration,

    /// Emit collection timestamps on every sample
    #[arg(long, env = "EXPOSE_TIMESTAMPS")]
    pub expose_timestamps: bool,

    /// bitcoind JSON-RPC URL
    #[arg(long, env = "BITCOIN_RPC_URL", default_value = "http://127.0.0.1:8332")]
    pub bitcoin_rpc_url: String,

    #[arg(long, env = "BITCOIN_RPC_USER")]
    pub bitcoin_rpc_user: Option<String>,

    #[arg(long, env = "BITCOIN_RPC_PASS", hide_env_values = true)]
    pub bitcoin_rpc_pass: Option<String>,

    /// Plain-text Bitcoin height reference
    #[arg(
        long,
        env = "BITCOIN_EXTERNAL_URL",
        default_value = "https://blockchain.info/q/getblockcount"
    )]
    pub bitcoin_external_url: String,

    /// Execution client JSON-RPC URL
    #[arg(long, env = "GETH_RPC_URL", default_value = "http://127.0.0.1:8545")]
    pub geth_rpc_url: String,

    #[arg(long, env = "GETH_RPC_USER")]
    pub geth_rpc_user: Option<String>,

    #[arg(long, env = "GETH_RPC_PASS", hide_env_values = true)]
    pub geth_rpc_pass: Option<String>,

    /// Beacon node REST API URL
    #[arg(long, env = "BEACON_API_URL", default_value = "http://127.0.0.1:5052")]
    pub beacon_api_url: String,

    /// Public Ethereum JSON-RPC endpoints, tried in order
    #[arg(long, env = "ETH_EXTERNAL_RPC_URLS", value_delimiter = ',')]
    pub eth_external_rpc_urls: Vec<String>,

    /// beaconcha.in-style `/api/v1/epoch/latest` URL for participation rate
    #[arg(long, env = "ETH_PARTICIPATION_URL")]
    pub eth_participation_url: Option<String>,
}

/// Seconds as a bare integer (`15`) or a humantime duration (`15s`, `2m`).
fn parse_duration(s: &str) -> Result<Duration, humantime::DurationError> {
    match s.trim().parse::<u64>() {
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(_) => humantime::parse_duration(s.trim()),
    }
}

fn credentials(
    user: Option<String>,
    pass: Option<String>,
    what: &str,
) -> anyhow::Result<Option<Credentials>> {
    match (user, pass) {
        (Some(user), Some(pass)) => Ok(Some(Credentials::new(user, pass))),
        (None, None) => Ok(None),
        _ => bail!("{what}: user and password must be given together"),
    }
}

impl Cli {
    /// Builds the library configuration. Validation happens in
    /// [`ExporterConfig::validate`].
    pub fn into_config(self) -> anyhow::Result<ExporterConfig> {
        let mut listen_addr = self.listen_addr;
        if let Some(port) = self.port {
            listen_addr.set_port(port);
        }

        let node = Schedule::new(self.scrape_interval, self.rpc_timeout);
        let external = Schedule::new(self.external_interval, self.external_timeout);

        let bitcoin = if self.chains.contains(&ChainArg::Bitcoin) {
            Some(BitcoinConfig {
                rpc_url: self.bitcoin_rpc_url,
                credentials: credentials(
                    self.bitcoin_rpc_user,
                    self.bitcoin_rpc_pass,
                    "bitcoin rpc",
                )
                .context("invalid bitcoin credentials")?,
                node,
                external_url: self.bitcoin_external_url,
                external,
            })
        } else {
            None
        };

        let ethereum = if self.chains.contains(&ChainArg::Ethereum) {
            let defaults = EthereumConfig::default();
            Some(EthereumConfig {
                execution_url: self.geth_rpc_url,
                execution_credentials: credentials(
                    self.geth_rpc_user,
                    self.geth_rpc_pass,
                    "geth rpc",
                )
                .context("invalid execution client credentials")?,
                beacon_url: self.beacon_api_url,
                node,
                external_rpc_urls: if self.eth_external_rpc_urls.is_empty() {
                    defaults.external_rpc_urls
                } else {
                    self.eth_external_rpc_urls
                },
                participation_url: self.eth_participation_url,
                external,
            })
        } else {
            None
        };

        Ok(ExporterConfig {
            listen_addr,
            stale_after_failures: self.stale_after_failures,
            max_backoff: self.max_backoff,
            expose_timestamps: self.expose_timestamps,
            bitcoin,
            ethereum,
        })
    }
}
