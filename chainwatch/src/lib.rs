//! Chainwatch library crate.
//!
//! This crate bridges blockchain full nodes to the Prometheus exposition
//! format. It polls node-local RPC/REST interfaces and an independent
//! external reference, derives health indicators (sync lag, block age,
//! verification progress, finality distance) and serves the result on
//! `GET /metrics`:
//!
//! - typed node clients for bitcoind, execution and beacon nodes (`client`),
//! - external reference clients (`reference`),
//! - the per-source polling loop with backoff (`scheduler`),
//! - the snapshot → sample computation engine (`engine`),
//! - the registry and hyper exposition server (`metrics`),
//! - and the static exporter configuration (`config`).
//!
//! Data flows one way: source tasks send [`CollectionResult`]s over a
//! channel to the [`Engine`], which upserts samples into the
//! [`MetricsRegistry`]; scrapes only read the registry.
//!
//! ```ignore
//! let metrics = Arc::new(MetricsRegistry::new(config.expose_timestamps)?);
//! let server = MetricsServer::bind(config.listen_addr, metrics.clone()).await?;
//! let shutdown = CancellationToken::new();
//! let exporter = Exporter::start(&config, metrics, shutdown.clone())?;
//! tokio::spawn(server.serve(shutdown.clone()));
//! ```

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod exporter;
pub mod metrics;
pub mod reference;
pub mod scheduler;
pub mod types;

// Re-export top-level configuration types.
pub use config::{BitcoinConfig, Credentials, EthereumConfig, ExporterConfig, Schedule};

// Re-export errors.
pub use error::{ComputationError, ConfigError, SourceError, StartupError};

// Re-export the pipeline pieces.
pub use client::Source;
pub use engine::Engine;
pub use exporter::Exporter;
pub use metrics::{MetricsRegistry, MetricsServer, SampleTable, SourceMetrics};
pub use scheduler::{Backoff, SourceTask};

// Re-export domain types at the crate root for convenience.
pub use types::*;
