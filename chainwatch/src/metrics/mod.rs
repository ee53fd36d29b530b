//! Metrics registry and exposition server.
//!
//! - [`MetricsRegistry`]: Prometheus registry wrapping the chain sample
//!   table and the [`SourceMetrics`] self-metrics.
//! - [`MetricsServer`]: hyper server for `/metrics` and `/health`.

pub mod registry;
pub mod server;

pub use registry::{MetricsRegistry, SampleTable, SourceMetrics};
pub use server::MetricsServer;
