//! Wires configuration, sources, scheduler and engine together.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::client::{BeaconClient, BitcoinNodeClient, ExecutionClient, Source};
use crate::config::{ExporterConfig, Schedule};
use crate::engine::Engine;
use crate::error::StartupError;
use crate::metrics::MetricsRegistry;
use crate::reference::{BitcoinReference, EthereumReference};
use crate::scheduler::SourceTask;
use crate::types::{Chain, CollectionResult};

/// Results buffered between the source tasks and the engine.
const RESULT_QUEUE: usize = 64;

/// Running collection pipeline: one task per source plus the engine task.
///
/// The exposition server is started separately (see
/// [`crate::metrics::MetricsServer`]) so callers control bind order.
pub struct Exporter {
    tasks: JoinSet<()>,
}

struct Spawner<'a> {
    tasks: &'a mut JoinSet<()>,
    results: &'a mpsc::Sender<CollectionResult>,
    metrics: &'a Arc<MetricsRegistry>,
    shutdown: &'a CancellationToken,
    max_backoff: Duration,
}

impl Spawner<'_> {
    fn spawn<S: Source>(&mut self, source: S, schedule: Schedule) {
        let task = SourceTask::new(
            source,
            schedule,
            self.max_backoff,
            self.results.clone(),
            self.metrics.clone(),
        );
        self.tasks.spawn(task.run(self.shutdown.clone()));
    }
}

impl Exporter {
    /// Validates `config`, seeds the registry and spawns every task.
    ///
    /// Must be called from within a Tokio runtime. Cancelling `shutdown`
    /// stops the source tasks after their current poll; the engine then
    /// drains the remaining results and exits.
    pub fn start(
        config: &ExporterConfig,
        metrics: Arc<MetricsRegistry>,
        shutdown: CancellationToken,
    ) -> Result<Self, StartupError> {
        config.validate()?;

        let mut chains = Vec::new();
        if config.bitcoin.is_some() {
            chains.push(Chain::Bitcoin);
        }
        if config.ethereum.is_some() {
            chains.push(Chain::Ethereum);
        }

        let (tx, rx) = mpsc::channel(RESULT_QUEUE);
        let engine = Engine::new(metrics.clone(), config.stale_after_failures, &chains);

        let mut tasks = JoinSet::new();
        tasks.spawn(engine.run(rx));

        let mut spawner = Spawner {
            tasks: &mut tasks,
            results: &tx,
            metrics: &metrics,
            shutdown: &shutdown,
            max_backoff: config.max_backoff,
        };

        if let Some(btc) = &config.bitcoin {
            let node = BitcoinNodeClient::new(
                btc.rpc_url.clone(),
                btc.credentials.clone(),
                btc.node.timeout,
            )?;
            spawner.spawn(node, btc.node);
            spawner.spawn(
                BitcoinReference::new(btc.external_url.clone(), btc.external.timeout)?,
                btc.external,
            );
            tracing::info!(rpc_url = %btc.rpc_url, "bitcoin collection enabled");
        }

        if let Some(eth) = &config.ethereum {
            spawner.spawn(
                ExecutionClient::new(
                    eth.execution_url.clone(),
                    eth.execution_credentials.clone(),
                    eth.node.timeout,
                )?,
                eth.node,
            );
            spawner.spawn(BeaconClient::new(eth.beacon_url.clone(), eth.node.timeout)?, eth.node);
            spawner.spawn(
                EthereumReference::new(
                    &eth.external_rpc_urls,
                    eth.participation_url.as_deref(),
                    eth.external.timeout,
                )?,
                eth.external,
            );
            tracing::info!(
                execution_url = %eth.execution_url,
                beacon_url = %eth.beacon_url,
                "ethereum collection enabled"
            );
        }

        // The engine stops once every source task has dropped its sender.
        drop(tx);

        Ok(Self { tasks })
    }

    /// Waits for every task to finish.
    pub async fn join(mut self) {
        while let Some(res) = self.tasks.join_next().await {
            if let Err(e) = res {
                tracing::error!(error = %e, "exporter task failed");
            }
        }
    }
}
