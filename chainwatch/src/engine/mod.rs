//! Metric computation engine.
//!
//! The engine owns the per-chain snapshots. It consumes
//! [`CollectionResult`]s from the source tasks, folds them into the
//! snapshots, recomputes the chain's samples and upserts them into the
//! shared sample table. It is the only writer of chain samples.
//!
//! - [`snapshot`]: last-known state per node call.
//! - [`formulas`]: pure derived-metric formulas.
//! - `bitcoin` / `ethereum`: snapshot → sample builders.

mod bitcoin;
mod ethereum;
pub mod formulas;
pub mod snapshot;

pub use snapshot::{BitcoinSnapshot, EthereumSnapshot, Section};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;

use crate::error::ComputationError;
use crate::metrics::MetricsRegistry;
use crate::types::{Chain, CollectionResult, MetricSample, SampleKey, SourceId};

/// Liveness bookkeeping for one source.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SourceStatus {
    /// Whether the most recent poll succeeded.
    pub up: bool,
    pub last_success: Option<SystemTime>,
    pub consecutive_failures: u32,
}

/// Values that can be exported as a gauge.
pub(crate) trait GaugeValue: Copy {
    fn gauge_value(self) -> f64;
}

impl GaugeValue for u64 {
    fn gauge_value(self) -> f64 {
        self as f64
    }
}

impl GaugeValue for f64 {
    fn gauge_value(self) -> f64 {
        self
    }
}

impl GaugeValue for bool {
    fn gauge_value(self) -> f64 {
        if self { 1.0 } else { 0.0 }
    }
}

/// Samples computed for one chain in one pass.
///
/// Info-style samples (constant `1` with descriptive labels) are kept
/// apart so the engine can zero out a previous label set when it changes.
pub(crate) struct SampleSet {
    chain: Chain,
    samples: Vec<MetricSample>,
    infos: Vec<MetricSample>,
    errors: Vec<ComputationError>,
}

impl SampleSet {
    fn new(chain: Chain) -> Self {
        Self {
            chain,
            samples: Vec::new(),
            infos: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn name(&self, name: &str) -> String {
        format!("{}_{name}", self.chain.prefix())
    }

    fn gauge(&mut self, name: &str, help: &'static str, value: f64, at: SystemTime) {
        let name = self.name(name);
        self.samples.push(MetricSample::new(name, help, value, at));
    }

    fn gauge_opt<V: GaugeValue>(
        &mut self,
        name: &str,
        help: &'static str,
        value: Option<V>,
        at: SystemTime,
    ) {
        if let Some(v) = value {
            self.gauge(name, help, v.gauge_value(), at);
        }
    }

    fn labeled<const N: usize>(
        &mut self,
        name: &str,
        help: &'static str,
        labels: [(&str, String); N],
        value: f64,
        at: SystemTime,
    ) {
        let sample = labels
            .into_iter()
            .fold(MetricSample::new(self.name(name), help, value, at), |s, (k, v)| {
                s.with_label(k, v)
            });
        self.samples.push(sample);
    }

    fn info<const N: usize>(
        &mut self,
        name: &str,
        help: &'static str,
        labels: [(&str, String); N],
        at: SystemTime,
    ) {
        let sample = labels
            .into_iter()
            .fold(MetricSample::new(self.name(name), help, 1.0, at), |s, (k, v)| {
                s.with_label(k, v)
            });
        self.infos.push(sample);
    }

    /// Emits the value, or records the error and emits nothing.
    fn computed(
        &mut self,
        name: &str,
        help: &'static str,
        value: Result<f64, ComputationError>,
        at: SystemTime,
    ) {
        match value {
            Ok(v) => self.gauge(name, help, v, at),
            Err(e) => self.errors.push(e),
        }
    }

    #[cfg(test)]
    fn value(&self, name: &str) -> Option<f64> {
        self.samples.iter().find(|s| s.name == name).map(|s| s.value)
    }
}

/// The computation engine. Construct with [`Engine::new`] and drive with
/// [`Engine::run`].
pub struct Engine {
    metrics: Arc<MetricsRegistry>,
    stale_after: u32,
    bitcoin: Option<BitcoinSnapshot>,
    ethereum: Option<EthereumSnapshot>,
    statuses: BTreeMap<SourceId, SourceStatus>,
    /// Last published label set per info metric.
    infos: HashMap<String, SampleKey>,
    /// Computation errors of the previous pass per chain; only errors
    /// not already present are counted.
    computation_errors: HashMap<Chain, Vec<ComputationError>>,
}

impl Engine {
    /// Creates an engine for the given chains and seeds their per-source
    /// liveness gauges (`*_up = 0`, `*_stale = 0`) so the first scrape
    /// already lists every source.
    pub fn new(metrics: Arc<MetricsRegistry>, stale_after: u32, chains: &[Chain]) -> Self {
        let mut engine = Self {
            metrics,
            stale_after,
            bitcoin: chains.contains(&Chain::Bitcoin).then(BitcoinSnapshot::default),
            ethereum: chains.contains(&Chain::Ethereum).then(EthereumSnapshot::default),
            statuses: BTreeMap::new(),
            infos: HashMap::new(),
            computation_errors: HashMap::new(),
        };

        let now = SystemTime::now();
        for &chain in chains {
            for source in SourceId::for_chain(chain) {
                engine.statuses.insert(source, SourceStatus::default());
                engine.publish_status(source, now);
            }
        }
        engine
    }

    pub fn status(&self, source: SourceId) -> Option<&SourceStatus> {
        self.statuses.get(&source)
    }

    pub fn bitcoin(&self) -> Option<&BitcoinSnapshot> {
        self.bitcoin.as_ref()
    }

    pub fn ethereum(&self) -> Option<&EthereumSnapshot> {
        self.ethereum.as_ref()
    }

    /// Applies one result using the wall clock for time-relative metrics.
    pub fn apply(&mut self, result: CollectionResult) {
        self.apply_at(result, SystemTime::now());
    }

    /// Applies one result with an explicit "now".
    pub fn apply_at(&mut self, result: CollectionResult, now: SystemTime) {
        let CollectionResult {
            source,
            collected_at,
            outcome,
        } = result;

        let was_stale = self.is_stale(source);
        let Some(status) = self.statuses.get_mut(&source) else {
            tracing::debug!(%source, "result for a disabled source; dropping");
            return;
        };
        let payload = match outcome {
            Ok(report) => {
                status.up = true;
                status.last_success = Some(collected_at);
                status.consecutive_failures = 0;
                Some(report.payload)
            }
            Err(_) => {
                status.up = false;
                status.consecutive_failures = status.consecutive_failures.saturating_add(1);
                None
            }
        };
        let failures = status.consecutive_failures;

        let stale_after = self.stale_after;
        let set = match source.chain() {
            Chain::Bitcoin => self.bitcoin.as_mut().map(|snap| {
                snap.apply(source, payload, collected_at);
                bitcoin::samples(snap, stale_after, now)
            }),
            Chain::Ethereum => self.ethereum.as_mut().map(|snap| {
                snap.apply(source, payload, collected_at);
                ethereum::samples(snap, stale_after, now)
            }),
        };

        let is_stale = self.is_stale(source);
        if is_stale && !was_stale {
            tracing::warn!(
                chain = %source.chain(),
                source = source.name(),
                failures,
                "source is stale; keeping last known values"
            );
        } else if was_stale && !is_stale {
            tracing::info!(chain = %source.chain(), source = source.name(), "source recovered");
        }

        self.publish_status(source, now);
        if let Some(set) = set {
            self.publish(set, now);
        }
    }

    /// A source is stale once its polls have failed `stale_after` times in
    /// a row, or once any of its calls has, even inside partial polls.
    fn is_stale(&self, source: SourceId) -> bool {
        let polls_failing = self
            .statuses
            .get(&source)
            .is_some_and(|s| s.consecutive_failures >= self.stale_after);
        let section_stale = match source.chain() {
            Chain::Bitcoin => self
                .bitcoin
                .as_ref()
                .is_some_and(|snap| snap.has_stale_section(source, self.stale_after)),
            Chain::Ethereum => self
                .ethereum
                .as_ref()
                .is_some_and(|snap| snap.has_stale_section(source, self.stale_after)),
        };
        polls_failing || section_stale
    }

    /// Drains results until every sender has been dropped.
    pub async fn run(mut self, mut results: mpsc::Receiver<CollectionResult>) {
        tracing::info!("computation engine started");
        while let Some(result) = results.recv().await {
            self.apply(result);
        }
        tracing::info!("computation engine stopped");
    }

    fn publish(&mut self, set: SampleSet, now: SystemTime) {
        let table = self.metrics.samples();
        let chain = set.chain.prefix();

        let previous = self.computation_errors.remove(&set.chain).unwrap_or_default();
        for err in set.errors.iter().filter(|e| !previous.contains(e)) {
            tracing::debug!(chain, error = %err, "derived metric skipped");
            self.metrics
                .sources
                .errors_total
                .with_label_values(&[chain, "engine", "computation"])
                .inc();
        }
        self.computation_errors.insert(set.chain, set.errors);

        for sample in set.samples {
            table.upsert(sample);
        }

        for info in set.infos {
            let key = info.key();
            if let Some(previous) = self.infos.insert(info.name.clone(), key.clone()) {
                if previous != key {
                    table.upsert(MetricSample {
                        name: previous.name,
                        help: info.help,
                        labels: previous.labels,
                        value: 0.0,
                        timestamp: now,
                    });
                }
            }
            table.upsert(info);
        }
    }

    fn publish_status(&self, source: SourceId, now: SystemTime) {
        let Some(status) = self.statuses.get(&source) else {
            return;
        };
        let table = self.metrics.samples();

        table.upsert(MetricSample::new(
            format!("{source}_up"),
            "Whether the last poll of this source succeeded (1/0)",
            status.up.gauge_value(),
            now,
        ));
        table.upsert(MetricSample::new(
            format!("{source}_stale"),
            "Whether this source has reached the consecutive failure threshold (1/0)",
            self.is_stale(source).gauge_value(),
            now,
        ));
        if let Some(at) = status.last_success {
            let secs = at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);
            table.upsert(MetricSample::new(
                format!("{source}_last_success_timestamp_seconds"),
                "Unix time of the last successful poll of this source",
                secs,
                at,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ethereum::ExecutionRecord;
    use crate::error::SourceError;
    use crate::reference::ExternalReference;
    use crate::types::{Payload, Report};
    use std::time::Duration;

    fn t(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn ok(source: SourceId, payload: Payload, at: SystemTime) -> CollectionResult {
        CollectionResult {
            source,
            collected_at: at,
            outcome: Ok(Report::new(payload)),
        }
    }

    fn failed(source: SourceId, at: SystemTime) -> CollectionResult {
        CollectionResult {
            source,
            collected_at: at,
            outcome: Err(SourceError::Timeout(Duration::from_secs(5))),
        }
    }

    fn execution(block: u64, client: &str) -> Payload {
        Payload::EthereumExecution(ExecutionRecord {
            block_number: Some(block),
            client_version: Some(client.into()),
            ..Default::default()
        })
    }

    fn engine() -> (Engine, Arc<MetricsRegistry>) {
        let metrics = Arc::new(MetricsRegistry::new(false).expect("registry"));
        (Engine::new(metrics.clone(), 2, &[Chain::Ethereum]), metrics)
    }

    #[test]
    fn seeds_liveness_for_enabled_sources_only() {
        let (_engine, metrics) = engine();
        let table = metrics.samples();
        assert_eq!(table.value("ethereum_execution_up", &[]), Some(0.0));
        assert_eq!(table.value("ethereum_beacon_stale", &[]), Some(0.0));
        assert_eq!(table.value("ethereum_external_up", &[]), Some(0.0));
        assert_eq!(table.value("bitcoin_node_up", &[]), None);
    }

    #[test]
    fn success_marks_up_and_publishes_samples() {
        let (mut engine, metrics) = engine();
        engine.apply_at(
            ok(SourceId::EthereumExecution, execution(100, "Geth/v1.0.0"), t(10)),
            t(11),
        );

        let table = metrics.samples();
        assert_eq!(table.value("ethereum_execution_up", &[]), Some(1.0));
        assert_eq!(table.value("ethereum_block_height", &[]), Some(100.0));
        assert_eq!(
            table.value("ethereum_execution_last_success_timestamp_seconds", &[]),
            Some(10.0)
        );
    }

    #[test]
    fn failures_past_threshold_flag_stale_and_keep_values() {
        let (mut engine, metrics) = engine();
        engine.apply_at(ok(SourceId::EthereumExecution, execution(100, "Geth/v1.0.0"), t(1)), t(1));
        engine.apply_at(failed(SourceId::EthereumExecution, t(2)), t(2));

        let table = metrics.samples();
        assert_eq!(table.value("ethereum_execution_up", &[]), Some(0.0));
        assert_eq!(table.value("ethereum_execution_stale", &[]), Some(0.0));

        engine.apply_at(failed(SourceId::EthereumExecution, t(3)), t(3));
        assert_eq!(table.value("ethereum_execution_stale", &[]), Some(1.0));
        assert_eq!(table.value("ethereum_block_height", &[]), Some(100.0));
        assert_eq!(
            engine.status(SourceId::EthereumExecution).map(|s| s.consecutive_failures),
            Some(2)
        );

        engine.apply_at(ok(SourceId::EthereumExecution, execution(101, "Geth/v1.0.0"), t(4)), t(4));
        assert_eq!(table.value("ethereum_execution_stale", &[]), Some(0.0));
        assert_eq!(table.value("ethereum_block_height", &[]), Some(101.0));
    }

    #[test]
    fn external_failure_leaves_node_metrics_updating() {
        let (mut engine, metrics) = engine();
        let table = metrics.samples();
        engine.apply_at(
            ok(
                SourceId::EthereumExternal,
                Payload::External(ExternalReference {
                    height: Some(105),
                    participation_rate: None,
                }),
                t(1),
            ),
            t(1),
        );
        engine.apply_at(ok(SourceId::EthereumExecution, execution(100, "Geth/v1.0.0"), t(1)), t(1));
        assert_eq!(table.value("ethereum_sync_lag", &[]), Some(5.0));

        for i in 2..5 {
            engine.apply_at(failed(SourceId::EthereumExternal, t(i)), t(i));
            engine.apply_at(
                ok(SourceId::EthereumExecution, execution(100 + i, "Geth/v1.0.0"), t(i)),
                t(i),
            );
        }

        assert_eq!(table.value("ethereum_block_height", &[]), Some(104.0));
        assert_eq!(table.value("ethereum_external_stale", &[]), Some(1.0));
        assert_eq!(table.value("ethereum_execution_stale", &[]), Some(0.0));
        // Lag froze at its last value once the external source went stale.
        assert_eq!(table.value("ethereum_sync_lag", &[]), Some(3.0));
    }

    #[test]
    fn changed_info_labels_zero_the_previous_set() {
        let (mut engine, metrics) = engine();
        engine.apply_at(ok(SourceId::EthereumExecution, execution(1, "Geth/v1.13.14"), t(1)), t(1));
        engine.apply_at(ok(SourceId::EthereumExecution, execution(2, "Geth/v1.13.15"), t(2)), t(2));

        let table = metrics.samples();
        let info = "ethereum_execution_client_info";
        assert_eq!(
            table.value(info, &[("client", "geth"), ("version", "1.13.14")]),
            Some(0.0)
        );
        assert_eq!(
            table.value(info, &[("client", "geth"), ("version", "1.13.15")]),
            Some(1.0)
        );
    }

    #[test]
    fn computation_errors_are_counted() {
        let (mut engine, metrics) = engine();
        engine.apply_at(ok(SourceId::EthereumExecution, execution(1, "custom"), t(1)), t(1));
        let count = metrics
            .sources
            .errors_total
            .with_label_values(&["ethereum", "engine", "computation"])
            .get();
        assert_eq!(count, 1);
    }

    #[test]
    fn persistent_computation_error_is_counted_once() {
        let (mut engine, metrics) = engine();
        let count = || {
            metrics
                .sources
                .errors_total
                .with_label_values(&["ethereum", "engine", "computation"])
                .get()
        };

        engine.apply_at(ok(SourceId::EthereumExecution, execution(1, "custom"), t(1)), t(1));
        for i in 2..5 {
            engine.apply_at(failed(SourceId::EthereumBeacon, t(i)), t(i));
            engine.apply_at(ok(SourceId::EthereumExecution, execution(i, "custom"), t(i)), t(i));
        }
        assert_eq!(count(), 1);

        // Cleared, then seen again: a new occurrence.
        engine.apply_at(ok(SourceId::EthereumExecution, execution(6, "Geth/v1.0.0"), t(6)), t(6));
        engine.apply_at(ok(SourceId::EthereumExecution, execution(7, "custom"), t(7)), t(7));
        assert_eq!(count(), 2);
    }

    #[test]
    fn call_failing_inside_partial_polls_flags_source_stale() {
        let (mut engine, metrics) = engine();
        let table = metrics.samples();
        let external = |height: Option<u64>, at| {
            ok(
                SourceId::EthereumExternal,
                Payload::External(ExternalReference {
                    height,
                    participation_rate: Some(0.99),
                }),
                at,
            )
        };

        engine.apply_at(ok(SourceId::EthereumExecution, execution(100, "Geth/v1.0.0"), t(1)), t(1));
        engine.apply_at(external(Some(105), t(1)), t(1));
        assert_eq!(table.value("ethereum_sync_lag", &[]), Some(5.0));

        engine.apply_at(external(None, t(2)), t(2));
        assert_eq!(table.value("ethereum_external_stale", &[]), Some(0.0));

        for i in 3..6 {
            engine.apply_at(external(None, t(i)), t(i));
        }
        assert_eq!(table.value("ethereum_external_up", &[]), Some(1.0));
        assert_eq!(table.value("ethereum_external_stale", &[]), Some(1.0));
        assert_eq!(table.value("ethereum_execution_stale", &[]), Some(0.0));

        engine.apply_at(external(Some(106), t(6)), t(6));
        assert_eq!(table.value("ethereum_external_stale", &[]), Some(0.0));
        assert_eq!(table.value("ethereum_sync_lag", &[]), Some(6.0));
    }

    #[tokio::test]
    async fn run_drains_until_senders_drop() {
        let (engine, metrics) = engine();
        let (tx, rx) = mpsc::channel(4);
        tx.send(ok(SourceId::EthereumExecution, execution(7, "Geth/v1.0.0"), t(1)))
            .await
            .expect("send");
        drop(tx);
        engine.run(rx).await;
        assert_eq!(metrics.samples().value("ethereum_block_height", &[]), Some(7.0));
    }
}
