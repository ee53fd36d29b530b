//! Prometheus registry holding the sample table and the self-metrics.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use dashmap::DashMap;
use prometheus::core::{Collector, Desc};
use prometheus::proto::{Gauge, LabelPair, Metric, MetricFamily, MetricType};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

use crate::types::{MetricSample, SampleKey, SourceId};

/// Metrics the scheduler keeps about its own polling.
#[derive(Clone)]
pub struct SourceMetrics {
    /// Failed polls and failed calls, by error kind.
    pub errors_total: IntCounterVec,
    /// Completed polls by outcome (`success`, `partial`, `failure`).
    pub polls_total: IntCounterVec,
    /// Wall time of each poll, in seconds.
    pub poll_duration_seconds: HistogramVec,
}

impl SourceMetrics {
    /// Registers the source metrics into the given `Registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let errors_total = IntCounterVec::new(
            Opts::new(
                "chainwatch_source_errors_total",
                "Errors while polling data sources or computing derived metrics",
            ),
            &["chain", "source", "kind"],
        )?;
        registry.register(Box::new(errors_total.clone()))?;

        let polls_total = IntCounterVec::new(
            Opts::new("chainwatch_source_polls_total", "Completed polls by outcome"),
            &["chain", "source", "outcome"],
        )?;
        registry.register(Box::new(polls_total.clone()))?;

        let poll_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "chainwatch_source_poll_duration_seconds",
                "Time spent in one poll of a data source in seconds",
            )
            .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["chain", "source"],
        )?;
        registry.register(Box::new(poll_duration_seconds.clone()))?;

        Ok(Self {
            errors_total,
            polls_total,
            poll_duration_seconds,
        })
    }

    pub fn record_error(&self, source: SourceId, kind: &str) {
        self.errors_total
            .with_label_values(&[source.chain().prefix(), source.name(), kind])
            .inc();
    }

    pub fn record_poll(&self, source: SourceId, outcome: &str, elapsed: Duration) {
        let (chain, name) = (source.chain().prefix(), source.name());
        self.polls_total.with_label_values(&[chain, name, outcome]).inc();
        self.poll_duration_seconds
            .with_label_values(&[chain, name])
            .observe(elapsed.as_secs_f64());
    }
}

/// Latest sample per identity. Cloning shares the table.
///
/// Each upsert replaces one entry atomically; readers never observe a
/// partially written sample.
#[derive(Clone, Default)]
pub struct SampleTable {
    inner: Arc<DashMap<SampleKey, MetricSample>>,
}

impl SampleTable {
    pub fn upsert(&self, sample: MetricSample) {
        self.inner.insert(sample.key(), sample);
    }

    pub fn get(&self, key: &SampleKey) -> Option<MetricSample> {
        self.inner.get(key).map(|s| s.value().clone())
    }

    /// Value of `name{labels}`, if present.
    pub fn value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let key = SampleKey {
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        self.inner.get(&key).map(|s| s.value)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// All samples in canonical (name, labels) order.
    pub fn snapshot(&self) -> Vec<MetricSample> {
        let mut samples: Vec<_> = self.inner.iter().map(|e| e.value().clone()).collect();
        samples.sort_by(|a, b| (&a.name, &a.labels).cmp(&(&b.name, &b.labels)));
        samples
    }
}

/// Exposes the sample table through the Prometheus registry. Every sample
/// is rendered as a gauge.
struct SampleCollector {
    table: SampleTable,
    expose_timestamps: bool,
}

impl SampleCollector {
    fn metric(&self, sample: &MetricSample) -> Metric {
        let mut gauge = Gauge::default();
        gauge.set_value(sample.value);

        let mut metric = Metric::default();
        for (name, value) in &sample.labels {
            let mut pair = LabelPair::default();
            pair.set_name(name.clone());
            pair.set_value(value.clone());
            metric.mut_label().push(pair);
        }
        metric.set_gauge(gauge);

        if self.expose_timestamps {
            if let Ok(since) = sample.timestamp.duration_since(UNIX_EPOCH) {
                metric.set_timestamp_ms(since.as_millis() as i64);
            }
        }
        metric
    }
}

impl Collector for SampleCollector {
    fn desc(&self) -> Vec<&Desc> {
        // Sample names are dynamic; nothing to pre-declare.
        Vec::new()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let mut families: BTreeMap<String, MetricFamily> = BTreeMap::new();

        for sample in self.table.snapshot() {
            let family = families.entry(sample.name.clone()).or_insert_with(|| {
                let mut mf = MetricFamily::default();
                mf.set_name(sample.name.clone());
                mf.set_help(sample.help.to_string());
                mf.set_field_type(MetricType::GAUGE);
                mf
            });
            family.mut_metric().push(self.metric(&sample));
        }

        families.into_values().collect()
    }
}

/// Wrapper around a Prometheus registry, the sample table and the source
/// self-metrics.
///
/// This is the handle shared (behind an [`Arc`]) by the engine, the
/// scheduler tasks and the exposition server.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,
    samples: SampleTable,
    pub sources: SourceMetrics,
}

impl MetricsRegistry {
    pub fn new(expose_timestamps: bool) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let sources = SourceMetrics::register(&registry)?;
        let samples = SampleTable::default();
        registry.register(Box::new(SampleCollector {
            table: samples.clone(),
            expose_timestamps,
        }))?;

        Ok(Self {
            registry,
            samples,
            sources,
        })
    }

    pub fn samples(&self) -> &SampleTable {
        &self.samples
    }

    /// Encodes everything in this registry into the Prometheus text format.
    pub fn gather_text(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!(error = %e, "failed to encode Prometheus metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
