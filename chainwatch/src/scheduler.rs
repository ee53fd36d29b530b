//! Collection scheduler.
//!
//! Every source runs in its own [`SourceTask`]: poll, report, wait, repeat.
//! A task awaits its poll (bounded by the schedule timeout) before it
//! schedules the next one, so polls of one source never overlap. Failures
//! are counted, logged and forwarded to the engine; they never stop the
//! task.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::client::Source;
use crate::config::Schedule;
use crate::error::SourceError;
use crate::metrics::MetricsRegistry;
use crate::types::CollectionResult;

/// Failure backoff: starts at the polling interval, doubles on every
/// consecutive failure up to `max`, resets on success.
#[derive(Clone, Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: initial,
        }
    }

    /// Records a failure and returns how long to wait before the next poll.
    pub fn mark_failure(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn mark_success(&mut self) {
        self.current = self.initial;
    }

    pub fn current(&self) -> Duration {
        self.current
    }
}

/// Periodic driver of one source.
pub struct SourceTask<S> {
    source: S,
    schedule: Schedule,
    backoff: Backoff,
    results: mpsc::Sender<CollectionResult>,
    metrics: Arc<MetricsRegistry>,
}

impl<S: Source> SourceTask<S> {
    pub fn new(
        source: S,
        schedule: Schedule,
        max_backoff: Duration,
        results: mpsc::Sender<CollectionResult>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            source,
            schedule,
            backoff: Backoff::new(schedule.interval, max_backoff),
            results,
            metrics,
        }
    }

    /// Polls until `shutdown` is cancelled. Cancellation is only observed
    /// between polls; an in-flight poll completes or times out first.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let id = self.source.id();
        tracing::info!(
            chain = %id.chain(),
            source = id.name(),
            interval = ?self.schedule.interval,
            timeout = ?self.schedule.timeout,
            "source task started"
        );

        while !shutdown.is_cancelled() {
            let delay = self.poll_once().await;

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!(chain = %id.chain(), source = id.name(), "source task stopped");
    }

    /// Runs one poll, records its outcome and forwards it to the engine.
    /// Returns the delay until the next poll should start.
    pub async fn poll_once(&mut self) -> Duration {
        let id = self.source.id();
        let timeout = self.schedule.timeout;
        let started = Instant::now();

        let outcome = match tokio::time::timeout(timeout, self.source.poll()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(SourceError::Timeout(timeout)),
        };
        let elapsed = started.elapsed();

        let (label, delay) = match &outcome {
            Ok(report) => {
                for call in &report.call_errors {
                    self.metrics.sources.record_error(id, call.error.kind());
                }
                self.backoff.mark_success();
                let label = if report.call_errors.is_empty() {
                    "success"
                } else {
                    "partial"
                };
                (label, self.schedule.interval.saturating_sub(elapsed))
            }
            Err(err) => {
                self.metrics.sources.record_error(id, err.kind());
                let delay = self.backoff.mark_failure();
                tracing::warn!(
                    chain = %id.chain(),
                    source = id.name(),
                    kind = err.kind(),
                    error = %err,
                    retry_in = ?delay,
                    "poll failed"
                );
                ("failure", delay)
            }
        };
        self.metrics.sources.record_poll(id, label, elapsed);

        let result = CollectionResult {
            source: id,
            collected_at: SystemTime::now(),
            outcome,
        };
        if self.results.send(result).await.is_err() {
            tracing::debug!(source = %id, "engine is gone; result dropped");
        }

        delay
    }
}
