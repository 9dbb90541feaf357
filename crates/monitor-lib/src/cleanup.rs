//! Periodic eviction of idle restart records
//!
//! A record whose last counted restart is older than the time window is
//! removed so memory stays bounded by the set of recently crash-looping pods.

use crate::health::{components, HealthRegistry};
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::store::RecordStore;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Lower bound on the sweep period
pub const MIN_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Sweep period for a window: a quarter of it, at least one minute
pub fn cleanup_interval(time_window: Duration) -> Duration {
    (time_window / 4).max(MIN_CLEANUP_INTERVAL)
}

/// Removes records that have been idle for longer than the time window
pub struct CleanupScheduler {
    store: RecordStore,
    time_window: Duration,
    health: HealthRegistry,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
}

impl CleanupScheduler {
    pub fn new(
        store: RecordStore,
        time_window: Duration,
        health: HealthRegistry,
        metrics: MonitorMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            store,
            time_window,
            health,
            metrics,
            logger,
        }
    }

    pub fn interval(&self) -> Duration {
        cleanup_interval(self.time_window)
    }

    /// Delete every record whose last restart is older than the window at `now`
    ///
    /// Returns the number of records removed.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let window = self.time_window;
        let expired = self
            .store
            .sweep(|record| record.is_expired(now, window))
            .await;

        for (uid, record) in &expired {
            let idle = now
                .signed_duration_since(record.last_restart)
                .to_std()
                .unwrap_or_default();
            self.logger
                .log_record_expired(uid, &record.pod_name, &record.namespace, idle);
        }

        let remaining = self.store.len().await;
        self.metrics.inc_records_evicted(expired.len() as u64);
        self.metrics.set_records_tracked(remaining as i64);
        debug!(
            removed = expired.len(),
            remaining = remaining,
            "Cleanup sweep complete"
        );

        expired.len()
    }

    /// Run sweeps until shutdown; the first sweep happens one period after start
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let period = self.interval();
        info!(
            interval_secs = period.as_secs(),
            window_secs = self.time_window.as_secs(),
            "Starting record cleanup"
        );
        self.health.set_healthy(components::CLEANUP).await;

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_expired(Utc::now()).await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down record cleanup");
                    break;
                }
            }
        }
    }
}
