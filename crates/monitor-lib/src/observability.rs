//! Observability infrastructure for the restart monitor
//!
//! Provides:
//! - Prometheus metrics (restarts observed, tracked records, remediations, failures)
//! - Structured JSON logging of record lifecycle and remediation events

use chrono::{DateTime, Utc};
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter,
    IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{error, info, warn};

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct MonitorMetricsInner {
    restarts_observed: IntCounter,
    records_tracked: IntGauge,
    remediations: IntCounterVec,
    rollback_failures: IntCounter,
    notification_failures: IntCounter,
    watch_reconnects: IntCounterVec,
    records_evicted: IntCounter,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            restarts_observed: register_int_counter!(
                "pod_restart_monitor_restarts_observed_total",
                "New container restarts counted for crash-looping pods"
            )
            .expect("Failed to register restarts_observed"),

            records_tracked: register_int_gauge!(
                "pod_restart_monitor_records_tracked",
                "Number of pods currently tracked in the record store"
            )
            .expect("Failed to register records_tracked"),

            remediations: register_int_counter_vec!(
                "pod_restart_monitor_remediations_total",
                "Remediations completed, by kind",
                &["kind"]
            )
            .expect("Failed to register remediations"),

            rollback_failures: register_int_counter!(
                "pod_restart_monitor_rollback_failures_total",
                "Rollback attempts that failed"
            )
            .expect("Failed to register rollback_failures"),

            notification_failures: register_int_counter!(
                "pod_restart_monitor_notification_failures_total",
                "Notifications that could not be delivered"
            )
            .expect("Failed to register notification_failures"),

            watch_reconnects: register_int_counter_vec!(
                "pod_restart_monitor_watch_reconnects_total",
                "Pod watch streams re-established, by namespace",
                &["namespace"]
            )
            .expect("Failed to register watch_reconnects"),

            records_evicted: register_int_counter!(
                "pod_restart_monitor_records_evicted_total",
                "Records removed by the cleanup scheduler"
            )
            .expect("Failed to register records_evicted"),
        }
    }
}

/// Monitor metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct MonitorMetrics {
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new)
    }

    pub fn inc_restarts_observed(&self) {
        self.inner().restarts_observed.inc();
    }

    pub fn set_records_tracked(&self, count: i64) {
        self.inner().records_tracked.set(count);
    }

    /// Count a completed remediation (`rollback` or `notify`)
    pub fn inc_remediations(&self, kind: &str) {
        self.inner().remediations.with_label_values(&[kind]).inc();
    }

    pub fn inc_rollback_failures(&self) {
        self.inner().rollback_failures.inc();
    }

    pub fn inc_notification_failures(&self) {
        self.inner().notification_failures.inc();
    }

    pub fn inc_watch_reconnects(&self, namespace: &str) {
        self.inner()
            .watch_reconnects
            .with_label_values(&[namespace])
            .inc();
    }

    pub fn inc_records_evicted(&self, count: u64) {
        self.inner().records_evicted.inc_by(count);
    }
}

/// Structured logger for monitor events
///
/// Provides consistent JSON-formatted logging for record lifecycle,
/// remediation and watch events.
#[derive(Clone)]
pub struct StructuredLogger {
    cluster_name: String,
}

impl StructuredLogger {
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
        }
    }

    /// Log a new record for a pod seen crash-looping for the first time
    pub fn log_record_created(
        &self,
        pod_uid: &str,
        pod_name: &str,
        namespace: &str,
        first_detected: &DateTime<Utc>,
    ) {
        info!(
            event = "record_created",
            cluster = %self.cluster_name,
            pod_uid = %pod_uid,
            pod_name = %pod_name,
            namespace = %namespace,
            first_detected = %first_detected.format("%Y-%m-%d %H:%M:%S"),
            "New record created for restarting pod"
        );
    }

    pub fn log_threshold_reached(
        &self,
        pod_uid: &str,
        pod_name: &str,
        namespace: &str,
        restart_count: u32,
    ) {
        warn!(
            event = "threshold_reached",
            cluster = %self.cluster_name,
            pod_uid = %pod_uid,
            pod_name = %pod_name,
            namespace = %namespace,
            restart_count = restart_count,
            "Pod reached restart threshold"
        );
    }

    pub fn log_rollback_succeeded(
        &self,
        pod_name: &str,
        namespace: &str,
        deployment: &str,
        from_revision: i64,
        to_revision: i64,
    ) {
        info!(
            event = "rollback_succeeded",
            cluster = %self.cluster_name,
            pod_name = %pod_name,
            namespace = %namespace,
            deployment = %deployment,
            from_revision = from_revision,
            to_revision = to_revision,
            "Pod rollback successful"
        );
    }

    pub fn log_rollback_failed(&self, pod_name: &str, namespace: &str, reason: &str) {
        error!(
            event = "rollback_failed",
            cluster = %self.cluster_name,
            pod_name = %pod_name,
            namespace = %namespace,
            reason = %reason,
            "Rollback failed"
        );
    }

    /// Log a record removed after the pod stayed quiet for a full window
    pub fn log_record_expired(&self, pod_uid: &str, pod_name: &str, namespace: &str, idle: Duration) {
        info!(
            event = "record_expired",
            cluster = %self.cluster_name,
            pod_uid = %pod_uid,
            pod_name = %pod_name,
            namespace = %namespace,
            idle_secs = idle.as_secs(),
            "Pod last restart exceeded time window, deleting record"
        );
    }

    pub fn log_watch_reconnect(&self, namespace: &str, delay: Duration, reason: &str) {
        warn!(
            event = "watch_reconnect",
            cluster = %self.cluster_name,
            namespace = %namespace,
            delay_secs = delay.as_secs(),
            reason = %reason,
            "Pod watch interrupted, reconnecting"
        );
    }

    pub fn log_startup(&self, version: &str, namespaces: &[String], rollback: bool) {
        info!(
            event = "monitor_started",
            cluster = %self.cluster_name,
            version = %version,
            namespaces = ?namespaces,
            rollback = rollback,
            "Pod restart monitor started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "monitor_shutdown",
            cluster = %self.cluster_name,
            reason = %reason,
            "Pod restart monitor shutting down"
        );
    }
}
