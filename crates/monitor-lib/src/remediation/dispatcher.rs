//! Event handling and remediation dispatch
//!
//! Each pod-modification event is classified, folded into the record store
//! and, once the pod crosses the restart threshold, remediated by rollback or
//! by notifying the operator. Remediation runs inline so a namespace's event
//! stream is not processed further until it completes.

use super::cluster::ClusterApi;
use super::rollback::{RollbackPlanner, RollbackResult};
use crate::detector;
use crate::models::{PodRecord, RestartObservation};
use crate::notify::{self, Notifier};
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::store::RecordStore;
use crate::tracker::{self, WindowChange, WindowConfig};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use std::sync::Arc;
use tracing::{debug, warn};

/// What to do once a pod reaches the restart threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemediationMode {
    /// Roll the owning Deployment back to its previous healthy revision
    Rollback,
    /// Only notify the operator
    Notify,
}

impl RemediationMode {
    pub fn from_rollback_flag(rollback: bool) -> Self {
        if rollback {
            RemediationMode::Rollback
        } else {
            RemediationMode::Notify
        }
    }
}

/// Result of a triggered remediation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemediationOutcome {
    /// Threshold notification sent, window reset
    Notified,
    /// Rollback applied, window reset
    RolledBack(RollbackResult),
    /// Rollback failed; the window is left as is
    RollbackFailed { reason: String },
}

/// Configuration for the restart monitor
#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    pub window: WindowConfig,
    pub mode: RemediationMode,
}

/// Restart tracking and remediation engine shared by all watch tasks
pub struct RestartMonitor {
    store: RecordStore,
    config: MonitorConfig,
    cluster: Arc<dyn ClusterApi>,
    notifier: Arc<dyn Notifier>,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
}

impl RestartMonitor {
    pub fn new(
        store: RecordStore,
        config: MonitorConfig,
        cluster: Arc<dyn ClusterApi>,
        notifier: Arc<dyn Notifier>,
        metrics: MonitorMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            store,
            config,
            cluster,
            notifier,
            metrics,
            logger,
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Handle a pod-modification event
    pub async fn handle_pod_event(&self, pod: &Pod) -> Option<RemediationOutcome> {
        self.handle_pod_event_at(pod, Utc::now()).await
    }

    /// Handle a pod-modification event observed at `now`
    pub async fn handle_pod_event_at(
        &self,
        pod: &Pod,
        now: DateTime<Utc>,
    ) -> Option<RemediationOutcome> {
        let observation = detector::classify(pod)?;
        let (record, change) = self.record_restart(&observation, now).await;

        // Re-delivered state never remediates, even while a failed
        // rollback leaves the count at the threshold.
        if change == WindowChange::Unchanged
            || !record.threshold_reached(self.config.window.threshold)
        {
            return None;
        }

        self.logger.log_threshold_reached(
            &observation.pod_uid,
            &record.pod_name,
            &record.namespace,
            record.restart_count,
        );

        let outcome = match self.config.mode {
            RemediationMode::Rollback => self.rollback(pod, &observation, now).await,
            RemediationMode::Notify => self.notify(&observation, now).await,
        };
        Some(outcome)
    }

    /// Fold an observation into the store under its write lock
    async fn record_restart(
        &self,
        observation: &RestartObservation,
        now: DateTime<Utc>,
    ) -> (PodRecord, WindowChange) {
        let window = self.config.window;
        let mut change = WindowChange::Unchanged;
        let record = self
            .store
            .upsert(&observation.pod_uid, |existing| {
                let outcome = tracker::track(existing, observation, now, &window);
                change = outcome.change;
                outcome.record
            })
            .await;

        match change {
            WindowChange::Created => {
                self.metrics.inc_restarts_observed();
                self.metrics.set_records_tracked(self.store.len().await as i64);
                self.logger.log_record_created(
                    &observation.pod_uid,
                    &observation.pod_name,
                    &observation.namespace,
                    &now,
                );
            }
            WindowChange::Incremented | WindowChange::WindowReopened => {
                self.metrics.inc_restarts_observed();
                debug!(
                    pod_uid = %observation.pod_uid,
                    pod_name = %observation.pod_name,
                    namespace = %observation.namespace,
                    restart_count = record.restart_count,
                    real_restart_count = record.real_restart_count,
                    window_reopened = change == WindowChange::WindowReopened,
                    "Counted new restart"
                );
            }
            WindowChange::Unchanged => {}
        }

        (record, change)
    }

    async fn rollback(
        &self,
        pod: &Pod,
        observation: &RestartObservation,
        now: DateTime<Utc>,
    ) -> RemediationOutcome {
        let planner = RollbackPlanner::new(self.cluster.as_ref());

        let (outcome, message) = match planner.rollback(pod).await {
            Ok(result) => {
                self.store
                    .reset(&observation.pod_uid, now, observation.real_restart_count)
                    .await;
                self.metrics.inc_remediations("rollback");
                self.logger.log_rollback_succeeded(
                    &observation.pod_name,
                    &observation.namespace,
                    &result.deployment,
                    result.from_revision,
                    result.to_revision,
                );
                (
                    RemediationOutcome::RolledBack(result),
                    "Pod rollback successful".to_string(),
                )
            }
            Err(err) => {
                // The window stays open so the next new restart retries.
                let reason = err.to_string();
                self.metrics.inc_rollback_failures();
                self.logger
                    .log_rollback_failed(&observation.pod_name, &observation.namespace, &reason);
                let message = format!("Pod rollback failed: {}", reason);
                (RemediationOutcome::RollbackFailed { reason }, message)
            }
        };

        let text = notify::rollback_message(
            &observation.pod_name,
            &observation.namespace,
            &message,
            &notify::now_local(),
        );
        self.deliver(&text).await;
        outcome
    }

    async fn notify(&self, observation: &RestartObservation, now: DateTime<Utc>) -> RemediationOutcome {
        self.store
            .reset(&observation.pod_uid, now, observation.real_restart_count)
            .await;
        self.metrics.inc_remediations("notify");

        let text = notify::restart_message(
            &observation.pod_name,
            &observation.namespace,
            self.config.window.threshold,
            &notify::now_local(),
        );
        self.deliver(&text).await;
        RemediationOutcome::Notified
    }

    /// Send a notification; failures are logged and dropped
    async fn deliver(&self, message: &str) {
        if let Err(e) = self.notifier.send(message).await {
            self.metrics.inc_notification_failures();
            let error = format!("{:#}", e);
            warn!(error = %error, "Failed to deliver notification");
        }
    }
}
