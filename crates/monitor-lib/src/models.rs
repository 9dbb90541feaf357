//! Core data models for the restart monitor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifecycle of a tracked pod record
///
/// Records that age out are deleted by the cleanup scheduler rather than
/// carried in a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// Counting restarts inside the current window
    Tracking,
    /// Restart count reached the threshold and remediation is pending or failed
    ThresholdReached,
    /// A remediation completed and the window was reset
    Remediated,
}

impl std::fmt::Display for RecordState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordState::Tracking => write!(f, "tracking"),
            RecordState::ThresholdReached => write!(f, "threshold_reached"),
            RecordState::Remediated => write!(f, "remediated"),
        }
    }
}

/// A crash-looping pod observed in a single watch event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartObservation {
    pub pod_uid: String,
    pub pod_name: String,
    pub namespace: String,
    /// Highest cumulative restart count across the pod's containers
    pub real_restart_count: i32,
}

/// Restart history for a single pod identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodRecord {
    pub pod_name: String,
    pub namespace: String,
    /// When the current counting window opened
    pub first_detected: DateTime<Utc>,
    /// Most recently observed new restart
    pub last_restart: DateTime<Utc>,
    /// New restarts observed inside the current window
    pub restart_count: u32,
    /// Highest cumulative container restart count seen so far
    pub real_restart_count: i32,
    pub state: RecordState,
}

impl PodRecord {
    /// Open a record for a pod seen crash-looping for the first time
    pub fn open(observation: &RestartObservation, now: DateTime<Utc>) -> Self {
        Self {
            pod_name: observation.pod_name.clone(),
            namespace: observation.namespace.clone(),
            first_detected: now,
            last_restart: now,
            restart_count: 1,
            real_restart_count: observation.real_restart_count,
            state: RecordState::Tracking,
        }
    }

    /// Whether the window anchored at `first_detected` is still open at `now`
    pub fn window_open(&self, now: DateTime<Utc>, window: Duration) -> bool {
        !elapsed_exceeds(self.first_detected, now, window)
    }

    /// Record a genuinely new restart, reopening the window if it elapsed
    ///
    /// Returns true when the window was reopened.
    pub fn observe_restart(
        &mut self,
        real_restart_count: i32,
        now: DateTime<Utc>,
        window: Duration,
        threshold: u32,
    ) -> bool {
        let reopened = !self.window_open(now, window);
        if reopened {
            self.restart_count = 1;
            self.first_detected = now;
        } else {
            self.restart_count += 1;
        }
        self.last_restart = now;
        self.real_restart_count = real_restart_count;
        self.state = if self.restart_count >= threshold {
            RecordState::ThresholdReached
        } else {
            RecordState::Tracking
        };
        reopened
    }

    /// Reset the window after a successful remediation
    pub fn mark_remediated(&mut self, now: DateTime<Utc>, real_restart_count: i32) {
        self.restart_count = 0;
        self.first_detected = now;
        self.last_restart = now;
        self.real_restart_count = real_restart_count;
        self.state = RecordState::Remediated;
    }

    /// Whether the pod has been quiet for longer than the window
    pub fn is_expired(&self, now: DateTime<Utc>, window: Duration) -> bool {
        elapsed_exceeds(self.last_restart, now, window)
    }

    /// Whether the record has accumulated enough restarts to remediate
    pub fn threshold_reached(&self, threshold: u32) -> bool {
        self.restart_count >= threshold
    }
}

/// True when strictly more than `window` has passed between `since` and `now`.
/// A `now` earlier than `since` never exceeds.
fn elapsed_exceeds(since: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    now.signed_duration_since(since)
        .to_std()
        .map(|elapsed| elapsed > window)
        .unwrap_or(false)
}
