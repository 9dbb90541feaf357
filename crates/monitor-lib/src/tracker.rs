//! Sliding-window restart counting
//!
//! Given the stored record for a pod (if any) and a new observation, computes
//! the updated record. The computation is pure so it can run inside the
//! record store's write lock.

use crate::models::{PodRecord, RecordState, RestartObservation};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Default sliding window (5 minutes)
pub const DEFAULT_TIME_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Default number of new restarts inside the window that triggers remediation
pub const DEFAULT_THRESHOLD: u32 = 3;

/// Window tracking parameters
#[derive(Debug, Clone, Copy)]
pub struct WindowConfig {
    pub time_window: Duration,
    pub threshold: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            time_window: DEFAULT_TIME_WINDOW,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// How an observation changed the stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowChange {
    /// First restart seen for this pod
    Created,
    /// New restart counted inside the open window
    Incremented,
    /// Window had elapsed; counting restarted at 1
    WindowReopened,
    /// Duplicate or stale event; record untouched
    Unchanged,
}

/// Result of tracking one observation
#[derive(Debug, Clone)]
pub struct TrackOutcome {
    pub record: PodRecord,
    pub change: WindowChange,
}

/// Apply an observation to the existing record under sliding-window rules
pub fn track(
    existing: Option<&PodRecord>,
    observation: &RestartObservation,
    now: DateTime<Utc>,
    config: &WindowConfig,
) -> TrackOutcome {
    let Some(existing) = existing else {
        let mut record = PodRecord::open(observation, now);
        if record.threshold_reached(config.threshold) {
            record.state = RecordState::ThresholdReached;
        }
        return TrackOutcome {
            record,
            change: WindowChange::Created,
        };
    };

    // Watch streams re-deliver unchanged state; only a higher cumulative
    // count is a new restart.
    if observation.real_restart_count <= existing.real_restart_count {
        return TrackOutcome {
            record: existing.clone(),
            change: WindowChange::Unchanged,
        };
    }

    let mut record = existing.clone();
    let reopened = record.observe_restart(
        observation.real_restart_count,
        now,
        config.time_window,
        config.threshold,
    );

    TrackOutcome {
        record,
        change: if reopened {
            WindowChange::WindowReopened
        } else {
            WindowChange::Incremented
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn observation(count: i32) -> RestartObservation {
        RestartObservation {
            pod_uid: "uid-1".to_string(),
            pod_name: "api-0".to_string(),
            namespace: "prod".to_string(),
            real_restart_count: count,
        }
    }

    fn minute(m: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + ChronoDuration::minutes(m)
    }

    fn run(events: &[(i64, i32)], config: &WindowConfig) -> Vec<TrackOutcome> {
        let mut current: Option<PodRecord> = None;
        let mut outcomes = Vec::new();
        for &(m, count) in events {
            let outcome = track(current.as_ref(), &observation(count), minute(m), config);
            current = Some(outcome.record.clone());
            outcomes.push(outcome);
        }
        outcomes
    }

    #[test]
    fn test_first_observation_creates_record() {
        let outcome = track(None, &observation(4), minute(0), &WindowConfig::default());
        assert_eq!(outcome.change, WindowChange::Created);
        assert_eq!(outcome.record.restart_count, 1);
        assert_eq!(outcome.record.real_restart_count, 4);
        assert_eq!(outcome.record.first_detected, minute(0));
    }

    #[test]
    fn test_three_restarts_a_minute_apart_reach_threshold() {
        let outcomes = run(&[(0, 1), (1, 2), (2, 3)], &WindowConfig::default());
        let last = outcomes.last().unwrap();
        assert_eq!(last.change, WindowChange::Incremented);
        assert_eq!(last.record.restart_count, 3);
        assert_eq!(last.record.state, RecordState::ThresholdReached);
        assert_eq!(last.record.first_detected, minute(0));
        assert_eq!(last.record.last_restart, minute(2));
    }

    #[test]
    fn test_duplicate_events_do_not_count() {
        let outcomes = run(&[(0, 1), (1, 1), (1, 1), (2, 2), (3, 2)], &WindowConfig::default());
        let changes: Vec<_> = outcomes.iter().map(|o| o.change).collect();
        assert_eq!(
            changes,
            vec![
                WindowChange::Created,
                WindowChange::Unchanged,
                WindowChange::Unchanged,
                WindowChange::Incremented,
                WindowChange::Unchanged,
            ]
        );
        assert_eq!(outcomes.last().unwrap().record.restart_count, 2);
        assert_eq!(outcomes.last().unwrap().record.last_restart, minute(2));
    }

    #[test]
    fn test_lower_count_is_ignored() {
        let outcomes = run(&[(0, 5), (1, 3)], &WindowConfig::default());
        let last = outcomes.last().unwrap();
        assert_eq!(last.change, WindowChange::Unchanged);
        assert_eq!(last.record.real_restart_count, 5);
    }

    #[test]
    fn test_gap_longer_than_window_reopens() {
        let outcomes = run(&[(0, 1), (6, 2)], &WindowConfig::default());
        let last = outcomes.last().unwrap();
        assert_eq!(last.change, WindowChange::WindowReopened);
        assert_eq!(last.record.restart_count, 1);
        assert_eq!(last.record.first_detected, minute(6));
        assert_eq!(last.record.state, RecordState::Tracking);
    }

    #[test]
    fn test_count_matches_strict_increases_within_window() {
        let events = [(0, 1), (1, 1), (1, 3), (2, 3), (3, 4), (4, 4), (5, 9)];
        let outcomes = run(&events, &WindowConfig {
            time_window: DEFAULT_TIME_WINDOW,
            threshold: 100,
        });

        let mut increases = 0;
        let mut highest = i32::MIN;
        for (&(_, count), outcome) in events.iter().zip(&outcomes) {
            if count > highest {
                increases += 1;
                highest = count;
            }
            assert_eq!(outcome.record.restart_count, increases);
        }
        assert_eq!(increases, 4);
    }

    #[test]
    fn test_window_measured_from_first_detected() {
        // Restarts keep arriving but the anchor is the first one.
        let outcomes = run(&[(0, 1), (3, 2), (5, 3), (6, 4)], &WindowConfig {
            time_window: DEFAULT_TIME_WINDOW,
            threshold: 10,
        });
        assert_eq!(outcomes[2].record.restart_count, 3);
        assert_eq!(outcomes[3].change, WindowChange::WindowReopened);
        assert_eq!(outcomes[3].record.restart_count, 1);
    }

    #[test]
    fn test_threshold_of_one_triggers_on_creation() {
        let config = WindowConfig {
            time_window: DEFAULT_TIME_WINDOW,
            threshold: 1,
        };
        let outcome = track(None, &observation(1), minute(0), &config);
        assert_eq!(outcome.record.state, RecordState::ThresholdReached);
    }
}
