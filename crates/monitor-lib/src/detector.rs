//! Classification of pod status snapshots as crash-loop restarts

use crate::models::RestartObservation;
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};

/// Waiting reason reported for containers in crash-loop backoff
pub const CRASH_LOOP_BACK_OFF: &str = "CrashLoopBackOff";

fn container_statuses(pod: &Pod) -> &[ContainerStatus] {
    pod.status
        .as_ref()
        .and_then(|status| status.container_statuses.as_deref())
        .unwrap_or_default()
}

/// True if any container is waiting in crash-loop backoff
pub fn is_crash_looping(pod: &Pod) -> bool {
    container_statuses(pod).iter().any(|cs| {
        cs.state
            .as_ref()
            .and_then(|state| state.waiting.as_ref())
            .and_then(|waiting| waiting.reason.as_deref())
            == Some(CRASH_LOOP_BACK_OFF)
    })
}

/// True if any container has restarted at least once
pub fn is_restart_event(pod: &Pod) -> bool {
    container_statuses(pod).iter().any(|cs| cs.restart_count > 0)
}

/// Highest restart count across containers.
///
/// Containers restarting independently do not compound, so this is a max
/// and not a sum.
pub fn real_restart_count(pod: &Pod) -> i32 {
    container_statuses(pod)
        .iter()
        .map(|cs| cs.restart_count)
        .max()
        .unwrap_or(0)
        .max(0)
}

/// Classify a pod snapshot, returning an observation only for crash-looping
/// pods that have restarted. Pods without a UID cannot be tracked.
pub fn classify(pod: &Pod) -> Option<RestartObservation> {
    if !is_crash_looping(pod) || !is_restart_event(pod) {
        return None;
    }

    let pod_uid = pod.metadata.uid.clone()?;
    Some(RestartObservation {
        pod_uid,
        pod_name: pod.metadata.name.clone().unwrap_or_default(),
        namespace: pod.metadata.namespace.clone().unwrap_or_default(),
        real_restart_count: real_restart_count(pod),
    })
}
