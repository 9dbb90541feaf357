//! Remediation of crash-looping pods
//!
//! This module provides:
//! - The restart monitor that folds pod events into the record store
//! - Threshold dispatch to rollback or plain notification
//! - Deployment rollback target selection against ReplicaSet history

mod cluster;
mod dispatcher;
mod rollback;


pub use cluster::{ClusterApi, ClusterError, KubeClusterApi, ReplicaSetPage, LIST_PAGE_SIZE};
pub use dispatcher::{MonitorConfig, RemediationMode, RemediationOutcome, RestartMonitor};
pub use rollback::{
    current_revision, is_healthy, revision, select_target, selector_string, sort_by_revision,
    RollbackError, RollbackPlanner, RollbackResult, POD_TEMPLATE_HASH_LABEL, REVISION_ANNOTATION,
};
