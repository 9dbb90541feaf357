//! Library for the pod restart monitor
//!
//! This crate provides the core functionality for:
//! - Detecting crash-looping pods from watch events
//! - Sliding-window restart counting in a concurrent record store
//! - Remediation by Deployment rollback or webhook notification
//! - Periodic eviction of idle records
//! - Health checks and observability

pub mod cleanup;
pub mod detector;
pub mod health;
pub mod models;
pub mod notify;
pub mod observability;
pub mod remediation;
pub mod store;
pub mod tracker;
pub mod watch;

pub use cleanup::CleanupScheduler;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{MonitorMetrics, StructuredLogger};
pub use remediation::{KubeClusterApi, MonitorConfig, RemediationMode, RestartMonitor};
pub use store::RecordStore;
pub use tracker::WindowConfig;
pub use watch::{NamespaceWatcher, WatchScope};
