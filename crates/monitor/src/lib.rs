//! Pod restart monitor service
//!
//! Configuration loading and the health/metrics HTTP API; process wiring
//! lives in the binary.

pub mod api;
pub mod config;
