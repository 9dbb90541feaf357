//! Monitor configuration
//!
//! Settings come from plain environment variables (`TIME_WINDOW`,
//! `THRESHOLD`, ...). Raw values are collected through the `config` crate
//! and then parsed by small pure functions; unparsable values fall back to
//! their defaults with a warning.

use anyhow::{bail, Context, Result};
use monitor_lib::notify::NotifyType;
use monitor_lib::tracker::{DEFAULT_THRESHOLD, DEFAULT_TIME_WINDOW};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;
use url::Url;

pub const DEFAULT_API_PORT: u16 = 8080;
pub const DEFAULT_SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);
pub const DEFAULT_CLUSTER_NAME: &str = "default";

/// Environment values before validation, keyed by lowercased variable name
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    pub monitor_namespace: Option<String>,
    pub kubeconfig_path: Option<String>,
    pub time_window: Option<String>,
    pub threshold: Option<String>,
    pub notify_type: Option<String>,
    pub webhook: Option<String>,
    pub rollback: Option<String>,
    pub api_port: Option<String>,
    pub shutdown_grace_period: Option<String>,
    pub cluster_name: Option<String>,
}

/// Validated monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Namespaces to watch; empty watches all namespaces
    pub namespaces: Vec<String>,
    /// Explicit kubeconfig; `None` uses in-cluster or default discovery
    pub kubeconfig_path: Option<PathBuf>,
    pub time_window: Duration,
    pub threshold: u32,
    pub notify_type: NotifyType,
    /// Only set for webhook-backed notify types
    pub webhook: Option<Url>,
    pub rollback: bool,
    pub api_port: u16,
    pub shutdown_grace_period: Duration,
    pub cluster_name: String,
}

impl MonitorSettings {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        let raw: RawConfig = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("Failed to read environment configuration")?
            .try_deserialize()
            .context("Failed to deserialize environment configuration")?;

        Self::from_raw(raw)
    }

    /// Validate raw values
    ///
    /// Only a missing or malformed webhook for a webhook notify type is an
    /// error; everything else falls back to its default.
    pub fn from_raw(raw: RawConfig) -> Result<Self> {
        let notify_type = parse_notify_type(raw.notify_type.as_deref());
        let webhook = if notify_type.uses_webhook() {
            Some(parse_webhook(raw.webhook.as_deref())?)
        } else {
            None
        };

        Ok(Self {
            namespaces: parse_namespaces(raw.monitor_namespace.as_deref()),
            kubeconfig_path: non_empty(raw.kubeconfig_path.as_deref()).map(PathBuf::from),
            time_window: parse_time_window(raw.time_window.as_deref()),
            threshold: parse_threshold(raw.threshold.as_deref()),
            notify_type,
            webhook,
            rollback: parse_rollback(raw.rollback.as_deref()),
            api_port: parse_api_port(raw.api_port.as_deref()),
            shutdown_grace_period: parse_grace_period(raw.shutdown_grace_period.as_deref()),
            cluster_name: non_empty(raw.cluster_name.as_deref())
                .unwrap_or(DEFAULT_CLUSTER_NAME)
                .to_string(),
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Comma-separated namespaces, trimmed, empty entries dropped
pub fn parse_namespaces(value: Option<&str>) -> Vec<String> {
    non_empty(value)
        .map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|ns| !ns.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub fn parse_time_window(value: Option<&str>) -> Duration {
    let Some(value) = non_empty(value) else {
        return DEFAULT_TIME_WINDOW;
    };
    match parse_duration(value).filter(|d| !d.is_zero()) {
        Some(window) => window,
        None => {
            warn!(value = %value, "Invalid TIME_WINDOW, using default");
            DEFAULT_TIME_WINDOW
        }
    }
}

pub fn parse_threshold(value: Option<&str>) -> u32 {
    let Some(value) = non_empty(value) else {
        return DEFAULT_THRESHOLD;
    };
    match value.parse::<u32>() {
        Ok(threshold) if threshold >= 1 => threshold,
        _ => {
            warn!(value = %value, "Invalid THRESHOLD, using default");
            DEFAULT_THRESHOLD
        }
    }
}

pub fn parse_notify_type(value: Option<&str>) -> NotifyType {
    match non_empty(value) {
        Some(value) => NotifyType::parse(value),
        None => NotifyType::Unsupported("undefined".to_string()),
    }
}

pub fn parse_webhook(value: Option<&str>) -> Result<Url> {
    let Some(value) = non_empty(value) else {
        bail!("WEBHOOK is required for webhook notifications");
    };
    let url = Url::parse(value).with_context(|| format!("Invalid WEBHOOK url: {}", value))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("WEBHOOK must be an http(s) url, got scheme {}", url.scheme());
    }
    Ok(url)
}

/// Boolean in the forms `1/0`, `t/f`, `true/false`, case-insensitive
pub fn parse_rollback(value: Option<&str>) -> bool {
    let Some(value) = non_empty(value) else {
        return false;
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => true,
        "0" | "f" | "false" => false,
        _ => {
            warn!(value = %value, "Invalid ROLLBACK, rollback disabled");
            false
        }
    }
}

pub fn parse_api_port(value: Option<&str>) -> u16 {
    let Some(value) = non_empty(value) else {
        return DEFAULT_API_PORT;
    };
    value.parse().unwrap_or_else(|_| {
        warn!(value = %value, "Invalid API_PORT, using default");
        DEFAULT_API_PORT
    })
}

pub fn parse_grace_period(value: Option<&str>) -> Duration {
    let Some(value) = non_empty(value) else {
        return DEFAULT_SHUTDOWN_GRACE_PERIOD;
    };
    parse_duration(value).unwrap_or_else(|| {
        warn!(value = %value, "Invalid SHUTDOWN_GRACE_PERIOD, using default");
        DEFAULT_SHUTDOWN_GRACE_PERIOD
    })
}

/// Parse a duration such as `90s`, `5m`, `1h30m` or `1.5h`
///
/// Units are `ns`, `us`, `µs`, `ms`, `s`, `m` and `h`; a bare `0` is zero.
/// Negative durations are rejected.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim().strip_prefix('+').unwrap_or(input.trim());
    if input == "0" {
        return Some(Duration::ZERO);
    }
    if input.is_empty() {
        return None;
    }

    let mut total = 0f64;
    let mut rest = input;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        if number.is_empty() || number == "." {
            return None;
        }
        let value: f64 = number.parse().ok()?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let nanos_per_unit = match unit {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };

        total += value * nanos_per_unit;
        rest = tail;
    }

    Some(Duration::from_nanos(total.round() as u64))
}
