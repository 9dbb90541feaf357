//! Notification message templates

use chrono::{DateTime, Local, TimeZone};

/// Timestamp layout used in notification bodies
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Message sent when a pod reaches the restart threshold
pub fn restart_message<Tz: TimeZone>(
    pod_name: &str,
    namespace: &str,
    threshold: u32,
    timestamp: &DateTime<Tz>,
) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "POD: {}\nNAMESPACE: {}\nRESTARTS_THRESHOLD: {}\nTIMESTAMP: {}\nMESSAGE: pod restarted times to the threshold",
        pod_name,
        namespace,
        threshold,
        timestamp.format(TIMESTAMP_FORMAT)
    )
}

/// Message reporting the result of a rollback attempt
pub fn rollback_message<Tz: TimeZone>(
    pod_name: &str,
    namespace: &str,
    result: &str,
    timestamp: &DateTime<Tz>,
) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "POD: {}\nNAMESPACE: {}\nTIMESTAMP: {}\nMESSAGE: {}",
        pod_name,
        namespace,
        timestamp.format(TIMESTAMP_FORMAT),
        result
    )
}

/// Current local time, as operators read notification timestamps in node time
pub(crate) fn now_local() -> DateTime<Local> {
    Local::now()
}
