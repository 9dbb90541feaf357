//! Supervised pod watch streams
//!
//! One watcher runs per configured namespace (or a single cluster-wide one).
//! Each keeps a raw watch open, feeds `Modified` pods to the restart monitor
//! and re-establishes the stream after it ends or fails, resuming from the
//! last seen resourceVersion.

use crate::health::{components, HealthRegistry};
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::remediation::RestartMonitor;
use futures_util::{Stream, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, WatchEvent, WatchParams};
use kube::Client;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// First reconnect delay
pub const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Upper bound on the reconnect delay
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// resourceVersion meaning "any version", used at start and after 410 Gone
const ANY_VERSION: &str = "0";

/// What a watcher observes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchScope {
    AllNamespaces,
    Namespace(String),
}

impl WatchScope {
    /// One scope per namespace, or cluster-wide when the list is empty
    pub fn from_namespaces(namespaces: &[String]) -> Vec<WatchScope> {
        if namespaces.is_empty() {
            vec![WatchScope::AllNamespaces]
        } else {
            namespaces
                .iter()
                .map(|ns| WatchScope::Namespace(ns.clone()))
                .collect()
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        match self {
            WatchScope::AllNamespaces => None,
            WatchScope::Namespace(ns) => Some(ns),
        }
    }

    /// Metric label for the scope
    pub fn label(&self) -> &str {
        self.namespace().unwrap_or("*")
    }

    fn api(&self, client: Client) -> Api<Pod> {
        match self {
            WatchScope::AllNamespaces => Api::all(client),
            WatchScope::Namespace(ns) => Api::namespaced(client, ns),
        }
    }
}

impl fmt::Display for WatchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchScope::AllNamespaces => write!(f, "all namespaces"),
            WatchScope::Namespace(ns) => write!(f, "namespace {}", ns),
        }
    }
}

/// Capped exponential delay between reconnect attempts
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(INITIAL_RECONNECT_DELAY, MAX_RECONNECT_DELAY)
    }
}

impl ReconnectBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay for this attempt; doubles the next one up to the cap
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// How a single watch event should be processed
#[derive(Debug)]
pub enum EventAction {
    /// Pod modification to feed to the monitor
    Handle(Box<Pod>),
    Skip,
    /// Resume point is too old; restart from any version
    Expired,
    Failed(String),
}

/// Classify a watch event, advancing the resume point
pub fn apply_event(event: WatchEvent<Pod>, resource_version: &mut String) -> EventAction {
    match event {
        WatchEvent::Modified(pod) => {
            advance(resource_version, pod.metadata.resource_version.as_deref());
            EventAction::Handle(Box::new(pod))
        }
        WatchEvent::Added(pod) | WatchEvent::Deleted(pod) => {
            advance(resource_version, pod.metadata.resource_version.as_deref());
            EventAction::Skip
        }
        WatchEvent::Bookmark(bookmark) => {
            advance(resource_version, Some(&bookmark.metadata.resource_version));
            EventAction::Skip
        }
        WatchEvent::Error(err) if err.code == 410 => {
            *resource_version = ANY_VERSION.to_string();
            EventAction::Expired
        }
        WatchEvent::Error(err) => EventAction::Failed(format!("{} ({})", err.message, err.code)),
    }
}

fn advance(resource_version: &mut String, seen: Option<&str>) {
    if let Some(seen) = seen.filter(|v| !v.is_empty()) {
        *resource_version = seen.to_string();
    }
}

/// Why a watch stream stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// Server closed the stream normally
    Closed,
    Expired,
    Failed(String),
    Shutdown,
}

/// Feed a watch stream to the monitor until it ends or shutdown is signalled
///
/// Shutdown is only checked between events so an in-flight remediation
/// always completes.
pub async fn drain_events<S>(
    monitor: &RestartMonitor,
    mut stream: S,
    resource_version: &mut String,
    shutdown: &mut broadcast::Receiver<()>,
) -> StreamEnd
where
    S: Stream<Item = Result<WatchEvent<Pod>, kube::Error>> + Unpin,
{
    loop {
        let next = tokio::select! {
            next = stream.try_next() => next,
            _ = shutdown.recv() => return StreamEnd::Shutdown,
        };

        let event = match next {
            Ok(Some(event)) => event,
            Ok(None) => return StreamEnd::Closed,
            Err(e) => return StreamEnd::Failed(e.to_string()),
        };

        match apply_event(event, resource_version) {
            EventAction::Handle(pod) => {
                monitor.handle_pod_event(&pod).await;
            }
            EventAction::Skip => {}
            EventAction::Expired => return StreamEnd::Expired,
            EventAction::Failed(reason) => return StreamEnd::Failed(reason),
        }
    }
}

/// Supervises the pod watch for one scope
pub struct NamespaceWatcher {
    api: Api<Pod>,
    scope: WatchScope,
    monitor: Arc<RestartMonitor>,
    health: HealthRegistry,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
    backoff: ReconnectBackoff,
}

impl NamespaceWatcher {
    pub fn new(
        client: Client,
        scope: WatchScope,
        monitor: Arc<RestartMonitor>,
        health: HealthRegistry,
        metrics: MonitorMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            api: scope.api(client),
            scope,
            monitor,
            health,
            metrics,
            logger,
            backoff: ReconnectBackoff::default(),
        }
    }

    /// Watch until shutdown, reconnecting whenever the stream stops
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let component = components::watcher(self.scope.namespace().unwrap_or(""));
        let mut resource_version = ANY_VERSION.to_string();
        self.health.register(&component).await;
        info!(scope = %self.scope, "Starting pod watch");

        loop {
            let end = self
                .watch_once(&component, &mut resource_version, &mut shutdown)
                .await;

            let (delay, reason) = match end {
                StreamEnd::Shutdown => break,
                StreamEnd::Expired => (Duration::ZERO, "resource version expired".to_string()),
                StreamEnd::Closed => {
                    self.backoff.reset();
                    (self.backoff.next_delay(), "watch stream closed".to_string())
                }
                StreamEnd::Failed(reason) => {
                    self.health.set_degraded(&component, reason.clone()).await;
                    (self.backoff.next_delay(), reason)
                }
            };

            self.metrics.inc_watch_reconnects(self.scope.label());
            self.logger
                .log_watch_reconnect(self.scope.label(), delay, &reason);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.recv() => break,
            }
        }

        info!(scope = %self.scope, "Shutting down pod watch");
    }

    async fn watch_once(
        &self,
        component: &str,
        resource_version: &mut String,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> StreamEnd {
        let params = WatchParams::default();
        let stream = match self.api.watch(&params, resource_version.as_str()).await {
            Ok(stream) => stream.boxed(),
            Err(e) => return StreamEnd::Failed(format!("failed to start watch: {}", e)),
        };

        debug!(scope = %self.scope, resource_version = %resource_version, "Pod watch established");
        self.health.set_healthy(component).await;

        drain_events(&self.monitor, stream, resource_version, shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::test_pods::crash_looping_pod;
    use crate::notify::Notifier;
    use crate::remediation::{
        ClusterApi, ClusterError, MonitorConfig, RemediationMode, ReplicaSetPage,
    };
    use crate::store::RecordStore;
    use crate::tracker::WindowConfig;
    use async_trait::async_trait;
    use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
    use kube::core::ErrorResponse;
    use std::sync::Mutex;

    /// Notify mode never touches the cluster
    struct NoCluster;

    impl NoCluster {
        fn err(kind: &'static str, name: &str) -> ClusterError {
            ClusterError::NotFound {
                kind,
                namespace: String::new(),
                name: name.to_string(),
            }
        }
    }

    #[async_trait]
    impl ClusterApi for NoCluster {
        async fn get_replica_set(&self, _namespace: &str, name: &str) -> Result<ReplicaSet, ClusterError> {
            Err(Self::err("ReplicaSet", name))
        }
        async fn get_deployment(&self, _namespace: &str, name: &str) -> Result<Deployment, ClusterError> {
            Err(Self::err("Deployment", name))
        }
        async fn list_replica_sets(
            &self,
            _namespace: &str,
            _label_selector: &str,
            _continue_token: Option<&str>,
        ) -> Result<ReplicaSetPage, ClusterError> {
            Ok(ReplicaSetPage::default())
        }
        async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment, ClusterError> {
            Ok(deployment.clone())
        }
    }

    #[derive(Default)]
    struct CountingNotifier {
        sent: Mutex<usize>,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn send(&self, _message: &str) -> anyhow::Result<()> {
            *self.sent.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn monitor(notifier: Arc<CountingNotifier>) -> RestartMonitor {
        RestartMonitor::new(
            RecordStore::new(),
            MonitorConfig {
                window: WindowConfig {
                    time_window: Duration::from_secs(300),
                    threshold: 2,
                },
                mode: RemediationMode::Notify,
            },
            Arc::new(NoCluster),
            notifier,
            MonitorMetrics::new(),
            StructuredLogger::new("test"),
        )
    }

    fn versioned(mut pod: Pod, version: &str) -> Pod {
        pod.metadata.resource_version = Some(version.to_string());
        pod
    }

    fn error_response(code: u16) -> ErrorResponse {
        ErrorResponse {
            status: "Failure".to_string(),
            message: "too old resource version".to_string(),
            reason: "Expired".to_string(),
            code,
        }
    }

    #[test]
    fn test_scopes_from_namespaces() {
        assert_eq!(WatchScope::from_namespaces(&[]), vec![WatchScope::AllNamespaces]);
        assert_eq!(
            WatchScope::from_namespaces(&["a".to_string(), "b".to_string()]),
            vec![
                WatchScope::Namespace("a".to_string()),
                WatchScope::Namespace("b".to_string())
            ]
        );
        assert_eq!(WatchScope::AllNamespaces.label(), "*");
        assert_eq!(WatchScope::Namespace("a".to_string()).to_string(), "namespace a");
    }

    #[test]
    fn test_backoff_doubles_to_cap_and_resets() {
        let mut backoff = ReconnectBackoff::default();
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), INITIAL_RECONNECT_DELAY);
    }

    #[test]
    fn test_only_modified_events_are_handled() {
        let mut rv = ANY_VERSION.to_string();

        let added = apply_event(WatchEvent::Added(versioned(crash_looping_pod("u", 1), "10")), &mut rv);
        assert!(matches!(added, EventAction::Skip));
        assert_eq!(rv, "10");

        let modified =
            apply_event(WatchEvent::Modified(versioned(crash_looping_pod("u", 2), "11")), &mut rv);
        assert!(matches!(modified, EventAction::Handle(_)));
        assert_eq!(rv, "11");

        let deleted =
            apply_event(WatchEvent::Deleted(versioned(crash_looping_pod("u", 2), "12")), &mut rv);
        assert!(matches!(deleted, EventAction::Skip));
        assert_eq!(rv, "12");
    }

    #[test]
    fn test_gone_resets_resource_version() {
        let mut rv = "12345".to_string();
        let action = apply_event(WatchEvent::Error(error_response(410)), &mut rv);
        assert!(matches!(action, EventAction::Expired));
        assert_eq!(rv, ANY_VERSION);
    }

    #[test]
    fn test_other_errors_keep_resource_version() {
        let mut rv = "12345".to_string();
        let action = apply_event(WatchEvent::Error(error_response(500)), &mut rv);
        assert!(matches!(action, EventAction::Failed(ref msg) if msg.contains("500")));
        assert_eq!(rv, "12345");
    }

    #[tokio::test]
    async fn test_drain_feeds_monitor_until_close() {
        let notifier = Arc::new(CountingNotifier::default());
        let monitor = monitor(notifier.clone());
        let (_tx, mut shutdown) = broadcast::channel(1);

        let events: Vec<Result<WatchEvent<Pod>, kube::Error>> = vec![
            Ok(WatchEvent::Added(versioned(crash_looping_pod("u", 1), "1"))),
            Ok(WatchEvent::Modified(versioned(crash_looping_pod("u", 1), "2"))),
            Ok(WatchEvent::Modified(versioned(crash_looping_pod("u", 1), "3"))),
            Ok(WatchEvent::Modified(versioned(crash_looping_pod("u", 2), "4"))),
        ];
        let mut rv = ANY_VERSION.to_string();

        let end = drain_events(&monitor, futures_util::stream::iter(events), &mut rv, &mut shutdown).await;

        assert_eq!(end, StreamEnd::Closed);
        assert_eq!(rv, "4");
        assert_eq!(*notifier.sent.lock().unwrap(), 1);
        assert_eq!(monitor.store().get("u").await.unwrap().restart_count, 0);
    }

    #[tokio::test]
    async fn test_drain_stops_on_expired_resource_version() {
        let monitor = monitor(Arc::new(CountingNotifier::default()));
        let (_tx, mut shutdown) = broadcast::channel(1);

        let events: Vec<Result<WatchEvent<Pod>, kube::Error>> = vec![
            Ok(WatchEvent::Modified(versioned(crash_looping_pod("u", 1), "7"))),
            Ok(WatchEvent::Error(error_response(410))),
            Ok(WatchEvent::Modified(versioned(crash_looping_pod("u", 2), "8"))),
        ];
        let mut rv = ANY_VERSION.to_string();

        let end = drain_events(&monitor, futures_util::stream::iter(events), &mut rv, &mut shutdown).await;

        assert_eq!(end, StreamEnd::Expired);
        assert_eq!(rv, ANY_VERSION);
        assert_eq!(monitor.store().get("u").await.unwrap().restart_count, 1);
    }

    #[tokio::test]
    async fn test_drain_returns_on_shutdown() {
        let monitor = monitor(Arc::new(CountingNotifier::default()));
        let (tx, mut shutdown) = broadcast::channel(1);
        tx.send(()).unwrap();

        let mut rv = ANY_VERSION.to_string();
        let end = drain_events(
            &monitor,
            futures_util::stream::pending::<Result<WatchEvent<Pod>, kube::Error>>(),
            &mut rv,
            &mut shutdown,
        )
        .await;

        assert_eq!(end, StreamEnd::Shutdown);
    }
}
