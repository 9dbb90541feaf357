//! Deployment rollback for crash-looping pods
//!
//! Walks the pod's owner chain up to its Deployment, gathers the
//! Deployment's ReplicaSet revision history and restores the pod template of
//! the newest healthy revision older than the current one.

use super::cluster::{ClusterApi, ClusterError};
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

/// Annotation carrying the rollout revision on Deployments and ReplicaSets
pub const REVISION_ANNOTATION: &str = "deployment.kubernetes.io/revision";

/// Label the Deployment controller adds to each ReplicaSet's template
pub const POD_TEMPLATE_HASH_LABEL: &str = "pod-template-hash";

const APPS_V1: &str = "apps/v1";

/// Why a rollback could not be performed
#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("no controller found for the pod")]
    NoController,

    #[error("no deployment controller found for replicaset {0}")]
    NoDeployment(String),

    #[error("not enough revision history (need at least 2, got {0})")]
    InsufficientHistory(usize),

    #[error("invalid current revision on deployment {0}")]
    InvalidRevision(String),

    #[error("no healthy previous version available")]
    NoHealthyRevision,

    #[error("replicaset {0} has no pod template")]
    MissingTemplate(String),

    #[error("failed to {action}: {source}")]
    Cluster {
        action: &'static str,
        #[source]
        source: ClusterError,
    },
}

impl RollbackError {
    fn cluster(action: &'static str) -> impl FnOnce(ClusterError) -> Self {
        move |source| RollbackError::Cluster { action, source }
    }
}

/// A completed rollback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackResult {
    pub deployment: String,
    pub namespace: String,
    pub from_revision: i64,
    pub to_revision: i64,
    pub target_replica_set: String,
}

/// Rollback planner over a cluster API
pub struct RollbackPlanner<'a> {
    cluster: &'a dyn ClusterApi,
}

impl<'a> RollbackPlanner<'a> {
    pub fn new(cluster: &'a dyn ClusterApi) -> Self {
        Self { cluster }
    }

    /// Roll the pod's Deployment back to its previous healthy revision
    pub async fn rollback(&self, pod: &Pod) -> Result<RollbackResult, RollbackError> {
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        info!(
            pod_name = pod.metadata.name.as_deref().unwrap_or_default(),
            namespace = %namespace,
            "Pod restarted more than threshold, preparing rollback"
        );

        let deployment_name = self.find_deployment_for_pod(pod, &namespace).await?;
        let deployment = self
            .cluster
            .get_deployment(&namespace, &deployment_name)
            .await
            .map_err(RollbackError::cluster("get deployment"))?;

        let mut candidates = self.owned_replica_sets(&deployment).await?;
        if candidates.len() < 2 {
            return Err(RollbackError::InsufficientHistory(candidates.len()));
        }
        sort_by_revision(&mut candidates);

        let current = current_revision(&deployment)
            .ok_or_else(|| RollbackError::InvalidRevision(deployment_name.clone()))?;
        let target = select_target(current, &candidates).ok_or(RollbackError::NoHealthyRevision)?;
        let target_name = target.metadata.name.clone().unwrap_or_default();
        let to_revision = revision(target);

        debug!(
            deployment = %deployment_name,
            current_revision = current,
            target_revision = to_revision,
            target_replica_set = %target_name,
            "Selected rollback target"
        );

        self.apply(&namespace, &deployment_name, target).await?;

        Ok(RollbackResult {
            deployment: deployment_name,
            namespace,
            from_revision: current,
            to_revision,
            target_replica_set: target_name,
        })
    }

    /// Pod -> ReplicaSet -> Deployment
    async fn find_deployment_for_pod(
        &self,
        pod: &Pod,
        namespace: &str,
    ) -> Result<String, RollbackError> {
        let rs_ref = owner_refs(pod.metadata.owner_references.as_deref())
            .find(|r| r.kind == "ReplicaSet")
            .ok_or(RollbackError::NoController)?;

        let replica_set = self
            .cluster
            .get_replica_set(namespace, &rs_ref.name)
            .await
            .map_err(RollbackError::cluster("get replicaset"))?;

        let deployment = owner_refs(replica_set.metadata.owner_references.as_deref())
            .find(|r| r.kind == "Deployment" && r.api_version == APPS_V1)
            .map(|r| r.name.clone())
            .ok_or_else(|| RollbackError::NoDeployment(rs_ref.name.clone()));
        deployment
    }

    /// All ReplicaSets selected by and owned by the Deployment, across pages
    async fn owned_replica_sets(
        &self,
        deployment: &Deployment,
    ) -> Result<Vec<ReplicaSet>, RollbackError> {
        let namespace = deployment.metadata.namespace.as_deref().unwrap_or_default();
        let name = deployment.metadata.name.as_deref().unwrap_or_default();
        let selector = deployment
            .spec
            .as_ref()
            .map(|spec| selector_string(&spec.selector))
            .unwrap_or_default();

        let mut result = Vec::new();
        let mut continue_token: Option<String> = None;
        loop {
            let page = self
                .cluster
                .list_replica_sets(namespace, &selector, continue_token.as_deref())
                .await
                .map_err(RollbackError::cluster("list replicasets"))?;

            // The selector may also match objects owned by other controllers.
            result.extend(
                page.items
                    .into_iter()
                    .filter(|rs| is_owned_by_deployment(rs, name)),
            );

            match page.continue_token {
                Some(token) => continue_token = Some(token),
                None => break,
            }
        }

        Ok(result)
    }

    /// Copy the target's template onto the live Deployment and replace it
    async fn apply(
        &self,
        namespace: &str,
        deployment_name: &str,
        target: &ReplicaSet,
    ) -> Result<(), RollbackError> {
        let target_name = target.metadata.name.clone().unwrap_or_default();
        let mut template = target
            .spec
            .as_ref()
            .and_then(|spec| spec.template.clone())
            .ok_or_else(|| RollbackError::MissingTemplate(target_name.clone()))?;

        if let Some(labels) = template
            .metadata
            .as_mut()
            .and_then(|meta| meta.labels.as_mut())
        {
            labels.remove(POD_TEMPLATE_HASH_LABEL);
        }

        let mut live = self
            .cluster
            .get_deployment(namespace, deployment_name)
            .await
            .map_err(RollbackError::cluster("get deployment"))?;

        let spec = live.spec.get_or_insert_with(Default::default);
        spec.template = template;

        self.cluster
            .replace_deployment(&live)
            .await
            .map_err(RollbackError::cluster("update deployment"))?;

        info!(
            deployment = %deployment_name,
            namespace = %namespace,
            target_replica_set = %target_name,
            "Deployment rolled back"
        );
        Ok(())
    }
}

fn owner_refs(refs: Option<&[OwnerReference]>) -> impl Iterator<Item = &OwnerReference> {
    refs.unwrap_or_default().iter()
}

fn is_owned_by_deployment(rs: &ReplicaSet, deployment_name: &str) -> bool {
    owner_refs(rs.metadata.owner_references.as_deref()).any(|r| {
        r.api_version == APPS_V1 && r.kind == "Deployment" && r.name == deployment_name
    })
}

fn parse_revision(annotations: Option<&BTreeMap<String, String>>) -> Option<i64> {
    annotations
        .and_then(|a| a.get(REVISION_ANNOTATION))
        .and_then(|value| value.trim().parse::<i64>().ok())
        .filter(|rev| *rev >= 0)
}

/// Revision of a ReplicaSet; missing or unparsable sorts lowest as -1
pub fn revision(rs: &ReplicaSet) -> i64 {
    parse_revision(rs.metadata.annotations.as_ref()).unwrap_or(-1)
}

/// Current revision of a Deployment, if it carries a valid one
pub fn current_revision(deployment: &Deployment) -> Option<i64> {
    parse_revision(deployment.metadata.annotations.as_ref())
}

/// Sort ReplicaSets newest revision first
pub fn sort_by_revision(replica_sets: &mut [ReplicaSet]) {
    replica_sets.sort_by_key(|rs| Reverse(revision(rs)));
}

/// At least one ready replica and every replica ready
pub fn is_healthy(rs: &ReplicaSet) -> bool {
    let Some(status) = rs.status.as_ref() else {
        return false;
    };
    let ready = status.ready_replicas.unwrap_or(0);
    ready > 0 && ready == status.replicas
}

/// First healthy ReplicaSet older than `current`, from a list sorted newest first
pub fn select_target(current: i64, sorted: &[ReplicaSet]) -> Option<&ReplicaSet> {
    sorted
        .iter()
        .find(|rs| revision(rs) < current && is_healthy(rs))
}

/// Render a label selector in list-query syntax
pub fn selector_string(selector: &LabelSelector) -> String {
    let mut parts: Vec<String> = selector
        .match_labels
        .iter()
        .flatten()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect();

    for expr in selector.match_expressions.iter().flatten() {
        let values = expr.values.as_deref().unwrap_or_default().join(",");
        match expr.operator.as_str() {
            "In" => parts.push(format!("{} in ({})", expr.key, values)),
            "NotIn" => parts.push(format!("{} notin ({})", expr.key, values)),
            "Exists" => parts.push(expr.key.clone()),
            "DoesNotExist" => parts.push(format!("!{}", expr.key)),
            other => debug!(operator = %other, key = %expr.key, "Skipping unknown selector operator"),
        }
    }

    parts.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::ReplicaSetStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelectorRequirement, ObjectMeta};

    fn rs(name: &str, revision: Option<&str>, replicas: i32, ready: Option<i32>) -> ReplicaSet {
        ReplicaSet {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                annotations: revision.map(|r| {
                    BTreeMap::from([(REVISION_ANNOTATION.to_string(), r.to_string())])
                }),
                ..Default::default()
            },
            status: Some(ReplicaSetStatus {
                replicas,
                ready_replicas: ready,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn names(list: &[ReplicaSet]) -> Vec<&str> {
        list.iter()
            .map(|rs| rs.metadata.name.as_deref().unwrap())
            .collect()
    }

    #[test]
    fn test_revision_parsing() {
        assert_eq!(revision(&rs("a", Some("7"), 1, Some(1))), 7);
        assert_eq!(revision(&rs("a", None, 1, Some(1))), -1);
        assert_eq!(revision(&rs("a", Some("seven"), 1, Some(1))), -1);
        assert_eq!(revision(&rs("a", Some("-3"), 1, Some(1))), -1);
    }

    #[test]
    fn test_sort_newest_first_with_invalid_last() {
        let mut list = vec![
            rs("r3", Some("3"), 1, Some(1)),
            rs("bad", Some("x"), 1, Some(1)),
            rs("r10", Some("10"), 1, Some(1)),
            rs("r4", Some("4"), 1, Some(1)),
        ];
        sort_by_revision(&mut list);
        assert_eq!(names(&list), vec!["r10", "r4", "r3", "bad"]);
    }

    #[test]
    fn test_is_healthy() {
        assert!(is_healthy(&rs("a", None, 2, Some(2))));
        assert!(!is_healthy(&rs("a", None, 2, Some(1))));
        assert!(!is_healthy(&rs("a", None, 0, Some(0))));
        assert!(!is_healthy(&rs("a", None, 0, None)));
        assert!(!is_healthy(&ReplicaSet::default()));
    }

    #[test]
    fn test_select_skips_unhealthy_and_newer() {
        let mut list = vec![
            rs("r6", Some("6"), 2, Some(2)),
            rs("r5", Some("5"), 2, Some(0)),
            rs("r4", Some("4"), 2, Some(1)),
            rs("r3", Some("3"), 2, Some(2)),
            rs("r2", Some("2"), 2, Some(2)),
        ];
        sort_by_revision(&mut list);

        let target = select_target(5, &list).unwrap();
        assert_eq!(target.metadata.name.as_deref(), Some("r3"));
    }

    #[test]
    fn test_select_never_returns_current_or_newer() {
        let mut list = vec![
            rs("r5", Some("5"), 2, Some(2)),
            rs("r4", Some("4"), 2, Some(0)),
        ];
        sort_by_revision(&mut list);
        assert!(select_target(5, &list).is_none());
    }

    #[test]
    fn test_selector_string() {
        let selector = LabelSelector {
            match_labels: Some(BTreeMap::from([
                ("app".to_string(), "web".to_string()),
                ("tier".to_string(), "frontend".to_string()),
            ])),
            match_expressions: Some(vec![
                LabelSelectorRequirement {
                    key: "env".to_string(),
                    operator: "In".to_string(),
                    values: Some(vec!["prod".to_string(), "staging".to_string()]),
                },
                LabelSelectorRequirement {
                    key: "canary".to_string(),
                    operator: "DoesNotExist".to_string(),
                    values: None,
                },
            ]),
        };

        assert_eq!(
            selector_string(&selector),
            "app=web,tier=frontend,env in (prod,staging),!canary"
        );
        assert_eq!(selector_string(&LabelSelector::default()), "");
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            RollbackError::InsufficientHistory(1).to_string(),
            "not enough revision history (need at least 2, got 1)"
        );
        assert_eq!(
            RollbackError::NoHealthyRevision.to_string(),
            "no healthy previous version available"
        );
    }
}
