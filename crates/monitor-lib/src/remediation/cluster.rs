//! Cluster API access needed for rollbacks

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use kube::api::{Api, ListParams, PostParams};
use kube::Client;
use thiserror::Error;

/// Page size used when listing ReplicaSets
pub const LIST_PAGE_SIZE: u32 = 100;

/// Errors returned by cluster API calls
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} was modified concurrently")]
    Conflict {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error(transparent)]
    Kube(#[from] kube::Error),
}

/// One page of a ReplicaSet list
#[derive(Debug, Clone, Default)]
pub struct ReplicaSetPage {
    pub items: Vec<ReplicaSet>,
    /// Continuation token for the next page, if any
    pub continue_token: Option<String>,
}

/// Namespaced Deployment/ReplicaSet operations
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_replica_set(&self, namespace: &str, name: &str) -> Result<ReplicaSet, ClusterError>;

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, ClusterError>;

    /// List one page of ReplicaSets matching a label selector
    async fn list_replica_sets(
        &self,
        namespace: &str,
        label_selector: &str,
        continue_token: Option<&str>,
    ) -> Result<ReplicaSetPage, ClusterError>;

    /// Replace a Deployment; fails with a conflict if it changed since it was read
    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment, ClusterError>;
}

/// `ClusterApi` backed by a kube client
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn map_error(err: kube::Error, kind: &'static str, namespace: &str, name: &str) -> ClusterError {
        match err {
            kube::Error::Api(ref response) if response.code == 404 => ClusterError::NotFound {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            kube::Error::Api(ref response) if response.code == 409 => ClusterError::Conflict {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            other => ClusterError::Kube(other),
        }
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_replica_set(&self, namespace: &str, name: &str) -> Result<ReplicaSet, ClusterError> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| Self::map_error(e, "ReplicaSet", namespace, name))
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, ClusterError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| Self::map_error(e, "Deployment", namespace, name))
    }

    async fn list_replica_sets(
        &self,
        namespace: &str,
        label_selector: &str,
        continue_token: Option<&str>,
    ) -> Result<ReplicaSetPage, ClusterError> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        let mut params = ListParams::default()
            .labels(label_selector)
            .limit(LIST_PAGE_SIZE);
        if let Some(token) = continue_token {
            params = params.continue_token(token);
        }

        let list = api.list(&params).await?;
        let continue_token = list.metadata.continue_.filter(|token| !token.is_empty());

        Ok(ReplicaSetPage {
            items: list.items,
            continue_token,
        })
    }

    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment, ClusterError> {
        let namespace = deployment.metadata.namespace.as_deref().unwrap_or_default();
        let name = deployment.metadata.name.as_deref().unwrap_or_default();
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);

        api.replace(name, &PostParams::default(), deployment)
            .await
            .map_err(|e| Self::map_error(e, "Deployment", namespace, name))
    }
}
