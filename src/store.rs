use crate::workload::{Workload, WorkloadKind, WorkloadObject};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use kube::api::PostParams;
use kube::{Api, Client};
use std::fmt;
use tracing::debug;

const HTTP_CONFLICT: u16 = 409;

#[derive(Debug)]
pub enum StoreError {
    /// The object changed since it was read; a fresh read may succeed.
    Conflict(String),
    Other(anyhow::Error),
}

impl std::error::Error for StoreError {}
impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Conflict(message) => write!(f, "conflicting update: {}", message),
            StoreError::Other(error) => write!(f, "{:#}", error),
        }
    }
}

impl From<kube::Error> for StoreError {
    fn from(error: kube::Error) -> Self {
        match error {
            kube::Error::Api(response) if response.code == HTTP_CONFLICT => {
                StoreError::Conflict(response.message.clone())
            }
            other => StoreError::Other(other.into()),
        }
    }
}

/// Read and write access to live workload objects.
#[async_trait]
pub trait WorkloadStore: Send + Sync {
    async fn fetch(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<WorkloadObject, StoreError>;

    /// Writes the object back, failing with `StoreError::Conflict` when its
    /// resource version is no longer current.
    async fn replace(&self, object: &WorkloadObject) -> Result<(), StoreError>;
}

pub struct KubeWorkloadStore {
    client: Client,
}

impl KubeWorkloadStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn fetch_typed<K: Workload>(&self, namespace: &str, name: &str) -> Result<K, StoreError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        debug!("Fetching {} {}/{}", K::KIND, namespace, name);
        Ok(api.get(name).await?)
    }

    async fn replace_typed<K: Workload>(&self, workload: &K) -> Result<(), StoreError> {
        let namespace = workload.meta().namespace.as_deref().unwrap_or_default();
        let name = workload.meta().name.as_deref().unwrap_or_default();
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        debug!("Replacing {} {}/{}", K::KIND, namespace, name);
        api.replace(name, &PostParams::default(), workload).await?;
        Ok(())
    }
}

#[async_trait]
impl WorkloadStore for KubeWorkloadStore {
    async fn fetch(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<WorkloadObject, StoreError> {
        let object = match kind {
            WorkloadKind::Deployment => self
                .fetch_typed::<Deployment>(namespace, name)
                .await?
                .into_object(),
            WorkloadKind::DaemonSet => self
                .fetch_typed::<DaemonSet>(namespace, name)
                .await?
                .into_object(),
        };
        Ok(object)
    }

    async fn replace(&self, object: &WorkloadObject) -> Result<(), StoreError> {
        match object {
            WorkloadObject::Deployment(deployment) => self.replace_typed(deployment).await,
            WorkloadObject::DaemonSet(daemon_set) => self.replace_typed(daemon_set).await,
        }
    }
}
