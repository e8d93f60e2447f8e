//! In-memory stand-ins for the registry and the cluster API.

use crate::cache::MirrorCache;
use crate::config::{Config, TrustPolicy};
use crate::image_reference::ImageReference;
use crate::oci_registry::{PulledImage, Registry};
use crate::state::ControllerContext;
use crate::store::{StoreError, WorkloadStore};
use crate::workload::{WorkloadKind, WorkloadObject};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec, Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn policy() -> TrustPolicy {
    TrustPolicy::from_config(&Config::default()).unwrap()
}

pub fn controller(registry: Arc<FakeRegistry>, store: Arc<FakeStore>) -> ControllerContext {
    let config = Config {
        commit: crate::config::Commit {
            max_attempts: 3,
            backoff_millis: 1,
        },
        ..Config::default()
    };
    ControllerContext {
        policy: Arc::new(TrustPolicy::from_config(&config).unwrap()),
        config: Arc::new(config),
        registry,
        store,
        cache: Arc::new(MirrorCache::new()),
    }
}

fn metadata(name: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        resource_version: Some("1".to_string()),
        ..Default::default()
    }
}

fn pod_template(containers: &[(&str, &str)]) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: None,
        spec: Some(PodSpec {
            containers: containers
                .iter()
                .map(|(name, image)| Container {
                    name: name.to_string(),
                    image: Some(image.to_string()),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }),
    }
}

pub fn deployment(name: &str, namespace: &str, containers: &[(&str, &str)]) -> Deployment {
    Deployment {
        metadata: metadata(name, namespace),
        spec: Some(DeploymentSpec {
            template: pod_template(containers),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn daemon_set(name: &str, namespace: &str, containers: &[(&str, &str)]) -> DaemonSet {
    DaemonSet {
        metadata: metadata(name, namespace),
        spec: Some(DaemonSetSpec {
            template: pod_template(containers),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn images_of(object: &WorkloadObject) -> Vec<String> {
    object
        .containers()
        .iter()
        .filter_map(|c| c.image.clone())
        .collect()
}

fn normalize(image: &str) -> String {
    ImageReference::parse(image).unwrap().to_string()
}

#[derive(Default)]
pub struct FakeRegistry {
    digests: HashMap<String, String>,
    failing_pulls: HashSet<String>,
    failing_push: bool,
    pulls: Mutex<Vec<String>>,
    pushes: Mutex<Vec<String>>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_digest(mut self, image: &str, digest_hex: &str) -> Self {
        self.digests.insert(normalize(image), digest_hex.to_string());
        self
    }

    pub fn failing_pull(mut self, image: &str) -> Self {
        self.failing_pulls.insert(normalize(image));
        self
    }

    pub fn failing_push(mut self) -> Self {
        self.failing_push = true;
        self
    }

    pub fn pulls(&self) -> Vec<String> {
        self.pulls.lock().unwrap().clone()
    }

    pub fn pushes(&self) -> Vec<String> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Registry for FakeRegistry {
    async fn pull(&self, reference: &ImageReference) -> Result<PulledImage> {
        let key = reference.to_string();
        self.pulls.lock().unwrap().push(key.clone());
        if self.failing_pulls.contains(&key) {
            return Err(anyhow!("unauthorized: {}", key));
        }
        let digest = self
            .digests
            .get(&key)
            .ok_or_else(|| anyhow!("manifest unknown: {}", key))?;
        Ok(PulledImage {
            source: reference.clone(),
            manifest_digest: Some(format!("sha256:{}", digest)),
            manifest: None,
            layers: vec![],
            config: None,
        })
    }

    async fn push(&self, _image: &PulledImage, target: &ImageReference) -> Result<()> {
        if self.failing_push {
            return Err(anyhow!("denied: requested access to the resource is denied"));
        }
        self.pushes.lock().unwrap().push(target.to_string());
        Ok(())
    }
}

type ObjectKey = (WorkloadKind, String, String);

fn key_of(object: &WorkloadObject) -> ObjectKey {
    (object.kind(), object.namespace(), object.name())
}

/// Simulates a concurrent writer for each configured conflict: the stored object
/// gains a `concurrent-writer` label and the write is rejected.
#[derive(Default)]
pub struct FakeStore {
    objects: Mutex<HashMap<ObjectKey, WorkloadObject>>,
    failing_write: bool,
    remaining_conflicts: AtomicUsize,
    conflicts_served: AtomicUsize,
    fetches: AtomicUsize,
    writes: Mutex<Vec<WorkloadObject>>,
}

impl FakeStore {
    pub fn with_objects(objects: Vec<WorkloadObject>) -> Self {
        let store = Self::default();
        {
            let mut stored = store.objects.lock().unwrap();
            for object in objects {
                stored.insert(key_of(&object), object);
            }
        }
        store
    }

    pub fn conflicts(self, count: usize) -> Self {
        self.remaining_conflicts.store(count, Ordering::SeqCst);
        self
    }

    /// Rejects every write with a non-conflict error.
    pub fn failing_write(mut self) -> Self {
        self.failing_write = true;
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<WorkloadObject> {
        self.writes.lock().unwrap().clone()
    }
}

fn label(object: &mut WorkloadObject, key: &str, value: String) {
    let metadata = match object {
        WorkloadObject::Deployment(d) => &mut d.metadata,
        WorkloadObject::DaemonSet(d) => &mut d.metadata,
    };
    metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value);
}

#[async_trait]
impl WorkloadStore for FakeStore {
    async fn fetch(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<WorkloadObject, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .unwrap()
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| {
                StoreError::Other(anyhow!("{} {}/{} not found", kind, namespace, name))
            })
    }

    async fn replace(&self, object: &WorkloadObject) -> Result<(), StoreError> {
        if self.failing_write {
            return Err(StoreError::Other(anyhow!(
                "admission webhook \"policy.example.com\" denied the request"
            )));
        }
        let mut objects = self.objects.lock().unwrap();
        let pending = self.remaining_conflicts.load(Ordering::SeqCst);
        if pending > 0 {
            self.remaining_conflicts.store(pending - 1, Ordering::SeqCst);
            let served = self.conflicts_served.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(stored) = objects.get_mut(&key_of(object)) {
                label(stored, "concurrent-writer", served.to_string());
            }
            return Err(StoreError::Conflict(
                "the object has been modified; please apply your changes to the latest version"
                    .to_string(),
            ));
        }
        objects.insert(key_of(object), object.clone());
        self.writes.lock().unwrap().push(object.clone());
        Ok(())
    }
}
