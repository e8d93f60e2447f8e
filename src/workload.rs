use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Container, PodSpec};
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::fmt::Debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    Deployment,
    DaemonSet,
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadKind::Deployment => write!(f, "Deployment"),
            WorkloadKind::DaemonSet => write!(f, "DaemonSet"),
        }
    }
}

/// A pod-template based controller whose containers can be rewritten.
pub trait Workload
where
    Self: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Send
        + Sync
        + Serialize
        + DeserializeOwned
        + 'static,
{
    const KIND: WorkloadKind;

    fn pod_spec(&self) -> Option<&PodSpec>;
    fn pod_spec_mut(&mut self) -> Option<&mut PodSpec>;
    fn into_object(self) -> WorkloadObject;
}

impl Workload for Deployment {
    const KIND: WorkloadKind = WorkloadKind::Deployment;

    fn pod_spec(&self) -> Option<&PodSpec> {
        self.spec.as_ref().and_then(|s| s.template.spec.as_ref())
    }

    fn pod_spec_mut(&mut self) -> Option<&mut PodSpec> {
        self.spec.as_mut().and_then(|s| s.template.spec.as_mut())
    }

    fn into_object(self) -> WorkloadObject {
        WorkloadObject::Deployment(self)
    }
}

impl Workload for DaemonSet {
    const KIND: WorkloadKind = WorkloadKind::DaemonSet;

    fn pod_spec(&self) -> Option<&PodSpec> {
        self.spec.as_ref().and_then(|s| s.template.spec.as_ref())
    }

    fn pod_spec_mut(&mut self) -> Option<&mut PodSpec> {
        self.spec.as_mut().and_then(|s| s.template.spec.as_mut())
    }

    fn into_object(self) -> WorkloadObject {
        WorkloadObject::DaemonSet(self)
    }
}

/// One of the watched workload kinds, resolved once when a watch event arrives.
#[derive(Debug, Clone)]
pub enum WorkloadObject {
    Deployment(Deployment),
    DaemonSet(DaemonSet),
}

impl WorkloadObject {
    pub fn kind(&self) -> WorkloadKind {
        match self {
            WorkloadObject::Deployment(_) => WorkloadKind::Deployment,
            WorkloadObject::DaemonSet(_) => WorkloadKind::DaemonSet,
        }
    }

    pub fn name(&self) -> String {
        match self {
            WorkloadObject::Deployment(d) => d.name_any(),
            WorkloadObject::DaemonSet(d) => d.name_any(),
        }
    }

    pub fn namespace(&self) -> String {
        let namespace = match self {
            WorkloadObject::Deployment(d) => d.namespace(),
            WorkloadObject::DaemonSet(d) => d.namespace(),
        };
        namespace.unwrap_or_default()
    }

    pub fn containers(&self) -> &[Container] {
        let pod_spec = match self {
            WorkloadObject::Deployment(d) => d.pod_spec(),
            WorkloadObject::DaemonSet(d) => d.pod_spec(),
        };
        pod_spec.map(|s| s.containers.as_slice()).unwrap_or_default()
    }

    /// Replaces the pod template's containers. Returns false when the object has no pod template.
    pub fn set_containers(&mut self, containers: Vec<Container>) -> bool {
        let pod_spec = match self {
            WorkloadObject::Deployment(d) => d.pod_spec_mut(),
            WorkloadObject::DaemonSet(d) => d.pod_spec_mut(),
        };
        match pod_spec {
            Some(spec) => {
                spec.containers = containers;
                true
            }
            None => false,
        }
    }

    pub fn resource_version(&self) -> Option<String> {
        match self {
            WorkloadObject::Deployment(d) => d.resource_version(),
            WorkloadObject::DaemonSet(d) => d.resource_version(),
        }
    }
}

impl From<Deployment> for WorkloadObject {
    fn from(deployment: Deployment) -> Self {
        deployment.into_object()
    }
}

impl From<DaemonSet> for WorkloadObject {
    fn from(daemon_set: DaemonSet) -> Self {
        daemon_set.into_object()
    }
}
