use crate::image_reference::ImageReference;
use crate::workload::{WorkloadKind, WorkloadObject};
use k8s_openapi::api::core::v1::Container;
use kube::runtime::watcher;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Other,
}

impl ChangeKind {
    pub fn drives_mirroring(self) -> bool {
        matches!(self, ChangeKind::Added | ChangeKind::Modified)
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeKind::Added => "Added",
            ChangeKind::Modified => "Modified",
            ChangeKind::Deleted => "Deleted",
            ChangeKind::Other => "Other",
        };
        f.write_str(name)
    }
}

/// Splits a watcher notification into its change kind and, when present, the object.
pub fn split_watch_event<K>(event: watcher::Event<K>) -> (ChangeKind, Option<K>) {
    match event {
        watcher::Event::InitApply(object) => (ChangeKind::Added, Some(object)),
        watcher::Event::Apply(object) => (ChangeKind::Modified, Some(object)),
        watcher::Event::Delete(object) => (ChangeKind::Deleted, Some(object)),
        watcher::Event::Init | watcher::Event::InitDone => (ChangeKind::Other, None),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A container image that has to be mirrored, pointing back at its container slot.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub slot: usize,
    pub original: String,
    pub reference: ImageReference,
}

/// Everything one watch notification carries through the pipeline.
#[derive(Debug)]
pub struct EventContext {
    pub id: CorrelationId,
    pub change: ChangeKind,
    pub object: WorkloadObject,
    /// Containers as found on the watched object; mirrored images are written into these slots.
    pub containers: Vec<Container>,
    pub candidates: Vec<Candidate>,
    /// Original image reference to the reference that replaced it.
    pub resolved: BTreeMap<String, String>,
}

impl EventContext {
    pub fn new(change: ChangeKind, object: WorkloadObject) -> Self {
        Self {
            id: CorrelationId::generate(),
            change,
            object,
            containers: Vec::new(),
            candidates: Vec::new(),
            resolved: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> WorkloadKind {
        self.object.kind()
    }

    pub fn name(&self) -> String {
        self.object.name()
    }

    pub fn namespace(&self) -> String {
        self.object.namespace()
    }
}
