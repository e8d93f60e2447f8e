use crate::cache::MirrorCache;
use crate::config::{Config, TrustPolicy};
use crate::oci_registry::Registry;
use crate::store::WorkloadStore;
use std::sync::Arc;

/// Shared by the dispatcher and every pipeline task.
#[derive(Clone)]
pub struct ControllerContext {
    pub(crate) config: Arc<Config>,
    pub(crate) policy: Arc<TrustPolicy>,
    pub(crate) registry: Arc<dyn Registry>,
    pub(crate) store: Arc<dyn WorkloadStore>,
    pub(crate) cache: Arc<MirrorCache>,
}
