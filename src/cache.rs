use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Remembers which original image references have already been mirrored, and where to.
///
/// Entries live for the lifetime of the process. `lookup` followed by `store` is not
/// atomic: two events racing on the same image may both mirror it, and since the
/// target tag is content addressed both pushes produce the same result.
#[derive(Debug, Default)]
pub struct MirrorCache {
    images: Mutex<HashMap<String, String>>,
}

impl MirrorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, original: &str) -> Option<String> {
        self.images().get(original).cloned()
    }

    pub fn store(&self, original: impl Into<String>, mirrored: impl Into<String>) {
        self.images().insert(original.into(), mirrored.into());
    }

    pub fn len(&self) -> usize {
        self.images().len()
    }

    fn images(&self) -> MutexGuard<'_, HashMap<String, String>> {
        // the map stays consistent even if a holder panicked mid-insert
        self.images.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
