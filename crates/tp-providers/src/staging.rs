//! The staging filesystem — an in-memory namespace scoped to a single
//! `TestId` (spec §4.8 "Staging filesystem", §9 "Storage providers").
//!
//! Concurrent tests must never observe or clobber one another's files
//! (spec §5 "Shared resources"), and the namespace for a `TestId` must be
//! unconditionally released on TestExecutor termination (spec §8 property
//! 9). Both are enforced structurally: `StagingArea` is an RAII guard
//! whose `Drop` removes its entry from the shared registry, so there is no
//! code path that leaks a staging tree.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tp_core::types::TestId;

#[derive(Debug, Default)]
struct Namespace {
    files: HashMap<PathBuf, Vec<u8>>,
}

/// Registry of all live staging namespaces, shared by every
/// `BlockStorageWorker` in the process.
#[derive(Debug, Clone, Default)]
pub struct StagingRegistry {
    namespaces: Arc<Mutex<HashMap<TestId, Namespace>>>,
}

impl StagingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire (creating if absent) the staging area for `test_id`. The
    /// returned guard releases the namespace when dropped.
    pub fn acquire(&self, test_id: TestId) -> StagingArea {
        self.namespaces
            .lock()
            .expect("staging registry mutex poisoned")
            .entry(test_id)
            .or_default();
        StagingArea {
            test_id,
            registry: self.namespaces.clone(),
        }
    }

    /// True if the namespace for `test_id` is absent or has no files —
    /// the postcondition spec §8 property 9 checks after any terminal
    /// outcome.
    pub fn is_empty_or_released(&self, test_id: TestId) -> bool {
        self.namespaces
            .lock()
            .expect("staging registry mutex poisoned")
            .get(&test_id)
            .map(|ns| ns.files.is_empty())
            .unwrap_or(true)
    }
}

/// RAII handle to one test's staging namespace. Dropping it deletes the
/// namespace unconditionally, on both the success and the failure path
/// (spec §4.4 "Cleanup guarantee").
pub struct StagingArea {
    test_id: TestId,
    registry: Arc<Mutex<HashMap<TestId, Namespace>>>,
}

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("staging namespace for test {0} no longer exists")]
    Released(TestId),
}

impl StagingArea {
    pub fn write(&self, path: impl AsRef<Path>, contents: Vec<u8>) -> Result<(), StagingError> {
        let mut guard = self.registry.lock().expect("staging registry mutex poisoned");
        let ns = guard
            .get_mut(&self.test_id)
            .ok_or(StagingError::Released(self.test_id))?;
        ns.files.insert(path.as_ref().to_path_buf(), contents);
        Ok(())
    }

    pub fn read(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        let guard = self.registry.lock().expect("staging registry mutex poisoned");
        guard.get(&self.test_id)?.files.get(path.as_ref()).cloned()
    }

    pub fn list_prefix(&self, prefix: impl AsRef<Path>) -> Vec<PathBuf> {
        let guard = self.registry.lock().expect("staging registry mutex poisoned");
        let Some(ns) = guard.get(&self.test_id) else {
            return Vec::new();
        };
        ns.files
            .keys()
            .filter(|p| p.starts_with(prefix.as_ref()))
            .cloned()
            .collect()
    }

    pub fn file_count(&self) -> usize {
        let guard = self.registry.lock().expect("staging registry mutex poisoned");
        guard.get(&self.test_id).map(|ns| ns.files.len()).unwrap_or(0)
    }

    /// Explicit release, usable when the caller wants the cleanup to
    /// happen before the guard would naturally drop.
    pub fn release(self) {
        drop(self)
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        self.registry
            .lock()
            .expect("staging registry mutex poisoned")
            .remove(&self.test_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_area_is_released_on_drop() {
        let registry = StagingRegistry::new();
        let test_id = uuid::Uuid::new_v4();
        {
            let area = registry.acquire(test_id);
            area.write("features/a.feature", b"Feature: x".to_vec())
                .unwrap();
            assert_eq!(area.file_count(), 1);
        }
        assert!(registry.is_empty_or_released(test_id));
    }

    #[test]
    fn two_tests_cannot_see_each_others_files() {
        let registry = StagingRegistry::new();
        let a = uuid::Uuid::new_v4();
        let b = uuid::Uuid::new_v4();

        let area_a = registry.acquire(a);
        area_a.write("shared.txt", b"a's content".to_vec()).unwrap();

        let area_b = registry.acquire(b);
        assert!(area_b.read("shared.txt").is_none());
    }

    #[test]
    fn released_namespace_rejects_further_writes() {
        let registry = StagingRegistry::new();
        let test_id = uuid::Uuid::new_v4();
        let area = registry.acquire(test_id);
        drop(registry.clone()); // registry handle drop doesn't release; area drop does
        area.release();
        let area2 = registry.acquire(test_id); // re-acquire creates a fresh namespace
        assert_eq!(area2.file_count(), 0);
    }
}
