//! Drives one TestExecutor from `Loading` through to a terminal state by
//! calling the real BlockStorage/Vault/Cucumber/Producer/Consumer
//! collaborators in the order spec §2's data flow describes: *Storage
//! fetch → Vault fetch → Cucumber execution → Storage upload of evidence*.
//!
//! This is the in-process realization of the "component processes one
//! message to completion" scheduling model (spec §5) — rather than modeling
//! a literal mailbox/channel per component, the driver calls each
//! collaborator in turn and feeds the resulting event back into the FSM, in
//! the same order a mailbox loop would deliver them.

use std::collections::HashMap;
use std::sync::Arc;
use tp_core::error::ErrorKind;
use tp_core::types::{Bucket, TestId};
use tp_providers::storage::BlockStorageWorker;
use tp_providers::vault::VaultWorker;

use crate::fsm::{ChildKind, Effect, TestEvent, TestExecutorFsm};
use crate::workers::{ConsumerWorker, CucumberWorker, ProducerWorker};

pub struct TestExecutorDriver {
    pub storage: Arc<BlockStorageWorker>,
    pub vault: Arc<VaultWorker>,
    pub cucumber: Arc<dyn CucumberWorker>,
    pub producer: Arc<dyn ProducerWorker>,
    pub consumer: Arc<dyn ConsumerWorker>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverOutcome {
    Completed,
    Exception(ErrorKind),
}

impl TestExecutorDriver {
    /// Run `fsm` (already past `StartTest`, in `Loading`) through to a
    /// terminal phase. Returns the outcome; `fsm` ends in `Completed` or
    /// `Exception` with its accumulated data populated.
    pub async fn run(&self, fsm: &mut TestExecutorFsm, test_id: TestId, bucket: Bucket) -> DriverOutcome {
        let block_storage = match self.storage.fetch(test_id, bucket).await {
            Ok(d) => d,
            Err(e) => return self.fail(fsm, e.kind),
        };
        let _ = fsm.transition(TestEvent::ChildReady(ChildKind::BlockStorage));

        let security = match self.vault.fetch_security_directives(&block_storage).await {
            Ok(s) => s,
            Err(e) => return self.fail(fsm, e.kind),
        };
        let _ = fsm.transition(TestEvent::ChildReady(ChildKind::Vault));

        if let Err(e) = self.producer.initialize(&block_storage, &security).await {
            return self.fail(fsm, e.kind);
        }
        let _ = fsm.transition(TestEvent::ChildReady(ChildKind::Producer));

        if let Err(e) = self.consumer.initialize(&block_storage, &security).await {
            return self.fail(fsm, e.kind);
        }
        let _ = fsm.transition(TestEvent::ChildReady(ChildKind::Consumer));

        if let Err(e) = self.cucumber.initialize(&block_storage).await {
            return self.fail(fsm, e.kind);
        }
        let _ = fsm.transition(TestEvent::ChildReady(ChildKind::Cucumber));

        debug_assert_eq!(fsm.state(), tp_core::types::TestState::Loaded);

        let _ = fsm.transition(TestEvent::StartTesting);

        let result = match self.cucumber.start_test().await {
            Ok(r) => r,
            Err(e) => return self.fail(fsm, e.kind),
        };
        let _ = fsm.transition(TestEvent::TestComplete(result.clone()));

        let mut evidence = HashMap::new();
        evidence.insert(
            "cucumber.json".to_string(),
            serde_json::to_vec(&result).unwrap_or_default(),
        );
        match self.storage.upload(test_id, block_storage.bucket.clone(), evidence).await {
            Ok(()) => {
                let _ = fsm.transition(TestEvent::UploadComplete);
                DriverOutcome::Completed
            }
            Err(e) => self.fail(fsm, e.kind),
        }
    }

    fn fail(&self, fsm: &mut TestExecutorFsm, kind: ErrorKind) -> DriverOutcome {
        let event = match fsm.phase() {
            crate::fsm::ExecutionPhase::UploadWait => TestEvent::UploadFailure(kind),
            _ => TestEvent::ChildException(kind),
        };
        let _ = fsm.transition(event);
        DriverOutcome::Exception(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::{StubConsumerWorker, StubCucumberWorker, StubProducerWorker};
    use std::collections::HashMap as Map;
    use tp_core::config::Config;
    use tp_providers::storage::{LocalStorageProvider, StorageProvider};
    use tp_providers::staging::StagingRegistry;

    struct InMemoryProvider {
        objects: tokio::sync::Mutex<Map<String, Vec<u8>>>,
    }

    #[async_trait::async_trait]
    impl StorageProvider for InMemoryProvider {
        async fn fetch_objects(
            &self,
            _bucket: &Bucket,
            _prefix: &str,
        ) -> Result<Vec<(String, Vec<u8>)>, tp_core::error::TestProbeError> {
            Ok(self.objects.lock().await.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        }

        async fn put_objects(
            &self,
            _bucket: &Bucket,
            _prefix: &str,
            _files: Vec<(String, Vec<u8>)>,
        ) -> Result<(), tp_core::error::TestProbeError> {
            Ok(())
        }
    }

    fn manifest_bytes() -> Vec<u8> {
        br#"
topics:
  - topic: orders
    role: PRODUCER
    clientPrincipal: alpha
"#
        .to_vec()
    }

    /// spec S1: happy path, local providers — driver walks the real
    /// storage-fetch/vault-fetch/cucumber/upload pipeline end to end.
    #[tokio::test]
    async fn s1_happy_path_drives_to_completed() {
        let mut objects = Map::new();
        objects.insert("features/a.feature".to_string(), b"Feature: x".to_vec());
        objects.insert("topic-directives.yaml".to_string(), manifest_bytes());
        let provider = Arc::new(InMemoryProvider { objects: tokio::sync::Mutex::new(objects) });
        let storage = Arc::new(BlockStorageWorker::new(
            provider,
            StagingRegistry::new(),
            "topic-directives.yaml".to_string(),
        ));
        let vault = Arc::new(VaultWorker::local(Config::default()));
        let test_id = uuid::Uuid::new_v4();

        let driver = TestExecutorDriver {
            storage,
            vault,
            cucumber: Arc::new(StubCucumberWorker::passing(test_id)),
            producer: Arc::new(StubProducerWorker),
            consumer: Arc::new(StubConsumerWorker),
        };

        let mut fsm = TestExecutorFsm::new(test_id);
        fsm.transition(TestEvent::StartTest { bucket: "file:///tmp/bundle".into(), test_type: Some("functional".into()) })
            .unwrap();

        let outcome = driver.run(&mut fsm, test_id, "file:///tmp/bundle".into()).await;
        assert_eq!(outcome, DriverOutcome::Completed);
        assert_eq!(fsm.state(), tp_core::types::TestState::Completed);
        let snap = fsm.status_snapshot();
        assert_eq!(snap.success, Some(true));
        assert!(snap.end_time.unwrap() >= snap.start_time.unwrap());
    }

    /// Uses the real `LocalStorageProvider` to confirm the filesystem-backed
    /// path and the in-memory mock path agree on shape.
    #[tokio::test]
    async fn local_storage_provider_round_trips_through_driver() {
        let tmp = tempfile::tempdir().unwrap();
        let bundle_root = tmp.path().join("bundle");
        std::fs::create_dir_all(bundle_root.join("features")).unwrap();
        std::fs::write(bundle_root.join("features/a.feature"), b"Feature: x").unwrap();
        std::fs::write(bundle_root.join("topic-directives.yaml"), manifest_bytes()).unwrap();

        let provider = Arc::new(LocalStorageProvider::new());
        let storage = Arc::new(BlockStorageWorker::new(
            provider,
            StagingRegistry::new(),
            "topic-directives.yaml".to_string(),
        ));
        let vault = Arc::new(VaultWorker::local(Config::default()));
        let test_id = uuid::Uuid::new_v4();
        let bucket = format!("file://{}", bundle_root.display());

        let driver = TestExecutorDriver {
            storage,
            vault,
            cucumber: Arc::new(StubCucumberWorker::passing(test_id)),
            producer: Arc::new(StubProducerWorker),
            consumer: Arc::new(StubConsumerWorker),
        };

        let mut fsm = TestExecutorFsm::new(test_id);
        fsm.transition(TestEvent::StartTest { bucket: bucket.clone().into(), test_type: None }).unwrap();
        let outcome = driver.run(&mut fsm, test_id, bucket.into()).await;
        assert_eq!(outcome, DriverOutcome::Completed);
    }
}
