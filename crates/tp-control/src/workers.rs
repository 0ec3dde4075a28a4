//! CucumberWorker, ProducerWorker, ConsumerWorker contracts (spec §4.6).
//!
//! The Cucumber runner itself, and the Kafka producer/consumer client
//! libraries, are external collaborators out of scope (spec §1). What's in
//! scope is the *contract*: each worker reports `ChildReady` once wired,
//! the Cucumber worker reports `TestComplete` when the run finishes, and
//! any fatal internal error reports `ChildException` rather than failing
//! silently.

use async_trait::async_trait;
use tp_core::error::{ErrorKind, TestProbeError};
use tp_core::types::{BlockStorageDirective, KafkaSecurityDirective, TestExecutionResult};

#[async_trait]
pub trait CucumberWorker: Send + Sync {
    /// Wire the feature files and validate the bundle is runnable. Must
    /// complete before `ChildReady` is reported to the parent.
    async fn initialize(&self, directive: &BlockStorageDirective) -> Result<(), TestProbeError>;

    /// Run the suite. The TestExecutor must not call this until every
    /// expected child has reported ready (spec §4.6 "Ordering").
    async fn start_test(&self) -> Result<TestExecutionResult, TestProbeError>;
}

#[async_trait]
pub trait ProducerWorker: Send + Sync {
    /// Install credentials and establish the connection. Must complete
    /// before execution begins (spec §4.6 "Ordering").
    async fn initialize(
        &self,
        directive: &BlockStorageDirective,
        security: &[KafkaSecurityDirective],
    ) -> Result<(), TestProbeError>;
}

#[async_trait]
pub trait ConsumerWorker: Send + Sync {
    async fn initialize(
        &self,
        directive: &BlockStorageDirective,
        security: &[KafkaSecurityDirective],
    ) -> Result<(), TestProbeError>;
}

/// In-process test double standing in for a real Cucumber runner
/// integration. Used by TestExecutor driver tests and by local-mode
/// development deployments.
pub struct StubCucumberWorker {
    pub scripted_result: TestExecutionResult,
    pub fail_on_initialize: Option<ErrorKind>,
}

impl StubCucumberWorker {
    pub fn passing(test_id: tp_core::types::TestId) -> Self {
        Self {
            scripted_result: TestExecutionResult {
                test_id,
                passed: true,
                scenarios_passed: 1,
                scenarios_failed: 0,
                scenarios_skipped: 0,
                steps_passed: 3,
                steps_failed: 0,
                steps_skipped: 0,
                steps_undefined: 0,
                duration_ms: 5,
                error_message: None,
                failed_scenario_names: vec![],
            },
            fail_on_initialize: None,
        }
    }
}

#[async_trait]
impl CucumberWorker for StubCucumberWorker {
    async fn initialize(&self, directive: &BlockStorageDirective) -> Result<(), TestProbeError> {
        if let Some(kind) = self.fail_on_initialize {
            return Err(TestProbeError::new(kind, "stub cucumber worker scripted failure"));
        }
        if directive.topic_directives.is_empty() {
            return Err(TestProbeError::new(
                ErrorKind::InvalidTopicDirectiveFormat,
                "no topic directives to drive producer/consumer wiring",
            ));
        }
        Ok(())
    }

    async fn start_test(&self) -> Result<TestExecutionResult, TestProbeError> {
        Ok(self.scripted_result.clone())
    }
}

pub struct StubProducerWorker;

#[async_trait]
impl ProducerWorker for StubProducerWorker {
    async fn initialize(
        &self,
        _directive: &BlockStorageDirective,
        _security: &[KafkaSecurityDirective],
    ) -> Result<(), TestProbeError> {
        Ok(())
    }
}

pub struct StubConsumerWorker;

#[async_trait]
impl ConsumerWorker for StubConsumerWorker {
    async fn initialize(
        &self,
        _directive: &BlockStorageDirective,
        _security: &[KafkaSecurityDirective],
    ) -> Result<(), TestProbeError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tp_core::types::TopicRole;

    fn directive() -> BlockStorageDirective {
        BlockStorageDirective {
            staged_location: "x".into(),
            evidence_dir: "x/evidence".into(),
            topic_directives: vec![tp_core::types::TopicDirective {
                topic: "orders".into(),
                role: TopicRole::Producer,
                client_principal: "alpha".into(),
                event_filters: vec![],
                metadata: Default::default(),
            }],
            bucket: "file:///tmp".into(),
        }
    }

    #[tokio::test]
    async fn stub_cucumber_worker_reports_scripted_result() {
        let test_id = uuid::Uuid::new_v4();
        let worker = StubCucumberWorker::passing(test_id);
        worker.initialize(&directive()).await.unwrap();
        let result = worker.start_test().await.unwrap();
        assert!(result.passed);
    }

    #[tokio::test]
    async fn stub_cucumber_worker_rejects_empty_topic_directives() {
        let worker = StubCucumberWorker::passing(uuid::Uuid::new_v4());
        let empty = BlockStorageDirective {
            staged_location: "x".into(),
            evidence_dir: "x/evidence".into(),
            topic_directives: vec![],
            bucket: "file:///tmp".into(),
        };
        let err = worker.initialize(&empty).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidTopicDirectiveFormat);
    }
}
