//! The test-probe data model (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

/// 128-bit v4 UUID identifying a single test run. Minted by the
/// QueueManager on `InitializeTest`.
pub type TestId = Uuid;

/// Opaque storage location, interpreted only by the storage provider.
pub type Bucket = String;

/// Which side of a Kafka topic a test acts as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TopicRole {
    Producer,
    Consumer,
}

/// One Kafka topic a test touches, as declared in the topic-directive
/// manifest (spec §6.4).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicDirective {
    pub topic: String,
    pub role: TopicRole,
    #[serde(rename = "clientPrincipal")]
    pub client_principal: String,
    #[serde(rename = "eventFilters", default)]
    pub event_filters: Vec<(String, String)>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Produced by the storage fetch; the single input that everything
/// downstream of `BlockStorageWorker::fetch` consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockStorageDirective {
    pub staged_location: PathBuf,
    pub evidence_dir: PathBuf,
    pub topic_directives: Vec<TopicDirective>,
    pub bucket: Bucket,
}

/// Wire transport the producer/consumer must use for a given topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityProtocol {
    Plaintext,
    SaslSsl,
}

/// Per-topic Kafka credential material. `jaas_config` is the only field
/// that may contain secret material and is wrapped so it is never copied
/// into logs or diagnostics (spec §3.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaSecurityDirective {
    pub topic: String,
    pub role: TopicRole,
    pub protocol: SecurityProtocol,
    pub jaas_config: crate::secrets::Redacted<String>,
}

/// Emitted by the Cucumber worker on completion of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestExecutionResult {
    pub test_id: TestId,
    pub passed: bool,
    pub scenarios_passed: u32,
    pub scenarios_failed: u32,
    pub scenarios_skipped: u32,
    pub steps_passed: u32,
    pub steps_failed: u32,
    pub steps_skipped: u32,
    pub steps_undefined: u32,
    pub duration_ms: u64,
    pub error_message: Option<String>,
    pub failed_scenario_names: Vec<String>,
}

/// The seven canonical lifecycle states owned by the TestExecutor (spec
/// §3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum TestState {
    Setup,
    Loading,
    Loaded,
    Testing,
    Completed,
    Exception,
    ShuttingDown,
}

impl TestState {
    /// `Completed` and `Exception` are terminal from the outside;
    /// `ShuttingDown` always follows one of them (or a pre-`Testing`
    /// abort) and precedes actor destruction.
    pub fn is_terminal(self) -> bool {
        matches!(self, TestState::Completed | TestState::Exception)
    }
}

impl std::fmt::Display for TestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TestState::Setup => "Setup",
            TestState::Loading => "Loading",
            TestState::Loaded => "Loaded",
            TestState::Testing => "Testing",
            TestState::Completed => "Completed",
            TestState::Exception => "Exception",
            TestState::ShuttingDown => "ShuttingDown",
        };
        write!(f, "{label}")
    }
}

/// Status snapshot returned by `Status` queries and by the REST status
/// endpoint (spec §6.2), built from whatever accumulated data the
/// TestExecutor currently holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StatusSnapshot {
    pub test_id: TestId,
    pub state: TestState,
    pub bucket: Option<Bucket>,
    pub test_type: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub success: Option<bool>,
    pub error: Option<String>,
}

/// Per-state poison-pill timer durations, overridable from `Config`
/// (spec §4.3, §6.6 `timers.*`).
#[derive(Debug, Clone, Copy)]
pub struct StateTimeouts {
    pub setup: std::time::Duration,
    pub loading: std::time::Duration,
    pub completed: std::time::Duration,
    pub exception: std::time::Duration,
}

impl Default for StateTimeouts {
    fn default() -> Self {
        Self {
            setup: std::time::Duration::from_secs(60),
            loading: std::time::Duration::from_secs(120),
            completed: std::time::Duration::from_secs(30),
            exception: std::time::Duration::from_secs(30),
        }
    }
}

impl StateTimeouts {
    /// The poison-pill duration for `state`, or `None` for states that
    /// don't arm one (`Loaded`/`Testing` progress on external events only;
    /// `ShuttingDown` is already on its way out).
    pub fn for_state(&self, state: TestState) -> Option<std::time::Duration> {
        match state {
            TestState::Setup => Some(self.setup),
            TestState::Loading => Some(self.loading),
            TestState::Completed => Some(self.completed),
            TestState::Exception => Some(self.exception),
            TestState::Loaded | TestState::Testing | TestState::ShuttingDown => None,
        }
    }
}
