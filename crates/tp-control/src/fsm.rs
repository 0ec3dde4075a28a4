//! The TestExecutor finite-state machine (spec §4.3).
//!
//! Modeled as a pure reducer — `transition` takes the current machine and an
//! inbound event and returns the list of `Effect`s the driver loop (the
//! async task that owns this executor's mailbox) must carry out. No I/O
//! happens inside the state machine itself, mirroring how the state machine
//! in the agent supervision layer stays pure and pushes side effects to its
//! caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tp_core::error::ErrorKind;
use tp_core::types::{Bucket, BlockStorageDirective, KafkaSecurityDirective, StatusSnapshot, TestExecutionResult, TestId, TestState};

/// The children a TestExecutor spawns on entry to `Loading`. `Loaded` is
/// reached only once all five have reported `ChildReady` (spec §4.3 "Child
/// aggregation").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildKind {
    BlockStorage,
    Vault,
    Cucumber,
    Producer,
    Consumer,
}

impl ChildKind {
    pub const ALL: [ChildKind; 5] = [
        ChildKind::BlockStorage,
        ChildKind::Vault,
        ChildKind::Cucumber,
        ChildKind::Producer,
        ChildKind::Consumer,
    ];
}

impl fmt::Display for ChildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChildKind::BlockStorage => "block-storage",
            ChildKind::Vault => "vault",
            ChildKind::Cucumber => "cucumber",
            ChildKind::Producer => "producer",
            ChildKind::Consumer => "consumer",
        };
        write!(f, "{label}")
    }
}

/// Inbound events a TestExecutor's mailbox can receive.
#[derive(Debug, Clone)]
pub enum TestEvent {
    StartTest { bucket: Bucket, test_type: Option<String> },
    Cancel,
    Status,
    /// The poison-pill timer for the current state fired.
    Timeout,
    ChildReady(ChildKind),
    ChildException(ErrorKind),
    StartTesting,
    TestComplete(TestExecutionResult),
    UploadComplete,
    UploadFailure(ErrorKind),
}

/// Commands the driver loop must execute after a transition. The state
/// machine never performs these itself.
#[derive(Debug, Clone)]
pub enum Effect {
    ReplyInitializeOk,
    ReplyStartOk,
    ReplyCancelled { cancelled: bool, reason: Option<String> },
    ReplyStatus(StatusSnapshot),
    EmitTestInitialized,
    EmitTestLoading,
    EmitTestLoaded,
    EmitTestStarted,
    EmitTestCompleted,
    EmitTestException(ErrorKind),
    EmitTestStopping,
    ArmTimer { state: TestState, duration: std::time::Duration },
    CancelTimer,
    SpawnChildren,
    SendStartTestToCucumber,
    SendLoadToBlockStorage,
    StopAllChildren,
}

#[derive(Debug, thiserror::Error)]
pub enum FsmError {
    #[error("event {event:?} is not valid in phase {phase:?}")]
    InvalidTransition { phase: ExecutionPhase, event: &'static str },
}

/// Internal phases. `UploadWait` is not one of the seven externally visible
/// `TestState`s (spec §3.3) — it is a sub-phase of `Testing`, entered once
/// the Cucumber run finishes and evidence upload is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionPhase {
    Setup,
    Loading,
    Loaded,
    Testing,
    UploadWait,
    Completed,
    Exception,
    ShuttingDown,
}

impl ExecutionPhase {
    pub fn external_state(self) -> TestState {
        match self {
            ExecutionPhase::Setup => TestState::Setup,
            ExecutionPhase::Loading => TestState::Loading,
            ExecutionPhase::Loaded => TestState::Loaded,
            ExecutionPhase::Testing | ExecutionPhase::UploadWait => TestState::Testing,
            ExecutionPhase::Completed => TestState::Completed,
            ExecutionPhase::Exception => TestState::Exception,
            ExecutionPhase::ShuttingDown => TestState::ShuttingDown,
        }
    }
}

/// Accumulated data the executor accretes as children report in (spec
/// §4.3 "Accumulated data").
#[derive(Debug, Clone, Default)]
pub struct Accumulated {
    pub bucket: Option<Bucket>,
    pub test_type: Option<String>,
    pub block_storage: Option<BlockStorageDirective>,
    pub security_directives: Option<Vec<KafkaSecurityDirective>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub result: Option<TestExecutionResult>,
    pub error: Option<ErrorKind>,
}

pub struct TestExecutorFsm {
    pub test_id: TestId,
    phase: ExecutionPhase,
    ready_children: HashSet<ChildKind>,
    expected_children: HashSet<ChildKind>,
    pub data: Accumulated,
}

impl TestExecutorFsm {
    pub fn new(test_id: TestId) -> Self {
        Self {
            test_id,
            phase: ExecutionPhase::Setup,
            ready_children: HashSet::new(),
            expected_children: ChildKind::ALL.into_iter().collect(),
            data: Accumulated::default(),
        }
    }

    pub fn phase(&self) -> ExecutionPhase {
        self.phase
    }

    pub fn state(&self) -> TestState {
        self.phase.external_state()
    }

    pub fn status_snapshot(&self) -> StatusSnapshot {
        let state = self.state();
        StatusSnapshot {
            test_id: self.test_id,
            state,
            bucket: self.data.bucket.clone(),
            test_type: self.data.test_type.clone(),
            start_time: self.data.start_time,
            end_time: self.data.end_time,
            success: state.is_terminal().then_some(state == TestState::Completed),
            error: self.data.error.map(|k| k.to_string()),
        }
    }

    /// Apply one inbound event, returning the effects the driver must
    /// execute. `Status` and the on-entry `Setup` arming are available in
    /// every non-terminal-cleanup phase; everything else follows the table
    /// in spec §4.3.
    pub fn transition(&mut self, event: TestEvent) -> Result<Vec<Effect>, FsmError> {
        if matches!(event, TestEvent::Status) {
            return Ok(vec![Effect::ReplyStatus(self.status_snapshot())]);
        }

        match (self.phase, event) {
            // --- Setup ---------------------------------------------------
            (ExecutionPhase::Setup, TestEvent::StartTest { bucket, test_type }) => {
                self.data.bucket = Some(bucket);
                self.data.test_type = test_type;
                self.phase = ExecutionPhase::Loading;
                Ok(vec![
                    Effect::CancelTimer,
                    Effect::ReplyStartOk,
                    Effect::EmitTestLoading,
                    Effect::SpawnChildren,
                    Effect::ArmTimer {
                        state: TestState::Loading,
                        duration: Default::default(),
                    },
                ])
            }
            (ExecutionPhase::Setup, TestEvent::Cancel) => {
                self.phase = ExecutionPhase::ShuttingDown;
                Ok(vec![
                    Effect::CancelTimer,
                    Effect::ReplyCancelled { cancelled: true, reason: None },
                    Effect::EmitTestStopping,
                    Effect::StopAllChildren,
                ])
            }
            (ExecutionPhase::Setup, TestEvent::Timeout) => {
                self.phase = ExecutionPhase::ShuttingDown;
                Ok(vec![Effect::EmitTestStopping, Effect::StopAllChildren])
            }

            // --- Loading ---------------------------------------------------
            (ExecutionPhase::Loading, TestEvent::ChildReady(kind)) => {
                self.ready_children.insert(kind);
                let mut effects = Vec::new();
                if self.ready_children.is_superset(&self.expected_children) {
                    self.phase = ExecutionPhase::Loaded;
                    effects.push(Effect::CancelTimer);
                    effects.push(Effect::EmitTestLoaded);
                }
                Ok(effects)
            }
            (ExecutionPhase::Loading, TestEvent::ChildException(kind)) => {
                self.enter_exception(kind);
                Ok(self.exception_effects(kind))
            }
            (ExecutionPhase::Loading, TestEvent::Cancel) => {
                self.phase = ExecutionPhase::ShuttingDown;
                Ok(vec![
                    Effect::CancelTimer,
                    Effect::ReplyCancelled { cancelled: true, reason: None },
                    Effect::EmitTestStopping,
                    Effect::StopAllChildren,
                ])
            }
            (ExecutionPhase::Loading, TestEvent::Timeout) => {
                self.phase = ExecutionPhase::ShuttingDown;
                Ok(vec![Effect::EmitTestStopping, Effect::StopAllChildren])
            }

            // --- Loaded ---------------------------------------------------
            (ExecutionPhase::Loaded, TestEvent::StartTesting) => {
                self.phase = ExecutionPhase::Testing;
                self.data.start_time = Some(Utc::now());
                Ok(vec![Effect::EmitTestStarted, Effect::SendStartTestToCucumber])
            }
            (ExecutionPhase::Loaded, TestEvent::Cancel) => {
                self.phase = ExecutionPhase::ShuttingDown;
                Ok(vec![
                    Effect::ReplyCancelled { cancelled: true, reason: None },
                    Effect::EmitTestStopping,
                    Effect::StopAllChildren,
                ])
            }

            // --- Testing ---------------------------------------------------
            (ExecutionPhase::Testing, TestEvent::TestComplete(result)) => {
                self.data.result = Some(result);
                self.phase = ExecutionPhase::UploadWait;
                Ok(vec![Effect::SendLoadToBlockStorage])
            }
            (ExecutionPhase::Testing, TestEvent::ChildException(kind)) => {
                self.enter_exception(kind);
                Ok(self.exception_effects(kind))
            }
            (ExecutionPhase::Testing, TestEvent::Cancel) => Ok(vec![Effect::ReplyCancelled {
                cancelled: false,
                reason: Some("test is already Testing; cancellation is refused once execution has begun".to_string()),
            }]),

            // --- upload-wait -------------------------------------------------
            (ExecutionPhase::UploadWait, TestEvent::UploadComplete) => {
                self.phase = ExecutionPhase::Completed;
                self.data.end_time = Some(Utc::now());
                Ok(vec![
                    Effect::EmitTestCompleted,
                    Effect::ArmTimer {
                        state: TestState::Completed,
                        duration: Default::default(),
                    },
                ])
            }
            (ExecutionPhase::UploadWait, TestEvent::UploadFailure(kind)) => {
                self.enter_exception(kind);
                Ok(self.exception_effects(kind))
            }
            (ExecutionPhase::UploadWait, TestEvent::Cancel) => Ok(vec![Effect::ReplyCancelled {
                cancelled: false,
                reason: Some("test is uploading evidence; cancellation is refused".to_string()),
            }]),

            // --- Completed / Exception --------------------------------------
            (ExecutionPhase::Completed | ExecutionPhase::Exception, TestEvent::Timeout) => {
                self.phase = ExecutionPhase::ShuttingDown;
                Ok(vec![Effect::EmitTestStopping, Effect::StopAllChildren])
            }
            (ExecutionPhase::Completed | ExecutionPhase::Exception, TestEvent::Cancel) => {
                Ok(vec![Effect::ReplyCancelled {
                    cancelled: false,
                    reason: Some("test has already reached a terminal state".to_string()),
                }])
            }
            // Anything else in a terminal phase is dropped silently (spec
            // §4.3 "Message ignoring").
            (ExecutionPhase::Completed | ExecutionPhase::Exception, _) => Ok(vec![]),

            // --- ShuttingDown ------------------------------------------------
            (ExecutionPhase::ShuttingDown, TestEvent::Cancel) => Ok(vec![Effect::ReplyCancelled {
                cancelled: false,
                reason: Some("test is already shutting down".to_string()),
            }]),
            // A ShuttingDown executor is on its way out; every other event
            // is dropped the same way it is in Completed/Exception.
            (ExecutionPhase::ShuttingDown, _) => Ok(vec![]),

            (phase, event) => Err(FsmError::InvalidTransition {
                phase,
                event: event_name(&event),
            }),
        }
    }

    fn enter_exception(&mut self, kind: ErrorKind) {
        self.phase = ExecutionPhase::Exception;
        self.data.end_time = Some(Utc::now());
        self.data.error = Some(kind);
    }

    fn exception_effects(&self, kind: ErrorKind) -> Vec<Effect> {
        vec![
            Effect::CancelTimer,
            Effect::EmitTestException(kind),
            Effect::ArmTimer {
                state: TestState::Exception,
                duration: Default::default(),
            },
        ]
    }
}

fn event_name(event: &TestEvent) -> &'static str {
    match event {
        TestEvent::StartTest { .. } => "StartTest",
        TestEvent::Cancel => "Cancel",
        TestEvent::Status => "Status",
        TestEvent::Timeout => "Timeout",
        TestEvent::ChildReady(_) => "ChildReady",
        TestEvent::ChildException(_) => "ChildException",
        TestEvent::StartTesting => "StartTesting",
        TestEvent::TestComplete(_) => "TestComplete",
        TestEvent::UploadComplete => "UploadComplete",
        TestEvent::UploadFailure(_) => "UploadFailure",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tp_core::types::TestExecutionResult;

    fn new_fsm() -> TestExecutorFsm {
        TestExecutorFsm::new(uuid::Uuid::new_v4())
    }

    fn complete_result(test_id: TestId) -> TestExecutionResult {
        TestExecutionResult {
            test_id,
            passed: true,
            scenarios_passed: 1,
            scenarios_failed: 0,
            scenarios_skipped: 0,
            steps_passed: 3,
            steps_failed: 0,
            steps_skipped: 0,
            steps_undefined: 0,
            duration_ms: 10,
            error_message: None,
            failed_scenario_names: vec![],
        }
    }

    fn drive_to_testing(fsm: &mut TestExecutorFsm) {
        fsm.transition(TestEvent::StartTest { bucket: "file:///tmp".into(), test_type: None })
            .unwrap();
        for kind in ChildKind::ALL {
            fsm.transition(TestEvent::ChildReady(kind)).unwrap();
        }
        assert_eq!(fsm.state(), TestState::Loaded);
        fsm.transition(TestEvent::StartTesting).unwrap();
        assert_eq!(fsm.state(), TestState::Testing);
    }

    /// spec S1: happy path walks Setup -> Loading -> Loaded -> Testing ->
    /// Completed.
    #[test]
    fn s1_happy_path_reaches_completed() {
        let mut fsm = new_fsm();
        drive_to_testing(&mut fsm);
        let result = complete_result(fsm.test_id);
        fsm.transition(TestEvent::TestComplete(result)).unwrap();
        assert_eq!(fsm.phase(), ExecutionPhase::UploadWait);
        assert_eq!(fsm.state(), TestState::Testing);
        fsm.transition(TestEvent::UploadComplete).unwrap();
        assert_eq!(fsm.state(), TestState::Completed);
        let snap = fsm.status_snapshot();
        assert_eq!(snap.success, Some(true));
        assert!(snap.end_time.unwrap() >= snap.start_time.unwrap());
    }

    /// spec property 5 / §4.3 cancellation matrix: accepted in Setup,
    /// Loading, Loaded; refused in Testing, Completed, Exception,
    /// ShuttingDown.
    #[test]
    fn cancellation_matrix() {
        let mut fsm = new_fsm();
        let effects = fsm.transition(TestEvent::Cancel).unwrap();
        assert!(matches!(effects[1], Effect::ReplyCancelled { cancelled: true, .. }));

        let mut fsm = new_fsm();
        fsm.transition(TestEvent::StartTest { bucket: "b".into(), test_type: None }).unwrap();
        let effects = fsm.transition(TestEvent::Cancel).unwrap();
        assert!(matches!(effects[1], Effect::ReplyCancelled { cancelled: true, .. }));

        let mut fsm = new_fsm();
        drive_to_testing(&mut fsm);
        let effects = fsm.transition(TestEvent::Cancel).unwrap();
        assert!(matches!(effects[0], Effect::ReplyCancelled { cancelled: false, .. }));
        assert_eq!(fsm.state(), TestState::Testing);
    }

    /// Regression: a test that is already `ShuttingDown` (e.g. its Setup
    /// poison-pill already fired) must refuse a subsequent `Cancel` the same
    /// way every other terminal-ish phase does, not error out.
    #[test]
    fn cancellation_refused_while_shutting_down() {
        let mut fsm = new_fsm();
        fsm.transition(TestEvent::Cancel).unwrap();
        assert_eq!(fsm.phase(), ExecutionPhase::ShuttingDown);
        let effects = fsm.transition(TestEvent::Cancel).unwrap();
        assert!(matches!(effects.as_slice(), [Effect::ReplyCancelled { cancelled: false, .. }]));
        assert_eq!(fsm.phase(), ExecutionPhase::ShuttingDown);
    }

    #[test]
    fn child_exception_during_loading_moves_to_exception() {
        let mut fsm = new_fsm();
        fsm.transition(TestEvent::StartTest { bucket: "b".into(), test_type: None }).unwrap();
        fsm.transition(TestEvent::ChildException(ErrorKind::VaultAuth)).unwrap();
        assert_eq!(fsm.state(), TestState::Exception);
        let snap = fsm.status_snapshot();
        assert_eq!(snap.success, Some(false));
        assert_eq!(snap.error.as_deref(), Some("vault authentication failed"));
    }

    /// spec property 4: once terminal, only Status/timer changes state.
    #[test]
    fn terminal_finality_ignores_other_events() {
        let mut fsm = new_fsm();
        fsm.transition(TestEvent::StartTest { bucket: "b".into(), test_type: None }).unwrap();
        fsm.transition(TestEvent::ChildException(ErrorKind::VaultAuth)).unwrap();
        assert_eq!(fsm.state(), TestState::Exception);
        let effects = fsm.transition(TestEvent::ChildReady(ChildKind::Vault)).unwrap();
        assert!(effects.is_empty());
        assert_eq!(fsm.state(), TestState::Exception);
        let effects = fsm.transition(TestEvent::Timeout).unwrap();
        assert_eq!(fsm.state(), TestState::ShuttingDown);
        assert!(matches!(effects[0], Effect::EmitTestStopping));
    }

    #[test]
    fn status_always_answered_regardless_of_phase() {
        let mut fsm = new_fsm();
        let effects = fsm.transition(TestEvent::Status).unwrap();
        assert!(matches!(effects[0], Effect::ReplyStatus(_)));
    }

    #[test]
    fn child_readiness_order_is_irrelevant() {
        let mut a = new_fsm();
        a.transition(TestEvent::StartTest { bucket: "b".into(), test_type: None }).unwrap();
        for kind in ChildKind::ALL {
            a.transition(TestEvent::ChildReady(kind)).unwrap();
        }
        let mut b = new_fsm();
        b.transition(TestEvent::StartTest { bucket: "b".into(), test_type: None }).unwrap();
        for kind in ChildKind::ALL.iter().rev() {
            b.transition(TestEvent::ChildReady(*kind)).unwrap();
        }
        assert_eq!(a.state(), TestState::Loaded);
        assert_eq!(b.state(), TestState::Loaded);
    }

    /// spec property 3: no observer ever sees a test's state move backward.
    /// Walks the full happy path plus a cancellation-from-Setup path and
    /// asserts the externally visible rank is non-decreasing at every step.
    fn rank(state: TestState) -> u8 {
        match state {
            TestState::Setup => 0,
            TestState::Loading => 1,
            TestState::Loaded => 2,
            TestState::Testing => 3,
            TestState::Completed | TestState::Exception => 4,
            TestState::ShuttingDown => 5,
        }
    }

    #[test]
    fn state_never_regresses_on_happy_path() {
        let mut fsm = new_fsm();
        let mut last = rank(fsm.state());
        assert_eq!(fsm.state(), TestState::Setup);

        fsm.transition(TestEvent::StartTest { bucket: "file:///tmp".into(), test_type: None }).unwrap();
        assert!(rank(fsm.state()) >= last);
        last = rank(fsm.state());

        for kind in ChildKind::ALL {
            fsm.transition(TestEvent::ChildReady(kind)).unwrap();
            assert!(rank(fsm.state()) >= last);
            last = rank(fsm.state());
        }

        fsm.transition(TestEvent::StartTesting).unwrap();
        assert!(rank(fsm.state()) >= last);
        last = rank(fsm.state());

        let result = complete_result(fsm.test_id);
        fsm.transition(TestEvent::TestComplete(result)).unwrap();
        assert!(rank(fsm.state()) >= last);
        last = rank(fsm.state());

        fsm.transition(TestEvent::UploadComplete).unwrap();
        assert!(rank(fsm.state()) >= last);
        assert_eq!(fsm.state(), TestState::Completed);
    }

    #[test]
    fn state_never_regresses_on_early_cancellation() {
        let mut fsm = new_fsm();
        let before = rank(fsm.state());
        fsm.transition(TestEvent::Cancel).unwrap();
        assert!(rank(fsm.state()) >= before);
    }
}
