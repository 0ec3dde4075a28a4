//! QueueManager — the FIFO admission controller (spec §4.2, §3.4).
//!
//! Owns the single source of truth for which test is `Testing`. Mirrors the
//! teacher's pattern of a single `Arc<Mutex<...>>` guarding a registry, with
//! every externally visible operation taking the lock once and running to
//! completion before releasing it — the "one message processed to
//! completion" scheduling model (spec §5). Also owns the poison-pill timers
//! the FSM's `ArmTimer`/`CancelTimer` effects describe, and fans out every
//! externally visible status change through a `StatusEventBus` subscribers
//! can listen on.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock, Weak};
use tp_core::error::{ErrorKind, TestProbeError};
use tp_core::types::{Bucket, StateTimeouts, StatusSnapshot, TestExecutionResult, TestId, TestState};

use crate::driver::TestExecutorDriver;
use crate::events::StatusEventBus;
use crate::fsm::{ChildKind, Effect, TestEvent, TestExecutorFsm};

/// The QueueManager's per-test record (spec §3.2). `executor` is kept
/// separate from the FSM's own bookkeeping so the mirror can lag briefly
/// without corrupting the canonical state owned by the executor itself.
pub struct TestEntry {
    pub test_id: TestId,
    pub executor: TestExecutorFsm,
    pub start_request_time: Option<DateTime<Utc>>,
}

impl TestEntry {
    fn state(&self) -> TestState {
        self.executor.state()
    }
}

/// `QueueState` (spec §3.4).
#[derive(Default)]
pub struct QueueState {
    registry: HashMap<TestId, TestEntry>,
    pending_queue: Vec<TestId>,
    loaded_set: HashSet<TestId>,
    current_test: Option<TestId>,
    stopped_set: HashSet<TestId>,
    /// Bumped on every `ArmTimer`/`CancelTimer` so a poison-pill task that
    /// fires after its state was already left (re-armed or cancelled) can
    /// tell it is stale and no-op instead of delivering a late `Timeout`.
    timer_epochs: HashMap<TestId, u64>,
}

#[derive(Debug, Clone, Default)]
pub struct QueueStatusCounts {
    pub setup: usize,
    pub loading: usize,
    pub loaded: usize,
    pub testing: usize,
    pub completed: usize,
    pub exception: usize,
    pub shutting_down: usize,
    pub currently_testing: Option<TestId>,
}

#[derive(Debug, Clone)]
pub struct CancelOutcome {
    pub cancelled: bool,
    pub reason: Option<String>,
}

pub struct QueueManager {
    state: tokio::sync::Mutex<QueueState>,
    timeouts: StateTimeouts,
    events: StatusEventBus,
    /// Set only by `spawn`, so a poison-pill task can call back into this
    /// manager once its sleep completes. Plain `new`/`with_timeouts`
    /// instances leave this empty: their `ArmTimer` effects still bump the
    /// epoch counter but never schedule a live task.
    self_handle: OnceLock<Weak<QueueManager>>,
}

impl QueueManager {
    pub fn new() -> Self {
        Self {
            state: tokio::sync::Mutex::new(QueueState::default()),
            timeouts: StateTimeouts::default(),
            events: StatusEventBus::new(),
            self_handle: OnceLock::new(),
        }
    }

    /// Like `new`, but with the poison-pill durations loaded from config
    /// rather than the hardcoded defaults (spec §6.6 `timers.*`).
    pub fn with_timeouts(timeouts: StateTimeouts) -> Self {
        Self {
            timeouts,
            ..Self::new()
        }
    }

    /// Build a QueueManager whose poison-pill timers actually fire. The
    /// returned `Arc` is what lets a timer task `Weak::upgrade` back into
    /// the manager once its sleep completes.
    pub fn spawn(timeouts: StateTimeouts) -> Arc<Self> {
        let qm = Arc::new(Self::with_timeouts(timeouts));
        let _ = qm.self_handle.set(Arc::downgrade(&qm));
        qm
    }

    /// Subscribe to every status snapshot published from this point on
    /// (spec §6.2 mirrored as a push feed rather than poll-only).
    pub fn subscribe_status(&self) -> flume::Receiver<StatusSnapshot> {
        self.events.subscribe()
    }

    /// `InitializeTest` (spec §4.2): mint a `TestId`, spawn a TestExecutor
    /// in `Setup`, insert the entry, and arm its poison-pill timer.
    pub async fn initialize_test(&self) -> TestId {
        let test_id = uuid::Uuid::new_v4();
        let entry = TestEntry {
            test_id,
            executor: TestExecutorFsm::new(test_id),
            start_request_time: None,
        };
        {
            let mut guard = self.state.lock().await;
            guard.registry.insert(test_id, entry);
        }
        tracing::info!(test_id = %test_id, "test initialized");
        self.schedule_timer(test_id, TestState::Setup).await;
        test_id
    }

    /// `StartTest` (spec §4.2): stamp `startRequestTime`, enqueue in FIFO
    /// order, forward `StartTest` to the executor.
    pub async fn start_test(
        &self,
        test_id: TestId,
        bucket: Bucket,
        test_type: Option<String>,
    ) -> Result<(), TestProbeError> {
        let mut guard = self.state.lock().await;
        let entry = guard
            .registry
            .get_mut(&test_id)
            .ok_or_else(|| unknown_test(test_id))?;

        entry.start_request_time = Some(Utc::now());
        let effects = entry
            .executor
            .transition(TestEvent::StartTest { bucket, test_type })
            .map_err(|e| TestProbeError::new(ErrorKind::FatalBooting, e.to_string()))?;

        guard.pending_queue.push(test_id);
        drop(guard);
        self.apply_effects(test_id, &effects).await;
        self.run_scheduling().await;
        Ok(())
    }

    /// Mirror update driven by the executor's own `TestLoaded` emission
    /// (spec §4.2 internal operations). Once a test is in `loadedSet` it
    /// becomes eligible for scheduling.
    pub async fn test_loaded(&self, test_id: TestId) {
        {
            let mut guard = self.state.lock().await;
            guard.loaded_set.insert(test_id);
        }
        self.run_scheduling().await;
    }

    /// `TestStopping` (spec §4.2 cleanup): remove from every set, mark
    /// stopped, rerun scheduling. This is the *only* place an entry leaves
    /// `registry`.
    pub async fn test_stopping(&self, test_id: TestId) {
        {
            let mut guard = self.state.lock().await;
            guard.registry.remove(&test_id);
            guard.pending_queue.retain(|id| *id != test_id);
            guard.loaded_set.remove(&test_id);
            guard.timer_epochs.remove(&test_id);
            if guard.current_test == Some(test_id) {
                guard.current_test = None;
            }
            guard.stopped_set.insert(test_id);
        }
        self.run_scheduling().await;
    }

    /// Child termination outside the normal lifecycle (spec §4.2): force
    /// the entry to `Exception` and clear `currentTest` if it matched.
    pub async fn child_terminated_unexpectedly(&self, test_id: TestId, kind: ErrorKind) {
        let effects = {
            let mut guard = self.state.lock().await;
            let effects = guard
                .registry
                .get_mut(&test_id)
                .and_then(|entry| entry.executor.transition(TestEvent::ChildException(kind)).ok())
                .unwrap_or_default();
            if guard.current_test == Some(test_id) {
                guard.current_test = None;
            }
            effects
        };
        self.apply_effects(test_id, &effects).await;
        self.run_scheduling().await;
    }

    pub async fn test_status(&self, test_id: TestId) -> Result<StatusSnapshot, TestProbeError> {
        let guard = self.state.lock().await;
        let entry = guard.registry.get(&test_id).ok_or_else(|| unknown_test(test_id))?;
        Ok(entry.executor.status_snapshot())
    }

    pub async fn queue_status(&self) -> QueueStatusCounts {
        let guard = self.state.lock().await;
        let mut counts = QueueStatusCounts {
            currently_testing: guard.current_test,
            ..Default::default()
        };
        for entry in guard.registry.values() {
            match entry.state() {
                TestState::Setup => counts.setup += 1,
                TestState::Loading => counts.loading += 1,
                TestState::Loaded => counts.loaded += 1,
                TestState::Testing => counts.testing += 1,
                TestState::Completed => counts.completed += 1,
                TestState::Exception => counts.exception += 1,
                TestState::ShuttingDown => counts.shutting_down += 1,
            }
        }
        counts
    }

    /// `Cancel` (spec §4.2/§4.3): forward to the executor, which decides
    /// acceptance per the cancellation matrix.
    pub async fn cancel(&self, test_id: TestId) -> Result<CancelOutcome, TestProbeError> {
        let mut guard = self.state.lock().await;
        let entry = guard.registry.get_mut(&test_id).ok_or_else(|| unknown_test(test_id))?;
        let effects = entry
            .executor
            .transition(TestEvent::Cancel)
            .map_err(|e| TestProbeError::new(ErrorKind::FatalBooting, e.to_string()))?;
        drop(guard);

        let mut outcome = CancelOutcome { cancelled: false, reason: None };
        for effect in &effects {
            if let Effect::ReplyCancelled { cancelled, reason } = effect {
                outcome = CancelOutcome { cancelled: *cancelled, reason: reason.clone() };
            }
        }
        self.apply_effects(test_id, &effects).await;
        Ok(outcome)
    }

    /// Drive one test from `Loading` through to a terminal state using
    /// `driver`'s collaborators, respecting the FIFO admission gate (spec
    /// §5 "the component processes one message to completion" realized as
    /// this test's own background task). I/O against the collaborators
    /// always runs outside the state lock; only the resulting FSM
    /// transition is taken under the lock, mirroring every other method on
    /// this type.
    pub async fn drive(&self, test_id: TestId, driver: &TestExecutorDriver) {
        let bucket = {
            let guard = self.state.lock().await;
            guard.registry.get(&test_id).and_then(|e| e.executor.data.bucket.clone())
        };
        let Some(bucket) = bucket else { return };

        let block_storage = match driver.storage.fetch(test_id, bucket).await {
            Ok(d) => d,
            Err(e) => return self.force_exception(test_id, e.kind).await,
        };
        self.record_child_ready(test_id, ChildKind::BlockStorage).await;

        let security = match driver.vault.fetch_security_directives(&block_storage).await {
            Ok(s) => s,
            Err(e) => return self.force_exception(test_id, e.kind).await,
        };
        self.record_child_ready(test_id, ChildKind::Vault).await;

        if let Err(e) = driver.producer.initialize(&block_storage, &security).await {
            return self.force_exception(test_id, e.kind).await;
        }
        self.record_child_ready(test_id, ChildKind::Producer).await;

        if let Err(e) = driver.consumer.initialize(&block_storage, &security).await {
            return self.force_exception(test_id, e.kind).await;
        }
        self.record_child_ready(test_id, ChildKind::Consumer).await;

        if let Err(e) = driver.cucumber.initialize(&block_storage).await {
            return self.force_exception(test_id, e.kind).await;
        }
        self.record_child_ready(test_id, ChildKind::Cucumber).await;

        // All children reported ready; this test is now a scheduling
        // candidate. `test_loaded` reruns the FIFO algorithm, but it may
        // not be this test's turn yet.
        self.test_loaded(test_id).await;
        if !self.wait_for_turn(test_id).await {
            return;
        }

        let result = match driver.cucumber.start_test().await {
            Ok(r) => r,
            Err(e) => return self.force_exception(test_id, e.kind).await,
        };
        self.record_test_complete(test_id, result.clone()).await;

        let mut evidence = HashMap::new();
        evidence.insert("cucumber.json".to_string(), serde_json::to_vec(&result).unwrap_or_default());
        match driver.storage.upload(test_id, block_storage.bucket.clone(), evidence).await {
            Ok(()) => self.record_upload_outcome(test_id, None).await,
            Err(e) => self.record_upload_outcome(test_id, Some(e.kind)).await,
        }
    }

    /// Poll until `test_id` becomes `currentTest` or disappears from the
    /// registry (cancelled while waiting in `loadedSet`). Returns `false`
    /// in the latter case.
    async fn wait_for_turn(&self, test_id: TestId) -> bool {
        loop {
            {
                let guard = self.state.lock().await;
                if !guard.registry.contains_key(&test_id) {
                    return false;
                }
                if guard.current_test == Some(test_id) {
                    return true;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    }

    async fn record_child_ready(&self, test_id: TestId, kind: ChildKind) {
        let effects = {
            let mut guard = self.state.lock().await;
            guard
                .registry
                .get_mut(&test_id)
                .and_then(|entry| entry.executor.transition(TestEvent::ChildReady(kind)).ok())
                .unwrap_or_default()
        };
        self.apply_effects(test_id, &effects).await;
    }

    async fn record_test_complete(&self, test_id: TestId, result: TestExecutionResult) {
        let effects = {
            let mut guard = self.state.lock().await;
            guard
                .registry
                .get_mut(&test_id)
                .and_then(|entry| entry.executor.transition(TestEvent::TestComplete(result)).ok())
                .unwrap_or_default()
        };
        self.apply_effects(test_id, &effects).await;
    }

    async fn record_upload_outcome(&self, test_id: TestId, failure: Option<ErrorKind>) {
        let event = match failure {
            None => TestEvent::UploadComplete,
            Some(kind) => TestEvent::UploadFailure(kind),
        };
        let effects = {
            let mut guard = self.state.lock().await;
            guard
                .registry
                .get_mut(&test_id)
                .and_then(|entry| entry.executor.transition(event).ok())
                .unwrap_or_default()
        };
        self.apply_effects(test_id, &effects).await;
    }

    async fn force_exception(&self, test_id: TestId, kind: ErrorKind) {
        self.child_terminated_unexpectedly(test_id, kind).await;
    }

    /// Scheduling algorithm (spec §4.2): runs on every event that could
    /// unblock it. Strict FIFO tie-breaking over `pendingQueue` order.
    async fn run_scheduling(&self) {
        let (test_id, effects) = {
            let mut guard = self.state.lock().await;
            if guard.current_test.is_some() {
                return;
            }
            let Some(pos) = guard
                .pending_queue
                .iter()
                .position(|id| guard.loaded_set.contains(id))
            else {
                return;
            };
            let test_id = guard.pending_queue.remove(pos);
            guard.loaded_set.remove(&test_id);
            guard.current_test = Some(test_id);
            let effects = guard
                .registry
                .get_mut(&test_id)
                .and_then(|entry| entry.executor.transition(TestEvent::StartTesting).ok())
                .unwrap_or_default();
            tracing::info!(test_id = %test_id, "scheduled into Testing");
            (test_id, effects)
        };
        self.apply_effects(test_id, &effects).await;
    }

    /// Act on the effects a transition produced: arm/cancel poison-pill
    /// timers, and fan a fresh status snapshot out to subscribers whenever
    /// the change is one of the externally visible `Emit*` events. Must be
    /// called after the state lock guarding the transition has been
    /// released, since it takes the lock again itself.
    async fn apply_effects(&self, test_id: TestId, effects: &[Effect]) {
        let mut should_publish = false;
        for effect in effects {
            match effect {
                Effect::CancelTimer => {
                    self.bump_epoch(test_id).await;
                }
                Effect::ArmTimer { state, .. } => {
                    self.schedule_timer(test_id, *state).await;
                }
                Effect::EmitTestInitialized
                | Effect::EmitTestLoading
                | Effect::EmitTestLoaded
                | Effect::EmitTestStarted
                | Effect::EmitTestCompleted
                | Effect::EmitTestException(_)
                | Effect::EmitTestStopping => should_publish = true,
                Effect::ReplyInitializeOk
                | Effect::ReplyStartOk
                | Effect::ReplyCancelled { .. }
                | Effect::ReplyStatus(_)
                | Effect::SpawnChildren
                | Effect::SendStartTestToCucumber
                | Effect::SendLoadToBlockStorage
                | Effect::StopAllChildren => {}
            }
        }
        if should_publish {
            if let Ok(snapshot) = self.test_status(test_id).await {
                self.events.publish(snapshot);
            }
        }
    }

    async fn bump_epoch(&self, test_id: TestId) -> u64 {
        let mut guard = self.state.lock().await;
        let epoch = guard.timer_epochs.entry(test_id).or_insert(0);
        *epoch += 1;
        *epoch
    }

    /// Arm a poison-pill timer for `state`, the FSM's requested next state.
    /// The real duration comes from `self.timeouts`, not the zero-value
    /// placeholder the FSM's own `ArmTimer` effect carries — the FSM is a
    /// pure reducer with no configuration of its own (spec §4.3, §6.6).
    async fn schedule_timer(&self, test_id: TestId, state: TestState) {
        let Some(duration) = self.timeouts.for_state(state) else { return };
        let epoch = self.bump_epoch(test_id).await;
        let Some(weak) = self.self_handle.get().cloned() else { return };
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if let Some(qm) = weak.upgrade() {
                qm.fire_timer(test_id, epoch).await;
            }
        });
    }

    /// Deliver `Timeout` to `test_id`'s executor, unless a later
    /// `CancelTimer`/`ArmTimer` has already superseded this timer's epoch.
    ///
    /// Written as a manually boxed future (rather than `async fn`) because
    /// it closes a call cycle through `schedule_timer`'s spawned task
    /// (`schedule_timer` -> spawned task -> `fire_timer` -> `apply_effects`
    /// -> `schedule_timer`); with every leg an opaque `impl Future`, rustc's
    /// auto-trait solver can't resolve `Send` across the cycle. Boxing this
    /// leg gives it a concrete, already-known-`Send` type and breaks the
    /// cycle without changing what any of these methods do.
    fn fire_timer(
        &self,
        test_id: TestId,
        epoch: u64,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let effects = {
                let mut guard = self.state.lock().await;
                if guard.timer_epochs.get(&test_id).copied() != Some(epoch) {
                    return;
                }
                let Some(entry) = guard.registry.get_mut(&test_id) else { return };
                match entry.executor.transition(TestEvent::Timeout) {
                    Ok(effects) => effects,
                    Err(_) => return,
                }
            };
            self.apply_effects(test_id, &effects).await;
            self.run_scheduling().await;
        })
    }
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new()
    }
}

fn unknown_test(test_id: TestId) -> TestProbeError {
    TestProbeError::new(ErrorKind::BucketUriParse, format!("unknown test id {test_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn push_to_loaded(qm: &QueueManager, test_id: TestId) {
        qm.start_test(test_id, "file:///tmp".into(), None).await.unwrap();
        for kind in crate::fsm::ChildKind::ALL {
            let mut guard = qm.state.lock().await;
            let entry = guard.registry.get_mut(&test_id).unwrap();
            entry.executor.transition(TestEvent::ChildReady(kind)).unwrap();
        }
        qm.test_loaded(test_id).await;
    }

    /// spec property 1 / S2: three tests started in order, but T2/T3 reach
    /// Loaded before T1 — Testing order still follows FIFO insertion order.
    #[tokio::test]
    async fn s2_fifo_with_three_tests() {
        let qm = QueueManager::new();
        let t1 = qm.initialize_test().await;
        let t2 = qm.initialize_test().await;
        let t3 = qm.initialize_test().await;

        qm.start_test(t1, "file:///tmp".into(), None).await.unwrap();
        qm.start_test(t2, "file:///tmp".into(), None).await.unwrap();
        qm.start_test(t3, "file:///tmp".into(), None).await.unwrap();

        // T2 and T3 become Loaded first; FIFO still resolves to T1 because
        // it was enqueued first and eventually becomes Loaded too.
        for kind in crate::fsm::ChildKind::ALL {
            let mut guard = qm.state.lock().await;
            guard.registry.get_mut(&t2).unwrap().executor.transition(TestEvent::ChildReady(kind)).unwrap();
            guard.registry.get_mut(&t3).unwrap().executor.transition(TestEvent::ChildReady(kind)).unwrap();
        }
        qm.test_loaded(t2).await;
        qm.test_loaded(t3).await;
        assert_eq!(qm.queue_status().await.currently_testing, None);

        for kind in crate::fsm::ChildKind::ALL {
            let mut guard = qm.state.lock().await;
            guard.registry.get_mut(&t1).unwrap().executor.transition(TestEvent::ChildReady(kind)).unwrap();
        }
        qm.test_loaded(t1).await;

        assert_eq!(qm.test_status(t1).await.unwrap().state, TestState::Testing);
        qm.test_stopping(t1).await;

        assert_eq!(qm.test_status(t2).await.unwrap().state, TestState::Testing);
        qm.test_stopping(t2).await;

        assert_eq!(qm.test_status(t3).await.unwrap().state, TestState::Testing);
    }

    /// spec property 2: at-most-one executing.
    #[tokio::test]
    async fn at_most_one_testing() {
        let qm = QueueManager::new();
        let t1 = qm.initialize_test().await;
        let t2 = qm.initialize_test().await;
        push_to_loaded(&qm, t1).await;
        push_to_loaded(&qm, t2).await;
        let counts = qm.queue_status().await;
        assert_eq!(counts.testing, 1);
        assert_eq!(counts.loaded, 1);
    }

    #[tokio::test]
    async fn unknown_test_id_returns_error_without_panicking() {
        let qm = QueueManager::new();
        let err = qm.test_status(uuid::Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::BucketUriParse);
    }

    /// spec S3: cancel while Loading is honoured and the test ends up in
    /// `stoppedSet` after `TestStopping`.
    #[tokio::test]
    async fn s3_cancellation_allowed_during_loading() {
        let qm = QueueManager::new();
        let t1 = qm.initialize_test().await;
        qm.start_test(t1, "file:///tmp".into(), None).await.unwrap();
        let outcome = qm.cancel(t1).await.unwrap();
        assert!(outcome.cancelled);
        qm.test_stopping(t1).await;
        let guard = qm.state.lock().await;
        assert!(guard.stopped_set.contains(&t1));
        assert!(!guard.registry.contains_key(&t1));
    }

    /// spec S4: cancel refused once Testing.
    #[tokio::test]
    async fn s4_cancellation_refused_during_testing() {
        let qm = QueueManager::new();
        let t1 = qm.initialize_test().await;
        push_to_loaded(&qm, t1).await;
        assert_eq!(qm.test_status(t1).await.unwrap().state, TestState::Testing);
        let outcome = qm.cancel(t1).await.unwrap();
        assert!(!outcome.cancelled);
        assert!(outcome.reason.is_some());
        assert_eq!(qm.test_status(t1).await.unwrap().state, TestState::Testing);
    }

    /// Item 1 regression, exercised through the QueueManager rather than
    /// the bare FSM: a test already `ShuttingDown` refuses `Cancel` instead
    /// of bubbling up an `InvalidTransition` error.
    #[tokio::test]
    async fn cancel_refused_once_shutting_down_via_queue_manager() {
        let qm = QueueManager::new();
        let t1 = qm.initialize_test().await;
        let first = qm.cancel(t1).await.unwrap();
        assert!(first.cancelled);
        let second = qm.cancel(t1).await.unwrap();
        assert!(!second.cancelled);
    }

    /// Item 4 regression: a test stuck in `Setup` past its poison-pill
    /// duration is forced into `ShuttingDown` instead of lingering forever.
    #[tokio::test]
    async fn setup_poison_pill_times_out_a_stuck_test() {
        let timeouts = StateTimeouts {
            setup: std::time::Duration::from_millis(20),
            ..StateTimeouts::default()
        };
        let qm = QueueManager::spawn(timeouts);
        let test_id = qm.initialize_test().await;
        assert_eq!(qm.test_status(test_id).await.unwrap().state, TestState::Setup);

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert_eq!(qm.test_status(test_id).await.unwrap().state, TestState::ShuttingDown);
    }

    /// Item 4 regression: starting a test before its Setup poison-pill
    /// fires cancels that timer instead of letting it shut the test down
    /// out from under a now-Loading test.
    #[tokio::test]
    async fn starting_a_test_cancels_its_setup_poison_pill() {
        let timeouts = StateTimeouts {
            setup: std::time::Duration::from_millis(30),
            ..StateTimeouts::default()
        };
        let qm = QueueManager::spawn(timeouts);
        let test_id = qm.initialize_test().await;
        qm.start_test(test_id, "file:///tmp".into(), None).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        assert_eq!(qm.test_status(test_id).await.unwrap().state, TestState::Loading);
    }

    /// Item 5 regression: a status subscriber observes the transitions a
    /// running test makes, not just whatever the state happens to be when
    /// it calls `test_status`.
    #[tokio::test]
    async fn status_subscribers_observe_loading_transition() {
        let qm = QueueManager::new();
        let rx = qm.subscribe_status();
        let test_id = qm.initialize_test().await;
        qm.start_test(test_id, "file:///tmp".into(), None).await.unwrap();

        let snapshot = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv_async())
            .await
            .expect("a status snapshot should be published")
            .unwrap();
        assert_eq!(snapshot.test_id, test_id);
        assert_eq!(snapshot.state, TestState::Loading);
    }

    fn bundle_bucket(tmp: &tempfile::TempDir) -> Bucket {
        std::fs::create_dir_all(tmp.path().join("features")).unwrap();
        std::fs::write(tmp.path().join("features/a.feature"), b"Feature: x").unwrap();
        std::fs::write(
            tmp.path().join("topic-directives.yaml"),
            b"topics:\n  - topic: orders\n    role: PRODUCER\n    clientPrincipal: alpha\n",
        )
        .unwrap();
        format!("file://{}", tmp.path().display())
    }

    fn make_driver() -> TestExecutorDriver {
        let storage = std::sync::Arc::new(tp_providers::storage::BlockStorageWorker::new(
            std::sync::Arc::new(tp_providers::storage::LocalStorageProvider::new()),
            tp_providers::staging::StagingRegistry::new(),
            "topic-directives.yaml",
        ));
        let vault = std::sync::Arc::new(tp_providers::vault::VaultWorker::local(
            tp_core::config::Config::default(),
        ));
        let test_id = uuid::Uuid::new_v4();
        TestExecutorDriver {
            storage,
            vault,
            cucumber: std::sync::Arc::new(crate::workers::StubCucumberWorker::passing(test_id)),
            producer: std::sync::Arc::new(crate::workers::StubProducerWorker),
            consumer: std::sync::Arc::new(crate::workers::StubConsumerWorker),
        }
    }

    /// spec property 1: `drive` defers to `run_scheduling`'s FIFO order even
    /// when the second-enqueued test finishes Loading first.
    #[tokio::test]
    async fn drive_respects_fifo_despite_concurrent_completion() {
        let qm = std::sync::Arc::new(QueueManager::new());
        let driver = std::sync::Arc::new(make_driver());
        let tmp1 = tempfile::tempdir().unwrap();
        let tmp2 = tempfile::tempdir().unwrap();

        let t1 = qm.initialize_test().await;
        let t2 = qm.initialize_test().await;
        qm.start_test(t1, bundle_bucket(&tmp1), None).await.unwrap();
        qm.start_test(t2, bundle_bucket(&tmp2), None).await.unwrap();

        let (qm2, driver2) = (qm.clone(), driver.clone());
        let t2_handle = tokio::spawn(async move { qm2.drive(t2, &driver2).await });

        // Give t2 time to reach Loaded and start polling for its turn; FIFO
        // must still hand Testing to t1 first.
        for _ in 0..50 {
            if qm.test_status(t2).await.unwrap().state == TestState::Loaded {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(qm.test_status(t2).await.unwrap().state, TestState::Loaded);

        qm.drive(t1, &driver).await;
        assert_eq!(qm.test_status(t1).await.unwrap().state, TestState::Completed);

        t2_handle.await.unwrap();
        assert_eq!(qm.test_status(t2).await.unwrap().state, TestState::Completed);
    }

    /// A test cancelled while parked in `wait_for_turn` (already Loaded,
    /// not yet scheduled) must make `drive` return instead of looping
    /// forever once its registry entry disappears.
    #[tokio::test]
    async fn drive_returns_when_cancelled_while_waiting_for_turn() {
        let qm = std::sync::Arc::new(QueueManager::new());
        let driver = std::sync::Arc::new(make_driver());
        let tmp1 = tempfile::tempdir().unwrap();
        let tmp2 = tempfile::tempdir().unwrap();

        let t1 = qm.initialize_test().await;
        let t2 = qm.initialize_test().await;
        qm.start_test(t1, bundle_bucket(&tmp1), None).await.unwrap();
        qm.start_test(t2, bundle_bucket(&tmp2), None).await.unwrap();

        let (qm2, driver2) = (qm.clone(), driver.clone());
        let t2_handle = tokio::spawn(async move { qm2.drive(t2, &driver2).await });

        for _ in 0..50 {
            if qm.test_status(t2).await.unwrap().state == TestState::Loaded {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(qm.test_status(t2).await.unwrap().state, TestState::Loaded);

        let outcome = qm.cancel(t2).await.unwrap();
        assert!(outcome.cancelled);
        qm.test_stopping(t2).await;

        tokio::time::timeout(std::time::Duration::from_secs(2), t2_handle)
            .await
            .expect("drive should return once its entry is cancelled")
            .unwrap();
    }
}

