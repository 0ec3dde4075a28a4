//! Guardian — the root supervisor (spec §4.1).
//!
//! Tracks a sliding restart-budget window the way the teacher's supervision
//! layer tracks heartbeats: plain timestamps in a bounded buffer, pruned on
//! every check rather than via a background timer.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tp_core::config::SupervisionConfig;
use tp_core::error::{ErrorKind, TestProbeError};
use tp_core::types::StateTimeouts;

use crate::queue::QueueManager;

/// How the Guardian categorizes a child failure (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    /// Bad input — resume without state loss.
    Validation,
    /// Transient — restart, preserving identity.
    Recoverable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GuardianMode {
    NotInitialized,
    Running,
    Degraded,
}

struct Inner {
    mode: GuardianMode,
    queue_manager: Option<Arc<QueueManager>>,
    restart_timestamps: VecDeque<Instant>,
}

/// Root supervisor. A single `Initialize` call idempotently brings up the
/// QueueManager; after that, `restart_budget_exceeded` is the only way the
/// Guardian's own mode changes.
pub struct Guardian {
    config: SupervisionConfig,
    timeouts: StateTimeouts,
    inner: Mutex<Inner>,
}

impl Guardian {
    pub fn new(config: SupervisionConfig) -> Self {
        Self {
            config,
            timeouts: StateTimeouts::default(),
            inner: Mutex::new(Inner {
                mode: GuardianMode::NotInitialized,
                queue_manager: None,
                restart_timestamps: VecDeque::new(),
            }),
        }
    }

    /// Use `timeouts` (typically loaded from config) for every QueueManager
    /// this Guardian brings up, instead of the hardcoded defaults.
    pub fn with_timeouts(mut self, timeouts: StateTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Idempotently bring up the QueueManager. A second call is a no-op
    /// that returns the existing handle and logs a warning (spec §4.1
    /// "Idempotence").
    pub async fn initialize(&self) -> Arc<QueueManager> {
        let mut guard = self.inner.lock().await;
        if let Some(existing) = &guard.queue_manager {
            tracing::warn!("Guardian already initialized; returning existing QueueManager");
            return existing.clone();
        }
        let qm = QueueManager::spawn(self.timeouts);
        guard.queue_manager = Some(qm.clone());
        guard.mode = GuardianMode::Running;
        tracing::info!("Guardian initialized QueueManager");
        qm
    }

    /// `GetQueueActor` (spec §4.1): fails with `ActorSystemNotReady` if
    /// called before `Initialize`, or once the Guardian has escalated into
    /// degraded mode.
    pub async fn get_queue_actor(&self) -> Result<Arc<QueueManager>, TestProbeError> {
        let guard = self.inner.lock().await;
        match (&guard.mode, &guard.queue_manager) {
            (GuardianMode::Running, Some(qm)) => Ok(qm.clone()),
            (GuardianMode::Degraded, _) => {
                Err(TestProbeError::new(ErrorKind::ServiceUnavailable, "guardian is in degraded mode"))
            }
            _ => Err(TestProbeError::new(ErrorKind::ActorSystemNotReady, "Initialize has not completed")),
        }
    }

    /// Record a child failure and decide the supervision response. Returns
    /// `Ok(())` when the child should resume/restart normally, or
    /// `Err(ServiceUnavailable)` once the restart budget within the
    /// window is exhausted and the Guardian escalates to degraded mode
    /// (spec §4.1: `N=10` restarts within `W=60s` by default).
    pub async fn record_child_failure(&self, category: FailureCategory) -> Result<(), TestProbeError> {
        if category == FailureCategory::Validation {
            // Resumed without touching the restart budget.
            return Ok(());
        }

        let mut guard = self.inner.lock().await;
        let now = Instant::now();
        let window = Duration::from_secs(self.config.restart_time_range_secs);
        while let Some(&front) = guard.restart_timestamps.front() {
            if now.duration_since(front) > window {
                guard.restart_timestamps.pop_front();
            } else {
                break;
            }
        }
        guard.restart_timestamps.push_back(now);

        if guard.restart_timestamps.len() as u32 > self.config.max_restarts {
            guard.mode = GuardianMode::Degraded;
            tracing::error!(
                max_restarts = self.config.max_restarts,
                window_secs = self.config.restart_time_range_secs,
                "restart budget exceeded; entering degraded mode"
            );
            return Err(TestProbeError::new(
                ErrorKind::ServiceUnavailable,
                "restart budget exceeded; admissions refused",
            ));
        }
        Ok(())
    }

    pub async fn is_degraded(&self) -> bool {
        matches!(self.inner.lock().await.mode, GuardianMode::Degraded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SupervisionConfig {
        SupervisionConfig {
            max_restarts: 2,
            restart_time_range_secs: 60,
        }
    }

    #[tokio::test]
    async fn get_queue_actor_fails_before_initialize() {
        let guardian = Guardian::new(test_config());
        let err = guardian.get_queue_actor().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ActorSystemNotReady);
    }

    #[tokio::test]
    async fn second_initialize_returns_same_handle() {
        let guardian = Guardian::new(test_config());
        let first = guardian.initialize().await;
        let second = guardian.initialize().await;
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn exceeding_restart_budget_enters_degraded_mode() {
        let guardian = Guardian::new(test_config());
        guardian.initialize().await;
        guardian.record_child_failure(FailureCategory::Recoverable).await.unwrap();
        guardian.record_child_failure(FailureCategory::Recoverable).await.unwrap();
        let err = guardian
            .record_child_failure(FailureCategory::Recoverable)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ServiceUnavailable);
        assert!(guardian.is_degraded().await);
        let err = guardian.get_queue_actor().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ServiceUnavailable);
    }

    #[tokio::test]
    async fn validation_failures_never_consume_restart_budget() {
        let guardian = Guardian::new(test_config());
        guardian.initialize().await;
        for _ in 0..10 {
            guardian.record_child_failure(FailureCategory::Validation).await.unwrap();
        }
        assert!(!guardian.is_degraded().await);
    }
}
