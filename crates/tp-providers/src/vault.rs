//! `VaultWorker` (spec §4.5): fans out one request per `TopicDirective` in
//! parallel, composing results in list order, with a retry state machine
//! bounded by a deadline threaded from the caller (spec §9 "Retry
//! composition").

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tp_core::error::{ErrorKind, TestProbeError};
use tp_core::secrets::Redacted;
use tp_core::types::{BlockStorageDirective, KafkaSecurityDirective, SecurityProtocol, TopicDirective};

use crate::jaas;

/// The provider-facing seam: HTTP POST, function invocation, or RPC,
/// abstracted to a single async call that returns the raw response body
/// or a mapped `ErrorKind` (spec §4.5 step 2–3).
#[async_trait::async_trait]
pub trait VaultProvider: Send + Sync {
    async fn invoke(&self, request_body: serde_json::Value) -> Result<serde_json::Value, TestProbeError>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// `K` in spec §4.5: the number of retries *after* the initial
    /// attempt, so a request that fails `max_retries` times in a row and
    /// then succeeds makes `max_retries + 1` total provider calls.
    pub max_retries: u32,
    /// `initial` in the linear backoff `initial * attempt`.
    pub initial_backoff: Duration,
    /// Upper bound on total time spent retrying one topic, independent of
    /// the TestExecutor's own Loading-state timeout (spec §9 "Retry
    /// composition").
    pub deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
            deadline: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// `max_retries` comes from `test-execution.max-retries` (spec §6.6);
    /// backoff and deadline are not yet exposed as separate config keys
    /// and use sensible fixed defaults.
    pub fn from_config(config: &tp_core::config::Config) -> Self {
        Self {
            max_retries: config.test_execution.max_retries,
            ..Self::default()
        }
    }
}

/// A Rosetta mapping file: request template + response mapping (spec
/// §6.5).
#[derive(Debug, Clone)]
pub struct RosettaMapping {
    pub request_template: serde_json::Value,
    pub mappings: Vec<tp_template::MappingSpec>,
    pub required: Vec<String>,
}

enum Backend {
    /// spec §4.5 "Local provider special case": no network traffic, no
    /// retries, empty `jaasConfig`.
    Local,
    Remote(Arc<dyn VaultProvider>),
}

pub struct VaultWorker {
    backend: Backend,
    mapping: RosettaMapping,
    retry: RetryPolicy,
    config: tp_core::config::Config,
    oauth_endpoint: String,
    oauth_scope: Option<String>,
}

impl VaultWorker {
    pub fn local(config: tp_core::config::Config) -> Self {
        Self {
            backend: Backend::Local,
            mapping: RosettaMapping {
                request_template: serde_json::json!({}),
                mappings: vec![],
                required: vec![],
            },
            retry: RetryPolicy::default(),
            config,
            oauth_endpoint: String::new(),
            oauth_scope: None,
        }
    }

    pub fn remote(
        provider: Arc<dyn VaultProvider>,
        mapping: RosettaMapping,
        retry: RetryPolicy,
        config: tp_core::config::Config,
        oauth_endpoint: impl Into<String>,
        oauth_scope: Option<String>,
    ) -> Self {
        Self {
            backend: Backend::Remote(provider),
            mapping,
            retry,
            config,
            oauth_endpoint: oauth_endpoint.into(),
            oauth_scope,
        }
    }

    /// Fan out one request per topic directive in parallel, preserving
    /// list order in the result (spec §4.5).
    pub async fn fetch_security_directives(
        &self,
        block_storage: &BlockStorageDirective,
    ) -> Result<Vec<KafkaSecurityDirective>, TestProbeError> {
        let futures = block_storage
            .topic_directives
            .iter()
            .map(|t| self.fetch_one(t));
        let results = join_all(futures).await;
        results.into_iter().collect()
    }

    async fn fetch_one(&self, topic: &TopicDirective) -> Result<KafkaSecurityDirective, TestProbeError> {
        match &self.backend {
            Backend::Local => Ok(KafkaSecurityDirective {
                topic: topic.topic.clone(),
                role: topic.role,
                protocol: SecurityProtocol::Plaintext,
                jaas_config: Redacted::new(String::new()),
            }),
            Backend::Remote(provider) => self.fetch_remote(provider.as_ref(), topic).await,
        }
    }

    async fn fetch_remote(
        &self,
        provider: &dyn VaultProvider,
        topic: &TopicDirective,
    ) -> Result<KafkaSecurityDirective, TestProbeError> {
        let request_body =
            tp_template::substitute(&self.mapping.request_template, topic, &self.config).map_err(
                |e| TestProbeError::new(ErrorKind::TemplateSecurity, e.to_string()),
            )?;

        let response = self.call_with_retry(provider, request_body).await?;

        let mapped = tp_template::apply_mappings(&response, &self.mapping.mappings, &self.mapping.required)
            .map_err(|e| TestProbeError::new(ErrorKind::VaultMapping, e.to_string()))?;

        let client_id = mapped.get("clientId").cloned().unwrap_or_default();
        let client_secret = mapped.get("clientSecret").cloned().unwrap_or_default();
        let endpoint = mapped
            .get("tokenEndpoint")
            .cloned()
            .unwrap_or_else(|| self.oauth_endpoint.clone());
        let scope = mapped
            .get("scope")
            .cloned()
            .or_else(|| self.oauth_scope.clone());

        let jaas = jaas::build(&client_id, &client_secret, &endpoint, scope.as_deref())?;

        Ok(KafkaSecurityDirective {
            topic: topic.topic.clone(),
            role: topic.role,
            protocol: SecurityProtocol::SaslSsl,
            jaas_config: Redacted::new(jaas),
        })
    }

    /// Retry loop: never retries authentication/not-found/mapping errors;
    /// retries rate-limit/service-unavailable/timeout up to
    /// `max_retries` times after the initial attempt, with
    /// `initial * attempt` linear backoff (spec §4.5), bounded overall by
    /// `deadline`.
    async fn call_with_retry(
        &self,
        provider: &dyn VaultProvider,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, TestProbeError> {
        let deadline = tokio::time::Instant::now() + self.retry.deadline;
        let mut retries_used = 0u32;
        loop {
            let outcome = provider.invoke(body.clone()).await;
            match outcome {
                Ok(response) => return Ok(response),
                Err(err) if err.kind.is_retryable() && retries_used < self.retry.max_retries => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(err);
                    }
                    retries_used += 1;
                    let backoff = self.retry.initial_backoff * retries_used;
                    tracing::warn!(
                        attempt = retries_used,
                        kind = ?err.kind,
                        backoff_ms = backoff.as_millis() as u64,
                        "vault call failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
