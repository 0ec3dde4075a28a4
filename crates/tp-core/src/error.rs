//! The closed `ErrorKind` sum (spec §7) and its mapping onto HTTP status
//! codes for the REST surface.

use serde::{Deserialize, Serialize};

/// Every failure in the control plane maps to exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    #[error("actor system not ready")]
    ActorSystemNotReady,
    #[error("internal ask exceeded its deadline")]
    ServiceTimeout,
    #[error("service is degraded or circuit-broken")]
    ServiceUnavailable,
    #[error("malformed storage URI")]
    BucketUriParse,
    #[error("bundle has no features/ directory")]
    MissingFeaturesDirectory,
    #[error("bundle features/ directory is empty")]
    EmptyFeaturesDirectory,
    #[error("bundle is missing its topic-directive manifest")]
    MissingTopicDirectiveFile,
    #[error("topic-directive manifest failed schema validation")]
    InvalidTopicDirectiveFormat,
    #[error("storage transport failure")]
    StorageTransport,
    #[error("vault authentication failed")]
    VaultAuth,
    #[error("vault secret not found")]
    VaultNotFound,
    #[error("vault rate limit exceeded")]
    VaultRateLimit,
    #[error("vault service unavailable")]
    VaultServiceUnavailable,
    #[error("vault request timed out")]
    VaultTimeout,
    #[error("vault response did not satisfy the credential mapping")]
    VaultMapping,
    #[error("template referenced a disallowed configuration path")]
    TemplateSecurity,
    #[error("schema not found in schema registry")]
    SchemaNotFound,
    #[error("serializer failure")]
    SerializerFailure,
    #[error("cucumber run failed")]
    CucumberFailure,
    #[error("service builder lifecycle failed")]
    FatalBooting,
}

impl ErrorKind {
    /// Whether the VaultWorker retry loop (spec §4.5) may retry this kind.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::VaultRateLimit
                | ErrorKind::VaultServiceUnavailable
                | ErrorKind::VaultTimeout
                | ErrorKind::StorageTransport
        )
    }

    /// The HTTP status code a REST handler should surface for this kind,
    /// per spec §6.1 / §7.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::ActorSystemNotReady | ErrorKind::ServiceUnavailable => 503,
            ErrorKind::ServiceTimeout | ErrorKind::VaultTimeout => 504,
            ErrorKind::BucketUriParse
            | ErrorKind::MissingFeaturesDirectory
            | ErrorKind::EmptyFeaturesDirectory
            | ErrorKind::MissingTopicDirectiveFile
            | ErrorKind::InvalidTopicDirectiveFormat
            | ErrorKind::TemplateSecurity => 422,
            ErrorKind::StorageTransport
            | ErrorKind::VaultAuth
            | ErrorKind::VaultNotFound
            | ErrorKind::VaultRateLimit
            | ErrorKind::VaultServiceUnavailable
            | ErrorKind::VaultMapping
            | ErrorKind::SchemaNotFound
            | ErrorKind::SerializerFailure => 502,
            ErrorKind::CucumberFailure => 200,
            ErrorKind::FatalBooting => 500,
        }
    }

    /// Whether this kind carries a `Retry-After` hint (spec §6.1).
    pub fn retry_after_secs(self) -> Option<u64> {
        match self {
            ErrorKind::ActorSystemNotReady | ErrorKind::ServiceUnavailable => Some(5),
            _ => None,
        }
    }
}

/// A failure surfaced to a caller: always carries the machine-readable
/// `ErrorKind` tag plus a human-readable message. Never carries a vault
/// response body (spec §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestProbeError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TestProbeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TestProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TestProbeError {}
