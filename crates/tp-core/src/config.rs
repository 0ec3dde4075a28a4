//! Process-wide configuration store (spec §6.6).
//!
//! Loaded once at startup from TOML, read-only thereafter (spec §5 "Shared
//! resources"). `request-params.*` is the only namespace the TemplateEngine
//! may address (spec §4.7).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(rename = "actor-system", default)]
    pub actor_system: ActorSystemConfig,
    #[serde(default)]
    pub supervision: SupervisionConfig,
    #[serde(rename = "test-execution", default)]
    pub test_execution: TestExecutionConfig,
    #[serde(default)]
    pub timers: TimersConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub kafka: KafkaConfig,
    #[serde(rename = "request-params", default)]
    pub request_params: toml::value::Table,
    #[serde(default)]
    pub interface: InterfaceConfig,
}

impl Config {
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Look up a dotted path under `request-params.*`, the only namespace
    /// the TemplateEngine is permitted to read (spec §4.7 security
    /// invariants). `path` does *not* include the `request-params.`
    /// prefix — callers strip it before calling.
    pub fn lookup_request_param(&self, path: &str) -> Option<String> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.request_params.get(first)?;
        for seg in segments {
            current = current.as_table()?.get(seg)?;
        }
        toml_value_to_string(current)
    }

    /// Aggregate validation (spec §6.6: "Invalid configuration causes
    /// startup to fail with an aggregated list of violations").
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut violations = Vec::new();

        if self.supervision.max_restarts == 0 {
            violations.push("supervision.max-restarts must be > 0".to_string());
        }
        if self.supervision.restart_time_range_secs == 0 {
            violations.push("supervision.restart-time-range must be > 0".to_string());
        }
        if self.test_execution.max_retries == 0 {
            violations.push("test-execution.max-retries must be > 0".to_string());
        }
        if self.storage.topic_directive_file_name.trim().is_empty() {
            violations.push("storage.topic-directive-file-name must not be empty".to_string());
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(violations))
        }
    }
}

fn toml_value_to_string(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("invalid configuration: {0:?}")]
    Invalid(Vec<String>),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorSystemConfig {
    #[serde(default = "default_actor_system_name")]
    pub name: String,
    #[serde(default = "default_actor_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(rename = "shutdown-timeout", default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    #[serde(
        rename = "initialization-timeout",
        default = "default_init_timeout_secs"
    )]
    pub initialization_timeout_secs: u64,
    #[serde(rename = "pool-size", default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(
        rename = "max-execution-time",
        default = "default_max_execution_time_secs"
    )]
    pub max_execution_time_secs: u64,
}

impl Default for ActorSystemConfig {
    fn default() -> Self {
        Self {
            name: default_actor_system_name(),
            timeout_secs: default_actor_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            initialization_timeout_secs: default_init_timeout_secs(),
            pool_size: default_pool_size(),
            max_execution_time_secs: default_max_execution_time_secs(),
        }
    }
}

fn default_actor_system_name() -> String {
    "test-probe".into()
}
fn default_actor_timeout_secs() -> u64 {
    30
}
fn default_shutdown_timeout_secs() -> u64 {
    15
}
fn default_init_timeout_secs() -> u64 {
    30
}
fn default_pool_size() -> usize {
    4
}
fn default_max_execution_time_secs() -> u64 {
    600
}

/// Guardian restart-budget configuration (spec §4.1: `N` restarts within
/// window `W`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisionConfig {
    #[serde(rename = "max-restarts", default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(
        rename = "restart-time-range",
        default = "default_restart_time_range_secs"
    )]
    pub restart_time_range_secs: u64,
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        Self {
            max_restarts: default_max_restarts(),
            restart_time_range_secs: default_restart_time_range_secs(),
        }
    }
}

fn default_max_restarts() -> u32 {
    10
}
fn default_restart_time_range_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestExecutionConfig {
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(rename = "cleanup-delay", default = "default_cleanup_delay_secs")]
    pub cleanup_delay_secs: u64,
    #[serde(
        rename = "stash-buffer-size",
        default = "default_stash_buffer_size"
    )]
    pub stash_buffer_size: usize,
}

impl Default for TestExecutionConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            cleanup_delay_secs: default_cleanup_delay_secs(),
            stash_buffer_size: default_stash_buffer_size(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_cleanup_delay_secs() -> u64 {
    5
}
fn default_stash_buffer_size() -> usize {
    64
}

/// Per-state poison-pill timeouts (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimersConfig {
    #[serde(rename = "setup-state", default = "default_setup_timer_secs")]
    pub setup_state_secs: u64,
    #[serde(rename = "loading-state", default = "default_loading_timer_secs")]
    pub loading_state_secs: u64,
    #[serde(rename = "completed-state", default = "default_completed_timer_secs")]
    pub completed_state_secs: u64,
    #[serde(rename = "exception-state", default = "default_exception_timer_secs")]
    pub exception_state_secs: u64,
}

impl Default for TimersConfig {
    fn default() -> Self {
        Self {
            setup_state_secs: default_setup_timer_secs(),
            loading_state_secs: default_loading_timer_secs(),
            completed_state_secs: default_completed_timer_secs(),
            exception_state_secs: default_exception_timer_secs(),
        }
    }
}

fn default_setup_timer_secs() -> u64 {
    60
}
fn default_loading_timer_secs() -> u64 {
    120
}
fn default_completed_timer_secs() -> u64 {
    30
}
fn default_exception_timer_secs() -> u64 {
    30
}

impl TimersConfig {
    pub fn to_state_timeouts(&self) -> crate::types::StateTimeouts {
        crate::types::StateTimeouts {
            setup: std::time::Duration::from_secs(self.setup_state_secs),
            loading: std::time::Duration::from_secs(self.loading_state_secs),
            completed: std::time::Duration::from_secs(self.completed_state_secs),
            exception: std::time::Duration::from_secs(self.exception_state_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_provider")]
    pub provider: String,
    #[serde(
        rename = "topic-directive-file-name",
        default = "default_topic_directive_file_name"
    )]
    pub topic_directive_file_name: String,
    #[serde(default = "default_storage_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(flatten)]
    pub provider_specific: HashMap<String, toml::Value>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: default_storage_provider(),
            topic_directive_file_name: default_topic_directive_file_name(),
            timeout_secs: default_storage_timeout_secs(),
            provider_specific: HashMap::new(),
        }
    }
}

fn default_storage_provider() -> String {
    "local".into()
}
fn default_topic_directive_file_name() -> String {
    "topic-directives.yaml".into()
}
fn default_storage_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    #[serde(default = "default_vault_provider")]
    pub provider: String,
    #[serde(
        rename = "rosetta-mapping-path",
        default = "default_rosetta_mapping_path"
    )]
    pub rosetta_mapping_path: String,
    #[serde(default)]
    pub oauth: OauthConfig,
    #[serde(flatten)]
    pub provider_specific: HashMap<String, toml::Value>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            provider: default_vault_provider(),
            rosetta_mapping_path: default_rosetta_mapping_path(),
            oauth: OauthConfig::default(),
            provider_specific: HashMap::new(),
        }
    }
}

fn default_vault_provider() -> String {
    "local".into()
}
fn default_rosetta_mapping_path() -> String {
    "rosetta.json".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OauthConfig {
    #[serde(rename = "token-endpoint", default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KafkaConfig {
    #[serde(rename = "bootstrap-servers", default)]
    pub bootstrap_servers: Option<String>,
    #[serde(rename = "schema-registry-url", default)]
    pub schema_registry_url: Option<String>,
    #[serde(default)]
    pub oauth: OauthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfig {
    #[serde(default = "default_interface_host")]
    pub host: String,
    #[serde(default = "default_interface_port")]
    pub port: u16,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            host: default_interface_host(),
            port: default_interface_port(),
        }
    }
}

fn default_interface_host() -> String {
    "0.0.0.0".into()
}
fn default_interface_port() -> u16 {
    8080
}
