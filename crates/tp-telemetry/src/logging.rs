use std::str::FromStr;
use tracing_subscriber::{fmt, EnvFilter};

/// Which layout `init_logging` renders events in. Selectable per-call or
/// from `TEST_PROBE_LOG_FORMAT` so an operator can flip a running
/// deployment to JSON without a code change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Readable on a terminal: target, file, and line number inline.
    Human,
    /// One JSON object per line, for shipping to a log aggregator.
    Json,
}

impl LogFormat {
    /// `format` wins if given; otherwise read `TEST_PROBE_LOG_FORMAT`,
    /// falling back to `Human` if it's unset or unrecognized.
    pub fn resolve(format: Option<LogFormat>) -> LogFormat {
        format.unwrap_or_else(|| {
            std::env::var("TEST_PROBE_LOG_FORMAT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(LogFormat::Human)
        })
    }
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "human" | "text" => Ok(LogFormat::Human),
            _ => Err(()),
        }
    }
}

/// Stand up `tracing`'s global subscriber for `service_name`. Uses
/// `RUST_LOG` if set, otherwise `default_level` (e.g. "info",
/// "tp_control=debug,warn"). Safe to call more than once — later calls are
/// no-ops, since a second process-wide subscriber can't be installed
/// anyway.
pub fn init_logging(service_name: &str, default_level: &str, format: Option<LogFormat>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let format = LogFormat::resolve(format);

    let installed = match format {
        LogFormat::Human => fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .try_init(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(true)
            .try_init(),
    }
    .is_ok();

    if installed {
        tracing::info!(service = service_name, format = ?format, "logging initialised");
    }
}
