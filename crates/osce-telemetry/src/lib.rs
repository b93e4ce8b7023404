mod audit;

pub use audit::{AuditLayer, AuditQuery, AuditRecord, AuditSink, AUDIT_TARGET};

use std::path::PathBuf;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "osce_engine" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines on stderr instead of human-readable output.
    pub json: bool,
    /// Whether to persist warn+ logs and audit decisions to SQLite.
    pub audit_to_sqlite: bool,
    pub audit_db_path: PathBuf,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
            audit_to_sqlite: true,
            audit_db_path: home_fallback().join("database/audit.db"),
        }
    }
}

/// Keeps the audit sink reachable for the lifetime of the process.
pub struct TelemetryGuard {
    audit_sink: Option<Arc<AuditSink>>,
}

impl TelemetryGuard {
    /// Access the audit sink for querying persisted decisions.
    pub fn audit(&self) -> Option<&AuditSink> {
        self.audit_sink.as_deref()
    }
}

fn filter_directive(config: &TelemetryConfig) -> String {
    let mut filter = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter
}

/// Initialize the telemetry subsystem. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directive(&config)));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let (audit_layer, audit_sink) = if config.audit_to_sqlite {
        match AuditSink::open(&config.audit_db_path) {
            Ok(sink) => {
                let sink = Arc::new(sink);
                (Some(AuditLayer::new(sink.clone())), Some(sink))
            }
            Err(e) => {
                eprintln!("osce-telemetry: failed to open audit DB: {e}");
                (None, None)
            }
        }
    } else {
        (None, None)
    };

    let installed = tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .with(audit_layer)
        .try_init();
    if let Err(e) = installed {
        eprintln!("osce-telemetry: subscriber already installed: {e}");
    }

    TelemetryGuard { audit_sink }
}

fn home_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".osce")
}
