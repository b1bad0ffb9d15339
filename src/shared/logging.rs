use chrono::Local;
use std::fmt::Display;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_LEVEL_ENV: &str = "MONGODB_PROVIDER_LOG_LEVEL";

/// Set by Terraform when the plugin framework writes its own log file.
pub const PLUGIN_LOG_FILE_ENV: &str = "PLUGIN_LOG_FILE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warning => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

impl LogLevel {
    /// Lenient parse of a level name; unknown names fall back to info.
    pub fn from_setting(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "warn" | "warning" => LogLevel::Warning,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// Default filter when `RUST_LOG` is not set.
pub fn default_directives(level: LogLevel) -> String {
    format!(
        "tfmongodb={level},terraform_provider_mongodb={level},mongodb=warn,tf_provider=warn"
    )
}

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// Install the stderr subscriber.
///
/// Stdout carries the plugin handshake, so nothing may be logged there. When
/// Terraform asks the plugin framework for a log file, the framework installs
/// its own subscriber and this is a no-op. Returns whether a subscriber was
/// installed by this call.
pub fn init() -> bool {
    if std::env::var_os(PLUGIN_LOG_FILE_ENV).is_some() {
        return false;
    }

    let level = LogLevel::from_setting(
        &std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string()),
    );

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_directives(level))),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_timer(LocalTimer),
        )
        .try_init()
        .is_ok()
}
