//! Shared logging utilities for consistent tracing across the wall

use chrono::{DateTime, Utc};
use tracing::{error, info};

/// Initialize the stdout tracing subscriber.
///
/// `RUST_LOG` takes precedence; otherwise the engine crates log at `log_level`
/// and everything else at `warn`.
pub fn init_tracing(log_level: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let level_filter = format!("warn,camwall={log_level},shared={log_level}");
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level_filter));

    fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

/// Get formatted timestamp for consistent logging
pub fn format_timestamp() -> String {
    let now: DateTime<Utc> = Utc::now();
    now.format("%H:%M:%S%.3f").to_string()
}

/// Strip credentials from a stream URL before it reaches a log line
pub fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            if !parsed.username().is_empty() || parsed.password().is_some() {
                let _ = parsed.set_password(None);
                let _ = parsed.set_username("***");
            }
            parsed.to_string()
        }
        Err(_) => "<invalid url>".to_string(),
    }
}

/// Macro for camera-aware info logging
#[macro_export]
macro_rules! camera_info {
    ($camera:expr, $($arg:tt)*) => {
        tracing::info!(
            camera = %$camera,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for camera-aware warning logging
#[macro_export]
macro_rules! camera_warn {
    ($camera:expr, $($arg:tt)*) => {
        tracing::warn!(
            camera = %$camera,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for camera-aware error logging
#[macro_export]
macro_rules! camera_error {
    ($camera:expr, $($arg:tt)*) => {
        tracing::error!(
            camera = %$camera,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for camera-aware debug logging
#[macro_export]
macro_rules! camera_debug {
    ($camera:expr, $($arg:tt)*) => {
        tracing::debug!(
            camera = %$camera,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Contextual logging helper for startup messages
pub fn log_startup(details: &str) {
    info!(timestamp = format_timestamp(), "🚀 Starting {}", details);
}

/// Contextual logging helper for shutdown messages
pub fn log_shutdown(reason: &str) {
    info!(timestamp = format_timestamp(), "🛑 Shutting down: {}", reason);
}

/// Contextual logging helper for error conditions
pub fn log_error(context: &str, error: &dyn std::fmt::Display) {
    error!(
        timestamp = format_timestamp(),
        error = %error,
        "❌ {} failed: {}",
        context,
        error
    );
}

/// Contextual logging helper for success conditions
pub fn log_success(message: &str) {
    info!(timestamp = format_timestamp(), "✅ {}", message);
}
