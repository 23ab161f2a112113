//! # Logging
//!
//! One `tracing` subscriber per process, filtered by `RUST_LOG` or by the
//! `FLOWGATE_ENV` default, and formatted for humans unless
//! `FLOWGATE_LOG_FORMAT=json`. The helpers below give service operations,
//! forwards and background failures a uniform record shape.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static SUBSCRIBER: OnceLock<LogFormat> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}

impl LogFormat {
    fn from_env() -> Self {
        match std::env::var("FLOWGATE_LOG_FORMAT") {
            Ok(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Human,
        }
    }
}

/// Install the process-wide subscriber; later calls are no-ops
pub fn init_structured_logging() -> LogFormat {
    *SUBSCRIBER.get_or_init(|| {
        let environment = get_environment();
        let format = LogFormat::from_env();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level(&environment)));

        let base = fmt::layer().with_target(true).with_thread_ids(true);
        let layer = match format {
            LogFormat::Json => base.json().with_filter(filter).boxed(),
            LogFormat::Human => base.with_ansi(true).with_filter(filter).boxed(),
        };

        // The embedding process may own the global subscriber
        if let Err(e) = tracing_subscriber::registry().with(layer).try_init() {
            tracing::debug!(error = %e, "keeping the existing tracing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            format = ?format,
            "🔧 Logging ready"
        );
        format
    })
}

/// Deployment environment, `development` unless `FLOWGATE_ENV` says otherwise
pub(crate) fn get_environment() -> String {
    std::env::var("FLOWGATE_ENV").unwrap_or_else(|_| "development".to_string())
}

fn default_level(environment: &str) -> &'static str {
    match environment {
        "production" | "staging" => "info",
        _ => "debug",
    }
}

/// Uniform record for create/approve/reject/cancel/confirm and friends
pub fn log_flow_operation(
    operation: &str,
    flow_instance_id: Option<i64>,
    user_id: Option<i64>,
    outcome: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation,
        flow_instance_id,
        user_id,
        outcome,
        details,
        at = %Utc::now().to_rfc3339(),
        "📋 flow operation"
    );
}

/// Record of one request relayed to another node
pub fn log_dispatch_operation(
    operation: &str,
    host: &str,
    port: u16,
    outcome: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation,
        host,
        port,
        outcome,
        details,
        at = %Utc::now().to_rfc3339(),
        "🌉 dispatch"
    );
}

/// Failure with no caller to report to, such as a background pass
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(component, operation, error, context, "❌ {component} {operation} failed");
}
