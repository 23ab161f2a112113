//! # Flow Errors
//!
//! Crate-wide error taxonomy. Expected, caller-facing conditions (a missing
//! flow, a denied approval, an over-limit request) are kept apart from
//! corrupted-state conditions (`ConsistencyViolation`) so callers and the
//! background loops never confuse a retryable failure with a local bug.

use std::borrow::Cow;
use thiserror::Error;

use crate::engine::condition::ConditionError;
use crate::execution::worker_pool::PoolError;
use crate::state_machine::errors::StateMachineError;

/// Result alias used across the crate
pub type FlowResult<T> = Result<T, FlowError>;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("{resource} not found: {key}={value}")]
    NotFound {
        resource: Cow<'static, str>,
        key: Cow<'static, str>,
        value: String,
    },

    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Corrupted state: zero or several "current" nodes, several flows bound
    /// to one process run, an update that touched the wrong number of rows.
    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Over limit: {metric} exceeds {limit}: {message}")]
    OverLimit {
        metric: &'static str,
        limit: u64,
        message: String,
    },

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("The current task has been completed and cannot be terminated, flow_instance_id={0}")]
    FinishedTaskNotTerminable(i64),

    #[error("Remote dispatch to {host}:{port} failed: {message}")]
    RemoteDispatch {
        host: String,
        port: u16,
        message: String,
    },

    #[error("Process engine error: {0}")]
    Engine(String),

    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FlowError {
    pub fn not_found(resource: &'static str, key: &'static str, value: impl ToString) -> Self {
        Self::NotFound {
            resource: Cow::Borrowed(resource),
            key: Cow::Borrowed(key),
            value: value.to_string(),
        }
    }

    pub fn consistency(message: impl Into<String>) -> Self {
        Self::ConsistencyViolation(message.into())
    }

    pub fn remote(host: &str, port: u16, message: impl Into<String>) -> Self {
        Self::RemoteDispatch {
            host: host.to_string(),
            port,
            message: message.into(),
        }
    }

    /// Local bug or corrupted data; never retried automatically
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConsistencyViolation(_))
    }

    /// Transient failures the background loops may retry on the next attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Persistence(_) | Self::RemoteDispatch { .. } | Self::Io(_)
        )
    }

    /// Stable machine-readable kind, used in forwarded error envelopes
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NotFound",
            Self::AccessDenied(_) => "AccessDenied",
            Self::ConsistencyViolation(_) => "ConsistencyViolation",
            Self::Validation(_) => "Validation",
            Self::OverLimit { .. } => "OverLimit",
            Self::Unsupported(_) => "Unsupported",
            Self::FinishedTaskNotTerminable(_) => "FinishedTaskNotTerminable",
            Self::RemoteDispatch { .. } => "RemoteDispatch",
            Self::Engine(_) => "Engine",
            Self::StateMachine(_) => "StateMachine",
            Self::Persistence(_) => "Persistence",
            Self::Configuration(_) => "Configuration",
            Self::Io(_) => "Io",
            Self::Serialization(_) => "Serialization",
            Self::Internal(_) => "Internal",
        }
    }
}

impl From<sqlx::Error> for FlowError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<config::ConfigError> for FlowError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<ConditionError> for FlowError {
    fn from(err: ConditionError) -> Self {
        Self::Engine(err.to_string())
    }
}

impl From<PoolError> for FlowError {
    fn from(err: PoolError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<reqwest::Error> for FlowError {
    fn from(err: reqwest::Error) -> Self {
        let (host, port) = err
            .url()
            .map(|url| {
                (
                    url.host_str().unwrap_or_default().to_string(),
                    url.port_or_known_default().unwrap_or_default(),
                )
            })
            .unwrap_or_default();
        Self::RemoteDispatch {
            host,
            port,
            message: err.to_string(),
        }
    }
}

/// Fails with a consistency violation unless `items` holds exactly one element
pub fn verify_singleton<T>(mut items: Vec<T>, what: &str) -> FlowResult<T> {
    match items.len() {
        1 => Ok(items.remove(0)),
        n => Err(FlowError::consistency(format!(
            "{what} is expected to be singleton, found {n}"
        ))),
    }
}

/// Consistency check shorthand
pub fn verify(condition: bool, message: impl Into<String>) -> FlowResult<()> {
    if condition {
        Ok(())
    } else {
        Err(FlowError::consistency(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(FlowError::consistency("two current nodes").is_fatal());
        assert!(!FlowError::consistency("two current nodes").is_retryable());
        assert!(FlowError::Persistence("deadlock".into()).is_retryable());
        assert!(FlowError::remote("10.0.0.2", 8989, "timeout").is_retryable());
        assert!(!FlowError::AccessDenied("not creator".into()).is_retryable());
        assert!(!FlowError::not_found("FlowInstance", "id", 1).is_fatal());
    }

    #[test]
    fn test_verify_singleton() {
        assert_eq!(verify_singleton(vec![7], "ApprovalInstance").unwrap(), 7);

        let err = verify_singleton(Vec::<i32>::new(), "ApprovalInstance").unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("found 0"));

        let err = verify_singleton(vec![1, 2], "ApprovalInstance").unwrap_err();
        assert!(err.to_string().contains("found 2"));
    }

    #[test]
    fn test_error_display() {
        let err = FlowError::not_found("FlowInstance", "id", 42);
        assert_eq!(err.to_string(), "FlowInstance not found: id=42");
        assert_eq!(err.kind(), "NotFound");

        let err = FlowError::FinishedTaskNotTerminable(3);
        assert_eq!(err.kind(), "FinishedTaskNotTerminable");
    }
}
