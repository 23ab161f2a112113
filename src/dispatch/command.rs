//! # Forwardable Commands
//!
//! Typed form of every request that may have to run on another node, and its
//! mapping onto the REST-style paths the receiving node understands.

use serde_json::json;

use super::wire::{DispatchMethod, DispatchRequest};
use crate::constants::USER_HEADER;
use crate::error::{FlowError, FlowResult};
use crate::execution::LogLevel;
use crate::models::{ExecutorInfo, User};
use crate::service::RequestContext;

pub const FLOW_INSTANCES_PATH: &str = "/api/v2/flow/flowInstances";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowCommand {
    Cancel {
        skip_auth: bool,
    },
    Approve {
        message: Option<String>,
        skip_auth: bool,
    },
    Reject {
        message: Option<String>,
        skip_auth: bool,
    },
    Execute,
    GetLog {
        level: LogLevel,
    },
    DownloadLog,
    Download {
        file_name: String,
    },
}

impl FlowCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cancel { .. } => "cancel",
            Self::Approve { .. } => "approve",
            Self::Reject { .. } => "reject",
            Self::Execute => "execute",
            Self::GetLog { .. } => "get_log",
            Self::DownloadLog => "download_log",
            Self::Download { .. } => "download",
        }
    }

    /// Encode for the node at `forwarded_by`'s peer; the acting user and the
    /// forwarding node travel as headers
    pub fn to_request(
        &self,
        flow_instance_id: i64,
        ctx: &RequestContext,
        forwarded_by_header: &str,
        forwarded_by: &ExecutorInfo,
    ) -> FlowResult<DispatchRequest> {
        let base = format!("{FLOW_INSTANCES_PATH}/{flow_instance_id}");
        let request = match self {
            Self::Cancel { skip_auth } => {
                DispatchRequest::new(DispatchMethod::Post, format!("{base}/cancel"))
                    .with_query("skipAuth", skip_auth)
            }
            Self::Approve { message, skip_auth } => {
                DispatchRequest::new(DispatchMethod::Post, format!("{base}/approve"))
                    .with_query("skipAuth", skip_auth)
                    .with_body(json!({ "message": message }))
            }
            Self::Reject { message, skip_auth } => {
                DispatchRequest::new(DispatchMethod::Post, format!("{base}/reject"))
                    .with_query("skipAuth", skip_auth)
                    .with_body(json!({ "message": message }))
            }
            Self::Execute => {
                DispatchRequest::new(DispatchMethod::Post, format!("{base}/tasks/execute"))
            }
            Self::GetLog { level } => {
                DispatchRequest::new(DispatchMethod::Get, format!("{base}/tasks/log"))
                    .with_query("level", level.as_str())
            }
            Self::DownloadLog => {
                DispatchRequest::new(DispatchMethod::Get, format!("{base}/tasks/log/download"))
            }
            Self::Download { file_name } => {
                DispatchRequest::new(DispatchMethod::Get, format!("{base}/tasks/download"))
                    .with_query("fileName", file_name)
            }
        };
        Ok(request
            .with_header(USER_HEADER, serde_json::to_string(&ctx.user)?)
            .with_header(forwarded_by_header, forwarded_by.to_string()))
    }

    /// Decode a received request into its flow instance id and command
    pub fn from_request(request: &DispatchRequest) -> FlowResult<(i64, Self)> {
        let unknown = || FlowError::not_found("Route", "path", &request.path);

        let rest = request
            .path
            .strip_prefix(FLOW_INSTANCES_PATH)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(unknown)?;
        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        let (id, action) = segments.split_first().ok_or_else(unknown)?;
        let flow_instance_id: i64 = id
            .parse()
            .map_err(|_| FlowError::Validation(format!("Invalid flow instance id: {id}")))?;

        let skip_auth = request.query_param("skipAuth") == Some("true");
        let message = request
            .body
            .as_ref()
            .and_then(|body| body.get("message"))
            .and_then(|message| message.as_str())
            .map(str::to_string);

        let command = match (request.method, action) {
            (DispatchMethod::Post, ["cancel"]) => Self::Cancel { skip_auth },
            (DispatchMethod::Post, ["approve"]) => Self::Approve { message, skip_auth },
            (DispatchMethod::Post, ["reject"]) => Self::Reject { message, skip_auth },
            (DispatchMethod::Post, ["tasks", "execute"]) => Self::Execute,
            (DispatchMethod::Get, ["tasks", "log"]) => Self::GetLog {
                level: request
                    .query_param("level")
                    .map(str::parse::<LogLevel>)
                    .transpose()?
                    .unwrap_or_default(),
            },
            (DispatchMethod::Get, ["tasks", "log", "download"]) => Self::DownloadLog,
            (DispatchMethod::Get, ["tasks", "download"]) => Self::Download {
                file_name: request
                    .query_param("fileName")
                    .ok_or_else(|| FlowError::Validation("fileName is required".into()))?
                    .to_string(),
            },
            _ => return Err(unknown()),
        };
        Ok((flow_instance_id, command))
    }
}

/// Acting user carried by a forwarded request
pub fn user_from_request(request: &DispatchRequest) -> FlowResult<User> {
    let raw = request
        .header(USER_HEADER)
        .ok_or_else(|| FlowError::AccessDenied("Forwarded request carries no user".into()))?;
    Ok(serde_json::from_str(raw)?)
}
