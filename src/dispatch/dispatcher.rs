//! # Request Dispatcher
//!
//! Synchronous request/response call to another cluster node. Routing is
//! never cached: the caller passes the target recomputed from the persisted
//! execution affinity on every call.

use async_trait::async_trait;
use reqwest::{Client, Method};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::wire::{DispatchMethod, DispatchRequest, DispatchResponse};
use crate::config::DispatchConfig;
use crate::error::{FlowError, FlowResult};
use crate::logging::log_dispatch_operation;
use crate::models::ExecutorInfo;

#[async_trait]
pub trait RequestDispatcher: Send + Sync + std::fmt::Debug {
    async fn forward(
        &self,
        target: &ExecutorInfo,
        request: DispatchRequest,
    ) -> FlowResult<DispatchResponse>;
}

/// HTTP transport for forwarded requests
pub struct HttpRequestDispatcher {
    client: Client,
    config: DispatchConfig,
}

impl std::fmt::Debug for HttpRequestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRequestDispatcher")
            .field("timeout_ms", &self.config.timeout_ms)
            .field("connect_timeout_ms", &self.config.connect_timeout_ms)
            .finish()
    }
}

impl HttpRequestDispatcher {
    pub fn new(config: DispatchConfig) -> FlowResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(format!("flowgate-core/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                FlowError::Configuration(format!("Failed to create HTTP client: {e}"))
            })?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl RequestDispatcher for HttpRequestDispatcher {
    async fn forward(
        &self,
        target: &ExecutorInfo,
        request: DispatchRequest,
    ) -> FlowResult<DispatchResponse> {
        let url = format!("http://{}:{}{}", target.host, target.port, request.path);
        let method = match request.method {
            DispatchMethod::Get => Method::GET,
            DispatchMethod::Post => Method::POST,
        };
        debug!(url = %url, method = request.method.as_str(), "Forwarding request");

        let mut builder = self.client.request(method, &url).query(&request.query);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            log_dispatch_operation(
                "forward",
                &target.host,
                target.port,
                "failed",
                Some(&e.to_string()),
            );
            FlowError::remote(&target.host, target.port, format!("Request failed: {e}"))
        })?;

        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
            })
            .collect();
        let content = response
            .bytes()
            .await
            .map_err(|e| {
                FlowError::remote(&target.host, target.port, format!("Reading body failed: {e}"))
            })?
            .to_vec();

        if !(200..300).contains(&status) {
            warn!(
                host = %target.host,
                port = target.port,
                status = status,
                path = %request.path,
                "Remote node answered with an error status"
            );
        }
        log_dispatch_operation(
            "forward",
            &target.host,
            target.port,
            "completed",
            Some(&format!("{} {} -> {status}", request.method.as_str(), request.path)),
        );

        Ok(DispatchResponse {
            status,
            headers,
            content,
            origin: target.clone(),
        })
    }
}
