// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for a JSON push gateway.
//!
//! The gateway accepts `POST {endpoint}` with a [`PushRequest`] body and
//! answers with a [`PushReceipt`]. Each call is one attempt; see
//! [`crate::retry`] for the retry budget.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::debug;

use covtrace_config::model::PushConfig;
use covtrace_core::{
    AdapterType, CovtraceError, HealthStatus, PluginAdapter, PushGateway, PushReceipt,
    PushRequest,
};

#[derive(Debug, Deserialize)]
struct GatewayErrorBody {
    error: GatewayError,
}

#[derive(Debug, Deserialize)]
struct GatewayError {
    #[serde(default)]
    code: String,
    message: String,
}

/// HTTP push gateway adapter.
#[derive(Debug, Clone)]
pub struct HttpPushGateway {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPushGateway {
    /// Builds a client for `config.endpoint`, which must be set.
    pub fn new(config: &PushConfig) -> Result<Self, CovtraceError> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| CovtraceError::Config("push.endpoint is required".into()))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &config.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {key}")).map_err(|e| {
                    CovtraceError::Config(format!("invalid push API key header value: {e}"))
                })?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CovtraceError::Delivery {
                message: format!("failed to build HTTP client: {e}"),
                transient: false,
                source: Some(Box::new(e)),
            })?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// HTTP statuses where a later attempt may succeed.
fn is_transient_status(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504)
}

#[async_trait]
impl PluginAdapter for HttpPushGateway {
    fn name(&self) -> &str {
        "http-push"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Gateway
    }

    /// Any HTTP answer from the endpoint counts as reachable.
    async fn health_check(&self) -> Result<HealthStatus, CovtraceError> {
        Ok(match self.client.head(&self.endpoint).send().await {
            Ok(response) if response.status().is_server_error() => {
                HealthStatus::Degraded(format!("gateway answered {}", response.status()))
            }
            Ok(_) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Unhealthy(e.to_string()),
        })
    }

    async fn shutdown(&self) -> Result<(), CovtraceError> {
        Ok(())
    }
}

#[async_trait]
impl PushGateway for HttpPushGateway {
    async fn send(&self, request: &PushRequest) -> Result<PushReceipt, CovtraceError> {
        if request.tokens.is_empty() {
            return Err(CovtraceError::InvalidArgument(
                "push request has no device tokens".into(),
            ));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| CovtraceError::Delivery {
                message: format!("HTTP request failed: {e}"),
                // Connection failures and timeouts are worth another attempt.
                transient: e.is_connect() || e.is_timeout() || e.is_request(),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        debug!(status = %status, tokens = request.tokens.len(), "push response received");
        let body = response.text().await.unwrap_or_default();

        if status.is_success() {
            if body.trim().is_empty() {
                return Ok(PushReceipt {
                    success: request.tokens.len() as u64,
                    ..PushReceipt::default()
                });
            }
            return serde_json::from_str::<PushReceipt>(&body).map_err(|e| {
                CovtraceError::Delivery {
                    message: format!("failed to parse gateway receipt: {e}"),
                    transient: false,
                    source: Some(Box::new(e)),
                }
            });
        }

        let message = match serde_json::from_str::<GatewayErrorBody>(&body) {
            Ok(parsed) if !parsed.error.code.is_empty() => format!(
                "push gateway error ({}): {}",
                parsed.error.code, parsed.error.message
            ),
            Ok(parsed) => format!("push gateway error: {}", parsed.error.message),
            Err(_) => format!("push gateway returned {status}: {body}"),
        };
        Err(CovtraceError::Delivery {
            message,
            transient: is_transient_status(status),
            source: None,
        })
    }
}
