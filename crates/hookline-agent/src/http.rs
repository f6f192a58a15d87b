//! HTTP-backed agent implementation.
//!
//! Speaks a small JSON protocol to a generation service: `POST
//! <base>/v1/generate` with the serialized [`AgentRequest`], expecting an
//! [`AgentResponse`] body. Transport failures and 429/5xx are retryable;
//! other HTTP errors are not.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use hookline_types::{HooklineError, Result};

use crate::{Agent, AgentRequest, AgentResponse};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

pub struct HttpAgent {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpAgent {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn post(&self, request: &AgentRequest) -> Result<AgentResponse> {
        let url = format!("{}/v1/generate", self.base_url.trim_end_matches('/'));
        let mut builder = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                HooklineError::AgentTimeout {
                    unit: request.task_key(),
                    timeout_ms: self.timeout.as_millis() as u64,
                }
            } else {
                HooklineError::AgentTransport {
                    message: e.to_string(),
                    retryable: true,
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let retryable = status.as_u16() == 429 || status.is_server_error();
            return if retryable {
                Err(HooklineError::AgentTransport {
                    message: format!("{url} returned {status}: {body}"),
                    retryable: true,
                })
            } else {
                Err(HooklineError::AgentFailure {
                    unit: request.task_key(),
                    message: format!("{status}: {body}"),
                    retryable: false,
                })
            };
        }

        let parsed: AgentResponse =
            response
                .json()
                .await
                .map_err(|e| HooklineError::AgentFailure {
                    unit: request.task_key(),
                    message: format!("malformed response body: {e}"),
                    retryable: false,
                })?;

        // The agent must answer for the stage it was asked about.
        if parsed.payload.stage() != request.stage {
            return Err(HooklineError::AgentFailure {
                unit: request.task_key(),
                message: format!(
                    "expected a {} payload, got {}",
                    request.stage,
                    parsed.payload.kind()
                ),
                retryable: false,
            });
        }
        Ok(parsed)
    }
}

#[async_trait]
impl Agent for HttpAgent {
    async fn generate(
        &self,
        request: AgentRequest,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse> {
        tracing::debug!(task = %request.task_key(), "Agent request");
        tokio::select! {
            _ = cancel.cancelled() => Err(HooklineError::Aborted),
            result = self.post(&request) => {
                match &result {
                    Ok(response) => tracing::debug!(
                        task = %request.task_key(),
                        cost_usd = response.cost_usd,
                        "Agent response"
                    ),
                    Err(error) => tracing::warn!(
                        task = %request.task_key(),
                        %error,
                        retryable = error.is_retryable(),
                        "Agent call failed"
                    ),
                }
                result
            }
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}
