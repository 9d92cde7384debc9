//! OpenAI-compatible Chat Completions client
//!
//! Every configured provider speaks the same protocol; only the endpoint,
//! model and credential differ, and those arrive with each call.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{CompletionRequest, LlmClient, LlmError, ResolvedProvider};

/// Upper bound on retries, whatever a provider asks for
const MAX_RETRIES: u32 = 3;

/// Initial backoff delay for retries
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Longest server-requested wait honored before retrying a 429
const MAX_RETRY_AFTER_SECS: u64 = 30;

/// OpenAI-compatible API client
///
/// Holds only the connection pool; provider settings are per call.
#[derive(Debug, Clone, Default)]
pub struct OpenAIClient {
    http: Client,
}

impl OpenAIClient {
    pub fn new() -> Result<Self, LlmError> {
        debug!("OpenAIClient::new: called");
        let http = Client::builder().build().map_err(LlmError::Network)?;
        Ok(Self { http })
    }

    /// Build the request body for the Chat Completions API
    fn build_request_body(provider: &ResolvedProvider, request: &CompletionRequest) -> serde_json::Value {
        debug!(model = %provider.model, tool = ?request.tool_name(), "build_request_body: called");

        // GPT-5.x and o1/o3 models use max_completion_tokens instead of max_tokens
        let uses_completion_tokens =
            provider.model.starts_with("gpt-5") || provider.model.starts_with("o1") || provider.model.starts_with("o3");

        let mut body = serde_json::json!({
            "model": provider.model,
            "messages": [{
                "role": "user",
                "content": request.prompt,
            }],
        });

        if uses_completion_tokens {
            body["max_completion_tokens"] = serde_json::json!(provider.max_tokens);
        } else {
            body["max_tokens"] = serde_json::json!(provider.max_tokens);
        }

        if let Some(temperature) = provider.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }

        if let Some(tool) = &request.tool {
            debug!(tool = %tool.name, "build_request_body: forcing tool call");
            body["tools"] = serde_json::json!([tool.to_openai_schema()]);
            body["tool_choice"] = tool.to_openai_choice();
        }

        body
    }

    fn endpoint(provider: &ResolvedProvider) -> String {
        format!("{}/chat/completions", provider.base_url.trim_end_matches('/'))
    }

    /// One HTTP attempt
    async fn attempt(
        &self,
        provider: &ResolvedProvider,
        request: &CompletionRequest,
        body: &serde_json::Value,
    ) -> Result<String, LlmError> {
        let response = self
            .http
            .post(Self::endpoint(provider))
            .timeout(provider.timeout)
            .header("Authorization", format!("Bearer {}", provider.api_key))
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(provider.timeout)
                } else {
                    LlmError::Network(e)
                }
            })?;

        let status = response.status().as_u16();

        if status == 429 {
            debug!("attempt: rate limited (429)");
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            });
        }

        if !response.status().is_success() {
            debug!(%status, "attempt: API error");
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError { status, message: text });
        }

        let api_response: OpenAIResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(provider.timeout)
            } else {
                LlmError::InvalidResponse(e.to_string())
            }
        })?;
        completion_text(api_response, request.tool_name())
    }
}

/// Pull the usable text out of a response
///
/// With a forced tool the text is that tool call's argument JSON; a model
/// that answered in prose instead still gets its content returned, and the
/// caller's parsing decides whether that is acceptable.
fn completion_text(api_response: OpenAIResponse, expected_tool: Option<&str>) -> Result<String, LlmError> {
    debug!(choices = api_response.choices.len(), ?expected_tool, "completion_text: called");
    if let Some(usage) = &api_response.usage {
        debug!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "completion_text: usage"
        );
    }

    let choice = api_response.choices.into_iter().next().ok_or(LlmError::EmptyResponse)?;
    if choice.finish_reason.as_deref() == Some("length") {
        warn!("completion_text: response truncated at max tokens");
    }

    let tool_args = choice.message.tool_calls.unwrap_or_default().into_iter().find_map(|tc| {
        match expected_tool {
            Some(name) if tc.function.name != name => None,
            _ => Some(tc.function.arguments),
        }
    });

    let text = tool_args.or(choice.message.content).unwrap_or_default();
    if text.trim().is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    Ok(text)
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn complete(&self, provider: &ResolvedProvider, request: &CompletionRequest) -> Result<String, LlmError> {
        debug!(provider = %provider.name, model = %provider.model, "complete: called");
        let body = Self::build_request_body(provider, request);
        let retries = retry_budget(provider);

        let mut attempt = 0;
        loop {
            match self.attempt(provider, request, &body).await {
                Ok(text) => {
                    debug!(attempt, "complete: success");
                    return Ok(text);
                }
                Err(e) => match retry_delay(&e, attempt, retries) {
                    Some(backoff) => {
                        attempt += 1;
                        warn!(
                            provider = %provider.name,
                            attempt,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "complete: retrying after transient error"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    None => {
                        debug!(attempt, error = %e, "complete: giving up");
                        return Err(e);
                    }
                },
            }
        }
    }
}

/// Retries allowed for a provider, capped at [`MAX_RETRIES`]
fn retry_budget(provider: &ResolvedProvider) -> u32 {
    provider.max_retries.min(MAX_RETRIES)
}

/// Wait before the next try after `error`, or `None` to give up
///
/// `attempt` counts retries already made. A server `retry_after` is honored
/// up to [`MAX_RETRY_AFTER_SECS`]; otherwise the delay doubles from
/// [`INITIAL_BACKOFF_MS`].
fn retry_delay(error: &LlmError, attempt: u32, retries: u32) -> Option<Duration> {
    if !error.is_retryable() || attempt >= retries {
        return None;
    }
    let delay = match error.retry_after() {
        Some(after) => after.min(Duration::from_secs(MAX_RETRY_AFTER_SECS)),
        None => Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt)),
    };
    Some(delay)
}

// OpenAI API response types

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAIToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIToolCall {
    function: OpenAIFunction,
}

#[derive(Debug, Deserialize)]
struct OpenAIFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}
