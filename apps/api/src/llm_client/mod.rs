/// LLM Client: the single point of entry for all completion-service calls.
///
/// ARCHITECTURAL RULE: No other module may call the Anthropic API directly.
/// All LLM interactions MUST go through this module.
///
/// Model: claude-sonnet-4-5 (hardcoded; do not make configurable to prevent drift)
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::PipelineConfig;

pub mod prompts;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// The model used for all LLM calls.
/// This is intentionally hardcoded to prevent accidental drift.
pub const MODEL: &str = "claude-sonnet-4-5";
const MAX_TOKENS: u32 = 8192;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("Completion service API key is not configured")]
    MissingApiKey,
}

impl LlmError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(
            self,
            LlmError::Api { status: 429, .. } | LlmError::RateLimited { .. }
        )
    }

    /// The service refused the request itself: too large (413) or malformed (400,
    /// which is also how an over-long prompt is reported).
    pub fn is_request_rejected(&self) -> bool {
        matches!(self, LlmError::Api { status: 400 | 413, .. })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Wire types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct AnthropicTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Debug, Serialize)]
struct ToolChoice<'a> {
    #[serde(rename = "type")]
    choice_type: &'a str,
    name: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub content: Vec<ContentBlock>,
    pub usage: Usage,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: Option<String>,
    pub name: Option<String>,
    pub input: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl LlmResponse {
    /// Extracts the text content from the first text block.
    pub fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.as_deref())
    }

    /// Extracts the arguments of the named tool call, if the model made one.
    pub fn tool_input(&self, tool_name: &str) -> Option<&Value> {
        self.content
            .iter()
            .find(|b| b.block_type == "tool_use" && b.name.as_deref() == Some(tool_name))
            .and_then(|b| b.input.as_ref())
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    message: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Retry layer
// ────────────────────────────────────────────────────────────────────────────

/// Backoff schedule for rate-limited calls. Other error classes are never retried.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_retries: config.rate_limit_retries,
            base_delay: config.retry_base_delay,
        }
    }

    /// Delay before the given retry (1-based): base, 2×base, 4×base, ...
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor)
    }
}

/// Runs `attempt` until it succeeds, fails with a non-rate-limit error, or the
/// retry budget is spent.
pub async fn retry_on_rate_limit<T, F, Fut>(policy: RetryPolicy, mut attempt: F) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut retries = 0;
    loop {
        match attempt().await {
            Err(e) if e.is_rate_limit() => {
                if retries >= policy.max_retries {
                    warn!("Completion service still rate limited after {retries} retries, giving up");
                    return Err(LlmError::RateLimited { retries });
                }
                retries += 1;
                let delay = policy.delay_for(retries);
                warn!(
                    "Completion service rate limited, retry {}/{} after {}ms",
                    retries,
                    policy.max_retries,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Completion service seam
// ────────────────────────────────────────────────────────────────────────────

/// One structured-output request: instructions, content, and the declared output schema.
#[derive(Debug, Clone, Copy)]
pub struct StructuredRequest<'a> {
    pub system: &'a str,
    pub prompt: &'a str,
    /// Name under which the structured output is returned.
    pub output_name: &'a str,
    pub output_description: &'a str,
    pub schema: &'a Value,
}

/// The completion service as the pipeline sees it: `(prompt, schema) -> JSON | error`.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// False when the service credential is missing.
    fn is_configured(&self) -> bool;

    async fn complete_structured(&self, request: StructuredRequest<'_>) -> Result<Value, LlmError>;
}

/// The single LLM client used by all services.
/// Wraps the Anthropic Messages API with retry logic and structured output helpers.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
    retry: RetryPolicy,
}

impl LlmClient {
    pub fn new(api_key: String, retry: RetryPolicy) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(180))
                .build()
                .expect("Failed to build HTTP client"),
            api_key,
            retry,
        }
    }

    /// Makes a call to the Claude API, returning the full response object.
    /// Retries on 429 (rate limit) with exponential backoff.
    async fn call(
        &self,
        prompt: &str,
        system: &str,
        tool: Option<AnthropicTool<'_>>,
    ) -> Result<LlmResponse, LlmError> {
        let tool_choice = tool.as_ref().map(|t| ToolChoice {
            choice_type: "tool",
            name: t.name,
        });
        let request_body = AnthropicRequest {
            model: MODEL,
            max_tokens: MAX_TOKENS,
            system,
            messages: vec![AnthropicMessage {
                role: "user",
                content: prompt,
            }],
            tools: tool.into_iter().collect(),
            tool_choice,
        };

        let body = &request_body;
        retry_on_rate_limit(self.retry, move || self.send_once(body)).await
    }

    async fn send_once(&self, body: &AnthropicRequest<'_>) -> Result<LlmResponse, LlmError> {
        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // Try to parse error message
            let message = serde_json::from_str::<AnthropicError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            warn!("LLM API returned {}: {}", status, message);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let llm_response: LlmResponse = response.json().await?;

        debug!(
            "LLM call succeeded: input_tokens={}, output_tokens={}",
            llm_response.usage.input_tokens, llm_response.usage.output_tokens
        );
        if llm_response.stop_reason.as_deref() == Some("max_tokens") {
            warn!("LLM output hit max_tokens; structured output may be truncated");
        }

        Ok(llm_response)
    }
}

#[async_trait]
impl CompletionService for LlmClient {
    fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Forces a tool call whose input schema is the requested output schema.
    /// Falls back to parsing a text answer as JSON.
    async fn complete_structured(&self, request: StructuredRequest<'_>) -> Result<Value, LlmError> {
        if !self.is_configured() {
            return Err(LlmError::MissingApiKey);
        }

        let tool = AnthropicTool {
            name: request.output_name,
            description: request.output_description,
            input_schema: request.schema,
        };
        let response = self.call(request.prompt, request.system, Some(tool)).await?;

        if let Some(input) = response.tool_input(request.output_name) {
            return Ok(input.clone());
        }

        let text = response.text().ok_or(LlmError::EmptyContent)?;
        serde_json::from_str(strip_json_fences(text)).map_err(LlmError::Parse)
    }
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}
