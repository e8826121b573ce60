//! OpenAI Responses API adapter for multimodal completions.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ProviderError};
use super::types::*;

// =============================================================================
// TRAIT
// =============================================================================

/// A multimodal completion service.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResponse, ProviderError>;
}

// =============================================================================
// OPENAI ADAPTER
// =============================================================================

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Maximum allowed response body length (1MB).
const MAX_RESPONSE_LEN: usize = 1_024 * 1_024;

/// Maximum allowed text input characters.
const MAX_INPUT_CHARS: usize = 500_000;

/// Adapter for the `/responses` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiResponsesAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiResponsesAdapter {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_config(api_key, DEFAULT_BASE_URL, Duration::from_secs(10))
    }

    /// Create with custom configuration.
    ///
    /// `connect_timeout` bounds connection setup only; each request carries
    /// its own overall timeout.
    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        let base_url = base_url.into().trim_end_matches('/').to_string();

        if api_key.trim().is_empty() {
            return Err(ProviderError::config("API key is empty"));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| ProviderError::config("Invalid API key format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    fn responses_url(&self) -> String {
        format!("{}/responses", self.base_url)
    }

    fn extract_request_id(headers: &HeaderMap) -> Option<String> {
        headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }

    fn retry_after(headers: &HeaderMap) -> Duration {
        headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(20))
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
struct ResponsesApiRequest<'a> {
    model: &'a str,
    input: Vec<ApiInputMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<Reasoning>,
}

#[derive(Serialize)]
struct Reasoning {
    effort: &'static str,
}

#[derive(Serialize)]
struct ApiInputMessage {
    role: &'static str,
    content: Vec<ApiInputPart>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiInputPart {
    InputText { text: String },
    InputImage { image_url: String },
}

impl From<&Message> for ApiInputMessage {
    fn from(m: &Message) -> Self {
        Self {
            role: m.role.as_str(),
            content: m
                .content
                .iter()
                .map(|part| match part {
                    ContentPart::Text(text) => ApiInputPart::InputText { text: text.clone() },
                    ContentPart::Image(img) => ApiInputPart::InputImage {
                        image_url: img.data_url(),
                    },
                })
                .collect(),
        }
    }
}

#[derive(Deserialize)]
struct ResponsesApiResponse {
    status: Option<String>,
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    output: Vec<OutputItem>,
    usage: Option<Usage>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    item_type: Option<String>,
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Deserialize)]
struct OutputContent {
    #[serde(rename = "type")]
    content_type: Option<String>,
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    code: Option<String>,
    param: Option<String>,
}

impl ResponsesApiResponse {
    /// Aggregated output text, preferring the top-level convenience field.
    fn text(&self) -> String {
        if let Some(text) = &self.output_text {
            if !text.trim().is_empty() {
                return text.clone();
            }
        }
        self.output
            .iter()
            .filter(|item| item.item_type.as_deref().unwrap_or("message") == "message")
            .flat_map(|item| item.content.iter())
            .filter(|c| c.content_type.as_deref() == Some("output_text"))
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }
}

// =============================================================================
// COMPLETION SERVICE IMPL
// =============================================================================

#[async_trait]
impl CompletionService for OpenAiResponsesAdapter {
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let total_chars = req.text_chars();
        if total_chars > MAX_INPUT_CHARS {
            return Err(ProviderError::invalid_request(format!(
                "Input too large: {total_chars} chars (max {MAX_INPUT_CHARS})"
            )));
        }

        let start = Instant::now();

        let api_req = ResponsesApiRequest {
            model: &req.model,
            input: req.messages.iter().map(ApiInputMessage::from).collect(),
            temperature: req.temperature,
            max_output_tokens: req.max_output_tokens,
            reasoning: req.reasoning_effort.map(|effort| Reasoning { effort }),
        };

        let mut response = self
            .client
            .post(self.responses_url())
            .timeout(req.timeout)
            .json(&api_req)
            .send()
            .await?;

        let status = response.status();
        let request_id = Self::extract_request_id(response.headers());
        let retry_after = Self::retry_after(response.headers());

        // Stream response to enforce size limit
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let new_len = bytes.len() + chunk.len();
            if new_len > MAX_RESPONSE_LEN {
                return Err(ProviderError::provider(
                    "openai",
                    format!("Response too large: {new_len} bytes"),
                    false,
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        let body = String::from_utf8_lossy(&bytes).to_string();

        let ctx = ErrorContext::new().with_status(status.as_u16());
        let ctx = if let Some(id) = &request_id {
            ctx.with_request_id(id)
        } else {
            ctx
        };

        if !status.is_success() {
            let api_error = serde_json::from_str::<ErrorEnvelope>(&body)
                .ok()
                .and_then(|e| e.error);
            let (message, ctx) = match api_error {
                Some(error) => {
                    let mut ctx = ctx;
                    if let Some(code) = error.code {
                        ctx = ctx.with_code(code);
                    }
                    if let Some(param) = error.param {
                        ctx = ctx.with_param(param);
                    }
                    let message = error
                        .message
                        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
                    (message, ctx)
                }
                None => (format!("HTTP {}", status.as_u16()), ctx),
            };

            return Err(match status.as_u16() {
                429 => ProviderError::rate_limited(retry_after, ctx),
                400 | 404 | 422 => ProviderError::invalid_request_with_context(message, ctx),
                408 => ProviderError::Timeout(req.timeout, Some(ctx)),
                code => ProviderError::provider_with_context("openai", message, code >= 500, ctx),
            });
        }

        let parsed: ResponsesApiResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::provider("openai", format!("Invalid JSON: {e}"), false))?;

        if let Some(error) = &parsed.error {
            let message = error.message.clone().unwrap_or_default();
            return Err(ProviderError::provider_with_context(
                "openai", message, false, ctx,
            ));
        }

        let content = parsed.text();
        let (input_tokens, output_tokens) = parsed
            .usage
            .as_ref()
            .map(|u| (u.input_tokens, u.output_tokens))
            .unwrap_or((None, None));

        Ok(CompletionResponse {
            content,
            input_tokens,
            output_tokens,
            latency: start.elapsed(),
            status: ResponseStatus::from(parsed.status),
        })
    }
}
