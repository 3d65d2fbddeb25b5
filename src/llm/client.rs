//! OpenAI-compatible chat-completions client.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::JudgmentBackend;
use crate::error::LlmError;

/// Model used when `MONARCH_LLM_MODEL` is unset.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 120;

const SYSTEM_PROMPT: &str = "You are a strict code reviewer acting as a verification gate. \
Follow the instruction exactly and end your answer with a single line reading either PASS or FAIL.";

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Client for OpenAI-compatible chat-completions APIs.
pub struct ChatCompletionsClient {
    api_base: String,
    api_key: Option<String>,
    model: String,
    http_client: Client,
}

impl ChatCompletionsClient {
    /// Creates a client for `api_base` (e.g. "http://localhost:4000").
    pub fn new(
        api_base: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Result<Self, LlmError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| LlmError::RequestFailed(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            http_client,
        })
    }

    /// Creates a client from environment variables.
    ///
    /// - `MONARCH_LLM_API_BASE`: base URL (required)
    /// - `MONARCH_LLM_API_KEY`: bearer token (optional)
    /// - `MONARCH_LLM_MODEL`: model id (defaults to `gpt-4o-mini`)
    ///
    /// # Errors
    ///
    /// Returns `LlmError::MissingApiBase` if `MONARCH_LLM_API_BASE` is not set.
    pub fn from_env() -> Result<Self, LlmError> {
        let api_base = env::var("MONARCH_LLM_API_BASE").map_err(|_| LlmError::MissingApiBase)?;
        let api_key = env::var("MONARCH_LLM_API_KEY").ok();
        let model = env::var("MONARCH_LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        Self::new(api_base, api_key, model)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }
}

#[async_trait]
impl JudgmentBackend for ChatCompletionsClient {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let body = ApiRequest {
            model: &self.model,
            messages: vec![Message::system(SYSTEM_PROMPT), Message::user(prompt)],
            temperature: 0.0,
        };

        let mut request = self.http_client.post(self.endpoint()).json(&body);
        if let Some(ref api_key) = self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let code = status.as_u16();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            let message = serde_json::from_str::<ApiErrorResponse>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);

            if code == 429 {
                return Err(LlmError::RateLimited(message));
            }
            return Err(LlmError::ApiError { code, message });
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        tracing::debug!(model = %self.model, choices = parsed.choices.len(), "Judgment received");

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}
