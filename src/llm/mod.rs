//! Judgment-generation backend.
//!
//! The evaluation engine only needs `prompt -> text`. [`JudgmentBackend`] is
//! that seam; [`ChatCompletionsClient`] implements it against any
//! OpenAI-compatible `/chat/completions` endpoint (LiteLLM, OpenRouter, vLLM).
//!
//! ```ignore
//! use monarch_runner::llm::{ChatCompletionsClient, JudgmentBackend};
//!
//! let client = ChatCompletionsClient::from_env()?;
//! let verdict = client.generate("Does this file log to the console? Answer PASS or FAIL.").await?;
//! ```

pub mod client;

use async_trait::async_trait;

use crate::error::LlmError;

pub use client::{ChatCompletionsClient, Message, DEFAULT_MODEL};

/// A service that renders a text judgment for a prompt.
#[async_trait]
pub trait JudgmentBackend: Send + Sync {
    /// Generates a response for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Backend used when no judgment endpoint is configured. Every call fails
/// with [`LlmError::MissingApiBase`], so only `llm_eval` gates are affected.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredBackend;

#[async_trait]
impl JudgmentBackend for UnconfiguredBackend {
    async fn generate(&self, _prompt: &str) -> Result<String, LlmError> {
        Err(LlmError::MissingApiBase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_backend_fails() {
        let err = UnconfiguredBackend.generate("anything").await.unwrap_err();
        assert!(matches!(err, LlmError::MissingApiBase));
    }
}
