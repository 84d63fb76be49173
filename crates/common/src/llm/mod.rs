//! LLM service abstraction
//!
//! Every pipeline step talks to the model through [`LlmClient`]:
//! - Gemini `generateContent` over HTTPS
//! - A scripted client for tests and offline runs

mod gemini;
mod scripted;

pub use gemini::GeminiClient;
pub use scripted::{ScriptedLlmClient, ScriptedReply};

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One generation request
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub prompt: String,

    /// Media the model should watch (e.g. a video URL)
    pub media_uri: Option<String>,

    pub temperature: f32,

    pub max_output_tokens: u32,
}

/// Token accounting reported by the service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

/// Raw model output
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

/// Trait for text generation
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a completion. Non-success responses surface as
    /// `AppError::LlmService` with the status and body.
    async fn generate(&self, request: &GenerationRequest) -> Result<Completion>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Create an LLM client based on configuration
pub fn create_llm_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    match config.provider.as_str() {
        "gemini" => {
            let key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
                message: "llm.api_key is required for the gemini provider".to_string(),
            })?;
            Ok(Arc::new(GeminiClient::new(
                key,
                config.model.clone(),
                config.api_base.clone(),
                config.timeout_secs,
            )?))
        }
        other => Err(AppError::Configuration {
            message: format!("Unknown LLM provider: {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gemini_requires_key() {
        let config = LlmConfig::default();
        let err = create_llm_client(&config).err().unwrap();
        assert!(matches!(err, AppError::Configuration { .. }));
    }

    #[test]
    fn test_unknown_provider() {
        let config = LlmConfig {
            provider: "carrier-pigeon".into(),
            ..Default::default()
        };
        assert!(create_llm_client(&config).is_err());
    }
}
