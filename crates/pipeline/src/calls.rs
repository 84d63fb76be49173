//! Call gateway
//!
//! Wraps every outbound LLM call: a `pending` call log row is written before
//! dispatch and settled exactly once afterwards with timing, token counts and
//! the raw response text. Responses are cleaned up and parsed into the step's
//! schema.

use crate::errors::PipelineError;
use channelforge_common::config::StepSettings;
use channelforge_common::db::models::{CallStatus, CallStep};
use channelforge_common::db::{CallOutcome, NewCallLog, PipelineStore};
use channelforge_common::errors::AppError;
use channelforge_common::llm::{Completion, GenerationRequest, LlmClient};
use channelforge_common::metrics;
use regex_lite::Regex;
use serde::de::DeserializeOwned;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;
use validator::Validate;

/// Where a call belongs and how to generate it
#[derive(Debug, Clone)]
pub struct CallSpec {
    pub run_id: Uuid,
    pub run_channel_id: Option<Uuid>,
    pub step: CallStep,
    pub settings: StepSettings,
    pub media_uri: Option<String>,
}

impl CallSpec {
    pub fn new(run_id: Uuid, step: CallStep, settings: StepSettings) -> Self {
        Self {
            run_id,
            run_channel_id: None,
            step,
            settings,
            media_uri: None,
        }
    }

    pub fn for_channel(mut self, run_channel_id: Uuid) -> Self {
        self.run_channel_id = Some(run_channel_id);
        self
    }

    pub fn with_media(mut self, uri: impl Into<String>) -> Self {
        self.media_uri = Some(uri.into());
        self
    }
}

/// A parsed, validated response
#[derive(Debug, Clone)]
pub struct CallOutput<T> {
    pub data: T,
    pub raw_json: serde_json::Value,
    pub raw_text: String,
    pub call_log_id: Uuid,
}

#[derive(Clone)]
pub struct CallGateway {
    llm: Arc<dyn LlmClient>,
    store: Arc<dyn PipelineStore>,
}

impl CallGateway {
    pub fn new(llm: Arc<dyn LlmClient>, store: Arc<dyn PipelineStore>) -> Self {
        Self { llm, store }
    }

    pub async fn call<T>(&self, prompt: String, spec: CallSpec) -> Result<CallOutput<T>, PipelineError>
    where
        T: DeserializeOwned + Validate,
    {
        let request = GenerationRequest {
            prompt,
            media_uri: spec.media_uri.clone(),
            temperature: spec.settings.temperature,
            max_output_tokens: spec.settings.max_output_tokens,
        };

        let log = self
            .store
            .append_call_log(NewCallLog {
                run_id: spec.run_id,
                run_channel_id: spec.run_channel_id,
                step: spec.step,
                model: self.llm.model_name().to_string(),
                request_payload: serde_json::to_string(&request).map_err(AppError::from)?,
            })
            .await?;

        let started = Instant::now();
        let result = self.llm.generate(&request).await;
        let duration = started.elapsed();
        let duration_ms = duration.as_millis() as i64;

        let completion = match result {
            Ok(completion) => completion,
            Err(e) => {
                let err = Self::service_error(spec.step, e);
                self.settle(&spec, log.id, duration_ms, None, Some(err.to_string()), None)
                    .await?;
                metrics::record_llm_call(spec.step.as_str(), duration.as_secs_f64(), false, None);
                warn!(run_id = %spec.run_id, step = %spec.step, error = %err, "LLM call failed");
                return Err(err);
            }
        };

        let Completion { text, usage } = completion;
        let total_tokens = usage.and_then(|u| u.total_tokens);

        match parse_structured::<T>(&text) {
            Ok((data, raw_json)) => {
                self.store
                    .finish_call_log(
                        log.id,
                        CallOutcome {
                            status: CallStatus::Done,
                            response_text: Some(text.clone()),
                            duration_ms,
                            error: None,
                            usage,
                        },
                    )
                    .await?;
                metrics::record_llm_call(spec.step.as_str(), duration.as_secs_f64(), true, total_tokens);
                debug!(
                    run_id = %spec.run_id,
                    step = %spec.step,
                    duration_ms,
                    total_tokens = ?total_tokens,
                    "LLM call completed"
                );
                Ok(CallOutput {
                    data,
                    raw_json,
                    raw_text: text,
                    call_log_id: log.id,
                })
            }
            Err(message) => {
                let err = PipelineError::MalformedResponse {
                    step: spec.step,
                    message,
                };
                self.settle(&spec, log.id, duration_ms, Some(text), Some(err.to_string()), usage)
                    .await?;
                metrics::record_llm_call(spec.step.as_str(), duration.as_secs_f64(), false, total_tokens);
                warn!(run_id = %spec.run_id, step = %spec.step, error = %err, "Malformed LLM response");
                Err(err)
            }
        }
    }

    async fn settle(
        &self,
        spec: &CallSpec,
        log_id: Uuid,
        duration_ms: i64,
        response_text: Option<String>,
        error: Option<String>,
        usage: Option<channelforge_common::llm::TokenUsage>,
    ) -> Result<(), PipelineError> {
        self.store
            .finish_call_log(
                log_id,
                CallOutcome {
                    status: CallStatus::Error,
                    response_text,
                    duration_ms,
                    error,
                    usage,
                },
            )
            .await
            .map_err(|e| {
                warn!(run_id = %spec.run_id, error = %e, "Failed to settle call log");
                PipelineError::from(e)
            })
    }

    fn service_error(step: CallStep, e: AppError) -> PipelineError {
        match e {
            AppError::LlmService { status, message } => PipelineError::ServiceCall {
                step,
                status,
                message,
            },
            AppError::LlmMalformedResponse { message } => {
                PipelineError::MalformedResponse { step, message }
            }
            other => PipelineError::ServiceCall {
                step,
                status: None,
                message: other.to_string(),
            },
        }
    }
}

fn fence_pattern() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").ok())
        .as_ref()
}

/// Permissive cleanup of model output before JSON parsing: strip a code fence,
/// straighten curly quotes, keep the outermost `{...}` span.
pub fn clean_response_text(text: &str) -> String {
    let mut cleaned = text.trim().to_string();

    if let Some(inner) = fence_pattern()
        .and_then(|re| re.captures(&cleaned))
        .and_then(|caps| caps.get(1))
    {
        cleaned = inner.as_str().trim().to_string();
    }

    cleaned = cleaned
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    if let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}')) {
        if start < end {
            cleaned = cleaned[start..=end].to_string();
        }
    }

    cleaned
}

/// Clean, parse and validate a response
pub fn parse_structured<T>(text: &str) -> Result<(T, serde_json::Value), String>
where
    T: DeserializeOwned + Validate,
{
    let cleaned = clean_response_text(text);
    let raw_json: serde_json::Value =
        serde_json::from_str(&cleaned).map_err(|e| format!("invalid JSON: {}", e))?;
    let data: T = serde_json::from_value(raw_json.clone())
        .map_err(|e| format!("schema mismatch: {}", e))?;
    data.validate()
        .map_err(|e| format!("validation failed: {}", e))?;
    Ok((data, raw_json))
}
