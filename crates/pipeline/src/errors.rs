//! Pipeline error types

use channelforge_common::db::models::CallStep;
use channelforge_common::errors::AppError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("No channels matching filters")]
    NoCandidates,

    #[error("{step} call failed{}: {message}", .status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    ServiceCall {
        step: CallStep,
        status: Option<u16>,
        message: String,
    },

    #[error("Malformed {step} response: {message}")]
    MalformedResponse { step: CallStep, message: String },

    #[error("No storyboards available")]
    NoSuccessfulDetails,

    #[error("Triage pick {pick:?} did not match any candidate")]
    ResolutionMismatch { pick: String },

    #[error("Run not found: {0}")]
    RunNotFound(Uuid),

    #[error("Run {0} is already being processed")]
    AlreadyActive(Uuid),

    #[error("Store error: {0}")]
    Store(#[from] AppError),
}

impl PipelineError {
    /// Failures scoped to a single call; callers record them and move on
    pub fn is_call_failure(&self) -> bool {
        matches!(
            self,
            PipelineError::ServiceCall { .. } | PipelineError::MalformedResponse { .. }
        )
    }
}

impl From<PipelineError> for AppError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::RunNotFound(id) => AppError::RunNotFound { id: id.to_string() },
            PipelineError::AlreadyActive(id) => AppError::RunAlreadyActive { id: id.to_string() },
            PipelineError::NoCandidates => AppError::Validation {
                message: e.to_string(),
                field: None,
            },
            PipelineError::ServiceCall { status, message, .. } => {
                AppError::LlmService { status, message }
            }
            PipelineError::MalformedResponse { .. } => AppError::LlmMalformedResponse {
                message: e.to_string(),
            },
            PipelineError::Store(inner) => inner,
            other => AppError::Internal {
                message: other.to_string(),
            },
        }
    }
}
