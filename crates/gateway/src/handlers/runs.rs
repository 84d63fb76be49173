//! Run control handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::AppState;
use channelforge_common::{
    db::{models::CallLog, RunProgress, TriageFilters},
    errors::{AppError, Result},
};
use channelforge_pipeline::{CancelOutcome, RunDetail};

const DEFAULT_LIST_LIMIT: u64 = 20;
const MAX_LIST_LIMIT: u64 = 100;

/// Request to start a run; omitted fields use the triage defaults
#[derive(Debug, Default, Deserialize, Validate)]
#[validate(schema(function = "validate_bounds"))]
pub struct StartRunRequest {
    pub discovered_after: Option<DateTime<Utc>>,

    pub discovered_before: Option<DateTime<Utc>>,

    #[validate(range(min = 1, max = 3650))]
    pub max_age_days: Option<u32>,

    #[validate(range(min = 0))]
    pub min_subscribers: Option<i64>,

    #[validate(range(min = 0))]
    pub max_subscribers: Option<i64>,

    #[validate(range(min = 1, max = 500))]
    pub consider_count: Option<usize>,

    #[validate(range(min = 1, max = 50))]
    pub pick_count: Option<usize>,
}

fn validate_bounds(request: &StartRunRequest) -> std::result::Result<(), ValidationError> {
    if let (Some(after), Some(before)) = (request.discovered_after, request.discovered_before) {
        if after > before {
            return Err(ValidationError::new("discovered_after_later_than_before"));
        }
    }
    if let (Some(min), Some(max)) = (request.min_subscribers, request.max_subscribers) {
        if min > max {
            return Err(ValidationError::new("min_subscribers_above_max"));
        }
    }
    let filters = request.to_filters();
    if filters.pick_count > filters.consider_count {
        return Err(ValidationError::new("pick_count_above_consider_count"));
    }
    Ok(())
}

impl StartRunRequest {
    pub fn to_filters(&self) -> TriageFilters {
        let defaults = TriageFilters::default();
        TriageFilters {
            discovered_after: self.discovered_after,
            discovered_before: self.discovered_before,
            max_age_days: self.max_age_days,
            min_subscribers: self.min_subscribers,
            max_subscribers: self.max_subscribers,
            consider_count: self.consider_count.unwrap_or(defaults.consider_count),
            pick_count: self.pick_count.unwrap_or(defaults.pick_count),
        }
    }
}

/// Response after starting or resuming a run
#[derive(Serialize)]
pub struct RunAccepted {
    pub run_id: Uuid,
    pub status: String,
    pub poll_url: String,
    pub events_url: String,
}

impl RunAccepted {
    fn new(run_id: Uuid, status: &str) -> Self {
        Self {
            run_id,
            status: status.to_string(),
            poll_url: format!("/v1/runs/{}", run_id),
            events_url: format!("/v1/runs/{}/events", run_id),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    pub limit: Option<u64>,
}

#[derive(Serialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub status: String,
    pub channel_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<RunProgress>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

/// Start a run in the background
pub async fn start_run(
    State(state): State<AppState>,
    Json(request): Json<StartRunRequest>,
) -> Result<(StatusCode, Json<RunAccepted>)> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let run_id = state.service.start(request.to_filters()).await?;
    tracing::info!(run_id = %run_id, "Run accepted");

    Ok((StatusCode::ACCEPTED, Json(RunAccepted::new(run_id, "pending"))))
}

/// Most recent runs first
pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ListRunsQuery>,
) -> Result<Json<Vec<RunSummary>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    let runs = state.service.list_runs(limit).await?;
    Ok(Json(
        runs.into_iter()
            .map(|run| RunSummary {
                progress: RunProgress::from_run(&run),
                id: run.id,
                status: run.status,
                channel_count: run.channel_count,
                error_message: run.error_message,
                created_at: run.created_at.to_rfc3339(),
                started_at: run.started_at.map(|dt| dt.to_rfc3339()),
                completed_at: run.completed_at.map(|dt| dt.to_rfc3339()),
            })
            .collect(),
    ))
}

/// Run with its channels, storyboards and posts
pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunDetail>> {
    Ok(Json(state.service.run_detail(run_id).await?))
}

pub async fn resume_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<(StatusCode, Json<RunAccepted>)> {
    state.service.resume(run_id).await?;
    tracing::info!(run_id = %run_id, "Resume accepted");

    Ok((StatusCode::ACCEPTED, Json(RunAccepted::new(run_id, "resuming"))))
}

pub async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<CancelOutcome>> {
    Ok(Json(state.service.cancel(run_id).await?))
}

/// Call audit log in creation order
pub async fn list_calls(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<Vec<CallLog>>> {
    Ok(Json(state.service.call_logs(run_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_request_uses_defaults() {
        let request = StartRunRequest::default();
        assert!(request.validate().is_ok());
        assert_eq!(request.to_filters(), TriageFilters::default());
    }

    #[test]
    fn test_pick_count_bounded_by_consider_count() {
        let request = StartRunRequest {
            consider_count: Some(3),
            pick_count: Some(4),
            ..Default::default()
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_subscriber_bounds_ordered() {
        let request = StartRunRequest {
            min_subscribers: Some(5_000),
            max_subscribers: Some(1_000),
            ..Default::default()
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_field_ranges() {
        let request = StartRunRequest {
            pick_count: Some(0),
            ..Default::default()
        };
        assert!(request.validate().is_err());

        let request = StartRunRequest {
            max_age_days: Some(30),
            consider_count: Some(100),
            pick_count: Some(10),
            ..Default::default()
        };
        assert!(request.validate().is_ok());
    }
}
