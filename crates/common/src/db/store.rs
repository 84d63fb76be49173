//! Persistence contract consumed by the pipeline
//!
//! Every status write on runs and run channels is conditional: it only lands
//! while the row is still non-terminal and reports whether it did. A write
//! that lost the race (a cancelled run, a channel already failed) is a no-op.

use crate::db::models::*;
use crate::errors::Result;
use crate::llm::TokenUsage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Triage filters, stored verbatim on the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageFilters {
    /// Only channels discovered at or after this instant
    pub discovered_after: Option<DateTime<Utc>>,

    /// Only channels discovered at or before this instant
    pub discovered_before: Option<DateTime<Utc>>,

    /// Only channels whose first upload is at most this many days old
    pub max_age_days: Option<u32>,

    pub min_subscribers: Option<i64>,

    pub max_subscribers: Option<i64>,

    /// Candidates handed to the ranking call
    pub consider_count: usize,

    /// Channels the ranking call is asked to pick
    pub pick_count: usize,
}

impl Default for TriageFilters {
    fn default() -> Self {
        Self {
            discovered_after: None,
            discovered_before: None,
            max_age_days: None,
            min_subscribers: None,
            max_subscribers: None,
            consider_count: 50,
            pick_count: 5,
        }
    }
}

impl TriageFilters {
    /// Candidate predicate shared by every store implementation
    pub fn matches(&self, channel: &Channel, now: DateTime<Utc>) -> bool {
        let discovered = channel.discovered_at.with_timezone(&Utc);
        if self.discovered_after.is_some_and(|after| discovered < after) {
            return false;
        }
        if self.discovered_before.is_some_and(|before| discovered > before) {
            return false;
        }
        if self.min_subscribers.is_some_and(|min| channel.subscriber_count < min) {
            return false;
        }
        if self.max_subscribers.is_some_and(|max| channel.subscriber_count > max) {
            return false;
        }
        if let Some(max_age) = self.max_age_days {
            match channel.age_days(now) {
                Some(age) if age <= max_age as i64 => {}
                _ => return false,
            }
        }
        true
    }
}

/// Run channel as materialized by triage
#[derive(Debug, Clone)]
pub struct NewRunChannel {
    pub run_id: Uuid,
    pub channel: Channel,
    pub priority: i32,
    pub interest_score: f64,
    pub rationale: String,
    pub look_for: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewStoryboard {
    pub run_channel_id: Uuid,
    pub video_id: String,
    pub video_title: String,
    pub view_count: i64,
    pub storyboard: Option<serde_json::Value>,
    pub status: StoryboardStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewCallLog {
    pub run_id: Uuid,
    pub run_channel_id: Option<Uuid>,
    pub step: CallStep,
    pub model: String,
    pub request_payload: String,
}

/// Final state of a call log row
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub status: CallStatus,
    pub response_text: Option<String>,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub usage: Option<TokenUsage>,
}

/// Progress snapshot persisted onto the run row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunProgress {
    pub step: String,
    pub current: i32,
    pub total: i32,
    pub message: String,
    pub entity: Option<String>,
    pub item: Option<String>,
}

impl RunProgress {
    /// Snapshot currently stored on a run
    pub fn from_run(run: &Run) -> Option<Self> {
        let step = run.progress_step.clone()?;
        Some(Self {
            step,
            current: run.progress_current,
            total: run.progress_total,
            message: run.progress_message.clone().unwrap_or_default(),
            entity: run.progress_entity.clone(),
            item: run.progress_item.clone(),
        })
    }
}

#[async_trait]
pub trait PipelineStore: Send + Sync {
    // Runs

    async fn create_run(&self, filters: &TriageFilters) -> Result<Run>;

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>>;

    /// Most recent first
    async fn list_runs(&self, limit: u64) -> Result<Vec<Run>>;

    /// Forward-only status write. Terminal statuses stamp `completed_at`,
    /// `triage` stamps `started_at`.
    async fn update_run_status(
        &self,
        id: Uuid,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<bool>;

    /// Move an `error` run back to `detailing` so it can be resumed, clearing
    /// its error and `completed_at`. This is the only backward transition a
    /// run takes and only resume uses it; `done` runs are never reopened.
    async fn reopen_run(&self, id: Uuid) -> Result<bool>;

    async fn set_run_channel_count(&self, id: Uuid, count: i32) -> Result<()>;

    async fn record_progress(&self, id: Uuid, progress: &RunProgress) -> Result<()>;

    // Ingested data

    /// Up to `consider_count` matching channels, most subscribers first
    async fn find_candidates(&self, filters: &TriageFilters) -> Result<Vec<Channel>>;

    async fn list_cached_videos(&self, youtube_channel_id: &str) -> Result<Vec<Video>>;

    // Run channels

    async fn insert_run_channel(&self, new: NewRunChannel) -> Result<RunChannel>;

    /// Ordered by priority
    async fn list_run_channels(&self, run_id: Uuid) -> Result<Vec<RunChannel>>;

    async fn get_run_channel(&self, id: Uuid) -> Result<Option<RunChannel>>;

    async fn transition_channel(&self, id: Uuid, status: ChannelStatus) -> Result<bool>;

    async fn fail_channel(&self, id: Uuid, message: String) -> Result<bool>;

    async fn save_strategy(&self, id: Uuid, strategy: serde_json::Value) -> Result<bool>;

    /// Marks the channel `done` with its post draft
    async fn complete_channel(
        &self,
        id: Uuid,
        post_text: String,
        post_category: String,
    ) -> Result<bool>;

    /// Fails every non-terminal channel of the run, returns how many
    async fn cancel_run_channels(&self, run_id: Uuid, message: String) -> Result<u64>;

    // Storyboards

    async fn insert_storyboard(&self, new: NewStoryboard) -> Result<Storyboard>;

    async fn list_storyboards(&self, run_channel_id: Uuid) -> Result<Vec<Storyboard>>;

    // Call logs

    async fn append_call_log(&self, new: NewCallLog) -> Result<CallLog>;

    /// Settles a `pending` row exactly once
    async fn finish_call_log(&self, id: Uuid, outcome: CallOutcome) -> Result<()>;

    /// In creation order
    async fn list_call_logs(&self, run_id: Uuid) -> Result<Vec<CallLog>>;

    async fn ping(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(subscribers: i64, age_days: Option<i64>) -> Channel {
        let now = Utc::now();
        Channel {
            id: Uuid::new_v4(),
            youtube_channel_id: "UC123".into(),
            title: "Test".into(),
            url: "https://www.youtube.com/@test".into(),
            subscriber_count: subscribers,
            video_count: 10,
            view_count: 1000,
            first_upload_at: age_days.map(|d| (now - chrono::Duration::days(d)).into()),
            category: None,
            description: None,
            discovered_at: now.into(),
        }
    }

    #[test]
    fn test_subscriber_bounds() {
        let filters = TriageFilters {
            min_subscribers: Some(1_000),
            max_subscribers: Some(50_000),
            ..Default::default()
        };
        let now = Utc::now();
        assert!(filters.matches(&channel(10_000, None), now));
        assert!(!filters.matches(&channel(500, None), now));
        assert!(!filters.matches(&channel(60_000, None), now));
    }

    #[test]
    fn test_max_age_requires_known_age() {
        let filters = TriageFilters {
            max_age_days: Some(90),
            ..Default::default()
        };
        let now = Utc::now();
        assert!(filters.matches(&channel(10, Some(30)), now));
        assert!(!filters.matches(&channel(10, Some(200)), now));
        assert!(!filters.matches(&channel(10, None), now));
    }

    #[test]
    fn test_discovery_window() {
        let now = Utc::now();
        let filters = TriageFilters {
            discovered_after: Some(now + chrono::Duration::hours(1)),
            ..Default::default()
        };
        assert!(!filters.matches(&channel(10, None), now));
    }
}
