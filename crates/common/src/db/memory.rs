//! In-memory `PipelineStore` used by tests and local dry runs

use crate::db::models::*;
use crate::db::store::*;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct State {
    channels: Vec<Channel>,
    videos: Vec<Video>,
    runs: Vec<Run>,
    run_channels: Vec<RunChannel>,
    storyboards: Vec<Storyboard>,
    call_logs: Vec<CallLog>,
}

/// Same conditional-update semantics as the Postgres repository
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    next_video_row: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an ingested channel
    pub async fn add_channel(&self, channel: Channel) {
        self.state.lock().await.channels.push(channel);
    }

    /// Seed a cached video observation; `row_id` is assigned here
    pub async fn add_video(&self, mut video: Video) {
        video.row_id = self.next_video_row.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.lock().await.videos.push(video);
    }

    /// Overwrite a run channel's `updated_at`, e.g. to simulate an abandoned worker
    pub async fn set_channel_updated_at(&self, id: Uuid, at: DateTime<Utc>) -> bool {
        let mut state = self.state.lock().await;
        match state.run_channels.iter_mut().find(|c| c.id == id) {
            Some(channel) => {
                channel.updated_at = at.into();
                true
            }
            None => false,
        }
    }

    /// Force a run channel into any status, bypassing the guards
    pub async fn force_channel_status(&self, id: Uuid, status: ChannelStatus) -> bool {
        let mut state = self.state.lock().await;
        match state.run_channels.iter_mut().find(|c| c.id == id) {
            Some(channel) => {
                channel.status = status.into();
                true
            }
            None => false,
        }
    }

    /// Apply `update` to a non-terminal run channel
    async fn update_open_channel<F>(&self, id: Uuid, update: F) -> Result<bool>
    where
        F: FnOnce(&mut RunChannel) + Send,
    {
        let mut state = self.state.lock().await;
        let channel = state
            .run_channels
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| AppError::ChannelNotFound { id: id.to_string() })?;

        if channel.is_terminal() {
            return Ok(false);
        }
        update(channel);
        channel.updated_at = Utc::now().into();
        Ok(true)
    }
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn create_run(&self, filters: &TriageFilters) -> Result<Run> {
        let run = Run {
            id: Uuid::new_v4(),
            status: RunStatus::Pending.into(),
            channel_count: 0,
            filters: serde_json::to_value(filters)?,
            error_message: None,
            progress_step: None,
            progress_current: 0,
            progress_total: 0,
            progress_message: None,
            progress_entity: None,
            progress_item: None,
            created_at: Utc::now().into(),
            started_at: None,
            completed_at: None,
        };
        self.state.lock().await.runs.push(run.clone());
        Ok(run)
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>> {
        let state = self.state.lock().await;
        Ok(state.runs.iter().find(|r| r.id == id).cloned())
    }

    async fn list_runs(&self, limit: u64) -> Result<Vec<Run>> {
        let state = self.state.lock().await;
        Ok(state
            .runs
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn update_run_status(
        &self,
        id: Uuid,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        let run = state
            .runs
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| AppError::RunNotFound { id: id.to_string() })?;

        if !run.run_status().can_transition_to(status) {
            return Ok(false);
        }

        let now = Utc::now();
        run.status = status.into();
        if error.is_some() {
            run.error_message = error;
        }
        if status == RunStatus::Triage && run.started_at.is_none() {
            run.started_at = Some(now.into());
        }
        if status.is_terminal() {
            run.completed_at = Some(now.into());
        }
        Ok(true)
    }

    async fn reopen_run(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().await;
        let run = state
            .runs
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| AppError::RunNotFound { id: id.to_string() })?;

        if run.run_status() != RunStatus::Error {
            return Ok(false);
        }
        run.status = RunStatus::Detailing.into();
        run.error_message = None;
        run.completed_at = None;
        Ok(true)
    }

    async fn set_run_channel_count(&self, id: Uuid, count: i32) -> Result<()> {
        let mut state = self.state.lock().await;
        let run = state
            .runs
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| AppError::RunNotFound { id: id.to_string() })?;
        run.channel_count = count;
        Ok(())
    }

    async fn record_progress(&self, id: Uuid, progress: &RunProgress) -> Result<()> {
        let mut state = self.state.lock().await;
        let run = state
            .runs
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| AppError::RunNotFound { id: id.to_string() })?;
        run.progress_step = Some(progress.step.clone());
        run.progress_current = progress.current;
        run.progress_total = progress.total;
        run.progress_message = Some(progress.message.clone());
        run.progress_entity = progress.entity.clone();
        run.progress_item = progress.item.clone();
        Ok(())
    }

    async fn find_candidates(&self, filters: &TriageFilters) -> Result<Vec<Channel>> {
        let state = self.state.lock().await;
        let now = Utc::now();
        let mut matching: Vec<Channel> = state
            .channels
            .iter()
            .filter(|c| filters.matches(c, now))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.subscriber_count.cmp(&a.subscriber_count));
        matching.truncate(filters.consider_count);
        Ok(matching)
    }

    async fn list_cached_videos(&self, youtube_channel_id: &str) -> Result<Vec<Video>> {
        let state = self.state.lock().await;
        Ok(state
            .videos
            .iter()
            .filter(|v| v.youtube_channel_id == youtube_channel_id)
            .cloned()
            .collect())
    }

    async fn insert_run_channel(&self, new: NewRunChannel) -> Result<RunChannel> {
        let now = Utc::now();
        let row = RunChannel {
            id: Uuid::new_v4(),
            run_id: new.run_id,
            channel_id: new.channel.id,
            youtube_channel_id: new.channel.youtube_channel_id.clone(),
            name: new.channel.title.clone(),
            url: new.channel.url.clone(),
            priority: new.priority,
            interest_score: new.interest_score,
            rationale: new.rationale,
            look_for: new.look_for,
            subscriber_count: new.channel.subscriber_count,
            video_count: new.channel.video_count,
            channel_age_days: new.channel.age_days(now).map(|d| d as i32),
            category: new.channel.category.clone(),
            description: new.channel.description.clone(),
            status: ChannelStatus::Pending.into(),
            strategy: None,
            post_text: None,
            post_category: None,
            error_message: None,
            created_at: now.into(),
            updated_at: now.into(),
        };
        self.state.lock().await.run_channels.push(row.clone());
        Ok(row)
    }

    async fn list_run_channels(&self, run_id: Uuid) -> Result<Vec<RunChannel>> {
        let state = self.state.lock().await;
        let mut rows: Vec<RunChannel> = state
            .run_channels
            .iter()
            .filter(|c| c.run_id == run_id)
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.priority);
        Ok(rows)
    }

    async fn get_run_channel(&self, id: Uuid) -> Result<Option<RunChannel>> {
        let state = self.state.lock().await;
        Ok(state.run_channels.iter().find(|c| c.id == id).cloned())
    }

    async fn transition_channel(&self, id: Uuid, status: ChannelStatus) -> Result<bool> {
        self.update_open_channel(id, |c| c.status = status.into()).await
    }

    async fn fail_channel(&self, id: Uuid, message: String) -> Result<bool> {
        self.update_open_channel(id, |c| {
            c.status = ChannelStatus::Error.into();
            c.error_message = Some(message);
        })
        .await
    }

    async fn save_strategy(&self, id: Uuid, strategy: serde_json::Value) -> Result<bool> {
        self.update_open_channel(id, |c| c.strategy = Some(strategy)).await
    }

    async fn complete_channel(
        &self,
        id: Uuid,
        post_text: String,
        post_category: String,
    ) -> Result<bool> {
        self.update_open_channel(id, |c| {
            c.status = ChannelStatus::Done.into();
            c.post_text = Some(post_text);
            c.post_category = Some(post_category);
        })
        .await
    }

    async fn cancel_run_channels(&self, run_id: Uuid, message: String) -> Result<u64> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut cancelled = 0;
        for channel in state
            .run_channels
            .iter_mut()
            .filter(|c| c.run_id == run_id && !c.is_terminal())
        {
            channel.status = ChannelStatus::Error.into();
            channel.error_message = Some(message.clone());
            channel.updated_at = now.into();
            cancelled += 1;
        }
        Ok(cancelled)
    }

    async fn insert_storyboard(&self, new: NewStoryboard) -> Result<Storyboard> {
        let row = Storyboard {
            id: Uuid::new_v4(),
            run_channel_id: new.run_channel_id,
            video_id: new.video_id,
            video_title: new.video_title,
            view_count: new.view_count,
            storyboard: new.storyboard,
            status: new.status.into(),
            error_message: new.error,
            created_at: Utc::now().into(),
        };
        self.state.lock().await.storyboards.push(row.clone());
        Ok(row)
    }

    async fn list_storyboards(&self, run_channel_id: Uuid) -> Result<Vec<Storyboard>> {
        let state = self.state.lock().await;
        Ok(state
            .storyboards
            .iter()
            .filter(|s| s.run_channel_id == run_channel_id)
            .cloned()
            .collect())
    }

    async fn append_call_log(&self, new: NewCallLog) -> Result<CallLog> {
        let row = CallLog {
            id: Uuid::new_v4(),
            run_id: new.run_id,
            run_channel_id: new.run_channel_id,
            step: new.step.as_str().to_string(),
            model: new.model,
            request_payload: new.request_payload,
            response_text: None,
            duration_ms: None,
            status: CallStatus::Pending.into(),
            error_message: None,
            input_tokens: None,
            output_tokens: None,
            total_tokens: None,
            created_at: Utc::now().into(),
        };
        self.state.lock().await.call_logs.push(row.clone());
        Ok(row)
    }

    async fn finish_call_log(&self, id: Uuid, outcome: CallOutcome) -> Result<()> {
        let mut state = self.state.lock().await;
        let log = state
            .call_logs
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| AppError::NotFound {
                resource_type: "call_log".into(),
                id: id.to_string(),
            })?;

        if log.call_status() != CallStatus::Pending {
            return Ok(());
        }
        log.status = outcome.status.into();
        log.response_text = outcome.response_text;
        log.duration_ms = Some(outcome.duration_ms);
        log.error_message = outcome.error;
        if let Some(usage) = outcome.usage {
            log.input_tokens = usage.input_tokens;
            log.output_tokens = usage.output_tokens;
            log.total_tokens = usage.total_tokens;
        }
        Ok(())
    }

    async fn list_call_logs(&self, run_id: Uuid) -> Result<Vec<CallLog>> {
        let state = self.state.lock().await;
        Ok(state
            .call_logs
            .iter()
            .filter(|l| l.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(title: &str, subscribers: i64) -> Channel {
        Channel {
            id: Uuid::new_v4(),
            youtube_channel_id: format!("UC{}", title),
            title: title.into(),
            url: format!("https://www.youtube.com/@{}", title),
            subscriber_count: subscribers,
            video_count: 12,
            view_count: 100_000,
            first_upload_at: None,
            category: Some("Education".into()),
            description: None,
            discovered_at: Utc::now().into(),
        }
    }

    #[tokio::test]
    async fn test_candidates_ordered_and_capped() {
        let store = MemoryStore::new();
        store.add_channel(channel("small", 100)).await;
        store.add_channel(channel("large", 90_000)).await;
        store.add_channel(channel("medium", 5_000)).await;

        let filters = TriageFilters {
            consider_count: 2,
            ..Default::default()
        };
        let found = store.find_candidates(&filters).await.unwrap();
        let titles: Vec<_> = found.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["large", "medium"]);
    }

    #[tokio::test]
    async fn test_run_status_is_forward_only() {
        let store = MemoryStore::new();
        let run = store.create_run(&TriageFilters::default()).await.unwrap();

        assert!(store.update_run_status(run.id, RunStatus::Triage, None).await.unwrap());
        assert!(store.update_run_status(run.id, RunStatus::Synthesizing, None).await.unwrap());
        assert!(!store.update_run_status(run.id, RunStatus::Detailing, None).await.unwrap());

        let run = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(run.run_status(), RunStatus::Synthesizing);
        assert!(run.started_at.is_some());
        assert!(run.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_terminal_run_rejects_writes() {
        let store = MemoryStore::new();
        let run = store.create_run(&TriageFilters::default()).await.unwrap();
        assert!(store
            .update_run_status(run.id, RunStatus::Error, Some("Cancelled by user".into()))
            .await
            .unwrap());
        assert!(!store.update_run_status(run.id, RunStatus::Done, None).await.unwrap());

        let run = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(run.error_message.as_deref(), Some("Cancelled by user"));
        assert!(run.completed_at.is_some());

        assert!(store.reopen_run(run.id).await.unwrap());
        let run = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(run.run_status(), RunStatus::Detailing);
        assert!(run.completed_at.is_none());
        assert!(run.error_message.is_none());
    }

    #[tokio::test]
    async fn test_only_errored_runs_reopen() {
        let store = MemoryStore::new();
        let run = store.create_run(&TriageFilters::default()).await.unwrap();
        assert!(!store.reopen_run(run.id).await.unwrap());

        assert!(store.update_run_status(run.id, RunStatus::Done, None).await.unwrap());
        assert!(!store.reopen_run(run.id).await.unwrap());

        let run = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(run.run_status(), RunStatus::Done);
        assert!(run.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_cancelled_channel_cannot_be_resurrected() {
        let store = MemoryStore::new();
        let run = store.create_run(&TriageFilters::default()).await.unwrap();
        let rc = store
            .insert_run_channel(NewRunChannel {
                run_id: run.id,
                channel: channel("alpha", 1_000),
                priority: 1,
                interest_score: 0.8,
                rationale: "fast growth".into(),
                look_for: None,
            })
            .await
            .unwrap();

        assert!(store.transition_channel(rc.id, ChannelStatus::Detailing).await.unwrap());
        assert_eq!(store.cancel_run_channels(run.id, "Run cancelled".into()).await.unwrap(), 1);
        assert!(!store.transition_channel(rc.id, ChannelStatus::Synthesizing).await.unwrap());
        assert!(!store.save_strategy(rc.id, serde_json::json!({})).await.unwrap());

        let rc = store.get_run_channel(rc.id).await.unwrap().unwrap();
        assert_eq!(rc.channel_status(), ChannelStatus::Error);
        assert_eq!(rc.error_message.as_deref(), Some("Run cancelled"));
        assert!(rc.strategy.is_none());
    }

    #[tokio::test]
    async fn test_call_log_settles_once() {
        let store = MemoryStore::new();
        let run_id = Uuid::new_v4();
        let log = store
            .append_call_log(NewCallLog {
                run_id,
                run_channel_id: None,
                step: CallStep::Triage,
                model: "test".into(),
                request_payload: "prompt".into(),
            })
            .await
            .unwrap();

        let outcome = |status| CallOutcome {
            status,
            response_text: None,
            duration_ms: 5,
            error: None,
            usage: None,
        };
        store.finish_call_log(log.id, outcome(CallStatus::Error)).await.unwrap();
        store.finish_call_log(log.id, outcome(CallStatus::Done)).await.unwrap();

        let logs = store.list_call_logs(run_id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].call_status(), CallStatus::Error);
    }
}
