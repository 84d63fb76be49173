//! Repository pattern for database operations
//!
//! Postgres implementation of `PipelineStore`. Guarded status writes are
//! `UPDATE ... WHERE status IN (...)` statements so they stay correct when
//! several workers share the database.

use crate::db::models::*;
use crate::db::store::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use uuid::Uuid;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    fn non_terminal_channel_statuses() -> Vec<String> {
        ChannelStatus::non_terminal()
            .into_iter()
            .map(String::from)
            .collect()
    }
}

#[async_trait]
impl PipelineStore for Repository {
    // ========================================================================
    // Run Operations
    // ========================================================================

    async fn create_run(&self, filters: &TriageFilters) -> Result<Run> {
        let now = Utc::now();

        let run = RunActiveModel {
            id: Set(Uuid::new_v4()),
            status: Set(RunStatus::Pending.into()),
            channel_count: Set(0),
            filters: Set(serde_json::to_value(filters)?),
            error_message: Set(None),
            progress_step: Set(None),
            progress_current: Set(0),
            progress_total: Set(0),
            progress_message: Set(None),
            progress_entity: Set(None),
            progress_item: Set(None),
            created_at: Set(now.into()),
            started_at: Set(None),
            completed_at: Set(None),
        };

        run.insert(self.write_conn()).await.map_err(Into::into)
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>> {
        RunEntity::find_by_id(id)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_runs(&self, limit: u64) -> Result<Vec<Run>> {
        RunEntity::find()
            .order_by_desc(RunColumn::CreatedAt)
            .limit(limit)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn update_run_status(
        &self,
        id: Uuid,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<bool> {
        let now = Utc::now();
        let predecessors: Vec<String> = RunStatus::predecessors_of(status)
            .into_iter()
            .map(String::from)
            .collect();

        let mut update = RunEntity::update_many()
            .col_expr(RunColumn::Status, Expr::value(String::from(status)));

        if let Some(message) = error {
            update = update.col_expr(RunColumn::ErrorMessage, Expr::value(message));
        }
        if status == RunStatus::Triage {
            update = update.col_expr(RunColumn::StartedAt, Expr::value(now));
        }
        if status.is_terminal() {
            update = update.col_expr(RunColumn::CompletedAt, Expr::value(now));
        }

        let result = update
            .filter(RunColumn::Id.eq(id))
            .filter(RunColumn::Status.is_in(predecessors))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn reopen_run(&self, id: Uuid) -> Result<bool> {
        let result = RunEntity::update_many()
            .col_expr(RunColumn::Status, Expr::value(String::from(RunStatus::Detailing)))
            .col_expr(RunColumn::ErrorMessage, Expr::value(Option::<String>::None))
            .col_expr(
                RunColumn::CompletedAt,
                Expr::value(Option::<chrono::DateTime<Utc>>::None),
            )
            .filter(RunColumn::Id.eq(id))
            .filter(RunColumn::Status.eq(String::from(RunStatus::Error)))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn set_run_channel_count(&self, id: Uuid, count: i32) -> Result<()> {
        let result = RunEntity::update_many()
            .col_expr(RunColumn::ChannelCount, Expr::value(count))
            .filter(RunColumn::Id.eq(id))
            .exec(self.write_conn())
            .await?;

        if result.rows_affected == 0 {
            return Err(AppError::RunNotFound { id: id.to_string() });
        }
        Ok(())
    }

    async fn record_progress(&self, id: Uuid, progress: &RunProgress) -> Result<()> {
        RunEntity::update_many()
            .col_expr(RunColumn::ProgressStep, Expr::value(progress.step.clone()))
            .col_expr(RunColumn::ProgressCurrent, Expr::value(progress.current))
            .col_expr(RunColumn::ProgressTotal, Expr::value(progress.total))
            .col_expr(RunColumn::ProgressMessage, Expr::value(progress.message.clone()))
            .col_expr(RunColumn::ProgressEntity, Expr::value(progress.entity.clone()))
            .col_expr(RunColumn::ProgressItem, Expr::value(progress.item.clone()))
            .filter(RunColumn::Id.eq(id))
            .exec(self.write_conn())
            .await?;
        Ok(())
    }

    // ========================================================================
    // Ingested Data
    // ========================================================================

    async fn find_candidates(&self, filters: &TriageFilters) -> Result<Vec<Channel>> {
        let now = Utc::now();
        let mut query = ChannelEntity::find();

        if let Some(after) = filters.discovered_after {
            query = query.filter(ChannelColumn::DiscoveredAt.gte(after));
        }
        if let Some(before) = filters.discovered_before {
            query = query.filter(ChannelColumn::DiscoveredAt.lte(before));
        }
        if let Some(min) = filters.min_subscribers {
            query = query.filter(ChannelColumn::SubscriberCount.gte(min));
        }
        if let Some(max) = filters.max_subscribers {
            query = query.filter(ChannelColumn::SubscriberCount.lte(max));
        }
        if let Some(max_age) = filters.max_age_days {
            let born_after = now - chrono::Duration::days(max_age as i64);
            query = query.filter(ChannelColumn::FirstUploadAt.gte(born_after));
        }

        query
            .order_by_desc(ChannelColumn::SubscriberCount)
            .limit(filters.consider_count as u64)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_cached_videos(&self, youtube_channel_id: &str) -> Result<Vec<Video>> {
        VideoEntity::find()
            .filter(VideoColumn::YoutubeChannelId.eq(youtube_channel_id))
            .order_by_desc(VideoColumn::ViewCount)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Run Channel Operations
    // ========================================================================

    async fn insert_run_channel(&self, new: NewRunChannel) -> Result<RunChannel> {
        let now = Utc::now();
        let channel = new.channel;

        let row = RunChannelActiveModel {
            id: Set(Uuid::new_v4()),
            run_id: Set(new.run_id),
            channel_id: Set(channel.id),
            channel_age_days: Set(channel.age_days(now).map(|d| d as i32)),
            youtube_channel_id: Set(channel.youtube_channel_id),
            name: Set(channel.title),
            url: Set(channel.url),
            priority: Set(new.priority),
            interest_score: Set(new.interest_score),
            rationale: Set(new.rationale),
            look_for: Set(new.look_for),
            subscriber_count: Set(channel.subscriber_count),
            video_count: Set(channel.video_count),
            category: Set(channel.category),
            description: Set(channel.description),
            status: Set(ChannelStatus::Pending.into()),
            strategy: Set(None),
            post_text: Set(None),
            post_category: Set(None),
            error_message: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        row.insert(self.write_conn()).await.map_err(Into::into)
    }

    async fn list_run_channels(&self, run_id: Uuid) -> Result<Vec<RunChannel>> {
        RunChannelEntity::find()
            .filter(RunChannelColumn::RunId.eq(run_id))
            .order_by_asc(RunChannelColumn::Priority)
            .all(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn get_run_channel(&self, id: Uuid) -> Result<Option<RunChannel>> {
        RunChannelEntity::find_by_id(id)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn transition_channel(&self, id: Uuid, status: ChannelStatus) -> Result<bool> {
        let result = RunChannelEntity::update_many()
            .col_expr(RunChannelColumn::Status, Expr::value(String::from(status)))
            .col_expr(RunChannelColumn::UpdatedAt, Expr::value(Utc::now()))
            .filter(RunChannelColumn::Id.eq(id))
            .filter(RunChannelColumn::Status.is_in(Self::non_terminal_channel_statuses()))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn fail_channel(&self, id: Uuid, message: String) -> Result<bool> {
        let result = RunChannelEntity::update_many()
            .col_expr(
                RunChannelColumn::Status,
                Expr::value(String::from(ChannelStatus::Error)),
            )
            .col_expr(RunChannelColumn::ErrorMessage, Expr::value(message))
            .col_expr(RunChannelColumn::UpdatedAt, Expr::value(Utc::now()))
            .filter(RunChannelColumn::Id.eq(id))
            .filter(RunChannelColumn::Status.is_in(Self::non_terminal_channel_statuses()))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn save_strategy(&self, id: Uuid, strategy: serde_json::Value) -> Result<bool> {
        let result = RunChannelEntity::update_many()
            .col_expr(RunChannelColumn::Strategy, Expr::value(strategy))
            .col_expr(RunChannelColumn::UpdatedAt, Expr::value(Utc::now()))
            .filter(RunChannelColumn::Id.eq(id))
            .filter(RunChannelColumn::Status.is_in(Self::non_terminal_channel_statuses()))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn complete_channel(
        &self,
        id: Uuid,
        post_text: String,
        post_category: String,
    ) -> Result<bool> {
        let result = RunChannelEntity::update_many()
            .col_expr(
                RunChannelColumn::Status,
                Expr::value(String::from(ChannelStatus::Done)),
            )
            .col_expr(RunChannelColumn::PostText, Expr::value(post_text))
            .col_expr(RunChannelColumn::PostCategory, Expr::value(post_category))
            .col_expr(RunChannelColumn::UpdatedAt, Expr::value(Utc::now()))
            .filter(RunChannelColumn::Id.eq(id))
            .filter(RunChannelColumn::Status.is_in(Self::non_terminal_channel_statuses()))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn cancel_run_channels(&self, run_id: Uuid, message: String) -> Result<u64> {
        let result = RunChannelEntity::update_many()
            .col_expr(
                RunChannelColumn::Status,
                Expr::value(String::from(ChannelStatus::Error)),
            )
            .col_expr(RunChannelColumn::ErrorMessage, Expr::value(message))
            .col_expr(RunChannelColumn::UpdatedAt, Expr::value(Utc::now()))
            .filter(RunChannelColumn::RunId.eq(run_id))
            .filter(RunChannelColumn::Status.is_in(Self::non_terminal_channel_statuses()))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected)
    }

    // ========================================================================
    // Storyboard Operations
    // ========================================================================

    async fn insert_storyboard(&self, new: NewStoryboard) -> Result<Storyboard> {
        let row = StoryboardActiveModel {
            id: Set(Uuid::new_v4()),
            run_channel_id: Set(new.run_channel_id),
            video_id: Set(new.video_id),
            video_title: Set(new.video_title),
            view_count: Set(new.view_count),
            storyboard: Set(new.storyboard),
            status: Set(new.status.into()),
            error_message: Set(new.error),
            created_at: Set(Utc::now().into()),
        };

        row.insert(self.write_conn()).await.map_err(Into::into)
    }

    async fn list_storyboards(&self, run_channel_id: Uuid) -> Result<Vec<Storyboard>> {
        StoryboardEntity::find()
            .filter(StoryboardColumn::RunChannelId.eq(run_channel_id))
            .order_by_asc(StoryboardColumn::CreatedAt)
            .all(self.write_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Call Log Operations
    // ========================================================================

    async fn append_call_log(&self, new: NewCallLog) -> Result<CallLog> {
        let row = CallLogActiveModel {
            id: Set(Uuid::new_v4()),
            run_id: Set(new.run_id),
            run_channel_id: Set(new.run_channel_id),
            step: Set(new.step.as_str().to_string()),
            model: Set(new.model),
            request_payload: Set(new.request_payload),
            response_text: Set(None),
            duration_ms: Set(None),
            status: Set(CallStatus::Pending.into()),
            error_message: Set(None),
            input_tokens: Set(None),
            output_tokens: Set(None),
            total_tokens: Set(None),
            created_at: Set(Utc::now().into()),
        };

        row.insert(self.write_conn()).await.map_err(Into::into)
    }

    async fn finish_call_log(&self, id: Uuid, outcome: CallOutcome) -> Result<()> {
        let usage = outcome.usage.unwrap_or_default();

        CallLogEntity::update_many()
            .col_expr(CallLogColumn::Status, Expr::value(String::from(outcome.status)))
            .col_expr(CallLogColumn::ResponseText, Expr::value(outcome.response_text))
            .col_expr(CallLogColumn::DurationMs, Expr::value(outcome.duration_ms))
            .col_expr(CallLogColumn::ErrorMessage, Expr::value(outcome.error))
            .col_expr(CallLogColumn::InputTokens, Expr::value(usage.input_tokens))
            .col_expr(CallLogColumn::OutputTokens, Expr::value(usage.output_tokens))
            .col_expr(CallLogColumn::TotalTokens, Expr::value(usage.total_tokens))
            .filter(CallLogColumn::Id.eq(id))
            .filter(CallLogColumn::Status.eq(String::from(CallStatus::Pending)))
            .exec(self.write_conn())
            .await?;
        Ok(())
    }

    async fn list_call_logs(&self, run_id: Uuid) -> Result<Vec<CallLog>> {
        CallLogEntity::find()
            .filter(CallLogColumn::RunId.eq(run_id))
            .order_by_asc(CallLogColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }
}
