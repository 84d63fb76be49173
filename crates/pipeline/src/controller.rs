//! Run controller
//!
//! Owns the run state machine: triage, then each channel through enrichment
//! one at a time. `resume` re-enters over persisted state and `cancel` marks
//! outstanding work terminal so in-flight writes become no-ops.

use crate::enrichment::{EnrichmentStage, EntryPoint};
use crate::errors::PipelineError;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::triage::TriageStage;
use channelforge_common::db::models::{ChannelStatus, Run, RunChannel, RunStatus};
use channelforge_common::db::{PipelineStore, TriageFilters};
use channelforge_common::metrics;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

pub const CANCELLED_BY_USER: &str = "Cancelled by user";
pub const RUN_CANCELLED: &str = "Run cancelled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CancelOutcome {
    /// Whether the run itself was still open
    pub run_cancelled: bool,
    pub channels_cancelled: u64,
}

pub struct RunController {
    store: Arc<dyn PipelineStore>,
    triage: TriageStage,
    enrichment: EnrichmentStage,
    reporter: ProgressReporter,
    stale_after: chrono::Duration,
}

impl RunController {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        triage: TriageStage,
        enrichment: EnrichmentStage,
        reporter: ProgressReporter,
        stale_after: chrono::Duration,
    ) -> Self {
        Self {
            store,
            triage,
            enrichment,
            reporter,
            stale_after,
        }
    }

    /// Execute a freshly created run. Returns the run's final status; only a
    /// failure to record that status is an `Err`.
    #[instrument(skip(self, filters), fields(run_id = %run_id))]
    pub async fn execute(
        &self,
        run_id: Uuid,
        filters: &TriageFilters,
    ) -> Result<RunStatus, PipelineError> {
        match self.triage_then_enrich(run_id, filters).await {
            Ok(()) => self.finish(run_id).await,
            Err(e) => self.fail_run(run_id, e).await,
        }
    }

    async fn triage_then_enrich(
        &self,
        run_id: Uuid,
        filters: &TriageFilters,
    ) -> Result<(), PipelineError> {
        self.store
            .update_run_status(run_id, RunStatus::Triage, None)
            .await?;
        self.reporter
            .emit(ProgressEvent::new(run_id, "triage", "Ranking candidate channels"))
            .await;

        let channels = self.triage.run(run_id, filters).await?;
        if self.sweep_if_closed(run_id).await? {
            return Ok(());
        }
        self.reporter
            .emit(
                ProgressEvent::new(
                    run_id,
                    "triage",
                    format!("Selected {} channels", channels.len()),
                )
                .counts(channels.len(), channels.len()),
            )
            .await;

        let plan = channels
            .into_iter()
            .map(|c| (c, EntryPoint::Detail))
            .collect();
        self.enrich_all(run_id, plan).await
    }

    /// Re-enter a run over its persisted state. Triage is never repeated.
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn resume(&self, run_id: Uuid) -> Result<RunStatus, PipelineError> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or(PipelineError::RunNotFound(run_id))?;

        let now = Utc::now();
        let plan: Vec<(RunChannel, EntryPoint)> = self
            .store
            .list_run_channels(run_id)
            .await?
            .into_iter()
            .filter_map(|c| self.entry_point(&c, now).map(|entry| (c, entry)))
            .collect();

        if plan.is_empty() {
            info!(status = %run.status, "Nothing to resume");
            return Ok(run.run_status());
        }

        if run.run_status() == RunStatus::Error {
            self.store.reopen_run(run_id).await?;
        } else {
            self.store
                .update_run_status(run_id, RunStatus::Detailing, None)
                .await?;
        }

        info!(channels = plan.len(), "Resuming run");
        self.reporter
            .emit(
                ProgressEvent::new(run_id, "resume", format!("Resuming {} channels", plan.len()))
                    .counts(0, plan.len()),
            )
            .await;

        match self.enrich_all(run_id, plan).await {
            Ok(()) => self.finish(run_id).await,
            Err(e) => self.fail_run(run_id, e).await,
        }
    }

    /// Where a channel re-enters enrichment on resume, `None` to leave it alone
    fn entry_point(&self, channel: &RunChannel, now: chrono::DateTime<Utc>) -> Option<EntryPoint> {
        let status = channel.channel_status();
        if status.is_terminal() {
            return None;
        }
        if status.is_in_progress() && !channel.is_stale(now, self.stale_after) {
            info!(channel = %channel.name, status = %status, "Channel owned by a live worker, skipping");
            return None;
        }

        match status {
            ChannelStatus::Pending | ChannelStatus::Detailing => Some(EntryPoint::Detail),
            ChannelStatus::Synthesizing => Some(EntryPoint::Synthesis),
            ChannelStatus::ArtifactGen if channel.strategy.is_some() => Some(EntryPoint::Artifact),
            ChannelStatus::ArtifactGen => Some(EntryPoint::Synthesis),
            ChannelStatus::Done | ChannelStatus::Error => None,
        }
    }

    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn cancel(&self, run_id: Uuid) -> Result<CancelOutcome, PipelineError> {
        if self.store.get_run(run_id).await?.is_none() {
            return Err(PipelineError::RunNotFound(run_id));
        }

        let run_cancelled = self
            .store
            .update_run_status(run_id, RunStatus::Error, Some(CANCELLED_BY_USER.to_string()))
            .await?;
        let channels_cancelled = self
            .store
            .cancel_run_channels(run_id, RUN_CANCELLED.to_string())
            .await?;

        if run_cancelled {
            metrics::record_run_finished(RunStatus::Error.as_str());
            self.reporter
                .emit(ProgressEvent::new(run_id, "error", CANCELLED_BY_USER))
                .await;
        }
        info!(run_cancelled, channels_cancelled, "Cancel requested");

        Ok(CancelOutcome {
            run_cancelled,
            channels_cancelled,
        })
    }

    async fn enrich_all(
        &self,
        run_id: Uuid,
        plan: Vec<(RunChannel, EntryPoint)>,
    ) -> Result<(), PipelineError> {
        let total = plan.len();
        for (index, (planned, entry)) in plan.into_iter().enumerate() {
            if self.sweep_if_closed(run_id).await? {
                break;
            }
            // Re-read: a cancel may have landed since the plan was made
            let Some(channel) = self.store.get_run_channel(planned.id).await? else {
                warn!(channel = %planned.name, "Run channel disappeared, skipping");
                continue;
            };
            if channel.is_terminal() {
                info!(channel = %channel.name, status = %channel.status, "Channel already terminal, skipping");
                continue;
            }

            self.reporter
                .emit(
                    ProgressEvent::new(run_id, "detailing", format!("Enriching {}", channel.name))
                        .entity(&channel.name)
                        .counts(index, total),
                )
                .await;

            let status = self.enrichment.enrich(run_id, &channel, entry).await?;
            info!(channel = %channel.name, status = %status, "Channel finished");
        }
        Ok(())
    }

    /// True when the run was closed under us. Channels created after the
    /// close (a triage that finished late) are failed so nothing stays open.
    async fn sweep_if_closed(&self, run_id: Uuid) -> Result<bool, PipelineError> {
        let Some(run) = self.store.get_run(run_id).await? else {
            return Err(PipelineError::RunNotFound(run_id));
        };
        if !run.is_terminal() {
            return Ok(false);
        }

        let swept = self
            .store
            .cancel_run_channels(run_id, RUN_CANCELLED.to_string())
            .await?;
        warn!(status = %run.status, swept, "Run closed while working, stopping");
        Ok(true)
    }

    async fn finish(&self, run_id: Uuid) -> Result<RunStatus, PipelineError> {
        let channels = self.store.list_run_channels(run_id).await?;
        if channels.iter().any(|c| !c.is_terminal()) {
            // Some channel is held by another worker; leave the run open
            return self.current_status(run_id).await;
        }

        if self
            .store
            .update_run_status(run_id, RunStatus::Done, None)
            .await?
        {
            let done = channels
                .iter()
                .filter(|c| c.channel_status() == ChannelStatus::Done)
                .count();
            metrics::record_run_finished(RunStatus::Done.as_str());
            self.reporter
                .emit(
                    ProgressEvent::new(
                        run_id,
                        "done",
                        format!("Run complete: {}/{} channels done", done, channels.len()),
                    )
                    .counts(channels.len(), channels.len()),
                )
                .await;
            info!(done, total = channels.len(), "Run complete");
        }
        self.current_status(run_id).await
    }

    async fn fail_run(&self, run_id: Uuid, cause: PipelineError) -> Result<RunStatus, PipelineError> {
        let message = cause.to_string();
        error!(run_id = %run_id, error = %message, "Run failed");

        if self
            .store
            .update_run_status(run_id, RunStatus::Error, Some(message.clone()))
            .await?
        {
            metrics::record_run_finished(RunStatus::Error.as_str());
            self.reporter
                .emit(ProgressEvent::new(run_id, "error", message))
                .await;
        }
        self.current_status(run_id).await
    }

    async fn current_status(&self, run_id: Uuid) -> Result<RunStatus, PipelineError> {
        self.store
            .get_run(run_id)
            .await?
            .as_ref()
            .map(Run::run_status)
            .ok_or(PipelineError::RunNotFound(run_id))
    }
}
