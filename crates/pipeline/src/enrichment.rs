//! Per-channel enrichment
//!
//! storyboards (bounded batches) -> strategy synthesis -> post draft. Call
//! failures are recorded on the storyboard or the channel and never escape;
//! only store failures do.

use crate::calls::{CallGateway, CallSpec};
use crate::errors::PipelineError;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::prompts;
use crate::resolver::MetadataResolver;
use crate::schema::{PostDraft, StoryboardResponse, StrategyAnalysis};
use channelforge_common::config::StepSettingsConfig;
use channelforge_common::db::models::{
    CallStep, ChannelStatus, RunChannel, RunStatus, StoryboardStatus,
};
use channelforge_common::db::{NewStoryboard, PipelineStore};
use channelforge_common::metrics;
use channelforge_common::youtube::VideoItem;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Sub-stage a channel (re-)enters enrichment at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    Detail,
    Synthesis,
    Artifact,
}

#[derive(Clone)]
pub struct EnrichmentStage {
    gateway: CallGateway,
    store: Arc<dyn PipelineStore>,
    resolver: MetadataResolver,
    reporter: ProgressReporter,
    steps: StepSettingsConfig,
    concurrency: usize,
    videos_per_channel: usize,
}

impl EnrichmentStage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: CallGateway,
        store: Arc<dyn PipelineStore>,
        resolver: MetadataResolver,
        reporter: ProgressReporter,
        steps: StepSettingsConfig,
        concurrency: usize,
        videos_per_channel: usize,
    ) -> Self {
        Self {
            gateway,
            store,
            resolver,
            reporter,
            steps,
            concurrency: concurrency.max(1),
            videos_per_channel,
        }
    }

    /// Drive one channel to a terminal status (or until it is cancelled).
    /// Returns the channel's status afterwards.
    #[instrument(skip(self, channel), fields(run_id = %run_id, channel = %channel.name))]
    pub async fn enrich(
        &self,
        run_id: Uuid,
        channel: &RunChannel,
        entry: EntryPoint,
    ) -> Result<ChannelStatus, PipelineError> {
        if entry == EntryPoint::Detail && !self.extract_storyboards(run_id, channel).await? {
            return self.current_status(channel.id).await;
        }

        let strategy = match (entry, channel.strategy.clone()) {
            (EntryPoint::Artifact, Some(strategy)) => Some(strategy),
            _ => self.synthesize(run_id, channel).await?,
        };

        if let Some(strategy) = strategy {
            self.generate_post(run_id, channel, strategy).await?;
        }

        let status = self.current_status(channel.id).await?;
        if status.is_terminal() {
            metrics::record_channel_finished(status.as_str());
        }
        Ok(status)
    }

    async fn current_status(&self, id: Uuid) -> Result<ChannelStatus, PipelineError> {
        Ok(self
            .store
            .get_run_channel(id)
            .await?
            .map(|c| c.channel_status())
            .unwrap_or(ChannelStatus::Error))
    }

    /// Move the channel and pull the run along. `false` means the channel is
    /// already terminal and work should stop.
    async fn enter(
        &self,
        run_id: Uuid,
        channel: &RunChannel,
        status: ChannelStatus,
        run_status: RunStatus,
    ) -> Result<bool, PipelineError> {
        if !self.store.transition_channel(channel.id, status).await? {
            info!(status = %status, "Channel already terminal, stopping");
            return Ok(false);
        }
        self.store.update_run_status(run_id, run_status, None).await?;
        Ok(true)
    }

    async fn fail(&self, channel: &RunChannel, message: String) -> Result<(), PipelineError> {
        warn!(channel = %channel.name, error = %message, "Channel failed");
        self.store.fail_channel(channel.id, message).await?;
        Ok(())
    }

    /// Returns `false` when the channel was cancelled underneath us
    async fn extract_storyboards(
        &self,
        run_id: Uuid,
        channel: &RunChannel,
    ) -> Result<bool, PipelineError> {
        if !self
            .enter(run_id, channel, ChannelStatus::Detailing, RunStatus::Detailing)
            .await?
        {
            return Ok(false);
        }

        let done: HashSet<String> = self
            .store
            .list_storyboards(channel.id)
            .await?
            .into_iter()
            .filter(|s| s.is_done())
            .map(|s| s.video_id)
            .collect();

        let videos: Vec<VideoItem> = self
            .resolver
            .top_videos(channel, self.videos_per_channel)
            .await?
            .into_iter()
            .filter(|v| !done.contains(&v.video_id))
            .collect();

        let total = videos.len();
        self.reporter
            .emit(
                ProgressEvent::new(run_id, "detailing", format!("Extracting {} storyboards", total))
                    .entity(&channel.name)
                    .counts(0, total),
            )
            .await;

        let finished = AtomicUsize::new(0);
        for batch in videos.chunks(self.concurrency) {
            let results = join_all(
                batch
                    .iter()
                    .map(|video| self.extract_one(run_id, channel, video, &finished, total)),
            )
            .await;
            for result in results {
                result?;
            }

            if self.current_status(channel.id).await?.is_terminal() {
                info!("Channel terminal between batches, stopping extraction");
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn extract_one(
        &self,
        run_id: Uuid,
        channel: &RunChannel,
        video: &VideoItem,
        finished: &AtomicUsize,
        total: usize,
    ) -> Result<(), PipelineError> {
        let spec = CallSpec::new(run_id, CallStep::Detail, self.steps.detail)
            .for_channel(channel.id)
            .with_media(video.watch_url());

        let result = self
            .gateway
            .call::<StoryboardResponse>(prompts::storyboard(channel, video), spec)
            .await;

        let (storyboard, status, error) = match result {
            Ok(output) => (Some(output.raw_json), StoryboardStatus::Done, None),
            Err(e) if e.is_call_failure() => (None, StoryboardStatus::Error, Some(e.to_string())),
            Err(e) => return Err(e),
        };
        metrics::record_storyboard(status == StoryboardStatus::Done);

        self.store
            .insert_storyboard(NewStoryboard {
                run_channel_id: channel.id,
                video_id: video.video_id.clone(),
                video_title: video.title.clone(),
                view_count: video.view_count,
                storyboard,
                status,
                error,
            })
            .await?;

        let progress = finished.fetch_add(1, Ordering::SeqCst) + 1;
        self.reporter
            .emit(
                ProgressEvent::new(run_id, "detailing", format!("Storyboard {}/{}", progress, total))
                    .entity(&channel.name)
                    .item(&video.video_id)
                    .counts(progress, total),
            )
            .await;
        Ok(())
    }

    /// Strategy JSON on success, `None` when the channel ended here
    async fn synthesize(
        &self,
        run_id: Uuid,
        channel: &RunChannel,
    ) -> Result<Option<serde_json::Value>, PipelineError> {
        let storyboards: Vec<_> = self
            .store
            .list_storyboards(channel.id)
            .await?
            .into_iter()
            .filter(|s| s.is_done())
            .collect();

        if storyboards.is_empty() {
            self.fail(channel, PipelineError::NoSuccessfulDetails.to_string())
                .await?;
            return Ok(None);
        }

        if !self
            .enter(run_id, channel, ChannelStatus::Synthesizing, RunStatus::Synthesizing)
            .await?
        {
            return Ok(None);
        }
        self.reporter
            .emit(
                ProgressEvent::new(
                    run_id,
                    "synthesizing",
                    format!("Synthesizing strategy from {} storyboards", storyboards.len()),
                )
                .entity(&channel.name),
            )
            .await;

        let spec = CallSpec::new(run_id, CallStep::Synthesis, self.steps.synthesis)
            .for_channel(channel.id);
        match self
            .gateway
            .call::<StrategyAnalysis>(prompts::strategy(channel, &storyboards), spec)
            .await
        {
            Ok(output) => {
                if self.store.save_strategy(channel.id, output.raw_json.clone()).await? {
                    Ok(Some(output.raw_json))
                } else {
                    Ok(None)
                }
            }
            Err(e) if e.is_call_failure() => {
                self.fail(channel, e.to_string()).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn generate_post(
        &self,
        run_id: Uuid,
        channel: &RunChannel,
        strategy: serde_json::Value,
    ) -> Result<(), PipelineError> {
        if !self
            .enter(run_id, channel, ChannelStatus::ArtifactGen, RunStatus::ArtifactGen)
            .await?
        {
            return Ok(());
        }
        self.reporter
            .emit(ProgressEvent::new(run_id, "artifact_gen", "Drafting post").entity(&channel.name))
            .await;

        let storyboard_count = self
            .store
            .list_storyboards(channel.id)
            .await?
            .iter()
            .filter(|s| s.is_done())
            .count();

        let spec = CallSpec::new(run_id, CallStep::Artifact, self.steps.artifact)
            .for_channel(channel.id);
        match self
            .gateway
            .call::<PostDraft>(prompts::post(channel, &strategy, storyboard_count), spec)
            .await
        {
            Ok(output) => {
                self.store
                    .complete_channel(channel.id, output.data.post_text, output.data.category)
                    .await?;
                Ok(())
            }
            Err(e) if e.is_call_failure() => self.fail(channel, e.to_string()).await,
            Err(e) => Err(e),
        }
    }
}
