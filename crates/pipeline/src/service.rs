//! Pipeline control surface
//!
//! The entry point shared by the CLI and the HTTP gateway. Background runs
//! execute on spawned tokio tasks; an in-process registry keeps one worker
//! per run id.

use crate::calls::CallGateway;
use crate::controller::{CancelOutcome, RunController};
use crate::enrichment::EnrichmentStage;
use crate::errors::PipelineError;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::resolver::MetadataResolver;
use crate::schema::PostDraft;
use crate::triage::TriageStage;
use channelforge_common::config::{AppConfig, PipelineConfig};
use channelforge_common::db::models::{CallLog, Run, RunChannel, RunStatus, Storyboard};
use channelforge_common::db::{PipelineStore, TriageFilters};
use channelforge_common::llm::LlmClient;
use channelforge_common::youtube::RemoteVideoSource;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{error, info};
use uuid::Uuid;

/// A run with everything produced under it
#[derive(Debug, Clone, Serialize)]
pub struct RunDetail {
    pub run: Run,
    pub channels: Vec<ChannelDetail>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelDetail {
    pub channel: RunChannel,
    pub storyboards: Vec<Storyboard>,
    pub post: Option<PostDraft>,
}

type ActiveRuns = Arc<Mutex<HashSet<Uuid>>>;

/// Removes the run id from the registry when the worker ends, even on panic
struct ActiveGuard {
    active: ActiveRuns,
    run_id: Uuid,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.run_id);
    }
}

#[derive(Clone)]
pub struct PipelineService {
    controller: Arc<RunController>,
    store: Arc<dyn PipelineStore>,
    reporter: ProgressReporter,
    active: ActiveRuns,
}

impl PipelineService {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        llm: Arc<dyn LlmClient>,
        remote: Option<Arc<dyn RemoteVideoSource>>,
        pipeline: &PipelineConfig,
        short_form_max_secs: u32,
    ) -> Self {
        let reporter = ProgressReporter::new(store.clone(), pipeline.progress_capacity);
        let gateway = CallGateway::new(llm, store.clone());
        let resolver = MetadataResolver::new(store.clone(), remote, short_form_max_secs);

        let triage = TriageStage::new(gateway.clone(), store.clone(), pipeline.steps.triage);
        let enrichment = EnrichmentStage::new(
            gateway,
            store.clone(),
            resolver,
            reporter.clone(),
            pipeline.steps.clone(),
            pipeline.detail_concurrency(),
            pipeline.videos_per_channel,
        );
        let controller = RunController::new(
            store.clone(),
            triage,
            enrichment,
            reporter.clone(),
            pipeline.stale_after(),
        );

        Self {
            controller: Arc::new(controller),
            store,
            reporter,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn PipelineStore>,
        llm: Arc<dyn LlmClient>,
        remote: Option<Arc<dyn RemoteVideoSource>>,
    ) -> Self {
        Self::new(
            store,
            llm,
            remote,
            &config.pipeline,
            config.youtube.short_form_max_secs,
        )
    }

    pub fn store(&self) -> Arc<dyn PipelineStore> {
        self.store.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.reporter.subscribe()
    }

    pub fn is_active(&self, run_id: Uuid) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&run_id)
    }

    fn claim(&self, run_id: Uuid) -> Result<ActiveGuard, PipelineError> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(run_id) {
            return Err(PipelineError::AlreadyActive(run_id));
        }
        Ok(ActiveGuard {
            active: self.active.clone(),
            run_id,
        })
    }

    /// Create a run and execute it on a background task
    pub async fn start(&self, filters: TriageFilters) -> Result<Uuid, PipelineError> {
        let run = self.store.create_run(&filters).await?;
        let guard = self.claim(run.id)?;
        info!(run_id = %run.id, "Run created");

        let controller = self.controller.clone();
        let run_id = run.id;
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = controller.execute(run_id, &filters).await {
                error!(run_id = %run_id, error = %e, "Run worker failed");
            }
        });
        Ok(run_id)
    }

    /// Create a run and execute it inline
    pub async fn run_to_completion(&self, filters: TriageFilters) -> Result<Run, PipelineError> {
        let run = self.store.create_run(&filters).await?;
        let _guard = self.claim(run.id)?;
        info!(run_id = %run.id, "Run created");

        self.controller.execute(run.id, &filters).await?;
        self.get_run(run.id).await
    }

    /// Resume on a background task
    pub async fn resume(&self, run_id: Uuid) -> Result<(), PipelineError> {
        self.get_run(run_id).await?;
        let guard = self.claim(run_id)?;

        let controller = self.controller.clone();
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = controller.resume(run_id).await {
                error!(run_id = %run_id, error = %e, "Resume worker failed");
            }
        });
        Ok(())
    }

    pub async fn resume_to_completion(&self, run_id: Uuid) -> Result<Run, PipelineError> {
        self.get_run(run_id).await?;
        let _guard = self.claim(run_id)?;

        self.controller.resume(run_id).await?;
        self.get_run(run_id).await
    }

    /// Allowed while a worker is active; the worker notices at its next write
    pub async fn cancel(&self, run_id: Uuid) -> Result<CancelOutcome, PipelineError> {
        self.controller.cancel(run_id).await
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<Run, PipelineError> {
        self.store
            .get_run(run_id)
            .await?
            .ok_or(PipelineError::RunNotFound(run_id))
    }

    pub async fn run_detail(&self, run_id: Uuid) -> Result<RunDetail, PipelineError> {
        let run = self.get_run(run_id).await?;
        let mut channels = Vec::new();
        for channel in self.store.list_run_channels(run_id).await? {
            let storyboards = self.store.list_storyboards(channel.id).await?;
            let post = match (&channel.post_text, &channel.post_category) {
                (Some(text), Some(category)) => Some(PostDraft {
                    post_text: text.clone(),
                    category: category.clone(),
                }),
                _ => None,
            };
            channels.push(ChannelDetail {
                channel,
                storyboards,
                post,
            });
        }
        Ok(RunDetail { run, channels })
    }

    pub async fn list_runs(&self, limit: u64) -> Result<Vec<Run>, PipelineError> {
        Ok(self.store.list_runs(limit).await?)
    }

    pub async fn call_logs(&self, run_id: Uuid) -> Result<Vec<CallLog>, PipelineError> {
        self.get_run(run_id).await?;
        Ok(self.store.list_call_logs(run_id).await?)
    }

    /// Wait until no worker holds the run and its status is terminal
    pub async fn wait_for_terminal(&self, run_id: Uuid) -> Result<RunStatus, PipelineError> {
        loop {
            let run = self.get_run(run_id).await?;
            if run.is_terminal() && !self.is_active(run_id) {
                return Ok(run.run_status());
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
    }
}
