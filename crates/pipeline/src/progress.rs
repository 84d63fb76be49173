//! Run progress events
//!
//! Every event is written onto the run row first and then broadcast, so a
//! subscriber that re-reads the run after receiving an event sees the same
//! snapshot. Emits are serialized so concurrent extractions cannot reorder
//! the write and the send.

use channelforge_common::db::{PipelineStore, RunProgress};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub run_id: Uuid,

    /// Stage label: triage, detailing, synthesizing, artifact_gen, done, error
    pub step: String,

    pub entity_name: Option<String>,

    pub item_id: Option<String>,

    pub progress: i32,

    pub total: i32,

    pub message: String,
}

impl ProgressEvent {
    pub fn new(run_id: Uuid, step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            run_id,
            step: step.into(),
            entity_name: None,
            item_id: None,
            progress: 0,
            total: 0,
            message: message.into(),
        }
    }

    pub fn entity(mut self, name: impl Into<String>) -> Self {
        self.entity_name = Some(name.into());
        self
    }

    pub fn item(mut self, id: impl Into<String>) -> Self {
        self.item_id = Some(id.into());
        self
    }

    pub fn counts(mut self, progress: usize, total: usize) -> Self {
        self.progress = progress as i32;
        self.total = total as i32;
        self
    }

    /// The snapshot pollers see on the run row
    pub fn snapshot(&self) -> RunProgress {
        RunProgress {
            step: self.step.clone(),
            current: self.progress,
            total: self.total,
            message: self.message.clone(),
            entity: self.entity_name.clone(),
            item: self.item_id.clone(),
        }
    }
}

/// Publishes progress to subscribers and persists it for pollers
#[derive(Clone)]
pub struct ProgressReporter {
    tx: broadcast::Sender<ProgressEvent>,
    store: Arc<dyn PipelineStore>,
    publish: Arc<Mutex<()>>,
}

impl ProgressReporter {
    pub fn new(store: Arc<dyn PipelineStore>, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            store,
            publish: Arc::new(Mutex::new(())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub async fn emit(&self, event: ProgressEvent) {
        let _guard = self.publish.lock().await;
        if let Err(e) = self.store.record_progress(event.run_id, &event.snapshot()).await {
            warn!(run_id = %event.run_id, error = %e, "Failed to persist progress");
        }
        // No subscribers is fine
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use channelforge_common::db::{MemoryStore, TriageFilters};

    #[tokio::test]
    async fn test_emit_persists_and_broadcasts() {
        let store = Arc::new(MemoryStore::new());
        let run = store.create_run(&TriageFilters::default()).await.unwrap();
        let reporter = ProgressReporter::new(store.clone(), 16);
        let mut rx = reporter.subscribe();

        let event = ProgressEvent::new(run.id, "detailing", "Extracting storyboards")
            .entity("Alpha")
            .item("vid1")
            .counts(1, 3);
        reporter.emit(event.clone()).await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);

        let run = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(RunProgress::from_run(&run), Some(event.snapshot()));
    }

    #[tokio::test]
    async fn test_concurrent_emits_end_on_persisted_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let run = store.create_run(&TriageFilters::default()).await.unwrap();
        let reporter = ProgressReporter::new(store.clone(), 64);
        let mut rx = reporter.subscribe();
        let run_id = run.id;

        let emits = (0..20).map(|i| {
            let reporter = reporter.clone();
            async move {
                reporter
                    .emit(
                        ProgressEvent::new(run_id, "detailing", format!("video {}", i))
                            .item(format!("vid{}", i))
                            .counts(i, 20),
                    )
                    .await
            }
        });
        futures::future::join_all(emits).await;

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        let last = last.unwrap();

        let run = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(RunProgress::from_run(&run), Some(last.snapshot()));
    }

    #[tokio::test]
    async fn test_emit_without_subscribers() {
        let store = Arc::new(MemoryStore::new());
        let run = store.create_run(&TriageFilters::default()).await.unwrap();
        let reporter = ProgressReporter::new(store, 4);
        assert_eq!(reporter.subscriber_count(), 0);
        reporter.emit(ProgressEvent::new(run.id, "triage", "Starting")).await;
    }
}
