//! Server-sent progress events for one run

use crate::AppState;
use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use channelforge_common::db::RunProgress;
use channelforge_common::errors::Result;
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use uuid::Uuid;

/// Steps after which a run emits nothing further
const FINAL_STEPS: [&str; 2] = ["done", "error"];

/// GET /runs/{id}/events
///
/// Opens with the persisted snapshot, then forwards live events for the run
/// until it reaches `done` or `error`.
pub async fn run_events(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    // Subscribe before reading the snapshot so nothing falls in between
    let mut rx = state.service.subscribe();
    let run = state.service.get_run(run_id).await?;
    let snapshot = RunProgress::from_run(&run).unwrap_or_default();
    let finished = run.is_terminal();

    debug!(run_id = %run_id, "SSE client connected");

    let stream = async_stream::stream! {
        match serde_json::to_string(&snapshot) {
            Ok(data) => yield Ok(Event::default().event("snapshot").data(data)),
            Err(e) => warn!(error = %e, "SSE: failed to serialize snapshot"),
        }
        if finished {
            return;
        }

        loop {
            match rx.recv().await {
                Ok(event) if event.run_id == run_id => {
                    let last = FINAL_STEPS.contains(&event.step.as_str());
                    match serde_json::to_string(&event) {
                        Ok(data) => yield Ok(Event::default().event("progress").data(data)),
                        Err(e) => warn!(error = %e, "SSE: failed to serialize event"),
                    }
                    if last {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(run_id = %run_id, skipped, "SSE: client lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    ))
}
