//! Triage stage
//!
//! Filtered candidates go to one ranking call; the picks that resolve back to
//! a candidate become the run's channels.

use crate::calls::{CallGateway, CallSpec};
use crate::errors::PipelineError;
use crate::prompts;
use crate::schema::{TriagePick, TriageResponse};
use channelforge_common::config::StepSettings;
use channelforge_common::db::models::{CallStep, Channel, RunChannel};
use channelforge_common::db::{NewRunChannel, PipelineStore, TriageFilters};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct TriageStage {
    gateway: CallGateway,
    store: Arc<dyn PipelineStore>,
    settings: StepSettings,
}

impl TriageStage {
    pub fn new(gateway: CallGateway, store: Arc<dyn PipelineStore>, settings: StepSettings) -> Self {
        Self {
            gateway,
            store,
            settings,
        }
    }

    #[instrument(skip(self, filters), fields(run_id = %run_id))]
    pub async fn run(
        &self,
        run_id: Uuid,
        filters: &TriageFilters,
    ) -> Result<Vec<RunChannel>, PipelineError> {
        let candidates = self.store.find_candidates(filters).await?;
        if candidates.is_empty() {
            return Err(PipelineError::NoCandidates);
        }
        info!(candidates = candidates.len(), pick_count = filters.pick_count, "Ranking candidates");

        let output = self
            .gateway
            .call::<TriageResponse>(
                prompts::triage(&candidates, filters.pick_count),
                CallSpec::new(run_id, CallStep::Triage, self.settings),
            )
            .await?;

        let resolved = resolve_picks(&candidates, output.data.picks, filters.pick_count);

        let mut channels = Vec::with_capacity(resolved.len());
        for (rank, (channel, pick)) in resolved.into_iter().enumerate() {
            let row = self
                .store
                .insert_run_channel(NewRunChannel {
                    run_id,
                    channel,
                    priority: rank as i32 + 1,
                    interest_score: clamp_score(pick.interest_score),
                    rationale: pick.rationale,
                    look_for: pick.look_for.filter(|s| !s.trim().is_empty()),
                })
                .await?;
            channels.push(row);
        }

        self.store
            .set_run_channel_count(run_id, channels.len() as i32)
            .await?;
        info!(selected = channels.len(), "Triage complete");

        Ok(channels)
    }
}

/// Lowercased host + path without scheme, `www.`/`m.` prefix, query or trailing slash
pub fn normalize_url(url: &str) -> String {
    let lowered = url.trim().to_lowercase();
    let without_scheme = lowered
        .strip_prefix("https://")
        .or_else(|| lowered.strip_prefix("http://"))
        .unwrap_or(&lowered);
    let without_prefix = without_scheme
        .strip_prefix("www.")
        .or_else(|| without_scheme.strip_prefix("m."))
        .unwrap_or(without_scheme);
    let without_query = without_prefix
        .split(['?', '#'])
        .next()
        .unwrap_or(without_prefix);
    without_query.trim_end_matches('/').to_string()
}

pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

fn find_candidate<'a>(candidates: &'a [Channel], pick: &TriagePick) -> Option<&'a Channel> {
    let by_url = pick
        .channel_url
        .as_deref()
        .map(normalize_url)
        .filter(|u| !u.is_empty())
        .and_then(|url| candidates.iter().find(|c| normalize_url(&c.url) == url));

    by_url.or_else(|| {
        let name = pick.channel_name.as_deref()?.trim().to_lowercase();
        candidates
            .iter()
            .find(|c| c.title.trim().to_lowercase() == name)
    })
}

/// Picks in priority order, resolved to candidates, first resolution wins,
/// at most `pick_count`
pub fn resolve_picks(
    candidates: &[Channel],
    mut picks: Vec<TriagePick>,
    pick_count: usize,
) -> Vec<(Channel, TriagePick)> {
    picks.sort_by_key(|p| p.priority);

    let mut seen = HashSet::new();
    let mut resolved = Vec::new();
    for pick in picks {
        if resolved.len() >= pick_count {
            break;
        }
        let Some(channel) = find_candidate(candidates, &pick) else {
            let label = pick
                .channel_url
                .clone()
                .or_else(|| pick.channel_name.clone())
                .unwrap_or_default();
            let err = PipelineError::ResolutionMismatch { pick: label };
            warn!(error = %err, "Dropping unresolved triage pick");
            continue;
        };
        if !seen.insert(channel.id) {
            warn!(channel = %channel.title, "Dropping duplicate triage pick");
            continue;
        }
        resolved.push((channel.clone(), pick));
    }
    resolved
}
