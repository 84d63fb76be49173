//! Metadata resolver
//!
//! Picks the videos a channel is analysed on: cache first, remote lookup when
//! the cache is short, then "best + freshest" selection.

use crate::errors::PipelineError;
use channelforge_common::db::models::RunChannel;
use channelforge_common::db::PipelineStore;
use channelforge_common::youtube::{RemoteVideoSource, VideoItem};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Slots reserved for the most recent uploads
const FRESH_SLOTS: usize = 2;

#[derive(Clone)]
pub struct MetadataResolver {
    store: Arc<dyn PipelineStore>,
    remote: Option<Arc<dyn RemoteVideoSource>>,
    short_form_max_secs: u32,
}

impl MetadataResolver {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        remote: Option<Arc<dyn RemoteVideoSource>>,
        short_form_max_secs: u32,
    ) -> Self {
        Self {
            store,
            remote,
            short_form_max_secs,
        }
    }

    #[instrument(skip(self, channel), fields(channel = %channel.name))]
    pub async fn top_videos(
        &self,
        channel: &RunChannel,
        count: usize,
    ) -> Result<Vec<VideoItem>, PipelineError> {
        let cached = self
            .store
            .list_cached_videos(&channel.youtube_channel_id)
            .await?;
        let mut items = dedup_highest_views(cached.into_iter().map(VideoItem::from).collect());

        if items.len() < count {
            if let Some(remote) = &self.remote {
                match remote
                    .fetch_recent_shorts(&channel.youtube_channel_id, count, self.short_form_max_secs)
                    .await
                {
                    Ok(fetched) => {
                        let before = items.len();
                        merge_remote(&mut items, fetched, self.short_form_max_secs);
                        debug!(added = items.len() - before, "Merged remote videos");
                    }
                    Err(e) => {
                        warn!(error = %e, "Remote video lookup failed, using cache only");
                    }
                }
            }
        }

        Ok(select_best_and_freshest(items, count))
    }
}

/// One entry per video id, keeping the observation with the most views
pub fn dedup_highest_views(items: Vec<VideoItem>) -> Vec<VideoItem> {
    let mut by_id: HashMap<String, VideoItem> = HashMap::new();
    for item in items {
        match by_id.get(&item.video_id) {
            Some(existing) if existing.view_count >= item.view_count => {}
            _ => {
                by_id.insert(item.video_id.clone(), item);
            }
        }
    }
    by_id.into_values().collect()
}

/// Append short-form remote items whose ids are not already known
pub fn merge_remote(items: &mut Vec<VideoItem>, fetched: Vec<VideoItem>, short_form_max_secs: u32) {
    let mut known: HashSet<String> = items.iter().map(|v| v.video_id.clone()).collect();
    for item in fetched {
        let short = item
            .duration_seconds
            .is_some_and(|d| d >= 0 && d as u32 <= short_form_max_secs);
        if short && known.insert(item.video_id.clone()) {
            items.push(item);
        }
    }
}

/// Top `count - 2` by views, then the 2 most recent of the rest. Recency is
/// the publish date, else when the cache observed the video; items with
/// neither fall back to the next-highest views.
pub fn select_best_and_freshest(mut items: Vec<VideoItem>, count: usize) -> Vec<VideoItem> {
    items.sort_by(|a, b| {
        b.view_count
            .cmp(&a.view_count)
            .then_with(|| a.video_id.cmp(&b.video_id))
    });

    if count <= FRESH_SLOTS || items.len() <= count {
        items.truncate(count);
        return items;
    }

    let rest = items.split_off(count - FRESH_SLOTS);
    let mut selected = items;

    let mut dated: Vec<&VideoItem> = rest.iter().filter(|v| v.recency().is_some()).collect();
    dated.sort_by_key(|v| std::cmp::Reverse(v.recency()));
    let mut fresh_ids: Vec<String> = dated
        .into_iter()
        .take(FRESH_SLOTS)
        .map(|v| v.video_id.clone())
        .collect();

    // `rest` is still in view order
    for item in &rest {
        if fresh_ids.len() >= FRESH_SLOTS {
            break;
        }
        if !fresh_ids.contains(&item.video_id) {
            fresh_ids.push(item.video_id.clone());
        }
    }

    for id in fresh_ids {
        if let Some(item) = rest.iter().find(|v| v.video_id == id) {
            selected.push(item.clone());
        }
    }
    selected
}
