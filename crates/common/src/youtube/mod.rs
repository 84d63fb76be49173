//! YouTube video metadata
//!
//! The resolver reads the local `videos` cache first and falls back to a
//! [`RemoteVideoSource`] when the cache is short. [`YouTubeClient`] walks a
//! channel's uploads playlist through the Data API v3.

use crate::config::YouTubeConfig;
use crate::db::models::Video;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Videos per playlist page and per `videos.list` batch
const PAGE_SIZE: usize = 50;

/// Video metadata as consumed by the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoItem {
    pub video_id: String,
    pub title: String,
    pub view_count: i64,
    pub duration_seconds: Option<i32>,
    pub published_at: Option<DateTime<Utc>>,
    /// When the cache last saw this video; remote lookups leave it empty
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

impl VideoItem {
    /// Publish date, else the cache observation time
    pub fn recency(&self) -> Option<DateTime<Utc>> {
        self.published_at.or(self.observed_at)
    }

    /// Public watch URL handed to the extraction model
    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/shorts/{}", self.video_id)
    }
}

impl From<Video> for VideoItem {
    fn from(video: Video) -> Self {
        Self {
            video_id: video.video_id,
            title: video.title,
            view_count: video.view_count,
            duration_seconds: video.duration_seconds,
            published_at: video.published_at.map(|p| p.with_timezone(&Utc)),
            observed_at: Some(video.observed_at.with_timezone(&Utc)),
        }
    }
}

/// Remote lookup of a channel's recent short-form uploads
#[async_trait]
pub trait RemoteVideoSource: Send + Sync {
    /// Up to `count` recent uploads no longer than `max_duration_secs`
    async fn fetch_recent_shorts(
        &self,
        youtube_channel_id: &str,
        count: usize,
        max_duration_secs: u32,
    ) -> Result<Vec<VideoItem>>;
}

/// Parse an ISO-8601 duration such as `PT1M5S` or `P1DT2H` into seconds
pub fn parse_iso8601_duration(value: &str) -> Option<u32> {
    let rest = value.strip_prefix('P')?;
    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => (d, Some(t)),
        None => (rest, None),
    };

    fn components(part: &str, units: &[(char, u32)]) -> Option<u32> {
        let mut total: u32 = 0;
        let mut digits = String::new();
        for ch in part.chars() {
            if ch.is_ascii_digit() {
                digits.push(ch);
                continue;
            }
            let (_, factor) = units.iter().find(|(unit, _)| *unit == ch)?;
            let amount: u32 = digits.parse().ok()?;
            total = total.checked_add(amount.checked_mul(*factor)?)?;
            digits.clear();
        }
        if digits.is_empty() {
            Some(total)
        } else {
            None
        }
    }

    let days = components(date_part, &[('W', 604_800), ('D', 86_400)])?;
    let time = match time_part {
        Some("") => return None,
        Some(t) => components(t, &[('H', 3_600), ('M', 60), ('S', 1)])?,
        None => 0,
    };
    if date_part.is_empty() && time_part.is_none() {
        return None;
    }
    days.checked_add(time)
}

/// YouTube Data API v3 client
pub struct YouTubeClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    max_pages: u32,
}

impl YouTubeClient {
    pub fn new(config: &YouTubeConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            max_pages: config.max_pages.max(1),
        })
    }

    /// Build a client when an API key is configured
    pub fn from_config(config: &YouTubeConfig) -> Result<Option<Arc<dyn RemoteVideoSource>>> {
        match config.api_key.clone() {
            Some(key) if !key.is_empty() => Ok(Some(Arc::new(Self::new(config, key)?))),
            _ => Ok(None),
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        let response = self
            .client
            .get(format!("{}/{}", self.base_url, endpoint))
            .query(&[("key", self.api_key.as_str())])
            .query(params)
            .send()
            .await
            .map_err(|e| AppError::VideoSource {
                message: format!("{} request failed: {}", endpoint, e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::VideoSource {
                message: format!("{} returned {}: {}", endpoint, status, body),
            });
        }

        response.json().await.map_err(|e| AppError::VideoSource {
            message: format!("Failed to parse {} response: {}", endpoint, e),
        })
    }

    async fn uploads_playlist(&self, channel_id: &str) -> Result<String> {
        let resp: ChannelListResponse = self
            .get("channels", &[("id", channel_id), ("part", "contentDetails")])
            .await?;
        if let Some(error) = resp.error {
            return Err(error.into());
        }

        resp.items
            .and_then(|items| items.into_iter().next())
            .and_then(|ch| ch.content_details)
            .and_then(|cd| cd.related_playlists)
            .and_then(|rp| rp.uploads)
            .ok_or_else(|| AppError::VideoSource {
                message: format!("Channel {} has no uploads playlist", channel_id),
            })
    }

    async fn video_details(&self, ids: &[String]) -> Result<Vec<VideoDetails>> {
        let mut details = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(PAGE_SIZE) {
            let joined = chunk.join(",");
            let resp: VideoListResponse = self
                .get(
                    "videos",
                    &[("id", &joined), ("part", "snippet,contentDetails,statistics")],
                )
                .await?;
            if let Some(error) = resp.error {
                return Err(error.into());
            }
            details.extend(resp.items.unwrap_or_default());
        }
        Ok(details)
    }
}

#[async_trait]
impl RemoteVideoSource for YouTubeClient {
    async fn fetch_recent_shorts(
        &self,
        youtube_channel_id: &str,
        count: usize,
        max_duration_secs: u32,
    ) -> Result<Vec<VideoItem>> {
        let playlist_id = self.uploads_playlist(youtube_channel_id).await?;
        let page_size = PAGE_SIZE.to_string();
        let mut shorts = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..self.max_pages {
            let mut params = vec![
                ("playlistId", playlist_id.as_str()),
                ("part", "contentDetails"),
                ("maxResults", page_size.as_str()),
            ];
            if let Some(ref token) = page_token {
                params.push(("pageToken", token.as_str()));
            }

            let resp: PlaylistItemListResponse = self.get("playlistItems", &params).await?;
            if let Some(error) = resp.error {
                return Err(error.into());
            }

            let ids: Vec<String> = resp
                .items
                .unwrap_or_default()
                .into_iter()
                .filter_map(|item| item.content_details.map(|cd| cd.video_id))
                .collect();

            for details in self.video_details(&ids).await? {
                let item = details.into_item();
                if item
                    .duration_seconds
                    .is_some_and(|d| d >= 0 && d as u32 <= max_duration_secs)
                {
                    shorts.push(item);
                }
            }

            if shorts.len() >= count {
                break;
            }
            match resp.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        tracing::debug!(
            channel = youtube_channel_id,
            found = shorts.len(),
            "Fetched recent shorts"
        );
        Ok(shorts)
    }
}

/// In-memory remote source for tests and offline runs
#[derive(Default)]
pub struct StaticVideoSource {
    videos: HashMap<String, Vec<VideoItem>>,
    failing: bool,
    calls: AtomicUsize,
}

impl StaticVideoSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_videos(mut self, youtube_channel_id: impl Into<String>, videos: Vec<VideoItem>) -> Self {
        self.videos.insert(youtube_channel_id.into(), videos);
        self
    }

    /// Every lookup fails
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteVideoSource for StaticVideoSource {
    async fn fetch_recent_shorts(
        &self,
        youtube_channel_id: &str,
        count: usize,
        max_duration_secs: u32,
    ) -> Result<Vec<VideoItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(AppError::VideoSource {
                message: "quotaExceeded".to_string(),
            });
        }
        Ok(self
            .videos
            .get(youtube_channel_id)
            .map(|videos| {
                videos
                    .iter()
                    .filter(|v| {
                        v.duration_seconds
                            .is_some_and(|d| d >= 0 && d as u32 <= max_duration_secs)
                    })
                    .take(count)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

// --- YouTube Data API v3 response types ---

#[derive(Debug, Deserialize)]
struct ApiError {
    code: u32,
    message: String,
}

impl From<ApiError> for AppError {
    fn from(error: ApiError) -> Self {
        AppError::VideoSource {
            message: format!("YouTube API error: {} ({})", error.message, error.code),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChannelListResponse {
    #[serde(default)]
    items: Option<Vec<ChannelDetails>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ChannelDetails {
    #[serde(rename = "contentDetails")]
    content_details: Option<ChannelContentDetails>,
}

#[derive(Debug, Deserialize)]
struct ChannelContentDetails {
    #[serde(rename = "relatedPlaylists")]
    related_playlists: Option<RelatedPlaylists>,
}

#[derive(Debug, Deserialize)]
struct RelatedPlaylists {
    uploads: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItemListResponse {
    #[serde(default)]
    items: Option<Vec<PlaylistItem>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    #[serde(rename = "contentDetails")]
    content_details: Option<PlaylistItemContentDetails>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItemContentDetails {
    #[serde(rename = "videoId")]
    video_id: String,
}

#[derive(Debug, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Option<Vec<VideoDetails>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct VideoDetails {
    id: String,
    snippet: VideoSnippet,
    #[serde(rename = "contentDetails")]
    content_details: Option<VideoContentDetails>,
    statistics: Option<VideoStatistics>,
}

#[derive(Debug, Deserialize)]
struct VideoSnippet {
    title: String,
    #[serde(rename = "publishedAt")]
    published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoContentDetails {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoStatistics {
    /// The API encodes counts as strings
    #[serde(rename = "viewCount")]
    view_count: Option<String>,
}

impl VideoDetails {
    fn into_item(self) -> VideoItem {
        VideoItem {
            video_id: self.id,
            title: self.snippet.title,
            view_count: self
                .statistics
                .and_then(|s| s.view_count)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            duration_seconds: self
                .content_details
                .and_then(|cd| cd.duration)
                .and_then(|d| parse_iso8601_duration(&d))
                .map(|secs| secs.min(i32::MAX as u32) as i32),
            published_at: self
                .snippet
                .published_at
                .and_then(|p| DateTime::parse_from_rfc3339(&p).ok())
                .map(|p| p.with_timezone(&Utc)),
            observed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_short_durations() {
        assert_eq!(parse_iso8601_duration("PT45S"), Some(45));
        assert_eq!(parse_iso8601_duration("PT1M"), Some(60));
        assert_eq!(parse_iso8601_duration("PT1M5S"), Some(65));
        assert_eq!(parse_iso8601_duration("PT2H3M4S"), Some(7_384));
    }

    #[test]
    fn test_parse_day_durations() {
        assert_eq!(parse_iso8601_duration("P1D"), Some(86_400));
        assert_eq!(parse_iso8601_duration("P1DT1S"), Some(86_401));
        assert_eq!(parse_iso8601_duration("P0D"), Some(0));
    }

    #[test]
    fn test_reject_malformed_durations() {
        assert_eq!(parse_iso8601_duration(""), None);
        assert_eq!(parse_iso8601_duration("P"), None);
        assert_eq!(parse_iso8601_duration("PT"), None);
        assert_eq!(parse_iso8601_duration("1M5S"), None);
        assert_eq!(parse_iso8601_duration("PT5X"), None);
        assert_eq!(parse_iso8601_duration("PT15"), None);
    }

    #[test]
    fn test_video_details_conversion() {
        let raw = r#"{
            "id": "abc123",
            "snippet": {"title": "Clip", "publishedAt": "2026-03-01T12:00:00Z"},
            "contentDetails": {"duration": "PT59S"},
            "statistics": {"viewCount": "12345"}
        }"#;
        let details: VideoDetails = serde_json::from_str(raw).unwrap();
        let item = details.into_item();
        assert_eq!(item.video_id, "abc123");
        assert_eq!(item.view_count, 12_345);
        assert_eq!(item.duration_seconds, Some(59));
        assert!(item.published_at.is_some());
    }

    #[tokio::test]
    async fn test_static_source_filters_long_videos() {
        let item = |id: &str, secs| VideoItem {
            video_id: id.into(),
            title: id.into(),
            view_count: 10,
            duration_seconds: Some(secs),
            published_at: None,
            observed_at: None,
        };
        let source = StaticVideoSource::new()
            .with_videos("UC1", vec![item("short", 30), item("long", 600)]);
        let found = source.fetch_recent_shorts("UC1", 10, 60).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].video_id, "short");
        assert_eq!(source.calls(), 1);
    }
}
