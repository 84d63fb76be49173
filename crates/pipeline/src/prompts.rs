//! Prompt builders for each step
//!
//! Every prompt opens with a `STEP:` line and ends with the JSON shape the
//! matching schema in [`crate::schema`] expects.

use channelforge_common::db::models::{Channel, RunChannel, Storyboard};
use channelforge_common::youtube::VideoItem;
use chrono::Utc;
use serde_json::json;

pub fn triage(candidates: &[Channel], pick_count: usize) -> String {
    let now = Utc::now();
    let lines: Vec<String> = candidates
        .iter()
        .map(|c| {
            let age = c
                .age_days(now)
                .map(|d| format!("{} days", d))
                .unwrap_or_else(|| "unknown age".to_string());
            format!(
                "- {} | {} | {} subscribers | {} videos | {} | {}",
                c.title,
                c.url,
                c.subscriber_count,
                c.video_count,
                age,
                c.category.as_deref().unwrap_or("uncategorized"),
            )
        })
        .collect();

    format!(
        "STEP: TRIAGE\n\
         You are scouting young short-form YouTube channels whose growth can be \
         explained by a repeatable format.\n\n\
         Candidates (name | url | subscribers | videos | age | category):\n{}\n\n\
         Pick the {} most interesting channels. Rank them by priority starting at 1. \
         Give each an interest_score between 0 and 1, a one-sentence rationale, and a \
         short hint of what to look for in its videos. Use the exact name and url from \
         the list.\n\n\
         Respond with JSON only:\n\
         {{\"picks\": [{{\"priority\": 1, \"channel_name\": \"...\", \"channel_url\": \"...\", \
         \"interest_score\": 0.0, \"rationale\": \"...\", \"look_for\": \"...\"}}]}}",
        lines.join("\n"),
        pick_count,
    )
}

pub fn storyboard(channel: &RunChannel, video: &VideoItem) -> String {
    format!(
        "STEP: STORYBOARD\n\
         Channel: {}\n\
         Category: {}\n\
         About: {}\n\
         Look for: {}\n\
         Video: {} ({} views)\n\
         Video URL: {}\n\n\
         Watch the attached video and break it into timed segments. For each segment \
         give start and end timestamps, what happens, and any on-screen text. Then \
         analyse the hook (first seconds) and the ending, and note production details \
         (editing pace, voice, props, locations).\n\n\
         Respond with JSON only:\n\
         {{\"segments\": [{{\"start\": \"0:00\", \"end\": \"0:03\", \"description\": \"...\", \
         \"on_screen_text\": \"...\"}}], \"hook_analysis\": \"...\", \
         \"ending_analysis\": \"...\", \"production_notes\": \"...\"}}",
        channel.name,
        channel.category.as_deref().unwrap_or("unknown"),
        channel.description.as_deref().unwrap_or("no description"),
        channel.look_for.as_deref().unwrap_or("anything that explains the growth"),
        video.title,
        video.view_count,
        video.watch_url(),
    )
}

pub fn strategy(channel: &RunChannel, storyboards: &[Storyboard]) -> String {
    let boards: Vec<serde_json::Value> = storyboards
        .iter()
        .map(|s| {
            json!({
                "video_id": s.video_id,
                "title": s.video_title,
                "views": s.view_count,
                "storyboard": s.storyboard,
            })
        })
        .collect();
    let boards = serde_json::to_string_pretty(&boards).unwrap_or_else(|_| "[]".to_string());

    format!(
        "STEP: STRATEGY\n\
         Channel: {}\n\
         Subscribers: {}\n\
         Channel age: {}\n\
         Category: {}\n\
         Why it was picked: {}\n\n\
         Storyboards of its best and freshest videos:\n{}\n\n\
         Identify the core template the channel repeats, its hook pattern, how the \
         videos are produced, and why the channel is growing. Rate how replicable the \
         format is from 0 (impossible) to 10 (anyone could copy it) and finish with \
         a short executive summary.\n\n\
         Respond with JSON only:\n\
         {{\"core_template\": \"...\", \"hook_pattern\": \"...\", \
         \"production_analysis\": \"...\", \"growth_rationale\": \"...\", \
         \"replicability_score\": 0, \"executive_summary\": \"...\"}}",
        channel.name,
        channel.subscriber_count,
        channel
            .channel_age_days
            .map(|d| format!("{} days", d))
            .unwrap_or_else(|| "unknown".to_string()),
        channel.category.as_deref().unwrap_or("unknown"),
        channel.rationale,
        boards,
    )
}

pub fn post(channel: &RunChannel, strategy: &serde_json::Value, storyboard_count: usize) -> String {
    let mut seed = strategy.clone();
    if let Some(obj) = seed.as_object_mut() {
        obj.insert("channel_name".into(), json!(channel.name));
        obj.insert("channel_url".into(), json!(channel.url));
        obj.insert("subscriber_count".into(), json!(channel.subscriber_count));
        obj.insert("channel_age_days".into(), json!(channel.channel_age_days));
        obj.insert("video_count".into(), json!(channel.video_count));
        obj.insert("storyboard_count".into(), json!(storyboard_count));
    }
    let seed = serde_json::to_string_pretty(&seed).unwrap_or_else(|_| strategy.to_string());

    format!(
        "STEP: POST\n\
         Channel: {}\n\n\
         Strategy analysis:\n{}\n\n\
         Write a short social post (under 280 characters) telling creators what this \
         channel does and why it works. Pick one category tag for the post, such as \
         format_breakdown, growth_story or niche_alert.\n\n\
         Respond with JSON only:\n\
         {{\"post_text\": \"...\", \"category\": \"...\"}}",
        channel.name, seed,
    )
}
