//! End-to-end runs against the in-memory store and a scripted model

use channelforge_common::config::PipelineConfig;
use channelforge_common::db::models::{
    CallStatus, Channel, ChannelStatus, RunChannel, RunStatus, StoryboardStatus, Video,
};
use channelforge_common::db::{
    MemoryStore, NewRunChannel, NewStoryboard, PipelineStore, RunProgress, TriageFilters,
};
use channelforge_common::llm::ScriptedLlmClient;
use channelforge_pipeline::{PipelineError, PipelineService};
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

fn channel(name: &str, subscribers: i64) -> Channel {
    let slug = name.to_lowercase();
    Channel {
        id: Uuid::new_v4(),
        youtube_channel_id: format!("UC{}", slug),
        title: name.into(),
        url: format!("https://www.youtube.com/@{}", slug),
        subscriber_count: subscribers,
        video_count: 40,
        view_count: subscribers * 100,
        first_upload_at: Some((Utc::now() - Duration::days(90)).into()),
        category: Some("Entertainment".into()),
        description: Some(format!("{} makes short sketches", name)),
        discovered_at: Utc::now().into(),
    }
}

fn video(channel: &Channel, index: usize) -> Video {
    Video {
        row_id: 0,
        video_id: format!("{}-{}", channel.title.to_lowercase(), index),
        youtube_channel_id: channel.youtube_channel_id.clone(),
        title: format!("{} short #{}", channel.title, index),
        view_count: 10_000 * index as i64,
        duration_seconds: Some(30),
        published_at: Some((Utc::now() - Duration::days(index as i64)).into()),
        observed_at: Utc::now().into(),
    }
}

/// Seed channels with `videos` cached shorts each
async fn seeded_store(channels: &[(&str, i64)], videos: usize) -> (Arc<MemoryStore>, Vec<Channel>) {
    let store = Arc::new(MemoryStore::new());
    let mut seeded = Vec::new();
    for (name, subscribers) in channels {
        let c = channel(name, *subscribers);
        for i in 1..=videos {
            store.add_video(video(&c, i)).await;
        }
        store.add_channel(c.clone()).await;
        seeded.push(c);
    }
    (store, seeded)
}

fn triage_reply(names: &[&str]) -> String {
    let picks: Vec<_> = names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            json!({
                "priority": i + 1,
                "channel_name": name,
                "interest_score": 0.9 - i as f64 * 0.1,
                "rationale": format!("{} posts a consistent format", name),
                "look_for": "the cold open"
            })
        })
        .collect();
    json!({ "picks": picks }).to_string()
}

fn storyboard_reply() -> String {
    format!(
        "```json\n{}\n```",
        json!({
            "segments": [
                {"start": "0:00", "end": "0:02", "description": "Cold open", "on_screen_text": "WAIT"},
                {"start": "0:02", "end": "0:20", "description": "Sketch"}
            ],
            "hook_analysis": "Starts mid-action",
            "ending_analysis": "Loops back to the start",
            "production_notes": "Handheld phone, one location"
        })
    )
}

fn strategy_reply() -> String {
    json!({
        "core_template": "Two-person sketch with a twist",
        "hook_pattern": "Mid-action cold open",
        "production_analysis": "Phone-shot, fast cuts",
        "growth_rationale": "Loops drive rewatches",
        "replicability_score": 8,
        "executive_summary": "A cheap, repeatable sketch format"
    })
    .to_string()
}

fn post_reply() -> String {
    json!({
        "post_text": "This channel grew on looping sketches shot on a phone.",
        "category": "format_breakdown"
    })
    .to_string()
}

fn with_happy_rules(client: ScriptedLlmClient, picks: &[&str]) -> ScriptedLlmClient {
    client
        .on("STEP: TRIAGE", triage_reply(picks))
        .on("STEP: STORYBOARD", storyboard_reply())
        .on("STEP: STRATEGY", strategy_reply())
        .on("STEP: POST", post_reply())
}

fn service(store: &Arc<MemoryStore>, llm: &Arc<ScriptedLlmClient>, concurrency: usize) -> PipelineService {
    let config = PipelineConfig {
        detail_concurrency: concurrency,
        ..PipelineConfig::default()
    };
    PipelineService::new(store.clone(), llm.clone(), None, &config, 60)
}

async fn materialize(store: &MemoryStore, run_id: Uuid, channels: &[Channel]) -> Vec<RunChannel> {
    let mut rows = Vec::new();
    for (i, c) in channels.iter().enumerate() {
        let row = store
            .insert_run_channel(NewRunChannel {
                run_id,
                channel: c.clone(),
                priority: i as i32 + 1,
                interest_score: 0.5,
                rationale: "picked".into(),
                look_for: None,
            })
            .await
            .unwrap();
        rows.push(row);
    }
    store
        .set_run_channel_count(run_id, rows.len() as i32)
        .await
        .unwrap();
    rows
}

async fn by_name(store: &MemoryStore, run_id: Uuid, name: &str) -> RunChannel {
    store
        .list_run_channels(run_id)
        .await
        .unwrap()
        .into_iter()
        .find(|c| c.name == name)
        .unwrap()
}

async fn step_count(store: &MemoryStore, run_id: Uuid, channel_id: Option<Uuid>, step: &str) -> usize {
    store
        .list_call_logs(run_id)
        .await
        .unwrap()
        .iter()
        .filter(|l| l.step == step && (channel_id.is_none() || l.run_channel_id == channel_id))
        .count()
}

#[tokio::test]
async fn test_full_run_completes_every_channel() {
    let (store, _) = seeded_store(&[("Alpha", 90_000), ("Beta", 50_000)], 3).await;
    let llm = Arc::new(with_happy_rules(ScriptedLlmClient::new(), &["Alpha", "Beta"]));
    let service = service(&store, &llm, 3);

    let run = assert_ok!(service.run_to_completion(TriageFilters::default()).await);
    assert_eq!(run.run_status(), RunStatus::Done);
    assert_eq!(run.channel_count, 2);
    assert!(run.started_at.is_some());
    assert!(run.completed_at.is_some());
    assert!(run.error_message.is_none());

    let channels = store.list_run_channels(run.id).await.unwrap();
    let names: Vec<_> = channels.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Alpha", "Beta"]);
    for c in &channels {
        assert_eq!(c.channel_status(), ChannelStatus::Done);
        assert!(c.strategy.is_some());
        assert!(c.post_text.is_some());
        assert_eq!(c.post_category.as_deref(), Some("format_breakdown"));
        assert_eq!(c.look_for.as_deref(), Some("the cold open"));

        let boards = store.list_storyboards(c.id).await.unwrap();
        assert_eq!(boards.len(), 3);
        assert!(boards.iter().all(|b| b.is_done() && b.storyboard.is_some()));
    }

    let logs = store.list_call_logs(run.id).await.unwrap();
    assert_eq!(logs.len(), 1 + 6 + 2 + 2);
    assert!(logs.iter().all(|l| l.call_status() == CallStatus::Done));
    assert_eq!(logs[0].step, "triage");
    assert!(logs[0].run_channel_id.is_none());
}

#[tokio::test]
async fn test_detail_calls_carry_the_video_url() {
    let (store, _) = seeded_store(&[("Alpha", 90_000)], 2).await;
    let llm = Arc::new(with_happy_rules(ScriptedLlmClient::new(), &["Alpha"]));
    let service = service(&store, &llm, 3);

    assert_ok!(service.run_to_completion(TriageFilters::default()).await);

    let media: Vec<_> = llm
        .requests()
        .await
        .into_iter()
        .filter_map(|r| r.media_uri)
        .collect();
    assert_eq!(media.len(), 2);
    assert!(media.contains(&"https://www.youtube.com/shorts/alpha-1".to_string()));
    assert!(media.contains(&"https://www.youtube.com/shorts/alpha-2".to_string()));
}

#[tokio::test]
async fn test_no_candidates_fails_the_run() {
    let (store, _) = seeded_store(&[("Alpha", 90_000)], 3).await;
    let llm = Arc::new(with_happy_rules(ScriptedLlmClient::new(), &["Alpha"]));
    let service = service(&store, &llm, 3);

    let filters = TriageFilters {
        min_subscribers: Some(10_000_000),
        ..TriageFilters::default()
    };
    let run = assert_ok!(service.run_to_completion(filters).await);

    assert_eq!(run.run_status(), RunStatus::Error);
    assert!(run
        .error_message
        .as_deref()
        .unwrap()
        .contains("No channels matching filters"));
    assert!(run.completed_at.is_some());
    assert!(store.list_run_channels(run.id).await.unwrap().is_empty());
    assert!(store.list_call_logs(run.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_triage_failure_fails_the_run() {
    let (store, _) = seeded_store(&[("Alpha", 90_000)], 3).await;
    let llm = Arc::new(ScriptedLlmClient::new().fail_on("STEP: TRIAGE", 429, "quota exhausted"));
    let service = service(&store, &llm, 3);

    let run = assert_ok!(service.run_to_completion(TriageFilters::default()).await);
    assert_eq!(run.run_status(), RunStatus::Error);
    assert!(run.error_message.as_deref().unwrap().contains("quota exhausted"));

    let logs = store.list_call_logs(run.id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].call_status(), CallStatus::Error);
}

#[tokio::test]
async fn test_channel_without_storyboards_skips_synthesis() {
    let (store, _) = seeded_store(&[("Alpha", 90_000), ("Beta", 50_000)], 3).await;
    let llm = Arc::new(with_happy_rules(
        ScriptedLlmClient::new().fail_on("shorts/beta-", 500, "video unavailable"),
        &["Beta", "Alpha"],
    ));
    let service = service(&store, &llm, 3);

    let run = assert_ok!(service.run_to_completion(TriageFilters::default()).await);
    assert_eq!(run.run_status(), RunStatus::Done);

    let beta = by_name(&store, run.id, "Beta").await;
    assert_eq!(beta.channel_status(), ChannelStatus::Error);
    assert_eq!(beta.error_message.as_deref(), Some("No storyboards available"));
    assert!(beta.strategy.is_none());

    let boards = store.list_storyboards(beta.id).await.unwrap();
    assert_eq!(boards.len(), 3);
    assert!(boards.iter().all(|b| !b.is_done()
        && b.error_message.as_deref().unwrap().contains("video unavailable")));

    assert_eq!(step_count(&store, run.id, Some(beta.id), "synthesis").await, 0);
    assert_eq!(step_count(&store, run.id, Some(beta.id), "artifact").await, 0);

    // The failure stays with Beta
    let alpha = by_name(&store, run.id, "Alpha").await;
    assert_eq!(alpha.channel_status(), ChannelStatus::Done);
}

#[tokio::test]
async fn test_partial_storyboard_failure_still_synthesizes() {
    let (store, _) = seeded_store(&[("Alpha", 90_000)], 3).await;
    let llm = Arc::new(with_happy_rules(
        ScriptedLlmClient::new().on("shorts/alpha-2", "not json at all"),
        &["Alpha"],
    ));
    let service = service(&store, &llm, 3);

    let run = assert_ok!(service.run_to_completion(TriageFilters::default()).await);
    let alpha = by_name(&store, run.id, "Alpha").await;
    assert_eq!(alpha.channel_status(), ChannelStatus::Done);

    let boards = store.list_storyboards(alpha.id).await.unwrap();
    assert_eq!(boards.iter().filter(|b| b.is_done()).count(), 2);
    let failed = boards.iter().find(|b| !b.is_done()).unwrap();
    assert_eq!(failed.video_id, "alpha-2");
    assert!(failed.storyboard.is_none());

    let logs = store.list_call_logs(run.id).await.unwrap();
    let malformed = logs
        .iter()
        .find(|l| l.call_status() == CallStatus::Error)
        .unwrap();
    assert_eq!(malformed.response_text.as_deref(), Some("not json at all"));
}

#[tokio::test]
async fn test_artifact_failure_does_not_abort_run() {
    let (store, _) = seeded_store(&[("Alpha", 90_000), ("Beta", 50_000)], 2).await;
    let llm = Arc::new(with_happy_rules(
        ScriptedLlmClient::new().fail_on("STEP: POST\nChannel: Alpha", 503, "overloaded"),
        &["Alpha", "Beta"],
    ));
    let service = service(&store, &llm, 3);

    let run = assert_ok!(service.run_to_completion(TriageFilters::default()).await);
    assert_eq!(run.run_status(), RunStatus::Done);

    let alpha = by_name(&store, run.id, "Alpha").await;
    assert_eq!(alpha.channel_status(), ChannelStatus::Error);
    assert!(alpha.error_message.as_deref().unwrap().contains("overloaded"));
    assert!(alpha.strategy.is_some());
    assert!(alpha.post_text.is_none());

    let beta = by_name(&store, run.id, "Beta").await;
    assert_eq!(beta.channel_status(), ChannelStatus::Done);
}

#[tokio::test]
async fn test_unresolved_picks_are_dropped() {
    let (store, _) = seeded_store(&[("Alpha", 90_000)], 1).await;
    let llm = Arc::new(with_happy_rules(ScriptedLlmClient::new(), &["Ghost", "Alpha"]));
    let service = service(&store, &llm, 3);

    let run = assert_ok!(service.run_to_completion(TriageFilters::default()).await);
    assert_eq!(run.channel_count, 1);

    let channels = store.list_run_channels(run.id).await.unwrap();
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].name, "Alpha");
    assert_eq!(channels[0].priority, 1);
}

#[tokio::test]
async fn test_resume_only_touches_pending_channels() {
    let (store, seeded) =
        seeded_store(&[("Alpha", 90_000), ("Beta", 50_000), ("Gamma", 20_000)], 2).await;
    let run = store.create_run(&TriageFilters::default()).await.unwrap();
    store.update_run_status(run.id, RunStatus::Triage, None).await.unwrap();
    let rows = materialize(&store, run.id, &seeded).await;

    // Alpha finished before the worker died
    let alpha = &rows[0];
    store.transition_channel(alpha.id, ChannelStatus::ArtifactGen).await.unwrap();
    store.save_strategy(alpha.id, json!({"core_template": "x"})).await.unwrap();
    store
        .complete_channel(alpha.id, "done already".into(), "growth_story".into())
        .await
        .unwrap();
    store
        .update_run_status(run.id, RunStatus::Error, Some("worker crashed".into()))
        .await
        .unwrap();

    let llm = Arc::new(with_happy_rules(ScriptedLlmClient::new(), &[]));
    let service = service(&store, &llm, 3);
    let resumed = assert_ok!(service.resume_to_completion(run.id).await);

    assert_eq!(resumed.run_status(), RunStatus::Done);
    assert!(resumed.error_message.is_none());
    assert_eq!(step_count(&store, run.id, None, "triage").await, 0);
    assert_eq!(step_count(&store, run.id, Some(alpha.id), "detail").await, 0);
    assert_eq!(step_count(&store, run.id, Some(alpha.id), "synthesis").await, 0);

    for pending in &rows[1..] {
        let c = store.get_run_channel(pending.id).await.unwrap().unwrap();
        assert_eq!(c.channel_status(), ChannelStatus::Done);
        assert_eq!(step_count(&store, run.id, Some(c.id), "detail").await, 2);
        assert_eq!(step_count(&store, run.id, Some(c.id), "artifact").await, 1);
    }

    let alpha = store.get_run_channel(alpha.id).await.unwrap().unwrap();
    assert_eq!(alpha.post_text.as_deref(), Some("done already"));
}

#[tokio::test]
async fn test_resume_of_finished_run_is_a_noop() {
    let (store, _) = seeded_store(&[("Alpha", 90_000), ("Beta", 50_000)], 2).await;
    let llm = Arc::new(with_happy_rules(ScriptedLlmClient::new(), &["Alpha", "Beta"]));
    let service = service(&store, &llm, 3);

    let run = assert_ok!(service.run_to_completion(TriageFilters::default()).await);
    let logs_before = store.list_call_logs(run.id).await.unwrap().len();
    let channels_before = store.list_run_channels(run.id).await.unwrap();

    let resumed = assert_ok!(service.resume_to_completion(run.id).await);

    assert_eq!(resumed, run);
    assert_eq!(store.list_call_logs(run.id).await.unwrap().len(), logs_before);
    assert_eq!(store.list_run_channels(run.id).await.unwrap(), channels_before);
}

#[tokio::test]
async fn test_stale_detailing_channel_is_reentered() {
    let (store, seeded) = seeded_store(&[("Alpha", 90_000)], 3).await;
    let run = store.create_run(&TriageFilters::default()).await.unwrap();
    store.update_run_status(run.id, RunStatus::Detailing, None).await.unwrap();
    let rows = materialize(&store, run.id, &seeded).await;
    let alpha = &rows[0];

    store.transition_channel(alpha.id, ChannelStatus::Detailing).await.unwrap();
    store
        .insert_storyboard(NewStoryboard {
            run_channel_id: alpha.id,
            video_id: "alpha-3".into(),
            video_title: "Alpha short #3".into(),
            view_count: 30_000,
            storyboard: Some(json!({"segments": []})),
            status: StoryboardStatus::Done,
            error: None,
        })
        .await
        .unwrap();
    store
        .set_channel_updated_at(alpha.id, Utc::now() - Duration::hours(1))
        .await;

    let llm = Arc::new(with_happy_rules(ScriptedLlmClient::new(), &[]));
    let service = service(&store, &llm, 3);
    let resumed = assert_ok!(service.resume_to_completion(run.id).await);

    assert_eq!(resumed.run_status(), RunStatus::Done);
    // alpha-3 already had a storyboard
    assert_eq!(step_count(&store, run.id, Some(alpha.id), "detail").await, 2);
    let boards = store.list_storyboards(alpha.id).await.unwrap();
    assert_eq!(boards.iter().filter(|b| b.is_done()).count(), 3);
}

#[tokio::test]
async fn test_live_channel_is_left_alone() {
    let (store, seeded) = seeded_store(&[("Alpha", 90_000)], 3).await;
    let run = store.create_run(&TriageFilters::default()).await.unwrap();
    store.update_run_status(run.id, RunStatus::Detailing, None).await.unwrap();
    let rows = materialize(&store, run.id, &seeded).await;
    store.transition_channel(rows[0].id, ChannelStatus::Detailing).await.unwrap();

    let llm = Arc::new(with_happy_rules(ScriptedLlmClient::new(), &[]));
    let service = service(&store, &llm, 3);
    let resumed = assert_ok!(service.resume_to_completion(run.id).await);

    assert_eq!(resumed.run_status(), RunStatus::Detailing);
    assert!(store.list_call_logs(run.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stale_artifact_stage_reuses_strategy() {
    let (store, seeded) = seeded_store(&[("Alpha", 90_000)], 3).await;
    let run = store.create_run(&TriageFilters::default()).await.unwrap();
    store.update_run_status(run.id, RunStatus::ArtifactGen, None).await.unwrap();
    let rows = materialize(&store, run.id, &seeded).await;
    let alpha = &rows[0];

    store.transition_channel(alpha.id, ChannelStatus::ArtifactGen).await.unwrap();
    store.save_strategy(alpha.id, serde_json::from_str(&strategy_reply()).unwrap()).await.unwrap();
    store
        .set_channel_updated_at(alpha.id, Utc::now() - Duration::hours(2))
        .await;

    let llm = Arc::new(with_happy_rules(ScriptedLlmClient::new(), &[]));
    let service = service(&store, &llm, 3);
    assert_ok!(service.resume_to_completion(run.id).await);

    let logs = store.list_call_logs(run.id).await.unwrap();
    let steps: Vec<_> = logs.iter().map(|l| l.step.as_str()).collect();
    assert_eq!(steps, vec!["artifact"]);
    let alpha = store.get_run_channel(alpha.id).await.unwrap().unwrap();
    assert_eq!(alpha.channel_status(), ChannelStatus::Done);
}

#[tokio::test]
async fn test_detail_concurrency_is_bounded() {
    let (store, _) = seeded_store(&[("Alpha", 90_000)], 7).await;
    let llm = Arc::new(
        with_happy_rules(ScriptedLlmClient::new(), &["Alpha"])
            .with_delay(std::time::Duration::from_millis(30)),
    );
    let service = service(&store, &llm, 2);

    let run = assert_ok!(service.run_to_completion(TriageFilters::default()).await);
    assert_eq!(run.run_status(), RunStatus::Done);
    assert_eq!(llm.peak_in_flight(), 2);

    let alpha = by_name(&store, run.id, "Alpha").await;
    // videos_per_channel caps the seven cached shorts at six
    assert_eq!(step_count(&store, run.id, Some(alpha.id), "detail").await, 6);
}

#[tokio::test]
async fn test_cancel_mid_detailing() {
    let (store, _) = seeded_store(&[("Alpha", 90_000)], 6).await;
    let llm = Arc::new(
        with_happy_rules(ScriptedLlmClient::new(), &["Alpha"])
            .with_delay(std::time::Duration::from_millis(100)),
    );
    let service = service(&store, &llm, 2);

    let run_id = assert_ok!(service.start(TriageFilters::default()).await);

    let detailing = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            let channels = store.list_run_channels(run_id).await.unwrap();
            if channels
                .first()
                .is_some_and(|c| c.channel_status() == ChannelStatus::Detailing)
            {
                return channels[0].id;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let outcome = assert_ok!(service.cancel(run_id).await);
    assert!(outcome.run_cancelled);
    assert_eq!(outcome.channels_cancelled, 1);

    let status = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        service.wait_for_terminal(run_id),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(status, RunStatus::Error);

    let run = store.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.error_message.as_deref(), Some("Cancelled by user"));
    assert!(run.completed_at.is_some());

    let channel = store.get_run_channel(detailing).await.unwrap().unwrap();
    assert_eq!(channel.channel_status(), ChannelStatus::Error);
    assert_eq!(channel.error_message.as_deref(), Some("Run cancelled"));
    assert!(channel.strategy.is_none());

    // The in-flight batch finished but nothing after it was dispatched
    assert!(step_count(&store, run_id, Some(detailing), "detail").await <= 2);
    assert_eq!(step_count(&store, run_id, None, "synthesis").await, 0);
}

#[tokio::test]
async fn test_cancel_during_triage() {
    let (store, _) = seeded_store(&[("Alpha", 90_000), ("Beta", 50_000)], 3).await;
    let llm = Arc::new(
        with_happy_rules(ScriptedLlmClient::new(), &["Alpha", "Beta"])
            .with_delay(std::time::Duration::from_millis(100)),
    );
    let service = service(&store, &llm, 3);

    let run_id = assert_ok!(service.start(TriageFilters::default()).await);

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            let run = store.get_run(run_id).await.unwrap().unwrap();
            if run.run_status() == RunStatus::Triage {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let outcome = assert_ok!(service.cancel(run_id).await);
    assert!(outcome.run_cancelled);
    assert_eq!(outcome.channels_cancelled, 0);

    let status = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        service.wait_for_terminal(run_id),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(status, RunStatus::Error);

    let run = store.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.error_message.as_deref(), Some("Cancelled by user"));

    // Channels the late triage created are closed, never enriched
    let channels = store.list_run_channels(run_id).await.unwrap();
    assert_eq!(channels.len(), 2);
    for channel in &channels {
        assert_eq!(channel.channel_status(), ChannelStatus::Error);
        assert_eq!(channel.error_message.as_deref(), Some("Run cancelled"));
        assert!(channel.post_text.is_none());
    }
    assert_eq!(step_count(&store, run_id, None, "triage").await, 1);
    assert_eq!(step_count(&store, run_id, None, "detail").await, 0);
    assert_eq!(step_count(&store, run_id, None, "synthesis").await, 0);
    assert_eq!(step_count(&store, run_id, None, "artifact").await, 0);
}

#[tokio::test]
async fn test_second_worker_for_same_run_is_rejected() {
    let (store, _) = seeded_store(&[("Alpha", 90_000)], 2).await;
    let llm = Arc::new(
        with_happy_rules(ScriptedLlmClient::new(), &["Alpha"])
            .with_delay(std::time::Duration::from_millis(50)),
    );
    let service = service(&store, &llm, 3);

    let run_id = assert_ok!(service.start(TriageFilters::default()).await);
    let err = assert_err!(service.resume(run_id).await);
    assert!(matches!(err, PipelineError::AlreadyActive(id) if id == run_id));

    let status = service.wait_for_terminal(run_id).await.unwrap();
    assert_eq!(status, RunStatus::Done);
}

#[tokio::test]
async fn test_unknown_run_is_not_found() {
    let store = Arc::new(MemoryStore::new());
    let llm = Arc::new(ScriptedLlmClient::new());
    let service = service(&store, &llm, 3);
    let id = Uuid::new_v4();

    assert!(matches!(
        service.resume_to_completion(id).await,
        Err(PipelineError::RunNotFound(_))
    ));
    assert!(matches!(service.cancel(id).await, Err(PipelineError::RunNotFound(_))));
    assert!(matches!(service.run_detail(id).await, Err(PipelineError::RunNotFound(_))));
}

#[tokio::test]
async fn test_progress_stream_matches_persisted_snapshot() {
    let (store, _) = seeded_store(&[("Alpha", 90_000), ("Beta", 50_000)], 2).await;
    let llm = Arc::new(with_happy_rules(ScriptedLlmClient::new(), &["Alpha", "Beta"]));
    let service = service(&store, &llm, 3);
    let mut rx = service.subscribe();

    let run = assert_ok!(service.run_to_completion(TriageFilters::default()).await);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if event.run_id == run.id {
            events.push(event);
        }
    }
    let last = events.last().unwrap();
    assert_eq!(last.step, "done");
    assert_eq!(RunProgress::from_run(&run), Some(last.snapshot()));

    assert_eq!(events[0].step, "triage");
    assert!(events
        .iter()
        .any(|e| e.item_id.as_deref() == Some("beta-1") && e.entity_name.as_deref() == Some("Beta")));
}

#[tokio::test]
async fn test_run_detail_groups_storyboards_and_posts() {
    let (store, _) = seeded_store(&[("Alpha", 90_000)], 2).await;
    let llm = Arc::new(with_happy_rules(ScriptedLlmClient::new(), &["Alpha"]));
    let service = service(&store, &llm, 3);

    let run = assert_ok!(service.run_to_completion(TriageFilters::default()).await);
    let detail = assert_ok!(service.run_detail(run.id).await);

    assert_eq!(detail.run.id, run.id);
    assert_eq!(detail.channels.len(), 1);
    assert_eq!(detail.channels[0].storyboards.len(), 2);
    let post = detail.channels[0].post.as_ref().unwrap();
    assert_eq!(post.category, "format_breakdown");

    let runs = assert_ok!(service.list_runs(10).await);
    assert_eq!(runs.len(), 1);
    let logs = assert_ok!(service.call_logs(run.id).await);
    assert_eq!(logs.len(), 1 + 2 + 1 + 1);
}
