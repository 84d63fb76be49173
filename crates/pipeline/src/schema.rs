//! Response schemas for each LLM step
//!
//! Responses are deserialized into these types and validated before anything
//! downstream sees them.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Triage ranking
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TriageResponse {
    #[validate(nested)]
    pub picks: Vec<TriagePick>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_pick_identity"))]
pub struct TriagePick {
    /// 1 is the most interesting pick
    pub priority: i32,

    #[serde(default)]
    pub channel_name: Option<String>,

    #[serde(default)]
    pub channel_url: Option<String>,

    /// Clamped into [0, 1] when materialized
    pub interest_score: f64,

    #[validate(length(min = 1))]
    pub rationale: String,

    #[serde(default)]
    pub look_for: Option<String>,
}

fn validate_pick_identity(pick: &TriagePick) -> Result<(), ValidationError> {
    let has = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
    if has(&pick.channel_name) || has(&pick.channel_url) {
        Ok(())
    } else {
        Err(ValidationError::new("pick_without_channel"))
    }
}

/// Per-video storyboard
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StoryboardResponse {
    #[validate(length(min = 1), nested)]
    pub segments: Vec<Segment>,

    #[validate(length(min = 1))]
    pub hook_analysis: String,

    #[validate(length(min = 1))]
    pub ending_analysis: String,

    #[serde(default)]
    pub production_notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Segment {
    #[validate(length(min = 1))]
    pub start: String,

    #[validate(length(min = 1))]
    pub end: String,

    #[validate(length(min = 1))]
    pub description: String,

    #[serde(default)]
    pub on_screen_text: Option<String>,
}

/// Cross-video strategy analysis
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StrategyAnalysis {
    #[validate(length(min = 1))]
    pub core_template: String,

    #[validate(length(min = 1))]
    pub hook_pattern: String,

    #[validate(length(min = 1))]
    pub production_analysis: String,

    #[validate(length(min = 1))]
    pub growth_rationale: String,

    #[validate(range(min = 0.0, max = 10.0))]
    pub replicability_score: f64,

    #[validate(length(min = 1))]
    pub executive_summary: String,
}

/// Social post draft
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PostDraft {
    #[validate(length(min = 1))]
    pub post_text: String,

    #[validate(length(min = 1))]
    pub category: String,
}
