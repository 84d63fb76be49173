//! Channel selected by triage within a run

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Per-channel enrichment status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Pending,
    Detailing,
    Synthesizing,
    ArtifactGen,
    Done,
    Error,
}

impl ChannelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelStatus::Pending => "pending",
            ChannelStatus::Detailing => "detailing",
            ChannelStatus::Synthesizing => "synthesizing",
            ChannelStatus::ArtifactGen => "artifact_gen",
            ChannelStatus::Done => "done",
            ChannelStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelStatus::Done | ChannelStatus::Error)
    }

    /// A worker is (or was) mid-enrichment
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            ChannelStatus::Detailing | ChannelStatus::Synthesizing | ChannelStatus::ArtifactGen
        )
    }

    pub fn non_terminal() -> [ChannelStatus; 4] {
        [
            ChannelStatus::Pending,
            ChannelStatus::Detailing,
            ChannelStatus::Synthesizing,
            ChannelStatus::ArtifactGen,
        ]
    }
}

impl From<String> for ChannelStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => ChannelStatus::Pending,
            "detailing" => ChannelStatus::Detailing,
            "synthesizing" => ChannelStatus::Synthesizing,
            "artifact_gen" => ChannelStatus::ArtifactGen,
            "done" => ChannelStatus::Done,
            "error" => ChannelStatus::Error,
            _ => ChannelStatus::Pending,
        }
    }
}

impl From<ChannelStatus> for String {
    fn from(status: ChannelStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "run_channels")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub run_id: Uuid,

    pub channel_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub youtube_channel_id: String,

    #[sea_orm(column_type = "Text")]
    pub name: String,

    #[sea_orm(column_type = "Text")]
    pub url: String,

    pub priority: i32,

    pub interest_score: f64,

    #[sea_orm(column_type = "Text")]
    pub rationale: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub look_for: Option<String>,

    // Snapshot of the channel at triage time
    pub subscriber_count: i64,
    pub video_count: i64,
    pub channel_age_days: Option<i32>,
    #[sea_orm(column_type = "Text", nullable)]
    pub category: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    /// Cross-video strategy analysis
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub strategy: Option<serde_json::Value>,

    #[sea_orm(column_type = "Text", nullable)]
    pub post_text: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub post_category: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn channel_status(&self) -> ChannelStatus {
        ChannelStatus::from(self.status.clone())
    }

    pub fn is_terminal(&self) -> bool {
        self.channel_status().is_terminal()
    }

    /// In-progress and untouched for longer than `stale_after`
    pub fn is_stale(&self, now: chrono::DateTime<chrono::Utc>, stale_after: chrono::Duration) -> bool {
        self.channel_status().is_in_progress()
            && now - self.updated_at.with_timezone(&chrono::Utc) > stale_after
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::run::Entity",
        from = "Column::RunId",
        to = "super::run::Column::Id"
    )]
    Run,

    #[sea_orm(has_many = "super::storyboard::Entity", on_delete = "Cascade")]
    Storyboards,
}

impl Related<super::run::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Run.def()
    }
}

impl Related<super::storyboard::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Storyboards.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
