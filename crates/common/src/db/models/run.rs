//! Pipeline run entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Run status, in stage order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Triage,
    Detailing,
    Synthesizing,
    ArtifactGen,
    Done,
    Error,
}

impl RunStatus {
    pub const ALL: [RunStatus; 7] = [
        RunStatus::Pending,
        RunStatus::Triage,
        RunStatus::Detailing,
        RunStatus::Synthesizing,
        RunStatus::ArtifactGen,
        RunStatus::Done,
        RunStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Triage => "triage",
            RunStatus::Detailing => "detailing",
            RunStatus::Synthesizing => "synthesizing",
            RunStatus::ArtifactGen => "artifact_gen",
            RunStatus::Done => "done",
            RunStatus::Error => "error",
        }
    }

    /// Position in the stage order; `error` sits outside it
    fn stage(&self) -> Option<u8> {
        match self {
            RunStatus::Pending => Some(0),
            RunStatus::Triage => Some(1),
            RunStatus::Detailing => Some(2),
            RunStatus::Synthesizing => Some(3),
            RunStatus::ArtifactGen => Some(4),
            RunStatus::Done => Some(5),
            RunStatus::Error => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Done | RunStatus::Error)
    }

    /// Forward-only: same or later stage, or `error` from any non-terminal state
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.stage(), next.stage()) {
            (_, None) => true,
            (Some(current), Some(target)) => target >= current,
            (None, Some(_)) => false,
        }
    }

    /// Statuses from which a write of `next` is accepted
    pub fn predecessors_of(next: RunStatus) -> Vec<RunStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }
}

impl From<String> for RunStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => RunStatus::Pending,
            "triage" => RunStatus::Triage,
            "detailing" => RunStatus::Detailing,
            "synthesizing" => RunStatus::Synthesizing,
            "artifact_gen" => RunStatus::ArtifactGen,
            "done" => RunStatus::Done,
            "error" => RunStatus::Error,
            _ => RunStatus::Pending,
        }
    }
}

impl From<RunStatus> for String {
    fn from(status: RunStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pipeline_runs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    pub channel_count: i32,

    /// Triage filters the run was started with
    #[sea_orm(column_type = "JsonBinary")]
    pub filters: serde_json::Value,

    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    // Latest progress snapshot
    #[sea_orm(column_type = "Text", nullable)]
    pub progress_step: Option<String>,
    pub progress_current: i32,
    pub progress_total: i32,
    #[sea_orm(column_type = "Text", nullable)]
    pub progress_message: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub progress_entity: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub progress_item: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub started_at: Option<DateTimeWithTimeZone>,

    pub completed_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    pub fn run_status(&self) -> RunStatus {
        RunStatus::from(self.status.clone())
    }

    pub fn is_terminal(&self) -> bool {
        self.run_status().is_terminal()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::run_channel::Entity", on_delete = "Cascade")]
    RunChannels,

    #[sea_orm(has_many = "super::call_log::Entity", on_delete = "Cascade")]
    CallLogs,
}

impl Related<super::run_channel::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RunChannels.def()
    }
}

impl Related<super::call_log::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CallLogs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
