//! Audit record of one outbound LLM call

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Pending,
    Done,
    Error,
}

impl From<String> for CallStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "done" => CallStatus::Done,
            "error" => CallStatus::Error,
            _ => CallStatus::Pending,
        }
    }
}

impl From<CallStatus> for String {
    fn from(status: CallStatus) -> Self {
        match status {
            CallStatus::Pending => "pending".to_string(),
            CallStatus::Done => "done".to_string(),
            CallStatus::Error => "error".to_string(),
        }
    }
}

/// Pipeline step a call belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStep {
    Triage,
    Detail,
    Synthesis,
    Artifact,
}

impl CallStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStep::Triage => "triage",
            CallStep::Detail => "detail",
            CallStep::Synthesis => "synthesis",
            CallStep::Artifact => "artifact",
        }
    }
}

impl std::fmt::Display for CallStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "llm_call_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub run_id: Uuid,

    pub run_channel_id: Option<Uuid>,

    #[sea_orm(column_type = "Text")]
    pub step: String,

    #[sea_orm(column_type = "Text")]
    pub model: String,

    #[sea_orm(column_type = "Text")]
    pub request_payload: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub response_text: Option<String>,

    pub duration_ms: Option<i64>,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    pub input_tokens: Option<i32>,

    pub output_tokens: Option<i32>,

    pub total_tokens: Option<i32>,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn call_status(&self) -> CallStatus {
        CallStatus::from(self.status.clone())
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
}

impl Related<super::run::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Run.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
