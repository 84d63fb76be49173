//! Per-video storyboard extraction (insert-only)

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryboardStatus {
    Done,
    Error,
}

impl From<String> for StoryboardStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "done" => StoryboardStatus::Done,
            _ => StoryboardStatus::Error,
        }
    }
}

impl From<StoryboardStatus> for String {
    fn from(status: StoryboardStatus) -> Self {
        match status {
            StoryboardStatus::Done => "done".to_string(),
            StoryboardStatus::Error => "error".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "storyboards")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub run_channel_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub video_id: String,

    #[sea_orm(column_type = "Text")]
    pub video_title: String,

    pub view_count: i64,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub storyboard: Option<serde_json::Value>,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn is_done(&self) -> bool {
        StoryboardStatus::from(self.status.clone()) == StoryboardStatus::Done
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::run_channel::Entity",
        from = "Column::RunChannelId",
        to = "super::run_channel::Column::Id"
    )]
    RunChannel,
}

impl Related<super::run_channel::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RunChannel.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
