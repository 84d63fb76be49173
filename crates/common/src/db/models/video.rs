//! Cached short-form video observation

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One observation of a video. The same video may be observed more than once.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "videos")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub row_id: i64,

    /// YouTube video id
    #[sea_orm(column_type = "Text")]
    pub video_id: String,

    #[sea_orm(column_type = "Text")]
    pub youtube_channel_id: String,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    pub view_count: i64,

    pub duration_seconds: Option<i32>,

    pub published_at: Option<DateTimeWithTimeZone>,

    pub observed_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
