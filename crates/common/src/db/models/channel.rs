//! Ingested YouTube channel (read-only for the pipeline)

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "channels")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text", unique)]
    pub youtube_channel_id: String,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    #[sea_orm(column_type = "Text")]
    pub url: String,

    pub subscriber_count: i64,

    pub video_count: i64,

    pub view_count: i64,

    /// Oldest upload seen during ingestion, used as the channel's birth date
    pub first_upload_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(column_type = "Text", nullable)]
    pub category: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    pub discovered_at: DateTimeWithTimeZone,
}

impl Model {
    /// Whole days since the first upload, if known
    pub fn age_days(&self, now: chrono::DateTime<chrono::Utc>) -> Option<i64> {
        self.first_upload_at
            .map(|first| (now - first.with_timezone(&chrono::Utc)).num_days().max(0))
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
