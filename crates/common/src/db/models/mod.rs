//! SeaORM entity models
//!
//! `channels` and `videos` are populated by ingestion; the remaining tables
//! belong to the pipeline.

mod call_log;
mod channel;
mod run;
mod run_channel;
mod storyboard;
mod video;

pub use channel::{
    Entity as ChannelEntity,
    Model as Channel,
    ActiveModel as ChannelActiveModel,
    Column as ChannelColumn,
};

pub use video::{
    Entity as VideoEntity,
    Model as Video,
    ActiveModel as VideoActiveModel,
    Column as VideoColumn,
};

pub use run::{
    Entity as RunEntity,
    Model as Run,
    ActiveModel as RunActiveModel,
    Column as RunColumn,
    RunStatus,
};

pub use run_channel::{
    Entity as RunChannelEntity,
    Model as RunChannel,
    ActiveModel as RunChannelActiveModel,
    Column as RunChannelColumn,
    ChannelStatus,
};

pub use storyboard::{
    Entity as StoryboardEntity,
    Model as Storyboard,
    ActiveModel as StoryboardActiveModel,
    Column as StoryboardColumn,
    StoryboardStatus,
};

pub use call_log::{
    Entity as CallLogEntity,
    Model as CallLog,
    ActiveModel as CallLogActiveModel,
    Column as CallLogColumn,
    CallStatus,
    CallStep,
};
