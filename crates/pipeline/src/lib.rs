//! ChannelForge Pipeline
//!
//! Triage a pool of discovered channels, then enrich each pick:
//! 1. Rank candidates and keep the most interesting ones
//! 2. Storyboard each channel's best and freshest shorts
//! 3. Synthesize a growth strategy from the storyboards
//! 4. Draft a social post from the strategy
//!
//! Every step is persisted so a run can be resumed, cancelled or inspected
//! while it executes.

pub mod calls;
pub mod controller;
pub mod enrichment;
pub mod errors;
pub mod progress;
pub mod prompts;
pub mod resolver;
pub mod schema;
pub mod service;
pub mod triage;

pub use controller::{CancelOutcome, RunController};
pub use errors::PipelineError;
pub use progress::{ProgressEvent, ProgressReporter};
pub use service::{ChannelDetail, PipelineService, RunDetail};
