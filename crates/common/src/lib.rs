//! ChannelForge Common Library
//!
//! Shared code for the pipeline and gateway services including:
//! - Database models, the `PipelineStore` contract and its implementations
//! - LLM client abstraction
//! - YouTube metadata source
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod config;
pub mod db;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod youtube;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{MemoryStore, PipelineStore, Repository, TriageFilters};
pub use errors::{AppError, Result};
pub use llm::LlmClient;
pub use youtube::{RemoteVideoSource, VideoItem};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
