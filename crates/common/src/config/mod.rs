//! Configuration management for ChannelForge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lower bound for the detail-extraction concurrency bound
pub const MIN_DETAIL_CONCURRENCY: usize = 1;

/// Upper bound for the detail-extraction concurrency bound
pub const MAX_DETAIL_CONCURRENCY: usize = 10;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// LLM service configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// YouTube Data API configuration
    #[serde(default)]
    pub youtube: YouTubeConfig,

    /// Pipeline tuning
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Provider: gemini, scripted
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    /// API key for the LLM service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct YouTubeConfig {
    /// YouTube Data API v3 key; remote lookups are disabled without one
    pub api_key: Option<String>,

    /// API base URL
    #[serde(default = "default_youtube_api_base")]
    pub api_base: String,

    /// Longest video (in seconds) still treated as short-form
    #[serde(default = "default_short_form_max_secs")]
    pub short_form_max_secs: u32,

    /// Maximum playlist pages walked per remote lookup
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Request timeout in seconds
    #[serde(default = "default_youtube_timeout")]
    pub timeout_secs: u64,
}

/// Generation settings for one pipeline step
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct StepSettings {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StepSettingsConfig {
    #[serde(default = "default_triage_step")]
    pub triage: StepSettings,

    #[serde(default = "default_detail_step")]
    pub detail: StepSettings,

    #[serde(default = "default_synthesis_step")]
    pub synthesis: StepSettings,

    #[serde(default = "default_artifact_step")]
    pub artifact: StepSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Maximum storyboard extractions in flight per channel
    #[serde(default = "default_detail_concurrency")]
    pub detail_concurrency: usize,

    /// Videos resolved per channel for storyboard extraction
    #[serde(default = "default_videos_per_channel")]
    pub videos_per_channel: usize,

    /// In-flight channels untouched for longer than this are considered abandoned
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    /// Capacity of the progress broadcast channel
    #[serde(default = "default_progress_capacity")]
    pub progress_capacity: usize,

    /// Per-step generation settings
    #[serde(default)]
    pub steps: StepSettingsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second (global)
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 30 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_llm_provider() -> String { "gemini".to_string() }
fn default_llm_model() -> String { "gemini-2.0-flash".to_string() }
fn default_llm_timeout() -> u64 { 180 }
fn default_youtube_api_base() -> String { "https://www.googleapis.com/youtube/v3".to_string() }
fn default_short_form_max_secs() -> u32 { 60 }
fn default_max_pages() -> u32 { 4 }
fn default_youtube_timeout() -> u64 { 30 }
fn default_triage_step() -> StepSettings { StepSettings { temperature: 0.4, max_output_tokens: 4096 } }
fn default_detail_step() -> StepSettings { StepSettings { temperature: 0.2, max_output_tokens: 4096 } }
fn default_synthesis_step() -> StepSettings { StepSettings { temperature: 0.4, max_output_tokens: 8192 } }
fn default_artifact_step() -> StepSettings { StepSettings { temperature: 0.8, max_output_tokens: 2048 } }
fn default_detail_concurrency() -> usize { 3 }
fn default_videos_per_channel() -> usize { 6 }
fn default_stale_after() -> u64 { 600 }
fn default_progress_capacity() -> usize { 256 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "channelforge".to_string() }
fn default_rate_limit() -> u32 { 20 }
fn default_burst() -> u32 { 40 }
fn default_enabled() -> bool { true }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            api_key: None,
            api_base: None,
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl Default for YouTubeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_youtube_api_base(),
            short_form_max_secs: default_short_form_max_secs(),
            max_pages: default_max_pages(),
            timeout_secs: default_youtube_timeout(),
        }
    }
}

impl Default for StepSettingsConfig {
    fn default() -> Self {
        Self {
            triage: default_triage_step(),
            detail: default_detail_step(),
            synthesis: default_synthesis_step(),
            artifact: default_artifact_step(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detail_concurrency: default_detail_concurrency(),
            videos_per_channel: default_videos_per_channel(),
            stale_after_secs: default_stale_after(),
            progress_capacity: default_progress_capacity(),
            steps: StepSettingsConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Concurrency bound clamped into the supported range
    pub fn detail_concurrency(&self) -> usize {
        self.detail_concurrency
            .clamp(MIN_DETAIL_CONCURRENCY, MAX_DETAIL_CONCURRENCY)
    }

    /// Staleness threshold as a chrono duration
    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_secs as i64)
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__PIPELINE__DETAIL_CONCURRENCY=5
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )

            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig {
                url: "postgres://localhost/channelforge".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            llm: LlmConfig::default(),
            youtube: YouTubeConfig::default(),
            pipeline: PipelineConfig::default(),
            observability: ObservabilityConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.llm.model, "gemini-2.0-flash");
        assert_eq!(config.pipeline.detail_concurrency(), 3);
        assert_eq!(config.youtube.short_form_max_secs, 60);
    }

    #[test]
    fn test_synthesis_gets_larger_token_budget() {
        let steps = StepSettingsConfig::default();
        assert!(steps.synthesis.max_output_tokens > steps.triage.max_output_tokens);
        assert!(steps.synthesis.max_output_tokens > steps.detail.max_output_tokens);
        assert!(steps.synthesis.max_output_tokens > steps.artifact.max_output_tokens);
    }

    #[test]
    fn test_detail_concurrency_is_clamped() {
        let mut pipeline = PipelineConfig::default();
        pipeline.detail_concurrency = 0;
        assert_eq!(pipeline.detail_concurrency(), 1);
        pipeline.detail_concurrency = 64;
        assert_eq!(pipeline.detail_concurrency(), 10);
    }

    #[test]
    fn test_read_database_fallback() {
        let config = AppConfig::default();
        assert_eq!(config.read_database_url(), "postgres://localhost/channelforge");
    }
}
