//! Metrics and observability utilities
//!
//! Prometheus metrics for the HTTP surface and the enrichment pipeline.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all ChannelForge metrics
pub const METRICS_PREFIX: &str = "channelforge";

/// Histogram buckets for HTTP request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000,
];

/// Buckets for LLM call latency. Video extraction routinely takes tens of seconds.
pub const LLM_BUCKETS: &[f64] = &[
    0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0, 180.0,
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    describe_counter!(
        format!("{}_llm_calls_total", METRICS_PREFIX),
        Unit::Count,
        "LLM calls by step and outcome"
    );

    describe_histogram!(
        format!("{}_llm_call_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "LLM call latency in seconds"
    );

    describe_counter!(
        format!("{}_llm_tokens_total", METRICS_PREFIX),
        Unit::Count,
        "Tokens consumed by step"
    );

    describe_counter!(
        format!("{}_runs_total", METRICS_PREFIX),
        Unit::Count,
        "Pipeline runs by final status"
    );

    describe_counter!(
        format!("{}_channels_finished_total", METRICS_PREFIX),
        Unit::Count,
        "Run channels reaching a terminal status"
    );

    describe_counter!(
        format!("{}_storyboards_total", METRICS_PREFIX),
        Unit::Count,
        "Storyboard extractions by outcome"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Record one settled LLM call
pub fn record_llm_call(step: &str, duration_secs: f64, success: bool, total_tokens: Option<i32>) {
    let status = if success { "done" } else { "error" };

    counter!(
        format!("{}_llm_calls_total", METRICS_PREFIX),
        "step" => step.to_string(),
        "status" => status
    )
    .increment(1);

    histogram!(
        format!("{}_llm_call_duration_seconds", METRICS_PREFIX),
        "step" => step.to_string()
    )
    .record(duration_secs);

    if let Some(tokens) = total_tokens.filter(|t| *t > 0) {
        counter!(
            format!("{}_llm_tokens_total", METRICS_PREFIX),
            "step" => step.to_string()
        )
        .increment(tokens as u64);
    }
}

pub fn record_run_finished(status: &str) {
    counter!(
        format!("{}_runs_total", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_channel_finished(status: &str) {
    counter!(
        format!("{}_channels_finished_total", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_storyboard(success: bool) {
    let status = if success { "done" } else { "error" };
    counter!(
        format!("{}_storyboards_total", METRICS_PREFIX),
        "status" => status
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_sorted() {
        for buckets in [LATENCY_BUCKETS, LLM_BUCKETS] {
            let mut prev = 0.0;
            for &bucket in buckets {
                assert!(bucket > prev);
                prev = bucket;
            }
        }
    }

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed: calls are no-ops
        record_llm_call("triage", 1.2, true, Some(150));
        record_storyboard(false);
        RequestMetrics::start("GET", "/v1/runs").finish(200);
    }
}
