//! Scripted client for tests and offline runs
//!
//! Replies are chosen by the first rule whose needle appears in the prompt or
//! media URI. The client also records every request and the peak number of
//! concurrent calls.

use super::{Completion, GenerationRequest, LlmClient, TokenUsage};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Failure { status: u16, body: String },
}

struct Rule {
    needle: String,
    reply: ScriptedReply,
}

pub struct ScriptedLlmClient {
    rules: Vec<Rule>,
    delay: Option<Duration>,
    requests: Mutex<Vec<GenerationRequest>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Default for ScriptedLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            delay: None,
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Reply with `text` when `needle` matches
    pub fn on(mut self, needle: impl Into<String>, text: impl Into<String>) -> Self {
        self.rules.push(Rule {
            needle: needle.into(),
            reply: ScriptedReply::Text(text.into()),
        });
        self
    }

    /// Fail with an HTTP-style error when `needle` matches
    pub fn fail_on(mut self, needle: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        self.rules.push(Rule {
            needle: needle.into(),
            reply: ScriptedReply::Failure {
                status,
                body: body.into(),
            },
        });
        self
    }

    /// Hold every call for `delay` before replying
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().await.clone()
    }

    /// Highest number of calls that were in flight at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn reply_for(&self, request: &GenerationRequest) -> Option<ScriptedReply> {
        self.rules
            .iter()
            .find(|rule| {
                request.prompt.contains(&rule.needle)
                    || request
                        .media_uri
                        .as_deref()
                        .is_some_and(|uri| uri.contains(&rule.needle))
            })
            .map(|rule| rule.reply.clone())
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<Completion> {
        self.requests.lock().await.push(request.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let reply = self.reply_for(request);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match reply {
            Some(ScriptedReply::Text(text)) => Ok(Completion {
                usage: Some(TokenUsage {
                    input_tokens: Some((request.prompt.len() / 4) as i32),
                    output_tokens: Some((text.len() / 4) as i32),
                    total_tokens: Some(((request.prompt.len() + text.len()) / 4) as i32),
                }),
                text,
            }),
            Some(ScriptedReply::Failure { status, body }) => Err(AppError::LlmService {
                status: Some(status),
                message: body,
            }),
            None => Err(AppError::LlmService {
                status: None,
                message: "no scripted reply for request".to_string(),
            }),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
