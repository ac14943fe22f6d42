//! Oracle abstraction: submit a prompt, receive a completion

use async_trait::async_trait;
use orchestra_core::{OrchestraError, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// External reasoning service (allows mocking in tests)
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Submit a text prompt and return the completion text
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[async_trait]
impl<T: Oracle + ?Sized> Oracle for Arc<T> {
    async fn complete(&self, prompt: &str) -> Result<String> {
        (**self).complete(prompt).await
    }
}

/// Bounds every completion of the wrapped oracle
///
/// Expiry surfaces as [`OrchestraError::Timeout`], a recoverable failure of
/// that single call.
pub struct TimeoutOracle<O> {
    inner: O,
    timeout: Duration,
}

impl<O: Oracle> TimeoutOracle<O> {
    pub fn new(inner: O, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<O: Oracle> Oracle for TimeoutOracle<O> {
    async fn complete(&self, prompt: &str) -> Result<String> {
        match tokio::time::timeout(self.timeout, self.inner.complete(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(OrchestraError::Timeout(format!(
                "oracle did not answer within {}s",
                self.timeout.as_secs_f32()
            ))),
        }
    }
}

/// Canned reply for [`ScriptedOracle`]
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Error(String),
    /// Never completes; exercises timeouts
    Hang,
}

impl From<&str> for ScriptedReply {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for ScriptedReply {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

struct Rule {
    needle: String,
    replies: VecDeque<ScriptedReply>,
    last: Option<ScriptedReply>,
}

/// Scripted oracle for testing
///
/// Each rule matches prompts containing its needle and replays its replies in
/// order, repeating the last one once exhausted. Unmatched prompts get the
/// fallback reply. Every prompt is recorded.
pub struct ScriptedOracle {
    rules: Mutex<Vec<Rule>>,
    fallback: ScriptedReply,
    prompts: Mutex<Vec<String>>,
}

impl Default for ScriptedOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            fallback: ScriptedReply::Error("no scripted reply".to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Add a rule for prompts containing `needle`
    pub fn on<I, R>(self, needle: &str, replies: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<ScriptedReply>,
    {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                needle: needle.to_string(),
                replies: replies.into_iter().map(Into::into).collect(),
                last: None,
            });
        }
        self
    }

    pub fn with_fallback(mut self, reply: impl Into<ScriptedReply>) -> Self {
        self.fallback = reply.into();
        self
    }

    /// All prompts received so far, in order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Number of prompts containing `needle`
    pub fn calls_matching(&self, needle: &str) -> usize {
        self.prompts().iter().filter(|p| p.contains(needle)).count()
    }

    fn next_reply(&self, prompt: &str) -> ScriptedReply {
        let Ok(mut rules) = self.rules.lock() else {
            return self.fallback.clone();
        };
        for rule in rules.iter_mut() {
            if !prompt.contains(&rule.needle) {
                continue;
            }
            if let Some(reply) = rule.replies.pop_front() {
                rule.last = Some(reply.clone());
                return reply;
            }
            if let Some(last) = &rule.last {
                return last.clone();
            }
        }
        self.fallback.clone()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn complete(&self, prompt: &str) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        match self.next_reply(prompt) {
            ScriptedReply::Text(text) => Ok(text),
            ScriptedReply::Error(message) => Err(OrchestraError::Oracle(message)),
            ScriptedReply::Hang => std::future::pending().await,
        }
    }
}
