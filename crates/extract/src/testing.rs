//! A canned-response engine for tests and offline runs.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::llm::{CompletionEngine, EngineError, SamplingOptions};

enum Reply {
    Text(String),
    Fail(String),
}

/// Replies with queued responses in order, then repeats the last one.
pub struct ScriptedEngine {
    replies: Mutex<VecDeque<Reply>>,
    last: Mutex<Option<String>>,
    prompts: Mutex<Vec<String>>,
    options: Mutex<Vec<SamplingOptions>>,
    defaults: SamplingOptions,
    delay: Duration,
    calls: AtomicUsize,
    disposed: AtomicBool,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            prompts: Mutex::new(Vec::new()),
            options: Mutex::new(Vec::new()),
            defaults: SamplingOptions::default(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn replying(response: impl Into<String>) -> Self {
        Self::new().then_reply(response)
    }

    pub fn then_reply(self, response: impl Into<String>) -> Self {
        self.push(Reply::Text(response.into()));
        self
    }

    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.push(Reply::Fail(message.into()));
        self
    }

    /// Sleep before every reply
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sampling settings reported as the engine's configured defaults
    pub fn with_sampling_defaults(mut self, defaults: SamplingOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn sampling(&self) -> Vec<SamplingOptions> {
        self.options.lock().map(|o| o.clone()).unwrap_or_default()
    }

    fn push(&self, reply: Reply) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
    }

    fn next_reply(&self) -> Reply {
        let queued = self.replies.lock().ok().and_then(|mut r| r.pop_front());
        match queued {
            Some(Reply::Text(text)) => {
                if let Ok(mut last) = self.last.lock() {
                    *last = Some(text.clone());
                }
                Reply::Text(text)
            }
            Some(fail) => fail,
            None => match self.last.lock().ok().and_then(|l| l.clone()) {
                Some(text) => Reply::Text(text),
                None => Reply::Fail("no scripted reply".to_string()),
            },
        }
    }
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionEngine for ScriptedEngine {
    async fn complete(&self, prompt: &str, options: &SamplingOptions) -> Result<String, EngineError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(EngineError::Unavailable);
        }

        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        if let Ok(mut seen) = self.options.lock() {
            seen.push(options.clone());
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.next_reply() {
            Reply::Text(text) => Ok(text),
            Reply::Fail(message) => Err(EngineError::Generation(message)),
        }
    }

    fn sampling_defaults(&self) -> SamplingOptions {
        self.defaults.clone()
    }

    fn is_available(&self) -> bool {
        !self.disposed.load(Ordering::SeqCst)
    }

    async fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    fn model_id(&self) -> &str {
        "scripted"
    }
}
