//! Deterministic providers for tests (enabled by the `test-util` feature).

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

use crate::identity::{IdentityError, IdentityProvider};
use crate::inference::{
    Completion, CompletionRequest, InferenceError, InferenceProvider, MessageContent,
};

/// One scripted provider outcome.
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(Completion),
    RateLimited,
    Fail(String),
}

impl Scripted {
    pub fn text(text: &str, total_tokens: u32) -> Self {
        Self::Reply(Completion {
            content: Some(MessageContent::Text(text.to_string())),
            total_tokens: Some(total_tokens),
        })
    }
}

/// Plays queued outcomes in order, then falls back to a default one. Every
/// request is recorded.
#[derive(Debug)]
pub struct ScriptedProvider {
    queue: Mutex<VecDeque<Scripted>>,
    default: Scripted,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn replying(text: &str) -> Self {
        Self::with_default(Scripted::text(text, 7))
    }

    pub fn with_default(default: Scripted) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            default,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, outcome: Scripted) {
        self.queue.lock().push_back(outcome);
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl InferenceProvider for ScriptedProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, InferenceError> {
        self.requests.lock().push(request.clone());
        let outcome = self
            .queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default.clone());
        match outcome {
            Scripted::Reply(completion) => Ok(completion),
            Scripted::RateLimited => Err(InferenceError::RateLimited {
                message: "scripted rate limit".to_string(),
            }),
            Scripted::Fail(message) => Err(InferenceError::Api { code: 500, message }),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Fixed token → user table.
#[derive(Debug, Default)]
pub struct StaticIdentityProvider {
    tokens: HashMap<String, Uuid>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, token: &str, user_id: Uuid) -> Self {
        self.tokens.insert(token.to_string(), user_id);
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn authenticate(&self, token: &str) -> Result<Uuid, IdentityError> {
        self.tokens
            .get(token)
            .copied()
            .ok_or(IdentityError::InvalidToken)
    }
}
