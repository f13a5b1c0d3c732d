use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::error::InferenceError;
use crate::history::Conversation;
use crate::types::Turn;

/// The model's answer to one conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    /// `None` when the provider returned no candidates.
    pub candidate: Option<Candidate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Responder turn: text and action-request segments.
    pub turn: Turn,
    /// The provider flagged the output as a structurally invalid action request.
    pub malformed: bool,
}

/// Sends a conversation to the model and returns its next turn.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn generate(&self, conversation: &Conversation) -> Result<ModelResponse, InferenceError>;
}

#[async_trait]
impl<C: InferenceClient + ?Sized> InferenceClient for std::sync::Arc<C> {
    async fn generate(&self, conversation: &Conversation) -> Result<ModelResponse, InferenceError> {
        (**self).generate(conversation).await
    }
}

/// Exponential backoff: attempt `n` (0-based) waits `base_delay * 2^n` before retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Wraps a client with a [`RetryPolicy`] for transient failures.
pub struct RetryingClient<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: InferenceClient> RetryingClient<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<C: InferenceClient> InferenceClient for RetryingClient<C> {
    async fn generate(&self, conversation: &Conversation) -> Result<ModelResponse, InferenceError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            let err = match self.inner.generate(conversation).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };
            if !err.is_transient() {
                error!("inference call failed permanently: {err}");
                return Err(err);
            }
            warn!(
                "inference call failed (attempt {}/{}): {err}",
                attempt + 1,
                max_attempts
            );
            if attempt + 1 >= max_attempts {
                error!("inference call failed after {max_attempts} attempts");
                return Err(InferenceError::Exhausted {
                    attempts: max_attempts,
                    last: Box::new(err),
                });
            }
            let delay = self.policy.delay_for(attempt);
            info!("retrying in {delay:?}");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
