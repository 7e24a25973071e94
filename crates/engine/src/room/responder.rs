//! Delegate responder: turns a prompt and a message into a reply string.
//!
//! Rate limiting is the only retryable failure; anything else degrades to a
//! fixed fallback line immediately. The responder never errors out of this
//! boundary - a synthetic participant always says *something*.

use std::sync::Arc;
use std::time::Duration;

use crate::infrastructure::ports::{ChatError, ChatModelPort, ChatRequest};

/// Reply used when the generation endpoint fails outright.
pub const FALLBACK_REPLY: &str = "Sorry, I lost my train of thought. What were you saying?";

/// Reply used when every rate-limited attempt has been spent.
pub const EXHAUSTED_REPLY: &str = "I'm swamped right now. Give me a moment and ask again.";

/// Configuration for retry behavior on rate limiting.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each one after.
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

pub struct DelegateResponder {
    chat: Arc<dyn ChatModelPort>,
    max_tokens: u32,
    retry: RetryConfig,
}

impl DelegateResponder {
    pub fn new(chat: Arc<dyn ChatModelPort>, max_tokens: u32, retry: RetryConfig) -> Self {
        Self {
            chat,
            max_tokens,
            retry,
        }
    }

    /// Delay before the attempt following `attempt` (1-based): base * 2^(n-1).
    fn delay_for(&self, attempt: u32) -> Duration {
        self.retry.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// Produce a reply. Always yields a string; upstream failures turn into
    /// fixed user-facing lines. The sleeps here run on whatever task awaits
    /// the reply, never inside a room's command loop.
    pub async fn respond(&self, system_prompt: &str, user_message: &str) -> String {
        for attempt in 1..=self.retry.max_attempts {
            let request = ChatRequest {
                system_prompt: system_prompt.to_string(),
                user_message: user_message.to_string(),
                max_tokens: self.max_tokens,
            };

            match self.chat.complete(request).await {
                Ok(reply) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "Delegate request succeeded after retry");
                    }
                    return reply;
                }
                Err(ChatError::RateLimited) => {
                    if attempt == self.retry.max_attempts {
                        break;
                    }
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Delegate rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(ChatError::Upstream(e)) => {
                    tracing::error!(error = %e, "Delegate request failed");
                    return FALLBACK_REPLY.to_string();
                }
            }
        }

        tracing::error!(
            attempts = self.retry.max_attempts,
            "Delegate rate limit retries exhausted"
        );
        EXHAUSTED_REPLY.to_string()
    }
}
