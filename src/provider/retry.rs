//! Retry wrapper layered around any provider.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DelveError;
use crate::util::retry::RetryPolicy;

use super::{Backend, ModelProvider, TurnRequest, TurnResponse};

/// Re-sends a turn on retryable failures (rate limits, network, 5xx).
pub struct RetryingProvider {
    inner: Arc<dyn ModelProvider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn ModelProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl ModelProvider for RetryingProvider {
    fn backend(&self) -> Backend {
        self.inner.backend()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn supports_prompt_caching(&self) -> bool {
        self.inner.supports_prompt_caching()
    }

    async fn send_turn(&self, request: &TurnRequest) -> Result<TurnResponse, DelveError> {
        self.policy.execute(|| self.inner.send_turn(request)).await
    }
}
