//! Transient-failure retry around any [`ModelClient`].

use async_trait::async_trait;

use super::{ModelCapabilities, ModelClient, ModelEventStream};
use crate::error::TurnError;
use crate::types::{GenerateRequest, GenerateResponse};
use crate::util::retry::RetryPolicy;

/// Retries rate limits, network failures and timeouts with backoff.
///
/// Only establishing a stream is retried; a stream that fails midway surfaces
/// its error to the caller. Context overflow is never retried.
#[derive(Debug, Clone)]
pub struct RetryingClient<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: ModelClient> RetryingClient<C> {
    pub fn new(inner: C) -> Self {
        Self::with_policy(inner, RetryPolicy::default())
    }

    pub fn with_policy(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: ModelClient> ModelClient for RetryingClient<C> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn capabilities(&self, model: &str) -> ModelCapabilities {
        self.inner.capabilities(model)
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, TurnError> {
        self.policy.execute(|| self.inner.generate(request)).await
    }

    async fn stream(&self, request: &GenerateRequest) -> Result<ModelEventStream, TurnError> {
        self.policy.execute(|| self.inner.stream(request)).await
    }
}
