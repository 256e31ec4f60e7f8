use std::time::Duration;

use tokio::time::{Instant, sleep, timeout};
use tracing::warn;

use super::gateway::{
    GatewayError, GatewayFuture, GenerationRequest, GenerationResponse, ModelGateway,
};

const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_BACKOFF_STEP: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempt_timeout: Duration,
    pub max_retries: u32,
    /// Linear backoff unit: the n-th retry waits `n * backoff_step`.
    pub backoff_step: Duration,
    pub overall_deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_step: DEFAULT_BACKOFF_STEP,
            overall_deadline: None,
        }
    }
}

impl RetryPolicy {
    pub fn backoff_for(&self, retry: u32) -> Duration {
        self.backoff_step.saturating_mul(retry)
    }
}

#[derive(Debug)]
enum AttemptOutcome {
    Success(GenerationResponse),
    Retryable(GatewayError),
    Fatal(GatewayError),
}

/// Wraps a gateway with per-attempt timeouts, bounded linear-backoff retries,
/// cancellation and an optional overall deadline.
#[derive(Clone)]
pub struct RetryingGateway<G>
where
    G: ModelGateway,
{
    inner: G,
    policy: RetryPolicy,
}

impl<G> RetryingGateway<G>
where
    G: ModelGateway,
{
    pub fn new(inner: G, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn attempt(
        &self,
        request: GenerationRequest,
        deadline: Option<Instant>,
    ) -> AttemptOutcome {
        let cancel = request.cancel.clone();
        let mut limit = self.policy.attempt_timeout;
        let mut limited_by_deadline = false;
        if let Some(deadline) = deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining <= limit {
                limit = remaining;
                limited_by_deadline = true;
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => AttemptOutcome::Fatal(GatewayError::Cancelled),
            result = timeout(limit, self.inner.generate(request)) => match result {
                Ok(Ok(response)) => AttemptOutcome::Success(response),
                Ok(Err(err)) if err.is_retryable() => AttemptOutcome::Retryable(err),
                Ok(Err(err)) => AttemptOutcome::Fatal(err),
                Err(_) if limited_by_deadline => {
                    AttemptOutcome::Fatal(GatewayError::DeadlineExceeded)
                }
                Err(_) => AttemptOutcome::Retryable(GatewayError::Timeout),
            },
        }
    }
}

impl<G> ModelGateway for RetryingGateway<G>
where
    G: ModelGateway,
{
    fn generate<'a>(&'a self, request: GenerationRequest) -> GatewayFuture<'a> {
        Box::pin(async move {
            let deadline = self
                .policy
                .overall_deadline
                .map(|budget| Instant::now() + budget);
            let tier = request.tier.as_str();
            let mut retries = 0_u32;

            loop {
                if request.cancel.is_cancelled() {
                    return Err(GatewayError::Cancelled);
                }
                if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    return Err(GatewayError::DeadlineExceeded);
                }

                let err = match self.attempt(request.clone(), deadline).await {
                    AttemptOutcome::Success(response) => return Ok(response),
                    AttemptOutcome::Fatal(err) => return Err(err),
                    AttemptOutcome::Retryable(err) => err,
                };

                if retries >= self.policy.max_retries {
                    warn!(tier, attempts = retries + 1, error = %err, "llm retries exhausted");
                    return Err(err);
                }
                retries += 1;

                let backoff = self.policy.backoff_for(retries);
                if deadline.is_some_and(|deadline| Instant::now() + backoff >= deadline) {
                    return Err(GatewayError::DeadlineExceeded);
                }
                warn!(
                    tier,
                    retry = retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "retrying llm request"
                );

                tokio::select! {
                    _ = request.cancel.cancelled() => return Err(GatewayError::Cancelled),
                    _ = sleep(backoff) => {}
                }
            }
        })
    }
}
