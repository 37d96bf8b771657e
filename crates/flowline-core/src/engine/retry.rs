//! Retry controller for a single action.

use flowline_types::error::FlowError;

use super::Engine;
use crate::action::ActionRef;
use crate::context::ExecutionContext;
use crate::step::RetryPolicy;

impl Engine {
    /// Invoke `action` until it succeeds or the policy gives up.
    ///
    /// Each attempt runs on a fresh copy of `ctx`; only a successful one is
    /// adopted. Filtered-out errors, cancellation and the last failure are
    /// returned as they are.
    pub(crate) async fn run_retry(
        &self,
        action: &ActionRef,
        policy: &RetryPolicy,
        ctx: &mut ExecutionContext,
    ) -> Result<(), FlowError> {
        let flow_id = ctx.flow().id().to_string();
        let mut delay = policy.delay;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let mut trial = ctx.copy();
            let err = match self.invoke(action, &mut trial).await {
                Ok(()) => {
                    if attempt > 1 {
                        tracing::info!(flow_id = %flow_id, action = %action.id(), attempt, "retry succeeded");
                    }
                    ctx.adopt(trial);
                    return Ok(());
                }
                Err(err) => err,
            };

            if err.is_cancelled() {
                return Err(err);
            }
            if let Some(filter) = &policy.retry_on
                && !filter.matches(&err)
            {
                tracing::debug!(
                    flow_id = %flow_id,
                    action = %action.id(),
                    filter = filter.name(),
                    "error not retryable"
                );
                return Err(err);
            }
            if attempt >= policy.times {
                tracing::warn!(
                    flow_id = %flow_id,
                    action = %action.id(),
                    attempts = attempt,
                    error = %err,
                    "retries exhausted"
                );
                return Err(err);
            }

            tracing::warn!(
                flow_id = %flow_id,
                action = %action.id(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
            delay += delay.mul_f64(policy.multiplier);
        }
    }
}
