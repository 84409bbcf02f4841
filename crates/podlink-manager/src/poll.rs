//! Retry loop around [`ClientFactory`].
//!
//! Attempts run back to back with a capped exponential pause in between.
//! The first success is returned straight away; the overall deadline bounds
//! the worst case. Cancellation is checked during attempts and pauses.

use std::sync::Arc;

use podlink_agent::AgentClient;
use podlink_core::PodId;
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

use crate::factory::ClientFactory;
use crate::types::RetryPolicy;
use crate::{ManagerError, Result};

/// Keep calling `factory` until it yields a client, the policy's timeout
/// elapses, or `cancel` fires.
///
/// Each attempt is cut off at the overall deadline. An attempt error that is
/// not [retriable](ManagerError::is_retriable) is returned as-is.
///
/// # Errors
///
/// - [`ManagerError::Timeout`] wrapping the last attempt error once the
///   deadline passes.
/// - [`ManagerError::Cancelled`] if `cancel` fires first.
pub async fn poll_for_client(
    factory: &dyn ClientFactory,
    cancel: &CancellationToken,
    pod_id: &PodId,
    policy: &RetryPolicy,
) -> Result<Arc<dyn AgentClient>> {
    let span = tracing::info_span!("poll_for_client", pod = %pod_id);

    async move {
        let start = Instant::now();
        let deadline = start + policy.timeout;
        let mut backoff = policy.initial_backoff;
        let mut attempts = 0u32;
        let mut last_error = None;

        loop {
            attempts += 1;

            let attempt = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(ManagerError::Cancelled { pod_id: pod_id.clone() });
                }
                attempt = timeout_at(deadline, factory.new_client(pod_id)) => attempt,
            };

            match attempt {
                Ok(Ok(client)) => {
                    debug!(
                        pod = %pod_id,
                        attempts,
                        elapsed = ?start.elapsed(),
                        "Created agent client"
                    );
                    return Ok(client);
                }
                Ok(Err(e)) if !e.is_retriable() => return Err(e),
                Ok(Err(e)) => {
                    debug!(pod = %pod_id, attempt = attempts, error = %e, "Agent client attempt failed");
                    last_error = Some(e);
                }
                Err(_) => {
                    debug!(pod = %pod_id, attempt = attempts, "Agent client attempt hit the deadline");
                    break;
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(ManagerError::Cancelled { pod_id: pod_id.clone() });
                }
                () = sleep(backoff.min(remaining)) => {}
            }

            if Instant::now() >= deadline {
                break;
            }
            backoff = policy.next_backoff(backoff);
        }

        let elapsed = start.elapsed();
        warn!(
            pod = %pod_id,
            attempts,
            elapsed = ?elapsed,
            "Timed out creating agent client"
        );

        Err(ManagerError::Timeout {
            pod_id: pod_id.clone(),
            elapsed,
            attempts,
            source: last_error.map(Box::new),
        })
    }
    .instrument(span)
    .await
}
