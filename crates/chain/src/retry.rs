//! Bounded exponential backoff for RPC reads.

use std::future::Future;

use sentinel_core::{BackoffConfig, Error, Result};
use tracing::warn;

/// Run `f` until it succeeds or the attempt budget is spent. Transient
/// failures are retried with doubling delays; exhaustion surfaces as
/// [`Error::ChainRead`].
pub(crate) async fn with_retry<T, F, Fut>(backoff: &BackoffConfig, op: &'static str, f: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt >= backoff.max_attempts.max(1) {
                    return Err(Error::ChainRead(format!("{op}: {e}")));
                }
                let delay = backoff.delay(attempt - 1);
                warn!(
                    op,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "chain read failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
