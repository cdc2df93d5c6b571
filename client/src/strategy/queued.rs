//! Queued strategy: records are delivered individually, a chunk at a time,
//! with retries.
//!
//! Chunking only paces the work: each record in a chunk gets its own request
//! and the requests of one chunk run concurrently. A failed request is retried
//! until `max_retries` attempts have been made, waiting
//! `retry_delay * 2^(attempt - 1)` between attempts.

use std::time::Duration;

use async_trait::async_trait;
use ferry_engine::Record;
use futures::future::join_all;

use super::{commit, load_pending, settle, ItemOutcome, SyncContext, SyncStrategy};
use crate::config::StrategyKind;
use crate::error::Result;
use crate::status::SyncResult;

#[derive(Debug, Default, Clone, Copy)]
pub struct QueuedStrategy;

#[async_trait]
impl SyncStrategy for QueuedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Queued
    }

    async fn execute(&self, ctx: &SyncContext<'_>) -> Result<SyncResult> {
        let pending = load_pending(ctx).await?;
        let chunk_size = ctx.config.effective_batch_size();
        let mut total = SyncResult::default();

        for chunk in pending.chunks(chunk_size) {
            if !ctx.is_active() {
                break;
            }

            let outcomes = join_all(chunk.iter().map(|record| deliver_with_retry(ctx, record))).await;
            let result = commit(ctx, chunk.iter().cloned().zip(outcomes).collect()).await?;

            tracing::debug!(
                chunk = chunk.len(),
                success = result.success,
                failed = result.failed,
                conflicts = result.conflicts,
                "Queued chunk delivered"
            );
            total.merge(result);
        }

        Ok(total)
    }
}

async fn deliver_with_retry(ctx: &SyncContext<'_>, record: &Record) -> ItemOutcome {
    let attempts = ctx.config.max_retries.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match ctx.remote.deliver(record).await {
            Ok(response) => match settle(record, response, ctx.resolver) {
                ItemOutcome::Failed(error) => last_error = error,
                outcome => return outcome,
            },
            Err(e) => last_error = e.to_string(),
        }

        if attempt == attempts || !ctx.is_active() {
            break;
        }

        let delay = backoff(ctx.config.retry_delay, attempt);
        tracing::debug!(
            record_id = %record.id,
            attempt,
            delay_ms = millis(delay),
            error = %last_error,
            "Delivery failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }

    tracing::warn!(record_id = %record.id, attempts, error = %last_error, "Delivery failed");
    ItemOutcome::Failed(last_error)
}

/// Wait before attempt `attempt + 1`.
pub(crate) fn backoff(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor)
}

fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff(base, 1), Duration::from_millis(100));
        assert_eq!(backoff(base, 2), Duration::from_millis(200));
        assert_eq!(backoff(base, 3), Duration::from_millis(400));
    }

    #[test]
    fn backoff_saturates() {
        let base = Duration::from_secs(u64::MAX / 2);
        assert_eq!(backoff(base, 40), Duration::MAX);
    }

    #[test]
    fn saturated_delay_logs_max_millis() {
        assert_eq!(millis(Duration::from_millis(250)), 250);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }
}
