//! Batch strategy: one request per chunk carrying all of the chunk's records.
//!
//! The response enumerates a per-item outcome. A batch-level transport
//! failure fails every record in the chunk; records the response does not
//! mention stay pending as failures.

use std::collections::HashMap;

use async_trait::async_trait;
use ferry_engine::{ConflictResolver, Record};

use super::{commit, load_pending, settle_against, ItemOutcome, SyncContext, SyncStrategy};
use crate::config::StrategyKind;
use crate::error::Result;
use crate::remote::{BatchItemResult, BatchResponse};
use crate::status::SyncResult;

#[derive(Debug, Default, Clone, Copy)]
pub struct BatchStrategy;

#[async_trait]
impl SyncStrategy for BatchStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Batch
    }

    async fn execute(&self, ctx: &SyncContext<'_>) -> Result<SyncResult> {
        let pending = load_pending(ctx).await?;
        let chunk_size = ctx.config.effective_batch_size();
        let mut total = SyncResult::default();

        for chunk in pending.chunks(chunk_size) {
            if !ctx.is_active() {
                break;
            }

            let outcomes = match ctx.remote.deliver_batch(chunk).await {
                Ok(response) => settle_batch(chunk, response, ctx.resolver),
                Err(e) => {
                    tracing::warn!(chunk = chunk.len(), error = %e, "Batch delivery failed");
                    chunk
                        .iter()
                        .map(|record| (record.clone(), ItemOutcome::Failed(e.to_string())))
                        .collect()
                }
            };

            total.merge(commit(ctx, outcomes).await?);
        }

        Ok(total)
    }

    /// Batches accumulate until the interval trigger fires.
    fn syncs_on_change(&self) -> bool {
        false
    }
}

/// Match per-item results to the records of one chunk.
fn settle_batch(
    chunk: &[Record],
    response: BatchResponse,
    resolver: &ConflictResolver,
) -> Vec<(Record, ItemOutcome)> {
    let by_id: HashMap<_, BatchItemResult> = response
        .results
        .into_iter()
        .filter_map(|result| result.record_id().map(|id| (id, result)))
        .collect();

    chunk
        .iter()
        .map(|record| {
            let outcome = match by_id.get(&record.id) {
                None => ItemOutcome::Failed("missing from batch response".to_string()),
                Some(result) if result.success => match &result.item {
                    Some(remote) => settle_against(record, remote, resolver),
                    None => ItemOutcome::Synced,
                },
                Some(result) => ItemOutcome::Failed(
                    result
                        .error
                        .clone()
                        .unwrap_or_else(|| "rejected by server".to_string()),
                ),
            };
            (record.clone(), outcome)
        })
        .collect()
}
