//! Immediate strategy: one request per record, issued sequentially.

use async_trait::async_trait;

use super::{commit, load_pending, settle, ItemOutcome, SyncContext, SyncStrategy};
use crate::config::StrategyKind;
use crate::error::Result;
use crate::status::SyncResult;

/// Simplest strategy; meant for small change volumes. Failed records wait for
/// the next pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateStrategy;

#[async_trait]
impl SyncStrategy for ImmediateStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Immediate
    }

    async fn execute(&self, ctx: &SyncContext<'_>) -> Result<SyncResult> {
        let pending = load_pending(ctx).await?;
        let mut outcomes = Vec::with_capacity(pending.len());

        for record in pending {
            if !ctx.is_active() {
                break;
            }

            let outcome = match ctx.remote.deliver(&record).await {
                Ok(response) => settle(&record, response, ctx.resolver),
                Err(e) => {
                    tracing::warn!(record_id = %record.id, error = %e, "Delivery failed");
                    ItemOutcome::Failed(e.to_string())
                }
            };
            outcomes.push((record, outcome));
        }

        commit(ctx, outcomes).await
    }
}
