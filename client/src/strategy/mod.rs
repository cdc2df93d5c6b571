//! Delivery strategies.
//!
//! A strategy reads every record flagged `needsSync`, delivers it, and folds
//! each outcome back into the local store:
//!
//! - **Synced**: the remote accepted our state; the flag is cleared
//! - **Failed**: transport or server failure; the record stays pending
//! - **Conflict**: the remote reported a different version or `updatedAt`;
//!   the resolved record is persisted and the flag is cleared
//!
//! Outcomes are committed against a fresh read of the store. A record that
//! was edited locally while its delivery was in flight keeps its flag, and
//! nothing is committed once the owning session has been disabled.

mod batch;
mod immediate;
mod queued;

pub use batch::BatchStrategy;
pub use immediate::ImmediateStrategy;
pub use queued::QueuedStrategy;

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ferry_engine::{id_key, ConflictResolver, Record, RecordId};
use serde_json::Value;

use crate::config::{StrategyKind, SyncConfig};
use crate::error::Result;
use crate::remote::{DeliveryResponse, RemoteEndpoint};
use crate::status::SyncResult;
use crate::store::{self, LocalStore};

/// Everything one execution pass needs.
pub struct SyncContext<'a> {
    pub store: &'a dyn LocalStore,
    pub storage_key: &'a str,
    pub remote: &'a dyn RemoteEndpoint,
    pub config: &'a SyncConfig,
    pub resolver: &'a ConflictResolver,
    /// Cleared when the owning session is disabled
    pub active: &'a AtomicBool,
}

impl SyncContext<'_> {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// A delivery algorithm.
#[async_trait]
pub trait SyncStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Run one full pass over the pending records.
    ///
    /// Item failures are counted in the result; `Err` means the pass as a
    /// whole could not run (e.g. the store could not be read).
    async fn execute(&self, ctx: &SyncContext<'_>) -> Result<SyncResult>;

    /// Number of records currently flagged as needing sync.
    async fn pending_count(&self, store: &dyn LocalStore, storage_key: &str) -> Result<usize> {
        Ok(store::read_set(store, storage_key).await?.pending_count())
    }

    /// Whether a local change should trigger a pass right away.
    fn syncs_on_change(&self) -> bool {
        true
    }
}

impl StrategyKind {
    /// Instantiate the strategy. Selected once per enabled session.
    pub fn build(&self) -> Arc<dyn SyncStrategy> {
        match self {
            StrategyKind::Immediate => Arc::new(ImmediateStrategy),
            StrategyKind::Queued => Arc::new(QueuedStrategy),
            StrategyKind::Batch => Arc::new(BatchStrategy),
        }
    }
}

/// Result of delivering one record.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Synced,
    Failed(String),
    /// Holds the resolved record to persist
    Conflict(Record),
}

/// Turn the remote's answer into an outcome, resolving divergence.
pub(crate) fn settle(
    local: &Record,
    response: DeliveryResponse,
    resolver: &ConflictResolver,
) -> ItemOutcome {
    match response {
        DeliveryResponse::Accepted { item: None } => ItemOutcome::Synced,
        DeliveryResponse::Accepted { item: Some(remote) } | DeliveryResponse::Returned(remote) => {
            settle_against(local, &remote, resolver)
        }
        DeliveryResponse::Rejected { error } => {
            ItemOutcome::Failed(error.unwrap_or_else(|| "rejected by server".to_string()))
        }
    }
}

/// Compare the remote's copy with what we sent.
pub(crate) fn settle_against(
    local: &Record,
    remote: &Record,
    resolver: &ConflictResolver,
) -> ItemOutcome {
    if local.diverges_from(remote) {
        tracing::debug!(
            record_id = %local.id,
            local_version = local.version(),
            remote_version = remote.version(),
            "Conflict detected"
        );
        // The resolver may be caller-supplied; a panic fails this item only.
        match catch_unwind(AssertUnwindSafe(|| resolver.resolve(local, remote))) {
            Ok(resolved) => ItemOutcome::Conflict(resolved),
            Err(_) => {
                tracing::warn!(record_id = %local.id, "Conflict resolver panicked");
                ItemOutcome::Failed("conflict resolver panicked".to_string())
            }
        }
    } else {
        ItemOutcome::Synced
    }
}

/// Records flagged as needing sync, in stored order.
pub(crate) async fn load_pending(ctx: &SyncContext<'_>) -> Result<Vec<Record>> {
    let set = store::read_set(ctx.store, ctx.storage_key).await?;
    Ok(set
        .records()?
        .into_iter()
        .filter(|record| record.needs_sync)
        .collect())
}

/// Count outcomes and apply them to the stored record set.
pub(crate) async fn commit(
    ctx: &SyncContext<'_>,
    outcomes: Vec<(Record, ItemOutcome)>,
) -> Result<SyncResult> {
    let mut result = SyncResult::default();
    for (_, outcome) in &outcomes {
        match outcome {
            ItemOutcome::Synced => result.success += 1,
            ItemOutcome::Failed(_) => result.failed += 1,
            ItemOutcome::Conflict(_) => result.conflicts += 1,
        }
    }

    if !ctx.is_active() {
        tracing::debug!(
            items = outcomes.len(),
            "Sync disabled during delivery, discarding outcomes"
        );
        return Ok(result);
    }
    if result.settled() == 0 {
        return Ok(result);
    }

    // Only the delivered items are patched; every other stored item keeps
    // its exact JSON, including the type of its id.
    let mut set = store::read_set(ctx.store, ctx.storage_key).await?;
    let positions: HashMap<RecordId, usize> = set
        .items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| item.get("id").and_then(id_key).map(|id| (id, i)))
        .collect();

    for (delivered, outcome) in outcomes {
        let Some(&pos) = positions.get(&delivered.id) else {
            // Removed locally while in flight.
            continue;
        };
        let stored = Record::from_value(set.items[pos].clone())?;
        if stored.version() != delivered.version() {
            tracing::debug!(record_id = %delivered.id, "Record changed during delivery, keeping it pending");
            continue;
        }
        match outcome {
            ItemOutcome::Synced => clear_pending_flag(&mut set.items[pos]),
            ItemOutcome::Conflict(mut resolved) => {
                keep_version_floor(&mut resolved, &stored);
                resolved.needs_sync = false;
                let mut value = resolved.to_value();
                if let (Some(fields), Some(id)) = (value.as_object_mut(), set.items[pos].get("id")) {
                    fields.insert("id".to_string(), id.clone());
                }
                set.items[pos] = value;
            }
            ItemOutcome::Failed(_) => {}
        }
    }

    store::write_set(ctx.store, ctx.storage_key, &set).await?;
    Ok(result)
}

fn clear_pending_flag(item: &mut Value) {
    if let Some(fields) = item.as_object_mut() {
        fields.remove("_needsSync");
    }
}

/// A persisted record's version never goes down, whichever side won.
fn keep_version_floor(resolved: &mut Record, stored: &Record) {
    let Some(floor) = stored.metadata.as_ref() else {
        return;
    };
    match resolved.metadata.as_mut() {
        Some(metadata) => metadata.version = metadata.version.max(floor.version),
        None => resolved.metadata = Some(floor.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ferry_engine::{ConflictPolicy, PolicyName};
    use serde_json::Map;

    fn record(version_bumps: usize) -> Record {
        let mut record = Record::new("a", Map::new(), Utc.timestamp_opt(1000, 0).unwrap());
        for i in 0..version_bumps {
            record.touch(Utc.timestamp_opt(2000 + i as i64, 0).unwrap());
        }
        record
    }

    #[test]
    fn plain_ack_is_synced() {
        let resolver = ConflictResolver::default();
        let outcome = settle(
            &record(1),
            DeliveryResponse::Accepted { item: None },
            &resolver,
        );
        assert_eq!(outcome, ItemOutcome::Synced);
    }

    #[test]
    fn matching_echo_is_synced() {
        let resolver = ConflictResolver::default();
        let local = record(1);
        let outcome = settle(
            &local,
            DeliveryResponse::Accepted {
                item: Some(local.clone()),
            },
            &resolver,
        );
        assert_eq!(outcome, ItemOutcome::Synced);
    }

    #[test]
    fn divergent_echo_is_conflict() {
        let resolver = ConflictResolver::new(PolicyName::ServerWins.into());
        let local = record(1);
        let remote = record(3);
        let outcome = settle(&local, DeliveryResponse::Returned(remote.clone()), &resolver);
        assert_eq!(outcome, ItemOutcome::Conflict(remote));
    }

    #[test]
    fn panicking_resolver_fails_the_item() {
        let resolver = ConflictResolver::new(ConflictPolicy::custom(|_, _| panic!("resolver bug")));
        let outcome = settle(&record(1), DeliveryResponse::Returned(record(3)), &resolver);
        assert_eq!(
            outcome,
            ItemOutcome::Failed("conflict resolver panicked".into())
        );
    }

    #[test]
    fn version_floor_keeps_the_higher_version() {
        let stored = record(4);
        let mut resolved = record(1);
        keep_version_floor(&mut resolved, &stored);
        assert_eq!(resolved.version(), stored.version());

        let mut newer = record(6);
        keep_version_floor(&mut newer, &stored);
        assert_eq!(newer.version(), 7);

        let mut bare = record(0);
        bare.metadata = None;
        keep_version_floor(&mut bare, &stored);
        assert_eq!(bare.version(), stored.version());
    }

    #[test]
    fn rejection_is_failure() {
        let resolver = ConflictResolver::default();
        let outcome = settle(
            &record(1),
            DeliveryResponse::Rejected { error: None },
            &resolver,
        );
        assert_eq!(outcome, ItemOutcome::Failed("rejected by server".into()));
    }
}
