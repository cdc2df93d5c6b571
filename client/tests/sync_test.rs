//! Integration tests for the sync coordinator and its strategies.
//!
//! The remote is an in-process mock; no network is involved.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use ferry_client::remote::{BatchItemResult, BatchResponse, DeliveryResponse};
use ferry_client::store::{read_set, write_set};
use ferry_client::{
    Error, LocalStore, MemoryStore, RemoteEndpoint, StrategyKind, SyncConfig, SyncCoordinator,
    SyncResult, TransportError,
};
use ferry_engine::{
    ConflictPolicy, PolicyName, Record, RecordMetadata, Timestamp, VersionedRecordSet,
};
use serde_json::{json, Map, Value};
use tokio::sync::{watch, Semaphore};

const KEY: &str = "todos";

type Reply = Box<dyn Fn(&Record, usize) -> Result<DeliveryResponse, TransportError> + Send + Sync>;
type BatchReply = Box<dyn Fn(&[Record]) -> Result<BatchResponse, TransportError> + Send + Sync>;

/// Remote endpoint double that counts calls and answers via closures.
struct MockRemote {
    calls: AtomicUsize,
    batch_sizes: Mutex<Vec<usize>>,
    reply: Reply,
    batch_reply: BatchReply,
    gate: Option<Arc<Semaphore>>,
}

impl MockRemote {
    fn new(
        reply: impl Fn(&Record, usize) -> Result<DeliveryResponse, TransportError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            batch_sizes: Mutex::new(Vec::new()),
            reply: Box::new(reply),
            batch_reply: Box::new(accept_all),
            gate: None,
        })
    }

    fn accepting() -> Arc<Self> {
        Self::new(|_, _| Ok(DeliveryResponse::Accepted { item: None }))
    }

    /// Answers batch deliveries with `batch_reply`.
    fn batching(
        batch_reply: impl Fn(&[Record]) -> Result<BatchResponse, TransportError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            batch_sizes: Mutex::new(Vec::new()),
            reply: Box::new(|_, _| Ok(DeliveryResponse::Accepted { item: None })),
            batch_reply: Box::new(batch_reply),
            gate: None,
        })
    }

    /// Blocks every delivery until a permit is added to `gate`.
    fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            batch_sizes: Mutex::new(Vec::new()),
            reply: Box::new(|_, _| Ok(DeliveryResponse::Accepted { item: None })),
            batch_reply: Box::new(accept_all),
            gate: Some(gate),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn item_result(record: &Record, success: bool) -> BatchItemResult {
    BatchItemResult {
        success,
        item_id: Some(Value::String(record.id.clone())),
        item: None,
        error: (!success).then(|| "rejected".to_string()),
    }
}

fn accept_all(records: &[Record]) -> Result<BatchResponse, TransportError> {
    Ok(BatchResponse {
        results: records.iter().map(|record| item_result(record, true)).collect(),
    })
}

#[async_trait]
impl RemoteEndpoint for MockRemote {
    async fn deliver(&self, record: &Record) -> Result<DeliveryResponse, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        (self.reply)(record, call)
    }

    async fn deliver_batch(&self, records: &[Record]) -> Result<BatchResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batch_sizes.lock().unwrap().push(records.len());
        (self.batch_reply)(records)
    }
}

fn at(secs: i64) -> Timestamp {
    Utc.timestamp_opt(1_706_745_600 + secs, 0).unwrap()
}

/// A record with one local change pending.
fn pending_record(id: &str) -> Record {
    let mut fields = Map::new();
    fields.insert("title".into(), json!(format!("todo {id}")));
    let mut record = Record::new(id, fields, at(0));
    record.touch(at(10));
    record
}

async fn seed(store: &Arc<MemoryStore>, records: &[Record]) {
    write_set(store.as_ref(), KEY, &VersionedRecordSet::from_records(records, 1))
        .await
        .unwrap();
}

async fn stored(store: &Arc<MemoryStore>) -> Vec<Record> {
    read_set(store.as_ref(), KEY).await.unwrap().records().unwrap()
}

fn coordinator(store: &Arc<MemoryStore>, remote: &Arc<MockRemote>) -> SyncCoordinator {
    SyncCoordinator::new(store.clone(), KEY).with_remote(remote.clone())
}

fn config(strategy: StrategyKind) -> SyncConfig {
    SyncConfig::new("http://localhost/sync")
        .with_strategy(strategy)
        .with_retry_delay(Duration::from_millis(10))
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

#[cfg(test)]
mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_sync_requires_enable() {
        let store = Arc::new(MemoryStore::new());
        let remote = MockRemote::accepting();
        let coordinator = coordinator(&store, &remote);

        assert!(!coordinator.is_active());
        assert!(matches!(coordinator.sync().await, Err(Error::NotEnabled)));
    }

    #[tokio::test]
    async fn test_enable_requires_timestamp_tracking() {
        let store = Arc::new(MemoryStore::new().without_timestamps());
        let remote = MockRemote::accepting();
        let coordinator = coordinator(&store, &remote);

        let err = coordinator
            .enable(config(StrategyKind::Immediate))
            .await
            .unwrap_err();
        assert!(err.is_config());
        assert!(!coordinator.is_active());
    }

    #[tokio::test]
    async fn test_enable_runs_initial_pass_once() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, &[pending_record("a")]).await;
        let remote = MockRemote::accepting();
        let coordinator = coordinator(&store, &remote);

        coordinator.enable(config(StrategyKind::Immediate)).await.unwrap();
        assert_eq!(remote.calls(), 1);

        // Second enable is a no-op: no extra pass.
        seed(&store, &[pending_record("b")]).await;
        coordinator.enable(config(StrategyKind::Immediate)).await.unwrap();
        assert_eq!(remote.calls(), 1);
        assert!(coordinator.is_active());
    }

    #[tokio::test]
    async fn test_batch_rejects_zero_interval() {
        let store = Arc::new(MemoryStore::new());
        let remote = MockRemote::accepting();
        let coordinator = coordinator(&store, &remote);

        let err = coordinator
            .enable(config(StrategyKind::Batch).with_sync_interval(Duration::ZERO))
            .await
            .unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn test_disable_then_sync_fails() {
        let store = Arc::new(MemoryStore::new());
        let remote = MockRemote::accepting();
        let coordinator = coordinator(&store, &remote);

        coordinator.enable(config(StrategyKind::Immediate)).await.unwrap();
        coordinator.disable();

        assert!(!coordinator.is_active());
        assert!(matches!(coordinator.sync().await, Err(Error::NotEnabled)));
    }

    #[tokio::test]
    async fn test_reenable_resets_status() {
        let store = Arc::new(MemoryStore::new());
        let remote = MockRemote::new(|_, _| Err(TransportError::Status(500)));
        let coordinator = coordinator(&store, &remote);

        coordinator.enable(config(StrategyKind::Immediate)).await.unwrap();
        seed(&store, &[pending_record("a")]).await;
        coordinator.sync().await.unwrap();
        assert_eq!(coordinator.get_status().failed, 1);

        coordinator.disable();
        store.remove(KEY).await.unwrap();
        coordinator.enable(config(StrategyKind::Immediate)).await.unwrap();
        assert_eq!(coordinator.get_status().failed, 0);
    }
}

#[cfg(test)]
mod delivery_tests {
    use super::*;

    #[tokio::test]
    async fn test_server_error_counts_as_failure() {
        let store = Arc::new(MemoryStore::new());
        let remote = MockRemote::new(|_, _| Err(TransportError::Status(500)));
        let coordinator = coordinator(&store, &remote);
        coordinator.enable(config(StrategyKind::Immediate)).await.unwrap();

        seed(&store, &[pending_record("a")]).await;
        let result = coordinator.sync().await.unwrap();

        assert_eq!(
            result,
            SyncResult {
                success: 0,
                failed: 1,
                conflicts: 0
            }
        );
        let status = coordinator.get_status();
        assert_eq!(status.failed, 1);
        assert_eq!(status.pending, 1);
        assert!(!status.is_syncing);
        // Item failures never reach the error log.
        assert!(status.errors.is_empty());
        assert!(stored(&store).await[0].needs_sync);
    }

    #[tokio::test]
    async fn test_success_clears_flag_and_is_not_redelivered() {
        let store = Arc::new(MemoryStore::new());
        let remote = MockRemote::accepting();
        let coordinator = coordinator(&store, &remote);
        coordinator.enable(config(StrategyKind::Immediate)).await.unwrap();

        seed(&store, &[pending_record("a"), pending_record("b")]).await;
        let first = coordinator.sync().await.unwrap();
        assert_eq!(first.success, 2);
        assert!(stored(&store).await.iter().all(|r| !r.needs_sync));

        let second = coordinator.sync().await.unwrap();
        assert_eq!(second, SyncResult::default());
        assert_eq!(remote.calls(), 2);

        let status = coordinator.get_status();
        assert_eq!(status.synced, 2);
        assert_eq!(status.pending, 0);
        assert!(status.last_sync.is_some());
    }

    #[tokio::test]
    async fn test_batch_chunks_seven_items_into_three_calls() {
        let store = Arc::new(MemoryStore::new());
        let remote = MockRemote::accepting();
        let coordinator = coordinator(&store, &remote);
        coordinator
            .enable(config(StrategyKind::Batch).with_batch_size(3))
            .await
            .unwrap();

        let records: Vec<_> = (0..7).map(|i| pending_record(&format!("r{i}"))).collect();
        seed(&store, &records).await;
        let result = coordinator.sync().await.unwrap();

        assert_eq!(remote.calls(), 3);
        assert_eq!(*remote.batch_sizes.lock().unwrap(), vec![3, 3, 1]);
        assert_eq!(result.success, 7);
    }

    #[tokio::test]
    async fn test_queued_delivers_each_record_individually() {
        let store = Arc::new(MemoryStore::new());
        let remote = MockRemote::accepting();
        let coordinator = coordinator(&store, &remote);
        coordinator
            .enable(config(StrategyKind::Queued).with_batch_size(2))
            .await
            .unwrap();

        let records: Vec<_> = (0..5).map(|i| pending_record(&format!("r{i}"))).collect();
        seed(&store, &records).await;
        let result = coordinator.sync().await.unwrap();

        assert_eq!(remote.calls(), 5);
        assert!(remote.batch_sizes.lock().unwrap().is_empty());
        assert_eq!(result.success, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_retries_until_success() {
        let store = Arc::new(MemoryStore::new());
        // Fails twice, then accepts.
        let remote = MockRemote::new(|_, call| {
            if call < 2 {
                Err(TransportError::Network("connection reset".into()))
            } else {
                Ok(DeliveryResponse::Accepted { item: None })
            }
        });
        let coordinator = coordinator(&store, &remote);
        coordinator
            .enable(config(StrategyKind::Queued).with_max_retries(3))
            .await
            .unwrap();

        seed(&store, &[pending_record("a")]).await;
        let result = coordinator.sync().await.unwrap();

        assert_eq!(remote.calls(), 3);
        assert_eq!(result.success, 1);
        assert_eq!(result.failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_gives_up_after_max_retries() {
        let store = Arc::new(MemoryStore::new());
        let remote = MockRemote::new(|_, _| Err(TransportError::Status(503)));
        let coordinator = coordinator(&store, &remote);
        coordinator
            .enable(config(StrategyKind::Queued).with_max_retries(3))
            .await
            .unwrap();

        seed(&store, &[pending_record("a")]).await;
        let result = coordinator.sync().await.unwrap();

        assert_eq!(remote.calls(), 3);
        assert_eq!(result.failed, 1);
        assert!(stored(&store).await[0].needs_sync);
    }

    #[tokio::test]
    async fn test_immediate_does_not_retry() {
        let store = Arc::new(MemoryStore::new());
        let remote = MockRemote::new(|_, _| Err(TransportError::Status(500)));
        let coordinator = coordinator(&store, &remote);
        coordinator
            .enable(config(StrategyKind::Immediate).with_max_retries(5))
            .await
            .unwrap();

        seed(&store, &[pending_record("a")]).await;
        coordinator.sync().await.unwrap();

        assert_eq!(remote.calls(), 1);
    }
    #[tokio::test]
    async fn test_batch_transport_failure_fails_whole_chunk() {
        let store = Arc::new(MemoryStore::new());
        let remote = MockRemote::batching(|_| Err(TransportError::Status(503)));
        let coordinator = coordinator(&store, &remote);
        coordinator.enable(config(StrategyKind::Batch)).await.unwrap();

        seed(&store, &[pending_record("a"), pending_record("b")]).await;
        let result = coordinator.sync().await.unwrap();

        assert_eq!(
            result,
            SyncResult {
                success: 0,
                failed: 2,
                conflicts: 0
            }
        );
        let status = coordinator.get_status();
        assert_eq!(status.failed, 2);
        assert_eq!(status.pending, 2);
        assert!(stored(&store).await.iter().all(|r| r.needs_sync));
    }

    #[tokio::test]
    async fn test_batch_rejected_and_missing_items_stay_pending() {
        let store = Arc::new(MemoryStore::new());
        // Accepts "a", rejects "b", never mentions "c".
        let remote = MockRemote::batching(|records| {
            Ok(BatchResponse {
                results: records
                    .iter()
                    .filter(|record| record.id != "c")
                    .map(|record| item_result(record, record.id == "a"))
                    .collect(),
            })
        });
        let coordinator = coordinator(&store, &remote);
        coordinator.enable(config(StrategyKind::Batch)).await.unwrap();

        seed(&store, &[pending_record("a"), pending_record("b"), pending_record("c")]).await;
        let result = coordinator.sync().await.unwrap();

        assert_eq!(result.success, 1);
        assert_eq!(result.failed, 2);
        assert_eq!(coordinator.get_status().pending, 2);

        let pending: Vec<_> = stored(&store)
            .await
            .into_iter()
            .filter(|r| r.needs_sync)
            .map(|r| r.id)
            .collect();
        assert_eq!(pending, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_numeric_ids_keep_their_type() {
        let store = Arc::new(MemoryStore::new());
        let mut first = pending_record("1").to_value();
        first["id"] = json!(1);
        let untouched = json!({"id": 2, "title": "never pending"});
        let raw = json!({"items": [first, untouched.clone()], "version": 1});
        store.save(KEY, &raw.to_string()).await.unwrap();

        let remote = MockRemote::accepting();
        let coordinator = coordinator(&store, &remote);
        coordinator.enable(config(StrategyKind::Immediate)).await.unwrap();
        assert_eq!(remote.calls(), 1);

        let after: Value =
            serde_json::from_str(&store.retrieve(KEY).await.unwrap().unwrap()).unwrap();
        assert_eq!(after["items"][0]["id"], json!(1));
        assert!(after["items"][0].get("_needsSync").is_none());
        assert_eq!(after["items"][1], untouched);
    }
}

#[cfg(test)]
mod conflict_tests {
    use super::*;

    #[tokio::test]
    async fn test_conflict_is_resolved_and_persisted() {
        let store = Arc::new(MemoryStore::new());
        let remote = MockRemote::new(|record, _| {
            let mut theirs = record.clone();
            theirs.needs_sync = false;
            theirs.touch(at(100));
            theirs.fields.insert("title".into(), json!("edited elsewhere"));
            Ok(DeliveryResponse::Returned(theirs))
        });
        let coordinator = coordinator(&store, &remote);
        coordinator
            .enable(config(StrategyKind::Immediate).with_conflict_resolution(PolicyName::LastWriteWins))
            .await
            .unwrap();

        seed(&store, &[pending_record("a")]).await;
        let result = coordinator.sync().await.unwrap();

        assert_eq!(result.conflicts, 1);
        assert_eq!(result.success, 0);
        let record = &stored(&store).await[0];
        assert_eq!(record.fields["title"], json!("edited elsewhere"));
        assert!(!record.needs_sync);
        assert_eq!(coordinator.get_status().synced, 1);
    }

    #[tokio::test]
    async fn test_matching_echo_is_plain_success() {
        let store = Arc::new(MemoryStore::new());
        let remote = MockRemote::new(|record, _| {
            Ok(DeliveryResponse::Accepted {
                item: Some(record.clone()),
            })
        });
        let coordinator = coordinator(&store, &remote);
        coordinator.enable(config(StrategyKind::Immediate)).await.unwrap();

        seed(&store, &[pending_record("a")]).await;
        let result = coordinator.sync().await.unwrap();

        assert_eq!(result.success, 1);
        assert_eq!(result.conflicts, 0);
    }

    #[tokio::test]
    async fn test_first_write_wins_keeps_local() {
        let store = Arc::new(MemoryStore::new());
        let remote = MockRemote::new(|record, _| {
            let mut theirs = record.clone();
            theirs.touch(at(100));
            theirs.fields.insert("title".into(), json!("theirs"));
            Ok(DeliveryResponse::Returned(theirs))
        });
        let coordinator = coordinator(&store, &remote);
        coordinator
            .enable(config(StrategyKind::Immediate).with_conflict_resolution(PolicyName::FirstWriteWins))
            .await
            .unwrap();

        seed(&store, &[pending_record("a")]).await;
        coordinator.sync().await.unwrap();

        let record = &stored(&store).await[0];
        assert_eq!(record.fields["title"], json!("todo a"));
        assert!(!record.needs_sync);
    }

    #[tokio::test]
    async fn test_conflict_keeps_numeric_id() {
        let store = Arc::new(MemoryStore::new());
        let mut item = pending_record("7").to_value();
        item["id"] = json!(7);
        store
            .save(KEY, &json!({"items": [item], "version": 1}).to_string())
            .await
            .unwrap();

        let remote = MockRemote::new(|record, _| {
            let mut theirs = record.clone();
            theirs.touch(at(100));
            Ok(DeliveryResponse::Returned(theirs))
        });
        let coordinator = coordinator(&store, &remote);
        coordinator
            .enable(config(StrategyKind::Immediate).with_conflict_resolution(PolicyName::ServerWins))
            .await
            .unwrap();

        let after: Value =
            serde_json::from_str(&store.retrieve(KEY).await.unwrap().unwrap()).unwrap();
        assert_eq!(after["items"][0]["id"], json!(7));
        assert!(after["items"][0].get("_needsSync").is_none());
    }

    #[tokio::test]
    async fn test_server_wins_never_lowers_version() {
        let store = Arc::new(MemoryStore::new());
        let remote = MockRemote::new(|record, _| {
            // An older server copy: version 1 with a different timestamp.
            let mut theirs = record.clone();
            theirs.metadata = Some(RecordMetadata::new(at(50)));
            theirs.fields.insert("title".into(), json!("server copy"));
            Ok(DeliveryResponse::Returned(theirs))
        });
        let coordinator = coordinator(&store, &remote);
        coordinator
            .enable(config(StrategyKind::Immediate).with_conflict_resolution(PolicyName::ServerWins))
            .await
            .unwrap();

        let local = pending_record("a");
        seed(&store, &[local.clone()]).await;
        let result = coordinator.sync().await.unwrap();

        assert_eq!(result.conflicts, 1);
        let record = &stored(&store).await[0];
        assert_eq!(record.fields["title"], json!("server copy"));
        assert_eq!(record.version(), local.version());
    }

    #[tokio::test]
    async fn test_panicking_resolver_fails_item_and_clears_syncing() {
        let store = Arc::new(MemoryStore::new());
        let remote = MockRemote::new(|record, _| {
            let mut theirs = record.clone();
            theirs.touch(at(100));
            Ok(DeliveryResponse::Returned(theirs))
        });
        let coordinator = coordinator(&store, &remote);
        coordinator
            .enable(
                config(StrategyKind::Immediate)
                    .with_conflict_resolution(ConflictPolicy::custom(|_, _| panic!("resolver bug"))),
            )
            .await
            .unwrap();

        seed(&store, &[pending_record("a")]).await;
        let result = coordinator.sync().await.unwrap();

        assert_eq!(
            result,
            SyncResult {
                success: 0,
                failed: 1,
                conflicts: 0
            }
        );
        assert!(!coordinator.get_status().is_syncing);
        assert!(stored(&store).await[0].needs_sync);
    }
}

#[cfg(test)]
mod callback_tests {
    use super::*;

    #[tokio::test]
    async fn test_lifecycle_callbacks_fire_in_order() {
        let store = Arc::new(MemoryStore::new());
        let remote = MockRemote::accepting();
        let coordinator = coordinator(&store, &remote);

        let events = Arc::new(Mutex::new(Vec::<String>::new()));
        let on_start = events.clone();
        let on_complete = events.clone();
        let cfg = config(StrategyKind::Immediate)
            .on_sync_start(move || on_start.lock().unwrap().push("start".into()))
            .on_sync_complete(move |result| {
                on_complete
                    .lock()
                    .unwrap()
                    .push(format!("complete:{}", result.success))
            });
        coordinator.enable(cfg).await.unwrap();

        seed(&store, &[pending_record("a")]).await;
        coordinator.sync().await.unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec!["start", "complete:0", "start", "complete:1"]
        );
    }

    #[tokio::test]
    async fn test_panicking_callback_is_contained() {
        let store = Arc::new(MemoryStore::new());
        let remote = MockRemote::accepting();
        let coordinator = coordinator(&store, &remote);
        coordinator
            .enable(config(StrategyKind::Immediate).on_sync_complete(|_| panic!("listener bug")))
            .await
            .unwrap();

        seed(&store, &[pending_record("a")]).await;
        let result = coordinator.sync().await.unwrap();

        assert_eq!(result.success, 1);
        assert!(!coordinator.get_status().is_syncing);
    }

    #[tokio::test]
    async fn test_strategy_failure_goes_to_error_log() {
        let store = Arc::new(MemoryStore::new());
        let remote = MockRemote::accepting();
        let coordinator = coordinator(&store, &remote);

        let errors = Arc::new(AtomicUsize::new(0));
        let seen = errors.clone();
        coordinator
            .enable(config(StrategyKind::Immediate).on_sync_error(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }))
            .await
            .unwrap();

        store.save(KEY, "{ not json").await.unwrap();
        let result = coordinator.sync().await.unwrap();

        assert_eq!(result, SyncResult::default());
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        let status = coordinator.get_status();
        assert_eq!(status.errors.len(), 1);
        assert!(!status.is_syncing);
    }

    #[tokio::test]
    async fn test_error_log_is_bounded() {
        let store = Arc::new(MemoryStore::new());
        let remote = MockRemote::accepting();
        let coordinator = coordinator(&store, &remote);
        coordinator.enable(config(StrategyKind::Immediate)).await.unwrap();

        store.save(KEY, "42").await.unwrap();
        for _ in 0..12 {
            coordinator.sync().await.unwrap();
        }

        assert_eq!(
            coordinator.get_status().errors.len(),
            ferry_client::status::ERROR_LOG_CAPACITY
        );
    }

    #[tokio::test]
    async fn test_panicking_remote_does_not_leave_pass_running() {
        let store = Arc::new(MemoryStore::new());
        let remote = MockRemote::new(|_, _| panic!("transport bug"));
        let coordinator = Arc::new(coordinator(&store, &remote));
        coordinator.enable(config(StrategyKind::Immediate)).await.unwrap();

        seed(&store, &[pending_record("a")]).await;
        let pass = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.sync().await }
        });

        assert!(pass.await.unwrap_err().is_panic());
        assert!(!coordinator.get_status().is_syncing);
        assert!(coordinator.is_active());
    }
}

#[cfg(test)]
mod trigger_tests {
    use super::*;

    #[tokio::test]
    async fn test_local_change_triggers_immediate_pass() {
        let store = Arc::new(MemoryStore::new());
        let remote = MockRemote::accepting();
        let coordinator = coordinator(&store, &remote);
        coordinator.enable(config(StrategyKind::Immediate)).await.unwrap();

        seed(&store, &[pending_record("a")]).await;
        coordinator.on_local_change();

        wait_for(|| remote.calls() == 1).await;
    }

    #[tokio::test]
    async fn test_local_change_does_not_trigger_batch() {
        let store = Arc::new(MemoryStore::new());
        let remote = MockRemote::accepting();
        let coordinator = coordinator(&store, &remote);
        coordinator.enable(config(StrategyKind::Batch)).await.unwrap();

        seed(&store, &[pending_record("a")]).await;
        coordinator.on_local_change();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(remote.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_interval_trigger() {
        let store = Arc::new(MemoryStore::new());
        let remote = MockRemote::accepting();
        let coordinator = coordinator(&store, &remote);
        coordinator
            .enable(config(StrategyKind::Batch).with_sync_interval(Duration::from_secs(30)))
            .await
            .unwrap();

        seed(&store, &[pending_record("a")]).await;
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert_eq!(remote.calls(), 1);
        assert_eq!(coordinator.get_status().synced, 1);
    }

    #[tokio::test]
    async fn test_reconnect_triggers_pass() {
        let (online_tx, online_rx) = watch::channel(false);
        let store = Arc::new(MemoryStore::new());
        let remote = MockRemote::accepting();
        let coordinator = coordinator(&store, &remote).with_connectivity(online_rx);
        coordinator.enable(config(StrategyKind::Immediate)).await.unwrap();

        seed(&store, &[pending_record("a")]).await;
        online_tx.send(true).unwrap();

        wait_for(|| remote.calls() == 1).await;
    }

    #[tokio::test]
    async fn test_disable_discards_in_flight_outcome() {
        let gate = Arc::new(Semaphore::new(0));
        let store = Arc::new(MemoryStore::new());
        let remote = MockRemote::gated(gate.clone());
        let coordinator = Arc::new(coordinator(&store, &remote));
        coordinator.enable(config(StrategyKind::Immediate)).await.unwrap();

        seed(&store, &[pending_record("a")]).await;
        let pass = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.sync().await }
        });

        wait_for(|| remote.calls() == 1).await;
        coordinator.disable();
        gate.add_permits(1);
        pass.await.unwrap().unwrap();

        // The delivery succeeded remotely, but nothing was committed locally.
        assert!(stored(&store).await[0].needs_sync);
    }

    #[tokio::test]
    async fn test_concurrent_syncs_do_not_interleave() {
        let store = Arc::new(MemoryStore::new());
        let remote = MockRemote::accepting();
        let coordinator = Arc::new(coordinator(&store, &remote));
        coordinator.enable(config(StrategyKind::Immediate)).await.unwrap();

        seed(&store, &[pending_record("a"), pending_record("b")]).await;
        let (first, second) = tokio::join!(coordinator.sync(), coordinator.sync());
        let (first, second) = (first.unwrap(), second.unwrap());

        // The second pass queues behind the first and finds nothing pending.
        assert_eq!(first.success + second.success, 2);
        assert_eq!(remote.calls(), 2);
    }
}
