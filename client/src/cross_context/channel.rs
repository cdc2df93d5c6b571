//! Notification channels between sibling contexts.
//!
//! Two transports share one [`NotificationChannel`] contract:
//!
//! - [`BroadcastHub`]: named broadcast channels. Every subscriber of a name
//!   receives every message, including the publisher's own.
//! - [`StorageEventBus`]: storage-mutation events. Publishing writes the
//!   message to the local store and notifies every *other* context.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;

use super::protocol::ChangeNotification;
use crate::error::Result;
use crate::store::{LocalStore, StorageKind};

/// Buffered messages per channel before slow subscribers start lagging.
const CHANNEL_CAPACITY: usize = 256;

/// Publish/subscribe capability used by the cross-context coordinator.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn publish(&self, notification: &ChangeNotification) -> Result<()>;

    /// Stream of notifications. Ends once the channel is closed.
    fn subscribe(&self) -> BoxStream<'static, ChangeNotification>;

    /// Release the channel; later publishes are dropped.
    fn close(&self);
}

/// Turn a broadcast receiver into a stream, skipping over lag gaps.
fn receiver_stream<T: Clone + Send + 'static>(rx: broadcast::Receiver<T>) -> BoxStream<'static, T> {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(value) => return Some((value, rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Notification subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}

// ---------------------------------------------------------------------------
// Broadcast
// ---------------------------------------------------------------------------

/// Registry of named broadcast channels shared by every context in a process.
#[derive(Debug, Clone, Default)]
pub struct BroadcastHub {
    channels: Arc<DashMap<String, broadcast::Sender<ChangeNotification>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the channel called `name`, creating it on first use.
    pub fn open(&self, name: &str) -> BroadcastChannel {
        let sender = self
            .channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone();

        BroadcastChannel {
            name: name.to_string(),
            sender,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Number of channels that have been opened.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

/// One context's handle on a named broadcast channel.
#[derive(Debug)]
pub struct BroadcastChannel {
    name: String,
    sender: broadcast::Sender<ChangeNotification>,
    closed: Arc<AtomicBool>,
}

impl BroadcastChannel {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl NotificationChannel for BroadcastChannel {
    async fn publish(&self, notification: &ChangeNotification) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        // No receivers is not an error; nobody else is listening yet.
        let recipients = self.sender.send(notification.clone()).unwrap_or(0);
        tracing::debug!(channel = %self.name, recipients, "Published change notification");
        Ok(())
    }

    fn subscribe(&self) -> BoxStream<'static, ChangeNotification> {
        let closed = Arc::clone(&self.closed);
        receiver_stream(self.sender.subscribe())
            .take_while(move |_| futures::future::ready(!closed.load(Ordering::SeqCst)))
            .boxed()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Storage events
// ---------------------------------------------------------------------------

/// A write to a shared storage key, as observed by other contexts.
#[derive(Debug, Clone)]
pub struct StorageEvent {
    pub key: String,
    pub new_value: Option<String>,
    /// Context that performed the write
    pub source: String,
}

/// Process-wide bus of storage-mutation events.
#[derive(Debug, Clone)]
pub struct StorageEventBus {
    sender: broadcast::Sender<StorageEvent>,
}

impl Default for StorageEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEventBus {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Open a channel for `storage_key` backed by `store`.
    ///
    /// Each channel is its own context: it never observes its own writes.
    pub fn open(&self, storage_key: &str, store: Arc<dyn LocalStore>) -> StorageEventChannel {
        StorageEventChannel {
            sync_key: format!("{storage_key}__sync"),
            context_id: uuid::Uuid::new_v4().to_string(),
            store,
            sender: self.sender.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Notification channel carried over storage writes to `"<key>__sync"`.
pub struct StorageEventChannel {
    sync_key: String,
    context_id: String,
    store: Arc<dyn LocalStore>,
    sender: broadcast::Sender<StorageEvent>,
    closed: Arc<AtomicBool>,
}

impl StorageEventChannel {
    /// Storage key the notifications are written under.
    pub fn sync_key(&self) -> &str {
        &self.sync_key
    }
}

#[async_trait]
impl NotificationChannel for StorageEventChannel {
    async fn publish(&self, notification: &ChangeNotification) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }

        let json = serde_json::to_string(notification)?;
        self.store.save(&self.sync_key, &json).await?;

        let _ = self.sender.send(StorageEvent {
            key: self.sync_key.clone(),
            new_value: Some(json),
            source: self.context_id.clone(),
        });
        Ok(())
    }

    fn subscribe(&self) -> BoxStream<'static, ChangeNotification> {
        let sync_key = self.sync_key.clone();
        let context_id = self.context_id.clone();
        let closed = Arc::clone(&self.closed);

        receiver_stream(self.sender.subscribe())
            .take_while(move |_| futures::future::ready(!closed.load(Ordering::SeqCst)))
            .filter_map(move |event| {
                let parsed = if event.key != sync_key || event.source == context_id {
                    None
                } else {
                    event.new_value.as_deref().and_then(|raw| {
                        serde_json::from_str::<ChangeNotification>(raw)
                            .map_err(|e| tracing::warn!(error = %e, "Malformed change notification"))
                            .ok()
                    })
                };
                futures::future::ready(parsed)
            })
            .boxed()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Notification primitives the current platform provides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub broadcast: bool,
    pub storage_events: bool,
}

/// Transport chosen for cross-context sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMethod {
    Broadcast,
    StorageEvent,
    None,
}

impl SyncMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMethod::Broadcast => "broadcast",
            SyncMethod::StorageEvent => "storage-event",
            SyncMethod::None => "none",
        }
    }
}

impl std::fmt::Display for SyncMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the best transport for a store of `kind`.
///
/// Broadcast works for any store. Storage events only exist for stores that
/// emit them.
pub fn select_method(capabilities: Capabilities, kind: StorageKind) -> SyncMethod {
    if capabilities.broadcast {
        SyncMethod::Broadcast
    } else if capabilities.storage_events && kind.emits_storage_events() {
        SyncMethod::StorageEvent
    } else {
        SyncMethod::None
    }
}

/// The primitives available to a context.
#[derive(Debug, Clone, Default)]
pub struct Platform {
    pub broadcast: Option<BroadcastHub>,
    pub storage_events: Option<StorageEventBus>,
}

impl Platform {
    /// A platform with no notification primitives at all.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_broadcast(mut self, hub: BroadcastHub) -> Self {
        self.broadcast = Some(hub);
        self
    }

    pub fn with_storage_events(mut self, bus: StorageEventBus) -> Self {
        self.storage_events = Some(bus);
        self
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            broadcast: self.broadcast.is_some(),
            storage_events: self.storage_events.is_some(),
        }
    }
}
