use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ferry_engine::Record;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::channel::{select_method, NotificationChannel, Platform, SyncMethod};
use super::protocol::{ChangeKind, ChangeNotification};
use crate::error::Result;
use crate::store::LocalStore;

pub type UpdateCallback = Arc<dyn Fn(&[Record]) + Send + Sync>;
pub type RemoveCallback = Arc<dyn Fn() + Send + Sync>;
pub type ClearCallback = Arc<dyn Fn() + Send + Sync>;

/// Callbacks applying a sibling context's mutations locally.
#[derive(Clone, Default)]
pub struct CrossContextHandlers {
    on_update: Option<UpdateCallback>,
    on_remove: Option<RemoveCallback>,
    on_clear: Option<ClearCallback>,
}

impl CrossContextHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_update(mut self, f: impl Fn(&[Record]) + Send + Sync + 'static) -> Self {
        self.on_update = Some(Arc::new(f));
        self
    }

    pub fn on_remove(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_remove = Some(Arc::new(f));
        self
    }

    pub fn on_clear(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_clear = Some(Arc::new(f));
        self
    }

    fn dispatch(&self, notification: &ChangeNotification) {
        let outcome = match notification.kind {
            ChangeKind::Update => self.on_update.as_ref().map(|f| {
                let items = notification.items.as_deref().unwrap_or_default();
                catch_unwind(AssertUnwindSafe(|| f(items)))
            }),
            ChangeKind::Remove => self
                .on_remove
                .as_ref()
                .map(|f| catch_unwind(AssertUnwindSafe(|| f()))),
            ChangeKind::Clear => self
                .on_clear
                .as_ref()
                .map(|f| catch_unwind(AssertUnwindSafe(|| f()))),
        };

        if let Some(Err(_)) = outcome {
            tracing::warn!(
                kind = ?notification.kind,
                origin_id = %notification.origin_id,
                "Cross-context callback panicked"
            );
        }
    }
}

impl std::fmt::Debug for CrossContextHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossContextHandlers")
            .field("on_update", &self.on_update.is_some())
            .field("on_remove", &self.on_remove.is_some())
            .field("on_clear", &self.on_clear.is_some())
            .finish()
    }
}

/// Propagates mutations of one storage key between sibling contexts.
///
/// Must be created inside a Tokio runtime: the listener runs as a task.
pub struct CrossContextCoordinator {
    storage_key: String,
    origin_id: String,
    method: SyncMethod,
    channel: Option<Arc<dyn NotificationChannel>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl CrossContextCoordinator {
    /// Choose a transport from `platform` and start listening.
    pub fn new(
        storage_key: impl Into<String>,
        store: Arc<dyn LocalStore>,
        platform: &Platform,
        handlers: CrossContextHandlers,
    ) -> Self {
        let storage_key = storage_key.into();
        let origin_id = uuid::Uuid::new_v4().to_string();
        let method = select_method(platform.capabilities(), store.kind());

        let channel: Option<Arc<dyn NotificationChannel>> = match method {
            SyncMethod::Broadcast => platform
                .broadcast
                .as_ref()
                .map(|hub| -> Arc<dyn NotificationChannel> {
                    Arc::new(hub.open(&channel_name(&storage_key)))
                }),
            SyncMethod::StorageEvent => platform
                .storage_events
                .as_ref()
                .map(|bus| -> Arc<dyn NotificationChannel> {
                    Arc::new(bus.open(&storage_key, store))
                }),
            SyncMethod::None => None,
        };

        let listener = channel
            .as_ref()
            .map(|channel| spawn_listener(channel.subscribe(), origin_id.clone(), handlers));

        tracing::debug!(
            storage_key = %storage_key,
            origin_id = %origin_id,
            method = %method,
            "Cross-context sync initialized"
        );

        Self {
            storage_key,
            origin_id,
            method,
            channel,
            listener: Mutex::new(listener),
            closed: AtomicBool::new(false),
        }
    }

    /// Announce updated records to sibling contexts.
    pub async fn broadcast_update(&self, items: &[Record]) -> Result<()> {
        self.publish(ChangeNotification::update(&self.origin_id, items.to_vec()))
            .await
    }

    pub async fn broadcast_remove(&self) -> Result<()> {
        self.publish(ChangeNotification::remove(&self.origin_id)).await
    }

    pub async fn broadcast_clear(&self) -> Result<()> {
        self.publish(ChangeNotification::clear(&self.origin_id)).await
    }

    async fn publish(&self, notification: ChangeNotification) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        match &self.channel {
            Some(channel) => channel.publish(&notification).await,
            None => Ok(()),
        }
    }

    /// Stop listening and release the channel. Later broadcasts are no-ops.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        if let Some(channel) = &self.channel {
            channel.close();
        }
        tracing::debug!(storage_key = %self.storage_key, "Cross-context sync closed");
    }

    pub fn method(&self) -> SyncMethod {
        self.method
    }

    /// Identity stamped on every notification this coordinator publishes.
    pub fn origin_id(&self) -> &str {
        &self.origin_id
    }

    /// Whether notifications are being exchanged at all.
    pub fn is_active(&self) -> bool {
        self.channel.is_some() && !self.closed.load(Ordering::SeqCst)
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }
}

impl Drop for CrossContextCoordinator {
    fn drop(&mut self) {
        self.close();
    }
}

fn channel_name(storage_key: &str) -> String {
    format!("ferry-sync:{storage_key}")
}

fn spawn_listener(
    mut incoming: futures::stream::BoxStream<'static, ChangeNotification>,
    origin_id: String,
    handlers: CrossContextHandlers,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notification) = incoming.next().await {
            if notification.origin_id == origin_id {
                continue;
            }
            tracing::trace!(
                kind = ?notification.kind,
                origin_id = %notification.origin_id,
                "Applying change notification"
            );
            handlers.dispatch(&notification);
        }
    })
}
