//! Sync coordinator: owns the active strategy, status and triggers.
//!
//! State machine: `Disabled -> Idle -> Syncing -> Idle`. Passes are
//! serialized; a `sync()` issued while another pass is running waits for it
//! to finish. `disable()` stops triggers immediately but does not abort
//! deliveries already on the wire; their outcomes are dropped instead.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use ferry_engine::ConflictResolver;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{StrategyKind, SyncConfig};
use crate::error::{Error, Result};
use crate::remote::{HttpRemote, RemoteEndpoint};
use crate::status::{SyncResult, SyncStatus};
use crate::store::LocalStore;
use crate::strategy::{SyncContext, SyncStrategy};

/// One enabled period, from `enable()` to `disable()`.
struct Session {
    config: Arc<SyncConfig>,
    strategy: Arc<dyn SyncStrategy>,
    remote: Arc<dyn RemoteEndpoint>,
    resolver: Arc<ConflictResolver>,
    /// Cleared on disable; in-flight passes check it before committing
    active: Arc<AtomicBool>,
    triggers: Vec<JoinHandle<()>>,
}

struct Inner {
    store: Arc<dyn LocalStore>,
    storage_key: String,
    remote_override: Option<Arc<dyn RemoteEndpoint>>,
    connectivity: Option<watch::Receiver<bool>>,
    session: Mutex<Option<Session>>,
    status: Mutex<SyncStatus>,
    pass_lock: tokio::sync::Mutex<()>,
}

/// Keeps the record set under one storage key in sync with a remote endpoint.
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

impl SyncCoordinator {
    /// Create a disabled coordinator for the record set under `storage_key`.
    pub fn new(store: Arc<dyn LocalStore>, storage_key: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                storage_key: storage_key.into(),
                remote_override: None,
                connectivity: None,
                session: Mutex::new(None),
                status: Mutex::new(SyncStatus::default()),
                pass_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Deliver through `remote` instead of an HTTP client built from the config.
    pub fn with_remote(self, remote: Arc<dyn RemoteEndpoint>) -> Self {
        self.map_inner(|inner| inner.remote_override = Some(remote))
    }

    /// Run a pass whenever the online flag flips from `false` to `true`.
    pub fn with_connectivity(self, online: watch::Receiver<bool>) -> Self {
        self.map_inner(|inner| inner.connectivity = Some(online))
    }

    fn map_inner(mut self, f: impl FnOnce(&mut Inner)) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => f(inner),
            // Only reachable while a trigger task holds a reference.
            None => tracing::warn!("Coordinator reconfigured while enabled; ignoring"),
        }
        self
    }

    /// Start synchronizing. A no-op when already enabled.
    ///
    /// Installs the reconnect trigger (and the interval trigger for the Batch
    /// strategy), then runs an initial pass.
    pub async fn enable(&self, config: SyncConfig) -> Result<()> {
        if !self.inner.store.tracks_timestamps() {
            return Err(Error::Config(
                "sync requires a store that tracks change timestamps".into(),
            ));
        }
        if self.is_active() {
            tracing::debug!("Sync already enabled");
            return Ok(());
        }
        if config.strategy == StrategyKind::Batch && config.sync_interval.is_zero() {
            return Err(Error::Config("sync interval must be greater than zero".into()));
        }

        let remote: Arc<dyn RemoteEndpoint> = match &self.inner.remote_override {
            Some(remote) => Arc::clone(remote),
            None => Arc::new(HttpRemote::from_config(&config)?),
        };
        let strategy = config.strategy.build();
        let resolver = Arc::new(ConflictResolver::new(config.conflict_resolution.clone()));
        let config = Arc::new(config);

        let mut triggers = Vec::new();
        if let Some(online) = &self.inner.connectivity {
            triggers.push(spawn_reconnect_trigger(
                Arc::downgrade(&self.inner),
                online.clone(),
            ));
        }
        if config.strategy == StrategyKind::Batch {
            triggers.push(spawn_interval_trigger(
                Arc::downgrade(&self.inner),
                config.sync_interval,
            ));
        }

        {
            let mut session = self.inner.session.lock();
            if session.is_some() {
                // Lost a race with a concurrent enable().
                triggers.iter().for_each(JoinHandle::abort);
                return Ok(());
            }
            *session = Some(Session {
                config: Arc::clone(&config),
                strategy,
                remote,
                resolver,
                active: Arc::new(AtomicBool::new(true)),
                triggers,
            });
        }
        *self.inner.status.lock() = SyncStatus::default();

        tracing::info!(
            storage_key = %self.inner.storage_key,
            endpoint = %config.endpoint,
            strategy = %config.strategy,
            "Sync enabled"
        );

        if let Err(e) = self.inner.run_pass().await {
            tracing::warn!(error = %e, "Initial sync pass did not run");
        }
        Ok(())
    }

    /// Stop synchronizing. Deliveries already in flight finish, but their
    /// outcomes are discarded.
    pub fn disable(&self) {
        let Some(session) = self.inner.session.lock().take() else {
            return;
        };
        session.active.store(false, Ordering::SeqCst);
        session.triggers.iter().for_each(JoinHandle::abort);
        self.inner.status.lock().is_syncing = false;

        tracing::info!(storage_key = %self.inner.storage_key, "Sync disabled");
    }

    /// Run one pass now. Fails only if sync is not enabled.
    pub async fn sync(&self) -> Result<SyncResult> {
        self.inner.run_pass().await
    }

    /// Signal a local mutation. Immediate and Queued sessions start a pass in
    /// the background; Batch sessions wait for their interval.
    pub fn on_local_change(&self) {
        let syncs_now = self
            .inner
            .session
            .lock()
            .as_ref()
            .is_some_and(|s| s.strategy.syncs_on_change());
        if !syncs_now {
            return;
        }

        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            if let Some(inner) = inner.upgrade() {
                if let Err(e) = inner.run_pass().await {
                    tracing::debug!(error = %e, "Change-triggered pass skipped");
                }
            }
        });
    }

    pub fn get_status(&self) -> SyncStatus {
        self.inner.status.lock().clone()
    }

    pub fn is_active(&self) -> bool {
        self.inner.session.lock().is_some()
    }

    pub fn storage_key(&self) -> &str {
        &self.inner.storage_key
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        self.disable();
    }
}

/// The parts of a session one pass needs, cloned out from under the lock.
struct PassHandles {
    config: Arc<SyncConfig>,
    strategy: Arc<dyn SyncStrategy>,
    remote: Arc<dyn RemoteEndpoint>,
    resolver: Arc<ConflictResolver>,
    active: Arc<AtomicBool>,
}

impl Inner {
    fn current_session(&self) -> Result<PassHandles> {
        let session = self.session.lock();
        let session = session.as_ref().ok_or(Error::NotEnabled)?;
        Ok(PassHandles {
            config: Arc::clone(&session.config),
            strategy: Arc::clone(&session.strategy),
            remote: Arc::clone(&session.remote),
            resolver: Arc::clone(&session.resolver),
            active: Arc::clone(&session.active),
        })
    }

    async fn run_pass(&self) -> Result<SyncResult> {
        // Fail fast before queueing behind a running pass.
        self.current_session()?;
        let _guard = self.pass_lock.lock().await;
        // Sync may have been disabled (or re-enabled) while we waited.
        let pass = self.current_session()?;

        let _syncing = SyncingFlag::raise(&self.status);
        if let Some(on_start) = &pass.config.on_sync_start {
            guarded("on_sync_start", || on_start());
        }

        let ctx = SyncContext {
            store: self.store.as_ref(),
            storage_key: &self.storage_key,
            remote: pass.remote.as_ref(),
            config: &pass.config,
            resolver: &pass.resolver,
            active: &pass.active,
        };
        let outcome = pass.strategy.execute(&ctx).await;

        if !pass.active.load(Ordering::SeqCst) {
            tracing::debug!("Pass finished after disable; outcome discarded");
            return Ok(outcome.unwrap_or_default());
        }

        match outcome {
            Ok(result) => {
                let counted = pass
                    .strategy
                    .pending_count(self.store.as_ref(), &self.storage_key)
                    .await;
                let pending = match counted {
                    Ok(pending) => pending,
                    Err(e) => {
                        tracing::warn!(error = %e, "Could not count pending records");
                        self.status.lock().pending
                    }
                };

                {
                    let mut status = self.status.lock();
                    status.record_pass(&result, pending);
                    status.is_syncing = false;
                }

                tracing::info!(
                    strategy = %pass.strategy.kind(),
                    success = result.success,
                    failed = result.failed,
                    conflicts = result.conflicts,
                    pending,
                    "Sync pass complete"
                );

                if let Some(on_complete) = &pass.config.on_sync_complete {
                    guarded("on_sync_complete", || on_complete(&result));
                }
                Ok(result)
            }
            Err(e) => {
                tracing::error!(error = %e, "Sync pass failed");
                {
                    let mut status = self.status.lock();
                    status.record_error(e.to_string());
                    status.is_syncing = false;
                }

                if let Some(on_error) = &pass.config.on_sync_error {
                    guarded("on_sync_error", || on_error(&e));
                }
                Ok(SyncResult::default())
            }
        }
    }
}

/// Clears `is_syncing` however a pass ends, including by unwinding.
struct SyncingFlag<'a>(&'a Mutex<SyncStatus>);

impl<'a> SyncingFlag<'a> {
    fn raise(status: &'a Mutex<SyncStatus>) -> Self {
        status.lock().is_syncing = true;
        Self(status)
    }
}

impl Drop for SyncingFlag<'_> {
    fn drop(&mut self) {
        self.0.lock().is_syncing = false;
    }
}

/// Run a user callback; a panic inside it is logged and swallowed.
fn guarded(name: &'static str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::warn!(callback = name, "Sync callback panicked");
    }
}

fn spawn_reconnect_trigger(inner: Weak<Inner>, mut online: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut was_online = *online.borrow_and_update();
        while online.changed().await.is_ok() {
            let is_online = *online.borrow_and_update();
            if is_online && !was_online {
                let Some(inner) = inner.upgrade() else { break };
                tracing::info!("Connectivity restored, syncing");
                if let Err(e) = inner.run_pass().await {
                    tracing::debug!(error = %e, "Reconnect pass skipped");
                }
            }
            was_online = is_online;
        }
    })
}

fn spawn_interval_trigger(inner: Weak<Inner>, period: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; enable() runs that pass itself.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else { break };
            if let Err(e) = inner.run_pass().await {
                tracing::debug!(error = %e, "Interval pass skipped");
            }
        }
    })
}
