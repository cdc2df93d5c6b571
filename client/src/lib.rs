//! # Ferry Client
//!
//! Offline-first record synchronization for a single process.
//!
//! - [`SyncCoordinator`] pushes locally modified records to a remote endpoint
//!   using one of three [`StrategyKind`]s and resolves conflicts with the
//!   configured policy.
//! - [`cross_context::CrossContextCoordinator`] tells sibling contexts sharing
//!   a storage key about local mutations.
//! - [`load_record_set`] runs schema migrations before application code sees
//!   the data.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ferry_client::{MemoryStore, StrategyKind, SyncConfig, SyncCoordinator};
//!
//! # async fn run() -> ferry_client::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let coordinator = SyncCoordinator::new(store, "todos");
//!
//! coordinator
//!     .enable(SyncConfig::new("https://api.example.com/sync").with_strategy(StrategyKind::Queued))
//!     .await?;
//!
//! let result = coordinator.sync().await?;
//! println!("{} synced, {} failed", result.success, result.failed);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod cross_context;
pub mod error;
pub mod remote;
pub mod status;
pub mod store;
pub mod strategy;

pub use config::{AgentConfig, ConfigError, StrategyKind, SyncConfig};
pub use coordinator::SyncCoordinator;
pub use error::{Error, Result};
pub use remote::{HttpRemote, RemoteEndpoint, TransportError};
pub use status::{SyncErrorEntry, SyncResult, SyncStatus};
pub use store::{load_record_set, FileStore, LocalStore, MemoryStore, StorageKind, StoreError};
pub use strategy::SyncStrategy;
