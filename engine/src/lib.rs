//! # Ferry Engine
//!
//! Deterministic building blocks for offline-first record synchronization.
//!
//! This crate holds the parts of Ferry that involve no IO: the record model,
//! conflict resolution and schema migration. The sync coordinator, delivery
//! strategies and cross-context notifications live in `ferry-client`.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine has no knowledge of storage, network or timers
//! - **Deterministic**: conflict resolution is a pure function of its inputs
//! - **Portable**: async migration transforms are plain boxed futures, no runtime required
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] is an application-defined JSON object plus [`RecordMetadata`]:
//! - `createdAt` (immutable after creation)
//! - `updatedAt` (bumped on every local mutation, never before `createdAt`)
//! - `version` (starts at 1, never decreases)
//!
//! Records with local changes not yet confirmed by the remote carry a
//! `needsSync` flag.
//!
//! ### Conflict Resolution
//!
//! [`ConflictResolver`] picks a winner when the remote reports a different
//! state than the one we sent:
//! - [`PolicyName::LastWriteWins`] - strictly newer remote `updatedAt` wins (default)
//! - [`PolicyName::FirstWriteWins`] - local always wins
//! - [`PolicyName::ServerWins`] - remote always wins
//! - [`ConflictPolicy::Custom`] - caller-supplied function
//!
//! ### Migration
//!
//! [`MigrationEngine`] upgrades a [`VersionedRecordSet`] step by step to a
//! target schema version.
//!
//! ## Quick Start
//!
//! ```rust
//! use ferry_engine::{ConflictResolver, PolicyName, Record};
//! use chrono::{TimeZone, Utc};
//! use serde_json::{json, Map};
//!
//! let created = Utc.timestamp_opt(1_706_745_600, 0).unwrap();
//! let mut local = Record::new("todo-1", Map::new(), created);
//! local.fields.insert("title".into(), json!("Buy milk"));
//!
//! let mut remote = local.clone();
//! remote.touch(Utc.timestamp_opt(1_706_745_700, 0).unwrap());
//! remote.fields.insert("title".into(), json!("Buy oat milk"));
//!
//! let resolver = ConflictResolver::new(PolicyName::LastWriteWins.into());
//! let winner = resolver.resolve(&local, &remote);
//! assert_eq!(winner.fields["title"], json!("Buy oat milk"));
//! ```

pub mod conflict;
pub mod error;
pub mod migration;
pub mod record;
pub mod record_set;

// Re-export main types at crate root
pub use conflict::{
    first_write_wins, get_resolver, last_write_wins, resolve, server_wins, ConflictPolicy,
    ConflictResolver, PolicyName, Resolver,
};
pub use error::Error;
pub use migration::{MigrationEngine, TransformError, TransformResult};
pub use record::{id_key, Record, RecordMetadata};
pub use record_set::{MigrationRecord, VersionedRecordSet};

/// Type aliases for clarity
pub type RecordId = String;
pub type Version = u64;
pub type Timestamp = chrono::DateTime<chrono::Utc>;
pub type SchemaVersion = u32;
