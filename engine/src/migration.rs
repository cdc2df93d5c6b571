//! Schema migration: walks a record set forward through registered transforms.
//!
//! # Algorithm
//!
//! 1. Determine the set's current version (unversioned data is version 1)
//! 2. Same version as the target: return it unchanged
//! 3. Newer than the target: refuse (no downgrades)
//! 4. Check that a transform exists for every step up to the target
//! 5. Apply each transform in order, feeding it the previous step's items
//! 6. Append a single history entry covering the whole call
//!
//! The engine never touches storage. A failed migration returns an error and
//! the caller keeps whatever it had persisted before.

use crate::{error::Result, Error, MigrationRecord, SchemaVersion, VersionedRecordSet};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

/// Error type transforms may return.
pub type TransformError = Box<dyn std::error::Error + Send + Sync>;

/// What a transform produces: the next step's items (must be a JSON array).
pub type TransformResult = std::result::Result<Value, TransformError>;

/// Boxed future returned by async transforms.
pub type TransformFuture = Pin<Box<dyn Future<Output = TransformResult> + Send>>;

type SyncTransform = Box<dyn Fn(Vec<Value>) -> TransformResult + Send + Sync>;
type AsyncTransform = Box<dyn Fn(Vec<Value>) -> TransformFuture + Send + Sync>;

enum Transform {
    Sync(SyncTransform),
    Async(AsyncTransform),
}

impl Transform {
    async fn run(&self, items: Vec<Value>) -> TransformResult {
        match self {
            Transform::Sync(f) => f(items),
            Transform::Async(f) => f(items).await,
        }
    }
}

/// Upgrades record sets to a fixed target version.
pub struct MigrationEngine {
    target: SchemaVersion,
    /// Transform registered for version `v` migrates from `v - 1` to `v`
    transforms: BTreeMap<SchemaVersion, Transform>,
}

impl MigrationEngine {
    /// Create an engine targeting `target`. Versions start at 1.
    pub fn new(target: SchemaVersion) -> Result<Self> {
        if target < 1 {
            return Err(Error::InvalidTargetVersion(target));
        }
        Ok(Self {
            target,
            transforms: BTreeMap::new(),
        })
    }

    /// The version every migrated set ends up at.
    pub fn target_version(&self) -> SchemaVersion {
        self.target
    }

    /// Register a synchronous transform producing version `version`.
    pub fn register<F>(&mut self, version: SchemaVersion, f: F) -> Result<()>
    where
        F: Fn(Vec<Value>) -> TransformResult + Send + Sync + 'static,
    {
        Self::check_step(version)?;
        self.transforms.insert(version, Transform::Sync(Box::new(f)));
        Ok(())
    }

    /// Register a transform that suspends before producing version `version`.
    pub fn register_async<F, Fut>(&mut self, version: SchemaVersion, f: F) -> Result<()>
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TransformResult> + Send + 'static,
    {
        Self::check_step(version)?;
        let boxed: AsyncTransform = Box::new(move |items| Box::pin(f(items)));
        self.transforms.insert(version, Transform::Async(boxed));
        Ok(())
    }

    fn check_step(version: SchemaVersion) -> Result<()> {
        if version < 2 {
            return Err(Error::InvalidMigrationVersion(version));
        }
        Ok(())
    }

    /// Version of stored data. Anything without a version marker is version 1.
    pub fn get_data_version(data: &Value) -> SchemaVersion {
        data.get("version")
            .and_then(Value::as_u64)
            .and_then(|v| SchemaVersion::try_from(v).ok())
            .map_or(1, |v| v.max(1))
    }

    /// Whether `data` is behind the target version.
    pub fn needs_migration(&self, data: &Value) -> bool {
        Self::get_data_version(data) < self.target
    }

    /// Bring `data` up to the target version.
    pub async fn migrate(&self, data: Value) -> Result<VersionedRecordSet> {
        let from = Self::get_data_version(&data);
        let mut set = VersionedRecordSet::from_value(data)?;
        set.version = from;

        if from == self.target {
            return Ok(set);
        }
        if from > self.target {
            return Err(Error::Downgrade {
                from,
                to: self.target,
            });
        }

        // A gap anywhere in the path is fatal, so check before running anything.
        if let Some(missing) =
            (from + 1..=self.target).find(|v| !self.transforms.contains_key(v))
        {
            return Err(Error::MissingMigration(missing));
        }

        let started = Instant::now();
        let mut items = std::mem::take(&mut set.items);

        for version in from + 1..=self.target {
            let transform = self
                .transforms
                .get(&version)
                .ok_or(Error::MissingMigration(version))?;

            let output = transform
                .run(items)
                .await
                .map_err(|e| Error::MigrationFailed {
                    version,
                    reason: e.to_string(),
                })?;

            items = match output {
                Value::Array(next) => next,
                _ => return Err(Error::NotASequence(version)),
            };
        }

        set.items = items;
        set.version = self.target;
        set.migration_history.push(MigrationRecord {
            from_version: from,
            to_version: self.target,
            timestamp: Utc::now(),
            item_count: set.items.len(),
            duration: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        });

        Ok(set)
    }
}

impl std::fmt::Debug for MigrationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationEngine")
            .field("target", &self.target)
            .field("steps", &self.transforms.keys().collect::<Vec<_>>())
            .finish()
    }
}
