//! Sync configuration.
//!
//! [`SyncConfig`] is built in code by applications. The `ferry-agent` binary
//! loads an [`AgentConfig`] from `FERRY_*` environment variables instead.

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use ferry_engine::{ConflictPolicy, PolicyName, SchemaVersion};

use crate::error::Error;
use crate::status::SyncResult;

/// Default number of delivery attempts per item (Queued strategy).
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default backoff base between retries.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);
/// Default chunk size for the Queued strategy.
pub const DEFAULT_QUEUED_BATCH_SIZE: usize = 10;
/// Default chunk size for the Batch strategy.
pub const DEFAULT_BATCH_SIZE: usize = 50;
/// Default period of the Batch strategy's interval trigger.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);
/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Delivery algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyKind {
    /// One call per record, sequential, no in-pass retry
    #[default]
    Immediate,
    /// One call per record, chunked, retried with backoff
    Queued,
    /// One call per chunk carrying all of its records
    Batch,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Immediate => "immediate",
            StrategyKind::Queued => "queued",
            StrategyKind::Batch => "batch",
        }
    }

    /// Chunk size used when none is configured.
    pub fn default_batch_size(&self) -> usize {
        match self {
            StrategyKind::Immediate => 1,
            StrategyKind::Queued => DEFAULT_QUEUED_BATCH_SIZE,
            StrategyKind::Batch => DEFAULT_BATCH_SIZE,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "immediate" => Ok(StrategyKind::Immediate),
            "queued" => Ok(StrategyKind::Queued),
            "batch" => Ok(StrategyKind::Batch),
            _ => Err(ConfigError::InvalidStrategy(s.to_string())),
        }
    }
}

/// Called before each sync pass.
pub type SyncStartCallback = Arc<dyn Fn() + Send + Sync>;
/// Called with the result of each completed pass.
pub type SyncCompleteCallback = Arc<dyn Fn(&SyncResult) + Send + Sync>;
/// Called when a pass fails as a whole (not for individual item failures).
pub type SyncErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

/// Configuration for [`SyncCoordinator::enable`](crate::SyncCoordinator::enable).
#[derive(Clone)]
pub struct SyncConfig {
    /// Remote address records are delivered to
    pub endpoint: String,
    pub strategy: StrategyKind,
    pub conflict_resolution: ConflictPolicy,
    pub max_retries: u32,
    /// Backoff base between retries
    pub retry_delay: Duration,
    /// Chunk size; `None` uses the strategy's default
    pub batch_size: Option<usize>,
    /// Period of the Batch strategy's interval trigger
    pub sync_interval: Duration,
    pub timeout: Duration,
    /// Extra headers sent with every delivery
    pub headers: BTreeMap<String, String>,
    pub on_sync_start: Option<SyncStartCallback>,
    pub on_sync_complete: Option<SyncCompleteCallback>,
    pub on_sync_error: Option<SyncErrorCallback>,
}

impl SyncConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            strategy: StrategyKind::default(),
            conflict_resolution: ConflictPolicy::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            batch_size: None,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            headers: BTreeMap::new(),
            on_sync_start: None,
            on_sync_complete: None,
            on_sync_error: None,
        }
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_conflict_resolution(mut self, policy: impl Into<ConflictPolicy>) -> Self {
        self.conflict_resolution = policy.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn on_sync_start(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_sync_start = Some(Arc::new(f));
        self
    }

    pub fn on_sync_complete(mut self, f: impl Fn(&SyncResult) + Send + Sync + 'static) -> Self {
        self.on_sync_complete = Some(Arc::new(f));
        self
    }

    pub fn on_sync_error(mut self, f: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_sync_error = Some(Arc::new(f));
        self
    }

    /// Chunk size in effect: configured or the strategy default, never zero.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size
            .unwrap_or_else(|| self.strategy.default_batch_size())
            .max(1)
    }
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("endpoint", &self.endpoint)
            .field("strategy", &self.strategy)
            .field("conflict_resolution", &self.conflict_resolution)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("batch_size", &self.batch_size)
            .field("sync_interval", &self.sync_interval)
            .field("timeout", &self.timeout)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Agent configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// JSON file backing the local store
    pub store_path: PathBuf,
    /// Logical storage key the record set lives under
    pub storage_key: String,
    /// Schema version records are migrated to on load
    pub schema_version: SchemaVersion,
    pub sync: SyncConfig,
}

impl AgentConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let endpoint = lookup("FERRY_ENDPOINT").ok_or(ConfigError::MissingEndpoint)?;

        let strategy = match lookup("FERRY_STRATEGY") {
            Some(s) => s.parse()?,
            None => StrategyKind::default(),
        };

        let policy = match lookup("FERRY_CONFLICT_RESOLUTION") {
            Some(s) => s
                .parse::<PolicyName>()
                .map_err(|_| ConfigError::InvalidPolicy(s))?,
            None => PolicyName::default(),
        };

        let max_retries = parse_number(&lookup, "FERRY_MAX_RETRIES")?.unwrap_or(DEFAULT_MAX_RETRIES);
        let retry_delay = parse_number(&lookup, "FERRY_RETRY_DELAY_MS")?
            .map_or(DEFAULT_RETRY_DELAY, Duration::from_millis);
        let sync_interval = parse_number(&lookup, "FERRY_SYNC_INTERVAL_MS")?
            .map_or(DEFAULT_SYNC_INTERVAL, Duration::from_millis);
        let batch_size = parse_number::<usize>(&lookup, "FERRY_BATCH_SIZE")?;
        let schema_version = parse_number(&lookup, "FERRY_SCHEMA_VERSION")?.unwrap_or(1);

        let mut sync = SyncConfig::new(endpoint)
            .with_strategy(strategy)
            .with_conflict_resolution(policy)
            .with_max_retries(max_retries)
            .with_retry_delay(retry_delay)
            .with_sync_interval(sync_interval);
        sync.batch_size = batch_size;

        if let Some(token) = lookup("FERRY_AUTH_TOKEN") {
            sync = sync.with_header("authorization", format!("Bearer {token}"));
        }

        Ok(Self {
            store_path: lookup("FERRY_STORE_PATH")
                .map_or_else(|| PathBuf::from("ferry-store.json"), PathBuf::from),
            storage_key: lookup("FERRY_STORAGE_KEY").unwrap_or_else(|| "ferry:records".to_string()),
            schema_version,
            sync,
        })
    }
}

fn parse_number<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    lookup(name)
        .map(|raw| raw.trim().parse().map_err(|_| ConfigError::InvalidNumber(name)))
        .transpose()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("FERRY_ENDPOINT environment variable is required")]
    MissingEndpoint,

    #[error("Invalid sync strategy: {0}")]
    InvalidStrategy(String),

    #[error("Invalid conflict resolution policy: {0}")]
    InvalidPolicy(String),

    #[error("Invalid {0} value")]
    InvalidNumber(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = SyncConfig::new("http://localhost/sync");
        assert_eq!(config.strategy, StrategyKind::Immediate);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(1000));
        assert!(matches!(
            config.conflict_resolution,
            ConflictPolicy::Named(PolicyName::LastWriteWins)
        ));
    }

    #[test]
    fn batch_size_defaults_per_strategy() {
        let queued = SyncConfig::new("x").with_strategy(StrategyKind::Queued);
        assert_eq!(queued.effective_batch_size(), DEFAULT_QUEUED_BATCH_SIZE);

        let batch = SyncConfig::new("x").with_strategy(StrategyKind::Batch);
        assert_eq!(batch.effective_batch_size(), DEFAULT_BATCH_SIZE);

        let zero = batch.with_batch_size(0);
        assert_eq!(zero.effective_batch_size(), 1);
    }

    #[test]
    fn strategy_names() {
        assert_eq!("Queued".parse::<StrategyKind>().unwrap(), StrategyKind::Queued);
        assert!(matches!(
            "eventually".parse::<StrategyKind>(),
            Err(ConfigError::InvalidStrategy(_))
        ));
        assert_eq!(StrategyKind::Batch.to_string(), "batch");
    }

    #[test]
    fn agent_config_from_lookup() {
        let config = AgentConfig::from_lookup(lookup(&[
            ("FERRY_ENDPOINT", "https://api.example.com/sync"),
            ("FERRY_STRATEGY", "batch"),
            ("FERRY_CONFLICT_RESOLUTION", "server-wins"),
            ("FERRY_BATCH_SIZE", "25"),
            ("FERRY_RETRY_DELAY_MS", "250"),
            ("FERRY_AUTH_TOKEN", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.sync.strategy, StrategyKind::Batch);
        assert_eq!(config.sync.batch_size, Some(25));
        assert_eq!(config.sync.retry_delay, Duration::from_millis(250));
        assert!(matches!(
            config.sync.conflict_resolution,
            ConflictPolicy::Named(PolicyName::ServerWins)
        ));
        assert_eq!(
            config.sync.headers.get("authorization").map(String::as_str),
            Some("Bearer secret")
        );
        assert_eq!(config.storage_key, "ferry:records");
        assert_eq!(config.schema_version, 1);
    }

    #[test]
    fn agent_config_requires_endpoint() {
        let result = AgentConfig::from_lookup(lookup(&[]));
        assert!(matches!(result, Err(ConfigError::MissingEndpoint)));
    }

    #[test]
    fn agent_config_rejects_bad_numbers() {
        let result = AgentConfig::from_lookup(lookup(&[
            ("FERRY_ENDPOINT", "http://x"),
            ("FERRY_MAX_RETRIES", "lots"),
        ]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidNumber("FERRY_MAX_RETRIES"))
        ));
    }
}
