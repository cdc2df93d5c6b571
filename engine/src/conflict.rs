//! Conflict resolution for concurrently modified records.
//!
//! Resolution is a pure function of the local record, the remote record and
//! the configured policy. Inputs are never mutated; the winner is cloned.

use crate::{Error, Record};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Signature of a resolver: `(local, remote) -> resolved`.
pub type ResolverFn = dyn Fn(&Record, &Record) -> Record + Send + Sync;

/// A shareable resolver function.
pub type Resolver = Arc<ResolverFn>;

/// Names of the built-in policies, as they appear in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyName {
    /// Strictly newer remote `updated_at` wins, otherwise local (default)
    #[default]
    LastWriteWins,
    /// Local always wins
    FirstWriteWins,
    /// Remote always wins
    ServerWins,
}

impl PolicyName {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyName::LastWriteWins => "last-write-wins",
            PolicyName::FirstWriteWins => "first-write-wins",
            PolicyName::ServerWins => "server-wins",
        }
    }
}

impl fmt::Display for PolicyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last-write-wins" => Ok(PolicyName::LastWriteWins),
            "first-write-wins" => Ok(PolicyName::FirstWriteWins),
            "server-wins" => Ok(PolicyName::ServerWins),
            other => Err(Error::UnknownPolicy(other.to_string())),
        }
    }
}

/// How conflicts are resolved: a built-in policy or a caller-supplied function.
#[derive(Clone)]
pub enum ConflictPolicy {
    Named(PolicyName),
    Custom(Resolver),
}

impl ConflictPolicy {
    /// Wrap a custom resolver function.
    pub fn custom(f: impl Fn(&Record, &Record) -> Record + Send + Sync + 'static) -> Self {
        ConflictPolicy::Custom(Arc::new(f))
    }
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        ConflictPolicy::Named(PolicyName::default())
    }
}

impl From<PolicyName> for ConflictPolicy {
    fn from(name: PolicyName) -> Self {
        ConflictPolicy::Named(name)
    }
}

impl fmt::Debug for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictPolicy::Named(name) => f.debug_tuple("Named").field(name).finish(),
            ConflictPolicy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Last write wins by `updated_at`.
///
/// Ties and a missing remote timestamp keep local; a missing local timestamp
/// (with a remote one present) yields remote.
pub fn last_write_wins(local: &Record, remote: &Record) -> Record {
    match (local.updated_at(), remote.updated_at()) {
        (_, None) => local.clone(),
        (None, Some(_)) => remote.clone(),
        (Some(l), Some(r)) if r > l => remote.clone(),
        _ => local.clone(),
    }
}

/// The earliest write is protected: local always wins.
pub fn first_write_wins(local: &Record, _remote: &Record) -> Record {
    local.clone()
}

/// The remote is authoritative.
pub fn server_wins(_local: &Record, remote: &Record) -> Record {
    remote.clone()
}

/// Look up the resolver for a policy.
///
/// A custom resolver is returned as-is (same allocation), so its output is
/// never post-processed.
pub fn get_resolver(policy: &ConflictPolicy) -> Resolver {
    match policy {
        ConflictPolicy::Named(PolicyName::LastWriteWins) => Arc::new(last_write_wins),
        ConflictPolicy::Named(PolicyName::FirstWriteWins) => Arc::new(first_write_wins),
        ConflictPolicy::Named(PolicyName::ServerWins) => Arc::new(server_wins),
        ConflictPolicy::Custom(f) => Arc::clone(f),
    }
}

/// Resolve one conflict under `policy`.
pub fn resolve(local: &Record, remote: &Record, policy: &ConflictPolicy) -> Record {
    get_resolver(policy)(local, remote)
}

/// A resolver bound to one policy, selected once and reused for a whole pass.
#[derive(Clone)]
pub struct ConflictResolver {
    policy: ConflictPolicy,
    resolver: Resolver,
}

impl ConflictResolver {
    pub fn new(policy: ConflictPolicy) -> Self {
        let resolver = get_resolver(&policy);
        Self { policy, resolver }
    }

    pub fn policy(&self) -> &ConflictPolicy {
        &self.policy
    }

    pub fn resolve(&self, local: &Record, remote: &Record) -> Record {
        (self.resolver)(local, remote)
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(ConflictPolicy::default())
    }
}

impl fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("policy", &self.policy)
            .finish()
    }
}
