//! Key to entry storage with expiry metadata.

pub mod error;
pub mod file;
pub mod memory;

use crate::cache::error::CacheError;
use crate::key::CacheKey;
use async_trait::async_trait;
use bincode::config::{Configuration, Fixint, LittleEndian};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Encoding shared by stored entries and the payloads inside them.
pub(crate) const BINCODE_CONFIG: Configuration<LittleEndian, Fixint> =
    bincode::config::standard().with_fixed_int_encoding();

/// A stored payload. Entries are never mutated; a refresh writes a replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: CacheKey, payload: Vec<u8>, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            key,
            payload,
            fetched_at: now,
            expires_at: expiry_after(now, ttl),
        }
    }

    /// An entry is fresh strictly before its `expires_at`.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Hit(Arc<CacheEntry>),
    Miss,
}

impl Lookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }
}

/// Storage for cached query results.
///
/// Implementations must be safe for concurrent use. A `put` racing a
/// `delete_expired` on the same key must leave the fresher entry in place.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Looks up `key`. Expired entries are reported as [`Lookup::Miss`].
    async fn get(&self, key: &CacheKey) -> Result<Lookup, CacheError>;

    /// Creates or replaces the entry for `key` with `fetched_at = now` and
    /// `expires_at = now + ttl`. Last writer wins.
    async fn put(&self, key: &CacheKey, payload: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Removes every entry with `expires_at < before` and returns how many went.
    async fn delete_expired(&self, before: DateTime<Utc>) -> Result<usize, CacheError>;

    /// Removes every entry with `fetched_at < cutoff` and returns how many went.
    async fn delete_fetched_before(&self, cutoff: DateTime<Utc>) -> Result<usize, CacheError>;

    /// Number of stored entries, expired or not.
    async fn len(&self) -> Result<usize, CacheError>;
}

fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
