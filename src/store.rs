//! Cache store abstraction
//!
//! The typed caches only need a handful of string, set and hash operations
//! with per-key expiry. Any TTL-capable key-value store can implement
//! [`CacheStore`]; [`RedisStore`](crate::RedisStore) is the shared
//! production backend and [`MemoryStore`](crate::MemoryStore) an
//! in-process one.
//!
//! Reads of an absent key return an empty value rather than an error, the
//! same way Redis answers `SMEMBERS`/`HGETALL` on a missing key.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::error::StoreError;

#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Read a string value.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a string value with a TTL, replacing any previous value.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Delete a key of any type. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Read all members of a set. Empty when the key is absent.
    async fn set_members(&self, key: &str) -> Result<HashSet<String>, StoreError>;

    /// Atomically replace a set with `members` and set its TTL.
    async fn replace_set(
        &self,
        key: &str,
        members: &[String],
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Add `member` to the set only if the set already exists.
    ///
    /// Returns whether the set exists. The TTL is left unchanged.
    async fn add_to_existing_set(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Remove `member` from the set. Removing the last member deletes the key.
    async fn remove_from_set(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// Read all fields of a hash. Empty when the key is absent.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Atomically replace a hash with `fields` and set its TTL.
    async fn replace_hash(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Health check.
    async fn ping(&self) -> Result<(), StoreError>;
}
