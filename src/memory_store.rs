//! In-process cache store backed by Moka
//!
//! Mirrors the subset of Redis semantics the typed caches rely on: per-key
//! expiry, sets that disappear when their last member is removed, and
//! `WRONGTYPE` errors when a key is used as the wrong kind of value.
//! Useful for single-process deployments and as the test substrate.

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;
use moka::ops::compute::Op;
use std::collections::{HashMap, HashSet};
use std::future::ready;
use std::time::{Duration, Instant};

use crate::error::StoreError;
use crate::store::CacheStore;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Set(HashSet<String>),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Instant,
}

impl Entry {
    fn new(value: Value, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }
}

/// Expiry is carried inside each entry so updates keep the original deadline.
struct EntryExpiry;

impl Expiry<String, Entry> for EntryExpiry {
    fn expire_after_create(&self, _key: &String, entry: &Entry, created_at: Instant) -> Option<Duration> {
        Some(entry.expires_at.saturating_duration_since(created_at))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry,
        updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.expires_at.saturating_duration_since(updated_at))
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType {
        key: key.to_owned(),
    }
}

/// Moka-backed [`CacheStore`]. Clones share the same underlying cache.
#[derive(Clone)]
pub struct MemoryStore {
    entries: Cache<String, Entry>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(100_000)
    }
}

impl MemoryStore {
    pub fn new(max_capacity: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryExpiry)
            .build();
        Self { entries }
    }

    /// Whether a key is currently present (and not expired).
    pub async fn contains_key(&self, key: &str) -> bool {
        self.entries.get(key).await.is_some()
    }

    /// Store a raw string under `key`, bypassing the typed adapters.
    pub async fn put_raw(&self, key: &str, value: &str, ttl: Duration) {
        self.entries
            .insert(key.to_owned(), Entry::new(Value::Str(value.to_owned()), ttl))
            .await;
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.entries.get(key).await.map(|entry| entry.value) {
            None => Ok(None),
            Some(Value::Str(value)) => Ok(Some(value)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.put_raw(key, value, ttl).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.invalidate(key).await;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<HashSet<String>, StoreError> {
        match self.entries.get(key).await.map(|entry| entry.value) {
            None => Ok(HashSet::new()),
            Some(Value::Set(members)) => Ok(members),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn replace_set(
        &self,
        key: &str,
        members: &[String],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        if members.is_empty() {
            return self.delete(key).await;
        }
        let set = members.iter().cloned().collect();
        self.entries
            .insert(key.to_owned(), Entry::new(Value::Set(set), ttl))
            .await;
        Ok(())
    }

    async fn add_to_existing_set(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut outcome = Ok(false);
        self.entries
            .entry(key.to_owned())
            .and_compute_with(|current| {
                let Some(mut entry) = current.map(|e| e.into_value()) else {
                    return ready(Op::Nop);
                };
                if let Value::Set(members) = &mut entry.value {
                    members.insert(member.to_owned());
                } else {
                    outcome = Err(wrong_type(key));
                    return ready(Op::Nop);
                }
                outcome = Ok(true);
                ready(Op::Put(entry))
            })
            .await;
        outcome
    }

    async fn remove_from_set(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut outcome = Ok(());
        self.entries
            .entry(key.to_owned())
            .and_compute_with(|current| {
                let Some(mut entry) = current.map(|e| e.into_value()) else {
                    return ready(Op::Nop);
                };
                let now_empty = if let Value::Set(members) = &mut entry.value {
                    members.remove(member);
                    members.is_empty()
                } else {
                    outcome = Err(wrong_type(key));
                    return ready(Op::Nop);
                };
                if now_empty {
                    ready(Op::Remove)
                } else {
                    ready(Op::Put(entry))
                }
            })
            .await;
        outcome
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        match self.entries.get(key).await.map(|entry| entry.value) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(fields)) => Ok(fields),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn replace_hash(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        if fields.is_empty() {
            return self.delete(key).await;
        }
        let hash = fields.iter().cloned().collect();
        self.entries
            .insert(key.to_owned(), Entry::new(Value::Hash(hash), ttl))
            .await;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_add_never_creates_a_set() {
        let store = MemoryStore::default();
        assert!(!store.add_to_existing_set("s", "a").await.unwrap());
        assert!(!store.contains_key("s").await);

        store.replace_set("s", &["a".to_owned()], TTL).await.unwrap();
        assert!(store.add_to_existing_set("s", "b").await.unwrap());
        assert_eq!(store.set_members("s").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_removing_last_member_deletes_key() {
        let store = MemoryStore::default();
        store.replace_set("s", &["a".to_owned()], TTL).await.unwrap();
        store.remove_from_set("s", "a").await.unwrap();
        assert!(!store.contains_key("s").await);

        // absent key: no-op
        store.remove_from_set("s", "a").await.unwrap();
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let store = MemoryStore::default();
        store.set_ex("k", "v", Duration::from_millis(50)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let store = MemoryStore::default();
        store.set_ex("k", "v", TTL).await.unwrap();
        assert!(matches!(
            store.set_members("k").await,
            Err(StoreError::WrongType { .. })
        ));
        assert!(matches!(
            store.add_to_existing_set("k", "a").await,
            Err(StoreError::WrongType { .. })
        ));
    }

    #[tokio::test]
    async fn test_replace_hash_drops_previous_fields() {
        let store = MemoryStore::default();
        store
            .replace_hash("h", &[("a".to_owned(), "1".to_owned())], TTL)
            .await
            .unwrap();
        store
            .replace_hash("h", &[("b".to_owned(), "2".to_owned())], TTL)
            .await
            .unwrap();

        let fields = store.hash_get_all("h").await.unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields.get("b").map(String::as_str), Some("2"));
    }
}
