//! Redis-backed cache store

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::StoreError;
use crate::store::CacheStore;

/// `SADD` guarded by `EXISTS`, so incremental updates never create a partial set.
const ADD_TO_EXISTING_SET: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
    redis.call('SADD', KEYS[1], ARGV[1])
    return 1
end
return 0
";

/// Shared Redis cache store.
///
/// Cloning is cheap; every clone multiplexes over the same managed connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    add_script: Arc<redis::Script>,
}

impl RedisStore {
    /// Connect to Redis with an auto-reconnecting connection manager.
    pub async fn connect(client: redis::Client) -> Result<Self, redis::RedisError> {
        let conn = ConnectionManager::new(client).await?;
        info!("Redis cache store connected");
        Ok(Self {
            conn,
            add_script: Arc::new(redis::Script::new(ADD_TO_EXISTING_SET)),
        })
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    // Redis rejects a zero expiry
    ttl.as_secs().max(1)
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.get::<_, Option<String>>(key).await?)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs(ttl)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<HashSet<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers::<_, HashSet<String>>(key).await?)
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
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .del(key)
            .ignore()
            .sadd(key, members)
            .ignore()
            .expire(key, ttl_secs(ttl) as i64)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn add_to_existing_set(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let existed: i64 = self
            .add_script
            .key(key)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;
        Ok(existed == 1)
    }

    async fn remove_from_set(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.srem::<_, _, ()>(key, member).await?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.hgetall::<_, HashMap<String, String>>(key).await?)
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
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .del(key)
            .ignore()
            .hset_multiple(key, fields)
            .ignore()
            .expire(key, ttl_secs(ttl) as i64)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> RedisStore {
        let client = redis::Client::open("redis://127.0.0.1:6379/").unwrap();
        RedisStore::connect(client).await.unwrap()
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_set_operations() {
        let store = store().await;
        let key = "sharecache:test:set";
        store.delete(key).await.unwrap();

        assert!(!store.add_to_existing_set(key, "a").await.unwrap());
        assert!(store.set_members(key).await.unwrap().is_empty());

        store
            .replace_set(key, &["a".to_owned(), "b".to_owned()], Duration::from_secs(60))
            .await
            .unwrap();
        assert!(store.add_to_existing_set(key, "c").await.unwrap());
        store.remove_from_set(key, "a").await.unwrap();

        let members = store.set_members(key).await.unwrap();
        assert_eq!(members.len(), 2);
        assert!(members.contains("b") && members.contains("c"));

        store.delete(key).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_replace_hash_drops_stale_fields() {
        let store = store().await;
        let key = "sharecache:test:hash";
        let ttl = Duration::from_secs(60);

        store
            .replace_hash(key, &[("u1".to_owned(), "write".to_owned())], ttl)
            .await
            .unwrap();
        store
            .replace_hash(key, &[("u2".to_owned(), "read".to_owned())], ttl)
            .await
            .unwrap();

        let fields = store.hash_get_all(key).await.unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields.get("u2").map(String::as_str), Some("read"));

        store.delete(key).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_ping() {
        assert!(store().await.ping().await.is_ok());
    }
}
