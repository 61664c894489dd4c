//! Asset metadata cache
//!
//! JSON snapshots of folders and notes under `{assetType}:{assetId}`.
//! Only whole-key invalidation is offered; there is no partial patch.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::BackendError;
use crate::ids::{AssetRef, AssetSnapshot};
use crate::keys::{AssetSnapshotKey, KeyFormatter};
use crate::repository::SystemOfRecord;
use crate::store::CacheStore;

#[derive(Clone)]
pub struct AssetMetadataCache {
    store: Arc<dyn CacheStore>,
    keys: AssetSnapshotKey,
    ttl: Duration,
}

impl AssetMetadataCache {
    pub fn new(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            keys: AssetSnapshotKey,
            ttl: config.asset_ttl,
        }
    }

    /// Cached snapshot, or `None` on a miss.
    pub async fn get(&self, asset: AssetRef) -> Option<AssetSnapshot> {
        let key = self.keys.format_key(&asset);
        let json = match self.store.get(&key).await {
            Ok(Some(json)) => json,
            Ok(None) => {
                debug!(asset = %asset, "Asset cache miss");
                return None;
            }
            Err(e) => {
                warn!(asset = %asset, error = %e, "Asset cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_str::<AssetSnapshot>(&json) {
            Ok(snapshot) if snapshot.asset_ref() == asset => {
                debug!(asset = %asset, "Asset cache hit");
                Some(snapshot)
            }
            Ok(snapshot) => {
                warn!(
                    asset = %asset,
                    cached = %snapshot.asset_ref(),
                    "Cached snapshot belongs to another asset, deleting"
                );
                self.drop_corrupt(&key).await;
                None
            }
            Err(e) => {
                warn!(asset = %asset, error = %e, "Failed to deserialize cached snapshot, deleting");
                self.drop_corrupt(&key).await;
                None
            }
        }
    }

    /// Store a snapshot with the metadata TTL.
    pub async fn set(&self, snapshot: &AssetSnapshot) {
        let asset = snapshot.asset_ref();
        let key = self.keys.format_key(&asset);
        let json = match serde_json::to_string(snapshot) {
            Ok(json) => json,
            Err(e) => {
                warn!(asset = %asset, error = %e, "Failed to serialize snapshot");
                return;
            }
        };
        if let Err(e) = self.store.set_ex(&key, &json, self.ttl).await {
            warn!(asset = %asset, error = %e, "Asset cache SETEX failed. Continuing.");
        }
    }

    pub async fn invalidate(&self, asset: AssetRef) {
        let key = self.keys.format_key(&asset);
        match self.store.delete(&key).await {
            Ok(()) => debug!(asset = %asset, "Asset cache invalidated"),
            Err(e) => warn!(asset = %asset, error = %e, "Asset cache DEL failed. Continuing."),
        }
    }

    /// Cache-aside read: serve from the cache, otherwise load from the
    /// system of record and populate the cache.
    pub async fn get_or_load<R>(
        &self,
        record: &R,
        asset: AssetRef,
    ) -> Result<Option<AssetSnapshot>, BackendError>
    where
        R: SystemOfRecord + ?Sized,
    {
        if let Some(snapshot) = self.get(asset).await {
            return Ok(Some(snapshot));
        }
        let loaded = record.load_asset(asset).await?;
        if let Some(snapshot) = &loaded {
            self.set(snapshot).await;
        }
        Ok(loaded)
    }

    async fn drop_corrupt(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            warn!(key = %key, error = %e, "Failed to delete corrupt asset entry");
        }
    }
}
