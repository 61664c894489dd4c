//! Access-control list cache
//!
//! One hash per asset under `asset:{assetId}:acl`, mapping user ids to
//! `read`/`write`. Entries are only ever replaced whole or invalidated;
//! patching single fields would race with a concurrent rebuild and could
//! resurrect a revoked grant.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::ids::{AccessLevel, AssetId, UserId};
use crate::keys::{AclKey, KeyFormatter};
use crate::store::CacheStore;

/// User id to access level for one asset
pub type Acl = HashMap<UserId, AccessLevel>;

#[derive(Clone)]
pub struct AclCache {
    store: Arc<dyn CacheStore>,
    keys: AclKey,
    ttl: Duration,
}

impl AclCache {
    pub fn new(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            keys: AclKey,
            ttl: config.acl_ttl,
        }
    }

    /// Cached ACL, or `None` on a miss.
    ///
    /// A single malformed field makes the whole entry a miss.
    pub async fn get(&self, asset_id: AssetId) -> Option<Acl> {
        let key = self.keys.format_key(&asset_id);
        let fields = match self.store.hash_get_all(&key).await {
            Ok(fields) => fields,
            Err(e) => {
                warn!(asset_id = %asset_id, error = %e, "ACL cache read failed, treating as miss");
                return None;
            }
        };

        if fields.is_empty() {
            debug!(asset_id = %asset_id, "ACL cache miss");
            return None;
        }

        let mut acl = Acl::with_capacity(fields.len());
        for (user, access) in &fields {
            match (user.parse::<UserId>(), access.parse::<AccessLevel>()) {
                (Ok(user_id), Ok(level)) => {
                    acl.insert(user_id, level);
                }
                _ => {
                    warn!(
                        asset_id = %asset_id,
                        user = %user,
                        access = %access,
                        "Corrupt ACL entry, deleting"
                    );
                    if let Err(e) = self.store.delete(&key).await {
                        warn!(key = %key, error = %e, "Failed to delete corrupt ACL entry");
                    }
                    return None;
                }
            }
        }

        debug!(asset_id = %asset_id, entries = acl.len(), "ACL cache hit");
        Some(acl)
    }

    /// Replace the cached ACL. An empty ACL is not cached.
    pub async fn set(&self, asset_id: AssetId, acl: &Acl) {
        if acl.is_empty() {
            debug!(asset_id = %asset_id, "Skipping cache write for empty ACL");
            return;
        }
        let key = self.keys.format_key(&asset_id);
        let fields: Vec<(String, String)> = acl
            .iter()
            .map(|(user_id, level)| (user_id.to_string(), level.as_str().to_owned()))
            .collect();
        if let Err(e) = self.store.replace_hash(&key, &fields, self.ttl).await {
            warn!(asset_id = %asset_id, error = %e, "ACL cache write failed. Continuing.");
        }
    }

    pub async fn invalidate(&self, asset_id: AssetId) {
        let key = self.keys.format_key(&asset_id);
        match self.store.delete(&key).await {
            Ok(()) => debug!(asset_id = %asset_id, "ACL cache invalidated"),
            Err(e) => warn!(asset_id = %asset_id, error = %e, "ACL cache DEL failed. Continuing."),
        }
    }
}
