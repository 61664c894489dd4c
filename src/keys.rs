//! Cache key layout
//!
//! - `team:{teamId}:members` (set of user ids)
//! - `{assetType}:{assetId}` (JSON snapshot)
//! - `asset:{assetId}:acl` (hash of user id to access level)

use crate::ids::{AssetId, AssetRef, TeamId};

/// Builds the store key for a typed cache entry
pub trait KeyFormatter<K>: Send + Sync + 'static {
    fn format_key(&self, key: &K) -> String;
}

/// Key formatter for team membership sets
#[derive(Debug, Clone, Copy, Default)]
pub struct TeamMembersKey;

impl KeyFormatter<TeamId> for TeamMembersKey {
    fn format_key(&self, team_id: &TeamId) -> String {
        format!("team:{team_id}:members")
    }
}

/// Key formatter for asset metadata snapshots
#[derive(Debug, Clone, Copy, Default)]
pub struct AssetSnapshotKey;

impl KeyFormatter<AssetRef> for AssetSnapshotKey {
    fn format_key(&self, asset: &AssetRef) -> String {
        format!("{}:{}", asset.asset_type, asset.id)
    }
}

/// Key formatter for asset ACL hashes
#[derive(Debug, Clone, Copy, Default)]
pub struct AclKey;

impl KeyFormatter<AssetId> for AclKey {
    fn format_key(&self, asset_id: &AssetId) -> String {
        format!("asset:{asset_id}:acl")
    }
}
