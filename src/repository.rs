//! System-of-record port
//!
//! The relational store is the only source of truth. This layer reads from
//! it on cache misses and for ownership checks, and never writes to it.

use async_trait::async_trait;

use crate::error::BackendError;
use crate::ids::{AssetId, AssetRef, AssetSnapshot, Share, TeamId, UserId};

#[async_trait]
pub trait SystemOfRecord: Send + Sync + 'static {
    /// Owner of the asset, or `None` if the asset does not exist.
    async fn asset_owner(&self, asset: AssetRef) -> Result<Option<UserId>, BackendError>;

    /// Every share row recorded for the asset.
    async fn list_shares(&self, asset: AssetRef) -> Result<Vec<Share>, BackendError>;

    /// Members of the team, or `None` if the team does not exist.
    async fn list_team_members(&self, team_id: TeamId)
    -> Result<Option<Vec<UserId>>, BackendError>;

    /// Full record for the metadata cache, or `None` if the asset does not exist.
    async fn load_asset(&self, asset: AssetRef) -> Result<Option<AssetSnapshot>, BackendError>;

    /// Folder containing the note, or `None` if the note does not exist.
    async fn parent_folder(&self, note_id: AssetId) -> Result<Option<AssetId>, BackendError>;
}
