//! Authorization resolver
//!
//! Ownership is always read from the system of record. Shared access goes
//! through the ACL cache: a miss rebuilds the full ACL from the share rows
//! and stores it. Cache trouble only costs latency; system-of-record trouble
//! surfaces as [`AuthzError::Backend`], never as a silent allow or deny.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::acl_cache::{Acl, AclCache};
use crate::config::NotePermissionPolicy;
use crate::error::AuthzError;
use crate::ids::{AccessLevel, AssetRef, AssetType, TeamId, UserId};
use crate::repository::SystemOfRecord;
use crate::team_cache::TeamMembershipCache;

pub struct Authorizer<R: ?Sized> {
    record: Arc<R>,
    acl: AclCache,
    teams: TeamMembershipCache,
    policy: NotePermissionPolicy,
}

impl<R: ?Sized> Clone for Authorizer<R> {
    fn clone(&self) -> Self {
        Self {
            record: Arc::clone(&self.record),
            acl: self.acl.clone(),
            teams: self.teams.clone(),
            policy: self.policy,
        }
    }
}

impl<R> Authorizer<R>
where
    R: SystemOfRecord + ?Sized,
{
    pub fn new(record: Arc<R>, acl: AclCache, teams: TeamMembershipCache) -> Self {
        Self {
            record,
            acl,
            teams,
            policy: NotePermissionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: NotePermissionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn can_read(&self, user_id: UserId, asset: AssetRef) -> Result<bool, AuthzError> {
        self.check(user_id, asset, AccessLevel::Read).await
    }

    pub async fn can_write(&self, user_id: UserId, asset: AssetRef) -> Result<bool, AuthzError> {
        self.check(user_id, asset, AccessLevel::Write).await
    }

    async fn check(
        &self,
        user_id: UserId,
        asset: AssetRef,
        required: AccessLevel,
    ) -> Result<bool, AuthzError> {
        let level = self.access_level(user_id, asset).await?;
        let allowed = level.is_some_and(|level| level.allows(required));
        debug!(
            user_id = %user_id,
            asset = %asset,
            required = %required,
            allowed,
            "Authorization resolved"
        );
        Ok(allowed)
    }

    /// Whether `user_id` owns the asset. Unknown assets are `AssetNotFound`.
    pub async fn is_owner(&self, user_id: UserId, asset: AssetRef) -> Result<bool, AuthzError> {
        let owner = self
            .record
            .asset_owner(asset)
            .await
            .map_err(AuthzError::Backend)?
            .ok_or(AuthzError::AssetNotFound(asset))?;
        Ok(owner == user_id)
    }

    /// Effective access of `user_id` on the asset; owners get `Write`.
    pub async fn access_level(
        &self,
        user_id: UserId,
        asset: AssetRef,
    ) -> Result<Option<AccessLevel>, AuthzError> {
        let direct = self.direct_level(user_id, asset).await?;
        if direct == Some(AccessLevel::Write)
            || asset.asset_type != AssetType::Note
            || self.policy == NotePermissionPolicy::Direct
        {
            return Ok(direct);
        }

        let parent = self
            .record
            .parent_folder(asset.id)
            .await
            .map_err(AuthzError::Backend)?;
        let Some(folder_id) = parent else {
            return Ok(direct);
        };

        let inherited = match self.direct_level(user_id, AssetRef::folder(folder_id)).await {
            Ok(level) => level,
            // A dangling folder reference grants nothing
            Err(AuthzError::AssetNotFound(_)) => None,
            Err(e) => return Err(e),
        };
        Ok(direct.max(inherited))
    }

    async fn direct_level(
        &self,
        user_id: UserId,
        asset: AssetRef,
    ) -> Result<Option<AccessLevel>, AuthzError> {
        if self.is_owner(user_id, asset).await? {
            return Ok(Some(AccessLevel::Write));
        }
        let acl = self.acl_for(asset).await?;
        Ok(acl.get(&user_id).copied())
    }

    async fn acl_for(&self, asset: AssetRef) -> Result<Acl, AuthzError> {
        if let Some(acl) = self.acl.get(asset.id).await {
            return Ok(acl);
        }

        let shares = self
            .record
            .list_shares(asset)
            .await
            .map_err(AuthzError::Backend)?;
        let mut acl = Acl::with_capacity(shares.len());
        for share in shares {
            acl.entry(share.user_id)
                .and_modify(|level| *level = (*level).max(share.access))
                .or_insert(share.access);
        }
        debug!(asset = %asset, entries = acl.len(), "ACL rebuilt from share records");
        self.acl.set(asset.id, &acl).await;
        Ok(acl)
    }

    /// Members of a team, cache-aside on the membership cache.
    pub async fn team_members(&self, team_id: TeamId) -> Result<HashSet<UserId>, AuthzError> {
        if let Some(members) = self.teams.get(team_id).await {
            return Ok(members);
        }

        let members = self
            .record
            .list_team_members(team_id)
            .await
            .map_err(AuthzError::Backend)?
            .ok_or(AuthzError::TeamNotFound(team_id))?;
        self.teams.set_members(team_id, &members).await;
        Ok(members.into_iter().collect())
    }

    pub async fn is_team_member(&self, team_id: TeamId, user_id: UserId) -> Result<bool, AuthzError> {
        Ok(self.team_members(team_id).await?.contains(&user_id))
    }
}
