//! Post-commit hooks for mutation use cases
//!
//! Call these after the system-of-record transaction commits. Each hook
//! updates the caches it owns and queues the matching domain event.
//! Cache effects are best-effort; a rejected event is returned to the
//! caller so it is never lost silently.

use std::sync::Arc;

use crate::acl_cache::AclCache;
use crate::asset_cache::AssetMetadataCache;
use crate::config::CacheConfig;
use crate::error::PublishError;
use crate::event::{AssetChange, DomainEvent, EventType};
use crate::ids::{AssetRef, AssetSnapshot, TeamId, UserId};
use crate::publisher::PublishQueue;
use crate::store::CacheStore;
use crate::team_cache::TeamMembershipCache;

#[derive(Clone)]
pub struct WriteThrough {
    team: TeamMembershipCache,
    assets: AssetMetadataCache,
    acl: AclCache,
    queue: PublishQueue,
}

impl WriteThrough {
    pub fn new(store: Arc<dyn CacheStore>, config: &CacheConfig, queue: PublishQueue) -> Self {
        Self {
            team: TeamMembershipCache::new(Arc::clone(&store), config),
            assets: AssetMetadataCache::new(Arc::clone(&store), config),
            acl: AclCache::new(store, config),
            queue,
        }
    }

    pub async fn asset_created(
        &self,
        snapshot: &AssetSnapshot,
        action_by: UserId,
    ) -> Result<(), PublishError> {
        self.assets.set(snapshot).await;
        self.queue.enqueue(DomainEvent::asset(
            AssetChange::Created,
            snapshot.asset_ref(),
            snapshot.owner_id,
            action_by,
            None,
        ))
    }

    pub async fn asset_updated(
        &self,
        snapshot: &AssetSnapshot,
        action_by: UserId,
    ) -> Result<(), PublishError> {
        self.assets.set(snapshot).await;
        self.queue.enqueue(DomainEvent::asset(
            AssetChange::Updated,
            snapshot.asset_ref(),
            snapshot.owner_id,
            action_by,
            None,
        ))
    }

    pub async fn asset_deleted(
        &self,
        asset: AssetRef,
        owner_id: UserId,
        action_by: UserId,
    ) -> Result<(), PublishError> {
        self.assets.invalidate(asset).await;
        self.acl.invalidate(asset.id).await;
        self.queue.enqueue(DomainEvent::asset(
            AssetChange::Deleted,
            asset,
            owner_id,
            action_by,
            None,
        ))
    }

    pub async fn asset_shared(
        &self,
        asset: AssetRef,
        owner_id: UserId,
        action_by: UserId,
        target_user_id: UserId,
    ) -> Result<(), PublishError> {
        self.sharing_changed(AssetChange::Shared, asset, owner_id, action_by, target_user_id)
            .await
    }

    pub async fn asset_unshared(
        &self,
        asset: AssetRef,
        owner_id: UserId,
        action_by: UserId,
        target_user_id: UserId,
    ) -> Result<(), PublishError> {
        self.sharing_changed(AssetChange::Unshared, asset, owner_id, action_by, target_user_id)
            .await
    }

    async fn sharing_changed(
        &self,
        change: AssetChange,
        asset: AssetRef,
        owner_id: UserId,
        action_by: UserId,
        target_user_id: UserId,
    ) -> Result<(), PublishError> {
        self.acl.invalidate(asset.id).await;
        self.queue.enqueue(DomainEvent::asset(
            change,
            asset,
            owner_id,
            action_by,
            Some(target_user_id),
        ))
    }

    /// Seed the membership of a new team.
    pub async fn team_created(
        &self,
        team_id: TeamId,
        members: &[UserId],
        action_by: UserId,
    ) -> Result<(), PublishError> {
        self.team.set_members(team_id, members).await;
        self.queue
            .enqueue(DomainEvent::team(EventType::TeamCreated, team_id, action_by, None))
    }

    pub async fn member_added(
        &self,
        team_id: TeamId,
        user_id: UserId,
        action_by: UserId,
    ) -> Result<(), PublishError> {
        self.team.add_member(team_id, user_id).await;
        self.queue.enqueue(DomainEvent::team(
            EventType::MemberAdded,
            team_id,
            action_by,
            Some(user_id),
        ))
    }

    pub async fn member_removed(
        &self,
        team_id: TeamId,
        user_id: UserId,
        action_by: UserId,
    ) -> Result<(), PublishError> {
        self.team.remove_member(team_id, user_id).await;
        self.queue.enqueue(DomainEvent::team(
            EventType::MemberRemoved,
            team_id,
            action_by,
            Some(user_id),
        ))
    }

    pub fn manager_added(
        &self,
        team_id: TeamId,
        user_id: UserId,
        action_by: UserId,
    ) -> Result<(), PublishError> {
        self.queue.enqueue(DomainEvent::team(
            EventType::ManagerAdded,
            team_id,
            action_by,
            Some(user_id),
        ))
    }

    pub fn manager_removed(
        &self,
        team_id: TeamId,
        user_id: UserId,
        action_by: UserId,
    ) -> Result<(), PublishError> {
        self.queue.enqueue(DomainEvent::team(
            EventType::ManagerRemoved,
            team_id,
            action_by,
            Some(user_id),
        ))
    }
}
