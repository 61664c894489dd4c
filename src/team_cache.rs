//! Team membership cache
//!
//! Holds the set of member ids for each team under `team:{teamId}:members`.
//! The event consumer keeps it current with incremental add/remove; a cold
//! team is populated through [`Authorizer::team_members`](crate::Authorizer::team_members).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::ids::{TeamId, UserId};
use crate::keys::{KeyFormatter, TeamMembersKey};
use crate::store::CacheStore;

#[derive(Clone)]
pub struct TeamMembershipCache {
    store: Arc<dyn CacheStore>,
    keys: TeamMembersKey,
    ttl: Duration,
}

impl TeamMembershipCache {
    pub fn new(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            keys: TeamMembersKey,
            ttl: config.team_ttl,
        }
    }

    /// Cached members of `team_id`, or `None` on a miss.
    ///
    /// Store failures and malformed entries are reported as misses.
    pub async fn get(&self, team_id: TeamId) -> Option<HashSet<UserId>> {
        let key = self.keys.format_key(&team_id);
        let raw = match self.store.set_members(&key).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(team_id = %team_id, error = %e, "Team cache read failed, treating as miss");
                return None;
            }
        };

        if raw.is_empty() {
            debug!(team_id = %team_id, "Team cache miss");
            return None;
        }

        let mut members = HashSet::with_capacity(raw.len());
        for value in &raw {
            match value.parse::<UserId>() {
                Ok(user_id) => {
                    members.insert(user_id);
                }
                Err(e) => {
                    warn!(
                        team_id = %team_id,
                        member = %value,
                        error = %e,
                        "Corrupt team membership entry, deleting"
                    );
                    self.drop_corrupt(&key).await;
                    return None;
                }
            }
        }

        debug!(team_id = %team_id, members = members.len(), "Team cache hit");
        Some(members)
    }

    /// Replace the cached membership. An empty membership is not cached.
    pub async fn set_members(&self, team_id: TeamId, members: &[UserId]) {
        if members.is_empty() {
            debug!(team_id = %team_id, "Skipping cache write for empty team");
            return;
        }
        let key = self.keys.format_key(&team_id);
        let values: Vec<String> = members.iter().map(ToString::to_string).collect();
        if let Err(e) = self.store.replace_set(&key, &values, self.ttl).await {
            warn!(team_id = %team_id, error = %e, "Team cache write failed. Continuing.");
        }
    }

    /// Add one member to an already cached team.
    ///
    /// A team that is not cached stays uncached; creating the set here would
    /// leave a partial membership that looks complete.
    pub async fn add_member(&self, team_id: TeamId, user_id: UserId) {
        let key = self.keys.format_key(&team_id);
        match self
            .store
            .add_to_existing_set(&key, &user_id.to_string())
            .await
        {
            Ok(true) => debug!(team_id = %team_id, user_id = %user_id, "Team member added to cache"),
            Ok(false) => debug!(team_id = %team_id, user_id = %user_id, "Team not cached, nothing to add"),
            Err(e) => warn!(
                team_id = %team_id,
                user_id = %user_id,
                error = %e,
                "Team cache add failed. Continuing."
            ),
        }
    }

    /// Remove one member. Removing an absent member is a no-op.
    pub async fn remove_member(&self, team_id: TeamId, user_id: UserId) {
        let key = self.keys.format_key(&team_id);
        match self.store.remove_from_set(&key, &user_id.to_string()).await {
            Ok(()) => debug!(team_id = %team_id, user_id = %user_id, "Team member removed from cache"),
            Err(e) => {
                warn!(
                    team_id = %team_id,
                    user_id = %user_id,
                    error = %e,
                    "Team cache remove failed, invalidating team"
                );
                self.invalidate(team_id).await;
            }
        }
    }

    pub async fn invalidate(&self, team_id: TeamId) {
        let key = self.keys.format_key(&team_id);
        if let Err(e) = self.store.delete(&key).await {
            warn!(team_id = %team_id, error = %e, "Team cache DEL failed. Continuing.");
        }
    }

    async fn drop_corrupt(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            warn!(key = %key, error = %e, "Failed to delete corrupt team entry");
        }
    }
}
