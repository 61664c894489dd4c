//! Test doubles shared by the unit tests

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{BackendError, StoreError};
use crate::ids::{
    AccessLevel, AssetId, AssetRef, AssetSnapshot, AssetType, Share, TeamId, UserId,
};
use crate::repository::SystemOfRecord;
use crate::store::CacheStore;

pub fn user(n: u128) -> UserId {
    UserId::from(Uuid::from_u128(n))
}

pub fn team(n: u128) -> TeamId {
    TeamId::from(Uuid::from_u128(n))
}

pub fn asset(n: u128) -> AssetId {
    AssetId::from(Uuid::from_u128(n))
}

pub fn snapshot(asset: AssetRef, owner: UserId, name: &str) -> AssetSnapshot {
    let now = Utc::now();
    AssetSnapshot {
        asset_type: asset.asset_type,
        id: asset.id,
        owner_id: owner,
        name: name.to_owned(),
        folder_id: None,
        created_at: now,
        updated_at: now,
    }
}

/// A cache store that is always down
pub struct FailingStore;

fn down() -> StoreError {
    StoreError::Unavailable("connection refused".to_owned())
}

#[async_trait]
impl CacheStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(down())
    }

    async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), StoreError> {
        Err(down())
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Err(down())
    }

    async fn set_members(&self, _key: &str) -> Result<HashSet<String>, StoreError> {
        Err(down())
    }

    async fn replace_set(
        &self,
        _key: &str,
        _members: &[String],
        _ttl: Duration,
    ) -> Result<(), StoreError> {
        Err(down())
    }

    async fn add_to_existing_set(&self, _key: &str, _member: &str) -> Result<bool, StoreError> {
        Err(down())
    }

    async fn remove_from_set(&self, _key: &str, _member: &str) -> Result<(), StoreError> {
        Err(down())
    }

    async fn hash_get_all(&self, _key: &str) -> Result<HashMap<String, String>, StoreError> {
        Err(down())
    }

    async fn replace_hash(
        &self,
        _key: &str,
        _fields: &[(String, String)],
        _ttl: Duration,
    ) -> Result<(), StoreError> {
        Err(down())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(down())
    }
}

#[derive(Default)]
struct RecordState {
    assets: HashMap<AssetRef, AssetSnapshot>,
    shares: HashMap<AssetRef, HashMap<UserId, AccessLevel>>,
    teams: HashMap<TeamId, Vec<UserId>>,
}

/// In-memory system of record that counts its calls
#[derive(Default)]
pub struct InMemoryRecord {
    state: Mutex<RecordState>,
    failing: AtomicBool,
    pub owner_calls: AtomicUsize,
    pub share_calls: AtomicUsize,
    pub team_calls: AtomicUsize,
    pub load_calls: AtomicUsize,
}

impl InMemoryRecord {
    pub fn add_asset(&self, snapshot: AssetSnapshot) {
        let mut state = self.state.lock().unwrap();
        state.assets.insert(snapshot.asset_ref(), snapshot);
    }

    pub fn share(&self, asset: AssetRef, user_id: UserId, access: AccessLevel) {
        let mut state = self.state.lock().unwrap();
        state.shares.entry(asset).or_default().insert(user_id, access);
    }

    pub fn unshare(&self, asset: AssetRef, user_id: UserId) {
        let mut state = self.state.lock().unwrap();
        if let Some(acl) = state.shares.get_mut(&asset) {
            acl.remove(&user_id);
        }
    }

    pub fn set_team(&self, team_id: TeamId, members: &[UserId]) {
        let mut state = self.state.lock().unwrap();
        state.teams.insert(team_id, members.to_vec());
    }

    pub fn remove_member(&self, team_id: TeamId, user_id: UserId) {
        let mut state = self.state.lock().unwrap();
        if let Some(members) = state.teams.get_mut(&team_id) {
            members.retain(|m| *m != user_id);
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), BackendError> {
        if self.failing.load(Ordering::SeqCst) {
            Err("database is unreachable".into())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SystemOfRecord for InMemoryRecord {
    async fn asset_owner(&self, asset: AssetRef) -> Result<Option<UserId>, BackendError> {
        self.owner_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state.assets.get(&asset).map(|a| a.owner_id))
    }

    async fn list_shares(&self, asset: AssetRef) -> Result<Vec<Share>, BackendError> {
        self.share_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .shares
            .get(&asset)
            .map(|acl| {
                acl.iter()
                    .map(|(user_id, access)| Share {
                        user_id: *user_id,
                        access: *access,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_team_members(
        &self,
        team_id: TeamId,
    ) -> Result<Option<Vec<UserId>>, BackendError> {
        self.team_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state.teams.get(&team_id).cloned())
    }

    async fn load_asset(&self, asset: AssetRef) -> Result<Option<AssetSnapshot>, BackendError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state.assets.get(&asset).cloned())
    }

    async fn parent_folder(&self, note_id: AssetId) -> Result<Option<AssetId>, BackendError> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .assets
            .get(&AssetRef {
                asset_type: AssetType::Note,
                id: note_id,
            })
            .and_then(|note| note.folder_id))
    }
}
