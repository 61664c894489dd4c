//! Domain change events
//!
//! Events travel as JSON on two topics: `team.activity` and `asset.changes`.
//! Field names are camelCase; PascalCase spellings are accepted too since
//! some publishers serialize without field tags. Blank identifier strings
//! are read as absent, as are malformed `ownerId`, `actionBy` and
//! `targetUserId` values. Team and asset identifiers stay strict.

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::error::EventDecodeError;
use crate::ids::{AssetId, AssetRef, AssetType, TeamId, UserId};

/// Logical event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    TeamActivity,
    AssetChanges,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::TeamActivity => f.write_str("team-activity"),
            Topic::AssetChanges => f.write_str("asset-changes"),
        }
    }
}

/// What happened to an asset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetChange {
    Created,
    Updated,
    Deleted,
    Shared,
    Unshared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    TeamCreated,
    MemberAdded,
    MemberRemoved,
    ManagerAdded,
    ManagerRemoved,
    FolderCreated,
    FolderUpdated,
    FolderDeleted,
    FolderShared,
    FolderUnshared,
    NoteCreated,
    NoteUpdated,
    NoteDeleted,
    NoteShared,
    NoteUnshared,
    /// Any type this build does not know about
    #[serde(other)]
    Unknown,
}

impl EventType {
    pub fn for_asset(asset_type: AssetType, change: AssetChange) -> Self {
        use AssetChange::*;
        match (asset_type, change) {
            (AssetType::Folder, Created) => EventType::FolderCreated,
            (AssetType::Folder, Updated) => EventType::FolderUpdated,
            (AssetType::Folder, Deleted) => EventType::FolderDeleted,
            (AssetType::Folder, Shared) => EventType::FolderShared,
            (AssetType::Folder, Unshared) => EventType::FolderUnshared,
            (AssetType::Note, Created) => EventType::NoteCreated,
            (AssetType::Note, Updated) => EventType::NoteUpdated,
            (AssetType::Note, Deleted) => EventType::NoteDeleted,
            (AssetType::Note, Shared) => EventType::NoteShared,
            (AssetType::Note, Unshared) => EventType::NoteUnshared,
        }
    }

    /// Topic the event is published on. Unknown types are routed as asset changes.
    pub fn topic(self) -> Topic {
        match self {
            EventType::TeamCreated
            | EventType::MemberAdded
            | EventType::MemberRemoved
            | EventType::ManagerAdded
            | EventType::ManagerRemoved => Topic::TeamActivity,
            _ => Topic::AssetChanges,
        }
    }

    /// Share or unshare of a folder or note, in either direction.
    pub fn is_sharing_change(self) -> bool {
        matches!(
            self,
            EventType::FolderShared
                | EventType::FolderUnshared
                | EventType::NoteShared
                | EventType::NoteUnshared
        )
    }

    pub fn is_deletion(self) -> bool {
        matches!(self, EventType::FolderDeleted | EventType::NoteDeleted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::TeamCreated => "TEAM_CREATED",
            EventType::MemberAdded => "MEMBER_ADDED",
            EventType::MemberRemoved => "MEMBER_REMOVED",
            EventType::ManagerAdded => "MANAGER_ADDED",
            EventType::ManagerRemoved => "MANAGER_REMOVED",
            EventType::FolderCreated => "FOLDER_CREATED",
            EventType::FolderUpdated => "FOLDER_UPDATED",
            EventType::FolderDeleted => "FOLDER_DELETED",
            EventType::FolderShared => "FOLDER_SHARED",
            EventType::FolderUnshared => "FOLDER_UNSHARED",
            EventType::NoteCreated => "NOTE_CREATED",
            EventType::NoteUpdated => "NOTE_UPDATED",
            EventType::NoteDeleted => "NOTE_DELETED",
            EventType::NoteShared => "NOTE_SHARED",
            EventType::NoteUnshared => "NOTE_UNSHARED",
            EventType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of a committed change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    #[serde(alias = "EventType")]
    pub event_type: EventType,

    #[serde(
        default,
        alias = "TeamID",
        deserialize_with = "blank_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub team_id: Option<TeamId>,

    #[serde(
        default,
        alias = "AssetType",
        deserialize_with = "blank_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub asset_type: Option<AssetType>,

    #[serde(
        default,
        alias = "AssetID",
        deserialize_with = "blank_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub asset_id: Option<AssetId>,

    #[serde(
        default,
        alias = "OwnerID",
        deserialize_with = "lenient_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub owner_id: Option<UserId>,

    #[serde(
        default,
        alias = "ActionBy",
        deserialize_with = "lenient_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub action_by: Option<UserId>,

    #[serde(
        default,
        alias = "TargetUserID",
        deserialize_with = "lenient_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_user_id: Option<UserId>,

    #[serde(default, alias = "Timestamp", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

fn blank_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse().map(Some).map_err(de::Error::custom),
    }
}

/// Like [`blank_as_none`], but a malformed value is dropped with a warning.
///
/// Used for actor and target fields: a producer that writes a non-UUID actor
/// must not block the invalidation carried by the rest of the event.
fn lenient_id<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    let value = match raw {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(serde_json::Value::String(value)) => value,
        Some(other) => {
            warn!(value = %other, "Ignoring non-string identifier in event");
            return Ok(None);
        }
    };
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    match value.parse() {
        Ok(id) => Ok(Some(id)),
        Err(e) => {
            warn!(value = %value, error = %e, "Ignoring malformed identifier in event");
            Ok(None)
        }
    }
}

impl DomainEvent {
    /// A team-activity event stamped with the current time.
    pub fn team(
        event_type: EventType,
        team_id: TeamId,
        action_by: UserId,
        target_user_id: Option<UserId>,
    ) -> Self {
        Self {
            event_type,
            team_id: Some(team_id),
            asset_type: None,
            asset_id: None,
            owner_id: None,
            action_by: Some(action_by),
            target_user_id,
            timestamp: Some(Utc::now()),
        }
    }

    /// An asset-changes event stamped with the current time.
    pub fn asset(
        change: AssetChange,
        asset: AssetRef,
        owner_id: UserId,
        action_by: UserId,
        target_user_id: Option<UserId>,
    ) -> Self {
        Self {
            event_type: EventType::for_asset(asset.asset_type, change),
            team_id: None,
            asset_type: Some(asset.asset_type),
            asset_id: Some(asset.id),
            owner_id: Some(owner_id),
            action_by: Some(action_by),
            target_user_id,
            timestamp: Some(Utc::now()),
        }
    }

    /// Decode and validate one message payload.
    pub fn decode(payload: &[u8]) -> Result<Self, EventDecodeError> {
        let event: DomainEvent = serde_json::from_slice(payload)?;
        event.validate()?;
        Ok(event)
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    fn validate(&self) -> Result<(), EventDecodeError> {
        let missing = |field| EventDecodeError::MissingField {
            event_type: self.event_type.to_string(),
            field,
        };
        match self.event_type {
            EventType::MemberAdded | EventType::MemberRemoved => {
                if self.team_id.is_none() {
                    return Err(missing("teamId"));
                }
                if self.target_user_id.is_none() {
                    return Err(missing("targetUserId"));
                }
            }
            t if t.is_sharing_change() => {
                if self.asset_id.is_none() {
                    return Err(missing("assetId"));
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub fn topic(&self) -> Topic {
        self.event_type.topic()
    }

    /// Both halves of the asset pointer, when present.
    pub fn asset_ref(&self) -> Option<AssetRef> {
        match (self.asset_type, self.asset_id) {
            (Some(asset_type), Some(id)) => Some(AssetRef { asset_type, id }),
            _ => None,
        }
    }

    /// Ordering key: the team id for team activity, the asset id otherwise.
    pub fn partition_key(&self) -> Option<String> {
        match self.topic() {
            Topic::TeamActivity => self.team_id.map(|id| id.to_string()),
            Topic::AssetChanges => self.asset_id.map(|id| id.to_string()),
        }
    }
}
