//! sharecache - Shared cache layer for team, asset and permission lookups
//!
//! This library keeps three Redis-backed caches in front of the relational
//! system of record:
//! - Team membership sets, updated incrementally from team-activity events
//! - Asset metadata snapshots, invalidated on any asset change
//! - Per-asset ACLs, invalidated on share/unshare and rebuilt on the next read
//!
//! It also provides:
//! - The cache-updater consumer that applies domain events to the caches
//! - An authorization resolver (ownership first, then cache-aside ACL)
//! - A bounded outbound event queue for mutation paths
//!
//! The caches are an optimization only. With Redis down every answer still
//! comes from the system of record.

mod acl_cache;
mod asset_cache;
mod authz;
mod config;
mod consumer;
mod error;
mod event;
mod ids;
mod keys;
mod logging;
mod memory_store;
mod publisher;
mod redis_store;
mod repository;
mod source;
mod store;
mod team_cache;
mod write_through;

#[cfg(test)]
mod test_support;

pub use acl_cache::{Acl, AclCache};
pub use asset_cache::AssetMetadataCache;
pub use authz::Authorizer;
pub use config::{
    CacheConfig, ConsumerConfig, LogFormat, NotePermissionPolicy, PublisherConfig, ServiceConfig,
    StreamConfig,
};
pub use consumer::{
    CacheUpdater, ConsumerHandle, ConsumerState, ConsumerStats, EventConsumer, spawn_consumer,
};
pub use error::{
    AuthzError, BackendError, ConfigError, EventDecodeError, PublishError, StoreError,
    TransportError,
};
pub use event::{AssetChange, DomainEvent, EventType, Topic};
pub use ids::{
    AccessLevel, AssetId, AssetRef, AssetSnapshot, AssetType, Share, TeamId, UnknownVariant,
    UserId,
};
pub use keys::{AclKey, AssetSnapshotKey, KeyFormatter, TeamMembersKey};
pub use logging::init_logging;
pub use memory_store::MemoryStore;
pub use publisher::{
    ChannelPublisher, EventPublisher, PublishQueue, PublishStats, RedisStreamPublisher,
    spawn_publish_worker,
};
pub use redis_store::RedisStore;
pub use repository::SystemOfRecord;
pub use source::{ChannelSource, Delivery, EventSource, RedisStreamSource, channel_source};
pub use store::CacheStore;
pub use team_cache::TeamMembershipCache;
pub use write_through::WriteThrough;

// Re-export async_trait for convenience
pub use async_trait::async_trait;
