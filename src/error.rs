//! Error types

use redis::RedisError;

use crate::ids::{AssetRef, TeamId};

/// Boxed error returned by system-of-record collaborators.
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

/// Cache store errors.
///
/// Adapters never surface these to callers: reads degrade to a miss and
/// writes are logged and dropped.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Key {key} holds a value of the wrong type")]
    WrongType { key: String },

    #[error("Cache store unavailable: {0}")]
    Unavailable(String),
}

/// Authorization resolver failures. A plain denial is `Ok(false)`, never one of these.
#[derive(Debug, thiserror::Error)]
pub enum AuthzError {
    #[error("{0} not found")]
    AssetNotFound(AssetRef),

    #[error("team {0} not found")]
    TeamNotFound(TeamId),

    #[error("System of record error: {0}")]
    Backend(#[source] BackendError),
}

/// A message on the event stream that could not be turned into a [`DomainEvent`](crate::DomainEvent).
#[derive(Debug, thiserror::Error)]
pub enum EventDecodeError {
    #[error("Malformed event payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{event_type} event is missing `{field}`")]
    MissingField {
        event_type: String,
        field: &'static str,
    },
}

/// Event transport errors (subscription and acknowledgement).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Subscription is closed")]
    Closed,

    #[error("Consumer group no longer exists, subscription must be reopened")]
    GroupMissing,
}

/// Outbound event failures.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Outbound event queue is full")]
    QueueFull,

    #[error("Outbound event queue is closed")]
    Closed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),
}

/// Invalid configuration values.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}
