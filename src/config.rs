//! Cache, consumer and publisher configuration

use std::time::Duration;

use crate::error::ConfigError;

/// Time-to-live policy for the typed caches
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL of `team:{teamId}:members`
    pub team_ttl: Duration,
    /// TTL of `{assetType}:{assetId}` snapshots
    pub asset_ttl: Duration,
    /// TTL of `asset:{assetId}:acl`. Kept shorter than the metadata TTL.
    pub acl_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            team_ttl: Duration::from_secs(24 * 60 * 60),
            asset_ttl: Duration::from_secs(24 * 60 * 60),
            acl_ttl: Duration::from_secs(60 * 60),
        }
    }
}

/// Names of the two event streams
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub team_activity: String,
    pub asset_changes: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            team_activity: "team.activity".to_owned(),
            asset_changes: "asset.changes".to_owned(),
        }
    }
}

/// Subscription settings for the cache-updater consumers
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Consumer group; distinct from other readers of the same streams (e.g. auditing)
    pub group: String,
    /// Stable consumer name within the group, so a restart reclaims its own pending deliveries
    pub consumer_name: String,
    /// How long a single receive blocks before returning idle
    pub block_timeout: Duration,
    /// First delay after a transport error
    pub retry_backoff: Duration,
    /// Upper bound for the transport error delay
    pub max_retry_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group: "cache-updater".to_owned(),
            consumer_name: "cache-updater-1".to_owned(),
            block_timeout: Duration::from_secs(2),
            retry_backoff: Duration::from_millis(100),
            max_retry_backoff: Duration::from_secs(5),
        }
    }
}

/// Outbound queue and retry settings
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub queue_capacity: usize,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Approximate `MAXLEN` applied on every `XADD`
    pub stream_max_len: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            stream_max_len: 100_000,
        }
    }
}

/// Whether a note inherits permissions granted on its folder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NotePermissionPolicy {
    /// Only the note's own owner and shares count
    #[default]
    Direct,
    /// The parent folder's owner and shares also apply to the note
    InheritFromFolder,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Process-level configuration for the cache-updater binary
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub redis_url: String,
    pub cache: CacheConfig,
    pub streams: StreamConfig,
    pub consumer: ConsumerConfig,
    pub publisher: PublisherConfig,
    pub note_policy: NotePermissionPolicy,
    pub log_format: LogFormat,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379/".to_owned(),
            cache: CacheConfig::default(),
            streams: StreamConfig::default(),
            consumer: ConsumerConfig::default(),
            publisher: PublisherConfig::default(),
            note_policy: NotePermissionPolicy::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from the environment (and a `.env` file if present).
    ///
    /// Environment variables:
    /// - `SHARECACHE_REDIS_URL` (falls back to `REDIS_URL`)
    /// - `SHARECACHE_TEAM_TTL_SECS`, `SHARECACHE_ASSET_TTL_SECS`, `SHARECACHE_ACL_TTL_SECS`
    /// - `SHARECACHE_TEAM_STREAM`, `SHARECACHE_ASSET_STREAM`
    /// - `SHARECACHE_CONSUMER_GROUP`, `SHARECACHE_CONSUMER_NAME`, `SHARECACHE_BLOCK_MS`
    /// - `SHARECACHE_PUBLISH_QUEUE`, `SHARECACHE_PUBLISH_ATTEMPTS`, `SHARECACHE_STREAM_MAX_LEN`
    /// - `SHARECACHE_NOTE_POLICY`: `direct` or `inherit`
    /// - `SHARECACHE_LOG_FORMAT`: `pretty` or `json`
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("SHARECACHE_REDIS_URL").or_else(|| lookup("REDIS_URL")) {
            config.redis_url = url;
        }

        if let Some(secs) = parse_var::<u64, _>(&lookup, "SHARECACHE_TEAM_TTL_SECS")? {
            config.cache.team_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "SHARECACHE_ASSET_TTL_SECS")? {
            config.cache.asset_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "SHARECACHE_ACL_TTL_SECS")? {
            config.cache.acl_ttl = Duration::from_secs(secs);
        }

        if let Some(name) = lookup("SHARECACHE_TEAM_STREAM") {
            config.streams.team_activity = name;
        }
        if let Some(name) = lookup("SHARECACHE_ASSET_STREAM") {
            config.streams.asset_changes = name;
        }

        if let Some(group) = lookup("SHARECACHE_CONSUMER_GROUP") {
            config.consumer.group = group;
        }
        if let Some(name) = lookup("SHARECACHE_CONSUMER_NAME") {
            config.consumer.consumer_name = name;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "SHARECACHE_BLOCK_MS")? {
            config.consumer.block_timeout = Duration::from_millis(ms);
        }

        if let Some(capacity) = parse_var::<usize, _>(&lookup, "SHARECACHE_PUBLISH_QUEUE")? {
            config.publisher.queue_capacity = capacity.max(1);
        }
        if let Some(attempts) = parse_var::<u32, _>(&lookup, "SHARECACHE_PUBLISH_ATTEMPTS")? {
            config.publisher.max_attempts = attempts.max(1);
        }
        if let Some(max_len) = parse_var::<usize, _>(&lookup, "SHARECACHE_STREAM_MAX_LEN")? {
            config.publisher.stream_max_len = max_len;
        }

        if let Some(policy) = lookup("SHARECACHE_NOTE_POLICY") {
            config.note_policy = match policy.to_ascii_lowercase().as_str() {
                "direct" => NotePermissionPolicy::Direct,
                "inherit" => NotePermissionPolicy::InheritFromFolder,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "SHARECACHE_NOTE_POLICY",
                        expected: "`direct` or `inherit`",
                        value: policy,
                    });
                }
            };
        }

        if let Some(format) = lookup("SHARECACHE_LOG_FORMAT") {
            config.log_format = match format.to_ascii_lowercase().as_str() {
                "pretty" => LogFormat::Pretty,
                "json" => LogFormat::Json,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "SHARECACHE_LOG_FORMAT",
                        expected: "`pretty` or `json`",
                        value: format,
                    });
                }
            };
        }

        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                var,
                expected: "a non-negative integer",
                value,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_keep_acl_ttl_shorter() {
        let config = ServiceConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.cache.team_ttl, Duration::from_secs(86_400));
        assert_eq!(config.cache.asset_ttl, Duration::from_secs(86_400));
        assert_eq!(config.cache.acl_ttl, Duration::from_secs(3_600));
        assert_eq!(config.streams.team_activity, "team.activity");
        assert_eq!(config.note_policy, NotePermissionPolicy::Direct);
    }

    #[test]
    fn test_overrides() {
        let config = ServiceConfig::from_lookup(lookup_from(&[
            ("REDIS_URL", "redis://cache:6379/"),
            ("SHARECACHE_ACL_TTL_SECS", "60"),
            ("SHARECACHE_CONSUMER_GROUP", "cache-updater-eu"),
            ("SHARECACHE_NOTE_POLICY", "inherit"),
            ("SHARECACHE_LOG_FORMAT", "JSON"),
        ]))
        .unwrap();

        assert_eq!(config.redis_url, "redis://cache:6379/");
        assert_eq!(config.cache.acl_ttl, Duration::from_secs(60));
        assert_eq!(config.consumer.group, "cache-updater-eu");
        assert_eq!(config.note_policy, NotePermissionPolicy::InheritFromFolder);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = ServiceConfig::from_lookup(lookup_from(&[("SHARECACHE_BLOCK_MS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("SHARECACHE_BLOCK_MS"));
    }
}
