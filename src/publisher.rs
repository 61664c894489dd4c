//! Outbound domain events
//!
//! Mutation paths never publish inline. They push onto a bounded
//! [`PublishQueue`] and a single worker task delivers events in enqueue
//! order, retrying each one with capped exponential backoff.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{PublisherConfig, StreamConfig};
use crate::error::PublishError;
use crate::event::{DomainEvent, Topic};
use crate::source::PAYLOAD_FIELD;

#[async_trait]
pub trait EventPublisher: Send + Sync + 'static {
    async fn publish(&self, topic: Topic, event: &DomainEvent) -> Result<(), PublishError>;
}

/// Appends events to the Redis stream of their topic
pub struct RedisStreamPublisher {
    conn: ConnectionManager,
    streams: StreamConfig,
    max_len: usize,
}

impl RedisStreamPublisher {
    pub async fn connect(
        client: redis::Client,
        streams: StreamConfig,
        config: &PublisherConfig,
    ) -> Result<Self, redis::RedisError> {
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            streams,
            max_len: config.stream_max_len,
        })
    }

    fn stream(&self, topic: Topic) -> &str {
        match topic {
            Topic::TeamActivity => &self.streams.team_activity,
            Topic::AssetChanges => &self.streams.asset_changes,
        }
    }
}

#[async_trait]
impl EventPublisher for RedisStreamPublisher {
    async fn publish(&self, topic: Topic, event: &DomainEvent) -> Result<(), PublishError> {
        let payload = event.encode()?;
        let stream = self.stream(topic);

        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream);
        // 0 disables trimming
        if self.max_len > 0 {
            cmd.arg("MAXLEN").arg("~").arg(self.max_len);
        }
        cmd.arg("*").arg(PAYLOAD_FIELD).arg(payload);
        if let Some(key) = event.partition_key() {
            cmd.arg("key").arg(key);
        }

        let mut conn = self.conn.clone();
        let id: String = cmd.query_async(&mut conn).await?;
        debug!(stream = %stream, id = %id, event_type = %event.event_type, "Event appended");
        Ok(())
    }
}

/// Publishes into in-process channels, one per topic. Pairs with
/// [`ChannelSource`](crate::source::ChannelSource).
#[derive(Clone)]
pub struct ChannelPublisher {
    team_activity: mpsc::Sender<Vec<u8>>,
    asset_changes: mpsc::Sender<Vec<u8>>,
}

impl ChannelPublisher {
    pub fn new(team_activity: mpsc::Sender<Vec<u8>>, asset_changes: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            team_activity,
            asset_changes,
        }
    }
}

#[async_trait]
impl EventPublisher for ChannelPublisher {
    async fn publish(&self, topic: Topic, event: &DomainEvent) -> Result<(), PublishError> {
        let payload = event.encode()?;
        let tx = match topic {
            Topic::TeamActivity => &self.team_activity,
            Topic::AssetChanges => &self.asset_changes,
        };
        tx.send(payload).await.map_err(|_| PublishError::Closed)
    }
}

/// Producer side of the outbound event queue
#[derive(Clone)]
pub struct PublishQueue {
    tx: mpsc::Sender<DomainEvent>,
}

impl PublishQueue {
    /// Queue an event for delivery on its topic. Never waits.
    pub fn enqueue(&self, event: DomainEvent) -> Result<(), PublishError> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(event) => {
                warn!(event_type = %event.event_type, "Outbound event queue full, rejecting event");
                PublishError::QueueFull
            }
            TrySendError::Closed(_) => PublishError::Closed,
        })
    }
}

/// Outcome counters of a publish worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub published: u64,
    /// Events dropped after exhausting their attempts
    pub failed: u64,
}

/// Start the worker that drains the outbound queue.
///
/// After `cancel` fires the worker stops accepting new events, delivers what
/// is already queued and returns its stats.
pub fn spawn_publish_worker<P>(
    publisher: P,
    config: PublisherConfig,
    cancel: CancellationToken,
) -> (PublishQueue, JoinHandle<PublishStats>)
where
    P: EventPublisher,
{
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let handle = tokio::spawn(run_worker(publisher, config, rx, cancel));
    (PublishQueue { tx }, handle)
}

async fn run_worker<P: EventPublisher>(
    publisher: P,
    config: PublisherConfig,
    mut rx: mpsc::Receiver<DomainEvent>,
    cancel: CancellationToken,
) -> PublishStats {
    let mut stats = PublishStats::default();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(event) => deliver(&publisher, &config, event, &mut stats).await,
                None => {
                    debug!("All publish queue handles dropped");
                    return stats;
                }
            },
        }
    }

    rx.close();
    let mut drained = 0usize;
    while let Some(event) = rx.recv().await {
        deliver(&publisher, &config, event, &mut stats).await;
        drained += 1;
    }
    info!(
        drained,
        published = stats.published,
        failed = stats.failed,
        "Publish worker stopped"
    );
    stats
}

async fn deliver<P: EventPublisher>(
    publisher: &P,
    config: &PublisherConfig,
    event: DomainEvent,
    stats: &mut PublishStats,
) {
    let topic = event.topic();
    let max_attempts = config.max_attempts.max(1);
    let mut backoff = config.initial_backoff;

    for attempt in 1..=max_attempts {
        match publisher.publish(topic, &event).await {
            Ok(()) => {
                stats.published += 1;
                return;
            }
            Err(PublishError::Serialization(e)) => {
                error!(event_type = %event.event_type, error = %e, "Event cannot be serialized, dropping");
                break;
            }
            Err(e) if attempt < max_attempts => {
                warn!(
                    event_type = %event.event_type,
                    %topic,
                    attempt,
                    error = %e,
                    "Publish failed, retrying in {:?}",
                    backoff
                );
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff, config.max_backoff);
            }
            Err(e) => {
                error!(
                    event_type = %event.event_type,
                    %topic,
                    attempts = max_attempts,
                    error = %e,
                    "Publish failed, giving up on event"
                );
            }
        }
    }
    stats.failed += 1;
}

pub(crate) fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{AssetChange, EventType};
    use crate::ids::AssetRef;
    use crate::source::{EventSource, channel_source};
    use crate::test_support::{asset, team, user};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls
    struct FlakyPublisher {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl EventPublisher for FlakyPublisher {
        async fn publish(&self, _topic: Topic, _event: &DomainEvent) -> Result<(), PublishError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(PublishError::Closed)
            } else {
                Ok(())
            }
        }
    }

    fn member_added(n: u128) -> DomainEvent {
        DomainEvent::team(EventType::MemberAdded, team(1), user(1), Some(user(n)))
    }

    #[test]
    fn test_backoff_is_capped() {
        let max = Duration::from_secs(2);
        let mut backoff = Duration::from_millis(100);
        for _ in 0..10 {
            backoff = next_backoff(backoff, max);
        }
        assert_eq!(backoff, max);
    }

    #[tokio::test]
    async fn test_events_arrive_in_enqueue_order() {
        let (team_tx, mut team_source) = channel_source("team", 16);
        let (asset_tx, mut asset_source) = channel_source("asset", 16);
        let cancel = CancellationToken::new();
        let (queue, worker) = spawn_publish_worker(
            ChannelPublisher::new(team_tx, asset_tx),
            PublisherConfig::default(),
            cancel.clone(),
        );

        for n in 2..5 {
            queue.enqueue(member_added(n)).unwrap();
        }
        queue
            .enqueue(DomainEvent::asset(
                AssetChange::Updated,
                AssetRef::folder(asset(1)),
                user(1),
                user(1),
                None,
            ))
            .unwrap();

        for n in 2..5 {
            let delivery = team_source.receive().await.unwrap().unwrap();
            let event = DomainEvent::decode(&delivery.payload).unwrap();
            assert_eq!(event.target_user_id, Some(user(n)));
        }
        let delivery = asset_source.receive().await.unwrap().unwrap();
        let event = DomainEvent::decode(&delivery.payload).unwrap();
        assert_eq!(event.event_type, EventType::FolderUpdated);

        cancel.cancel();
        let stats = worker.await.unwrap();
        assert_eq!(stats.published, 4);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let cancel = CancellationToken::new();
        let (queue, worker) = spawn_publish_worker(
            FlakyPublisher {
                failures: 2,
                calls: AtomicU32::new(0),
            },
            PublisherConfig::default(),
            cancel.clone(),
        );

        queue.enqueue(member_added(2)).unwrap();
        drop(queue);

        let stats = worker.await.unwrap();
        assert_eq!(stats, PublishStats { published: 1, failed: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_events_are_counted() {
        let cancel = CancellationToken::new();
        let config = PublisherConfig {
            max_attempts: 3,
            ..PublisherConfig::default()
        };
        let (queue, worker) = spawn_publish_worker(
            FlakyPublisher {
                failures: u32::MAX,
                calls: AtomicU32::new(0),
            },
            config,
            cancel.clone(),
        );

        queue.enqueue(member_added(2)).unwrap();
        drop(queue);

        let stats = worker.await.unwrap();
        assert_eq!(stats, PublishStats { published: 0, failed: 1 });
    }

    #[tokio::test]
    async fn test_full_queue_is_reported() {
        let cancel = CancellationToken::new();
        let config = PublisherConfig {
            queue_capacity: 1,
            ..PublisherConfig::default()
        };
        let (queue, worker) = spawn_publish_worker(
            FlakyPublisher {
                failures: 0,
                calls: AtomicU32::new(0),
            },
            config,
            cancel.clone(),
        );

        // The worker has not been polled yet on the single-threaded test runtime
        queue.enqueue(member_added(2)).unwrap();
        assert!(matches!(
            queue.enqueue(member_added(3)),
            Err(PublishError::QueueFull)
        ));

        cancel.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_drains_queued_events_then_closes() {
        let cancel = CancellationToken::new();
        let (queue, worker) = spawn_publish_worker(
            FlakyPublisher {
                failures: 0,
                calls: AtomicU32::new(0),
            },
            PublisherConfig::default(),
            cancel.clone(),
        );

        for n in 2..5 {
            queue.enqueue(member_added(n)).unwrap();
        }
        cancel.cancel();

        let stats = worker.await.unwrap();
        assert_eq!(stats.published, 3);
        assert!(matches!(
            queue.enqueue(member_added(9)),
            Err(PublishError::Closed)
        ));
    }
}
