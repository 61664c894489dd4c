//! Cache-updater consumer
//!
//! One [`EventConsumer`] runs per topic. It applies each event to the caches
//! before acknowledging it, one at a time, which keeps same-key events in
//! order within a topic. Team and asset loops run independently; they touch
//! disjoint key spaces so their relative order does not matter.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acl_cache::AclCache;
use crate::asset_cache::AssetMetadataCache;
use crate::config::{CacheConfig, ConsumerConfig};
use crate::error::TransportError;
use crate::event::{DomainEvent, EventType, Topic};
use crate::publisher::next_backoff;
use crate::source::{Delivery, EventSource};
use crate::store::CacheStore;
use crate::team_cache::TeamMembershipCache;

/// Applies decoded events to the three caches.
///
/// Every handler is idempotent, so redelivery after a crash is harmless.
#[derive(Clone)]
pub struct CacheUpdater {
    team: TeamMembershipCache,
    assets: AssetMetadataCache,
    acl: AclCache,
}

impl CacheUpdater {
    pub fn new(team: TeamMembershipCache, assets: AssetMetadataCache, acl: AclCache) -> Self {
        Self { team, assets, acl }
    }

    /// Build all three adapters over one shared store.
    pub fn from_store(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self {
            team: TeamMembershipCache::new(Arc::clone(&store), config),
            assets: AssetMetadataCache::new(Arc::clone(&store), config),
            acl: AclCache::new(store, config),
        }
    }

    /// Apply an event received on `topic`.
    pub async fn apply(&self, topic: Topic, event: &DomainEvent) {
        match topic {
            Topic::TeamActivity => self.apply_team_event(event).await,
            Topic::AssetChanges => self.apply_asset_event(event).await,
        }
    }

    pub async fn apply_team_event(&self, event: &DomainEvent) {
        let (Some(team_id), Some(user_id)) = (event.team_id, event.target_user_id) else {
            debug!(event_type = %event.event_type, "Team event without member, ignoring");
            return;
        };
        match event.event_type {
            EventType::MemberAdded => self.team.add_member(team_id, user_id).await,
            EventType::MemberRemoved => self.team.remove_member(team_id, user_id).await,
            other => debug!(event_type = %other, team_id = %team_id, "No cache effect"),
        }
    }

    pub async fn apply_asset_event(&self, event: &DomainEvent) {
        if let Some(asset_id) = event.asset_id
            && (event.event_type.is_sharing_change() || event.event_type.is_deletion())
        {
            self.acl.invalidate(asset_id).await;
        }
        match event.asset_ref() {
            Some(asset) => self.assets.invalidate(asset).await,
            None => debug!(event_type = %event.event_type, "Asset event without asset reference"),
        }
    }
}

/// Lifecycle of a consumer loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Starting,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: u64,
    pub applied: u64,
    pub decode_failures: u64,
    pub transport_errors: u64,
}

pub struct EventConsumer<S> {
    source: S,
    topic: Topic,
    updater: CacheUpdater,
    config: ConsumerConfig,
    cancel: CancellationToken,
    state: watch::Sender<ConsumerState>,
    stats: ConsumerStats,
}

impl<S: EventSource> EventConsumer<S> {
    pub fn new(
        source: S,
        topic: Topic,
        updater: CacheUpdater,
        config: ConsumerConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Starting);
        Self {
            source,
            topic,
            updater,
            config,
            cancel,
            state,
            stats: ConsumerStats::default(),
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Run until cancelled or the source closes for good.
    pub async fn run(mut self) -> ConsumerStats {
        let name = self.source.name().to_owned();
        self.set_state(ConsumerState::Starting);

        if self.open().await {
            self.set_state(ConsumerState::Running);
            info!(source = %name, topic = %self.topic, "Consumer running");
            self.receive_loop(&name).await;
        }

        self.set_state(ConsumerState::Draining);
        self.source.close().await;
        self.set_state(ConsumerState::Stopped);
        info!(
            source = %name,
            received = self.stats.received,
            applied = self.stats.applied,
            decode_failures = self.stats.decode_failures,
            transport_errors = self.stats.transport_errors,
            "Consumer stopped"
        );
        self.stats
    }

    /// Open the subscription, retrying with backoff. `false` if cancelled first.
    async fn open(&mut self) -> bool {
        let mut backoff = self.config.retry_backoff;
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            match self.source.open().await {
                Ok(()) => return true,
                Err(e) => {
                    self.stats.transport_errors += 1;
                    warn!(
                        source = %self.source.name(),
                        error = %e,
                        "Failed to open subscription, retrying in {:?}",
                        backoff
                    );
                }
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = next_backoff(backoff, self.config.max_retry_backoff);
        }
    }

    async fn receive_loop(&mut self, name: &str) {
        let mut backoff = self.config.retry_backoff;
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            // Only the receive is raced; a dropped receive is redelivered
            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                received = self.source.receive() => received,
            };

            match received {
                Ok(Some(delivery)) => {
                    backoff = self.config.retry_backoff;
                    self.handle(delivery).await;
                }
                Ok(None) => {}
                Err(TransportError::Closed) => {
                    info!(source = %name, "Subscription closed by transport");
                    break;
                }
                Err(TransportError::GroupMissing) => {
                    self.stats.transport_errors += 1;
                    warn!(source = %name, "Consumer group disappeared, reopening subscription");
                    self.set_state(ConsumerState::Starting);
                    if !self.open().await {
                        break;
                    }
                    self.set_state(ConsumerState::Running);
                }
                Err(e) => {
                    self.stats.transport_errors += 1;
                    warn!(source = %name, error = %e, "Receive failed, retrying in {:?}", backoff);
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = next_backoff(backoff, self.config.max_retry_backoff);
                }
            }
        }
        debug!(source = %name, "Leaving receive loop");
    }

    async fn handle(&mut self, delivery: Delivery) {
        self.stats.received += 1;
        match DomainEvent::decode(&delivery.payload) {
            Ok(event) => {
                // The event type decides which caches it touches
                let topic = match event.event_type {
                    EventType::Unknown => self.topic,
                    known => known.topic(),
                };
                if topic != self.topic {
                    warn!(
                        delivery_id = %delivery.id,
                        event_type = %event.event_type,
                        topic = %self.topic,
                        "Event arrived on an unexpected topic"
                    );
                }
                self.updater.apply(topic, &event).await;
                self.stats.applied += 1;
            }
            Err(e) => {
                self.stats.decode_failures += 1;
                warn!(delivery_id = %delivery.id, error = %e, "Skipping undecodable event");
            }
        }

        if let Err(e) = self.source.ack(&delivery.id).await {
            self.stats.transport_errors += 1;
            warn!(delivery_id = %delivery.id, error = %e, "Ack failed, event will be redelivered");
        }
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.send_replace(state);
    }
}

/// Handle to a consumer running on its own task
pub struct ConsumerHandle {
    state: watch::Receiver<ConsumerState>,
    task: JoinHandle<ConsumerStats>,
}

impl ConsumerHandle {
    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.clone()
    }

    pub async fn join(self) -> Result<ConsumerStats, JoinError> {
        self.task.await
    }
}

pub fn spawn_consumer<S: EventSource>(
    source: S,
    topic: Topic,
    updater: CacheUpdater,
    config: ConsumerConfig,
    cancel: CancellationToken,
) -> ConsumerHandle {
    let consumer = EventConsumer::new(source, topic, updater, config, cancel);
    let state = consumer.subscribe_state();
    let task = tokio::spawn(consumer.run());
    ConsumerHandle { state, task }
}
