//! Event subscriptions
//!
//! An [`EventSource`] yields raw deliveries for one topic on behalf of one
//! consumer group. Deliveries stay pending until acknowledged, so a
//! subscription that is dropped mid-receive, or a process that dies before
//! `ack`, sees the same delivery again later.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::StreamReadReply;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ConsumerConfig;
use crate::error::TransportError;

/// Field of a stream entry that carries the JSON event
pub const PAYLOAD_FIELD: &str = "payload";

/// One message handed to the consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: String,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait EventSource: Send + 'static {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Join the consumer group, resuming from its last acknowledged position.
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Wait for the next delivery. `Ok(None)` means nothing arrived in time.
    ///
    /// Must be safe to cancel: a delivery lost to cancellation is redelivered.
    /// [`TransportError::GroupMissing`] asks the caller to `open` again.
    async fn receive(&mut self) -> Result<Option<Delivery>, TransportError>;

    /// Commit a processed delivery.
    async fn ack(&mut self, delivery_id: &str) -> Result<(), TransportError>;

    /// Release the subscription.
    async fn close(&mut self);
}

enum ReadCursor {
    /// Replaying this consumer's unacknowledged deliveries after the given id
    Pending(String),
    /// Reading entries never delivered to the group
    New,
}

/// Redis Streams consumer-group subscription
pub struct RedisStreamSource {
    client: redis::Client,
    conn: Option<MultiplexedConnection>,
    stream: String,
    group: String,
    consumer: String,
    block: Duration,
    cursor: ReadCursor,
    closed: bool,
}

impl RedisStreamSource {
    pub fn new(client: redis::Client, stream: impl Into<String>, config: &ConsumerConfig) -> Self {
        Self {
            client,
            conn: None,
            stream: stream.into(),
            group: config.group.clone(),
            consumer: config.consumer_name.clone(),
            block: config.block_timeout,
            cursor: ReadCursor::Pending("0".to_owned()),
            closed: false,
        }
    }

    async fn connection(&mut self) -> Result<&mut MultiplexedConnection, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.conn.is_none() {
            let conn = self.client.get_multiplexed_async_connection().await?;
            // Anything delivered on the previous connection may still be unacknowledged
            self.cursor = ReadCursor::Pending("0".to_owned());
            self.conn = Some(conn);
        }
        self.conn.as_mut().ok_or(TransportError::Closed)
    }

    async fn read_one(&mut self) -> Result<Option<Delivery>, TransportError> {
        // Connect first: a reconnect rewinds the cursor to the pending list
        self.connection().await?;
        let (start_id, block) = match &self.cursor {
            ReadCursor::Pending(last) => (last.clone(), None),
            ReadCursor::New => (">".to_owned(), Some(self.block)),
        };

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(1);
        if let Some(block) = block {
            cmd.arg("BLOCK").arg(block.as_millis() as u64);
        }
        cmd.arg("STREAMS").arg(&self.stream).arg(&start_id);

        let conn = self.conn.as_mut().ok_or(TransportError::Closed)?;
        let reply: Option<StreamReadReply> = match cmd.query_async(conn).await {
            Ok(reply) => reply,
            // Stream or group deleted underneath us (flush, restart without persistence)
            Err(e) if e.code() == Some("NOGROUP") => return Err(TransportError::GroupMissing),
            Err(e) => return Err(e.into()),
        };
        let entry = reply
            .and_then(|reply| reply.keys.into_iter().next())
            .and_then(|key| key.ids.into_iter().next());

        let Some(entry) = entry else {
            if matches!(self.cursor, ReadCursor::Pending(_)) {
                debug!(stream = %self.stream, "Pending backlog replayed, switching to new entries");
                self.cursor = ReadCursor::New;
            }
            return Ok(None);
        };

        if let ReadCursor::Pending(last) = &mut self.cursor {
            last.clone_from(&entry.id);
        }

        // Entries trimmed from the stream come back without fields; an empty
        // payload fails decoding and is acknowledged like any bad message.
        let payload = entry.get::<Vec<u8>>(PAYLOAD_FIELD).unwrap_or_default();
        Ok(Some(Delivery {
            id: entry.id,
            payload,
        }))
    }
}

#[async_trait]
impl EventSource for RedisStreamSource {
    fn name(&self) -> &str {
        &self.stream
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        self.closed = false;
        let stream = self.stream.clone();
        let group = self.group.clone();
        let conn = self.connection().await?;

        let created = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&stream)
            .arg(&group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async::<()>(conn)
            .await;
        match created {
            Ok(()) => info!(stream = %stream, group = %group, "Consumer group created"),
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!(stream = %stream, group = %group, "Consumer group already exists");
            }
            Err(e) => {
                self.conn = None;
                return Err(e.into());
            }
        }
        self.cursor = ReadCursor::Pending("0".to_owned());
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<Delivery>, TransportError> {
        match self.read_one().await {
            Ok(delivery) => Ok(delivery),
            Err(e) => {
                // Force a fresh connection on the next attempt
                self.conn = None;
                Err(e)
            }
        }
    }

    async fn ack(&mut self, delivery_id: &str) -> Result<(), TransportError> {
        let stream = self.stream.clone();
        let group = self.group.clone();
        let conn = self.connection().await?;
        redis::cmd("XACK")
            .arg(&stream)
            .arg(&group)
            .arg(delivery_id)
            .query_async::<i64>(conn)
            .await?;
        Ok(())
    }

    async fn close(&mut self) {
        self.conn = None;
        self.closed = true;
        info!(stream = %self.stream, consumer = %self.consumer, "Stream subscription closed");
    }
}

/// In-process subscription fed by a `tokio::sync::mpsc` channel
pub struct ChannelSource {
    name: String,
    rx: mpsc::Receiver<Vec<u8>>,
    next_id: u64,
    acked: Arc<AtomicUsize>,
}

/// Create a channel-backed source and the sender that feeds it.
pub fn channel_source(
    name: impl Into<String>,
    capacity: usize,
) -> (mpsc::Sender<Vec<u8>>, ChannelSource) {
    let (tx, rx) = mpsc::channel(capacity);
    let source = ChannelSource {
        name: name.into(),
        rx,
        next_id: 0,
        acked: Arc::new(AtomicUsize::new(0)),
    };
    (tx, source)
}

impl ChannelSource {
    /// Shared counter of acknowledged deliveries.
    pub fn ack_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.acked)
    }
}

#[async_trait]
impl EventSource for ChannelSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<Delivery>, TransportError> {
        match self.rx.recv().await {
            Some(payload) => {
                self.next_id += 1;
                Ok(Some(Delivery {
                    id: self.next_id.to_string(),
                    payload,
                }))
            }
            None => Err(TransportError::Closed),
        }
    }

    async fn ack(&mut self, _delivery_id: &str) -> Result<(), TransportError> {
        self.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) {
        self.rx.close();
        let dropped = std::iter::from_fn(|| self.rx.try_recv().ok()).count();
        if dropped > 0 {
            warn!(source = %self.name, dropped, "Closed channel source with undelivered messages");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_source_numbers_deliveries() {
        let (tx, mut source) = channel_source("test", 4);
        tx.send(b"a".to_vec()).await.unwrap();
        tx.send(b"b".to_vec()).await.unwrap();

        let first = source.receive().await.unwrap().unwrap();
        let second = source.receive().await.unwrap().unwrap();
        assert_eq!((first.id.as_str(), first.payload.as_slice()), ("1", &b"a"[..]));
        assert_eq!((second.id.as_str(), second.payload.as_slice()), ("2", &b"b"[..]));

        source.ack(&first.id).await.unwrap();
        assert_eq!(source.ack_counter().load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_channel_source_reports_closed() {
        let (tx, mut source) = channel_source("test", 1);
        drop(tx);
        assert!(matches!(source.receive().await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_stream_redelivers_unacked() {
        let client = redis::Client::open("redis://127.0.0.1:6379/").unwrap();
        let stream = "sharecache:test:stream";
        let config = ConsumerConfig {
            block_timeout: Duration::from_millis(100),
            ..ConsumerConfig::default()
        };

        let mut conn = client.get_multiplexed_async_connection().await.unwrap();
        redis::cmd("DEL")
            .arg(stream)
            .query_async::<()>(&mut conn)
            .await
            .unwrap();

        let mut source = RedisStreamSource::new(client.clone(), stream, &config);
        source.open().await.unwrap();
        redis::cmd("XADD")
            .arg(stream)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg("{}")
            .query_async::<String>(&mut conn)
            .await
            .unwrap();

        let mut first = None;
        for _ in 0..5 {
            if let Some(delivery) = source.receive().await.unwrap() {
                first = Some(delivery);
                break;
            }
        }
        let first = first.unwrap();
        source.close().await;

        // Same consumer name, never acked: replayed from the pending list
        let mut reopened = RedisStreamSource::new(client, stream, &config);
        reopened.open().await.unwrap();
        let again = reopened.receive().await.unwrap().unwrap();
        assert_eq!(again.id, first.id);
        reopened.ack(&again.id).await.unwrap();
        reopened.close().await;
    }
}
