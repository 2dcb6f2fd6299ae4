use super::super::super::channel::{Acknowledger, Delivery};
use super::channel::Link;
use super::{
    notify_if_disconnected, queue_key, RedisBrokerError, CONSUMER_GROUP, FIELD_DELIVERIES,
    FIELD_PAYLOAD, FIELD_ROUTING_KEY, STREAM_ID_NEW,
};
use crate::library::EmptyResult;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::StreamId;
use redis::{AsyncCommands, RedisResult};
use tokio::sync::OwnedSemaphorePermit;

/// Content of a single stream entry
pub(super) struct Message {
    pub(super) body: Vec<u8>,
    pub(super) routing_key: String,
    /// Number of times the message has been handed out before
    pub(super) deliveries: u32,
}

pub(super) fn parse(entry: &StreamId) -> Result<Message, RedisBrokerError> {
    let body: Vec<u8> = entry
        .get(FIELD_PAYLOAD)
        .ok_or_else(|| RedisBrokerError::MissingPayload(entry.id.clone()))?;

    Ok(Message {
        body,
        routing_key: entry.get(FIELD_ROUTING_KEY).unwrap_or_default(),
        deliveries: entry.get(FIELD_DELIVERIES).unwrap_or_default(),
    })
}

pub(super) async fn append(
    con: &mut MultiplexedConnection,
    queue: &str,
    routing_key: &str,
    body: &[u8],
    deliveries: u32,
) -> RedisResult<()> {
    let deliveries = deliveries.to_string();
    let fields: [(&str, &[u8]); 3] = [
        (FIELD_PAYLOAD, body),
        (FIELD_ROUTING_KEY, routing_key.as_bytes()),
        (FIELD_DELIVERIES, deliveries.as_bytes()),
    ];

    let _: String = con.xadd(queue_key(queue), STREAM_ID_NEW, &fields).await?;
    Ok(())
}

pub(super) async fn remove(con: &mut MultiplexedConnection, queue: &str, id: &str) -> RedisResult<()> {
    let key = queue_key(queue);
    let _: () = con.xack(&key, CONSUMER_GROUP, &[id]).await?;
    let _: () = con.xdel(&key, &[id]).await?;
    Ok(())
}

/// Puts a copy of the message at the end of the stream and removes the original
pub(super) async fn requeue(
    con: &mut MultiplexedConnection,
    queue: &str,
    id: &str,
    message: &Message,
) -> RedisResult<()> {
    append(con, queue, &message.routing_key, &message.body, message.deliveries + 1).await?;
    remove(con, queue, id).await
}

/// Wraps a stream entry into a [`Delivery`], holding a prefetch permit until it is settled
///
/// Entries `taken_over` from a vanished consumer have been handed out once more than their
/// stored count says.
pub(super) fn build(
    link: Link,
    queue: String,
    entry: StreamId,
    permit: OwnedSemaphorePermit,
    taken_over: bool,
) -> Result<Delivery, RedisBrokerError> {
    let mut message = parse(&entry)?;
    if taken_over {
        message.deliveries += 1;
    }

    let body = message.body.clone();
    let routing_key = message.routing_key.clone();
    let attempt = message.deliveries + 1;

    let acker = RedisAcknowledger {
        link,
        queue,
        id: entry.id,
        message,
        _permit: permit,
    };

    Ok(Delivery::new(body, routing_key, attempt, Box::new(acker)))
}

struct RedisAcknowledger {
    link: Link,
    queue: String,
    id: String,
    message: Message,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl Acknowledger for RedisAcknowledger {
    async fn ack(&self) -> EmptyResult {
        let mut con = self.link.connection();
        let result = remove(&mut con, &self.queue, &self.id).await;
        notify_if_disconnected!(self.link, result);
        Ok(result?)
    }

    async fn nack(&self, requeue_message: bool) -> EmptyResult {
        let mut con = self.link.connection();

        let result = if requeue_message {
            requeue(&mut con, &self.queue, &self.id, &self.message).await
        } else {
            remove(&mut con, &self.queue, &self.id).await
        };

        notify_if_disconnected!(self.link, result);
        Ok(result?)
    }
}
