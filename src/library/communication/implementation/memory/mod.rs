//! In-process broker with the semantics of an AMQP topic exchange
//!
//! Used by tests and single-process deployments. Each [`MemoryBroker`] answers to exactly
//! one URL and acts as the [`Connector`] for it. Connections may be severed forcibly and
//! the broker may be taken offline to simulate outages.

mod state;

use super::super::channel::{
    closed_signal, Channel, Connector, Delivery, PublishProperties, QueueOptions,
};
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::channel::mpsc::unbounded;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;
use state::{lock, ConnectionId, SharedState, State};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};

/// URL under which the default in-memory broker is reachable
pub const MEMORY_BROKER_URL: &str = "memory://local";

/// Errors returned by the in-memory broker
#[derive(Error, Debug)]
pub enum MemoryBrokerError {
    /// No broker listens on the given URL
    #[error("no broker reachable at {0}")]
    Unreachable(String),
    /// Broker has been taken offline
    #[error("broker is unavailable")]
    Unavailable,
    /// Operation on a connection that has been closed
    #[error("connection is closed")]
    ConnectionClosed,
    /// Exchange has not been declared
    #[error("exchange {0} does not exist")]
    UnknownExchange(String),
    /// Queue has not been declared or was deleted
    #[error("queue {0} does not exist")]
    UnknownQueue(String),
    /// Exclusive queue is owned by another connection
    #[error("queue {0} is locked by another connection")]
    ResourceLocked(String),
    /// Delivery has already been settled or its connection closed
    #[error("unknown delivery tag {0}")]
    UnknownDeliveryTag(u64),
}

/// Broker instance reachable through a single URL
#[derive(Clone)]
pub struct MemoryBroker {
    url: String,
    state: SharedState,
}

impl MemoryBroker {
    /// Creates an empty broker reachable at `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            state: SharedState::new(std::sync::Mutex::new(State::default())),
        }
    }

    /// URL under which the broker accepts connections
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Toggles whether new connections are accepted
    pub fn set_available(&self, available: bool) {
        lock(&self.state).available = available;
    }

    /// Closes all connections with the given name as if the network dropped
    ///
    /// Returns the number of severed connections.
    pub fn sever(&self, connection_name: &str) -> usize {
        let mut state = lock(&self.state);

        let ids: Vec<ConnectionId> = state
            .connections
            .iter()
            .filter(|(_, c)| c.name == connection_name)
            .map(|(id, _)| *id)
            .collect();

        for id in ids.iter() {
            state.close_connection(&self.state, *id, "connection reset by peer");
        }

        ids.len()
    }

    /// Number of messages waiting for a consumer
    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        lock(&self.state).queue_depth(queue)
    }

    /// Number of messages handed out but not yet settled
    pub fn unacked_count(&self, queue: &str) -> Option<usize> {
        lock(&self.state).unacked_count(queue)
    }

    /// Number of active consumers on a queue
    pub fn consumer_count(&self, queue: &str) -> Option<usize> {
        lock(&self.state).consumer_count(queue)
    }

    /// Number of open connections
    pub fn connection_count(&self) -> usize {
        lock(&self.state).connections.len()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(MEMORY_BROKER_URL)
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn connect(&self, url: &str, name: &str) -> Result<Arc<dyn Channel>, BoxedError> {
        if url != self.url {
            return Err(MemoryBrokerError::Unreachable(url.to_owned()).into());
        }

        let mut state = lock(&self.state);

        if !state.available {
            return Err(MemoryBrokerError::Unavailable.into());
        }

        let (id, closed) = state.open_connection(name);
        info!(connection = name, id, "Accepted connection");

        Ok(Arc::new(MemoryChannel {
            id,
            state: self.state.clone(),
            closed,
        }))
    }
}

struct MemoryChannel {
    id: ConnectionId,
    state: SharedState,
    closed: watch::Receiver<Option<String>>,
}

impl MemoryChannel {
    fn with_state<T, F>(&self, operation: F) -> Result<T, BoxedError>
    where
        F: FnOnce(&mut State) -> Result<T, MemoryBrokerError>,
    {
        let mut state = lock(&self.state);
        state.ensure_open(self.id)?;
        operation(&mut state).map_err(Into::into)
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn declare_exchange(&self, exchange: &str) -> EmptyResult {
        self.with_state(|state| {
            state.declare_exchange(exchange);
            Ok(())
        })
    }

    async fn declare_queue(&self, name: &str, options: &QueueOptions) -> Result<String, BoxedError> {
        self.with_state(|state| state.declare_queue(self.id, name, options))
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, pattern: &str) -> EmptyResult {
        self.with_state(|state| state.bind_queue(queue, exchange, pattern))
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        _properties: &PublishProperties,
    ) -> Result<bool, BoxedError> {
        self.with_state(|state| state.publish(&self.state, exchange, routing_key, body))?;
        Ok(true)
    }

    async fn send_to_queue(
        &self,
        queue: &str,
        body: &[u8],
        _properties: &PublishProperties,
    ) -> Result<bool, BoxedError> {
        self.with_state(|state| {
            state.enqueue(&self.state, queue, queue, body);
            Ok(())
        })?;
        Ok(true)
    }

    async fn consume(
        &self,
        queue: &str,
        prefetch: usize,
    ) -> Result<BoxStream<'static, Delivery>, BoxedError> {
        let (sender, receiver) = unbounded();
        self.with_state(|state| state.add_consumer(&self.state, self.id, queue, prefetch, sender))?;
        debug!(queue, prefetch, "Registered consumer");
        Ok(receiver.boxed())
    }

    async fn close(&self) -> EmptyResult {
        lock(&self.state).close_connection(&self.state, self.id, "closed by client");
        Ok(())
    }

    fn closed(&self) -> BoxFuture<'static, String> {
        closed_signal(self.closed.clone())
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use futures::poll;
    use pretty_assertions::assert_eq;

    const EXCHANGE: &str = "test_events";

    async fn open(broker: &MemoryBroker, name: &str) -> Arc<dyn Channel> {
        let channel = broker.connect(broker.url(), name).await.unwrap();
        channel.declare_exchange(EXCHANGE).await.unwrap();
        channel
    }

    async fn bound_queue(channel: &Arc<dyn Channel>, name: &str, pattern: &str) -> String {
        let queue = channel
            .declare_queue(name, &QueueOptions::durable())
            .await
            .unwrap();
        channel.bind_queue(&queue, EXCHANGE, pattern).await.unwrap();
        queue
    }

    async fn publish(channel: &Arc<dyn Channel>, routing_key: &str, body: &[u8]) {
        channel
            .publish(EXCHANGE, routing_key, body, &PublishProperties::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn refuse_foreign_urls() {
        let broker = MemoryBroker::default();
        assert!(broker.connect("memory://elsewhere", "t").await.is_err());
    }

    #[tokio::test]
    async fn refuse_connections_while_unavailable() {
        let broker = MemoryBroker::default();
        broker.set_available(false);
        assert!(broker.connect(MEMORY_BROKER_URL, "t").await.is_err());

        broker.set_available(true);
        assert!(broker.connect(MEMORY_BROKER_URL, "t").await.is_ok());
    }

    #[tokio::test]
    async fn route_by_topic() {
        let broker = MemoryBroker::default();
        let channel = open(&broker, "t").await;
        let exact = bound_queue(&channel, "exact", "admin.auth.getMe").await;
        let wildcard = bound_queue(&channel, "wildcard", "admin.#").await;
        let other = bound_queue(&channel, "other", "user.auth.getUsers").await;

        publish(&channel, "admin.auth.getMe", b"{}").await;

        assert_eq!(broker.queue_depth(&exact), Some(1));
        assert_eq!(broker.queue_depth(&wildcard), Some(1));
        assert_eq!(broker.queue_depth(&other), Some(0));
    }

    #[tokio::test]
    async fn redeliver_nacked_messages() {
        let broker = MemoryBroker::default();
        let channel = open(&broker, "t").await;
        let queue = bound_queue(&channel, "q", "t.echo").await;
        publish(&channel, "t.echo", b"first").await;

        let mut deliveries = channel.consume(&queue, 1).await.unwrap();

        let delivery = deliveries.next().await.unwrap();
        assert_eq!(delivery.attempt, 1);
        assert!(!delivery.is_redelivery());
        delivery.nack(true).await.unwrap();

        let delivery = deliveries.next().await.unwrap();
        assert_eq!(delivery.body, b"first");
        assert_eq!(delivery.attempt, 2);
        delivery.ack().await.unwrap();

        assert_eq!(broker.queue_depth(&queue), Some(0));
        assert_eq!(broker.unacked_count(&queue), Some(0));
    }

    #[tokio::test]
    async fn honor_prefetch() {
        let broker = MemoryBroker::default();
        let channel = open(&broker, "t").await;
        let queue = bound_queue(&channel, "q", "t.echo").await;

        for _ in 0..3 {
            publish(&channel, "t.echo", b"{}").await;
        }

        let mut deliveries = channel.consume(&queue, 2).await.unwrap();
        let first = deliveries.next().await.unwrap();
        let _second = deliveries.next().await.unwrap();

        assert!(poll!(deliveries.next()).is_pending());
        assert_eq!(broker.queue_depth(&queue), Some(1));

        first.ack().await.unwrap();
        assert!(deliveries.next().await.is_some());
    }

    #[tokio::test]
    async fn requeue_unacked_messages_when_severed() {
        let broker = MemoryBroker::default();
        let producer = open(&broker, "producer").await;
        let queue = bound_queue(&producer, "durable", "t.echo").await;
        let consumer = open(&broker, "consumer").await;

        publish(&producer, "t.echo", b"{}").await;

        let mut deliveries = consumer.consume(&queue, 10).await.unwrap();
        let delivery = deliveries.next().await.unwrap();

        assert_eq!(broker.sever("consumer"), 1);

        assert_eq!(consumer.closed().await, "connection reset by peer");
        assert!(deliveries.next().await.is_none());
        assert!(delivery.ack().await.is_err());
        assert_eq!(broker.queue_depth(&queue), Some(1));
        assert!(consumer.declare_exchange(EXCHANGE).await.is_err());
    }

    #[tokio::test]
    async fn delete_exclusive_queues_on_close() {
        let broker = MemoryBroker::default();
        let channel = open(&broker, "t").await;
        let other = open(&broker, "other").await;

        let queue = channel
            .declare_queue("", &QueueOptions::exclusive())
            .await
            .unwrap();

        assert!(queue.starts_with("amq.gen-"));
        assert!(other.consume(&queue, 1).await.is_err());

        channel.close().await.unwrap();

        assert_eq!(broker.queue_depth(&queue), None);
        assert_eq!(broker.connection_count(), 1);
    }

    #[tokio::test]
    async fn drop_messages_for_missing_queues() {
        let broker = MemoryBroker::default();
        let channel = open(&broker, "t").await;

        let accepted = channel
            .send_to_queue("amq.gen-gone", b"{}", &PublishProperties::default())
            .await
            .unwrap();

        assert!(accepted);
    }
}
