//! Raw broker primitives which every transport implementation has to provide
//!
//! The model follows that of an AMQP broker with a single topic exchange:
//!
//! - Messages are published to an exchange with a routing key (the topic)
//! - Queues are bound to the exchange with a pattern and receive matching messages
//! - Consumers receive [`Deliveries`](Delivery) which have to be settled explicitly
//!
//! Everything above this layer only ever deals with bytes handed over by a [`Channel`].

use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::FutureExt;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Parameters for declaring a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOptions {
    /// Queue definition and enqueued messages survive broker restarts and disconnects
    pub durable: bool,
    /// Queue may only be used by the declaring connection
    pub exclusive: bool,
    /// Queue is deleted once the declaring connection closes
    pub auto_delete: bool,
}

impl QueueOptions {
    /// Options of a shared work queue
    pub fn durable() -> Self {
        Self {
            durable: true,
            exclusive: false,
            auto_delete: false,
        }
    }

    /// Options of a private, short-lived queue
    pub fn exclusive() -> Self {
        Self {
            durable: false,
            exclusive: true,
            auto_delete: true,
        }
    }

    /// Whether the queue lives and dies with its declaring connection
    pub fn is_transient(&self) -> bool {
        self.exclusive || self.auto_delete
    }
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self::durable()
    }
}

/// Properties attached to a published message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishProperties {
    /// Message should be written to disk while queued
    pub persistent: bool,
}

impl Default for PublishProperties {
    fn default() -> Self {
        Self { persistent: true }
    }
}

/// Settles a single delivery with the broker
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Removes the message from its queue
    async fn ack(&self) -> EmptyResult;

    /// Returns the message to its queue (`requeue`) or discards it
    async fn nack(&self, requeue: bool) -> EmptyResult;
}

/// Message handed to a consumer by the broker
pub struct Delivery {
    /// Raw message body
    pub body: Vec<u8>,
    /// Routing key the message was originally published with
    pub routing_key: String,
    /// Number of times this message has been handed out, starting at one
    pub attempt: u32,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    /// Creates a new instance from raw parts
    pub fn new(
        body: Vec<u8>,
        routing_key: String,
        attempt: u32,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            body,
            routing_key,
            attempt,
            acker,
        }
    }

    /// Whether the message has been handed out before
    pub fn is_redelivery(&self) -> bool {
        self.attempt > 1
    }

    /// Acknowledge the message as processed
    pub async fn ack(self) -> EmptyResult {
        self.acker.ack().await
    }

    /// Negatively acknowledge the message
    pub async fn nack(self, requeue: bool) -> EmptyResult {
        self.acker.nack(requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("routing_key", &self.routing_key)
            .field("attempt", &self.attempt)
            .field("bytes", &self.body.len())
            .finish()
    }
}

/// Communication channel on an open broker connection
///
/// Once the underlying connection is gone, all methods return errors and the
/// future returned by [`Channel::closed`] resolves.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Declares a durable topic exchange, doing nothing if it already exists
    async fn declare_exchange(&self, exchange: &str) -> EmptyResult;

    /// Declares a queue and returns its name
    ///
    /// An empty name requests a broker-generated one.
    async fn declare_queue(&self, name: &str, options: &QueueOptions) -> Result<String, BoxedError>;

    /// Routes messages published on `exchange` matching `pattern` into `queue`
    async fn bind_queue(&self, queue: &str, exchange: &str, pattern: &str) -> EmptyResult;

    /// Publishes a message on an exchange
    ///
    /// Returns whether the broker accepted the message into its buffer, regardless of
    /// whether any queue was bound to the routing key.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: &PublishProperties,
    ) -> Result<bool, BoxedError>;

    /// Places a message directly into a named queue, bypassing the exchange
    async fn send_to_queue(
        &self,
        queue: &str,
        body: &[u8],
        properties: &PublishProperties,
    ) -> Result<bool, BoxedError>;

    /// Starts consuming a queue with manual acknowledgement
    ///
    /// At most `prefetch` deliveries are handed out without being settled. The stream
    /// ends when the connection closes.
    async fn consume(
        &self,
        queue: &str,
        prefetch: usize,
    ) -> Result<BoxStream<'static, Delivery>, BoxedError>;

    /// Closes the connection, deleting transient queues
    async fn close(&self) -> EmptyResult;

    /// Future which resolves with a reason once the connection is gone
    fn closed(&self) -> BoxFuture<'static, String>;
}

/// Opens broker connections
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects to the broker at `url`, announcing the connection under `name`
    async fn connect(&self, url: &str, name: &str) -> Result<Arc<dyn Channel>, BoxedError>;
}

/// Turns a watched close reason into the future expected by [`Channel::closed`]
///
/// Resolves as soon as the watched value becomes `Some`, or when the sending side is dropped.
pub fn closed_signal(mut receiver: watch::Receiver<Option<String>>) -> BoxFuture<'static, String> {
    async move {
        loop {
            let reason = receiver.borrow().clone();
            if let Some(reason) = reason {
                return reason;
            }

            if receiver.changed().await.is_err() {
                return String::from("connection dropped");
            }
        }
    }
    .boxed()
}
