use super::super::channel::{Delivery, PublishProperties, QueueOptions};
use super::super::connection::{BrokerClient, Connection, ConnectionError};
use super::super::envelope::Envelope;
use super::super::error::BlackboxError;
use super::super::implementation::json;
use super::{
    dead_letter_topic, Consumer, ConsumerHandler, DeadLetter, Disposition, HandlerError,
    MessageHandler, Notification,
};
use crate::constants::{DEFAULT_MAX_DELIVERIES, DEFAULT_PREFETCH};
use crate::library::{BoxedError, EmptyResult};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, trace, warn};

/// Error type for setting up a subscription
#[derive(Error, Debug)]
pub enum SubscribeError {
    /// No broker connection could be obtained
    #[error("no broker connection available")]
    Connection(#[from] ConnectionError),
    /// Broker refused to declare, bind or consume the queue
    #[error("unable to set up queue {queue}")]
    Broker {
        /// Queue that was being set up, empty for anonymous queues
        queue: String,
        /// Underlying broker error
        #[source]
        source: BoxedError,
    },
}

/// Parameters of a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Name of the queue to consume from
    ///
    /// Named queues are shared by every subscriber using the same name, so work is
    /// distributed between them and messages are retained across restarts. Without a name,
    /// an exclusive queue is created which vanishes together with the connection.
    pub queue_name: Option<String>,
    /// Whether a named queue survives broker restarts
    pub durable: bool,
    /// Whether a named queue may only be used by this connection
    pub exclusive: bool,
    /// Maximum number of messages processed concurrently, zero for no limit
    pub prefetch: usize,
    /// Deliveries after which a failing message is dead-lettered, zero to retry forever
    pub max_deliveries: u32,
}

impl SubscribeOptions {
    /// Options for a shared, durable queue with the given name
    pub fn named(queue: impl Into<String>) -> Self {
        Self {
            queue_name: Some(queue.into()),
            ..Self::default()
        }
    }

    /// Changes the concurrency limit
    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Changes the number of deliveries before a message is dead-lettered
    pub fn with_max_deliveries(mut self, max_deliveries: u32) -> Self {
        self.max_deliveries = max_deliveries;
        self
    }

    /// Restricts a named queue to the subscribing connection
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    fn queue_options(&self) -> QueueOptions {
        match self.queue_name {
            Some(_) => QueueOptions {
                durable: self.durable,
                exclusive: self.exclusive,
                auto_delete: false,
            },
            None => QueueOptions::exclusive(),
        }
    }
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            queue_name: None,
            durable: true,
            exclusive: false,
            prefetch: DEFAULT_PREFETCH,
            max_deliveries: DEFAULT_MAX_DELIVERIES,
        }
    }
}

/// Binds queues to topics and feeds their messages into [`MessageHandlers`](MessageHandler)
///
/// Subscriptions are tied to the connection they were created on. When the connection
/// breaks, the [`BrokerClient`] reconnects but the subscription is gone and has to be
/// created again by the caller.
#[derive(Clone)]
pub struct Subscriber {
    client: BrokerClient,
}

impl Subscriber {
    /// Creates a new instance subscribing through the given client
    pub fn new(client: BrokerClient) -> Self {
        Self { client }
    }

    /// Client used to set up subscriptions
    pub fn client(&self) -> &BrokerClient {
        &self.client
    }

    /// Starts processing messages published on `topic` and returns the name of the queue
    ///
    /// Messages are processed in a background task until the connection closes.
    #[instrument(skip(self, handler, options), fields(queue = ?options.queue_name))]
    pub async fn subscribe<H: MessageHandler>(
        &self,
        topic: &str,
        handler: H,
        options: SubscribeOptions,
    ) -> Result<String, SubscribeError> {
        let connection = self.client.connect().await?;
        let channel = connection.channel();
        let requested = options.queue_name.clone().unwrap_or_default();

        let broker_error = |queue: &str| {
            let queue = queue.to_owned();
            move |source: BoxedError| SubscribeError::Broker { queue, source }
        };

        let queue = channel
            .declare_queue(&requested, &options.queue_options())
            .await
            .map_err(broker_error(&requested))?;

        channel
            .bind_queue(&queue, connection.exchange(), topic)
            .await
            .map_err(broker_error(&queue))?;

        let deliveries = channel
            .consume(&queue, options.prefetch)
            .await
            .map_err(broker_error(&queue))?;

        info!(%queue, generation = connection.generation(), "Subscribed to topic");

        let dispatcher = Dispatcher {
            handler,
            connection: connection.clone(),
            queue: queue.clone(),
            max_deliveries: options.max_deliveries,
        };

        tokio::spawn(dispatcher.run(deliveries, options.prefetch));

        Ok(queue)
    }

    /// Feeds [`Notifications`](Notification) of the consumer's type into a [`Consumer`]
    pub async fn consume_with<C: Consumer>(
        &self,
        consumer: C,
        options: SubscribeOptions,
    ) -> Result<String, SubscribeError> {
        self.subscribe(C::Notification::topic(), ConsumerHandler::new(consumer), options)
            .await
    }
}

struct Dispatcher<H> {
    handler: H,
    connection: Arc<Connection>,
    queue: String,
    max_deliveries: u32,
}

impl<H: MessageHandler> Dispatcher<H> {
    async fn run(self, deliveries: BoxStream<'static, Delivery>, prefetch: usize) {
        let limit = if prefetch == 0 { None } else { Some(prefetch) };
        let dispatcher = Arc::new(self);

        deliveries
            .for_each_concurrent(limit, |delivery| {
                let dispatcher = dispatcher.clone();
                async move { dispatcher.dispatch(delivery).await }
            })
            .await;

        info!(queue = %dispatcher.queue, "Subscription ended");
    }

    async fn dispatch(&self, delivery: Delivery) {
        let attempt = delivery.attempt;

        let Envelope { payload, metadata } = match json::decode(&delivery.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(queue = %self.queue, attempt, error = %e, "Discarding undecodable message");
                self.bury(&delivery, BlackboxError::new(e)).await;
                return log_settlement(delivery.nack(false).await);
            }
        };

        let event_id = metadata.event_id.clone();
        trace!(queue = %self.queue, %event_id, attempt, "Handling message");

        match self.handler.handle(payload, metadata).await {
            Ok(Disposition::Ack) => log_settlement(delivery.ack().await),
            Ok(Disposition::Nack) => {
                debug!(queue = %self.queue, %event_id, attempt, "Handler rejected message");
                let reason = BlackboxError::from_message("handler rejected message");
                self.retry(delivery, reason).await;
            }
            Err(HandlerError::Failed(e)) => {
                warn!(queue = %self.queue, %event_id, attempt, error = %e, "Handler failed");
                self.retry(delivery, BlackboxError::from_boxed(&e)).await;
            }
            Err(e @ HandlerError::Malformed(_)) => {
                warn!(queue = %self.queue, %event_id, error = %e, "Discarding malformed message");
                self.bury(&delivery, BlackboxError::new(e)).await;
                log_settlement(delivery.nack(false).await);
            }
        }
    }

    async fn retry(&self, delivery: Delivery, reason: BlackboxError) {
        if self.max_deliveries > 0 && delivery.attempt >= self.max_deliveries {
            warn!(queue = %self.queue, attempts = delivery.attempt, %reason, "Giving up on message");
            self.bury(&delivery, reason).await;
            log_settlement(delivery.ack().await);
        } else {
            log_settlement(delivery.nack(true).await);
        }
    }

    /// Publishes a [`DeadLetter`] record for the delivery
    async fn bury(&self, delivery: &Delivery, reason: BlackboxError) {
        let letter = DeadLetter::new(
            &delivery.routing_key,
            &self.queue,
            delivery.attempt,
            reason,
            &delivery.body,
        );
        let topic = dead_letter_topic(&delivery.routing_key);

        if let Err(e) = self.publish_dead_letter(&topic, &letter).await {
            error!(%topic, error = %e, "Unable to publish dead letter");
        }
    }

    async fn publish_dead_letter(&self, topic: &str, letter: &DeadLetter) -> EmptyResult {
        let data = json::encode(&Envelope::new(letter))?;

        self.connection
            .channel()
            .publish(
                self.connection.exchange(),
                topic,
                &data,
                &PublishProperties::default(),
            )
            .await?;

        Ok(())
    }
}

fn log_settlement(result: EmptyResult) {
    if let Err(e) = result {
        warn!(error = %e, "Unable to settle message");
    }
}
