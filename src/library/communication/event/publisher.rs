use super::super::channel::PublishProperties;
use super::super::connection::{BrokerClient, ConnectionError};
use super::super::envelope::Envelope;
use super::super::implementation::json;
use super::Notification;
use crate::library::BoxedError;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

/// Error type for publishing notifications
#[derive(Error, Debug)]
pub enum PublishError {
    /// No broker connection could be obtained
    #[error("no broker connection available")]
    Connection(#[from] ConnectionError),
    /// Payload could not be serialized into an envelope
    #[error("unable to serialize payload")]
    Serialization(#[from] serde_json::Error),
    /// Broker refused the message
    #[error("broker rejected message")]
    Broker(#[source] BoxedError),
}

/// Publisher for [`Notifications`](Notification)
#[async_trait]
pub trait NotificationPublisher {
    /// Publishes a [`Notification`] to its designated topic
    async fn publish<N: Notification + Send + Sync>(&self, notification: &N) -> Result<bool, PublishError>;
}

/// Fire-and-forget sender of messages on the shared exchange
#[derive(Clone)]
pub struct Publisher {
    client: BrokerClient,
}

impl Publisher {
    /// Creates a new instance publishing through the given client
    pub fn new(client: BrokerClient) -> Self {
        Self { client }
    }

    /// Publishes a payload on a topic without expecting a reply
    ///
    /// The payload is wrapped in an envelope with a fresh event id and without correlation
    /// or reply information. Returns whether the broker accepted the message into its buffer.
    #[instrument(skip(self, payload))]
    pub async fn publish_to<T>(&self, topic: &str, payload: &T) -> Result<bool, PublishError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let connection = self.client.connect().await?;
        let envelope = Envelope::new(payload);
        let data = json::encode(&envelope)?;

        let accepted = connection
            .channel()
            .publish(
                connection.exchange(),
                topic,
                &data,
                &PublishProperties::default(),
            )
            .await
            .map_err(PublishError::Broker)?;

        debug!(event_id = %envelope.metadata.event_id, accepted, "Published message");

        Ok(accepted)
    }
}

#[async_trait]
impl NotificationPublisher for Publisher {
    async fn publish<N: Notification + Send + Sync>(&self, notification: &N) -> Result<bool, PublishError> {
        self.publish_to(N::topic(), notification).await
    }
}
