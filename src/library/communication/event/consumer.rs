use super::super::envelope::Metadata;
use super::{Disposition, HandlerError, MessageHandler, Notification};
use crate::library::EmptyResult;
use async_trait::async_trait;
use serde_json::Value;
use std::any::type_name;
use tracing::warn;

/// Entity which may consume and process [`Notifications`](Notification)
#[async_trait]
pub trait Consumer: Send + Sync + 'static {
    /// Notification to consume
    type Notification: Notification + Send;

    /// Processes an event notification and returns whether it succeeded or failed
    ///
    /// Failed notifications are put back into the queue and redelivered.
    async fn consume(&self, notification: Self::Notification) -> EmptyResult;
}

/// Adapter decoding notifications before handing them to a [`Consumer`]
pub struct ConsumerHandler<C> {
    consumer: C,
}

impl<C: Consumer> ConsumerHandler<C> {
    /// Wraps a consumer
    pub fn new(consumer: C) -> Self {
        Self { consumer }
    }
}

#[async_trait]
impl<C: Consumer> MessageHandler for ConsumerHandler<C> {
    async fn handle(&self, payload: Value, _metadata: Metadata) -> Result<Disposition, HandlerError> {
        let notification: C::Notification =
            serde_json::from_value(payload).map_err(HandlerError::malformed)?;

        self.consumer.consume(notification).await.map_err(|e| {
            warn!(error = %e, "Failed to consume {}", type_name::<C::Notification>());
            HandlerError::Failed(e)
        })?;

        Ok(Disposition::Ack)
    }
}
