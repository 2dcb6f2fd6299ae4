use super::super::envelope::Metadata;
use crate::library::BoxedError;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use thiserror::Error;

/// Outcome of processing a message which decides how it is settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processing succeeded and the message is removed from its queue
    Ack,
    /// Processing should be retried later and the message goes back to its queue
    Nack,
}

impl From<()> for Disposition {
    fn from(_: ()) -> Self {
        Disposition::Ack
    }
}

impl From<bool> for Disposition {
    /// Anything but an explicit `false` counts as success
    fn from(success: bool) -> Self {
        if success {
            Disposition::Ack
        } else {
            Disposition::Nack
        }
    }
}

/// Error that may be returned while handling a message
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Message can never be processed, e.g. because its payload has the wrong shape
    #[error("malformed message")]
    Malformed(#[source] BoxedError),
    /// Processing failed but may succeed when retried
    #[error("processing failed")]
    Failed(#[source] BoxedError),
}

impl HandlerError {
    /// Wraps an error as a retryable failure
    pub fn failed(error: impl Into<BoxedError>) -> Self {
        HandlerError::Failed(error.into())
    }

    /// Wraps an error as a permanent failure
    pub fn malformed(error: impl Into<BoxedError>) -> Self {
        HandlerError::Malformed(error.into())
    }
}

/// Processes untyped messages received by a [`Subscriber`](super::Subscriber)
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handles the payload and metadata of one message
    async fn handle(&self, payload: Value, metadata: Metadata) -> Result<Disposition, HandlerError>;
}

/// [`MessageHandler`] backed by a closure, see [`handler_fn`]
pub struct HandlerFn<F> {
    function: F,
}

/// Creates a [`MessageHandler`] from an async closure
///
/// The closure may return anything convertible into a [`Disposition`], like `()` or `bool`.
pub fn handler_fn<F, Fut, D>(function: F) -> HandlerFn<F>
where
    F: Fn(Value, Metadata) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<D, HandlerError>> + Send,
    D: Into<Disposition> + Send,
{
    HandlerFn { function }
}

#[async_trait]
impl<F, Fut, D> MessageHandler for HandlerFn<F>
where
    F: Fn(Value, Metadata) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<D, HandlerError>> + Send,
    D: Into<Disposition> + Send,
{
    async fn handle(&self, payload: Value, metadata: Metadata) -> Result<Disposition, HandlerError> {
        (self.function)(payload, metadata).await.map(Into::into)
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use serde_json::json;

    #[test]
    fn treat_everything_but_false_as_success() {
        assert_eq!(Disposition::from(()), Disposition::Ack);
        assert_eq!(Disposition::from(true), Disposition::Ack);
        assert_eq!(Disposition::from(false), Disposition::Nack);
    }

    #[tokio::test]
    async fn convert_closure_results() {
        let handler = handler_fn(|payload: Value, _| async move {
            Ok::<_, HandlerError>(payload["retry"] != json!(true))
        });

        let ack = handler.handle(json!({}), Metadata::notification()).await;
        let nack = handler.handle(json!({ "retry": true }), Metadata::notification()).await;

        assert_eq!(ack.unwrap(), Disposition::Ack);
        assert_eq!(nack.unwrap(), Disposition::Nack);
    }
}
