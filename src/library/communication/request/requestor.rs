use super::super::channel::{Delivery, PublishProperties, QueueOptions};
use super::super::connection::{BrokerClient, Connection, ConnectionError};
use super::super::envelope::{Envelope, Metadata};
use super::super::implementation::json;
use super::{PendingRequests, Request};
use crate::library::BoxedError;
use async_trait::async_trait;
use futures::lock::Mutex;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Error type for sending requests
#[derive(Error, Debug)]
pub enum RequestError {
    /// No broker connection could be obtained
    #[error("no broker connection available")]
    Connection(#[from] ConnectionError),
    /// Publishing the request or preparing its reply queue failed
    #[error("sending of request failed")]
    SendingFailure(#[source] BoxedError),
    /// No reply arrived in time
    #[error("no reply on {topic} within {timeout:?}")]
    Timeout {
        /// Topic the request was published on
        topic: String,
        /// Time waited for the reply
        timeout: Duration,
    },
    /// The reply could not be converted into the expected type
    #[error("reply has unexpected shape")]
    MalformedReply(#[source] serde_json::Error),
    /// The reply queue went away while waiting
    #[error("reply channel closed")]
    ReplyChannelClosed,
}

/// Handler for sending typed [`Requests`](Request) and awaiting their response
#[async_trait]
pub trait Requestor {
    /// Sends a request on its topic and waits at most [`Request::timeout`] for the response
    async fn call<Q>(&self, request: &Q) -> Result<Q::Response, RequestError>
    where
        Q: Request + Send + Sync,
        Q::Response: Send;
}

struct ReplyRoute {
    generation: u64,
    queue: String,
}

/// Sends requests and routes the replies back to their callers
///
/// All requests issued through one instance (and its clones) share a single exclusive reply
/// queue per connection. It is created with the first request and replaced once the
/// connection has been re-established.
#[derive(Clone)]
pub struct Requester {
    client: BrokerClient,
    pending: PendingRequests,
    route: Arc<Mutex<Option<ReplyRoute>>>,
}

impl Requester {
    /// Creates a new instance sending through the given client
    pub fn new(client: BrokerClient) -> Self {
        Self {
            client,
            pending: PendingRequests::default(),
            route: Arc::new(Mutex::new(None)),
        }
    }

    /// Number of requests currently awaiting their reply
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Name of the reply queue on the given connection, creating it if necessary
    async fn reply_queue(&self, connection: &Connection) -> Result<String, RequestError> {
        let mut route = self.route.lock().await;

        if let Some(route) = &*route {
            if route.generation == connection.generation() {
                return Ok(route.queue.clone());
            }
        }

        let channel = connection.channel();
        let queue = channel
            .declare_queue("", &QueueOptions::exclusive())
            .await
            .map_err(RequestError::SendingFailure)?;
        let replies = channel
            .consume(&queue, 0)
            .await
            .map_err(RequestError::SendingFailure)?;

        info!(%queue, generation = connection.generation(), "Listening for replies");
        tokio::spawn(route_replies(replies, self.pending.clone(), queue.clone()));

        *route = Some(ReplyRoute {
            generation: connection.generation(),
            queue: queue.clone(),
        });

        Ok(queue)
    }

    /// Publishes a payload on a topic and waits for the reply envelope
    ///
    /// Fails immediately when no connection is available. The publish is not retried.
    #[instrument(skip(self, payload))]
    pub async fn request_raw<T>(
        &self,
        topic: &str,
        payload: &T,
        timeout: Duration,
    ) -> Result<Envelope<Value>, RequestError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let connection = self.client.connect().await?;
        let reply_to = self.reply_queue(&connection).await?;
        let correlation_id = Uuid::new_v4().to_string();

        let metadata = Metadata::request(correlation_id.clone(), reply_to);
        let data = json::encode(&Envelope::with_metadata(payload, metadata))
            .map_err(|e| RequestError::SendingFailure(e.into()))?;

        let slot = self.pending.register(correlation_id);

        connection
            .channel()
            .publish(
                connection.exchange(),
                topic,
                &data,
                &PublishProperties::default(),
            )
            .await
            .map_err(RequestError::SendingFailure)?;

        debug!(correlation_id = slot.correlation_id(), "Sent request");

        match tokio::time::timeout(timeout, slot.receive()).await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(RequestError::ReplyChannelClosed),
            Err(_) => {
                warn!(?timeout, "Request timed out");

                Err(RequestError::Timeout {
                    topic: topic.to_owned(),
                    timeout,
                })
            }
        }
    }

    /// Publishes a payload on a topic and decodes the reply payload
    pub async fn request<T, R>(
        &self,
        topic: &str,
        payload: &T,
        timeout: Duration,
    ) -> Result<R, RequestError>
    where
        T: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        self.request_raw(topic, payload, timeout)
            .await?
            .decode_payload::<R>()
            .map(Envelope::into_payload)
            .map_err(RequestError::MalformedReply)
    }
}

#[async_trait]
impl Requestor for Requester {
    async fn call<Q>(&self, request: &Q) -> Result<Q::Response, RequestError>
    where
        Q: Request + Send + Sync,
        Q::Response: Send,
    {
        self.request(Q::topic(), request, Q::timeout()).await
    }
}

async fn route_replies(
    mut replies: BoxStream<'static, Delivery>,
    pending: PendingRequests,
    queue: String,
) {
    while let Some(delivery) = replies.next().await {
        match json::decode(&delivery.body) {
            Ok(reply) => {
                let correlation_id = reply.metadata.correlation_id.clone();

                if !pending.resolve(reply) {
                    debug!(?correlation_id, "Dropping reply nobody is waiting for");
                }
            }
            Err(e) => warn!(%queue, error = %e, "Dropping undecodable reply"),
        }

        if let Err(e) = delivery.ack().await {
            warn!(%queue, error = %e, "Unable to acknowledge reply");
        }
    }

    debug!(%queue, "Reply queue closed");
}
