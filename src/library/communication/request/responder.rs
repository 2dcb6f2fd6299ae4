use super::super::channel::PublishProperties;
use super::super::connection::BrokerClient;
use super::super::envelope::{Envelope, Metadata};
use super::super::event::{
    Disposition, HandlerError, MessageHandler, Notification, SubscribeError, SubscribeOptions,
    Subscriber,
};
use super::super::implementation::json;
use super::Request;
use crate::library::BoxedError;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use tracing::{debug, warn};

/// Produces the reply to an untyped request
///
/// Returning an error leaves the request unanswered and puts it back into the queue, so the
/// requester eventually times out. Business failures should be reported through a regular
/// reply instead.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Computes the reply payload which has to serialize into a map
    async fn respond(&self, payload: Value, metadata: Metadata) -> Result<Value, HandlerError>;
}

/// [`RequestHandler`] backed by a closure, see [`respond_fn`]
pub struct RespondFn<F> {
    function: F,
}

/// Creates a [`RequestHandler`] from an async closure returning anything serializable
pub fn respond_fn<F, Fut, R>(function: F) -> RespondFn<F>
where
    F: Fn(Value, Metadata) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, HandlerError>> + Send,
    R: Serialize + Send,
{
    RespondFn { function }
}

#[async_trait]
impl<F, Fut, R> RequestHandler for RespondFn<F>
where
    F: Fn(Value, Metadata) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, HandlerError>> + Send,
    R: Serialize + Send,
{
    async fn respond(&self, payload: Value, metadata: Metadata) -> Result<Value, HandlerError> {
        let reply = (self.function)(payload, metadata).await?;
        serde_json::to_value(reply).map_err(HandlerError::failed)
    }
}

/// Structure which processes typed requests and produces responses
#[async_trait]
pub trait RequestProcessor: Send + Sync + 'static {
    /// Type of request to process
    type Request: Request + Send;

    /// Handler for requests, returning a response
    async fn process(
        &self,
        request: Self::Request,
    ) -> Result<<Self::Request as Request>::Response, BoxedError>;
}

/// Adapter decoding requests for a [`RequestProcessor`] and encoding its responses
///
/// Requests which do not decode into [`RequestProcessor::Request`] are treated as malformed.
pub struct Responder<P> {
    processor: P,
}

impl<P: RequestProcessor> Responder<P> {
    /// Wraps a processor
    pub fn new(processor: P) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl<P: RequestProcessor> RequestHandler for Responder<P> {
    async fn respond(&self, payload: Value, _metadata: Metadata) -> Result<Value, HandlerError> {
        let request: P::Request =
            serde_json::from_value(payload).map_err(HandlerError::malformed)?;

        let response = self
            .processor
            .process(request)
            .await
            .map_err(HandlerError::Failed)?;

        serde_json::to_value(response).map_err(HandlerError::failed)
    }
}

/// Sends the result of a [`RequestHandler`] to the reply location of each request
struct ReplyingHandler<H> {
    handler: H,
    client: BrokerClient,
}

#[async_trait]
impl<H: RequestHandler> MessageHandler for ReplyingHandler<H> {
    async fn handle(&self, payload: Value, metadata: Metadata) -> Result<Disposition, HandlerError> {
        let reply_metadata = metadata.reply();
        let reply_to = metadata.reply_to.clone();
        let event_id = metadata.event_id.clone();

        let reply = self.handler.respond(payload, metadata).await?;

        let reply_to = match reply_to {
            Some(reply_to) => reply_to,
            None => {
                warn!(%event_id, "Request carries no reply location, discarding reply");
                return Ok(Disposition::Ack);
            }
        };

        let data = json::encode(&Envelope::with_metadata(&reply, reply_metadata))
            .map_err(HandlerError::failed)?;

        let connection = self.client.connect().await.map_err(HandlerError::failed)?;
        let delivered = connection
            .channel()
            .send_to_queue(&reply_to, &data, &PublishProperties { persistent: false })
            .await
            .map_err(HandlerError::Failed)?;

        if delivered {
            debug!(%event_id, %reply_to, "Sent reply");
        } else {
            debug!(%event_id, %reply_to, "Reply location vanished, requester is gone");
        }

        Ok(Disposition::Ack)
    }
}

impl Subscriber {
    /// Answers requests published on `topic` and returns the name of the queue
    ///
    /// Requests are consumed like any other message (see [`Subscriber::subscribe`]) and the
    /// reply is sent to the queue named in their metadata, carrying the same correlation id.
    pub async fn respond_to<H: RequestHandler>(
        &self,
        topic: &str,
        handler: H,
        options: SubscribeOptions,
    ) -> Result<String, SubscribeError> {
        let handler = ReplyingHandler {
            handler,
            client: self.client().clone(),
        };

        self.subscribe(topic, handler, options).await
    }

    /// Answers typed requests using a [`RequestProcessor`]
    pub async fn serve<P: RequestProcessor>(
        &self,
        processor: P,
        options: SubscribeOptions,
    ) -> Result<String, SubscribeError> {
        self.respond_to(P::Request::topic(), Responder::new(processor), options)
            .await
    }
}

#[cfg(test)]
mod does {
    use super::super::super::channel::{Connector, QueueOptions};
    use super::super::super::connection::ClientConfig;
    use super::super::super::event::{DeadLetter, Publisher};
    use super::super::super::implementation::memory::MemoryBroker;
    use super::super::Requester;
    use super::*;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    const URL: &str = "memory://responder-test";
    const WAIT: Duration = Duration::from_secs(2);

    fn client(broker: &MemoryBroker, name: &str) -> BrokerClient {
        let config = ClientConfig::new(vec![URL.into()]).with_connection_name(name);
        BrokerClient::new(broker.clone(), config)
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct GetMe {
        admin_id: String,
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Me {
        success: bool,
        name: String,
    }

    impl Notification for GetMe {
        fn topic() -> &'static str {
            "admin.auth.getMe"
        }
    }

    impl Request for GetMe {
        type Response = Me;
    }

    struct Directory;

    #[async_trait]
    impl RequestProcessor for Directory {
        type Request = GetMe;

        async fn process(&self, request: GetMe) -> Result<Me, BoxedError> {
            match request.admin_id.as_str() {
                "42" => Ok(Me {
                    success: true,
                    name: "Deep Thought".into(),
                }),
                _ => Err("directory offline".into()),
            }
        }
    }

    #[tokio::test]
    async fn serve_typed_requests() {
        let broker = MemoryBroker::new(URL);
        Subscriber::new(client(&broker, "responder"))
            .serve(Directory, SubscribeOptions::named("admin.queue.getMe-responder"))
            .await
            .unwrap();

        let me: Me = Requester::new(client(&broker, "requester"))
            .request("admin.auth.getMe", &json!({ "adminId": "42" }), WAIT)
            .await
            .unwrap();

        assert_eq!(
            me,
            Me {
                success: true,
                name: "Deep Thought".into()
            }
        );
    }

    #[tokio::test]
    async fn leave_failed_requests_unanswered() {
        let broker = MemoryBroker::new(URL);
        let options = SubscribeOptions::named("admin.queue.getMe-responder").with_max_deliveries(2);
        Subscriber::new(client(&broker, "responder"))
            .serve(Directory, options)
            .await
            .unwrap();

        let result = Requester::new(client(&broker, "requester"))
            .request_raw(
                "admin.auth.getMe",
                &json!({ "adminId": "7" }),
                Duration::from_millis(100),
            )
            .await;

        assert!(matches!(
            result,
            Err(super::super::RequestError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn dead_letter_undecodable_requests() {
        let broker = MemoryBroker::new(URL);
        let observer = broker.connect(URL, "observer").await.unwrap();
        observer.declare_exchange(crate::constants::EXCHANGE_NAME).await.unwrap();
        let letters = observer
            .declare_queue("", &QueueOptions::exclusive())
            .await
            .unwrap();
        observer
            .bind_queue(&letters, crate::constants::EXCHANGE_NAME, "dead-letter.#")
            .await
            .unwrap();
        let mut deliveries = observer.consume(&letters, 1).await.unwrap();

        Subscriber::new(client(&broker, "responder"))
            .serve(Directory, SubscribeOptions::named("admin.queue.getMe-responder"))
            .await
            .unwrap();

        Publisher::new(client(&broker, "publisher"))
            .publish_to("admin.auth.getMe", &json!({ "id": 42 }))
            .await
            .unwrap();

        let delivery = timeout(WAIT, deliveries.next()).await.unwrap().unwrap();
        let letter: DeadLetter = json::decode(&delivery.body)
            .unwrap()
            .decode_payload::<DeadLetter>()
            .unwrap()
            .into_payload();

        assert_eq!(delivery.routing_key, "dead-letter.admin.auth.getMe");
        assert_eq!(letter.topic, "admin.auth.getMe");
        assert_eq!(letter.attempts, 1);
    }

    #[tokio::test]
    async fn acknowledge_requests_without_reply_location() {
        let broker = MemoryBroker::new(URL);
        let handler = respond_fn(|_, _| async { Ok::<_, HandlerError>(json!({ "success": true })) });

        let queue = Subscriber::new(client(&broker, "responder"))
            .respond_to("t.echo", handler, SubscribeOptions::named("t.queue.echo-responder"))
            .await
            .unwrap();

        Publisher::new(client(&broker, "publisher"))
            .publish_to("t.echo", &json!({}))
            .await
            .unwrap();

        let mut drained = false;
        for _ in 0..200 {
            if broker.queue_depth(&queue) == Some(0) && broker.unacked_count(&queue) == Some(0) {
                drained = true;
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }

        assert!(drained);
    }
}
