//! Answers connectivity checks of other services and reports dead letters

use crate::domain::request::TestCommunicationRequest;
use crate::domain::{NoData, ServiceReply};
use crate::harness::{Heart, Module, ModuleTerminationReason};
use crate::library::communication::connection::BrokerClient;
use crate::library::communication::envelope::Metadata;
use crate::library::communication::event::{
    handler_fn, DeadLetter, HandlerError, SubscribeOptions, Subscriber,
};
use crate::library::communication::request::RequestProcessor;
use crate::library::communication::topic::responder_queue;
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

mod options;

pub use options::Options;

/// Capability name under which the responder queue is registered
const CAPABILITY: &str = "testCommunication";

struct EchoProcessor;

#[async_trait]
impl RequestProcessor for EchoProcessor {
    type Request = TestCommunicationRequest;

    async fn process(&self, request: Self::Request) -> Result<ServiceReply<NoData>, BoxedError> {
        info!(message = %request.message, "Received test communication");

        let received = serde_json::to_value(&request)?;
        Ok(ServiceReply::ok("Communication successful", NoData {}).echoing(received))
    }
}

async fn log_dead_letter(payload: Value, metadata: Metadata) -> Result<(), HandlerError> {
    let letter: DeadLetter = serde_json::from_value(payload).map_err(HandlerError::malformed)?;

    warn!(
        topic = %letter.topic,
        queue = %letter.queue,
        attempts = letter.attempts,
        reason = %letter.reason,
        event_id = %metadata.event_id,
        "Message has been dead-lettered"
    );

    Ok(())
}

/// Module implementation
pub struct Diagnostics {
    options: Options,
    client: BrokerClient,
}

impl Diagnostics {
    /// Creates a new instance connecting to the configured broker
    pub fn new(options: Options) -> Self {
        let client = options.broker.client(&options.service.name);
        Self::with_client(options, client)
    }

    /// Creates a new instance using an existing client
    pub fn with_client(options: Options, client: BrokerClient) -> Self {
        Self { options, client }
    }

    fn queue(&self) -> String {
        responder_queue(&self.options.service.name, CAPABILITY)
    }
}

#[async_trait]
impl Module for Diagnostics {
    async fn pre_startup(&mut self) -> EmptyResult {
        self.client.connect().await?;
        Ok(())
    }

    async fn run(&mut self) -> Result<Option<Heart>, BoxedError> {
        let subscriber = Subscriber::new(self.client.clone());
        let options = SubscribeOptions::named(self.queue()).with_prefetch(self.options.prefetch);

        let queue = subscriber.serve(EchoProcessor, options).await?;
        info!(%queue, "Answering test communication requests");

        if self.options.watch_dead_letters {
            subscriber
                .subscribe(
                    "dead-letter.#",
                    handler_fn(log_dead_letter),
                    SubscribeOptions::default(),
                )
                .await?;
        }

        // Subscriptions are bound to the connection they were made on
        let connection = self.client.connect().await?;
        let (heart, mut stone) = Heart::new();

        tokio::spawn(async move {
            let reason = connection.channel().closed().await;
            stone
                .kill(format!("broker connection lost: {}", reason))
                .await;
        });

        Ok(Some(heart))
    }

    async fn post_shutdown(&mut self, termination_reason: &ModuleTerminationReason) {
        if let Err(e) = self.client.close().await {
            warn!(error = %e, "Unable to close broker connection");
        }

        info!(%termination_reason, "Diagnostics terminated");
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::domain::request::ADMIN_AUTH_SERVICE;
    use crate::library::communication::connection::ClientConfig;
    use crate::library::communication::implementation::memory::{MemoryBroker, MEMORY_BROKER_URL};
    use crate::harness::DeathReason;
    use crate::library::communication::request::{Requester, Requestor};
    use crate::module::options::{BrokerOptions, ServiceOptions};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;
    use structopt::StructOpt;
    use tokio::time::timeout;

    fn options() -> Options {
        Options::from_iter_safe(vec!["diagnostics", "--service-name", ADMIN_AUTH_SERVICE])
            .unwrap()
    }

    fn client(broker: &MemoryBroker, name: &str) -> BrokerClient {
        let config = ClientConfig::new(vec![MEMORY_BROKER_URL.into()]).with_connection_name(name);
        BrokerClient::new(broker.clone(), config)
    }

    #[tokio::test]
    async fn echo_test_requests() {
        let broker = MemoryBroker::default();
        let mut module = Diagnostics::with_client(options(), client(&broker, ADMIN_AUTH_SERVICE));

        module.pre_startup().await.unwrap();
        let heart = module.run().await.unwrap();
        assert!(heart.is_some());
        assert_eq!(
            broker.consumer_count("admin-auth-service.queue.testCommunication-responder"),
            Some(1)
        );

        let requester = Requester::new(client(&broker, "admin-service"));
        let request = TestCommunicationRequest::new("ping", json!({ "n": 1 }));
        let reply = requester.call(&request).await.unwrap();

        assert!(reply.success);
        assert_eq!(
            reply.received_data.unwrap()["testData"],
            json!({ "n": 1 })
        );
    }

    #[tokio::test]
    async fn log_dead_letters() {
        let letter = DeadLetter::new(
            "t.echo",
            "t.queue.echo",
            5,
            crate::library::communication::BlackboxError::from_message("boom"),
            b"{}",
        );
        let payload = serde_json::to_value(&letter).unwrap();

        assert!(log_dead_letter(payload, Metadata::notification()).await.is_ok());
        assert!(log_dead_letter(json!({ "x": 1 }), Metadata::notification())
            .await
            .is_err());
    }

    #[test]
    fn name_queue_after_service() {
        let options = Options {
            broker: BrokerOptions::from_iter_safe(vec!["broker"]).unwrap(),
            service: ServiceOptions {
                name: "user-auth-service".into(),
            },
            prefetch: 1,
            watch_dead_letters: false,
        };

        let module = Diagnostics::with_client(options, client(&MemoryBroker::default(), "x"));

        assert_eq!(
            module.queue(),
            "user-auth-service.queue.testCommunication-responder"
        );
    }

    #[tokio::test]
    async fn die_when_the_connection_is_lost() {
        let broker = MemoryBroker::default();
        let mut module = Diagnostics::with_client(options(), client(&broker, "diagnostics"));

        module.pre_startup().await.unwrap();
        let mut heart = module.run().await.unwrap().unwrap();
        broker.sever("diagnostics");

        let reason = timeout(Duration::from_secs(2), heart.death()).await.unwrap();
        assert!(matches!(reason, DeathReason::Killed(r) if r.starts_with("broker connection lost")));
    }
}
