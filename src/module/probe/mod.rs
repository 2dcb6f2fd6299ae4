//! Checks whether a responder is reachable through the broker
//!
//! Sends a single [`TestCommunicationRequest`] and exits successfully when a positive reply
//! arrives before the request times out.

use crate::domain::request::TestCommunicationRequest;
use crate::harness::{Heart, Module, ModuleTerminationReason};
use crate::library::communication::connection::BrokerClient;
use crate::library::communication::request::Requestor;
use crate::library::communication::CommunicationFactory;
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use tracing::{info, warn};

mod options;

pub use options::Options;

/// Module implementation
pub struct Probe<F> {
    factory: F,
    request: TestCommunicationRequest,
    client: Option<BrokerClient>,
}

impl Probe<BrokerClient> {
    /// Creates a new instance connecting to the configured broker
    pub fn new(options: Options) -> Self {
        let client = options.broker.client(&options.service.name);
        let request = TestCommunicationRequest::new(options.message, options.test_data);

        Self {
            factory: client.clone(),
            request,
            client: Some(client),
        }
    }
}

impl<F: CommunicationFactory> Probe<F> {
    /// Creates a new instance sending a prepared request through an arbitrary factory
    pub fn with_factory(factory: F, request: TestCommunicationRequest) -> Self {
        Self {
            factory,
            request,
            client: None,
        }
    }
}

#[async_trait]
impl<F> Module for Probe<F>
where
    F: CommunicationFactory + Send + Sync,
{
    async fn pre_startup(&mut self) -> EmptyResult {
        if let Some(client) = &self.client {
            client.connect().await?;
        }

        Ok(())
    }

    async fn run(&mut self) -> Result<Option<Heart>, BoxedError> {
        let requestor = self.factory.requestor();
        let reply = requestor.call(&self.request).await?;

        info!(
            success = reply.success,
            message = ?reply.message,
            received = ?reply.received_data,
            "Received test communication reply"
        );

        reply.into_result()?;
        Ok(None)
    }

    async fn post_shutdown(&mut self, termination_reason: &ModuleTerminationReason) {
        if let Some(client) = &self.client {
            if let Err(e) = client.close().await {
                warn!(error = %e, "Unable to close broker connection");
            }
        }

        info!(%termination_reason, "Probe terminated");
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::domain::{FailureKind, NoData, ServiceReply};
    use crate::harness::ModuleRunner;
    use crate::library::communication::implementation::mock::MockCommunicationFactory;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn request() -> TestCommunicationRequest {
        TestCommunicationRequest::new("ping", json!({ "ping": 1 }))
    }

    #[tokio::test]
    async fn succeed_on_positive_reply() {
        let request = request();
        let factory = MockCommunicationFactory::default();
        let reply = ServiceReply::ok("Communication successful", NoData {})
            .echoing(serde_json::to_value(&request).unwrap());
        factory.expect_and_respond(&request, reply);

        let reason = ModuleRunner::default()
            .run(Probe::with_factory(factory, request))
            .await;

        assert!(matches!(reason, ModuleTerminationReason::ExitedNormally));
    }

    #[tokio::test]
    async fn fail_on_negative_reply() {
        let request = request();
        let factory = MockCommunicationFactory::default();
        let reply = ServiceReply::failure(FailureKind::ForbiddenError, "not today");
        factory.expect_and_respond(&request, reply);

        let reason = ModuleRunner::default()
            .run(Probe::with_factory(factory, request))
            .await;

        assert!(matches!(
            reason,
            ModuleTerminationReason::OperationalError(_)
        ));
    }

    #[tokio::test]
    async fn fail_on_timeout() {
        let request = request();
        let factory = MockCommunicationFactory::default();
        factory.expect_and_time_out(&request);

        let reason = ModuleRunner::default()
            .run(Probe::with_factory(factory, request))
            .await;

        assert!(matches!(
            reason,
            ModuleTerminationReason::OperationalError(_)
        ));
    }

    #[tokio::test]
    async fn send_the_prepared_request_unchanged() {
        let request = request();
        let factory = MockCommunicationFactory::default();
        factory.expect_and_respond(&request, ServiceReply::ok("ok", NoData {}));

        let mut probe = Probe::with_factory(factory, request.clone());
        probe.run().await.unwrap();

        assert_eq!(probe.request, request);
    }
}
