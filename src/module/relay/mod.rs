//! Sends one request or notification from the command line
//!
//! Useful to poke at services by hand. Replies are printed to stdout as JSON so they can be
//! piped into other tools.

use crate::harness::{Heart, Module, ModuleTerminationReason};
use crate::library::communication::connection::BrokerClient;
use crate::library::communication::event::Publisher;
use crate::library::communication::request::Requester;
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

mod options;

pub use options::{PublishOptions, RequestOptions};

enum Action {
    Request { timeout: Duration },
    Publish,
}

/// Module implementation
pub struct Relay {
    client: BrokerClient,
    action: Action,
    topic: String,
    payload: Value,
    reply: Option<Value>,
}

impl Relay {
    /// Creates an instance sending a request and printing its reply
    pub fn request(options: RequestOptions) -> Self {
        let client = options.broker.client(&options.service.name);
        Self::requesting(client, options.topic, options.payload, options.timeout)
    }

    /// Creates an instance publishing a notification
    pub fn publish(options: PublishOptions) -> Self {
        let client = options.broker.client(&options.service.name);
        Self::publishing(client, options.topic, options.payload)
    }

    /// Creates an instance sending a request through an existing client
    pub fn requesting(
        client: BrokerClient,
        topic: impl Into<String>,
        payload: Value,
        timeout: Duration,
    ) -> Self {
        Self::with_action(client, Action::Request { timeout }, topic.into(), payload)
    }

    /// Creates an instance publishing through an existing client
    pub fn publishing(client: BrokerClient, topic: impl Into<String>, payload: Value) -> Self {
        Self::with_action(client, Action::Publish, topic.into(), payload)
    }

    fn with_action(client: BrokerClient, action: Action, topic: String, payload: Value) -> Self {
        Self {
            client,
            action,
            topic,
            payload,
            reply: None,
        }
    }

    /// Full reply envelope received by the last request
    pub fn reply(&self) -> Option<&Value> {
        self.reply.as_ref()
    }
}

#[async_trait]
impl Module for Relay {
    async fn pre_startup(&mut self) -> EmptyResult {
        self.client.connect().await?;
        Ok(())
    }

    async fn run(&mut self) -> Result<Option<Heart>, BoxedError> {
        match self.action {
            Action::Request { timeout } => {
                let reply = Requester::new(self.client.clone())
                    .request_raw(&self.topic, &self.payload, timeout)
                    .await?;

                let reply = serde_json::to_value(&reply)?;
                println!("{}", serde_json::to_string_pretty(&reply)?);
                self.reply = Some(reply);
            }
            Action::Publish => {
                let accepted = Publisher::new(self.client.clone())
                    .publish_to(&self.topic, &self.payload)
                    .await?;

                if accepted {
                    info!(topic = %self.topic, "Published notification");
                } else {
                    warn!(topic = %self.topic, "Broker did not accept the notification");
                }
            }
        }

        Ok(None)
    }

    async fn post_shutdown(&mut self, termination_reason: &ModuleTerminationReason) {
        if let Err(e) = self.client.close().await {
            warn!(error = %e, "Unable to close broker connection");
        }

        if !termination_reason.is_success() {
            warn!(%termination_reason, topic = %self.topic, "Relay failed");
        }
    }
}
