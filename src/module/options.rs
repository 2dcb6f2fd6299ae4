//! Various options usable by modules
//!
//! The structs in this module allow other modules to flatten them into
//! their own options struct. This allows for a unified yet non-cluttered
//! option set.

use crate::library::communication::connection::{candidate_urls, BrokerClient, ClientConfig};
use crate::library::communication::implementation::redis::RedisConnector;
use crate::library::helpers::parse_seconds;
use std::time::Duration;
use structopt::StructOpt;

/// Options for connecting to the message broker
#[derive(Debug, StructOpt)]
pub struct BrokerOptions {
    /// Broker URL using the service name of the broker, tried first
    #[structopt(
        long = "broker-service-url",
        env = "BROKER_SERVICE_URL",
        global = true,
        default_value = "redis://broker:6379/",
        value_name = "url"
    )]
    pub service_url: String,

    /// Broker URL provided by the environment, tried second
    #[structopt(long = "broker-url", env = "BROKER_URL", global = true, value_name = "url")]
    pub url: Option<String>,

    /// Broker URL on the local machine, tried last
    #[structopt(
        long = "broker-loopback-url",
        env = "BROKER_LOOPBACK_URL",
        global = true,
        default_value = "redis://127.0.0.1:6379/",
        value_name = "url"
    )]
    pub loopback_url: String,

    /// Name of the topic exchange shared by all services
    #[structopt(
        long,
        env = "BROKER_EXCHANGE",
        global = true,
        default_value = "coffee_platform_events"
    )]
    pub exchange: String,

    /// Seconds to wait before re-establishing a lost connection
    #[structopt(long, env = "BROKER_RECONNECT_DELAY", global = true, default_value = "5", parse(try_from_str = parse_seconds))]
    pub reconnect_delay: Duration,
}

impl BrokerOptions {
    /// Client configuration announcing itself under the given name
    pub fn client_config(&self, connection_name: &str) -> ClientConfig {
        let urls = candidate_urls(
            Some(self.service_url.clone()),
            self.url.clone(),
            Some(self.loopback_url.clone()),
        );

        ClientConfig::new(urls)
            .with_exchange(self.exchange.clone())
            .with_reconnect_delay(self.reconnect_delay)
            .with_connection_name(connection_name)
    }

    /// Lazily connecting client for the configured broker
    pub fn client(&self, connection_name: &str) -> BrokerClient {
        BrokerClient::new(RedisConnector, self.client_config(connection_name))
    }
}

/// Options identifying the running service
#[derive(Debug, StructOpt)]
pub struct ServiceOptions {
    /// Name of this service, used as connection name and queue name prefix
    #[structopt(long = "service-name", env = "SERVICE_NAME", global = true, default_value = "switchboard")]
    pub name: String,
}
