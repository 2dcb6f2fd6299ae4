//! Values shared between modules which are not configurable at runtime

use std::time::Duration;

/// Name of the topic exchange every service publishes to
pub const EXCHANGE_NAME: &str = "coffee_platform_events";

/// Broker URL derived from the service name of the broker container
pub const DEFAULT_BROKER_SERVICE_URL: &str = "redis://broker:6379/";

/// Broker URL on the local machine, tried last
pub const DEFAULT_BROKER_LOOPBACK_URL: &str = "redis://127.0.0.1:6379/";

/// Environment variable which may carry a broker URL
pub const BROKER_URL_ENV: &str = "BROKER_URL";

/// Delay between losing a broker connection and attempting to reconnect
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Time a requester waits for a reply unless told otherwise
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Number of messages a subscriber processes concurrently
pub const DEFAULT_PREFETCH: usize = 10;

/// Number of deliveries after which a failing message is dead-lettered
pub const DEFAULT_MAX_DELIVERIES: u32 = 5;

/// Topic prefix under which undeliverable messages are republished
pub const DEAD_LETTER_PREFIX: &str = "dead-letter";

/// Connection name used when no service name has been configured
pub const DEFAULT_CONNECTION_NAME: &str = "switchboard";
