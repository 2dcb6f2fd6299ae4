//! Broker implementation on top of [Redis Streams](https://redis.io/topics/streams-intro)
//!
//! Each queue is a stream with a single consumer group. Exchange bindings are stored in a
//! set per exchange and evaluated by the publishing side, so routing happens on the client.
//!
//! - Publishing appends the message to every stream whose binding pattern matches
//! - Consuming reads pending entries of the consumer first and then blocks for new ones
//! - Acknowledging removes the entry from the pending list and the stream
//! - Requeueing appends a copy with an incremented delivery count
//!
//! Every channel consumes under its own name (`<connection>-<uuid>`) and keeps a heartbeat key
//! alive. Transient queues of connections whose heartbeat expired are removed by the others,
//! and entries those connections left unsettled are claimed by the remaining readers.
//!
//! Durability is whatever the Redis server is configured for.

mod channel;
mod delivery;
mod liveness;
mod reader;

use super::super::channel::{Channel, Connector};
use crate::library::BoxedError;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

const CONSUMER_GROUP: &str = "consumers";
const KEY_EXCHANGES: &str = "exchanges";
const KEY_PREFIX_QUEUE: &str = "queue:";
const KEY_PREFIX_BINDINGS: &str = "bindings:";
const BINDING_SEPARATOR: char = '|';
const KEY_TRANSIENT: &str = "transient";
const KEY_PREFIX_ALIVE: &str = "alive:";

const FIELD_PAYLOAD: &str = "payload";
const FIELD_ROUTING_KEY: &str = "routing_key";
const FIELD_DELIVERIES: &str = "deliveries";

const STREAM_ID_NEW: &str = "*";
const STREAM_ID_HEAD: &str = "0";
const STREAM_ID_ADDITIONS: &str = ">";

/// Reports connection loss to a [`Link`](channel::Link) when a command failed due to it
macro_rules! notify_if_disconnected {
    ($link:expr, $result:expr) => {
        if let Err(ref e) = $result {
            if e.is_connection_dropped()
                || e.is_io_error()
                || e.is_connection_refusal()
                || e.is_timeout()
            {
                $link.notify(e);
            }
        }
    };
}

pub(self) use notify_if_disconnected;

fn queue_key(queue: &str) -> String {
    format!("{}{}", KEY_PREFIX_QUEUE, queue)
}

fn bindings_key(exchange: &str) -> String {
    format!("{}{}", KEY_PREFIX_BINDINGS, exchange)
}

/// Errors specific to the Redis broker
#[derive(Error, Debug)]
pub enum RedisBrokerError {
    /// Exchange has not been declared
    #[error("exchange {0} does not exist")]
    UnknownExchange(String),
    /// Stream entry lacks the payload field
    #[error("stream entry {0} contains no payload")]
    MissingPayload(String),
    /// Operation on a connection that has been closed
    #[error("connection is closed")]
    ConnectionClosed,
}

/// [`Connector`] for `redis://` URLs
#[derive(Debug, Default, Clone, Copy)]
pub struct RedisConnector;

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(&self, url: &str, name: &str) -> Result<Arc<dyn Channel>, BoxedError> {
        Ok(Arc::new(channel::open(url, name).await?))
    }
}
