//! Wire representation of every message exchanged over the broker
//!
//! Payload fields and the [`Metadata`] block are siblings at the top level of the
//! serialized JSON object:
//!
//! ```text
//! {
//!   "adminId": "42",
//!   "metadata": {
//!     "eventId": "…",
//!     "correlationId": "…" | null,
//!     "replyTo": "…" | null,
//!     "timestamp": "2024-01-01T00:00:00Z"
//!   }
//! }
//! ```
//!
//! Consequently a payload has to serialize into a map (any struct or JSON object will do).

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier of a published message
pub type EventId = String;

/// Identifier linking a reply to the request it answers
pub type CorrelationId = String;

/// Name of the queue a reply should be delivered to
pub type ReplyLocation = String;

/// Context attached to each message
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Unique id generated for every single message
    pub event_id: EventId,
    /// Present on requests and replies, absent on plain notifications
    pub correlation_id: Option<CorrelationId>,
    /// Present on requests only
    pub reply_to: Option<ReplyLocation>,
    /// Time at which the message was created
    pub timestamp: DateTime<Utc>,
}

impl Metadata {
    /// Metadata for a fire-and-forget message
    pub fn notification() -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            correlation_id: None,
            reply_to: None,
            timestamp: Utc::now(),
        }
    }

    /// Metadata for a request expecting a reply at `reply_to`
    pub fn request(correlation_id: CorrelationId, reply_to: ReplyLocation) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            reply_to: Some(reply_to),
            ..Self::notification()
        }
    }

    /// Metadata for a reply to a request carrying `self` as its metadata
    pub fn reply(&self) -> Self {
        Self {
            correlation_id: self.correlation_id.clone(),
            ..Self::notification()
        }
    }

    /// Whether the sender is waiting for a reply
    pub fn expects_reply(&self) -> bool {
        self.correlation_id.is_some() && self.reply_to.is_some()
    }
}

/// Payload combined with its [`Metadata`]
///
/// The payload is flattened next to the metadata, so it must not have a `metadata` field itself.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    /// Business content
    #[serde(flatten)]
    pub payload: T,
    /// Message context
    pub metadata: Metadata,
}

impl<T> Envelope<T> {
    /// Wraps a payload with freshly generated notification metadata
    pub fn new(payload: T) -> Self {
        Self {
            payload,
            metadata: Metadata::notification(),
        }
    }

    /// Wraps a payload with existing metadata
    pub fn with_metadata(payload: T, metadata: Metadata) -> Self {
        Self { payload, metadata }
    }

    /// Consumes the envelope, returning the payload
    pub fn into_payload(self) -> T {
        self.payload
    }
}

impl Envelope<Value> {
    /// Converts the untyped payload into a concrete type
    pub fn decode_payload<T: DeserializeOwned>(self) -> Result<Envelope<T>, serde_json::Error> {
        Ok(Envelope {
            payload: serde_json::from_value(self.payload)?,
            metadata: self.metadata,
        })
    }
}
