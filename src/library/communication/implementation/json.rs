//! Serialization and deserialization of [`Envelopes`](Envelope) provided by [`serde_json`]
//!
//! Publishers, requesters and responders all go through these two functions so that every
//! participant agrees on the wire layout. Exchanging the serialization format only requires
//! changing this module.

use super::super::envelope::Envelope;
use serde::ser::Error as _;
use serde::Serialize;
use serde_json::Value;

/// Key under which the metadata sits next to the payload fields
const METADATA_KEY: &str = "metadata";

/// Serializes an envelope using [`serde_json::to_vec`]
///
/// Fails if the payload does not serialize into a map or if it has a top-level `metadata`
/// field, as that would collide with the envelope's own.
pub fn encode<T: Serialize>(envelope: &Envelope<T>) -> Result<Vec<u8>, serde_json::Error> {
    match serde_json::to_value(&envelope.payload)? {
        Value::Object(fields) if fields.contains_key(METADATA_KEY) => Err(serde_json::Error::custom(
            "payload must not contain a top-level metadata field",
        )),
        _ => serde_json::to_vec(envelope),
    }
}

/// Parses raw bytes into an untyped envelope using [`serde_json::from_slice`]
pub fn decode(data: &[u8]) -> Result<Envelope<Value>, serde_json::Error> {
    serde_json::from_slice(data)
}
