use super::super::error::BlackboxError;
use crate::constants::DEAD_LETTER_PREFIX;
use serde::{Deserialize, Serialize};

/// Record of a message which has been given up on
///
/// Published on `dead-letter.<topic>` whenever a message could not be decoded or kept
/// failing for more deliveries than allowed. Operators may subscribe to `dead-letter.#`
/// to inspect or replay them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    /// Topic the message was originally published on
    pub topic: String,
    /// Queue from which the message has been removed
    pub queue: String,
    /// Number of deliveries including the final one
    pub attempts: u32,
    /// Why processing gave up
    pub reason: BlackboxError,
    /// Original message body, lossily converted to UTF-8
    pub body: String,
}

impl DeadLetter {
    /// Creates a new record for a raw message body
    pub fn new(topic: &str, queue: &str, attempts: u32, reason: BlackboxError, body: &[u8]) -> Self {
        Self {
            topic: topic.to_owned(),
            queue: queue.to_owned(),
            attempts,
            reason,
            body: String::from_utf8_lossy(body).into_owned(),
        }
    }
}

/// Topic on which dead letters of the given topic are published
pub fn dead_letter_topic(topic: &str) -> String {
    format!("{}.{}", DEAD_LETTER_PREFIX, topic)
}

#[cfg(test)]
mod does {
    use super::*;

    #[test]
    fn prefix_topic() {
        assert_eq!(dead_letter_topic("admin.auth.getMe"), "dead-letter.admin.auth.getMe");
    }

    #[test]
    fn keep_unreadable_bodies() {
        let letter = DeadLetter::new("t", "q", 1, BlackboxError::from_message("x"), &[0xff, b'a']);
        assert_eq!(letter.body, "\u{fffd}a");
    }
}
