use super::super::envelope::{CorrelationId, Envelope};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

type Slots = HashMap<CorrelationId, oneshot::Sender<Envelope<Value>>>;

/// Registry of requests awaiting their reply, keyed by correlation id
#[derive(Clone, Default)]
pub struct PendingRequests {
    slots: Arc<Mutex<Slots>>,
}

impl PendingRequests {
    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserves a slot for the reply to the given correlation id
    ///
    /// The slot is released when the returned [`PendingReply`] is dropped, whether or not
    /// a reply has been received.
    pub fn register(&self, correlation_id: CorrelationId) -> PendingReply {
        let (sender, receiver) = oneshot::channel();
        self.slots().insert(correlation_id.clone(), sender);

        PendingReply {
            correlation_id,
            receiver,
            registry: self.clone(),
        }
    }

    /// Hands a reply to whoever is waiting for it
    ///
    /// Returns false if nobody is waiting for the correlation id, e.g. because the request
    /// timed out already.
    pub fn resolve(&self, reply: Envelope<Value>) -> bool {
        let sender = match &reply.metadata.correlation_id {
            Some(id) => self.slots().remove(id),
            None => None,
        };

        match sender {
            Some(sender) => sender.send(reply).is_ok(),
            None => false,
        }
    }

    /// Number of requests currently waiting
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    /// Whether no request is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Slot for a single reply, see [`PendingRequests::register`]
pub struct PendingReply {
    correlation_id: CorrelationId,
    receiver: oneshot::Receiver<Envelope<Value>>,
    registry: PendingRequests,
}

impl PendingReply {
    /// Correlation id this slot waits for
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Waits for the reply, returns `None` if the registry went away
    pub async fn receive(mut self) -> Option<Envelope<Value>> {
        (&mut self.receiver).await.ok()
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.registry.slots().remove(&self.correlation_id);
    }
}

#[cfg(test)]
mod does {
    use super::super::super::envelope::Metadata;
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn reply(correlation_id: &str, payload: Value) -> Envelope<Value> {
        let request = Metadata::request(correlation_id.into(), "replies".into());
        Envelope::with_metadata(payload, request.reply())
    }

    #[tokio::test]
    async fn deliver_replies_to_their_requests() {
        let pending = PendingRequests::default();
        let first = pending.register("a".into());
        let second = pending.register("b".into());

        assert!(pending.resolve(reply("b", json!({ "n": 2 }))));
        assert!(pending.resolve(reply("a", json!({ "n": 1 }))));

        assert_eq!(first.receive().await.unwrap().payload, json!({ "n": 1 }));
        assert_eq!(second.receive().await.unwrap().payload, json!({ "n": 2 }));
        assert!(pending.is_empty());
    }

    #[test]
    fn ignore_unknown_replies() {
        let pending = PendingRequests::default();
        let _slot = pending.register("a".into());

        assert!(!pending.resolve(reply("z", json!({}))));
        assert!(!pending.resolve(Envelope::new(json!({}))));
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn release_slots_when_abandoned() {
        let pending = PendingRequests::default();
        let slot = pending.register("a".into());

        drop(slot);

        assert!(pending.is_empty());
        assert!(!pending.resolve(reply("a", json!({}))));
    }
}
