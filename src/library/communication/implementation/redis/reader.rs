use super::super::super::channel::Delivery;
use super::channel::Link;
use super::{
    delivery, liveness, notify_if_disconnected, queue_key, CONSUMER_GROUP,
    STREAM_ID_ADDITIONS, STREAM_ID_HEAD,
};
use futures::channel::mpsc::UnboundedSender;
use redis::aio::Connection;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

/// Milliseconds a single read blocks before the reader re-checks whether it should stop
const BLOCK_MILLIS: usize = 1_000;

/// Pause between looking for entries of vanished consumers
const CLAIM_INTERVAL: Duration = Duration::from_secs(30);

/// Feeds entries of one stream into a delivery channel
///
/// Starts with the pending entries of its consumer and switches to new additions once those
/// are exhausted. Every now and then it takes over entries of consumers that vanished.
/// A failing read closes the link so the owner of the channel notices and reconnects.
pub(super) struct Reader {
    con: Connection,
    link: Link,
    queue: String,
    consumer: String,
    permits: Arc<Semaphore>,
    last_claim: Option<Instant>,
}

impl Reader {
    pub(super) fn new(
        con: Connection,
        link: Link,
        queue: String,
        consumer: String,
        permits: Arc<Semaphore>,
    ) -> Self {
        Self {
            con,
            link,
            queue,
            consumer,
            permits,
            last_claim: None,
        }
    }

    fn claim_due(&self) -> bool {
        self.last_claim
            .map_or(true, |last| last.elapsed() >= CLAIM_INTERVAL)
    }

    /// Delivers entries abandoned by vanished consumers, returns false once nobody listens
    async fn claim(&mut self, sender: &UnboundedSender<Delivery>) -> RedisResult<bool> {
        self.last_claim = Some(Instant::now());

        let mut con = self.link.connection();
        let claimed = liveness::claim_abandoned(&mut con, &self.queue, &self.consumer).await;
        notify_if_disconnected!(self.link, claimed);
        let claimed = claimed?;

        if !claimed.is_empty() {
            info!(queue = %self.queue, claimed = claimed.len(), "Took over entries of vanished consumers");
        }

        for entry in claimed {
            let permit = match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return Ok(false),
            };

            if !self.forward(sender, entry, permit, true).await {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Hands an entry to the consumer, returns false once nobody listens
    async fn forward(
        &self,
        sender: &UnboundedSender<Delivery>,
        entry: StreamId,
        permit: OwnedSemaphorePermit,
        taken_over: bool,
    ) -> bool {
        let entry_id = entry.id.clone();

        match delivery::build(self.link.clone(), self.queue.clone(), entry, permit, taken_over) {
            Ok(delivery) => sender.unbounded_send(delivery).is_ok(),
            Err(e) => {
                warn!(queue = %self.queue, error = %e, "Discarding unreadable stream entry");
                let mut con = self.link.connection();
                delivery::remove(&mut con, &self.queue, &entry_id).await.ok();
                true
            }
        }
    }

    pub(super) async fn run(mut self, sender: UnboundedSender<Delivery>) {
        let key = queue_key(&self.queue);
        let mut id = STREAM_ID_HEAD.to_owned();
        let options = StreamReadOptions::default()
            .group(CONSUMER_GROUP, &self.consumer)
            .count(1)
            .block(BLOCK_MILLIS);

        while !sender.is_closed() && !self.link.is_closed() {
            // Claimed entries join the own pending list, so they are only taken once it is walked
            if id == STREAM_ID_ADDITIONS && self.claim_due() {
                match self.claim(&sender).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        self.fail("claim entries of vanished consumers", e);
                        break;
                    }
                }
            }

            let permit = match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let result: RedisResult<Option<StreamReadReply>> =
                self.con.xread_options(&[&key], &[&id], &options).await;

            notify_if_disconnected!(self.link, result);

            let entries = match result {
                Ok(reply) => reply
                    .and_then(|mut reply| reply.keys.pop())
                    .map(|stream| stream.ids)
                    .unwrap_or_default(),
                Err(e) => {
                    self.fail("read from stream", e);
                    break;
                }
            };

            // Walk through the pending entries and move on to new ones once they are exhausted
            if id != STREAM_ID_ADDITIONS {
                id = match entries.last() {
                    Some(entry) => entry.id.clone(),
                    None => STREAM_ID_ADDITIONS.to_owned(),
                };
            }

            if let Some(entry) = entries.into_iter().next() {
                if !self.forward(&sender, entry, permit, false).await {
                    break;
                }
            }
        }

        debug!(queue = %self.queue, "Stream reader stopped");
    }

    /// Closes the link, consumers relying on this reader would otherwise wait forever
    fn fail(&self, action: &str, error: redis::RedisError) {
        error!(queue = %self.queue, error = %error, "Failed to {}", action);
        self.link.close(failure_reason(&self.queue, action, &error));
    }
}

fn failure_reason(queue: &str, action: &str, error: &dyn std::fmt::Display) -> String {
    format!("stream reader of {} failed to {}: {}", queue, action, error)
}
