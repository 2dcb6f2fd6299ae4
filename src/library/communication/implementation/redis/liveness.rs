//! Cleanup after connections that vanished without closing their channel
//!
//! Every channel refreshes `alive:<consumer>` with a short expiry while it is open. Transient
//! queues are registered in the `transient` hash along with the consumer that owns them.
//! Once the key of an owner expires, whoever sweeps next deletes its queues and the bindings
//! pointing at them. Stream entries handed to a consumer that is gone are claimed by the
//! readers of live consumers.

use super::channel::Link;
use super::{
    bindings_key, notify_if_disconnected, queue_key, BINDING_SEPARATOR, CONSUMER_GROUP,
    KEY_EXCHANGES, KEY_PREFIX_ALIVE, KEY_TRANSIENT,
};
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamPendingId};
use redis::{AsyncCommands, RedisResult};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Time after which a consumer without heartbeat counts as gone
const LIVENESS_TTL: Duration = Duration::from_secs(15);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const BEATS_PER_SWEEP: u32 = 6;

/// Upper bound of pending entries inspected per claim attempt
const CLAIM_BATCH: usize = 100;

pub(super) fn alive_key(consumer: &str) -> String {
    format!("{}{}", KEY_PREFIX_ALIVE, consumer)
}

/// Refreshes the liveness key of a consumer
pub(super) async fn beat(con: &mut MultiplexedConnection, consumer: &str) -> RedisResult<()> {
    con.pset_ex(alive_key(consumer), 1, LIVENESS_TTL.as_millis() as usize)
        .await
}

/// Heartbeat of a channel, sweeping orphans every few beats
pub(super) async fn keep_alive(link: Link, consumer: String) {
    let mut beats = 0u32;

    loop {
        sleep(HEARTBEAT_INTERVAL).await;

        if link.is_closed() {
            break;
        }

        let mut con = link.connection();
        let result = beat(&mut con, &consumer).await;
        notify_if_disconnected!(link, result);

        if let Err(e) = result {
            warn!(%consumer, error = %e, "Heartbeat failed");
            continue;
        }

        beats = beats.wrapping_add(1);
        if beats % BEATS_PER_SWEEP == 0 {
            if let Err(e) = sweep(&mut con).await {
                warn!(error = %e, "Unable to sweep orphaned queues");
            }
        }
    }

    debug!(%consumer, "Heartbeat stopped");
}

/// Consumers out of the given ones whose liveness key still exists
async fn living<'a, I>(con: &mut MultiplexedConnection, consumers: I) -> RedisResult<HashSet<String>>
where
    I: IntoIterator<Item = &'a String>,
{
    let unique: HashSet<&String> = consumers.into_iter().collect();
    let mut alive = HashSet::new();

    for consumer in unique {
        let exists: bool = con.exists(alive_key(consumer)).await?;
        if exists {
            alive.insert(consumer.clone());
        }
    }

    Ok(alive)
}

/// Deletes transient queues and their bindings whose owner is gone, returns how many
pub(super) async fn sweep(con: &mut MultiplexedConnection) -> RedisResult<usize> {
    let owners: HashMap<String, String> = con.hgetall(KEY_TRANSIENT).await?;
    if owners.is_empty() {
        return Ok(0);
    }

    let alive = living(con, owners.values()).await?;
    let orphans = orphaned_queues(&owners, &alive);
    if orphans.is_empty() {
        return Ok(0);
    }

    let exchanges: Vec<String> = con.smembers(KEY_EXCHANGES).await?;
    for exchange in exchanges {
        let key = bindings_key(&exchange);
        let members: Vec<String> = con.smembers(&key).await?;
        let stale = bindings_of(&members, &orphans);

        if !stale.is_empty() {
            let _: () = con.srem(&key, stale).await?;
        }
    }

    let keys: Vec<String> = orphans.iter().map(|q| queue_key(q)).collect();
    let _: () = con.del(keys).await?;
    let _: () = con.hdel(KEY_TRANSIENT, &orphans).await?;

    info!(deleted = orphans.len(), "Removed queues of vanished connections");

    Ok(orphans.len())
}

/// Takes over entries that were handed to consumers which are gone
pub(super) async fn claim_abandoned(
    con: &mut MultiplexedConnection,
    queue: &str,
    consumer: &str,
) -> RedisResult<Vec<StreamId>> {
    let key = queue_key(queue);
    let pending: StreamPendingCountReply = con
        .xpending_count(&key, CONSUMER_GROUP, "-", "+", CLAIM_BATCH)
        .await?;

    let alive = living(con, pending.ids.iter().map(|p| &p.consumer)).await?;
    let ids = abandoned(&pending.ids, consumer, &alive);
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let claimed: StreamClaimReply = con.xclaim(&key, CONSUMER_GROUP, consumer, 0, &ids[..]).await?;

    // Consumers are only forgotten once every one of their entries has been seen
    if pending.ids.len() < CLAIM_BATCH {
        let gone: HashSet<&String> = pending
            .ids
            .iter()
            .filter(|p| p.consumer != consumer && !alive.contains(&p.consumer))
            .map(|p| &p.consumer)
            .collect();

        for name in gone {
            let _: () = con.xgroup_delconsumer(&key, CONSUMER_GROUP, name).await?;
        }
    }

    Ok(claimed.ids)
}

/// Queues registered by owners that are not alive
pub(super) fn orphaned_queues(
    owners: &HashMap<String, String>,
    alive: &HashSet<String>,
) -> Vec<String> {
    let mut orphans: Vec<String> = owners
        .iter()
        .filter(|(_, owner)| !alive.contains(*owner))
        .map(|(queue, _)| queue.clone())
        .collect();

    orphans.sort();
    orphans
}

/// Binding set members that route into one of the given queues
pub(super) fn bindings_of<'a>(members: &'a [String], queues: &[String]) -> Vec<&'a String> {
    members
        .iter()
        .filter(|member| {
            member
                .split_once(BINDING_SEPARATOR)
                .map_or(false, |(queue, _)| queues.iter().any(|q| q == queue))
        })
        .collect()
}

/// Pending entry ids owned by consumers other than `own` that are not alive
pub(super) fn abandoned(
    pending: &[StreamPendingId],
    own: &str,
    alive: &HashSet<String>,
) -> Vec<String> {
    pending
        .iter()
        .filter(|p| p.consumer != own && !alive.contains(&p.consumer))
        .map(|p| p.id.clone())
        .collect()
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pending(id: &str, consumer: &str) -> StreamPendingId {
        StreamPendingId {
            id: id.to_owned(),
            consumer: consumer.to_owned(),
            last_delivered_ms: 0,
            times_delivered: 1,
        }
    }

    fn alive(consumers: &[&str]) -> HashSet<String> {
        consumers.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn prefix_heartbeat_keys() {
        assert_eq!(alive_key("api-1234"), "alive:api-1234");
    }

    #[test]
    fn find_queues_of_vanished_owners() {
        let owners: HashMap<String, String> = vec![
            ("amq.gen-a".to_owned(), "api-1".to_owned()),
            ("amq.gen-b".to_owned(), "api-2".to_owned()),
            ("amq.gen-c".to_owned(), "api-2".to_owned()),
        ]
        .into_iter()
        .collect();

        assert_eq!(orphaned_queues(&owners, &alive(&["api-1"])), vec!["amq.gen-b", "amq.gen-c"]);
        assert!(orphaned_queues(&owners, &alive(&["api-1", "api-2"])).is_empty());
    }

    #[test]
    fn select_bindings_into_orphaned_queues() {
        let members = vec![
            "amq.gen-a|user.#".to_owned(),
            "amq.gen-b|user.created".to_owned(),
            "durable|user.*".to_owned(),
            "malformed".to_owned(),
        ];
        let orphans = vec!["amq.gen-a".to_owned()];

        assert_eq!(bindings_of(&members, &orphans), vec!["amq.gen-a|user.#"]);
    }

    #[test]
    fn claim_only_entries_of_dead_consumers() {
        let entries = vec![
            pending("1-0", "api-self"),
            pending("2-0", "api-dead"),
            pending("3-0", "api-live"),
            pending("4-0", "api-dead"),
        ];

        assert_eq!(
            abandoned(&entries, "api-self", &alive(&["api-self", "api-live"])),
            vec!["2-0", "4-0"]
        );
    }

    #[test]
    fn never_claim_own_entries() {
        let entries = vec![pending("1-0", "api-self")];
        assert!(abandoned(&entries, "api-self", &HashSet::new()).is_empty());
    }
}
