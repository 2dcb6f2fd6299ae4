use super::super::super::channel::{
    closed_signal, Channel, Delivery, PublishProperties, QueueOptions,
};
use super::super::super::topic;
use super::delivery;
use super::liveness;
use super::reader::Reader;
use super::{
    bindings_key, notify_if_disconnected, queue_key, RedisBrokerError, BINDING_SEPARATOR,
    CONSUMER_GROUP, KEY_EXCHANGES, KEY_TRANSIENT, STREAM_ID_HEAD,
};
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::channel::mpsc::unbounded;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client, RedisError, RedisResult};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const UNLIMITED_PERMITS: usize = usize::MAX >> 4;

/// Shared command connection plus the close signal of a channel
#[derive(Clone)]
pub(super) struct Link {
    con: MultiplexedConnection,
    closed: Arc<watch::Sender<Option<String>>>,
    watcher: watch::Receiver<Option<String>>,
}

impl Link {
    fn new(con: MultiplexedConnection) -> Self {
        let (closed, watcher) = watch::channel(None);

        Self {
            con,
            closed: Arc::new(closed),
            watcher,
        }
    }

    pub(super) fn connection(&self) -> MultiplexedConnection {
        self.con.clone()
    }

    pub(super) fn is_closed(&self) -> bool {
        self.watcher.borrow().is_some()
    }

    pub(super) fn notify(&self, error: &RedisError) {
        self.close(format!("redis connection lost: {}", error));
    }

    /// Marks the channel as closed, waking everybody waiting for it
    pub(super) fn close(&self, reason: String) {
        if !self.is_closed() {
            warn!(%reason, "Marking redis channel as closed");
            self.closed.send(Some(reason)).ok();
        }
    }

    fn ensure_open(&self) -> Result<(), RedisBrokerError> {
        if self.is_closed() {
            Err(RedisBrokerError::ConnectionClosed)
        } else {
            Ok(())
        }
    }
}

/// Connects to the server, announces the new consumer and cleans up after vanished ones
pub(super) async fn open(url: &str, name: &str) -> Result<RedisChannel, BoxedError> {
    let client = Client::open(url)?;
    let mut con = client.get_multiplexed_tokio_connection().await?;

    let _: String = redis::cmd("PING").query_async(&mut con).await?;

    let consumer = format!("{}-{}", name, Uuid::new_v4());
    liveness::beat(&mut con, &consumer).await?;
    debug!(connection = name, %consumer, "Redis answered ping");

    if let Err(e) = liveness::sweep(&mut con).await {
        warn!(error = %e, "Unable to sweep orphaned queues");
    }

    let link = Link::new(con);
    let heartbeat = tokio::spawn(liveness::keep_alive(link.clone(), consumer.clone()));

    Ok(RedisChannel {
        client,
        link,
        name: name.to_owned(),
        consumer,
        heartbeat,
        transient_queues: Mutex::new(Vec::new()),
        transient_bindings: Mutex::new(Vec::new()),
        consumed_queues: Mutex::new(HashSet::new()),
    })
}

pub(super) struct RedisChannel {
    client: Client,
    link: Link,
    name: String,
    /// Unique per channel so replicas sharing a connection name never share pending entries
    consumer: String,
    heartbeat: JoinHandle<()>,
    transient_queues: Mutex<Vec<String>>,
    transient_bindings: Mutex<Vec<(String, String)>>,
    consumed_queues: Mutex<HashSet<String>>,
}

impl RedisChannel {
    pub(super) fn consumer(&self) -> &str {
        &self.consumer
    }

    fn checked<T>(&self, result: RedisResult<T>) -> Result<T, BoxedError> {
        notify_if_disconnected!(self.link, result);
        result.map_err(Into::into)
    }

    /// Returns entries this consumer received but never settled back to their stream
    async fn requeue_pending(&self, queue: &str) -> EmptyResult {
        let mut con = self.link.connection();
        let key = queue_key(queue);
        let options = StreamReadOptions::default().group(CONSUMER_GROUP, &self.consumer);

        let result: RedisResult<Option<StreamReadReply>> = con
            .xread_options(&[&key], &[STREAM_ID_HEAD], &options)
            .await;

        let entries = self
            .checked(result)?
            .and_then(|mut reply| reply.keys.pop())
            .map(|stream| stream.ids)
            .unwrap_or_default();

        for entry in entries.iter() {
            let result = match delivery::parse(entry) {
                Ok(message) => delivery::requeue(&mut con, queue, &entry.id, &message).await,
                Err(_) => delivery::remove(&mut con, queue, &entry.id).await,
            };

            self.checked(result)?;
        }

        let result: RedisResult<()> = con
            .xgroup_delconsumer(&key, CONSUMER_GROUP, &self.consumer)
            .await;
        self.checked(result)?;

        debug!(queue, requeued = entries.len(), "Returned pending entries");

        Ok(())
    }

    async fn remove_transient(&self) -> EmptyResult {
        let mut con = self.link.connection();

        let queues: Vec<String> = std::mem::take(
            &mut *self
                .transient_queues
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        let bindings: Vec<(String, String)> = std::mem::take(
            &mut *self
                .transient_bindings
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        for (key, member) in bindings {
            let result: RedisResult<()> = con.srem(&key, &member).await;
            self.checked(result)?;
        }

        if !queues.is_empty() {
            let keys: Vec<String> = queues.iter().map(|q| queue_key(q)).collect();
            let result: RedisResult<()> = con.del(keys).await;
            self.checked(result)?;

            let result: RedisResult<()> = con.hdel(KEY_TRANSIENT, &queues).await;
            self.checked(result)?;
        }

        debug!(deleted = queues.len(), "Removed transient queues");

        Ok(())
    }
}

#[async_trait]
impl Channel for RedisChannel {
    async fn declare_exchange(&self, exchange: &str) -> EmptyResult {
        self.link.ensure_open()?;

        let mut con = self.link.connection();
        let result: RedisResult<()> = con.sadd(KEY_EXCHANGES, exchange).await;
        self.checked(result)
    }

    async fn declare_queue(&self, name: &str, options: &QueueOptions) -> Result<String, BoxedError> {
        self.link.ensure_open()?;

        let name = if name.is_empty() {
            format!("amq.gen-{}", Uuid::new_v4())
        } else {
            name.to_owned()
        };

        let mut con = self.link.connection();
        let result: RedisResult<()> = con
            .xgroup_create_mkstream(queue_key(&name), CONSUMER_GROUP, STREAM_ID_HEAD)
            .await;
        self.checked(tolerate_existing_group(result))?;

        if options.is_transient() {
            let result: RedisResult<()> = con.hset(KEY_TRANSIENT, &name, &self.consumer).await;
            self.checked(result)?;

            self.transient_queues
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(name.clone());
        }

        Ok(name)
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, pattern: &str) -> EmptyResult {
        self.link.ensure_open()?;

        let mut con = self.link.connection();
        let key = bindings_key(exchange);
        let member = format!("{}{}{}", queue, BINDING_SEPARATOR, pattern);

        let result: RedisResult<()> = con.sadd(&key, &member).await;
        self.checked(result)?;

        let transient = self
            .transient_queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|q| q == queue);

        if transient {
            self.transient_bindings
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((key, member));
        }

        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        _properties: &PublishProperties,
    ) -> Result<bool, BoxedError> {
        self.link.ensure_open()?;

        let mut con = self.link.connection();

        let known: RedisResult<bool> = con.sismember(KEY_EXCHANGES, exchange).await;
        if !self.checked(known)? {
            return Err(RedisBrokerError::UnknownExchange(exchange.to_owned()).into());
        }

        let members: RedisResult<Vec<String>> = con.smembers(bindings_key(exchange)).await;

        let targets: HashSet<String> = self
            .checked(members)?
            .into_iter()
            .filter_map(|member| {
                member
                    .split_once(BINDING_SEPARATOR)
                    .filter(|(_, pattern)| topic::matches(pattern, routing_key))
                    .map(|(queue, _)| queue.to_owned())
            })
            .collect();

        for queue in targets {
            let result = delivery::append(&mut con, &queue, routing_key, body, 0).await;
            self.checked(result)?;
        }

        Ok(true)
    }

    async fn send_to_queue(
        &self,
        queue: &str,
        body: &[u8],
        _properties: &PublishProperties,
    ) -> Result<bool, BoxedError> {
        self.link.ensure_open()?;

        let mut con = self.link.connection();

        let exists: RedisResult<bool> = con.exists(queue_key(queue)).await;
        if self.checked(exists)? {
            let result = delivery::append(&mut con, queue, queue, body, 0).await;
            self.checked(result)?;
        } else {
            debug!(queue, "Dropping message addressed to unknown queue");
        }

        Ok(true)
    }

    async fn consume(
        &self,
        queue: &str,
        prefetch: usize,
    ) -> Result<BoxStream<'static, Delivery>, BoxedError> {
        self.link.ensure_open()?;

        // Blocking reads would stall every other user of the multiplexed connection
        let reader_con = self.client.get_async_connection().await;
        let reader_con = self.checked(reader_con)?;

        let permits = match prefetch {
            0 => UNLIMITED_PERMITS,
            limit => limit,
        };

        let (sender, receiver) = unbounded();
        let reader = Reader::new(
            reader_con,
            self.link.clone(),
            queue.to_owned(),
            self.consumer.clone(),
            Arc::new(Semaphore::new(permits)),
        );

        self.consumed_queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(queue.to_owned());

        tokio::spawn(reader.run(sender));
        debug!(queue, prefetch, "Started stream reader");

        Ok(receiver.boxed())
    }

    async fn close(&self) -> EmptyResult {
        self.heartbeat.abort();

        // Cleanup after a lost link is best effort, the sweep of other consumers covers the rest
        let lost = self.link.is_closed();

        let consumed: Vec<String> = self
            .consumed_queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        for queue in consumed {
            if let Err(e) = self.requeue_pending(&queue).await {
                warn!(queue = %queue, error = %e, "Unable to requeue pending entries");
            }
        }

        let result = self.remove_transient().await;

        let mut con = self.link.connection();
        let forgotten: RedisResult<()> = con.del(liveness::alive_key(&self.consumer)).await;
        if let Err(e) = forgotten {
            warn!(error = %e, "Unable to remove heartbeat key");
        }

        self.link.close(String::from("closed by client"));
        info!(connection = %self.name, "Closed redis channel");

        match result {
            Err(e) if lost => {
                debug!(error = %e, "Leaving transient queues of lost connection to the sweep");
                Ok(())
            }
            other => other,
        }
    }

    fn closed(&self) -> BoxFuture<'static, String> {
        closed_signal(self.link.watcher.clone())
    }
}

impl Drop for RedisChannel {
    fn drop(&mut self) {
        self.heartbeat.abort();
    }
}

/// Creating the group of an existing stream is answered with BUSYGROUP
fn tolerate_existing_group(result: RedisResult<()>) -> RedisResult<()> {
    match result {
        Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
        other => other,
    }
}
