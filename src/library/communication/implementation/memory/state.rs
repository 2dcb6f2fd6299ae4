use super::super::super::channel::{Acknowledger, Delivery, QueueOptions};
use super::super::super::topic;
use super::MemoryBrokerError;
use crate::library::EmptyResult;
use async_trait::async_trait;
use futures::channel::mpsc::UnboundedSender;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, trace};

pub(super) type ConnectionId = u64;
type ConsumerId = u64;
type DeliveryTag = u64;

#[derive(Debug, Clone)]
pub(super) struct Message {
    body: Vec<u8>,
    routing_key: String,
    deliveries: u32,
}

struct Consumer {
    id: ConsumerId,
    connection: ConnectionId,
    sender: UnboundedSender<Delivery>,
    prefetch: usize,
    in_flight: usize,
}

impl Consumer {
    fn has_capacity(&self) -> bool {
        self.prefetch == 0 || self.in_flight < self.prefetch
    }
}

struct Unacked {
    message: Message,
    consumer: ConsumerId,
    connection: ConnectionId,
}

struct Queue {
    options: QueueOptions,
    owner: ConnectionId,
    ready: VecDeque<Message>,
    unacked: HashMap<DeliveryTag, Unacked>,
    consumers: Vec<Consumer>,
    next_consumer: usize,
}

struct Binding {
    exchange: String,
    pattern: String,
    queue: String,
}

pub(super) struct Connection {
    pub(super) name: String,
    closed: watch::Sender<Option<String>>,
}

impl Connection {
    pub(super) fn closed_receiver(&self) -> watch::Receiver<Option<String>> {
        self.closed.subscribe()
    }
}

/// Complete broker state guarded by a single lock
pub(super) struct State {
    pub(super) available: bool,
    exchanges: HashSet<String>,
    queues: HashMap<String, Queue>,
    bindings: Vec<Binding>,
    pub(super) connections: HashMap<ConnectionId, Connection>,
    next_id: u64,
}

pub(super) type SharedState = Arc<Mutex<State>>;

pub(super) fn lock(state: &SharedState) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for State {
    fn default() -> Self {
        Self {
            available: true,
            exchanges: HashSet::new(),
            queues: HashMap::new(),
            bindings: Vec::new(),
            connections: HashMap::new(),
            next_id: 1,
        }
    }
}

impl State {
    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(super) fn open_connection(
        &mut self,
        name: &str,
    ) -> (ConnectionId, watch::Receiver<Option<String>>) {
        let id = self.next_id();
        let (closed, receiver) = watch::channel(None);

        self.connections.insert(
            id,
            Connection {
                name: name.to_owned(),
                closed,
            },
        );

        (id, receiver)
    }

    pub(super) fn ensure_open(&self, connection: ConnectionId) -> Result<(), MemoryBrokerError> {
        if self.connections.contains_key(&connection) {
            Ok(())
        } else {
            Err(MemoryBrokerError::ConnectionClosed)
        }
    }

    pub(super) fn declare_exchange(&mut self, exchange: &str) {
        self.exchanges.insert(exchange.to_owned());
    }

    pub(super) fn declare_queue(
        &mut self,
        connection: ConnectionId,
        name: &str,
        options: &QueueOptions,
    ) -> Result<String, MemoryBrokerError> {
        let name = if name.is_empty() {
            format!("amq.gen-{}", self.next_id())
        } else {
            name.to_owned()
        };

        if let Some(existing) = self.queues.get(&name) {
            if existing.options.exclusive && existing.owner != connection {
                return Err(MemoryBrokerError::ResourceLocked(name));
            }

            return Ok(name);
        }

        self.queues.insert(
            name.clone(),
            Queue {
                options: options.clone(),
                owner: connection,
                ready: VecDeque::new(),
                unacked: HashMap::new(),
                consumers: Vec::new(),
                next_consumer: 0,
            },
        );

        Ok(name)
    }

    pub(super) fn bind_queue(
        &mut self,
        queue: &str,
        exchange: &str,
        pattern: &str,
    ) -> Result<(), MemoryBrokerError> {
        if !self.exchanges.contains(exchange) {
            return Err(MemoryBrokerError::UnknownExchange(exchange.to_owned()));
        }

        if !self.queues.contains_key(queue) {
            return Err(MemoryBrokerError::UnknownQueue(queue.to_owned()));
        }

        let exists = self
            .bindings
            .iter()
            .any(|b| b.exchange == exchange && b.pattern == pattern && b.queue == queue);

        if !exists {
            self.bindings.push(Binding {
                exchange: exchange.to_owned(),
                pattern: pattern.to_owned(),
                queue: queue.to_owned(),
            });
        }

        Ok(())
    }

    /// Routes a message to every queue bound with a matching pattern
    pub(super) fn publish(
        &mut self,
        state: &SharedState,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
    ) -> Result<(), MemoryBrokerError> {
        if !self.exchanges.contains(exchange) {
            return Err(MemoryBrokerError::UnknownExchange(exchange.to_owned()));
        }

        let targets: HashSet<String> = self
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange && topic::matches(&b.pattern, routing_key))
            .map(|b| b.queue.clone())
            .collect();

        if targets.is_empty() {
            trace!(exchange, routing_key, "Dropping unroutable message");
        }

        for queue in targets {
            self.enqueue(state, &queue, routing_key, body);
        }

        Ok(())
    }

    /// Appends a message to a queue, silently dropping it if the queue does not exist
    pub(super) fn enqueue(&mut self, state: &SharedState, queue: &str, routing_key: &str, body: &[u8]) {
        match self.queues.get_mut(queue) {
            Some(target) => {
                target.ready.push_back(Message {
                    body: body.to_vec(),
                    routing_key: routing_key.to_owned(),
                    deliveries: 0,
                });

                self.dispatch(state, queue);
            }
            None => debug!(queue, "Dropping message addressed to unknown queue"),
        }
    }

    pub(super) fn add_consumer(
        &mut self,
        state: &SharedState,
        connection: ConnectionId,
        queue: &str,
        prefetch: usize,
        sender: UnboundedSender<Delivery>,
    ) -> Result<(), MemoryBrokerError> {
        let id = self.next_id();
        let target = self
            .queues
            .get_mut(queue)
            .ok_or_else(|| MemoryBrokerError::UnknownQueue(queue.to_owned()))?;

        if target.options.exclusive && target.owner != connection {
            return Err(MemoryBrokerError::ResourceLocked(queue.to_owned()));
        }

        target.consumers.push(Consumer {
            id,
            connection,
            sender,
            prefetch,
            in_flight: 0,
        });

        self.dispatch(state, queue);

        Ok(())
    }

    /// Hands ready messages to consumers with spare capacity in round-robin order
    fn dispatch(&mut self, state: &SharedState, queue_name: &str) {
        let mut dispatched = 0;

        let queue = match self.queues.get_mut(queue_name) {
            Some(queue) => queue,
            None => return,
        };

        while !queue.ready.is_empty() {
            queue.consumers.retain(|c| !c.sender.is_closed());

            let count = queue.consumers.len();
            let candidate = (0..count)
                .map(|offset| (queue.next_consumer + offset) % count)
                .find(|index| queue.consumers[*index].has_capacity());

            let index = match candidate {
                Some(index) => index,
                None => break,
            };

            let mut message = match queue.ready.pop_front() {
                Some(message) => message,
                None => break,
            };

            message.deliveries += 1;
            queue.next_consumer = (index + 1) % count;

            let tag = self.next_id;
            self.next_id += 1;

            let consumer = &mut queue.consumers[index];
            let acker = MemoryAcknowledger {
                state: state.clone(),
                queue: queue_name.to_owned(),
                tag,
            };
            let delivery = Delivery::new(
                message.body.clone(),
                message.routing_key.clone(),
                message.deliveries,
                Box::new(acker),
            );

            match consumer.sender.unbounded_send(delivery) {
                Ok(()) => {
                    consumer.in_flight += 1;
                    queue.unacked.insert(
                        tag,
                        Unacked {
                            message,
                            consumer: consumer.id,
                            connection: consumer.connection,
                        },
                    );
                    dispatched += 1;
                }
                Err(_) => {
                    message.deliveries -= 1;
                    queue.ready.push_front(message);
                }
            }
        }

        if dispatched > 0 {
            trace!(queue = queue_name, dispatched, "Dispatched messages");
        }
    }

    fn settle(
        &mut self,
        state: &SharedState,
        queue_name: &str,
        tag: DeliveryTag,
        requeue: bool,
    ) -> Result<(), MemoryBrokerError> {
        let queue = self
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| MemoryBrokerError::UnknownQueue(queue_name.to_owned()))?;

        let entry = queue
            .unacked
            .remove(&tag)
            .ok_or(MemoryBrokerError::UnknownDeliveryTag(tag))?;

        if let Some(consumer) = queue.consumers.iter_mut().find(|c| c.id == entry.consumer) {
            consumer.in_flight = consumer.in_flight.saturating_sub(1);
        }

        if requeue {
            queue.ready.push_front(entry.message);
        }

        self.dispatch(state, queue_name);

        Ok(())
    }

    /// Tears down a connection, returning the reason to its watchers
    ///
    /// Unsettled messages go back to their queues and queues owned by
    /// the connection which are exclusive or auto-deleting are removed.
    pub(super) fn close_connection(
        &mut self,
        state: &SharedState,
        connection: ConnectionId,
        reason: &str,
    ) {
        let handle = match self.connections.remove(&connection) {
            Some(handle) => handle,
            None => return,
        };

        let mut removed = Vec::new();

        for (name, queue) in self.queues.iter_mut() {
            queue.consumers.retain(|c| c.connection != connection);

            let mut returned: Vec<(DeliveryTag, Message)> = queue
                .unacked
                .iter()
                .filter(|(_, entry)| entry.connection == connection)
                .map(|(tag, entry)| (*tag, entry.message.clone()))
                .collect();

            // Restore the original order before putting them back in front
            returned.sort_by_key(|(tag, _)| *tag);

            for (tag, message) in returned.into_iter().rev() {
                queue.unacked.remove(&tag);
                queue.ready.push_front(message);
            }

            if queue.owner == connection && queue.options.is_transient() {
                removed.push(name.clone());
            }
        }

        for name in removed.iter() {
            self.queues.remove(name);
        }

        self.bindings.retain(|b| !removed.contains(&b.queue));

        let names: Vec<String> = self.queues.keys().cloned().collect();
        for name in names {
            self.dispatch(state, &name);
        }

        debug!(connection = %handle.name, reason, deleted = removed.len(), "Connection closed");
        handle.closed.send(Some(reason.to_owned())).ok();
    }

    pub(super) fn queue_depth(&self, queue: &str) -> Option<usize> {
        self.queues.get(queue).map(|q| q.ready.len())
    }

    pub(super) fn unacked_count(&self, queue: &str) -> Option<usize> {
        self.queues.get(queue).map(|q| q.unacked.len())
    }

    pub(super) fn consumer_count(&self, queue: &str) -> Option<usize> {
        self.queues
            .get(queue)
            .map(|q| q.consumers.iter().filter(|c| !c.sender.is_closed()).count())
    }
}

struct MemoryAcknowledger {
    state: SharedState,
    queue: String,
    tag: DeliveryTag,
}

#[async_trait]
impl Acknowledger for MemoryAcknowledger {
    async fn ack(&self) -> EmptyResult {
        lock(&self.state).settle(&self.state, &self.queue, self.tag, false)?;
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> EmptyResult {
        lock(&self.state).settle(&self.state, &self.queue, self.tag, requeue)?;
        Ok(())
    }
}
