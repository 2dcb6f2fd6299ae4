//! Lazily established broker connection which restores itself after failures
//!
//! A [`BrokerClient`] owns at most one connection at a time. The first caller of
//! [`BrokerClient::connect`] starts an attempt which every concurrent caller joins. Once
//! established, the connection is handed out to everybody until it breaks, at which point
//! the client forgets it and schedules a reconnect after a fixed delay. Reconnects are
//! retried until [`BrokerClient::close`] is called.
//!
//! Note that only the connection itself is restored. Queues, bindings and consumers
//! created on the previous connection are not re-established.

use super::channel::{Channel, Connector};
use super::error::BlackboxError;
use crate::constants::{
    BROKER_URL_ENV, DEFAULT_BROKER_LOOPBACK_URL, DEFAULT_BROKER_SERVICE_URL,
    DEFAULT_CONNECTION_NAME, DEFAULT_RECONNECT_DELAY, EXCHANGE_NAME,
};
use crate::library::helpers::dedup_ordered;
use crate::library::EmptyResult;
use futures::future::{BoxFuture, Shared};
use futures::lock::Mutex;
use futures::FutureExt;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Error returned when no broker connection could be obtained
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// Every candidate URL has been tried without success
    #[error("unable to reach any broker (tried {})", .attempted.join(", "))]
    Unreachable {
        /// URLs in the order they were attempted
        attempted: Vec<String>,
        /// Error of the last attempt
        #[source]
        source: BlackboxError,
    },
    /// Client has been closed explicitly
    #[error("broker client has been closed")]
    Closed,
}

/// Builds the ordered list of broker URLs to try
///
/// The service URL (usually the container name of the broker) comes first, followed by an
/// URL provided through the environment and finally the loopback address. Duplicates are removed.
pub fn candidate_urls(
    service: Option<String>,
    environment: Option<String>,
    loopback: Option<String>,
) -> Vec<String> {
    dedup_ordered(service.into_iter().chain(environment).chain(loopback))
}

/// Settings of a [`BrokerClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Broker URLs tried in order until one succeeds
    pub urls: Vec<String>,
    /// Topic exchange declared on every new connection
    pub exchange: String,
    /// Delay between losing a connection and the next attempt
    pub reconnect_delay: Duration,
    /// Name announced to the broker, also used as the consumer name
    pub connection_name: String,
}

impl ClientConfig {
    /// Creates a configuration with the given candidates and defaults for everything else
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            urls: dedup_ordered(urls),
            exchange: EXCHANGE_NAME.to_owned(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connection_name: DEFAULT_CONNECTION_NAME.to_owned(),
        }
    }

    /// Replaces the exchange name
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    /// Replaces the reconnect delay
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Replaces the connection name
    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = name.into();
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(candidate_urls(
            Some(DEFAULT_BROKER_SERVICE_URL.to_owned()),
            std::env::var(BROKER_URL_ENV).ok(),
            Some(DEFAULT_BROKER_LOOPBACK_URL.to_owned()),
        ))
    }
}

/// Established broker connection
pub struct Connection {
    generation: u64,
    url: String,
    exchange: String,
    channel: Arc<dyn Channel>,
}

impl Connection {
    /// Sequence number of this connection within its client, starting at one
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// URL the connection has been established with
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Exchange declared on this connection
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Channel to issue broker operations on
    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("generation", &self.generation)
            .field("url", &self.url)
            .field("exchange", &self.exchange)
            .finish()
    }
}

type ConnectResult = Result<Arc<Connection>, ConnectionError>;

enum State {
    Disconnected,
    Connecting(Shared<BoxFuture<'static, ConnectResult>>),
    Connected(Arc<Connection>),
}

struct Inner {
    connector: Arc<dyn Connector>,
    config: ClientConfig,
    state: Mutex<State>,
    generation: AtomicU64,
    closing: AtomicBool,
}

impl Inner {
    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    async fn open(&self) -> ConnectResult {
        let mut attempted = Vec::with_capacity(self.config.urls.len());
        let mut last_error = None;

        for url in self.config.urls.iter() {
            attempted.push(url.clone());
            info!(%url, "Connecting to broker");

            let channel = match self
                .connector
                .connect(url, &self.config.connection_name)
                .await
            {
                Ok(channel) => channel,
                Err(e) => {
                    warn!(%url, error = %e, "Broker connection attempt failed");
                    last_error = Some(BlackboxError::from_boxed(&e));
                    continue;
                }
            };

            if let Err(e) = channel.declare_exchange(&self.config.exchange).await {
                warn!(%url, exchange = %self.config.exchange, error = %e, "Unable to declare exchange");
                last_error = Some(BlackboxError::from_boxed(&e));
                channel.close().await.ok();
                continue;
            }

            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            info!(%url, generation, exchange = %self.config.exchange, "Connected to broker");

            return Ok(Arc::new(Connection {
                generation,
                url: url.clone(),
                exchange: self.config.exchange.clone(),
                channel,
            }));
        }

        let source = last_error
            .unwrap_or_else(|| BlackboxError::from_message("no broker urls configured"));

        error!(?attempted, error = %source, "Unable to connect to any broker");

        Err(ConnectionError::Unreachable { attempted, source })
    }
}

/// Shared handle to a broker connection
///
/// Cloning is cheap and all clones share the same connection.
#[derive(Clone)]
pub struct BrokerClient {
    inner: Arc<Inner>,
}

impl BrokerClient {
    /// Creates a new client which connects lazily
    pub fn new<C: Connector + 'static>(connector: C, config: ClientConfig) -> Self {
        Self::with_connector(Arc::new(connector), config)
    }

    /// Creates a new client from a shared connector
    pub fn with_connector(connector: Arc<dyn Connector>, config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                config,
                state: Mutex::new(State::Disconnected),
                generation: AtomicU64::new(0),
                closing: AtomicBool::new(false),
            }),
        }
    }

    /// Configuration the client has been created with
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Returns the established connection or waits for one to be established
    pub async fn connect(&self) -> ConnectResult {
        if self.inner.is_closing() {
            return Err(ConnectionError::Closed);
        }

        let attempt = {
            let mut state = self.inner.state.lock().await;

            match &*state {
                State::Connected(connection) => return Ok(connection.clone()),
                State::Connecting(attempt) => attempt.clone(),
                State::Disconnected => {
                    let attempt = establish(self.inner.clone()).boxed().shared();
                    *state = State::Connecting(attempt.clone());
                    attempt
                }
            }
        };

        attempt.await
    }

    /// Currently established connection, if any
    pub async fn current(&self) -> Option<Arc<Connection>> {
        match &*self.inner.state.lock().await {
            State::Connected(connection) => Some(connection.clone()),
            _ => None,
        }
    }

    /// Closes the connection and stops reconnecting
    ///
    /// Subsequent calls to [`connect`](BrokerClient::connect) fail with [`ConnectionError::Closed`].
    pub async fn close(&self) -> EmptyResult {
        self.inner.closing.store(true, Ordering::SeqCst);

        let previous = std::mem::replace(
            &mut *self.inner.state.lock().await,
            State::Disconnected,
        );

        if let State::Connected(connection) = previous {
            connection.channel.close().await?;
            info!(generation = connection.generation, "Closed broker connection");
        }

        Ok(())
    }
}

async fn establish(inner: Arc<Inner>) -> ConnectResult {
    let result = inner.open().await;
    let mut state = inner.state.lock().await;

    if inner.is_closing() {
        if let Ok(connection) = &result {
            connection.channel.close().await.ok();
        }

        *state = State::Disconnected;
        return Err(ConnectionError::Closed);
    }

    match &result {
        Ok(connection) => {
            *state = State::Connected(connection.clone());
            tokio::spawn(supervise(Arc::downgrade(&inner), connection.clone()));
        }
        Err(_) => *state = State::Disconnected,
    }

    result
}

/// Waits for the connection to break and restores it
fn supervise(inner: Weak<Inner>, connection: Arc<Connection>) -> BoxFuture<'static, ()> {
    async move {
        let reason = connection.channel.closed().await;
        let generation = connection.generation;

        // Releases what the broker side still holds for the lost connection
        if let Err(e) = connection.channel.close().await {
            debug!(generation, error = %e, "Cleanup of lost connection failed");
        }
        drop(connection);

        let delay = match inner.upgrade() {
            Some(inner) => {
                let mut state = inner.state.lock().await;

                if let State::Connected(current) = &*state {
                    if current.generation == generation {
                        *state = State::Disconnected;
                    }
                }

                if inner.is_closing() {
                    debug!(generation, %reason, "Broker connection closed");
                    return;
                }

                inner.config.reconnect_delay
            }
            None => return,
        };

        warn!(generation, %reason, ?delay, "Lost broker connection, scheduling reconnect");

        loop {
            sleep(delay).await;

            let client = match inner.upgrade() {
                Some(inner) => BrokerClient { inner },
                None => return,
            };

            match client.connect().await {
                Ok(connection) => {
                    info!(generation = connection.generation, "Broker connection restored");
                    return;
                }
                Err(ConnectionError::Closed) => return,
                Err(e) => warn!(error = %e, ?delay, "Reconnect attempt failed, retrying"),
            }
        }
    }
    .boxed()
}

#[cfg(test)]
mod does {
    use super::super::channel::{Delivery, PublishProperties, QueueOptions};
    use super::super::implementation::memory::MemoryBroker;
    use super::*;
    use crate::library::BoxedError;
    use futures::stream::BoxStream;
    use pretty_assertions::assert_eq;

    const URL: &str = "memory://broker";
    const NAME: &str = "connection-test";

    fn client(broker: &MemoryBroker, urls: Vec<&str>) -> BrokerClient {
        let config = ClientConfig::new(urls.into_iter().map(String::from).collect())
            .with_reconnect_delay(Duration::from_millis(10))
            .with_connection_name(NAME);

        BrokerClient::new(broker.clone(), config)
    }

    async fn wait_for_generation(client: &BrokerClient, generation: u64) -> bool {
        for _ in 0..200 {
            if let Some(connection) = client.current().await {
                if connection.generation() == generation {
                    return true;
                }
            }

            sleep(Duration::from_millis(5)).await;
        }

        false
    }

    #[test]
    fn order_candidates() {
        let urls = candidate_urls(
            Some("redis://broker/".into()),
            Some("redis://broker/".into()),
            Some("redis://127.0.0.1/".into()),
        );

        assert_eq!(urls, vec!["redis://broker/", "redis://127.0.0.1/"]);
        assert_eq!(candidate_urls(None, None, Some("a".into())), vec!["a"]);
    }

    #[tokio::test]
    async fn fall_back_to_later_candidates() {
        let broker = MemoryBroker::new(URL);
        let client = client(&broker, vec!["memory://missing", URL]);

        let connection = client.connect().await.unwrap();

        assert_eq!(connection.url(), URL);
        assert_eq!(connection.generation(), 1);
        assert_eq!(connection.exchange(), EXCHANGE_NAME);
    }

    #[tokio::test]
    async fn report_every_attempt_when_exhausted() {
        let broker = MemoryBroker::new(URL);
        broker.set_available(false);
        let client = client(&broker, vec!["memory://missing", URL]);

        match client.connect().await {
            Err(ConnectionError::Unreachable { attempted, source }) => {
                assert_eq!(attempted, vec!["memory://missing", URL]);
                assert_eq!(source.to_string(), "broker is unavailable");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn share_concurrent_attempts() {
        let broker = MemoryBroker::new(URL);
        let client = client(&broker, vec![URL]);

        let (first, second) = futures::join!(client.connect(), client.connect());

        assert_eq!(first.unwrap().generation(), 1);
        assert_eq!(second.unwrap().generation(), 1);
        assert_eq!(broker.connection_count(), 1);
    }

    #[tokio::test]
    async fn reconnect_after_connection_loss() {
        let broker = MemoryBroker::new(URL);
        let client = client(&broker, vec![URL]);
        client.connect().await.unwrap();

        assert_eq!(broker.sever(NAME), 1);

        assert!(wait_for_generation(&client, 2).await);
        assert_eq!(broker.connection_count(), 1);
    }

    /// Counts how often channels of the wrapped broker are closed
    struct CountingConnector {
        broker: MemoryBroker,
        closes: Arc<AtomicU64>,
    }

    struct CountingChannel {
        inner: Arc<dyn Channel>,
        closes: Arc<AtomicU64>,
    }

    #[async_trait::async_trait]
    impl Connector for CountingConnector {
        async fn connect(&self, url: &str, name: &str) -> Result<Arc<dyn Channel>, BoxedError> {
            let inner = self.broker.connect(url, name).await?;
            Ok(Arc::new(CountingChannel {
                inner,
                closes: self.closes.clone(),
            }))
        }
    }

    #[async_trait::async_trait]
    impl Channel for CountingChannel {
        async fn declare_exchange(&self, exchange: &str) -> EmptyResult {
            self.inner.declare_exchange(exchange).await
        }

        async fn declare_queue(&self, name: &str, options: &QueueOptions) -> Result<String, BoxedError> {
            self.inner.declare_queue(name, options).await
        }

        async fn bind_queue(&self, queue: &str, exchange: &str, pattern: &str) -> EmptyResult {
            self.inner.bind_queue(queue, exchange, pattern).await
        }

        async fn publish(
            &self,
            exchange: &str,
            routing_key: &str,
            body: &[u8],
            properties: &PublishProperties,
        ) -> Result<bool, BoxedError> {
            self.inner.publish(exchange, routing_key, body, properties).await
        }

        async fn send_to_queue(
            &self,
            queue: &str,
            body: &[u8],
            properties: &PublishProperties,
        ) -> Result<bool, BoxedError> {
            self.inner.send_to_queue(queue, body, properties).await
        }

        async fn consume(
            &self,
            queue: &str,
            prefetch: usize,
        ) -> Result<BoxStream<'static, Delivery>, BoxedError> {
            self.inner.consume(queue, prefetch).await
        }

        async fn close(&self) -> EmptyResult {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.inner.close().await
        }

        fn closed(&self) -> BoxFuture<'static, String> {
            self.inner.closed()
        }
    }

    #[tokio::test]
    async fn close_lost_channels_before_reconnecting() {
        let broker = MemoryBroker::new(URL);
        let closes = Arc::new(AtomicU64::new(0));
        let connector = CountingConnector {
            broker: broker.clone(),
            closes: closes.clone(),
        };
        let config = ClientConfig::new(vec![URL.to_owned()])
            .with_reconnect_delay(Duration::from_millis(10))
            .with_connection_name(NAME);
        let client = BrokerClient::new(connector, config);
        client.connect().await.unwrap();

        broker.sever(NAME);

        assert!(wait_for_generation(&client, 2).await);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn keep_retrying_while_broker_is_down() {
        let broker = MemoryBroker::new(URL);
        let client = client(&broker, vec![URL]);
        client.connect().await.unwrap();

        broker.set_available(false);
        broker.sever(NAME);
        sleep(Duration::from_millis(50)).await;

        assert!(client.current().await.is_none());

        broker.set_available(true);

        assert!(wait_for_generation(&client, 2).await);
    }

    #[tokio::test]
    async fn stop_after_close() {
        let broker = MemoryBroker::new(URL);
        let client = client(&broker, vec![URL]);
        client.connect().await.unwrap();

        client.close().await.unwrap();
        sleep(Duration::from_millis(50)).await;

        assert_eq!(broker.connection_count(), 0);
        assert!(matches!(client.connect().await, Err(ConnectionError::Closed)));
    }
}
