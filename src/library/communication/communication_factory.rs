use super::connection::BrokerClient;
use super::event::{NotificationPublisher, Publisher};
use super::request::{Requester, Requestor};

/// Factory to provide implementations for the traits from this module
///
/// Modules depend on this trait instead of a concrete [`BrokerClient`] so their tests can
/// substitute the broker with expectations.
pub trait CommunicationFactory {
    /// [`NotificationPublisher`] implementation type
    type NotificationPublisher: NotificationPublisher + Send + Sync;

    /// [`Requestor`] implementation type
    type Requestor: Requestor + Send + Sync;

    /// Instantiates a new [`NotificationPublisher`]
    fn notification_publisher(&self) -> Self::NotificationPublisher;

    /// Instantiates a new [`Requestor`]
    ///
    /// Every instance listens on its own reply queue, so callers should hold on to it.
    fn requestor(&self) -> Self::Requestor;
}

impl CommunicationFactory for BrokerClient {
    type NotificationPublisher = Publisher;
    type Requestor = Requester;

    fn notification_publisher(&self) -> Self::NotificationPublisher {
        Publisher::new(self.clone())
    }

    fn requestor(&self) -> Self::Requestor {
        Requester::new(self.clone())
    }
}
