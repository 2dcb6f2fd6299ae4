use super::{MockNotificationPublisher, MockRequestor};
use crate::library::communication::event::Notification;
use crate::library::communication::request::Request;
use crate::library::communication::CommunicationFactory;
use std::sync::Arc;

/// Factory handing out shared mocks so expectations can be set up front
pub struct MockCommunicationFactory {
    publisher: Arc<MockNotificationPublisher>,
    requestor: Arc<MockRequestor>,
}

impl CommunicationFactory for MockCommunicationFactory {
    type NotificationPublisher = Arc<MockNotificationPublisher>;
    type Requestor = Arc<MockRequestor>;

    fn notification_publisher(&self) -> Self::NotificationPublisher {
        self.publisher.clone()
    }

    fn requestor(&self) -> Self::Requestor {
        self.requestor.clone()
    }
}

impl Default for MockCommunicationFactory {
    fn default() -> Self {
        Self {
            publisher: Arc::new(MockNotificationPublisher::default()),
            requestor: Arc::new(MockRequestor::default()),
        }
    }
}

// Shorthands for the publisher / requestor expectations
impl MockCommunicationFactory {
    /// See [`MockRequestor::expect_and_respond`]
    pub fn expect_and_respond<R: Request>(&self, request: &R, response: R::Response) -> &Self {
        self.requestor.expect_and_respond(request, response);
        self
    }

    /// See [`MockRequestor::expect_and_time_out`]
    pub fn expect_and_time_out<R: Request>(&self, request: &R) -> &Self {
        self.requestor.expect_and_time_out(request);
        self
    }

    /// See [`MockNotificationPublisher::expect`]
    pub fn expect<N: Notification>(&self, notification: &N) -> &Self {
        self.publisher.expect(notification);
        self
    }
}
