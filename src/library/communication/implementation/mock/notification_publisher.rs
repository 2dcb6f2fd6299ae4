use super::ExpectationMode;
use crate::library::communication::event::{Notification, NotificationPublisher, PublishError};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct ExpectedNotification {
    topic: &'static str,
    payload: Value,
}

/// Publisher verifying notifications against a list of expectations
///
/// Panics on drop if any expectation has not been met.
pub struct MockNotificationPublisher {
    expected: Mutex<VecDeque<ExpectedNotification>>,
    mode: ExpectationMode,
}

impl Default for MockNotificationPublisher {
    fn default() -> Self {
        Self {
            expected: Mutex::new(VecDeque::new()),
            mode: ExpectationMode::Strict,
        }
    }
}

impl MockNotificationPublisher {
    /// Creates a publisher which ignores unexpected notifications
    pub fn permitting_noise() -> Self {
        Self {
            expected: Mutex::new(VecDeque::new()),
            mode: ExpectationMode::AllowNoise,
        }
    }

    /// Expects the given notification to be published next
    pub fn expect<N: Notification>(&self, notification: &N) -> &Self {
        self.expected.lock().unwrap().push_back(ExpectedNotification {
            topic: N::topic(),
            payload: serde_json::to_value(notification).unwrap(),
        });

        self
    }

    /// Number of expectations not met yet
    pub fn remaining(&self) -> usize {
        self.expected.lock().unwrap().len()
    }

    fn receive<N: Notification>(&self, notification: &N) {
        let payload = serde_json::to_value(notification).unwrap();
        let mut expected = self.expected.lock().unwrap();

        match self.mode {
            ExpectationMode::Strict => match expected.pop_front() {
                Some(next) => {
                    assert_eq!(next.topic, N::topic(), "notification published on wrong topic");
                    assert_eq!(next.payload, payload);
                }
                None => panic!(
                    "Unexpected notification was published to {}: {}",
                    N::topic(),
                    payload
                ),
            },
            ExpectationMode::AllowNoise => {
                let matches = expected
                    .front()
                    .map(|next| next.topic == N::topic() && next.payload == payload)
                    .unwrap_or(false);

                if matches {
                    expected.pop_front();
                }
            }
        }
    }
}

#[async_trait]
impl NotificationPublisher for Arc<MockNotificationPublisher> {
    async fn publish<N: Notification + Send + Sync>(
        &self,
        notification: &N,
    ) -> Result<bool, PublishError> {
        self.receive(notification);
        Ok(true)
    }
}

impl Drop for MockNotificationPublisher {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            let remaining = self.remaining();

            if remaining > 0 {
                panic!(
                    "MockNotificationPublisher was dropped with {} expected notifications remaining",
                    remaining
                );
            }
        }
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct AdminInfoRequested {
        admin_id: String,
    }

    impl Notification for AdminInfoRequested {
        fn topic() -> &'static str {
            "admin.getAdminInfo"
        }
    }

    fn requested(admin_id: &str) -> AdminInfoRequested {
        AdminInfoRequested {
            admin_id: admin_id.into(),
        }
    }

    #[tokio::test]
    async fn fulfill_expectations() {
        let publisher = Arc::new(MockNotificationPublisher::default());

        publisher.expect(&requested("42"));
        publisher.publish(&requested("42")).await.unwrap();
    }

    #[tokio::test]
    async fn allow_noise() {
        let publisher = Arc::new(MockNotificationPublisher::permitting_noise());

        publisher.expect(&requested("42"));
        publisher.publish(&requested("1")).await.unwrap();
        publisher.publish(&requested("42")).await.unwrap();
        publisher.publish(&requested("2")).await.unwrap();
    }

    #[tokio::test]
    #[should_panic]
    async fn fail_on_different_content() {
        let publisher = Arc::new(MockNotificationPublisher::default());

        publisher.expect(&requested("42"));
        publisher.publish(&requested("43")).await.unwrap();
    }

    #[tokio::test]
    #[should_panic]
    async fn fail_on_unexpected() {
        let publisher = Arc::new(MockNotificationPublisher::default());
        publisher.publish(&requested("42")).await.unwrap();
    }

    #[test]
    #[should_panic]
    fn fail_on_missing() {
        MockNotificationPublisher::default().expect(&requested("42"));
    }
}
