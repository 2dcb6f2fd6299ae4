use crate::library::communication::request::{Request, RequestError, Requestor};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

struct ExpectedRequest {
    topic: &'static str,
    payload: Value,
    response: Option<Value>,
}

/// Requestor answering expected requests with canned responses
///
/// Expectations are consumed in order. Panics on drop if any of them has not been met.
#[derive(Default)]
pub struct MockRequestor {
    expected: Mutex<VecDeque<ExpectedRequest>>,
}

impl MockRequestor {
    /// Expects a request and answers it with `response`
    pub fn expect_and_respond<R: Request>(&self, request: &R, response: R::Response) -> &Self {
        self.push(request, Some(serde_json::to_value(response).unwrap()))
    }

    /// Expects a request which never receives a reply
    pub fn expect_and_time_out<R: Request>(&self, request: &R) -> &Self {
        self.push(request, None)
    }

    fn push<R: Request>(&self, request: &R, response: Option<Value>) -> &Self {
        self.expected.lock().unwrap().push_back(ExpectedRequest {
            topic: R::topic(),
            payload: serde_json::to_value(request).unwrap(),
            response,
        });

        self
    }

    /// Number of expectations not met yet
    pub fn remaining(&self) -> usize {
        self.expected.lock().unwrap().len()
    }
}

#[async_trait]
impl Requestor for Arc<MockRequestor> {
    async fn call<Q>(&self, request: &Q) -> Result<Q::Response, RequestError>
    where
        Q: Request + Send + Sync,
        Q::Response: Send,
    {
        let payload = serde_json::to_value(request).unwrap();
        let expected = self.expected.lock().unwrap().pop_front();

        let expected = match expected {
            Some(expected) => expected,
            None => panic!("Received unexpected request on {}: {}", Q::topic(), payload),
        };

        assert_eq!(expected.topic, Q::topic(), "request sent on wrong topic");
        assert_eq!(expected.payload, payload);

        match expected.response {
            Some(response) => serde_json::from_value(response).map_err(RequestError::MalformedReply),
            None => Err(RequestError::Timeout {
                topic: Q::topic().to_owned(),
                timeout: Q::timeout(),
            }),
        }
    }
}

impl Drop for MockRequestor {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            let remaining = self.remaining();

            if remaining > 0 {
                panic!(
                    "MockRequestor was dropped with {} expected requests remaining",
                    remaining
                );
            }
        }
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::library::communication::event::Notification;
    use pretty_assertions::assert_eq;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
    struct Pong(usize);

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping(usize);

    impl Notification for Ping {
        fn topic() -> &'static str {
            "t.echo"
        }
    }

    impl Request for Ping {
        type Response = Pong;
    }

    #[tokio::test]
    async fn fulfill_expectations() {
        let requestor = Arc::new(MockRequestor::default());
        requestor.expect_and_respond(&Ping(42), Pong(42));

        assert_eq!(requestor.call(&Ping(42)).await.unwrap(), Pong(42));
    }

    #[tokio::test]
    async fn simulate_timeouts() {
        let requestor = Arc::new(MockRequestor::default());
        requestor.expect_and_time_out(&Ping(42));

        let result = requestor.call(&Ping(42)).await;

        assert!(matches!(result, Err(RequestError::Timeout { .. })));
    }

    #[tokio::test]
    #[should_panic]
    async fn fail_on_different_content() {
        let requestor = Arc::new(MockRequestor::default());
        requestor.expect_and_respond(&Ping(42), Pong(42));

        requestor.call(&Ping(1337)).await.unwrap();
    }

    #[tokio::test]
    #[should_panic]
    async fn fail_on_unexpected() {
        let requestor = Arc::new(MockRequestor::default());
        requestor.call(&Ping(42)).await.unwrap();
    }

    #[test]
    #[should_panic]
    fn fail_on_missing() {
        MockRequestor::default().expect_and_respond(&Ping(42), Pong(42));
    }
}
