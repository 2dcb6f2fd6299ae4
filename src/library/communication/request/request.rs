use super::super::event::Notification;
use crate::constants::DEFAULT_REQUEST_TIMEOUT;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::time::Duration;

/// Query for information which can be replied to
///
/// Requests travel on their [`topic`](Notification::topic) like any other notification but
/// carry a correlation id and the name of a reply queue in their metadata. Exactly one
/// responder processes each request, since responders of one service share a named queue.
///
/// Note that a requester gives up after its [`timeout`](Request::timeout) without knowing
/// whether the request has been processed. Requests with side effects should therefore be
/// idempotent or the outcome should be verifiable by other means.
pub trait Request: Notification {
    /// Expected response type
    type Response: Serialize + DeserializeOwned + Debug + PartialEq;

    /// Time to wait for a reply before giving up
    fn timeout() -> Duration {
        DEFAULT_REQUEST_TIMEOUT
    }
}
