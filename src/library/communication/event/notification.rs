use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// Entity to notify other services about an event that took place
pub trait Notification: Serialize + DeserializeOwned + PartialEq + Debug {
    /// Topic on which this implementation is published and received
    fn topic() -> &'static str;
}
