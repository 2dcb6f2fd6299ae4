//! Test doubles which record what a module sends instead of talking to a broker

mod factory;
mod notification_publisher;
mod requestor;

pub use factory::*;
pub use notification_publisher::*;
pub use requestor::*;

/// How strictly a mock compares what it receives against its expectations
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpectationMode {
    /// Everything received has to be expected, in order
    Strict,
    /// Unexpected messages in between are ignored, expected ones still have to arrive in order
    AllowNoise,
}
