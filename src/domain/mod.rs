//! Message catalog of the coffee platform
//!
//! Each request and notification is bound to its topic through the
//! [`Notification`](crate::library::communication::event::Notification) trait, so services
//! never spell out topic strings themselves.

mod records;
mod reply;

pub mod event;
pub mod request;

pub use records::*;
pub use reply::*;
