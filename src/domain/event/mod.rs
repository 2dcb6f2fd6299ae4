//! Notifications published on the platform

mod admin;

pub use admin::*;
