//! Requests exchanged between platform services, grouped by the responding service

mod admin_auth;
mod user_auth;

pub use admin_auth::*;
pub use user_auth::*;
