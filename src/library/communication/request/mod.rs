//! Request and reply on top of the shared topic exchange
//!
//! A [`Requester`] publishes a message carrying a fresh correlation id and the name of its
//! private reply queue, then waits for the reply with that id. Responders consume requests
//! from a named queue like any other subscriber and send their result straight into the
//! reply queue (see [`Subscriber::respond_to`](super::event::Subscriber::respond_to)).
//!
//! Concurrent requests share the reply queue and are told apart by their correlation id,
//! so replies may arrive in any order. Replies to requests that already timed out are dropped.

mod pending;
mod request;
mod requestor;
mod responder;

pub use pending::*;
pub use request::*;
pub use requestor::*;
pub use responder::*;
