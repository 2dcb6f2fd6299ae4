//! Fire-and-forget messaging on the shared topic exchange
//!
//! A [`Publisher`] wraps payloads in an [`Envelope`](super::envelope::Envelope) and sends
//! them to a topic. A [`Subscriber`] binds a queue to a topic and hands every message to a
//! [`MessageHandler`] whose [`Disposition`] decides whether it is acknowledged or put back.
//!
//! Queues created with a name are shared: every subscriber using the same name receives
//! a fair share of the messages, which is how services scale horizontally. Anonymous
//! queues are private to one connection and disappear with it.
//!
//! Messages that can not be decoded, or keep failing for more than
//! [`SubscribeOptions::max_deliveries`] deliveries, are removed from their queue and
//! republished as a [`DeadLetter`] on [`dead_letter_topic`].
//!
//! Strongly typed messages implement the [`Notification`] trait which ties them to their topic.

mod consumer;
mod dead_letter;
mod handler;
mod notification;
mod publisher;
mod subscriber;

pub use consumer::*;
pub use dead_letter::*;
pub use handler::*;
pub use notification::*;
pub use publisher::*;
pub use subscriber::*;
