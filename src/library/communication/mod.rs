//! Messaging between services over a shared message broker
//!
//! Every service connects to the same broker and talks through a single topic exchange.
//! There are two modes of operation:
//!
//! 1. Publish and subscribe
//! 2. Request and reply
//!
//! The first is used for event notifications. A [`Publisher`](event::Publisher) sends a
//! message to a topic and does not care who receives it. Any number of
//! [`Subscribers`](event::Subscriber) may bind queues to the topic and process the messages.
//! For more details, consult the [`event`] module.
//!
//! The second mode builds on the first. A [`Requester`](request::Requester) publishes a
//! message tagged with a correlation id and the name of its private reply queue and waits
//! for exactly one reply, or gives up after a timeout. For more details, consult the
//! [`request`] module.
//!
//! Both modes share one [`BrokerClient`](connection::BrokerClient) which establishes the
//! connection lazily and re-establishes it after failures. The broker itself is abstracted
//! by the [`Channel`](channel::Channel) trait with implementations in [`implementation`].

mod communication_factory;
mod error;

pub mod channel;
pub mod connection;
pub mod envelope;
pub mod event;
pub mod implementation;
pub mod request;
pub mod topic;

pub use communication_factory::CommunicationFactory;
pub use error::BlackboxError;
