//! Independent and project agnostic libraries
//!
//! Everything in here is written with the coffee platform services in mind but carries no
//! knowledge of them. Topic catalogs, payload structures and queue names live in the
//! [`domain`](super::domain) module instead.

pub mod communication;
pub mod helpers;

/// Generic error type
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result with no value and a [`BoxedError`]
pub type EmptyResult = Result<(), BoxedError>;
