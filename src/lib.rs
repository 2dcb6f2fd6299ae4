//! This library crate contains everything needed to exchange messages between the services of the coffee platform.
//!
//! Submodules have been introduced to split responsibilities. They form a chain of dependencies from the
//! low-level [`library`] containing the broker client, over the platform specific message catalog in [`domain`],
//! through the executable [`harness`], up to the high-level [`modules`](module) run by the `switchboard` binary.

#![deny(missing_docs)]
#![allow(clippy::nonstandard_macro_braces)]

pub mod constants;
pub mod domain;
pub mod harness;
pub mod library;
#[cfg(feature = "redis-broker")]
pub mod module;
