//! Runnable modules of the `switchboard` binary
//!
//! Each module implements [`Module`](crate::harness::Module) and is executed by the
//! [`ModuleRunner`](crate::harness::ModuleRunner).

pub mod diagnostics;
pub mod options;
pub mod probe;
pub mod relay;
