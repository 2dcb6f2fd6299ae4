//! Runtime harness to execute modules with a managed lifecycle

mod heart;
mod module;

pub use heart::*;
pub use module::*;
