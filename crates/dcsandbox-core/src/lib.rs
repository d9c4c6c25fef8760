//! Core logic for dcsandbox sandbox orchestration
//!
//! This crate provides:
//! - The sandbox lifecycle engine (create, start, stop, remove, cleanup)
//! - Durable sandbox records and the on-disk store
//! - Project auto-detection over a cloned tree
//! - Template lookup and Containerfile synthesis
//! - Crash recovery and the background timeout reaper

mod clone;
mod containerfile;
mod detect;
mod engine;
mod error;
mod record;
mod resources;
mod store;
mod template;

pub use clone::*;
pub use containerfile::*;
pub use detect::*;
pub use engine::*;
pub use error::*;
pub use record::*;
pub use resources::*;
pub use store::*;
pub use template::*;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
