//! Configuration for dcsandbox
//!
//! Parses the global `config.yaml` and owns the on-disk path layout
//! (`~/.config/dcsandbox` for configuration, `~/.dcsandbox` for data).

mod duration;
mod error;
mod global;

pub use duration::*;
pub use error::*;
pub use global::*;
