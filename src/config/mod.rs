//! # CompactTree Configuration
//!
//! Compile-time layout constants live in [`constants`]; per-tree runtime
//! knobs live in [`TreeConfig`].
//!
//! ## Module Organization
//!
//! - [`constants`]: page layout, key limits and maintenance thresholds
//! - [`tree_config`]: runtime configuration with builder-style setters

pub mod constants;
pub mod tree_config;

pub use constants::*;
pub use tree_config::TreeConfig;
