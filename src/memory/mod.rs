//! # Memory Management
//!
//! Pooled scratch buffers used by page maintenance.
//!
//! - [`page_buffer`]: bounded pool of page-sized scratch buffers with
//!   release-on-drop guards

pub mod page_buffer;

pub use page_buffer::{ScratchPage, ScratchPagePool};
