//! # compact-tree
//!
//! A page-based B-tree mapping byte keys to non-negative integers, with
//! keys stored compressed by order-preserving dictionaries that can change
//! over the tree's lifetime.
//!
//! ```ignore
//! use compact_tree::{CompactTree, DictionaryRegistry, MemoryPageStore, TreeConfig};
//!
//! let mut store = MemoryPageStore::new();
//! let registry = DictionaryRegistry::new();
//! let mut tree = CompactTree::create(&mut store, &registry, TreeConfig::default())?;
//!
//! tree.add(b"users/42", 7)?;
//! assert_eq!(tree.try_get_value(b"users/42")?, Some(7));
//! tree.prepare_for_commit()?;
//! ```
//!
//! ## Layers
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │   CompactTree (insert/remove/iterate) │
//! ├──────────────────┬───────────────────┤
//! │  Cursor, Encoded │  Dictionaries     │
//! │  keys            │  (rank codes)     │
//! ├──────────────────┴───────────────────┤
//! │   Slotted pages (header, offsets)     │
//! ├──────────────────────────────────────┤
//! │   PageStore (copy-on-write pages)     │
//! └──────────────────────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`compact_tree`]: the tree handle, page layout, cursor and encoded keys
//! - [`dictionary`]: order-preserving key compression and its registry
//! - [`storage`]: the page store interface and an in-memory implementation
//! - [`memory`]: pooled scratch pages
//! - [`encoding`]: zig-zag varints for entry values
//! - [`config`]: layout constants and runtime settings

#[macro_use]
mod macros;

pub mod compact_tree;
pub mod config;
pub mod dictionary;
pub mod encoding;
pub mod memory;
pub mod storage;

pub use compact_tree::{CompactTree, PageFlags, PageSummary, TreeState, TreeStatistics};
pub use config::TreeConfig;
pub use dictionary::{Dictionary, DictionaryId, DictionaryRegistry};
pub use storage::{MemoryPageStore, PageStore};
