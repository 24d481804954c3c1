//! # Compact Tree
//!
//! A B-tree over fixed-size pages whose keys are stored encoded with a
//! per-page dictionary. Values are non-negative integers; on branch pages
//! they are child page numbers.
//!
//! ## Page Layout
//!
//! ```text
//! +--------------------+ 0
//! | header (16 bytes)  |
//! +--------------------+ 16
//! | entry offsets u16  |  grows up to `lower`
//! +--------------------+ lower
//! |     free space     |
//! +--------------------+ upper
//! | entries            |  grow down from PAGE_SIZE
//! +--------------------+ PAGE_SIZE
//! ```
//!
//! Each entry is `[key bits: u16][encoded key][zig-zag varint value]`.
//!
//! ## Module Organization
//!
//! - `page`: header, search and in-place page mutations
//! - `encoded_key`: a key with cached encodings per dictionary
//! - `cursor`: root-to-leaf path of the current operation
//! - `state`: persisted tree metadata
//! - `tree`: handle, lookups and forward iteration
//! - `insert`: insertion, splits and recompression
//! - `remove`: removal, merges and height collapse
//! - `training`: dictionary retraining at commit
//! - `diagnostics`: page walks and structural verification

pub mod cursor;
mod diagnostics;
pub mod encoded_key;
mod insert;
pub mod page;
mod remove;
pub mod state;
mod training;
mod tree;

pub use cursor::{Cursor, CursorState};
pub use diagnostics::PageSummary;
pub use encoded_key::{EncodedKey, EncodedKeyPool};
pub use page::{PageFlags, PageView, PageViewMut, SearchResult};
pub use state::TreeState;
pub use tree::{CompactTree, TreeStatistics};
