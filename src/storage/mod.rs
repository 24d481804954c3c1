//! # Page Storage
//!
//! The compact tree never owns its pages. It reads and writes them through
//! the [`PageStore`] trait, which models a transactional page store:
//!
//! ```text
//! ┌──────────────────────────────┐
//! │         CompactTree          │
//! ├──────────────────────────────┤
//! │  page()        read-only     │
//! │  page_mut()    copy-on-write │
//! │  allocate_page / free_page   │
//! │  scratch_page  scoped buffer │
//! ├──────────────────────────────┤
//! │   MemoryPageStore / host     │
//! └──────────────────────────────┘
//! ```
//!
//! ## Copy-on-Write Contract
//!
//! `page_mut` is the only way to obtain writable page bytes. A store that
//! supports concurrent readers must hand out a private copy the first time
//! a page is modified within a transaction, so readers holding an older
//! snapshot never observe partial mutations. [`MemoryPageStore`] does this
//! with `Arc::make_mut`.
//!
//! ## Page Numbers
//!
//! Page numbers are `u32`. Page 0 is a valid page; the tree never uses 0 as
//! a sentinel.

mod memory_store;

pub use memory_store::MemoryPageStore;

use crate::memory::ScratchPage;
use eyre::Result;

/// The page-store interface consumed by the tree.
///
/// Every page handed out is exactly `PAGE_SIZE` bytes.
pub trait PageStore {
    /// Read-only view of an allocated page.
    fn page(&self, page_no: u32) -> Result<&[u8]>;

    /// Writable view of an allocated page, copied first if shared.
    fn page_mut(&mut self, page_no: u32) -> Result<&mut [u8]>;

    /// Allocates one zeroed page.
    fn allocate_page(&mut self) -> Result<u32>;

    /// Releases a page. Accessing it afterwards is an error until it is
    /// handed out again by `allocate_page`.
    fn free_page(&mut self, page_no: u32) -> Result<()>;

    /// Number of currently allocated pages.
    fn page_count(&self) -> usize;

    /// A full-page scratch buffer released when the guard drops.
    fn scratch_page(&self) -> ScratchPage;

    /// Allocates `count` pages and returns their numbers in allocation order.
    fn allocate_pages(&mut self, count: usize) -> Result<Vec<u32>> {
        (0..count).map(|_| self.allocate_page()).collect()
    }
}
