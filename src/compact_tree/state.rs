//! Persisted tree metadata.
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  ------------------
//! 0       4     magic "CTRE"
//! 4       4     root_page
//! 8       4     flags
//! 12      4     reserved
//! 16      8     number_of_entries
//! 24      8     branch_pages
//! 32      8     leaf_pages
//! 40      8     tree_dictionary_id
//! 48      8     next_train_at
//! ```
//!
//! The state lives at the start of its own header page and is copied into
//! the handle on open; it is written back by `prepare_for_commit`.

use std::mem::size_of;

use eyre::{ensure, eyre, Result};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::dictionary::DictionaryId;

pub const TREE_STATE_MAGIC: u32 = u32::from_le_bytes(*b"CTRE");

pub const TREE_STATE_SIZE: usize = 56;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeState {
    pub root_page: u32,
    pub number_of_entries: u64,
    pub branch_pages: u64,
    pub leaf_pages: u64,
    pub tree_dictionary_id: DictionaryId,
    pub next_train_at: u64,
    pub flags: u32,
}

impl TreeState {
    pub fn new(root_page: u32, next_train_at: u64) -> Self {
        Self {
            root_page,
            number_of_entries: 0,
            branch_pages: 0,
            leaf_pages: 1,
            tree_dictionary_id: DictionaryId::IDENTITY,
            next_train_at,
            flags: 0,
        }
    }

    pub fn read_from(page: &[u8]) -> Result<Self> {
        ensure!(
            page.len() >= TREE_STATE_SIZE,
            "buffer too small for tree state: {} < {}",
            page.len(),
            TREE_STATE_SIZE
        );
        let header = TreeStateHeader::ref_from_bytes(&page[..TREE_STATE_SIZE])
            .map_err(|e| eyre!("failed to read tree state: {:?}", e))?;
        ensure!(
            header.magic() == TREE_STATE_MAGIC,
            "not a compact tree header page (magic {:#010x})",
            header.magic()
        );
        Ok(Self {
            root_page: header.root_page(),
            number_of_entries: header.number_of_entries(),
            branch_pages: header.branch_pages(),
            leaf_pages: header.leaf_pages(),
            tree_dictionary_id: DictionaryId::new(header.tree_dictionary_id()),
            next_train_at: header.next_train_at(),
            flags: header.flags(),
        })
    }

    pub fn write_to(&self, page: &mut [u8]) -> Result<()> {
        ensure!(
            page.len() >= TREE_STATE_SIZE,
            "buffer too small for tree state: {} < {}",
            page.len(),
            TREE_STATE_SIZE
        );
        let header = TreeStateHeader::mut_from_bytes(&mut page[..TREE_STATE_SIZE])
            .map_err(|e| eyre!("failed to write tree state: {:?}", e))?;
        header.set_magic(TREE_STATE_MAGIC);
        header.set_root_page(self.root_page);
        header.set_flags(self.flags);
        header.set_reserved(0);
        header.set_number_of_entries(self.number_of_entries);
        header.set_branch_pages(self.branch_pages);
        header.set_leaf_pages(self.leaf_pages);
        header.set_tree_dictionary_id(self.tree_dictionary_id.get());
        header.set_next_train_at(self.next_train_at);
        Ok(())
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct TreeStateHeader {
    magic: U32,
    root_page: U32,
    flags: U32,
    reserved: U32,
    number_of_entries: U64,
    branch_pages: U64,
    leaf_pages: U64,
    tree_dictionary_id: U64,
    next_train_at: U64,
}

const _: () = assert!(size_of::<TreeStateHeader>() == TREE_STATE_SIZE);

impl TreeStateHeader {
    zerocopy_accessors! {
        magic: u32,
        root_page: u32,
        flags: u32,
        reserved: u32,
        number_of_entries: u64,
        branch_pages: u64,
        leaf_pages: u64,
        tree_dictionary_id: u64,
        next_train_at: u64,
    }
}
