//! # Removal, Merges and Height Collapse
//!
//! Removing an entry that leaves a non-root page more than half empty
//! tries to refill it from its right sibling:
//!
//! ```text
//!        parent: [ "" | s1 | s2 | s3 ]
//!                  c0   c1   c2   c3
//!                        ^dest ^source
//! ```
//!
//! Entries move from the front of the source to the back of the
//! destination while they fit, re-encoded when the two pages use different
//! dictionaries. The separator of the source is then replaced by its new
//! first key, or the source is freed when it was drained. Edge children
//! (first or last) are only reclaimed once they are empty.
//!
//! Freeing one of the two children of a branch page makes the surviving
//! child's content move up into the branch page itself, which is how the
//! tree loses height while the root page number stays fixed.

use eyre::{ensure, eyre, Result};
use tracing::debug;

use super::encoded_key::EncodedKey;
use super::page::{entry_size_for, PageView, PageViewMut, SearchResult};
use super::tree::{read_page, write_page, CompactTree};
use crate::config::{ENTRY_OFFSET_SIZE, MERGE_THRESHOLD};
use crate::storage::PageStore;

impl<S: PageStore> CompactTree<'_, S> {
    /// Removes the entry the top cursor frame found, if any.
    pub(super) fn remove_from_page(&mut self) -> Result<Option<i64>> {
        let level = self.cursor.top().ok_or_else(|| eyre!("cursor is empty"))?;
        let frame = self.cursor.frames()[level];
        let search = frame.search();
        if !search.is_found() {
            return Ok(None);
        }

        let index = search.index();
        let value = {
            let mut page = write_page(&mut *self.store, frame.page_no)?;
            let value = page.as_view().entry_value(index)?;
            page.remove_entry(index)?;
            value
        };
        self.state.number_of_entries = self
            .state
            .number_of_entries
            .checked_sub(1)
            .ok_or_else(|| eyre!("entry count underflow removing from page {}", frame.page_no))?;
        self.set_frame_search(
            level,
            SearchResult {
                position: !(index as i32),
                last_match: -1,
            },
        )?;
        self.verify_page(frame.page_no)?;

        if level > 0 {
            self.rebalance(level)?;
        }
        Ok(Some(value))
    }

    /// Merges the page at `level` when it dropped below the fill threshold.
    fn rebalance(&mut self, level: usize) -> Result<()> {
        let page_no = self.cursor.frames()[level].page_no;
        let (free, contiguous) = {
            let page = read_page(&*self.store, page_no)?;
            (page.free_space(), page.contiguous_free_space())
        };
        if free <= MERGE_THRESHOLD {
            return Ok(());
        }
        if contiguous < free {
            self.defragment_page(page_no)?;
        }
        self.maybe_merge_entries(level)
    }

    fn maybe_merge_entries(&mut self, level: usize) -> Result<()> {
        let parent_level = level - 1;
        let parent_frame = self.cursor.frames()[parent_level];
        ensure!(
            parent_frame.last_search_position >= 0,
            "branch frame for page {} has no child position",
            parent_frame.page_no
        );
        let position = parent_frame.last_search_position as usize;
        let dest_no = self.cursor.frames()[level].page_no;

        let parent = read_page(&*self.store, parent_frame.page_no)?;
        let parent_count = parent.entry_count();
        let dest = read_page(&*self.store, dest_no)?;
        let dest_empty = dest.entry_count() == 0;
        let dest_flags = dest.flags();

        if parent_count == 1 {
            return self.collapse_into_parent(parent_level, dest_no);
        }
        if position == 0 || position + 1 == parent_count {
            if dest_empty && parent_count > 1 {
                let sibling = parent.child_at(if position == 0 { 1 } else { position - 1 })?;
                return self.free_page_for(parent_level, sibling, dest_no, position);
            }
            return Ok(());
        }

        let source_no = parent.child_at(position + 1)?;
        if dest_empty {
            return self.free_page_for(parent_level, source_no, dest_no, position);
        }
        if read_page(&*self.store, source_no)?.flags() != dest_flags {
            return Ok(());
        }

        let mut moving = self.keys.acquire();
        let mut separator = self.keys.acquire();
        let result = self.move_entries(level, source_no, position, &mut moving, &mut separator);
        self.keys.release(moving);
        self.keys.release(separator);
        result
    }

    /// Pulls entries from `source_no`, the child right after the one at
    /// `level`, into the page at `level`.
    fn move_entries(
        &mut self,
        level: usize,
        source_no: u32,
        position: usize,
        moving: &mut EncodedKey,
        separator: &mut EncodedKey,
    ) -> Result<()> {
        let parent_level = level - 1;
        let parent_no = self.cursor.frames()[parent_level].page_no;
        let dest_no = self.cursor.frames()[level].page_no;
        let dest_dictionary = read_page(&*self.store, dest_no)?.dictionary_id();

        let mut scratch = self.store.scratch_page();
        scratch.copy_from_page(self.store.page(source_no)?);
        let source = PageView::from_page(&scratch[..])?;
        let source_count = source.entry_count();
        let source_dictionary = source.dictionary_id();
        let is_branch = source.is_branch();

        let mut moved = 0;
        for i in 0..source_count {
            let entry = source.entry(i)?;
            if is_branch && i == 0 {
                let parent = read_page(&*self.store, parent_no)?;
                let (key, bits) = parent.entry_key(position + 1)?;
                moving.set_encoded(bits, key, parent.dictionary_id())?;
            } else {
                moving.set_encoded(entry.key_bits, entry.key, source_dictionary)?;
            }

            let (encoded, bits) = moving.encoded_with(dest_dictionary, &self.dictionaries)?;
            let mut dest = write_page(&mut *self.store, dest_no)?;
            if entry_size_for(encoded.len(), entry.value) + ENTRY_OFFSET_SIZE > dest.contiguous_free_space() {
                break;
            }
            let count = dest.entry_count();
            dest.insert_entry(count, encoded, bits, entry.value)?;
            moved += 1;
        }
        if moved == 0 {
            return Ok(());
        }
        self.stats.page_merges += 1;
        self.verify_page(dest_no)?;
        debug!(page = dest_no, source = source_no, moved, "merged entries from right sibling");

        if moved == source_count {
            drop(scratch);
            return self.free_page_for(parent_level, dest_no, source_no, position + 1);
        }

        let (key, bits) = source.entry_key(moved)?;
        separator.set_encoded(bits, key, source_dictionary)?;
        {
            let mut page = write_page(&mut *self.store, source_no)?;
            page.remove_range(0, moved)?;
            if is_branch {
                page.clear_first_key()?;
            }
        }
        drop(scratch);
        self.verify_page(source_no)?;

        write_page(&mut *self.store, parent_no)?.remove_entry(position + 1)?;
        self.cursor.truncate(level);
        let parent = read_page(&*self.store, parent_no)?;
        let (encoded, bits) = separator.encoded_with(parent.dictionary_id(), &self.dictionaries)?;
        let result = parent.search(encoded, bits)?;
        ensure!(
            !result.is_found(),
            "separator already present in branch page {}",
            parent_no
        );
        self.set_frame_search(parent_level, result)?;
        self.add_to_page(separator, source_no as i64)
    }

    /// Frees `delete_no`, the child at `delete_pos` of the branch page at
    /// `parent_level`. `keep_no` is a surviving sibling.
    fn free_page_for(&mut self, parent_level: usize, keep_no: u32, delete_no: u32, delete_pos: usize) -> Result<()> {
        let deleted_is_leaf = read_page(&*self.store, delete_no)?.is_leaf();
        self.store.free_page(delete_no)?;
        self.decrement_page_count(deleted_is_leaf)?;

        let parent_no = self.cursor.frames()[parent_level].page_no;
        let parent_count = read_page(&*self.store, parent_no)?.entry_count();
        ensure!(
            parent_count >= 2,
            "branch page {} lost a child while holding {} entries",
            parent_no,
            parent_count
        );

        if parent_count == 2 {
            return self.collapse_into_parent(parent_level, keep_no);
        }

        {
            let mut parent = write_page(&mut *self.store, parent_no)?;
            parent.remove_entry(delete_pos)?;
            if delete_pos == 0 {
                parent.clear_first_key()?;
            }
        }
        self.verify_page(parent_no)?;
        self.cursor.truncate(parent_level + 1);
        debug!(page = delete_no, parent = parent_no, "freed page");

        if parent_level > 0 {
            self.rebalance(parent_level)?;
        }
        Ok(())
    }

    /// The branch page at `parent_level` is left with the single child
    /// `keep_no`: move that child's content up and free it. Branch pages
    /// created by an append split start out with one child and end here
    /// too once that child runs low.
    fn collapse_into_parent(&mut self, parent_level: usize, keep_no: u32) -> Result<()> {
        let parent_no = self.cursor.frames()[parent_level].page_no;
        let restored = self
            .cursor
            .get(parent_level + 1)
            .filter(|frame| frame.page_no == keep_no)
            .map(|frame| frame.search());

        {
            let mut scratch = self.store.scratch_page();
            scratch.copy_from_page(self.store.page(keep_no)?);
            PageViewMut::from_page(self.store.page_mut(parent_no)?)?.copy_from(&scratch[..])?;
        }
        self.store.free_page(keep_no)?;
        self.state.branch_pages = self
            .state
            .branch_pages
            .checked_sub(1)
            .ok_or_else(|| eyre!("branch page count underflow collapsing page {}", parent_no))?;
        self.stats.height_collapses += 1;

        let is_leaf = read_page(&*self.store, parent_no)?.is_leaf();
        let restored = restored.unwrap_or(if is_leaf {
            SearchResult {
                position: !0,
                last_match: -1,
            }
        } else {
            SearchResult {
                position: 0,
                last_match: 0,
            }
        });
        self.cursor.truncate(parent_level + 1);
        self.set_frame_search(parent_level, restored)?;
        self.verify_page(parent_no)?;
        debug!(page = parent_no, child = keep_no, "collapsed single child into parent");

        if parent_level > 0 {
            self.rebalance(parent_level)?;
        }
        Ok(())
    }

    fn decrement_page_count(&mut self, leaf: bool) -> Result<()> {
        let count = if leaf {
            &mut self.state.leaf_pages
        } else {
            &mut self.state.branch_pages
        };
        *count = count
            .checked_sub(1)
            .ok_or_else(|| eyre!("{} page count underflow", if leaf { "leaf" } else { "branch" }))?;
        Ok(())
    }
}
