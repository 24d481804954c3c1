//! # Insertion, Page Splits and Recompression
//!
//! `add_to_page` works on the page at the top of the cursor. When an entry
//! does not fit contiguously the page is, in order of preference:
//!
//! 1. recompressed with the tree dictionary, when it still uses an older one
//! 2. defragmented, when enough scattered free space exists
//! 3. split
//!
//! ## Splits
//!
//! Appending past the last entry allocates an empty right sibling and puts
//! only the new key there, which keeps sequential inserts packing pages
//! full. Any other split moves the upper half of the entries (by bytes) to
//! the new page verbatim. The new page's first key becomes the separator
//! inserted into the parent, recursively splitting ancestors as needed.
//!
//! Splitting the root copies it to a fresh page and turns the root into a
//! branch with a single child, so the root page number never changes.

use std::cmp::Ordering;

use bumpalo::Bump;
use eyre::{ensure, eyre, Result};
use tracing::{debug, trace};

use super::cursor::CursorState;
use super::encoded_key::EncodedKey;
use super::page::{compare_keys, entry_size_for, PageFlags, PageView, PageViewMut, SearchResult};
use super::tree::{read_page, write_page, CompactTree};
use crate::config::{DEFRAG_WORTH_IT_THRESHOLD, ENTRY_OFFSET_SIZE};
use crate::dictionary::{DictionaryId, DictionaryLookup};
use crate::encoding::value_len;
use crate::storage::PageStore;

impl<S: PageStore> CompactTree<'_, S> {
    /// Inserts `key` at the position recorded in the top cursor frame.
    pub(super) fn add_to_page(&mut self, key: &mut EncodedKey, value: i64) -> Result<()> {
        let level = self.cursor.top().ok_or_else(|| eyre!("cursor is empty"))?;
        let page_no = self.cursor.frames()[level].page_no;
        let mut search = self.cursor.frames()[level].search();

        if search.is_found() {
            let index = search.index();
            let mut page = write_page(&mut *self.store, page_no)?;
            let old = page.as_view().entry_value(index)?;
            if value_len(old) == value_len(value) {
                page.set_value(index, value)?;
                return self.verify_page(page_no);
            }
            let is_leaf = page.as_view().is_leaf();
            page.remove_entry(index)?;
            if is_leaf {
                self.state.number_of_entries -= 1;
            }
            search = SearchResult {
                position: !(index as i32),
                last_match: -1,
            };
            self.set_frame_search(level, search)?;
        }

        let page = read_page(&*self.store, page_no)?;
        let is_leaf = page.is_leaf();
        let dictionary = page.dictionary_id();
        let free = page.free_space();
        let contiguous = page.contiguous_free_space();

        let (encoded, bits) = key.encoded_with(dictionary, &self.dictionaries)?;
        let required = entry_size_for(encoded.len(), value) + ENTRY_OFFSET_SIZE;

        if required > contiguous {
            if dictionary != self.state.tree_dictionary_id && self.try_recompress_page(page_no)? {
                let (encoded, bits) = key.encoded_with(self.state.tree_dictionary_id, &self.dictionaries)?;
                let result = read_page(&*self.store, page_no)?.search(encoded, bits)?;
                self.set_frame_search(level, result)?;
                return self.add_to_page(key, value);
            }
            if free >= required && free >= DEFRAG_WORTH_IT_THRESHOLD {
                self.defragment_page(page_no)?;
            } else {
                return self.split_page(key, value);
            }
        }

        let index = search.index();
        write_page(&mut *self.store, page_no)?.insert_entry(index, encoded, bits, value)?;
        if is_leaf {
            self.state.number_of_entries += 1;
        }
        self.set_frame_search(
            level,
            SearchResult {
                position: index as i32,
                last_match: 0,
            },
        )?;
        self.verify_page(page_no)
    }

    fn split_page(&mut self, key: &mut EncodedKey, value: i64) -> Result<()> {
        self.stats.page_splits += 1;
        if self.cursor.len() == 1 {
            self.create_root_page()?;
        }

        let level = self.cursor.top().ok_or_else(|| eyre!("cursor is empty"))?;
        let page_no = self.cursor.frames()[level].page_no;
        let insert_at = self.cursor.frames()[level].search().index();
        let (flags, count) = {
            let page = read_page(&*self.store, page_no)?;
            (page.flags(), page.entry_count())
        };

        let new_page_no = self.store.allocate_page()?;
        match flags {
            PageFlags::Leaf => self.state.leaf_pages += 1,
            PageFlags::Branch => self.state.branch_pages += 1,
        }

        let mut separator = self.keys.acquire();
        let result = if insert_at == count {
            self.split_at_end(key, value, level, new_page_no, flags, &mut separator)
        } else {
            self.split_in_half(key, value, level, new_page_no, &mut separator)
        }
        .and_then(|()| {
            self.cursor.pop();
            self.insert_separator(&mut separator, new_page_no)
        });
        self.keys.release(separator);

        debug!(page = page_no, new_page = new_page_no, ?flags, "split page");
        result
    }

    /// Sequential append: the new right sibling receives only the new key.
    fn split_at_end(
        &mut self,
        key: &mut EncodedKey,
        value: i64,
        level: usize,
        new_page_no: u32,
        flags: PageFlags,
        separator: &mut EncodedKey,
    ) -> Result<()> {
        let dictionary = self.state.tree_dictionary_id;
        let (encoded, bits) = key.encoded_with(dictionary, &self.dictionaries)?;

        let mut page = PageViewMut::init(self.store.page_mut(new_page_no)?, flags, dictionary)?;
        match flags {
            PageFlags::Leaf => {
                page.insert_entry(0, encoded, bits, value)?;
                self.state.number_of_entries += 1;
            }
            PageFlags::Branch => page.insert_entry(0, &[], 0, value)?,
        }
        separator.set_encoded(bits, encoded, dictionary)?;

        let frame = self
            .cursor
            .get_mut(level)
            .ok_or_else(|| eyre!("cursor has no frame at level {}", level))?;
        frame.page_no = new_page_no;
        frame.set_search(SearchResult {
            position: 0,
            last_match: 0,
        });
        self.verify_page(new_page_no)
    }

    /// Moves the upper half of the page (by bytes) to the new page, then
    /// inserts the new key on whichever side it belongs.
    fn split_in_half(
        &mut self,
        key: &mut EncodedKey,
        value: i64,
        level: usize,
        new_page_no: u32,
        separator: &mut EncodedKey,
    ) -> Result<()> {
        let page_no = self.cursor.frames()[level].page_no;
        let mut scratch = self.store.scratch_page();
        scratch.copy_from_page(self.store.page(page_no)?);
        let source = PageView::from_page(&scratch[..])?;
        let count = source.entry_count();
        let flags = source.flags();
        let dictionary = source.dictionary_id();
        ensure!(count >= 2, "cannot split page {} holding {} entries", page_no, count);

        let mut sizes = Vec::with_capacity(count);
        for i in 0..count {
            sizes.push(source.entry(i)?.size + ENTRY_OFFSET_SIZE);
        }
        let half = sizes.iter().sum::<usize>() / 2;
        let mut accumulated = 0;
        let mut split_at = count;
        for (i, size) in sizes.iter().enumerate() {
            accumulated += size;
            if accumulated >= half {
                split_at = i + 1;
                break;
            }
        }
        let split_at = split_at.clamp(1, count - 1);

        {
            let mut target = PageViewMut::init(self.store.page_mut(new_page_no)?, flags, dictionary)?;
            for i in split_at..count {
                target.append_raw_entry(source.raw_entry(i)?)?;
            }
        }
        write_page(&mut *self.store, page_no)?.remove_range(split_at, count)?;
        drop(scratch);
        self.defragment_page(page_no)?;

        let (first, first_bits) = read_page(&*self.store, new_page_no)?.entry_key(0)?;
        separator.set_encoded(first_bits, first, dictionary)?;

        let (encoded, bits) = key.encoded_with(dictionary, &self.dictionaries)?;
        let (first, first_bits) = separator.encoded_with(dictionary, &self.dictionaries)?;
        let target_page = match compare_keys(encoded, bits, first, first_bits) {
            Ordering::Less => page_no,
            _ => new_page_no,
        };

        let mut target = write_page(&mut *self.store, target_page)?;
        let result = target.as_view().search(encoded, bits)?;
        ensure!(
            !result.is_found(),
            "key being split in already exists on page {}",
            target_page
        );
        target.insert_entry(result.index(), encoded, bits, value)?;
        if flags == PageFlags::Branch {
            write_page(&mut *self.store, new_page_no)?.clear_first_key()?;
        }
        if flags == PageFlags::Leaf {
            self.state.number_of_entries += 1;
        }

        let frame = self
            .cursor
            .get_mut(level)
            .ok_or_else(|| eyre!("cursor has no frame at level {}", level))?;
        frame.page_no = target_page;
        frame.set_search(SearchResult {
            position: result.index() as i32,
            last_match: 0,
        });

        self.verify_page(page_no)?;
        self.verify_page(new_page_no)
    }

    /// Adds the separator for `new_page_no` to the page now at the top of
    /// the cursor.
    fn insert_separator(&mut self, separator: &mut EncodedKey, new_page_no: u32) -> Result<()> {
        let level = self
            .cursor
            .top()
            .ok_or_else(|| eyre!("split page has no parent on the cursor"))?;
        let parent_no = self.cursor.frames()[level].page_no;
        let parent = read_page(&*self.store, parent_no)?;
        let (encoded, bits) = separator.encoded_with(parent.dictionary_id(), &self.dictionaries)?;
        let result = parent.search(encoded, bits)?;
        ensure!(
            !result.is_found(),
            "separator already present in branch page {}",
            parent_no
        );
        self.set_frame_search(level, result)?;
        self.add_to_page(separator, new_page_no as i64)
    }

    /// Moves the root's content to a new page and makes the root a branch
    /// pointing at it.
    fn create_root_page(&mut self) -> Result<()> {
        let root_no = self.state.root_page;
        let copy_no = self.store.allocate_page()?;
        {
            let mut scratch = self.store.scratch_page();
            scratch.copy_from_page(self.store.page(root_no)?);
            self.store.page_mut(copy_no)?.copy_from_slice(&scratch[..]);
        }

        let mut root = PageViewMut::init(
            self.store.page_mut(root_no)?,
            PageFlags::Branch,
            self.state.tree_dictionary_id,
        )?;
        root.insert_entry(0, &[], 0, copy_no as i64)?;
        self.state.branch_pages += 1;
        self.stats.root_splits += 1;

        if let Some(frame) = self.cursor.get_mut(0) {
            frame.page_no = copy_no;
        }
        self.cursor.push_root(CursorState {
            page_no: root_no,
            last_search_position: 0,
            last_match: 0,
        });
        debug!(root = root_no, child = copy_no, "tree grew a level");
        Ok(())
    }

    /// Rewrites every entry of the page with the tree dictionary.
    ///
    /// Returns `false`, leaving the page untouched, when the re-encoded
    /// entries would not fit.
    pub(super) fn try_recompress_page(&mut self, page_no: u32) -> Result<bool> {
        let target_id = self.state.tree_dictionary_id;
        let mut scratch = self.store.scratch_page();
        scratch.copy_from_page(self.store.page(page_no)?);
        let source = PageView::from_page(&scratch[..])?;
        let source_id = source.dictionary_id();
        let old = self.dictionaries.dictionary(source_id)?;
        let new = self.dictionaries.dictionary(target_id)?;

        let arena = Bump::new();
        let mut page = write_page(&mut *self.store, page_no)?;
        page.reset(target_id)?;

        let mut fits = true;
        for i in 0..source.entry_count() {
            let entry = source.entry(i)?;
            let decoded = arena.alloc_slice_fill_copy(old.max_decoding_size(entry.key_bits), 0u8);
            let len = old.decode(entry.key, entry.key_bits, decoded)?;
            let encoded = arena.alloc_slice_fill_copy(new.max_encoding_size(len), 0u8);
            let bits = new.encode(&decoded[..len], encoded)?;
            let encoded = &encoded[..bits.div_ceil(8)];

            if entry_size_for(encoded.len(), entry.value) + ENTRY_OFFSET_SIZE > page.contiguous_free_space() {
                fits = false;
                break;
            }
            page.insert_entry(i, encoded, bits, entry.value)?;
        }

        if !fits {
            page.copy_from(&scratch[..])?;
            self.stats.recompression_fallbacks += 1;
            debug!(page = page_no, from = %source_id, to = %target_id, "recompressed page would overflow; kept old dictionary");
            return Ok(false);
        }

        self.stats.recompressions += 1;
        trace!(page = page_no, from = %source_id, to = %target_id, "recompressed page");
        Ok(true)
    }

    /// Switches the tree dictionary; only pages written afterwards use it.
    pub(super) fn set_tree_dictionary(&mut self, dictionary: DictionaryId) {
        self.state.tree_dictionary_id = dictionary;
    }
}
