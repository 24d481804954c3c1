//! # Tree Handle, Lookups and Forward Iteration
//!
//! A `CompactTree` borrows a page store and a dictionary registry for the
//! duration of one transaction. It owns the traversal cursor, the encoded
//! key pool and a copy of the tree state.
//!
//! ## Descent
//!
//! ```text
//! root (branch, dict A)     key encoded with A, search, take child
//!   └─ branch (dict B)      key re-encoded with B (cached), take child
//!        └─ leaf (dict A)   cached A form reused, final search
//! ```
//!
//! On a branch page the search result is clamped to the child whose
//! separator is the last one not greater than the key. Every branch page
//! starts with an empty separator, so a child always exists.
//!
//! ## Forward Iteration
//!
//! `try_get_next_value` serves ascending probes. It reuses the cursor left
//! by the previous call: when the probe lands between two entries of the
//! current leaf the answer is known locally; when it is past the leaf, the
//! closest ancestor whose next separator is greater than the probe bounds
//! the subtree to re-descend. A full descent from the root is the fallback.

use std::cmp::Ordering;

use eyre::{ensure, eyre, Result, WrapErr};
use tracing::{debug, trace};

use super::cursor::Cursor;
use super::encoded_key::{EncodedKey, EncodedKeyPool};
use super::page::{PageFlags, PageView, PageViewMut, SearchResult};
use super::state::TreeState;
use crate::config::TreeConfig;
use crate::dictionary::{DictionaryCache, DictionaryId, DictionaryRegistry};
use crate::storage::PageStore;

/// Deepest descent accepted before the tree is declared corrupt.
const MAX_DESCENT: usize = 64;

/// Structural events observed by one handle. Not persisted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TreeStatistics {
    pub page_splits: u64,
    pub root_splits: u64,
    pub page_merges: u64,
    pub defragmentations: u64,
    pub recompressions: u64,
    pub recompression_fallbacks: u64,
    pub height_collapses: u64,
}

pub(super) fn read_page<S: PageStore>(store: &S, page_no: u32) -> Result<PageView<'_>> {
    PageView::from_page(store.page(page_no)?)
        .wrap_err_with(|| format!("page {} is not a valid compact tree page", page_no))
}

pub(super) fn write_page<S: PageStore>(store: &mut S, page_no: u32) -> Result<PageViewMut<'_>> {
    PageViewMut::from_page(store.page_mut(page_no)?)
        .wrap_err_with(|| format!("page {} is not a valid compact tree page", page_no))
}

/// Child taken on a branch page for a search result.
pub(super) fn branch_child_index(result: SearchResult, entry_count: usize) -> usize {
    let mut index = result.index();
    if result.last_match != 0 && index > 0 {
        index -= 1;
    }
    index.min(entry_count.saturating_sub(1))
}

pub struct CompactTree<'a, S: PageStore> {
    pub(super) store: &'a mut S,
    pub(super) dictionaries: DictionaryCache<'a>,
    pub(super) header_page: u32,
    pub(super) state: TreeState,
    pub(super) config: TreeConfig,
    pub(super) cursor: Cursor,
    pub(super) keys: EncodedKeyPool,
    pub(super) stats: TreeStatistics,
}

impl<'a, S: PageStore> CompactTree<'a, S> {
    /// Creates an empty tree: a state header page plus an empty root leaf.
    pub fn create(store: &'a mut S, registry: &'a DictionaryRegistry, config: TreeConfig) -> Result<Self> {
        config.validate()?;
        let header_page = store.allocate_page()?;
        let root_page = store.allocate_page()?;
        PageViewMut::init(store.page_mut(root_page)?, PageFlags::Leaf, DictionaryId::IDENTITY)?;

        let state = TreeState::new(root_page, config.train_threshold);
        state.write_to(store.page_mut(header_page)?)?;
        debug!(header_page, root_page, "created compact tree");

        Ok(Self::with_state(store, registry, header_page, state, config))
    }

    /// Opens the tree whose state lives in `header_page`.
    pub fn open(
        store: &'a mut S,
        registry: &'a DictionaryRegistry,
        header_page: u32,
        config: TreeConfig,
    ) -> Result<Self> {
        config.validate()?;
        let state = TreeState::read_from(store.page(header_page)?)
            .wrap_err_with(|| format!("failed to open compact tree at page {}", header_page))?;
        registry
            .get(state.tree_dictionary_id)
            .wrap_err("tree dictionary is not registered")?;

        Ok(Self::with_state(store, registry, header_page, state, config))
    }

    fn with_state(
        store: &'a mut S,
        registry: &'a DictionaryRegistry,
        header_page: u32,
        state: TreeState,
        config: TreeConfig,
    ) -> Self {
        Self {
            store,
            dictionaries: DictionaryCache::new(registry),
            header_page,
            state,
            keys: EncodedKeyPool::new(config.max_key_size),
            config,
            cursor: Cursor::new(),
            stats: TreeStatistics::default(),
        }
    }

    pub fn number_of_entries(&self) -> u64 {
        self.state.number_of_entries
    }

    pub fn state(&self) -> &TreeState {
        &self.state
    }

    pub fn header_page(&self) -> u32 {
        self.header_page
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn statistics(&self) -> TreeStatistics {
        self.stats
    }

    pub fn try_get_value(&mut self, key: &[u8]) -> Result<Option<i64>> {
        self.validate_key(key)?;
        self.with_key(key, |tree, encoded| {
            tree.find_page_for(encoded)?;
            tree.leaf_value()
        })
    }

    /// Inserts or overwrites `key`.
    pub fn add(&mut self, key: &[u8], value: i64) -> Result<()> {
        self.validate_key(key)?;
        ensure!(value >= 0, "values must be non-negative, got {}", value);
        self.with_key(key, |tree, encoded| {
            tree.find_page_for(encoded)?;
            tree.add_to_page(encoded, value)
        })
    }

    /// Removes `key`, returning its value if it was present.
    pub fn try_remove(&mut self, key: &[u8]) -> Result<Option<i64>> {
        self.validate_key(key)?;
        self.with_key(key, |tree, encoded| {
            tree.find_page_for(encoded)?;
            tree.remove_from_page()
        })
    }

    /// Forgets the cursor so the next `try_get_next_value` starts from the
    /// root.
    pub fn initialize_for_iteration(&mut self) {
        self.cursor.reset();
    }

    /// Lookup optimized for ascending probes; any order is answered
    /// correctly.
    pub fn try_get_next_value(&mut self, key: &[u8]) -> Result<Option<i64>> {
        self.validate_key(key)?;
        self.with_key(key, |tree, encoded| {
            tree.seek_forward(encoded)?;
            tree.leaf_value()
        })
    }

    fn validate_key(&self, key: &[u8]) -> Result<()> {
        ensure!(!key.is_empty(), "key must not be empty");
        ensure!(
            key.len() <= self.config.max_key_size,
            "key of {} bytes exceeds maximum key size of {}",
            key.len(),
            self.config.max_key_size
        );
        Ok(())
    }

    /// Runs `op` with a pooled key holding `key`; the key goes back to the
    /// pool whatever `op` returns.
    fn with_key<R>(
        &mut self,
        key: &[u8],
        op: impl FnOnce(&mut Self, &mut EncodedKey) -> Result<R>,
    ) -> Result<R> {
        let mut encoded = self.keys.acquire();
        let result = encoded.set(key).and_then(|()| op(self, &mut encoded));
        self.keys.release(encoded);
        result
    }

    pub(super) fn find_page_for(&mut self, key: &mut EncodedKey) -> Result<()> {
        self.cursor.reset();
        self.cursor.push(self.state.root_page);
        self.descend(key)
    }

    /// Walks from the top cursor frame down to a leaf.
    pub(super) fn descend(&mut self, key: &mut EncodedKey) -> Result<()> {
        loop {
            let level = self
                .cursor
                .top()
                .ok_or_else(|| eyre!("descent started from an empty cursor"))?;
            ensure!(
                level < MAX_DESCENT,
                "descent exceeded {} levels; the tree contains a cycle",
                MAX_DESCENT
            );
            let page_no = self.cursor.frames()[level].page_no;
            let page = read_page(&*self.store, page_no)?;
            let (encoded, bits) = key.encoded_with(page.dictionary_id(), &self.dictionaries)?;
            let result = page.search(encoded, bits)?;

            let frame = self
                .cursor
                .get_mut(level)
                .ok_or_else(|| eyre!("cursor lost level {}", level))?;
            if page.is_leaf() {
                frame.set_search(result);
                return Ok(());
            }

            let count = page.entry_count();
            ensure!(count > 0, "branch page {} has no children", page_no);
            let child_index = branch_child_index(result, count);
            let child = page.child_at(child_index)?;
            frame.last_search_position = child_index as i32;
            frame.last_match = result.last_match;
            self.cursor.push(child);
        }
    }

    pub(super) fn leaf_value(&self) -> Result<Option<i64>> {
        let frame = self
            .cursor
            .top()
            .map(|level| self.cursor.frames()[level])
            .ok_or_else(|| eyre!("cursor is empty"))?;
        let result = frame.search();
        if !result.is_found() {
            return Ok(None);
        }
        let page = read_page(&*self.store, frame.page_no)?;
        Ok(Some(page.entry_value(result.index())?))
    }

    fn seek_forward(&mut self, key: &mut EncodedKey) -> Result<()> {
        let Some(top) = self.cursor.top() else {
            return self.find_page_for(key);
        };
        let page_no = self.cursor.frames()[top].page_no;
        let page = read_page(&*self.store, page_no)?;
        if page.is_branch() {
            trace!(page = page_no, "cursor parked on a branch page; descending from root");
            return self.find_page_for(key);
        }

        let (encoded, bits) = key.encoded_with(page.dictionary_id(), &self.dictionaries)?;
        let result = page.search(encoded, bits)?;
        let count = page.entry_count();
        let index = result.index();

        if result.is_found() || (index > 0 && index < count) {
            self.set_frame_search(top, result)?;
            return Ok(());
        }
        if index == 0 {
            return self.find_page_for(key);
        }

        for level in (0..top).rev() {
            let frame = self.cursor.frames()[level];
            let parent = read_page(&*self.store, frame.page_no)?;
            let next = frame.last_search_position as usize + 1;
            if frame.last_search_position < 0 || next >= parent.entry_count() {
                continue;
            }
            let (separator, separator_bits) = parent.entry_key(next)?;
            let ordering = key.compare_encoded_with(
                separator,
                separator_bits,
                parent.dictionary_id(),
                &self.dictionaries,
            )?;
            if ordering != Ordering::Less {
                continue;
            }

            if level + 1 == top {
                self.set_frame_search(top, result)?;
                return Ok(());
            }
            self.cursor.truncate(level + 1);
            return self.descend(key);
        }

        self.find_page_for(key)
    }

    pub(super) fn set_frame_search(&mut self, level: usize, result: SearchResult) -> Result<()> {
        self.cursor
            .get_mut(level)
            .ok_or_else(|| eyre!("cursor has no frame at level {}", level))?
            .set_search(result);
        Ok(())
    }

    /// Recomputes free space of a page after a mutation when enabled.
    pub(super) fn verify_page(&self, page_no: u32) -> Result<()> {
        if self.config.verify_pages {
            read_page(&*self.store, page_no)?
                .verify_free_space()
                .wrap_err_with(|| format!("page {} failed its free space check", page_no))?;
        }
        Ok(())
    }

    pub(super) fn defragment_page(&mut self, page_no: u32) -> Result<()> {
        let mut scratch = self.store.scratch_page();
        write_page(&mut *self.store, page_no)?.defragment(&mut scratch)?;
        self.stats.defragmentations += 1;
        trace!(page = page_no, "defragmented page");
        Ok(())
    }
}
