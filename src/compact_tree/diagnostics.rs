//! Read-only inspection of a tree: page walks, decoded dumps and a full
//! structural check used by tests and debugging tools.

use eyre::{bail, ensure, Result, WrapErr};

use super::page::PageFlags;
use super::tree::{read_page, CompactTree};
use crate::dictionary::{DictionaryId, DictionaryLookup};
use crate::storage::PageStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSummary {
    pub page_no: u32,
    pub flags: PageFlags,
    pub dictionary_id: DictionaryId,
    pub entry_count: usize,
    pub free_space: usize,
    pub contiguous_free_space: usize,
}

impl<S: PageStore> CompactTree<'_, S> {
    /// Every page of the tree in pre-order, children in key order.
    pub fn all_pages(&self) -> Result<Vec<u32>> {
        let mut pages = Vec::new();
        let mut stack = vec![self.state.root_page];
        while let Some(page_no) = stack.pop() {
            ensure!(
                pages.len() < self.store.page_count(),
                "page walk visited more pages than the store holds; the tree contains a cycle"
            );
            pages.push(page_no);
            let page = read_page(&*self.store, page_no)?;
            if page.is_branch() {
                for i in (0..page.entry_count()).rev() {
                    stack.push(page.child_at(i)?);
                }
            }
        }
        Ok(pages)
    }

    pub fn page_summary(&self, page_no: u32) -> Result<PageSummary> {
        let page = read_page(&*self.store, page_no)?;
        Ok(PageSummary {
            page_no,
            flags: page.flags(),
            dictionary_id: page.dictionary_id(),
            entry_count: page.entry_count(),
            free_space: page.free_space(),
            contiguous_free_space: page.contiguous_free_space(),
        })
    }

    /// Decoded keys and values of one page. Branch values are child page
    /// numbers.
    pub fn all_entries_in(&self, page_no: u32) -> Result<Vec<(Vec<u8>, i64)>> {
        let page = read_page(&*self.store, page_no)?;
        let dictionary = self.dictionaries.dictionary(page.dictionary_id())?;
        let mut entries = Vec::with_capacity(page.entry_count());
        for i in 0..page.entry_count() {
            let entry = page.entry(i)?;
            let mut key = vec![0u8; dictionary.max_decoding_size(entry.key_bits)];
            let len = dictionary
                .decode(entry.key, entry.key_bits, &mut key)
                .wrap_err_with(|| format!("failed to decode entry {} of page {}", i, page_no))?;
            key.truncate(len);
            entries.push((key, entry.value));
        }
        Ok(entries)
    }

    /// All key/value pairs in key order.
    pub fn all_entries(&self) -> Result<Vec<(Vec<u8>, i64)>> {
        let mut entries = Vec::new();
        for page_no in self.all_pages()? {
            if read_page(&*self.store, page_no)?.is_leaf() {
                entries.extend(self.all_entries_in(page_no)?);
            }
        }
        Ok(entries)
    }

    /// Checks every page and the tree-wide counters.
    pub fn verify(&self) -> Result<()> {
        let mut leaf_pages = 0u64;
        let mut branch_pages = 0u64;
        for page_no in self.all_pages()? {
            let page = read_page(&*self.store, page_no)?;
            page.verify_order()
                .wrap_err_with(|| format!("page {} is out of order", page_no))?;
            page.verify_free_space()
                .wrap_err_with(|| format!("page {} has inconsistent free space", page_no))?;
            match page.flags() {
                PageFlags::Leaf => leaf_pages += 1,
                PageFlags::Branch => {
                    ensure!(page.entry_count() > 0, "branch page {} has no children", page_no);
                    branch_pages += 1;
                }
            }
        }
        ensure!(
            leaf_pages == self.state.leaf_pages,
            "tree counts {} leaf pages but {} are reachable",
            self.state.leaf_pages,
            leaf_pages
        );
        ensure!(
            branch_pages == self.state.branch_pages,
            "tree counts {} branch pages but {} are reachable",
            self.state.branch_pages,
            branch_pages
        );

        let entries = self.all_entries()?;
        ensure!(
            entries.len() as u64 == self.state.number_of_entries,
            "tree counts {} entries but leaves hold {}",
            self.state.number_of_entries,
            entries.len()
        );
        for pair in entries.windows(2) {
            if pair[0].0 >= pair[1].0 {
                bail!("keys out of order across pages: {:?} >= {:?}", pair[0].0, pair[1].0);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TreeConfig;
    use crate::dictionary::DictionaryRegistry;
    use crate::storage::MemoryPageStore;

    #[test]
    fn single_leaf_dump() {
        let mut store = MemoryPageStore::new();
        let registry = DictionaryRegistry::new();
        let mut tree = CompactTree::create(&mut store, &registry, TreeConfig::default()).unwrap();
        tree.add(b"b", 2).unwrap();
        tree.add(b"a", 1).unwrap();

        let root = tree.state().root_page;
        assert_eq!(tree.all_pages().unwrap(), vec![root]);
        assert_eq!(
            tree.all_entries_in(root).unwrap(),
            vec![(b"a".to_vec(), 1), (b"b".to_vec(), 2)]
        );

        let summary = tree.page_summary(root).unwrap();
        assert_eq!(summary.flags, PageFlags::Leaf);
        assert_eq!(summary.entry_count, 2);
        assert_eq!(summary.free_space, summary.contiguous_free_space);
        tree.verify().unwrap();
    }

    #[test]
    fn walk_lists_root_first() {
        let mut store = MemoryPageStore::new();
        let registry = DictionaryRegistry::new();
        let mut tree = CompactTree::create(&mut store, &registry, TreeConfig::default()).unwrap();
        for i in 0..2000u32 {
            tree.add(format!("k{:06}", i).as_bytes(), i64::from(i)).unwrap();
        }

        let pages = tree.all_pages().unwrap();
        assert_eq!(pages[0], tree.state().root_page);
        assert_eq!(
            pages.len() as u64,
            tree.state().leaf_pages + tree.state().branch_pages
        );
        let entries = tree.all_entries().unwrap();
        assert_eq!(entries.len(), 2000);
        assert_eq!(entries[0], (b"k000000".to_vec(), 0));
        assert_eq!(entries[1999], (b"k001999".to_vec(), 1999));
    }
}
