//! In-memory copy-on-write page store.

use std::sync::Arc;

use eyre::{ensure, eyre, Result};

use super::PageStore;
use crate::config::{PAGE_SIZE, SCRATCH_POOL_CAPACITY};
use crate::memory::{ScratchPage, ScratchPagePool};

type SharedPage = Arc<[u8; PAGE_SIZE]>;

/// Page store backed by reference-counted page buffers.
///
/// `snapshot()` clones only the page table. The first `page_mut` on a page
/// still shared with a snapshot copies that page, so snapshots behave like
/// read transactions started at the moment they were taken.
#[derive(Clone)]
pub struct MemoryPageStore {
    pages: Vec<Option<SharedPage>>,
    free_list: Vec<u32>,
    scratch: ScratchPagePool,
}

impl std::fmt::Debug for MemoryPageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPageStore")
            .field("allocated", &self.page_count())
            .field("free_list", &self.free_list.len())
            .finish()
    }
}

impl Default for MemoryPageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPageStore {
    pub fn new() -> Self {
        Self {
            pages: Vec::new(),
            free_list: Vec::new(),
            scratch: ScratchPagePool::new(SCRATCH_POOL_CAPACITY),
        }
    }

    /// A read-only view of the store as it is now.
    pub fn snapshot(&self) -> MemoryPageStore {
        self.clone()
    }

    /// Highest page number ever handed out, plus one.
    pub fn high_water_mark(&self) -> usize {
        self.pages.len()
    }

    pub fn is_allocated(&self, page_no: u32) -> bool {
        matches!(self.pages.get(page_no as usize), Some(Some(_)))
    }

    fn slot(&self, page_no: u32) -> Result<&SharedPage> {
        self.pages
            .get(page_no as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| eyre!("page {} is not allocated", page_no))
    }
}

impl PageStore for MemoryPageStore {
    fn page(&self, page_no: u32) -> Result<&[u8]> {
        Ok(&self.slot(page_no)?[..])
    }

    fn page_mut(&mut self, page_no: u32) -> Result<&mut [u8]> {
        let page = self
            .pages
            .get_mut(page_no as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| eyre!("page {} is not allocated", page_no))?;
        Ok(&mut Arc::make_mut(page)[..])
    }

    fn allocate_page(&mut self) -> Result<u32> {
        let fresh = Arc::new([0u8; PAGE_SIZE]);
        if let Some(page_no) = self.free_list.pop() {
            self.pages[page_no as usize] = Some(fresh);
            return Ok(page_no);
        }

        let page_no = u32::try_from(self.pages.len())
            .map_err(|_| eyre!("page store exhausted the u32 page number space"))?;
        self.pages.push(Some(fresh));
        Ok(page_no)
    }

    fn free_page(&mut self, page_no: u32) -> Result<()> {
        ensure!(
            self.is_allocated(page_no),
            "double free or unknown page {}",
            page_no
        );
        self.pages[page_no as usize] = None;
        self.free_list.push(page_no);
        Ok(())
    }

    fn page_count(&self) -> usize {
        self.pages.iter().filter(|p| p.is_some()).count()
    }

    fn scratch_page(&self) -> ScratchPage {
        self.scratch.acquire()
    }
}
