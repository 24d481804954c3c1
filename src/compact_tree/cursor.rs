//! Root-to-node traversal stack.
//!
//! Frames are addressed by index, never by reference, so split and merge
//! can rewrite ancestor frames while walking back up the tree.

use smallvec::SmallVec;

use super::page::SearchResult;
use crate::config::MAX_TREE_DEPTH;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorState {
    pub page_no: u32,
    /// Found index, or the complement of the insertion point. On branch
    /// frames this is the index of the child taken.
    pub last_search_position: i32,
    pub last_match: i32,
}

impl CursorState {
    pub fn new(page_no: u32) -> Self {
        Self {
            page_no,
            last_search_position: 0,
            last_match: 0,
        }
    }

    pub fn set_search(&mut self, result: SearchResult) {
        self.last_search_position = result.position;
        self.last_match = result.last_match;
    }

    pub fn search(&self) -> SearchResult {
        SearchResult {
            position: self.last_search_position,
            last_match: self.last_match,
        }
    }
}

#[derive(Debug, Default)]
pub struct Cursor {
    stack: SmallVec<[CursorState; MAX_TREE_DEPTH]>,
}

impl Cursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.stack.clear();
    }

    pub fn push(&mut self, page_no: u32) {
        self.stack.push(CursorState::new(page_no));
    }

    pub fn pop(&mut self) -> Option<CursorState> {
        self.stack.pop()
    }

    /// Inserts a new bottom frame; used when the root grows a level.
    pub fn push_root(&mut self, state: CursorState) {
        self.stack.insert(0, state);
    }

    /// Keeps the bottom `len` frames.
    pub fn truncate(&mut self, len: usize) {
        self.stack.truncate(len);
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Index of the top frame.
    pub fn top(&self) -> Option<usize> {
        self.stack.len().checked_sub(1)
    }

    pub fn get(&self, level: usize) -> Option<&CursorState> {
        self.stack.get(level)
    }

    pub fn get_mut(&mut self, level: usize) -> Option<&mut CursorState> {
        self.stack.get_mut(level)
    }

    pub fn frames(&self) -> &[CursorState] {
        &self.stack
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_root_shifts_frames_up() {
        let mut cursor = Cursor::new();
        cursor.push(7);
        cursor.get_mut(0).unwrap().last_search_position = !3;

        cursor.push_root(CursorState::new(1));
        assert_eq!(cursor.len(), 2);
        assert_eq!(cursor.get(0).unwrap().page_no, 1);
        assert_eq!(cursor.get(1).unwrap().page_no, 7);
        assert_eq!(cursor.get(1).unwrap().last_search_position, !3);
    }

    #[test]
    fn truncate_and_top() {
        let mut cursor = Cursor::new();
        assert_eq!(cursor.top(), None);
        for page in 0..5 {
            cursor.push(page);
        }
        cursor.truncate(2);
        assert_eq!(cursor.top(), Some(1));
        assert_eq!(cursor.pop().map(|s| s.page_no), Some(1));
    }

    #[test]
    fn search_round_trips_through_state() {
        let mut state = CursorState::new(3);
        let result = SearchResult {
            position: !4,
            last_match: 1,
        };
        state.set_search(result);
        assert_eq!(state.search(), result);
        assert_eq!(state.search().index(), 4);
    }
}
