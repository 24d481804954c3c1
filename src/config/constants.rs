//! # CompactTree Configuration Constants
//!
//! This module centralizes the layout and policy constants of the compact
//! tree. Values that depend on each other are co-located and checked at
//! compile time so that a change to one cannot silently break another.
//!
//! ## Dependency Graph
//!
//! ```text
//! PAGE_SIZE (8192 bytes)
//!       │
//!       ├─> PAGE_HEADER_SIZE (16 bytes, fixed)
//!       │
//!       ├─> PAGE_USABLE_SIZE (derived: PAGE_SIZE - PAGE_HEADER_SIZE)
//!       │
//!       ├─> DEFRAG_WORTH_IT_THRESHOLD (PAGE_SIZE / 8)
//!       │
//!       └─> MERGE_THRESHOLD (PAGE_SIZE / 2)
//!
//! MAX_KEY_SIZE (1024 bytes) ──┐
//!                             ├─> MAX_ENCODED_KEY_SIZE (worst case, every
//! MAX_DICTIONARY_ALPHABET ────┘     byte escaped)
//!                                       │
//!                                       └─> MAX_ENTRY_SIZE (must fit 3x in
//!                                           PAGE_USABLE_SIZE so a split
//!                                           always makes progress)
//! ```
//!
//! ## Critical Invariants
//!
//! 1. Three maximum-size entries fit into one page
//! 2. The longest encoded key, in bits, fits the 2-byte length prefix
//! 3. Page offsets fit into the 2-byte offsets array slots
//!
//! ## Usage
//!
//! ```ignore
//! use crate::config::{PAGE_SIZE, MAX_KEY_SIZE};
//! ```

// ============================================================================
// PAGE LAYOUT CONSTANTS
// These define the physical page format shared by leaf and branch pages
// ============================================================================

/// Size of each tree page in bytes (8KB).
pub const PAGE_SIZE: usize = 8192;

/// Size of the page header in bytes.
/// flags(1) + reserved(1) + lower(2) + upper(2) + free_space(2) + dictionary_id(8)
pub const PAGE_HEADER_SIZE: usize = 16;

/// Usable space in a page after the header.
pub const PAGE_USABLE_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

/// Size of one slot in the entry offsets array.
pub const ENTRY_OFFSET_SIZE: usize = 2;

/// Size of the key length prefix (length in bits) of every entry.
pub const KEY_LENGTH_PREFIX_SIZE: usize = 2;

/// Longest zig-zag varint an entry value can occupy.
pub const MAX_VALUE_SIZE: usize = 10;

const _: () = assert!(
    PAGE_USABLE_SIZE == PAGE_SIZE - PAGE_HEADER_SIZE,
    "PAGE_USABLE_SIZE derivation mismatch"
);

const _: () = assert!(
    PAGE_SIZE <= u16::MAX as usize,
    "page offsets are stored as u16"
);

// ============================================================================
// KEY LIMITS
// Decoded and encoded key sizes bound the size of a single entry
// ============================================================================

/// Largest decoded key accepted by the tree, in bytes.
pub const MAX_KEY_SIZE: usize = 1024;

/// Largest alphabet a trained dictionary may use.
/// 63 symbols plus 64 gap codes need 7-bit codes.
pub const MAX_DICTIONARY_ALPHABET: usize = 63;

/// Widest code a dictionary can emit, in bits.
pub const MAX_DICTIONARY_CODE_WIDTH: usize = 7;

/// Worst case encoded size of a maximum-size key: every byte escaped.
pub const MAX_ENCODED_KEY_SIZE: usize =
    (MAX_KEY_SIZE * (MAX_DICTIONARY_CODE_WIDTH + 8)).div_ceil(8);

/// Largest entry a page may ever have to hold, including its offset slot.
pub const MAX_ENTRY_SIZE: usize =
    ENTRY_OFFSET_SIZE + KEY_LENGTH_PREFIX_SIZE + MAX_ENCODED_KEY_SIZE + MAX_VALUE_SIZE;

const _: () = assert!(
    (2 * MAX_DICTIONARY_ALPHABET + 1) < (1 << MAX_DICTIONARY_CODE_WIDTH),
    "alphabet codes must fit MAX_DICTIONARY_CODE_WIDTH"
);

const _: () = assert!(
    MAX_ENCODED_KEY_SIZE * 8 <= u16::MAX as usize,
    "encoded key length in bits must fit the 2-byte length prefix"
);

const _: () = assert!(
    3 * MAX_ENTRY_SIZE <= PAGE_USABLE_SIZE,
    "a page must hold at least three maximum-size entries"
);

// ============================================================================
// PAGE MAINTENANCE THRESHOLDS
// When to defragment and when to merge
// ============================================================================

/// Minimum total free space before an in-place defragmentation is worth it.
pub const DEFRAG_WORTH_IT_THRESHOLD: usize = PAGE_SIZE / 8;

/// A non-root page with more free space than this is a merge candidate.
pub const MERGE_THRESHOLD: usize = PAGE_SIZE / 2;

// ============================================================================
// ENCODED KEY CONFIGURATION
// ============================================================================

/// Number of encoded forms an EncodedKey remembers (ring buffer).
pub const ENCODED_KEY_CACHE_SIZE: usize = 64;

/// Keys kept by each tree handle. A split needs at most two at once.
pub const ENCODED_KEY_POOL_SIZE: usize = 2;

/// Initial arena capacity of a fresh EncodedKey.
pub const ENCODED_KEY_INITIAL_CAPACITY: usize = 128;

// ============================================================================
// TRAVERSAL
// ============================================================================

/// Cursor frames kept inline before the stack spills to the heap.
pub const MAX_TREE_DEPTH: usize = 8;

// ============================================================================
// DICTIONARY RETRAINING
// ============================================================================

/// One sample is taken per this many entries when retraining.
pub const TRAIN_SAMPLE_DIVISOR: u64 = 10;

/// Upper bound on the number of retraining samples.
pub const MAX_TRAIN_SAMPLES: usize = 1000;

/// Entry count at which a fresh tree first attempts retraining.
pub const DEFAULT_TRAIN_THRESHOLD: u64 = 10_000;

// ============================================================================
// SCRATCH BUFFERS
// ============================================================================

/// Page-sized scratch buffers kept by a store for reuse.
pub const SCRATCH_POOL_CAPACITY: usize = 4;
