//! # Compression Dictionaries
//!
//! Every compact tree page records the id of the dictionary its keys are
//! encoded with. A dictionary maps decoded key bytes to a shorter bit string
//! and back, and it must preserve order: comparing two encodings byte-wise,
//! then by length in bits, gives the same answer as comparing the decoded
//! keys.
//!
//! ## Components
//!
//! - [`Dictionary`]: the order-preserving rank code (encode, decode, size
//!   bounds, training)
//! - [`DictionaryRegistry`]: id to dictionary map shared by tree handles
//! - [`DictionaryCache`]: a tree handle's one-entry cache in front of the
//!   registry
//! - [`DictionaryLookup`]: what `EncodedKey` needs to resolve an id
//!
//! ## Identity Dictionary
//!
//! `DictionaryId::IDENTITY` has an empty alphabet and encodes every byte as
//! itself. New trees start with it; retraining moves them off it.

mod ordered_code;
mod registry;

pub use ordered_code::Dictionary;
pub use registry::{DictionaryCache, DictionaryRegistry};

use std::fmt;
use std::sync::Arc;

use eyre::Result;

/// Opaque, monotonically assigned dictionary handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DictionaryId(u64);

impl DictionaryId {
    pub const IDENTITY: DictionaryId = DictionaryId(0);

    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DictionaryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dict#{}", self.0)
    }
}

/// Resolves dictionary ids for key encoding.
pub trait DictionaryLookup {
    fn dictionary(&self, id: DictionaryId) -> Result<Arc<Dictionary>>;
}
