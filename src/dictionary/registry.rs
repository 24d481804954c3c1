//! Dictionary registry and the per-handle lookup cache.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use eyre::{eyre, Result};
use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::debug;

use super::{Dictionary, DictionaryId, DictionaryLookup};

/// All dictionaries known to a store, keyed by id.
///
/// Shared by every tree handle over the same store. Dictionaries are
/// immutable once registered, so readers only hold the lock long enough to
/// clone an `Arc`.
#[derive(Debug)]
pub struct DictionaryRegistry {
    dictionaries: RwLock<HashMap<DictionaryId, Arc<Dictionary>>>,
    next_id: AtomicU64,
}

impl Default for DictionaryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DictionaryRegistry {
    /// A registry holding only the identity dictionary.
    pub fn new() -> Self {
        let mut dictionaries = HashMap::new();
        dictionaries.insert(
            DictionaryId::IDENTITY,
            Arc::new(Dictionary::identity(DictionaryId::IDENTITY)),
        );
        Self {
            dictionaries: RwLock::new(dictionaries),
            next_id: AtomicU64::new(DictionaryId::IDENTITY.get() + 1),
        }
    }

    pub fn get(&self, id: DictionaryId) -> Result<Arc<Dictionary>> {
        self.dictionaries
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| eyre!("unknown dictionary {}", id))
    }

    pub fn identity(&self) -> Result<Arc<Dictionary>> {
        self.get(DictionaryId::IDENTITY)
    }

    /// Registers a dictionary over an explicit alphabet under a new id.
    pub fn create(&self, alphabet: &[u8]) -> Result<Arc<Dictionary>> {
        let dictionary = Dictionary::new(self.allocate_id(), alphabet)?;
        Ok(self.register(dictionary))
    }

    /// Trains and registers a dictionary for `samples` under a new id.
    pub fn train(&self, samples: &[&[u8]]) -> Result<Arc<Dictionary>> {
        let dictionary = Dictionary::train(self.allocate_id(), samples)?;
        debug!(
            dictionary = %dictionary.id(),
            samples = samples.len(),
            alphabet = dictionary.alphabet().len(),
            "trained dictionary"
        );
        Ok(self.register(dictionary))
    }

    pub fn len(&self) -> usize {
        self.dictionaries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.dictionaries.read().is_empty()
    }

    fn allocate_id(&self) -> DictionaryId {
        DictionaryId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn register(&self, dictionary: Dictionary) -> Arc<Dictionary> {
        let dictionary = Arc::new(dictionary);
        self.dictionaries
            .write()
            .insert(dictionary.id(), Arc::clone(&dictionary));
        dictionary
    }
}

impl DictionaryLookup for DictionaryRegistry {
    fn dictionary(&self, id: DictionaryId) -> Result<Arc<Dictionary>> {
        self.get(id)
    }
}

/// One-entry "last dictionary" cache owned by a tree handle.
///
/// Consecutive lookups of the same id skip the registry lock. Not `Sync`:
/// a handle is used by one transaction at a time.
#[derive(Debug)]
pub struct DictionaryCache<'r> {
    registry: &'r DictionaryRegistry,
    last: RefCell<Option<Arc<Dictionary>>>,
}

impl<'r> DictionaryCache<'r> {
    pub fn new(registry: &'r DictionaryRegistry) -> Self {
        Self {
            registry,
            last: RefCell::new(None),
        }
    }

    pub fn registry(&self) -> &'r DictionaryRegistry {
        self.registry
    }
}

impl DictionaryLookup for DictionaryCache<'_> {
    fn dictionary(&self, id: DictionaryId) -> Result<Arc<Dictionary>> {
        if let Some(last) = self.last.borrow().as_ref() {
            if last.id() == id {
                return Ok(Arc::clone(last));
            }
        }
        let dictionary = self.registry.get(id)?;
        *self.last.borrow_mut() = Some(Arc::clone(&dictionary));
        Ok(dictionary)
    }
}
