//! # Encoded Keys
//!
//! A probe key has to be compared against pages that may each use a
//! different dictionary. `EncodedKey` keeps the decoded key plus the most
//! recent encodings so walking a path re-encodes at most once per distinct
//! dictionary.
//!
//! ## Arena
//!
//! All forms live in one growable byte arena. Spans into it are stored as
//! offsets, never slices, so growth (doubling to
//! `max(requested, current) * 2`) leaves them valid. Any method that can
//! grow the arena takes `&mut self`; slices handed out by earlier calls
//! cannot outlive it.
//!
//! ## Mapping Cache
//!
//! ```text
//! mappings: [ (dict, offset, len, bits) ; 64 ]   ring buffer
//!             ^ written % 64 is the next slot to overwrite
//! lookup:   scan the last min(64, written) slots, newest first
//! ```
//!
//! Eviction is strictly oldest-first. `current` marks the slot of the
//! current dictionary's encoding; `change_dictionary` only clears it.

use std::cmp::Ordering;

use eyre::{ensure, eyre, Result};
use smallvec::SmallVec;

use super::page::compare_keys;
use crate::config::{ENCODED_KEY_CACHE_SIZE, ENCODED_KEY_INITIAL_CAPACITY, ENCODED_KEY_POOL_SIZE};
use crate::dictionary::{DictionaryId, DictionaryLookup};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct KeyMapping {
    dictionary: DictionaryId,
    offset: u32,
    len: u32,
    bits: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    offset: usize,
    len: usize,
}

#[derive(Debug)]
pub struct EncodedKey {
    buffer: Vec<u8>,
    used: usize,
    decoded: Option<Span>,
    mappings: [KeyMapping; ENCODED_KEY_CACHE_SIZE],
    written: usize,
    current: Option<usize>,
    dictionary: Option<DictionaryId>,
    max_key_size: usize,
}

impl EncodedKey {
    pub fn new(max_key_size: usize) -> Self {
        Self {
            buffer: vec![0u8; ENCODED_KEY_INITIAL_CAPACITY],
            used: 0,
            decoded: None,
            mappings: [KeyMapping::default(); ENCODED_KEY_CACHE_SIZE],
            written: 0,
            current: None,
            dictionary: None,
            max_key_size,
        }
    }

    fn clear(&mut self) {
        self.used = 0;
        self.decoded = None;
        self.written = 0;
        self.current = None;
    }

    /// Holds `key` in decoded form only. Cached encodings are discarded; the
    /// current dictionary is kept.
    pub fn set(&mut self, key: &[u8]) -> Result<()> {
        ensure!(
            key.len() <= self.max_key_size,
            "key of {} bytes exceeds maximum key size of {}",
            key.len(),
            self.max_key_size
        );
        self.clear();
        let offset = self.allocate(key.len());
        self.buffer[offset..offset + key.len()].copy_from_slice(key);
        self.decoded = Some(Span {
            offset,
            len: key.len(),
        });
        Ok(())
    }

    /// Holds an already encoded key; the decoded form is computed on demand.
    pub fn set_encoded(&mut self, length_in_bits: usize, encoded: &[u8], dictionary: DictionaryId) -> Result<()> {
        let len = length_in_bits.div_ceil(8);
        ensure!(
            encoded.len() >= len,
            "encoded key of {} bytes shorter than {} bits",
            encoded.len(),
            length_in_bits
        );
        self.clear();
        let offset = self.allocate(len);
        self.buffer[offset..offset + len].copy_from_slice(&encoded[..len]);
        self.mappings[0] = KeyMapping {
            dictionary,
            offset: offset as u32,
            len: len as u32,
            bits: length_in_bits as u32,
        };
        self.written = 1;
        self.current = Some(0);
        self.dictionary = Some(dictionary);
        Ok(())
    }

    pub fn change_dictionary(&mut self, dictionary: DictionaryId) {
        if self.dictionary != Some(dictionary) {
            self.dictionary = Some(dictionary);
            self.current = None;
        }
    }

    pub fn dictionary(&self) -> Option<DictionaryId> {
        self.dictionary
    }

    /// Encoding under the current dictionary, and its length in bits.
    pub fn encoded(&mut self, lookup: &impl DictionaryLookup) -> Result<(&[u8], usize)> {
        let dictionary = self
            .dictionary
            .ok_or_else(|| eyre!("encoded key has no current dictionary"))?;
        let slot = match self.current {
            Some(slot) => slot,
            None => {
                let slot = self.mapping_for(dictionary, lookup)?;
                self.current = Some(slot);
                slot
            }
        };
        Ok(self.mapping_bytes(slot))
    }

    /// Makes `dictionary` current and returns the encoding under it.
    pub fn encoded_with(&mut self, dictionary: DictionaryId, lookup: &impl DictionaryLookup) -> Result<(&[u8], usize)> {
        self.change_dictionary(dictionary);
        self.encoded(lookup)
    }

    pub fn decoded(&mut self, lookup: &impl DictionaryLookup) -> Result<&[u8]> {
        let span = self.ensure_decoded(lookup)?;
        Ok(&self.buffer[span.offset..span.offset + span.len])
    }

    /// Compares this key with an encoded key of `dictionary` without
    /// touching the current encoding.
    pub fn compare_encoded_with(
        &mut self,
        other: &[u8],
        other_bits: usize,
        dictionary: DictionaryId,
        lookup: &impl DictionaryLookup,
    ) -> Result<Ordering> {
        let slot = self.mapping_for(dictionary, lookup)?;
        let (own, own_bits) = self.mapping_bytes(slot);
        Ok(compare_keys(own, own_bits, other, other_bits))
    }

    /// Arena size in bytes.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Number of encodings still reachable in the mapping cache.
    pub fn cached_encodings(&self) -> usize {
        self.written.min(ENCODED_KEY_CACHE_SIZE)
    }

    fn mapping_bytes(&self, slot: usize) -> (&[u8], usize) {
        let m = self.mappings[slot];
        let start = m.offset as usize;
        (&self.buffer[start..start + m.len as usize], m.bits as usize)
    }

    fn allocate(&mut self, size: usize) -> usize {
        let needed = self.used + size;
        if needed > self.buffer.len() {
            let grown = needed.max(self.buffer.len()) * 2;
            self.buffer.resize(grown, 0);
        }
        let offset = self.used;
        self.used = needed;
        offset
    }

    fn mapping_for(&mut self, dictionary: DictionaryId, lookup: &impl DictionaryLookup) -> Result<usize> {
        for i in 0..self.cached_encodings() {
            let slot = (self.written - 1 - i) % ENCODED_KEY_CACHE_SIZE;
            if self.mappings[slot].dictionary == dictionary {
                return Ok(slot);
            }
        }

        let decoded = self.ensure_decoded(lookup)?;
        let dict = lookup.dictionary(dictionary)?;
        let max = dict.max_encoding_size(decoded.len);
        let offset = self.allocate(max);

        let (head, tail) = self.buffer.split_at_mut(offset);
        let source = &head[decoded.offset..decoded.offset + decoded.len];
        let bits = dict.encode(source, &mut tail[..max])?;
        let len = bits.div_ceil(8);
        self.used = offset + len;

        let slot = self.written % ENCODED_KEY_CACHE_SIZE;
        self.mappings[slot] = KeyMapping {
            dictionary,
            offset: offset as u32,
            len: len as u32,
            bits: bits as u32,
        };
        self.written += 1;
        if self.current == Some(slot) {
            self.current = None;
        }
        Ok(slot)
    }

    fn ensure_decoded(&mut self, lookup: &impl DictionaryLookup) -> Result<Span> {
        if let Some(span) = self.decoded {
            return Ok(span);
        }
        ensure!(self.written > 0, "encoded key holds no key");

        let mapping = self.mappings[(self.written - 1) % ENCODED_KEY_CACHE_SIZE];
        let dict = lookup.dictionary(mapping.dictionary)?;
        let max = dict.max_decoding_size(mapping.bits as usize);
        let offset = self.allocate(max);

        let (head, tail) = self.buffer.split_at_mut(offset);
        let start = mapping.offset as usize;
        let source = &head[start..start + mapping.len as usize];
        let len = dict.decode(source, mapping.bits as usize, &mut tail[..max])?;
        ensure!(
            len <= self.max_key_size,
            "decoded key of {} bytes exceeds maximum key size of {}",
            len,
            self.max_key_size
        );
        self.used = offset + len;

        let span = Span { offset, len };
        self.decoded = Some(span);
        Ok(span)
    }
}

/// Free list of keys owned by one tree handle.
#[derive(Debug)]
pub struct EncodedKeyPool {
    free: SmallVec<[EncodedKey; ENCODED_KEY_POOL_SIZE]>,
    max_key_size: usize,
}

impl EncodedKeyPool {
    pub fn new(max_key_size: usize) -> Self {
        Self {
            free: SmallVec::new(),
            max_key_size,
        }
    }

    pub fn acquire(&mut self) -> EncodedKey {
        self.free
            .pop()
            .unwrap_or_else(|| EncodedKey::new(self.max_key_size))
    }

    /// Returns a key to the pool, dropping it when the pool is full.
    pub fn release(&mut self, key: EncodedKey) {
        if self.free.len() < ENCODED_KEY_POOL_SIZE {
            self.free.push(key);
        }
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_KEY_SIZE;
    use crate::dictionary::DictionaryRegistry;

    #[test]
    fn identity_encoding_equals_decoded() {
        let registry = DictionaryRegistry::new();
        let mut key = EncodedKey::new(MAX_KEY_SIZE);
        key.set(b"hello").unwrap();
        key.change_dictionary(DictionaryId::IDENTITY);

        let (bytes, bits) = key.encoded(&registry).unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(bits, 40);
    }

    #[test]
    fn encoded_without_dictionary_fails() {
        let registry = DictionaryRegistry::new();
        let mut key = EncodedKey::new(MAX_KEY_SIZE);
        key.set(b"x").unwrap();
        assert!(key.encoded(&registry).is_err());
    }

    #[test]
    fn oversized_key_is_rejected() {
        let mut key = EncodedKey::new(8);
        assert!(key.set(&[1u8; 9]).is_err());
        key.set(&[1u8; 8]).unwrap();
    }

    #[test]
    fn set_encoded_decodes_lazily() {
        let registry = DictionaryRegistry::new();
        let dict = registry.create(b"abc").unwrap();

        let mut out = vec![0u8; dict.max_encoding_size(4)];
        let bits = dict.encode(b"cabz", &mut out).unwrap();

        let mut key = EncodedKey::new(MAX_KEY_SIZE);
        key.set_encoded(bits, &out, dict.id()).unwrap();
        assert_eq!(key.decoded(&registry).unwrap(), b"cabz");

        let (identity, identity_bits) = key.encoded_with(DictionaryId::IDENTITY, &registry).unwrap();
        assert_eq!(identity, b"cabz");
        assert_eq!(identity_bits, 32);
    }

    #[test]
    fn change_dictionary_keeps_other_forms() {
        let registry = DictionaryRegistry::new();
        let dict = registry.create(b"0123456789").unwrap();
        let mut key = EncodedKey::new(MAX_KEY_SIZE);
        key.set(b"123").unwrap();

        key.encoded_with(dict.id(), &registry).unwrap();
        key.encoded_with(DictionaryId::IDENTITY, &registry).unwrap();
        assert_eq!(key.cached_encodings(), 2);

        key.change_dictionary(dict.id());
        let (_, bits) = key.encoded(&registry).unwrap();
        assert_eq!(bits, 15);
        assert_eq!(key.cached_encodings(), 2, "cache hit must not re-encode");
    }

    #[test]
    fn compare_does_not_change_current_form() {
        let registry = DictionaryRegistry::new();
        let dict = registry.create(b"abcdef").unwrap();
        let mut key = EncodedKey::new(MAX_KEY_SIZE);
        key.set(b"bead").unwrap();
        key.change_dictionary(DictionaryId::IDENTITY);

        let mut other = vec![0u8; dict.max_encoding_size(4)];
        let other_bits = dict.encode(b"cafe", &mut other).unwrap();
        other.truncate(other_bits.div_ceil(8));

        let ordering = key
            .compare_encoded_with(&other, other_bits, dict.id(), &registry)
            .unwrap();
        assert_eq!(ordering, Ordering::Less);
        assert_eq!(key.dictionary(), Some(DictionaryId::IDENTITY));
        assert_eq!(key.encoded(&registry).unwrap().0, b"bead");
    }

    #[test]
    fn ring_buffer_evicts_oldest() {
        let registry = DictionaryRegistry::new();
        let ids: Vec<_> = (0..ENCODED_KEY_CACHE_SIZE + 1)
            .map(|i| registry.create(&[b'a' + (i % 26) as u8]).unwrap().id())
            .collect();

        let mut key = EncodedKey::new(MAX_KEY_SIZE);
        key.set(b"abc").unwrap();
        for id in &ids {
            key.encoded_with(*id, &registry).unwrap();
        }
        assert_eq!(key.cached_encodings(), ENCODED_KEY_CACHE_SIZE);

        let (bytes, bits) = key.encoded_with(ids[0], &registry).unwrap();
        let dict = registry.get(ids[0]).unwrap();
        let mut expected = vec![0u8; dict.max_encoding_size(3)];
        let expected_bits = dict.encode(b"abc", &mut expected).unwrap();
        assert_eq!(bits, expected_bits);
        assert_eq!(bytes, &expected[..expected_bits.div_ceil(8)]);
    }

    #[test]
    fn arena_grows_and_keeps_forms() {
        let registry = DictionaryRegistry::new();
        let mut key = EncodedKey::new(MAX_KEY_SIZE);
        let long = vec![b'q'; 900];
        key.set(&long).unwrap();
        assert!(key.capacity() >= 900);

        let (bytes, _) = key.encoded_with(DictionaryId::IDENTITY, &registry).unwrap();
        assert_eq!(bytes, &long[..]);
        assert_eq!(key.decoded(&registry).unwrap(), &long[..]);
    }

    #[test]
    fn pool_is_bounded() {
        let mut pool = EncodedKeyPool::new(MAX_KEY_SIZE);
        let a = pool.acquire();
        let b = pool.acquire();
        let c = pool.acquire();
        pool.release(a);
        pool.release(b);
        pool.release(c);
        assert_eq!(pool.available(), ENCODED_KEY_POOL_SIZE);
    }
}
