//! # Compact Tree Pages
//!
//! Leaf and branch pages share one physical format:
//!
//! ```text
//! +------------------+----------------------+---------------+------------------+
//! | Header (16B)     | Offsets (2B each) -> | free space    | <- Entry data    |
//! +------------------+----------------------+---------------+------------------+
//! 0                  16                   lower         upper          PAGE_SIZE
//! ```
//!
//! ## Header Layout
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----------------------------------------
//! 0       1     page_flags (0x01 leaf, 0x02 branch)
//! 1       1     reserved
//! 2       2     lower: end of the offsets array
//! 4       2     upper: start of entry data
//! 6       2     free_space: total free bytes, holes included
//! 8       8     dictionary_id: dictionary the keys are encoded with
//! ```
//!
//! All multi-byte fields are little-endian. The entry count is implicit:
//! `(lower - 16) / 2`.
//!
//! ## Entry Layout
//!
//! ```text
//! +-----------------------+-------------------------+---------------------+
//! | key length in bits 2B | key bytes (ceil(b / 8)) | zig-zag varint value |
//! +-----------------------+-------------------------+---------------------+
//! ```
//!
//! Leaf values are caller integers, branch values are child page numbers.
//! The first entry of a branch page always has a zero-length key: it routes
//! every key smaller than the second separator.
//!
//! ## Free Space
//!
//! Removing an entry leaves a hole in the data area. `free_space` counts
//! those holes, so it always equals `PAGE_SIZE - lower - Σ entry sizes`,
//! while `upper - lower` is only the contiguous run. The two agree after
//! `defragment`. [`PageView::verify_free_space`] recomputes the sum and
//! fails on any drift.
//!
//! ## Ordering
//!
//! Keys compare byte-wise on their encoded form; when one is a prefix of the
//! other, the shorter length in bits sorts first. Dictionaries preserve the
//! order of decoded keys under this comparison.

use std::cmp::Ordering;
use std::mem::size_of;

use eyre::{bail, ensure, eyre, Result};
use zerocopy::little_endian::{U16, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{ENTRY_OFFSET_SIZE, KEY_LENGTH_PREFIX_SIZE, PAGE_HEADER_SIZE, PAGE_SIZE};
use crate::dictionary::DictionaryId;
use crate::encoding::varint::{decode_value, encode_value, value_len};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFlags {
    Leaf = 0x01,
    Branch = 0x02,
}

impl PageFlags {
    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            0x01 => Ok(PageFlags::Leaf),
            0x02 => Ok(PageFlags::Branch),
            other => bail!("invalid compact page flags: {:#04x}", other),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct CompactPageHeader {
    page_flags: u8,
    reserved: u8,
    lower: U16,
    upper: U16,
    free_space: U16,
    dictionary_id: U64,
}

const _: () = assert!(size_of::<CompactPageHeader>() == PAGE_HEADER_SIZE);

impl CompactPageHeader {
    pub fn new(flags: PageFlags, dictionary: DictionaryId) -> Self {
        Self {
            page_flags: flags as u8,
            reserved: 0,
            lower: U16::new(PAGE_HEADER_SIZE as u16),
            upper: U16::new(PAGE_SIZE as u16),
            free_space: U16::new((PAGE_SIZE - PAGE_HEADER_SIZE) as u16),
            dictionary_id: U64::new(dictionary.get()),
        }
    }

    pub fn read_from_page(data: &[u8]) -> Result<Self> {
        ensure!(
            data.len() >= PAGE_HEADER_SIZE,
            "buffer too small for compact page header: {} < {}",
            data.len(),
            PAGE_HEADER_SIZE
        );
        Self::read_from_bytes(&data[..PAGE_HEADER_SIZE])
            .map_err(|e| eyre!("failed to read compact page header: {:?}", e))
    }

    zerocopy_accessors! {
        lower: u16,
        upper: u16,
        free_space: u16,
        dictionary_id: u64,
    }

    pub fn flags(&self) -> Result<PageFlags> {
        PageFlags::from_byte(self.page_flags)
    }
}

/// Outcome of a page-local binary search.
///
/// `position` is the index of the match, or the bitwise complement of the
/// insertion point. `last_match` is 0 on a match, otherwise the sign of the
/// last comparison of the probe against an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchResult {
    pub position: i32,
    pub last_match: i32,
}

impl SearchResult {
    pub fn is_found(&self) -> bool {
        self.position >= 0
    }

    /// Index of the match, or the insertion point.
    pub fn index(&self) -> usize {
        if self.position >= 0 {
            self.position as usize
        } else {
            (!self.position) as usize
        }
    }
}

/// One decoded-in-place entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageEntry<'a> {
    pub key: &'a [u8],
    pub key_bits: usize,
    pub value: i64,
    /// Bytes the entry occupies in the data area.
    pub size: usize,
}

/// Orders two encoded keys: bytes first, then length in bits.
#[inline]
pub fn compare_keys(a: &[u8], a_bits: usize, b: &[u8], b_bits: usize) -> Ordering {
    let common = a.len().min(b.len());
    a[..common].cmp(&b[..common]).then(a_bits.cmp(&b_bits))
}

/// Data-area size of an entry with `key_len` encoded key bytes.
#[inline]
pub fn entry_size_for(key_len: usize, value: i64) -> usize {
    KEY_LENGTH_PREFIX_SIZE + key_len + value_len(value)
}

#[inline]
fn offset_slot(index: usize) -> usize {
    PAGE_HEADER_SIZE + index * ENTRY_OFFSET_SIZE
}

fn decode_entry(bytes: &[u8]) -> Result<PageEntry<'_>> {
    ensure!(
        bytes.len() >= KEY_LENGTH_PREFIX_SIZE,
        "entry truncated: {} bytes",
        bytes.len()
    );
    let key_bits = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
    let key_end = KEY_LENGTH_PREFIX_SIZE + key_bits.div_ceil(8);
    ensure!(
        key_end < bytes.len(),
        "entry key of {} bits extends beyond buffer",
        key_bits
    );
    let (value, value_size) = decode_value(&bytes[key_end..])?;
    Ok(PageEntry {
        key: &bytes[KEY_LENGTH_PREFIX_SIZE..key_end],
        key_bits,
        value,
        size: key_end + value_size,
    })
}

fn parse_entry(data: &[u8], offset: usize) -> Result<PageEntry<'_>> {
    ensure!(
        offset >= PAGE_HEADER_SIZE && offset < data.len(),
        "entry offset {} outside page",
        offset
    );
    decode_entry(&data[offset..])
}

/// Read-only view of a compact page.
#[derive(Debug, Clone, Copy)]
pub struct PageView<'a> {
    data: &'a [u8],
    header: CompactPageHeader,
}

impl<'a> PageView<'a> {
    pub fn from_page(data: &'a [u8]) -> Result<Self> {
        ensure!(
            data.len() == PAGE_SIZE,
            "invalid page size: {} != {}",
            data.len(),
            PAGE_SIZE
        );
        let header = CompactPageHeader::read_from_page(data)?;
        header.flags()?;

        let lower = header.lower() as usize;
        let upper = header.upper() as usize;
        ensure!(
            lower >= PAGE_HEADER_SIZE
                && lower <= upper
                && upper <= PAGE_SIZE
                && (lower - PAGE_HEADER_SIZE) % ENTRY_OFFSET_SIZE == 0,
            "corrupt page header: lower={}, upper={}",
            lower,
            upper
        );
        ensure!(
            header.free_space() as usize >= upper - lower,
            "corrupt page header: free_space={} below contiguous run {}",
            header.free_space(),
            upper - lower
        );
        Ok(Self { data, header })
    }

    pub fn header(&self) -> &CompactPageHeader {
        &self.header
    }

    pub fn flags(&self) -> PageFlags {
        // validated in from_page
        if self.header.page_flags == PageFlags::Branch as u8 {
            PageFlags::Branch
        } else {
            PageFlags::Leaf
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.flags() == PageFlags::Leaf
    }

    pub fn is_branch(&self) -> bool {
        self.flags() == PageFlags::Branch
    }

    pub fn dictionary_id(&self) -> DictionaryId {
        DictionaryId::new(self.header.dictionary_id())
    }

    pub fn entry_count(&self) -> usize {
        (self.header.lower() as usize - PAGE_HEADER_SIZE) / ENTRY_OFFSET_SIZE
    }

    pub fn lower(&self) -> usize {
        self.header.lower() as usize
    }

    pub fn upper(&self) -> usize {
        self.header.upper() as usize
    }

    pub fn free_space(&self) -> usize {
        self.header.free_space() as usize
    }

    /// Largest entry-plus-offset that can be written without defragmenting.
    pub fn contiguous_free_space(&self) -> usize {
        self.upper() - self.lower()
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn entry_offset(&self, index: usize) -> Result<usize> {
        let count = self.entry_count();
        ensure!(
            index < count,
            "entry index {} out of bounds (entry_count={})",
            index,
            count
        );
        let slot = offset_slot(index);
        Ok(u16::from_le_bytes([self.data[slot], self.data[slot + 1]]) as usize)
    }

    pub fn entry(&self, index: usize) -> Result<PageEntry<'a>> {
        parse_entry(self.data, self.entry_offset(index)?)
    }

    /// Encoded key bytes and length in bits.
    pub fn entry_key(&self, index: usize) -> Result<(&'a [u8], usize)> {
        let offset = self.entry_offset(index)?;
        ensure!(
            offset + KEY_LENGTH_PREFIX_SIZE <= PAGE_SIZE,
            "entry offset {} outside page",
            offset
        );
        let bits = u16::from_le_bytes([self.data[offset], self.data[offset + 1]]) as usize;
        let start = offset + KEY_LENGTH_PREFIX_SIZE;
        let end = start + bits.div_ceil(8);
        ensure!(end <= PAGE_SIZE, "entry key extends beyond page");
        Ok((&self.data[start..end], bits))
    }

    pub fn entry_value(&self, index: usize) -> Result<i64> {
        Ok(self.entry(index)?.value)
    }

    /// Child page number stored in a branch entry.
    pub fn child_at(&self, index: usize) -> Result<u32> {
        let value = self.entry_value(index)?;
        u32::try_from(value).map_err(|_| eyre!("branch entry {} holds invalid page number {}", index, value))
    }

    /// The entry exactly as stored, for byte-level copies between pages
    /// sharing a dictionary.
    pub fn raw_entry(&self, index: usize) -> Result<&'a [u8]> {
        let offset = self.entry_offset(index)?;
        let entry = parse_entry(self.data, offset)?;
        Ok(&self.data[offset..offset + entry.size])
    }

    pub fn search(&self, key: &[u8], key_bits: usize) -> Result<SearchResult> {
        let count = self.entry_count() as i32;
        let mut low = 0i32;
        let mut high = count - 1;
        let mut mid = 0i32;
        let mut last = Ordering::Less;

        while low <= high {
            mid = (low + high) / 2;
            let (candidate, candidate_bits) = self.entry_key(mid as usize)?;
            last = compare_keys(key, key_bits, candidate, candidate_bits);
            match last {
                Ordering::Equal => {
                    return Ok(SearchResult {
                        position: mid,
                        last_match: 0,
                    })
                }
                Ordering::Greater => low = mid + 1,
                Ordering::Less => high = mid - 1,
            }
        }

        if last == Ordering::Greater {
            mid += 1;
            Ok(SearchResult {
                position: !mid,
                last_match: 1,
            })
        } else {
            Ok(SearchResult {
                position: !mid,
                last_match: -1,
            })
        }
    }

    /// Free space recomputed from the entries themselves.
    pub fn computed_free_space(&self) -> Result<usize> {
        let mut used = self.lower();
        for i in 0..self.entry_count() {
            used += self.entry(i)?.size;
        }
        PAGE_SIZE
            .checked_sub(used)
            .ok_or_else(|| eyre!("entries overflow page: {} bytes used", used))
    }

    pub fn verify_free_space(&self) -> Result<()> {
        let computed = self.computed_free_space()?;
        ensure!(
            computed == self.free_space(),
            "free space drift: cached {} but entries leave {}",
            self.free_space(),
            computed
        );
        Ok(())
    }

    /// Entries must be strictly increasing; branch pages start with the
    /// empty sentinel key.
    pub fn verify_order(&self) -> Result<()> {
        let count = self.entry_count();
        if self.is_branch() && count > 0 {
            let (_, bits) = self.entry_key(0)?;
            ensure!(bits == 0, "branch page does not start with the sentinel key");
        }
        for i in 1..count {
            let (prev, prev_bits) = self.entry_key(i - 1)?;
            let (cur, cur_bits) = self.entry_key(i)?;
            ensure!(
                compare_keys(prev, prev_bits, cur, cur_bits) == Ordering::Less,
                "entries {} and {} are out of order",
                i - 1,
                i
            );
        }
        Ok(())
    }
}

/// Writable view of a compact page.
///
/// The header is cached and written back after every change.
#[derive(Debug)]
pub struct PageViewMut<'a> {
    data: &'a mut [u8],
    header: CompactPageHeader,
}

impl<'a> PageViewMut<'a> {
    pub fn from_page(data: &'a mut [u8]) -> Result<Self> {
        let header = PageView::from_page(&*data)?.header;
        Ok(Self { data, header })
    }

    /// Formats `data` as an empty page.
    pub fn init(data: &'a mut [u8], flags: PageFlags, dictionary: DictionaryId) -> Result<Self> {
        ensure!(
            data.len() == PAGE_SIZE,
            "invalid page size: {} != {}",
            data.len(),
            PAGE_SIZE
        );
        data.fill(0);
        let mut page = Self {
            data,
            header: CompactPageHeader::new(flags, dictionary),
        };
        page.store_header();
        Ok(page)
    }

    pub fn as_view(&self) -> PageView<'_> {
        PageView {
            data: &*self.data,
            header: self.header,
        }
    }

    fn store_header(&mut self) {
        self.data[..PAGE_HEADER_SIZE].copy_from_slice(self.header.as_bytes());
    }

    fn set_offset(&mut self, index: usize, offset: usize) {
        let slot = offset_slot(index);
        self.data[slot..slot + ENTRY_OFFSET_SIZE].copy_from_slice(&(offset as u16).to_le_bytes());
    }

    pub fn entry_count(&self) -> usize {
        self.as_view().entry_count()
    }

    pub fn contiguous_free_space(&self) -> usize {
        self.as_view().contiguous_free_space()
    }

    pub fn set_dictionary_id(&mut self, dictionary: DictionaryId) {
        self.header.set_dictionary_id(dictionary.get());
        self.store_header();
    }

    /// Drops every entry, keeping flags, and re-targets the dictionary.
    pub fn reset(&mut self, dictionary: DictionaryId) -> Result<()> {
        let flags = self.header.flags()?;
        self.data.fill(0);
        self.header = CompactPageHeader::new(flags, dictionary);
        self.store_header();
        Ok(())
    }

    /// Replaces the whole page with `source`, which must be a valid page.
    pub fn copy_from(&mut self, source: &[u8]) -> Result<()> {
        let header = PageView::from_page(source)?.header;
        self.data.copy_from_slice(source);
        self.header = header;
        Ok(())
    }

    fn reserve(&mut self, index: usize, size: usize) -> Result<usize> {
        let count = self.entry_count();
        ensure!(
            index <= count,
            "insert index {} out of bounds (entry_count={})",
            index,
            count
        );
        let needed = size + ENTRY_OFFSET_SIZE;
        ensure!(
            needed <= self.contiguous_free_space(),
            "not enough contiguous space: need {}, have {}",
            needed,
            self.contiguous_free_space()
        );

        let upper = self.header.upper() as usize - size;
        let lower = self.header.lower() as usize;
        self.data
            .copy_within(offset_slot(index)..lower, offset_slot(index) + ENTRY_OFFSET_SIZE);
        self.set_offset(index, upper);

        self.header.set_upper(upper as u16);
        self.header.set_lower((lower + ENTRY_OFFSET_SIZE) as u16);
        self.header
            .set_free_space((self.header.free_space() as usize - needed) as u16);
        self.store_header();
        Ok(upper)
    }

    pub fn insert_entry(&mut self, index: usize, key: &[u8], key_bits: usize, value: i64) -> Result<()> {
        ensure!(value >= 0, "entry values must be non-negative, got {}", value);
        ensure!(
            key.len() == key_bits.div_ceil(8),
            "key of {} bytes does not match length of {} bits",
            key.len(),
            key_bits
        );
        ensure!(
            key_bits <= u16::MAX as usize,
            "encoded key of {} bits exceeds length prefix",
            key_bits
        );

        let size = entry_size_for(key.len(), value);
        let offset = self.reserve(index, size)?;

        self.data[offset..offset + KEY_LENGTH_PREFIX_SIZE].copy_from_slice(&(key_bits as u16).to_le_bytes());
        let key_start = offset + KEY_LENGTH_PREFIX_SIZE;
        self.data[key_start..key_start + key.len()].copy_from_slice(key);
        encode_value(value, &mut self.data[key_start + key.len()..]);
        Ok(())
    }

    /// Inserts an entry copied verbatim from a page using the same
    /// dictionary.
    pub fn insert_raw_entry(&mut self, index: usize, raw: &[u8]) -> Result<()> {
        let size = decode_entry(raw)?.size;
        ensure!(
            size == raw.len(),
            "raw entry of {} bytes holds a {} byte entry",
            raw.len(),
            size
        );
        let offset = self.reserve(index, size)?;
        self.data[offset..offset + size].copy_from_slice(raw);
        Ok(())
    }

    pub fn append_raw_entry(&mut self, raw: &[u8]) -> Result<()> {
        let count = self.entry_count();
        self.insert_raw_entry(count, raw)
    }

    /// Overwrites a value whose encoding has the same size.
    pub fn set_value(&mut self, index: usize, value: i64) -> Result<()> {
        let offset = self.as_view().entry_offset(index)?;
        let entry = parse_entry(self.data, offset)?;
        ensure!(
            value_len(value) == value_len(entry.value),
            "value {} does not fit in place of {}",
            value,
            entry.value
        );
        let value_start = offset + KEY_LENGTH_PREFIX_SIZE + entry.key.len();
        encode_value(value, &mut self.data[value_start..]);
        Ok(())
    }

    pub fn remove_entry(&mut self, index: usize) -> Result<()> {
        let offset = self.as_view().entry_offset(index)?;
        let size = parse_entry(self.data, offset)?.size;
        let count = self.entry_count();

        self.data.copy_within(
            offset_slot(index + 1)..offset_slot(count),
            offset_slot(index),
        );

        let lower = self.header.lower() as usize - ENTRY_OFFSET_SIZE;
        self.header.set_lower(lower as u16);
        self.header
            .set_free_space((self.header.free_space() as usize + size + ENTRY_OFFSET_SIZE) as u16);
        if count == 1 {
            self.header.set_upper(PAGE_SIZE as u16);
        } else if offset == self.header.upper() as usize {
            self.header.set_upper((offset + size) as u16);
        }
        self.store_header();
        Ok(())
    }

    /// Removes entries `start..end`.
    pub fn remove_range(&mut self, start: usize, end: usize) -> Result<()> {
        let count = self.entry_count();
        ensure!(
            start <= end && end <= count,
            "remove range {}..{} out of bounds (entry_count={})",
            start,
            end,
            count
        );
        if start == end {
            return Ok(());
        }

        let mut reclaimed = 0;
        {
            let view = self.as_view();
            for i in start..end {
                reclaimed += view.entry(i)?.size;
            }
        }
        let removed = end - start;
        self.data
            .copy_within(offset_slot(end)..offset_slot(count), offset_slot(start));

        let lower = self.header.lower() as usize - removed * ENTRY_OFFSET_SIZE;
        self.header.set_lower(lower as u16);
        self.header.set_free_space(
            (self.header.free_space() as usize + reclaimed + removed * ENTRY_OFFSET_SIZE) as u16,
        );
        if removed == count {
            self.header.set_upper(PAGE_SIZE as u16);
        }
        self.store_header();
        Ok(())
    }

    /// Turns the first entry into the zero-length branch sentinel, in place.
    pub fn clear_first_key(&mut self) -> Result<()> {
        let offset = self.as_view().entry_offset(0)?;
        let entry = parse_entry(self.data, offset)?;
        if entry.key_bits == 0 {
            return Ok(());
        }
        let (value, freed) = (entry.value, entry.key.len());

        self.data[offset..offset + KEY_LENGTH_PREFIX_SIZE].copy_from_slice(&0u16.to_le_bytes());
        encode_value(value, &mut self.data[offset + KEY_LENGTH_PREFIX_SIZE..]);

        self.header
            .set_free_space((self.header.free_space() as usize + freed) as u16);
        self.store_header();
        Ok(())
    }

    /// Rewrites all entries contiguously below `PAGE_SIZE`, preserving
    /// their logical order. `scratch` must be page sized.
    pub fn defragment(&mut self, scratch: &mut [u8]) -> Result<()> {
        ensure!(
            scratch.len() == PAGE_SIZE,
            "scratch buffer must be page sized, got {}",
            scratch.len()
        );
        scratch.copy_from_slice(self.data);
        let source = PageView {
            data: &*scratch,
            header: self.header,
        };

        let mut upper = PAGE_SIZE;
        for i in 0..source.entry_count() {
            let raw = source.raw_entry(i)?;
            upper -= raw.len();
            self.data[upper..upper + raw.len()].copy_from_slice(raw);
            self.set_offset(i, upper);
        }
        self.data[self.header.lower() as usize..upper].fill(0);

        self.header.set_upper(upper as u16);
        self.store_header();

        let contiguous = self.contiguous_free_space();
        ensure!(
            contiguous == self.header.free_space() as usize,
            "free space drift after defragmentation: cached {} but {} contiguous",
            self.header.free_space(),
            contiguous
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_page() -> Vec<u8> {
        vec![0u8; PAGE_SIZE]
    }

    fn leaf(data: &mut [u8]) -> PageViewMut<'_> {
        PageViewMut::init(data, PageFlags::Leaf, DictionaryId::IDENTITY).unwrap()
    }

    fn insert_sorted(page: &mut PageViewMut<'_>, key: &[u8], value: i64) {
        let pos = page.as_view().search(key, key.len() * 8).unwrap();
        assert!(!pos.is_found());
        page.insert_entry(pos.index(), key, key.len() * 8, value).unwrap();
    }

    #[test]
    fn header_is_sixteen_bytes() {
        assert_eq!(size_of::<CompactPageHeader>(), 16);
    }

    #[test]
    fn init_creates_empty_page() {
        let mut data = make_page();
        let page = leaf(&mut data);
        let view = page.as_view();

        assert!(view.is_leaf());
        assert_eq!(view.entry_count(), 0);
        assert_eq!(view.lower(), PAGE_HEADER_SIZE);
        assert_eq!(view.upper(), PAGE_SIZE);
        assert_eq!(view.free_space(), PAGE_SIZE - PAGE_HEADER_SIZE);
        view.verify_free_space().unwrap();
    }

    #[test]
    fn header_bytes_are_little_endian() {
        let mut data = make_page();
        PageViewMut::init(&mut data, PageFlags::Branch, DictionaryId::new(0x0102)).unwrap();

        assert_eq!(data[0], 0x02);
        assert_eq!(&data[2..4], &(PAGE_HEADER_SIZE as u16).to_le_bytes());
        assert_eq!(&data[4..6], &(PAGE_SIZE as u16).to_le_bytes());
        assert_eq!(&data[8..16], &0x0102u64.to_le_bytes());
    }

    #[test]
    fn insert_maintains_sorted_order() {
        let mut data = make_page();
        let mut page = leaf(&mut data);

        insert_sorted(&mut page, b"cherry", 3);
        insert_sorted(&mut page, b"apple", 1);
        insert_sorted(&mut page, b"banana", 2);

        let view = page.as_view();
        assert_eq!(view.entry(0).unwrap().key, b"apple");
        assert_eq!(view.entry(1).unwrap().key, b"banana");
        assert_eq!(view.entry(2).unwrap().value, 3);
        view.verify_order().unwrap();
        view.verify_free_space().unwrap();
    }

    #[test]
    fn entry_bytes_follow_wire_format() {
        let mut data = make_page();
        let mut page = leaf(&mut data);
        page.insert_entry(0, b"ab", 16, 300).unwrap();

        let view = page.as_view();
        let offset = view.entry_offset(0).unwrap();
        assert_eq!(offset, PAGE_SIZE - 6);
        assert_eq!(&data[offset..], &[16, 0, b'a', b'b', 0xD8, 0x04]);
    }

    #[test]
    fn search_returns_complement_of_insertion_point() {
        let mut data = make_page();
        let mut page = leaf(&mut data);
        for (i, k) in [b"b", b"d", b"f"].iter().enumerate() {
            page.insert_entry(i, *k, 8, i as i64).unwrap();
        }
        let view = page.as_view();

        let found = view.search(b"d", 8).unwrap();
        assert_eq!(found, SearchResult { position: 1, last_match: 0 });

        let before = view.search(b"a", 8).unwrap();
        assert_eq!(before.position, !0);
        assert_eq!(before.last_match, -1);

        let between = view.search(b"e", 8).unwrap();
        assert_eq!(between.index(), 2);
        assert!(!between.is_found());

        let after = view.search(b"g", 8).unwrap();
        assert_eq!(after.position, !3);
        assert_eq!(after.last_match, 1);
    }

    #[test]
    fn shorter_key_sorts_first_on_common_prefix() {
        assert_eq!(compare_keys(b"ab", 16, b"abc", 24), Ordering::Less);
        assert_eq!(compare_keys(b"\x80", 1, b"\x80", 3), Ordering::Less);
        assert_eq!(compare_keys(b"b", 8, b"abc", 24), Ordering::Greater);
        assert_eq!(compare_keys(b"", 0, b"a", 8), Ordering::Less);
    }

    #[test]
    fn search_empty_page() {
        let mut data = make_page();
        let page = leaf(&mut data);
        let result = page.as_view().search(b"x", 8).unwrap();
        assert_eq!(result.index(), 0);
        assert!(!result.is_found());
    }

    #[test]
    fn remove_leaves_hole_until_defragment() {
        let mut data = make_page();
        let mut page = leaf(&mut data);
        for (i, k) in [b"a", b"b", b"c"].iter().enumerate() {
            page.insert_entry(i, *k, 8, 1).unwrap();
        }

        page.remove_entry(0).unwrap();
        let view = page.as_view();
        assert_eq!(view.entry_count(), 2);
        view.verify_free_space().unwrap();
        assert!(view.contiguous_free_space() < view.free_space());

        let mut scratch = make_page();
        page.defragment(&mut scratch).unwrap();
        let view = page.as_view();
        assert_eq!(view.contiguous_free_space(), view.free_space());
        assert_eq!(view.entry(0).unwrap().key, b"b");
        assert_eq!(view.entry(1).unwrap().key, b"c");
        view.verify_free_space().unwrap();
    }

    #[test]
    fn removing_last_written_entry_reclaims_upper() {
        let mut data = make_page();
        let mut page = leaf(&mut data);
        page.insert_entry(0, b"a", 8, 1).unwrap();
        page.insert_entry(1, b"b", 8, 1).unwrap();

        page.remove_entry(1).unwrap();
        let view = page.as_view();
        assert_eq!(view.contiguous_free_space(), view.free_space());
    }

    #[test]
    fn remove_range_drops_tail() {
        let mut data = make_page();
        let mut page = leaf(&mut data);
        for i in 0..10u8 {
            page.insert_entry(i as usize, &[b'a' + i], 8, i as i64).unwrap();
        }

        page.remove_range(4, 10).unwrap();
        let view = page.as_view();
        assert_eq!(view.entry_count(), 4);
        assert_eq!(view.entry(3).unwrap().key, b"d");
        view.verify_free_space().unwrap();

        page.remove_range(0, 4).unwrap();
        assert_eq!(page.contiguous_free_space(), PAGE_SIZE - PAGE_HEADER_SIZE);
    }

    #[test]
    fn set_value_requires_same_size() {
        let mut data = make_page();
        let mut page = leaf(&mut data);
        page.insert_entry(0, b"k", 8, 5).unwrap();

        page.set_value(0, 7).unwrap();
        assert_eq!(page.as_view().entry_value(0).unwrap(), 7);
        assert!(page.set_value(0, 1 << 20).is_err());
    }

    #[test]
    fn insert_rejects_negative_value_and_bad_length() {
        let mut data = make_page();
        let mut page = leaf(&mut data);
        assert!(page.insert_entry(0, b"k", 8, -1).is_err());
        assert!(page.insert_entry(0, b"k", 16, 1).is_err());
        assert_eq!(page.entry_count(), 0);
    }

    #[test]
    fn insert_fails_when_page_full() {
        let mut data = make_page();
        let mut page = leaf(&mut data);
        let key = [7u8; 100];
        let mut inserted = 0;
        while page.contiguous_free_space() >= entry_size_for(100, 1) + ENTRY_OFFSET_SIZE {
            page.insert_entry(inserted, &key, 800, 1).unwrap();
            inserted += 1;
        }
        assert!(page.insert_entry(inserted, &key, 800, 1).is_err());
        assert_eq!(page.entry_count(), inserted);
    }

    #[test]
    fn clear_first_key_makes_sentinel() {
        let mut data = make_page();
        let mut page = PageViewMut::init(&mut data, PageFlags::Branch, DictionaryId::IDENTITY).unwrap();
        page.insert_entry(0, b"mid", 24, 42).unwrap();
        page.insert_entry(1, b"top", 24, 43).unwrap();

        page.clear_first_key().unwrap();
        let view = page.as_view();
        let first = view.entry(0).unwrap();
        assert_eq!(first.key_bits, 0);
        assert_eq!(first.value, 42);
        assert_eq!(view.child_at(1).unwrap(), 43);
        view.verify_order().unwrap();
        view.verify_free_space().unwrap();
    }

    #[test]
    fn raw_entries_copy_between_pages() {
        let mut src = make_page();
        let mut dst = make_page();
        let mut source = leaf(&mut src);
        source.insert_entry(0, b"key", 24, 99).unwrap();

        let raw = source.as_view().raw_entry(0).unwrap().to_vec();
        let mut dest = leaf(&mut dst);
        dest.append_raw_entry(&raw).unwrap();

        let entry = dest.as_view().entry(0).unwrap();
        assert_eq!(entry.key, b"key");
        assert_eq!(entry.value, 99);
        dest.as_view().verify_free_space().unwrap();
    }

    #[test]
    fn corrupt_flags_are_rejected() {
        let mut data = make_page();
        leaf(&mut data);
        data[0] = 0x7F;
        assert!(PageView::from_page(&data).is_err());
    }

    #[test]
    fn corrupt_bounds_are_rejected() {
        let mut data = make_page();
        leaf(&mut data);
        data[2..4].copy_from_slice(&17u16.to_le_bytes());
        assert!(PageView::from_page(&data).is_err());
    }

    #[test]
    fn copy_from_replaces_whole_page() {
        let mut a = make_page();
        let mut b = make_page();
        let mut source = leaf(&mut a);
        source.insert_entry(0, b"x", 8, 1).unwrap();
        drop(source);

        let mut target = PageViewMut::init(&mut b, PageFlags::Branch, DictionaryId::new(4)).unwrap();
        target.copy_from(&a).unwrap();
        let view = target.as_view();
        assert!(view.is_leaf());
        assert_eq!(view.entry_count(), 1);
        assert_eq!(view.dictionary_id(), DictionaryId::IDENTITY);
    }
}
