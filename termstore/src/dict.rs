//! Sorted-strings dictionary: term ↔ dense id with binary search.
//!
//! ```no_run
//! use std::path::Path;
//! use termstore::{Dictionary, NOT_FOUND};
//!
//! let d = Dictionary::open(Path::new("dict/shared")).expect("open");
//! let id = d.find_str("<http://example.org/>").unwrap();
//! if id != NOT_FOUND {
//!     println!("{}", d.get_str(id).unwrap());
//! }
//! ```

use std::cmp::Ordering;
use std::path::Path;

use crate::error::{Result, StoreError, corrupt};
use crate::header::{DICT_MAGIC, Header, Layout, Section, SectionKind};
use crate::table::{Backing, OffsetTable};
use crate::{MIN_ID, NOT_FOUND};

/// A term to look up, either contiguous or as two adjacent parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermKey<'a> {
    Whole(&'a [u8]),
    /// Equivalent to the concatenation of both parts.
    Parts(&'a [u8], &'a [u8]),
}

impl TermKey<'_> {
    pub fn len(&self) -> usize {
        match self {
            TermKey::Whole(b) => b.len(),
            TermKey::Parts(a, b) => a.len() + b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Byte-lexicographic order of `stored` relative to this key.
    pub fn cmp_stored(&self, stored: &[u8]) -> Ordering {
        match *self {
            TermKey::Whole(k) => stored.cmp(k),
            TermKey::Parts(a, b) => {
                let n = stored.len().min(a.len());
                match stored[..n].cmp(a) {
                    Ordering::Equal if stored.len() < a.len() => Ordering::Less,
                    Ordering::Equal => stored[a.len()..].cmp(b),
                    ord => ord,
                }
            }
        }
    }
}

impl<'a> From<&'a [u8]> for TermKey<'a> {
    fn from(b: &'a [u8]) -> Self {
        TermKey::Whole(b)
    }
}

impl<'a> From<&'a str> for TermKey<'a> {
    fn from(s: &'a str) -> Self {
        TermKey::Whole(s.as_bytes())
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for TermKey<'a> {
    fn from(b: &'a [u8; N]) -> Self {
        TermKey::Whole(b)
    }
}

/// Opened dictionary file. Immutable and safe to share across threads.
#[derive(Debug)]
pub struct Dictionary {
    backing: Backing,
    layout: Layout,
    offsets: OffsetTable,
    strings: Section,
    count: u64,
}

impl Dictionary {
    /// Map a dictionary file read-only.
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_backing(Backing::map(path)?)
    }

    /// Open a dictionary held in memory.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::from_backing(Backing::Owned(data))
    }

    fn from_backing(backing: Backing) -> Result<Self> {
        let data = backing.as_bytes();
        let layout = Layout::parse(data, DICT_MAGIC)?;
        let count = layout.header.count_u64;
        let entries = count
            .checked_add(1)
            .ok_or_else(|| corrupt("string count overflows"))?;
        let offsets = layout.offset_table(entries)?;
        let strings = layout.require(SectionKind::Strings)?;
        Ok(Self {
            backing,
            layout,
            offsets,
            strings,
            count,
        })
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        self.backing.as_bytes()
    }

    pub fn header(&self) -> &Header {
        &self.layout.header
    }

    /// Number of strings; valid ids are `MIN_ID..=strings()`.
    pub fn strings(&self) -> u64 {
        self.count
    }

    pub fn size_in_bytes(&self) -> usize {
        self.bytes().len()
    }

    fn range(&self, idx: u64) -> Result<(usize, usize)> {
        let data = self.bytes();
        let start = self.offsets.read_offset(data, idx)?;
        let end = self.offsets.read_offset(data, idx + 1)?;
        if start > end || end > self.strings.len {
            return Err(corrupt(format!(
                "string {} spans {start}..{end} outside {} string bytes",
                idx + MIN_ID,
                self.strings.len
            )));
        }
        let base = self.strings.off;
        Ok(((base + start) as usize, (base + end) as usize))
    }

    /// Bytes of string `id`.
    pub fn get(&self, id: u64) -> Result<&[u8]> {
        if id < MIN_ID || id > self.count {
            return Err(StoreError::OutOfRange {
                what: "term id",
                index: id,
                limit: self.count + 1,
            });
        }
        let (s, e) = self.range(id - MIN_ID)?;
        Ok(&self.bytes()[s..e])
    }

    pub fn get_str(&self, id: u64) -> Result<&str> {
        std::str::from_utf8(self.get(id)?)
            .map_err(|_| corrupt(format!("string {id} is not valid UTF-8")))
    }

    /// Id of `key`, or [`NOT_FOUND`].
    pub fn find<'k>(&self, key: impl Into<TermKey<'k>>) -> Result<u64> {
        let key = key.into();
        let (mut lo, mut hi) = (0u64, self.count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let (s, e) = self.range(mid)?;
            match key.cmp_stored(&self.bytes()[s..e]) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Ok(mid + MIN_ID),
            }
        }
        Ok(NOT_FOUND)
    }

    pub fn find_str(&self, term: &str) -> Result<u64> {
        self.find(term)
    }

    /// All `(id, bytes)` in id order.
    pub fn iter(&self) -> DictIter<'_> {
        DictIter {
            dict: self,
            next: MIN_ID,
        }
    }

    /// Check the offset table without reading string bytes.
    pub fn validate(&self) -> Result<()> {
        let data = self.bytes();
        let first = self.offsets.read_offset(data, 0)?;
        if first != 0 {
            return Err(corrupt(format!("first string offset is {first}, expected 0")));
        }
        let mut prev = first;
        for i in 1..self.offsets.offsets_count {
            let off = self.offsets.read_offset(data, i)?;
            if off < prev {
                return Err(corrupt(format!(
                    "string offsets decrease at entry {i} ({prev} > {off})"
                )));
            }
            prev = off;
        }
        if prev != self.strings.len {
            return Err(corrupt(format!(
                "last string offset {prev} != string region length {}",
                self.strings.len
            )));
        }
        Ok(())
    }

    /// Recompute section and body checksums.
    pub fn verify_checksums(&self) -> Result<()> {
        self.layout.verify_checksums(self.bytes())
    }
}

/// Iterator over a dictionary in id order.
pub struct DictIter<'a> {
    dict: &'a Dictionary,
    next: u64,
}

impl<'a> Iterator for DictIter<'a> {
    type Item = Result<(u64, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.dict.count {
            return None;
        }
        let id = self.next;
        self.next += 1;
        Some(self.dict.get(id).map(|b| (id, b)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = (self.dict.count + 1).saturating_sub(self.next) as usize;
        (n, Some(n))
    }
}
