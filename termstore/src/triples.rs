//! Triple index: id triples permuted into `(key, sub_key, value)` and sorted.
//!
//! One file holds one role order. Layout of the sections:
//!
//! ```text
//! Keys     distinct keys, ascending                         n_keys * W
//! Offsets  first row of every key, plus the row count       (n_keys + 1) * OW
//! Rows     (sub_key, value) pairs sorted per key            n_rows * 2W
//! ByValue  (value, sub_key) pairs sorted per key            n_rows * 2W
//! ```
//!
//! `Rows` and `ByValue` share the key directory: key `i` owns rows
//! `offsets[i]..offsets[i + 1]` in both. `ByValue` answers
//! [`TripleIndex::sub_keys`] with a binary search instead of a scan.
//!
//! All sequences borrow the index, so they cannot outlive it.

use std::cmp::Ordering;
use std::path::Path;

use crate::error::{Result, corrupt};
use crate::header::{Header, Layout, Section, SectionKind, TRIPLES_MAGIC};
use crate::sort::IdTriple;
use crate::table::{Backing, OffsetTable, Width};

/// Role order of a triple index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TripleOrder {
    /// key = subject, sub_key = predicate, value = object
    Spo = 1,
    /// key = predicate, sub_key = subject, value = object
    Pso = 2,
    /// key = object, sub_key = predicate, value = subject
    Ops = 3,
}

impl TripleOrder {
    pub const ALL: [TripleOrder; 3] = [TripleOrder::Spo, TripleOrder::Pso, TripleOrder::Ops];

    pub fn from_u16(v: u16) -> Option<Self> {
        Some(match v {
            1 => TripleOrder::Spo,
            2 => TripleOrder::Pso,
            3 => TripleOrder::Ops,
            _ => return None,
        })
    }

    /// File name of this index inside a triples directory.
    pub fn file_name(self) -> &'static str {
        match self {
            TripleOrder::Spo => "spo",
            TripleOrder::Pso => "pso",
            TripleOrder::Ops => "ops",
        }
    }

    /// `(s, p, o)` to `(key, sub_key, value)`.
    pub fn permute(self, s: u64, p: u64, o: u64) -> IdTriple {
        match self {
            TripleOrder::Spo => [s, p, o],
            TripleOrder::Pso => [p, s, o],
            TripleOrder::Ops => [o, p, s],
        }
    }

    /// `(key, sub_key, value)` back to `(s, p, o)`.
    pub fn unpermute(self, t: IdTriple) -> (u64, u64, u64) {
        let [k, sk, v] = t;
        match self {
            TripleOrder::Spo => (k, sk, v),
            TripleOrder::Pso => (sk, k, v),
            TripleOrder::Ops => (v, sk, k),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Region {
    Rows,
    ByValue,
}

/// Opened triple index file. Immutable and safe to share across threads.
#[derive(Debug)]
pub struct TripleIndex {
    backing: Backing,
    layout: Layout,
    order: TripleOrder,
    table: OffsetTable,
    width: Width,
    keys: Section,
    rows: Section,
    by_value: Section,
    n_keys: u64,
    n_rows: u64,
}

impl TripleIndex {
    /// Map a triple index file read-only.
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_backing(Backing::map(path)?)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::from_backing(Backing::Owned(data))
    }

    fn from_backing(backing: Backing) -> Result<Self> {
        let data = backing.as_bytes();
        let layout = Layout::parse(data, TRIPLES_MAGIC)?;
        let order = TripleOrder::from_u16(layout.header.flags_u16)
            .ok_or_else(|| corrupt("unknown triple order"))?;
        let width = layout
            .value_width()?
            .ok_or_else(|| corrupt("triple index without id width"))?;
        let w = width.bytes() as u64;
        let keys = layout.require(SectionKind::Keys)?;
        let rows = layout.require(SectionKind::Rows)?;
        let by_value = layout.require(SectionKind::ByValue)?;
        if keys.len % w != 0 {
            return Err(corrupt("key section is not a whole number of ids"));
        }
        let n_keys = keys.len / w;
        let n_rows = layout.header.count_u64;
        let row_bytes = n_rows
            .checked_mul(2 * w)
            .ok_or_else(|| corrupt("row count overflows"))?;
        if rows.len != row_bytes || by_value.len != row_bytes {
            return Err(corrupt(format!(
                "row sections hold {}/{} bytes, header implies {row_bytes}",
                rows.len, by_value.len
            )));
        }
        if (n_keys == 0) != (n_rows == 0) {
            return Err(corrupt("keys and rows disagree on emptiness"));
        }
        let table = layout.offset_table(n_keys + 1)?;
        Ok(Self {
            backing,
            layout,
            order,
            table,
            width,
            keys,
            rows,
            by_value,
            n_keys,
            n_rows,
        })
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        self.backing.as_bytes()
    }

    pub fn header(&self) -> &Header {
        &self.layout.header
    }

    pub fn order(&self) -> TripleOrder {
        self.order
    }

    /// Number of triples, duplicates included.
    pub fn len(&self) -> u64 {
        self.n_rows
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    /// Number of distinct keys.
    pub fn key_count(&self) -> u64 {
        self.n_keys
    }

    fn key_at(&self, i: u64) -> Result<u64> {
        let w = self.width.bytes() as u64;
        self.table.read_value(self.bytes(), self.keys.off + i * w)
    }

    fn pair_at(&self, region: Region, row: u64) -> Result<(u64, u64)> {
        let base = match region {
            Region::Rows => self.rows.off,
            Region::ByValue => self.by_value.off,
        };
        let w = self.width.bytes() as u64;
        let off = base + row * 2 * w;
        let data = self.bytes();
        Ok((
            self.table.read_value(data, off)?,
            self.table.read_value(data, off + w)?,
        ))
    }

    /// Rows owned by key number `i`.
    fn key_rows(&self, i: u64) -> Result<(u64, u64)> {
        let data = self.bytes();
        let start = self.table.read_offset(data, i)?;
        let end = self.table.read_offset(data, i + 1)?;
        if start > end || end > self.n_rows {
            return Err(corrupt(format!(
                "key {i} owns rows {start}..{end} of {}",
                self.n_rows
            )));
        }
        Ok((start, end))
    }

    fn find_key(&self, key: u64) -> Result<Option<u64>> {
        let (mut lo, mut hi) = (0u64, self.n_keys);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.key_at(mid)?.cmp(&key) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Ok(Some(mid)),
            }
        }
        Ok(None)
    }

    /// First row in `lo..hi` for which `below` is false.
    fn lower_bound(
        &self,
        region: Region,
        mut lo: u64,
        mut hi: u64,
        below: impl Fn((u64, u64)) -> bool,
    ) -> Result<u64> {
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if below(self.pair_at(region, mid)?) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    fn empty_pairs(&self) -> Pairs<'_> {
        Pairs {
            index: self,
            region: Region::Rows,
            pos: 0,
            end: 0,
            lead: None,
        }
    }

    /// Every `(key, sub_key, value)` in index order.
    pub fn scan(&self) -> Scan<'_> {
        Scan {
            index: self,
            key_idx: 0,
            key: 0,
            key_end: 0,
            pos: 0,
        }
    }

    /// Distinct keys in ascending order.
    pub fn keys(&self) -> Keys<'_> {
        Keys {
            index: self,
            next: 0,
        }
    }

    /// `(sub_key, value)` pairs of `key`.
    pub fn pairs(&self, key: u64) -> Result<Pairs<'_>> {
        let Some(i) = self.find_key(key)? else {
            return Ok(self.empty_pairs());
        };
        let (pos, end) = self.key_rows(i)?;
        Ok(Pairs {
            index: self,
            region: Region::Rows,
            pos,
            end,
            lead: None,
        })
    }

    fn led_by(&self, region: Region, key: u64, lead: u64) -> Result<Pairs<'_>> {
        let Some(i) = self.find_key(key)? else {
            return Ok(self.empty_pairs());
        };
        let (start, end) = self.key_rows(i)?;
        let pos = self.lower_bound(region, start, end, |(a, _)| a < lead)?;
        Ok(Pairs {
            index: self,
            region,
            pos,
            end,
            lead: Some(lead),
        })
    }

    /// Values of `(key, sub_key)`, ascending.
    pub fn values(&self, key: u64, sub_key: u64) -> Result<impl Iterator<Item = Result<u64>> + '_> {
        Ok(self
            .led_by(Region::Rows, key, sub_key)?
            .map(|r| r.map(|(_, v)| v)))
    }

    /// Sub keys of `(key, value)`, ascending.
    pub fn sub_keys(
        &self,
        key: u64,
        value: u64,
    ) -> Result<impl Iterator<Item = Result<u64>> + '_> {
        Ok(self
            .led_by(Region::ByValue, key, value)?
            .map(|r| r.map(|(_, sk)| sk)))
    }

    pub fn contains(&self, key: u64, sub_key: u64, value: u64) -> Result<bool> {
        let Some(i) = self.find_key(key)? else {
            return Ok(false);
        };
        let (start, end) = self.key_rows(i)?;
        let target = (sub_key, value);
        let pos = self.lower_bound(Region::Rows, start, end, |pair| pair < target)?;
        Ok(pos < end && self.pair_at(Region::Rows, pos)? == target)
    }

    /// Check key order, the row directory and per-key row order in both regions.
    pub fn validate(&self) -> Result<()> {
        let data = self.bytes();
        if self.table.read_offset(data, 0)? != 0 {
            return Err(corrupt("first key does not start at row 0"));
        }
        let last = self.table.read_offset(data, self.n_keys)?;
        if last != self.n_rows {
            return Err(corrupt(format!(
                "row directory ends at {last}, header declares {} rows",
                self.n_rows
            )));
        }
        let mut prev_key = None;
        for i in 0..self.n_keys {
            let key = self.key_at(i)?;
            if prev_key.is_some_and(|p| p >= key) {
                return Err(corrupt(format!("keys not strictly ascending at {i}")));
            }
            prev_key = Some(key);
            let (start, end) = self.key_rows(i)?;
            if start == end {
                return Err(corrupt(format!("key {key} owns no rows")));
            }
            for region in [Region::Rows, Region::ByValue] {
                let mut prev = self.pair_at(region, start)?;
                for r in start + 1..end {
                    let pair = self.pair_at(region, r)?;
                    if pair < prev {
                        return Err(corrupt(format!(
                            "{region:?} of key {key} not sorted at row {r}"
                        )));
                    }
                    prev = pair;
                }
            }
        }
        Ok(())
    }

    pub fn verify_checksums(&self) -> Result<()> {
        self.layout.verify_checksums(self.bytes())
    }
}

/// Full scan of an index.
pub struct Scan<'a> {
    index: &'a TripleIndex,
    key_idx: u64,
    key: u64,
    key_end: u64,
    pos: u64,
}

impl Scan<'_> {
    fn step(&mut self) -> Result<Option<IdTriple>> {
        if self.pos >= self.index.n_rows {
            return Ok(None);
        }
        while self.pos >= self.key_end {
            if self.key_idx >= self.index.n_keys {
                return Err(corrupt("rows past the last key"));
            }
            self.key = self.index.key_at(self.key_idx)?;
            self.key_end = self.index.key_rows(self.key_idx)?.1;
            self.key_idx += 1;
        }
        let (sk, v) = self.index.pair_at(Region::Rows, self.pos)?;
        self.pos += 1;
        Ok(Some([self.key, sk, v]))
    }
}

impl Iterator for Scan<'_> {
    type Item = Result<IdTriple>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(t) => t.map(Ok),
            Err(e) => {
                self.pos = self.index.n_rows;
                Some(Err(e))
            }
        }
    }
}

/// Distinct keys of an index.
pub struct Keys<'a> {
    index: &'a TripleIndex,
    next: u64,
}

impl Iterator for Keys<'_> {
    type Item = Result<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.index.n_keys {
            return None;
        }
        let i = self.next;
        self.next += 1;
        Some(self.index.key_at(i))
    }
}

/// Pairs within one key, optionally restricted to a leading component.
pub struct Pairs<'a> {
    index: &'a TripleIndex,
    region: Region,
    pos: u64,
    end: u64,
    lead: Option<u64>,
}

impl Iterator for Pairs<'_> {
    type Item = Result<(u64, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.end {
            return None;
        }
        match self.index.pair_at(self.region, self.pos) {
            Ok((a, _)) if self.lead.is_some_and(|l| l != a) => {
                self.pos = self.end;
                None
            }
            Ok(pair) => {
                self.pos += 1;
                Some(Ok(pair))
            }
            Err(e) => {
                self.pos = self.end;
                Some(Err(e))
            }
        }
    }
}
