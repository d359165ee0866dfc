//! Bounds-checked little-endian access over a mapped region.
//!
//! Every width-dependent read in the crate goes through [`OffsetTable`] or
//! [`read_uint`]; every region is a [`Backing`]. Nothing outside this module
//! touches the memory map directly.

use std::fs::File;
use std::path::Path;

use crate::error::{Result, StoreError, corrupt};

/// Byte width of an unsigned little-endian integer stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Width {
    W2 = 2,
    W4 = 4,
    W8 = 8,
}

impl Width {
    /// Parse a stored width byte, if recognized.
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            2 => Width::W2,
            4 => Width::W4,
            8 => Width::W8,
            _ => return None,
        })
    }

    #[inline]
    pub fn bytes(self) -> usize {
        self as usize
    }

    /// Narrowest width able to hold `max`.
    pub fn for_max(max: u64) -> Self {
        if max <= u16::MAX as u64 {
            Width::W2
        } else if max <= u32::MAX as u64 {
            Width::W4
        } else {
            Width::W8
        }
    }

    /// Append `v` to `out` using this width. `v` must fit.
    #[cfg(test)]
    pub(crate) fn put(self, v: u64, out: &mut Vec<u8>) {
        debug_assert!(Width::for_max(v) <= self);
        out.extend_from_slice(&v.to_le_bytes()[..self.bytes()]);
    }
}

/// Read a `width`-byte little-endian integer at `off`, zero-extended.
#[inline]
pub fn read_uint(data: &[u8], off: usize, width: Width) -> Option<u64> {
    let end = off.checked_add(width.bytes())?;
    let b = data.get(off..end)?;
    Some(match width {
        Width::W2 => u16::from_le_bytes([b[0], b[1]]) as u64,
        Width::W4 => u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as u64,
        Width::W8 => u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]),
    })
}

/// An offset array plus an optional fixed-width value region.
#[derive(Debug, Clone, Copy)]
pub struct OffsetTable {
    pub offsets_off: u64,
    pub offsets_count: u64,
    pub offset_width: Width,
    pub value_width: Option<Width>,
}

impl OffsetTable {
    /// Offset number `i`, zero-extended to 64 bits.
    pub fn read_offset(&self, data: &[u8], i: u64) -> Result<u64> {
        if i >= self.offsets_count {
            return Err(StoreError::OutOfRange {
                what: "offset index",
                index: i,
                limit: self.offsets_count,
            });
        }
        let off = i
            .checked_mul(self.offset_width.bytes() as u64)
            .and_then(|d| d.checked_add(self.offsets_off))
            .ok_or_else(|| corrupt("offset position overflows"))?;
        read_uint(data, off as usize, self.offset_width)
            .ok_or_else(|| corrupt(format!("offset {i} lies outside the mapped region")))
    }

    /// Fixed-width value starting at absolute `byte_off`.
    pub fn read_value(&self, data: &[u8], byte_off: u64) -> Result<u64> {
        let width = self
            .value_width
            .ok_or(StoreError::Invalid("table has no fixed-width values"))?;
        let limit = data.len() as u64;
        if byte_off
            .checked_add(width.bytes() as u64)
            .is_none_or(|end| end > limit)
        {
            return Err(StoreError::OutOfRange {
                what: "value byte offset",
                index: byte_off,
                limit,
            });
        }
        read_uint(data, byte_off as usize, width)
            .ok_or_else(|| corrupt("value read outside the mapped region"))
    }
}

/// Immutable bytes a reader owns for its whole lifetime.
#[derive(Debug)]
pub(crate) enum Backing {
    Owned(Vec<u8>),
    Mmap(memmap2::Mmap),
}

impl Backing {
    /// Map `path` read-only.
    pub(crate) fn map(path: &Path) -> Result<Self> {
        let f = File::open(path)?;
        if f.metadata()?.len() == 0 {
            // zero-length maps are rejected on some platforms
            return Ok(Backing::Owned(Vec::new()));
        }
        // Safety: store files are immutable once published; builders only
        // ever create new files through a rename, never write in place.
        let mmap = unsafe { memmap2::MmapOptions::new().map(&f) }?;
        Ok(Backing::Mmap(mmap))
    }

    #[inline]
    pub(crate) fn as_bytes(&self) -> &[u8] {
        match self {
            Backing::Owned(v) => v.as_slice(),
            Backing::Mmap(m) => m,
        }
    }
}
