//! Header, TOC, footer and section kinds shared by every store file.
//!
//! ```text
//! [0..32)            header
//! [32..toc_off)      sections (kind-specific payloads)
//! [toc_off..+32*n)   TOC entries
//! [len-16..len)      footer: body CRC-32 (u32) + b"TSTORE_ENDMK"
//! ```
//!
//! The body CRC covers every byte between the header and the footer.

use crate::error::{Result, StoreError, corrupt};
use crate::table::{OffsetTable, Width};

pub const HEADER_LEN: usize = 32;
pub const TOC_ENTRY_LEN: usize = 32;
pub const FOOTER_LEN: usize = 16;
pub const FOOTER_MAGIC: &[u8; 12] = b"TSTORE_ENDMK";
pub const VERSION: u16 = 1;

/// Magic of a dictionary file.
pub const DICT_MAGIC: [u8; 4] = *b"TDIC";
/// Magic of a triple index file.
pub const TRIPLES_MAGIC: [u8; 4] = *b"TIDX";

/// Enumerates the kinds of sections in a store file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum SectionKind {
    /// Offset table (dictionary: byte offsets; triple index: row offsets).
    Offsets = 1,
    /// Concatenated sorted dictionary strings.
    Strings = 2,
    /// Distinct keys of a triple index.
    Keys = 3,
    /// `(sub_key, value)` rows in primary order.
    Rows = 4,
    /// `(value, sub_key)` rows, per key, in secondary order.
    ByValue = 5,
}

impl SectionKind {
    /// Convert a little-endian `u16` value into a kind, if recognized.
    pub fn from_u16(v: u16) -> Option<Self> {
        use SectionKind::*;
        Some(match v {
            1 => Offsets,
            2 => Strings,
            3 => Keys,
            4 => Rows,
            5 => ByValue,
            _ => return None,
        })
    }
}

/// Byte span for a section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Section {
    pub off: u64,
    pub len: u64,
}

impl Section {
    pub fn end(&self) -> u64 {
        self.off + self.len
    }
}

/// Entry in the table of contents mapping a kind to its section.
#[derive(Debug, Clone, Copy)]
pub struct TocEntry {
    pub kind: SectionKind,
    pub section: Section,
    pub crc32_u32: u32,
}

/// Parsed fixed-size file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 4],
    pub version_u16: u16,
    /// File-kind specific flags (split mode of a composite `strings` file,
    /// role order of a triple index).
    pub flags_u16: u16,
    /// Number of strings (dictionary) or triples (triple index).
    pub count_u64: u64,
    pub toc_off_u64: u64,
    pub toc_len_u32: u32,
    pub offset_width_u8: u8,
    /// 0 when the file has no fixed-width value region.
    pub value_width_u8: u8,
    pub aux_u16: u16,
}

impl Header {
    /// Parse a header from the first 32 bytes of `buf`.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);
        Some(Header {
            magic,
            version_u16: u16::from_le_bytes([buf[4], buf[5]]),
            flags_u16: u16::from_le_bytes([buf[6], buf[7]]),
            count_u64: u64::from_le_bytes(buf[8..16].try_into().ok()?),
            toc_off_u64: u64::from_le_bytes(buf[16..24].try_into().ok()?),
            toc_len_u32: u32::from_le_bytes(buf[24..28].try_into().ok()?),
            offset_width_u8: buf[28],
            value_width_u8: buf[29],
            aux_u16: u16::from_le_bytes([buf[30], buf[31]]),
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.magic);
        out[4..6].copy_from_slice(&self.version_u16.to_le_bytes());
        out[6..8].copy_from_slice(&self.flags_u16.to_le_bytes());
        out[8..16].copy_from_slice(&self.count_u64.to_le_bytes());
        out[16..24].copy_from_slice(&self.toc_off_u64.to_le_bytes());
        out[24..28].copy_from_slice(&self.toc_len_u32.to_le_bytes());
        out[28] = self.offset_width_u8;
        out[29] = self.value_width_u8;
        out[30..32].copy_from_slice(&self.aux_u16.to_le_bytes());
        out
    }
}

impl TocEntry {
    pub fn to_bytes(&self) -> [u8; TOC_ENTRY_LEN] {
        let mut ent = [0u8; TOC_ENTRY_LEN];
        ent[0..2].copy_from_slice(&(self.kind as u16).to_le_bytes());
        // reserved_u16 zero
        ent[4..12].copy_from_slice(&self.section.off.to_le_bytes());
        ent[12..20].copy_from_slice(&self.section.len.to_le_bytes());
        ent[20..24].copy_from_slice(&self.crc32_u32.to_le_bytes());
        // reserved_u32 zero
        ent
    }
}

/// Parse the TOC entries referenced by `hdr`.
pub fn parse_toc(buf: &[u8], hdr: &Header) -> Option<Vec<TocEntry>> {
    let toc_off = usize::try_from(hdr.toc_off_u64).ok()?;
    let n = hdr.toc_len_u32 as usize;
    let need = toc_off.checked_add(n.checked_mul(TOC_ENTRY_LEN)?)?;
    if need > buf.len() {
        return None;
    }

    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let e = &buf[toc_off + i * TOC_ENTRY_LEN..toc_off + (i + 1) * TOC_ENTRY_LEN];
        let kind = SectionKind::from_u16(u16::from_le_bytes([e[0], e[1]]))?;
        out.push(TocEntry {
            kind,
            section: Section {
                off: u64::from_le_bytes(e[4..12].try_into().ok()?),
                len: u64::from_le_bytes(e[12..20].try_into().ok()?),
            },
            crc32_u32: u32::from_le_bytes(e[20..24].try_into().ok()?),
        });
    }
    Some(out)
}

/// True if `section` lies entirely within a buffer of `buf_len` bytes.
pub fn section_in_bounds(buf_len: usize, section: Section) -> bool {
    section
        .off
        .checked_add(section.len)
        .is_some_and(|end| end <= buf_len as u64)
}

/// Incremental IEEE CRC-32.
#[derive(Debug, Clone, Copy)]
pub struct Crc32(u32);

impl Default for Crc32 {
    fn default() -> Self {
        Crc32(0xFFFF_FFFF)
    }
}

impl Crc32 {
    pub fn update(&mut self, data: &[u8]) {
        let mut crc = self.0;
        for &b in data {
            let mut x = (crc ^ (b as u32)) & 0xFF;
            for _ in 0..8 {
                let lsb = x & 1;
                x >>= 1;
                if lsb != 0 {
                    x ^= 0xEDB88320;
                }
            }
            crc = (crc >> 8) ^ x;
        }
        self.0 = crc;
    }

    pub fn finish(self) -> u32 {
        self.0 ^ 0xFFFF_FFFF
    }
}

/// Compute IEEE CRC-32 of `data`.
pub fn crc32_ieee(data: &[u8]) -> u32 {
    let mut c = Crc32::default();
    c.update(data);
    c.finish()
}

/// Parse the 16-byte footer: body CRC and end marker.
pub fn parse_footer(buf: &[u8]) -> Option<u32> {
    if buf.len() < FOOTER_LEN {
        return None;
    }
    let base = buf.len() - FOOTER_LEN;
    if &buf[base + 4..] != FOOTER_MAGIC {
        return None;
    }
    Some(u32::from_le_bytes(buf[base..base + 4].try_into().ok()?))
}

/// Header and TOC of an opened file, validated for bounds.
#[derive(Debug, Clone)]
pub struct Layout {
    pub header: Header,
    pub toc: Vec<TocEntry>,
}

impl Layout {
    /// Parse and bounds-check header, footer and TOC of `data`.
    ///
    /// Sections must lie between the header and the TOC and must not overlap.
    /// Checksums are not verified here, see [`Layout::verify_checksums`].
    pub fn parse(data: &[u8], magic: [u8; 4]) -> Result<Self> {
        let header = Header::parse(data).ok_or(StoreError::Invalid("short or invalid header"))?;
        if header.magic != magic {
            return Err(StoreError::Invalid("bad magic"));
        }
        if header.version_u16 != VERSION {
            return Err(StoreError::Invalid("unsupported format version"));
        }
        if data.len() < HEADER_LEN + FOOTER_LEN || parse_footer(data).is_none() {
            return Err(corrupt("missing footer (truncated file?)"));
        }
        let body_end = (data.len() - FOOTER_LEN) as u64;
        if header.toc_off_u64 < HEADER_LEN as u64 || header.toc_off_u64 > body_end {
            return Err(corrupt("TOC offset out of bounds"));
        }
        let toc = parse_toc(&data[..body_end as usize], &header)
            .ok_or_else(|| corrupt("TOC parse failed"))?;
        for e in &toc {
            if e.section.off < HEADER_LEN as u64
                || !section_in_bounds(header.toc_off_u64 as usize, e.section)
            {
                return Err(corrupt(format!("section {:?} out of bounds", e.kind)));
            }
        }
        // Validate TOC ordering by offset and detect overlaps
        let mut spans: Vec<(u64, u64)> =
            toc.iter().map(|e| (e.section.off, e.section.len)).collect();
        spans.sort_unstable();
        for w in spans.windows(2) {
            let (a_off, a_len) = w[0];
            let (b_off, _b_len) = w[1];
            if a_off + a_len > b_off {
                return Err(corrupt("TOC sections overlap or unsorted"));
            }
        }
        Ok(Layout { header, toc })
    }

    /// Finds a section by kind and returns its byte span, if present.
    pub fn section(&self, kind: SectionKind) -> Option<Section> {
        self.toc.iter().find(|e| e.kind == kind).map(|e| e.section)
    }

    pub fn require(&self, kind: SectionKind) -> Result<Section> {
        self.section(kind)
            .ok_or(StoreError::Invalid("missing required section"))
    }

    pub fn offset_width(&self) -> Result<Width> {
        Width::from_u8(self.header.offset_width_u8).ok_or_else(|| corrupt("bad offset width"))
    }

    pub fn value_width(&self) -> Result<Option<Width>> {
        match self.header.value_width_u8 {
            0 => Ok(None),
            w => Width::from_u8(w)
                .map(Some)
                .ok_or_else(|| corrupt("bad value width")),
        }
    }

    /// Offset table over the `Offsets` section holding `count` entries.
    pub fn offset_table(&self, count: u64) -> Result<OffsetTable> {
        let offs = self.require(SectionKind::Offsets)?;
        let offset_width = self.offset_width()?;
        let need = count
            .checked_mul(offset_width.bytes() as u64)
            .ok_or_else(|| corrupt("offset table size overflows"))?;
        if offs.len != need {
            return Err(corrupt(format!(
                "offset table holds {} bytes, header implies {need}",
                offs.len
            )));
        }
        Ok(OffsetTable {
            offsets_off: offs.off,
            offsets_count: count,
            offset_width,
            value_width: self.value_width()?,
        })
    }

    /// Recompute every section CRC and the body CRC.
    pub fn verify_checksums(&self, data: &[u8]) -> Result<()> {
        for e in &self.toc {
            let bytes = &data[e.section.off as usize..e.section.end() as usize];
            if crc32_ieee(bytes) != e.crc32_u32 {
                return Err(corrupt(format!("section {:?} CRC mismatch", e.kind)));
            }
        }
        let want = parse_footer(data).ok_or_else(|| corrupt("missing footer"))?;
        let got = crc32_ieee(&data[HEADER_LEN..data.len() - FOOTER_LEN]);
        if got != want {
            return Err(corrupt("body CRC mismatch"));
        }
        Ok(())
    }
}
