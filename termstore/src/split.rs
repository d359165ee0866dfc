//! Splitting terms into a shared part and a local part, and the inline codec
//! that embeds a shared-dictionary id inside a local string.
//!
//! A coded local entry looks like `CCCCt<local>` where `CCCC` are four base64
//! symbols holding a 24-bit shared id and `t` is the side terminator: `.` when
//! the shared part is the term's prefix, `!` when it is the suffix.
//!
//! ```
//! use termstore::split::{Side, SplitMode, TermSplitter};
//!
//! let splitter = TermSplitter::new(SplitMode::PrefixSuffix, 4);
//! let s = splitter.split("<http://example.org/Alice>");
//! assert_eq!(s.side(), Side::Prefix);
//! assert_eq!(s.shared(), "<http://example.org/");
//! assert_eq!(s.local(), "Alice>");
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Largest shared id that fits in an inline code.
pub const MAX_CODED_ID: u64 = (1 << 24) - 1;
/// Symbols in an inline code.
pub const CODE_LEN: usize = 4;
/// Code plus side terminator.
pub const CODED_HEADER_LEN: usize = CODE_LEN + 1;

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
const PREFIX_TERMINATOR: u8 = b'.';
const SUFFIX_TERMINATOR: u8 = b'!';

/// Where the shared part sat in the original term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Not split; the local part is the whole term.
    None,
    /// `shared + local == term`
    Prefix,
    /// `local + shared == term`
    Suffix,
}

impl Side {
    fn terminator(self) -> Option<u8> {
        match self {
            Side::None => None,
            Side::Prefix => Some(PREFIX_TERMINATOR),
            Side::Suffix => Some(SUFFIX_TERMINATOR),
        }
    }

    fn from_terminator(b: u8) -> Option<Self> {
        match b {
            PREFIX_TERMINATOR => Some(Side::Prefix),
            SUFFIX_TERMINATOR => Some(Side::Suffix),
            _ => None,
        }
    }
}

/// Which shared substrings are recognized.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SplitMode {
    /// Never split.
    None = 0,
    /// IRI namespaces only.
    Prefix = 1,
    /// Literal language tags and datatypes only.
    Suffix = 2,
    /// Both IRI namespaces and literal suffixes.
    #[default]
    PrefixSuffix = 3,
    /// Like `PrefixSuffix`, also treating `:` as an IRI boundary (URNs).
    PrefixSuffixColon = 4,
}

impl SplitMode {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => SplitMode::None,
            1 => SplitMode::Prefix,
            2 => SplitMode::Suffix,
            3 => SplitMode::PrefixSuffix,
            4 => SplitMode::PrefixSuffixColon,
            _ => return None,
        })
    }

    fn prefixes(self) -> bool {
        matches!(
            self,
            SplitMode::Prefix | SplitMode::PrefixSuffix | SplitMode::PrefixSuffixColon
        )
    }

    fn suffixes(self) -> bool {
        matches!(
            self,
            SplitMode::Suffix | SplitMode::PrefixSuffix | SplitMode::PrefixSuffixColon
        )
    }

    fn is_boundary(self, b: u8) -> bool {
        b == b'/' || b == b'#' || (b == b':' && self == SplitMode::PrefixSuffixColon)
    }
}

/// Result of splitting one term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Split<'t> {
    side: Side,
    term: &'t str,
    cut: usize,
}

impl<'t> Split<'t> {
    fn none(term: &'t str) -> Self {
        Split {
            side: Side::None,
            term,
            cut: 0,
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn term(&self) -> &'t str {
        self.term
    }

    /// The shared part, empty when not split.
    pub fn shared(&self) -> &'t str {
        match self.side {
            Side::None => "",
            Side::Prefix => &self.term[..self.cut],
            Side::Suffix => &self.term[self.cut..],
        }
    }

    /// The local part, empty when not split.
    pub fn local(&self) -> &'t str {
        match self.side {
            Side::None => "",
            Side::Prefix => &self.term[self.cut..],
            Side::Suffix => &self.term[..self.cut],
        }
    }

    /// The local part if the term was split, otherwise the whole term.
    pub fn local_or_whole(&self) -> &'t str {
        match self.side {
            Side::None => self.term,
            _ => self.local(),
        }
    }
}

/// Splits N-Triples terms according to a [`SplitMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermSplitter {
    mode: SplitMode,
    min_shared_len: usize,
}

impl TermSplitter {
    pub fn new(mode: SplitMode, min_shared_len: u16) -> Self {
        Self {
            mode,
            min_shared_len: min_shared_len as usize,
        }
    }

    pub fn mode(&self) -> SplitMode {
        self.mode
    }

    pub fn min_shared_len(&self) -> u16 {
        self.min_shared_len as u16
    }

    pub fn split<'t>(&self, term: &'t str) -> Split<'t> {
        let split = match term.as_bytes().first() {
            Some(b'<') if self.mode.prefixes() => self.split_iri(term),
            Some(b'"') if self.mode.suffixes() => split_literal(term),
            _ => None,
        };
        match split {
            Some(s) if s.shared().len() >= self.min_shared_len => s,
            _ => Split::none(term),
        }
    }

    fn split_iri<'t>(&self, term: &'t str) -> Option<Split<'t>> {
        if term.len() < 2 || !term.ends_with('>') || term.starts_with("<<") {
            return None;
        }
        let body = &term.as_bytes()[1..term.len() - 1];
        let scheme_end = body.iter().position(|&b| b == b':')?;
        let floor = if body[scheme_end..].starts_with(b"://") {
            scheme_end + 3
        } else {
            scheme_end + 1
        };
        let boundary = body[floor..]
            .iter()
            .rposition(|&b| self.mode.is_boundary(b))?;
        // `<` + body up to and including the boundary
        let cut = 1 + floor + boundary + 1;
        Some(Split {
            side: Side::Prefix,
            term,
            cut,
        })
    }
}

fn split_literal(term: &str) -> Option<Split<'_>> {
    let close = term.rfind('"')?;
    if close == 0 {
        return None;
    }
    let rest = &term[close + 1..];
    let tagged = rest.len() > 1 && rest.starts_with('@');
    let typed = rest.len() > 4 && rest.starts_with("^^<") && rest.ends_with('>');
    if !tagged && !typed {
        return None;
    }
    Some(Split {
        side: Side::Suffix,
        term,
        cut: close,
    })
}

/// Encode `id` as four base64 symbols.
pub fn encode(id: u64) -> Result<[u8; CODE_LEN]> {
    if id > MAX_CODED_ID {
        return Err(StoreError::OutOfRange {
            what: "shared id",
            index: id,
            limit: MAX_CODED_ID + 1,
        });
    }
    let mut out = [0u8; CODE_LEN];
    for (i, b) in out.iter_mut().enumerate() {
        let shift = 6 * (CODE_LEN - 1 - i);
        *b = ALPHABET[((id >> shift) & 0x3f) as usize];
    }
    Ok(out)
}

/// Encode `id` followed by the terminator for `side`.
pub fn encode_with_side(id: u64, side: Side) -> Result<[u8; CODED_HEADER_LEN]> {
    let term = side
        .terminator()
        .ok_or(StoreError::Invalid("cannot code an unsplit term"))?;
    let code = encode(id)?;
    let mut out = [0u8; CODED_HEADER_LEN];
    out[..CODE_LEN].copy_from_slice(&code);
    out[CODE_LEN] = term;
    Ok(out)
}

fn symbol_value(b: u8) -> Option<u64> {
    Some(match b {
        b'A'..=b'Z' => b - b'A',
        b'a'..=b'z' => b - b'a' + 26,
        b'0'..=b'9' => b - b'0' + 52,
        b'+' => 62,
        b'/' => 63,
        _ => return None,
    } as u64)
}

/// Decode the four symbols at `offset`; `None` if any is not a code symbol.
pub fn decode(buf: &[u8], offset: usize) -> Option<u64> {
    let code = buf.get(offset..offset.checked_add(CODE_LEN)?)?;
    code.iter()
        .try_fold(0u64, |acc, &b| Some((acc << 6) | symbol_value(b)?))
}

/// Split a stored local entry into `(shared id, side, local part)` if it is coded.
pub fn decode_entry(entry: &[u8]) -> Option<(u64, Side, &[u8])> {
    let side = Side::from_terminator(*entry.get(CODE_LEN)?)?;
    let id = decode(entry, 0)?;
    Some((id, side, &entry[CODED_HEADER_LEN..]))
}

/// True when a raw term would be mistaken for a coded entry.
pub fn looks_coded(entry: &[u8]) -> bool {
    decode_entry(entry).is_some()
}
