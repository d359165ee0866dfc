//! Composite dictionary: a `strings` dictionary whose entries may reference
//! a separate `shared` dictionary through an inline code.
//!
//! Directory layout written by [`crate::CompositeDictBuilder`]:
//!
//! ```text
//! <dir>/shared    sorted shared substrings (namespaces, literal suffixes)
//! <dir>/strings   sorted local entries, coded or whole
//! ```
//!
//! The `strings` header records the split mode (low byte of the flags) and
//! the minimum shared length (aux field) so lookups split terms exactly as
//! the builder did.

use std::path::Path;
use std::sync::Arc;

use crate::dict::{Dictionary, TermKey};
use crate::error::{Result, StoreError, corrupt};
use crate::split::{
    CODED_HEADER_LEN, MAX_CODED_ID, Side, SplitMode, TermSplitter, decode_entry, encode_with_side,
    looks_coded,
};
use crate::NOT_FOUND;

/// Set in the `strings` header flags of every composite dictionary.
pub(crate) const COMPOSITE_FLAG: u16 = 0x8000;

pub const SHARED_FILE: &str = "shared";
pub const STRINGS_FILE: &str = "strings";

/// Opened composite dictionary.
#[derive(Debug)]
pub struct CompositeDict {
    local: Dictionary,
    shared: Arc<Dictionary>,
    splitter: TermSplitter,
}

impl CompositeDict {
    /// Open `dir/strings` with its own `dir/shared`.
    pub fn open(dir: &Path) -> Result<Self> {
        let shared = Arc::new(Dictionary::open(&dir.join(SHARED_FILE))?);
        Self::with_shared(&dir.join(STRINGS_FILE), shared)
    }

    /// Open a `strings` file against an already opened shared dictionary.
    pub fn with_shared(local_path: &Path, shared: Arc<Dictionary>) -> Result<Self> {
        let local = Dictionary::open(local_path)?;
        Self::from_parts(local, shared)
    }

    pub fn from_parts(local: Dictionary, shared: Arc<Dictionary>) -> Result<Self> {
        let flags = local.header().flags_u16;
        if flags & COMPOSITE_FLAG == 0 {
            return Err(StoreError::Invalid("not a composite strings file"));
        }
        let mode = SplitMode::from_u8((flags & 0xff) as u8)
            .ok_or_else(|| corrupt(format!("unknown split mode tag {}", flags & 0xff)))?;
        let splitter = TermSplitter::new(mode, local.header().aux_u16);
        Ok(Self {
            local,
            shared,
            splitter,
        })
    }

    /// Number of resolvable terms.
    pub fn strings(&self) -> u64 {
        self.local.strings()
    }

    pub fn local(&self) -> &Dictionary {
        &self.local
    }

    pub fn shared(&self) -> &Arc<Dictionary> {
        &self.shared
    }

    pub fn splitter(&self) -> &TermSplitter {
        &self.splitter
    }

    pub fn lookup(&self) -> CompositeLookup<'_> {
        CompositeLookup { dict: self }
    }

    /// Validate both dictionaries.
    pub fn validate(&self) -> Result<()> {
        self.shared.validate()?;
        self.local.validate()
    }

    pub fn verify_checksums(&self) -> Result<()> {
        self.shared.verify_checksums()?;
        self.local.verify_checksums()
    }
}

/// Lookup session over the original, unsplit term space.
#[derive(Debug, Clone, Copy)]
pub struct CompositeLookup<'a> {
    dict: &'a CompositeDict,
}

impl<'a> CompositeLookup<'a> {
    /// Id of `term`, or [`NOT_FOUND`].
    pub fn find(&self, term: &str) -> Result<u64> {
        let split = self.dict.splitter.split(term);
        self.find_parts(split.side(), split.shared(), split.local_or_whole())
    }

    /// Id of a term the caller already split. For [`Side::None`] `local` is
    /// the whole term and `shared` is ignored.
    pub fn find_parts(&self, side: Side, shared: &str, local: &str) -> Result<u64> {
        let whole = match side {
            Side::None => return self.find_whole(TermKey::Whole(local.as_bytes())),
            Side::Prefix => TermKey::Parts(shared.as_bytes(), local.as_bytes()),
            Side::Suffix => TermKey::Parts(local.as_bytes(), shared.as_bytes()),
        };
        let sid = self.dict.shared.find(shared)?;
        if sid == NOT_FOUND || sid > MAX_CODED_ID {
            // builder stored the whole term
            return self.find_whole(whole);
        }
        let code = encode_with_side(sid, side)?;
        self.dict
            .local
            .find(TermKey::Parts(&code, local.as_bytes()))
    }

    fn find_whole(&self, key: TermKey<'_>) -> Result<u64> {
        // a stored whole term never looks coded
        let mut head = [0u8; CODED_HEADER_LEN];
        let n = match key {
            TermKey::Whole(b) => copy_head(&mut head, &[b]),
            TermKey::Parts(a, b) => copy_head(&mut head, &[a, b]),
        };
        if looks_coded(&head[..n]) {
            return Ok(NOT_FOUND);
        }
        self.dict.local.find(key)
    }

    /// The original term with id `id`.
    pub fn get(&self, id: u64) -> Result<String> {
        let entry = self.dict.local.get(id)?;
        let bytes = match decode_entry(entry) {
            Some((sid, side, local)) => {
                let shared = self.dict.shared.get(sid).map_err(|e| match e {
                    StoreError::OutOfRange { .. } => {
                        corrupt(format!("term {id} references missing shared id {sid}"))
                    }
                    e => e,
                })?;
                match side {
                    Side::Suffix => [local, shared].concat(),
                    _ => [shared, local].concat(),
                }
            }
            None => entry.to_vec(),
        };
        String::from_utf8(bytes).map_err(|_| corrupt(format!("term {id} is not valid UTF-8")))
    }
}

fn copy_head(head: &mut [u8], parts: &[&[u8]]) -> usize {
    let mut n = 0;
    for b in parts.iter().flat_map(|p| p.iter()).take(head.len()) {
        head[n] = *b;
        n += 1;
    }
    n
}
