//! Builders for dictionaries and triple indices.
//!
//! Every builder owns a private temp directory under
//! [`StoreConfig::work_dir`]. It is removed when the builder finishes,
//! is closed, or is dropped, whatever the outcome.
//!
//! Composite dictionaries take two passes over the same terms:
//!
//! ```no_run
//! use std::path::Path;
//! use termstore::{CompositeDictBuilder, StoreConfig};
//!
//! let terms = ["<http://example.org/Alice>", "<http://example.org/Bob>"];
//! let mut pass1 = CompositeDictBuilder::new(&StoreConfig::default()).unwrap();
//! for t in terms {
//!     pass1.visit(t).unwrap();
//! }
//! let mut pass2 = pass1.next_pass().unwrap();
//! for t in terms {
//!     pass2.visit(t).unwrap();
//! }
//! let stats = pass2.write(Path::new("out/dict")).unwrap();
//! assert_eq!(stats.strings, 2);
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Serialize;
use tempfile::TempDir;

use crate::NOT_FOUND;
use crate::composite::{COMPOSITE_FLAG, SHARED_FILE, STRINGS_FILE};
use crate::config::StoreConfig;
use crate::dict::Dictionary;
use crate::error::{Result, StoreError};
use crate::sort::{ExternalSorter, IdTriple, Merged};
use crate::split::{MAX_CODED_ID, Side, TermSplitter, decode_entry, encode_with_side, looks_coded};
use crate::triples::TripleOrder;
use crate::writer::{DictWriter, TripleIndexWriter, copy_synced, publish_dir, staging_parent};

fn work_dir(config: &StoreConfig, prefix: &str) -> Result<TempDir> {
    let parent = config.work_dir();
    fs::create_dir_all(&parent)?;
    Ok(tempfile::Builder::new().prefix(prefix).tempdir_in(parent)?)
}

/// Staging directory next to `dest`, renamed onto it on success.
pub(crate) fn staging_dir(dest: &Path) -> Result<TempDir> {
    let parent = staging_parent(dest)?;
    Ok(tempfile::Builder::new()
        .prefix(".tstore-staging-")
        .tempdir_in(parent)?)
}

/// Feed a sorted stream into `push`, skipping adjacent duplicates.
fn for_each_distinct(
    merged: Merged<Vec<u8>>,
    mut push: impl FnMut(&[u8], u64) -> Result<()>,
) -> Result<()> {
    let mut current: Option<(Vec<u8>, u64)> = None;
    for item in merged {
        let item = item?;
        if let Some((prev, n)) = &mut current {
            if *prev == item {
                *n += 1;
                continue;
            }
        }
        if let Some((prev, n)) = current.replace((item, 1)) {
            push(&prev, n)?;
        }
    }
    if let Some((prev, n)) = current {
        push(&prev, n)?;
    }
    Ok(())
}

/// Single-pass builder of a plain [`Dictionary`].
pub struct DictSorter {
    work: TempDir,
    terms: ExternalSorter<Vec<u8>>,
}

impl DictSorter {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let work = work_dir(config, "dict-sorter-")?;
        let terms = ExternalSorter::new(
            work.path(),
            "terms",
            config.sort_buffer_bytes,
            config.compress_runs,
        )?;
        Ok(Self { work, terms })
    }

    /// Copy `term` into the working set.
    pub fn store_copy(&mut self, term: impl AsRef<[u8]>) -> Result<()> {
        self.terms.push(term.as_ref().to_vec())
    }

    /// Number of terms stored so far, duplicates included.
    pub fn len(&self) -> u64 {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.len() == 0
    }

    /// Sort, deduplicate and write the dictionary to `dest`. Returns the
    /// number of distinct strings.
    pub fn write_dict(self, dest: &Path) -> Result<u64> {
        let DictSorter { work, terms } = self;
        staging_parent(dest)?;
        let visited = terms.len();
        let mut w = DictWriter::new(work.path())?;
        for_each_distinct(terms.finish()?, |t, _| w.push(t).map(drop))?;
        let n = w.finish(dest)?;
        work.close()?;
        info!(
            "built dictionary {} ({n} strings from {visited} terms)",
            dest.display()
        );
        Ok(n)
    }

    /// Discard everything and remove the temp directory.
    pub fn close(self) -> Result<()> {
        let DictSorter { work, terms } = self;
        drop(terms);
        Ok(work.close()?)
    }
}

fn fingerprint(term: &str) -> u64 {
    let h = blake3::hash(term.as_bytes());
    let mut b = [0u8; 8];
    b.copy_from_slice(&h.as_bytes()[..8]);
    u64::from_le_bytes(b)
}

/// Counts of a written composite dictionary.
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompositeStats {
    /// Distinct terms, equal to the `strings` entry count.
    pub strings: u64,
    /// Entries of the `shared` dictionary.
    pub shared: u64,
    /// Entries coded against a shared prefix.
    pub prefix: u64,
    /// Entries coded against a shared suffix.
    pub suffix: u64,
    /// Entries stored as the whole term.
    pub whole: u64,
}

/// First pass of a composite dictionary build: collects shared candidates.
pub struct CompositeDictBuilder {
    config: StoreConfig,
    splitter: TermSplitter,
    work: TempDir,
    candidates: ExternalSorter<Vec<u8>>,
    seen: HashSet<u64>,
    visits: u64,
}

impl CompositeDictBuilder {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let work = work_dir(config, "composite-")?;
        let candidates = ExternalSorter::new(
            work.path(),
            "candidates",
            config.sort_buffer_bytes,
            config.compress_runs,
        )?;
        Ok(Self {
            config: config.clone(),
            splitter: TermSplitter::new(config.split_mode, config.min_shared_len),
            work,
            candidates,
            seen: HashSet::new(),
            visits: 0,
        })
    }

    pub fn visit(&mut self, term: &str) -> Result<()> {
        if looks_coded(term.as_bytes()) {
            return Err(StoreError::Invalid(
                "term starts like an inline code and cannot be stored",
            ));
        }
        self.visits += 1;
        // repeat visits of one term do not count as reuse
        if !self.seen.insert(fingerprint(term)) {
            return Ok(());
        }
        let split = self.splitter.split(term);
        if split.side() != Side::None {
            self.candidates.push(split.shared().as_bytes().to_vec())?;
        }
        Ok(())
    }

    /// Freeze the shared vocabulary and start the second pass.
    pub fn next_pass(self) -> Result<CompositePass2> {
        let CompositeDictBuilder {
            config,
            splitter,
            work,
            candidates,
            seen,
            visits,
        } = self;
        let n_candidates = candidates.len();
        let shared_path = work.path().join(SHARED_FILE);
        let mut w = DictWriter::new(work.path())?;
        let (mut distinct, mut dropped) = (0u64, 0u64);
        for_each_distinct(candidates.finish()?, |shared, uses| {
            distinct += 1;
            if uses < config.min_shared_reuse {
                dropped += 1;
                return Ok(());
            }
            w.push(shared).map(drop)
        })?;
        w.finish(&shared_path)?;
        let shared = Dictionary::open(&shared_path)?;
        debug!(
            "first pass: {visits} visits, {n_candidates} shared candidates, {distinct} distinct, {dropped} below reuse threshold {}",
            config.min_shared_reuse
        );
        let staged = ExternalSorter::new(
            work.path(),
            "strings",
            config.sort_buffer_bytes,
            config.compress_runs,
        )?;
        Ok(CompositePass2 {
            splitter,
            work,
            shared_path,
            shared,
            staged,
            seen,
            expected_visits: visits,
            visits: 0,
            too_wide: 0,
        })
    }

    pub fn close(self) -> Result<()> {
        let CompositeDictBuilder {
            work, candidates, ..
        } = self;
        drop(candidates);
        Ok(work.close()?)
    }
}

/// Second pass of a composite dictionary build: stages the local entries.
pub struct CompositePass2 {
    splitter: TermSplitter,
    work: TempDir,
    shared_path: PathBuf,
    shared: Dictionary,
    staged: ExternalSorter<Vec<u8>>,
    seen: HashSet<u64>,
    expected_visits: u64,
    visits: u64,
    too_wide: u64,
}

impl CompositePass2 {
    /// Fails with [`StoreError::UnseenTerm`] for a term the first pass never saw.
    pub fn visit(&mut self, term: &str) -> Result<()> {
        if !self.seen.contains(&fingerprint(term)) {
            return Err(StoreError::UnseenTerm(term.to_string()));
        }
        self.visits += 1;
        let split = self.splitter.split(term);
        let sid = match split.side() {
            Side::None => NOT_FOUND,
            _ => self.shared.find(split.shared())?,
        };
        let entry = if sid == NOT_FOUND {
            term.as_bytes().to_vec()
        } else if sid > MAX_CODED_ID {
            self.too_wide += 1;
            term.as_bytes().to_vec()
        } else {
            let mut e = encode_with_side(sid, split.side())?.to_vec();
            e.extend_from_slice(split.local().as_bytes());
            e
        };
        self.staged.push(entry)
    }

    /// The frozen shared vocabulary.
    pub fn shared(&self) -> &Dictionary {
        &self.shared
    }

    /// Sort the staged entries and publish `shared` and `strings` as `dest_dir`.
    pub fn write(self, dest_dir: &Path) -> Result<CompositeStats> {
        let CompositePass2 {
            splitter,
            work,
            shared_path,
            shared,
            staged,
            expected_visits,
            visits,
            too_wide,
            ..
        } = self;
        if visits != expected_visits {
            return Err(StoreError::Invalid(
                "second pass visited a different number of terms than the first",
            ));
        }
        if too_wide > 0 {
            warn!(
                "{too_wide} visits kept whole: shared id beyond the inline code range ({} shared strings)",
                shared.strings()
            );
        }
        let mut stats = CompositeStats {
            shared: shared.strings(),
            ..Default::default()
        };
        drop(shared);

        let staging = staging_dir(dest_dir)?;
        let mut w = DictWriter::new(work.path())?
            .with_header_bits(COMPOSITE_FLAG | splitter.mode() as u16, splitter.min_shared_len());
        for_each_distinct(staged.finish()?, |entry, _| {
            match decode_entry(entry) {
                Some((_, Side::Prefix, _)) => stats.prefix += 1,
                Some((_, Side::Suffix, _)) => stats.suffix += 1,
                _ => stats.whole += 1,
            }
            w.push(entry).map(drop)
        })?;
        stats.strings = w.finish(&staging.path().join(STRINGS_FILE))?;
        copy_synced(&shared_path, &staging.path().join(SHARED_FILE))?;
        publish_dir(staging.path(), dest_dir)?;
        work.close()?;
        info!(
            "built composite dictionary {} ({} strings: {} prefix, {} suffix, {} whole; {} shared)",
            dest_dir.display(),
            stats.strings,
            stats.prefix,
            stats.suffix,
            stats.whole,
            stats.shared
        );
        Ok(stats)
    }

    pub fn close(self) -> Result<()> {
        let CompositePass2 {
            work,
            shared,
            staged,
            ..
        } = self;
        drop(shared);
        drop(staged);
        Ok(work.close()?)
    }
}

/// Sorts an unordered `(s, p, o)` stream into the three index files.
pub struct TripleIndexBuilder {
    work: TempDir,
    sorters: Vec<(TripleOrder, ExternalSorter<IdTriple>)>,
    budget: usize,
    compress: bool,
    count: u64,
}

impl TripleIndexBuilder {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let work = work_dir(config, "triples-")?;
        let budget = (config.sort_buffer_bytes / TripleOrder::ALL.len()).max(1);
        let sorters = TripleOrder::ALL
            .iter()
            .map(|&order| {
                ExternalSorter::new(work.path(), order.file_name(), budget, config.compress_runs)
                    .map(|s| (order, s))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            work,
            sorters,
            budget,
            compress: config.compress_runs,
            count: 0,
        })
    }

    pub fn add_triple(&mut self, s: u64, p: u64, o: u64) -> Result<()> {
        for (order, sorter) in &mut self.sorters {
            sorter.push(order.permute(s, p, o))?;
        }
        self.count += 1;
        Ok(())
    }

    /// Triples added so far.
    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Write `spo`, `pso` and `ops` and publish them as `dest_dir`.
    /// Returns the triple count.
    pub fn write(self, dest_dir: &Path) -> Result<u64> {
        let TripleIndexBuilder {
            work,
            sorters,
            budget,
            compress,
            count,
        } = self;
        let staging = staging_dir(dest_dir)?;
        for (order, sorter) in sorters {
            let mut w = TripleIndexWriter::with_compression(work.path(), order, budget, compress)?;
            for t in sorter.finish()? {
                w.push(t?)?;
            }
            w.finish(&staging.path().join(order.file_name()))?;
        }
        publish_dir(staging.path(), dest_dir)?;
        work.close()?;
        info!(
            "built triple indices {} ({count} triples)",
            dest_dir.display()
        );
        Ok(count)
    }

    pub fn close(self) -> Result<()> {
        let TripleIndexBuilder { work, sorters, .. } = self;
        drop(sorters);
        Ok(work.close()?)
    }
}
