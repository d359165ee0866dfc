//! A complete file set: one composite dictionary plus three triple indices.
//!
//! ```text
//! <dir>/dict/shared
//! <dir>/dict/strings
//! <dir>/triples/spo
//! <dir>/triples/pso
//! <dir>/triples/ops
//! ```

use std::path::Path;

use log::info;
use serde::Serialize;

use crate::NOT_FOUND;
use crate::builder::{CompositeDictBuilder, CompositeStats, TripleIndexBuilder, staging_dir};
use crate::composite::{CompositeDict, CompositeLookup};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::triples::{TripleIndex, TripleOrder};
use crate::writer::publish_dir;

pub const DICT_DIR: &str = "dict";
pub const TRIPLES_DIR: &str = "triples";

/// `(s, p, o)` id triple.
pub type Triple = (u64, u64, u64);

/// Opened store. Immutable and safe to share across threads.
#[derive(Debug)]
pub struct Store {
    dict: CompositeDict,
    spo: TripleIndex,
    pso: TripleIndex,
    ops: TripleIndex,
}

fn open_index(dir: &Path, order: TripleOrder) -> Result<TripleIndex> {
    let idx = TripleIndex::open(&dir.join(order.file_name()))?;
    if idx.order() != order {
        return Err(StoreError::Corrupt(format!(
            "{} holds a {:?} index",
            order.file_name(),
            idx.order()
        )));
    }
    Ok(idx)
}

impl Store {
    pub fn open(dir: &Path) -> Result<Self> {
        let dict = CompositeDict::open(&dir.join(DICT_DIR))?;
        let triples = dir.join(TRIPLES_DIR);
        let spo = open_index(&triples, TripleOrder::Spo)?;
        let pso = open_index(&triples, TripleOrder::Pso)?;
        let ops = open_index(&triples, TripleOrder::Ops)?;
        if spo.len() != pso.len() || spo.len() != ops.len() {
            return Err(StoreError::Corrupt(format!(
                "index sizes differ: spo {}, pso {}, ops {}",
                spo.len(),
                pso.len(),
                ops.len()
            )));
        }
        Ok(Self { dict, spo, pso, ops })
    }

    pub fn dict(&self) -> &CompositeDict {
        &self.dict
    }

    pub fn lookup(&self) -> CompositeLookup<'_> {
        self.dict.lookup()
    }

    pub fn index(&self, order: TripleOrder) -> &TripleIndex {
        match order {
            TripleOrder::Spo => &self.spo,
            TripleOrder::Pso => &self.pso,
            TripleOrder::Ops => &self.ops,
        }
    }

    /// Number of triples, duplicates included.
    pub fn len(&self) -> u64 {
        self.spo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spo.is_empty()
    }

    /// Id of `term`, or [`NOT_FOUND`].
    pub fn find_term(&self, term: &str) -> Result<u64> {
        self.dict.lookup().find(term)
    }

    pub fn term(&self, id: u64) -> Result<String> {
        self.dict.lookup().get(id)
    }

    /// Triples matching a pattern; `None` leaves a position unbound.
    pub fn matching(
        &self,
        s: Option<u64>,
        p: Option<u64>,
        o: Option<u64>,
    ) -> Result<Box<dyn Iterator<Item = Result<Triple>> + '_>> {
        let it: Box<dyn Iterator<Item = Result<Triple>> + '_> = match (s, p, o) {
            (Some(s), Some(p), Some(o)) => Box::new(
                self.spo
                    .values(s, p)?
                    .filter(move |r| !matches!(r, Ok(v) if *v != o))
                    .map(move |r| r.map(|_| (s, p, o))),
            ),
            (Some(s), Some(p), None) => {
                Box::new(self.spo.values(s, p)?.map(move |r| r.map(|o| (s, p, o))))
            }
            (Some(s), None, Some(o)) => {
                Box::new(self.ops.sub_keys(o, s)?.map(move |r| r.map(|p| (s, p, o))))
            }
            (Some(s), None, None) => {
                Box::new(self.spo.pairs(s)?.map(move |r| r.map(|(p, o)| (s, p, o))))
            }
            (None, Some(p), Some(o)) => {
                Box::new(self.ops.values(o, p)?.map(move |r| r.map(|s| (s, p, o))))
            }
            (None, Some(p), None) => {
                Box::new(self.pso.pairs(p)?.map(move |r| r.map(|(s, o)| (s, p, o))))
            }
            (None, None, Some(o)) => {
                Box::new(self.ops.pairs(o)?.map(move |r| r.map(|(p, s)| (s, p, o))))
            }
            (None, None, None) => Box::new(
                self.spo
                    .scan()
                    .map(|r| r.map(|t| TripleOrder::Spo.unpermute(t))),
            ),
        };
        Ok(it)
    }

    /// Validate every file of the store.
    pub fn validate(&self) -> Result<()> {
        self.dict.validate()?;
        for order in TripleOrder::ALL {
            self.index(order).validate()?;
        }
        Ok(())
    }
}

/// Counts of a built store.
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub terms: CompositeStats,
    pub triples: u64,
}

/// Build a complete store at `dest` from a re-iterable source of term triples.
///
/// `source` is called three times: two dictionary passes and one pass that
/// maps terms to ids. It must yield the same triples every time.
pub fn build_store<F, I, S>(dest: &Path, config: &StoreConfig, mut source: F) -> Result<StoreStats>
where
    F: FnMut() -> I,
    I: IntoIterator<Item = [S; 3]>,
    S: AsRef<str>,
{
    let staging = staging_dir(dest)?;
    let dict_dir = staging.path().join(DICT_DIR);

    let mut pass1 = CompositeDictBuilder::new(config)?;
    for triple in source() {
        for term in &triple {
            pass1.visit(term.as_ref())?;
        }
    }
    let mut pass2 = pass1.next_pass()?;
    for triple in source() {
        for term in &triple {
            pass2.visit(term.as_ref())?;
        }
    }
    let terms = pass2.write(&dict_dir)?;

    let dict = CompositeDict::open(&dict_dir)?;
    let lookup = dict.lookup();
    let mut builder = TripleIndexBuilder::new(config)?;
    for triple in source() {
        let mut ids = [NOT_FOUND; 3];
        for (id, term) in ids.iter_mut().zip(&triple) {
            *id = lookup.find(term.as_ref())?;
            if *id == NOT_FOUND {
                return Err(StoreError::UnseenTerm(term.as_ref().to_string()));
            }
        }
        builder.add_triple(ids[0], ids[1], ids[2])?;
    }
    drop(dict);
    let triples = builder.write(&staging.path().join(TRIPLES_DIR))?;

    publish_dir(staging.path(), dest)?;
    info!(
        "built store {} ({} terms, {triples} triples)",
        dest.display(),
        terms.strings
    );
    Ok(StoreStats { terms, triples })
}

/// N-Triples terms of every triple in `graph`, usable as a [`build_store`] source.
#[cfg(feature = "oxigraph")]
pub fn ntriples(graph: &oxigraph::model::Graph) -> impl Iterator<Item = [String; 3]> + '_ {
    graph.iter().map(|t| {
        [
            t.subject.to_string(),
            t.predicate.to_string(),
            t.object.to_string(),
        ]
    })
}
