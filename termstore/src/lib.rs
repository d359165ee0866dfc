//! termstore: compact, mmap-friendly term dictionaries and triple indices.
//!
//! A store assigns dense integer ids to RDF terms in N-Triples syntax,
//! externalizes common IRI namespaces and literal suffixes into a shared
//! dictionary, and keeps id triples in three sort orders (SPO, PSO, OPS).
//! Everything is built once with bounded memory and then read through
//! memory maps.
//!
//! Build a store from term triples
//!
//! ```no_run
//! use std::path::Path;
//! use termstore::{StoreConfig, build_store};
//!
//! let triples = vec![
//!     ["<http://example.org/Alice>", "<http://xmlns.com/foaf/0.1/age>", "\"23\"^^<http://www.w3.org/2001/XMLSchema#integer>"],
//!     ["<http://example.org/Alice>", "<http://xmlns.com/foaf/0.1/knows>", "<http://example.org/Bob>"],
//! ];
//! let stats = build_store(Path::new("people.store"), &StoreConfig::default(), || triples.iter().copied())
//!     .expect("build");
//! println!("{} terms, {} triples", stats.terms.strings, stats.triples);
//! ```
//!
//! Query it
//!
//! ```no_run
//! use std::path::Path;
//! use termstore::Store;
//!
//! let store = Store::open(Path::new("people.store")).expect("open");
//! let alice = store.find_term("<http://example.org/Alice>").unwrap();
//! for t in store.matching(Some(alice), None, None).unwrap() {
//!     let (_, p, o) = t.unwrap();
//!     println!("{} {}", store.term(p).unwrap(), store.term(o).unwrap());
//! }
//! ```

pub mod builder;
pub mod composite;
pub mod config;
pub mod dict;
pub mod error;
pub mod header;
mod sort;
pub mod split;
pub mod store;
pub mod table;
pub mod triples;
pub mod writer;

pub use builder::{CompositeDictBuilder, CompositePass2, CompositeStats, DictSorter, TripleIndexBuilder};
pub use composite::{CompositeDict, CompositeLookup};
pub use config::StoreConfig;
pub use dict::{Dictionary, TermKey};
pub use error::{Result, StoreError};
pub use sort::IdTriple;
pub use split::{Side, SplitMode, TermSplitter};
pub use store::{Store, StoreStats, Triple, build_store};
#[cfg(feature = "oxigraph")]
pub use store::ntriples;
pub use triples::{TripleIndex, TripleOrder};
pub use writer::{DictWriter, TripleIndexWriter};

/// Returned by lookups that find nothing.
pub const NOT_FOUND: u64 = 0;
/// Smallest id a dictionary assigns.
pub const MIN_ID: u64 = 1;
