use std::collections::HashSet;
use std::path::Path;
use std::thread;

use termstore::{NOT_FOUND, Result, Store, StoreConfig, StoreError, Triple, build_store};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn source() -> Vec<[String; 3]> {
    let mut out = Vec::new();
    for i in 0..60 {
        let s = format!("<http://example.org/person/{}>", i % 12);
        out.push([
            s.clone(),
            "<http://xmlns.com/foaf/0.1/name>".to_string(),
            format!("\"Person {}\"@en", i % 12),
        ]);
        out.push([
            s.clone(),
            "<http://xmlns.com/foaf/0.1/age>".to_string(),
            format!("\"{}\"^^<http://www.w3.org/2001/XMLSchema#integer>", 20 + i % 9),
        ]);
        out.push([
            s,
            "<http://xmlns.com/foaf/0.1/knows>".to_string(),
            format!("<http://example.org/person/{}>", (i * 5) % 12),
        ]);
    }
    out.push([
        "_:b0".to_string(),
        "<http://www.w3.org/1999/02/22-rdf-syntax-ns#type>".to_string(),
        "<http://xmlns.com/foaf/0.1/Person>".to_string(),
    ]);
    out
}

fn build(dir: &Path) -> (Store, Vec<[String; 3]>) {
    let triples = source();
    let config = StoreConfig::default()
        .with_work_dir(dir.join("work"))
        .with_sort_buffer_bytes(4096);
    let dest = dir.join("store");
    let stats = build_store(&dest, &config, || triples.iter().cloned()).unwrap();
    assert_eq!(stats.triples, triples.len() as u64);
    (Store::open(&dest).unwrap(), triples)
}

fn ids(store: &Store, triples: &[[String; 3]]) -> Vec<Triple> {
    triples
        .iter()
        .map(|[s, p, o]| {
            (
                store.find_term(s).unwrap(),
                store.find_term(p).unwrap(),
                store.find_term(o).unwrap(),
            )
        })
        .collect()
}

#[test]
fn every_pattern_matches_brute_force() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let (store, triples) = build(dir.path());
    store.validate().unwrap();
    let all = ids(&store, &triples);
    assert_eq!(store.len(), all.len() as u64);
    assert!(all.iter().all(|&(s, p, o)| s != NOT_FOUND && p != NOT_FOUND && o != NOT_FOUND));

    let probes: Vec<Triple> = all.iter().copied().take(20).chain([(999, 999, 999)]).collect();
    for &(s, p, o) in &probes {
        for mask in 0..8u8 {
            let bs = (mask & 1 != 0).then_some(s);
            let bp = (mask & 2 != 0).then_some(p);
            let bo = (mask & 4 != 0).then_some(o);
            let mut want: Vec<Triple> = all
                .iter()
                .copied()
                .filter(|t| {
                    bs.is_none_or(|v| v == t.0)
                        && bp.is_none_or(|v| v == t.1)
                        && bo.is_none_or(|v| v == t.2)
                })
                .collect();
            want.sort();
            let mut got: Vec<Triple> = store
                .matching(bs, bp, bo)
                .unwrap()
                .collect::<Result<_>>()
                .unwrap();
            got.sort();
            assert_eq!(got, want, "pattern {bs:?} {bp:?} {bo:?}");
        }
    }
}

#[test]
fn terms_resolve_back() {
    let dir = tempfile::tempdir().unwrap();
    let (store, triples) = build(dir.path());
    let distinct: HashSet<&String> = triples.iter().flatten().collect();
    assert_eq!(store.dict().strings(), distinct.len() as u64);
    for t in distinct {
        let id = store.find_term(t).unwrap();
        assert_eq!(&store.term(id).unwrap(), t);
    }
    assert_eq!(store.find_term("<http://example.org/nobody>").unwrap(), NOT_FOUND);
}

#[test]
fn concurrent_readers() {
    let dir = tempfile::tempdir().unwrap();
    let (store, triples) = build(dir.path());
    let expected = ids(&store, &triples);
    thread::scope(|scope| {
        for worker in 0..4 {
            let store = &store;
            let triples = &triples;
            let expected = &expected;
            scope.spawn(move || {
                for (i, t) in triples.iter().enumerate().skip(worker).step_by(4) {
                    let (s, p, o) = expected[i];
                    assert_eq!(store.find_term(&t[0]).unwrap(), s);
                    assert_eq!(store.term(o).unwrap(), t[2]);
                    assert!(store.matching(Some(s), Some(p), Some(o)).unwrap().next().is_some());
                }
                assert_eq!(store.matching(None, None, None).unwrap().count(), triples.len());
            });
        }
    });
}

#[test]
fn build_refuses_existing_store() {
    let dir = tempfile::tempdir().unwrap();
    let (_store, triples) = build(dir.path());
    let config = StoreConfig::default().with_work_dir(dir.path().join("work"));
    let err = build_store(&dir.path().join("store"), &config, || triples.iter().cloned()).unwrap_err();
    assert!(matches!(err, StoreError::DestinationExists(_)));
}

#[test]
fn changing_source_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::default().with_work_dir(dir.path().join("work"));
    let mut calls = 0;
    let dest = dir.path().join("store");
    let err = build_store(&dest, &config, || {
        calls += 1;
        let o = if calls == 1 { "<http://ex/o1>" } else { "<http://ex/o2>" };
        vec![["<http://ex/s>", "<http://ex/p>", o]]
    })
    .unwrap_err();
    assert!(matches!(err, StoreError::UnseenTerm(_)));
    assert!(!dest.exists());
}
