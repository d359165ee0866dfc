use std::path::Path;

use termstore::{
    DictSorter, DictWriter, Dictionary, MIN_ID, NOT_FOUND, StoreConfig, StoreError, TermKey,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config(work: &Path) -> StoreConfig {
    StoreConfig::default().with_work_dir(work)
}

fn build(work: &Path, dest: &Path, terms: &[&str], budget: usize) -> Dictionary {
    let mut s = DictSorter::new(&config(work).with_sort_buffer_bytes(budget)).unwrap();
    for t in terms {
        s.store_copy(t).unwrap();
    }
    s.write_dict(dest).unwrap();
    Dictionary::open(dest).unwrap()
}

const TERMS: &[&str] = &[
    "<http://example.org/Bob>",
    "\"hello\"@en",
    "<http://example.org/Alice>",
    "_:b0",
    "<http://example.org/Alice>",
    "\"23\"^^<http://www.w3.org/2001/XMLSchema#integer>",
    "",
    "<http://example.org/Alice#me>",
];

#[test]
fn roundtrip_find_get() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let d = build(dir.path(), &dir.path().join("dict"), TERMS, 1 << 20);
    // duplicates collapse
    assert_eq!(d.strings(), 7);
    for t in TERMS {
        let id = d.find_str(t).unwrap();
        assert_ne!(id, NOT_FOUND, "{t}");
        assert_eq!(d.get_str(id).unwrap(), *t);
    }
    for id in MIN_ID..=d.strings() {
        assert_eq!(d.find(d.get(id).unwrap()).unwrap(), id);
    }
    d.validate().unwrap();
    d.verify_checksums().unwrap();
}

#[test]
fn ids_follow_byte_order() {
    let dir = tempfile::tempdir().unwrap();
    let d = build(dir.path(), &dir.path().join("dict"), TERMS, 1 << 20);
    let all: Vec<Vec<u8>> = d.iter().map(|r| r.unwrap().1.to_vec()).collect();
    let mut sorted = all.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(all, sorted);
    assert_eq!(d.get_str(MIN_ID).unwrap(), "");
}

#[test]
fn absent_terms_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let d = build(dir.path(), &dir.path().join("dict"), TERMS, 1 << 20);
    for t in ["<http://example.org/Carol>", "\"hello\"", "zzz", "<"] {
        assert_eq!(d.find_str(t).unwrap(), NOT_FOUND, "{t}");
    }
}

#[test]
fn out_of_range_ids_fail() {
    let dir = tempfile::tempdir().unwrap();
    let d = build(dir.path(), &dir.path().join("dict"), TERMS, 1 << 20);
    for id in [NOT_FOUND, d.strings() + 1, u64::MAX] {
        assert!(matches!(d.get(id), Err(StoreError::OutOfRange { .. })), "{id}");
    }
}

#[test]
fn two_part_keys_find_without_concatenation() {
    let dir = tempfile::tempdir().unwrap();
    let d = build(dir.path(), &dir.path().join("dict"), TERMS, 1 << 20);
    let whole = d.find_str("<http://example.org/Alice>").unwrap();
    for cut in 0..="<http://example.org/Alice>".len() {
        let (a, b) = "<http://example.org/Alice>".split_at(cut);
        assert_eq!(
            d.find(TermKey::Parts(a.as_bytes(), b.as_bytes())).unwrap(),
            whole
        );
    }
    assert_eq!(
        d.find(TermKey::Parts(b"<http://example.org/", b"Carol>"))
            .unwrap(),
        NOT_FOUND
    );
}

#[test]
fn rebuild_in_any_order_gives_same_mapping() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let terms: Vec<String> = (0..500)
        .map(|i| format!("<http://example.org/item/{}>", (i * 7919) % 331))
        .collect();
    let forward: Vec<&str> = terms.iter().map(String::as_str).collect();
    let mut backward = forward.clone();
    backward.reverse();

    // a tiny budget forces several spilled runs
    let a = build(dir.path(), &dir.path().join("a"), &forward, 256);
    let b = build(dir.path(), &dir.path().join("b"), &backward, 1 << 20);
    assert_eq!(a.strings(), 331);
    assert_eq!(a.strings(), b.strings());
    for t in &forward {
        assert_eq!(a.find_str(t).unwrap(), b.find_str(t).unwrap());
    }
    assert_eq!(
        std::fs::read(dir.path().join("a")).unwrap(),
        std::fs::read(dir.path().join("b")).unwrap()
    );
}

#[test]
fn empty_dictionary() {
    let dir = tempfile::tempdir().unwrap();
    let d = build(dir.path(), &dir.path().join("dict"), &[], 1 << 20);
    assert_eq!(d.strings(), 0);
    assert_eq!(d.find_str("x").unwrap(), NOT_FOUND);
    assert!(d.iter().next().is_none());
    d.validate().unwrap();
}

#[test]
fn writer_and_in_memory_reader() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("dict");
    let mut w = DictWriter::new(dir.path()).unwrap();
    assert_eq!(w.push(b"a").unwrap(), 1);
    assert_eq!(w.push(b"b").unwrap(), 2);
    assert_eq!(w.finish(&dest).unwrap(), 2);
    let d = Dictionary::from_bytes(std::fs::read(&dest).unwrap()).unwrap();
    assert_eq!(d.get(2).unwrap(), b"b");
    assert_eq!(d.size_in_bytes() as u64, std::fs::metadata(&dest).unwrap().len());
}
