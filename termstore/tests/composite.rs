use std::path::Path;
use std::sync::Arc;

use termstore::split::decode_entry;
use termstore::{
    CompositeDict, CompositeDictBuilder, CompositeStats, Dictionary, NOT_FOUND, Side, SplitMode,
    StoreConfig, StoreError,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn build(config: &StoreConfig, dest: &Path, terms: &[&str]) -> CompositeStats {
    let mut pass1 = CompositeDictBuilder::new(config).unwrap();
    for t in terms {
        pass1.visit(t).unwrap();
    }
    let mut pass2 = pass1.next_pass().unwrap();
    for t in terms {
        pass2.visit(t).unwrap();
    }
    pass2.write(dest).unwrap()
}

const ALICE: &str = "<http://example.org/Alice>";
const BOB: &str = "<http://example.org/Bob>";
const AGE: &str = "\"23\"^^<http://www.w3.org/2001/XMLSchema#integer>";

#[test]
fn prefix_and_suffix_example() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::default()
        .with_work_dir(dir.path().join("work"))
        .with_split_mode(SplitMode::PrefixSuffix);
    let dest = dir.path().join("dict");
    let stats = build(&config, &dest, &[ALICE, BOB, AGE]);
    assert_eq!(
        stats,
        CompositeStats {
            strings: 3,
            shared: 2,
            prefix: 2,
            suffix: 1,
            whole: 0,
        }
    );

    let shared = Dictionary::open(&dest.join("shared")).unwrap();
    let shared_terms: Vec<&[u8]> = shared.iter().map(|r| r.unwrap().1).collect();
    assert_eq!(
        shared_terms,
        vec![
            &b"\"^^<http://www.w3.org/2001/XMLSchema#integer>"[..],
            &b"<http://example.org/"[..],
        ]
    );

    let strings = Dictionary::open(&dest.join("strings")).unwrap();
    let mut sides = Vec::new();
    for entry in strings.iter() {
        let (_, bytes) = entry.unwrap();
        let (_, side, _) = decode_entry(bytes).expect("coded entry");
        sides.push(side);
    }
    assert_eq!(sides.iter().filter(|s| **s == Side::Prefix).count(), 2);
    assert_eq!(sides.iter().filter(|s| **s == Side::Suffix).count(), 1);

    let dict = CompositeDict::open(&dest).unwrap();
    assert_eq!(dict.strings(), 3);
    let lookup = dict.lookup();
    for t in [ALICE, BOB, AGE] {
        let id = lookup.find(t).unwrap();
        assert_ne!(id, NOT_FOUND, "{t}");
        assert_eq!(lookup.get(id).unwrap(), t);
    }
    assert_eq!(lookup.find("<http://example.org/Carol>").unwrap(), NOT_FOUND);
    dict.validate().unwrap();
    dict.verify_checksums().unwrap();
}

fn corpus() -> Vec<String> {
    let mut terms = Vec::new();
    for i in 0..200 {
        terms.push(format!("<http://example.org/people/{}>", i % 50));
        terms.push(format!("<http://example.org/ns#p{}>", i % 7));
        terms.push(format!("\"label {i}\"@en"));
        terms.push(format!("\"{i}\"^^<http://www.w3.org/2001/XMLSchema#integer>"));
        terms.push(format!("_:b{}", i % 13));
    }
    terms.push("\"plain\"".into());
    terms.push("<urn:isbn:0451450523>".into());
    terms.push("<http://example.org>".into());
    terms.push("\"x\"@de".into());
    terms
}

#[test]
fn roundtrip_every_mode() {
    init();
    let terms = corpus();
    let refs: Vec<&str> = terms.iter().map(String::as_str).collect();
    let mut distinct = refs.clone();
    distinct.sort();
    distinct.dedup();
    for mode in [
        SplitMode::None,
        SplitMode::Prefix,
        SplitMode::Suffix,
        SplitMode::PrefixSuffix,
        SplitMode::PrefixSuffixColon,
    ] {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::default()
            .with_work_dir(dir.path().join("work"))
            .with_split_mode(mode)
            .with_sort_buffer_bytes(512);
        let dest = dir.path().join("dict");
        let stats = build(&config, &dest, &refs);
        assert_eq!(stats.strings, distinct.len() as u64, "{mode:?}");
        assert_eq!(stats.prefix + stats.suffix + stats.whole, stats.strings);

        let dict = CompositeDict::open(&dest).unwrap();
        let lookup = dict.lookup();
        let splitter = dict.splitter();
        assert_eq!(splitter.mode(), mode);
        let mut ids = Vec::new();
        for t in &distinct {
            let id = lookup.find(t).unwrap();
            assert_ne!(id, NOT_FOUND, "{mode:?} {t}");
            assert_eq!(lookup.get(id).unwrap(), *t, "{mode:?}");
            let s = splitter.split(t);
            assert_eq!(
                lookup
                    .find_parts(s.side(), s.shared(), s.local_or_whole())
                    .unwrap(),
                id
            );
            ids.push(id);
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), distinct.len());
    }
}

#[test]
fn reuse_threshold_keeps_rare_parts_whole() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::default()
        .with_work_dir(dir.path().join("work"))
        .with_min_shared_reuse(2);
    let dest = dir.path().join("dict");
    let stats = build(&config, &dest, &[ALICE, BOB, AGE]);
    assert_eq!(stats.shared, 1);
    assert_eq!(stats.prefix, 2);
    assert_eq!(stats.whole, 1);
    let dict = CompositeDict::open(&dest).unwrap();
    let id = dict.lookup().find(AGE).unwrap();
    assert_eq!(dict.local().get_str(id).unwrap(), AGE);
    assert_eq!(dict.lookup().get(id).unwrap(), AGE);
}

#[test]
fn repeated_term_does_not_count_as_reuse() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::default()
        .with_work_dir(dir.path().join("work"))
        .with_min_shared_reuse(2);
    let dest = dir.path().join("dict");
    let only = "<http://only.example/Alice>";
    let stats = build(&config, &dest, &[only, only, ALICE, BOB]);
    assert_eq!(stats.strings, 3);
    assert_eq!(stats.shared, 1);
    assert_eq!(stats.prefix, 2);
    assert_eq!(stats.whole, 1);
    let dict = CompositeDict::open(&dest).unwrap();
    assert_eq!(dict.shared().get_str(1).unwrap(), "<http://example.org/");
    let id = dict.lookup().find(only).unwrap();
    assert_eq!(dict.local().get_str(id).unwrap(), only);
}

#[test]
fn short_shared_parts_stay_whole() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::default()
        .with_work_dir(dir.path().join("work"))
        .with_min_shared_len(5);
    let dest = dir.path().join("dict");
    let stats = build(&config, &dest, &["\"hi\"@en", "\"yo\"@en", "\"hallo\"@de-AT"]);
    assert_eq!(stats.whole, 2);
    assert_eq!(stats.suffix, 1);
    let dict = CompositeDict::open(&dest).unwrap();
    assert_eq!(dict.splitter().min_shared_len(), 5);
    assert_ne!(dict.lookup().find("\"yo\"@en").unwrap(), NOT_FOUND);
}

#[test]
fn unseen_term_fails_loudly() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::default().with_work_dir(dir.path());
    let mut pass1 = CompositeDictBuilder::new(&config).unwrap();
    pass1.visit(ALICE).unwrap();
    let mut pass2 = pass1.next_pass().unwrap();
    match pass2.visit(BOB) {
        Err(StoreError::UnseenTerm(t)) => assert_eq!(t, BOB),
        other => panic!("expected unseen term, got {other:?}"),
    }
    pass2.close().unwrap();
}

#[test]
fn second_pass_must_visit_everything() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::default().with_work_dir(dir.path().join("work"));
    let mut pass1 = CompositeDictBuilder::new(&config).unwrap();
    pass1.visit(ALICE).unwrap();
    pass1.visit(BOB).unwrap();
    let mut pass2 = pass1.next_pass().unwrap();
    pass2.visit(ALICE).unwrap();
    let dest = dir.path().join("dict");
    assert!(matches!(pass2.write(&dest), Err(StoreError::Invalid(_))));
    assert!(!dest.exists());
}

#[test]
fn coded_looking_terms_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::default().with_work_dir(dir.path());
    let mut pass1 = CompositeDictBuilder::new(&config).unwrap();
    assert!(matches!(pass1.visit("AAAB.x"), Err(StoreError::Invalid(_))));
    pass1.visit("AAAB").unwrap();
    pass1.close().unwrap();
}

#[test]
fn shared_dictionary_can_be_reused() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::default().with_work_dir(dir.path().join("work"));
    let dest = dir.path().join("dict");
    build(&config, &dest, &[ALICE, BOB, AGE]);
    let shared = Arc::new(Dictionary::open(&dest.join("shared")).unwrap());
    let a = CompositeDict::with_shared(&dest.join("strings"), Arc::clone(&shared)).unwrap();
    let b = CompositeDict::with_shared(&dest.join("strings"), Arc::clone(&shared)).unwrap();
    assert_eq!(
        a.lookup().find(BOB).unwrap(),
        b.lookup().find(BOB).unwrap()
    );
    assert_eq!(Arc::strong_count(&shared), 3);
}

#[test]
fn plain_dictionary_is_not_composite() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::default().with_work_dir(dir.path().join("work"));
    let dest = dir.path().join("dict");
    build(&config, &dest, &[ALICE]);
    let shared = Arc::new(Dictionary::open(&dest.join("shared")).unwrap());
    assert!(matches!(
        CompositeDict::with_shared(&dest.join("shared"), shared),
        Err(StoreError::Invalid(_))
    ));
}

#[test]
fn refuses_to_overwrite_a_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::default().with_work_dir(dir.path().join("work"));
    let dest = dir.path().join("dict");
    build(&config, &dest, &[ALICE]);
    let mut pass1 = CompositeDictBuilder::new(&config).unwrap();
    pass1.visit(BOB).unwrap();
    let mut pass2 = pass1.next_pass().unwrap();
    pass2.visit(BOB).unwrap();
    assert!(matches!(
        pass2.write(&dest),
        Err(StoreError::DestinationExists(_))
    ));
    let dict = CompositeDict::open(&dest).unwrap();
    assert_ne!(dict.lookup().find(ALICE).unwrap(), NOT_FOUND);
}
