use std::fs;
use std::path::Path;

use termstore::{CompositeDictBuilder, DictSorter, StoreConfig, StoreError, TripleIndexBuilder};

fn entries(dir: &Path) -> Vec<String> {
    match fs::read_dir(dir) {
        Ok(rd) => rd
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn config(work: &Path) -> StoreConfig {
    // tiny budget so every builder spills runs into its temp directory
    StoreConfig::default()
        .with_work_dir(work)
        .with_sort_buffer_bytes(64)
}

#[test]
fn dict_sorter_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work");

    let mut s = DictSorter::new(&config(&work)).unwrap();
    for i in 0..100 {
        s.store_copy(format!("term {i}")).unwrap();
    }
    assert!(!entries(&work).is_empty());
    s.write_dict(&dir.path().join("dict")).unwrap();
    assert!(entries(&work).is_empty());

    let mut s = DictSorter::new(&config(&work)).unwrap();
    for i in 0..100 {
        s.store_copy(format!("term {i}")).unwrap();
    }
    s.close().unwrap();
    assert!(entries(&work).is_empty());
    let mut siblings = entries(dir.path());
    siblings.sort();
    assert_eq!(siblings, vec!["dict".to_string(), "work".to_string()]);
}

#[test]
fn dict_sorter_cleans_up_after_failed_write() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work");
    let mut s = DictSorter::new(&config(&work)).unwrap();
    for i in 0..100 {
        s.store_copy(format!("term {i}")).unwrap();
    }
    // the destination is an existing directory, so the final rename fails
    let dest = dir.path().join("occupied");
    fs::create_dir(&dest).unwrap();
    fs::write(dest.join("keep"), b"x").unwrap();
    assert!(s.write_dict(&dest).is_err());
    assert!(entries(&work).is_empty());
    assert_eq!(entries(&dest), vec!["keep".to_string()]);
}

#[test]
fn composite_builder_cleans_up_in_every_state() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work");
    let terms: Vec<String> = (0..100)
        .map(|i| format!("<http://example.org/{}/{i}>", i % 4))
        .collect();

    // closed during the first pass
    let mut pass1 = CompositeDictBuilder::new(&config(&work)).unwrap();
    for t in &terms {
        pass1.visit(t).unwrap();
    }
    pass1.close().unwrap();
    assert!(entries(&work).is_empty());

    // closed after a failure in the second pass
    let mut pass1 = CompositeDictBuilder::new(&config(&work)).unwrap();
    for t in &terms {
        pass1.visit(t).unwrap();
    }
    let mut pass2 = pass1.next_pass().unwrap();
    assert!(matches!(
        pass2.visit("<http://example.org/unseen>"),
        Err(StoreError::UnseenTerm(_))
    ));
    pass2.close().unwrap();
    assert!(entries(&work).is_empty());

    // dropped without closing
    let mut pass1 = CompositeDictBuilder::new(&config(&work)).unwrap();
    for t in &terms {
        pass1.visit(t).unwrap();
    }
    drop(pass1.next_pass().unwrap());
    assert!(entries(&work).is_empty());

    // written successfully
    let mut pass1 = CompositeDictBuilder::new(&config(&work)).unwrap();
    for t in &terms {
        pass1.visit(t).unwrap();
    }
    let mut pass2 = pass1.next_pass().unwrap();
    for t in &terms {
        pass2.visit(t).unwrap();
    }
    let dest = dir.path().join("dict");
    pass2.write(&dest).unwrap();
    assert!(entries(&work).is_empty());
    let mut files = entries(&dest);
    files.sort();
    assert_eq!(files, vec!["shared".to_string(), "strings".to_string()]);
}

#[test]
fn triple_builder_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work");

    let mut b = TripleIndexBuilder::new(&config(&work)).unwrap();
    for i in 0..200u64 {
        b.add_triple(i % 7, i % 3, i).unwrap();
    }
    b.close().unwrap();
    assert!(entries(&work).is_empty());

    let mut b = TripleIndexBuilder::new(&config(&work)).unwrap();
    for i in 0..200u64 {
        b.add_triple(i % 7, i % 3, i).unwrap();
    }
    let dest = dir.path().join("triples");
    b.write(&dest).unwrap();
    assert!(entries(&work).is_empty());
    let mut files = entries(&dest);
    files.sort();
    assert_eq!(files, vec!["ops".to_string(), "pso".to_string(), "spo".to_string()]);
    // nothing but the published directories next to the destination
    let mut siblings = entries(dir.path());
    siblings.sort();
    assert_eq!(siblings, vec!["triples".to_string(), "work".to_string()]);
}

#[test]
fn triple_builder_cleans_up_after_failed_write() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work");
    let mut b = TripleIndexBuilder::new(&config(&work)).unwrap();
    for i in 0..200u64 {
        b.add_triple(i % 7, i % 3, i).unwrap();
    }
    let dest = dir.path().join("occupied");
    fs::create_dir(&dest).unwrap();
    fs::write(dest.join("keep"), b"x").unwrap();
    assert!(matches!(b.write(&dest), Err(StoreError::DestinationExists(_))));
    assert!(entries(&work).is_empty());
    assert_eq!(entries(&dest), vec!["keep".to_string()]);
    let mut siblings = entries(dir.path());
    siblings.sort();
    assert_eq!(siblings, vec!["occupied".to_string(), "work".to_string()]);
}
