//! Multi-index directory: several named indexes in one store, updated
//! atomically through one transaction.

use quire::index::{BTreeIndexFactory, IndexDirectory};
use quire::tx::{StoreOptions, TxPageFile};
use quire::QuireError;
use tempfile::TempDir;

fn open_store(dir: &TempDir) -> TxPageFile {
    TxPageFile::open(
        &dir.path().join("multi.qdb"),
        StoreOptions::default().page_size(512),
    )
    .expect("open store")
}

#[test]
fn create_rejects_duplicate_names() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let mut tx = store.tx();
    let directory = IndexDirectory::new(&mut tx).unwrap();
    let factory = BTreeIndexFactory::<u64, String>::new();

    directory.create(&mut tx, "people", &factory).unwrap();
    let duplicate = directory.create(&mut tx, "people", &factory);
    assert!(
        matches!(duplicate, Err(QuireError::Invalid(_))),
        "expected duplicate-name failure"
    );
}

#[test]
fn open_rejects_unknown_names() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let mut tx = store.tx();
    let directory = IndexDirectory::new(&mut tx).unwrap();
    let factory = BTreeIndexFactory::<u64, String>::new();

    let missing = directory.open(&mut tx, "missing", &factory);
    assert!(
        matches!(missing, Err(QuireError::Invalid(_))),
        "expected unknown-name failure"
    );
}

#[test]
fn named_indexes_survive_reload() {
    let dir = TempDir::new().unwrap();
    let people_factory = BTreeIndexFactory::<u64, String>::new();
    let tags_factory = BTreeIndexFactory::<String, u64>::new();

    {
        let store = open_store(&dir);
        let mut tx = store.tx();
        let directory = IndexDirectory::new(&mut tx).unwrap();

        let people = directory.create(&mut tx, "people", &people_factory).unwrap();
        let tags = directory.create(&mut tx, "tags", &tags_factory).unwrap();
        people.put(&mut tx, 1, "ada".into()).unwrap();
        tags.put(&mut tx, "pioneer".into(), 1).unwrap();
        assert!(tx.commit().unwrap().is_committed());

        let mut names = directory.indexes(&mut tx).unwrap();
        names.sort();
        assert_eq!(names, vec!["people".to_string(), "tags".to_string()]);
    }

    let store = open_store(&dir);
    let mut tx = store.tx();
    let directory = IndexDirectory::new(&mut tx).unwrap();
    let people = directory.open(&mut tx, "people", &people_factory).unwrap();
    let tags = directory.open(&mut tx, "tags", &tags_factory).unwrap();
    assert_eq!(people.get(&mut tx, &1).unwrap(), Some("ada".into()));
    assert_eq!(tags.get(&mut tx, &"pioneer".to_string()).unwrap(), Some(1));
}

#[test]
fn open_or_create_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let mut tx = store.tx();
    let directory = IndexDirectory::new(&mut tx).unwrap();
    let factory = BTreeIndexFactory::<u64, u64>::new();

    let first = directory.open_or_create(&mut tx, "counters", &factory).unwrap();
    first.put(&mut tx, 1, 100).unwrap();
    let second = directory.open_or_create(&mut tx, "counters", &factory).unwrap();
    assert_eq!(first.location(), second.location());
    assert_eq!(second.get(&mut tx, &1).unwrap(), Some(100));
}

#[test]
fn correlated_indexes_commit_atomically() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let forward_factory = BTreeIndexFactory::<u64, String>::new();
    let reverse_factory = BTreeIndexFactory::<String, u64>::new();

    let mut setup = store.tx();
    let directory = IndexDirectory::new(&mut setup).unwrap();
    let forward = directory.create(&mut setup, "forward", &forward_factory).unwrap();
    let reverse = directory.create(&mut setup, "reverse", &reverse_factory).unwrap();
    assert!(setup.commit().unwrap().is_committed());
    drop(setup);

    // Stage updates to both indexes, then roll back: neither side shows.
    let mut tx = store.tx();
    forward.put(&mut tx, 7, "seven".into()).unwrap();
    reverse.put(&mut tx, "seven".into(), 7).unwrap();
    tx.rollback().unwrap();
    assert_eq!(forward.get(&mut tx, &7).unwrap(), None);
    assert_eq!(reverse.get(&mut tx, &"seven".to_string()).unwrap(), None);

    // Commit them together: both sides show.
    forward.put(&mut tx, 7, "seven".into()).unwrap();
    reverse.put(&mut tx, "seven".into(), 7).unwrap();
    assert!(tx.commit().unwrap().is_committed());

    let mut check = store.tx();
    assert_eq!(forward.get(&mut check, &7).unwrap(), Some("seven".into()));
    assert_eq!(reverse.get(&mut check, &"seven".to_string()).unwrap(), Some(7));
}
