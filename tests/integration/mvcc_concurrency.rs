//! Optimistic concurrency: first committer wins, losers retry.

use std::thread;

use quire::index::BTreeIndexFactory;
use quire::tx::{Commit, StoreOptions, TxPageFile};
use tempfile::TempDir;

fn open_store(dir: &TempDir) -> TxPageFile {
    TxPageFile::open(
        &dir.path().join("mvcc.qdb"),
        StoreOptions::default().page_size(512),
    )
    .expect("open store")
}

#[test]
fn first_committer_wins_on_the_same_key() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let factory = BTreeIndexFactory::<u64, String>::new();

    let mut setup = store.tx();
    let index = factory.create(&mut setup).unwrap();
    assert!(setup.commit().unwrap().is_committed());
    drop(setup);

    // Both transactions start from the same snapshot and write key 5.
    let mut tx1 = store.tx();
    let mut tx2 = store.tx();
    index.put(&mut tx1, 5, "a".into()).unwrap();
    index.put(&mut tx2, 5, "b".into()).unwrap();

    assert_eq!(tx1.commit().unwrap(), Commit::Committed);
    assert_eq!(tx2.commit().unwrap(), Commit::Conflict);

    let mut check = store.tx();
    assert_eq!(index.get(&mut check, &5).unwrap(), Some("a".into()));

    // The loser re-derives against a fresh snapshot and succeeds.
    tx2.rollback().unwrap();
    index.put(&mut tx2, 5, "b".into()).unwrap();
    assert_eq!(tx2.commit().unwrap(), Commit::Committed);
}

#[test]
fn commit_order_decides_regardless_of_write_order() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let factory = BTreeIndexFactory::<u64, String>::new();

    let mut setup = store.tx();
    let index = factory.create(&mut setup).unwrap();
    assert!(setup.commit().unwrap().is_committed());
    drop(setup);

    let mut tx1 = store.tx();
    let mut tx2 = store.tx();
    // tx1 writes first but commits second.
    index.put(&mut tx1, 5, "a".into()).unwrap();
    index.put(&mut tx2, 5, "b".into()).unwrap();

    assert_eq!(tx2.commit().unwrap(), Commit::Committed);
    assert_eq!(tx1.commit().unwrap(), Commit::Conflict);

    let mut check = store.tx();
    assert_eq!(index.get(&mut check, &5).unwrap(), Some("b".into()));
}

#[test]
fn contended_counter_converges_with_retries() {
    const THREADS: u64 = 4;
    const INCREMENTS: u64 = 25;

    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let factory = BTreeIndexFactory::<u64, u64>::new();

    let mut setup = store.tx();
    let index = factory.create(&mut setup).unwrap();
    index.put(&mut setup, 0, 0).unwrap();
    assert!(setup.commit().unwrap().is_committed());
    let root = index.location();
    drop(setup);

    thread::scope(|scope| {
        for _ in 0..THREADS {
            let store = &store;
            scope.spawn(move || {
                let index = BTreeIndexFactory::<u64, u64>::new().open(root);
                for _ in 0..INCREMENTS {
                    loop {
                        let mut tx = store.tx();
                        let current = index.get(&mut tx, &0).unwrap().unwrap_or(0);
                        index.put(&mut tx, 0, current + 1).unwrap();
                        if tx.commit().unwrap().is_committed() {
                            break;
                        }
                    }
                }
            });
        }
    });

    let mut check = store.tx();
    assert_eq!(
        index.get(&mut check, &0).unwrap(),
        Some(THREADS * INCREMENTS)
    );
}

#[test]
fn readers_are_isolated_from_concurrent_writers() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let factory = BTreeIndexFactory::<u64, u64>::new();

    let mut setup = store.tx();
    let index = factory.create(&mut setup).unwrap();
    index.put(&mut setup, 1, 10).unwrap();
    assert!(setup.commit().unwrap().is_committed());
    drop(setup);

    let mut reader = store.tx();
    assert_eq!(index.get(&mut reader, &1).unwrap(), Some(10));

    thread::scope(|scope| {
        let store = &store;
        let root = index.location();
        scope
            .spawn(move || {
                let index = BTreeIndexFactory::<u64, u64>::new().open(root);
                let mut writer = store.tx();
                index.put(&mut writer, 1, 20).unwrap();
                assert!(writer.commit().unwrap().is_committed());
            })
            .join()
            .unwrap();
    });

    // The open snapshot still sees the pre-commit value.
    assert_eq!(index.get(&mut reader, &1).unwrap(), Some(10));
    drop(reader);

    let mut fresh = store.tx();
    assert_eq!(index.get(&mut fresh, &1).unwrap(), Some(20));
}
