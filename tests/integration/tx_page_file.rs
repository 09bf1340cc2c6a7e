//! Transactional page store behavior: isolation, conflicts, durability.

use std::path::PathBuf;

use quire::paged::{CodecAccessor, Paged};
use quire::tx::{Commit, StoreOptions, TxPageFile};
use tempfile::TempDir;

const PAGE_SIZE: usize = 256;

fn store_path(dir: &TempDir) -> PathBuf {
    dir.path().join("store.qdb")
}

fn open_store(dir: &TempDir) -> TxPageFile {
    TxPageFile::open(
        &store_path(dir),
        StoreOptions::default().page_size(PAGE_SIZE),
    )
    .expect("open store")
}

fn string_accessor() -> CodecAccessor<String> {
    CodecAccessor::new()
}

#[test]
fn typed_values_survive_reload() {
    let dir = TempDir::new().unwrap();
    let accessor = string_accessor();
    {
        let store = open_store(&dir);
        let mut tx = store.tx();
        let page = tx.alloc().unwrap();
        tx.put(&accessor, page, "Hello".to_string()).unwrap();
        let page = tx.alloc().unwrap();
        tx.put(&accessor, page, "World".to_string()).unwrap();
        assert!(tx.commit().unwrap().is_committed());
    }

    let store = open_store(&dir);
    let mut tx = store.tx();
    assert_eq!(*tx.get(&accessor, 0).unwrap(), "Hello");
    assert_eq!(*tx.get(&accessor, 1).unwrap(), "World");
}

#[test]
fn transactions_see_their_own_writes_but_not_siblings() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let accessor = string_accessor();

    let mut tx1 = store.tx();
    let page = tx1.alloc().unwrap();
    tx1.put(&accessor, page, "Hello".to_string()).unwrap();
    assert!(tx1.commit().unwrap().is_committed());

    tx1.put(&accessor, 0, "Change 1".to_string()).unwrap();

    let mut tx2 = store.tx();
    // tx2 does not see tx1's uncommitted change.
    assert_eq!(*tx2.get(&accessor, 0).unwrap(), "Hello");
    tx2.put(&accessor, 0, "Change 2".to_string()).unwrap();
    // ...but sees its own.
    assert_eq!(*tx2.get(&accessor, 0).unwrap(), "Change 2");
    assert!(tx2.commit().unwrap().is_committed());

    // tx1 still does not see tx2's committed change.
    assert_eq!(*tx1.get(&accessor, 0).unwrap(), "Change 1");
}

#[test]
fn conflicting_update_fails() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let accessor = string_accessor();

    let mut setup = store.tx();
    let page = setup.alloc().unwrap();
    setup.put(&accessor, page, "Hello".to_string()).unwrap();
    assert!(setup.commit().unwrap().is_committed());

    let mut tx1 = store.tx();
    tx1.put(&accessor, 0, "Change 1".to_string()).unwrap();

    let mut tx2 = store.tx();
    tx2.put(&accessor, 0, "Change 2".to_string()).unwrap();
    assert!(tx2.commit().unwrap().is_committed());

    assert_eq!(tx1.commit().unwrap(), Commit::Conflict);
    // The losing transaction retries against a fresh snapshot.
    tx1.rollback().unwrap();
    assert_eq!(*tx1.get(&accessor, 0).unwrap(), "Change 2");
    tx1.put(&accessor, 0, "Change 1".to_string()).unwrap();
    assert!(tx1.commit().unwrap().is_committed());
}

#[test]
fn snapshots_pin_their_point_in_time() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let accessor = string_accessor();

    let mut writer = store.tx();
    let page = writer.alloc().unwrap();
    writer.put(&accessor, page, "one".to_string()).unwrap();
    assert!(writer.commit().unwrap().is_committed());

    let mut reader = store.tx();
    assert_eq!(*reader.get(&accessor, 0).unwrap(), "one");

    writer.put(&accessor, 0, "two".to_string()).unwrap();
    assert!(writer.commit().unwrap().is_committed());

    // The open snapshot still observes the old value, repeatedly.
    assert_eq!(*reader.get(&accessor, 0).unwrap(), "one");
    assert_eq!(*reader.get(&accessor, 0).unwrap(), "one");

    // A fresh snapshot observes the new one.
    let mut fresh = store.tx();
    assert_eq!(*fresh.get(&accessor, 0).unwrap(), "two");
}

#[test]
fn crud_operations_across_reloads() {
    let dir = TempDir::new().unwrap();
    let accessor = string_accessor();
    const COUNT: u32 = 10;

    {
        let store = open_store(&dir);
        let mut tx = store.tx();
        for i in 0..COUNT {
            let page = tx.alloc().unwrap();
            assert_eq!(page, i, "fresh stores allocate sequentially");
            tx.put(&accessor, page, format!("page:{i}")).unwrap();
            assert!(tx.commit().unwrap().is_committed());
        }
    }

    {
        let store = open_store(&dir);
        let mut tx = store.tx();
        for page in 0..COUNT {
            assert_eq!(*tx.get(&accessor, page).unwrap(), format!("page:{page}"));
        }
        // Drop the odd pages.
        for page in (1..COUNT).step_by(2) {
            tx.free(page).unwrap();
        }
        assert!(tx.commit().unwrap().is_committed());
        // Update the survivors.
        for page in (0..COUNT).step_by(2) {
            let value = tx.get(&accessor, page).unwrap();
            tx.put(&accessor, page, format!("{value}:updated")).unwrap();
        }
        assert!(tx.commit().unwrap().is_committed());
    }

    let store = open_store(&dir);
    let mut tx = store.tx();
    for page in (0..COUNT).step_by(2) {
        assert_eq!(
            *tx.get(&accessor, page).unwrap(),
            format!("page:{page}:updated")
        );
    }
}

#[test]
fn rollback_reverts_page_allocation() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let accessor = string_accessor();

    let mut tx = store.tx();
    for _ in 0..5 {
        let first = tx.alloc().unwrap();
        tx.put(&accessor, first, "data".to_string()).unwrap();
        tx.rollback().unwrap();

        let second = tx.alloc().unwrap();
        tx.put(&accessor, second, "data".to_string()).unwrap();
        tx.rollback().unwrap();

        // Allocation was reverted, so the same page comes back.
        assert_eq!(first, second);
    }
}

#[test]
fn values_larger_than_a_page_chain_extents() {
    let dir = TempDir::new().unwrap();
    let accessor: CodecAccessor<Vec<u8>> = CodecAccessor::new();
    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

    let page = {
        let store = open_store(&dir);
        let mut tx = store.tx();
        let page = tx.alloc().unwrap();
        let pages = tx.put(&accessor, page, payload.clone()).unwrap();
        assert!(pages.len() > 1, "payload should span pages");
        assert!(tx.commit().unwrap().is_committed());
        page
    };

    let store = open_store(&dir);
    let mut tx = store.tx();
    assert_eq!(*tx.get(&accessor, page).unwrap(), payload);
}

#[test]
fn freed_pages_are_reallocated_after_commit() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let accessor = string_accessor();

    let mut tx = store.tx();
    let a = tx.alloc().unwrap();
    let b = tx.alloc().unwrap();
    tx.put(&accessor, a, "a".to_string()).unwrap();
    tx.put(&accessor, b, "b".to_string()).unwrap();
    assert!(tx.commit().unwrap().is_committed());

    tx.free(a).unwrap();
    assert!(tx.commit().unwrap().is_committed());

    // The freed page number is available again.
    assert_eq!(tx.alloc().unwrap(), a);
}

#[test]
fn read_only_commit_always_succeeds() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let accessor = string_accessor();

    let mut writer = store.tx();
    let page = writer.alloc().unwrap();
    writer.put(&accessor, page, "x".to_string()).unwrap();
    assert!(writer.commit().unwrap().is_committed());

    let mut reader = store.tx();
    assert_eq!(*reader.get(&accessor, 0).unwrap(), "x");
    writer.put(&accessor, 0, "y".to_string()).unwrap();
    assert!(writer.commit().unwrap().is_committed());
    // The reader wrote nothing, so its commit cannot conflict.
    assert!(reader.commit().unwrap().is_committed());
}

#[test]
fn flush_applies_batches_synchronously() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let accessor = string_accessor();

    let mut tx = store.tx();
    let page = tx.alloc().unwrap();
    tx.put(&accessor, page, "durable".to_string()).unwrap();
    assert!(tx.commit().unwrap().is_committed());
    drop(tx);

    store.flush().unwrap();
    let mut check = store.tx();
    assert_eq!(*check.get(&accessor, page).unwrap(), "durable");
}

#[test]
fn background_flush_reports_completion() {
    let dir = TempDir::new().unwrap();
    let store = TxPageFile::open(
        &store_path(&dir),
        StoreOptions::default()
            .page_size(PAGE_SIZE)
            .background_flush(true),
    )
    .unwrap();
    let accessor = string_accessor();

    let mut tx = store.tx();
    let page = tx.alloc().unwrap();
    tx.put(&accessor, page, "async".to_string()).unwrap();
    assert!(tx.commit().unwrap().is_committed());
    drop(tx);

    let (sender, receiver) = std::sync::mpsc::channel();
    store
        .flush_with(move || {
            let _ = sender.send(());
        })
        .unwrap();
    receiver
        .recv_timeout(std::time::Duration::from_secs(10))
        .expect("flush completion callback");

    let mut check = store.tx();
    assert_eq!(*check.get(&accessor, page).unwrap(), "async");
}
