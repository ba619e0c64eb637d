use super::*;
use common::PageId;
use lockmgr::LockMode;
use storage::FileManager;
use tempfile::tempdir;

fn harness(dir: &std::path::Path) -> (TransactionManager, BufferPool, LockManager, FileId) {
    let wal = Wal::open(dir.join("wal")).unwrap();
    let mut files = FileManager::new(dir.join("data")).unwrap();
    let file_id = files.create_file("t.tbl").unwrap();
    let pool = BufferPool::new(files, 16);
    let locks = LockManager::new();
    let mgr = TransactionManager::new(wal, pool.clone(), locks.clone());
    (mgr, pool, locks, file_id)
}

#[test]
fn begin_allocates_increasing_ids_and_marks_active() {
    let dir = tempdir().unwrap();
    let (mgr, _, _, _) = harness(dir.path());

    let t1 = mgr.begin().unwrap();
    let t2 = mgr.begin().unwrap();

    assert!(t2.id.0 > t1.id.0);
    assert_eq!(mgr.state(t1.id), Some(TxnState::Active));
    assert_eq!(mgr.active_count(), 2);
}

#[test]
fn commit_releases_locks_and_drops_from_active_set() {
    let dir = tempdir().unwrap();
    let (mgr, _, locks, _) = harness(dir.path());

    let txn = mgr.begin().unwrap();
    locks
        .acquire(txn.id, "table:users", LockMode::Exclusive, None)
        .unwrap();

    mgr.commit(txn.id).unwrap();

    assert_eq!(mgr.state(txn.id), None);
    assert!(!locks.holds(txn.id, "table:users"));
}

#[test]
fn rollback_restores_the_before_image_of_every_undo_entry() {
    let dir = tempdir().unwrap();
    let (mgr, pool, _, file_id) = harness(dir.path());

    let txn = mgr.begin().unwrap();

    let before_image = {
        let pinned = pool.new_page(file_id).unwrap();
        pinned.with(|page| page.bytes().to_vec())
    };

    {
        let pinned = pool.fetch(file_id, PageId(0)).unwrap();
        pinned.with_mut(|page| page.write_at(0, &[9u8; 16])).unwrap();
    }
    mgr.record_undo(txn.id, file_id, PageId(0), before_image.clone())
        .unwrap();

    mgr.rollback(txn.id).unwrap();

    let restored = {
        let pinned = pool.fetch(file_id, PageId(0)).unwrap();
        pinned.with(|page| page.bytes().to_vec())
    };
    assert_eq!(restored, before_image);
    assert_eq!(mgr.state(txn.id), None);
}

#[test]
fn commit_on_an_unknown_transaction_is_an_error() {
    let dir = tempdir().unwrap();
    let (mgr, _, _, _) = harness(dir.path());
    let err = mgr.commit(TxnId(9999)).unwrap_err();
    assert!(matches!(err, DbError::Transaction(_)));
}

#[test]
fn close_all_rolls_back_every_active_transaction() {
    let dir = tempdir().unwrap();
    let (mgr, _, locks, _) = harness(dir.path());

    let t1 = mgr.begin().unwrap();
    let t2 = mgr.begin().unwrap();
    locks
        .acquire(t1.id, "table:a", LockMode::Exclusive, None)
        .unwrap();
    locks
        .acquire(t2.id, "table:b", LockMode::Exclusive, None)
        .unwrap();

    mgr.close_all();

    assert_eq!(mgr.active_count(), 0);
    assert!(!locks.holds(t1.id, "table:a"));
    assert!(!locks.holds(t2.id, "table:b"));
}
