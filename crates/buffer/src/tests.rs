use super::*;
use common::FileId;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

fn pool(dir: &std::path::Path, capacity: usize) -> (BufferPool, FileId) {
    let mut files = FileManager::new(dir).unwrap();
    let file_id = files.create_file("t.tbl").unwrap();
    (BufferPool::new(files, capacity), file_id)
}

#[test]
fn new_page_allocates_sequential_ids() {
    let dir = tempdir().unwrap();
    let (pool, file_id) = pool(dir.path(), 10);

    let p0 = pool.new_page(file_id).unwrap();
    let p1 = pool.new_page(file_id).unwrap();
    assert_eq!(p0.page_id(), PageId(0));
    assert_eq!(p1.page_id(), PageId(1));
}

#[test]
fn fetch_after_flush_reads_modifications() {
    let dir = tempdir().unwrap();
    let (pool, file_id) = pool(dir.path(), 2);

    let page = pool.new_page(file_id).unwrap();
    let page_id = page.page_id();
    page.with_mut(|p| p.write_at(0, &[1, 2, 3, 4]).unwrap());
    drop(page);

    pool.flush_all().unwrap();

    let refetched = pool.fetch(file_id, page_id).unwrap();
    refetched.with(|p| assert_eq!(&p.bytes()[0..4], &[1, 2, 3, 4]));
}

#[test]
fn lru_evicts_least_recently_used_unpinned_page() {
    let dir = tempdir().unwrap();
    let (pool, file_id) = pool(dir.path(), 1);

    let p0 = pool.new_page(file_id).unwrap();
    let p0_id = p0.page_id();
    p0.with_mut(|p| p.write_at(0, &[9]).unwrap());
    drop(p0);

    // Allocating a second page with capacity 1 evicts p0, flushing it first.
    let p1 = pool.new_page(file_id).unwrap();
    drop(p1);

    assert_eq!(pool.stats().evictions, 1);

    let refetched = pool.fetch(file_id, p0_id).unwrap();
    refetched.with(|p| assert_eq!(p.bytes()[0], 9));
}

#[test]
fn pinned_page_is_not_evicted() {
    let dir = tempdir().unwrap();
    let (pool, file_id) = pool(dir.path(), 1);

    let pinned = pool.new_page(file_id).unwrap();
    let err = pool.new_page(file_id).unwrap_err();
    assert!(matches!(err, DbError::Storage(_)));
    drop(pinned);
}

#[test]
fn stats_track_hits_misses_and_hit_rate() {
    let dir = tempdir().unwrap();
    let (pool, file_id) = pool(dir.path(), 10);

    let page = pool.new_page(file_id).unwrap();
    let page_id = page.page_id();
    drop(page);

    pool.fetch(file_id, page_id).unwrap();
    pool.fetch(file_id, page_id).unwrap();

    let stats = pool.stats();
    assert_eq!(stats.hits, 2);
    assert!(stats.hit_rate() > 0.0);
}

#[test]
fn hit_rate_is_zero_with_no_accesses() {
    let stats = BufferStats::default();
    assert_eq!(stats.hit_rate(), 0.0);
}

#[test]
fn fetch_past_end_of_file_propagates_error_instead_of_fabricating_a_page() {
    let dir = tempdir().unwrap();
    let (pool, file_id) = pool(dir.path(), 10);

    let err = pool.fetch(file_id, PageId(5)).unwrap_err();
    assert!(matches!(err, DbError::Storage(_)));
}

#[test]
fn force_rule_hook_runs_before_dirty_eviction() {
    let dir = tempdir().unwrap();
    let mut files = FileManager::new(dir.path()).unwrap();
    let file_id = files.create_file("t.tbl").unwrap();
    let pool = BufferPool::new(files, 1);

    let forced: Arc<Mutex<Vec<PageId>>> = Arc::new(Mutex::new(Vec::new()));
    let forced_clone = forced.clone();
    pool.set_force_rule_hook(Box::new(move |_name, page| {
        forced_clone.lock().unwrap().push(page.id);
        Ok(())
    }));

    let p0 = pool.new_page(file_id).unwrap();
    let p0_id = p0.page_id();
    p0.with_mut(|p| p.mark_dirty());
    drop(p0);

    pool.new_page(file_id).unwrap();

    assert_eq!(forced.lock().unwrap().as_slice(), &[p0_id]);
}

#[test]
fn residency_never_exceeds_capacity() {
    let dir = tempdir().unwrap();
    let (pool, file_id) = pool(dir.path(), 3);

    for _ in 0..10 {
        let page = pool.new_page(file_id).unwrap();
        drop(page);
        assert!(pool.residency() <= 3);
    }
}
