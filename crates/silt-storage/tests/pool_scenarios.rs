use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use silt_common::SiltError;
use silt_storage::{
    BufferPoolManager, BufferPoolStats, FileDiskManager, MockDiskManager, PageId, PAGE_SIZE,
};

fn make_pool(pool_size: usize) -> (Arc<MockDiskManager>, BufferPoolManager) {
    let disk = Arc::new(MockDiskManager::new());
    let pool = BufferPoolManager::new(pool_size, disk.clone(), None);
    (disk, pool)
}

/// Occupancy invariants that must hold between public operations: every
/// frame is either free or resident, and the replacer holds exactly the
/// unpinned resident frames.
fn check_invariants(stats: &BufferPoolStats) {
    assert_eq!(stats.free + stats.resident, stats.pool_size);
    assert_eq!(stats.evictable, stats.resident - stats.pinned);
    assert!(stats.dirty <= stats.resident);
}

#[test]
fn allocation_exhaustion() {
    let (_disk, pool) = make_pool(3);

    let (p0, _g0) = pool.new_page().unwrap();
    let (p1, _g1) = pool.new_page().unwrap();
    let (p2, _g2) = pool.new_page().unwrap();
    assert_eq!(
        (p0, p1, p2),
        (PageId::new(0), PageId::new(1), PageId::new(2))
    );

    // All three frames pinned: the fourth request fails without touching
    // pool state or the allocator.
    let err = pool.new_page().unwrap_err();
    assert!(matches!(err, SiltError::PoolExhausted));
    let stats = pool.stats();
    assert_eq!(stats.resident, 3);
    assert_eq!(stats.pinned, 3);
    check_invariants(&stats);

    drop(_g2);
    let (p3, _g3) = pool.new_page().unwrap();
    assert_eq!(p3, PageId::new(3)); // the failed call allocated nothing
}

#[test]
fn clock_second_chance_spares_pinned_page() {
    let (disk, pool) = make_pool(2);

    let (p0, mut g0) = pool.new_page().unwrap();
    g0.data_mut()[0] = 0xA0;
    drop(g0);
    let (p1, mut g1) = pool.new_page().unwrap();
    g1.data_mut()[0] = 0xA1;
    drop(g1);

    // Re-pin p0; only p1's frame remains eviction-eligible.
    let g0 = pool.fetch_page(p0).unwrap();
    assert_eq!(g0.data()[0], 0xA0);

    let (_p2, _g2) = pool.new_page().unwrap();
    assert_eq!(disk.write_count(p1), 1); // p1 was the victim
    assert_eq!(disk.write_count(p0), 0); // p0 stayed resident
    check_invariants(&pool.stats());
}

#[test]
fn dirty_page_written_back_before_eviction() {
    let (disk, pool) = make_pool(1);

    let (p0, mut g0) = pool.new_page().unwrap();
    g0.data_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);
    g0.unpin(true);

    let (_p1, g1) = pool.new_page().unwrap();
    assert_eq!(disk.write_count(p0), 1);

    // The written bytes round-trip through the disk manager.
    drop(g1);
    let g0 = pool.fetch_page(p0).unwrap();
    assert_eq!(&g0.data()[..4], &[1, 2, 3, 4]);
}

#[test]
fn delete_pinned_page_is_busy() {
    let (disk, pool) = make_pool(2);

    let (p0, g0) = pool.new_page().unwrap();
    assert!(!pool.delete_page(p0).unwrap());

    // Still resident, still pinned, and nothing was deallocated.
    let stats = pool.stats();
    assert_eq!(stats.resident, 1);
    assert_eq!(stats.pinned, 1);
    assert!(disk.deallocated().is_empty());
    assert_eq!(g0.page_id(), p0);
    check_invariants(&stats);
}

#[test]
fn delete_unpinned_page_clears_residency() {
    let (disk, pool) = make_pool(2);

    let (p0, mut g0) = pool.new_page().unwrap();
    g0.data_mut()[0] = 0x55;
    drop(g0);

    assert!(pool.delete_page(p0).unwrap());
    let stats = pool.stats();
    assert_eq!(stats.resident, 0);
    assert_eq!(stats.free, 2);
    assert_eq!(disk.deallocated(), vec![p0]);
    check_invariants(&stats);

    // The dirty bytes were discarded with the page; a re-fetch goes back
    // to disk and reads zeroes.
    let g0 = pool.fetch_page(p0).unwrap();
    assert!(g0.data().iter().all(|&b| b == 0));
}

#[test]
fn flush_clears_dirty_and_prevents_rewrite() {
    let (disk, pool) = make_pool(1);

    let (p0, mut g0) = pool.new_page().unwrap();
    g0.data_mut()[0] = 9;
    g0.unpin(true);
    assert_eq!(pool.stats().dirty, 1);

    assert!(pool.flush_page(p0).unwrap());
    assert_eq!(pool.stats().dirty, 0);
    assert_eq!(disk.write_count(p0), 1);

    // Eviction of the now-clean page does not write it again.
    let (_p1, _g1) = pool.new_page().unwrap();
    assert_eq!(disk.write_count(p0), 1);
}

// --- Round-trip and idempotence laws ---

#[test]
fn fetch_unpin_returns_frame_to_rest() {
    let (_disk, pool) = make_pool(3);
    let before = pool.stats();

    let g = pool.fetch_page(PageId::new(0)).unwrap();
    assert!(g.unpin(false));

    let after = pool.stats();
    assert_eq!(after.pinned, 0);
    assert_eq!(after.dirty, before.dirty);
    check_invariants(&after);
}

#[test]
fn unpin_of_unknown_page_is_a_no_op() {
    let (_disk, pool) = make_pool(2);
    assert!(!pool.unpin_page(PageId::new(42), false));
    assert!(!pool.unpin_page(PageId::new(42), true));
    check_invariants(&pool.stats());
}

#[test]
fn repeated_flush_succeeds() {
    let (_disk, pool) = make_pool(2);
    let (p0, g0) = pool.new_page().unwrap();
    g0.unpin(true);
    assert!(pool.flush_page(p0).unwrap());
    assert!(pool.flush_page(p0).unwrap());
}

#[test]
fn new_page_ids_are_never_reissued() {
    let (_disk, pool) = make_pool(2);
    let mut seen = Vec::new();
    for _ in 0..6 {
        let (pid, guard) = pool.new_page().unwrap();
        assert!(!seen.contains(&pid));
        seen.push(pid);
        drop(guard);
    }
}

#[test]
fn invariants_hold_across_mixed_workload() {
    let (_disk, pool) = make_pool(4);

    let (p0, g0) = pool.new_page().unwrap();
    check_invariants(&pool.stats());
    let (p1, mut g1) = pool.new_page().unwrap();
    g1.data_mut()[0] = 1;
    check_invariants(&pool.stats());

    drop(g0);
    check_invariants(&pool.stats());
    g1.unpin(true);
    check_invariants(&pool.stats());

    let g0 = pool.fetch_page(p0).unwrap();
    check_invariants(&pool.stats());
    pool.flush_page(p1).unwrap();
    check_invariants(&pool.stats());
    assert!(pool.delete_page(p1).unwrap());
    check_invariants(&pool.stats());

    for _ in 0..6 {
        let (_pid, guard) = pool.new_page().unwrap();
        drop(guard);
        check_invariants(&pool.stats());
    }

    drop(g0);
    check_invariants(&pool.stats());
}

// --- End-to-end over the file-backed disk manager ---

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

fn with_temp_dir<F: FnOnce(std::path::PathBuf)>(f: F) {
    let id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("silt_pool_test_{}_{id}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    f(dir.clone());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn pages_survive_pool_restart() {
    with_temp_dir(|dir| {
        let path = dir.join("data.db");
        let mut ids = Vec::new();

        {
            let disk = Arc::new(FileDiskManager::new(&path).unwrap());
            let pool = BufferPoolManager::new(2, disk, None);

            // Four pages through a two-frame pool: two leave via eviction
            // write-back, two via the explicit flush.
            for i in 0..4u8 {
                let (pid, mut guard) = pool.new_page().unwrap();
                guard.data_mut()[0] = i;
                guard.data_mut()[PAGE_SIZE - 1] = 0xEE;
                ids.push(pid);
            }
            pool.flush_all_pages().unwrap();
        }

        let disk = Arc::new(FileDiskManager::new(&path).unwrap());
        let pool = BufferPoolManager::new(2, disk, None);
        for (i, &pid) in ids.iter().enumerate() {
            let guard = pool.fetch_page(pid).unwrap();
            assert_eq!(guard.data()[0], i as u8);
            assert_eq!(guard.data()[PAGE_SIZE - 1], 0xEE);
        }
    });
}
