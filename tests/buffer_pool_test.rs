mod test_utils;

use std::sync::atomic::Ordering;

use small_heap::{
    utils::HandyRwLock, BufferPool, Cell, Database, ErrorKind, HeapPageID, Permission, Transaction,
};

use crate::test_utils::{new_random_heap_table, search_key, setup};

/// Scanning a cached table must not touch the disk again.
#[test]
fn test_cache() {
    let _guard = setup();

    BufferPool::set_page_size(1024);
    let table_rc = new_random_heap_table("pool_cache.db", 2, 100, None);
    let table = table_rc.rl();

    let reads_after_build = table.read_count.load(Ordering::Relaxed);

    let tx = Transaction::new();
    let count_1 = table.tuples_count(&tx).unwrap();
    let reads_after_scan = table.read_count.load(Ordering::Relaxed);

    // every page stayed resident since the table was built
    assert_eq!(count_1, 100);
    assert_eq!(reads_after_scan, reads_after_build);

    let count_2 = table.tuples_count(&tx).unwrap();
    assert_eq!(count_2, 100);
    assert_eq!(table.read_count.load(Ordering::Relaxed), reads_after_scan);

    tx.commit().unwrap();
}

/// With every slot dirtied by a live transaction the pool must
/// refuse to evict; after that transaction commits the same request
/// goes through.
#[test]
fn test_no_steal_eviction() {
    let _guard = setup();

    // 3 pages of 63 slots each
    BufferPool::set_page_size(1024);
    let table_rc = new_random_heap_table("pool_no_steal.db", 2, 150, None);
    let table = table_rc.rl();
    let table_id = table.get_id();

    // pick one victim tuple on page 0 and one on page 1
    let collect_tx = Transaction::new();
    let tuples = table.scan(&collect_tx).unwrap();
    let on_page = |index: u32| {
        tuples
            .iter()
            .find(|t| t.get_rid().unwrap().pid.page_index == index)
            .unwrap()
            .clone()
    };
    let victim_0 = on_page(0);
    let victim_1 = on_page(1);
    collect_tx.commit().unwrap();

    Database::mut_buffer_pool().set_capacity(2);

    // dirty both slots
    let tx_1 = Transaction::new();
    BufferPool::delete_tuple(&tx_1, &victim_0).unwrap();
    BufferPool::delete_tuple(&tx_1, &victim_1).unwrap();

    // a third page cannot come in: nothing is evictable
    let tx_2 = Transaction::new();
    let pid_2 = HeapPageID::new(table_id, 2);
    let err = BufferPool::get_page(&tx_2, Permission::ReadOnly, &pid_2)
        .err()
        .expect("the buffer is pinned full");
    assert_eq!(err.kind(), ErrorKind::NoEvictablePage);

    // commit flushes both pages clean, the retry succeeds
    tx_1.commit().unwrap();
    BufferPool::get_page(&tx_2, Permission::ReadOnly, &pid_2).unwrap();
    tx_2.commit().unwrap();
}

/// Loading a clean page, evicting it and loading it again yields
/// identical bytes.
#[test]
fn test_eviction_idempotence() {
    let _guard = setup();

    let table_rc = new_random_heap_table("pool_evict_reload.db", 2, 10, None);
    let pid = HeapPageID::new(table_rc.rl().get_id(), 0);

    let tx_1 = Transaction::new();
    let before = BufferPool::get_page(&tx_1, Permission::ReadOnly, &pid)
        .unwrap()
        .rl()
        .get_page_data();
    tx_1.commit().unwrap();

    Database::mut_buffer_pool().discard_page(&pid);
    assert!(!Database::buffer_pool().contains(&pid));

    let tx_2 = Transaction::new();
    let after = BufferPool::get_page(&tx_2, Permission::ReadOnly, &pid)
        .unwrap()
        .rl()
        .get_page_data();
    tx_2.commit().unwrap();

    assert_eq!(before, after);
}

/// `discard_page` drops in-memory changes without touching latches,
/// the way a recovery pass discards a rolled back page.
#[test]
fn test_discard_page_restores_disk_state() {
    let _guard = setup();

    let mut cells = Vec::new();
    let table_rc = new_random_heap_table("pool_discard.db", 2, 10, Some(&mut cells));
    let table = table_rc.rl();

    let tx = Transaction::new();
    let victim = table.scan(&tx).unwrap()[0].clone();
    BufferPool::delete_tuple(&tx, &victim).unwrap();
    assert_eq!(search_key(&table, &tx, &Cell::Int64(cells[0])), 0);

    // drop the dirty page behind the transaction's back
    let pid = victim.get_rid().unwrap().pid;
    Database::mut_buffer_pool().discard_page(&pid);

    // the next read goes back to disk and sees the tuple again
    assert_eq!(search_key(&table, &tx, &Cell::Int64(cells[0])), 1);
    assert!(BufferPool::holds_lock(&tx, &pid));

    tx.commit().unwrap();
}

/// A page id is resident in at most one slot, whichever path loaded
/// it.
#[test]
fn test_page_resident_once() {
    let _guard = setup();

    let table_rc = new_random_heap_table("pool_resident.db", 2, 10, None);
    let pid = HeapPageID::new(table_rc.rl().get_id(), 0);

    let tx_1 = Transaction::new();
    let tx_2 = Transaction::new();
    let page_1 = BufferPool::get_page(&tx_1, Permission::ReadOnly, &pid).unwrap();
    let page_2 = BufferPool::get_page(&tx_2, Permission::ReadOnly, &pid).unwrap();
    assert!(std::sync::Arc::ptr_eq(&page_1, &page_2));

    tx_1.commit().unwrap();
    tx_2.commit().unwrap();
}
