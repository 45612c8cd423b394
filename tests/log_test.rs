mod test_utils;

use std::sync::atomic::Ordering;

use small_heap::{utils::HandyRwLock, BufferPool, Database, HeapPageID, Permission, Transaction};

use crate::test_utils::{insert_row, new_random_heap_table, setup};

/// The write-ahead contract, observed from the outside: while a
/// transaction runs, its dirty pages never reach the table file and
/// the log holds nothing but the START record; the page write
/// happens during commit, after the UPDATE record went out.
#[test]
fn test_wal_precedes_page_write() {
    let _guard = setup();

    let table_rc = new_random_heap_table("log_wal_order.db", 2, 5, None);
    let table = table_rc.rl();

    let records_before = Database::log_manager().records_count();
    let writes_before = table.write_count.load(Ordering::Relaxed);

    let tx = Transaction::new();
    insert_row(&table, &tx, 99);

    // NO-STEAL: nothing was written back yet, and no UPDATE record
    // exists (only the START of this transaction)
    assert_eq!(table.write_count.load(Ordering::Relaxed), writes_before);
    assert_eq!(Database::log_manager().records_count(), records_before + 1);

    tx.commit().unwrap();

    // commit appended UPDATE + COMMIT and wrote the page through
    assert_eq!(
        Database::log_manager().records_count(),
        records_before + 3
    );
    assert_eq!(table.write_count.load(Ordering::Relaxed), writes_before + 1);

    Database::mut_log_manager().show_log_contents().unwrap();
}

/// Committing refreshes the undo snapshot: afterwards the page data
/// and its before-image agree.
#[test]
fn test_commit_refreshes_before_image() {
    let _guard = setup();

    let table_rc = new_random_heap_table("log_before_image.db", 2, 5, None);
    let table = table_rc.rl();

    let tx = Transaction::new();
    insert_row(&table, &tx, 4711);

    let pid = HeapPageID::new(table.get_id(), 0);
    {
        let page_rc = BufferPool::get_page(&tx, Permission::ReadOnly, &pid).unwrap();
        let page = page_rc.rl();
        // dirty page: the snapshot still shows the old state
        assert_ne!(page.get_page_data(), page.get_before_image());
    }

    tx.commit().unwrap();

    let check_tx = Transaction::new();
    let page_rc = BufferPool::get_page(&check_tx, Permission::ReadOnly, &pid).unwrap();
    let page = page_rc.rl();
    assert_eq!(page.get_page_data(), page.get_before_image());
    drop(page);
    check_tx.commit().unwrap();
}

/// `flush_all_pages` pushes a dirty page out mid-transaction with
/// its own UPDATE record, so the later commit has nothing left to
/// flush for that page. Record sequence: START, UPDATE (flush),
/// UPDATE (commit of the second insert), COMMIT.
#[test]
fn test_flush_all_pages() {
    let _guard = setup();

    let table_rc = new_random_heap_table("log_flush_all.db", 2, 5, None);
    let table = table_rc.rl();

    let records_before = Database::log_manager().records_count();
    let writes_before = table.write_count.load(Ordering::Relaxed);

    let tx = Transaction::new();
    insert_row(&table, &tx, 1);

    Database::mut_buffer_pool()
        .flush_all_pages(&mut Database::mut_log_manager())
        .unwrap();
    assert_eq!(
        Database::log_manager().records_count(),
        records_before + 2
    );
    assert_eq!(table.write_count.load(Ordering::Relaxed), writes_before + 1);

    insert_row(&table, &tx, 2);
    tx.commit().unwrap();

    assert_eq!(
        Database::log_manager().records_count(),
        records_before + 4
    );
    assert_eq!(table.write_count.load(Ordering::Relaxed), writes_before + 2);
}

/// `flush_page` pushes a single dirty page out without touching its
/// latch; the later commit finds the page clean.
#[test]
fn test_flush_page() {
    let _guard = setup();

    let table_rc = new_random_heap_table("log_flush_page.db", 2, 5, None);
    let table = table_rc.rl();

    let records_before = Database::log_manager().records_count();
    let writes_before = table.write_count.load(Ordering::Relaxed);

    let tx = Transaction::new();
    insert_row(&table, &tx, 8);

    let pid = HeapPageID::new(table.get_id(), 0);
    Database::mut_buffer_pool()
        .flush_page(&pid, &mut Database::mut_log_manager())
        .unwrap();

    assert_eq!(
        Database::log_manager().records_count(),
        records_before + 2
    );
    assert_eq!(table.write_count.load(Ordering::Relaxed), writes_before + 1);
    assert!(BufferPool::holds_lock(&tx, &pid));

    // nothing dirty remains, commit adds only its own record
    tx.commit().unwrap();
    assert_eq!(
        Database::log_manager().records_count(),
        records_before + 3
    );
    assert_eq!(table.write_count.load(Ordering::Relaxed), writes_before + 1);
}

/// Aborting appends an ABORT record and nothing else.
#[test]
fn test_abort_record() {
    let _guard = setup();

    let table_rc = new_random_heap_table("log_abort.db", 2, 5, None);
    let table = table_rc.rl();

    let records_before = Database::log_manager().records_count();

    let tx = Transaction::new();
    insert_row(&table, &tx, 13);
    tx.abort().unwrap();

    // START + ABORT, no UPDATE for the discarded page
    assert_eq!(
        Database::log_manager().records_count(),
        records_before + 2
    );
}
