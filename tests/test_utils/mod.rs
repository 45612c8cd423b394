#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use once_cell::sync::Lazy;
use rand::prelude::*;
use small_heap::{
    heap::DEFAULT_PAGE_SIZE, types::Pod, utils, utils::HandyRwLock, BufferPool, Cell,
    ConcurrentStatus, Database, HeapTable, Schema, Transaction, Tuple,
};

// The engine state is process-wide, so tests take turns.
static TEST_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Conduct the initialization:
///
/// - Serialize the test on the global test lock.
/// - Set up log output.
/// - Restore the default page size and latch timeout.
/// - Swap in a fresh database instance.
pub fn setup() -> MutexGuard<'static, ()> {
    let guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    utils::init_log();
    BufferPool::set_page_size(DEFAULT_PAGE_SIZE);
    ConcurrentStatus::set_timeout(5);
    Database::reset();

    guard
}

/// Create an empty table backed by `file_name` and register it in
/// the catalog. A stale file from an earlier run is removed first.
pub fn new_empty_heap_table(file_name: &str, columns: usize) -> Pod<HeapTable> {
    let path = Database::global().get_path().join(file_name);
    if path.exists() {
        std::fs::remove_file(&path).unwrap();
    }

    let schema = Schema::small_int_schema(columns);
    let table = HeapTable::new(file_name, &schema).unwrap();
    let table_rc = Arc::new(RwLock::new(table));
    Database::mut_catalog().add_table(Arc::clone(&table_rc));

    table_rc
}

/// Create a table and fill it with `rows` random rows, committed.
/// The inserted values are returned through `cells` when given.
pub fn new_random_heap_table(
    file_name: &str,
    columns: usize,
    rows: usize,
    cells: Option<&mut Vec<i64>>,
) -> Pod<HeapTable> {
    let table_rc = new_empty_heap_table(file_name, columns);

    let mut values: Vec<i64> = Vec::new();
    let mut rng = rand::thread_rng();
    for _ in 0..rows {
        values.push(rng.gen_range(i64::MIN, i64::MAX));
    }

    let tx = Transaction::new();
    let table_id = table_rc.rl().get_id();
    for v in &values {
        let mut tuple = Tuple::new_int_tuples(*v, columns);
        BufferPool::insert_tuple(&tx, table_id, &mut tuple).unwrap();
    }
    tx.commit().unwrap();

    if let Some(cells) = cells {
        *cells = values;
    }

    table_rc
}

pub fn insert_row(table: &HeapTable, tx: &Transaction, value: i64) {
    let mut tuple = Tuple::new_int_tuples(value, table.schema.fields.len());
    BufferPool::insert_tuple(tx, table.get_id(), &mut tuple).unwrap();
}

/// Count the rows whose first column equals `key`.
pub fn search_key(table: &HeapTable, tx: &Transaction, key: &Cell) -> usize {
    table
        .scan(tx)
        .unwrap()
        .iter()
        .filter(|tuple| &tuple.get_cell(0) == key)
        .count()
}
