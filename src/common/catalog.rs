use std::collections::HashMap;

use crate::{heap::HeapTable, types::Pod, utils::HandyRwLock};

type TableID = u32;
type TableRC = Pod<HeapTable>;

/// The directory of tables, keyed by table id. The buffer pool goes
/// through it to find the file backing a page id.
pub struct Catalog {
    tables: HashMap<TableID, TableRC>,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }

    pub fn add_table(&mut self, table: TableRC) {
        let table_id = table.rl().get_id();
        self.tables.insert(table_id, table);
    }

    pub fn get_table(&self, table_id: &TableID) -> Option<TableRC> {
        self.tables.get(table_id).cloned()
    }

    pub fn search_table(&self, name: &str) -> Option<TableRC> {
        self.tables
            .values()
            .find(|table| table.rl().get_name() == name)
            .cloned()
    }

    pub fn tables_count(&self) -> usize {
        self.tables.len()
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }
}
