use std::fmt;

use crate::io::{Decodeable, Encodeable};

/// The identity of a page: the table it belongs to plus its position
/// in the table file. Note that the identity says nothing about
/// which buffer slot (if any) currently caches the page.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapPageID {
    pub table_id: u32,
    pub page_index: u32,
}

impl HeapPageID {
    pub fn new(table_id: u32, page_index: u32) -> Self {
        Self {
            table_id,
            page_index,
        }
    }

    pub fn get_table_id(&self) -> u32 {
        self.table_id
    }

    pub fn get_short_repr(&self) -> String {
        format!("page_{}_{}", self.table_id, self.page_index)
    }
}

impl Encodeable for HeapPageID {
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.table_id.to_le_bytes());
        bytes.extend_from_slice(&self.page_index.to_le_bytes());
        bytes
    }
}

impl Decodeable for HeapPageID {
    fn read_from<R: std::io::Read>(reader: &mut R) -> Self {
        let table_id = u32::read_from(reader);
        let page_index = u32::read_from(reader);
        Self {
            table_id,
            page_index,
        }
    }
}

impl fmt::Display for HeapPageID {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.get_short_repr())
    }
}

impl fmt::Debug for HeapPageID {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}
