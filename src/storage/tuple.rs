use std::fmt;

use crate::{
    heap::HeapPageID,
    io::{Decodeable, Encodeable},
    storage::schema::{Schema, Type},
};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Cell {
    Int64(i64),
}

impl Encodeable for Cell {
    fn to_bytes(&self) -> Vec<u8> {
        match self {
            Cell::Int64(v) => v.to_le_bytes().to_vec(),
        }
    }
}

/// The physical address of a tuple: the page it lives in plus its
/// slot inside that page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub pid: HeapPageID,
    pub slot: usize,
}

impl RecordId {
    pub fn new(pid: HeapPageID, slot: usize) -> Self {
        Self { pid, slot }
    }
}

#[derive(Clone)]
pub struct Tuple {
    cells: Vec<Cell>,

    /// Set once the tuple has been placed on a page.
    rid: Option<RecordId>,
}

// constructors
impl Tuple {
    pub fn new_from_cells(cells: &[Cell]) -> Self {
        Self {
            cells: cells.to_vec(),
            rid: None,
        }
    }

    pub fn new_int_tuples(value: i64, width: usize) -> Self {
        let cells = vec![Cell::Int64(value); width];
        Self { cells, rid: None }
    }

    pub fn read_from<R: std::io::Read>(reader: &mut R, schema: &Schema) -> Self {
        let mut cells: Vec<Cell> = Vec::new();
        for field in &schema.fields {
            match field.t {
                Type::Int64 => {
                    cells.push(Cell::Int64(i64::read_from(reader)));
                }
            }
        }

        Self { cells, rid: None }
    }
}

impl Tuple {
    pub fn get_cell(&self, i: usize) -> Cell {
        self.cells[i].clone()
    }

    pub fn get_cells(&self) -> Vec<Cell> {
        self.cells.clone()
    }

    pub fn get_rid(&self) -> Option<RecordId> {
        self.rid
    }

    pub(crate) fn set_rid(&mut self, rid: RecordId) {
        self.rid = Some(rid);
    }
}

impl Encodeable for Tuple {
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        for cell in &self.cells {
            bytes.extend_from_slice(&cell.to_bytes());
        }
        bytes
    }
}

// The record id is an address, not a value, so it doesn't take part
// in equality.
impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.cells == other.cells
    }
}

impl Eq for Tuple {}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut content: String = "{".to_owned();
        for (i, cell) in self.cells.iter().enumerate() {
            if i > 0 {
                content.push_str(", ");
            }
            content.push_str(&format!("{:?}", cell));
        }
        content.push('}');
        write!(f, "{}", content)
    }
}

impl fmt::Debug for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}
