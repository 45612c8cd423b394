use std::io::Cursor;

use bit_vec::BitVec;

use crate::{
    error::{ErrorKind, SmallError},
    heap::{BufferPool, HeapPageID},
    io::{Encodeable, SmallWriter},
    storage::{RecordId, Schema, Tuple},
    transaction::TransactionID,
    types::SmallResult,
};

/// A fixed-size page of a heap table.
///
/// The on-disk image is a slot bitmap header followed by fixed-width
/// tuple slots. In memory the page additionally carries the identity
/// of the transaction that dirtied it (if any) and a byte snapshot
/// of its last known-clean state, which becomes the "undo" half of
/// the UPDATE log record when the page is flushed.
pub struct HeapPage {
    pid: HeapPageID,
    schema: Schema,

    header: BitVec,
    tuples: Vec<Option<Tuple>>,

    /// `None` means the in-memory image matches the disk image. A
    /// dirty page is always dirty on behalf of a specific
    /// transaction, never "dirty by nobody".
    dirty_by: Option<TransactionID>,

    before_image: Vec<u8>,
}

impl HeapPage {
    pub fn new(pid: &HeapPageID, bytes: &[u8], schema: &Schema) -> Self {
        let slots_count = Self::calculate_slots_count(schema);
        let header_size = Self::header_size(slots_count);
        let tuple_size = schema.get_tuple_size();

        let header = BitVec::from_bytes(&bytes[..header_size]);

        let mut tuples: Vec<Option<Tuple>> = Vec::with_capacity(slots_count);
        for i in 0..slots_count {
            if header.get(i).unwrap_or(false) {
                let start = header_size + i * tuple_size;
                let mut reader = Cursor::new(&bytes[start..start + tuple_size]);
                let mut tuple = Tuple::read_from(&mut reader, schema);
                tuple.set_rid(RecordId::new(*pid, i));
                tuples.push(Some(tuple));
            } else {
                tuples.push(None);
            }
        }

        Self {
            pid: *pid,
            schema: schema.clone(),
            header,
            tuples,
            dirty_by: None,
            before_image: bytes.to_vec(),
        }
    }

    pub fn empty_page_data() -> Vec<u8> {
        vec![0; BufferPool::get_page_size()]
    }

    /// The number of tuple slots a page can hold: each tuple costs
    /// its own bytes plus one header bit.
    pub fn calculate_slots_count(schema: &Schema) -> usize {
        let bits_per_tuple = schema.get_tuple_size() * 8 + 1;
        BufferPool::get_page_size() * 8 / bits_per_tuple
    }

    fn header_size(slots_count: usize) -> usize {
        (slots_count + 7) / 8
    }

    pub fn get_pid(&self) -> HeapPageID {
        self.pid
    }

    pub fn slots_count(&self) -> usize {
        self.tuples.len()
    }

    pub fn empty_slots_count(&self) -> usize {
        (0..self.slots_count())
            .filter(|&i| !self.header.get(i).unwrap_or(false))
            .count()
    }

    pub fn tuples(&self) -> impl Iterator<Item = &Tuple> {
        self.tuples.iter().filter_map(|t| t.as_ref())
    }

    /// Place the tuple into the first empty slot and stamp its
    /// record id (on the caller's copy as well).
    pub fn insert_tuple(&mut self, tuple: &mut Tuple) -> SmallResult {
        for i in 0..self.slots_count() {
            if !self.header.get(i).unwrap_or(false) {
                let rid = RecordId::new(self.pid, i);
                tuple.set_rid(rid);

                self.header.set(i, true);
                self.tuples[i] = Some(tuple.clone());
                return Ok(());
            }
        }

        Err(SmallError::new(
            ErrorKind::InvariantViolation,
            &format!("no empty slot on {}", self.pid),
        ))
    }

    pub fn delete_tuple(&mut self, rid: &RecordId) -> SmallResult {
        if rid.pid != self.pid {
            return Err(SmallError::new(
                ErrorKind::InvariantViolation,
                &format!("record {:?} does not belong to {}", rid, self.pid),
            ));
        }

        if rid.slot >= self.slots_count() || !self.header.get(rid.slot).unwrap_or(false) {
            return Err(SmallError::new(
                ErrorKind::InvariantViolation,
                &format!("slot {} of {} holds no tuple", rid.slot, self.pid),
            ));
        }

        self.header.set(rid.slot, false);
        self.tuples[rid.slot] = None;
        Ok(())
    }

    pub fn get_page_data(&self) -> Vec<u8> {
        let tuple_size = self.schema.get_tuple_size();

        let mut writer = SmallWriter::new();
        writer.write_bytes(&self.header.to_bytes());
        for tuple in &self.tuples {
            match tuple {
                Some(t) => writer.write_bytes(&t.to_bytes()),
                None => writer.write_bytes(&vec![0; tuple_size]),
            }
        }

        writer.to_padded_bytes(BufferPool::get_page_size())
    }

    pub fn set_dirty(&mut self, tid: TransactionID) {
        self.dirty_by = Some(tid);
    }

    pub fn set_clean(&mut self) {
        self.dirty_by = None;
    }

    /// The transaction that dirtied the page, or `None` for a clean
    /// page.
    pub fn dirtier(&self) -> Option<TransactionID> {
        self.dirty_by
    }

    pub fn get_before_image(&self) -> Vec<u8> {
        self.before_image.clone()
    }

    /// Refresh the undo snapshot. Only meaningful when the page has
    /// just been loaded or flushed, i.e. when memory and disk agree.
    pub fn set_before_image(&mut self) {
        self.before_image = self.get_page_data();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_page(columns: usize) -> (Schema, HeapPage) {
        let schema = Schema::small_int_schema(columns);
        let pid = HeapPageID::new(1, 0);
        let page = HeapPage::new(&pid, &HeapPage::empty_page_data(), &schema);
        (schema, page)
    }

    #[test]
    fn test_slots_count() {
        let schema = Schema::small_int_schema(2);

        // 16 bytes per tuple, one header bit per slot:
        // floor(4096 * 8 / 129) = 254
        assert_eq!(HeapPage::calculate_slots_count(&schema), 254);
    }

    #[test]
    fn test_insert_and_delete() {
        let (_, mut page) = int_page(2);
        let slots = page.slots_count();
        assert_eq!(page.empty_slots_count(), slots);

        let mut tuple = Tuple::new_int_tuples(42, 2);
        page.insert_tuple(&mut tuple).unwrap();

        let rid = tuple.get_rid().unwrap();
        assert_eq!(rid.slot, 0);
        assert_eq!(page.empty_slots_count(), slots - 1);
        assert_eq!(page.tuples().count(), 1);

        page.delete_tuple(&rid).unwrap();
        assert_eq!(page.empty_slots_count(), slots);

        // deleting an empty slot is a caller error
        assert!(page.delete_tuple(&rid).is_err());
    }

    #[test]
    fn test_serialize_round_trip() {
        let (schema, mut page) = int_page(3);

        for v in 0..10 {
            let mut tuple = Tuple::new_int_tuples(v, 3);
            page.insert_tuple(&mut tuple).unwrap();
        }

        let data = page.get_page_data();
        assert_eq!(data.len(), BufferPool::get_page_size());

        let reparsed = HeapPage::new(&page.get_pid(), &data, &schema);
        assert_eq!(reparsed.tuples().count(), 10);
        for (a, b) in page.tuples().zip(reparsed.tuples()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_fresh_page_is_clean() {
        let (_, mut page) = int_page(1);
        assert_eq!(page.dirtier(), None);

        page.set_dirty(7);
        assert_eq!(page.dirtier(), Some(7));

        page.set_clean();
        assert_eq!(page.dirtier(), None);
    }
}
