use std::{
    fs::OpenOptions,
    io::{Read, Seek, SeekFrom, Write},
    path::PathBuf,
    sync::atomic::{AtomicU32, AtomicUsize, Ordering},
};

use log::debug;

use crate::{
    error::{ErrorKind, SmallError},
    heap::{BufferPool, HeapPage, HeapPageID},
    storage::{Schema, Tuple},
    transaction::{Permission, Transaction},
    types::{Pod, SmallResult},
    utils::HandyRwLock,
    Database,
};

static NEXT_TABLE_ID: AtomicU32 = AtomicU32::new(1);

/// A table stored as an unordered sequence of pages in a single
/// file.
///
/// The table never talks to the disk around the buffer pool: tuple
/// operations fetch their pages through `BufferPool::get_page` with
/// the permission they need, and the pool calls back into
/// `read_page`/`write_page` for the raw i/o.
pub struct HeapTable {
    name: String,
    file_path: PathBuf,
    table_id: u32,
    pub schema: Schema,

    /// Probe counters for the on-disk file, exposed so tests can
    /// observe caching and write-ahead behavior.
    pub read_count: AtomicUsize,
    pub write_count: AtomicUsize,
}

impl HeapTable {
    /// Create a table backed by `file_name` under the database
    /// directory. The file is created when missing and never
    /// truncated.
    pub fn new(file_name: &str, schema: &Schema) -> Result<Self, SmallError> {
        let file_path = Database::global().get_path().join(file_name);
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&file_path)?;

        Ok(Self {
            name: file_name.to_string(),
            file_path,
            table_id: NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed),
            schema: schema.clone(),
            read_count: AtomicUsize::new(0),
            write_count: AtomicUsize::new(0),
        })
    }

    pub fn get_id(&self) -> u32 {
        self.table_id
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn num_pages(&self) -> Result<u32, SmallError> {
        let len = std::fs::metadata(&self.file_path)?.len();
        Ok((len as usize / BufferPool::get_page_size()) as u32)
    }

    /// Read one page image from disk. The file handle is scoped to
    /// the call and closed on every exit path.
    pub(crate) fn read_page(&self, page_index: u32) -> Result<Vec<u8>, SmallError> {
        if page_index >= self.num_pages()? {
            return Err(SmallError::new(
                ErrorKind::InvariantViolation,
                &format!(
                    "page {} is out of range for table {} ({} pages)",
                    page_index,
                    self.name,
                    self.num_pages()?
                ),
            ));
        }

        let page_size = BufferPool::get_page_size();
        let mut file = OpenOptions::new().read(true).open(&self.file_path)?;
        file.seek(SeekFrom::Start(page_index as u64 * page_size as u64))?;

        let mut buf = vec![0; page_size];
        file.read_exact(&mut buf)?;

        self.read_count.fetch_add(1, Ordering::Relaxed);
        Ok(buf)
    }

    /// Write one page image to disk. Only the buffer pool calls
    /// this, after the matching UPDATE record has been forced.
    pub(crate) fn write_page(&self, pid: &HeapPageID, data: &[u8]) -> SmallResult {
        let page_size = BufferPool::get_page_size();
        let mut file = OpenOptions::new().write(true).open(&self.file_path)?;
        file.seek(SeekFrom::Start(pid.page_index as u64 * page_size as u64))?;
        file.write_all(data)?;
        file.flush()?;

        self.write_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Extend the file with one zeroed page. This is a structural
    /// write, not a tuple write: an empty page carries no data, so
    /// it needs no log record and survives an abort harmlessly.
    fn append_empty_page(&self) -> Result<HeapPageID, SmallError> {
        let page_index = self.num_pages()?;
        let pid = HeapPageID::new(self.table_id, page_index);
        self.write_page(&pid, &HeapPage::empty_page_data())?;
        debug!("{} extended with {}", self.name, pid);
        Ok(pid)
    }

    /// Find a page with room and place the tuple there, appending a
    /// fresh page when the table is packed. Returns the pages the
    /// operation modified so the pool can mark them dirty.
    ///
    /// Pages are probed with read permission first; a full page we
    /// did not already latch is released right away so it stays
    /// evictable, instead of staying write-latched until the end of
    /// the transaction.
    pub(crate) fn insert_tuple(
        &self,
        tx: &Transaction,
        tuple: &mut Tuple,
    ) -> Result<Vec<Pod<HeapPage>>, SmallError> {
        if tuple.get_cells().len() != self.schema.fields.len() {
            return Err(SmallError::new(
                ErrorKind::InvariantViolation,
                &format!("tuple shape does not match the schema of {}", self.name),
            ));
        }

        loop {
            let page_count = self.num_pages()?;
            for page_index in 0..page_count {
                let pid = HeapPageID::new(self.table_id, page_index);

                let held_before = BufferPool::holds_lock(tx, &pid);
                let page_rc = BufferPool::get_page(tx, Permission::ReadOnly, &pid)?;
                let has_room = page_rc.rl().empty_slots_count() > 0;
                if !has_room {
                    if !held_before {
                        BufferPool::release_page(tx, &pid)?;
                    }
                    continue;
                }

                // Upgrade to write permission. The last slot may be
                // taken while we wait for the upgrade, hence the
                // re-check.
                let page_rc = BufferPool::get_page(tx, Permission::ReadWrite, &pid)?;
                let mut page = page_rc.wl();
                if page.empty_slots_count() > 0 {
                    page.insert_tuple(tuple)?;
                    drop(page);
                    return Ok(vec![page_rc]);
                }
            }

            // every page is packed, extend the file and try again
            let pid = self.append_empty_page()?;
            let page_rc = BufferPool::get_page(tx, Permission::ReadWrite, &pid)?;
            let mut page = page_rc.wl();
            if page.empty_slots_count() > 0 {
                page.insert_tuple(tuple)?;
                drop(page);
                return Ok(vec![page_rc]);
            }
        }
    }

    /// Remove the tuple from the page its record id names. Returns
    /// the modified page so the pool can mark it dirty.
    pub(crate) fn delete_tuple(
        &self,
        tx: &Transaction,
        tuple: &Tuple,
    ) -> Result<Pod<HeapPage>, SmallError> {
        let rid = tuple.get_rid().ok_or_else(|| {
            SmallError::new(ErrorKind::InvariantViolation, "tuple has no record id")
        })?;

        if rid.pid.table_id != self.table_id {
            return Err(SmallError::new(
                ErrorKind::InvariantViolation,
                &format!("record {:?} does not belong to table {}", rid, self.name),
            ));
        }

        let page_rc = BufferPool::get_page(tx, Permission::ReadWrite, &rid.pid)?;
        page_rc.wl().delete_tuple(&rid)?;
        Ok(page_rc)
    }

    /// All tuples of the table in page/slot order, read with shared
    /// latches held until the end of the transaction.
    pub fn scan(&self, tx: &Transaction) -> Result<Vec<Tuple>, SmallError> {
        let mut tuples = Vec::new();

        for page_index in 0..self.num_pages()? {
            let pid = HeapPageID::new(self.table_id, page_index);
            let page_rc = BufferPool::get_page(tx, Permission::ReadOnly, &pid)?;
            let page = page_rc.rl();
            tuples.extend(page.tuples().cloned());
        }

        Ok(tuples)
    }

    pub fn tuples_count(&self, tx: &Transaction) -> Result<usize, SmallError> {
        Ok(self.scan(tx)?.len())
    }
}
