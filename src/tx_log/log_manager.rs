use std::{collections::HashMap, path::Path};

use log::debug;

use crate::{
    error::SmallError,
    heap::{BufferPool, HeapPageID},
    io::{Decodeable, Encodeable, SmallFile},
    transaction::{Transaction, TransactionID},
    types::SmallResult,
};

#[derive(Debug, PartialEq, Clone, Copy)]
enum RecordType {
    Start,
    Update,
    Commit,
    Abort,
}

impl RecordType {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RecordType::Start,
            1 => RecordType::Update,
            2 => RecordType::Commit,
            3 => RecordType::Abort,
            _ => panic!("invalid record type: {}", value),
        }
    }
}

impl Encodeable for RecordType {
    fn to_bytes(&self) -> Vec<u8> {
        vec![*self as u8]
    }
}

impl Decodeable for RecordType {
    fn read_from<R: std::io::Read>(reader: &mut R) -> Self {
        RecordType::from_u8(u8::read_from(reader))
    }
}

/// The write-ahead log.
///
/// An UPDATE record carries the before/after images of one page and
/// must be appended and forced before the page itself is written;
/// the buffer pool is responsible for that ordering. Replaying or
/// checkpointing the log is out of scope here, the records exist so
/// a recovery pass has something to work with.
pub struct LogManager {
    file: SmallFile,

    /// The byte position right after the last complete record.
    current_offset: u64,

    total_records: usize,

    /// Record the start position of each live transaction.
    tx_start_position: HashMap<TransactionID, u64>,
}

impl LogManager {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Result<Self, SmallError> {
        Ok(Self {
            file: SmallFile::new(file_path)?,
            current_offset: 0,
            total_records: 0,
            tx_start_position: HashMap::new(),
        })
    }

    /// Truncate the log and forget all in-memory positions. For
    /// tests mostly.
    pub fn reset(&mut self) -> SmallResult {
        self.file.set_len(0)?;
        self.file.seek(0)?;
        self.current_offset = 0;
        self.total_records = 0;
        self.tx_start_position.clear();
        Ok(())
    }

    pub fn records_count(&self) -> usize {
        self.total_records
    }

    fn record_appended(&mut self) -> SmallResult {
        self.current_offset = self.file.get_current_position()?;
        self.total_records += 1;
        Ok(())
    }

    pub fn log_start(&mut self, tx: &Transaction) -> SmallResult {
        self.file.write(&RecordType::Start)?;
        self.file.write(&tx.get_id())?;
        self.file.write(&self.current_offset)?;

        self.tx_start_position.insert(tx.get_id(), self.current_offset);
        self.record_appended()
    }

    /// Append an UPDATE record with the undo/redo images of a single
    /// page, tagged with the transaction that dirtied it.
    pub fn log_update(
        &mut self,
        tid: TransactionID,
        pid: &HeapPageID,
        before_image: &[u8],
        after_image: &[u8],
    ) -> SmallResult {
        self.file.write(&RecordType::Update)?;
        self.file.write(&tid)?;
        self.file.write(pid)?;
        self.file.write_bytes(before_image)?;
        self.file.write_bytes(after_image)?;
        self.file.write(&self.current_offset)?;

        self.record_appended()
    }

    pub fn log_commit(&mut self, tx: &Transaction) -> SmallResult {
        self.file.write(&RecordType::Commit)?;
        self.file.write(&tx.get_id())?;
        self.file.write(&self.current_offset)?;

        self.tx_start_position.remove(&tx.get_id());
        self.record_appended()
    }

    pub fn log_abort(&mut self, tx: &Transaction) -> SmallResult {
        self.file.write(&RecordType::Abort)?;
        self.file.write(&tx.get_id())?;
        self.file.write(&self.current_offset)?;

        self.tx_start_position.remove(&tx.get_id());
        self.record_appended()
    }

    /// Flush and fsync the log file. Once this returns, every
    /// appended record is durable.
    pub fn force(&self) -> SmallResult {
        self.file.flush()?;
        self.file.sync()
    }

    /// Dump the log to the debug log, one line per record.
    pub fn show_log_contents(&mut self) -> SmallResult {
        let end = self.current_offset;
        let page_size = BufferPool::get_page_size();

        self.file.seek(0)?;
        let mut pos = 0u64;
        while pos < end {
            let record_type = self.file.read::<RecordType>();
            let tid = self.file.read::<TransactionID>();

            match record_type {
                RecordType::Update => {
                    let pid = self.file.read::<HeapPageID>();
                    let before = self.file.read_bytes(page_size)?;
                    let after = self.file.read_bytes(page_size)?;
                    let _prev_offset = self.file.read::<u64>();
                    debug!(
                        "[{:08x}] UPDATE tx_{} {}, before: {}.., after: {}..",
                        pos,
                        tid,
                        pid,
                        hex::encode(&before[..8]),
                        hex::encode(&after[..8]),
                    );
                }
                _ => {
                    let _prev_offset = self.file.read::<u64>();
                    debug!("[{:08x}] {:?} tx_{}", pos, record_type, tid);
                }
            }

            pos = self.file.get_current_position()?;
        }

        // leave the cursor where appends expect it
        self.file.seek(end)?;
        Ok(())
    }
}
