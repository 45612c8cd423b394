use std::{
    convert::TryInto,
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    mem::size_of,
    path::Path,
    sync::{Mutex, MutexGuard},
};

use crate::{error::SmallError, types::SmallResult};

pub trait Encodeable {
    fn to_bytes(&self) -> Vec<u8>;
}

pub trait Decodeable {
    fn read_from<R: std::io::Read>(reader: &mut R) -> Self;
}

pub fn read_into<T: Decodeable, R: std::io::Read>(reader: &mut R) -> T {
    T::read_from(reader)
}

pub fn read_exact<R: std::io::Read>(reader: &mut R, bytes_count: usize) -> Vec<u8> {
    let mut buffer = vec![0u8; bytes_count];
    reader
        .read_exact(&mut buffer)
        .unwrap_or_else(|e| panic!("io error, expect {} bytes: {}", bytes_count, e));
    buffer
}

macro_rules! impl_serialization {
    (for $($t:ty),+) => {
        $(
            impl Encodeable for $t {
                fn to_bytes(&self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }
            }

            impl Decodeable for $t {
                fn read_from<R: std::io::Read>(reader: &mut R) -> Self {
                    let bytes = read_exact(reader, size_of::<Self>());
                    Self::from_le_bytes(bytes.try_into().unwrap())
                }
            }
        )*
    }
}

impl_serialization!(for u8, u16, u32, u64, i8, i16, i32, i64, usize);

/// An in-memory byte sink used to assemble page images and log
/// records before they hit a file.
pub struct SmallWriter {
    buf: Vec<u8>,
}

impl SmallWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn write<T: Encodeable>(&mut self, obj: &T) {
        self.buf.extend_from_slice(obj.to_bytes().as_slice());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.buf.clone()
    }

    pub fn to_padded_bytes(&self, size: usize) -> Vec<u8> {
        let mut buf = self.buf.clone();

        if buf.len() > size {
            panic!(
                "buffer size is larger than the given size: {} > {}",
                buf.len(),
                size
            );
        }

        buf.resize(size, 0);
        buf
    }
}

/// A long-lived file handle guarded by a mutex, used for the log
/// file. Table files are opened per call instead (see `HeapTable`).
pub struct SmallFile {
    file: Mutex<File>,
}

impl SmallFile {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Result<Self, SmallError> {
        let file = OpenOptions::new()
            .write(true)
            .read(true)
            .create(true)
            .open(file_path)?;

        Ok(Self {
            file: Mutex::new(file),
        })
    }

    pub fn get_file(&self) -> MutexGuard<'_, File> {
        self.file.lock().unwrap()
    }

    pub fn write<T: Encodeable>(&self, obj: &T) -> SmallResult {
        self.write_bytes(&obj.to_bytes())
    }

    pub fn write_bytes(&self, bytes: &[u8]) -> SmallResult {
        self.get_file().write_all(bytes)?;
        Ok(())
    }

    pub fn read<T: Decodeable>(&self) -> T {
        T::read_from(&mut *self.get_file())
    }

    pub fn read_bytes(&self, bytes_count: usize) -> Result<Vec<u8>, SmallError> {
        let mut buf = vec![0u8; bytes_count];
        self.get_file().read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn get_size(&self) -> Result<u64, SmallError> {
        let metadata = self.get_file().metadata()?;
        Ok(metadata.len())
    }

    pub fn get_current_position(&self) -> Result<u64, SmallError> {
        let offset = self.get_file().seek(SeekFrom::Current(0))?;
        Ok(offset)
    }

    pub fn seek(&self, offset: u64) -> Result<u64, SmallError> {
        let pos = self.get_file().seek(SeekFrom::Start(offset))?;
        Ok(pos)
    }

    pub fn set_len(&self, len: u64) -> SmallResult {
        self.get_file().set_len(len)?;
        Ok(())
    }

    pub fn flush(&self) -> SmallResult {
        self.get_file().flush()?;
        Ok(())
    }

    /// Flush and fsync. The log "force" of the write-ahead protocol.
    pub fn sync(&self) -> SmallResult {
        let file = self.get_file();
        file.sync_data()?;
        Ok(())
    }
}
