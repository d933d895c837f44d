extern crate alloc;
use alloc::vec::Vec;

use thiserror_no_std::Error;

use super::BlobStorage;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryStorageError {
    #[error("write rejected")]
    WriteRejected,
}

/// RAM-backed record, lost on restart
///
/// A write can be made to fail once to exercise the error paths.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    record: Option<Vec<u8>>,
    fail_next_write: bool,
}

impl MemoryStorage {
    pub const fn new() -> Self {
        Self {
            record: None,
            fail_next_write: false,
        }
    }

    pub fn with_record(bytes: &[u8]) -> Self {
        Self {
            record: Some(bytes.to_vec()),
            fail_next_write: false,
        }
    }

    /// Make the next [`BlobStorage::replace`] fail without touching the record
    pub fn fail_next_write(&mut self) {
        self.fail_next_write = true;
    }

    pub fn record(&self) -> Option<&[u8]> {
        self.record.as_deref()
    }
}

impl BlobStorage for MemoryStorage {
    type Error = MemoryStorageError;

    fn stored_len(&mut self) -> Result<Option<usize>, Self::Error> {
        Ok(self.record.as_ref().map(Vec::len))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let Some(record) = self.record.as_ref() else {
            return Ok(0);
        };
        let len = record.len().min(buf.len());
        buf[..len].copy_from_slice(&record[..len]);
        Ok(len)
    }

    fn replace(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        if core::mem::take(&mut self.fail_next_write) {
            return Err(MemoryStorageError::WriteRejected);
        }
        self.record = Some(data.to_vec());
        Ok(())
    }

    fn format(&mut self) -> Result<(), Self::Error> {
        self.record = None;
        Ok(())
    }
}
