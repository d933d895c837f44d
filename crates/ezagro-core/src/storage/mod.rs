//! Persistence of the device identity record
//!
//! The record lives behind [`BlobStorage`], a minimal single-record backend
//! implemented by a [`DoubleBuffered`] pair of files on the device's SD card, a
//! directory on the simulator host and RAM in tests. [`ConfigStore`] layers the size ceiling, the record
//! format and the error taxonomy on top of it.

pub mod config_store;
#[cfg(test)]
pub mod memory;
pub mod slots;

pub use config_store::ConfigStore;
#[cfg(test)]
pub use memory::{MemoryStorage, MemoryStorageError};
pub use slots::{DoubleBuffered, Slot, SlotFiles};

/// Backend holding a single opaque record
///
/// Implementations must replace the record only once the new contents are
/// fully written: a failed [`BlobStorage::replace`] leaves the previous record
/// readable.
pub trait BlobStorage {
    type Error: core::fmt::Debug;

    /// Size of the stored record in bytes, `None` when nothing is stored.
    fn stored_len(&mut self) -> Result<Option<usize>, Self::Error>;

    /// Read the record into `buf`, returning the number of bytes read.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Replace the record with `data`.
    fn replace(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Remove every piece of persisted state owned by this backend.
    fn format(&mut self) -> Result<(), Self::Error>;
}
