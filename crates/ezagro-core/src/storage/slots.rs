//! Two-slot record storage for media without an atomic rename
//!
//! Each write goes to the slot that does not hold the newest record, so a
//! write that fails half way only damages the stale copy. A slot file is
//!
//! ```text
//! generation: u32 BE | length: u32 BE | record | fletcher16: u16 BE
//! ```
//!
//! and is only believed when the length and checksum both match.

use alloc::vec;
use alloc::vec::Vec;

use log::{debug, warn};

use super::BlobStorage;

const HEADER_LEN: usize = 8;
const TRAILER_LEN: usize = 2;

/// Slot files larger than this are treated as damaged.
pub const MAX_SLOT_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    pub const fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

/// Raw per-slot files, written with truncate semantics
pub trait SlotFiles {
    type Error: core::fmt::Debug;

    /// Length of the slot file, `None` if it does not exist.
    fn len(&mut self, slot: Slot) -> Result<Option<usize>, Self::Error>;

    fn read(&mut self, slot: Slot, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Create or truncate the slot file and write `data` into it.
    fn write(&mut self, slot: Slot, data: &[u8]) -> Result<(), Self::Error>;

    /// Delete the slot file, succeeding if it is already gone.
    fn remove(&mut self, slot: Slot) -> Result<(), Self::Error>;
}

struct Newest {
    slot: Slot,
    generation: u32,
    record: Vec<u8>,
}

/// [`BlobStorage`] over a pair of [`SlotFiles`]
pub struct DoubleBuffered<F> {
    files: F,
}

impl<F: SlotFiles> DoubleBuffered<F> {
    pub const fn new(files: F) -> Self {
        Self { files }
    }

    #[cfg(test)]
    pub(crate) fn files_mut(&mut self) -> &mut F {
        &mut self.files
    }

    fn load(&mut self, slot: Slot) -> Result<Option<(u32, Vec<u8>)>, F::Error> {
        let Some(len) = self.files.len(slot)? else {
            return Ok(None);
        };
        if len > MAX_SLOT_BYTES {
            warn!("Slot {:?} is {} bytes, ignoring it", slot, len);
            return Ok(None);
        }
        let mut raw = vec![0u8; len];
        let read = self.files.read(slot, &mut raw)?;
        raw.truncate(read);

        let decoded = decode(&raw);
        if decoded.is_none() {
            debug!("Slot {:?} holds no complete record", slot);
        }
        Ok(decoded)
    }

    fn newest(&mut self) -> Result<Option<Newest>, F::Error> {
        let a = self.load(Slot::A)?;
        let b = self.load(Slot::B)?;
        let newest = match (a, b) {
            (None, None) => None,
            (Some((generation, record)), None) => Some(Newest {
                slot: Slot::A,
                generation,
                record,
            }),
            (None, Some((generation, record))) => Some(Newest {
                slot: Slot::B,
                generation,
                record,
            }),
            (Some(a), Some(b)) => {
                if is_newer(b.0, a.0) {
                    Some(Newest {
                        slot: Slot::B,
                        generation: b.0,
                        record: b.1,
                    })
                } else {
                    Some(Newest {
                        slot: Slot::A,
                        generation: a.0,
                        record: a.1,
                    })
                }
            }
        };
        Ok(newest)
    }
}

impl<F: SlotFiles> BlobStorage for DoubleBuffered<F> {
    type Error = F::Error;

    fn stored_len(&mut self) -> Result<Option<usize>, Self::Error> {
        Ok(self.newest()?.map(|newest| newest.record.len()))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let Some(newest) = self.newest()? else {
            return Ok(0);
        };
        let n = newest.record.len().min(buf.len());
        buf[..n].copy_from_slice(&newest.record[..n]);
        Ok(n)
    }

    fn replace(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        let (slot, generation) = match self.newest()? {
            Some(newest) => (newest.slot.other(), newest.generation.wrapping_add(1)),
            None => (Slot::A, 1),
        };
        self.files.write(slot, &encode(generation, data))?;
        debug!("Wrote generation {} to slot {:?}", generation, slot);
        Ok(())
    }

    fn format(&mut self) -> Result<(), Self::Error> {
        self.files.remove(Slot::A)?;
        self.files.remove(Slot::B)
    }
}

/// Serial number comparison, so the generation counter may wrap.
fn is_newer(candidate: u32, current: u32) -> bool {
    (candidate.wrapping_sub(current) as i32) > 0
}

fn fletcher16(data: &[u8]) -> u16 {
    let (mut low, mut high) = (0u16, 0u16);
    for byte in data {
        low = (low + u16::from(*byte)) % 255;
        high = (high + low) % 255;
    }
    (high << 8) | low
}

fn encode(generation: u32, record: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + record.len() + TRAILER_LEN);
    out.extend_from_slice(&generation.to_be_bytes());
    out.extend_from_slice(&(record.len() as u32).to_be_bytes());
    out.extend_from_slice(record);
    let check = fletcher16(&out);
    out.extend_from_slice(&check.to_be_bytes());
    out
}

fn decode(raw: &[u8]) -> Option<(u32, Vec<u8>)> {
    let body_len = raw.len().checked_sub(TRAILER_LEN)?;
    let (body, trailer) = raw.split_at(body_len);
    if body.len() < HEADER_LEN || u16::from_be_bytes([trailer[0], trailer[1]]) != fletcher16(body) {
        return None;
    }

    let generation = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
    let len = u32::from_be_bytes([body[4], body[5], body[6], body[7]]) as usize;
    let record = &body[HEADER_LEN..];
    if record.len() != len {
        return None;
    }
    Some((generation, record.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigError, DeviceConfig};
    use crate::storage::ConfigStore;

    /// Slot files in RAM; a failing write truncates first, like a FAT
    /// file opened for rewrite.
    #[derive(Debug, Default)]
    struct RamSlots {
        files: [Option<Vec<u8>>; 2],
        fail_writes_after: Option<usize>,
        writes: usize,
    }

    fn index(slot: Slot) -> usize {
        match slot {
            Slot::A => 0,
            Slot::B => 1,
        }
    }

    impl SlotFiles for RamSlots {
        type Error = &'static str;

        fn len(&mut self, slot: Slot) -> Result<Option<usize>, Self::Error> {
            Ok(self.files[index(slot)].as_ref().map(Vec::len))
        }

        fn read(&mut self, slot: Slot, buf: &mut [u8]) -> Result<usize, Self::Error> {
            let file = self.files[index(slot)].as_ref().ok_or("missing")?;
            let n = file.len().min(buf.len());
            buf[..n].copy_from_slice(&file[..n]);
            Ok(n)
        }

        fn write(&mut self, slot: Slot, data: &[u8]) -> Result<(), Self::Error> {
            self.writes += 1;
            if let Some(keep) = self.fail_writes_after.take() {
                self.files[index(slot)] = Some(data[..keep.min(data.len())].to_vec());
                return Err("card removed");
            }
            self.files[index(slot)] = Some(data.to_vec());
            Ok(())
        }

        fn remove(&mut self, slot: Slot) -> Result<(), Self::Error> {
            self.files[index(slot)] = None;
            Ok(())
        }
    }

    fn config(id: &str) -> DeviceConfig {
        DeviceConfig::new(id, "token").unwrap()
    }

    #[test]
    fn test_empty_pair_is_not_found() {
        let mut store = ConfigStore::new(DoubleBuffered::new(RamSlots::default()));
        assert_eq!(store.load(), Err(ConfigError::NotFound));
    }

    #[test]
    fn test_writes_alternate_slots() {
        let mut storage = DoubleBuffered::new(RamSlots::default());
        storage.replace(b"first").unwrap();
        storage.replace(b"second").unwrap();
        storage.replace(b"third").unwrap();

        let files = &storage.files_mut().files;
        assert_eq!(decode(files[0].as_deref().unwrap()), Some((3, b"third".to_vec())));
        assert_eq!(decode(files[1].as_deref().unwrap()), Some((2, b"second".to_vec())));

        let mut buf = [0u8; 16];
        let n = storage.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"third");
        assert_eq!(storage.stored_len().unwrap(), Some(5));
    }

    #[test]
    fn test_failed_write_keeps_previous_record() {
        let mut store = ConfigStore::new(DoubleBuffered::new(RamSlots::default()));
        store.save(&config("node-1")).unwrap();
        store.save(&config("node-2")).unwrap();

        for keep in [0, 3, HEADER_LEN + 4] {
            store.backend_mut().files_mut().fail_writes_after = Some(keep);
            assert_eq!(store.save(&config("node-3")), Err(ConfigError::Io));
            assert_eq!(store.load(), Ok(config("node-2")));
        }

        store.save(&config("node-4")).unwrap();
        assert_eq!(store.load(), Ok(config("node-4")));
    }

    #[test]
    fn test_corrupt_slot_is_skipped() {
        let mut storage = DoubleBuffered::new(RamSlots::default());
        storage.replace(b"good").unwrap();
        storage.replace(b"newer").unwrap();

        let slot_b = storage.files_mut().files[1].as_mut().unwrap();
        slot_b[HEADER_LEN] ^= 0x01;

        let mut buf = [0u8; 16];
        let n = storage.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"good");
    }

    #[test]
    fn test_generation_wraps() {
        assert!(is_newer(0, u32::MAX));
        assert!(is_newer(5, 4));
        assert!(!is_newer(4, 5));

        let mut storage = DoubleBuffered::new(RamSlots::default());
        storage.files_mut().files[0] = Some(encode(u32::MAX, b"old"));
        storage.replace(b"new").unwrap();
        let mut buf = [0u8; 8];
        let n = storage.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"new");
    }

    #[test]
    fn test_format_removes_both_slots() {
        let mut storage = DoubleBuffered::new(RamSlots::default());
        storage.replace(b"one").unwrap();
        storage.replace(b"two").unwrap();
        storage.format().unwrap();
        assert_eq!(storage.stored_len().unwrap(), None);
        assert_eq!(storage.files_mut().writes, 2);
    }
}
