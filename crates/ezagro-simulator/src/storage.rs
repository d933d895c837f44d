//! Identity record kept in a file on the host

use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use ezagro_core::constants::CONFIG_FILE_NAME;
use ezagro_core::storage::BlobStorage;

/// Record stored as `config.json` in a data directory
///
/// Writes go to a temporary file which is renamed over the record, so a
/// crash mid-write leaves the previous record in place.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(CONFIG_FILE_NAME),
        }
    }
}

impl BlobStorage for FileStorage {
    type Error = io::Error;

    fn stored_len(&mut self) -> Result<Option<usize>, Self::Error> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(Some(meta.len() as usize)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let data = fs::read(&self.path)?;
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }

    fn replace(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        let tmp = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)
    }

    fn format(&mut self) -> Result<(), Self::Error> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ezagro_core::config::{ConfigError, DeviceConfig};
    use ezagro_core::storage::ConfigStore;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ezagro-sim-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = scratch_dir("round-trip");
        let mut store = ConfigStore::new(FileStorage::new(&dir));
        assert_eq!(store.load(), Err(ConfigError::NotFound));

        let config = DeviceConfig::new("node-3", "tok").unwrap();
        store.save(&config).unwrap();
        assert_eq!(store.load().unwrap(), config);
        assert!(!dir.join("config.json.tmp").exists());

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_erase_is_idempotent() {
        let dir = scratch_dir("erase");
        let mut store = ConfigStore::new(FileStorage::new(&dir));
        store.save(&DeviceConfig::new("node-3", "tok").unwrap()).unwrap();

        store.erase().unwrap();
        store.erase().unwrap();
        assert_eq!(store.load(), Err(ConfigError::NotFound));

        fs::remove_dir_all(dir).unwrap();
    }
}
