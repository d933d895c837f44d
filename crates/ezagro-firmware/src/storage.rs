//! Records kept as files in the root directory of the SD card

use embedded_hal::delay::DelayNs;
use embedded_hal::spi::SpiDevice;
use embedded_sdmmc::{
    Error, Mode, SdCard, SdCardError, TimeSource, Timestamp, VolumeIdx, VolumeManager,
};
use log::info;

use ezagro_core::storage::{DoubleBuffered, Slot, SlotFiles};

/// 8.3 names of the two slots holding the device identity record.
pub const CONFIG_FILES: [&str; 2] = ["CONFIG.A", "CONFIG.B"];
/// 8.3 names of the two slots holding the joined station network.
pub const WIFI_FILES: [&str; 2] = ["WIFI.A", "WIFI.B"];

pub type SdVolumes<S, D> = VolumeManager<SdCard<S, D>, FixedTime, 4, 4, 1>;

/// The node has no RTC, every file gets the same timestamp
pub struct FixedTime;

impl TimeSource for FixedTime {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 55,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

/// A pair of slot files in the card's root directory
///
/// For NOW the SD card operations are blocking. They are short and only run
/// at boot, on provisioning and on a factory reset.
pub struct SdSlots<'a, S, D>
where
    S: SpiDevice<u8>,
    D: DelayNs,
{
    volumes: &'a SdVolumes<S, D>,
    names: [&'static str; 2],
}

impl<'a, S, D> SdSlots<'a, S, D>
where
    S: SpiDevice<u8>,
    D: DelayNs,
{
    pub fn new(volumes: &'a SdVolumes<S, D>, names: [&'static str; 2]) -> Self {
        Self { volumes, names }
    }

    fn name(&self, slot: Slot) -> &'static str {
        match slot {
            Slot::A => self.names[0],
            Slot::B => self.names[1],
        }
    }
}

/// Crash-safe record storage on the card
pub type SdRecord<'a, S, D> = DoubleBuffered<SdSlots<'a, S, D>>;

pub fn sd_record<'a, S, D>(
    volumes: &'a SdVolumes<S, D>,
    names: [&'static str; 2],
) -> SdRecord<'a, S, D>
where
    S: SpiDevice<u8>,
    D: DelayNs,
{
    DoubleBuffered::new(SdSlots::new(volumes, names))
}

impl<S, D> SlotFiles for SdSlots<'_, S, D>
where
    S: SpiDevice<u8>,
    D: DelayNs,
{
    type Error = Error<SdCardError>;

    fn len(&mut self, slot: Slot) -> Result<Option<usize>, Self::Error> {
        let volume = self.volumes.open_volume(VolumeIdx(0))?;
        let root_dir = volume.open_root_dir()?;
        let file = match root_dir.open_file_in_dir(self.name(slot), Mode::ReadOnly) {
            Ok(file) => file,
            Err(Error::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };
        let len = file.length() as usize;

        file.close()?;
        root_dir.close()?;
        volume.close()?;
        Ok(Some(len))
    }

    fn read(&mut self, slot: Slot, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let volume = self.volumes.open_volume(VolumeIdx(0))?;
        let root_dir = volume.open_root_dir()?;
        let file = root_dir.open_file_in_dir(self.name(slot), Mode::ReadOnly)?;

        let mut total = 0;
        while total < buf.len() {
            let n = file.read(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }

        file.close()?;
        root_dir.close()?;
        volume.close()?;
        Ok(total)
    }

    fn write(&mut self, slot: Slot, data: &[u8]) -> Result<(), Self::Error> {
        let name = self.name(slot);
        let volume = self.volumes.open_volume(VolumeIdx(0))?;
        let root_dir = volume.open_root_dir()?;
        let file = root_dir.open_file_in_dir(name, Mode::ReadWriteCreateOrTruncate)?;

        file.write(data)?;

        file.close()?;
        root_dir.close()?;
        volume.close()?;
        info!("Wrote {} bytes to {}", data.len(), name);
        Ok(())
    }

    fn remove(&mut self, slot: Slot) -> Result<(), Self::Error> {
        let volume = self.volumes.open_volume(VolumeIdx(0))?;
        let root_dir = volume.open_root_dir()?;
        match root_dir.delete_file_in_dir(self.name(slot)) {
            Ok(()) | Err(Error::NotFound) => {}
            Err(e) => return Err(e),
        }

        root_dir.close()?;
        volume.close()?;
        Ok(())
    }
}
