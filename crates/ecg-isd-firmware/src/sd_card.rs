//! [`RecordingFs`] on an SD card through embedded-sdmmc
//!
//! The volume and root directory stay open while mounted. Sub-directories are
//! opened per call; the one data file is kept as a raw handle between calls.

use core::fmt::Write;

use ecg_isd_core::persistence::{FsError, ROOT_DIR, RecordingFs};
use embedded_sdmmc::{
    DirEntry, Mode, RawDirectory, RawFile, RawVolume, SdCard, SdCardError, TimeSource, Timestamp,
    VolumeIdx, VolumeManager,
};
use log::{error, info};

type Manager<S, D, T> = VolumeManager<SdCard<S, D>, T, 4, 4, 1>;
type SdError = embedded_sdmmc::Error<SdCardError>;

/// Fixed timestamp for new files; the board has no real-time clock.
pub struct FixedTime;

impl TimeSource for FixedTime {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 56,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

pub struct SdCardFs<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    volume_mgr: Manager<S, D, T>,
    volume: Option<RawVolume>,
    root: Option<RawDirectory>,
    file: Option<RawFile>,
}

impl<S, D, T> SdCardFs<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    pub fn new(sd_card: SdCard<S, D>, ts: T) -> Self {
        Self {
            volume_mgr: VolumeManager::new(sd_card, ts),
            volume: None,
            root: None,
            file: None,
        }
    }

    /// Drop every open handle, ignoring errors.
    fn unmount(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = self.volume_mgr.close_file(file);
        }
        if let Some(root) = self.root.take() {
            let _ = self.volume_mgr.close_dir(root);
        }
        if let Some(volume) = self.volume.take() {
            let _ = self.volume_mgr.close_volume(volume);
        }
    }

    /// Run `f` on `dir`, opening and closing it around the call unless it is
    /// the root.
    fn in_dir<R>(
        &mut self,
        dir: &str,
        f: impl FnOnce(&Manager<S, D, T>, RawDirectory) -> Result<R, SdError>,
    ) -> Result<R, FsError> {
        let root = self.root.ok_or(FsError::Device)?;
        if dir == ROOT_DIR {
            return f(&self.volume_mgr, root).map_err(fs_error);
        }

        let sub = self.volume_mgr.open_dir(root, dir).map_err(fs_error)?;
        let result = f(&self.volume_mgr, sub).map_err(fs_error);
        let _ = self.volume_mgr.close_dir(sub);
        result
    }

    fn open_file(&mut self, dir: &str, name: &str, mode: Mode) -> Result<(), FsError> {
        if self.file.is_some() {
            return Err(FsError::AlreadyOpen);
        }
        let file = self.in_dir(dir, |mgr, dir| mgr.open_file_in_dir(dir, name, mode))?;
        self.file = Some(file);
        Ok(())
    }

    fn current_file(&self) -> Result<RawFile, FsError> {
        self.file.ok_or(FsError::NotOpen)
    }
}

fn fs_error(e: SdError) -> FsError {
    match e {
        embedded_sdmmc::Error::NotFound => FsError::NotFound,
        embedded_sdmmc::Error::FileAlreadyOpen => FsError::AlreadyOpen,
        e => {
            error!("SD card error: {:?}", e);
            FsError::Device
        }
    }
}

impl<S, D, T> RecordingFs for SdCardFs<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    fn mount(&mut self, dir: &str) -> Result<(), FsError> {
        self.unmount();

        let volume = self
            .volume_mgr
            .open_raw_volume(VolumeIdx(0))
            .map_err(fs_error)?;
        self.volume = Some(volume);
        let root = self.volume_mgr.open_root_dir(volume).map_err(fs_error)?;
        self.root = Some(root);

        if dir != ROOT_DIR {
            match self.volume_mgr.make_dir_in_dir(root, dir) {
                Ok(()) | Err(embedded_sdmmc::Error::DirAlreadyExists) => {}
                Err(e) => return Err(fs_error(e)),
            }
        }

        info!("SD card mounted");
        Ok(())
    }

    fn exists(&mut self, dir: &str, name: &str) -> Result<bool, FsError> {
        match self.in_dir(dir, |mgr, dir| mgr.find_directory_entry(dir, name)) {
            Ok(_) => Ok(true),
            Err(FsError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn create(&mut self, dir: &str, name: &str) -> Result<(), FsError> {
        self.open_file(dir, name, Mode::ReadWriteCreateOrTruncate)
    }

    fn open(&mut self, dir: &str, name: &str) -> Result<(), FsError> {
        self.open_file(dir, name, Mode::ReadOnly)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), FsError> {
        let file = self.current_file()?;
        self.volume_mgr.write(file, data).map_err(fs_error)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        let file = self.current_file()?;
        if self.volume_mgr.file_eof(file).map_err(fs_error)? {
            return Ok(0);
        }
        self.volume_mgr.read(file, buf).map_err(fs_error)
    }

    fn close(&mut self) -> Result<(), FsError> {
        let file = self.file.take().ok_or(FsError::NotOpen)?;
        self.volume_mgr.close_file(file).map_err(fs_error)
    }

    fn remove(&mut self, dir: &str, name: &str) -> Result<(), FsError> {
        self.in_dir(dir, |mgr, dir| mgr.delete_file_in_dir(dir, name))
    }

    fn for_each_entry(&mut self, dir: &str, f: &mut dyn FnMut(&str, u32)) -> Result<(), FsError> {
        self.in_dir(dir, |mgr, dir| {
            mgr.iterate_dir(dir, |entry: &DirEntry| {
                if entry.attributes.is_directory() {
                    return;
                }
                let mut name = heapless::String::<12>::new();
                if write!(name, "{}", entry.name).is_ok() {
                    f(name.as_str(), entry.size);
                }
            })
        })
    }
}
