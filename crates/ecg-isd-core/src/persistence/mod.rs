//! Recording persistence on the SD card
//!
//! [`Persistence`] owns the storage device behind an async mutex (the bus
//! lock) and runs a small state machine:
//!
//! | From      | Operation              | To        |
//! |-----------|------------------------|-----------|
//! | Idle      | `create_new_recording` | Recording |
//! | Recording | `close_recording`      | Idle      |
//! | Idle      | `open_recording`       | Reading   |
//! | Reading   | `close_recording`      | Idle      |
//! | any       | device failure         | Error     |
//! | Error     | `clear_error`          | Idle      |
//!
//! Every operation checks its precondition state first and fails with
//! [`PersistenceError::InvalidState`] otherwise. Device failures are sticky:
//! the state becomes `Error`, [`Persistence::get_error`] names the cause and
//! only [`Persistence::clear_error`] gets out of it.

pub mod buffered;
pub mod fs;
pub mod ram_fs;
pub mod record;

pub use buffered::{BLOCK_LEN, BufferedFs};
pub use fs::{FsError, ROOT_DIR, RecordingFs};
pub use ram_fs::{FaultInjector, RamFs};
pub use record::{
    MAX_RECORD_SAMPLES, MAX_RECORDINGS, RECORDINGS_DIR, ReadOutcome, RecordingEntry,
    RecordingName,
};

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU8, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use log::{debug, error, info, warn};
use thiserror_no_std::Error;

use crate::config::{CONFIG_FILE_NAME, Config};
use record::{
    decode_samples, encode_record, name_from_file_name, parse_recording_name, recording_file_name,
    recording_name,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PersistenceState {
    Idle = 0,
    Error = 1,
    Recording = 2,
    Reading = 3,
}

impl PersistenceState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PersistenceState::Idle,
            2 => PersistenceState::Recording,
            3 => PersistenceState::Reading,
            _ => PersistenceState::Error,
        }
    }
}

/// Cause of the `Error` state.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StorageError {
    #[error("Cannot initialize storage")]
    CanNotInitialize = 1,
    #[error("Cannot open file")]
    CanNotOpenFile = 2,
    #[error("Cannot remove file")]
    CanNotRemoveFile = 3,
    #[error("File system error")]
    FileSystemError = 4,
    #[error("Too many recordings")]
    TooManyFiles = 5,
}

impl StorageError {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(StorageError::CanNotInitialize),
            2 => Some(StorageError::CanNotOpenFile),
            3 => Some(StorageError::CanNotRemoveFile),
            4 => Some(StorageError::FileSystemError),
            5 => Some(StorageError::TooManyFiles),
            _ => None,
        }
    }
}

/// Why a single persistence call failed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("{operation} is not allowed in state {actual:?}")]
    InvalidState {
        operation: &'static str,
        actual: PersistenceState,
    },
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Recording not found")]
    NotFound,
    #[error("Invalid recording name")]
    InvalidName,
    #[error("Record of {0} samples is too long")]
    RecordTooLong(usize),
    #[error("Settings file is corrupt")]
    Config,
}

/// State guarded by the bus lock.
struct Inner<F> {
    fs: F,
    state: PersistenceState,
    error: Option<StorageError>,
    /// Next index `create_new_recording` starts scanning from.
    next_index: u32,
    /// Index of the recording open for writing.
    writing: Option<u32>,
    /// Length byte read ahead by `read_record`.
    pending_len: Option<u8>,
}

impl<F: RecordingFs> Inner<F> {
    fn initialize(&mut self) -> Result<(), PersistenceError> {
        match self.fs.mount(RECORDINGS_DIR) {
            Ok(()) => {
                info!("Storage ready");
                self.state = PersistenceState::Idle;
                self.error = None;
                Ok(())
            }
            Err(e) => {
                error!("Failed to mount storage: {:?}", e);
                Err(self.fail(StorageError::CanNotInitialize))
            }
        }
    }

    fn require_state(
        &self,
        operation: &'static str,
        expected: PersistenceState,
    ) -> Result<(), PersistenceError> {
        if self.state == expected {
            Ok(())
        } else {
            error!(
                "{}: expected state {:?}, but is {:?}",
                operation, expected, self.state
            );
            Err(PersistenceError::InvalidState {
                operation,
                actual: self.state,
            })
        }
    }

    fn fail(&mut self, kind: StorageError) -> PersistenceError {
        error!("Storage failure: {}", kind);
        self.state = PersistenceState::Error;
        self.error = Some(kind);
        PersistenceError::Storage(kind)
    }

    fn clear_error(&mut self) -> Result<(), PersistenceError> {
        match self.state {
            PersistenceState::Error | PersistenceState::Idle => {}
            actual => {
                error!("clear_error: nothing to clear in state {:?}", actual);
                return Err(PersistenceError::InvalidState {
                    operation: "clear_error",
                    actual,
                });
            }
        }

        // A failure may have left a handle open.
        let _ = self.fs.close();
        self.writing = None;
        self.pending_len = None;
        self.initialize()
    }

    fn create_new_recording(&mut self) -> Result<RecordingName, PersistenceError> {
        self.require_state("create_new_recording", PersistenceState::Idle)?;

        let mut index = self.next_index;
        let name = loop {
            if index >= MAX_RECORDINGS {
                return Err(self.fail(StorageError::TooManyFiles));
            }

            let name = recording_name(index);
            match self.fs.exists(RECORDINGS_DIR, &recording_file_name(&name)) {
                Ok(false) => break name,
                Ok(true) => index += 1,
                Err(e) => {
                    error!("Failed to look up {}: {:?}", name, e);
                    return Err(self.fail(StorageError::FileSystemError));
                }
            }
        };

        if let Err(e) = self.fs.create(RECORDINGS_DIR, &recording_file_name(&name)) {
            error!("Failed to create {}: {:?}", name, e);
            return Err(self.fail(StorageError::CanNotOpenFile));
        }

        info!("Recording to {}", name);
        self.next_index = index;
        self.writing = Some(index);
        self.state = PersistenceState::Recording;
        Ok(name)
    }

    fn write_record(&mut self, samples: &[f32]) -> Result<(), PersistenceError> {
        self.require_state("write_record", PersistenceState::Recording)?;

        let bytes = encode_record(samples).ok_or(PersistenceError::RecordTooLong(samples.len()))?;
        if let Err(e) = self.fs.write(&bytes) {
            error!("Failed to write record: {:?}", e);
            return Err(self.fail(StorageError::FileSystemError));
        }
        Ok(())
    }

    fn close_recording(&mut self) -> Result<Option<RecordingName>, PersistenceError> {
        let closed = match self.state {
            PersistenceState::Recording => self.writing.take(),
            PersistenceState::Reading => None,
            actual => {
                error!("close_recording: no recording open in state {:?}", actual);
                return Err(PersistenceError::InvalidState {
                    operation: "close_recording",
                    actual,
                });
            }
        };

        self.pending_len = None;
        if let Err(e) = self.fs.close() {
            error!("Failed to close recording: {:?}", e);
            return Err(self.fail(StorageError::FileSystemError));
        }

        self.state = PersistenceState::Idle;
        Ok(closed.map(|index| {
            self.next_index = index + 1;
            let name = recording_name(index);
            info!("Closed recording {}", name);
            name
        }))
    }

    fn list_recordings(&mut self) -> Result<Vec<RecordingEntry>, PersistenceError> {
        self.require_state("list_recordings", PersistenceState::Idle)?;

        let mut entries = Vec::new();
        let listed = self.fs.for_each_entry(RECORDINGS_DIR, &mut |file_name: &str, size: u32| {
            if let Some(name) = name_from_file_name(file_name) {
                entries.push(RecordingEntry { name, size });
            }
        });

        if let Err(e) = listed {
            error!("Failed to list recordings: {:?}", e);
            return Err(self.fail(StorageError::FileSystemError));
        }

        entries.sort();
        Ok(entries)
    }

    /// Look up an existing recording by name.
    fn find(&mut self, name: &str) -> Result<record::RecordingFileName, PersistenceError> {
        let name = parse_recording_name(name).ok_or(PersistenceError::InvalidName)?;
        let file_name = recording_file_name(&name);

        match self.fs.exists(RECORDINGS_DIR, &file_name) {
            Ok(true) => Ok(file_name),
            Ok(false) => {
                warn!("Recording {} does not exist", name);
                Err(PersistenceError::NotFound)
            }
            Err(e) => {
                error!("Failed to look up {}: {:?}", name, e);
                Err(self.fail(StorageError::FileSystemError))
            }
        }
    }

    fn remove_recording(&mut self, name: &str) -> Result<(), PersistenceError> {
        self.require_state("remove_recording", PersistenceState::Idle)?;

        let file_name = self.find(name)?;
        if let Err(e) = self.fs.remove(RECORDINGS_DIR, &file_name) {
            error!("Failed to remove {}: {:?}", file_name, e);
            return Err(self.fail(StorageError::CanNotRemoveFile));
        }
        info!("Removed recording {}", name);
        Ok(())
    }

    fn open_recording(&mut self, name: &str) -> Result<(), PersistenceError> {
        self.require_state("open_recording", PersistenceState::Idle)?;

        let file_name = self.find(name)?;
        if let Err(e) = self.fs.open(RECORDINGS_DIR, &file_name) {
            error!("Failed to open {}: {:?}", file_name, e);
            return Err(self.fail(StorageError::CanNotOpenFile));
        }

        debug!("Reading recording {}", name);
        self.pending_len = None;
        self.state = PersistenceState::Reading;
        Ok(())
    }

    fn read_record(&mut self, buffer: &mut [f32]) -> Result<ReadOutcome, PersistenceError> {
        self.require_state("read_record", PersistenceState::Reading)?;

        let declared = match self.pending_len {
            Some(len) => usize::from(len),
            None => {
                let mut len = [0u8; 1];
                match fs::read_full(&mut self.fs, &mut len) {
                    Ok(0) => return Ok(ReadOutcome::EndOfStream),
                    Ok(_) => {}
                    Err(e) => {
                        error!("Failed to read record length: {:?}", e);
                        return Err(self.fail(StorageError::FileSystemError));
                    }
                }
                self.pending_len = Some(len[0]);
                usize::from(len[0])
            }
        };

        if declared >= buffer.len() {
            return Ok(ReadOutcome::BufferTooSmall { declared });
        }

        let mut bytes = [0u8; MAX_RECORD_SAMPLES * 4];
        let payload = &mut bytes[..declared * 4];
        match fs::read_full(&mut self.fs, payload) {
            Ok(read) if read == payload.len() => {}
            Ok(read) => {
                error!("Short record: expected {} bytes, got {}", payload.len(), read);
                return Err(self.fail(StorageError::FileSystemError));
            }
            Err(e) => {
                error!("Failed to read record: {:?}", e);
                return Err(self.fail(StorageError::FileSystemError));
            }
        }

        self.pending_len = None;
        Ok(ReadOutcome::Record(decode_samples(payload, buffer)))
    }

    fn load_config(&mut self) -> Result<Config, PersistenceError> {
        self.require_state("load_config", PersistenceState::Idle)?;

        match self.fs.exists(ROOT_DIR, CONFIG_FILE_NAME) {
            Ok(true) => {}
            Ok(false) => {
                info!("No settings file, using defaults");
                return Ok(Config::default());
            }
            Err(e) => {
                error!("Failed to look up settings: {:?}", e);
                return Err(self.fail(StorageError::FileSystemError));
            }
        }

        if let Err(e) = self.fs.open(ROOT_DIR, CONFIG_FILE_NAME) {
            error!("Failed to open settings: {:?}", e);
            return Err(self.fail(StorageError::CanNotOpenFile));
        }

        let mut contents = Vec::new();
        let mut chunk = [0u8; 32];
        let read = loop {
            match self.fs.read(&mut chunk) {
                Ok(0) => break Ok(()),
                Ok(n) => contents.extend_from_slice(&chunk[..n]),
                Err(e) => break Err(e),
            }
        };
        let closed = self.fs.close();

        if let Err(e) = read.and(closed) {
            error!("Failed to read settings: {:?}", e);
            return Err(self.fail(StorageError::FileSystemError));
        }

        Config::from_bytes(&contents).map_err(|e| {
            error!("Corrupt settings file: {:?}", e);
            PersistenceError::Config
        })
    }

    fn store_config(&mut self, config: &Config) -> Result<(), PersistenceError> {
        self.require_state("store_config", PersistenceState::Idle)?;

        let bytes = config.to_bytes().map_err(|e| {
            error!("Failed to encode settings: {:?}", e);
            PersistenceError::Config
        })?;

        if let Err(e) = self.fs.create(ROOT_DIR, CONFIG_FILE_NAME) {
            error!("Failed to create settings: {:?}", e);
            return Err(self.fail(StorageError::CanNotOpenFile));
        }
        let written = self.fs.write(&bytes);
        let closed = self.fs.close();
        if let Err(e) = written.and(closed) {
            error!("Failed to write settings: {:?}", e);
            return Err(self.fail(StorageError::FileSystemError));
        }
        Ok(())
    }
}

/// Recording storage shared between tasks.
///
/// All device access happens with the internal lock held for the whole
/// operation, including the name scan in
/// [`create_new_recording`](Self::create_new_recording). `state` and
/// `get_error` read mirrored atomics and never wait for the lock.
pub struct Persistence<M: RawMutex, F> {
    inner: Mutex<M, Inner<F>>,
    state: AtomicU8,
    error: AtomicU8,
}

impl<M: RawMutex, F: RecordingFs> Persistence<M, F> {
    /// Take ownership of the device and mount it. A mount failure leaves
    /// the instance in `Error` with [`StorageError::CanNotInitialize`].
    pub fn new(fs: F) -> Self {
        let mut inner = Inner {
            fs,
            state: PersistenceState::Idle,
            error: None,
            next_index: 0,
            writing: None,
            pending_len: None,
        };
        let _ = inner.initialize();

        Self {
            state: AtomicU8::new(inner.state as u8),
            error: AtomicU8::new(inner.error.map_or(0, |e| e as u8)),
            inner: Mutex::new(inner),
        }
    }

    pub fn state(&self) -> PersistenceState {
        PersistenceState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// The error that put the instance into `Error`, if any.
    pub fn get_error(&self) -> Option<StorageError> {
        StorageError::from_u8(self.error.load(Ordering::Acquire))
    }

    /// Re-run initialization. On success the state is `Idle` and the error
    /// cleared; on failure the instance stays in `Error`.
    pub async fn clear_error(&self) -> Result<(), PersistenceError> {
        self.with_inner(|inner| inner.clear_error()).await
    }

    /// Allocate the next free recording name and open it for writing.
    ///
    /// The scan starts at the index after the last closed recording, so a
    /// name is never handed out twice even if its file is later removed.
    pub async fn create_new_recording(&self) -> Result<RecordingName, PersistenceError> {
        self.with_inner(|inner| inner.create_new_recording()).await
    }

    /// Append one record of at most [`MAX_RECORD_SAMPLES`] samples.
    pub async fn write_record(&self, samples: &[f32]) -> Result<(), PersistenceError> {
        self.with_inner(|inner| inner.write_record(samples)).await
    }

    /// Close the open recording. Returns the name when a written recording
    /// was closed, `None` when closing a reader.
    pub async fn close_recording(&self) -> Result<Option<RecordingName>, PersistenceError> {
        self.with_inner(|inner| inner.close_recording()).await
    }

    /// Recordings with their sizes, sorted by name.
    pub async fn list_recordings(&self) -> Result<Vec<RecordingEntry>, PersistenceError> {
        self.with_inner(|inner| inner.list_recordings()).await
    }

    /// Delete a recording. A missing recording is reported as
    /// [`PersistenceError::NotFound`] and does not change the state.
    pub async fn remove_recording(&self, name: &str) -> Result<(), PersistenceError> {
        self.with_inner(|inner| inner.remove_recording(name)).await
    }

    pub async fn open_recording(&self, name: &str) -> Result<(), PersistenceError> {
        self.with_inner(|inner| inner.open_recording(name)).await
    }

    /// Read the next record into `buffer`.
    ///
    /// A record declaring `n` samples needs `buffer.len() > n`; otherwise
    /// [`ReadOutcome::BufferTooSmall`] is returned and the record stays
    /// unread for a retry with a larger buffer. A truncated record moves
    /// the instance to `Error`.
    pub async fn read_record(&self, buffer: &mut [f32]) -> Result<ReadOutcome, PersistenceError> {
        self.with_inner(|inner| inner.read_record(buffer)).await
    }

    /// Load the settings file, or defaults if there is none.
    pub async fn load_config(&self) -> Result<Config, PersistenceError> {
        self.with_inner(|inner| inner.load_config()).await
    }

    pub async fn store_config(&self, config: &Config) -> Result<(), PersistenceError> {
        self.with_inner(|inner| inner.store_config(config)).await
    }

    async fn with_inner<R>(&self, op: impl FnOnce(&mut Inner<F>) -> R) -> R {
        let mut inner = self.inner.lock().await;
        let result = op(&mut *inner);
        self.publish(&*inner);
        result
    }

    fn publish(&self, inner: &Inner<F>) {
        self.state.store(inner.state as u8, Ordering::Release);
        self.error
            .store(inner.error.map_or(0, |e| e as u8), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

    type TestPersistence = Persistence<CriticalSectionRawMutex, RamFs>;

    fn recording(records: &[&[f32]]) -> Vec<u8> {
        records
            .iter()
            .flat_map(|samples| encode_record(samples).unwrap())
            .collect()
    }

    #[test]
    fn test_write_then_read_back() {
        block_on(async {
            let storage = TestPersistence::new(RamFs::new());
            assert_eq!(storage.state(), PersistenceState::Idle);

            let name = storage.create_new_recording().await.unwrap();
            assert_eq!(name, "00000");
            assert_eq!(storage.state(), PersistenceState::Recording);

            let first = [1.5f32, -0.25, f32::MIN_POSITIVE, 3.0e-7, -8.0];
            let second = [42.0f32];
            storage.write_record(&first).await.unwrap();
            storage.write_record(&second).await.unwrap();
            storage.write_record(&[]).await.unwrap();
            assert_eq!(storage.close_recording().await.unwrap(), Some(name.clone()));
            assert_eq!(storage.state(), PersistenceState::Idle);

            storage.open_recording(&name).await.unwrap();
            let mut buf = [0.0f32; 7];
            assert_eq!(storage.read_record(&mut buf).await, Ok(ReadOutcome::Record(5)));
            assert_eq!(buf[..5].iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
                first.iter().map(|v| v.to_bits()).collect::<Vec<_>>());
            assert_eq!(storage.read_record(&mut buf).await, Ok(ReadOutcome::Record(1)));
            assert_eq!(buf[0], 42.0);
            assert_eq!(storage.read_record(&mut buf).await, Ok(ReadOutcome::Record(0)));
            assert_eq!(storage.read_record(&mut buf).await, Ok(ReadOutcome::EndOfStream));
            assert_eq!(storage.read_record(&mut buf).await, Ok(ReadOutcome::EndOfStream));
            assert_eq!(storage.close_recording().await, Ok(None));
            assert_eq!(storage.state(), PersistenceState::Idle);
        });
    }

    #[test]
    fn test_allocation_resumes_after_existing_recordings() {
        block_on(async {
            let mut fs = RamFs::new();
            for i in 0..5 {
                fs = fs.with_file(RECORDINGS_DIR, &recording_file_name(&recording_name(i)), &[]);
            }
            let storage = TestPersistence::new(fs);

            let name = storage.create_new_recording().await.unwrap();
            assert_eq!(name, "00005");
            storage.close_recording().await.unwrap();

            // Removing the newest recording does not make its name reusable.
            storage.remove_recording("00005").await.unwrap();
            let name = storage.create_new_recording().await.unwrap();
            assert_eq!(name, "00006");
            storage.close_recording().await.unwrap();

            // Gaps below the cursor are not revisited either.
            storage.remove_recording("00002").await.unwrap();
            assert_eq!(storage.create_new_recording().await.unwrap(), "00007");
        });
    }

    #[test]
    fn test_too_many_recordings() {
        block_on(async {
            let mut fs = RamFs::new();
            for i in 9_998..MAX_RECORDINGS {
                fs = fs.with_file(RECORDINGS_DIR, &recording_file_name(&recording_name(i)), &[]);
            }
            let storage = TestPersistence::new(fs);

            // Fill the last free slots below 9998.
            for i in 0..9_998 {
                let name = storage.create_new_recording().await.unwrap();
                assert_eq!(name, recording_name(i));
                storage.close_recording().await.unwrap();
            }

            assert_eq!(
                storage.create_new_recording().await,
                Err(PersistenceError::Storage(StorageError::TooManyFiles))
            );
            assert_eq!(storage.state(), PersistenceState::Error);
            assert_eq!(storage.get_error(), Some(StorageError::TooManyFiles));
        });
    }

    #[test]
    fn test_short_buffer_keeps_the_record() {
        block_on(async {
            let fs = RamFs::new().with_file(
                RECORDINGS_DIR,
                "00000.ECG",
                &recording(&[&[1.0, 2.0, 3.0, 4.0, 5.0], &[6.0]]),
            );
            let storage = TestPersistence::new(fs);
            storage.open_recording("00000").await.unwrap();

            let mut small = [0.0f32; 5];
            assert_eq!(
                storage.read_record(&mut small).await,
                Ok(ReadOutcome::BufferTooSmall { declared: 5 })
            );
            assert_eq!(
                storage.read_record(&mut small).await,
                Ok(ReadOutcome::BufferTooSmall { declared: 5 })
            );

            let mut large = [0.0f32; 6];
            assert_eq!(storage.read_record(&mut large).await, Ok(ReadOutcome::Record(5)));
            assert_eq!(&large[..5], &[1.0, 2.0, 3.0, 4.0, 5.0]);
            assert_eq!(storage.read_record(&mut small).await, Ok(ReadOutcome::Record(1)));
            assert_eq!(small[0], 6.0);
            assert_eq!(storage.read_record(&mut small).await, Ok(ReadOutcome::EndOfStream));
            assert_eq!(storage.state(), PersistenceState::Reading);
        });
    }

    #[test]
    fn test_truncated_record_is_an_error() {
        block_on(async {
            let mut bytes = recording(&[&[1.0, 2.0]]);
            bytes.truncate(bytes.len() - 2);
            let fs = RamFs::new().with_file(RECORDINGS_DIR, "00000.ECG", &bytes);
            let storage = TestPersistence::new(fs);
            storage.open_recording("00000").await.unwrap();

            let mut buf = [0.0f32; 8];
            assert_eq!(
                storage.read_record(&mut buf).await,
                Err(PersistenceError::Storage(StorageError::FileSystemError))
            );
            assert_eq!(storage.state(), PersistenceState::Error);

            storage.clear_error().await.unwrap();
            assert_eq!(storage.state(), PersistenceState::Idle);
            assert_eq!(storage.get_error(), None);
        });
    }

    #[test]
    fn test_state_violations_are_rejected() {
        block_on(async {
            let storage = TestPersistence::new(RamFs::new());

            assert_eq!(
                storage.write_record(&[1.0]).await,
                Err(PersistenceError::InvalidState {
                    operation: "write_record",
                    actual: PersistenceState::Idle,
                })
            );
            assert!(storage.close_recording().await.is_err());
            let mut buf = [0.0f32; 4];
            assert!(storage.read_record(&mut buf).await.is_err());
            assert_eq!(storage.state(), PersistenceState::Idle);
            assert!(storage.list_recordings().await.unwrap().is_empty());

            let name = storage.create_new_recording().await.unwrap();
            assert_eq!(
                storage.open_recording(&name).await,
                Err(PersistenceError::InvalidState {
                    operation: "open_recording",
                    actual: PersistenceState::Recording,
                })
            );
            assert!(storage.create_new_recording().await.is_err());
            assert!(storage.list_recordings().await.is_err());
            assert!(storage.remove_recording(&name).await.is_err());
            assert_eq!(storage.state(), PersistenceState::Recording);
            assert_eq!(storage.get_error(), None);

            storage.close_recording().await.unwrap();
            let listed = storage.list_recordings().await.unwrap();
            assert_eq!(listed.len(), 1);
            assert_eq!(listed[0].name, "00000");
            assert_eq!(listed[0].size, 0);
        });
    }

    #[test]
    fn test_remove_missing_recording() {
        block_on(async {
            let storage = TestPersistence::new(RamFs::new());
            assert_eq!(
                storage.remove_recording("00003").await,
                Err(PersistenceError::NotFound)
            );
            assert_eq!(
                storage.open_recording("00003").await,
                Err(PersistenceError::NotFound)
            );
            assert_eq!(
                storage.remove_recording("../x").await,
                Err(PersistenceError::InvalidName)
            );
            assert_eq!(storage.state(), PersistenceState::Idle);
        });
    }

    #[test]
    fn test_listing_filters_and_sorts() {
        block_on(async {
            let fs = RamFs::new()
                .with_file(RECORDINGS_DIR, "00002.ECG", &[0; 5])
                .with_file(RECORDINGS_DIR, "00001.ecg", &[0; 9])
                .with_file(RECORDINGS_DIR, "NOTES.TXT", &[0; 3])
                .with_file(ROOT_DIR, "00009.ECG", &[0; 1]);
            let storage = TestPersistence::new(fs);

            let listed = storage.list_recordings().await.unwrap();
            let names: Vec<(&str, u32)> =
                listed.iter().map(|e| (e.name.as_str(), e.size)).collect();
            assert_eq!(names, [("00001", 9), ("00002", 5)]);
        });
    }

    #[test]
    fn test_mount_failure_and_recovery() {
        block_on(async {
            let fs = RamFs::new();
            let faults = fs.faults();
            faults.fail_mount(true);

            let storage = TestPersistence::new(fs);
            assert_eq!(storage.state(), PersistenceState::Error);
            assert_eq!(storage.get_error(), Some(StorageError::CanNotInitialize));
            assert!(storage.create_new_recording().await.is_err());

            assert!(storage.clear_error().await.is_err());
            assert_eq!(storage.state(), PersistenceState::Error);

            faults.fail_mount(false);
            storage.clear_error().await.unwrap();
            assert_eq!(storage.state(), PersistenceState::Idle);
            assert_eq!(storage.get_error(), None);
        });
    }

    #[test]
    fn test_write_failure_is_sticky() {
        block_on(async {
            let fs = RamFs::new();
            let faults = fs.faults();
            let storage = TestPersistence::new(fs);

            storage.create_new_recording().await.unwrap();
            faults.fail_writes(true);
            assert_eq!(
                storage.write_record(&[1.0]).await,
                Err(PersistenceError::Storage(StorageError::FileSystemError))
            );
            assert_eq!(storage.state(), PersistenceState::Error);
            assert!(storage.write_record(&[1.0]).await.is_err());
            assert!(storage.close_recording().await.is_err());

            faults.fail_writes(false);
            storage.clear_error().await.unwrap();

            // The abandoned recording keeps its name.
            assert_eq!(storage.create_new_recording().await.unwrap(), "00001");
        });
    }

    #[test]
    fn test_remove_failure() {
        block_on(async {
            let fs = RamFs::new().with_file(RECORDINGS_DIR, "00000.ECG", &[]);
            let faults = fs.faults();
            let storage = TestPersistence::new(fs);

            faults.fail_removes(true);
            assert_eq!(
                storage.remove_recording("00000").await,
                Err(PersistenceError::Storage(StorageError::CanNotRemoveFile))
            );
            assert_eq!(storage.get_error(), Some(StorageError::CanNotRemoveFile));
        });
    }

    #[test]
    fn test_listing_failure() {
        block_on(async {
            let fs = RamFs::new().with_file(RECORDINGS_DIR, "00000.ECG", &[]);
            let faults = fs.faults();
            let storage = TestPersistence::new(fs);

            faults.fail_listing(true);
            assert_eq!(
                storage.list_recordings().await,
                Err(PersistenceError::Storage(StorageError::FileSystemError))
            );
            assert_eq!(storage.state(), PersistenceState::Error);
            assert_eq!(storage.get_error(), Some(StorageError::FileSystemError));

            faults.fail_listing(false);
            storage.clear_error().await.unwrap();
            assert_eq!(storage.state(), PersistenceState::Idle);
            assert_eq!(storage.list_recordings().await.unwrap().len(), 1);
        });
    }

    #[test]
    fn test_create_failure() {
        block_on(async {
            let fs = RamFs::new();
            let faults = fs.faults();
            let storage = TestPersistence::new(fs);

            faults.fail_creates(true);
            assert_eq!(
                storage.create_new_recording().await,
                Err(PersistenceError::Storage(StorageError::CanNotOpenFile))
            );
            assert_eq!(storage.state(), PersistenceState::Error);
            assert_eq!(storage.get_error(), Some(StorageError::CanNotOpenFile));

            faults.fail_creates(false);
            storage.clear_error().await.unwrap();
            assert_eq!(storage.get_error(), None);
            assert_eq!(storage.create_new_recording().await.unwrap(), "00000");
        });
    }

    #[test]
    fn test_open_failure() {
        block_on(async {
            let fs = RamFs::new().with_file(RECORDINGS_DIR, "00000.ECG", &[]);
            let faults = fs.faults();
            let storage = TestPersistence::new(fs);

            faults.fail_opens(true);
            assert_eq!(
                storage.open_recording("00000").await,
                Err(PersistenceError::Storage(StorageError::CanNotOpenFile))
            );
            assert_eq!(storage.state(), PersistenceState::Error);
            assert_eq!(storage.get_error(), Some(StorageError::CanNotOpenFile));

            faults.fail_opens(false);
            storage.clear_error().await.unwrap();
            assert_eq!(storage.state(), PersistenceState::Idle);
            storage.open_recording("00000").await.unwrap();
            assert_eq!(storage.state(), PersistenceState::Reading);
        });
    }

    #[test]
    fn test_record_too_long() {
        block_on(async {
            let storage = TestPersistence::new(RamFs::new());
            storage.create_new_recording().await.unwrap();
            let samples = [0.0f32; MAX_RECORD_SAMPLES + 1];
            assert_eq!(
                storage.write_record(&samples).await,
                Err(PersistenceError::RecordTooLong(MAX_RECORD_SAMPLES + 1))
            );
            assert_eq!(storage.state(), PersistenceState::Recording);
        });
    }

    #[test]
    fn test_config_round_trip_on_card() {
        block_on(async {
            let storage = TestPersistence::new(RamFs::new());
            assert_eq!(storage.load_config().await.unwrap(), Config::default());

            let mut config = Config::default();
            config.acquisition.secondary_enabled = false;
            storage.store_config(&config).await.unwrap();
            assert_eq!(storage.load_config().await.unwrap(), config);

            // Settings are not recordings.
            assert!(storage.list_recordings().await.unwrap().is_empty());
        });
    }

    #[test]
    fn test_corrupt_config() {
        block_on(async {
            let fs = RamFs::new().with_file(ROOT_DIR, CONFIG_FILE_NAME, &[0xFF]);
            let storage = TestPersistence::new(fs);
            assert_eq!(storage.load_config().await, Err(PersistenceError::Config));
            assert_eq!(storage.state(), PersistenceState::Idle);
        });
    }
}
