//! In-memory [`RecordingFs`] for the simulator and tests

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU8, Ordering};

use super::fs::{FsError, ROOT_DIR, RecordingFs};

const FAIL_MOUNT: u8 = 1 << 0;
const FAIL_WRITE: u8 = 1 << 1;
const FAIL_REMOVE: u8 = 1 << 2;
const FAIL_LIST: u8 = 1 << 3;
const FAIL_CREATE: u8 = 1 << 4;
const FAIL_OPEN: u8 = 1 << 5;

/// Switches for making a [`RamFs`] fail on purpose. Clones share state, so a
/// handle kept outside still works after the file system has been moved.
#[derive(Clone, Default)]
pub struct FaultInjector {
    flags: Arc<AtomicU8>,
}

impl FaultInjector {
    pub fn fail_mount(&self, on: bool) {
        self.set(FAIL_MOUNT, on);
    }

    pub fn fail_writes(&self, on: bool) {
        self.set(FAIL_WRITE, on);
    }

    pub fn fail_removes(&self, on: bool) {
        self.set(FAIL_REMOVE, on);
    }

    pub fn fail_listing(&self, on: bool) {
        self.set(FAIL_LIST, on);
    }

    pub fn fail_creates(&self, on: bool) {
        self.set(FAIL_CREATE, on);
    }

    pub fn fail_opens(&self, on: bool) {
        self.set(FAIL_OPEN, on);
    }

    fn set(&self, flag: u8, on: bool) {
        if on {
            self.flags.fetch_or(flag, Ordering::Relaxed);
        } else {
            self.flags.fetch_and(!flag, Ordering::Relaxed);
        }
    }

    fn is_set(&self, flag: u8) -> bool {
        self.flags.load(Ordering::Relaxed) & flag != 0
    }
}

enum OpenFile {
    Reading { path: String, position: usize },
    Writing { path: String },
}

/// A volume held in RAM. Names are case-insensitive like FAT short names.
#[derive(Default)]
pub struct RamFs {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    mounted: bool,
    open: Option<OpenFile>,
    faults: FaultInjector,
}

impl RamFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a file (and its directory).
    pub fn with_file(mut self, dir: &str, name: &str, contents: &[u8]) -> Self {
        if dir != ROOT_DIR {
            self.dirs.insert(dir.to_ascii_uppercase());
        }
        self.files.insert(path(dir, name), contents.to_vec());
        self
    }

    pub fn faults(&self) -> FaultInjector {
        self.faults.clone()
    }

    fn ensure_mounted(&self) -> Result<(), FsError> {
        if self.mounted { Ok(()) } else { Err(FsError::Device) }
    }

    fn ensure_dir(&self, dir: &str) -> Result<(), FsError> {
        self.ensure_mounted()?;
        if dir == ROOT_DIR || self.dirs.contains(&dir.to_ascii_uppercase()) {
            Ok(())
        } else {
            Err(FsError::NotFound)
        }
    }
}

fn path(dir: &str, name: &str) -> String {
    let mut path = String::new();
    if dir != ROOT_DIR {
        path.push_str(&dir.to_ascii_uppercase());
        path.push('/');
    }
    path.push_str(&name.to_ascii_uppercase());
    path
}

impl RecordingFs for RamFs {
    fn mount(&mut self, dir: &str) -> Result<(), FsError> {
        self.mounted = false;
        if self.faults.is_set(FAIL_MOUNT) {
            return Err(FsError::Device);
        }
        if dir != ROOT_DIR {
            self.dirs.insert(dir.to_ascii_uppercase());
        }
        self.mounted = true;
        Ok(())
    }

    fn exists(&mut self, dir: &str, name: &str) -> Result<bool, FsError> {
        self.ensure_dir(dir)?;
        Ok(self.files.contains_key(&path(dir, name)))
    }

    fn create(&mut self, dir: &str, name: &str) -> Result<(), FsError> {
        self.ensure_dir(dir)?;
        if self.open.is_some() {
            return Err(FsError::AlreadyOpen);
        }
        if self.faults.is_set(FAIL_CREATE) {
            return Err(FsError::Device);
        }
        let path = path(dir, name);
        self.files.insert(path.clone(), Vec::new());
        self.open = Some(OpenFile::Writing { path });
        Ok(())
    }

    fn open(&mut self, dir: &str, name: &str) -> Result<(), FsError> {
        self.ensure_dir(dir)?;
        if self.open.is_some() {
            return Err(FsError::AlreadyOpen);
        }
        if self.faults.is_set(FAIL_OPEN) {
            return Err(FsError::Device);
        }
        let path = path(dir, name);
        if !self.files.contains_key(&path) {
            return Err(FsError::NotFound);
        }
        self.open = Some(OpenFile::Reading { path, position: 0 });
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), FsError> {
        self.ensure_mounted()?;
        if self.faults.is_set(FAIL_WRITE) {
            return Err(FsError::Device);
        }
        match &self.open {
            Some(OpenFile::Writing { path }) => {
                let file = self.files.get_mut(path).ok_or(FsError::NotFound)?;
                file.extend_from_slice(data);
                Ok(())
            }
            _ => Err(FsError::NotOpen),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        self.ensure_mounted()?;
        match &mut self.open {
            Some(OpenFile::Reading { path, position }) => {
                let file = self.files.get(path.as_str()).ok_or(FsError::NotFound)?;
                let remaining = file.get(*position..).unwrap_or_default();
                let count = remaining.len().min(buf.len());
                buf[..count].copy_from_slice(&remaining[..count]);
                *position += count;
                Ok(count)
            }
            _ => Err(FsError::NotOpen),
        }
    }

    fn close(&mut self) -> Result<(), FsError> {
        self.open.take().map(|_| ()).ok_or(FsError::NotOpen)
    }

    fn remove(&mut self, dir: &str, name: &str) -> Result<(), FsError> {
        self.ensure_dir(dir)?;
        if self.faults.is_set(FAIL_REMOVE) {
            return Err(FsError::Device);
        }
        self.files
            .remove(&path(dir, name))
            .map(|_| ())
            .ok_or(FsError::NotFound)
    }

    fn for_each_entry(&mut self, dir: &str, f: &mut dyn FnMut(&str, u32)) -> Result<(), FsError> {
        self.ensure_dir(dir)?;
        if self.faults.is_set(FAIL_LIST) {
            return Err(FsError::Device);
        }

        let prefix = path(dir, "");
        for (path, contents) in &self.files {
            if let Some(name) = path.strip_prefix(prefix.as_str()) {
                if !name.contains('/') {
                    f(name, contents.len() as u32);
                }
            }
        }
        Ok(())
    }
}
