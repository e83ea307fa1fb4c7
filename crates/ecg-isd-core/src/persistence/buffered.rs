//! Write gathering in front of a [`RecordingFs`]
//!
//! Cards charge a whole block read-modify-write per write call, so small
//! records are collected into `N`-byte chunks first. Only whole chunks reach
//! the device until the file is closed, which writes out the remainder.

use super::fs::{FsError, RecordingFs};

/// One SD card block.
pub const BLOCK_LEN: usize = 512;

pub struct BufferedFs<F, const N: usize = BLOCK_LEN> {
    fs: F,
    pending: heapless::Vec<u8, N>,
}

impl<F: RecordingFs, const N: usize> BufferedFs<F, N> {
    pub fn new(fs: F) -> Self {
        Self {
            fs,
            pending: heapless::Vec::new(),
        }
    }

    /// Bytes accepted but not yet passed on.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn inner(&self) -> &F {
        &self.fs
    }

    /// Pass on the gathered bytes. They are discarded even if the write fails.
    fn flush(&mut self) -> Result<(), FsError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let result = self.fs.write(&self.pending);
        self.pending.clear();
        result
    }
}

impl<F: RecordingFs, const N: usize> RecordingFs for BufferedFs<F, N> {
    fn mount(&mut self, dir: &str) -> Result<(), FsError> {
        self.pending.clear();
        self.fs.mount(dir)
    }

    fn exists(&mut self, dir: &str, name: &str) -> Result<bool, FsError> {
        self.fs.exists(dir, name)
    }

    fn create(&mut self, dir: &str, name: &str) -> Result<(), FsError> {
        self.fs.create(dir, name)
    }

    fn open(&mut self, dir: &str, name: &str) -> Result<(), FsError> {
        self.fs.open(dir, name)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), FsError> {
        if N == 0 {
            return self.fs.write(data);
        }

        let mut rest = data;
        while !rest.is_empty() {
            let room = N - self.pending.len();
            let (head, tail) = rest.split_at(room.min(rest.len()));
            self.pending
                .extend_from_slice(head)
                .map_err(|_| FsError::Device)?;
            rest = tail;
            if self.pending.is_full() {
                self.flush()?;
            }
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        self.fs.read(buf)
    }

    /// Closes the file even if writing out the remainder fails, and reports
    /// that failure first.
    fn close(&mut self) -> Result<(), FsError> {
        let flushed = self.flush();
        let closed = self.fs.close();
        flushed.and(closed)
    }

    fn remove(&mut self, dir: &str, name: &str) -> Result<(), FsError> {
        self.fs.remove(dir, name)
    }

    fn for_each_entry(&mut self, dir: &str, f: &mut dyn FnMut(&str, u32)) -> Result<(), FsError> {
        self.fs.for_each_entry(dir, f)
    }
}
