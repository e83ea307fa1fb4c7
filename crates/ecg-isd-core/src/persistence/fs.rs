//! Storage device abstraction used by [`Persistence`](super::Persistence)

use thiserror_no_std::Error;

/// Directory argument naming the volume root.
pub const ROOT_DIR: &str = "";

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    #[error("File or directory not found")]
    NotFound,
    #[error("A file is already open")]
    AlreadyOpen,
    #[error("No file is open")]
    NotOpen,
    #[error("Device error")]
    Device,
}

/// A FAT-like volume with one open file at a time.
///
/// Names are 8.3 short names. `dir` is a directory in the volume root, or
/// [`ROOT_DIR`] for the root itself. Implementations do blocking I/O;
/// callers serialize access.
pub trait RecordingFs {
    /// Mount the volume and make sure `dir` exists.
    fn mount(&mut self, dir: &str) -> Result<(), FsError>;

    fn exists(&mut self, dir: &str, name: &str) -> Result<bool, FsError>;

    /// Create or truncate a file and open it for writing.
    fn create(&mut self, dir: &str, name: &str) -> Result<(), FsError>;

    /// Open an existing file for reading from the start.
    fn open(&mut self, dir: &str, name: &str) -> Result<(), FsError>;

    /// Append to the open file.
    fn write(&mut self, data: &[u8]) -> Result<(), FsError>;

    /// Read from the open file. Returns 0 at end of file.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError>;

    fn close(&mut self) -> Result<(), FsError>;

    fn remove(&mut self, dir: &str, name: &str) -> Result<(), FsError>;

    /// Call `f` with the name and size of every file in `dir`.
    fn for_each_entry(&mut self, dir: &str, f: &mut dyn FnMut(&str, u32)) -> Result<(), FsError>;
}

/// Fill `buf` from the open file, stopping early only at end of file.
pub fn read_full<F: RecordingFs + ?Sized>(fs: &mut F, buf: &mut [u8]) -> Result<usize, FsError> {
    let mut filled = 0;
    while filled < buf.len() {
        let read = fs.read(&mut buf[filled..])?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}
