//! On-card layout of recordings
//!
//! Recordings live in [`RECORDINGS_DIR`] as `NNNNN.ECG`, five zero-padded
//! decimal digits. A file is a plain concatenation of records:
//!
//! ```text
//! [count: u8][count x f32 little-endian]
//! ```
//!
//! End of file ends the stream; there is no terminator record.

use alloc::vec::Vec;
use core::fmt::Write;

/// Directory holding the recordings.
pub const RECORDINGS_DIR: &str = "RECORDS";

/// File extension of recordings.
pub const RECORDING_EXTENSION: &str = "ECG";

/// Recording indices run from 0 up to, not including, this bound.
pub const MAX_RECORDINGS: u32 = 10_000;

/// Most samples one record can carry.
pub const MAX_RECORD_SAMPLES: usize = u8::MAX as usize;

/// Recording name without extension, e.g. `00042`.
pub type RecordingName = heapless::String<8>;

/// File name including extension, e.g. `00042.ECG`.
pub type RecordingFileName = heapless::String<12>;

/// One listed recording.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RecordingEntry {
    pub name: RecordingName,
    /// File size in bytes.
    pub size: u32,
}

/// Result of reading one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A record of this many samples was copied into the buffer.
    Record(usize),
    /// No records left.
    EndOfStream,
    /// The next record declares `declared` samples, which needs a buffer
    /// longer than `declared`. Nothing was consumed.
    BufferTooSmall { declared: usize },
}

/// Name for a recording index.
pub fn recording_name(index: u32) -> RecordingName {
    let mut name = RecordingName::new();
    // At most five digits below MAX_RECORDINGS, always fits.
    let _ = write!(name, "{:05}", index % MAX_RECORDINGS);
    name
}

/// Validate a caller supplied recording name: one to eight ASCII
/// alphanumerics, the base of an 8.3 file name.
pub fn parse_recording_name(name: &str) -> Option<RecordingName> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    RecordingName::try_from(name).ok()
}

pub fn recording_file_name(name: &str) -> RecordingFileName {
    let mut file_name = RecordingFileName::new();
    let _ = write!(file_name, "{}.{}", name, RECORDING_EXTENSION);
    file_name
}

/// Strip the recording extension from a directory entry name, or `None` if
/// the entry is not a recording.
pub fn name_from_file_name(file_name: &str) -> Option<RecordingName> {
    let (base, extension) = file_name.rsplit_once('.')?;
    if !extension.eq_ignore_ascii_case(RECORDING_EXTENSION) {
        return None;
    }
    parse_recording_name(base)
}

/// Frame `samples` as one record. `None` if there are more than
/// [`MAX_RECORD_SAMPLES`].
pub fn encode_record(samples: &[f32]) -> Option<Vec<u8>> {
    let count = u8::try_from(samples.len()).ok()?;

    let mut bytes = Vec::with_capacity(1 + samples.len() * 4);
    bytes.push(count);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    Some(bytes)
}

/// Decode little-endian samples into `out`. Returns the number decoded.
pub fn decode_samples(bytes: &[u8], out: &mut [f32]) -> usize {
    let mut count = 0;
    for (sample, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
        *sample = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_names() {
        assert_eq!(recording_name(0), "00000");
        assert_eq!(recording_name(42), "00042");
        assert_eq!(recording_name(9_999), "09999");
        assert_eq!(recording_file_name("00042"), "00042.ECG");
    }

    #[test]
    fn test_name_from_file_name() {
        assert_eq!(name_from_file_name("00042.ECG").as_deref(), Some("00042"));
        assert_eq!(name_from_file_name("00042.ecg").as_deref(), Some("00042"));
        assert_eq!(name_from_file_name("00042.CSV"), None);
        assert_eq!(name_from_file_name("SETTINGS"), None);
    }

    #[test]
    fn test_parse_recording_name_rejects_paths() {
        assert!(parse_recording_name("00001").is_some());
        assert!(parse_recording_name("").is_none());
        assert!(parse_recording_name("../00001").is_none());
        assert!(parse_recording_name("000000001").is_none());
    }

    #[test]
    fn test_record_layout() {
        let bytes = encode_record(&[1.0, -2.5]).unwrap();
        assert_eq!(bytes[0], 2);
        assert_eq!(&bytes[1..5], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[5..9], &(-2.5f32).to_le_bytes());
        assert_eq!(bytes.len(), 9);

        let mut out = [0.0; 4];
        assert_eq!(decode_samples(&bytes[1..], &mut out), 2);
        assert_eq!(&out[..2], &[1.0, -2.5]);
    }

    #[test]
    fn test_record_too_long() {
        assert!(encode_record(&[0.0; MAX_RECORD_SAMPLES]).is_some());
        assert!(encode_record(&[0.0; MAX_RECORD_SAMPLES + 1]).is_none());
    }
}
