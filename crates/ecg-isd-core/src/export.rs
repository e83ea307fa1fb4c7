//! CSV export of recordings
//!
//! One line per record, samples comma separated with six decimals. This is
//! what a file server streams for `/recordings/NNNNN.csv`.

use core::fmt::{self, Write};

use embassy_sync::blocking_mutex::raw::RawMutex;
use log::debug;
use thiserror_no_std::Error;

use crate::persistence::{
    MAX_RECORD_SAMPLES, Persistence, PersistenceError, ReadOutcome, RecordingFs,
};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportError {
    #[error("Storage error: {0}")]
    Storage(#[from] PersistenceError),
    #[error("Output rejected the CSV data")]
    Format,
}

impl From<fmt::Error> for ExportError {
    fn from(_: fmt::Error) -> Self {
        ExportError::Format
    }
}

/// Write recording `name` to `out` as CSV. Returns the number of records.
///
/// The recording is closed again however the export ends.
pub async fn write_csv<M, F, W>(
    persistence: &Persistence<M, F>,
    name: &str,
    out: &mut W,
) -> Result<usize, ExportError>
where
    M: RawMutex,
    F: RecordingFs,
    W: Write,
{
    persistence.open_recording(name).await?;

    let written = write_records(persistence, out).await;
    let closed = persistence.close_recording().await;

    let records = written?;
    closed?;
    debug!("Exported {} records of {}", records, name);
    Ok(records)
}

async fn write_records<M, F, W>(
    persistence: &Persistence<M, F>,
    out: &mut W,
) -> Result<usize, ExportError>
where
    M: RawMutex,
    F: RecordingFs,
    W: Write,
{
    let mut samples = [0.0f32; MAX_RECORD_SAMPLES + 1];
    let mut records = 0;

    loop {
        let count = match persistence.read_record(&mut samples).await? {
            ReadOutcome::Record(count) => count,
            ReadOutcome::EndOfStream => return Ok(records),
            // Cannot happen with a buffer one larger than any record.
            ReadOutcome::BufferTooSmall { declared } => {
                return Err(PersistenceError::RecordTooLong(declared).into());
            }
        };

        for (i, sample) in samples[..count].iter().enumerate() {
            if i > 0 {
                out.write_char(',')?;
            }
            write!(out, "{:.6}", sample)?;
        }
        out.write_char('\n')?;
        records += 1;
    }
}
