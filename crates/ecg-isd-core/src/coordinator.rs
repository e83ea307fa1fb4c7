//! Recording coordinator
//!
//! Ties a recording on the card to a measurement run of the acquisition
//! task, and drains the sample ring into the open recording. Start and stop
//! run under the coordinator lock, which is separate from the storage bus
//! lock inside [`Persistence`]. Whether a recording is running can be read
//! without taking either lock.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::Timer;
use log::{error, info, warn};
use thiserror_no_std::Error;

use crate::acquisition::AcquisitionControl;
use crate::persistence::{
    Persistence, PersistenceError, PersistenceState, RecordingFs, RecordingName,
};
use crate::ring_buffer::{MAX_ITEM_SAMPLES, SampleRing};

/// Back-off of the consumer loop when the ring is empty.
pub const CONSUMER_IDLE_MS: u64 = 1;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("Storage error: {0}")]
    Storage(#[from] PersistenceError),
    #[error("Acquisition did not accept the start request")]
    AcquisitionBusy,
}

/// Coordinator state shared by everyone holding a [`RecordingCoordinator`].
pub struct RecorderState<M: RawMutex> {
    current: Mutex<M, Option<RecordingName>>,
    recording: AtomicBool,
    /// Items of the running recording that never reached the card.
    lost_records: AtomicU32,
}

impl<M: RawMutex> RecorderState<M> {
    pub const fn new() -> Self {
        Self {
            current: Mutex::new(None),
            recording: AtomicBool::new(false),
            lost_records: AtomicU32::new(0),
        }
    }
}

impl<M: RawMutex> Default for RecorderState<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for starting and stopping recordings and for running the
/// consumer loop. Handles are cheap; make one per task.
pub struct RecordingCoordinator<'a, M: RawMutex, F, const N: usize> {
    state: &'a RecorderState<M>,
    persistence: &'a Persistence<M, F>,
    control: &'a AcquisitionControl<M>,
    ring: &'a SampleRing<M, N>,
}

impl<'a, M, F, const N: usize> RecordingCoordinator<'a, M, F, N>
where
    M: RawMutex,
    F: RecordingFs,
{
    pub fn new(
        state: &'a RecorderState<M>,
        persistence: &'a Persistence<M, F>,
        control: &'a AcquisitionControl<M>,
        ring: &'a SampleRing<M, N>,
    ) -> Self {
        Self {
            state,
            persistence,
            control,
            ring,
        }
    }

    /// Open a new recording and start measuring into it.
    ///
    /// If the acquisition task does not take the start request, the new
    /// recording is closed again and [`CoordinatorError::AcquisitionBusy`]
    /// is returned. Calling this while a recording runs fails without
    /// touching the open one.
    pub async fn start_recording(&self) -> Result<RecordingName, CoordinatorError> {
        let mut current = self.state.current.lock().await;

        let name = self.persistence.create_new_recording().await?;
        if !self.control.start_measurement() {
            warn!("Acquisition busy, abandoning recording {}", name);
            if let Err(e) = self.persistence.close_recording().await {
                error!("Failed to close abandoned recording {}: {}", name, e);
            }
            return Err(CoordinatorError::AcquisitionBusy);
        }

        info!("Recording {} started", name);
        *current = Some(name.clone());
        self.state.lost_records.store(0, Ordering::Relaxed);
        self.state.recording.store(true, Ordering::Release);
        Ok(name)
    }

    /// Stop measuring and close the running recording.
    ///
    /// Returns the closed recording's name, or `None` if nothing was
    /// recording. The recording flag is cleared even if closing fails.
    pub async fn stop_recording(&self) -> Result<Option<RecordingName>, CoordinatorError> {
        let mut current = self.state.current.lock().await;

        let Some(name) = current.take() else {
            warn!("Stop requested, but nothing is recording");
            return Ok(None);
        };
        self.state.recording.store(false, Ordering::Release);

        if !self.control.stop_measurement() {
            error!("Acquisition did not accept the stop request");
        }

        let lost = self.state.lost_records.load(Ordering::Relaxed);
        if lost > 0 {
            warn!("Recording {} lost {} records", name, lost);
        }

        self.persistence.close_recording().await?;
        info!("Recording {} stopped", name);
        Ok(Some(name))
    }

    pub fn is_recording(&self) -> bool {
        self.state.recording.load(Ordering::Acquire)
    }

    /// Items of the current (or last) recording that were not written.
    pub fn lost_records(&self) -> u32 {
        self.state.lost_records.load(Ordering::Relaxed)
    }

    /// Move one item from the ring into the running recording. Items popped
    /// while nothing records are dropped. Returns `false` if the ring was
    /// empty.
    ///
    /// Once storage has failed, items are counted as lost without touching
    /// the card until the recording is stopped.
    pub async fn consume_one(&self) -> bool {
        let mut samples = [0.0f32; MAX_ITEM_SAMPLES];
        let Some(count) = self.ring.pop_samples(&mut samples) else {
            return false;
        };

        let current = self.state.current.lock().await;
        if current.is_none() {
            return true;
        }

        if self.persistence.state() != PersistenceState::Recording {
            self.state.lost_records.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        if let Err(e) = self.persistence.write_record(&samples[..count]).await {
            error!("Failed to write record, dropping the rest of the recording: {}", e);
            self.state.lost_records.fetch_add(1, Ordering::Relaxed);
        }
        true
    }

    /// Consumer loop. Never returns.
    pub async fn run(&self) -> ! {
        loop {
            if !self.consume_one().await {
                Timer::after_millis(CONSUMER_IDLE_MS).await;
            }
        }
    }
}
