//! The system context
//!
//! One [`SystemContext`] is built at start-up and lives for the rest of the
//! program (a `StaticCell` on the device). Every task gets a reference to it
//! and builds the handles it needs from there; there are no other globals.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

use crate::acquisition::{Acquisition, AcquisitionControl};
use crate::coordinator::{RecorderState, RecordingCoordinator};
use crate::frontend::Adas1000;
use crate::persistence::{Persistence, RecordingFs};
use crate::ring_buffer::{RING_BUFFER_BYTES, SampleRing};

pub struct SystemContext<M: RawMutex, F> {
    pub persistence: Persistence<M, F>,
    pub control: AcquisitionControl<M>,
    pub ring: SampleRing<M, RING_BUFFER_BYTES>,
    recorder: RecorderState<M>,
}

impl<M: RawMutex, F: RecordingFs> SystemContext<M, F> {
    /// Mount the storage and set up the queues.
    pub fn new(fs: F) -> Self {
        Self {
            persistence: Persistence::new(fs),
            control: AcquisitionControl::new(),
            ring: SampleRing::new(),
            recorder: RecorderState::new(),
        }
    }

    pub fn coordinator(&self) -> RecordingCoordinator<'_, M, F, RING_BUFFER_BYTES> {
        RecordingCoordinator::new(&self.recorder, &self.persistence, &self.control, &self.ring)
    }

    /// Acquisition task state feeding this context's ring.
    pub fn acquisition<SPI, CS, LED>(
        &self,
        primary: Adas1000<SPI, CS>,
        secondary: Option<Adas1000<SPI, CS>>,
        led: LED,
    ) -> Acquisition<'_, M, SPI, CS, LED, RING_BUFFER_BYTES>
    where
        SPI: SpiBus,
        CS: OutputPin,
        LED: OutputPin,
    {
        let mut acquisition = Acquisition::new(&self.control, primary, secondary, led);
        acquisition.set_ring_buffer(&self.ring);
        acquisition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::AcquisitionState;
    use crate::frontend::{FieldMask, SampleRate};
    use crate::persistence::{RamFs, ReadOutcome};
    use crate::testing::{FakePin, ScriptedBus, lead_frame};
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

    #[test]
    fn test_frames_end_up_in_the_recording() {
        block_on(async {
            let context = SystemContext::<CriticalSectionRawMutex, _>::new(RamFs::new());
            let bus = ScriptedBus::new();
            let mut primary = Adas1000::new(bus.clone(), FakePin::new()).unwrap();
            primary.set_fields(FieldMask::LEADS).unwrap();
            let mut acquisition = context.acquisition(primary, None, FakePin::new());
            let coordinator = context.coordinator();

            let name = coordinator.start_recording().await.unwrap();
            acquisition.tick();
            assert_eq!(acquisition.state(), AcquisitionState::Measuring);

            for i in 0..3 {
                bus.push_replies(&lead_frame(&[i, i + 1, i + 2, i + 3, i + 4]));
                acquisition.tick();
                assert!(coordinator.consume_one().await);
            }

            assert_eq!(coordinator.stop_recording().await, Ok(Some(name.clone())));
            acquisition.tick();
            assert_eq!(acquisition.state(), AcquisitionState::Idle);

            let scale = SampleRate::Khz2.lead_scale();
            let persistence = &context.persistence;
            persistence.open_recording(&name).await.unwrap();
            let mut buf = [0.0f32; 8];
            for i in 0..3u32 {
                assert_eq!(persistence.read_record(&mut buf).await, Ok(ReadOutcome::Record(5)));
                assert_eq!(buf[0], i as f32 * scale);
                assert_eq!(buf[4], (i + 4) as f32 * scale);
            }
            assert_eq!(persistence.read_record(&mut buf).await, Ok(ReadOutcome::EndOfStream));
            persistence.close_recording().await.unwrap();
        });
    }
}
