//! ECG acquisition task
//!
//! [`Acquisition`] owns the front-end drivers and turns control messages into
//! chip commands. While measuring it reads one frame per tick and pushes the
//! lead voltages into the shared [`SampleRing`]. A full ring drops the frame;
//! the loss only shows up in the missed-frame counters and the status LED.

use embassy_futures::yield_now;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{OutputPin, PinState};
use embedded_hal::spi::SpiBus;
use log::{debug, error, info, warn};

use crate::config::AcquisitionConfig;
use crate::frontend::regs::{addr, cmrefctl, ecgctl};
use crate::frontend::{Adas1000, FrontEndError, FrontEndFrame};
use crate::ring_buffer::SampleRing;

/// Pending control messages the acquisition task accepts.
pub const CONTROL_QUEUE_CAPACITY: usize = 5;

/// Pause after configuration before the first conversion.
pub const CONFIGURE_SETTLE_MS: u32 = 500;

/// Initial ECG bus clock, used until the chips are configured.
pub const INITIAL_BUS_CLOCK_HZ: u32 = 2048 * 13 * 32;

/// Common-mode, right-leg drive and shield setup for the primary chip.
const CMREFCTL_VALUE: u32 = cmrefctl::LACM
    | cmrefctl::LLCM
    | cmrefctl::RACM
    | cmrefctl::DRVCM
    | cmrefctl::RLDEN
    | cmrefctl::SHLDEN;

/// LA, LL and RA enabled, V1/V2 off, differential, x1.4, crystal, master,
/// single chip, high performance, converting and powered.
const ECGCTL_VALUE: u32 = ecgctl::LAEN
    | ecgctl::LLEN
    | ecgctl::RAEN
    | ecgctl::CHCONFIG
    | ecgctl::GAIN_1_4
    | ecgctl::VREFBUF
    | ecgctl::MASTER
    | ecgctl::HP
    | ecgctl::CNVEN
    | ecgctl::PWREN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Read a single frame outside of continuous measurement.
    Read,
    StartRecording,
    StopRecording,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Measuring,
}

/// Sending side of the acquisition control queue.
pub struct AcquisitionControl<M: RawMutex> {
    queue: Channel<M, ControlMessage, CONTROL_QUEUE_CAPACITY>,
}

impl<M: RawMutex> AcquisitionControl<M> {
    pub const fn new() -> Self {
        Self {
            queue: Channel::new(),
        }
    }

    /// Queue a start. Returns `false` if the queue is full; try again later.
    pub fn start_measurement(&self) -> bool {
        self.send(ControlMessage::StartRecording)
    }

    /// Queue a stop. Returns `false` if the queue is full; try again later.
    pub fn stop_measurement(&self) -> bool {
        self.send(ControlMessage::StopRecording)
    }

    /// Queue a single frame read.
    pub fn request_read(&self) -> bool {
        self.send(ControlMessage::Read)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    fn send(&self, message: ControlMessage) -> bool {
        match self.queue.try_send(message) {
            Ok(()) => true,
            Err(_) => {
                warn!("Acquisition control queue full, dropping {:?}", message);
                false
            }
        }
    }

    fn try_next(&self) -> Option<ControlMessage> {
        self.queue.try_receive().ok()
    }

    async fn next(&self) -> ControlMessage {
        self.queue.receive().await
    }
}

impl<M: RawMutex> Default for AcquisitionControl<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// The acquisition task state: drivers, status LED and counters.
pub struct Acquisition<'a, M, SPI, CS, LED, const N: usize>
where
    M: RawMutex,
{
    control: &'a AcquisitionControl<M>,
    ring: Option<&'a SampleRing<M, N>>,
    primary: Adas1000<SPI, CS>,
    secondary: Option<Adas1000<SPI, CS>>,
    led: LED,
    state: AcquisitionState,
    frame: FrontEndFrame,
    /// Frames lost since the last frame that made it into the ring.
    missed_frames: u32,
    total_missed_frames: u32,
}

impl<'a, M, SPI, CS, LED, const N: usize> Acquisition<'a, M, SPI, CS, LED, N>
where
    M: RawMutex,
    SPI: SpiBus,
    CS: OutputPin,
    LED: OutputPin,
{
    pub fn new(
        control: &'a AcquisitionControl<M>,
        primary: Adas1000<SPI, CS>,
        secondary: Option<Adas1000<SPI, CS>>,
        mut led: LED,
    ) -> Self {
        let _ = led.set_low();
        Self {
            control,
            ring: None,
            primary,
            secondary,
            led,
            state: AcquisitionState::Idle,
            frame: FrontEndFrame::new(),
            missed_frames: 0,
            total_missed_frames: 0,
        }
    }

    /// Attach the ring the samples go to. Without one, frames are decoded
    /// and discarded.
    pub fn set_ring_buffer(&mut self, ring: &'a SampleRing<M, N>) {
        self.ring = Some(ring);
    }

    /// Reset and configure the chips, then dump their configuration.
    ///
    /// `set_bus_clock` is called with the serial clock both chips can share
    /// before the analog setup is written. Returns that clock.
    pub fn configure(
        &mut self,
        config: &AcquisitionConfig,
        delay: &mut impl DelayNs,
        set_bus_clock: impl FnOnce(u32),
    ) -> Result<u32, FrontEndError<SPI::Error>> {
        info!("Setting up ADAS1000");
        self.primary.reset(delay)?;
        self.primary.set_fields(config.fields)?;
        self.primary.set_sample_rate(config.sample_rate)?;
        if let Some(secondary) = self.secondary.as_mut() {
            secondary.set_sample_rate(config.sample_rate)?;
        }

        let bus_clock_hz = self.bus_clock_hz();
        set_bus_clock(bus_clock_hz);
        info!("Serial clock rate: {} Hz", bus_clock_hz);

        self.primary.write_register(addr::CMREFCTL, CMREFCTL_VALUE)?;
        self.primary.write_register(addr::ECGCTL, ECGCTL_VALUE)?;

        info!("Dumping ecg0 registers:");
        dump_registers(&mut self.primary)?;
        if let Some(secondary) = self.secondary.as_mut() {
            info!("Dumping ecg1 registers:");
            dump_registers(secondary)?;
        }

        delay.delay_ms(CONFIGURE_SETTLE_MS);
        Ok(bus_clock_hz)
    }

    /// Sum of the chips' minimum clocks, capped by each chip's maximum.
    pub fn bus_clock_hz(&self) -> u32 {
        let primary = self.primary.clock_bounds();
        let mut hz = primary.min_hz;
        let mut ceiling = primary.max_hz;
        if let Some(secondary) = &self.secondary {
            let bounds = secondary.clock_bounds();
            hz += bounds.min_hz;
            ceiling = ceiling.min(bounds.max_hz);
        }
        hz.min(ceiling) as u32
    }

    /// Run forever. Waits for a message while idle and streams frames while
    /// measuring, yielding to the executor between frames.
    pub async fn run(&mut self) -> ! {
        loop {
            match self.state {
                AcquisitionState::Idle => {
                    let message = self.control.next().await;
                    self.handle(message);
                }
                AcquisitionState::Measuring => {
                    self.tick();
                    yield_now().await;
                }
            }
        }
    }

    /// One loop iteration: service a pending message, or read a frame if
    /// measuring.
    pub fn tick(&mut self) {
        match self.control.try_next() {
            Some(message) => self.handle(message),
            None if self.state == AcquisitionState::Measuring => self.measure(),
            None => {}
        }
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    /// The most recently decoded frame.
    pub fn last_frame(&self) -> &FrontEndFrame {
        &self.frame
    }

    /// Frames lost since the last stored frame.
    pub fn missed_frames(&self) -> u32 {
        self.missed_frames
    }

    /// Frames lost since start-up.
    pub fn total_missed_frames(&self) -> u32 {
        self.total_missed_frames
    }

    fn handle(&mut self, message: ControlMessage) {
        debug!("Acquisition message: {:?}", message);
        match message {
            ControlMessage::Read => {
                self.missed_frames = 0;
                match self.primary.read_frame(&mut self.frame) {
                    Ok(dropped) => self.miss(dropped as u32),
                    Err(e) => {
                        error!("Single frame read failed: {:?}", e);
                        self.miss(1 + e.dropped_frames() as u32);
                    }
                }
            }
            ControlMessage::StartRecording => match self.primary.begin_continuous_read() {
                Ok(()) => {
                    info!("Measurement started");
                    self.state = AcquisitionState::Measuring;
                }
                Err(e) => error!("Failed to start continuous read: {:?}", e),
            },
            ControlMessage::StopRecording => {
                if let Err(e) = self.primary.nop() {
                    error!("Failed to stop continuous read: {:?}", e);
                }
                info!("Measurement stopped");
                self.state = AcquisitionState::Idle;
            }
        }
    }

    fn measure(&mut self) {
        let decoded = match self.primary.read_frame(&mut self.frame) {
            Ok(dropped) => {
                self.miss(dropped as u32);
                true
            }
            Err(e) => {
                debug!("Frame read failed: {:?}", e);
                self.miss(1 + e.dropped_frames() as u32);
                false
            }
        };

        let _ = self.led.set_state(PinState::from(self.missed_frames > 0));

        if !decoded {
            return;
        }

        let Some(ring) = self.ring else {
            return;
        };

        if ring.push_samples(&self.frame.leads) {
            if self.missed_frames > 0 {
                warn!("Missed {} frames", self.missed_frames);
                self.missed_frames = 0;
            }
        } else {
            self.miss(1);
        }
    }

    fn miss(&mut self, frames: u32) {
        self.missed_frames = self.missed_frames.saturating_add(frames);
        self.total_missed_frames = self.total_missed_frames.saturating_add(frames);
    }
}

fn dump_registers<SPI, CS>(chip: &mut Adas1000<SPI, CS>) -> Result<(), FrontEndError<SPI::Error>>
where
    SPI: SpiBus,
    CS: OutputPin,
{
    for register in addr::CONFIG_RANGE {
        let value = chip.read_register(register)?;
        info!("@{:02x}: {:08x}", register, value);
    }
    Ok(())
}
