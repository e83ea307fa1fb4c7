//! Desktop simulator for the ecg-isd acquisition and recording pipeline.
//!
//! Runs the real acquisition task, sample ring, coordinator and persistence
//! from ecg-isd-core against a simulated ADAS1000 and an in-memory card.
//! The simulated chip produces a synthetic ECG at the configured frame rate
//! and reports frames the reader was too slow for as dropped.
//!
//! # Usage
//!
//! ```text
//! ecg-isd-simulator [SECONDS]
//! ```
//!
//! Records for `SECONDS` (default 2), then prints every recording as CSV on
//! stdout. Logs go to stderr; set `RUST_LOG` to change the level.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::f32::consts::PI;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use embassy_futures::block_on;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Delay;
use embedded_hal::digital::{self, OutputPin};
use embedded_hal::spi::{self, SpiBus};
use log::{error, info, warn};

use ecg_isd_core::acquisition::AcquisitionState;
use ecg_isd_core::context::SystemContext;
use ecg_isd_core::export;
use ecg_isd_core::frontend::regs::{addr, command, ecgctl, frmctl, header, tag};
use ecg_isd_core::frontend::{Adas1000, SampleRate};
use ecg_isd_core::persistence::RamFs;
use ecg_isd_core::shared_spi_bus::SharedSpiBus;

// ---------------------------------------------------------------------------
// Simulation constants
// ---------------------------------------------------------------------------

/// Recording length when no argument is given.
const DEFAULT_RECORDING_SECS: f32 = 2.0;

/// Simulated heart rate.
const HEART_RATE_BPM: f32 = 72.0;

/// Per-lead amplitude relative to lead I.
const LEAD_GAIN: [f32; 5] = [1.0, 1.3, 0.3, 0.8, 1.1];

/// Frame words in chip order: FRMCTL disable bit and data tag.
const FRAME_LAYOUT: [(u32, u8); 11] = [
    (frmctl::LEAD_I_DIS, tag::LEAD_I),
    (frmctl::LEAD_II_DIS, tag::LEAD_II),
    (frmctl::LEAD_III_DIS, tag::LEAD_III),
    (frmctl::V1_DIS, tag::V1),
    (frmctl::V2_DIS, tag::V2),
    (frmctl::PACE_DIS, tag::PACE),
    (frmctl::RESPM_DIS, tag::RESP_MAG),
    (frmctl::RESPPH_DIS, tag::RESP_PHASE),
    (frmctl::LOFF_DIS, tag::LEAD_OFF),
    (frmctl::GPIO_DIS, tag::GPIO),
    (frmctl::CRC_DIS, tag::CRC),
];

const BUSY_HEADER: u32 = header::BUSY;

// ---------------------------------------------------------------------------
// Simulated front-end
// ---------------------------------------------------------------------------

/// One ADAS1000 as seen from the SPI bus.
struct SimulatedAdas1000 {
    registers: [u32; 0x80],
    /// Reply to the read command of the previous word.
    pending_reply: Option<u32>,
    streaming: bool,
    frame: VecDeque<u32>,
    next_frame_at: Instant,
    /// Simulated time of the next frame, in seconds.
    sample_time: f32,
}

impl SimulatedAdas1000 {
    fn new() -> Self {
        Self {
            registers: [0; 0x80],
            pending_reply: None,
            streaming: false,
            frame: VecDeque::new(),
            next_frame_at: Instant::now(),
            sample_time: 0.0,
        }
    }

    fn sample_rate(&self) -> SampleRate {
        let bits = self.registers[addr::FRMCTL as usize] & frmctl::FRMRATE_MASK;
        [
            SampleRate::Khz2,
            SampleRate::Khz16,
            SampleRate::Khz128,
            SampleRate::Hz31_25,
        ]
        .into_iter()
        .find(|rate| rate.frame_rate_bits() == bits)
        .unwrap_or_default()
    }

    fn frame_period(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.sample_rate().hz())
    }

    fn command(&mut self, word: u32) {
        if word == command::CONTINUOUS_READ {
            self.streaming = true;
            self.frame.clear();
            self.next_frame_at = Instant::now() + self.frame_period();
            return;
        }

        let address = ((word >> command::ADDRESS_SHIFT) & command::ADDRESS_MASK) as usize;
        if word & command::WRITE == 0 {
            self.pending_reply = Some((address as u32) << command::ADDRESS_SHIFT | self.registers[address]);
            return;
        }

        let value = word & command::VALUE_MASK;
        match address as u8 {
            addr::NOP => self.streaming = false,
            addr::ECGCTL if value & ecgctl::SWRST != 0 => {
                *self = Self::new();
            }
            _ => self.registers[address] = value,
        }
    }

    fn next_reply(&mut self) -> u32 {
        if let Some(reply) = self.pending_reply.take() {
            return reply;
        }
        if !self.streaming {
            return 0;
        }
        if let Some(word) = self.frame.pop_front() {
            return word;
        }

        let now = Instant::now();
        if now < self.next_frame_at {
            return BUSY_HEADER;
        }

        let period = self.frame_period();
        let late = ((now - self.next_frame_at).as_secs_f32() / period.as_secs_f32()) as u32;
        let dropped = late.min(header::DROPPED_MASK);
        self.sample_time += (late + 1) as f32 * period.as_secs_f32();
        self.next_frame_at += period * (late + 1);

        self.build_frame();
        header::MARKER | dropped << header::DROPPED_SHIFT
    }

    fn build_frame(&mut self) {
        let frame_control = self.registers[addr::FRMCTL as usize];
        let scale = self.sample_rate().lead_scale();
        let heart = ecg_waveform(self.sample_time);

        for (disable, word_tag) in FRAME_LAYOUT {
            if frame_control & disable != 0 {
                continue;
            }
            let value = match word_tag {
                tag::LEAD_I..=tag::V2 => {
                    let lead = (word_tag - tag::LEAD_I) as usize;
                    lead_counts(heart * LEAD_GAIN[lead], scale)
                }
                _ => 0,
            };
            self.frame.push_back((word_tag as u32) << 24 | value);
        }
    }

    fn transfer_words(&mut self, words: &mut [u8]) {
        for chunk in words.chunks_exact_mut(4) {
            let incoming = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let reply = self.next_reply();
            // Zero words only clock data out.
            if incoming != 0 {
                self.command(incoming);
            }
            chunk.copy_from_slice(&reply.to_be_bytes());
        }
    }
}

/// Volts of a P-QRS-T cycle at time `t`.
fn ecg_waveform(t: f32) -> f32 {
    let beat = 60.0 / HEART_RATE_BPM;
    let phase = (t % beat) / beat;
    let bump = |center: f32, width: f32, height: f32| {
        height * (-((phase - center) / width).powi(2)).exp()
    };

    bump(0.15, 0.03, 0.15e-3) - bump(0.27, 0.01, 0.1e-3) + bump(0.30, 0.012, 1.2e-3)
        - bump(0.33, 0.01, 0.25e-3)
        + bump(0.55, 0.06, 0.3e-3)
        + 0.02e-3 * (2.0 * PI * 0.3 * t).sin()
}

/// Encode volts as a 24-bit two's-complement sample.
fn lead_counts(volts: f32, scale: f32) -> u32 {
    ((volts / scale).round() as i32 as u32) & command::VALUE_MASK
}

/// The ECG bus with both chips on it. Words go to the chip whose chip
/// select was pulled low last.
struct SimulatedEcgBus {
    chips: [SimulatedAdas1000; 2],
    selected: Arc<AtomicUsize>,
}

impl SimulatedEcgBus {
    fn new() -> Self {
        Self {
            chips: [SimulatedAdas1000::new(), SimulatedAdas1000::new()],
            selected: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Chip select line for chip `index`.
    fn chip_select(&self, index: usize) -> ChipSelect {
        ChipSelect {
            index,
            selected: self.selected.clone(),
        }
    }

    fn chip(&mut self) -> &mut SimulatedAdas1000 {
        let index = self.selected.load(Ordering::Relaxed);
        &mut self.chips[index]
    }
}

impl spi::ErrorType for SimulatedEcgBus {
    type Error = Infallible;
}

impl SpiBus for SimulatedEcgBus {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        words.fill(0);
        self.chip().transfer_words(words);
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        let chip = self.chip();
        for chunk in words.chunks_exact(4) {
            chip.command(u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        let len = read.len().min(write.len());
        read[..len].copy_from_slice(&write[..len]);
        self.chip().transfer_words(read);
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        self.chip().transfer_words(words);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pins
// ---------------------------------------------------------------------------

/// Chip select routing bus traffic to one simulated chip.
struct ChipSelect {
    index: usize,
    selected: Arc<AtomicUsize>,
}

impl digital::ErrorType for ChipSelect {
    type Error = Infallible;
}

impl OutputPin for ChipSelect {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.selected.store(self.index, Ordering::Relaxed);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Status LED counting how often it was switched on.
#[derive(Clone, Default)]
struct StatusLed {
    on: bool,
    flashes: Arc<AtomicUsize>,
}

impl digital::ErrorType for StatusLed {
    type Error = Infallible;
}

impl OutputPin for StatusLed {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.on = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        if !self.on {
            self.flashes.fetch_add(1, Ordering::Relaxed);
        }
        self.on = true;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let seconds = match std::env::args().nth(1) {
        Some(arg) => match arg.parse::<f32>() {
            Ok(seconds) if seconds > 0.0 => seconds,
            _ => {
                error!("Invalid recording length {:?}", arg);
                std::process::exit(2);
            }
        },
        None => DEFAULT_RECORDING_SECS,
    };

    let context = SystemContext::<CriticalSectionRawMutex, _>::new(RamFs::new());
    let config = match block_on(context.persistence.load_config()) {
        Ok(config) => config,
        Err(e) => {
            warn!("Using default settings: {}", e);
            Default::default()
        }
    };
    if let Err(e) = block_on(context.persistence.store_config(&config)) {
        warn!("Failed to store settings: {}", e);
    }

    let simulated = SimulatedEcgBus::new();
    let cs0 = simulated.chip_select(0);
    let cs1 = simulated.chip_select(1);
    let ecg_bus = Mutex::<CriticalSectionRawMutex, _>::new(RefCell::new(simulated));
    let primary = match Adas1000::new(SharedSpiBus::new(&ecg_bus), cs0) {
        Ok(chip) => chip,
        Err(e) => {
            error!("Failed to set up ecg0: {}", e);
            return;
        }
    };
    let secondary = if config.acquisition.secondary_enabled {
        Adas1000::new(SharedSpiBus::new(&ecg_bus), cs1).ok()
    } else {
        None
    };

    let led = StatusLed::default();
    let flashes = led.flashes.clone();
    let mut acquisition = context.acquisition(primary, secondary, led);
    if let Err(e) = acquisition.configure(&config.acquisition, &mut Delay, |hz| {
        info!("ECG bus clock would be {} Hz", hz)
    }) {
        error!("Front-end configuration failed: {}", e);
        return;
    }

    let coordinator = context.coordinator();
    let stop = AtomicBool::new(false);

    let missed = thread::scope(|scope| {
        let acquisition_thread = scope.spawn(|| {
            while !stop.load(Ordering::Relaxed) {
                acquisition.tick();
                if acquisition.state() == AcquisitionState::Idle {
                    thread::sleep(Duration::from_millis(1));
                }
            }
            acquisition.total_missed_frames()
        });

        scope.spawn(|| {
            let coordinator = context.coordinator();
            while !stop.load(Ordering::Relaxed) {
                if !block_on(coordinator.consume_one()) {
                    thread::sleep(Duration::from_millis(1));
                }
            }
        });

        match block_on(coordinator.start_recording()) {
            Ok(name) => {
                info!("Recording {} for {} s", name, seconds);
                thread::sleep(Duration::from_secs_f32(seconds));
                if let Err(e) = block_on(coordinator.stop_recording()) {
                    error!("Failed to stop recording: {}", e);
                }
            }
            Err(e) => error!("Failed to start recording: {}", e),
        }

        stop.store(true, Ordering::Relaxed);
        acquisition_thread.join().unwrap_or_default()
    });

    info!(
        "Missed {} frames, status LED lit {} times",
        missed,
        flashes.load(Ordering::Relaxed)
    );

    let recordings = match block_on(context.persistence.list_recordings()) {
        Ok(recordings) => recordings,
        Err(e) => {
            error!("Failed to list recordings: {}", e);
            return;
        }
    };

    for recording in recordings {
        info!("{}: {} bytes", recording.name, recording.size);
        let mut csv = String::new();
        match block_on(export::write_csv(&context.persistence, &recording.name, &mut csv)) {
            Ok(records) => {
                println!("# {} ({} records)", recording.name, records);
                print!("{}", csv);
            }
            Err(e) => error!("Failed to export {}: {}", recording.name, e),
        }
    }
}
