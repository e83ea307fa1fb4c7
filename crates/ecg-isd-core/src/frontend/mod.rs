//! ADAS1000 analog front-end driver
//!
//! One [`Adas1000`] drives one chip over a blocking SPI bus with its own
//! chip-select pin. Every transaction is a sequence of 32-bit MSB-first words:
//!
//! | Bits   | Write command      | Read command       |
//! |--------|--------------------|--------------------|
//! | 31     | `1`                | `0`                |
//! | 30:24  | register address   | register address   |
//! | 23:0   | value              | ignored            |
//!
//! A read returns the register in the low 24 bits of the following word.
//! Frames are pulled with [`Adas1000::read_frame`] once continuous read has
//! been started.

pub mod frame;
pub mod regs;

pub use frame::{
    ClockBounds, FieldMask, FrontEndFrame, LEAD_COUNT, SampleRate, decode_lead,
    frame_control_word,
};

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;
use log::{debug, warn};
use thiserror_no_std::Error;

use regs::{addr, command, ecgctl, header};

/// Settle time after a soft reset.
pub const RESET_SETTLE_MS: u32 = 3;

/// Errors raised while talking to the chip.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontEndError<E> {
    #[error("SPI bus error: {0:?}")]
    Bus(E),
    #[error("Chip select pin error")]
    ChipSelect,
    #[error("Frame header not found (got {word:#010x})")]
    HeaderNotFound { word: u32 },
    #[error("Device fault ({dropped_frames} frames dropped)")]
    DeviceFault { dropped_frames: u8 },
}

impl<E> FrontEndError<E> {
    /// Frames the chip reported as dropped alongside this error.
    pub fn dropped_frames(&self) -> u8 {
        match self {
            FrontEndError::DeviceFault { dropped_frames } => *dropped_frames,
            _ => 0,
        }
    }
}

/// Driver for a single ADAS1000 chip.
pub struct Adas1000<SPI, CS> {
    spi: SPI,
    cs: CS,
    fields: FieldMask,
    rate: SampleRate,
    clock: ClockBounds,
}

impl<SPI, CS> Adas1000<SPI, CS>
where
    SPI: SpiBus,
    CS: OutputPin,
{
    /// Take ownership of the bus and chip select. The chip is deselected and
    /// assumed to be in its power-on configuration (no fields, 2 kHz).
    pub fn new(spi: SPI, mut cs: CS) -> Result<Self, FrontEndError<SPI::Error>> {
        cs.set_high().map_err(|_| FrontEndError::ChipSelect)?;

        let fields = FieldMask::NONE;
        let rate = SampleRate::default();
        Ok(Self {
            spi,
            cs,
            fields,
            rate,
            clock: ClockBounds::new(fields, rate),
        })
    }

    /// Read a register. The reply word is returned as clocked in; the
    /// register value sits in its low 24 bits.
    pub fn read_register(&mut self, address: u8) -> Result<u32, FrontEndError<SPI::Error>> {
        let word = ((address as u32) & command::ADDRESS_MASK) << command::ADDRESS_SHIFT;
        self.with_selected(|spi| {
            write_word(spi, word)?;
            read_word(spi)
        })
    }

    pub fn write_register(
        &mut self,
        address: u8,
        value: u32,
    ) -> Result<(), FrontEndError<SPI::Error>> {
        let word = command::WRITE
            | ((address as u32) & command::ADDRESS_MASK) << command::ADDRESS_SHIFT
            | (value & command::VALUE_MASK);
        self.with_selected(|spi| write_word(spi, word))
    }

    /// Soft reset followed by the settle delay.
    pub fn reset(&mut self, delay: &mut impl DelayNs) -> Result<(), FrontEndError<SPI::Error>> {
        self.write_register(addr::ECGCTL, ecgctl::SWRST)?;
        self.nop()?;
        delay.delay_ms(RESET_SETTLE_MS);
        Ok(())
    }

    pub fn nop(&mut self) -> Result<(), FrontEndError<SPI::Error>> {
        self.write_register(addr::NOP, 0)
    }

    pub fn set_sample_rate(&mut self, rate: SampleRate) -> Result<(), FrontEndError<SPI::Error>> {
        self.rate = rate;
        self.update_frame_control()
    }

    pub fn set_fields(&mut self, fields: FieldMask) -> Result<(), FrontEndError<SPI::Error>> {
        self.fields = fields;
        self.update_frame_control()
    }

    /// Start streaming frames.
    pub fn begin_continuous_read(&mut self) -> Result<(), FrontEndError<SPI::Error>> {
        self.with_selected(|spi| write_word(spi, command::CONTINUOUS_READ))
    }

    /// Read one frame into `frame`, returning the number of frames the chip
    /// reports as dropped since the previous one.
    ///
    /// Polls until the chip reports ready. There is no timeout: a chip that
    /// never becomes ready blocks the caller.
    pub fn read_frame(&mut self, frame: &mut FrontEndFrame) -> Result<u8, FrontEndError<SPI::Error>> {
        let data_words = self.fields.count();
        let scale = self.rate.lead_scale();

        self.with_selected(|spi| {
            let mut word = read_word(spi)?;
            while word & header::MARKER == 0 {
                word = read_word(spi)?;
            }
            while word & header::BUSY == header::BUSY {
                word = read_word(spi)?;
            }
            if word & header::MARKER == 0 {
                return Err(FrontEndError::HeaderNotFound { word });
            }

            let dropped_frames = ((word >> header::DROPPED_SHIFT) & header::DROPPED_MASK) as u8;
            if word & header::FAULT == header::FAULT {
                return Err(FrontEndError::DeviceFault { dropped_frames });
            }

            frame.updated = FieldMask::NONE;
            for _ in 0..data_words {
                let word = read_word(spi)?;
                if !frame.apply_word(word, scale) {
                    warn!("Unhandled frame word: {:#010x}", word);
                }
            }

            Ok(dropped_frames)
        })
    }

    pub fn fields(&self) -> FieldMask {
        self.fields
    }

    pub fn sample_rate(&self) -> SampleRate {
        self.rate
    }

    /// Serial clock range valid for the current fields and rate.
    pub fn clock_bounds(&self) -> ClockBounds {
        self.clock
    }

    /// Give back the bus and chip select.
    pub fn release(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }

    fn update_frame_control(&mut self) -> Result<(), FrontEndError<SPI::Error>> {
        let word = frame_control_word(self.fields, self.rate);
        debug!("FRMCTL <- {:#08x}", word);
        self.write_register(addr::FRMCTL, word)?;
        self.clock = ClockBounds::new(self.fields, self.rate);
        Ok(())
    }

    /// Run `op` with the chip selected. The chip is deselected afterwards
    /// whether or not `op` failed.
    fn with_selected<R>(
        &mut self,
        op: impl FnOnce(&mut SPI) -> Result<R, FrontEndError<SPI::Error>>,
    ) -> Result<R, FrontEndError<SPI::Error>> {
        self.cs.set_low().map_err(|_| FrontEndError::ChipSelect)?;
        let result = op(&mut self.spi);
        let flushed = self.spi.flush().map_err(FrontEndError::Bus);
        self.cs.set_high().map_err(|_| FrontEndError::ChipSelect)?;

        let value = result?;
        flushed?;
        Ok(value)
    }
}

fn write_word<SPI: SpiBus>(spi: &mut SPI, word: u32) -> Result<(), FrontEndError<SPI::Error>> {
    spi.write(&word.to_be_bytes()).map_err(FrontEndError::Bus)
}

/// Clock in one word while sending zeros.
fn read_word<SPI: SpiBus>(spi: &mut SPI) -> Result<u32, FrontEndError<SPI::Error>> {
    let mut buf = [0u8; 4];
    spi.transfer_in_place(&mut buf).map_err(FrontEndError::Bus)?;
    Ok(u32::from_be_bytes(buf))
}
