//! ADAS1000 register map
//!
//! Addresses, control register bit definitions and the data-word tags found
//! in the top byte of every word streamed during a frame read.

// cSpell: disable

/// Register addresses (7 bits, packed into bits 30:24 of a command word).
pub mod addr {
    pub const NOP: u8 = 0x00;
    pub const ECGCTL: u8 = 0x01;
    pub const LOFFCTL: u8 = 0x02;
    pub const RESPCTL: u8 = 0x03;
    pub const PACECTL: u8 = 0x04;
    pub const CMREFCTL: u8 = 0x05;
    pub const GPIOCTL: u8 = 0x06;
    pub const PACEAMPTH: u8 = 0x07;
    pub const TESTTONE: u8 = 0x08;
    pub const CALDAC: u8 = 0x09;
    pub const FRMCTL: u8 = 0x0A;
    pub const FILTCTL: u8 = 0x0B;
    pub const LOFFUTH: u8 = 0x0C;
    pub const LOFFLTH: u8 = 0x0D;
    pub const PACEEDGETH: u8 = 0x0E;
    pub const PACELVLTH: u8 = 0x0F;
    pub const LADATA: u8 = 0x11;
    pub const LLDATA: u8 = 0x12;
    pub const RADATA: u8 = 0x13;
    pub const V1DATA: u8 = 0x14;
    pub const V2DATA: u8 = 0x15;
    pub const PACEDATA: u8 = 0x1A;
    pub const RESPMAG: u8 = 0x1B;
    pub const RESPPH: u8 = 0x1C;
    pub const LOFF: u8 = 0x1D;
    pub const FRAMES: u8 = 0x40;
    pub const CRC: u8 = 0x41;

    /// Configuration registers dumped to the log after acquisition setup.
    pub const CONFIG_RANGE: core::ops::RangeInclusive<u8> = NOP..=PACELVLTH;
}

/// Command word layout.
pub mod command {
    /// Bit 31 selects a register write.
    pub const WRITE: u32 = 1 << 31;
    pub const ADDRESS_SHIFT: u32 = 24;
    pub const ADDRESS_MASK: u32 = 0x7F;
    pub const VALUE_MASK: u32 = 0x00FF_FFFF;

    /// Writing this word starts continuous frame output.
    pub const CONTINUOUS_READ: u32 = 0x4000_0000;
}

/// Frame header word layout.
pub mod header {
    /// Set on every header word.
    pub const MARKER: u32 = 1 << 31;
    /// Marker plus "not ready": keep polling.
    pub const BUSY: u32 = 0b11 << 30;
    pub const DROPPED_SHIFT: u32 = 28;
    pub const DROPPED_MASK: u32 = 0b11;
    pub const FAULT: u32 = 0b11 << 26;
}

/// ECG control register (ECGCTL).
pub mod ecgctl {
    pub const LAEN: u32 = 1 << 23;
    pub const LLEN: u32 = 1 << 22;
    pub const RAEN: u32 = 1 << 21;
    pub const V1EN: u32 = 1 << 20;
    pub const V2EN: u32 = 1 << 19;
    /// Differential input (cleared = single ended).
    pub const CHCONFIG: u32 = 1 << 10;
    /// Gain bits 9:8, `00` = x1.4.
    pub const GAIN_1_4: u32 = 0b00 << 8;
    pub const VREFBUF: u32 = 1 << 7;
    /// External clock source (cleared = crystal).
    pub const CLKEXT: u32 = 1 << 6;
    pub const MASTER: u32 = 1 << 5;
    pub const GANG: u32 = 1 << 4;
    pub const HP: u32 = 1 << 3;
    pub const CNVEN: u32 = 1 << 2;
    pub const PWREN: u32 = 1 << 1;
    pub const SWRST: u32 = 1 << 0;
}

/// Common-mode, reference and shield drive register (CMREFCTL).
pub mod cmrefctl {
    pub const LACM: u32 = 1 << 23;
    pub const LLCM: u32 = 1 << 22;
    pub const RACM: u32 = 1 << 21;
    pub const DRVCM: u32 = 1 << 3;
    pub const RLDEN: u32 = 1 << 1;
    pub const SHLDEN: u32 = 1 << 0;
}

/// Frame control register (FRMCTL). Field bits disable the field when set.
pub mod frmctl {
    pub const LEAD_I_DIS: u32 = 1 << 23;
    pub const LEAD_II_DIS: u32 = 1 << 22;
    pub const LEAD_III_DIS: u32 = 1 << 21;
    pub const V1_DIS: u32 = 1 << 20;
    pub const V2_DIS: u32 = 1 << 19;
    /// Bits 18:15 are reserved and must be written as ones.
    pub const RESERVED: u32 = 0b1111 << 15;
    pub const PACE_DIS: u32 = 1 << 14;
    pub const RESPM_DIS: u32 = 1 << 13;
    pub const RESPPH_DIS: u32 = 1 << 12;
    pub const LOFF_DIS: u32 = 1 << 11;
    pub const GPIO_DIS: u32 = 1 << 10;
    pub const CRC_DIS: u32 = 1 << 9;
    /// Set = word order may change with the selection (cleared = fixed format).
    pub const ADIS: u32 = 1 << 7;
    /// Repeat the header until data is ready.
    pub const RDYRPT: u32 = 1 << 6;
    /// Digital lead vector format.
    pub const DATAFMT: u32 = 1 << 4;
    /// Skip every other frame.
    pub const SKIP_ALTERNATE: u32 = 0b01 << 2;
    pub const FRMRATE_MASK: u32 = 0b11;
}

/// Data word tags (top byte of each frame word).
pub mod tag {
    pub const GPIO: u8 = 0x06;
    pub const LEAD_I: u8 = super::addr::LADATA;
    pub const LEAD_II: u8 = super::addr::LLDATA;
    pub const LEAD_III: u8 = super::addr::RADATA;
    pub const V1: u8 = super::addr::V1DATA;
    pub const V2: u8 = super::addr::V2DATA;
    pub const PACE: u8 = super::addr::PACEDATA;
    pub const RESP_MAG: u8 = super::addr::RESPMAG;
    pub const RESP_PHASE: u8 = super::addr::RESPPH;
    pub const LEAD_OFF: u8 = super::addr::LOFF;
    pub const CRC: u8 = super::addr::CRC;
}

/// Reference voltage in volts.
pub const VREF: f32 = 1.8;
/// Analog gain matching [`ecgctl::GAIN_1_4`].
pub const GAIN: f32 = 1.4;
/// Upper bound of the serial clock in Hz.
pub const MAX_SCLK_HZ: f32 = 40_000_000.0;
/// Modulator clock used to derive the clock ceiling.
pub const MODULATOR_HZ: f32 = 1_024_000.0;
