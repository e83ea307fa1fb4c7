//! Frame layout: field selection, output rate and the decoded frame

use core::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use super::regs::{self, frmctl};

/// Number of lead voltages a frame can carry (I, II, III, V1, V2).
pub const LEAD_COUNT: usize = 5;

/// Selection of fields the chip transmits in every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FieldMask(u16);

impl FieldMask {
    pub const NONE: Self = Self(0);
    pub const LEAD_I: Self = Self(1 << 15);
    pub const LEAD_II: Self = Self(1 << 14);
    pub const LEAD_III: Self = Self(1 << 13);
    pub const V1: Self = Self(1 << 12);
    pub const V2: Self = Self(1 << 11);
    pub const PACE: Self = Self(1 << 5);
    pub const RESP_MAGNITUDE: Self = Self(1 << 4);
    pub const RESP_PHASE: Self = Self(1 << 3);
    pub const LEAD_OFF: Self = Self(1 << 2);
    pub const GPIO: Self = Self(1 << 1);
    pub const CRC: Self = Self(1 << 0);

    /// All five lead voltages.
    pub const LEADS: Self = Self(
        Self::LEAD_I.0 | Self::LEAD_II.0 | Self::LEAD_III.0 | Self::V1.0 | Self::V2.0,
    );

    /// Every selectable field.
    pub const ALL: Self = Self(
        Self::LEADS.0
            | Self::PACE.0
            | Self::RESP_MAGNITUDE.0
            | Self::RESP_PHASE.0
            | Self::LEAD_OFF.0
            | Self::GPIO.0
            | Self::CRC.0,
    );

    /// Lead fields in the order they occupy [`FrontEndFrame::leads`].
    pub const LEAD_ORDER: [Self; LEAD_COUNT] =
        [Self::LEAD_I, Self::LEAD_II, Self::LEAD_III, Self::V1, Self::V2];

    /// Build a mask from raw bits, discarding bits that name no field.
    pub const fn from_bits_truncate(bits: u16) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of selected fields, i.e. data words per frame.
    pub const fn count(self) -> usize {
        (self.0 & Self::ALL.0).count_ones() as usize
    }

    /// Words clocked out per frame: the data words plus the busy and ready headers.
    pub const fn words_per_frame(self) -> usize {
        self.count() + 2
    }
}

impl BitOr for FieldMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for FieldMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Frame output rate of the chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SampleRate {
    Hz31_25,
    #[default]
    Khz2,
    Khz16,
    Khz128,
}

impl SampleRate {
    pub const fn hz(self) -> f32 {
        match self {
            SampleRate::Hz31_25 => 31.25,
            SampleRate::Khz2 => 2_000.0,
            SampleRate::Khz16 => 16_000.0,
            SampleRate::Khz128 => 128_000.0,
        }
    }

    /// Serial word width at this rate.
    pub const fn bits_per_word(self) -> u32 {
        match self {
            SampleRate::Khz128 => 16,
            _ => 32,
        }
    }

    /// Resolution of the lead samples at this rate.
    pub const fn sample_bits(self) -> u32 {
        match self {
            SampleRate::Khz128 => 16,
            _ => 24,
        }
    }

    /// FRMRATE bits 1:0.
    pub const fn frame_rate_bits(self) -> u32 {
        match self {
            SampleRate::Khz2 => 0b00,
            SampleRate::Khz16 => 0b01,
            SampleRate::Khz128 => 0b10,
            SampleRate::Hz31_25 => 0b11,
        }
    }

    /// Volts per LSB for lead samples.
    pub fn lead_scale(self) -> f32 {
        let full_scale = ((1u32 << self.sample_bits()) - 1) as f32;
        (4.0 * regs::VREF / regs::GAIN) / full_scale
    }
}

/// Serial clock range the chip accepts for a field selection and rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockBounds {
    pub min_hz: f32,
    pub max_hz: f32,
}

impl ClockBounds {
    pub fn new(fields: FieldMask, rate: SampleRate) -> Self {
        let words = fields.words_per_frame() as f32;
        let bits = rate.bits_per_word() as f32;
        // High-performance mode doubles the ceiling; the driver runs without it.
        let high_performance = 0.0;

        let min_hz = rate.hz() * words * bits;
        let max_hz = (regs::MODULATOR_HZ * (1.0 + high_performance) * words * bits / 3.0)
            .min(regs::MAX_SCLK_HZ);

        Self { min_hz, max_hz }
    }
}

/// Compute the FRMCTL value for a field selection and output rate.
pub fn frame_control_word(fields: FieldMask, rate: SampleRate) -> u32 {
    const DISABLE_BITS: [(FieldMask, u32); 11] = [
        (FieldMask::LEAD_I, frmctl::LEAD_I_DIS),
        (FieldMask::LEAD_II, frmctl::LEAD_II_DIS),
        (FieldMask::LEAD_III, frmctl::LEAD_III_DIS),
        (FieldMask::V1, frmctl::V1_DIS),
        (FieldMask::V2, frmctl::V2_DIS),
        (FieldMask::PACE, frmctl::PACE_DIS),
        (FieldMask::RESP_MAGNITUDE, frmctl::RESPM_DIS),
        (FieldMask::RESP_PHASE, frmctl::RESPPH_DIS),
        (FieldMask::LEAD_OFF, frmctl::LOFF_DIS),
        (FieldMask::GPIO, frmctl::GPIO_DIS),
        (FieldMask::CRC, frmctl::CRC_DIS),
    ];

    let mut word = frmctl::RESERVED;
    for (field, disable) in DISABLE_BITS {
        if !fields.contains(field) {
            word |= disable;
        }
    }

    // Fixed frame format leaves ADIS cleared.
    word |= frmctl::RDYRPT | frmctl::DATAFMT | frmctl::SKIP_ALTERNATE;
    word | rate.frame_rate_bits()
}

/// Decode a 24-bit two's-complement lead sample into volts.
pub fn decode_lead(raw: u32, scale: f32) -> f32 {
    let raw = raw & 0x00FF_FFFF;
    if raw & 0x0080_0000 != 0 {
        -((((raw ^ 0x00FF_FFFF) + 1) as f32) * scale)
    } else {
        raw as f32 * scale
    }
}

/// One decoded frame. Reused across reads; `updated` says which fields the
/// last read filled in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrontEndFrame {
    pub updated: FieldMask,
    /// Lead voltages in [`FieldMask::LEAD_ORDER`].
    pub leads: [f32; LEAD_COUNT],
    pub pace: u32,
    pub respiration_magnitude: u32,
    pub respiration_phase: u32,
    pub lead_off: u32,
    pub gpio: u32,
    pub crc: u32,
}

impl FrontEndFrame {
    pub const fn new() -> Self {
        Self {
            updated: FieldMask::NONE,
            leads: [0.0; LEAD_COUNT],
            pace: 0,
            respiration_magnitude: 0,
            respiration_phase: 0,
            lead_off: 0,
            gpio: 0,
            crc: 0,
        }
    }

    /// Store one data word by its tag. Returns `false` for an unknown tag.
    pub(crate) fn apply_word(&mut self, word: u32, scale: f32) -> bool {
        let value = word & 0x00FF_FFFF;
        let (field, slot): (FieldMask, &mut u32) = match (word >> 24) as u8 {
            regs::tag::GPIO => (FieldMask::GPIO, &mut self.gpio),
            regs::tag::PACE => (FieldMask::PACE, &mut self.pace),
            regs::tag::RESP_MAG => (FieldMask::RESP_MAGNITUDE, &mut self.respiration_magnitude),
            regs::tag::RESP_PHASE => (FieldMask::RESP_PHASE, &mut self.respiration_phase),
            regs::tag::LEAD_OFF => (FieldMask::LEAD_OFF, &mut self.lead_off),
            regs::tag::CRC => (FieldMask::CRC, &mut self.crc),
            tag @ regs::tag::LEAD_I..=regs::tag::V2 => {
                let index = (tag - regs::tag::LEAD_I) as usize;
                self.leads[index] = decode_lead(value, scale);
                self.updated |= FieldMask::LEAD_ORDER[index];
                return true;
            }
            _ => return false,
        };

        *slot = value;
        self.updated |= field;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_words_per_frame_for_every_mask() {
        for bits in 0..=u16::MAX {
            let mask = FieldMask::from_bits_truncate(bits);
            assert_eq!(
                mask.words_per_frame(),
                (bits & FieldMask::ALL.bits()).count_ones() as usize + 2
            );
        }
    }

    #[test]
    fn test_frame_control_word_encodes_every_field() {
        let fields = [
            (FieldMask::LEAD_I, frmctl::LEAD_I_DIS),
            (FieldMask::LEAD_II, frmctl::LEAD_II_DIS),
            (FieldMask::LEAD_III, frmctl::LEAD_III_DIS),
            (FieldMask::V1, frmctl::V1_DIS),
            (FieldMask::V2, frmctl::V2_DIS),
            (FieldMask::PACE, frmctl::PACE_DIS),
            (FieldMask::RESP_MAGNITUDE, frmctl::RESPM_DIS),
            (FieldMask::RESP_PHASE, frmctl::RESPPH_DIS),
            (FieldMask::LEAD_OFF, frmctl::LOFF_DIS),
            (FieldMask::GPIO, frmctl::GPIO_DIS),
            (FieldMask::CRC, frmctl::CRC_DIS),
        ];

        // Walk every combination of the eleven fields.
        for combo in 0u32..(1 << fields.len()) {
            let mut mask = FieldMask::NONE;
            for (i, (field, _)) in fields.iter().enumerate() {
                if combo & (1 << i) != 0 {
                    mask |= *field;
                }
            }

            let word = frame_control_word(mask, SampleRate::Khz2);
            for (field, disable) in fields {
                assert_eq!(
                    word & disable == 0,
                    mask.contains(field),
                    "field {:?} in mask {:?}",
                    field,
                    mask
                );
            }
            assert_eq!(word & frmctl::RESERVED, frmctl::RESERVED);
            assert_eq!(word & frmctl::ADIS, 0);
            assert_ne!(word & frmctl::RDYRPT, 0);
            assert_ne!(word & frmctl::DATAFMT, 0);
            assert_eq!(word & (0b11 << 2), frmctl::SKIP_ALTERNATE);
            assert_eq!(mask.words_per_frame(), combo.count_ones() as usize + 2);
        }
    }

    #[test]
    fn test_frame_control_word_rate_bits() {
        let rates = [
            (SampleRate::Khz2, 0b00),
            (SampleRate::Khz16, 0b01),
            (SampleRate::Khz128, 0b10),
            (SampleRate::Hz31_25, 0b11),
        ];
        for (rate, bits) in rates {
            let word = frame_control_word(FieldMask::LEADS, rate);
            assert_eq!(word & frmctl::FRMRATE_MASK, bits);
        }
    }

    #[test]
    fn test_five_leads_at_2khz() {
        // Reserved bits, PACE..CRC disabled, RDYRPT, DATAFMT, skip alternate.
        let word = frame_control_word(FieldMask::LEADS, SampleRate::Khz2);
        assert_eq!(word, 0x0007_FE54);
    }

    #[test]
    fn test_decode_lead_sign_extension() {
        assert_eq!(decode_lead(0x80_0001, 1.0), -8_388_607.0);
        assert_eq!(decode_lead(0x80_0000, 1.0), -8_388_608.0);
        assert_eq!(decode_lead(0xFF_FFFF, 1.0), -1.0);
        assert_eq!(decode_lead(0x00_0005, 1.0), 5.0);
        assert_eq!(decode_lead(0x00_0005, 0.5), 2.5);
    }

    #[test]
    fn test_lead_scale() {
        let scale = SampleRate::Khz2.lead_scale();
        let expected = (4.0 * 1.8 / 1.4) / 16_777_215.0;
        assert!((scale - expected).abs() < 1e-12);

        let fast = SampleRate::Khz128.lead_scale();
        let expected = (4.0 * 1.8 / 1.4) / 65_535.0;
        assert!((fast - expected).abs() < 1e-9);
    }

    #[test]
    fn test_clock_bounds() {
        let bounds = ClockBounds::new(FieldMask::LEADS, SampleRate::Khz2);
        assert_eq!(bounds.min_hz, 2_000.0 * 7.0 * 32.0);
        assert_eq!(bounds.max_hz, 40_000_000.0);

        // Header only, below the serial clock limit.
        let bounds = ClockBounds::new(FieldMask::NONE, SampleRate::Khz2);
        assert_eq!(bounds.min_hz, 2_000.0 * 2.0 * 32.0);
        assert_eq!(bounds.max_hz, 1_024_000.0 * 2.0 * 32.0 / 3.0);
        assert!(bounds.max_hz < 40_000_000.0);

        // The ceiling caps at the absolute serial clock limit.
        let bounds = ClockBounds::new(FieldMask::ALL, SampleRate::Khz16);
        assert_eq!(bounds.max_hz, 40_000_000.0);
    }

    #[test]
    fn test_apply_word() {
        let mut frame = FrontEndFrame::new();
        assert!(frame.apply_word(0x1200_0005, 1.0));
        assert!(frame.apply_word(0x1D00_0103, 1.0));
        assert!(!frame.apply_word(0x7700_0001, 1.0));

        assert_eq!(frame.leads[1], 5.0);
        assert_eq!(frame.lead_off, 0x103);
        assert_eq!(frame.updated, FieldMask::LEAD_II | FieldMask::LEAD_OFF);
    }
}
