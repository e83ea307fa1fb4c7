//! Test doubles for the hardware traits

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::convert::Infallible;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{self, OutputPin};
use embedded_hal::spi::{self, SpiBus};

#[derive(Default)]
struct BusLog {
    replies: VecDeque<u32>,
    written: Vec<u32>,
}

/// SPI bus that replays scripted 32-bit reply words and records every word
/// written. Clones share the same script.
#[derive(Clone, Default)]
pub struct ScriptedBus {
    log: Rc<RefCell<BusLog>>,
}

impl ScriptedBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_replies(&self, words: &[u32]) {
        self.log.borrow_mut().replies.extend(words.iter().copied());
    }

    pub fn remaining_replies(&self) -> usize {
        self.log.borrow().replies.len()
    }

    pub fn written(&self) -> Vec<u32> {
        self.log.borrow().written.clone()
    }

    pub fn clear_written(&self) {
        self.log.borrow_mut().written.clear();
    }

    fn next_reply(&self) -> u32 {
        self.log.borrow_mut().replies.pop_front().unwrap_or(0)
    }

    fn record(&self, words: &[u8]) {
        let mut log = self.log.borrow_mut();
        for chunk in words.chunks_exact(4) {
            log.written
                .push(u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }
    }

    fn fill(&self, buf: &mut [u8]) {
        for chunk in buf.chunks_exact_mut(4) {
            chunk.copy_from_slice(&self.next_reply().to_be_bytes());
        }
    }
}

impl spi::ErrorType for ScriptedBus {
    type Error = Infallible;
}

impl SpiBus for ScriptedBus {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        self.fill(words);
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        self.record(words);
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        self.record(write);
        self.fill(read);
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        self.record(words);
        self.fill(words);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Output pin that remembers its level and how often it went low.
#[derive(Clone, Default)]
pub struct FakePin {
    high: Rc<Cell<bool>>,
    lows: Rc<Cell<usize>>,
}

impl FakePin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_high(&self) -> bool {
        self.high.get()
    }

    /// Number of high-to-low transitions, i.e. chip selections.
    pub fn select_count(&self) -> usize {
        self.lows.get()
    }
}

impl digital::ErrorType for FakePin {
    type Error = Infallible;
}

impl OutputPin for FakePin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        if self.high.get() {
            self.lows.set(self.lows.get() + 1);
        }
        self.high.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.high.set(true);
        Ok(())
    }
}

/// Delay that returns immediately and sums the requested time.
#[derive(Default)]
pub struct NoopDelay {
    total_ns: u64,
}

impl NoopDelay {
    pub fn total_ms(&self) -> u32 {
        (self.total_ns / 1_000_000) as u32
    }
}

impl DelayNs for NoopDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += ns as u64;
    }
}

/// A ready header followed by one tagged word per lead value.
pub fn lead_frame(values: &[u32]) -> Vec<u32> {
    let mut words = Vec::with_capacity(values.len() + 1);
    words.push(0x8000_0000);
    for (i, value) in values.iter().enumerate() {
        words.push(((0x11 + i as u32) << 24) | (value & 0x00FF_FFFF));
    }
    words
}
