//! Blocking SPI bus sharing
//!
//! Both front-end chips sit on one SPI bus with their own chip-select lines.
//! Each driver gets a [`SharedSpiBus`] handle; every bus call takes the lock
//! for its own duration only.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal::spi::{ErrorType, SpiBus};

/// Handle to an SPI bus shared behind an embassy blocking mutex.
///
/// Chip select is handled by the driver, so a frame read is several locked
/// calls in a row. Drivers sharing a bus must therefore run on the same task,
/// which is how acquisition uses it.
///
/// # Example
///
/// ```ignore
/// static ECG_BUS: StaticCell<Mutex<CriticalSectionRawMutex, RefCell<Spi<'static, Blocking>>>> =
///     StaticCell::new();
///
/// let bus = ECG_BUS.init(Mutex::new(RefCell::new(spi)));
/// let primary = Adas1000::new(SharedSpiBus::new(bus), cs0)?;
/// let secondary = Adas1000::new(SharedSpiBus::new(bus), cs1)?;
/// ```
pub struct SharedSpiBus<'a, M: RawMutex, T> {
    bus: &'a Mutex<M, RefCell<T>>,
}

impl<'a, M: RawMutex, T> SharedSpiBus<'a, M, T> {
    #[inline]
    pub const fn new(bus: &'a Mutex<M, RefCell<T>>) -> Self {
        Self { bus }
    }

    /// Run `f` with exclusive access to the underlying bus, e.g. to change
    /// its clock.
    pub fn with_bus<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.bus.lock(|bus| f(&mut bus.borrow_mut()))
    }
}

impl<M: RawMutex, T> ErrorType for SharedSpiBus<'_, M, T>
where
    T: ErrorType,
{
    type Error = T::Error;
}

impl<M: RawMutex, T> SpiBus for SharedSpiBus<'_, M, T>
where
    T: SpiBus,
{
    #[inline]
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        self.with_bus(|bus| bus.read(words))
    }

    #[inline]
    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        self.with_bus(|bus| bus.write(words))
    }

    #[inline]
    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        self.with_bus(|bus| bus.transfer(read, write))
    }

    #[inline]
    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        self.with_bus(|bus| bus.transfer_in_place(words))
    }

    #[inline]
    fn flush(&mut self) -> Result<(), Self::Error> {
        self.with_bus(|bus| bus.flush())
    }
}
