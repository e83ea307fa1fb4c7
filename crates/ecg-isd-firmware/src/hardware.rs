//! Hardware initialization for the recorder board
//!
//! Pin assignment (NodeMCU-32S):
//!
//! | Signal        | GPIO |
//! |---------------|------|
//! | ECG SCK       | 18   |
//! | ECG MOSI      | 23   |
//! | ECG MISO      | 19   |
//! | ECG nCS0      | 22   |
//! | ECG nCS1      | 21   |
//! | SD SCK        | 14   |
//! | SD MOSI       | 13   |
//! | SD MISO       | 12   |
//! | SD CS         | 32   |
//! | Status LED    | 2    |

use core::cell::RefCell;

use ecg_isd_core::acquisition::INITIAL_BUS_CLOCK_HZ;
use ecg_isd_core::shared_spi_bus::SharedSpiBus;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Delay;
use embedded_hal_bus::spi::ExclusiveDevice;
use esp_hal::Blocking;
use esp_hal::gpio::Output;
use esp_hal::spi::Mode;
use esp_hal::spi::master::{Config, ConfigError, Spi};
use esp_hal::time::Rate;
use log::{error, info};
use thiserror_no_std::Error;

/// SD cards must be initialized at 400 kHz or less.
const SD_INIT_CLOCK_KHZ: u32 = 400;

/// Data clock once the card is initialized. Default-speed cards accept up to
/// 25 MHz.
const SD_DATA_CLOCK_MHZ: u32 = 20;

pub type EcgSpi = Spi<'static, Blocking>;

/// The ECG SPI bus shared by both front-end chips.
pub type EcgBus = Mutex<CriticalSectionRawMutex, RefCell<EcgSpi>>;

/// One chip's handle on [`EcgBus`].
pub type EcgBusHandle = SharedSpiBus<'static, CriticalSectionRawMutex, EcgSpi>;

pub type SdCardDevice = ExclusiveDevice<Spi<'static, Blocking>, Output<'static>, Delay>;

pub type SdCard = embedded_sdmmc::SdCard<SdCardDevice, Delay>;

#[derive(Error, Debug)]
pub enum HardwareError {
    #[error("SPI configuration rejected: {0:?}")]
    SpiConfig(ConfigError),
    #[error("Chip select pin failed")]
    ChipSelect,
    #[error("SD card did not initialize: {0:?}")]
    SdInit(embedded_sdmmc::SdCardError),
}

impl From<ConfigError> for HardwareError {
    fn from(e: ConfigError) -> Self {
        HardwareError::SpiConfig(e)
    }
}

fn ecg_config(hz: u32) -> Config {
    Config::default()
        .with_frequency(Rate::from_hz(hz))
        .with_mode(Mode::_3)
}

/// Create the ECG bus (SPI mode 3) at the initial clock.
pub fn create_ecg_bus(
    spi: esp_hal::peripherals::SPI3<'static>,
    sck: esp_hal::peripherals::GPIO18<'static>,
    mosi: esp_hal::peripherals::GPIO23<'static>,
    miso: esp_hal::peripherals::GPIO19<'static>,
) -> Result<EcgSpi, HardwareError> {
    let spi = Spi::new(spi, ecg_config(INITIAL_BUS_CLOCK_HZ))?
        .with_sck(sck)
        .with_mosi(mosi)
        .with_miso(miso);
    Ok(spi)
}

/// Reprogram the ECG bus clock, e.g. to the rate returned by
/// acquisition configuration.
pub fn set_ecg_clock(bus: &EcgBus, hz: u32) {
    bus.lock(|spi| match spi.borrow_mut().apply_config(&ecg_config(hz)) {
        Ok(()) => info!("ECG bus clock set to {} Hz", hz),
        Err(e) => error!("Failed to set ECG bus clock to {} Hz: {:?}", hz, e),
    });
}

/// Create the SD card bus at the card's initialization clock.
pub fn create_sd_bus(
    spi: esp_hal::peripherals::SPI2<'static>,
    sck: esp_hal::peripherals::GPIO14<'static>,
    mosi: esp_hal::peripherals::GPIO13<'static>,
    miso: esp_hal::peripherals::GPIO12<'static>,
) -> Result<Spi<'static, Blocking>, HardwareError> {
    let spi = Spi::new(
        spi,
        Config::default().with_frequency(Rate::from_khz(SD_INIT_CLOCK_KHZ)),
    )?
    .with_sck(sck)
    .with_mosi(mosi)
    .with_miso(miso);
    Ok(spi)
}

/// Wrap the SD bus and its chip select into an SD card.
pub fn init_sd_card(
    spi: Spi<'static, Blocking>,
    cs: Output<'static>,
) -> Result<SdCard, HardwareError> {
    let device = ExclusiveDevice::new(spi, cs, Delay).map_err(|_| HardwareError::ChipSelect)?;
    Ok(embedded_sdmmc::SdCard::new(device, Delay))
}

/// Initialize the card at the slow clock, then switch the bus to the data
/// clock.
pub fn speed_up_sd_card(card: &SdCard) -> Result<(), HardwareError> {
    let bytes = card.num_bytes().map_err(HardwareError::SdInit)?;
    info!("SD card: {} MiB", bytes / (1024 * 1024));

    let config = Config::default().with_frequency(Rate::from_mhz(SD_DATA_CLOCK_MHZ));
    card.spi(|device| device.bus_mut().apply_config(&config))?;
    info!("SD bus clock set to {} MHz", SD_DATA_CLOCK_MHZ);
    Ok(())
}
