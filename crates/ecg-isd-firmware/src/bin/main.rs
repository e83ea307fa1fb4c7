#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use core::cell::RefCell;

use ecg_isd_core::acquisition::Acquisition;
use ecg_isd_core::config::Config as DeviceConfig;
use ecg_isd_core::context::SystemContext;
use ecg_isd_core::frontend::Adas1000;
use ecg_isd_core::persistence::BufferedFs;
use ecg_isd_core::ring_buffer::RING_BUFFER_BYTES;
use ecg_isd_core::shared_spi_bus::SharedSpiBus;
use ecg_isd_firmware::hardware::{self, EcgBus, EcgBusHandle, SdCard};
use ecg_isd_firmware::sd_card::{FixedTime, SdCardFs};
use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Delay, Duration, Timer};
use esp_hal::clock::CpuClock;
use esp_hal::gpio::{Level, Output, OutputConfig};
use esp_hal::interrupt::software::SoftwareInterruptControl;
use esp_hal::system::Stack;
use esp_hal::timer::timg::TimerGroup;
use esp_rtos::embassy::Executor;
use log::{error, info, warn};
use static_cell::StaticCell;

/// How long the start-up recording runs.
const RECORDING_DURATION: Duration = Duration::from_secs(10);

/// Stack of the second core, which runs only the acquisition task.
const APP_CORE_STACK_SIZE: usize = 8 * 1024;

/// Records reach the card a block at a time.
type Fs = BufferedFs<SdCardFs<hardware::SdCardDevice, Delay, FixedTime>>;
type Context = SystemContext<CriticalSectionRawMutex, Fs>;
type EcgAcquisition = Acquisition<
    'static,
    CriticalSectionRawMutex,
    EcgBusHandle,
    Output<'static>,
    Output<'static>,
    RING_BUFFER_BYTES,
>;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

#[embassy_executor::task]
async fn acquisition_task(mut acquisition: EcgAcquisition) {
    acquisition.run().await
}

#[embassy_executor::task]
async fn consumer_task(context: &'static Context) {
    context.coordinator().run().await
}

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(size: 72 * 1024);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    info!("Embassy initialized!");

    // Storage
    let sd_spi = hardware::create_sd_bus(
        peripherals.SPI2,
        peripherals.GPIO14,
        peripherals.GPIO13,
        peripherals.GPIO12,
    )
    .expect("Failed to configure SD card bus");
    let sd_cs = Output::new(peripherals.GPIO32, Level::High, OutputConfig::default());
    let sd_card: SdCard = hardware::init_sd_card(sd_spi, sd_cs).expect("Failed to set up SD card");
    if let Err(e) = hardware::speed_up_sd_card(&sd_card) {
        error!("SD card stays at the initialization clock: {}", e);
    }

    static CONTEXT: StaticCell<Context> = StaticCell::new();
    let fs = BufferedFs::new(SdCardFs::new(sd_card, FixedTime));
    let context: &'static Context = CONTEXT.init(SystemContext::new(fs));

    let device_config = match context.persistence.load_config().await {
        Ok(config) => config,
        Err(e) => {
            warn!("Using default settings: {}", e);
            DeviceConfig::default()
        }
    };

    // Front-end chips
    static ECG_BUS: StaticCell<EcgBus> = StaticCell::new();
    let ecg_spi = hardware::create_ecg_bus(
        peripherals.SPI3,
        peripherals.GPIO18,
        peripherals.GPIO23,
        peripherals.GPIO19,
    )
    .expect("Failed to configure ECG bus");
    let ecg_bus: &'static EcgBus = ECG_BUS.init(Mutex::new(RefCell::new(ecg_spi)));

    let cs0 = Output::new(peripherals.GPIO22, Level::High, OutputConfig::default());
    let cs1 = Output::new(peripherals.GPIO21, Level::High, OutputConfig::default());
    let led = Output::new(peripherals.GPIO2, Level::Low, OutputConfig::default());

    let primary = Adas1000::new(SharedSpiBus::new(ecg_bus), cs0).expect("Failed to set up ecg0");
    let secondary = if device_config.acquisition.secondary_enabled {
        Some(Adas1000::new(SharedSpiBus::new(ecg_bus), cs1).expect("Failed to set up ecg1"))
    } else {
        None
    };

    let mut acquisition = context.acquisition(primary, secondary, led);
    if let Err(e) = acquisition.configure(&device_config.acquisition, &mut Delay, |hz| {
        hardware::set_ecg_clock(ecg_bus, hz)
    }) {
        error!("Front-end configuration failed: {}", e);
    }

    // Acquisition busy-waits on the chip between frames, so it gets the
    // second core to itself. Card writes on this core can then block freely.
    static APP_CORE_STACK: StaticCell<Stack<APP_CORE_STACK_SIZE>> = StaticCell::new();
    let app_core_stack = APP_CORE_STACK.init(Stack::new());
    let sw_ints = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start_second_core(
        peripherals.CPU_CTRL,
        sw_ints.software_interrupt1,
        app_core_stack,
        move || {
            static APP_EXECUTOR: StaticCell<Executor> = StaticCell::new();
            let executor = APP_EXECUTOR.init(Executor::new());
            executor.run(|spawner| {
                spawner
                    .spawn(acquisition_task(acquisition))
                    .expect("Failed to spawn acquisition task");
            });
        },
    );
    info!("Acquisition running on the second core");

    spawner
        .spawn(consumer_task(context))
        .expect("Failed to spawn consumer task");

    // Without a user interface, record once at start-up.
    let coordinator = context.coordinator();
    match coordinator.start_recording().await {
        Ok(name) => {
            Timer::after(RECORDING_DURATION).await;
            match coordinator.stop_recording().await {
                Ok(_) => info!("Recording {} complete", name),
                Err(e) => error!("Failed to stop recording {}: {}", name, e),
            }
        }
        Err(e) => error!("Failed to start recording: {}", e),
    }

    match context.persistence.list_recordings().await {
        Ok(recordings) => {
            for recording in recordings {
                info!("{}.ECG: {} bytes", recording.name, recording.size);
            }
        }
        Err(e) => error!("Failed to list recordings: {}", e),
    }

    loop {
        Timer::after(Duration::from_secs(1)).await;
    }
}
