#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use embassy_executor::Spawner;
use embassy_futures::select::{Either3, select3};
use embassy_net::{
    Config as NetConfig, DhcpConfig, Ipv4Address, Ipv4Cidr, Runner, Stack,
    StackResources, StaticConfigV4,
};
use embassy_time::{Instant, Timer};
use esp_hal::clock::CpuClock;
use esp_hal::delay::Delay;
use esp_hal::gpio::{Level, Output, OutputConfig};
use esp_hal::i2c::master::{Config as I2cConfig, I2c};
use esp_hal::rng::Rng;
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use esp_hal::uart::{Config as UartConfig, Uart};
use esp_radio::wifi::WifiDevice;
use esp_storage::FlashStorage;
use log::{debug, info, warn};
use static_cell::StaticCell;

// Display-LCD panel specific imports
use embedded_hal_bus::spi::ExclusiveDevice;
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use mipidsi::interface::SpiInterface;
use mipidsi::{Builder as MipidsiBuilder, models::ST7735s};

use embedded_sdmmc::SdCard;

use ezagro_core::app_state::{BootOutcome, RestartReason, boot};
use ezagro_core::commands::{CommandHandler, REMOTE_COMMANDS};
use ezagro_core::constants::TELEMETRY_INTERVAL;
use ezagro_core::display::TextPanel;
use ezagro_core::sensors::{Bmp180, Mhz19Sensor};
use ezagro_core::storage::ConfigStore;
use ezagro_core::telemetry::TelemetryScheduler;

use ezagro_firmware::cloud::BlynkLink;
use ezagro_firmware::dhcp::serve_leases;
use ezagro_firmware::network::Network;
use ezagro_firmware::serial::TimedUart;
use ezagro_firmware::storage::{CONFIG_FILES, FixedTime, SdVolumes, WIFI_FILES, sd_record};
use ezagro_firmware::updater::HttpUpdater;

const DISPLAY_WIDTH: u16 = 128;
const DISPLAY_HEIGHT: u16 = 128;

const MHZ19_BAUD: u32 = 9600;

static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
static STATION_RESOURCES: StaticCell<StackResources<4>> = StaticCell::new();
static PORTAL_RESOURCES: StaticCell<StackResources<4>> = StaticCell::new();

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

#[embassy_executor::task(pool_size = 2)]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await;
}

#[embassy_executor::task]
async fn dhcp_task(stack: Stack<'static>, server: Ipv4Address) {
    serve_leases(stack, server).await
}

fn restart(reason: RestartReason) -> ! {
    warn!("Restarting: {:?}", reason);
    esp_hal::system::software_reset()
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

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    info!("Embassy initialized!");

    // Display: 128x128 TFT on SPI2
    let display_bus = Spi::new(peripherals.SPI2, SpiConfig::default())
        .expect("Failed to configure display SPI")
        .with_sck(peripherals.GPIO36)
        .with_mosi(peripherals.GPIO37);
    let display_cs = Output::new(peripherals.GPIO35, Level::High, OutputConfig::default());
    let display_device = ExclusiveDevice::new_no_delay(display_bus, display_cs)
        .expect("Failed to wrap display SPI");
    let dc = Output::new(peripherals.GPIO34, Level::Low, OutputConfig::default());
    let mut spi_buffer = [0u8; 64];
    let di = SpiInterface::new(display_device, dc, &mut spi_buffer);
    let display = MipidsiBuilder::new(ST7735s, di)
        .display_size(DISPLAY_WIDTH, DISPLAY_HEIGHT)
        .init(&mut embassy_time::Delay)
        .expect("Failed to initialize display");
    let mut panel = TextPanel::new(display);

    info!("Display initialized!");

    // SD card on SPI3, clocked low enough for card init
    let sd_bus = Spi::new(
        peripherals.SPI3,
        SpiConfig::default().with_frequency(Rate::from_khz(400)),
    )
    .expect("Failed to configure SD SPI")
    .with_sck(peripherals.GPIO12)
    .with_mosi(peripherals.GPIO11)
    .with_miso(peripherals.GPIO13);
    let sd_cs = Output::new(peripherals.GPIO10, Level::High, OutputConfig::default());
    let sd_device = ExclusiveDevice::new_no_delay(sd_bus, sd_cs).expect("Failed to wrap SD SPI");
    let volumes: SdVolumes<_, _> = SdVolumes::new(SdCard::new(sd_device, Delay::new()), FixedTime);
    let mut store = ConfigStore::new(sd_record(&volumes, CONFIG_FILES));

    // WiFi: station for the cloud, access point for the portal
    let radio = RADIO.init(esp_radio::init().expect("Failed to initialize Wi-Fi/BLE controller"));
    let (wifi_controller, interfaces) =
        esp_radio::wifi::new(radio, peripherals.WIFI, Default::default())
            .expect("Failed to initialize Wi-Fi controller");

    let rng = Rng::new();
    let seed = (rng.random() as u64) << 32 | rng.random() as u64;

    let (station, station_runner) = embassy_net::new(
        interfaces.sta,
        NetConfig::dhcpv4(DhcpConfig::default()),
        STATION_RESOURCES.init(StackResources::new()),
        seed,
    );

    let portal_address = Ipv4Address::new(192, 168, 4, 1);
    let (access_point, portal_runner) = embassy_net::new(
        interfaces.ap,
        NetConfig::ipv4_static(StaticConfigV4 {
            address: Ipv4Cidr::new(portal_address, 24),
            gateway: Some(portal_address),
            dns_servers: Default::default(),
        }),
        PORTAL_RESOURCES.init(StackResources::new()),
        seed.rotate_left(17),
    );

    spawner
        .spawn(net_task(station_runner))
        .expect("station net_task spawn");
    spawner
        .spawn(net_task(portal_runner))
        .expect("portal net_task spawn");
    spawner
        .spawn(dhcp_task(access_point, portal_address))
        .expect("dhcp_task spawn");

    let mut network = Network::new(
        wifi_controller,
        station,
        access_point,
        sd_record(&volumes, WIFI_FILES),
    );

    let mut state = match boot(&mut store, &mut network, &mut panel).await {
        BootOutcome::Ready(state) => state,
        BootOutcome::Restart(reason) => restart(reason),
    };
    info!("Booted as {}", state.config().device_id());

    // Sensors: BMP180 on I2C0, MH-Z19 on UART1
    let i2c = I2c::new(peripherals.I2C0, I2cConfig::default())
        .expect("Failed to configure I2C")
        .with_sda(peripherals.GPIO8)
        .with_scl(peripherals.GPIO9)
        .into_async();
    let climate = Bmp180::new(i2c, embassy_time::Delay);

    let uart = Uart::new(
        peripherals.UART1,
        UartConfig::default().with_baudrate(MHZ19_BAUD),
    )
    .expect("Failed to configure UART")
    .with_rx(peripherals.GPIO18)
    .with_tx(peripherals.GPIO17)
    .into_async();
    let co2 = Mhz19Sensor::new(TimedUart::new(uart), embassy_time::Delay);

    let mut cloud_rx = [0u8; 1024];
    let mut cloud_tx = [0u8; 1024];
    let cloud = BlynkLink::new(
        network.station(),
        &mut cloud_rx,
        &mut cloud_tx,
        state.config().credential_token(),
    );

    let mut scheduler = TelemetryScheduler::new(climate, co2, cloud, panel);
    let mut updater = HttpUpdater::new(network.station(), FlashStorage::new(peripherals.FLASH));
    updater.confirm_running_image();
    let mut handler = CommandHandler::new(updater);

    let mut next = Instant::now();
    loop {
        match select3(
            Timer::at(next),
            REMOTE_COMMANDS.receive(),
            scheduler.sink_mut().poll(),
        )
        .await
        {
            Either3::First(()) => {
                let report = scheduler.tick(&state).await;
                debug!("Tick finished: {:?}", report);

                next += TELEMETRY_INTERVAL;
                let now = Instant::now();
                if next < now {
                    warn!("Telemetry tick overran by {} ms", (now - next).as_millis());
                    next = now;
                }
            }
            Either3::Second(command) => {
                let outcome = handler
                    .handle(command, &state, &mut store, &mut network)
                    .await;
                if let Some(reason) = outcome.restart_reason() {
                    state.request_restart(reason);
                }
            }
            Either3::Third(()) => {}
        }

        if let Some(reason) = state.restart_reason() {
            restart(reason);
        }
    }
}
