#![no_std]
#![no_main]

use core::cell::RefCell;

use blocking_network_stack::Stack;
use embassy_time::{Duration, Timer};
use esp_hal::analog::adc::{Adc, AdcConfig, Attenuation};
use esp_hal::clock::CpuClock;
use esp_hal::delay::Delay;
use esp_hal::gpio::{Level, Output, OutputConfig};
use esp_hal::i2c::master::I2c;
use esp_hal::rng::Rng;
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use esp_hal::Blocking;
use esp_hal_embassy::Executor;
use esp_wifi::wifi;
use log::{error, info};
use smoltcp::iface::{SocketSet, SocketStorage};
use smoltcp::wire::DhcpOption;
use static_cell::StaticCell;

// Standard library imports
extern crate alloc;

mod board;

use board::{AdcLight, BoardClock, BoardOutputs, EspRadio, NetStack, SharedI2c, TcpTransport};
use greenhouse_node::devices::DeviceRegistry;
use greenhouse_node::protocol::JsonCodec;
use greenhouse_node::sensors::{Bmp280, Dht20};
use greenhouse_node::supervisor::Supervisor;
use greenhouse_node::telemetry::TelemetryPublisher;
use greenhouse_node::timer::Clock;
use greenhouse_node::{NodeConfig, config};

// Add app descriptor for espflash compatibility
esp_bootloader_esp_idf::esp_app_desc!();

type Node = Supervisor<
    EspRadio,
    TcpTransport,
    JsonCodec,
    BoardOutputs,
    Dht20<SharedI2c, Delay>,
    Bmp280<SharedI2c>,
    AdcLight,
>;

const SOCKET_BUFFER_LEN: usize = 1536;

static WIFI_INIT_CELL: StaticCell<esp_wifi::EspWifiController<'static>> = StaticCell::new();
static SOCKET_STORAGE_CELL: StaticCell<[SocketStorage<'static>; 3]> = StaticCell::new();
static STACK_CELL: StaticCell<NetStack> = StaticCell::new();
static RX_BUFFER_CELL: StaticCell<[u8; SOCKET_BUFFER_LEN]> = StaticCell::new();
static TX_BUFFER_CELL: StaticCell<[u8; SOCKET_BUFFER_LEN]> = StaticCell::new();
static I2C_CELL: StaticCell<RefCell<I2c<'static, Blocking>>> = StaticCell::new();
static NODE_CELL: StaticCell<Node> = StaticCell::new();
static EXECUTOR: StaticCell<Executor> = StaticCell::new();

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    error!("[MAIN] Panic: {}", info);
    loop {}
}

/// Log and park; there is nothing to recover to before the supervisor runs
fn halt(what: &str) -> ! {
    error!("[MAIN] {} failed, halting", what);
    loop {
        core::hint::spin_loop();
    }
}

// Supervisor tick loop
#[embassy_executor::task]
async fn supervisor_task(node: &'static mut Node, mut clock: BoardClock) -> ! {
    info!("[SUPERVISOR] Starting supervisor loop");

    loop {
        node.tick(&mut clock);
        Timer::after(Duration::from_millis(config::TICK_INTERVAL_MS)).await;
    }
}

#[esp_hal::main]
fn main() -> ! {
    esp_println::logger::init_logger_from_env();

    let hal_config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(hal_config);

    // Initialize heap allocator for WiFi (72KB)
    esp_alloc::heap_allocator!(size: 72 * 1024);

    // Initialize embassy time system
    let timer_group0 = TimerGroup::new(peripherals.TIMG0);
    esp_hal_embassy::init(timer_group0.timer0);

    let node_config = match NodeConfig::from_build_env() {
        Ok(node_config) => node_config,
        Err(e) => {
            error!("[MAIN] Invalid build configuration: {}", e);
            halt("Configuration")
        }
    };
    info!(
        "[MAIN] greenhouse-node {} as {}, server {}:{}",
        greenhouse_node::VERSION,
        node_config.device_id,
        node_config.peer.ip,
        node_config.peer.port
    );

    // Initialize WiFi driver
    let timer_group1 = TimerGroup::new(peripherals.TIMG1);
    let mut rng = Rng::new(peripherals.RNG);
    let wifi_init = match esp_wifi::init(timer_group1.timer0, rng, peripherals.RADIO_CLK) {
        Ok(wifi_init) => WIFI_INIT_CELL.init(wifi_init),
        Err(_) => halt("WiFi driver init"),
    };
    let (wifi_controller, interfaces) = match wifi::new(wifi_init, peripherals.WIFI) {
        Ok(parts) => parts,
        Err(_) => halt("WiFi controller init"),
    };
    let mut wifi_device = interfaces.sta;
    info!("[WIFI] WiFi driver initialized successfully");

    // Network stack with DHCP
    let iface = board::create_interface(&mut wifi_device);
    let socket_storage = SOCKET_STORAGE_CELL.init(Default::default());
    let mut socket_set = SocketSet::new(&mut socket_storage[..]);
    let mut dhcp_socket = smoltcp::socket::dhcpv4::Socket::new();
    dhcp_socket.set_outgoing_options(&[DhcpOption {
        kind: 12,
        data: b"greenhouse-node",
    }]);
    socket_set.add(dhcp_socket);
    let stack = STACK_CELL.init(Stack::new(
        iface,
        wifi_device,
        socket_set,
        board::timestamp_ms,
        rng.random(),
    ));
    let socket = stack.get_socket(
        RX_BUFFER_CELL.init([0; SOCKET_BUFFER_LEN]),
        TX_BUFFER_CELL.init([0; SOCKET_BUFFER_LEN]),
    );
    info!("[WIFI] Network stack created with DHCP configuration");

    // Actuators, driven off at boot by the supervisor
    let outputs = BoardOutputs::new(
        Output::new(peripherals.GPIO5, Level::Low, OutputConfig::default()),
        Output::new(peripherals.GPIO6, Level::Low, OutputConfig::default()),
        Output::new(peripherals.GPIO7, Level::Low, OutputConfig::default()),
    );

    // Sensors
    let i2c = match I2c::new(
        peripherals.I2C0,
        esp_hal::i2c::master::Config::default().with_frequency(Rate::from_khz(100)),
    ) {
        Ok(i2c) => i2c
            .with_sda(peripherals.GPIO11)
            .with_scl(peripherals.GPIO12),
        Err(_) => halt("I2C init"),
    };
    let bus = SharedI2c(I2C_CELL.init(RefCell::new(i2c)));

    let mut climate = Dht20::new(bus, Delay::new());
    if let Err(e) = climate.begin() {
        error!("[SENSOR] Could not find a valid DHT20 sensor: {}", e);
    }
    let mut barometer = Bmp280::new(bus);
    if let Err(e) = barometer.begin() {
        error!("[SENSOR] Could not find a valid BMP280 sensor: {}", e);
    }

    let mut adc_config = AdcConfig::new();
    let light_pin = adc_config.enable_pin(peripherals.GPIO2, Attenuation::_11dB);
    let light = AdcLight::new(Adc::new(peripherals.ADC1, adc_config), light_pin);

    let clock = BoardClock::new();
    let telemetry = TelemetryPublisher::new(
        node_config.sample_interval,
        clock.now(),
        climate,
        barometer,
        light,
    );

    let node = NODE_CELL.init(Supervisor::new(
        node_config,
        EspRadio::new(wifi_controller, stack),
        TcpTransport::new(socket),
        JsonCodec,
        DeviceRegistry::with_board_pins(),
        outputs,
        telemetry,
    ));

    // Initialize embassy executor and run tasks
    let executor = EXECUTOR.init(Executor::new());
    executor.run(|spawner| {
        info!("[MAIN] Spawning supervisor task...");
        if spawner.spawn(supervisor_task(node, clock)).is_err() {
            error!("[MAIN] Failed to spawn supervisor task");
        }
    });
}
