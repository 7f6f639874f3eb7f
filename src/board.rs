//! ESP32-C3 adapters for the supervisor's collaborator traits
//!
//! WiFi association through esp-wifi, the server session over a
//! blocking-network-stack TCP socket, GPIO actuators, the shared I2C bus and
//! the ADC light channel.

use alloc::vec::Vec;
use core::cell::RefCell;

use blocking_network_stack::{Socket, Stack};
use embassy_time::Instant;
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{ErrorType, Operation};
use embedded_io::{Read, ReadReady, Write};
use esp_hal::analog::adc::{Adc, AdcPin};
use esp_hal::delay::Delay;
use esp_hal::gpio::{Level, Output};
use esp_hal::i2c::master::I2c;
use esp_hal::peripherals::{ADC1, GPIO2};
use esp_hal::Blocking;
use esp_wifi::wifi::{AuthMethod, ClientConfiguration, Configuration, WifiController, WifiDevice};
use log::warn;
use smoltcp::iface::Interface;
use smoltcp::wire::{EthernetAddress, HardwareAddress, IpAddress};

use greenhouse_node::config;
use greenhouse_node::devices::{Actuator, OutputChannel};
use greenhouse_node::error::{LinkError, SensorError, TransportError};
use greenhouse_node::protocol::LineFramer;
use greenhouse_node::sensors::LightSensor;
use greenhouse_node::session::Transport;
use greenhouse_node::timer::Clock;
use greenhouse_node::wifi::Radio;
use greenhouse_node::{Credentials, PeerAddress};

pub type NetStack = Stack<'static, WifiDevice<'static>>;

/// Milliseconds since boot, the time source of the network stack
pub fn timestamp_ms() -> u64 {
    esp_hal::time::Instant::now()
        .duration_since_epoch()
        .as_millis()
}

/// smoltcp interface bound to the station MAC address
pub fn create_interface(device: &mut WifiDevice<'static>) -> Interface {
    Interface::new(
        smoltcp::iface::Config::new(HardwareAddress::Ethernet(EthernetAddress::from_bytes(
            &device.mac_address(),
        ))),
        device,
        smoltcp::time::Instant::from_millis(timestamp_ms() as i64),
    )
}

// ----------------------------------------------------------------------------
// Time
// ----------------------------------------------------------------------------

/// Embassy time for `now`, busy-wait delays for the bounded blocking waits
#[derive(Clone, Copy)]
pub struct BoardClock {
    delay: Delay,
}

impl BoardClock {
    pub fn new() -> Self {
        Self {
            delay: Delay::new(),
        }
    }
}

impl Clock for BoardClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl DelayNs for BoardClock {
    fn delay_ns(&mut self, ns: u32) {
        self.delay.delay_ns(ns);
    }
}

// ----------------------------------------------------------------------------
// WiFi
// ----------------------------------------------------------------------------

/// Station-mode radio; associated means connected with a DHCP lease
pub struct EspRadio {
    controller: WifiController<'static>,
    stack: &'static NetStack,
}

impl EspRadio {
    pub fn new(controller: WifiController<'static>, stack: &'static NetStack) -> Self {
        Self { controller, stack }
    }
}

impl Radio for EspRadio {
    fn begin_association(&mut self, credentials: &Credentials) -> Result<(), LinkError> {
        let client_config = ClientConfiguration {
            ssid: credentials
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| LinkError::Radio)?,
            password: credentials
                .password
                .as_str()
                .try_into()
                .map_err(|_| LinkError::Radio)?,
            auth_method: AuthMethod::WPA2Personal,
            ..Default::default()
        };

        self.controller
            .set_configuration(&Configuration::Client(client_config))
            .map_err(|_| LinkError::Radio)?;

        if !self.controller.is_started().unwrap_or(false) {
            self.controller.start().map_err(|_| LinkError::Radio)?;
        }
        self.controller.connect().map_err(|_| LinkError::Radio)
    }

    fn is_associated(&mut self) -> bool {
        self.stack.work();
        self.controller.is_connected().unwrap_or(false) && self.stack.is_iface_up()
    }
}

// ----------------------------------------------------------------------------
// TCP session transport
// ----------------------------------------------------------------------------

const READ_CHUNK: usize = 128;

/// Newline-delimited JSON over one TCP socket
pub struct TcpTransport {
    socket: Socket<'static, 'static, WifiDevice<'static>>,
    framer: LineFramer<{ config::MAX_FRAME_LEN }>,
    pending: heapless::Deque<u8, READ_CHUNK>,
}

impl TcpTransport {
    pub fn new(socket: Socket<'static, 'static, WifiDevice<'static>>) -> Self {
        Self {
            socket,
            framer: LineFramer::new(),
            pending: heapless::Deque::new(),
        }
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, peer: &PeerAddress) -> Result<(), TransportError> {
        self.socket.work();
        self.socket
            .open(IpAddress::Ipv4(peer.ip), peer.port)
            .map_err(|_| TransportError::Connect)
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let socket = &mut self.socket;
        socket.write_all(frame).map_err(|_| TransportError::Write)?;
        socket.write_all(b"\n").map_err(|_| TransportError::Write)?;
        socket.flush().map_err(|_| TransportError::Write)
    }

    fn poll_recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        self.socket.work();
        loop {
            while let Some(byte) = self.pending.pop_front() {
                match self.framer.push(byte) {
                    Some(Ok(frame)) => return Ok(Some(frame)),
                    Some(Err(e)) => warn!("[SESSION] Dropped inbound frame: {}", e),
                    None => {}
                }
            }

            if !self.socket.is_connected() {
                return Err(TransportError::Closed);
            }
            if !self.socket.read_ready().map_err(|_| TransportError::Closed)? {
                return Ok(None);
            }

            let mut chunk = [0u8; READ_CHUNK];
            let len = self
                .socket
                .read(&mut chunk)
                .map_err(|_| TransportError::Closed)?;
            if len == 0 {
                return Err(TransportError::Closed);
            }
            for byte in &chunk[..len] {
                // pending was drained above, a chunk always fits
                let _ = self.pending.push_back(*byte);
            }
        }
    }

    fn close(&mut self) {
        self.socket.disconnect();
        self.framer.reset();
        self.pending.clear();
    }
}

// ----------------------------------------------------------------------------
// GPIO outputs
// ----------------------------------------------------------------------------

pub struct BoardOutputs {
    light: Output<'static>,
    fan: Output<'static>,
    pump: Output<'static>,
}

impl BoardOutputs {
    pub fn new(light: Output<'static>, fan: Output<'static>, pump: Output<'static>) -> Self {
        Self { light, fan, pump }
    }
}

impl Actuator for BoardOutputs {
    fn set_output(&mut self, channel: OutputChannel, on: bool) {
        let pin = match channel.0 {
            config::LIGHT_PIN => &mut self.light,
            config::FAN_PIN => &mut self.fan,
            config::PUMP_PIN => &mut self.pump,
            other => {
                warn!("[SUPERVISOR] No output wired to GPIO{}", other);
                return;
            }
        };
        pin.set_level(Level::from(on));
    }
}

// ----------------------------------------------------------------------------
// Sensors
// ----------------------------------------------------------------------------

/// Handle to the I2C bus shared by the DHT20 and BMP280
#[derive(Clone, Copy)]
pub struct SharedI2c(pub &'static RefCell<I2c<'static, Blocking>>);

impl ErrorType for SharedI2c {
    type Error = esp_hal::i2c::master::Error;
}

impl embedded_hal::i2c::I2c for SharedI2c {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        embedded_hal::i2c::I2c::transaction(&mut *self.0.borrow_mut(), address, operations)
    }
}

const ADC_READ_ATTEMPTS: u32 = 16;

pub type LightAdc = Adc<'static, ADC1<'static>, Blocking>;
pub type LightPin = AdcPin<GPIO2<'static>, ADC1<'static>>;

pub struct AdcLight {
    adc: LightAdc,
    pin: LightPin,
}

impl AdcLight {
    pub fn new(adc: LightAdc, pin: LightPin) -> Self {
        Self { adc, pin }
    }
}

impl LightSensor for AdcLight {
    fn read_raw(&mut self) -> Result<u16, SensorError> {
        // one-shot conversions report WouldBlock until the sample is ready
        for _ in 0..ADC_READ_ATTEMPTS {
            if let Ok(raw) = self.adc.read_oneshot(&mut self.pin) {
                return Ok(raw);
            }
        }
        Err(SensorError::NotReady)
    }
}
