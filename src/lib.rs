#![cfg_attr(not(test), no_std)]

//! ESP32-C3 Greenhouse Sensor Node Library
//!
//! Connectivity and session supervisor for a node that samples environmental
//! sensors, reports readings to a remote server over a persistent socket and
//! drives local actuators (light, fan, pump) on remote command.

extern crate alloc;

pub mod context;
pub mod devices;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod sensors;
pub mod session;
pub mod state_machine;
pub mod supervisor;
pub mod telemetry;
pub mod timer;
pub mod wifi;

use core::net::Ipv4Addr;
use core::str::FromStr;

use embassy_time::Duration;
use heapless::String;

use crate::error::ConfigError;

/// Project version information
pub const VERSION: &str = "0.1.0-dev";

/// Default configuration constants
pub mod config {
    /// Identifier announced in the registration message
    pub const DEVICE_ID: &str = "ESP32-Main";

    /// Sector active at boot
    pub const DEFAULT_SECTOR: &str = "A";

    /// WiFi and server configuration
    /// Read from environment variables at compile time
    pub const WIFI_SSID: &str = env!("WIFI_SSID");
    pub const WIFI_PASSWORD: &str = env!("WIFI_PASSWORD");
    pub const SERVER_HOST: &str = env!("SERVER_HOST");
    pub const SERVER_PORT: &str = env!("SERVER_PORT");

    /// Port used when SERVER_PORT is left empty
    pub const DEFAULT_SERVER_PORT: u16 = 8765;

    /// Number of association polls before an attach is abandoned
    pub const WIFI_ATTACH_ATTEMPTS: u32 = 20;

    /// Delay between association polls in milliseconds
    pub const WIFI_ATTEMPT_DELAY_MS: u64 = 500;

    /// Minimum spacing between two attach sequences in milliseconds
    pub const WIFI_REATTACH_BACKOFF_MS: u64 = 5000;

    /// Sensor publish period in milliseconds
    pub const SAMPLE_INTERVAL_MS: u64 = 10_000;

    /// Liveness probe period in milliseconds
    pub const HEARTBEAT_INTERVAL_MS: u64 = 15_000;

    /// How long a liveness probe waits for any inbound frame
    pub const HEARTBEAT_TIMEOUT_MS: u64 = 3000;

    /// Inbound frames drained per supervisor tick
    pub const MAX_FRAMES_PER_TICK: usize = 4;

    /// Supervisor tick period on the device
    pub const TICK_INTERVAL_MS: u64 = 100;

    /// Largest accepted inbound frame in bytes
    pub const MAX_FRAME_LEN: usize = 1024;

    /// I2C bus pins shared by the DHT20 and BMP280
    pub const I2C_SDA_PIN: u8 = 11;
    pub const I2C_SCL_PIN: u8 = 12;

    /// Sensor bus addresses
    pub const DHT20_ADDRESS: u8 = 0x38;
    pub const BMP280_ADDRESS: u8 = 0x76;

    /// Actuator output pins
    pub const LIGHT_PIN: u8 = 5;
    pub const FAN_PIN: u8 = 6;
    pub const PUMP_PIN: u8 = 7;

    /// Light sensor ADC pin
    pub const LIGHT_ADC_PIN: u8 = 2;
}

/// Longest SSID accepted by the radio driver
pub const SSID_MAX: usize = 32;
/// Longest WPA2 passphrase accepted by the radio driver
pub const PASSWORD_MAX: usize = 64;
/// Longest device identifier sent at registration
pub const DEVICE_ID_MAX: usize = 32;

/// Radio association credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub ssid: String<SSID_MAX>,
    pub password: String<PASSWORD_MAX>,
}

impl Credentials {
    pub fn new(ssid: &str, password: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            ssid: String::try_from(ssid).map_err(|_| ConfigError::CredentialTooLong)?,
            password: String::try_from(password).map_err(|_| ConfigError::CredentialTooLong)?,
        })
    }
}

/// Address of the server the session connects to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddress {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    /// Parse a dotted-quad host and a decimal port, empty port falls back to the default
    pub fn parse(host: &str, port: &str) -> Result<Self, ConfigError> {
        let ip = Ipv4Addr::from_str(host.trim()).map_err(|_| ConfigError::InvalidPeerAddress)?;
        let port = match port.trim() {
            "" => config::DEFAULT_SERVER_PORT,
            p => p.parse::<u16>().map_err(|_| ConfigError::InvalidPort)?,
        };
        Ok(Self { ip, port })
    }
}

/// Runtime configuration consumed by the supervisor and its components
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub credentials: Credentials,
    pub peer: PeerAddress,
    pub device_id: String<DEVICE_ID_MAX>,
    pub initial_sector: &'static str,
    pub attach_attempts: u32,
    pub attempt_delay: Duration,
    pub reattach_backoff: Duration,
    pub sample_interval: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub max_frames_per_tick: usize,
}

impl NodeConfig {
    /// Create a configuration with the default cadence
    pub fn new(credentials: Credentials, peer: PeerAddress) -> Self {
        let mut device_id = String::new();
        // DEVICE_ID is shorter than DEVICE_ID_MAX
        let _ = device_id.push_str(config::DEVICE_ID);

        Self {
            credentials,
            peer,
            device_id,
            initial_sector: config::DEFAULT_SECTOR,
            attach_attempts: config::WIFI_ATTACH_ATTEMPTS,
            attempt_delay: Duration::from_millis(config::WIFI_ATTEMPT_DELAY_MS),
            reattach_backoff: Duration::from_millis(config::WIFI_REATTACH_BACKOFF_MS),
            sample_interval: Duration::from_millis(config::SAMPLE_INTERVAL_MS),
            heartbeat_interval: Duration::from_millis(config::HEARTBEAT_INTERVAL_MS),
            heartbeat_timeout: Duration::from_millis(config::HEARTBEAT_TIMEOUT_MS),
            max_frames_per_tick: config::MAX_FRAMES_PER_TICK,
        }
    }

    /// Build the configuration from the values baked in by `build.rs`
    pub fn from_build_env() -> Result<Self, ConfigError> {
        let credentials = Credentials::new(config::WIFI_SSID, config::WIFI_PASSWORD)?;
        let peer = PeerAddress::parse(config::SERVER_HOST, config::SERVER_PORT)?;
        Ok(Self::new(credentials, peer))
    }

    pub fn with_device_id(mut self, device_id: &str) -> Result<Self, ConfigError> {
        self.device_id = String::try_from(device_id).map_err(|_| ConfigError::DeviceIdTooLong)?;
        Ok(self)
    }

    pub fn with_attach_budget(mut self, attempts: u32, attempt_delay: Duration) -> Self {
        self.attach_attempts = attempts;
        self.attempt_delay = attempt_delay;
        self
    }

    pub fn with_reattach_backoff(mut self, backoff: Duration) -> Self {
        self.reattach_backoff = backoff;
        self
    }

    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_timeout = timeout;
        self
    }
}
