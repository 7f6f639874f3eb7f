//! Actuated devices and their registry
//!
//! The registry is the single record of what each output should be driving.
//! It is committed before the physical write so the two never diverge.

use crate::config;
use serde::{Deserialize, Serialize};

/// Devices the node can switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Light,
    MotorFan,
    Pump,
}

impl Device {
    pub const ALL: [Device; 3] = [Device::Light, Device::MotorFan, Device::Pump];

    /// Name used on the wire
    pub fn name(self) -> &'static str {
        match self {
            Device::Light => "Light",
            Device::MotorFan => "Motor Fan",
            Device::Pump => "Pump",
        }
    }

    /// Exact match against the wire name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|device| device.name() == name)
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Physical output a device is wired to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputChannel(pub u8);

/// Digital output driver seam
pub trait Actuator {
    fn set_output(&mut self, channel: OutputChannel, on: bool);
}

/// On/off state of every device, as reported in `sensor_data`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStates {
    #[serde(rename = "Light")]
    pub light: bool,
    #[serde(rename = "Motor Fan")]
    pub motor_fan: bool,
    #[serde(rename = "Pump")]
    pub pump: bool,
}

#[derive(Debug, Clone, Copy)]
struct DeviceEntry {
    channel: OutputChannel,
    on: bool,
}

/// Current state and output binding of every device
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    entries: [DeviceEntry; 3],
}

impl DeviceRegistry {
    /// All devices start off
    pub fn new(light: OutputChannel, motor_fan: OutputChannel, pump: OutputChannel) -> Self {
        let entry = |channel| DeviceEntry { channel, on: false };
        Self {
            entries: [entry(light), entry(motor_fan), entry(pump)],
        }
    }

    /// Registry bound to the board's default pins
    pub fn with_board_pins() -> Self {
        Self::new(
            OutputChannel(config::LIGHT_PIN),
            OutputChannel(config::FAN_PIN),
            OutputChannel(config::PUMP_PIN),
        )
    }

    pub fn is_on(&self, device: Device) -> bool {
        self.entries[device.index()].on
    }

    pub fn channel(&self, device: Device) -> OutputChannel {
        self.entries[device.index()].channel
    }

    /// Record the new state, then drive the output to match
    pub fn commit(&mut self, device: Device, on: bool, actuator: &mut impl Actuator) {
        let entry = &mut self.entries[device.index()];
        entry.on = on;
        actuator.set_output(entry.channel, on);
    }

    /// Drive every output to its recorded state, used once at boot
    pub fn sync_outputs(&self, actuator: &mut impl Actuator) {
        for entry in &self.entries {
            actuator.set_output(entry.channel, entry.on);
        }
    }

    pub fn snapshot(&self) -> DeviceStates {
        DeviceStates {
            light: self.is_on(Device::Light),
            motor_fan: self.is_on(Device::MotorFan),
            pump: self.is_on(Device::Pump),
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::{Actuator, OutputChannel};
    use alloc::vec::Vec;

    /// Records every output write in order
    #[derive(Debug, Default)]
    pub struct RecordingActuator {
        pub writes: Vec<(OutputChannel, bool)>,
    }

    impl Actuator for RecordingActuator {
        fn set_output(&mut self, channel: OutputChannel, on: bool) {
            self.writes.push((channel, on));
        }
    }
}
