//! Telemetry publisher
//!
//! Samples the sensor collaborators on a fixed cadence and turns a cycle's
//! readings into outbound frames. Nothing is buffered: a cycle that cannot be
//! sent is dropped.

use crate::context::NodeContext;
use crate::protocol::{DATA_TABLE, DataInsert, Message, SensorData};
use crate::sensors::{BarometricSensor, ClimateSensor, LightSensor, raw_to_lux};
use crate::timer::IntervalTimer;
use alloc::string::ToString;
use alloc::vec::Vec;
use embassy_time::{Duration, Instant};
use log::{debug, warn};

/// Physical quantity a reading measures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Temperature,
    Humidity,
    Pressure,
    Light,
}

impl SensorKind {
    pub fn unit(self) -> &'static str {
        match self {
            SensorKind::Temperature => "°C",
            SensorKind::Humidity => "%",
            SensorKind::Pressure => "hPa",
            SensorKind::Light => "lux",
        }
    }

    /// Row key the server files `data_insert` values under
    pub fn device_id(self) -> u32 {
        match self {
            SensorKind::Temperature => 1,
            SensorKind::Humidity => 2,
            SensorKind::Pressure => 3,
            SensorKind::Light => 4,
        }
    }
}

/// Threshold classification reported with each stored value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Normal,
    Warning,
    Critical,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Normal => "normal",
            Status::Warning => "warning",
            Status::Critical => "critical",
        }
    }

    pub fn classify(kind: SensorKind, value: f32) -> Self {
        let (critical, warning) = match kind {
            SensorKind::Temperature => ((15.0, 30.0), (20.0, 26.0)),
            SensorKind::Humidity => ((30.0, 85.0), (45.0, 75.0)),
            SensorKind::Pressure | SensorKind::Light => return Status::Normal,
        };
        if value < critical.0 || value > critical.1 {
            Status::Critical
        } else if value < warning.0 || value > warning.1 {
            Status::Warning
        } else {
            Status::Normal
        }
    }
}

/// One sampled quantity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub kind: SensorKind,
    pub value: f32,
    pub unit: &'static str,
    pub timestamp: Instant,
}

impl Reading {
    pub fn new(kind: SensorKind, value: f32, timestamp: Instant) -> Self {
        Self {
            kind,
            value,
            unit: kind.unit(),
            timestamp,
        }
    }

    pub fn status(&self) -> Status {
        Status::classify(self.kind, self.value)
    }
}

/// Samples the climate sensor (primary), the barometer (pressure and
/// fallback temperature) and the light channel
pub struct TelemetryPublisher<CS, BS, LS> {
    timer: IntervalTimer,
    climate: CS,
    barometer: BS,
    light: LS,
}

impl<CS, BS, LS> TelemetryPublisher<CS, BS, LS>
where
    CS: ClimateSensor,
    BS: BarometricSensor,
    LS: LightSensor,
{
    /// The first cycle is due one `interval` after `start`
    pub fn new(interval: Duration, start: Instant, climate: CS, barometer: BS, light: LS) -> Self {
        Self {
            timer: IntervalTimer::starting_at(start, interval),
            climate,
            barometer,
            light,
        }
    }

    pub fn last_published(&self) -> Option<Instant> {
        self.timer.last_fired()
    }

    /// Sample every sensor if a cycle is due
    ///
    /// Returns `None` when not due. When due, the timer is advanced to `now`
    /// and whatever quantities could be sampled are returned in the order
    /// temperature, humidity, pressure, light.
    pub fn tick(&mut self, now: Instant) -> Option<Vec<Reading>> {
        if !self.timer.fire_if_due(now) {
            return None;
        }
        Some(self.sample(now))
    }

    fn sample(&mut self, now: Instant) -> Vec<Reading> {
        let climate = self
            .climate
            .read()
            .map_err(|e| warn!("[TELEMETRY] Climate sensor read failed: {}", e))
            .ok();
        let barometric = self
            .barometer
            .read()
            .map_err(|e| warn!("[TELEMETRY] Barometric sensor read failed: {}", e))
            .ok();
        let light = self
            .light
            .read_raw()
            .map_err(|e| warn!("[TELEMETRY] Light sensor read failed: {}", e))
            .ok();

        let temperature = match (climate, barometric) {
            (Some(c), _) => Some(c.temperature),
            (None, Some(b)) => {
                debug!("[TELEMETRY] Using barometer temperature");
                Some(b.temperature)
            }
            (None, None) => None,
        };

        [
            (SensorKind::Temperature, temperature),
            (SensorKind::Humidity, climate.map(|c| c.humidity)),
            (SensorKind::Pressure, barometric.map(|b| b.pressure)),
            (SensorKind::Light, light.map(raw_to_lux)),
        ]
        .into_iter()
        .filter_map(|(kind, value)| Some(Reading::new(kind, value?, now)))
        .collect()
    }
}

fn value_of(readings: &[Reading], kind: SensorKind) -> Option<f32> {
    readings.iter().find(|r| r.kind == kind).map(|r| r.value)
}

/// Build the outbound frames for one cycle
///
/// One `sensor_data` summary tagged with the active sector and the device
/// states, followed by one `data_insert` per reading.
pub fn frames(readings: &[Reading], ctx: &NodeContext) -> Vec<Message> {
    let sector = ctx.sector.as_str();
    let mut messages = Vec::with_capacity(readings.len() + 1);

    messages.push(Message::SensorData(SensorData {
        sector: sector.to_string(),
        temperature: value_of(readings, SensorKind::Temperature),
        humidity: value_of(readings, SensorKind::Humidity),
        pressure: value_of(readings, SensorKind::Pressure),
        light: value_of(readings, SensorKind::Light),
        devices: ctx.devices.snapshot(),
    }));

    messages.extend(readings.iter().map(|reading| {
        Message::DataInsert(DataInsert {
            table: DATA_TABLE.to_string(),
            sector: sector.to_string(),
            device_id: reading.kind.device_id(),
            value: reading.value,
            unit: reading.unit.to_string(),
            status: reading.status().as_str().to_string(),
        })
    }));

    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Sector;
    use crate::devices::DeviceRegistry;
    use crate::devices::fake::RecordingActuator;
    use crate::devices::Device;
    use crate::error::SensorError;
    use crate::sensors::fake::Fixed;
    use crate::sensors::{BarometricSample, ClimateSample};

    type Publisher =
        TelemetryPublisher<Fixed<ClimateSample>, Fixed<BarometricSample>, Fixed<u16>>;

    fn publisher(
        climate: Result<ClimateSample, SensorError>,
        barometric: Result<BarometricSample, SensorError>,
        light: Result<u16, SensorError>,
    ) -> Publisher {
        TelemetryPublisher::new(
            Duration::from_secs(10),
            Instant::from_secs(0),
            Fixed(climate),
            Fixed(barometric),
            Fixed(light),
        )
    }

    fn healthy() -> Publisher {
        publisher(
            Ok(ClimateSample {
                temperature: 22.5,
                humidity: 60.0,
            }),
            Ok(BarometricSample {
                temperature: 23.1,
                pressure: 1012.0,
            }),
            Ok(4095),
        )
    }

    #[test]
    fn not_due_before_interval() {
        let mut telemetry = healthy();
        assert_eq!(telemetry.tick(Instant::from_millis(9_999)), None);
        assert_eq!(telemetry.last_published(), Some(Instant::from_secs(0)));
    }

    #[test]
    fn due_tick_samples_and_advances_to_call_time() {
        let mut telemetry = healthy();
        let now = Instant::from_millis(10_250);

        let readings = telemetry.tick(now).unwrap();

        let kinds: Vec<_> = readings.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            [
                SensorKind::Temperature,
                SensorKind::Humidity,
                SensorKind::Pressure,
                SensorKind::Light
            ]
        );
        assert_eq!(readings[0].value, 22.5);
        assert_eq!(readings[3].value, 1000.0);
        assert!(readings.iter().all(|r| r.timestamp == now));
        assert_eq!(telemetry.last_published(), Some(now));
        // next cycle is relative to the actual publish time
        assert_eq!(telemetry.tick(Instant::from_millis(20_000)), None);
        assert!(telemetry.tick(Instant::from_millis(20_250)).is_some());
    }

    #[test]
    fn fallback_temperature_when_primary_fails() {
        let mut telemetry = publisher(
            Err(SensorError::Checksum),
            Ok(BarometricSample {
                temperature: 23.1,
                pressure: 1012.0,
            }),
            Ok(2048),
        );

        let readings = telemetry.tick(Instant::from_secs(10)).unwrap();

        assert_eq!(value_of(&readings, SensorKind::Temperature), Some(23.1));
        assert_eq!(value_of(&readings, SensorKind::Humidity), None);
        assert_eq!(value_of(&readings, SensorKind::Pressure), Some(1012.0));
        assert!(value_of(&readings, SensorKind::Light).is_some());
    }

    #[test]
    fn every_sensor_failing_still_publishes_empty_cycle() {
        let mut telemetry = publisher(
            Err(SensorError::Bus),
            Err(SensorError::NotANumber),
            Err(SensorError::Bus),
        );
        assert_eq!(telemetry.tick(Instant::from_secs(10)), Some(Vec::new()));
    }

    #[test]
    fn status_thresholds() {
        use SensorKind::*;
        assert_eq!(Status::classify(Temperature, 22.0), Status::Normal);
        assert_eq!(Status::classify(Temperature, 27.0), Status::Warning);
        assert_eq!(Status::classify(Temperature, 14.9), Status::Critical);
        assert_eq!(Status::classify(Humidity, 80.0), Status::Warning);
        assert_eq!(Status::classify(Humidity, 90.0), Status::Critical);
        assert_eq!(Status::classify(Pressure, 2000.0), Status::Normal);
    }

    #[test]
    fn frames_carry_sector_and_device_states() {
        let mut ctx = NodeContext::new(DeviceRegistry::with_board_pins(), Sector::new("B").unwrap());
        ctx.devices
            .commit(Device::MotorFan, true, &mut RecordingActuator::default());
        let readings = [
            Reading::new(SensorKind::Temperature, 31.0, Instant::from_secs(10)),
            Reading::new(SensorKind::Pressure, 1012.0, Instant::from_secs(10)),
        ];

        let messages = frames(&readings, &ctx);

        assert_eq!(messages.len(), 3);
        let Message::SensorData(summary) = &messages[0] else {
            panic!("expected sensor_data first, got {:?}", messages[0]);
        };
        assert_eq!(summary.sector, "B");
        assert_eq!(summary.temperature, Some(31.0));
        assert_eq!(summary.humidity, None);
        assert_eq!(summary.light, None);
        assert!(summary.devices.motor_fan);
        assert_eq!(
            messages[1],
            Message::DataInsert(DataInsert {
                table: "Data".into(),
                sector: "B".into(),
                device_id: 1,
                value: 31.0,
                unit: "°C".into(),
                status: "critical".into(),
            })
        );
    }
}
