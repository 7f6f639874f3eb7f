//! Sensor collaborators
//!
//! Seams for the climate (temperature + humidity), barometric (temperature +
//! pressure) and light channels, plus I2C drivers for the DHT20 and BMP280
//! fitted on the board and the ADC-to-lux conversion.

use crate::config;
use crate::error::SensorError;
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use log::{info, warn};

/// 12-bit ADC full scale
pub const ADC_MAX: u16 = 4095;

/// Lux reported at ADC full scale
pub const LUX_FULL_SCALE: f32 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateSample {
    /// Degrees Celsius
    pub temperature: f32,
    /// Relative humidity in percent
    pub humidity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarometricSample {
    /// Degrees Celsius
    pub temperature: f32,
    /// Hectopascal
    pub pressure: f32,
}

pub trait ClimateSensor {
    fn read(&mut self) -> Result<ClimateSample, SensorError>;
}

pub trait BarometricSensor {
    fn read(&mut self) -> Result<BarometricSample, SensorError>;
}

pub trait LightSensor {
    /// Raw 12-bit ADC sample
    fn read_raw(&mut self) -> Result<u16, SensorError>;
}

/// Convert a raw ADC light sample to lux, linear and clamped to full scale
pub fn raw_to_lux(raw: u16) -> f32 {
    let raw = raw.min(ADC_MAX);
    raw as f32 * LUX_FULL_SCALE / ADC_MAX as f32
}

fn finite(value: f32) -> Result<f32, SensorError> {
    if value.is_nan() {
        Err(SensorError::NotANumber)
    } else {
        Ok(value)
    }
}

// ----------------------------------------------------------------------------
// DHT20 (AHT20 core) temperature / humidity sensor
// ----------------------------------------------------------------------------

const DHT20_CMD_MEASURE: [u8; 3] = [0xAC, 0x33, 0x00];
const DHT20_STATUS_BUSY: u8 = 0x80;
const DHT20_STATUS_CALIBRATED: u8 = 0x08;
const DHT20_CONVERSION_MS: u32 = 80;
const DHT20_FULL_SCALE: f32 = 1_048_576.0; // 2^20

/// CRC-8, polynomial 0x31, initial value 0xFF
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0xFFu8;
    for byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x31
            } else {
                crc << 1
            };
        }
    }
    crc
}

pub struct Dht20<I2C, D> {
    i2c: I2C,
    delay: D,
    address: u8,
}

impl<I2C: I2c, D: DelayNs> Dht20<I2C, D> {
    pub fn new(i2c: I2C, delay: D) -> Self {
        Self {
            i2c,
            delay,
            address: config::DHT20_ADDRESS,
        }
    }

    /// Check that the sensor answers on the bus
    pub fn begin(&mut self) -> Result<(), SensorError> {
        let mut status = [0u8; 1];
        self.i2c
            .read(self.address, &mut status)
            .map_err(|_| SensorError::Bus)?;
        if status[0] & DHT20_STATUS_CALIBRATED == 0 {
            warn!("[SENSOR] DHT20 reports uncalibrated state");
        }
        info!("[SENSOR] DHT20 connected");
        Ok(())
    }
}

impl<I2C: I2c, D: DelayNs> ClimateSensor for Dht20<I2C, D> {
    fn read(&mut self) -> Result<ClimateSample, SensorError> {
        self.i2c
            .write(self.address, &DHT20_CMD_MEASURE)
            .map_err(|_| SensorError::Bus)?;
        self.delay.delay_ms(DHT20_CONVERSION_MS);

        let mut frame = [0u8; 7];
        self.i2c
            .read(self.address, &mut frame)
            .map_err(|_| SensorError::Bus)?;

        if frame[0] & DHT20_STATUS_BUSY != 0 {
            return Err(SensorError::NotReady);
        }
        if crc8(&frame[..6]) != frame[6] {
            return Err(SensorError::Checksum);
        }

        let raw_humidity =
            ((frame[1] as u32) << 12) | ((frame[2] as u32) << 4) | ((frame[3] as u32) >> 4);
        let raw_temperature =
            (((frame[3] & 0x0F) as u32) << 16) | ((frame[4] as u32) << 8) | frame[5] as u32;

        Ok(ClimateSample {
            temperature: finite(raw_temperature as f32 / DHT20_FULL_SCALE * 200.0 - 50.0)?,
            humidity: finite(raw_humidity as f32 / DHT20_FULL_SCALE * 100.0)?,
        })
    }
}

// ----------------------------------------------------------------------------
// BMP280 temperature / pressure sensor
// ----------------------------------------------------------------------------

const BMP280_REG_CALIB: u8 = 0x88;
const BMP280_REG_CHIP_ID: u8 = 0xD0;
const BMP280_REG_CTRL_MEAS: u8 = 0xF4;
const BMP280_REG_CONFIG: u8 = 0xF5;
const BMP280_REG_DATA: u8 = 0xF7;
const BMP280_CHIP_ID: u8 = 0x58;
/// Normal mode, temperature x2, pressure x16
const BMP280_CTRL_MEAS: u8 = (0b010 << 5) | (0b101 << 2) | 0b11;
/// Standby 500 ms, IIR filter x16
const BMP280_CONFIG: u8 = (0b100 << 5) | (0b100 << 2);
/// Value reported for a skipped measurement
const BMP280_SKIPPED: i32 = 0x80000;

/// Factory trimming parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
    pub t1: u16,
    pub t2: i16,
    pub t3: i16,
    pub p1: u16,
    pub p2: i16,
    pub p3: i16,
    pub p4: i16,
    pub p5: i16,
    pub p6: i16,
    pub p7: i16,
    pub p8: i16,
    pub p9: i16,
}

impl Calibration {
    /// Decode the 24 little-endian bytes starting at 0x88
    pub fn from_bytes(raw: &[u8; 24]) -> Self {
        let u = |i: usize| u16::from_le_bytes([raw[i], raw[i + 1]]);
        let s = |i: usize| i16::from_le_bytes([raw[i], raw[i + 1]]);
        Self {
            t1: u(0),
            t2: s(2),
            t3: s(4),
            p1: u(6),
            p2: s(8),
            p3: s(10),
            p4: s(12),
            p5: s(14),
            p6: s(16),
            p7: s(18),
            p8: s(20),
            p9: s(22),
        }
    }

    /// Returns (temperature in 0.01 degC, t_fine)
    fn compensate_temperature(&self, adc_t: i32) -> (i32, i32) {
        let t1 = self.t1 as i32;
        let var1 = (((adc_t >> 3) - (t1 << 1)) * self.t2 as i32) >> 11;
        let var2 = (((((adc_t >> 4) - t1) * ((adc_t >> 4) - t1)) >> 12) * self.t3 as i32) >> 14;
        let t_fine = var1 + var2;
        ((t_fine * 5 + 128) >> 8, t_fine)
    }

    /// Pressure in Pa as Q24.8, `None` when the divisor is zero
    fn compensate_pressure(&self, adc_p: i32, t_fine: i32) -> Option<u32> {
        let mut var1 = t_fine as i64 - 128_000;
        let mut var2 = var1 * var1 * self.p6 as i64;
        var2 += (var1 * self.p5 as i64) << 17;
        var2 += (self.p4 as i64) << 35;
        var1 = ((var1 * var1 * self.p3 as i64) >> 8) + ((var1 * self.p2 as i64) << 12);
        var1 = (((1i64 << 47) + var1) * self.p1 as i64) >> 33;
        if var1 == 0 {
            return None;
        }
        let mut p = 1_048_576 - adc_p as i64;
        p = (((p << 31) - var2) * 3125) / var1;
        var1 = (self.p9 as i64 * (p >> 13) * (p >> 13)) >> 25;
        var2 = (self.p8 as i64 * p) >> 19;
        p = ((p + var1 + var2) >> 8) + ((self.p7 as i64) << 4);
        Some(p as u32)
    }
}

pub struct Bmp280<I2C> {
    i2c: I2C,
    address: u8,
    calibration: Option<Calibration>,
}

impl<I2C: I2c> Bmp280<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Self {
            i2c,
            address: config::BMP280_ADDRESS,
            calibration: None,
        }
    }

    /// Verify the chip, load calibration and start continuous sampling
    pub fn begin(&mut self) -> Result<(), SensorError> {
        let mut id = [0u8; 1];
        self.read_registers(BMP280_REG_CHIP_ID, &mut id)?;
        if id[0] != BMP280_CHIP_ID {
            warn!("[SENSOR] BMP280 not found (chip id 0x{:02x})", id[0]);
            return Err(SensorError::Unavailable);
        }

        let mut raw = [0u8; 24];
        self.read_registers(BMP280_REG_CALIB, &mut raw)?;
        self.calibration = Some(Calibration::from_bytes(&raw));

        self.write_register(BMP280_REG_CONFIG, BMP280_CONFIG)?;
        self.write_register(BMP280_REG_CTRL_MEAS, BMP280_CTRL_MEAS)?;
        info!("[SENSOR] BMP280 connected");
        Ok(())
    }

    fn read_registers(&mut self, register: u8, buffer: &mut [u8]) -> Result<(), SensorError> {
        self.i2c
            .write_read(self.address, &[register], buffer)
            .map_err(|_| SensorError::Bus)
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), SensorError> {
        self.i2c
            .write(self.address, &[register, value])
            .map_err(|_| SensorError::Bus)
    }
}

impl<I2C: I2c> BarometricSensor for Bmp280<I2C> {
    fn read(&mut self) -> Result<BarometricSample, SensorError> {
        let calibration = self.calibration.ok_or(SensorError::Unavailable)?;

        let mut data = [0u8; 6];
        self.read_registers(BMP280_REG_DATA, &mut data)?;
        let adc_p = ((data[0] as i32) << 12) | ((data[1] as i32) << 4) | ((data[2] as i32) >> 4);
        let adc_t = ((data[3] as i32) << 12) | ((data[4] as i32) << 4) | ((data[5] as i32) >> 4);

        if adc_t == BMP280_SKIPPED || adc_p == BMP280_SKIPPED {
            return Err(SensorError::NotANumber);
        }

        let (centi_celsius, t_fine) = calibration.compensate_temperature(adc_t);
        let pressure = calibration
            .compensate_pressure(adc_p, t_fine)
            .ok_or(SensorError::NotANumber)?;

        Ok(BarometricSample {
            temperature: finite(centi_celsius as f32 / 100.0)?,
            // Q24.8 Pa to hPa
            pressure: finite(pressure as f32 / 256.0 / 100.0)?,
        })
    }
}
