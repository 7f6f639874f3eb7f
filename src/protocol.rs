//! Wire protocol
//!
//! Every frame is one JSON object whose `type` field selects the message
//! kind. Field names are the contract with the server. Decoding happens once,
//! here, into the closed [`Message`] enum; device and sector names stay plain
//! strings at this boundary and are checked by the dispatcher.

use crate::config;
use crate::devices::DeviceStates;
use crate::error::ParseError;
use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

/// Table name the server stores per-quantity rows in
pub const DATA_TABLE: &str = "Data";

/// All message kinds exchanged with the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Outbound, sent right after the session handshake
    DeviceRegistration {
        #[serde(rename = "deviceId")]
        device_id: String,
        sector: String,
    },
    /// Outbound liveness probe; any inbound frame answers it
    Ping,
    /// Outbound, one per publish cycle
    SensorData(SensorData),
    /// Outbound, one per physical quantity per publish cycle
    DataInsert(DataInsert),
    /// Inbound actuation request
    DeviceCommand(DeviceCommand),
    /// Outbound answer to a device command
    CommandAck(CommandAck),
    /// Any kind this firmware does not know yet
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorData {
    pub sector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f32>,
    /// Always present, `null` when the light channel could not be sampled
    pub light: Option<f32>,
    pub devices: DeviceStates,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataInsert {
    pub table: String,
    pub sector: String,
    pub device_id: u32,
    pub value: f32,
    pub unit: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCommand {
    pub sector: String,
    pub device: String,
    pub status: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandAck {
    pub device: String,
    pub status: bool,
    pub success: bool,
}

/// Message encoder/decoder seam
pub trait WireCodec {
    fn encode(&self, message: &Message) -> Vec<u8>;
    fn decode(&self, frame: &[u8]) -> Result<Message, ParseError>;
}

/// JSON codec used on the wire
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl WireCodec for JsonCodec {
    fn encode(&self, message: &Message) -> Vec<u8> {
        // Plain structs with string keys always serialise
        serde_json::to_vec(message).unwrap_or_default()
    }

    fn decode(&self, frame: &[u8]) -> Result<Message, ParseError> {
        if frame.len() > config::MAX_FRAME_LEN {
            return Err(ParseError::TooLarge {
                limit: config::MAX_FRAME_LEN,
            });
        }
        Ok(serde_json::from_slice(frame)?)
    }
}

/// Splits a byte stream into newline-terminated frames
///
/// Frames longer than `N` are discarded up to the next newline and reported
/// once as `ParseError::TooLarge`.
#[derive(Debug)]
pub struct LineFramer<const N: usize> {
    buffer: heapless::Vec<u8, N>,
    overflowed: bool,
}

impl<const N: usize> LineFramer<N> {
    pub fn new() -> Self {
        Self {
            buffer: heapless::Vec::new(),
            overflowed: false,
        }
    }

    /// Feed one byte, returning a frame when a line completes
    pub fn push(&mut self, byte: u8) -> Option<Result<Vec<u8>, ParseError>> {
        match byte {
            b'\n' => {
                if self.overflowed {
                    self.overflowed = false;
                    self.buffer.clear();
                    return Some(Err(ParseError::TooLarge { limit: N }));
                }
                // Tolerate CRLF peers
                if self.buffer.last() == Some(&b'\r') {
                    self.buffer.pop();
                }
                if self.buffer.is_empty() {
                    return None;
                }
                let frame = self.buffer.to_vec();
                self.buffer.clear();
                Some(Ok(frame))
            }
            _ if self.overflowed => None,
            _ => {
                if self.buffer.push(byte).is_err() {
                    self.overflowed = true;
                }
                None
            }
        }
    }

    /// Drop any partial frame, used when the connection is replaced
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.overflowed = false;
    }
}

impl<const N: usize> Default for LineFramer<N> {
    fn default() -> Self {
        Self::new()
    }
}
