//! WiFi link management
//!
//! Owns the radio association state. Attach is a bounded blocking sequence;
//! `is_up` is a cheap poll consulted once per supervisor tick. No retry state
//! survives between attach sequences, a flapping link simply repeats them.

use crate::Credentials;
use crate::error::LinkError;
use embassy_time::Duration;
use embedded_hal::delay::DelayNs;
use log::{info, warn};

/// Radio association state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Down,
    Attaching,
    Up,
}

/// Radio driver seam
pub trait Radio {
    /// Apply credentials and request association, without waiting for it
    fn begin_association(&mut self, credentials: &Credentials) -> Result<(), LinkError>;

    /// Whether the driver currently reports an association with an address
    fn is_associated(&mut self) -> bool;
}

/// Link manager for handling network connectivity
pub struct LinkManager<R: Radio> {
    radio: R,
    state: LinkState,
    last_error: Option<LinkError>,
}

impl<R: Radio> LinkManager<R> {
    /// Create a new link manager, the link starts down
    pub fn new(radio: R) -> Self {
        Self {
            radio,
            state: LinkState::Down,
            last_error: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Error from the most recent failed attach, cleared on success
    pub fn last_error(&self) -> Option<LinkError> {
        self.last_error
    }

    /// Get the radio for advanced operations
    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Associate with the network, polling up to `max_attempts` times
    ///
    /// Fails soft: an exhausted budget returns `LinkState::Down` and records
    /// the error instead of propagating it.
    pub fn attach(
        &mut self,
        credentials: &Credentials,
        max_attempts: u32,
        attempt_delay: Duration,
        delay: &mut impl DelayNs,
    ) -> LinkState {
        info!("[WIFI] Connecting to WiFi network: {}", credentials.ssid);
        self.state = LinkState::Attaching;

        if let Err(e) = self.radio.begin_association(credentials) {
            warn!("[WIFI] Radio rejected association request: {}", e);
            return self.fail(e);
        }

        let delay_ms = attempt_delay.as_millis().min(u32::MAX as u64) as u32;
        let mut attempts = 0;
        loop {
            if self.radio.is_associated() {
                info!("[WIFI] Successfully connected after {} polls", attempts);
                self.state = LinkState::Up;
                self.last_error = None;
                return self.state;
            }
            if attempts >= max_attempts {
                break;
            }
            attempts += 1;
            delay.delay_ms(delay_ms);
        }

        warn!(
            "[WIFI] Failed to connect to WiFi network after {} attempts",
            attempts
        );
        self.fail(LinkError::AttachExhausted { attempts })
    }

    /// Poll the radio and report whether the link is up
    pub fn is_up(&mut self) -> bool {
        let associated = self.radio.is_associated();

        match (self.state, associated) {
            (LinkState::Up, false) => {
                warn!("[WIFI] WiFi connection lost!");
                self.state = LinkState::Down;
            }
            (LinkState::Down, true) => {
                info!("[WIFI] WiFi connection restored!");
                self.state = LinkState::Up;
                self.last_error = None;
            }
            _ => {}
        }

        self.state == LinkState::Up
    }

    fn fail(&mut self, error: LinkError) -> LinkState {
        self.state = LinkState::Down;
        self.last_error = Some(error);
        self.state
    }
}
