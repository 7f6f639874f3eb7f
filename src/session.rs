//! Session management
//!
//! Owns the persistent connection to the server on top of an established
//! link: handshake and registration, heartbeat liveness checks, and frame
//! hand-off in both directions. Heartbeats exist because the transport does
//! not reliably surface peer-side disconnects.

use crate::PeerAddress;
use crate::context::Sector;
use crate::error::{SessionError, TransportError};
use crate::protocol::{Message, WireCodec};
use crate::state_machine::{SessionEvent, SessionState, SessionStateMachine};
use crate::timer::Clock;
use crate::wifi::LinkState;
use alloc::string::ToString;
use alloc::vec::Vec;
use embassy_time::Duration;
use embedded_hal::delay::DelayNs;
use log::{debug, info, warn};

/// Poll spacing while waiting for heartbeat proof of life
const HEARTBEAT_POLL_MS: u64 = 50;

/// Connection-oriented transport seam
pub trait Transport {
    /// Connect to the peer; returns once the handshake is complete
    fn connect(&mut self, peer: &PeerAddress) -> Result<(), TransportError>;

    /// Write one complete frame
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Non-blocking poll for one inbound frame
    fn poll_recv(&mut self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Release the connection
    fn close(&mut self);
}

/// Session manager for the server connection
pub struct SessionManager<T: Transport, C: WireCodec> {
    transport: T,
    codec: C,
    machine: SessionStateMachine,
    peer: PeerAddress,
    heartbeat_timeout: Duration,
}

impl<T: Transport, C: WireCodec> SessionManager<T, C> {
    pub fn new(transport: T, codec: C, peer: PeerAddress, heartbeat_timeout: Duration) -> Self {
        Self {
            transport,
            codec,
            machine: SessionStateMachine::new(),
            peer,
            heartbeat_timeout,
        }
    }

    pub fn state(&self) -> SessionState {
        self.machine.get_current_state()
    }

    pub fn is_open(&self) -> bool {
        self.machine.is_open()
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Open the session and register the node
    ///
    /// Refuses without side effects unless the link is up. A degraded or
    /// half-open session is closed first; an open one is left alone.
    pub fn open(
        &mut self,
        link: LinkState,
        device_id: &str,
        sector: &Sector,
    ) -> Result<(), SessionError> {
        if link != LinkState::Up {
            return Err(SessionError::LinkDown);
        }

        match self.state() {
            SessionState::Open => return Ok(()),
            SessionState::Closed => {}
            SessionState::Opening | SessionState::Degraded => self.close(),
        }

        info!(
            "[SESSION] Connecting to {}:{}",
            self.peer.ip, self.peer.port
        );
        self.machine.handle_event(SessionEvent::OpenRequested);

        if let Err(e) = self.transport.connect(&self.peer) {
            self.machine.handle_event(SessionEvent::HandshakeFailed);
            warn!(
                "[SESSION] Handshake failed ({} in a row): {}",
                self.machine.get_failed_opens(),
                e
            );
            return Err(SessionError::OpenFailed(e));
        }

        let registration = Message::DeviceRegistration {
            device_id: device_id.to_string(),
            sector: sector.as_str().to_string(),
        };
        let frame = self.codec.encode(&registration);
        if let Err(e) = self.transport.send(&frame) {
            self.transport.close();
            self.machine.handle_event(SessionEvent::HandshakeFailed);
            warn!("[SESSION] Registration failed: {}", e);
            return Err(SessionError::OpenFailed(e));
        }

        self.machine.handle_event(SessionEvent::HandshakeAck);
        info!("[SESSION] Registered as {} in sector {}", device_id, sector);
        Ok(())
    }

    /// Probe liveness and wait a bounded time for any inbound frame
    ///
    /// Any frame counts as proof of life, not only a probe response. The
    /// frame is returned so the caller can still dispatch it. On timeout the
    /// session becomes `Degraded`.
    pub fn heartbeat<K: Clock + DelayNs>(
        &mut self,
        clock: &mut K,
    ) -> Result<Vec<u8>, SessionError> {
        if !self.is_open() {
            return Err(SessionError::NotOpen);
        }

        let ping = self.codec.encode(&Message::Ping);
        self.send(&ping)?;

        let deadline = clock.now() + self.heartbeat_timeout;
        loop {
            // only traffic strictly before the deadline counts
            let now = clock.now();
            if now >= deadline {
                warn!(
                    "[SESSION] No traffic within {} ms of heartbeat",
                    self.heartbeat_timeout.as_millis()
                );
                self.machine.handle_event(SessionEvent::HeartbeatTimeout);
                return Err(SessionError::HeartbeatTimeout);
            }

            match self.transport.poll_recv() {
                Ok(Some(frame)) => {
                    debug!("[SESSION] Heartbeat answered ({} bytes)", frame.len());
                    self.machine.handle_event(SessionEvent::FrameReceived);
                    return Ok(frame);
                }
                Ok(None) => {}
                Err(e) => return Err(self.lost(e)),
            }

            // last poll lands one millisecond before the deadline
            let step = (deadline - now)
                .as_millis()
                .saturating_sub(1)
                .clamp(1, HEARTBEAT_POLL_MS);
            clock.delay_ms(step as u32);
        }
    }

    /// Non-blocking poll for one inbound frame while open
    pub fn receive(&mut self) -> Option<Vec<u8>> {
        if !self.is_open() {
            return None;
        }

        match self.transport.poll_recv() {
            Ok(Some(frame)) => {
                self.machine.handle_event(SessionEvent::FrameReceived);
                Some(frame)
            }
            Ok(None) => None,
            Err(e) => {
                self.lost(e);
                None
            }
        }
    }

    /// Send one frame; fails with `NotOpen` unless the session is open
    pub fn send(&mut self, frame: &[u8]) -> Result<(), SessionError> {
        if !self.is_open() {
            return Err(SessionError::NotOpen);
        }
        self.transport.send(frame).map_err(|e| self.lost(e))
    }

    /// Encode and send a message
    pub fn send_message(&mut self, message: &Message) -> Result<(), SessionError> {
        let frame = self.codec.encode(message);
        self.send(&frame)
    }

    /// Release the transport and return to `Closed` from any state
    pub fn close(&mut self) {
        self.transport.close();
        self.machine.handle_event(SessionEvent::CloseRequested);
    }

    fn lost(&mut self, error: TransportError) -> SessionError {
        warn!("[SESSION] Transport lost: {}", error);
        self.transport.close();
        self.machine.handle_event(SessionEvent::TransportLost);
        SessionError::Transport(error)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::Transport;
    use crate::PeerAddress;
    use crate::error::TransportError;
    use crate::timer::fake::ManualClock;
    use alloc::collections::VecDeque;
    use alloc::vec::Vec;

    /// Transport with scripted connect results and timed inbound frames
    #[derive(Debug, Default)]
    pub struct ScriptedTransport {
        pub clock: ManualClock,
        pub connect_results: VecDeque<Result<(), TransportError>>,
        pub connects: u32,
        pub closes: u32,
        pub sent: Vec<Vec<u8>>,
        /// (arrival time in ms, frame)
        pub inbound: VecDeque<(u64, Vec<u8>)>,
        pub fail_sends: bool,
        pub fail_recv: bool,
    }

    impl ScriptedTransport {
        pub fn with_clock(clock: ManualClock) -> Self {
            Self {
                clock,
                ..Self::default()
            }
        }

        pub fn deliver_at(&mut self, at_ms: u64, frame: &[u8]) {
            self.inbound.push_back((at_ms, frame.to_vec()));
        }

        pub fn sent_json(&self) -> Vec<serde_json::Value> {
            self.sent
                .iter()
                .map(|frame| serde_json::from_slice(frame).unwrap())
                .collect()
        }
    }

    impl Transport for ScriptedTransport {
        fn connect(&mut self, _peer: &PeerAddress) -> Result<(), TransportError> {
            self.connects += 1;
            self.connect_results.pop_front().unwrap_or(Ok(()))
        }

        fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
            if self.fail_sends {
                return Err(TransportError::Write);
            }
            self.sent.push(frame.to_vec());
            Ok(())
        }

        fn poll_recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
            if self.fail_recv {
                return Err(TransportError::Closed);
            }
            match self.inbound.front() {
                Some((at, _)) if *at <= self.clock.millis() => {
                    Ok(self.inbound.pop_front().map(|(_, frame)| frame))
                }
                _ => Ok(None),
            }
        }

        fn close(&mut self) {
            self.closes += 1;
        }
    }
}
