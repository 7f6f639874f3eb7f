//! Supervisor loop
//!
//! Sequences the components once per tick with the priority link-up, then
//! session-up, then steady state. While the link is down nothing but
//! reattachment runs. Every failure below is turned into a log line and a
//! state regression; the next tick retries.

use crate::NodeConfig;
use crate::context::{NodeContext, Sector};
use crate::devices::{Actuator, DeviceRegistry};
use crate::dispatch::{self, CommandDispatcher};
use crate::protocol::{Message, WireCodec};
use crate::sensors::{BarometricSensor, ClimateSensor, LightSensor};
use crate::session::{SessionManager, Transport};
use crate::state_machine::SessionState;
use crate::telemetry::{self, TelemetryPublisher};
use crate::timer::{Clock, IntervalTimer};
use crate::wifi::{LinkManager, LinkState, Radio};
use embedded_hal::delay::DelayNs;
use log::{debug, info, warn};

/// What a tick ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPhase {
    /// Link down, only reattachment ran
    Reattaching,
    /// Link up but no session could be opened
    Connecting,
    /// Session open, commands and telemetry serviced
    Running,
}

pub struct Supervisor<R, T, C, A, CS, BS, LS>
where
    R: Radio,
    T: Transport,
    C: WireCodec,
    A: Actuator,
{
    config: NodeConfig,
    link: LinkManager<R>,
    session: SessionManager<T, C>,
    telemetry: TelemetryPublisher<CS, BS, LS>,
    dispatcher: CommandDispatcher,
    ctx: NodeContext,
    actuator: A,
    heartbeat: IntervalTimer,
    reattach: IntervalTimer,
}

impl<R, T, C, A, CS, BS, LS> Supervisor<R, T, C, A, CS, BS, LS>
where
    R: Radio,
    T: Transport,
    C: WireCodec,
    A: Actuator,
    CS: ClimateSensor,
    BS: BarometricSensor,
    LS: LightSensor,
{
    /// Assemble the node and drive every output to the registry's state
    pub fn new(
        config: NodeConfig,
        radio: R,
        transport: T,
        codec: C,
        devices: DeviceRegistry,
        mut actuator: A,
        telemetry: TelemetryPublisher<CS, BS, LS>,
    ) -> Self {
        devices.sync_outputs(&mut actuator);
        let sector = Sector::new(config.initial_sector).unwrap_or_default();
        let session = SessionManager::new(transport, codec, config.peer, config.heartbeat_timeout);

        Self {
            link: LinkManager::new(radio),
            session,
            telemetry,
            dispatcher: CommandDispatcher::new(),
            ctx: NodeContext::new(devices, sector),
            actuator,
            heartbeat: IntervalTimer::new(config.heartbeat_interval),
            reattach: IntervalTimer::new(config.reattach_backoff),
            config,
        }
    }

    pub fn link(&self) -> &LinkManager<R> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut LinkManager<R> {
        &mut self.link
    }

    pub fn session(&self) -> &SessionManager<T, C> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionManager<T, C> {
        &mut self.session
    }

    pub fn context(&self) -> &NodeContext {
        &self.ctx
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn telemetry(&self) -> &TelemetryPublisher<CS, BS, LS> {
        &self.telemetry
    }

    /// Run one supervisor iteration
    ///
    /// The only blocking waits are the bounded attach sequence and the
    /// heartbeat window, both driven through `clock`.
    pub fn tick<K: Clock + DelayNs>(&mut self, clock: &mut K) -> TickPhase {
        if !self.link.is_up() {
            if self.session.state() != SessionState::Closed {
                info!("[SUPERVISOR] Link down, closing session");
                self.session.close();
            }
            if !self.reattach_link(clock) {
                return TickPhase::Reattaching;
            }
        }

        if self.session.state() == SessionState::Degraded {
            info!("[SUPERVISOR] Session degraded, reopening");
            self.session.close();
        }

        if self.session.state() != SessionState::Open {
            if let Err(e) =
                self.session
                    .open(self.link.state(), &self.config.device_id, &self.ctx.sector)
            {
                warn!("[SUPERVISOR] Session open failed: {}", e);
                return TickPhase::Connecting;
            }
            self.heartbeat.mark(clock.now());
        }

        for _ in 0..self.config.max_frames_per_tick {
            let Some(frame) = self.session.receive() else {
                break;
            };
            self.dispatch(&frame);
        }

        if let Some(readings) = self.telemetry.tick(clock.now()) {
            self.publish(&telemetry::frames(&readings, &self.ctx));
        }

        if self.session.is_open() && self.heartbeat.is_due(clock.now()) {
            match self.session.heartbeat(clock) {
                Ok(frame) => self.dispatch(&frame),
                Err(e) => warn!("[SUPERVISOR] Heartbeat failed: {}", e),
            }
            self.heartbeat.mark(clock.now());
        }

        TickPhase::Running
    }

    /// Attempt a full attach sequence if the backoff allows, returns whether
    /// the link came up
    fn reattach_link<K: Clock + DelayNs>(&mut self, clock: &mut K) -> bool {
        if !self.reattach.is_due(clock.now()) {
            return false;
        }

        let state = self.link.attach(
            &self.config.credentials,
            self.config.attach_attempts,
            self.config.attempt_delay,
            clock,
        );
        self.reattach.mark(clock.now());

        if state == LinkState::Up {
            true
        } else {
            if let Some(e) = self.link.last_error() {
                warn!(
                    "[SUPERVISOR] Attach failed: {}, next try in {} ms",
                    e,
                    self.reattach.period().as_millis()
                );
            }
            false
        }
    }

    fn dispatch(&mut self, frame: &[u8]) {
        let reply = match self.dispatcher.handle(
            frame,
            self.session.codec(),
            &mut self.ctx,
            &mut self.actuator,
        ) {
            Ok(Some(ack)) => Some(ack.to_message()),
            Ok(None) => None,
            Err(e) => dispatch::rejection(&e),
        };

        if let Some(message) = reply {
            self.publish(core::slice::from_ref(&message));
        }
    }

    /// Send in order; whatever cannot be sent is dropped
    fn publish(&mut self, messages: &[Message]) {
        for (sent, message) in messages.iter().enumerate() {
            if let Err(e) = self.session.send_message(message) {
                warn!(
                    "[SUPERVISOR] Send failed: {}, dropping {} message(s)",
                    e,
                    messages.len() - sent
                );
                return;
            }
        }
        debug!("[SUPERVISOR] Sent {} message(s)", messages.len());
    }
}
