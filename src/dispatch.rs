//! Inbound command dispatch
//!
//! Turns a session frame into an actuator commit and an acknowledgement.
//! Performs no I/O besides the actuator write; sending the ack is the
//! supervisor's job.

use crate::context::{NodeContext, Sector};
use crate::devices::{Actuator, Device};
use crate::error::DispatchError;
use crate::protocol::{CommandAck, Message, WireCodec};
use alloc::string::ToString;
use log::{debug, info, warn};

/// Result of an applied command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub device: Device,
    pub new_state: bool,
    pub success: bool,
}

impl Ack {
    pub fn to_message(&self) -> Message {
        Message::CommandAck(CommandAck {
            device: self.device.name().to_string(),
            status: self.new_state,
            success: self.success,
        })
    }
}

/// Negative acknowledgement for a command naming an unknown device
pub fn rejection(error: &DispatchError) -> Option<Message> {
    match error {
        DispatchError::UnknownDevice { device, status } => {
            Some(Message::CommandAck(CommandAck {
                device: device.clone(),
                status: *status,
                success: false,
            }))
        }
        _ => None,
    }
}

/// Command dispatcher with simple counters for diagnostics
#[derive(Debug, Default)]
pub struct CommandDispatcher {
    applied: u32,
    rejected: u32,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied(&self) -> u32 {
        self.applied
    }

    pub fn rejected(&self) -> u32 {
        self.rejected
    }

    /// Handle one inbound frame
    ///
    /// Returns `Ok(None)` for message kinds that are not device commands.
    /// A malformed frame never touches the context.
    pub fn handle(
        &mut self,
        frame: &[u8],
        codec: &impl WireCodec,
        ctx: &mut NodeContext,
        actuator: &mut impl Actuator,
    ) -> Result<Option<Ack>, DispatchError> {
        let result = Self::apply(frame, codec, ctx, actuator);
        match &result {
            Ok(Some(ack)) => {
                self.applied = self.applied.wrapping_add(1);
                info!(
                    "[DISPATCH] {} -> {}",
                    ack.device.name(),
                    if ack.new_state { "on" } else { "off" }
                );
            }
            Ok(None) => {}
            Err(e) => {
                self.rejected = self.rejected.wrapping_add(1);
                warn!("[DISPATCH] Command rejected: {}", e);
            }
        }
        result
    }

    fn apply(
        frame: &[u8],
        codec: &impl WireCodec,
        ctx: &mut NodeContext,
        actuator: &mut impl Actuator,
    ) -> Result<Option<Ack>, DispatchError> {
        let command = match codec.decode(frame)? {
            Message::DeviceCommand(command) => command,
            other => {
                debug!("[DISPATCH] Ignoring {:?}", other);
                return Ok(None);
            }
        };

        if command.sector != ctx.sector.as_str() {
            let sector = Sector::new(&command.sector).ok_or(DispatchError::SectorTooLong)?;
            info!("[DISPATCH] Sector {} -> {}", ctx.sector, sector);
            ctx.sector = sector;
        }

        let Some(device) = Device::from_name(&command.device) else {
            return Err(DispatchError::UnknownDevice {
                device: command.device,
                status: command.status,
            });
        };

        ctx.devices.commit(device, command.status, actuator);

        Ok(Some(Ack {
            device,
            new_state: command.status,
            success: true,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::fake::RecordingActuator;
    use crate::devices::{DeviceRegistry, OutputChannel};
    use crate::error::ParseError;
    use crate::protocol::JsonCodec;

    fn context() -> NodeContext {
        NodeContext::new(
            DeviceRegistry::new(OutputChannel(5), OutputChannel(6), OutputChannel(7)),
            Sector::new("A").unwrap(),
        )
    }

    #[test]
    fn command_switches_sector_and_device() {
        let mut ctx = context();
        let mut actuator = RecordingActuator::default();
        let mut dispatcher = CommandDispatcher::new();

        let ack = dispatcher
            .handle(
                br#"{"type":"device_command","sector":"B","device":"Pump","status":true}"#,
                &JsonCodec,
                &mut ctx,
                &mut actuator,
            )
            .unwrap();

        assert_eq!(
            ack,
            Some(Ack {
                device: Device::Pump,
                new_state: true,
                success: true
            })
        );
        assert_eq!(ctx.sector.as_str(), "B");
        assert!(ctx.devices.is_on(Device::Pump));
        assert_eq!(actuator.writes, [(OutputChannel(7), true)]);
        assert_eq!(dispatcher.applied(), 1);
    }

    /// Output that never completes its write
    struct StuckOutput;

    impl Actuator for StuckOutput {
        fn set_output(&mut self, channel: OutputChannel, _on: bool) {
            panic!("GPIO{} write did not complete", channel.0);
        }
    }

    #[test]
    fn registry_is_committed_before_the_output_write() {
        let mut ctx = context();
        let mut dispatcher = CommandDispatcher::new();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            dispatcher.handle(
                br#"{"type":"device_command","sector":"A","device":"Light","status":true}"#,
                &JsonCodec,
                &mut ctx,
                &mut StuckOutput,
            )
        }));

        assert!(outcome.is_err());
        assert!(ctx.devices.is_on(Device::Light));
    }

    #[test]
    fn malformed_frame_changes_nothing() {
        let mut ctx = context();
        let before = ctx.clone();
        let mut actuator = RecordingActuator::default();
        let mut dispatcher = CommandDispatcher::new();

        let result = dispatcher.handle(
            br#"{"type":"device_command","sector":"B","device":"Pump""#,
            &JsonCodec,
            &mut ctx,
            &mut actuator,
        );

        assert!(matches!(
            result,
            Err(DispatchError::Malformed(ParseError::Json { .. }))
        ));
        assert_eq!(ctx.sector, before.sector);
        assert_eq!(ctx.devices.snapshot(), before.devices.snapshot());
        assert!(actuator.writes.is_empty());
        assert_eq!(dispatcher.rejected(), 1);
    }

    #[test]
    fn unknown_device_is_not_actuated() {
        let mut ctx = context();
        let mut actuator = RecordingActuator::default();

        let result = CommandDispatcher::new().handle(
            br#"{"type":"device_command","sector":"A","device":"Heater","status":true}"#,
            &JsonCodec,
            &mut ctx,
            &mut actuator,
        );

        let err = result.unwrap_err();
        assert_eq!(
            err,
            DispatchError::UnknownDevice {
                device: "Heater".into(),
                status: true
            }
        );
        assert!(actuator.writes.is_empty());
        assert_eq!(
            rejection(&err),
            Some(Message::CommandAck(CommandAck {
                device: "Heater".into(),
                status: true,
                success: false
            }))
        );
    }

    #[test]
    fn other_message_kinds_are_ignored() {
        let mut ctx = context();
        let mut actuator = RecordingActuator::default();
        let mut dispatcher = CommandDispatcher::new();

        for frame in [
            &br#"{"type":"ping"}"#[..],
            &br#"{"type":"threshold","sector":"C"}"#[..],
        ] {
            assert_eq!(
                dispatcher.handle(frame, &JsonCodec, &mut ctx, &mut actuator),
                Ok(None)
            );
        }
        assert_eq!(ctx.sector.as_str(), "A");
        assert!(actuator.writes.is_empty());
        assert_eq!(dispatcher.rejected(), 0);
    }

    #[test]
    fn oversized_sector_is_rejected_before_any_change() {
        let mut ctx = context();
        let mut actuator = RecordingActuator::default();

        let result = CommandDispatcher::new().handle(
            br#"{"type":"device_command","sector":"greenhouse-north-wing","device":"Light","status":true}"#,
            &JsonCodec,
            &mut ctx,
            &mut actuator,
        );

        assert_eq!(result, Err(DispatchError::SectorTooLong));
        assert_eq!(ctx.sector.as_str(), "A");
        assert!(actuator.writes.is_empty());
    }

    #[test]
    fn ack_message_uses_wire_name() {
        let ack = Ack {
            device: Device::MotorFan,
            new_state: false,
            success: true,
        };
        assert_eq!(
            ack.to_message(),
            Message::CommandAck(CommandAck {
                device: "Motor Fan".into(),
                status: false,
                success: true
            })
        );
    }
}
