//! Device session
//!
//! The result of a successful connection: an open link to a board that has
//! answered the Firmata handshake, plus the pins configured through it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::codec::{DecodedEvent, FirmwareVersion, PinMode};
use super::commands::Command;
use super::events::{EventQueue, EventSink};
use super::transport::{Link, PortId};
use super::ProtocolError;
use crate::clock::Clock;
use crate::profiles::ProfileName;

/// Largest PWM duty value
pub const MAX_PWM: u16 = 255;
/// Largest servo angle in degrees
pub const MAX_SERVO_ANGLE: u16 = 180;

/// A connected Firmata board, owned by the caller
pub struct DeviceSession {
    port: PortId,
    profile_used: ProfileName,
    firmware_version: FirmwareVersion,
    /// Pins whose mode-set command was transmitted, with that mode
    configured_pins: BTreeMap<u8, PinMode>,
    link: Option<Box<dyn Link>>,
    sink: EventSink,
    queue: EventQueue,
    clock: Arc<dyn Clock>,
    pin_mode_settle: Duration,
}

impl DeviceSession {
    pub(crate) fn new(
        port: PortId,
        profile_used: ProfileName,
        firmware_version: FirmwareVersion,
        link: Box<dyn Link>,
        events: (EventSink, EventQueue),
        clock: Arc<dyn Clock>,
        pin_mode_settle: Duration,
    ) -> Self {
        let (sink, queue) = events;
        Self {
            port,
            profile_used,
            firmware_version,
            configured_pins: BTreeMap::new(),
            link: Some(link),
            sink,
            queue,
            clock,
            pin_mode_settle,
        }
    }

    /// Port this session talks to
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Profile whose reset sequence brought the board up
    pub fn profile_used(&self) -> ProfileName {
        self.profile_used
    }

    /// Most recent version reported by the board
    pub fn firmware_version(&self) -> FirmwareVersion {
        self.firmware_version
    }

    /// Configured pins in ascending pin order
    pub fn configured_pins(&self) -> Vec<(u8, PinMode)> {
        self.configured_pins.iter().map(|(&p, &m)| (p, m)).collect()
    }

    /// Mode sent for `pin`, if any
    pub fn pin_mode(&self, pin: u8) -> Option<PinMode> {
        self.configured_pins.get(&pin).copied()
    }

    /// False once closed
    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    /// Drive a digital output pin.
    ///
    /// Only the bit of `pin` is set in the port message, so other output
    /// pins of the same 8-pin port are driven low.
    pub fn set_digital_output(&mut self, pin: u8, level: bool) -> Result<(), ProtocolError> {
        let write = Command::DigitalWrite { pin, level }.encode()?;
        self.ensure_mode(pin, PinMode::Output)?;
        self.send(&write)?;
        tracing::info!(port = %self.port, pin, level, "digital write");
        Ok(())
    }

    /// Set a PWM duty cycle; `value` is clamped to 0-255
    pub fn set_pwm_output(&mut self, pin: u8, value: u16) -> Result<(), ProtocolError> {
        let value = value.min(MAX_PWM);
        let write = Command::AnalogWrite { pin, value }.encode()?;
        self.ensure_mode(pin, PinMode::Pwm)?;
        self.send(&write)?;
        tracing::info!(port = %self.port, pin, value, "pwm write");
        Ok(())
    }

    /// Move a servo; `angle` is clamped to 0-180 degrees
    pub fn set_servo_position(&mut self, pin: u8, angle: u16) -> Result<(), ProtocolError> {
        let angle = angle.min(MAX_SERVO_ANGLE);
        let write = Command::AnalogWrite { pin, value: angle }.encode()?;
        self.ensure_mode(pin, PinMode::Servo)?;
        self.send(&write)?;
        tracing::info!(port = %self.port, pin, angle, "servo write");
        Ok(())
    }

    /// Send a version query; the answer shows up through [`Self::poll_events`]
    pub fn request_version(&mut self) -> Result<(), ProtocolError> {
        let query = Command::QueryVersion.encode()?;
        self.send(&query)?;
        tracing::debug!(port = %self.port, "version request sent");
        Ok(())
    }

    /// Decode whatever the board sent since the last call.
    ///
    /// A version report updates [`Self::firmware_version`].
    pub fn poll_events(&mut self) -> Result<Vec<DecodedEvent>, ProtocolError> {
        let link = self.link.as_deref_mut().ok_or(ProtocolError::NotConnected)?;
        self.sink.pump(link)?;
        let events = self.queue.drain();
        for event in &events {
            if let DecodedEvent::VersionReport(version) = event {
                self.firmware_version = *version;
            }
        }
        Ok(events)
    }

    /// Release the port and forget configured pins. Safe to call twice.
    pub fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
            tracing::info!(port = %self.port, "session closed");
        }
        self.configured_pins.clear();
        self.sink.reset();
    }

    /// Send the pin-mode command unless the pin already has a mode.
    /// A pin keeps its first mode for the life of the session.
    fn ensure_mode(&mut self, pin: u8, mode: PinMode) -> Result<(), ProtocolError> {
        if let Some(existing) = self.configured_pins.get(&pin) {
            if *existing != mode {
                tracing::debug!(
                    port = %self.port,
                    pin,
                    "pin already configured as {:?}, not switching to {:?}",
                    existing,
                    mode
                );
            }
            return Ok(());
        }

        let command = Command::SetPinMode { pin, mode };
        let bytes = command.encode()?;
        self.send(&bytes)?;
        // Record only after the bytes actually went out
        self.configured_pins.insert(pin, mode);
        self.clock.sleep(self.pin_mode_settle);
        tracing::debug!(port = %self.port, pin, ?mode, "pin mode set");
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let link = self.link.as_deref_mut().ok_or(ProtocolError::NotConnected)?;
        link.write_all(bytes)
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("port", &self.port)
            .field("profile_used", &self.profile_used)
            .field("firmware_version", &self.firmware_version)
            .field("configured_pins", &self.configured_pins)
            .field("open", &self.link.is_some())
            .finish()
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}
