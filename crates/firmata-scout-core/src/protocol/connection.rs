//! Connection management
//!
//! Drives one port through a profile's reset sequence and the Firmata
//! version handshake, and layers the retry policy on top:
//!
//! ```text
//! Idle -> Resetting -> AwaitingHandshake -> Connected
//!             |               |
//!             +----> Failed <-+
//! ```
//!
//! A single call to [`Connector::connect`] is one attempt. Retries, profile
//! round-robin and remembered profiles live in the `connect_*` methods.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::codec::{encode_version_query, FirmwareVersion};
use super::events::{event_channel, EventQueue, EventSink};
use super::serial::{SerialTransport, SystemPorts};
use super::session::DeviceSession;
use super::transport::{ControlLine, LineSettings, Link, PortEnumerator, PortId, Transport};
use super::{ProtocolError, DEFAULT_BAUD_RATE};
use crate::clock::{Clock, SystemClock};
use crate::profiles::{ProfileName, ResetProfile, ResetStep};
use crate::resolver::resolve;

/// Connection state of the most recent attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No attempt running
    Idle,
    /// Running the profile's reset steps
    Resetting,
    /// Version query sent, polling for the report
    AwaitingHandshake,
    /// Version report received; a session was handed to the caller
    Connected,
    /// Attempt over without a version report
    Failed,
}

/// One try of one profile on one port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionAttempt {
    /// Port the attempt was made on
    pub port: PortId,
    /// Profile whose reset sequence was run
    pub profile: ProfileName,
    /// Zero-based index among all attempts this connector has made
    pub attempt_index: u32,
    /// Clock time at which the attempt started
    pub started_at: Duration,
}

/// Timing and retry settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Baud rate used for every open
    pub baud_rate: u32,
    /// Re-send the version query every this many poll ticks
    pub requery_every_ticks: u32,
    /// Pause between attempts when retrying one profile
    pub attempt_pause_ms: u64,
    /// Attempts spent on a remembered profile
    pub known_profile_attempts: u32,
    /// Pause between attempts on a remembered profile
    pub known_profile_pause_ms: u64,
    /// Pause after each profile during round-robin
    pub profile_pause_ms: u64,
    /// Pause between round-robin rounds
    pub round_pause_ms: u64,
    /// Pause after a pin-mode command before the pin is used
    pub pin_mode_settle_ms: u64,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            requery_every_ticks: super::DEFAULT_REQUERY_TICKS,
            attempt_pause_ms: 1000,
            known_profile_attempts: 3,
            known_profile_pause_ms: 800,
            profile_pause_ms: 500,
            round_pause_ms: 1000,
            pin_mode_settle_ms: 50,
        }
    }
}

impl ConnectorConfig {
    /// Reject settings that would make a retry loop empty or unbounded
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.baud_rate == 0 {
            return Err(ProtocolError::Config("baud_rate must be positive".into()));
        }
        if self.requery_every_ticks == 0 {
            return Err(ProtocolError::Config(
                "requery_every_ticks must be at least 1".into(),
            ));
        }
        if self.known_profile_attempts == 0 {
            return Err(ProtocolError::Config(
                "known_profile_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Scoped ownership of the port during one attempt.
///
/// Whatever link is open when the guard drops gets closed, so every exit
/// path of an attempt releases the port.
struct PortGuard<'a> {
    transport: &'a dyn Transport,
    port: &'a str,
    settings: LineSettings,
    link: Option<Box<dyn Link>>,
}

impl<'a> PortGuard<'a> {
    fn new(transport: &'a dyn Transport, port: &'a str, baud_rate: u32) -> Self {
        Self {
            transport,
            port,
            settings: LineSettings {
                baud_rate,
                ..LineSettings::default()
            },
            link: None,
        }
    }

    fn open(&mut self) -> Result<(), ProtocolError> {
        // Never hold two handles to the same port
        self.close();
        self.link = Some(self.transport.open(self.port, &self.settings)?);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
        }
    }

    fn set_control_line(&mut self, line: ControlLine, level: bool) -> Result<(), ProtocolError> {
        self.settings.control_lines.set(line, level);
        match self.link.as_deref_mut() {
            Some(link) => link.set_control_line(line, level),
            None => Ok(()),
        }
    }

    fn link(&mut self) -> Result<&mut (dyn Link + 'static), ProtocolError> {
        self.link.as_deref_mut().ok_or_else(|| {
            ProtocolError::TransportIoFailed("reset sequence left the port closed".into())
        })
    }

    /// Hand the open link over to the caller
    fn release(mut self) -> Option<Box<dyn Link>> {
        self.link.take()
    }
}

impl Drop for PortGuard<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Establishes Firmata sessions on ports
pub struct Connector {
    transport: Arc<dyn Transport>,
    ports: Arc<dyn PortEnumerator>,
    clock: Arc<dyn Clock>,
    config: ConnectorConfig,
    /// Profile that last worked per port (this run only)
    known_profiles: HashMap<PortId, ProfileName>,
    state: ConnectionState,
    attempts_made: u32,
    last_attempt: Option<ConnectionAttempt>,
}

impl Connector {
    /// Connector with default settings
    pub fn new(
        transport: Arc<dyn Transport>,
        ports: Arc<dyn PortEnumerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_config(transport, ports, clock, ConnectorConfig::default())
    }

    /// Connector with explicit settings
    pub fn with_config(
        transport: Arc<dyn Transport>,
        ports: Arc<dyn PortEnumerator>,
        clock: Arc<dyn Clock>,
        config: ConnectorConfig,
    ) -> Self {
        Self {
            transport,
            ports,
            clock,
            config,
            known_profiles: HashMap::new(),
            state: ConnectionState::Idle,
            attempts_made: 0,
            last_attempt: None,
        }
    }

    /// Connector for real serial ports and wall-clock time
    pub fn serial(config: ConnectorConfig) -> Self {
        Self::with_config(
            Arc::new(SerialTransport),
            Arc::new(SystemPorts),
            Arc::new(SystemClock::new()),
            config,
        )
    }

    /// Settings in use
    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Clock used for every wait
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Port enumerator used by scans
    pub fn ports(&self) -> &Arc<dyn PortEnumerator> {
        &self.ports
    }

    /// State of the most recent attempt
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Most recent attempt, if any
    pub fn last_attempt(&self) -> Option<&ConnectionAttempt> {
        self.last_attempt.as_ref()
    }

    /// Total single attempts made so far
    pub fn attempts_made(&self) -> u32 {
        self.attempts_made
    }

    /// Profile that worked for `port` earlier in this run
    pub fn known_profile(&self, port: &str) -> Option<ProfileName> {
        self.known_profiles.get(port).copied()
    }

    /// Seed the memory, e.g. with what a scan found
    pub fn remember_profile(&mut self, port: impl Into<PortId>, profile: ProfileName) {
        self.known_profiles.insert(port.into(), profile);
    }

    /// Drop the remembered profile for `port`
    pub fn forget_profile(&mut self, port: &str) -> Option<ProfileName> {
        self.known_profiles.remove(port)
    }

    /// One attempt: reset with `profile`, then wait for a version report.
    ///
    /// On failure the port is closed before this returns.
    pub fn connect(
        &mut self,
        port: &str,
        profile: ProfileName,
    ) -> Result<DeviceSession, ProtocolError> {
        let attempt = ConnectionAttempt {
            port: port.to_string(),
            profile,
            attempt_index: self.attempts_made,
            started_at: self.clock.now(),
        };
        self.attempts_made += 1;
        self.last_attempt = Some(attempt.clone());

        let transport = Arc::clone(&self.transport);
        let result = self.run_attempt(transport.as_ref(), &attempt, profile.profile());
        match result {
            Ok((link, version, events)) => {
                self.state = ConnectionState::Connected;
                self.known_profiles.insert(port.to_string(), profile);
                tracing::info!(port, %profile, %version, "Firmata device connected");
                Ok(DeviceSession::new(
                    port.to_string(),
                    profile,
                    version,
                    link,
                    events,
                    Arc::clone(&self.clock),
                    Duration::from_millis(self.config.pin_mode_settle_ms),
                ))
            }
            Err(e) => {
                self.state = ConnectionState::Failed;
                tracing::debug!(port, %profile, attempt = attempt.attempt_index, "attempt failed: {e}");
                Err(e)
            }
        }
    }

    fn run_attempt(
        &mut self,
        transport: &dyn Transport,
        attempt: &ConnectionAttempt,
        profile: &ResetProfile,
    ) -> Result<(Box<dyn Link>, FirmwareVersion, (EventSink, EventQueue)), ProtocolError> {
        self.state = ConnectionState::Idle;
        if !self.ports.is_available(&attempt.port) {
            return Err(ProtocolError::PortUnavailable(attempt.port.clone()));
        }

        self.state = ConnectionState::Resetting;
        tracing::debug!(port = %attempt.port, profile = %profile.name, "applying reset sequence");
        let mut guard = PortGuard::new(transport, &attempt.port, self.config.baud_rate);
        for step in profile.reset_steps {
            match *step {
                ResetStep::Open => guard.open()?,
                ResetStep::Close => guard.close(),
                ResetStep::Wait(ms) => self.clock.sleep(Duration::from_millis(ms)),
                ResetStep::SetControlLine(line, level) => guard.set_control_line(line, level)?,
            }
        }

        // Anything received during boot is bootloader chatter
        let (mut sink, queue) = event_channel();
        let link = guard.link()?;
        link.discard_buffers()?;
        link.write_all(&encode_version_query())?;
        self.state = ConnectionState::AwaitingHandshake;

        let tick = Duration::from_millis(profile.handshake_delay_ms);
        for poll in 0..profile.handshake_attempts {
            if poll > 0 && poll % self.config.requery_every_ticks == 0 {
                tracing::debug!(port = %attempt.port, poll, "re-sending version query");
                guard.link()?.write_all(&encode_version_query())?;
            }
            self.clock.sleep(tick);
            sink.pump(guard.link()?)?;
            if let Some(version) = queue.latest_version() {
                let link = guard.release().ok_or(ProtocolError::NotConnected)?;
                return Ok((link, version, (sink, queue)));
            }
        }

        Err(ProtocolError::HandshakeTimeout {
            polls: profile.handshake_attempts,
        })
    }

    /// Retry one profile up to `attempts` times, pausing in between
    pub fn connect_with_profile(
        &mut self,
        port: &str,
        profile: ProfileName,
        attempts: u32,
    ) -> Result<DeviceSession, ProtocolError> {
        let pause = Duration::from_millis(self.config.attempt_pause_ms);
        self.retry_profile(port, profile, attempts, pause)
    }

    fn retry_profile(
        &mut self,
        port: &str,
        profile: ProfileName,
        attempts: u32,
        pause: Duration,
    ) -> Result<DeviceSession, ProtocolError> {
        if attempts == 0 {
            return Err(ProtocolError::Config("attempts must be at least 1".into()));
        }

        let mut last = None;
        for attempt in 1..=attempts {
            tracing::info!(port, %profile, attempt, attempts, "trying profile");
            match self.connect(port, profile) {
                Ok(session) => return Ok(session),
                Err(e) => {
                    tracing::warn!(port, %profile, attempt, "attempt failed: {e}");
                    last = Some(e);
                }
            }
            if attempt < attempts {
                self.clock.sleep(pause);
            }
        }

        Err(exhausted(port, attempts, last))
    }

    /// Connect without knowing the board type.
    ///
    /// A profile remembered for this port is used directly. Otherwise every
    /// profile is tried in round-robin order for up to `rounds` rounds; a
    /// profile named in `preferred` is tried first.
    pub fn connect_auto(
        &mut self,
        port: &str,
        rounds: u32,
        preferred: Option<&str>,
    ) -> Result<DeviceSession, ProtocolError> {
        if let Some(profile) = self.known_profile(port) {
            tracing::info!(port, %profile, "using known profile");
            let attempts = self.config.known_profile_attempts;
            let pause = Duration::from_millis(self.config.known_profile_pause_ms);
            return self.retry_profile(port, profile, attempts, pause);
        }

        if rounds == 0 {
            return Err(ProtocolError::Config("rounds must be at least 1".into()));
        }

        let order = round_robin_order(preferred);
        let profile_pause = Duration::from_millis(self.config.profile_pause_ms);
        let round_pause = Duration::from_millis(self.config.round_pause_ms);
        let mut tried = 0;
        let mut last = None;

        for round in 1..=rounds {
            tracing::info!(port, round, rounds, "connection round");
            for profile in order {
                tried += 1;
                match self.connect(port, profile) {
                    Ok(session) => return Ok(session),
                    Err(e) => {
                        tracing::warn!(port, %profile, round, "profile failed: {e}");
                        last = Some(e);
                    }
                }
                self.clock.sleep(profile_pause);
            }
            if round < rounds {
                self.clock.sleep(round_pause);
            }
        }

        tracing::warn!(port, rounds, "no Firmata device found");
        Err(exhausted(port, tried, last))
    }

    /// Connect using a friendly device description to pick the profile.
    /// Descriptions that match no rule fall back to a 2-round round-robin.
    pub fn connect_with_device_type(
        &mut self,
        port: &str,
        description: &str,
    ) -> Result<DeviceSession, ProtocolError> {
        match resolve(description) {
            Some(hint) => {
                tracing::info!(port, description, profile = %hint.profile, "device type resolved");
                self.connect_with_profile(port, hint.profile, hint.attempts)
            }
            None => {
                tracing::info!(port, description, "device type unknown, trying all profiles");
                self.connect_auto(port, 2, None)
            }
        }
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("config", &self.config)
            .field("known_profiles", &self.known_profiles)
            .field("state", &self.state)
            .field("attempts_made", &self.attempts_made)
            .finish()
    }
}

/// Round-robin order with the profile named in `preferred` moved to the front
pub fn round_robin_order(preferred: Option<&str>) -> [ProfileName; 4] {
    let mut order = ProfileName::ROUND_ROBIN;
    if let Some(found) = preferred.and_then(ProfileName::find_in) {
        if let Some(idx) = order.iter().position(|p| *p == found) {
            order[..=idx].rotate_right(1);
        }
    }
    order
}

fn exhausted(port: &str, attempts: u32, last: Option<ProtocolError>) -> ProtocolError {
    ProtocolError::AttemptsExhausted {
        port: port.to_string(),
        attempts,
        last: Box::new(last.unwrap_or(ProtocolError::HandshakeTimeout { polls: 0 })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_config_default() {
        let config = ConnectorConfig::default();
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.requery_every_ticks, 4);
        assert_eq!(config.profile_pause_ms, 500);
        assert_eq!(config.round_pause_ms, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = ConnectorConfig::default();
        config.requery_every_ticks = 0;
        assert!(matches!(config.validate(), Err(ProtocolError::Config(_))));
    }

    #[test]
    fn test_round_robin_order_default() {
        assert_eq!(
            round_robin_order(None),
            [
                ProfileName::Standard,
                ProfileName::Mega,
                ProfileName::Leonardo,
                ProfileName::Esp8266
            ]
        );
    }

    #[test]
    fn test_round_robin_order_preferred_first() {
        assert_eq!(
            round_robin_order(Some("leonardo")),
            [
                ProfileName::Leonardo,
                ProfileName::Standard,
                ProfileName::Mega,
                ProfileName::Esp8266
            ]
        );
        assert_eq!(round_robin_order(Some("nothing useful")), ProfileName::ROUND_ROBIN);
    }

    #[test]
    fn test_new_connector_is_idle() {
        let connector = Connector::serial(ConnectorConfig::default());
        assert_eq!(connector.state(), ConnectionState::Idle);
        assert!(connector.last_attempt().is_none());
        assert!(connector.known_profile("/dev/ttyACM0").is_none());
    }

    #[test]
    fn test_exhausted_without_attempts_defaults_to_timeout() {
        let err = exhausted("COM4", 0, None);
        assert!(err.is_not_firmata());
    }
}
