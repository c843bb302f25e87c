//! Firmata Protocol Communication
//!
//! Implements the subset of the Firmata serial protocol needed to discover a
//! board, confirm it speaks Firmata, and drive digital, PWM and servo pins.

pub mod codec;
pub mod commands;
mod connection;
mod error;
pub mod events;
pub mod serial;
mod session;
pub mod transport;

pub use codec::{DecodedEvent, FirmataDecoder, FirmwareVersion, PinMode};
pub use commands::Command;
pub use connection::{
    round_robin_order, ConnectionAttempt, ConnectionState, Connector, ConnectorConfig,
};
pub use error::{ErrorKind, ProtocolError};
pub use serial::{list_ports, PortInfo, SerialTransport, SystemPorts};
pub use session::{DeviceSession, MAX_PWM, MAX_SERVO_ANGLE};
pub use transport::{ControlLine, ControlLines, LineSettings, Link, PortEnumerator, PortId, Transport};

/// Default baud rate for Firmata boards
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// The version query is re-sent every this many handshake poll ticks
pub const DEFAULT_REQUERY_TICKS: u32 = 4;
