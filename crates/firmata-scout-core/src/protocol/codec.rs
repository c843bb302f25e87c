//! Firmata wire codec
//!
//! Encodes the small command vocabulary this crate speaks and decodes the
//! inbound byte stream into [`DecodedEvent`]s.
//!
//! Message formats (all multi-byte values are split into 7-bit halves):
//! - `0xF9`                 : version query (host -> board, 1 byte)
//! - `0xF9 major minor`     : version report (board -> host, 3 bytes)
//! - `0xF4 pin mode`        : set pin mode
//! - `0x90|port lsb msb`    : digital port write (8 pins per port)
//! - `0xE0|pin lsb msb`     : analog/PWM/servo write (pins 0-15)
//!
//! The encoders never perform I/O. The decoder never blocks.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ProtocolError;

/// Version query / version report opcode
pub const REPORT_VERSION: u8 = 0xF9;
/// Set pin mode opcode
pub const SET_PIN_MODE: u8 = 0xF4;
/// Digital port message base opcode (low nibble = port number)
pub const DIGITAL_MESSAGE: u8 = 0x90;
/// Analog message base opcode (low nibble = pin number)
pub const ANALOG_MESSAGE: u8 = 0xE0;

/// Highest pin number addressable by pin-mode and digital messages
pub const MAX_PIN: u8 = 127;
/// Highest pin number addressable by an analog message
pub const MAX_ANALOG_PIN: u8 = 15;
/// Largest value that fits in two 7-bit payload bytes
pub const MAX_14BIT_VALUE: u16 = 0x3FFF;

/// Pin modes this client configures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PinMode {
    /// Digital output
    Output = 0x01,
    /// PWM output
    Pwm = 0x03,
    /// Servo output
    Servo = 0x04,
}

impl PinMode {
    /// The mode byte sent on the wire
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Firmware protocol version reported by the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FirmwareVersion {
    /// Major protocol version
    pub major: u8,
    /// Minor protocol version
    pub minor: u8,
}

impl FirmwareVersion {
    /// Version `major.minor`
    pub fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// An event recognised in the inbound byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedEvent {
    /// `0xF9 major minor`
    VersionReport(FirmwareVersion),
    /// Any byte that is not part of a version report (kept for diagnostics)
    UnrecognizedByte(u8),
}

/// Direction of a message, used by [`message_length`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to board
    Outbound,
    /// Board to host
    Inbound,
}

/// Total length in bytes of the message starting with `opcode`, or `None` if
/// the opcode is not part of this client's vocabulary.
pub fn message_length(opcode: u8, direction: Direction) -> Option<usize> {
    match (opcode, direction) {
        (REPORT_VERSION, Direction::Outbound) => Some(1),
        (REPORT_VERSION, Direction::Inbound) => Some(3),
        (SET_PIN_MODE, Direction::Outbound) => Some(3),
        (0x90..=0x9F, Direction::Outbound) => Some(3),
        (0xE0..=0xEF, Direction::Outbound) => Some(3),
        _ => None,
    }
}

/// Split a 14-bit value into its (low, high) 7-bit payload bytes
pub fn split_7bit(value: u16) -> (u8, u8) {
    ((value & 0x7F) as u8, ((value >> 7) & 0x7F) as u8)
}

/// Recombine two 7-bit payload bytes as `low | (high << 7)`
pub fn join_7bit(low: u8, high: u8) -> u16 {
    (low as u16 & 0x7F) | ((high as u16 & 0x7F) << 7)
}

/// `[0xF9]`
pub fn encode_version_query() -> [u8; 1] {
    [REPORT_VERSION]
}

/// `[0xF4, pin, mode]`
pub fn encode_set_pin_mode(pin: u8, mode: PinMode) -> Result<[u8; 3], ProtocolError> {
    check_pin(pin, MAX_PIN)?;
    Ok([SET_PIN_MODE, pin, mode.as_byte()])
}

/// Digital write for a single pin.
///
/// Firmata writes a whole 8-pin port at once. Only the bit of `pin` is ever
/// set here, so every other pin in the same port is written low. Callers must
/// not assume other pins of the group keep their previous level.
pub fn encode_digital_write(pin: u8, level: bool) -> Result<[u8; 3], ProtocolError> {
    check_pin(pin, MAX_PIN)?;
    let port = pin / 8;
    let value: u16 = if level { 1 << (pin % 8) } else { 0 };
    let (lsb, msb) = split_7bit(value);
    Ok([DIGITAL_MESSAGE | port, lsb, msb])
}

/// Analog write (PWM duty or servo angle).
///
/// The codec does not know whether `value` is a duty cycle (0-255) or an angle
/// (0-180); clamping to the intended range is the caller's job.
pub fn encode_analog_write(pin: u8, value: u16) -> Result<[u8; 3], ProtocolError> {
    check_pin(pin, MAX_ANALOG_PIN)?;
    if value > MAX_14BIT_VALUE {
        return Err(ProtocolError::ValueOutOfRange {
            value,
            max: MAX_14BIT_VALUE,
        });
    }
    let (lsb, msb) = split_7bit(value);
    Ok([ANALOG_MESSAGE | (pin & 0x0F), lsb, msb])
}

fn check_pin(pin: u8, max: u8) -> Result<(), ProtocolError> {
    if pin > max {
        return Err(ProtocolError::InvalidPin { pin, max });
    }
    Ok(())
}

/// Decode one buffer with no memory of previous calls.
///
/// A version report whose opcode is seen with fewer than two bytes after it is
/// dropped: a report split across two reads is lost.
pub fn decode(bytes: &[u8]) -> Vec<DecodedEvent> {
    let mut events = Vec::new();
    scan(bytes, &mut events);
    events
}

/// Scan `buf`, pushing events; returns the index of an incomplete trailing
/// version report, or `buf.len()` if everything was consumed.
fn scan(buf: &[u8], events: &mut Vec<DecodedEvent>) -> usize {
    let mut i = 0;
    while i < buf.len() {
        let byte = buf[i];
        if byte == REPORT_VERSION {
            if i + 2 < buf.len() {
                events.push(DecodedEvent::VersionReport(FirmwareVersion::new(
                    buf[i + 1],
                    buf[i + 2],
                )));
                i += 3;
                continue;
            }
            return i;
        }
        events.push(DecodedEvent::UnrecognizedByte(byte));
        i += 1;
    }
    buf.len()
}

/// Incremental decoder that carries a partial version report between feeds.
///
/// Unlike [`decode`], `[0xF9, 7]` followed by `[9]` yields a report.
#[derive(Debug, Default, Clone)]
pub struct FirmataDecoder {
    pending: Vec<u8>,
}

impl FirmataDecoder {
    /// Decoder with nothing pending
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes`, prefixed with whatever partial report the last feed left
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<DecodedEvent> {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(bytes);

        let mut events = Vec::new();
        let consumed = scan(&buf, &mut events);
        if consumed < buf.len() {
            self.pending = buf[consumed..].to_vec();
        }
        events
    }

    /// True while a partial version report is waiting for more bytes
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drop any partial report
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}
