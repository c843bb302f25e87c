//! Protocol commands
//!
//! The logical commands this client sends to a Firmata board.

use serde::{Deserialize, Serialize};

use super::codec::{
    encode_analog_write, encode_digital_write, encode_set_pin_mode, encode_version_query,
    PinMode,
};
use super::ProtocolError;

/// Commands sent from host to board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Ask the board for its protocol version (0xF9)
    QueryVersion,

    /// Configure a pin (0xF4)
    SetPinMode {
        /// Pin to configure
        pin: u8,
        /// Mode to put it in
        mode: PinMode,
    },

    /// Drive one digital pin (0x90 | port)
    DigitalWrite {
        /// Pin to drive
        pin: u8,
        /// High when true
        level: bool,
    },

    /// PWM duty or servo angle (0xE0 | pin)
    AnalogWrite {
        /// Analog channel
        pin: u8,
        /// 14-bit value
        value: u16,
    },
}

impl Command {
    /// Encode to wire bytes
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(match *self {
            Command::QueryVersion => encode_version_query().to_vec(),
            Command::SetPinMode { pin, mode } => encode_set_pin_mode(pin, mode)?.to_vec(),
            Command::DigitalWrite { pin, level } => encode_digital_write(pin, level)?.to_vec(),
            Command::AnalogWrite { pin, value } => encode_analog_write(pin, value)?.to_vec(),
        })
    }

    /// Length of the encoded message
    pub fn wire_len(&self) -> usize {
        match self {
            Command::QueryVersion => 1,
            _ => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::{message_length, Direction};

    #[test]
    fn test_wire_len_matches_length_table() {
        let commands = [
            Command::QueryVersion,
            Command::SetPinMode { pin: 3, mode: PinMode::Pwm },
            Command::DigitalWrite { pin: 12, level: true },
            Command::AnalogWrite { pin: 3, value: 200 },
        ];
        for cmd in commands {
            let bytes = cmd.encode().unwrap();
            assert_eq!(bytes.len(), cmd.wire_len());
            assert_eq!(message_length(bytes[0], Direction::Outbound), Some(bytes.len()));
        }
    }

    #[test]
    fn test_invalid_pin_propagates() {
        let cmd = Command::AnalogWrite { pin: 20, value: 0 };
        assert!(matches!(cmd.encode(), Err(ProtocolError::InvalidPin { pin: 20, .. })));
    }
}
