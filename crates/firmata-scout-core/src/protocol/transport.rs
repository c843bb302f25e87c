//! Transport abstraction
//!
//! The connection state machine only talks to a board through these traits,
//! so it runs the same against a real serial port ([`super::serial`]) and a
//! simulated board ([`crate::demo`]).

use serde::{Deserialize, Serialize};

use super::{ProtocolError, DEFAULT_BAUD_RATE};

/// Opaque name of a transport endpoint (e.g. "/dev/ttyACM0" or "COM3")
pub type PortId = String;

/// Modem control lines used to reset boards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlLine {
    /// Data Terminal Ready
    Dtr,
    /// Request To Send
    Rts,
}

/// Levels of both control lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlLines {
    /// Data Terminal Ready
    pub dtr: bool,
    /// Request To Send
    pub rts: bool,
}

impl ControlLines {
    /// Both lines asserted, the usual state for an opened port
    pub fn asserted() -> Self {
        Self { dtr: true, rts: true }
    }

    /// Set one line
    pub fn set(&mut self, line: ControlLine, level: bool) {
        match line {
            ControlLine::Dtr => self.dtr = level,
            ControlLine::Rts => self.rts = level,
        }
    }

    /// Level of one line
    pub fn get(&self, line: ControlLine) -> bool {
        match line {
            ControlLine::Dtr => self.dtr,
            ControlLine::Rts => self.rts,
        }
    }
}

impl Default for ControlLines {
    fn default() -> Self {
        Self::asserted()
    }
}

/// Settings applied when a link is opened (always 8N1, no flow control)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSettings {
    /// Line speed
    pub baud_rate: u32,
    /// Levels the control lines take as the port opens
    pub control_lines: ControlLines,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            control_lines: ControlLines::asserted(),
        }
    }
}

/// An open byte link to one port
pub trait Link: Send {
    /// Drive a control line
    fn set_control_line(&mut self, line: ControlLine, level: bool) -> Result<(), ProtocolError>;

    /// Write bytes, returning how many were accepted
    fn write(&mut self, bytes: &[u8]) -> Result<usize, ProtocolError>;

    /// Everything received so far; never blocks, may be empty
    fn read_available(&mut self) -> Result<Vec<u8>, ProtocolError>;

    /// Drop pending inbound and outbound bytes
    fn discard_buffers(&mut self) -> Result<(), ProtocolError>;

    /// Release the port. Idempotent and infallible.
    fn close(&mut self);

    /// Write all of `bytes` or fail
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let written = self.write(bytes)?;
        if written != bytes.len() {
            return Err(ProtocolError::TransportIoFailed(format!(
                "short write: {} of {} bytes",
                written,
                bytes.len()
            )));
        }
        Ok(())
    }
}

/// Opens links by port name
pub trait Transport: Send + Sync {
    /// Open `port` with `settings`
    fn open(&self, port: &str, settings: &LineSettings) -> Result<Box<dyn Link>, ProtocolError>;
}

/// Lists the ports that currently exist. Queried fresh every time.
pub trait PortEnumerator: Send + Sync {
    /// Ports present right now
    fn list_ports(&self) -> Vec<PortId>;

    /// Whether `port` is currently enumerable
    fn is_available(&self, port: &str) -> bool {
        self.list_ports().iter().any(|p| p == port)
    }
}
