//! # Firmata Scout Core Library
//!
//! Finds Firmata boards on serial ports and talks to them.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - A codec for the Firmata messages used here (version, pin mode, digital, analog)
//! - Per-family reset profiles (standard AVR, Mega, Leonardo, ESP8266)
//! - A connection manager with retries, profile round-robin and remembered profiles
//! - A port scanner that reports which ports run Firmata
//! - Simulated boards for running all of the above without hardware
//!
//! ## Example
//!
//! ```rust,no_run
//! use firmata_scout_core::protocol::{Connector, ConnectorConfig};
//!
//! let mut connector = Connector::serial(ConnectorConfig::default());
//! let mut session = connector.connect_auto("/dev/ttyACM0", 2, None)?;
//! println!("Firmata {}", session.firmware_version());
//! session.set_digital_output(13, true)?;
//! # Ok::<(), firmata_scout_core::protocol::ProtocolError>(())
//! ```

pub mod clock;
pub mod config;
pub mod demo;
pub mod identity;
pub mod profiles;
pub mod protocol;
pub mod resolver;
pub mod scan;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::ScoutConfig;
    pub use crate::demo::{BoardBehavior, DemoBoard, DemoTransport};
    pub use crate::identity::{DeviceDescriber, StaticDescriber, UsbDescriber};
    pub use crate::profiles::{ProfileName, ResetProfile, ResetStep};
    pub use crate::protocol::{
        ConnectionState, Connector, ConnectorConfig, DeviceSession, ErrorKind, FirmwareVersion,
        PinMode, ProtocolError,
    };
    pub use crate::resolver::{resolve, ProfileHint};
    pub use crate::scan::{spawn_scan, ScanConfig, ScanEntry, ScanReport, Scanner};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
