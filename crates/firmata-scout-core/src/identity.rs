//! Device identity lookup
//!
//! Turns what the OS knows about a port (USB product strings, vendor and
//! product IDs) into a friendly board name such as "Arduino Mega". The name
//! only seeds [`crate::resolver`]; when nothing is known the scan simply
//! tries every profile.

use std::collections::HashMap;

use crate::protocol::{list_ports, PortInfo};

/// Fallback name for ports nothing is known about
pub const UNKNOWN_DEVICE: &str = "Unknown Device";

/// Describes the device behind a port
pub trait DeviceDescriber: Send + Sync {
    /// Friendly name, or `None` when the port itself is not known
    fn describe(&self, port: &str) -> Option<String>;
}

/// Keyword rules checked against the lower-cased product/manufacturer text
const NAME_RULES: &[(&str, &str)] = &[
    ("uno", "Arduino Uno"),
    ("mega", "Arduino Mega"),
    ("leonardo", "Arduino Leonardo"),
    ("nano", "Arduino Nano"),
    ("micro", "Arduino Micro"),
    ("esp32", "ESP32"),
    ("esp8266", "ESP8266"),
    ("ch340", "Arduino-Compatible (CH340)"),
    ("ch341", "Arduino-Compatible (CH341)"),
    ("cp210", "Arduino-Compatible (CP210x)"),
    ("ftdi", "Arduino-Compatible (FTDI)"),
    ("pl2303", "Arduino-Compatible (PL2303)"),
    ("usb serial", "Arduino-Compatible (USB Serial)"),
    ("arduino", "Arduino-Compatible"),
];

const ARDUINO_VIDS: [u16; 2] = [0x2341, 0x2A03];

/// Identify a board from free text (product name, manufacturer, hardware id)
pub fn identify_board_type(text: &str) -> Option<&'static str> {
    let text = text.to_lowercase();
    NAME_RULES
        .iter()
        .find(|(keyword, _)| text.contains(keyword))
        .map(|&(_, name)| name)
}

/// Identify a board from USB vendor/product IDs
pub fn identify_usb_ids(vid: u16, pid: u16) -> Option<&'static str> {
    if ARDUINO_VIDS.contains(&vid) {
        return match pid {
            0x0001 | 0x0043 | 0x0243 => Some("Arduino Uno"),
            0x0010 | 0x0042 | 0x0242 => Some("Arduino Mega"),
            0x0036 | 0x8036 => Some("Arduino Leonardo"),
            0x0037 | 0x8037 => Some("Arduino Micro"),
            _ => Some("Arduino-Compatible"),
        };
    }
    match (vid, pid) {
        (0x1A86, 0x7523) => Some("Arduino-Compatible (CH340)"),
        (0x1A86, 0x5523) => Some("Arduino-Compatible (CH341)"),
        (0x10C4, _) => Some("Arduino-Compatible (CP210x)"),
        (0x0403, _) => Some("Arduino-Compatible (FTDI)"),
        (0x067B, _) => Some("Arduino-Compatible (PL2303)"),
        _ => None,
    }
}

/// Best friendly name for an enumerated port
pub fn describe_port(info: &PortInfo) -> Option<&'static str> {
    let text = [info.product.as_deref(), info.manufacturer.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
    identify_board_type(&text).or_else(|| match (info.vid, info.pid) {
        (Some(vid), Some(pid)) => identify_usb_ids(vid, pid),
        _ => None,
    })
}

/// Name shown for an enumerated port, [`UNKNOWN_DEVICE`] when nothing matches
pub fn device_label(info: &PortInfo) -> &'static str {
    describe_port(info).unwrap_or(UNKNOWN_DEVICE)
}

/// Describes ports from their USB descriptors
#[derive(Debug, Clone, Copy, Default)]
pub struct UsbDescriber;

impl DeviceDescriber for UsbDescriber {
    fn describe(&self, port: &str) -> Option<String> {
        let info = list_ports().into_iter().find(|p| p.name == port)?;
        let name = device_label(&info);
        tracing::debug!(port, name, "identified device");
        Some(name.to_string())
    }
}

/// Fixed port-to-name table
#[derive(Debug, Clone, Default)]
pub struct StaticDescriber {
    names: HashMap<String, String>,
}

impl StaticDescriber {
    /// Describer that knows no ports
    pub fn new() -> Self {
        Self::default()
    }

    /// Name `port` as `name`
    pub fn with(mut self, port: impl Into<String>, name: impl Into<String>) -> Self {
        self.names.insert(port.into(), name.into());
        self
    }
}

impl DeviceDescriber for StaticDescriber {
    fn describe(&self, port: &str) -> Option<String> {
        self.names.get(port).cloned()
    }
}
