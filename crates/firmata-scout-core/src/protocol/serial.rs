//! Serial port handling
//!
//! Real-hardware implementation of the [`Transport`], [`Link`] and
//! [`PortEnumerator`] traits on top of the `serialport` crate.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::io::{ErrorKind as IoErrorKind, Read, Write};
use std::time::Duration;

use super::transport::{ControlLine, LineSettings, Link, PortEnumerator, PortId, Transport};
use super::{ProtocolError, DEFAULT_BAUD_RATE};

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,

    /// Serial number (if available)
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// A port known only by name
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, manufacturer, product, serial_number) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => (
                Some(usb_info.vid),
                Some(usb_info.pid),
                usb_info.manufacturer,
                usb_info.product,
                usb_info.serial_number,
            ),
            _ => (None, None, None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            manufacturer,
            product,
            serial_number,
        }
    }
}

/// Helper used to sort port names so that:
///  - ttyACM* ports come first (sorted numerically by suffix)
///  - then ttyUSB* ports (sorted numerically)
///  - then COM ports (sorted numerically)
///  - then other ports (sorted by name)
pub(crate) fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    if let Some(rest) = basename
        .strip_prefix("COM")
        .or_else(|| basename.strip_prefix("com"))
    {
        if let Ok(num) = rest.parse::<usize>() {
            return (2, num, basename.to_string());
        }
    }
    (3, 0, basename.to_string())
}

/// List all available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    match serialport::available_ports() {
        Ok(infos) => {
            for info in infos {
                let p = PortInfo::from(info);
                map.entry(p.name.clone()).or_insert(p);
            }
        }
        Err(e) => tracing::warn!("serial port enumeration failed: {e}"),
    }

    // Linux-only: Add /dev/ttyACM* and /dev/ttyUSB* entries if present but not found by API
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone()).or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Open a serial port configured 8N1 without flow control
pub fn open_port(name: &str, settings: &LineSettings) -> Result<Box<dyn SerialPort>, ProtocolError> {
    let baud = if settings.baud_rate == 0 {
        tracing::warn!("open_port: baud rate is 0, using {DEFAULT_BAUD_RATE}");
        DEFAULT_BAUD_RATE
    } else {
        settings.baud_rate
    };

    // Short timeout keeps reads responsive; the poll loop never blocks on them
    let mut port = serialport::new(name, baud)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .dtr_on_open(settings.control_lines.dtr)
        .timeout(Duration::from_millis(100))
        .open()
        .map_err(|e| ProtocolError::TransportOpenFailed {
            port: name.to_string(),
            reason: e.to_string(),
        })?;

    // RTS cannot be chosen before open; apply it immediately after
    if let Err(e) = port.write_request_to_send(settings.control_lines.rts) {
        tracing::debug!("open_port: failed to set RTS on {name}: {e} (continuing)");
    }

    tracing::debug!(
        port = name,
        baud,
        dtr = settings.control_lines.dtr,
        rts = settings.control_lines.rts,
        "serial port opened"
    );
    Ok(port)
}

/// Clear the serial port buffers
pub fn clear_buffers(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.clear(serialport::ClearBuffer::All)
        .map_err(|e| ProtocolError::TransportIoFailed(e.to_string()))
}

/// Serial port wrapper implementing [`Link`]
pub struct SerialLink {
    port: Option<Box<dyn SerialPort>>,
    name: String,
}

impl SerialLink {
    /// Wrap an opened port
    pub fn new(name: impl Into<String>, port: Box<dyn SerialPort>) -> Self {
        Self {
            port: Some(port),
            name: name.into(),
        }
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, ProtocolError> {
        self.port.as_mut().ok_or(ProtocolError::NotConnected)
    }
}

impl Link for SerialLink {
    fn set_control_line(&mut self, line: ControlLine, level: bool) -> Result<(), ProtocolError> {
        let port = self.port()?;
        let result = match line {
            ControlLine::Dtr => port.write_data_terminal_ready(level),
            ControlLine::Rts => port.write_request_to_send(level),
        };
        result.map_err(|e| ProtocolError::TransportIoFailed(e.to_string()))
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, ProtocolError> {
        let port = self.port()?;
        port.write_all(bytes)
            .map_err(|e| ProtocolError::TransportIoFailed(e.to_string()))?;
        port.flush()
            .map_err(|e| ProtocolError::TransportIoFailed(e.to_string()))?;
        Ok(bytes.len())
    }

    fn read_available(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let port = self.port()?;
        let available = port
            .bytes_to_read()
            .map_err(|e| ProtocolError::TransportIoFailed(e.to_string()))?
            as usize;
        if available == 0 {
            return Ok(Vec::new());
        }

        let mut buffer = vec![0u8; available];
        match port.read(&mut buffer) {
            Ok(n) => {
                buffer.truncate(n);
                Ok(buffer)
            }
            Err(ref e) if e.kind() == IoErrorKind::TimedOut || e.kind() == IoErrorKind::WouldBlock => {
                Ok(Vec::new())
            }
            Err(e) => Err(ProtocolError::TransportIoFailed(e.to_string())),
        }
    }

    fn discard_buffers(&mut self) -> Result<(), ProtocolError> {
        let port = self.port()?;
        clear_buffers(port.as_mut())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            tracing::debug!(port = %self.name, "serial port closed");
        }
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens [`SerialLink`]s on real serial ports
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialTransport;

impl Transport for SerialTransport {
    fn open(&self, port: &str, settings: &LineSettings) -> Result<Box<dyn Link>, ProtocolError> {
        let serial = open_port(port, settings)?;
        Ok(Box::new(SerialLink::new(port, serial)))
    }
}

/// Enumerates the host's serial ports
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

impl PortEnumerator for SystemPorts {
    fn list_ports(&self) -> Vec<PortId> {
        list_ports().into_iter().map(|p| p.name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // This test just ensures the function doesn't panic
        let ports = list_ports();
        for port in &ports {
            println!("Found port: {} - {:?}", port.name, port.product);
        }
    }

    #[test]
    fn test_port_sorting() {
        let names = vec![
            "/dev/ttyUSB1",
            "/dev/ttyACM1",
            "COM10",
            "/dev/ttyUSB0",
            "COM3",
            "/dev/ttyACM0",
            "/dev/someport",
            "/dev/ttyACM10",
        ];
        let mut ports: Vec<PortInfo> = names.into_iter().map(PortInfo::bare).collect();

        ports.sort_by_key(|p| port_sort_key(&p.name));
        let ordered: Vec<String> = ports.into_iter().map(|p| p.name).collect();

        assert_eq!(
            ordered,
            vec![
                "/dev/ttyACM0",
                "/dev/ttyACM1",
                "/dev/ttyACM10",
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "COM3",
                "COM10",
                "/dev/someport",
            ]
        );
    }

    #[test]
    fn test_open_missing_port_is_open_failure() {
        let err = SerialTransport
            .open("/dev/firmata-scout-does-not-exist", &LineSettings::default())
            .err()
            .expect("opening a missing port must fail");
        assert!(matches!(err, ProtocolError::TransportOpenFailed { .. }));
    }
}
