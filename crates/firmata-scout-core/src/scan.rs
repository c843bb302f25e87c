//! Port scan
//!
//! Walks every enumerated port, tries to bring up a Firmata session on it,
//! and records one [`ScanEntry`] per port. Sessions opened during the scan
//! are closed again; the connector keeps the profiles that worked so a
//! follow-up connect goes straight to the right reset sequence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::identity::DeviceDescriber;
use crate::profiles::ProfileName;
use crate::protocol::serial::port_sort_key;
use crate::protocol::{Connector, ErrorKind, FirmwareVersion, PortId, ProtocolError};

/// Scan settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Round-robin rounds per port when the device type is unknown
    pub rounds: u32,
    /// Port reserved for the system console, skipped unless included
    pub console_port: String,
    /// Scan the console port too
    pub include_console_port: bool,
    /// Pause after each port
    pub port_pause_ms: u64,
    /// Ask the describer for a device type and connect with its profile
    pub use_device_hints: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            rounds: 2,
            console_port: "COM1".to_string(),
            include_console_port: false,
            port_pause_ms: 500,
            use_device_hints: true,
        }
    }
}

impl ScanConfig {
    /// Reject a scan that would try nothing
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.rounds == 0 {
            return Err(ProtocolError::Config("rounds must be at least 1".into()));
        }
        Ok(())
    }

    fn skips(&self, port: &str) -> bool {
        !self.include_console_port && port.eq_ignore_ascii_case(&self.console_port)
    }
}

/// Outcome for one port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEntry {
    /// Scanned port
    pub port: PortId,
    /// Whether the port answered the handshake
    pub succeeded: bool,
    /// Reported version on success
    pub version: Option<FirmwareVersion>,
    /// Profile that worked
    pub profile: Option<ProfileName>,
    /// Friendly device name, when the describer knew one
    pub device_type: Option<String>,
    /// Class of the final error on failure
    pub last_error: Option<ErrorKind>,
    /// Full text of the final error
    pub error_message: Option<String>,
}

impl ScanEntry {
    fn connected(port: &str, version: FirmwareVersion, profile: ProfileName) -> Self {
        Self {
            port: port.to_string(),
            succeeded: true,
            version: Some(version),
            profile: Some(profile),
            device_type: None,
            last_error: None,
            error_message: None,
        }
    }

    fn failed(port: &str, error: &ProtocolError) -> Self {
        Self {
            port: port.to_string(),
            succeeded: false,
            version: None,
            profile: None,
            device_type: None,
            last_error: Some(error.root_kind()),
            error_message: Some(error.to_string()),
        }
    }
}

/// Result of a full scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    /// When the scan started
    pub started_at: DateTime<Utc>,
    /// When the last port was done
    pub finished_at: DateTime<Utc>,
    /// Ports left out on purpose (the console port)
    pub skipped_ports: Vec<PortId>,
    /// One entry per scanned port, in scan order
    pub entries: Vec<ScanEntry>,
}

impl ScanReport {
    /// Entries for ports that answered the handshake
    pub fn firmata_devices(&self) -> impl Iterator<Item = &ScanEntry> {
        self.entries.iter().filter(|e| e.succeeded)
    }

    /// Entry for `port`
    pub fn entry(&self, port: &str) -> Option<&ScanEntry> {
        self.entries.iter().find(|e| e.port == port)
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string_pretty(self).map_err(|e| ProtocolError::Config(e.to_string()))
    }
}

/// Scans every port a connector can see
pub struct Scanner {
    connector: Connector,
    describer: Option<Arc<dyn DeviceDescriber>>,
    config: ScanConfig,
}

impl Scanner {
    /// Scanner without device hints
    pub fn new(connector: Connector, config: ScanConfig) -> Self {
        Self {
            connector,
            describer: None,
            config,
        }
    }

    /// Use `describer` to look up device types before connecting
    pub fn with_describer(mut self, describer: Arc<dyn DeviceDescriber>) -> Self {
        self.describer = Some(describer);
        self
    }

    /// Connector used for every port
    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    /// Mutable access, e.g. to seed profiles
    pub fn connector_mut(&mut self) -> &mut Connector {
        &mut self.connector
    }

    /// Give the connector back, with whatever profiles it learned
    pub fn into_connector(self) -> Connector {
        self.connector
    }

    /// Settings in use
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Try every port once. A failing port never stops the scan.
    pub fn scan(&mut self) -> ScanReport {
        let started_at = Utc::now();
        let mut ports = self.connector.ports().list_ports();
        ports.sort_by_key(|p| port_sort_key(p));
        ports.dedup();

        let (skipped_ports, ports): (Vec<_>, Vec<_>) =
            ports.into_iter().partition(|p| self.config.skips(p));
        for port in &skipped_ports {
            tracing::info!(port = %port, "skipping console port");
        }
        tracing::info!("scanning {} port(s)", ports.len());

        let pause = Duration::from_millis(self.config.port_pause_ms);
        let mut entries = Vec::with_capacity(ports.len());
        for port in &ports {
            let entry = self.scan_port(port);
            if entry.succeeded {
                tracing::info!(port = %port, "Firmata device found");
            }
            entries.push(entry);
            self.connector.clock().sleep(pause);
        }

        let report = ScanReport {
            started_at,
            finished_at: Utc::now(),
            skipped_ports,
            entries,
        };
        tracing::info!(
            found = report.firmata_devices().count(),
            scanned = report.entries.len(),
            "scan complete"
        );
        report
    }

    fn scan_port(&mut self, port: &str) -> ScanEntry {
        tracing::info!(port, "scanning port");
        let device_type = if self.config.use_device_hints {
            self.describer.as_ref().and_then(|d| d.describe(port))
        } else {
            None
        };

        let result = match device_type.as_deref() {
            Some(description) => self.connector.connect_with_device_type(port, description),
            None => self.connector.connect_auto(port, self.config.rounds, None),
        };

        let mut entry = match result {
            Ok(mut session) => {
                let entry =
                    ScanEntry::connected(port, session.firmware_version(), session.profile_used());
                session.close();
                entry
            }
            Err(e) => {
                tracing::debug!(port, "no Firmata device: {e}");
                ScanEntry::failed(port, &e)
            }
        };
        entry.device_type = device_type;
        entry
    }
}

/// Run a scan on the blocking thread pool.
///
/// The scanner comes back with the report so its connector, and the
/// profiles it learned, can be reused.
pub fn spawn_scan(mut scanner: Scanner) -> tokio::task::JoinHandle<(Scanner, ScanReport)> {
    tokio::task::spawn_blocking(move || {
        let report = scanner.scan();
        (scanner, report)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_config_default() {
        let config = ScanConfig::default();
        assert_eq!(config.rounds, 2);
        assert_eq!(config.port_pause_ms, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_console_port_match_ignores_case() {
        let config = ScanConfig::default();
        assert!(config.skips("com1"));
        assert!(!config.skips("COM10"));

        let config = ScanConfig {
            include_console_port: true,
            ..ScanConfig::default()
        };
        assert!(!config.skips("COM1"));
    }

    #[test]
    fn test_failed_entry_keeps_root_kind() {
        let err = ProtocolError::AttemptsExhausted {
            port: "COM4".into(),
            attempts: 8,
            last: Box::new(ProtocolError::HandshakeTimeout { polls: 10 }),
        };
        let entry = ScanEntry::failed("COM4", &err);
        assert!(!entry.succeeded);
        assert_eq!(entry.last_error, Some(ErrorKind::HandshakeTimeout));
    }
}
