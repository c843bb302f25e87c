//! Port scan tests on a simulated bench

use firmata_scout_core::clock::ManualClock;
use firmata_scout_core::demo::{BoardBehavior, DemoBoard, DemoTransport};
use firmata_scout_core::identity::{StaticDescriber, UNKNOWN_DEVICE};
use firmata_scout_core::profiles::ProfileName;
use firmata_scout_core::protocol::{Connector, ErrorKind, FirmwareVersion};
use firmata_scout_core::scan::{spawn_scan, ScanConfig, ScanReport, Scanner};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

struct Bench {
    transport: Arc<DemoTransport>,
    clock: Arc<ManualClock>,
}

impl Bench {
    /// COM1 console, COM3 Mega, COM4 silent, COM10 Uno
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new());
        let transport = DemoTransport::new(clock.clone())
            .with_board("COM10", DemoBoard::new(BoardBehavior::uno()))
            .with_board("COM4", DemoBoard::new(BoardBehavior::silent()))
            .with_board("COM1", DemoBoard::new(BoardBehavior::uno()))
            .with_board(
                "COM3",
                DemoBoard::new(BoardBehavior {
                    version: FirmwareVersion::new(2, 3),
                    ..BoardBehavior::mega()
                }),
            );
        Self {
            transport: Arc::new(transport),
            clock,
        }
    }

    fn scanner(&self, config: ScanConfig) -> Scanner {
        let connector = Connector::new(
            self.transport.clone(),
            self.transport.clone(),
            self.clock.clone(),
        );
        Scanner::new(connector, config)
    }

    fn board(&self, port: &str) -> &DemoBoard {
        self.transport.board(port).unwrap()
    }
}

fn ports(report: &ScanReport) -> Vec<&str> {
    report.entries.iter().map(|e| e.port.as_str()).collect()
}

#[test]
fn test_scan_reports_every_port() {
    let bench = Bench::new();
    let report = bench.scanner(ScanConfig::default()).scan();

    assert_eq!(report.skipped_ports, vec!["COM1".to_string()]);
    assert_eq!(ports(&report), vec!["COM3", "COM4", "COM10"]);

    let mega = report.entry("COM3").unwrap();
    assert!(mega.succeeded);
    assert_eq!(mega.version, Some(FirmwareVersion::new(2, 3)));
    assert_eq!(mega.profile, Some(ProfileName::Mega));

    let silent = report.entry("COM4").unwrap();
    assert!(!silent.succeeded);
    assert_eq!(silent.last_error, Some(ErrorKind::HandshakeTimeout));
    assert!(silent.error_message.is_some());

    let uno = report.entry("COM10").unwrap();
    assert_eq!(uno.profile, Some(ProfileName::Standard));

    assert_eq!(report.firmata_devices().count(), 2);
    assert!(report.finished_at >= report.started_at);
}

#[test]
fn test_scan_leaves_every_port_closed() {
    let bench = Bench::new();
    bench.scanner(ScanConfig::default()).scan();

    for port in ["COM1", "COM3", "COM4", "COM10"] {
        assert_eq!(bench.board(port).open_handles(), 0, "{port}");
    }
    assert_eq!(bench.board("COM1").total_opens(), 0);
}

#[test]
fn test_console_port_included_on_request() {
    let bench = Bench::new();
    let config = ScanConfig {
        include_console_port: true,
        ..ScanConfig::default()
    };
    let report = bench.scanner(config).scan();

    assert!(report.skipped_ports.is_empty());
    assert_eq!(ports(&report), vec!["COM1", "COM3", "COM4", "COM10"]);
    assert!(report.entry("COM1").unwrap().succeeded);
}

#[test]
fn test_scan_pauses_between_ports() {
    let bench = Bench::new();
    let config = ScanConfig {
        port_pause_ms: 750,
        ..ScanConfig::default()
    };
    bench.scanner(config).scan();

    let pauses = bench
        .clock
        .sleeps()
        .iter()
        .filter(|d| **d == Duration::from_millis(750))
        .count();
    assert_eq!(pauses, 3);
}

#[test]
fn test_busy_port_does_not_stop_scan() {
    let clock = Arc::new(ManualClock::new());
    let busy = DemoBoard::new(BoardBehavior {
        open_failures: u32::MAX,
        ..BoardBehavior::uno()
    });
    let transport = Arc::new(
        DemoTransport::new(clock.clone())
            .with_board("/dev/ttyACM0", busy)
            .with_board("/dev/ttyUSB0", DemoBoard::new(BoardBehavior::uno())),
    );
    let connector = Connector::new(transport.clone(), transport, clock);

    let report = Scanner::new(connector, ScanConfig::default()).scan();
    assert_eq!(ports(&report), vec!["/dev/ttyACM0", "/dev/ttyUSB0"]);
    assert_eq!(
        report.entry("/dev/ttyACM0").unwrap().last_error,
        Some(ErrorKind::TransportOpenFailed)
    );
    assert!(report.entry("/dev/ttyUSB0").unwrap().succeeded);
}

#[test]
fn test_unplugged_port_is_not_scanned() {
    let bench = Bench::new();
    bench.board("COM3").set_present(false);

    let report = bench.scanner(ScanConfig::default()).scan();
    assert_eq!(ports(&report), vec!["COM4", "COM10"]);
}

#[test]
fn test_device_hints_pick_profile() {
    let bench = Bench::new();
    let describer = StaticDescriber::new().with("COM3", "Arduino Mega 2560");
    let mut scanner = bench
        .scanner(ScanConfig::default())
        .with_describer(Arc::new(describer));

    let report = scanner.scan();
    let mega = report.entry("COM3").unwrap();
    assert_eq!(mega.device_type.as_deref(), Some("Arduino Mega 2560"));
    assert_eq!(mega.profile, Some(ProfileName::Mega));
    // COM3 took one attempt; the rest went through round-robin
    assert_eq!(bench.board("COM3").total_opens(), 1);
    assert_eq!(scanner.connector().known_profile("COM3"), Some(ProfileName::Mega));
}

#[test]
fn test_unknown_device_falls_back_to_round_robin() {
    let bench = Bench::new();
    let describer = StaticDescriber::new()
        .with("COM3", UNKNOWN_DEVICE)
        .with("COM4", UNKNOWN_DEVICE);
    let report = bench
        .scanner(ScanConfig::default())
        .with_describer(Arc::new(describer))
        .scan();

    let mega = report.entry("COM3").unwrap();
    assert!(mega.succeeded);
    assert_eq!(mega.profile, Some(ProfileName::Mega));
    assert_eq!(mega.device_type.as_deref(), Some("Unknown Device"));

    let silent = report.entry("COM4").unwrap();
    assert!(!silent.succeeded);
    assert_eq!(silent.device_type.as_deref(), Some("Unknown Device"));
}

#[test]
fn test_scanner_remembers_profiles() {
    let bench = Bench::new();
    let mut scanner = bench.scanner(ScanConfig::default());
    scanner.scan();

    let mut connector = scanner.into_connector();
    assert_eq!(connector.known_profile("COM3"), Some(ProfileName::Mega));
    assert_eq!(connector.known_profile("COM4"), None);

    let before = connector.attempts_made();
    let session = connector.connect_auto("COM3", 2, None).unwrap();
    assert_eq!(session.profile_used(), ProfileName::Mega);
    assert_eq!(connector.attempts_made(), before + 1);
}

#[test]
fn test_report_json() {
    let bench = Bench::new();
    let report = bench.scanner(ScanConfig::default()).scan();

    let json = report.to_json().unwrap();
    let back: ScanReport = serde_json::from_str(&json).unwrap();
    assert_eq!(back, report);
    assert!(json.contains("\"HandshakeTimeout\""));
}

#[tokio::test]
async fn test_spawn_scan() {
    let bench = Bench::new();
    let scanner = bench.scanner(ScanConfig::default());

    let (scanner, report) = spawn_scan(scanner).await.unwrap();
    assert_eq!(report.firmata_devices().count(), 2);
    assert_eq!(scanner.connector().known_profile("COM10"), Some(ProfileName::Standard));
}
