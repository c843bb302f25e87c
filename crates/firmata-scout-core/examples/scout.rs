//! Firmata Scout - port scan and board test tool
//!
//! Finds Firmata boards on the serial ports of this machine, or connects to
//! one port and optionally exercises its pins.
//!
//! Usage:
//!   cargo run --example scout -- [OPTIONS] [PORT]
//!
//! Options:
//!   --port PORT        Connect to PORT instead of scanning every port
//!   --baud RATE        Baud rate (default: 115200)
//!   --profile NAME     Reset profile: standard, mega, leonardo, esp8266
//!   --rounds N         Round-robin rounds per port (default: 2)
//!   --include-console  Also scan the console port (COM1)
//!   --digital PIN:0|1  After connecting, drive a digital output
//!   --pwm PIN:VALUE    After connecting, set a PWM duty (0-255)
//!   --servo PIN:ANGLE  After connecting, move a servo (0-180)
//!   --read-version     After connecting, query the firmware version again
//!   --self-test        After connecting, exercise pins 13, 9 and 5
//!   --demo SEED        Use simulated boards on virtual time instead of hardware
//!   --json             Print the scan report as JSON
//!   --config PATH      Settings file (default: user config directory)
//!
//! Set RUST_LOG=debug for a trace of every reset step and poll.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use firmata_scout_core::clock::{Clock, ManualClock};
use firmata_scout_core::config::ScoutConfig;
use firmata_scout_core::demo::DemoTransport;
use firmata_scout_core::identity::{DeviceDescriber, StaticDescriber, UsbDescriber};
use firmata_scout_core::profiles::ProfileName;
use firmata_scout_core::protocol::{Connector, DeviceSession};
use firmata_scout_core::scan::{spawn_scan, ScanReport, Scanner};

const DEMO_BOARDS: usize = 4;

#[derive(Debug, Clone, Copy)]
enum PinCommand {
    Digital(u8, bool),
    Pwm(u8, u16),
    Servo(u8, u16),
}

/// Parse `PIN:VALUE`
fn pin_value(arg: &str) -> Result<(u8, u16)> {
    let (pin, value) = arg
        .split_once(':')
        .with_context(|| format!("expected PIN:VALUE, got {arg}"))?;
    Ok((
        pin.trim().parse().context("bad pin")?,
        value.trim().parse().context("bad value")?,
    ))
}

#[derive(Debug, Default)]
struct Options {
    port: Option<String>,
    baud: Option<u32>,
    profile: Option<ProfileName>,
    rounds: Option<u32>,
    include_console: bool,
    self_test: bool,
    read_version: bool,
    pin_commands: Vec<PinCommand>,
    demo_seed: Option<u64>,
    json: bool,
    config: Option<PathBuf>,
}

fn parse_args() -> Result<Option<Options>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut opts = Options::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        let mut value = |name: &str| {
            iter.next()
                .cloned()
                .with_context(|| format!("{name} needs a value"))
        };
        match arg.as_str() {
            "--port" | "-p" => opts.port = Some(value("--port")?),
            "--baud" | "-b" => opts.baud = Some(value("--baud")?.parse().context("bad --baud")?),
            "--profile" => opts.profile = Some(value("--profile")?.parse()?),
            "--rounds" => opts.rounds = Some(value("--rounds")?.parse().context("bad --rounds")?),
            "--include-console" => opts.include_console = true,
            "--self-test" => opts.self_test = true,
            "--read-version" => opts.read_version = true,
            "--digital" => {
                let (pin, level) = pin_value(&value("--digital")?)?;
                if level > 1 {
                    bail!("digital level must be 0 or 1");
                }
                opts.pin_commands.push(PinCommand::Digital(pin, level == 1));
            }
            "--pwm" => {
                let (pin, duty) = pin_value(&value("--pwm")?)?;
                opts.pin_commands.push(PinCommand::Pwm(pin, duty));
            }
            "--servo" => {
                let (pin, angle) = pin_value(&value("--servo")?)?;
                opts.pin_commands.push(PinCommand::Servo(pin, angle));
            }
            "--demo" => opts.demo_seed = Some(value("--demo")?.parse().context("bad --demo")?),
            "--json" => opts.json = true,
            "--config" => opts.config = Some(PathBuf::from(value("--config")?)),
            "--help" | "-h" => {
                print_help();
                return Ok(None);
            }
            other if !other.starts_with('-') => opts.port = Some(other.to_string()),
            other => bail!("unknown option: {other}"),
        }
    }
    Ok(Some(opts))
}

fn load_config(opts: &Options) -> Result<ScoutConfig> {
    let path = match &opts.config {
        Some(path) => path.clone(),
        None => ScoutConfig::default_path()?,
    };
    let mut config = ScoutConfig::load(&path)
        .with_context(|| format!("loading settings from {}", path.display()))?;

    if let Some(baud) = opts.baud {
        config.connector.baud_rate = baud;
    }
    if let Some(rounds) = opts.rounds {
        config.scan.rounds = rounds;
    }
    if opts.include_console {
        config.scan.include_console_port = true;
    }
    config.validate()?;
    Ok(config)
}

/// Connector plus describer for real hardware or for the simulated bench
fn build(opts: &Options, config: &ScoutConfig) -> (Connector, Arc<dyn DeviceDescriber>) {
    match opts.demo_seed {
        Some(seed) => {
            let clock = Arc::new(ManualClock::new());
            let bench = Arc::new(DemoTransport::random_bench(clock.clone(), seed, DEMO_BOARDS));
            let connector =
                Connector::with_config(bench.clone(), bench, clock, config.connector.clone());
            (connector, Arc::new(StaticDescriber::new()))
        }
        None => (
            Connector::serial(config.connector.clone()),
            Arc::new(UsbDescriber),
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let Some(opts) = parse_args()? else {
        return Ok(());
    };
    let config = load_config(&opts)?;
    let (mut connector, describer) = build(&opts, &config);

    let Some(port) = opts.port.clone() else {
        let scanner = Scanner::new(connector, config.scan.clone()).with_describer(describer);
        let (_scanner, report) = spawn_scan(scanner).await.context("scan task failed")?;
        if opts.json {
            println!("{}", report.to_json()?);
        } else {
            print_report(&report);
        }
        return Ok(());
    };

    let mut session = match (opts.profile, describer.describe(&port)) {
        (Some(profile), _) => connector.connect_with_profile(&port, profile, 3),
        (None, Some(description)) => connector.connect_with_device_type(&port, &description),
        (None, None) => connector.connect_auto(&port, config.scan.rounds, None),
    }
    .with_context(|| format!("no Firmata device on {port}"))?;

    println!(
        "Connected to {} (Firmata {}, {} profile)",
        session.port(),
        session.firmware_version(),
        session.profile_used()
    );

    let clock = Arc::clone(connector.clock());
    for command in &opts.pin_commands {
        match *command {
            PinCommand::Digital(pin, level) => session.set_digital_output(pin, level)?,
            PinCommand::Pwm(pin, duty) => session.set_pwm_output(pin, duty)?,
            PinCommand::Servo(pin, angle) => session.set_servo_position(pin, angle)?,
        }
        println!("{command:?} sent");
    }
    if opts.read_version {
        read_version(&mut session, clock.as_ref())?;
    }
    if opts.self_test {
        self_test(&mut session, clock.as_ref())?;
    }
    session.close();
    Ok(())
}

/// Query the version again and wait a second for the answer
fn read_version(session: &mut DeviceSession, clock: &dyn Clock) -> Result<()> {
    session.request_version()?;
    clock.sleep(Duration::from_millis(1000));
    session.poll_events()?;
    println!("Firmata version: {}", session.firmware_version());
    Ok(())
}

/// Toggle the LED, ramp a PWM pin, sweep a servo and park it at 90 degrees
fn self_test(session: &mut DeviceSession, clock: &dyn Clock) -> Result<()> {
    println!("Testing digital output on pin 13...");
    session.set_digital_output(13, true)?;
    clock.sleep(Duration::from_millis(1000));
    session.set_digital_output(13, false)?;

    println!("Testing PWM on pin 9...");
    for duty in (0..=255).step_by(10) {
        session.set_pwm_output(9, duty)?;
        clock.sleep(Duration::from_millis(50));
    }
    session.set_pwm_output(9, 0)?;

    println!("Testing servo on pin 5...");
    for angle in (0..=180).step_by(10) {
        session.set_servo_position(5, angle)?;
        clock.sleep(Duration::from_millis(100));
    }
    session.set_servo_position(5, 90)?;

    println!("Self-test done, configured pins: {:?}", session.configured_pins());
    Ok(())
}

fn print_report(report: &ScanReport) {
    println!();
    println!("{:<16} {:<10} {:<10} {:<28} RESULT", "PORT", "FIRMATA", "PROFILE", "DEVICE");
    for entry in &report.entries {
        let version = entry
            .version
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".into());
        let profile = entry
            .profile
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".into());
        let result = if entry.succeeded {
            "ok".to_string()
        } else {
            entry.error_message.clone().unwrap_or_default()
        };
        println!(
            "{:<16} {:<10} {:<10} {:<28} {}",
            entry.port,
            version,
            profile,
            entry.device_type.as_deref().unwrap_or("-"),
            result
        );
    }
    for port in &report.skipped_ports {
        println!("{port:<16} (skipped)");
    }
    println!();
    println!(
        "{} Firmata device(s) on {} port(s), {:.1}s",
        report.firmata_devices().count(),
        report.entries.len(),
        (report.finished_at - report.started_at).num_milliseconds() as f64 / 1000.0
    );
}

fn print_help() {
    println!("Firmata Scout - find and test Firmata boards");
    println!();
    println!("Usage: scout [OPTIONS] [PORT]");
    println!();
    println!("Options:");
    println!("  --port, -p PORT     Connect to PORT instead of scanning");
    println!("  --baud, -b RATE     Baud rate (default: 115200)");
    println!("  --profile NAME      Reset profile: standard, mega, leonardo, esp8266");
    println!("  --rounds N          Round-robin rounds per port (default: 2)");
    println!("  --include-console   Also scan the console port");
    println!("  --digital PIN:0|1   Drive a digital output after connecting");
    println!("  --pwm PIN:VALUE     Set a PWM duty (0-255) after connecting");
    println!("  --servo PIN:ANGLE   Move a servo (0-180) after connecting");
    println!("  --read-version      Query the firmware version again");
    println!("  --self-test         Exercise pins 13, 9 and 5 after connecting");
    println!("  --demo SEED         Simulated boards on virtual time");
    println!("  --json              Print the scan report as JSON");
    println!("  --config PATH       Settings file");
    println!("  --help, -h          Show this help");
}
