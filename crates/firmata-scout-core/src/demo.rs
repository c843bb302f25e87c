//! Demo Mode - simulated Firmata boards
//!
//! A virtual transport whose "boards" behave like the real families: slow
//! bootloaders, boards that only come up after a short open/close kick, and
//! boards that need a control-line pulse. Lets the connection logic run
//! without hardware, on real or virtual time.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::clock::Clock;
use crate::protocol::codec::{FirmwareVersion, REPORT_VERSION};
use crate::protocol::{
    ControlLine, ControlLines, LineSettings, Link, PortEnumerator, PortId, ProtocolError,
    Transport,
};

/// An open shorter than this, closed before any query, counts as a reset kick
const KICK_THRESHOLD: Duration = Duration::from_millis(500);

/// How a simulated board reacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardBehavior {
    /// Version sent in every report
    pub version: FirmwareVersion,
    /// False for a serial device that is not running Firmata
    pub answers: bool,
    /// Time after the most recent open before queries are answered
    pub boot_ms: u64,
    /// The report shows up on this read after a query (1 = next read)
    pub reply_after_polls: u32,
    /// Deliver the 3-byte report across two reads
    pub split_reply: bool,
    /// Only answer after a short open/close kick
    pub needs_kick: bool,
    /// Only answer after DTR was pulsed high then low while open
    pub needs_line_pulse: bool,
    /// Bytes waiting in the input buffer right after every open
    pub boot_chatter: Vec<u8>,
    /// Number of opens that fail before opens succeed
    pub open_failures: u32,
    /// Every write fails
    pub fail_writes: bool,
}

impl BoardBehavior {
    /// A generic AVR board
    pub fn uno() -> Self {
        Self {
            version: FirmwareVersion::new(2, 5),
            answers: true,
            boot_ms: 1500,
            reply_after_polls: 1,
            split_reply: false,
            needs_kick: false,
            needs_line_pulse: false,
            boot_chatter: Vec::new(),
            open_failures: 0,
            fail_writes: false,
        }
    }

    /// Slow bootloader: too slow for the standard profile
    pub fn mega() -> Self {
        Self {
            boot_ms: 4000,
            ..Self::uno()
        }
    }

    /// Native USB board that needs a reopen
    pub fn leonardo() -> Self {
        Self {
            boot_ms: 1000,
            needs_kick: true,
            ..Self::uno()
        }
    }

    /// ESP board that needs a DTR pulse
    pub fn esp8266() -> Self {
        Self {
            boot_ms: 1000,
            needs_line_pulse: true,
            boot_chatter: b"\r\nets Jan  8 2013,rst cause:2, boot mode:(3,6)\r\n".to_vec(),
            ..Self::uno()
        }
    }

    /// Serial device that never speaks Firmata
    pub fn silent() -> Self {
        Self {
            answers: false,
            ..Self::uno()
        }
    }

    /// A random family with random firmware version, reproducible by seed
    pub fn random(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut board = match rng.gen_range(0..5) {
            0 => Self::uno(),
            1 => Self::mega(),
            2 => Self::leonardo(),
            3 => Self::esp8266(),
            _ => Self::silent(),
        };
        board.version = FirmwareVersion::new(2, rng.gen_range(3..=7));
        board.reply_after_polls = rng.gen_range(1..=3);
        board
    }
}

/// Everything a board saw, for inspection
#[derive(Debug, Default, Clone)]
struct BoardState {
    present: bool,
    fail_writes: bool,
    open_failures_left: u32,
    open_handles: u32,
    total_opens: u32,
    opened_at: Option<Duration>,
    opened_with: Vec<ControlLines>,
    control_events: Vec<(ControlLine, bool)>,
    lines: ControlLines,
    written: Vec<u8>,
    queries_this_open: u32,
    queries_total: u32,
    kicked: bool,
    pulse_high_seen: bool,
    pulsed: bool,
    inbound: VecDeque<u8>,
    reply_in_polls: Option<u32>,
    held_back: Vec<u8>,
}

/// Handle to one simulated board; clones share the same board
#[derive(Debug, Clone)]
pub struct DemoBoard {
    behavior: BoardBehavior,
    state: Arc<Mutex<BoardState>>,
}

impl DemoBoard {
    /// A present board, closed, with nothing written yet
    pub fn new(behavior: BoardBehavior) -> Self {
        let state = BoardState {
            present: true,
            fail_writes: behavior.fail_writes,
            open_failures_left: behavior.open_failures,
            ..BoardState::default()
        };
        Self {
            behavior,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// How this board was scripted
    pub fn behavior(&self) -> &BoardBehavior {
        &self.behavior
    }

    /// Plug or unplug the board
    pub fn set_present(&self, present: bool) {
        self.lock().present = present;
    }

    /// Whether the board is plugged in
    pub fn is_present(&self) -> bool {
        self.lock().present
    }

    /// Make writes fail (or work again) from now on
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Links currently open on this board
    pub fn open_handles(&self) -> u32 {
        self.lock().open_handles
    }

    /// Successful opens since the board was created
    pub fn total_opens(&self) -> u32 {
        self.lock().total_opens
    }

    /// Control-line levels at each open, in order
    pub fn opened_with(&self) -> Vec<ControlLines> {
        self.lock().opened_with.clone()
    }

    /// Control-line changes made while open, in order
    pub fn control_events(&self) -> Vec<(ControlLine, bool)> {
        self.lock().control_events.clone()
    }

    /// Every byte the host wrote
    pub fn written(&self) -> Vec<u8> {
        self.lock().written.clone()
    }

    /// Version queries received over the board's lifetime
    pub fn queries_received(&self) -> u32 {
        self.lock().queries_total
    }

    /// Queue bytes as if the board had sent them
    pub fn inject(&self, bytes: &[u8]) {
        self.lock().inbound.extend(bytes.iter().copied());
    }

    fn lock(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn open(&self, settings: &LineSettings, now: Duration) -> Result<(), ProtocolError> {
        let mut state = self.lock();
        if !state.present {
            return Err(ProtocolError::TransportOpenFailed {
                port: String::new(),
                reason: "device not present".into(),
            });
        }
        if state.open_failures_left > 0 {
            state.open_failures_left -= 1;
            return Err(ProtocolError::TransportOpenFailed {
                port: String::new(),
                reason: "access denied".into(),
            });
        }
        if state.open_handles > 0 {
            return Err(ProtocolError::TransportOpenFailed {
                port: String::new(),
                reason: "port already in use".into(),
            });
        }

        state.open_handles += 1;
        state.total_opens += 1;
        state.opened_at = Some(now);
        state.opened_with.push(settings.control_lines);
        state.lines = settings.control_lines;
        state.queries_this_open = 0;
        state.reply_in_polls = None;
        state.held_back.clear();
        state.inbound = self.behavior.boot_chatter.iter().copied().collect();
        Ok(())
    }

    fn close(&self, now: Duration) {
        let mut state = self.lock();
        if state.open_handles == 0 {
            return;
        }
        state.open_handles -= 1;

        let held = state
            .opened_at
            .map(|t| now.saturating_sub(t))
            .unwrap_or_default();
        if state.queries_this_open > 0 {
            // The host gave up on this board; the next attempt starts clean
            state.kicked = false;
            state.pulsed = false;
            state.pulse_high_seen = false;
        } else if held < KICK_THRESHOLD {
            state.kicked = true;
        }
        state.opened_at = None;
        state.inbound.clear();
    }

    fn set_line(&self, line: ControlLine, level: bool) {
        let mut state = self.lock();
        state.control_events.push((line, level));
        state.lines.set(line, level);
        if line == ControlLine::Dtr {
            if level {
                state.pulse_high_seen = true;
            } else if state.pulse_high_seen {
                state.pulsed = true;
            }
        }
    }

    fn write(&self, bytes: &[u8], now: Duration) -> Result<usize, ProtocolError> {
        let mut state = self.lock();
        if state.fail_writes {
            return Err(ProtocolError::TransportIoFailed("write failed".into()));
        }
        state.written.extend_from_slice(bytes);
        for &byte in bytes {
            if byte != REPORT_VERSION {
                continue;
            }
            state.queries_this_open += 1;
            state.queries_total += 1;
            if state.reply_in_polls.is_none() && self.ready(&state, now) {
                state.reply_in_polls = Some(self.behavior.reply_after_polls.max(1));
            }
        }
        Ok(bytes.len())
    }

    fn ready(&self, state: &BoardState, now: Duration) -> bool {
        let booted = state
            .opened_at
            .map(|t| now.saturating_sub(t) >= Duration::from_millis(self.behavior.boot_ms))
            .unwrap_or(false);
        self.behavior.answers
            && booted
            && (!self.behavior.needs_kick || state.kicked)
            && (!self.behavior.needs_line_pulse || state.pulsed)
    }

    fn read(&self) -> Vec<u8> {
        let mut state = self.lock();
        if !state.held_back.is_empty() {
            let rest = std::mem::take(&mut state.held_back);
            state.inbound.extend(rest);
        }
        if let Some(polls) = state.reply_in_polls {
            if polls <= 1 {
                state.reply_in_polls = None;
                let v = self.behavior.version;
                if self.behavior.split_reply {
                    state.inbound.extend([REPORT_VERSION, v.major]);
                    state.held_back = vec![v.minor];
                } else {
                    state.inbound.extend([REPORT_VERSION, v.major, v.minor]);
                }
            } else {
                state.reply_in_polls = Some(polls - 1);
            }
        }
        state.inbound.drain(..).collect()
    }

    fn discard(&self) {
        self.lock().inbound.clear();
    }
}

/// Open link to a [`DemoBoard`]
pub struct DemoLink {
    board: DemoBoard,
    clock: Arc<dyn Clock>,
    open: bool,
}

impl DemoLink {
    fn check_open(&self) -> Result<(), ProtocolError> {
        if self.open {
            Ok(())
        } else {
            Err(ProtocolError::NotConnected)
        }
    }
}

impl Link for DemoLink {
    fn set_control_line(&mut self, line: ControlLine, level: bool) -> Result<(), ProtocolError> {
        self.check_open()?;
        self.board.set_line(line, level);
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, ProtocolError> {
        self.check_open()?;
        self.board.write(bytes, self.clock.now())
    }

    fn read_available(&mut self) -> Result<Vec<u8>, ProtocolError> {
        self.check_open()?;
        Ok(self.board.read())
    }

    fn discard_buffers(&mut self) -> Result<(), ProtocolError> {
        self.check_open()?;
        self.board.discard();
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.board.close(self.clock.now());
        }
    }
}

impl Drop for DemoLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// A bench of simulated boards, one per port name
#[derive(Clone)]
pub struct DemoTransport {
    boards: BTreeMap<PortId, DemoBoard>,
    clock: Arc<dyn Clock>,
}

impl DemoTransport {
    /// Empty bench on `clock`
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            boards: BTreeMap::new(),
            clock,
        }
    }

    /// Attach a board to `port`
    pub fn with_board(mut self, port: impl Into<PortId>, board: DemoBoard) -> Self {
        self.boards.insert(port.into(), board);
        self
    }

    /// `count` random boards on COM3, COM4, ...
    pub fn random_bench(clock: Arc<dyn Clock>, seed: u64, count: usize) -> Self {
        (0..count).fold(Self::new(clock), |bench, i| {
            let behavior = BoardBehavior::random(seed.wrapping_add(i as u64));
            bench.with_board(format!("COM{}", i + 3), DemoBoard::new(behavior))
        })
    }

    /// Board attached to `port`
    pub fn board(&self, port: &str) -> Option<&DemoBoard> {
        self.boards.get(port)
    }
}

impl Transport for DemoTransport {
    fn open(&self, port: &str, settings: &LineSettings) -> Result<Box<dyn Link>, ProtocolError> {
        let board = self
            .boards
            .get(port)
            .ok_or_else(|| ProtocolError::TransportOpenFailed {
                port: port.to_string(),
                reason: "no such device".into(),
            })?;
        board
            .open(settings, self.clock.now())
            .map_err(|e| match e {
                ProtocolError::TransportOpenFailed { reason, .. } => {
                    ProtocolError::TransportOpenFailed {
                        port: port.to_string(),
                        reason,
                    }
                }
                other => other,
            })?;
        Ok(Box::new(DemoLink {
            board: board.clone(),
            clock: Arc::clone(&self.clock),
            open: true,
        }))
    }
}

impl PortEnumerator for DemoTransport {
    fn list_ports(&self) -> Vec<PortId> {
        self.boards
            .iter()
            .filter(|(_, board)| board.is_present())
            .map(|(port, _)| port.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn bench(behavior: BoardBehavior) -> (DemoTransport, DemoBoard, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let board = DemoBoard::new(behavior);
        let transport = DemoTransport::new(clock.clone()).with_board("COM3", board.clone());
        (transport, board, clock)
    }

    #[test]
    fn test_board_answers_after_boot() {
        let (transport, board, clock) = bench(BoardBehavior::uno());
        let mut link = transport.open("COM3", &LineSettings::default()).unwrap();
        link.write_all(&[REPORT_VERSION]).unwrap();
        assert!(link.read_available().unwrap().is_empty());

        clock.advance(Duration::from_millis(1500));
        link.write_all(&[REPORT_VERSION]).unwrap();
        assert_eq!(link.read_available().unwrap(), vec![0xF9, 2, 5]);
        assert_eq!(board.queries_received(), 2);
    }

    #[test]
    fn test_boot_chatter_is_discardable() {
        let (transport, _board, _clock) = bench(BoardBehavior::esp8266());
        let mut link = transport.open("COM3", &LineSettings::default()).unwrap();
        link.discard_buffers().unwrap();
        assert!(link.read_available().unwrap().is_empty());
    }

    #[test]
    fn test_second_open_is_refused() {
        let (transport, board, _clock) = bench(BoardBehavior::uno());
        let _first = transport.open("COM3", &LineSettings::default()).unwrap();
        assert!(transport.open("COM3", &LineSettings::default()).is_err());
        assert_eq!(board.open_handles(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (transport, board, _clock) = bench(BoardBehavior::uno());
        let mut link = transport.open("COM3", &LineSettings::default()).unwrap();
        link.close();
        link.close();
        drop(link);
        assert_eq!(board.open_handles(), 0);
    }

    #[test]
    fn test_unplugged_board_disappears() {
        let (transport, board, _clock) = bench(BoardBehavior::uno());
        board.set_present(false);
        assert!(transport.list_ports().is_empty());
        assert!(transport.open("COM3", &LineSettings::default()).is_err());
    }

    #[test]
    fn test_random_is_reproducible() {
        assert_eq!(BoardBehavior::random(7), BoardBehavior::random(7));
    }
}
