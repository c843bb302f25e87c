//! Reset profiles
//!
//! Board families disagree about how they come out of reset when a serial
//! port opens. Each profile is a fixed list of [`ResetStep`]s plus the
//! handshake timing that suits the family.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::protocol::{ControlLine, ProtocolError};

/// Names of the built-in profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProfileName {
    /// Generic AVR boards (Uno, Nano)
    Standard,
    /// ATmega2560 boards, slow bootloader
    Mega,
    /// Native USB boards that re-enumerate on reset
    Leonardo,
    /// ESP8266/ESP32 boards with bootstrap-pin-sensitive reset
    #[serde(rename = "ESP8266")]
    Esp8266,
}

impl ProfileName {
    /// Order used when nothing is known about the board
    pub const ROUND_ROBIN: [ProfileName; 4] = [
        ProfileName::Standard,
        ProfileName::Mega,
        ProfileName::Leonardo,
        ProfileName::Esp8266,
    ];

    /// Display name, also used in config files
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileName::Standard => "Standard",
            ProfileName::Mega => "Mega",
            ProfileName::Leonardo => "Leonardo",
            ProfileName::Esp8266 => "ESP8266",
        }
    }

    /// The full profile definition
    pub fn profile(&self) -> &'static ResetProfile {
        match self {
            ProfileName::Standard => &STANDARD,
            ProfileName::Mega => &MEGA,
            ProfileName::Leonardo => &LEONARDO,
            ProfileName::Esp8266 => &ESP8266,
        }
    }

    /// First profile (in round-robin order) whose name appears in `hint`,
    /// ignoring case
    pub fn find_in(hint: &str) -> Option<ProfileName> {
        let hint = hint.to_lowercase();
        Self::ROUND_ROBIN
            .into_iter()
            .find(|p| hint.contains(&p.as_str().to_lowercase()))
    }
}

impl fmt::Display for ProfileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileName {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ROUND_ROBIN
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ProtocolError::UnknownProfile(s.to_string()))
    }
}

/// One action of a reset sequence. A failing step aborts the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetStep {
    /// Open the port with the current control-line levels
    Open,
    /// Close the port
    Close,
    /// Sleep for the given number of milliseconds
    Wait(u64),
    /// Drive a control line; before `Open` this sets the level used at open
    SetControlLine(ControlLine, bool),
}

/// A named reset sequence with its handshake timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetProfile {
    /// Which family this sequence is for
    pub name: ProfileName,
    /// Number of handshake poll ticks
    pub handshake_attempts: u32,
    /// Length of one poll tick
    pub handshake_delay_ms: u64,
    /// Steps run before the first version query
    pub reset_steps: &'static [ResetStep],
}

impl ResetProfile {
    /// Total time the handshake may wait for a version report
    pub fn handshake_budget(&self) -> Duration {
        Duration::from_millis(self.handshake_delay_ms * self.handshake_attempts as u64)
    }

    /// Sum of all `Wait` steps
    pub fn reset_duration(&self) -> Duration {
        let ms = self
            .reset_steps
            .iter()
            .map(|step| match step {
                ResetStep::Wait(ms) => *ms,
                _ => 0,
            })
            .sum();
        Duration::from_millis(ms)
    }
}

use ControlLine::{Dtr, Rts};
use ResetStep::{Close, Open, SetControlLine, Wait};

/// Generic AVR boards: open and wait for the bootloader
pub static STANDARD: ResetProfile = ResetProfile {
    name: ProfileName::Standard,
    handshake_attempts: 6,
    handshake_delay_ms: 150,
    reset_steps: &[Open, Wait(2000)],
};

/// Like standard with a longer boot
pub static MEGA: ResetProfile = ResetProfile {
    name: ProfileName::Mega,
    handshake_attempts: 12,
    handshake_delay_ms: 200,
    reset_steps: &[Open, Wait(4500)],
};

/// Opening the port resets the board, which drops off the bus and comes back
pub static LEONARDO: ResetProfile = ResetProfile {
    name: ProfileName::Leonardo,
    handshake_attempts: 8,
    handshake_delay_ms: 100,
    reset_steps: &[Open, Wait(100), Close, Wait(1500), Open, Wait(3000)],
};

/// Both lines low, a DTR then RTS pulse, then a reopen
pub static ESP8266: ResetProfile = ResetProfile {
    name: ProfileName::Esp8266,
    handshake_attempts: 10,
    handshake_delay_ms: 150,
    reset_steps: &[
        SetControlLine(Dtr, false),
        SetControlLine(Rts, false),
        Open,
        Wait(100),
        SetControlLine(Dtr, true),
        Wait(100),
        SetControlLine(Dtr, false),
        Wait(100),
        SetControlLine(Rts, true),
        Wait(100),
        SetControlLine(Rts, false),
        // boot
        Wait(1500),
        Close,
        Wait(500),
        Open,
        Wait(2000),
    ],
};

/// All profiles in round-robin order
pub fn all() -> [&'static ResetProfile; 4] {
    ProfileName::ROUND_ROBIN.map(|name| name.profile())
}

/// Look a profile up by (case-insensitive) name
pub fn lookup(name: &str) -> Result<&'static ResetProfile, ProtocolError> {
    name.parse::<ProfileName>().map(|n| n.profile())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_parameters() {
        let params: Vec<_> = all()
            .iter()
            .map(|p| (p.name, p.handshake_attempts, p.handshake_delay_ms))
            .collect();
        assert_eq!(
            params,
            vec![
                (ProfileName::Standard, 6, 150),
                (ProfileName::Mega, 12, 200),
                (ProfileName::Leonardo, 8, 100),
                (ProfileName::Esp8266, 10, 150),
            ]
        );
    }

    #[test]
    fn test_reset_durations() {
        assert_eq!(STANDARD.reset_duration(), Duration::from_millis(2000));
        assert_eq!(MEGA.reset_duration(), Duration::from_millis(4500));
        assert_eq!(LEONARDO.reset_duration(), Duration::from_millis(4600));
        assert_eq!(ESP8266.reset_duration(), Duration::from_millis(4400));
        assert_eq!(MEGA.handshake_budget(), Duration::from_millis(2400));
    }

    #[test]
    fn test_esp8266_drops_lines_before_open() {
        assert_eq!(
            &ESP8266.reset_steps[..3],
            &[SetControlLine(Dtr, false), SetControlLine(Rts, false), Open]
        );
    }

    #[test]
    fn test_every_profile_starts_by_opening_and_ends_open() {
        for profile in all() {
            let mut open = false;
            for step in profile.reset_steps {
                match step {
                    Open => open = true,
                    Close => open = false,
                    _ => {}
                }
            }
            assert!(open, "{} must leave the port open", profile.name);
        }
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(lookup("esp8266").unwrap().name, ProfileName::Esp8266);
        assert_eq!(lookup(" MEGA ").unwrap().name, ProfileName::Mega);
        assert!(matches!(lookup("due"), Err(ProtocolError::UnknownProfile(_))));
    }

    #[test]
    fn test_find_in_hint() {
        assert_eq!(ProfileName::find_in("try the leonardo one"), Some(ProfileName::Leonardo));
        assert_eq!(ProfileName::find_in("ESP8266"), Some(ProfileName::Esp8266));
        assert_eq!(ProfileName::find_in("teensy"), None);
    }

    #[test]
    fn test_serde_uses_display_names() {
        let json = serde_json::to_string(&ProfileName::Esp8266).unwrap();
        assert_eq!(json, "\"ESP8266\"");
        let back: ProfileName = serde_json::from_str("\"Mega\"").unwrap();
        assert_eq!(back, ProfileName::Mega);
    }
}
