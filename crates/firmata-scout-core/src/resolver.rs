//! Device-type to profile resolution
//!
//! Maps a friendly board description (as reported by the OS) to the reset
//! profile most likely to work and how many attempts to spend on it.

use serde::{Deserialize, Serialize};

use crate::profiles::ProfileName;

/// Suggested profile and retry budget for a described device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileHint {
    /// Profile to try
    pub profile: ProfileName,
    /// Attempts to spend on it
    pub attempts: u32,
}

/// Ordered rules: the first rule with a matching keyword wins
const RULES: &[(&[&str], ProfileName, u32)] = &[
    (&["mega"], ProfileName::Mega, 3),
    (&["leonardo"], ProfileName::Leonardo, 3),
    (&["esp8266", "esp32"], ProfileName::Esp8266, 3),
    (&["nano", "uno"], ProfileName::Standard, 2),
];

/// Resolve a description such as "Arduino Mega 2560".
///
/// `None` means no rule matched and the caller should fall back to trying
/// every profile.
pub fn resolve(description: &str) -> Option<ProfileHint> {
    let text = description.to_lowercase();
    RULES
        .iter()
        .find(|(keywords, _, _)| keywords.iter().any(|k| text.contains(k)))
        .map(|&(_, profile, attempts)| ProfileHint { profile, attempts })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_mega() {
        assert_eq!(
            resolve("Arduino Mega 2560"),
            Some(ProfileHint { profile: ProfileName::Mega, attempts: 3 })
        );
    }

    #[test]
    fn test_resolve_no_match() {
        assert_eq!(resolve("random USB serial"), None);
        assert_eq!(resolve(""), None);
    }

    #[test]
    fn test_resolve_esp_family() {
        assert_eq!(resolve("ESP32").map(|h| h.profile), Some(ProfileName::Esp8266));
        assert_eq!(resolve("NodeMCU esp8266").map(|h| h.profile), Some(ProfileName::Esp8266));
    }

    #[test]
    fn test_resolve_standard_boards_get_two_attempts() {
        assert_eq!(
            resolve("Arduino Uno"),
            Some(ProfileHint { profile: ProfileName::Standard, attempts: 2 })
        );
        assert_eq!(resolve("arduino NANO every").map(|h| h.attempts), Some(2));
    }

    #[test]
    fn test_first_rule_wins() {
        // "mega" is checked before "uno"
        assert_eq!(resolve("Mega-compatible uno clone").map(|h| h.profile), Some(ProfileName::Mega));
    }
}
