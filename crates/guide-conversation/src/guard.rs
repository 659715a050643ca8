//! Best-effort suppression of automatically generated assistant messages
//! that repeat something said moments ago.

use chrono::Duration;
use guide_config::DuplicateGuardSettings;
use guide_core::{Message, NewMessage};
use once_cell::sync::Lazy;
use regex::Regex;

static SALUTATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(hello|hi|hey|welcome|greetings|good (morning|afternoon|evening))\b")
        .expect("Invalid regex pattern")
});

static SCREEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bscreens?\b").expect("Invalid regex pattern"));

static HELP_OFFER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(help|assist|guide)\b").expect("Invalid regex pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateGuard {
    pub window: Duration,
    pub recent_messages: usize,
}

impl Default for DuplicateGuard {
    fn default() -> Self {
        Self::from(&DuplicateGuardSettings::default())
    }
}

impl From<&DuplicateGuardSettings> for DuplicateGuard {
    fn from(settings: &DuplicateGuardSettings) -> Self {
        Self {
            window: settings.window(),
            recent_messages: settings.recent_messages,
        }
    }
}

/// True when `text` salutes, mentions the screen and offers help
pub fn is_greeting(text: &str) -> bool {
    SALUTATION.is_match(text) && SCREEN.is_match(text) && HELP_OFFER.is_match(text)
}

impl DuplicateGuard {
    /// Whether `candidate` repeats one of the last few messages from the same
    /// sender inside the time window.
    pub fn is_duplicate(&self, history: &[Message], candidate: &NewMessage) -> bool {
        let candidate_is_greeting = is_greeting(&candidate.text);

        history
            .iter()
            .rev()
            .filter(|m| m.is_user == candidate.is_user)
            .take(self.recent_messages)
            .filter(|m| (candidate.timestamp - m.timestamp).abs() <= self.window)
            .any(|m| m.text == candidate.text || (candidate_is_greeting && is_greeting(&m.text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn assistant(text: &str, secs: i64) -> Message {
        NewMessage::assistant(text, at(secs)).into_message()
    }

    fn user(text: &str, secs: i64) -> Message {
        NewMessage::user(text, at(secs)).into_message()
    }

    #[test]
    fn test_greeting_pattern() {
        assert!(is_greeting("Hello! I can see your WhatsApp screen. How can I help you today?"));
        assert!(is_greeting("Hi there, I'm looking at your Settings screen and I'm ready to assist."));
        assert!(is_greeting("Good morning! Your phone screen is visible; let me guide you."));
        assert!(!is_greeting("Hello! How can I help you today?"));
        assert!(!is_greeting("I can see your screen. Tap the green button."));
        assert!(!is_greeting("Hello, this screen shows your contacts."));
        // Word boundaries: "this" must not count as "hi"
        assert!(!is_greeting("On this screen I can help you send a photo."));
    }

    #[test]
    fn test_exact_match_within_window_is_duplicate() {
        let guard = DuplicateGuard::default();
        let history = vec![assistant("Tap the camera icon.", 0)];
        let candidate = NewMessage::assistant("Tap the camera icon.", at(4));
        assert!(guard.is_duplicate(&history, &candidate));
    }

    #[test]
    fn test_two_greetings_within_window() {
        let guard = DuplicateGuard::default();
        let history = vec![assistant(
            "Hello! I can see your WhatsApp screen. How can I help you today?",
            0,
        )];
        let candidate = NewMessage::assistant(
            "Hi! I'm looking at your Phone screen. What can I help you with?",
            at(9),
        );
        assert!(guard.is_duplicate(&history, &candidate));
    }

    #[test]
    fn test_outside_window_is_not_duplicate() {
        let guard = DuplicateGuard::default();
        let history = vec![assistant("Tap the camera icon.", 0)];
        let candidate = NewMessage::assistant("Tap the camera icon.", at(11));
        assert!(!guard.is_duplicate(&history, &candidate));
    }

    #[test]
    fn test_other_sender_is_ignored() {
        let guard = DuplicateGuard::default();
        let history = vec![user("Hello, can you help me with this screen?", 0)];
        let candidate = NewMessage::assistant(
            "Hello! I can see your Phone screen. How can I help you today?",
            at(1),
        );
        assert!(!guard.is_duplicate(&history, &candidate));
    }

    #[test]
    fn test_only_recent_messages_are_scanned() {
        let guard = DuplicateGuard {
            window: Duration::seconds(10),
            recent_messages: 2,
        };
        let history = vec![
            assistant("Open Settings.", 0),
            assistant("Scroll down.", 1),
            user("ok", 1),
            assistant("Tap Display.", 2),
        ];
        let candidate = NewMessage::assistant("Open Settings.", at(3));
        assert!(!guard.is_duplicate(&history, &candidate));

        let candidate = NewMessage::assistant("Scroll down.", at(3));
        assert!(guard.is_duplicate(&history, &candidate));
    }

    #[test]
    fn test_non_greeting_text_variation_is_kept() {
        let guard = DuplicateGuard::default();
        let history = vec![assistant("Tap the camera icon.", 0)];
        let candidate = NewMessage::assistant("Tap the paperclip icon.", at(1));
        assert!(!guard.is_duplicate(&history, &candidate));
    }

    #[test]
    fn test_empty_history() {
        let guard = DuplicateGuard::default();
        let candidate = NewMessage::assistant("Hello! I see your screen. Need help?", at(0));
        assert!(!guard.is_duplicate(&[], &candidate));
    }
}
