//! Decides whether the stored screen capture for a context can still be
//! trusted or a fresh one must be taken before answering.

use chrono::{DateTime, Duration, Utc};
use guide_config::StalenessSettings;
use guide_core::Conversation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessPolicy {
    /// How long after a context switch the relaxed threshold applies
    pub switch_grace: Duration,
    pub relaxed_threshold: Duration,
    pub normal_threshold: Duration,
}

/// Which rule of the decision list produced the verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    NoConversation,
    NeverCaptured,
    ContextChanged,
    /// Recent context switch; carries whether the relaxed threshold was exceeded
    Relaxed { stale: bool },
    Normal { stale: bool },
}

impl Freshness {
    pub fn needs_capture(self) -> bool {
        match self {
            Freshness::NoConversation | Freshness::NeverCaptured | Freshness::ContextChanged => true,
            Freshness::Relaxed { stale } | Freshness::Normal { stale } => stale,
        }
    }
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self::from(&StalenessSettings::default())
    }
}

impl From<&StalenessSettings> for StalenessPolicy {
    fn from(settings: &StalenessSettings) -> Self {
        Self {
            switch_grace: settings.switch_grace(),
            relaxed_threshold: settings.relaxed_threshold(),
            normal_threshold: settings.normal_threshold(),
        }
    }
}

impl StalenessPolicy {
    /// Ordered decision list; the first matching rule wins.
    pub fn evaluate(
        &self,
        conversation: Option<&Conversation>,
        context_changed_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Freshness {
        let Some(conversation) = conversation else {
            return Freshness::NoConversation;
        };
        let Some(last_capture) = conversation.last_screenshot_timestamp else {
            return Freshness::NeverCaptured;
        };

        if matches!(context_changed_at, Some(changed) if changed > last_capture) {
            return Freshness::ContextChanged;
        }

        // A missing switch time counts as infinitely long ago
        let recently_switched = conversation
            .last_context_switch_time
            .map(|switched| now - switched < self.switch_grace)
            .unwrap_or(false);

        if recently_switched {
            Freshness::Relaxed {
                stale: last_capture < now - self.relaxed_threshold,
            }
        } else {
            Freshness::Normal {
                stale: last_capture < now - self.normal_threshold,
            }
        }
    }

    pub fn needs_fresh_capture(
        &self,
        conversation: Option<&Conversation>,
        context_changed_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        self.evaluate(conversation, context_changed_at, now).needs_capture()
    }
}
