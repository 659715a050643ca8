use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

/// Context key used when no app screen is active
pub const GENERAL_CONTEXT: &str = "general";

/// A single transcript entry. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub text: String,
    pub is_user: bool,
    pub timestamp: DateTime<Utc>,
}

/// A message before the store has assigned it an id
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub text: String,
    pub is_user: bool,
    pub timestamp: DateTime<Utc>,
}

impl NewMessage {
    pub fn user(text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            is_user: true,
            timestamp,
        }
    }

    pub fn assistant(text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            is_user: false,
            timestamp,
        }
    }

    pub fn into_message(self) -> Message {
        Message {
            id: Uuid::new_v4().to_string(),
            text: self.text,
            is_user: self.is_user,
            timestamp: self.timestamp,
        }
    }
}

/// Per-context message log plus the capture bookkeeping that drives staleness
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub context: String,
    pub messages: Vec<Message>,
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_screenshot_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_context_switch_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub has_greeted: bool,
}

impl Conversation {
    pub fn new(context: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            context: context.into(),
            messages: Vec::new(),
            last_updated: now,
            last_screenshot_timestamp: None,
            last_context_switch_time: None,
            has_greeted: false,
        }
    }

    /// Advance `last_updated`, never moving it backwards
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_updated {
            self.last_updated = now;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureMetadata {
    pub source_id: String,
    pub timestamp: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
}

/// An encoded screen image. Transient, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureResult {
    pub image_bytes: Vec<u8>,
    pub metadata: CaptureMetadata,
}

/// One prior turn handed to the model as history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub is_user: bool,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidanceRequest {
    pub query: String,
    pub context: String,
    /// Base64 encoded screenshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub history: Vec<HistoryTurn>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidanceResponse {
    pub guidance: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<String>>,
    pub confidence: f64,
    pub model_used: String,
    pub context: String,
    pub fallback: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum GuideError {
    #[error("Screen capture unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("Conversation storage failed: {0}")]
    StorageFailure(String),

    #[error("Model service unreachable: {0}")]
    ServiceUnreachable(String),

    #[error("Model service error: {0}")]
    ServiceError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GuideError>;

/// Source of "now" for everything that reasons about time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Turns a renderable region into an encoded image.
///
/// A missing target yields `Ok(None)`; `Err` is reserved for a failing
/// capture primitive.
#[async_trait]
pub trait CaptureAdapter: Send + Sync {
    async fn capture(&self, target_id: &str, context_label: &str) -> Result<Option<CaptureResult>>;
}

/// Answers a guidance request. Never fails: implementations substitute a
/// fallback answer when the model cannot be reached.
#[async_trait]
pub trait GuidanceService: Send + Sync {
    async fn ask(&self, request: GuidanceRequest) -> GuidanceResponse;
}
