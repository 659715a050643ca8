use chrono::Duration;
use guide_core::{GuideError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

pub mod env_substitution;

pub use env_substitution::substitute_env_vars;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuideConfig {
    #[serde(default)]
    pub service: ServiceSettings,
    #[serde(default)]
    pub conversation: ConversationSettings,
    #[serde(default)]
    pub staleness: StalenessSettings,
    #[serde(default)]
    pub trigger: TriggerSettings,
    #[serde(default)]
    pub duplicate_guard: DuplicateGuardSettings,
    #[serde(default)]
    pub capture: CaptureSettings,
    #[serde(default)]
    pub paths: PathSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
    #[serde(default)]
    pub options: GenerationOptions,
}

/// Sampling options forwarded verbatim to the inference service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_repeat_penalty")]
    pub repeat_penalty: f32,
    #[serde(default, flatten, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSettings {
    #[serde(default = "default_max_conversations")]
    pub max_conversations: usize,
    #[serde(default = "default_expiry_hours")]
    pub expiry_hours: u64,
    #[serde(default = "default_history_messages")]
    pub history_messages: usize,
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StalenessSettings {
    #[serde(default = "default_switch_grace_secs")]
    pub switch_grace_secs: u64,
    #[serde(default = "default_relaxed_threshold_secs")]
    pub relaxed_threshold_secs: u64,
    #[serde(default = "default_normal_threshold_secs")]
    pub normal_threshold_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerSettings {
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGuardSettings {
    #[serde(default = "default_guard_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_recent_messages")]
    pub recent_messages: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSettings {
    #[serde(default = "default_target_id")]
    pub target_id: String,
    #[serde(default = "default_screens_dir")]
    pub screens_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    #[serde(default = "default_home_dir")]
    pub home_dir: PathBuf,
}

impl GuideConfig {
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| GuideError::ConfigError(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let expanded = substitute_env_vars(yaml)?;

        // An empty document deserializes to unit, not to a mapping
        let mut config: GuideConfig = if expanded.trim().is_empty() {
            GuideConfig::default()
        } else {
            serde_yaml::from_str(&expanded)
                .map_err(|e| GuideError::ConfigError(format!("Failed to parse YAML: {}", e)))?
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Load from `path` when it exists, otherwise fall back to defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_yaml(path)
        } else {
            let mut config = GuideConfig::default();
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(home_dir) = env::var("PHONE_GUIDE_HOME") {
            self.paths.home_dir = PathBuf::from(home_dir);
        }
        if let Ok(base_url) = env::var("OLLAMA_BASE_URL") {
            self.service.base_url = base_url;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.service.model.trim().is_empty() {
            return Err(GuideError::ConfigError("Model cannot be empty".into()));
        }
        if self.service.base_url.trim().is_empty() {
            return Err(GuideError::ConfigError("Service base_url cannot be empty".into()));
        }
        if !(0.0..=2.0).contains(&self.service.options.temperature) {
            return Err(GuideError::ConfigError("Temperature must be between 0.0 and 2.0".into()));
        }
        if self.conversation.max_conversations == 0 {
            return Err(GuideError::ConfigError("max_conversations must be at least 1".into()));
        }
        if self.conversation.history_messages == 0 {
            return Err(GuideError::ConfigError("history_messages must be at least 1".into()));
        }
        if self.conversation.storage_key.trim().is_empty() {
            return Err(GuideError::ConfigError("storage_key cannot be empty".into()));
        }
        if self.staleness.relaxed_threshold_secs < self.staleness.normal_threshold_secs {
            return Err(GuideError::ConfigError(
                "relaxed_threshold_secs must not be shorter than normal_threshold_secs".into(),
            ));
        }
        Ok(())
    }

    pub fn default_config_path() -> PathBuf {
        default_home_dir().join("config.yaml")
    }
}

impl ConversationSettings {
    pub fn expiry(&self) -> Duration {
        Duration::hours(self.expiry_hours as i64)
    }
}

impl StalenessSettings {
    pub fn switch_grace(&self) -> Duration {
        Duration::seconds(self.switch_grace_secs as i64)
    }

    pub fn relaxed_threshold(&self) -> Duration {
        Duration::seconds(self.relaxed_threshold_secs as i64)
    }

    pub fn normal_threshold(&self) -> Duration {
        Duration::seconds(self.normal_threshold_secs as i64)
    }
}

impl TriggerSettings {
    pub fn settle_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.settle_ms)
    }
}

impl DuplicateGuardSettings {
    pub fn window(&self) -> Duration {
        Duration::seconds(self.window_secs as i64)
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            health_timeout_secs: default_health_timeout_secs(),
            max_image_bytes: default_max_image_bytes(),
            options: GenerationOptions::default(),
        }
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            repeat_penalty: default_repeat_penalty(),
            extra: HashMap::new(),
        }
    }
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            max_conversations: default_max_conversations(),
            expiry_hours: default_expiry_hours(),
            history_messages: default_history_messages(),
            storage_key: default_storage_key(),
        }
    }
}

impl Default for StalenessSettings {
    fn default() -> Self {
        Self {
            switch_grace_secs: default_switch_grace_secs(),
            relaxed_threshold_secs: default_relaxed_threshold_secs(),
            normal_threshold_secs: default_normal_threshold_secs(),
        }
    }
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            settle_ms: default_settle_ms(),
        }
    }
}

impl Default for DuplicateGuardSettings {
    fn default() -> Self {
        Self {
            window_secs: default_guard_window_secs(),
            recent_messages: default_recent_messages(),
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            target_id: default_target_id(),
            screens_dir: default_screens_dir(),
        }
    }
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            home_dir: default_home_dir(),
        }
    }
}

fn default_base_url() -> String { "http://localhost:11434".to_string() }
fn default_model() -> String { "gemma3:4b-instruct-q4_0".to_string() }
fn default_timeout_secs() -> u64 { 60 }
fn default_health_timeout_secs() -> u64 { 3 }
fn default_max_image_bytes() -> usize { 10 * 1024 * 1024 }
fn default_temperature() -> f32 { 0.3 }
fn default_top_p() -> f32 { 0.9 }
fn default_repeat_penalty() -> f32 { 1.1 }
fn default_max_conversations() -> usize { 20 }
fn default_expiry_hours() -> u64 { 24 }
fn default_history_messages() -> usize { 6 }
fn default_storage_key() -> String { "phone-guide-conversations".to_string() }
fn default_switch_grace_secs() -> u64 { 5 }
fn default_relaxed_threshold_secs() -> u64 { 300 }
fn default_normal_threshold_secs() -> u64 { 120 }
fn default_settle_ms() -> u64 { 300 }
fn default_guard_window_secs() -> u64 { 10 }
fn default_recent_messages() -> usize { 5 }
fn default_target_id() -> String { "phone-screen".to_string() }
fn default_screens_dir() -> PathBuf { PathBuf::from("./screens") }

fn default_home_dir() -> PathBuf {
    env::var("PHONE_GUIDE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|p| p.join(".phone-guide"))
                .unwrap_or_else(|| PathBuf::from("./.phone-guide"))
        })
}
