use chrono::{DateTime, Duration, Utc};
use guide_config::GuideConfig;
use guide_core::{Clock, Conversation, GuideError, Message, NewMessage};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::guard::DuplicateGuard;
use crate::staleness::{Freshness, StalenessPolicy};
use crate::storage::StorageBackend;

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub storage_key: String,
    pub max_conversations: usize,
    pub expiry: Duration,
    pub staleness: StalenessPolicy,
}

impl From<&GuideConfig> for StoreSettings {
    fn from(config: &GuideConfig) -> Self {
        Self {
            storage_key: config.conversation.storage_key.clone(),
            max_conversations: config.conversation.max_conversations,
            expiry: config.conversation.expiry(),
            staleness: StalenessPolicy::from(&config.staleness),
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self::from(&GuideConfig::default())
    }
}

/// Durable per-context message log.
///
/// The in-memory map is authoritative; every mutation is followed by a
/// maintenance pass and a best-effort save to the backend.
pub struct ConversationStore {
    conversations: BTreeMap<String, Conversation>,
    backend: Arc<dyn StorageBackend>,
    settings: StoreSettings,
    clock: Arc<dyn Clock>,
}

impl ConversationStore {
    /// Load persisted conversations and run an initial maintenance pass
    pub fn open(
        backend: Arc<dyn StorageBackend>,
        settings: StoreSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let conversations = Self::load(backend.as_ref(), &settings.storage_key);
        let mut store = Self {
            conversations,
            backend,
            settings,
            clock,
        };

        let loaded = store.conversations.len();
        if store.run_maintenance() > 0 {
            store.persist();
        }
        info!(
            "Conversation store opened: {} loaded, {} kept",
            loaded,
            store.conversations.len()
        );
        store
    }

    fn load(backend: &dyn StorageBackend, key: &str) -> BTreeMap<String, Conversation> {
        let blob = match backend.load(key) {
            Ok(Some(blob)) => blob,
            Ok(None) => return BTreeMap::new(),
            Err(e) => {
                warn!("Failed to load conversations: {}", e);
                return BTreeMap::new();
            }
        };

        match serde_json::from_str::<BTreeMap<String, Conversation>>(&blob) {
            Ok(conversations) => conversations,
            Err(e) => {
                warn!("Discarding unreadable conversation blob: {}", e);
                BTreeMap::new()
            }
        }
    }

    fn persist(&self) {
        let result = serde_json::to_string(&self.conversations)
            .map_err(GuideError::from)
            .and_then(|json| self.backend.save(&self.settings.storage_key, &json));

        // In-memory state stays authoritative; the next mutation retries
        if let Err(e) = result {
            warn!("Failed to persist conversations: {}", e);
        }
    }

    /// Drop expired conversations, then evict the least recently updated
    /// ones beyond capacity. Returns how many were removed.
    fn run_maintenance(&mut self) -> usize {
        let now = self.clock.now();
        let before = self.conversations.len();

        let expiry = self.settings.expiry;
        self.conversations
            .retain(|_, conv| now - conv.last_updated <= expiry);

        let max = self.settings.max_conversations;
        if self.conversations.len() > max {
            let mut by_age: Vec<(String, DateTime<Utc>)> = self
                .conversations
                .iter()
                .map(|(key, conv)| (key.clone(), conv.last_updated))
                .collect();
            by_age.sort_by(|a, b| b.1.cmp(&a.1));

            for (key, _) in by_age.into_iter().skip(max) {
                self.conversations.remove(&key);
            }
        }

        let removed = before - self.conversations.len();
        if removed > 0 {
            debug!("Maintenance removed {} conversations", removed);
        }
        removed
    }

    fn commit(&mut self) {
        self.run_maintenance();
        self.persist();
    }

    fn entry(&mut self, context: &str, now: DateTime<Utc>) -> &mut Conversation {
        self.conversations
            .entry(context.to_string())
            .or_insert_with(|| Conversation::new(context, now))
    }

    pub fn get(&self, context: &str) -> Option<&Conversation> {
        self.conversations.get(context)
    }

    /// Messages of `context`, empty when it has no conversation yet
    pub fn messages(&self, context: &str) -> &[Message] {
        self.conversations
            .get(context)
            .map(|c| c.messages.as_slice())
            .unwrap_or(&[])
    }

    pub fn contexts(&self) -> Vec<&str> {
        self.conversations.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn add_message(&mut self, context: &str, message: NewMessage) -> Message {
        let now = self.clock.now();
        let stored = message.into_message();

        let conversation = self.entry(context, now);
        conversation.messages.push(stored.clone());
        conversation.touch(now);

        debug!("Added {} message to {}", if stored.is_user { "user" } else { "assistant" }, context);
        self.commit();
        stored
    }

    /// Append `message` unless the guard flags it as a repeat
    pub fn add_message_unless_duplicate(
        &mut self,
        context: &str,
        message: NewMessage,
        guard: &DuplicateGuard,
    ) -> Option<Message> {
        if guard.is_duplicate(self.messages(context), &message) {
            debug!("Suppressed duplicate message in {}", context);
            return None;
        }
        Some(self.add_message(context, message))
    }

    pub fn update_screenshot_timestamp(&mut self, context: &str) {
        let now = self.clock.now();
        let conversation = self.entry(context, now);
        conversation.last_screenshot_timestamp = Some(now);
        conversation.touch(now);
        self.commit();
    }

    pub fn update_context_switch_time(&mut self, context: &str) {
        let now = self.clock.now();
        let conversation = self.entry(context, now);
        conversation.last_context_switch_time = Some(now);
        conversation.touch(now);
        self.commit();
    }

    pub fn mark_as_greeted(&mut self, context: &str) {
        let now = self.clock.now();
        let conversation = self.entry(context, now);
        conversation.has_greeted = true;
        conversation.touch(now);
        self.commit();
    }

    pub fn clear(&mut self, context: &str) {
        if self.conversations.remove(context).is_some() {
            info!("Cleared conversation {}", context);
        }
        self.persist();
    }

    pub fn clear_all(&mut self) {
        self.conversations.clear();
        info!("Cleared all conversations");
        self.persist();
    }

    pub fn freshness(&self, context: &str, context_changed_at: Option<DateTime<Utc>>) -> Freshness {
        self.settings
            .staleness
            .evaluate(self.get(context), context_changed_at, self.clock.now())
    }

    pub fn needs_fresh_capture(
        &self,
        context: &str,
        context_changed_at: Option<DateTime<Utc>>,
    ) -> bool {
        self.freshness(context, context_changed_at).needs_capture()
    }
}
