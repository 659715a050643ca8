use chrono::{DateTime, Utc};
use guide_client::{validate_query, RequestBuilder};
use guide_config::GuideConfig;
use guide_conversation::{ConversationStore, DuplicateGuard};
use guide_core::{
    CaptureAdapter, CaptureResult, GuidanceRequest, GuidanceResponse, GuidanceService, Message,
    NewMessage, Result, GENERAL_CONTEXT,
};
use guide_metrics::SessionMetrics;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

pub mod capture;
pub mod trigger;

pub use capture::FileCaptureAdapter;
pub use trigger::DebouncedTrigger;

pub const CAPTURE_FAILED_MESSAGE: &str =
    "I couldn't capture your screen, but I can still help. What would you like to know?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    CaptureScheduled,
    Capturing,
    Requesting,
    Updated,
}

/// Identifies which context and generation a capture was requested for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureTicket {
    pub context: String,
    pub generation: u64,
}

/// A capture ready to run without borrowing the orchestrator
pub struct CaptureJob {
    ticket: CaptureTicket,
    target_id: String,
    adapter: Arc<dyn CaptureAdapter>,
}

pub struct CaptureCompletion {
    pub ticket: CaptureTicket,
    pub result: Result<Option<CaptureResult>>,
}

impl CaptureJob {
    pub fn ticket(&self) -> &CaptureTicket {
        &self.ticket
    }

    pub async fn run(self) -> CaptureCompletion {
        let result = self
            .adapter
            .capture(&self.target_id, &self.ticket.context)
            .await;
        CaptureCompletion {
            ticket: self.ticket,
            result,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    /// Stored as the displayed capture; carries the greeting if one was added
    Captured { greeting: Option<Message> },
    /// Nothing captured; carries the apology if one was added
    Failed { notice: Option<Message> },
    /// Finished after its context was switched away
    Discarded,
}

/// A model request ready to run without borrowing the orchestrator
pub struct QueryJob {
    context: String,
    generation: u64,
    request: GuidanceRequest,
    service: Arc<dyn GuidanceService>,
}

pub struct QueryCompletion {
    pub context: String,
    pub generation: u64,
    pub response: GuidanceResponse,
    pub elapsed_ms: u64,
}

impl QueryJob {
    pub fn request(&self) -> &GuidanceRequest {
        &self.request
    }

    pub async fn run(self) -> QueryCompletion {
        let started = Instant::now();
        let response = self.service.ask(self.request).await;
        QueryCompletion {
            context: self.context,
            generation: self.generation,
            response,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Human-facing name of a context key
pub fn context_label(context: &str) -> String {
    match context.to_lowercase().as_str() {
        "whatsapp" => "WhatsApp".to_string(),
        "general" => "home".to_string(),
        other => {
            let mut chars = other.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        }
    }
}

pub fn greeting_for(context: &str) -> String {
    format!(
        "Hello! I can see your {} screen. How can I help you today?",
        context_label(context)
    )
}

/// Drives one interactive session: context switches, screen captures,
/// questions and answers.
///
/// Every capture and model request is tagged with the generation that was
/// current when it started. A context switch bumps the generation, so
/// results that finish afterwards are recognised as stale.
pub struct Orchestrator {
    store: ConversationStore,
    adapter: Arc<dyn CaptureAdapter>,
    service: Arc<dyn GuidanceService>,
    builder: RequestBuilder,
    guard: DuplicateGuard,
    trigger: DebouncedTrigger<CaptureTicket>,
    metrics: SessionMetrics,
    target_id: String,
    context: String,
    generation: u64,
    switched_at: Option<DateTime<Utc>>,
    last_capture: Option<CaptureResult>,
    /// Generation in which the capture apology was last shown
    apologized_in: Option<u64>,
    state: SessionState,
}

impl Orchestrator {
    pub fn new(
        store: ConversationStore,
        adapter: Arc<dyn CaptureAdapter>,
        service: Arc<dyn GuidanceService>,
        config: &GuideConfig,
    ) -> Self {
        Self {
            store,
            adapter,
            service,
            builder: RequestBuilder::from_config(config),
            guard: DuplicateGuard::from(&config.duplicate_guard),
            trigger: DebouncedTrigger::new(config.trigger.settle_delay()),
            metrics: SessionMetrics::new(),
            target_id: config.capture.target_id.clone(),
            context: GENERAL_CONTEXT.to_string(),
            generation: 0,
            switched_at: None,
            last_capture: None,
            apologized_in: None,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Messages of the current context, in insertion order
    pub fn transcript(&self) -> &[Message] {
        self.store.messages(&self.context)
    }

    pub fn last_capture(&self) -> Option<&CaptureResult> {
        self.last_capture.as_ref()
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ConversationStore {
        &mut self.store
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    pub fn capture_pending(&self) -> bool {
        self.trigger.is_pending()
    }

    fn ticket(&self) -> CaptureTicket {
        CaptureTicket {
            context: self.context.clone(),
            generation: self.generation,
        }
    }

    fn is_current(&self, context: &str, generation: u64) -> bool {
        generation == self.generation && context == self.context
    }

    /// Whether the current context needs a new capture before answering
    pub fn needs_fresh_capture(&self) -> bool {
        self.store.needs_fresh_capture(&self.context, self.switched_at)
    }

    /// Switch the active context. The new context's transcript is visible
    /// immediately; its capture is scheduled after the settle delay.
    /// Returns false when `context` is already active.
    #[instrument(skip(self))]
    pub fn switch_context(&mut self, context: &str) -> bool {
        if context == self.context {
            return false;
        }

        info!("Context switch {} -> {}", self.context, context);
        self.generation += 1;
        self.context = context.to_string();
        self.last_capture = None;
        self.switched_at = Some(self.store.now());
        self.store.update_context_switch_time(context);

        self.trigger.schedule(self.ticket());
        self.state = SessionState::CaptureScheduled;
        true
    }

    /// Schedule a capture when the current one is stale. Returns whether one
    /// was scheduled.
    pub fn refresh_if_stale(&mut self) -> bool {
        if self.trigger.is_pending() || !self.needs_fresh_capture() {
            return false;
        }
        debug!("Capture for {} is stale, scheduling", self.context);
        self.trigger.schedule(self.ticket());
        self.state = SessionState::CaptureScheduled;
        true
    }

    /// Wait for the debounced capture signal. Cancel-safe.
    pub async fn next_capture(&mut self) -> CaptureTicket {
        self.trigger.fired().await
    }

    /// Prepare the capture for `ticket`, or nothing if it is already stale
    pub fn begin_capture(&mut self, ticket: CaptureTicket) -> Option<CaptureJob> {
        if !self.is_current(&ticket.context, ticket.generation) {
            debug!("Skipping capture for stale ticket {:?}", ticket);
            self.metrics.record_discarded_capture();
            return None;
        }

        self.state = SessionState::Capturing;
        Some(CaptureJob {
            ticket,
            target_id: self.target_id.clone(),
            adapter: Arc::clone(&self.adapter),
        })
    }

    pub fn complete_capture(&mut self, completion: CaptureCompletion) -> CaptureOutcome {
        let CaptureCompletion { ticket, result } = completion;

        if !self.is_current(&ticket.context, ticket.generation) {
            debug!("Discarding capture for {} (generation {})", ticket.context, ticket.generation);
            self.metrics.record_discarded_capture();
            return CaptureOutcome::Discarded;
        }

        match result {
            Ok(Some(capture)) => {
                self.metrics.record_capture(true);
                self.last_capture = Some(capture);
                self.store.update_screenshot_timestamp(&ticket.context);
                self.state = SessionState::Updated;

                let greeting = self.greet_once(&ticket.context);
                CaptureOutcome::Captured { greeting }
            }
            failure => {
                self.metrics.record_capture(false);
                match failure {
                    Err(e) => warn!("Screen capture failed for {}: {}", ticket.context, e),
                    _ => warn!("Screen capture unavailable for {}", ticket.context),
                }

                // An already displayed capture is preserved and explains itself;
                // otherwise apologise at most once per visit to the context
                let notice = if self.last_capture.is_none()
                    && self.apologized_in != Some(ticket.generation)
                {
                    self.apologized_in = Some(ticket.generation);
                    let now = self.store.now();
                    self.store.add_message_unless_duplicate(
                        &ticket.context,
                        NewMessage::assistant(CAPTURE_FAILED_MESSAGE, now),
                        &self.guard,
                    )
                } else {
                    None
                };

                self.state = if self.last_capture.is_some() {
                    SessionState::Updated
                } else {
                    SessionState::Idle
                };
                CaptureOutcome::Failed { notice }
            }
        }
    }

    fn greet_once(&mut self, context: &str) -> Option<Message> {
        let greeted = self.store.get(context).map(|c| c.has_greeted).unwrap_or(false);
        if greeted {
            return None;
        }

        let now = self.store.now();
        let greeting = self.store.add_message_unless_duplicate(
            context,
            NewMessage::assistant(greeting_for(context), now),
            &self.guard,
        );
        self.store.mark_as_greeted(context);
        greeting
    }

    /// Run a capture for `ticket` to completion
    pub async fn capture(&mut self, ticket: CaptureTicket) -> CaptureOutcome {
        match self.begin_capture(ticket) {
            Some(job) => {
                let completion = job.run().await;
                self.complete_capture(completion)
            }
            None => CaptureOutcome::Discarded,
        }
    }

    /// Capture now if the current screen is stale. A capture already
    /// scheduled still waits out the rest of its settle delay.
    pub async fn ensure_fresh_capture(&mut self) -> Option<CaptureOutcome> {
        if !self.needs_fresh_capture() {
            return None;
        }
        let ticket = if self.trigger.is_pending() {
            self.trigger.fired().await
        } else {
            self.ticket()
        };
        Some(self.capture(ticket).await)
    }

    /// Record the user's question and prepare the model request. Blank or
    /// over-long questions are rejected before anything is stored.
    #[instrument(skip(self, query), fields(context = %self.context))]
    pub fn begin_query(&mut self, query: &str) -> Result<QueryJob> {
        let query = validate_query(query)?;
        let history_len = self.transcript().len();
        let now = self.store.now();
        self.store
            .add_message(&self.context, NewMessage::user(query, now));

        let messages = self.store.messages(&self.context);
        let prior = &messages[..history_len.min(messages.len())];
        let request = self
            .builder
            .build(query, &self.context, self.last_capture.as_ref(), prior);

        self.state = SessionState::Requesting;
        Ok(QueryJob {
            context: self.context.clone(),
            generation: self.generation,
            request,
            service: Arc::clone(&self.service),
        })
    }

    /// Store the answer in the conversation it was asked in. Returns the
    /// message only when that conversation is still the visible one.
    pub fn complete_query(&mut self, completion: QueryCompletion) -> Option<Message> {
        let QueryCompletion {
            context,
            generation,
            response,
            elapsed_ms,
        } = completion;

        self.metrics
            .record_request(&context, elapsed_ms, response.fallback);

        let now = self.store.now();
        let message = self
            .store
            .add_message(&context, NewMessage::assistant(response.guidance, now));

        if self.is_current(&context, generation) {
            self.state = SessionState::Updated;
            Some(message)
        } else {
            info!("Late answer for {} kept out of the {} transcript", context, self.context);
            self.metrics.record_late_response();
            None
        }
    }

    /// Capture if stale, ask the model and store the answer
    pub async fn ask(&mut self, query: &str) -> Result<Option<Message>> {
        let query = validate_query(query)?;
        self.ensure_fresh_capture().await;
        let job = self.begin_query(query)?;
        let completion = job.run().await;
        Ok(self.complete_query(completion))
    }

    /// Cancel any scheduled capture; call before discarding the session
    pub fn shutdown(&mut self) {
        if self.trigger.cancel().is_some() {
            debug!("Cancelled pending capture on shutdown");
        }
        self.state = SessionState::Idle;
    }
}
