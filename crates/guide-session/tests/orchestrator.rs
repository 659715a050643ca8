use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use guide_config::GuideConfig;
use guide_conversation::{ConversationStore, MemoryStorage, StoreSettings};
use guide_core::{
    CaptureAdapter, CaptureMetadata, CaptureResult, GuidanceRequest, GuidanceResponse,
    GuidanceService, GuideError, ManualClock, Result,
};
use guide_client::MAX_QUERY_CHARS;
use guide_session::{
    greeting_for, CaptureOutcome, Orchestrator, SessionState, CAPTURE_FAILED_MESSAGE,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

struct ScriptedCapture {
    script: Mutex<VecDeque<Result<Option<CaptureResult>>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedCapture {
    fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn then(&self, result: Result<Option<CaptureResult>>) {
        self.script.lock().unwrap().push_back(result);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

fn screenshot(source_id: &str) -> CaptureResult {
    CaptureResult {
        image_bytes: b"png".to_vec(),
        metadata: CaptureMetadata {
            source_id: source_id.to_string(),
            timestamp: Utc::now(),
            width: 360,
            height: 780,
        },
    }
}

#[async_trait]
impl CaptureAdapter for ScriptedCapture {
    async fn capture(&self, target_id: &str, context_label: &str) -> Result<Option<CaptureResult>> {
        self.calls.lock().unwrap().push(context_label.to_string());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Some(screenshot(target_id))))
    }
}

#[derive(Default)]
struct RecordingService {
    requests: Mutex<Vec<GuidanceRequest>>,
}

impl RecordingService {
    fn requests(&self) -> Vec<GuidanceRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GuidanceService for RecordingService {
    async fn ask(&self, request: GuidanceRequest) -> GuidanceResponse {
        self.requests.lock().unwrap().push(request.clone());
        GuidanceResponse {
            guidance: format!("Answer to {}", request.query),
            steps: None,
            confidence: 0.9,
            model_used: "test-model".to_string(),
            context: request.context,
            fallback: false,
            timestamp: Utc::now(),
        }
    }
}

struct Harness {
    orchestrator: Orchestrator,
    capture: Arc<ScriptedCapture>,
    service: Arc<RecordingService>,
    clock: Arc<ManualClock>,
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap(),
    ));
    let capture = Arc::new(ScriptedCapture::new());
    let service = Arc::new(RecordingService::default());

    let store = ConversationStore::open(
        Arc::new(MemoryStorage::new()),
        StoreSettings::default(),
        clock.clone(),
    );
    let orchestrator = Orchestrator::new(
        store,
        capture.clone(),
        service.clone(),
        &GuideConfig::default(),
    );

    Harness {
        orchestrator,
        capture,
        service,
        clock,
    }
}

#[tokio::test(start_paused = true)]
async fn test_switch_shows_transcript_before_capture() {
    let mut h = harness();
    let orch = &mut h.orchestrator;

    orch.switch_context("whatsapp");
    let ticket = orch.next_capture().await;
    orch.capture(ticket).await;
    orch.ask("How do I send a photo?").await.unwrap();
    let whatsapp_len = orch.transcript().len();
    assert_eq!(whatsapp_len, 3);

    assert!(orch.switch_context("settings"));
    assert!(orch.transcript().is_empty());
    assert!(orch.last_capture().is_none());

    assert!(orch.switch_context("whatsapp"));
    assert_eq!(orch.state(), SessionState::CaptureScheduled);
    assert_eq!(orch.transcript().len(), whatsapp_len);
    assert!(orch.capture_pending());
    assert_eq!(h.capture.calls(), vec!["whatsapp"]);
}

#[tokio::test(start_paused = true)]
async fn test_switch_to_active_context_is_noop() {
    let mut h = harness();
    assert!(!h.orchestrator.switch_context("general"));
    assert_eq!(h.orchestrator.generation(), 0);
    assert!(!h.orchestrator.capture_pending());
}

#[tokio::test(start_paused = true)]
async fn test_burst_of_switches_captures_once() {
    let mut h = harness();
    let orch = &mut h.orchestrator;

    for context in ["phone", "settings", "whatsapp"] {
        orch.switch_context(context);
        tokio::time::advance(std::time::Duration::from_millis(100)).await;
    }

    let ticket = orch.next_capture().await;
    assert_eq!(ticket.context, "whatsapp");
    assert_eq!(ticket.generation, 3);

    let outcome = orch.capture(ticket).await;
    assert!(matches!(outcome, CaptureOutcome::Captured { .. }));
    assert_eq!(h.capture.calls(), vec!["whatsapp"]);

    let again = tokio::time::timeout(std::time::Duration::from_secs(5), orch.next_capture()).await;
    assert!(again.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_first_capture_greets_once() {
    let mut h = harness();
    let orch = &mut h.orchestrator;

    orch.switch_context("whatsapp");
    let ticket = orch.next_capture().await;
    let CaptureOutcome::Captured { greeting } = orch.capture(ticket).await else {
        panic!("expected a capture");
    };
    let greeting = greeting.expect("first capture greets");
    assert_eq!(greeting.text, greeting_for("whatsapp"));
    assert!(!greeting.is_user);
    assert!(orch.store().get("whatsapp").unwrap().has_greeted);
    assert_eq!(orch.state(), SessionState::Updated);

    h.clock.advance(Duration::minutes(1));
    orch.switch_context("general");
    orch.switch_context("whatsapp");
    let ticket = orch.next_capture().await;
    assert_eq!(
        orch.capture(ticket).await,
        CaptureOutcome::Captured { greeting: None }
    );
    assert_eq!(orch.transcript().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_capture_failure_without_screen_apologises_once() {
    let mut h = harness();
    h.capture.then(Err(GuideError::CaptureUnavailable("no display".into())));
    h.capture.then(Ok(None));
    let orch = &mut h.orchestrator;

    orch.switch_context("phone");
    let ticket = orch.next_capture().await;
    let CaptureOutcome::Failed { notice } = orch.capture(ticket).await else {
        panic!("expected a failure");
    };
    assert_eq!(notice.unwrap().text, CAPTURE_FAILED_MESSAGE);
    assert_eq!(orch.state(), SessionState::Idle);

    // Retrying moments later does not repeat the apology
    h.clock.advance(Duration::seconds(2));
    let ticket = guide_session::CaptureTicket {
        context: "phone".to_string(),
        generation: orch.generation(),
    };
    assert_eq!(
        orch.capture(ticket).await,
        CaptureOutcome::Failed { notice: None }
    );
    assert_eq!(orch.transcript().len(), 1);
    assert_eq!(orch.metrics().capture_failures, 2);
}

#[tokio::test(start_paused = true)]
async fn test_capture_failure_keeps_displayed_screen() {
    let mut h = harness();
    let orch = &mut h.orchestrator;

    orch.switch_context("settings");
    let ticket = orch.next_capture().await;
    orch.capture(ticket).await;
    let transcript_len = orch.transcript().len();

    h.clock.advance(Duration::minutes(3));
    h.capture.then(Err(GuideError::CaptureUnavailable("busy".into())));
    assert!(orch.refresh_if_stale());

    let ticket = orch.next_capture().await;
    assert_eq!(
        orch.capture(ticket).await,
        CaptureOutcome::Failed { notice: None }
    );
    assert!(orch.last_capture().is_some());
    assert_eq!(orch.transcript().len(), transcript_len);
    assert_eq!(orch.state(), SessionState::Updated);
}

#[tokio::test(start_paused = true)]
async fn test_fresh_screen_is_not_refreshed() {
    let mut h = harness();
    let orch = &mut h.orchestrator;

    orch.switch_context("settings");
    let ticket = orch.next_capture().await;
    orch.capture(ticket).await;

    h.clock.advance(Duration::seconds(30));
    assert!(!orch.needs_fresh_capture());
    assert!(!orch.refresh_if_stale());
}

#[tokio::test(start_paused = true)]
async fn test_capture_finishing_after_switch_is_discarded() {
    let mut h = harness();
    let orch = &mut h.orchestrator;

    orch.switch_context("whatsapp");
    let ticket = orch.next_capture().await;
    let job = orch.begin_capture(ticket).expect("current ticket");
    assert_eq!(orch.state(), SessionState::Capturing);

    orch.switch_context("settings");
    let completion = job.run().await;
    assert_eq!(orch.complete_capture(completion), CaptureOutcome::Discarded);

    assert!(orch.last_capture().is_none());
    assert!(orch.store().get("whatsapp").unwrap().last_screenshot_timestamp.is_none());
    assert!(orch.store().messages("whatsapp").is_empty());
    assert_eq!(orch.metrics().discarded_captures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_ticket_is_never_captured() {
    let mut h = harness();
    let orch = &mut h.orchestrator;

    orch.switch_context("whatsapp");
    let ticket = orch.next_capture().await;
    orch.switch_context("phone");

    assert!(orch.begin_capture(ticket).is_none());
    assert!(h.capture.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_late_answer_lands_in_its_own_conversation() {
    let mut h = harness();
    let orch = &mut h.orchestrator;

    orch.switch_context("whatsapp");
    let ticket = orch.next_capture().await;
    orch.capture(ticket).await;

    let job = orch.begin_query("How do I call my son?").unwrap();
    assert_eq!(orch.state(), SessionState::Requesting);
    orch.switch_context("settings");

    let completion = job.run().await;
    assert!(orch.complete_query(completion).is_none());

    assert!(orch.transcript().is_empty());
    let whatsapp = orch.store().messages("whatsapp");
    let last = whatsapp.last().unwrap();
    assert_eq!(last.text, "Answer to How do I call my son?");
    assert!(!last.is_user);
    assert_eq!(orch.metrics().late_responses, 1);
    assert_eq!(orch.metrics().requests, 1);
}

#[tokio::test(start_paused = true)]
async fn test_ask_on_new_context_captures_first() {
    let mut h = harness();
    let orch = &mut h.orchestrator;

    orch.switch_context("settings");
    let answer = orch
        .ask("  How do I turn on wifi? ")
        .await
        .unwrap()
        .expect("answer for the visible context");

    assert_eq!(answer.text, "Answer to How do I turn on wifi?");
    assert!(!orch.capture_pending());
    assert_eq!(h.capture.calls(), vec!["settings"]);

    let requests = h.service.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].context, "settings");
    assert_eq!(requests[0].image.as_deref(), Some("cG5n"));
    // History is what preceded the question: the greeting only
    assert_eq!(requests[0].history.len(), 1);
    assert!(!requests[0].history[0].is_user);

    let texts: Vec<&str> = orch.transcript().iter().map(|m| m.text.as_str()).collect();
    assert_eq!(
        texts,
        vec![
            greeting_for("settings").as_str(),
            "How do I turn on wifi?",
            "Answer to How do I turn on wifi?",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_ask_without_screen_still_answers() {
    let mut h = harness();
    h.capture.then(Ok(None));
    let orch = &mut h.orchestrator;

    let answer = orch.ask("What can you do?").await.unwrap();
    assert!(answer.is_some());

    let requests = h.service.requests();
    assert!(requests[0].image.is_none());
    assert_eq!(requests[0].context, "general");
    assert_eq!(orch.transcript()[0].text, CAPTURE_FAILED_MESSAGE);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pending_capture() {
    let mut h = harness();
    h.orchestrator.switch_context("phone");
    h.orchestrator.shutdown();

    assert!(!h.orchestrator.capture_pending());
    assert_eq!(h.orchestrator.state(), SessionState::Idle);
    assert!(h.capture.calls().is_empty());
}

fn apologies(orch: &Orchestrator) -> usize {
    orch.transcript()
        .iter()
        .filter(|m| m.text == CAPTURE_FAILED_MESSAGE)
        .count()
}

#[tokio::test(start_paused = true)]
async fn test_periodic_refresh_apologises_once_per_visit() {
    let mut h = harness();
    for _ in 0..4 {
        h.capture.then(Ok(None));
    }
    let orch = &mut h.orchestrator;

    orch.switch_context("phone");
    let ticket = orch.next_capture().await;
    orch.capture(ticket).await;

    // Retries land well outside the duplicate window
    for _ in 0..2 {
        h.clock.advance(Duration::seconds(30));
        assert!(orch.refresh_if_stale());
        let ticket = orch.next_capture().await;
        assert_eq!(
            orch.capture(ticket).await,
            CaptureOutcome::Failed { notice: None }
        );
    }
    assert_eq!(apologies(orch), 1);
    assert_eq!(orch.metrics().capture_failures, 3);

    // A new visit to the context may apologise again
    h.clock.advance(Duration::seconds(30));
    orch.switch_context("general");
    orch.switch_context("phone");
    let ticket = orch.next_capture().await;
    assert!(matches!(
        orch.capture(ticket).await,
        CaptureOutcome::Failed { notice: Some(_) }
    ));
    assert_eq!(apologies(orch), 2);
}

#[tokio::test(start_paused = true)]
async fn test_blank_or_overlong_question_is_rejected() {
    let mut h = harness();
    let orch = &mut h.orchestrator;

    assert!(matches!(
        orch.ask("   ").await,
        Err(GuideError::InvalidQuery(_))
    ));
    let too_long = "a".repeat(MAX_QUERY_CHARS + 1);
    assert!(orch.begin_query(&too_long).is_err());

    assert!(orch.transcript().is_empty());
    assert!(h.service.requests().is_empty());
    assert!(h.capture.calls().is_empty());
    assert_eq!(orch.metrics().requests, 0);
}

#[tokio::test(start_paused = true)]
async fn test_question_right_after_switch_waits_for_settle_delay() {
    let mut h = harness();
    let orch = &mut h.orchestrator;
    let settle = GuideConfig::default().trigger.settle_delay();

    orch.switch_context("settings");
    let switched = tokio::time::Instant::now();
    tokio::time::advance(std::time::Duration::from_millis(100)).await;

    orch.ask("Where is wifi?").await.unwrap();

    assert!(tokio::time::Instant::now() - switched >= settle);
    assert_eq!(h.capture.calls(), vec!["settings"]);
    assert!(!orch.capture_pending());
}
