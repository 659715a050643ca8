use base64::{engine::general_purpose, Engine as _};
use guide_config::GuideConfig;
use guide_core::{CaptureResult, GuideError, GuidanceRequest, HistoryTurn, Message, Result};
use tracing::{debug, warn};

const INSTRUCTIONS: &str = "You are a patient, helpful AI assistant specifically designed to help elderly users learn smartphone technology.

Your characteristics:
- Use simple, clear language
- Break down tasks into small, manageable steps
- Be encouraging and patient
- Avoid technical jargon
- Repeat important information
- Assume the user may need extra reassurance
- Answer in plain sentences without formatting symbols, because your answer will be read aloud";

/// Longest question accepted, in characters
pub const MAX_QUERY_CHARS: usize = 1000;

/// Trim `query` and check it is between 1 and [`MAX_QUERY_CHARS`] characters
pub fn validate_query(query: &str) -> Result<&str> {
    let query = query.trim();
    if query.is_empty() {
        return Err(GuideError::InvalidQuery("question is empty".into()));
    }
    let chars = query.chars().count();
    if chars > MAX_QUERY_CHARS {
        return Err(GuideError::InvalidQuery(format!(
            "question is {} characters, the limit is {}",
            chars, MAX_QUERY_CHARS
        )));
    }
    Ok(query)
}

/// Assembles a model request from the current query, context, capture and
/// recent conversation.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    history_limit: usize,
    max_image_bytes: usize,
}

impl RequestBuilder {
    pub fn new(history_limit: usize, max_image_bytes: usize) -> Self {
        Self {
            history_limit,
            max_image_bytes,
        }
    }

    pub fn from_config(config: &GuideConfig) -> Self {
        Self::new(
            config.conversation.history_messages,
            config.service.max_image_bytes,
        )
    }

    /// `history` is the conversation before `query`; only the last
    /// `history_limit` entries are kept.
    pub fn build(
        &self,
        query: &str,
        context: &str,
        capture: Option<&CaptureResult>,
        history: &[Message],
    ) -> GuidanceRequest {
        let start = history.len().saturating_sub(self.history_limit);
        let history = history[start..]
            .iter()
            .map(|m| HistoryTurn {
                is_user: m.is_user,
                text: m.text.clone(),
            })
            .collect::<Vec<_>>();

        let image = capture.and_then(|capture| self.encode_image(capture));

        debug!(
            "Built request for {}: {} history turns, image={}",
            context,
            history.len(),
            image.is_some()
        );

        GuidanceRequest {
            query: query.trim().to_string(),
            context: context.to_string(),
            image,
            history,
        }
    }

    fn encode_image(&self, capture: &CaptureResult) -> Option<String> {
        let encoded = general_purpose::STANDARD.encode(&capture.image_bytes);
        if encoded.len() > self.max_image_bytes {
            warn!(
                "Dropping screenshot from {}: {} bytes exceeds limit of {}",
                capture.metadata.source_id,
                encoded.len(),
                self.max_image_bytes
            );
            return None;
        }
        Some(encoded)
    }
}

/// Render the structured prompt sent to the model
pub fn build_prompt(request: &GuidanceRequest) -> String {
    let mut prompt = String::from(INSTRUCTIONS);

    prompt.push_str(&format!("\n\nCurrent app context: {}\n", request.context));
    if request.image.is_some() {
        prompt.push_str("The user has provided a screenshot of their phone screen for you to analyze.\n");
    }

    if !request.history.is_empty() {
        prompt.push_str("\nRecent conversation:\n");
        for turn in &request.history {
            let speaker = if turn.is_user { "User" } else { "Assistant" };
            prompt.push_str(&format!("{}: {}\n", speaker, turn.text));
        }
    }

    prompt.push_str(&format!("\nUser's question: \"{}\"\n\n", request.query));
    prompt.push_str("Please provide step-by-step guidance that is easy to follow.");
    if request.image.is_some() {
        prompt.push_str(" Describe what you see and give specific guidance based on the current screen.");
    }
    prompt
}
