use async_trait::async_trait;
use chrono::Utc;
use guide_config::{GenerationOptions, GuideConfig};
use guide_core::{GuidanceRequest, GuidanceResponse, GuidanceService, Result};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub mod fallback;
pub mod ollama;
pub mod request;
pub mod text;

pub use fallback::fallback_guidance;
pub use ollama::{GenerateRequest, InferenceBackend, OllamaBackend, ServiceHealth};
pub use request::{build_prompt, validate_query, RequestBuilder, MAX_QUERY_CHARS};
pub use text::{extract_steps, sanitize_for_speech};

/// Confidence reported for a model-generated answer
pub const MODEL_CONFIDENCE: f64 = 0.9;
/// Confidence reported for a canned fallback answer
pub const FALLBACK_CONFIDENCE: f64 = 0.5;
pub const FALLBACK_MODEL: &str = "fallback";

pub struct ModelClient {
    backend: Arc<dyn InferenceBackend>,
    model: String,
    options: GenerationOptions,
}

impl ModelClient {
    pub fn new(backend: Arc<dyn InferenceBackend>, model: impl Into<String>, options: GenerationOptions) -> Self {
        Self {
            backend,
            model: model.into(),
            options,
        }
    }

    pub fn from_config(config: &GuideConfig) -> Result<Self> {
        let backend = OllamaBackend::new(&config.service)?;
        info!("Model client using {} at {}", config.service.model, config.service.base_url);
        Ok(Self::new(
            Arc::new(backend),
            config.service.model.clone(),
            config.service.options.clone(),
        ))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn health(&self) -> ServiceHealth {
        self.backend.health().await
    }

    fn fallback(&self, request: &GuidanceRequest) -> GuidanceResponse {
        let guidance = sanitize_for_speech(&fallback_guidance(&request.context, &request.query));
        GuidanceResponse {
            steps: extract_steps(&guidance),
            guidance,
            confidence: FALLBACK_CONFIDENCE,
            model_used: FALLBACK_MODEL.to_string(),
            context: request.context.clone(),
            fallback: true,
            timestamp: Utc::now(),
        }
    }

    async fn generate(&self, request: &GuidanceRequest) -> Result<String> {
        let payload = GenerateRequest {
            model: self.model.clone(),
            prompt: build_prompt(request),
            images: request.image.clone().map(|image| vec![image]),
            options: self.options.clone(),
            stream: false,
        };
        self.backend.generate(payload).await
    }
}

#[async_trait]
impl GuidanceService for ModelClient {
    #[instrument(skip(self, request), fields(context = %request.context))]
    async fn ask(&self, request: GuidanceRequest) -> GuidanceResponse {
        let health = self.backend.health().await;
        if !health.healthy {
            warn!(
                "Model service unreachable ({}), using fallback",
                health.error.as_deref().unwrap_or("unknown")
            );
            return self.fallback(&request);
        }

        let raw = match self.generate(&request).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Model request failed, using fallback: {}", e);
                return self.fallback(&request);
            }
        };

        let guidance = sanitize_for_speech(&raw);
        if guidance.is_empty() {
            warn!("Model returned no usable guidance, using fallback");
            return self.fallback(&request);
        }

        debug!("Model answered with {} chars", guidance.len());
        GuidanceResponse {
            steps: extract_steps(&guidance),
            guidance,
            confidence: MODEL_CONFIDENCE,
            model_used: self.model.clone(),
            context: request.context,
            fallback: false,
            timestamp: Utc::now(),
        }
    }
}
