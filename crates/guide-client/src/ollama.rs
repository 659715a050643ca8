use async_trait::async_trait;
use guide_config::{GenerationOptions, ServiceSettings};
use guide_core::{GuideError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Non-streaming generation payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    pub options: GenerationOptions,
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub healthy: bool,
    pub models: Vec<String>,
    /// Whether any installed model is a Gemma 3 vision model
    pub vision_model_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceHealth {
    pub fn from_models(models: Vec<String>) -> Self {
        let vision_model_available = models.iter().any(|m| m.contains("gemma3"));
        Self {
            healthy: true,
            models,
            vision_model_available,
            error: None,
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            models: Vec::new(),
            vision_model_available: false,
            error: Some(error.into()),
        }
    }
}

/// The inference service the model client talks to
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn health(&self) -> ServiceHealth;
    async fn generate(&self, request: GenerateRequest) -> Result<String>;
}

pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
    health_timeout: Duration,
}

impl OllamaBackend {
    pub fn new(settings: &ServiceSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| GuideError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            health_timeout: Duration::from_secs(settings.health_timeout_secs),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn transport_error(e: reqwest::Error) -> GuideError {
    if e.is_connect() || e.is_timeout() {
        GuideError::ServiceUnreachable(e.to_string())
    } else {
        GuideError::ServiceError(e.to_string())
    }
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    async fn health(&self) -> ServiceHealth {
        let response = self
            .client
            .get(self.url("/api/tags"))
            .timeout(self.health_timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status());

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                warn!("Model service health check failed: {}", e);
                return ServiceHealth::unhealthy(e.to_string());
            }
        };

        match response.json::<TagsResponse>().await {
            Ok(tags) => {
                let health = ServiceHealth::from_models(tags.models.into_iter().map(|m| m.name).collect());
                debug!("Model service healthy with {} models", health.models.len());
                health
            }
            Err(e) => {
                warn!("Unreadable model list: {}", e);
                ServiceHealth::unhealthy(e.to_string())
            }
        }
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        debug!(
            "Generating with {} (image attached: {})",
            request.model,
            request.images.is_some()
        );

        let response = self
            .client
            .post(self.url("/api/generate"))
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Model service HTTP error: {} {}", status, body);
            return Err(GuideError::ServiceError(format!("{} {}", status, body)));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GuideError::ServiceError(format!("Malformed response: {}", e)))?;

        Ok(body.response)
    }
}
