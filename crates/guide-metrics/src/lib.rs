use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub captures: usize,
    pub capture_failures: usize,
    pub discarded_captures: usize,
    pub requests: usize,
    pub fallback_responses: usize,
    pub late_responses: usize,
    pub total_latency_ms: u64,
    pub requests_by_context: HashMap<String, ContextMetrics>,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextMetrics {
    pub context: String,
    pub requests: usize,
    pub fallbacks: usize,
    pub total_latency_ms: u64,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn record_capture(&mut self, success: bool) {
        if success {
            self.captures += 1;
        } else {
            self.capture_failures += 1;
        }
    }

    /// A capture that completed after its context had been switched away
    pub fn record_discarded_capture(&mut self) {
        self.discarded_captures += 1;
    }

    pub fn record_request(&mut self, context: &str, duration_ms: u64, fallback: bool) {
        self.requests += 1;
        self.total_latency_ms += duration_ms;
        if fallback {
            self.fallback_responses += 1;
        }

        let metrics = self
            .requests_by_context
            .entry(context.to_string())
            .or_insert_with(|| ContextMetrics {
                context: context.to_string(),
                ..Default::default()
            });
        metrics.requests += 1;
        metrics.total_latency_ms += duration_ms;
        if fallback {
            metrics.fallbacks += 1;
        }

        debug!("Recorded request for {} in {}ms (fallback: {})", context, duration_ms, fallback);
    }

    pub fn record_late_response(&mut self) {
        self.late_responses += 1;
    }

    pub fn get_average_latency(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.requests as f64
        }
    }

    pub fn get_fallback_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.fallback_responses as f64 / self.requests as f64 * 100.0
        }
    }

    pub fn get_summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_requests: self.requests,
            fallback_rate: self.get_fallback_rate(),
            average_latency_ms: self.get_average_latency(),
            captures: self.captures,
            capture_failures: self.capture_failures,
            uptime_seconds: self
                .started_at
                .map(|start| (Utc::now() - start).num_seconds().max(0) as u64)
                .unwrap_or(0),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_requests: usize,
    pub fallback_rate: f64,
    pub average_latency_ms: f64,
    pub captures: usize,
    pub capture_failures: usize,
    pub uptime_seconds: u64,
}
