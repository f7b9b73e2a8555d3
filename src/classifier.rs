//! Remote classification boundary
//!
//! The classifier that actually computes span labels is a black box behind
//! the [`Classifier`] trait: a request/response boundary that must be
//! cancelable mid-flight. [`HttpClassifier`] is the production
//! implementation, posting the payload as JSON to a configured endpoint.
//!
//! Payload field names and semantics are part of the cache-key contract and
//! must not drift between implementations.

use crate::error::{ChromaError, Result};
use crate::settings::RequestSettings;
use crate::span::Span;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::debug;

/// Policy knobs forwarded to the classifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabelingPolicy {
    /// Allow overlapping spans in the result
    pub allow_overlap: bool,

    /// Word-count ceiling for non-technical spans
    pub non_technical_word_limit: usize,
}

/// Request payload for one labeling call
///
/// Identity for caching is the deterministic signature of every field; see
/// [`parameter_key`](LabelingPayload::parameter_key).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabelingPayload {
    /// The text to label
    pub text: String,

    /// Caller-scoped cache identifier (e.g. a session record id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_id: Option<String>,

    /// Maximum spans the classifier should return
    pub max_spans: usize,

    /// Minimum confidence the classifier should return
    pub min_confidence: f32,

    /// Labeling policy
    pub policy: LabelingPolicy,

    /// Prompt template revision
    pub template_version: String,
}

impl LabelingPayload {
    /// Build a payload from request settings
    pub fn from_settings(
        text: impl Into<String>,
        cache_id: Option<String>,
        settings: &RequestSettings,
    ) -> Self {
        Self {
            text: text.into(),
            cache_id,
            max_spans: settings.max_spans,
            min_confidence: settings.min_confidence,
            policy: LabelingPolicy {
                allow_overlap: settings.allow_overlap,
                non_technical_word_limit: settings.non_technical_word_limit,
            },
            template_version: settings.template_version.clone(),
        }
    }

    /// Deterministic serialization of every non-text field, combined with the
    /// text signature to form a cache key
    pub fn parameter_key(&self) -> String {
        format!(
            "max={};conf={:.3};overlap={};ntwl={};tmpl={};cid={}",
            self.max_spans,
            self.min_confidence,
            self.policy.allow_overlap,
            self.policy.non_technical_word_limit,
            self.template_version,
            self.cache_id.as_deref().unwrap_or("-"),
        )
    }
}

/// Metadata returned alongside a span set
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ResponseMeta {
    /// Model identifier reported by the classifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Server-side latency in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,

    /// Whether the span set was truncated server-side
    #[serde(default)]
    pub truncated: bool,
}

/// Response from the classification boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyResponse {
    /// Labeled spans, unvalidated
    pub spans: Vec<Span>,

    /// Response metadata
    #[serde(default)]
    pub meta: ResponseMeta,
}

/// Span classification boundary
///
/// Implementations must surface failures as errors with a message;
/// cancellation is handled by the scheduler racing this future against a
/// cancellation token, so implementations only need to be drop-safe.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Label the payload text with taxonomy-category spans
    async fn classify(&self, payload: &LabelingPayload) -> Result<ClassifyResponse>;
}

/// Configuration for the HTTP classifier
#[derive(Debug, Clone)]
pub struct HttpClassifierConfig {
    /// Endpoint URL for the labeling service
    pub endpoint: String,

    /// API key sent as `x-api-key`
    pub api_key: String,

    /// Model identifier requested from the service
    pub model: String,

    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for HttpClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: env::var("CHROMA_CLASSIFIER_URL")
                .unwrap_or_else(|_| "http://localhost:8700/v1/label".to_string()),
            api_key: env::var("CHROMA_CLASSIFIER_KEY").unwrap_or_default(),
            model: "span-tagger-2".to_string(),
            timeout_ms: 8_000,
        }
    }
}

/// HTTP-backed classifier implementation
pub struct HttpClassifier {
    config: HttpClassifierConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    #[serde(flatten)]
    payload: &'a LabelingPayload,
}

impl HttpClassifier {
    /// Create a classifier with custom config
    pub fn new(config: HttpClassifierConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self { config, client })
    }

    /// Create with default config (endpoint/key from the environment)
    pub fn with_default() -> Result<Self> {
        Self::new(HttpClassifierConfig::default())
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, payload: &LabelingPayload) -> Result<ClassifyResponse> {
        debug!(chars = payload.text.chars().count(), "dispatching classification request");

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("x-api-key", &self.config.api_key)
            .json(&WireRequest {
                model: &self.config.model,
                payload,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ChromaError::Classifier(format!(
                "classifier returned {}",
                response.status()
            )));
        }

        Ok(response.json::<ClassifyResponse>().await?)
    }
}
