//! Labeling orchestration state machine
//!
//! Coordinates the cache, the request scheduler, and the classification
//! boundary: cache hits short-circuit the network, failures fall back to
//! last-known-good cached results, and explicit cancellation is silent.
//! All failures are absorbed here; callers only ever observe states and
//! emitted results.

use crate::cache::LabelCache;
use crate::classifier::{Classifier, LabelingPayload, ResponseMeta};
use crate::scheduler::RequestScheduler;
use crate::settings::LabelingSettings;
use crate::span::{validate_span, Span};
use crate::taxonomy::{OpenTaxonomy, TaxonomyProvider};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Request lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestState {
    /// Disabled or empty input; terminal until re-enabled/re-populated
    Idle,

    /// First fetch with no prior success to show
    Loading,

    /// Re-validating while prior success data is still shown
    Refreshing,

    /// Fresh or cached result on display
    Success,

    /// Failed with nothing to fall back on; spans are empty
    Error,

    /// Failed, but a cached result is shown with an attached warning
    Stale,
}

/// Where an emitted result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultSource {
    /// Persisted historical labels shown before any request resolved
    Initial,

    /// Cache hit on a scheduled request
    Cache,

    /// Fresh classifier result
    Network,

    /// Cached result substituted after a network failure
    CacheFallback,

    /// Cached result emitted while an immediate refresh re-validates
    RefreshCache,
}

/// Error details attached to a stale result
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackError {
    /// Failure message from the classification boundary
    pub message: String,

    /// Age of the substituted cache entry
    pub age: Duration,
}

/// Metadata attached to an emitted result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultMeta {
    /// Metadata from the classifier response (or the cached one)
    pub response: ResponseMeta,

    /// Set when the result is a stale fallback
    pub error: Option<FallbackError>,
}

/// A resolved labeling outcome delivered to observers
#[derive(Debug, Clone, PartialEq)]
pub struct LabelingResult {
    /// Validated spans, ascending by start offset
    pub spans: Vec<Span>,

    /// Result metadata
    pub meta: ResultMeta,

    /// The text that was labeled
    pub text: String,

    /// Signature of the labeled text
    pub signature: String,

    /// Caller-scoped cache identifier
    pub cache_id: Option<String>,

    /// Provenance of this result
    pub source: ResultSource,
}

/// Persisted historical labels attached to a stored session record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedLabels {
    /// Spans as stored
    pub spans: Vec<Span>,

    /// Signature recorded when the labels were saved, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    /// When the labels were saved
    pub saved_at: DateTime<Utc>,
}

/// Candidate span sets competing for display
#[derive(Debug, Clone, Default)]
pub struct LabelCandidates {
    /// Fast draft pass, if it has resolved
    pub draft: Option<Vec<Span>>,

    /// Refined pass, if it has resolved
    pub refined: Option<Vec<Span>>,

    /// True while a refine pass is re-validating
    pub refining: bool,

    /// Persisted historical labels
    pub persisted: Option<PersistedLabels>,
}

/// Which candidate set was selected for display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelOrigin {
    Draft,
    Refined,
    Persisted,
}

/// A selected span set plus the signature it is valid for
#[derive(Debug, Clone)]
pub struct SelectedLabels {
    pub spans: Vec<Span>,
    pub signature: String,
    pub origin: LabelOrigin,
}

type ResultCallback = dyn Fn(&LabelingResult) + Send + Sync;
type StateCallback = dyn Fn(RequestState) + Send + Sync;

struct Shared {
    state: RequestState,
    last_success: Option<LabelingResult>,
    /// Emission dedup key; owned here with a clear lifetime, reset on disable
    last_emitted: Option<(String, ResultSource)>,
    enabled: bool,
}

/// Everything the in-flight tasks need, behind one allocation so that tasks
/// can hold it weakly: once every orchestrator handle is gone, a resolution
/// that escaped the token race still has nowhere to land.
struct Core {
    settings: Mutex<LabelingSettings>,
    classifier: Arc<dyn Classifier>,
    taxonomy: Arc<dyn TaxonomyProvider>,
    cache: Arc<LabelCache>,
    scheduler: RequestScheduler,
    shared: Mutex<Shared>,
    on_result: Option<Box<ResultCallback>>,
    on_state: Option<Box<StateCallback>>,
}

impl Core {
    /// Validate, canonicalize, bound, and order spans from a response
    fn normalize_spans(&self, spans: Vec<Span>, payload: &LabelingPayload) -> Vec<Span> {
        let text_chars = payload.text.chars().count();
        let mut kept: Vec<Span> = spans
            .into_iter()
            .filter_map(|span| {
                validate_span(
                    span,
                    text_chars,
                    payload.min_confidence,
                    self.taxonomy.as_ref(),
                )
            })
            .collect();
        if kept.len() > payload.max_spans {
            debug!(
                dropped = kept.len() - payload.max_spans,
                "truncating span set to max_spans"
            );
            kept.truncate(payload.max_spans);
        }
        // Stable sort: equal starts keep the classifier's ordering.
        kept.sort_by_key(|span| span.start);
        kept
    }

    fn apply_success(
        &self,
        payload: &LabelingPayload,
        spans: Vec<Span>,
        meta: ResponseMeta,
        source: ResultSource,
    ) {
        let result = LabelingResult {
            spans,
            meta: ResultMeta {
                response: meta,
                error: None,
            },
            text: payload.text.clone(),
            signature: self.cache.signature(&payload.text),
            cache_id: payload.cache_id.clone(),
            source,
        };
        if let Ok(mut shared) = self.shared.lock() {
            shared.state = RequestState::Success;
            shared.last_success = Some(result.clone());
        }
        self.fire_state(RequestState::Success);
        self.emit(result);
    }

    fn apply_failure(&self, payload: &LabelingPayload, message: String) {
        // Any cached entry for this payload beats a blank error state, with
        // no age cutoff: users keep last-known-good output through transient
        // network trouble.
        if let Some(entry) = self.cache.get(payload) {
            let result = LabelingResult {
                spans: entry.spans.clone(),
                meta: ResultMeta {
                    response: entry.meta.clone(),
                    error: Some(FallbackError {
                        message,
                        age: entry.age(),
                    }),
                },
                text: payload.text.clone(),
                signature: entry.signature.clone(),
                cache_id: payload.cache_id.clone(),
                source: ResultSource::CacheFallback,
            };
            if let Ok(mut shared) = self.shared.lock() {
                shared.state = RequestState::Stale;
            }
            self.fire_state(RequestState::Stale);
            self.emit(result);
        } else {
            warn!(error = %message, "classification failed with no cached fallback");
            if let Ok(mut shared) = self.shared.lock() {
                shared.state = RequestState::Error;
            }
            self.fire_state(RequestState::Error);
        }
    }

    /// Invoke the result observer at most once per `(signature, source)` pair
    fn emit(&self, result: LabelingResult) {
        let key = (result.signature.clone(), result.source);
        if let Ok(mut shared) = self.shared.lock() {
            if shared.last_emitted.as_ref() == Some(&key) {
                debug!(source = ?result.source, "suppressing duplicate emission");
                return;
            }
            shared.last_emitted = Some(key);
        }
        if let Some(callback) = self.on_result.as_deref() {
            callback(&result);
        }
    }

    fn transition(&self, state: RequestState) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.state = state;
        }
        self.fire_state(state);
    }

    fn fire_state(&self, state: RequestState) {
        if let Some(callback) = self.on_state.as_deref() {
            callback(state);
        }
    }
}

/// Orchestrates labeling requests against a mutable text buffer
///
/// Cheap to clone; clones share all state. Dropping the last handle cancels
/// pending work, so a torn-down consumer leaks no timers and receives no
/// dangling callback invocations.
#[derive(Clone)]
pub struct LabelingOrchestrator {
    core: Arc<Core>,
}

impl LabelingOrchestrator {
    /// Start building an orchestrator around a classifier
    pub fn builder(classifier: Arc<dyn Classifier>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(classifier)
    }

    /// Current request state
    pub fn state(&self) -> RequestState {
        self.core
            .shared
            .lock()
            .map(|shared| shared.state)
            .unwrap_or(RequestState::Idle)
    }

    /// Most recent successful result, if any
    pub fn last_result(&self) -> Option<LabelingResult> {
        self.core
            .shared
            .lock()
            .ok()
            .and_then(|shared| shared.last_success.clone())
    }

    /// The injected cache instance
    pub fn cache(&self) -> &Arc<LabelCache> {
        &self.core.cache
    }

    /// Replace settings at runtime
    pub fn update_settings(&self, settings: LabelingSettings) {
        self.core.scheduler.update_settings(settings.scheduler.clone());
        if let Ok(mut guard) = self.core.settings.lock() {
            *guard = settings;
        }
    }

    /// Enable or disable labeling; disabling cancels pending work and resets
    /// to idle, dropping the emission dedup key so a fresh subscription
    /// starts clean
    pub fn set_enabled(&self, enabled: bool) {
        if enabled {
            if let Ok(mut shared) = self.core.shared.lock() {
                shared.enabled = true;
            }
            return;
        }
        self.core.scheduler.cancel_pending();
        if let Ok(mut shared) = self.core.shared.lock() {
            shared.enabled = false;
            shared.state = RequestState::Idle;
            shared.last_emitted = None;
        }
        self.core.fire_state(RequestState::Idle);
    }

    /// Cancel any queued or in-flight request without emitting anything
    pub fn cancel_pending(&self) {
        self.core.scheduler.cancel_pending();
    }

    /// Schedule labeling for `text`
    ///
    /// Must be called from within a tokio runtime. A cache hit resolves
    /// synchronously and skips the network; `immediate` additionally emits
    /// any cached result right away and still re-validates against the
    /// classifier. Pending work from earlier schedules is superseded.
    pub fn schedule(&self, text: &str, cache_id: Option<String>, immediate: bool) {
        let core = &self.core;
        let settings = core
            .settings
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();
        let enabled = core
            .shared
            .lock()
            .map(|shared| shared.enabled)
            .unwrap_or(false);

        if !enabled || text.trim().is_empty() {
            core.scheduler.cancel_pending();
            core.transition(RequestState::Idle);
            return;
        }

        // This schedule is now the only one that matters.
        core.scheduler.cancel_pending();

        let payload = LabelingPayload::from_settings(text, cache_id, &settings.request);

        let cached = core.cache.get(&payload);
        if let Some(entry) = &cached {
            let source = if immediate {
                ResultSource::RefreshCache
            } else {
                ResultSource::Cache
            };
            core.apply_success(&payload, entry.spans.clone(), entry.meta.clone(), source);
            if !immediate {
                return;
            }
        }

        let ticket = core.scheduler.issue();
        let token = core.scheduler.token();

        // The loading-state callback fires before any asynchronous work.
        let next_state = if cached.is_some() || self.last_result().is_some() {
            RequestState::Refreshing
        } else {
            RequestState::Loading
        };
        core.transition(next_state);

        let delay = if immediate {
            Duration::ZERO
        } else {
            core.scheduler.effective_debounce(text.chars().count())
        };

        let classifier = Arc::clone(&core.classifier);
        let weak_core = Arc::downgrade(core);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::select! {
                    // Explicit cancellation is silent: no transition, no emission.
                    _ = token.cancelled() => return,
                    _ = sleep(delay) => {}
                }
            }
            let outcome = tokio::select! {
                _ = token.cancelled() => return,
                result = classifier.classify(&payload) => result,
            };
            // Consumer torn down mid-flight: drop the resolution silently.
            let Some(core) = weak_core.upgrade() else { return };
            if !core.scheduler.is_current(&ticket) {
                return;
            }
            match outcome {
                Ok(response) => {
                    let spans = core.normalize_spans(response.spans, &payload);
                    core.cache.set(&payload, spans.clone(), response.meta.clone());
                    core.apply_success(&payload, spans, response.meta, ResultSource::Network);
                }
                Err(err) => core.apply_failure(&payload, err.to_string()),
            }
        });
    }

    /// Pick the span set to display from competing candidates
    ///
    /// Priority: draft (ready, no refined result yet), then refined (unless a
    /// refine pass is in flight), then persisted. The signature is always
    /// recomputed from the displayed text; a stored signature is trusted only
    /// when it was saved alongside the persisted spans.
    pub fn select_labels(
        &self,
        display_text: &str,
        candidates: &LabelCandidates,
    ) -> Option<SelectedLabels> {
        if let (Some(draft), None) = (&candidates.draft, &candidates.refined) {
            return Some(SelectedLabels {
                spans: draft.clone(),
                signature: self.core.cache.signature(display_text),
                origin: LabelOrigin::Draft,
            });
        }
        if let Some(refined) = &candidates.refined {
            if !candidates.refining {
                return Some(SelectedLabels {
                    spans: refined.clone(),
                    signature: self.core.cache.signature(display_text),
                    origin: LabelOrigin::Refined,
                });
            }
        }
        candidates.persisted.as_ref().map(|persisted| SelectedLabels {
            spans: persisted.spans.clone(),
            signature: persisted
                .signature
                .clone()
                .unwrap_or_else(|| self.core.cache.signature(display_text)),
            origin: LabelOrigin::Persisted,
        })
    }
}

impl Drop for LabelingOrchestrator {
    fn drop(&mut self) {
        // In-flight tasks hold the core weakly, so the last orchestrator
        // handle going away must stop their timers as an implicit cancel.
        if Arc::strong_count(&self.core) == 1 {
            self.core.scheduler.cancel_pending();
        }
    }
}

/// Builder for [`LabelingOrchestrator`]
pub struct OrchestratorBuilder {
    settings: LabelingSettings,
    classifier: Arc<dyn Classifier>,
    taxonomy: Arc<dyn TaxonomyProvider>,
    cache: Option<Arc<LabelCache>>,
    on_result: Option<Box<ResultCallback>>,
    on_state: Option<Box<StateCallback>>,
}

impl OrchestratorBuilder {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self {
            settings: LabelingSettings::default(),
            classifier,
            taxonomy: Arc::new(OpenTaxonomy),
            cache: None,
            on_result: None,
            on_state: None,
        }
    }

    pub fn with_settings(mut self, settings: LabelingSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_taxonomy(mut self, taxonomy: Arc<dyn TaxonomyProvider>) -> Self {
        self.taxonomy = taxonomy;
        self
    }

    /// Inject a cache instance (shared across orchestrators if desired)
    pub fn with_cache(mut self, cache: Arc<LabelCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Observe resolved results
    pub fn on_result(
        mut self,
        callback: impl Fn(&LabelingResult) + Send + Sync + 'static,
    ) -> Self {
        self.on_result = Some(Box::new(callback));
        self
    }

    /// Observe state transitions
    pub fn on_state(mut self, callback: impl Fn(RequestState) + Send + Sync + 'static) -> Self {
        self.on_state = Some(Box::new(callback));
        self
    }

    pub fn build(self) -> LabelingOrchestrator {
        let cache = self.cache.unwrap_or_else(|| {
            Arc::new(LabelCache::new(
                self.settings.cache.capacity,
                self.settings.cache.signature_memo_capacity,
            ))
        });
        let scheduler = RequestScheduler::new(self.settings.scheduler.clone());
        let enabled = self.settings.enabled;
        LabelingOrchestrator {
            core: Arc::new(Core {
                settings: Mutex::new(self.settings),
                classifier: self.classifier,
                taxonomy: self.taxonomy,
                cache,
                scheduler,
                shared: Mutex::new(Shared {
                    state: RequestState::Idle,
                    last_success: None,
                    last_emitted: None,
                    enabled,
                }),
                on_result: self.on_result,
                on_state: self.on_state,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ClassifyResponse;
    use crate::error::{ChromaError, Result};
    use crate::taxonomy::StaticTaxonomy;
    use async_trait::async_trait;

    struct StaticClassifier {
        spans: Vec<Span>,
    }

    #[async_trait]
    impl Classifier for StaticClassifier {
        async fn classify(&self, _payload: &LabelingPayload) -> Result<ClassifyResponse> {
            Ok(ClassifyResponse {
                spans: self.spans.clone(),
                meta: ResponseMeta::default(),
            })
        }
    }

    struct FailingClassifier;

    #[async_trait]
    impl Classifier for FailingClassifier {
        async fn classify(&self, _payload: &LabelingPayload) -> Result<ClassifyResponse> {
            Err(ChromaError::Classifier("connection reset".to_string()))
        }
    }

    fn orchestrator(spans: Vec<Span>) -> LabelingOrchestrator {
        LabelingOrchestrator::builder(Arc::new(StaticClassifier { spans })).build()
    }

    #[test]
    fn test_serde_source_naming() {
        let json = serde_json::to_string(&ResultSource::CacheFallback).unwrap();
        assert_eq!(json, "\"cache-fallback\"");
        let json = serde_json::to_string(&ResultSource::RefreshCache).unwrap();
        assert_eq!(json, "\"refresh-cache\"");
    }

    #[test]
    fn test_normalize_spans_orders_and_bounds() {
        let orch = LabelingOrchestrator::builder(Arc::new(StaticClassifier { spans: vec![] }))
            .with_taxonomy(Arc::new(StaticTaxonomy::new(["mood", "subject"])))
            .build();
        let mut settings = crate::settings::RequestSettings::default();
        settings.max_spans = 2;
        let payload = LabelingPayload::from_settings("a quiet harbor at dawn", None, &settings);

        let spans = vec![
            Span::new(8, 14, "subject", 0.9),
            Span::new(0, 7, "mood", 0.8),
            Span::new(18, 22, "mood", 0.7),
            Span::new(2, 4, "texture", 0.9), // unknown category, dropped
        ];
        let normalized = orch.core.normalize_spans(spans, &payload);
        assert_eq!(normalized.len(), 2);
        assert!(normalized[0].start < normalized[1].start);
    }

    #[test]
    fn test_select_labels_prefers_ready_draft() {
        let orch = orchestrator(vec![]);
        let candidates = LabelCandidates {
            draft: Some(vec![Span::new(0, 3, "mood", 0.8)]),
            ..Default::default()
        };
        let selected = orch.select_labels("some text", &candidates).unwrap();
        assert_eq!(selected.origin, LabelOrigin::Draft);
        assert_eq!(selected.signature, orch.cache().signature("some text"));
    }

    #[test]
    fn test_select_labels_refined_beats_draft() {
        let orch = orchestrator(vec![]);
        let candidates = LabelCandidates {
            draft: Some(vec![Span::new(0, 3, "mood", 0.8)]),
            refined: Some(vec![Span::new(0, 5, "mood", 0.95)]),
            ..Default::default()
        };
        let selected = orch.select_labels("some text", &candidates).unwrap();
        assert_eq!(selected.origin, LabelOrigin::Refined);
    }

    #[test]
    fn test_select_labels_skips_refined_mid_refresh() {
        let orch = orchestrator(vec![]);
        let candidates = LabelCandidates {
            refined: Some(vec![Span::new(0, 5, "mood", 0.95)]),
            refining: true,
            persisted: Some(PersistedLabels {
                spans: vec![Span::new(1, 4, "mood", 0.7)],
                signature: Some("deadbeefdeadbeef".to_string()),
                saved_at: Utc::now(),
            }),
            ..Default::default()
        };
        let selected = orch.select_labels("some text", &candidates).unwrap();
        assert_eq!(selected.origin, LabelOrigin::Persisted);
        // Stored signature is trusted because it came with the persisted spans.
        assert_eq!(selected.signature, "deadbeefdeadbeef");
    }

    #[test]
    fn test_select_labels_recomputes_missing_persisted_signature() {
        let orch = orchestrator(vec![]);
        let candidates = LabelCandidates {
            persisted: Some(PersistedLabels {
                spans: vec![],
                signature: None,
                saved_at: Utc::now(),
            }),
            ..Default::default()
        };
        let selected = orch.select_labels("displayed text", &candidates).unwrap();
        assert_eq!(selected.signature, orch.cache().signature("displayed text"));
    }

    #[test]
    fn test_select_labels_empty_candidates() {
        let orch = orchestrator(vec![]);
        assert!(orch
            .select_labels("text", &LabelCandidates::default())
            .is_none());
    }

    #[test]
    fn test_emit_dedup_per_signature_and_source() {
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let orch = LabelingOrchestrator::builder(Arc::new(StaticClassifier { spans: vec![] }))
            .on_result(move |_| {
                seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            })
            .build();

        let payload = LabelingPayload::from_settings(
            "same text",
            None,
            &crate::settings::RequestSettings::default(),
        );
        orch.core
            .apply_success(&payload, vec![], ResponseMeta::default(), ResultSource::Network);
        orch.core
            .apply_success(&payload, vec![], ResponseMeta::default(), ResultSource::Network);
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);

        // A different source for the same signature is a distinct outcome.
        orch.core
            .apply_success(&payload, vec![], ResponseMeta::default(), ResultSource::Cache);
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn test_disable_resets_state_and_dedup_key() {
        let orch = orchestrator(vec![]);
        let payload = LabelingPayload::from_settings(
            "text",
            None,
            &crate::settings::RequestSettings::default(),
        );
        orch.core
            .apply_success(&payload, vec![], ResponseMeta::default(), ResultSource::Network);
        assert_eq!(orch.state(), RequestState::Success);

        orch.set_enabled(false);
        assert_eq!(orch.state(), RequestState::Idle);
        assert!(orch
            .core
            .shared
            .lock()
            .map(|s| s.last_emitted.is_none())
            .unwrap_or(false));
    }

    #[test]
    fn test_failure_without_cache_is_error() {
        let orch = LabelingOrchestrator::builder(Arc::new(FailingClassifier)).build();
        let payload = LabelingPayload::from_settings(
            "text",
            None,
            &crate::settings::RequestSettings::default(),
        );
        orch.core.apply_failure(&payload, "connection reset".to_string());
        assert_eq!(orch.state(), RequestState::Error);
    }

    #[tokio::test]
    async fn test_drop_cancels_pending_work() {
        let orch = orchestrator(vec![]);
        let token = {
            orch.schedule("some text to label", None, false);
            orch.core.scheduler.token()
        };
        drop(orch);
        // The last handle going away cancels the guarding token.
        assert!(token.is_cancelled());
    }
}
