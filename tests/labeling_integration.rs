//! Integration tests for the labeling orchestration pipeline
//!
//! Exercises the cache, scheduler, and orchestrator together against a
//! scripted classifier standing in for the remote boundary.

use async_trait::async_trait;
use chroma::{
    Classifier, ClassifyResponse, LabelingOrchestrator, LabelingPayload, LabelingResult,
    LabelingSettings, RequestState, ResponseMeta, ResultSource, Span,
};
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

static TRACING: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("chroma=debug")
        .try_init();
});

/// Scripted classifier that counts calls and can be flipped into failure
struct ScriptedClassifier {
    calls: AtomicUsize,
    texts: Mutex<Vec<String>>,
    fail: AtomicBool,
    spans: Vec<Span>,
}

impl ScriptedClassifier {
    fn new(spans: Vec<Span>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            texts: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            spans,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    fn seen_texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, payload: &LabelingPayload) -> chroma::Result<ClassifyResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.lock().unwrap().push(payload.text.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(chroma::ChromaError::Classifier(
                "connection reset".to_string(),
            ));
        }
        Ok(ClassifyResponse {
            spans: self.spans.clone(),
            meta: ResponseMeta {
                model: Some("span-tagger-2".to_string()),
                ..Default::default()
            },
        })
    }
}

fn default_spans() -> Vec<Span> {
    vec![
        Span::new(0, 6, "lighting", 0.92).with_id("s-1"),
        Span::new(12, 18, "subject", 0.81).with_id("s-2"),
    ]
}

fn settings_with_debounce(debounce_ms: u64) -> LabelingSettings {
    let mut settings = LabelingSettings::default();
    settings.scheduler.debounce_ms = debounce_ms;
    settings.scheduler.smart_debounce = false;
    settings
}

struct Harness {
    classifier: Arc<ScriptedClassifier>,
    orchestrator: LabelingOrchestrator,
    emissions: Arc<Mutex<Vec<LabelingResult>>>,
}

fn harness(debounce_ms: u64, spans: Vec<Span>) -> Harness {
    Lazy::force(&TRACING);
    let classifier = Arc::new(ScriptedClassifier::new(spans));
    let emissions: Arc<Mutex<Vec<LabelingResult>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&emissions);
    let orchestrator = LabelingOrchestrator::builder(classifier.clone())
        .with_settings(settings_with_debounce(debounce_ms))
        .on_result(move |result| sink.lock().unwrap().push(result.clone()))
        .build();
    Harness {
        classifier,
        orchestrator,
        emissions,
    }
}

impl Harness {
    fn sources(&self) -> Vec<ResultSource> {
        self.emissions
            .lock()
            .unwrap()
            .iter()
            .map(|result| result.source)
            .collect()
    }

    fn last_emission(&self) -> Option<LabelingResult> {
        self.emissions.lock().unwrap().last().cloned()
    }
}

const TEXT: &str = "Golden hour sunset over a quiet harbor";

#[tokio::test]
async fn test_first_call_networks_second_call_hits_cache() {
    let h = harness(0, default_spans());

    h.orchestrator.schedule(TEXT, Some("p1".to_string()), false);
    sleep(Duration::from_millis(50)).await;

    assert_eq!(h.classifier.calls(), 1);
    assert_eq!(h.orchestrator.state(), RequestState::Success);
    assert_eq!(h.sources(), vec![ResultSource::Network]);

    // Identical payload: zero further network requests, same spans.
    h.orchestrator.schedule(TEXT, Some("p1".to_string()), false);
    sleep(Duration::from_millis(50)).await;

    assert_eq!(h.classifier.calls(), 1);
    assert_eq!(h.sources(), vec![ResultSource::Network, ResultSource::Cache]);
    let cached = h.last_emission().unwrap();
    assert_eq!(cached.spans, default_spans());
    assert_eq!(cached.cache_id.as_deref(), Some("p1"));
}

#[tokio::test]
async fn test_cache_emission_is_deduplicated() {
    let h = harness(0, default_spans());

    h.orchestrator.schedule(TEXT, None, false);
    sleep(Duration::from_millis(50)).await;
    h.orchestrator.schedule(TEXT, None, false);
    sleep(Duration::from_millis(20)).await;
    h.orchestrator.schedule(TEXT, None, false);
    sleep(Duration::from_millis(20)).await;

    // The third schedule resolves to the same (signature, source) pair and
    // is suppressed.
    assert_eq!(h.sources(), vec![ResultSource::Network, ResultSource::Cache]);
}

#[tokio::test]
async fn test_failure_without_cache_is_error_with_empty_spans() {
    let h = harness(0, default_spans());
    h.classifier.set_failing(true);

    h.orchestrator.schedule(TEXT, None, false);
    sleep(Duration::from_millis(50)).await;

    assert_eq!(h.orchestrator.state(), RequestState::Error);
    assert!(h.orchestrator.last_result().is_none());
    assert!(h.sources().is_empty());
}

#[tokio::test]
async fn test_failure_with_cached_result_goes_stale() {
    let h = harness(0, default_spans());

    // Populate the cache through a successful pass.
    h.orchestrator.schedule(TEXT, Some("p1".to_string()), false);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(h.orchestrator.state(), RequestState::Success);

    // An immediate refresh emits the cached result, then re-validates and
    // fails; the cached spans survive with error metadata attached.
    h.classifier.set_failing(true);
    h.orchestrator.schedule(TEXT, Some("p1".to_string()), true);
    sleep(Duration::from_millis(50)).await;

    assert_eq!(h.orchestrator.state(), RequestState::Stale);
    assert_eq!(
        h.sources(),
        vec![
            ResultSource::Network,
            ResultSource::RefreshCache,
            ResultSource::CacheFallback,
        ]
    );
    let stale = h.last_emission().unwrap();
    assert_eq!(stale.spans, default_spans());
    let error = stale.meta.error.expect("stale result carries error metadata");
    assert!(error.message.contains("connection reset"));
}

#[tokio::test]
async fn test_newer_schedule_supersedes_pending_request() {
    let h = harness(80, default_spans());

    h.orchestrator.schedule("first draft of the prompt", None, false);
    sleep(Duration::from_millis(10)).await;
    h.orchestrator.schedule("second draft of the prompt", None, false);
    sleep(Duration::from_millis(300)).await;

    // The first request was canceled inside its debounce window.
    assert_eq!(h.classifier.calls(), 1);
    assert_eq!(
        h.classifier.seen_texts(),
        vec!["second draft of the prompt".to_string()]
    );
    assert_eq!(h.orchestrator.state(), RequestState::Success);
}

#[tokio::test]
async fn test_explicit_cancel_is_silent() {
    let h = harness(80, default_spans());

    h.orchestrator.schedule(TEXT, None, false);
    assert_eq!(h.orchestrator.state(), RequestState::Loading);
    h.orchestrator.cancel_pending();
    sleep(Duration::from_millis(200)).await;

    // No call, no emission, no state transition.
    assert_eq!(h.classifier.calls(), 0);
    assert!(h.sources().is_empty());
    assert_eq!(h.orchestrator.state(), RequestState::Loading);
}

#[tokio::test]
async fn test_empty_input_goes_idle() {
    let h = harness(0, default_spans());
    h.orchestrator.schedule("   ", None, false);
    sleep(Duration::from_millis(30)).await;

    assert_eq!(h.orchestrator.state(), RequestState::Idle);
    assert_eq!(h.classifier.calls(), 0);
}

#[tokio::test]
async fn test_disabled_orchestrator_never_calls_out() {
    let h = harness(0, default_spans());
    h.orchestrator.set_enabled(false);
    h.orchestrator.schedule(TEXT, None, false);
    sleep(Duration::from_millis(30)).await;

    assert_eq!(h.orchestrator.state(), RequestState::Idle);
    assert_eq!(h.classifier.calls(), 0);
}

#[tokio::test]
async fn test_refreshing_state_retains_prior_success() {
    let h = harness(0, default_spans());
    let states: Arc<Mutex<Vec<RequestState>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    let orchestrator = LabelingOrchestrator::builder(h.classifier.clone())
        .with_settings(settings_with_debounce(0))
        .on_state(move |state| sink.lock().unwrap().push(state))
        .build();

    orchestrator.schedule(TEXT, None, false);
    sleep(Duration::from_millis(50)).await;
    // Force a refresh of the same payload.
    orchestrator.schedule(TEXT, None, true);
    sleep(Duration::from_millis(50)).await;

    let states = states.lock().unwrap().clone();
    // First fetch loads; the immediate refresh re-validates while showing
    // cached data.
    assert!(states.contains(&RequestState::Loading));
    assert!(states.contains(&RequestState::Refreshing));
    assert_eq!(orchestrator.state(), RequestState::Success);
    assert!(orchestrator.last_result().is_some());
}
