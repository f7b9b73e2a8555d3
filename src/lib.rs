//! Chroma - Semantic Span Labeling and Highlight Overlay
//!
//! Analyzes freeform creative prompts by asking a remote classifier to tag
//! substrings with taxonomy categories, then anchors those spans onto a
//! live, editable tree of text nodes as visual highlights. Provides:
//! - Debounced, cancelable request orchestration with result caching
//! - Graceful degradation to last-known-good results on network failure
//! - Character-offset indexing and range mapping over a mutable node tree
//! - Diff-based highlight rendering that only touches what changed
//!
//! # Architecture
//!
//! The system is organized as a pipeline, leaves first:
//! - **Cache**: normalized-text signatures and bounded result storage
//! - **Scheduler**: debounce, cancellation tokens, supersede tracking
//! - **Orchestrator**: request state machine and fallback policy
//! - **Surface**: text-node indexing, range mapping, diff rendering
//!
//! # Example
//!
//! ```ignore
//! use chroma::{
//!     HighlightRenderer, LabelingOrchestrator, HttpClassifier, RendererSettings,
//!     StaticTaxonomy, TextSurface, WrapperSpec,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> chroma::Result<()> {
//!     let classifier = Arc::new(HttpClassifier::with_default()?);
//!     let taxonomy = Arc::new(StaticTaxonomy::new(["subject", "style", "lighting"]));
//!     let orchestrator = LabelingOrchestrator::builder(classifier)
//!         .with_taxonomy(taxonomy)
//!         .on_result(|result| println!("{} spans from {:?}", result.spans.len(), result.source))
//!         .build();
//!
//!     orchestrator.schedule("Golden hour sunset over a quiet harbor", None, false);
//!
//!     // Later, anchor the resolved spans onto the editable surface:
//!     let mut surface = TextSurface::with_text("Golden hour sunset over a quiet harbor");
//!     let mut renderer = HighlightRenderer::new(
//!         RendererSettings::default(),
//!         Box::new(|span| Some(WrapperSpec { label: span.category.clone() })),
//!     );
//!     if let Some(result) = orchestrator.last_result() {
//!         renderer.render(&mut surface, &result.text, &result.spans);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod classifier;
pub mod error;
pub mod orchestrator;
pub mod scheduler;
pub mod settings;
pub mod span;
pub mod surface;
pub mod taxonomy;

// Re-export commonly used types
pub use cache::{CacheEntry, CacheStats, LabelCache, SignatureCache};
pub use classifier::{
    Classifier, ClassifyResponse, HttpClassifier, HttpClassifierConfig, LabelingPayload,
    LabelingPolicy, ResponseMeta,
};
pub use error::{ChromaError, Result};
pub use orchestrator::{
    FallbackError, LabelCandidates, LabelOrigin, LabelingOrchestrator, LabelingResult,
    OrchestratorBuilder, PersistedLabels, RequestState, ResultMeta, ResultSource, SelectedLabels,
};
pub use scheduler::{RequestScheduler, RequestTicket};
pub use settings::{
    CacheSettings, LabelingSettings, RendererSettings, RequestSettings, SchedulerSettings,
};
pub use span::{Span, SpanExtras, SpanKey};
pub use surface::index::{TextNodeIndex, TextNodeIndexEntry};
pub use surface::mapper::{map_range, read_range, MappedRange, RangeEndpoint, RangeSegment};
pub use surface::renderer::{
    HighlightEntry, HighlightRenderer, RenderOutcome, WrapperFactory, WrapperSpec,
};
pub use surface::{char_slice, NodeId, NodeKind, TextSurface};
pub use taxonomy::{OpenTaxonomy, StaticTaxonomy, TaxonomyProvider};
