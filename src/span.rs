//! Labeled span data model
//!
//! A span is a half-open character-offset range plus a taxonomy category and
//! confidence. The validated core (`start`, `end`, `category`, `confidence`)
//! is kept separate from display-only metadata, which rides in an optional
//! extras bag.

use crate::taxonomy::TaxonomyProvider;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A labeled substring of the analyzed text
///
/// Offsets are character indices into the source text, not bytes or
/// graphemes; grapheme-based offsets for display belong in [`SpanExtras`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Span {
    /// Stable identifier supplied by the classifier, when available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Start offset, inclusive
    pub start: usize,

    /// End offset, exclusive
    pub end: usize,

    /// Taxonomy category identifier
    pub category: String,

    /// Confidence score (0.0-1.0)
    pub confidence: f32,

    /// Expected text at `[start, end)`, used to detect misaligned results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,

    /// Display-only metadata, never part of the validated core
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<SpanExtras>,
}

/// Presentation metadata carried alongside a span
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SpanExtras {
    /// Grapheme-based start offset for display surfaces that need one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_start: Option<usize>,

    /// Grapheme-based end offset for display surfaces that need one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_end: Option<usize>,

    /// Hover tooltip text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
}

impl Span {
    /// Create a span from the required core fields
    pub fn new(start: usize, end: usize, category: impl Into<String>, confidence: f32) -> Self {
        Self {
            id: None,
            start,
            end,
            category: category.into(),
            confidence,
            quote: None,
            extras: None,
        }
    }

    /// Attach a stable identifier
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Attach the expected source text
    pub fn with_quote(mut self, quote: impl Into<String>) -> Self {
        self.quote = Some(quote.into());
        self
    }

    /// Attach display-only metadata
    pub fn with_extras(mut self, extras: SpanExtras) -> Self {
        self.extras = Some(extras);
        self
    }

    /// Length of the span in characters
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Whether the span covers no characters
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Identity key: the explicit id when present, otherwise a composite of
    /// boundaries and category
    pub fn key(&self) -> SpanKey {
        match &self.id {
            Some(id) => SpanKey::Id(id.clone()),
            None => SpanKey::Composite {
                start: self.start,
                end: self.end,
                category: self.category.clone(),
            },
        }
    }
}

/// Stable identity for a span across render passes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SpanKey {
    /// Classifier-supplied identifier
    Id(String),

    /// Fallback identity when no id was supplied
    Composite {
        start: usize,
        end: usize,
        category: String,
    },
}

/// Validate and canonicalize a single span from a classifier result
///
/// A span that fails any check is dropped with a diagnostic; one bad span
/// never fails the whole batch. Returns the span with its category resolved
/// to canonical form.
pub fn validate_span(
    mut span: Span,
    text_chars: usize,
    min_confidence: f32,
    taxonomy: &dyn TaxonomyProvider,
) -> Option<Span> {
    if span.start >= span.end {
        debug!(start = span.start, end = span.end, "dropping span with degenerate range");
        return None;
    }
    if span.end > text_chars {
        debug!(end = span.end, text_chars, "dropping span past end of text");
        return None;
    }
    if !span.confidence.is_finite() || !(0.0..=1.0).contains(&span.confidence) {
        debug!(confidence = span.confidence, "dropping span with invalid confidence");
        return None;
    }
    if span.confidence < min_confidence {
        debug!(
            confidence = span.confidence,
            min_confidence, "dropping span below confidence floor"
        );
        return None;
    }
    match taxonomy.resolve(&span.category) {
        Some(canonical) => {
            span.category = canonical;
            Some(span)
        }
        None => {
            debug!(category = %span.category, "dropping span with unknown category");
            None
        }
    }
}
