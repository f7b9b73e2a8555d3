//! Diff-based highlight rendering
//!
//! Reconciles a span set against the previously rendered wrapper map,
//! touching the minimum necessary surface mutations: unchanged spans cost
//! zero. The pass is synchronous and never awaits; the surface cannot change
//! underneath it.
//!
//! Failures never escape: a surface that is mid-edit gets a bounded retry on
//! the next frame, individual bad spans are dropped with a diagnostic, and an
//! unexpected internal failure clears all highlight state rather than leaving
//! a partially-applied overlay.

use super::index::TextNodeIndex;
use super::mapper::map_range;
use super::{char_slice, NodeId, TextSurface};
use crate::cache::{normalize, signature};
use crate::error::Result;
use crate::settings::RendererSettings;
use crate::span::{Span, SpanKey};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::ops::Range;
use tracing::{debug, warn};

/// Wrapper element spec produced by the caller-supplied factory
#[derive(Debug, Clone)]
pub struct WrapperSpec {
    /// Element label for the wrapper (typically derived from the category)
    pub label: String,
}

/// Caller-supplied factory deciding how a span is wrapped
///
/// Returning `None` declines the span; it is dropped for this pass with a
/// diagnostic, never an error.
pub type WrapperFactory = dyn Fn(&Span) -> Option<WrapperSpec> + Send + Sync;

/// A rendered span and the wrappers carrying it
///
/// Wrappers are destroyed and recreated on change, never mutated in place.
#[derive(Debug, Clone)]
pub struct HighlightEntry {
    pub span: Span,
    pub wrappers: Vec<NodeId>,
}

/// Outcome of a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Fingerprint unchanged since the last pass; nothing was touched
    Unchanged,

    /// Pass completed with the given surface mutation counts
    Rendered {
        created: usize,
        removed: usize,
        dropped: usize,
    },

    /// Surface not ready (edit in flight); call again on the next frame
    Retry { attempt: u32 },

    /// Retry budget exhausted; prior highlights were left in place
    GaveUp,

    /// Unexpected failure; all highlight state was cleared
    Failed,
}

#[derive(Debug, Clone)]
struct RetryState {
    key: String,
    count: u32,
}

/// Reconciles span sets onto the text surface
pub struct HighlightRenderer {
    settings: RendererSettings,
    factory: Box<WrapperFactory>,
    entries: HashMap<SpanKey, HighlightEntry>,
    last_fingerprint: Option<String>,
    /// Fingerprint of the last failed pass, so the same input is not retried
    /// in a tight loop
    failed_fingerprint: Option<String>,
    retry: Option<RetryState>,
}

impl HighlightRenderer {
    pub fn new(settings: RendererSettings, factory: Box<WrapperFactory>) -> Self {
        Self {
            settings,
            factory,
            entries: HashMap::new(),
            last_fingerprint: None,
            failed_fingerprint: None,
            retry: None,
        }
    }

    /// Currently rendered highlights, keyed by span identity
    pub fn entries(&self) -> &HashMap<SpanKey, HighlightEntry> {
        &self.entries
    }

    /// Wrapper nodes rendered for a span, if it is on the surface
    pub fn wrappers(&self, key: &SpanKey) -> Option<&[NodeId]> {
        self.entries.get(key).map(|entry| entry.wrappers.as_slice())
    }

    /// Reconcile `spans` against the surface
    ///
    /// `expected_text` is the display text the spans were computed for; if
    /// the surface has not caught up to it yet the pass is retried on the
    /// next frame, bounded by the configured budget.
    pub fn render(
        &mut self,
        surface: &mut TextSurface,
        expected_text: &str,
        spans: &[Span],
    ) -> RenderOutcome {
        let fingerprint = Self::fingerprint(expected_text, spans);
        if self.last_fingerprint.as_deref() == Some(fingerprint.as_str()) {
            return RenderOutcome::Unchanged;
        }
        if self.failed_fingerprint.as_deref() == Some(fingerprint.as_str()) {
            return RenderOutcome::Failed;
        }

        if surface.text_content() != expected_text {
            return self.bounded_retry(&fingerprint);
        }

        match self.reconcile(surface, expected_text, spans, &fingerprint) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "render pass failed; clearing all highlights");
                self.clear(surface);
                self.failed_fingerprint = Some(fingerprint);
                RenderOutcome::Failed
            }
        }
    }

    /// Dissolve every wrapper and forget all render state (fail safe)
    pub fn clear(&mut self, surface: &mut TextSurface) {
        let entries = std::mem::take(&mut self.entries);
        for entry in entries.values() {
            for wrapper in &entry.wrappers {
                if surface.is_attached(*wrapper) {
                    // Best effort while failing safe.
                    let _ = surface.unwrap(*wrapper);
                }
            }
        }
        self.last_fingerprint = None;
        self.failed_fingerprint = None;
        self.retry = None;
    }

    /// Explicit bounded retry state machine: `(key, count)`, reset when the
    /// key changes, hard cap enforced
    fn bounded_retry(&mut self, fingerprint: &str) -> RenderOutcome {
        match &mut self.retry {
            Some(retry) if retry.key == fingerprint => {
                if retry.count >= self.settings.max_retries {
                    debug!("retry budget exhausted; leaving prior highlights in place");
                    return RenderOutcome::GaveUp;
                }
                retry.count += 1;
                RenderOutcome::Retry {
                    attempt: retry.count,
                }
            }
            _ => {
                self.retry = Some(RetryState {
                    key: fingerprint.to_string(),
                    count: 1,
                });
                RenderOutcome::Retry { attempt: 1 }
            }
        }
    }

    fn reconcile(
        &mut self,
        surface: &mut TextSurface,
        expected_text: &str,
        spans: &[Span],
        fingerprint: &str,
    ) -> Result<RenderOutcome> {
        let root = Some(surface.root());
        let mut index = TextNodeIndex::build(surface, root);
        if index.is_empty() && !spans.is_empty() {
            return Ok(self.bounded_retry(fingerprint));
        }

        // Removal pass: entries whose identity vanished from the new set.
        let live_keys: HashSet<SpanKey> = spans.iter().map(Span::key).collect();
        let stale: Vec<SpanKey> = self
            .entries
            .keys()
            .filter(|key| !live_keys.contains(*key))
            .cloned()
            .collect();
        let mut removed = 0;
        for key in stale {
            if let Some(entry) = self.entries.remove(&key) {
                removed += self.dissolve(surface, &entry)?;
            }
        }
        if removed > 0 {
            index = TextNodeIndex::build(surface, root);
        }

        // Reconciliation pass: ascending start, ties broken by input order.
        let mut ordered: Vec<&Span> = spans.iter().collect();
        ordered.sort_by_key(|span| span.start);

        let mut claimed: Vec<Range<usize>> = Vec::new();
        let mut created = 0;
        let mut dropped = 0;

        for span in ordered {
            if span.is_empty() {
                debug!(start = span.start, end = span.end, "degenerate span dropped");
                dropped += 1;
                continue;
            }

            // First-fit-wins: a span overlapping an earlier claim loses this
            // pass only; it may win a future pass if the winner disappears.
            if claimed
                .iter()
                .any(|claim| claim.start < span.end && span.start < claim.end)
            {
                debug!(
                    start = span.start,
                    end = span.end,
                    category = %span.category,
                    "span overlaps an earlier claim; dropped for this pass"
                );
                dropped += 1;
                continue;
            }

            // Guard against stale or misaligned results: the live substring
            // must match the span's expected text.
            if let Some(quote) = &span.quote {
                let live = char_slice(expected_text, span.start, span.end);
                if !lenient_match(&live, quote) {
                    debug!(
                        start = span.start,
                        end = span.end,
                        "live text does not match span quote; dropped for this pass"
                    );
                    dropped += 1;
                    continue;
                }
            }

            let key = span.key();
            let reusable = self.entries.get(&key).is_some_and(|entry| {
                entry.span.start == span.start
                    && entry.span.end == span.end
                    && entry.span.category == span.category
                    && entry.span.quote == span.quote
                    && !entry.wrappers.is_empty()
                    && entry
                        .wrappers
                        .iter()
                        .all(|wrapper| surface.is_attached(*wrapper))
            });
            if reusable {
                // The central performance property: unchanged spans cost
                // zero surface mutation.
                claimed.push(span.start..span.end);
                continue;
            }

            if let Some(old) = self.entries.remove(&key) {
                removed += self.dissolve(surface, &old)?;
                index = TextNodeIndex::build(surface, root);
            }

            let Some(spec) = (self.factory)(span) else {
                debug!(category = %span.category, "wrapper factory declined span; dropped");
                dropped += 1;
                // Claimed regardless of whether a wrapper was created.
                claimed.push(span.start..span.end);
                continue;
            };

            let Some(mapped) = map_range(&index, span.start, span.end) else {
                debug!(
                    start = span.start,
                    end = span.end,
                    "range mapping produced no segments; span dropped for this pass"
                );
                dropped += 1;
                continue;
            };

            let mut wrappers = Vec::with_capacity(mapped.segments.len());
            for segment in &mapped.segments {
                wrappers.push(surface.wrap_text_range(
                    segment.node,
                    segment.start,
                    segment.end,
                    &spec.label,
                )?);
            }
            created += wrappers.len();
            // Wrapping splits text nodes; refresh the index before mapping
            // the next span.
            index = TextNodeIndex::build(surface, root);

            self.entries.insert(
                key,
                HighlightEntry {
                    span: span.clone(),
                    wrappers,
                },
            );
            claimed.push(span.start..span.end);
        }

        self.last_fingerprint = Some(fingerprint.to_string());
        self.failed_fingerprint = None;
        self.retry = None;
        Ok(RenderOutcome::Rendered {
            created,
            removed,
            dropped,
        })
    }

    fn dissolve(&self, surface: &mut TextSurface, entry: &HighlightEntry) -> Result<usize> {
        let mut removed = 0;
        for wrapper in &entry.wrappers {
            if surface.is_attached(*wrapper) {
                surface.unwrap(*wrapper)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Composite signature of the display text and the ordered span
    /// identities/boundaries, used to skip redundant passes
    fn fingerprint(text: &str, spans: &[Span]) -> String {
        let mut fingerprint = signature(text);
        for span in spans {
            match &span.id {
                Some(id) => {
                    let _ = write!(
                        fingerprint,
                        "|{id}@{}-{}:{}",
                        span.start, span.end, span.category
                    );
                }
                None => {
                    let _ = write!(fingerprint, "|{}-{}:{}", span.start, span.end, span.category);
                }
            }
        }
        fingerprint
    }
}

/// Normalization-tolerant comparison: case- and whitespace-insensitive,
/// accepting substring containment in either direction
fn lenient_match(live: &str, quote: &str) -> bool {
    let live = normalize(live);
    let quote = normalize(quote);
    if live.is_empty() || quote.is_empty() {
        return false;
    }
    live.contains(&quote) || quote.contains(&live)
}
