//! Configuration and settings for span labeling

use serde::{Deserialize, Serialize};

/// Main labeling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelingSettings {
    /// Enable labeling at startup
    pub enabled: bool,

    /// Scheduling settings (debounce, cancellation)
    pub scheduler: SchedulerSettings,

    /// Request parameters forwarded to the classifier
    pub request: RequestSettings,

    /// Cache sizing
    pub cache: CacheSettings,

    /// Highlight renderer settings
    pub renderer: RendererSettings,
}

impl Default for LabelingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            scheduler: SchedulerSettings::default(),
            request: RequestSettings::default(),
            cache: CacheSettings::default(),
            renderer: RendererSettings::default(),
        }
    }
}

/// Settings for request scheduling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Fixed debounce delay in milliseconds (0 executes immediately)
    pub debounce_ms: u64,

    /// Scale the debounce with text length instead of the fixed delay
    pub smart_debounce: bool,

    /// Lower bound for the smart debounce in milliseconds
    pub smart_min_ms: u64,

    /// Upper bound for the smart debounce in milliseconds
    pub smart_max_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 400,
            smart_debounce: true,
            smart_min_ms: 150,
            smart_max_ms: 1200,
        }
    }
}

/// Request parameters carried in every labeling payload
///
/// These travel to the classifier unchanged and participate in the cache key,
/// so two requests differing in any field are distinct cache entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestSettings {
    /// Maximum number of spans to accept per result
    pub max_spans: usize,

    /// Minimum confidence for a span to be kept (0.0-1.0)
    pub min_confidence: f32,

    /// Allow the classifier to return overlapping spans
    pub allow_overlap: bool,

    /// Word-count ceiling for non-technical spans
    pub non_technical_word_limit: usize,

    /// Prompt template revision used by the classifier
    pub template_version: String,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            max_spans: 24,
            min_confidence: 0.5,
            allow_overlap: false,
            non_technical_word_limit: 6,
            template_version: "v2".to_string(),
        }
    }
}

/// Cache sizing settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheSettings {
    /// Maximum number of cached label results
    pub capacity: usize,

    /// Maximum number of memoized text signatures
    pub signature_memo_capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: 128,
            signature_memo_capacity: 64,
        }
    }
}

/// Highlight renderer settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RendererSettings {
    /// Render retries allowed while the surface is mid-edit
    pub max_retries: u32,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self { max_retries: 2 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = LabelingSettings::default();
        assert!(settings.enabled);
        assert!(settings.scheduler.smart_debounce);
        assert_eq!(settings.renderer.max_retries, 2);
        assert!(settings.request.min_confidence > 0.0);
    }

    #[test]
    fn test_serialization() {
        let settings = LabelingSettings::default();
        let json = serde_json::to_string(&settings).unwrap();
        let deserialized: LabelingSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(settings.scheduler, deserialized.scheduler);
        assert_eq!(settings.request, deserialized.request);
    }
}
