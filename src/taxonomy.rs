//! Category taxonomy validation boundary
//!
//! The taxonomy itself (labels, colors, descriptions) lives outside this
//! crate; all the labeling pipeline needs is pass/fail validation and
//! legacy-alias resolution to canonical identifiers.

use std::collections::{HashMap, HashSet};

/// Validation boundary for category identifiers
pub trait TaxonomyProvider: Send + Sync {
    /// Whether `id` names a canonical category
    fn is_valid_category(&self, id: &str) -> bool;

    /// Resolve an identifier (canonical or legacy alias) to its canonical
    /// form. Returns `None` for identifiers the taxonomy does not know.
    fn resolve(&self, id: &str) -> Option<String>;
}

/// Fixed taxonomy backed by an in-memory category set and alias table
#[derive(Debug, Clone, Default)]
pub struct StaticTaxonomy {
    categories: HashSet<String>,
    aliases: HashMap<String, String>,
}

impl StaticTaxonomy {
    /// Create a taxonomy from canonical category identifiers
    pub fn new<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            categories: categories.into_iter().map(Into::into).collect(),
            aliases: HashMap::new(),
        }
    }

    /// Register a legacy identifier that resolves to `canonical`
    pub fn with_alias(mut self, legacy: impl Into<String>, canonical: impl Into<String>) -> Self {
        self.aliases.insert(legacy.into(), canonical.into());
        self
    }

    /// Number of canonical categories
    pub fn len(&self) -> usize {
        self.categories.len()
    }

    /// Whether the taxonomy has no categories
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

impl TaxonomyProvider for StaticTaxonomy {
    fn is_valid_category(&self, id: &str) -> bool {
        self.categories.contains(id)
    }

    fn resolve(&self, id: &str) -> Option<String> {
        if self.categories.contains(id) {
            return Some(id.to_string());
        }
        self.aliases
            .get(id)
            .filter(|canonical| self.categories.contains(*canonical))
            .cloned()
    }
}

/// Permissive taxonomy that accepts every identifier as canonical
///
/// Useful as a default when the host has not wired a real taxonomy yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenTaxonomy;

impl TaxonomyProvider for OpenTaxonomy {
    fn is_valid_category(&self, _id: &str) -> bool {
        true
    }

    fn resolve(&self, id: &str) -> Option<String> {
        Some(id.to_string())
    }
}
