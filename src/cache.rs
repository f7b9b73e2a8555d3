//! Signature computation and label-result caching
//!
//! Identity for a labeling request is the signature of its normalized text
//! combined with a deterministic serialization of the request parameters.
//! Entries are immutable once written (overwritten wholesale, never patched),
//! so concurrent readers always see a consistent result.

use crate::classifier::{LabelingPayload, ResponseMeta};
use crate::span::Span;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::RwLock;
use std::time::{Duration, Instant};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Normalize text for identity purposes: trim, case-fold, collapse whitespace
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Signature of a text: FNV-1a over the normalized form, as fixed-width hex
pub fn signature(text: &str) -> String {
    let normalized = normalize(text);
    let mut hash = FNV_OFFSET_BASIS;
    for byte in normalized.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    format!("{hash:016x}")
}

/// Bounded signature memoization keyed by the raw input text
///
/// Re-signing an unchanged buffer between keystrokes is the common case;
/// the memo makes it a lookup instead of a renormalization.
pub struct SignatureCache {
    memo: RwLock<LruCache<String, String>>,
}

impl SignatureCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            memo: RwLock::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).unwrap(),
            )),
        }
    }

    /// Memoized [`signature`]
    pub fn signature(&self, text: &str) -> String {
        if let Ok(mut memo) = self.memo.write() {
            if let Some(sig) = memo.get(text) {
                return sig.clone();
            }
            let sig = signature(text);
            memo.put(text.to_string(), sig.clone());
            sig
        } else {
            signature(text)
        }
    }
}

/// Cached labeling result
///
/// Owned by the cache; callers receive clones and can never mutate a stored
/// entry in place.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Validated spans from the original resolution
    pub spans: Vec<Span>,

    /// Response metadata from the original resolution
    pub meta: ResponseMeta,

    /// Signature of the payload text
    pub signature: String,

    /// Caller-scoped cache identifier, if any
    pub cache_id: Option<String>,

    /// When this entry was written
    pub cached_at: Instant,
}

impl CacheEntry {
    /// Age of the entry, reported with stale fallbacks
    pub fn age(&self) -> Duration {
        self.cached_at.elapsed()
    }
}

/// Bounded cache of labeling results keyed by payload identity
///
/// Constructed explicitly and injected into the orchestrator; there is no
/// module-level singleton, so tests and independent consumers get their own
/// instances.
pub struct LabelCache {
    entries: RwLock<LruCache<String, CacheEntry>>,
    signatures: SignatureCache,
}

impl LabelCache {
    pub fn new(capacity: usize, signature_memo_capacity: usize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).unwrap(),
            )),
            signatures: SignatureCache::new(signature_memo_capacity),
        }
    }

    /// Memoized signature of `text`
    pub fn signature(&self, text: &str) -> String {
        self.signatures.signature(text)
    }

    fn entry_key(&self, payload: &LabelingPayload) -> String {
        format!("{}|{}", self.signature(&payload.text), payload.parameter_key())
    }

    /// Look up a prior result for this payload; never fails
    pub fn get(&self, payload: &LabelingPayload) -> Option<CacheEntry> {
        let key = self.entry_key(payload);
        let mut entries = self.entries.write().ok()?;
        entries.get(&key).cloned()
    }

    /// Store a result for this payload, overwriting any previous entry
    pub fn set(&self, payload: &LabelingPayload, spans: Vec<Span>, meta: ResponseMeta) {
        let signature = self.signature(&payload.text);
        let key = format!("{}|{}", signature, payload.parameter_key());
        let entry = CacheEntry {
            spans,
            meta,
            signature,
            cache_id: payload.cache_id.clone(),
            cached_at: Instant::now(),
        };
        if let Ok(mut entries) = self.entries.write() {
            entries.put(key, entry);
        }
    }

    /// Drop every entry
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    /// Current cache statistics
    pub fn stats(&self) -> CacheStats {
        if let Ok(entries) = self.entries.read() {
            CacheStats {
                size: entries.len(),
                capacity: entries.cap().get(),
            }
        } else {
            CacheStats {
                size: 0,
                capacity: 0,
            }
        }
    }
}

impl Default for LabelCache {
    fn default() -> Self {
        Self::new(128, 64)
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    /// Current number of entries
    pub size: usize,

    /// Maximum capacity
    pub capacity: usize,
}

impl CacheStats {
    /// Fill ratio (size / capacity)
    pub fn utilization(&self) -> f32 {
        if self.capacity == 0 {
            0.0
        } else {
            self.size as f32 / self.capacity as f32
        }
    }
}
