//! Request scheduling: debounce, cancellation, and supersede tracking
//!
//! Users typing rapidly generate many labeling requests; only the most
//! recently scheduled one may mutate downstream state. Each request captures
//! a ticket at schedule time, and a resolution is applied only when the
//! ticket's id is still the latest issued *and* its version matches the
//! current counter. The id check defeats "superseded by a newer request";
//! the version check defeats "canceled mid-flight".

use crate::settings::SchedulerSettings;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Identity captured when a request is scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTicket {
    /// Unique id of this request
    pub id: Uuid,

    /// Version counter value at schedule time
    pub version: u64,
}

/// Tracks the latest request and guards pending work with a cancellation token
pub struct RequestScheduler {
    settings: RwLock<SchedulerSettings>,
    version: AtomicU64,
    latest: Mutex<Option<Uuid>>,
    cancel: Mutex<CancellationToken>,
}

impl RequestScheduler {
    pub fn new(settings: SchedulerSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
            version: AtomicU64::new(0),
            latest: Mutex::new(None),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Replace the scheduling settings
    pub fn update_settings(&self, settings: SchedulerSettings) {
        if let Ok(mut guard) = self.settings.write() {
            *guard = settings;
        }
    }

    /// Effective debounce delay for a text of `text_len` characters
    ///
    /// Fixed delay by default; with smart debounce, short texts wait less and
    /// long texts wait more, bounded in both directions.
    pub fn effective_debounce(&self, text_len: usize) -> Duration {
        let settings = self
            .settings
            .read()
            .map(|s| s.clone())
            .unwrap_or_default();
        let millis = if settings.smart_debounce {
            ((text_len as u64) / 3).clamp(settings.smart_min_ms, settings.smart_max_ms)
        } else {
            settings.debounce_ms
        };
        Duration::from_millis(millis)
    }

    /// Issue a ticket for a new request, superseding any previous one
    pub fn issue(&self) -> RequestTicket {
        let id = Uuid::new_v4();
        if let Ok(mut latest) = self.latest.lock() {
            *latest = Some(id);
        }
        RequestTicket {
            id,
            version: self.version.load(Ordering::SeqCst),
        }
    }

    /// Token guarding the currently scheduled work
    pub fn token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .map(|token| token.clone())
            .unwrap_or_default()
    }

    /// Cancel queued and in-flight work and bump the version counter
    ///
    /// Any ticket issued before this call can no longer apply its resolution,
    /// even if its future had already escaped the token race.
    pub fn cancel_pending(&self) {
        if let Ok(mut guard) = self.cancel.lock() {
            guard.cancel();
            *guard = CancellationToken::new();
        }
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    /// Whether a resolution for this ticket may still be applied
    pub fn is_current(&self, ticket: &RequestTicket) -> bool {
        let id_current = self
            .latest
            .lock()
            .map(|latest| *latest == Some(ticket.id))
            .unwrap_or(false);
        id_current && ticket.version == self.version.load(Ordering::SeqCst)
    }

    /// Current version counter value
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }
}

impl Default for RequestScheduler {
    fn default() -> Self {
        Self::new(SchedulerSettings::default())
    }
}
