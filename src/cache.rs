use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::filters::FilterOptionSet;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for deterministic expiry tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("manual clock poisoned");
        *now += by;
    }

    /// Jump to `at`.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().expect("manual clock poisoned") = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("manual clock poisoned")
    }
}

#[derive(Clone, Debug)]
struct CachedOptions {
    options: FilterOptionSet,
    stored_at: DateTime<Utc>,
}

/// Time-bounded cache of the unfiltered option set.
///
/// Only complete option sets computed under an empty predicate context
/// belong here; callers decide that before calling [`OptionCache::store`].
#[derive(Clone, Debug)]
pub struct OptionCache {
    ttl: Duration,
    entry: Option<CachedOptions>,
}

impl OptionCache {
    /// Empty cache whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entry: None }
    }

    /// Cached option set if it was stored less than `ttl` before `now`.
    pub fn get(&self, now: DateTime<Utc>) -> Option<&FilterOptionSet> {
        let entry = self.entry.as_ref()?;
        let age = now.signed_duration_since(entry.stored_at);
        if age < Duration::zero() || age >= self.ttl {
            debug!(age_secs = age.num_seconds(), "option cache entry expired");
            return None;
        }
        Some(&entry.options)
    }

    /// Replace the cached set.
    pub fn store(&mut self, options: FilterOptionSet, now: DateTime<Utc>) {
        self.entry = Some(CachedOptions {
            options,
            stored_at: now,
        });
    }

    /// Drop the cached set.
    pub fn invalidate(&mut self) {
        if self.entry.take().is_some() {
            debug!("option cache invalidated");
        }
    }
}
