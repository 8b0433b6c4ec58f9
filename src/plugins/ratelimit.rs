//! Per-actor sliding-window rate limiter.
//!
//! Each actor owns a deque of execution timestamps (epoch millis) behind its
//! own mutex; the actor map sits behind an `RwLock` that is only taken for
//! writing when an actor is first seen or when empty windows are swept. A
//! timestamp counts while `ts + window > now`.
//!
//! Expired timestamps are dropped lazily on every touch of an actor, and actors
//! whose window has emptied are removed by [`RateLimiter::sweep_at`], which
//! also runs automatically every [`SWEEP_EVERY`] recordings.

use crate::core::config::RateLimitConfig;
use crate::core::time;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

pub const SWEEP_EVERY: u64 = 1024;

type Window = Arc<Mutex<VecDeque<u64>>>;

pub struct RateLimiter {
    window_ms: u64,
    max_requests: usize,
    actors: RwLock<FxHashMap<String, Window>>,
    recorded: AtomicU64,
}

fn lock_window(w: &Mutex<VecDeque<u64>>) -> MutexGuard<'_, VecDeque<u64>> {
    w.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            window_ms: window.as_millis() as u64,
            max_requests,
            actors: RwLock::new(FxHashMap::default()),
            recorded: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.window(), config.max_requests)
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    fn existing(&self, actor: &str) -> Option<Window> {
        self.actors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(actor)
            .cloned()
    }

    fn slot(&self, actor: &str) -> Window {
        if let Some(w) = self.existing(actor) {
            return w;
        }
        self.actors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(actor.to_string())
            .or_default()
            .clone()
    }

    fn prune(&self, hits: &mut VecDeque<u64>, now: u64) {
        while let Some(&oldest) = hits.front() {
            if oldest.saturating_add(self.window_ms) > now {
                break;
            }
            hits.pop_front();
        }
    }

    /// Whether `actor` may execute now. Does not consume budget.
    pub fn allow(&self, actor: &str) -> bool {
        self.allow_at(actor, time::now_millis())
    }

    pub fn allow_at(&self, actor: &str, now: u64) -> bool {
        match self.existing(actor) {
            None => self.max_requests > 0,
            Some(w) => {
                let mut hits = lock_window(&w);
                self.prune(&mut hits, now);
                hits.len() < self.max_requests
            }
        }
    }

    /// Consume one unit of budget for `actor`.
    pub fn record(&self, actor: &str) {
        self.record_at(actor, time::now_millis());
    }

    pub fn record_at(&self, actor: &str, now: u64) {
        {
            let w = self.slot(actor);
            let mut hits = lock_window(&w);
            self.prune(&mut hits, now);
            hits.push_back(now);
        }
        self.maybe_sweep(now);
    }

    /// Check and consume in one step under the actor's lock, so two
    /// concurrent callers for the same actor cannot both take the last slot.
    pub fn try_acquire(&self, actor: &str) -> bool {
        self.try_acquire_at(actor, time::now_millis())
    }

    pub fn try_acquire_at(&self, actor: &str, now: u64) -> bool {
        let granted = {
            let w = self.slot(actor);
            let mut hits = lock_window(&w);
            self.prune(&mut hits, now);
            if hits.len() < self.max_requests {
                hits.push_back(now);
                true
            } else {
                false
            }
        };
        if granted {
            self.maybe_sweep(now);
        } else {
            warn!(actor, limit = self.max_requests, window_ms = self.window_ms, "rate limit exceeded");
        }
        granted
    }

    pub fn remaining_at(&self, actor: &str, now: u64) -> usize {
        match self.existing(actor) {
            None => self.max_requests,
            Some(w) => {
                let mut hits = lock_window(&w);
                self.prune(&mut hits, now);
                self.max_requests.saturating_sub(hits.len())
            }
        }
    }

    /// Drop actors whose window is empty at `now`. Returns how many were removed.
    pub fn sweep_at(&self, now: u64) -> usize {
        let mut actors = self.actors.write().unwrap_or_else(PoisonError::into_inner);
        let before = actors.len();
        actors.retain(|_, w| {
            // In-flight callers still hold a clone; keep their window alive.
            if Arc::strong_count(w) > 1 {
                return true;
            }
            let mut hits = lock_window(w);
            self.prune(&mut hits, now);
            !hits.is_empty()
        });
        let removed = before - actors.len();
        if removed > 0 {
            debug!(removed, remaining = actors.len(), "swept idle rate-limit windows");
        }
        removed
    }

    pub fn tracked_actors(&self) -> usize {
        self.actors.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn maybe_sweep(&self, now: u64) {
        let n = self.recorded.fetch_add(1, Ordering::Relaxed) + 1;
        if n % SWEEP_EVERY == 0 {
            self.sweep_at(now);
        }
    }
}
