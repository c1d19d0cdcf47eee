//! In-process sliding-window rate limiter, keyed per user. Each key keeps
//! the timestamps of its hits inside the window.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub retry_after: Duration,
}

/// Keys whose every hit has aged out are dropped once per this many
/// acquisitions, so idle users do not pin map entries forever.
const SWEEP_EVERY: u32 = 256;

#[derive(Default)]
struct Inner {
    hits: HashMap<String, VecDeque<Instant>>,
    ops: u32,
}

pub struct SlidingWindowLimiter {
    window: Duration,
    inner: Mutex<Inner>,
}

impl SlidingWindowLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn per_minute() -> Self {
        Self::new(Duration::from_secs(60))
    }

    pub fn try_acquire(&self, key: &str, limit: u32) -> RateDecision {
        self.try_acquire_at(key, limit, Instant::now())
    }

    fn try_acquire_at(&self, key: &str, limit: u32, now: Instant) -> RateDecision {
        let mut inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        inner.ops += 1;
        if inner.ops >= SWEEP_EVERY {
            inner.ops = 0;
            let window = self.window;
            inner
                .hits
                .retain(|_, hits| hits.back().is_some_and(|last| *last + window > now));
        }

        let entry = inner.hits.entry(key.to_string()).or_default();

        while let Some(front) = entry.front() {
            if *front + self.window <= now {
                entry.pop_front();
            } else {
                break;
            }
        }

        if (entry.len() as u32) < limit {
            entry.push_back(now);
            RateDecision {
                allowed: true,
                limit,
                remaining: limit - entry.len() as u32,
                retry_after: Duration::ZERO,
            }
        } else {
            let retry_after = entry
                .front()
                .map(|front| (*front + self.window).saturating_duration_since(now))
                .unwrap_or(self.window);
            RateDecision {
                allowed: false,
                limit,
                remaining: 0,
                retry_after,
            }
        }
    }

    #[cfg(test)]
    fn key_count(&self) -> usize {
        self.inner.lock().unwrap().hits.len()
    }
}
