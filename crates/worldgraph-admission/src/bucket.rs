//! Token-bucket arithmetic.
//!
//! Pure functions of `(stored tokens, last refill, now)`; nothing here reads a
//! clock, so refill needs no timer.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    pub tokens: f64,
    /// Unix milliseconds of the last refill.
    pub last_refill_ms: i64,
}

impl BucketState {
    /// A bucket seen for the first time starts full.
    pub fn full(capacity: f64, now_ms: i64) -> Self {
        Self {
            tokens: capacity,
            last_refill_ms: now_ms,
        }
    }

    /// Add the tokens accrued since the last refill, capped at `capacity`.
    ///
    /// A clock that moved backwards accrues nothing and keeps the stored
    /// timestamp.
    pub fn refilled(self, capacity: f64, tokens_per_second: f64, now_ms: i64) -> Self {
        if now_ms <= self.last_refill_ms {
            return Self {
                tokens: self.tokens.min(capacity),
                last_refill_ms: self.last_refill_ms,
            };
        }
        let elapsed_secs = (now_ms - self.last_refill_ms) as f64 / 1000.0;
        Self {
            tokens: (self.tokens + elapsed_secs * tokens_per_second).min(capacity),
            last_refill_ms: now_ms,
        }
    }

    /// Take one token if a whole one is available.
    pub fn try_take(&mut self) -> bool {
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole tokens left.
    pub fn remaining(&self) -> u64 {
        self.tokens.max(0.0).floor() as u64
    }

    /// When the bucket is full again, in unix milliseconds. `None` if it never refills.
    pub fn full_at_ms(&self, capacity: f64, tokens_per_second: f64) -> Option<i64> {
        let missing = (capacity - self.tokens).max(0.0);
        if missing == 0.0 {
            return Some(self.last_refill_ms);
        }
        if tokens_per_second <= 0.0 {
            return None;
        }
        let wait_ms = (missing / tokens_per_second * 1000.0).ceil() as i64;
        Some(self.last_refill_ms.saturating_add(wait_ms))
    }
}
