// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded exponential backoff for stream reconnects.

use std::time::Duration;

/// `min(base * 2^attempt, cap)`, saturating at `cap` on overflow.
pub fn reconnect_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    2u32.checked_pow(attempt)
        .and_then(|factor| base.checked_mul(factor))
        .unwrap_or(cap)
        .min(cap)
}

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self { base, cap, max_attempts, attempt: 0 }
    }

    /// Delay before the next reconnect, or `None` once `max_attempts`
    /// reconnects have been scheduled without a reset.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let delay = reconnect_delay(self.base, self.cap, self.attempt);
        self.attempt += 1;
        Some(delay)
    }

    /// Called after a successful open.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
