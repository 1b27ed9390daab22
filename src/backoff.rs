// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Jittered verification delays and single-shot timers.
//!
//! Each data set re-verifies its root hash `idle_ms` plus a random jitter after
//! the last heartbeat. The jitter is `round(r^exponent * max_ms)` with `r`
//! uniform on `[0, 1)`, so larger exponents favour short delays and spread
//! clients out without a thundering herd.
//!
//! # Example
//!
//! ```
//! use hashtree_sync::backoff::delay_for_sample;
//! use hashtree_sync::Backoff;
//! use std::time::Duration;
//!
//! let backoff = Backoff { max_ms: 1000, exponent: 2.0 };
//! assert_eq!(delay_for_sample(500, &backoff, 0.5), Duration::from_millis(750));
//! assert_eq!(delay_for_sample(500, &backoff, 0.0), Duration::from_millis(500));
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::message::Backoff;

/// Delay before the next verification round, with fresh randomness.
pub fn jittered_delay(idle_ms: u64, backoff: &Backoff) -> Duration {
    delay_for_sample(idle_ms, backoff, rand::random::<f64>())
}

/// Delay for a given uniform sample in `[0, 1)`.
pub fn delay_for_sample(idle_ms: u64, backoff: &Backoff, sample: f64) -> Duration {
    let exponent = if backoff.exponent.is_finite() { backoff.exponent } else { 1.0 };
    let weight = sample.clamp(0.0, 1.0).powf(exponent);
    let jitter_ms = (weight * backoff.max_ms as f64).round() as u64;
    Duration::from_millis(idle_ms.saturating_add(jitter_ms))
}

/// A pending single-shot timer task.
///
/// Dropping the handle detaches the task; [`cancel`](Self::cancel) aborts it.
#[derive(Debug)]
pub struct TimerHandle {
    generation: u64,
    handle: JoinHandle<()>,
}

impl TimerHandle {
    /// Run `on_fire` after `delay` on the current tokio runtime.
    pub fn spawn<F>(generation: u64, delay: Duration, on_fire: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire.await;
        });
        Self { generation, handle }
    }

    /// Arming sequence number, to tell a fired timer from its replacement.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
