//! Sliding-window request gate
//!
//! The limiter knows nothing about what it gates. It enforces:
//! - At most `soft-limit` admissions in any rolling window
//! - A jittered minimum gap between consecutive admissions
//! - A cooldown after the remote side throttles us (HTTP 429)
//!
//! Admission decisions are serialized through an async mutex, so one limiter
//! can be shared by every worker in bounded-parallel mode.

use crate::config::RateLimitConfig;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep, sleep_until, Instant};

/// Timestamps of admissions inside the trailing window
#[derive(Debug, Default)]
struct RateWindow {
    admitted: VecDeque<Instant>,
    last: Option<Instant>,
}

impl RateWindow {
    /// Drops admissions that have left the window
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.admitted.front() {
            if now.duration_since(oldest) >= window {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
    }

    /// Time until the oldest admission leaves the window, if the window is full
    fn time_until_slot(&self, now: Instant, limit: usize, window: Duration) -> Option<Duration> {
        if self.admitted.len() < limit {
            return None;
        }
        self.admitted
            .front()
            .map(|&oldest| (oldest + window).saturating_duration_since(now))
    }

    fn record(&mut self, now: Instant) {
        self.admitted.push_back(now);
        self.last = Some(now);
    }
}

/// Request budget over a sliding time window
#[derive(Debug)]
pub struct RateLimiter {
    soft_limit: usize,
    window: Duration,
    min_spacing: Duration,
    max_spacing: Duration,
    cooldown: Duration,
    state: AsyncMutex<RateWindow>,
    cooldown_until: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            soft_limit: config.soft_limit.max(1),
            window: Duration::from_secs(config.window_secs),
            min_spacing: Duration::from_millis(config.min_spacing_ms),
            max_spacing: Duration::from_millis(config.max_spacing_ms.max(config.min_spacing_ms)),
            cooldown: Duration::from_secs(config.cooldown_secs),
            state: AsyncMutex::new(RateWindow::default()),
            cooldown_until: Mutex::new(None),
        }
    }

    /// Blocks until one more request fits the budget, then records it
    ///
    /// The new timestamp is recorded only after every wait has elapsed: an
    /// active cooldown, a full window, and the jittered spacing since the
    /// previous admission.
    pub async fn admit(&self) {
        let mut state = self.state.lock().await;
        let spacing = self.next_spacing();

        loop {
            let now = Instant::now();

            if let Some(until) = self.cooldown_deadline(now) {
                tracing::debug!(
                    "Cooling down for {:.1}s after throttling",
                    until.duration_since(now).as_secs_f64()
                );
                sleep_until(until).await;
                continue;
            }

            state.prune(now, self.window);
            if let Some(wait) = state.time_until_slot(now, self.soft_limit, self.window) {
                tracing::info!(
                    "Rate limit of {} requests per {}s reached, waiting {:.1}s",
                    self.soft_limit,
                    self.window.as_secs(),
                    wait.as_secs_f64()
                );
                sleep(wait).await;
                continue;
            }

            if let Some(last) = state.last {
                let ready = last + spacing;
                if ready > now {
                    tracing::trace!("Spacing requests by {:?}", spacing);
                    sleep_until(ready).await;
                    continue;
                }
            }

            state.record(now);
            return;
        }
    }

    /// Reports a hard rejection from the remote side
    ///
    /// Every admission blocks until the cooldown has elapsed. Repeated
    /// signals extend the cooldown from the latest one.
    pub fn cooldown(&self) {
        let until = Instant::now() + self.cooldown;
        let mut guard = self
            .cooldown_until
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(guard.map_or(until, |current| current.max(until)));
        tracing::warn!(
            "Remote side is throttling, pausing all requests for {}s",
            self.cooldown.as_secs()
        );
    }

    /// Whether a cooldown is currently in effect
    pub fn is_cooling_down(&self) -> bool {
        self.cooldown_deadline(Instant::now()).is_some()
    }

    fn cooldown_deadline(&self, now: Instant) -> Option<Instant> {
        let mut guard = self
            .cooldown_until
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match *guard {
            Some(until) if until > now => Some(until),
            Some(_) => {
                *guard = None;
                None
            }
            None => None,
        }
    }

    fn next_spacing(&self) -> Duration {
        if self.max_spacing <= self.min_spacing {
            return self.min_spacing;
        }
        let ms = rand::random_range(self.min_spacing.as_millis()..=self.max_spacing.as_millis());
        Duration::from_millis(ms as u64)
    }
}
