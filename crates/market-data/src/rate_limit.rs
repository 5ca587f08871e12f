use analysis_core::AnalysisError;
use chrono::{NaiveDate, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct LimiterState {
    timestamps: VecDeque<Instant>,
    day: NaiveDate,
    used_today: u32,
    last_call: Option<Instant>,
}

/// Sliding-window rate limiter: at most `max_requests` per `window`, plus an
/// optional per-day quota (UTC days) and a minimum spacing between calls.
/// A full window or a call that comes too soon makes the caller sleep; an
/// exhausted daily quota fails fast instead.
#[derive(Clone)]
pub struct RateLimiter {
    name: &'static str,
    state: Arc<Mutex<LimiterState>>,
    max_requests: usize,
    window: Duration,
    min_interval: Duration,
    daily_quota: Option<u32>,
}

impl RateLimiter {
    pub fn new(name: &'static str, max_requests: usize, window: Duration, daily_quota: Option<u32>) -> Self {
        Self {
            name,
            state: Arc::new(Mutex::new(LimiterState {
                timestamps: VecDeque::new(),
                day: Utc::now().date_naive(),
                used_today: 0,
                last_call: None,
            })),
            max_requests: max_requests.max(1),
            window,
            min_interval: Duration::ZERO,
            daily_quota,
        }
    }

    /// Require at least `min_interval` between the starts of two calls.
    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    /// Wait for a request slot.
    pub async fn acquire(&self) -> Result<(), AnalysisError> {
        loop {
            let mut state = self.state.lock().await;

            let today = Utc::now().date_naive();
            if state.day != today {
                state.day = today;
                state.used_today = 0;
            }

            if let Some(quota) = self.daily_quota {
                if state.used_today >= quota {
                    return Err(AnalysisError::QuotaExhausted(format!(
                        "{} allows {} requests per day",
                        self.name, quota
                    )));
                }
            }

            let now = Instant::now();
            while let Some(&front) = state.timestamps.front() {
                if now.duration_since(front) >= self.window {
                    state.timestamps.pop_front();
                } else {
                    break;
                }
            }

            let spacing = state
                .last_call
                .map(|last| (last + self.min_interval).saturating_duration_since(now))
                .unwrap_or(Duration::ZERO);

            if state.timestamps.len() < self.max_requests && spacing.is_zero() {
                state.timestamps.push_back(now);
                state.last_call = Some(now);
                state.used_today += 1;
                return Ok(());
            }

            let sleep_dur = if state.timestamps.len() < self.max_requests {
                spacing
            } else {
                // Wait until the oldest request falls out of the window
                let oldest = match state.timestamps.front() {
                    Some(&t) => t,
                    None => continue,
                };
                (oldest + self.window).saturating_duration_since(now).max(spacing) + Duration::from_millis(50)
            };
            drop(state);
            tracing::debug!("Rate limiter: waiting {:.2}s for {} slot", sleep_dur.as_secs_f64(), self.name);
            tokio::time::sleep(sleep_dur).await;
        }
    }

    /// Requests left today, if a daily quota is configured
    pub async fn remaining_today(&self) -> Option<u32> {
        let state = self.state.lock().await;
        let used = if state.day == Utc::now().date_naive() { state.used_today } else { 0 };
        self.daily_quota.map(|q| q.saturating_sub(used))
    }
}
