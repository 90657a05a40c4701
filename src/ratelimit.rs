//! Sliding-window rate limiting per client address.
//! Used by: state, server (middleware).

use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::state::AppState;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
        }
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<IpAddr, VecDeque<Instant>>,
    last_cleanup: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
            last_cleanup: Mutex::new(Instant::now()),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    pub fn allow(&self, addr: IpAddr) -> bool {
        self.allow_at(addr, Instant::now())
    }

    /// Admission check at an explicit instant. Timestamps at or before
    /// `now - window` are pruned first; the request is recorded only if
    /// admitted.
    pub fn allow_at(&self, addr: IpAddr, now: Instant) -> bool {
        self.maybe_cleanup(now);

        let mut window = self.windows.entry(addr).or_default();
        if let Some(cutoff) = now.checked_sub(self.config.window) {
            while window.front().is_some_and(|t| *t <= cutoff) {
                window.pop_front();
            }
        }

        if window.len() >= self.config.max_requests as usize {
            return false;
        }
        window.push_back(now);
        true
    }

    fn maybe_cleanup(&self, now: Instant) {
        {
            let mut last = self.last_cleanup.lock();
            if now.saturating_duration_since(*last) < CLEANUP_INTERVAL {
                return;
            }
            *last = now;
        }
        let window = self.config.window;
        self.windows
            .retain(|_, w| w.back().is_some_and(|t| now.saturating_duration_since(*t) < window));
    }

    pub fn tracked_addresses(&self) -> usize {
        self.windows.len()
    }
}

/// Runs ahead of authentication on every route; rejects by address alone.
pub async fn rate_limit(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Result<Response> {
    if !state.rate_limiter.allow(peer.ip()) {
        let config = state.rate_limiter.config();
        state.metrics.record_rate_limited();
        tracing::warn!(
            client = %peer.ip(),
            endpoint = %req.uri().path(),
            reason = "rate_limited",
            "request rejected"
        );
        return Err(Error::RateLimited {
            limit: config.max_requests,
            window_secs: config.window.as_secs(),
        });
    }
    Ok(next.run(req).await)
}
