//! Endpoint health tracking.
//!
//! Keeps per-(chain, endpoint) error and throttling state and picks the
//! endpoint to use for the next request. State is rebuilt on process start.

use std::time::Instant;

use dashmap::DashMap;

use crate::config::HealthConfig;
use crate::ChainId;

/// Health state of a single endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointHealth {
    /// Errors since the last success.
    pub consecutive_errors: u32,

    /// Time of the last recorded error.
    pub last_error_at: Option<Instant>,

    /// Endpoint is skipped until this instant.
    pub rate_limited_until: Option<Instant>,

    /// Time the endpoint was last selected.
    pub last_used_at: Option<Instant>,
}

impl EndpointHealth {
    /// Returns true if the endpoint is inside a rate-limit cooldown.
    #[must_use]
    pub fn is_rate_limited(&self, now: Instant) -> bool {
        self.rate_limited_until.is_some_and(|until| now < until)
    }

    /// Returns true if the endpoint may be used.
    ///
    /// An endpoint over the error threshold recovers on its own once the
    /// recovery delay has passed since its last error.
    #[must_use]
    pub fn is_healthy(&self, config: &HealthConfig, now: Instant) -> bool {
        if self.is_rate_limited(now) {
            return false;
        }

        if self.consecutive_errors < config.max_consecutive_errors {
            return true;
        }

        match self.last_error_at {
            Some(at) => now.saturating_duration_since(at) >= config.error_recovery_delay(),
            None => true,
        }
    }
}

/// Tracks health of every configured endpoint.
///
/// Each update touches a single `(chain, url)` entry, so concurrent chain
/// tasks never contend on a shared lock.
#[derive(Debug)]
pub struct EndpointHealthTracker {
    config: HealthConfig,
    endpoints: DashMap<(ChainId, String), EndpointHealth>,
}

impl EndpointHealthTracker {
    /// Creates a new tracker.
    #[must_use]
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            endpoints: DashMap::new(),
        }
    }

    /// Returns the health configuration.
    #[must_use]
    pub const fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Returns a copy of an endpoint's state.
    #[must_use]
    pub fn health(&self, chain: ChainId, url: &str) -> EndpointHealth {
        self.endpoints
            .get(&(chain, url.to_string()))
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Returns true if the endpoint is currently healthy.
    #[must_use]
    pub fn is_healthy(&self, chain: ChainId, url: &str) -> bool {
        self.is_healthy_at(chain, url, Instant::now())
    }

    /// Returns true if the endpoint is healthy at `now`.
    #[must_use]
    pub fn is_healthy_at(&self, chain: ChainId, url: &str, now: Instant) -> bool {
        self.health(chain, url).is_healthy(&self.config, now)
    }

    /// Selects the endpoint for the next request.
    ///
    /// Returns the index into `urls` of the least-recently-used healthy
    /// endpoint. If none is healthy, the least-recently-used endpoint
    /// overall is returned. Returns `None` only for an empty list.
    #[must_use]
    pub fn select(&self, chain: ChainId, urls: &[String]) -> Option<usize> {
        self.select_at(chain, urls, Instant::now())
    }

    /// Selects the endpoint for the next request at `now`.
    #[must_use]
    pub fn select_at(&self, chain: ChainId, urls: &[String], now: Instant) -> Option<usize> {
        let states = self.snapshot(chain, urls);

        least_recently_used(
            states
                .iter()
                .enumerate()
                .filter(|(_, state)| state.is_healthy(&self.config, now)),
        )
        .or_else(|| least_recently_used(states.iter().enumerate()))
    }

    /// Selects a healthy endpoint other than `exclude`.
    #[must_use]
    pub fn select_alternate(
        &self,
        chain: ChainId,
        urls: &[String],
        exclude: usize,
    ) -> Option<usize> {
        self.select_alternate_at(chain, urls, exclude, Instant::now())
    }

    /// Selects a healthy endpoint other than `exclude` at `now`.
    #[must_use]
    pub fn select_alternate_at(
        &self,
        chain: ChainId,
        urls: &[String],
        exclude: usize,
        now: Instant,
    ) -> Option<usize> {
        let states = self.snapshot(chain, urls);

        least_recently_used(
            states
                .iter()
                .enumerate()
                .filter(|(i, state)| *i != exclude && state.is_healthy(&self.config, now)),
        )
    }

    /// Returns the index of the endpoint used most recently, if any was used.
    #[must_use]
    pub fn most_recently_used(&self, chain: ChainId, urls: &[String]) -> Option<usize> {
        self.snapshot(chain, urls)
            .iter()
            .enumerate()
            .filter_map(|(i, state)| state.last_used_at.map(|at| (i, at)))
            .max_by_key(|(_, at)| *at)
            .map(|(i, _)| i)
    }

    /// Marks an endpoint as selected.
    pub fn mark_used(&self, chain: ChainId, url: &str) {
        self.mark_used_at(chain, url, Instant::now());
    }

    /// Marks an endpoint as selected at `now`.
    pub fn mark_used_at(&self, chain: ChainId, url: &str, now: Instant) {
        self.endpoints
            .entry((chain, url.to_string()))
            .or_default()
            .last_used_at = Some(now);
    }

    /// Records a successful request.
    pub fn record_success(&self, chain: ChainId, url: &str) {
        self.record_success_at(chain, url, Instant::now());
    }

    /// Records a successful request at `now`.
    pub fn record_success_at(&self, chain: ChainId, url: &str, now: Instant) {
        let mut entry = self.endpoints.entry((chain, url.to_string())).or_default();
        entry.consecutive_errors = 0;
        entry.rate_limited_until = None;
        entry.last_used_at = Some(now);
    }

    /// Records a non-throttling error.
    pub fn record_error(&self, chain: ChainId, url: &str) {
        self.record_error_at(chain, url, Instant::now());
    }

    /// Records a non-throttling error at `now`.
    pub fn record_error_at(&self, chain: ChainId, url: &str, now: Instant) {
        let mut entry = self.endpoints.entry((chain, url.to_string())).or_default();
        entry.consecutive_errors = entry.consecutive_errors.saturating_add(1);
        entry.last_error_at = Some(now);
    }

    /// Puts an endpoint into rate-limit cooldown.
    pub fn mark_rate_limited(&self, chain: ChainId, url: &str) {
        self.mark_rate_limited_at(chain, url, Instant::now());
    }

    /// Puts an endpoint into rate-limit cooldown starting at `now`.
    pub fn mark_rate_limited_at(&self, chain: ChainId, url: &str, now: Instant) {
        let until = now.checked_add(self.config.rate_limit_cooldown()).unwrap_or(now);
        let mut entry = self.endpoints.entry((chain, url.to_string())).or_default();
        entry.rate_limited_until = Some(until);
        entry.last_error_at = Some(now);
    }

    /// Clears the state of every endpoint of a chain.
    pub fn reset_chain(&self, chain: ChainId) {
        self.endpoints.retain(|(c, _), _| *c != chain);
    }

    fn snapshot(&self, chain: ChainId, urls: &[String]) -> Vec<EndpointHealth> {
        urls.iter().map(|url| self.health(chain, url)).collect()
    }
}

/// Never-used endpoints sort first; ties keep configuration order.
fn least_recently_used<'a>(
    candidates: impl Iterator<Item = (usize, &'a EndpointHealth)>,
) -> Option<usize> {
    candidates
        .min_by_key(|(i, state)| (state.last_used_at, *i))
        .map(|(i, _)| i)
}
