//! Resilient access to a rate-limited remote endpoint
//!
//! A [`ResilientGateway`] wraps one remote read with a response cache,
//! minimum-interval pacing with random jitter, exponential-backoff retry
//! and a consecutive-failure circuit breaker. Each external data source
//! owns its own gateway; all mutable state sits behind a mutex that is
//! never held across an await point.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::clock::{Clock, ShutdownSignal, remaining, to_delta};
use crate::config::GatewayPolicyConfig;
use crate::error::{ChargerError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};

pub mod cache;
pub mod circuit;
pub mod retry;

pub use cache::{CacheEntry, ResponseCache, cache_key};
pub use circuit::{CircuitBreaker, CircuitState};
pub use retry::{RetryPolicy, with_retry};

/// Resolved resilience policy for one gateway
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayPolicy {
    pub min_interval: Duration,
    pub jitter_min: f64,
    pub jitter_max: f64,
    pub retry: RetryPolicy,
    pub max_consecutive_failures: u32,
    pub circuit_cooldown: Duration,
    pub max_retry_after: Duration,
}

impl From<&GatewayPolicyConfig> for GatewayPolicy {
    fn from(cfg: &GatewayPolicyConfig) -> Self {
        Self {
            min_interval: Duration::from_millis(cfg.min_interval_ms),
            jitter_min: cfg.jitter_min,
            jitter_max: cfg.jitter_max,
            retry: RetryPolicy {
                max_attempts: cfg.max_attempts,
                base_delay: Duration::from_millis(cfg.base_delay_ms),
                max_delay: Duration::from_millis(cfg.max_delay_ms),
            },
            max_consecutive_failures: cfg.max_consecutive_failures,
            circuit_cooldown: Duration::from_secs(cfg.circuit_cooldown_seconds),
            max_retry_after: Duration::from_secs(cfg.max_retry_after_seconds),
        }
    }
}

impl GatewayPolicy {
    /// Random spacing factor from the configured jitter range
    fn jitter_factor(&self) -> f64 {
        if self.jitter_min >= self.jitter_max {
            return self.jitter_min.max(0.0);
        }
        rand::thread_rng().gen_range(self.jitter_min..=self.jitter_max)
    }
}

/// Counters exposed for observability and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    pub network_calls: u64,
    pub cache_hits: u64,
    pub circuit_rejections: u64,
    pub failures: u64,
}

#[derive(Debug)]
struct GatewayState {
    cache: ResponseCache,
    circuit: CircuitBreaker,
    last_call: Option<DateTime<Utc>>,
    stats: GatewayStats,
}

/// Cache + pacing + retry + circuit breaker around one remote source
pub struct ResilientGateway {
    name: String,
    policy: GatewayPolicy,
    clock: Arc<dyn Clock>,
    shutdown: ShutdownSignal,
    state: Mutex<GatewayState>,
    logger: StructuredLogger,
}

impl ResilientGateway {
    pub fn new(
        name: &str,
        policy: GatewayPolicy,
        clock: Arc<dyn Clock>,
        shutdown: ShutdownSignal,
    ) -> Self {
        let logger = get_logger_with_context(
            LogContext::new("gateway").with_field("source", name.to_string()),
        );
        let circuit = CircuitBreaker::new(policy.max_consecutive_failures, policy.circuit_cooldown);
        Self {
            name: name.to_string(),
            policy,
            clock,
            shutdown,
            state: Mutex::new(GatewayState {
                cache: ResponseCache::default(),
                circuit,
                last_call: None,
                stats: GatewayStats::default(),
            }),
            logger,
        }
    }

    pub fn stats(&self) -> GatewayStats {
        self.lock().stats
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.lock().circuit.state()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().circuit.consecutive_failures()
    }

    fn lock(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Perform one logical read.
    ///
    /// With `ttl` set, a cached value younger than `ttl` for the same
    /// `(endpoint, params)` is returned without touching the network.
    /// `operation` performs the request and parses the body; a parse
    /// failure must be reported as an error so it counts as a failure.
    pub async fn fetch<F, Fut>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
        ttl: Option<Duration>,
        operation: F,
    ) -> Result<Value>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<Value>> + Send,
    {
        self.fetch_with(endpoint, params, ttl, self.policy.retry, operation)
            .await
    }

    /// Like [`fetch`](Self::fetch) but with a single attempt.
    ///
    /// For reads that have a fallback endpoint: retrying here would spend
    /// the breaker's failure allowance before the fallback gets its turn.
    pub async fn fetch_without_retry<F, Fut>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
        ttl: Option<Duration>,
        operation: F,
    ) -> Result<Value>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<Value>> + Send,
    {
        let single = RetryPolicy {
            max_attempts: 1,
            ..self.policy.retry
        };
        self.fetch_with(endpoint, params, ttl, single, operation)
            .await
    }

    async fn fetch_with<F, Fut>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
        ttl: Option<Duration>,
        retry: RetryPolicy,
        operation: F,
    ) -> Result<Value>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<Value>> + Send,
    {
        let key = cache_key(endpoint, params);

        if let Some(ttl) = ttl {
            let now = self.clock.now();
            let hit = {
                let mut st = self.lock();
                let hit = st.cache.get(&key, ttl, now);
                if hit.is_some() {
                    st.stats.cache_hits += 1;
                }
                hit
            };
            if let Some(value) = hit {
                self.logger.debug(&format!("cache hit for {}", key));
                return Ok(value);
            }
        }

        with_retry(
            &retry,
            self.clock.as_ref(),
            &self.shutdown,
            ChargerError::is_retryable,
            |attempt| self.attempt(&key, ttl, attempt, &operation),
        )
        .await
    }

    async fn attempt<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        attempt: u32,
        operation: &F,
    ) -> Result<Value>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<Value>> + Send,
    {
        let now = self.clock.now();
        let wait = {
            let mut st = self.lock();
            if let Err(retry_after) = st.circuit.check(now) {
                st.stats.circuit_rejections += 1;
                drop(st);
                self.logger.debug(&format!(
                    "circuit open for {}; rejecting {} (retry in {}s)",
                    self.name,
                    key,
                    retry_after.as_secs()
                ));
                return Err(ChargerError::circuit_open(self.name.clone(), retry_after));
            }
            st.last_call.map(|last| {
                let spacing = self.policy.min_interval.mul_f64(self.policy.jitter_factor());
                remaining(last + to_delta(spacing), now)
            })
        };

        if let Some(wait) = wait.filter(|w| !w.is_zero()) {
            self.logger
                .debug(&format!("pacing {} for {}ms", key, wait.as_millis()));
            if !self.shutdown.sleep(self.clock.as_ref(), wait).await {
                return Err(ChargerError::Shutdown);
            }
        }

        {
            let mut st = self.lock();
            st.last_call = Some(self.clock.now());
            st.stats.network_calls += 1;
        }
        self.logger
            .trace(&format!("network call {} (attempt {})", key, attempt));
        let result = operation().await;
        let now = self.clock.now();

        match result {
            Ok(value) => {
                let mut st = self.lock();
                st.circuit.record_success();
                if ttl.is_some() {
                    st.cache.insert(key.to_string(), value.clone(), now);
                }
                Ok(value)
            }
            Err(ChargerError::Shutdown) => Err(ChargerError::Shutdown),
            Err(ChargerError::RateLimited { retry_after }) => {
                let capped = retry_after.min(self.policy.max_retry_after);
                self.record_failure(now);
                self.logger.warn(&format!(
                    "{} rate limited; backing off {}s",
                    key,
                    capped.as_secs()
                ));
                if !self.shutdown.sleep(self.clock.as_ref(), capped).await {
                    return Err(ChargerError::Shutdown);
                }
                Err(ChargerError::rate_limited(capped))
            }
            Err(err) => {
                if counts_against_circuit(&err) {
                    self.record_failure(now);
                }
                self.logger
                    .debug(&format!("{} failed on attempt {}: {}", key, attempt, err));
                Err(err)
            }
        }
    }

    fn record_failure(&self, now: DateTime<Utc>) {
        let opened = {
            let mut st = self.lock();
            st.stats.failures += 1;
            st.circuit.record_failure(now)
        };
        if opened {
            self.logger.warn(&format!(
                "circuit opened for {} after {} consecutive failures",
                self.name,
                self.consecutive_failures()
            ));
        }
    }
}

/// An asleep vehicle is an answer, not an endpoint failure
fn counts_against_circuit(err: &ChargerError) -> bool {
    !matches!(err, ChargerError::Unavailable { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> GatewayPolicy {
        GatewayPolicy {
            min_interval: Duration::from_secs(2),
            jitter_min: 1.0,
            jitter_max: 1.0,
            retry: RetryPolicy::default(),
            max_consecutive_failures: 3,
            circuit_cooldown: Duration::from_secs(300),
            max_retry_after: Duration::from_secs(60),
        }
    }

    fn gateway(clock: Arc<ManualClock>) -> ResilientGateway {
        ResilientGateway::new("test", policy(), clock, ShutdownSignal::never())
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ))
    }

    #[tokio::test]
    async fn pacing_spaces_consecutive_calls() {
        let clock = clock();
        let gw = gateway(clock.clone());
        gw.fetch("a", &[], None, || async { Ok(json!(1)) })
            .await
            .unwrap();
        clock.advance(Duration::from_millis(500));
        gw.fetch("a", &[], None, || async { Ok(json!(2)) })
            .await
            .unwrap();
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(1500)]);
        assert_eq!(gw.stats().network_calls, 2);
    }

    #[tokio::test]
    async fn rate_limit_sleeps_capped_retry_after() {
        let clock = clock();
        let gw = gateway(clock.clone());
        let calls = AtomicU32::new(0);
        let value = gw
            .fetch("v", &[], None, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ChargerError::rate_limited(Duration::from_secs(600)))
                    } else {
                        Ok(json!("ok"))
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(value, json!("ok"));
        // Retry-After capped at 60s, then 1s backoff, then 2s pacing is already satisfied
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(60), Duration::from_secs(1)]
        );
        assert_eq!(gw.consecutive_failures(), 0);
        assert_eq!(gw.stats().failures, 1);
    }

    #[tokio::test]
    async fn unavailable_does_not_trip_breaker() {
        let clock = clock();
        let gw = gateway(clock);
        for _ in 0..5 {
            let _ = gw
                .fetch("v", &[], None, || async {
                    Err(ChargerError::unavailable("asleep"))
                })
                .await;
        }
        assert_eq!(gw.circuit_state(), CircuitState::Closed);
    }
}
