use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use driftwatch_core::{Completion, CompletionOptions, GatewayError, ModelProvider};
use parking_lot::RwLock;
use rand::Rng;
use tracing::{info, warn};

/// Retry and circuit breaker tuning for [`ReliableProvider`].
#[derive(Clone, Debug)]
pub struct ReliableConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(20),
            jitter_factor: 0.2,
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

/// Wraps a [`ModelProvider`] with retry and a circuit breaker.
///
/// - Retryable errors back off exponentially with jitter, honouring `retry_after`
/// - Fatal and operational errors (auth, bad request, timeout) return immediately
/// - N consecutive failed calls open the circuit; after the cooldown one trial
///   call is let through (half-open) and a success closes it again
pub struct ReliableProvider<P: ModelProvider> {
    inner: P,
    config: ReliableConfig,
    circuit_state: RwLock<CircuitState>,
    consecutive_failures: AtomicU32,
    total_retries: AtomicU64,
}

impl<P: ModelProvider> ReliableProvider<P> {
    pub fn new(inner: P, config: ReliableConfig) -> Self {
        Self {
            inner,
            config,
            circuit_state: RwLock::new(CircuitState::Closed),
            consecutive_failures: AtomicU32::new(0),
            total_retries: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: P) -> Self {
        Self::new(inner, ReliableConfig::default())
    }

    fn check_circuit(&self) -> Result<(), GatewayError> {
        let state = self.circuit_state.read();
        match &*state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open { since } => {
                if since.elapsed() >= self.config.circuit_breaker_cooldown {
                    drop(state);
                    *self.circuit_state.write() = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    Err(GatewayError::ProviderOverloaded)
                }
            }
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let mut state = self.circuit_state.write();
        if *state != CircuitState::Closed {
            info!(model_id = %self.inner.model(), "circuit breaker closed");
            *state = CircuitState::Closed;
        }
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        let mut state = self.circuit_state.write();
        let trip = match *state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => failures >= self.config.circuit_breaker_threshold,
            CircuitState::Open { .. } => false,
        };
        if trip {
            warn!(
                model_id = %self.inner.model(),
                failures,
                cooldown_secs = self.config.circuit_breaker_cooldown.as_secs(),
                "circuit breaker opened"
            );
            *state = CircuitState::Open {
                since: Instant::now(),
            };
        }
    }

    /// Exponential backoff with symmetric jitter; a server hint wins.
    fn retry_delay(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        if let Some(delay) = suggested {
            return delay.min(self.config.max_delay);
        }

        let exp_ms = self.config.base_delay.as_millis() as f64 * 2.0_f64.powi(attempt as i32);
        let capped = exp_ms.min(self.config.max_delay.as_millis() as f64);

        let spread = capped * self.config.jitter_factor;
        let jitter = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        Duration::from_millis((capped + jitter).max(1.0) as u64)
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    pub fn circuit_state_name(&self) -> &'static str {
        match &*self.circuit_state.read() {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[async_trait]
impl<P: ModelProvider> ModelProvider for ReliableProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<Completion, GatewayError> {
        self.check_circuit()?;

        let mut attempt = 0;
        loop {
            match self.inner.complete(prompt, options).await {
                Ok(completion) => {
                    self.record_success();
                    return Ok(completion);
                }
                Err(e) if !e.is_retryable() || attempt >= self.config.max_retries => {
                    self.record_failure();
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.retry_delay(attempt, e.suggested_delay());
                    let _ = self.total_retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        model_id = %self.inner.model(),
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error_kind = e.error_kind(),
                        error = %e,
                        "retrying model call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    self.check_circuit()?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockProvider, MockResponse};

    fn fast(max_retries: u32) -> ReliableConfig {
        ReliableConfig {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..Default::default()
        }
    }

    fn server_error() -> MockResponse {
        MockResponse::Error(GatewayError::ServerError {
            status: 500,
            body: "internal".into(),
        })
    }

    #[tokio::test]
    async fn success_on_first_try() {
        let reliable =
            ReliableProvider::with_defaults(MockProvider::new(vec![MockResponse::text("ok")]));
        let out = reliable.complete("p", &CompletionOptions::default()).await.unwrap();
        assert_eq!(out.text, "ok");
        assert_eq!(reliable.total_retries(), 0);
    }

    #[tokio::test]
    async fn retries_retryable_errors() {
        let mock = MockProvider::new(vec![
            server_error(),
            server_error(),
            MockResponse::text("recovered"),
        ]);
        let reliable = ReliableProvider::new(mock, fast(3));
        let out = reliable.complete("p", &CompletionOptions::default()).await.unwrap();
        assert_eq!(out.text, "recovered");
        assert_eq!(reliable.total_retries(), 2);
    }

    #[tokio::test]
    async fn fatal_error_not_retried() {
        let mock = MockProvider::new(vec![
            MockResponse::Error(GatewayError::AuthenticationFailed("bad key".into())),
            MockResponse::text("unreachable"),
        ]);
        let reliable = ReliableProvider::new(mock, fast(3));
        let err = reliable.complete("p", &CompletionOptions::default()).await.unwrap_err();
        assert!(matches!(err, GatewayError::AuthenticationFailed(_)));
        assert_eq!(reliable.total_retries(), 0);
    }

    #[tokio::test]
    async fn timeout_not_retried() {
        let mock = MockProvider::new(vec![
            MockResponse::Error(GatewayError::Timeout(Duration::from_secs(120))),
            MockResponse::text("unreachable"),
        ]);
        let reliable = ReliableProvider::new(mock, fast(3));
        assert!(reliable.complete("p", &CompletionOptions::default()).await.is_err());
        assert_eq!(reliable.total_retries(), 0);
    }

    #[tokio::test]
    async fn max_retries_exhausted() {
        let mock = MockProvider::new(vec![server_error(), server_error(), server_error()]);
        let reliable = ReliableProvider::new(mock, fast(2));
        let err = reliable.complete("p", &CompletionOptions::default()).await.unwrap_err();
        assert!(matches!(err, GatewayError::ServerError { status: 500, .. }));
        assert_eq!(reliable.total_retries(), 2);
    }

    #[tokio::test]
    async fn circuit_breaker_trips_and_recovers() {
        let mock = MockProvider::new(vec![
            server_error(),
            server_error(),
            server_error(),
            MockResponse::text("recovered"),
        ]);
        let config = ReliableConfig {
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown: Duration::from_millis(40),
            ..fast(0)
        };
        let reliable = ReliableProvider::new(mock, config);

        for _ in 0..3 {
            let _ = reliable.complete("p", &CompletionOptions::default()).await;
        }
        assert_eq!(reliable.circuit_state_name(), "open");

        let err = reliable.complete("p", &CompletionOptions::default()).await.unwrap_err();
        assert!(matches!(err, GatewayError::ProviderOverloaded));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let out = reliable.complete("p", &CompletionOptions::default()).await.unwrap();
        assert_eq!(out.text, "recovered");
        assert_eq!(reliable.circuit_state_name(), "closed");
    }

    #[test]
    fn retry_delay_backoff_and_cap() {
        let config = ReliableConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            jitter_factor: 0.0,
            ..Default::default()
        };
        let reliable = ReliableProvider::new(MockProvider::new(vec![]), config);
        assert_eq!(reliable.retry_delay(0, None), Duration::from_millis(100));
        assert_eq!(reliable.retry_delay(1, None), Duration::from_millis(200));
        assert_eq!(reliable.retry_delay(2, None), Duration::from_millis(350));
        assert_eq!(
            reliable.retry_delay(0, Some(Duration::from_millis(250))),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn jitter_stays_in_band() {
        let config = ReliableConfig {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(10),
            jitter_factor: 0.2,
            ..Default::default()
        };
        let reliable = ReliableProvider::new(MockProvider::new(vec![]), config);
        for _ in 0..50 {
            let ms = reliable.retry_delay(0, None).as_millis();
            assert!((800..=1200).contains(&ms), "delay {ms} out of band");
        }
    }

    #[test]
    fn delegates_identity() {
        let reliable =
            ReliableProvider::with_defaults(MockProvider::named("openai", "gpt-4o", vec![]));
        assert_eq!(reliable.name(), "openai");
        assert_eq!(reliable.model(), "gpt-4o");
    }
}
