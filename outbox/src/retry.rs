use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use rand::Rng;
use tower::{Layer, Service, ServiceExt};
use tracing::warn;

use crate::message::Message;
use crate::router::HandlerError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryPreset {
    #[default]
    Default,
    Aggressive,
    Conservative,
}

impl RetryPreset {
    /// Unknown names select [`RetryPreset::Default`].
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "aggressive" => Self::Aggressive,
            "conservative" => Self::Conservative,
            _ => Self::Default,
        }
    }
}

/// Exponential backoff applied to a failing handler before the message is
/// left for redelivery.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    pub max_elapsed_time: Duration,
    pub randomization_factor: f64,
}

impl RetryConfig {
    pub fn preset(preset: RetryPreset) -> Self {
        match preset {
            RetryPreset::Default => Self {
                max_retries: 3,
                initial_interval: Duration::from_millis(100),
                max_interval: Duration::from_secs(30),
                multiplier: 2.0,
                max_elapsed_time: Duration::from_secs(5 * 60),
                randomization_factor: 0.1,
            },
            RetryPreset::Aggressive => Self {
                max_retries: 5,
                initial_interval: Duration::from_millis(50),
                max_interval: Duration::from_secs(10),
                multiplier: 1.5,
                max_elapsed_time: Duration::from_secs(2 * 60),
                randomization_factor: 0.2,
            },
            RetryPreset::Conservative => Self {
                max_retries: 2,
                initial_interval: Duration::from_millis(500),
                max_interval: Duration::from_secs(60),
                multiplier: 3.0,
                max_elapsed_time: Duration::from_secs(10 * 60),
                randomization_factor: 0.05,
            },
        }
    }

    /// Un-jittered delay before retry number `attempt` (zero based).
    pub fn interval(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.initial_interval.as_secs_f64() * self.multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_interval.as_secs_f64() {
            return self.max_interval;
        }
        Duration::from_secs_f64(scaled)
    }

    /// [`RetryConfig::interval`] spread uniformly over
    /// `interval * (1 ± randomization_factor)`.
    pub fn jittered_interval(&self, attempt: u32) -> Duration {
        let base = self.interval(attempt);
        let factor = self.randomization_factor.clamp(0.0, 1.0);
        if factor == 0.0 {
            return base;
        }
        let spread = rand::thread_rng().gen_range(-factor..=factor);
        base.mul_f64(1.0 + spread)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::preset(RetryPreset::Default)
    }
}

/// A preset plus individually configured fields. Only positive values
/// override the preset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryOverrides {
    pub preset: RetryPreset,
    pub max_retries: Option<u32>,
    pub initial_interval: Option<Duration>,
    pub max_interval: Option<Duration>,
    pub multiplier: Option<f64>,
    pub max_elapsed_time: Option<Duration>,
    pub randomization_factor: Option<f64>,
}

impl RetryOverrides {
    pub fn resolve(&self) -> RetryConfig {
        let mut config = RetryConfig::preset(self.preset);
        if let Some(v) = self.max_retries.filter(|v| *v > 0) {
            config.max_retries = v;
        }
        if let Some(v) = self.initial_interval.filter(|v| !v.is_zero()) {
            config.initial_interval = v;
        }
        if let Some(v) = self.max_interval.filter(|v| !v.is_zero()) {
            config.max_interval = v;
        }
        if let Some(v) = self.multiplier.filter(|v| *v > 0.0) {
            config.multiplier = v;
        }
        if let Some(v) = self.max_elapsed_time.filter(|v| !v.is_zero()) {
            config.max_elapsed_time = v;
        }
        if let Some(v) = self.randomization_factor.filter(|v| *v > 0.0) {
            config.randomization_factor = v;
        }
        config
    }
}

#[derive(Clone)]
pub struct RetryLayer {
    config: Arc<RetryConfig>,
}

impl RetryLayer {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = Retry<S>;

    fn layer(&self, service: S) -> Self::Service {
        Retry {
            inner: service,
            config: self.config.clone(),
        }
    }
}

/// Re-invokes the inner handler on retryable errors until it succeeds, the
/// retry budget is spent, or the next delay would exceed `max_elapsed_time`.
#[derive(Clone)]
pub struct Retry<S> {
    inner: S,
    config: Arc<RetryConfig>,
}

impl<S> Service<Message> for Retry<S>
where
    S: Service<Message, Response = (), Error = HandlerError> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = ();
    type Error = HandlerError;
    type Future = BoxFuture<'static, Result<(), HandlerError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, message: Message) -> Self::Future {
        // Take the service that was driven to readiness, leave a clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let config = self.config.clone();

        Box::pin(async move {
            let started = Instant::now();
            let mut attempt = 0;
            let mut result = inner.call(message.clone()).await;

            loop {
                let err = match result {
                    Ok(()) => return Ok(()),
                    Err(err) if !err.is_retryable() => return Err(err),
                    Err(err) => err,
                };
                if attempt >= config.max_retries {
                    return Err(err);
                }
                let delay = config.jittered_interval(attempt);
                if started.elapsed() + delay > config.max_elapsed_time {
                    return Err(err);
                }

                attempt += 1;
                warn!(
                    uuid = %message.uuid,
                    topic = %message.topic,
                    attempt,
                    delay_ms = %delay.as_millis(),
                    error = %err,
                    "handler failed, retrying"
                );
                tokio::time::sleep(delay).await;

                result = match inner.ready().await {
                    Ok(service) => service.call(message.clone()).await,
                    Err(err) => Err(err),
                };
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tower::service_fn;

    use super::*;

    fn fast(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
            multiplier: 2.0,
            max_elapsed_time: Duration::from_secs(5),
            randomization_factor: 0.0,
        }
    }

    #[test]
    fn presets_match_documented_values() {
        let aggressive = RetryConfig::preset(RetryPreset::Aggressive);
        assert_eq!(aggressive.max_retries, 5);
        assert_eq!(aggressive.initial_interval, Duration::from_millis(50));

        let conservative = RetryConfig::preset(RetryPreset::Conservative);
        assert_eq!(conservative.max_retries, 2);
        assert_eq!(conservative.multiplier, 3.0);

        assert_eq!(RetryConfig::default().max_retries, 3);
    }

    #[test]
    fn unknown_preset_name_falls_back_to_default() {
        assert_eq!(RetryPreset::from_name("Aggressive"), RetryPreset::Aggressive);
        assert_eq!(RetryPreset::from_name("bogus"), RetryPreset::Default);
        assert_eq!(RetryPreset::from_name(""), RetryPreset::Default);
    }

    #[test]
    fn overrides_apply_only_positive_values() {
        let overrides = RetryOverrides {
            preset: RetryPreset::Conservative,
            max_retries: Some(7),
            initial_interval: Some(Duration::ZERO),
            multiplier: Some(-1.0),
            ..RetryOverrides::default()
        };

        let config = overrides.resolve();
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.initial_interval, Duration::from_millis(500));
        assert_eq!(config.multiplier, 3.0);
    }

    #[test]
    fn interval_grows_and_caps() {
        let config = RetryConfig::default();
        assert_eq!(config.interval(0), Duration::from_millis(100));
        assert_eq!(config.interval(1), Duration::from_millis(200));
        assert_eq!(config.interval(3), Duration::from_millis(800));
        assert_eq!(config.interval(20), Duration::from_secs(30));
        assert_eq!(config.interval(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_factor() {
        let config = RetryConfig::default();
        for _ in 0..100 {
            let delay = config.jittered_interval(1);
            assert!(delay >= Duration::from_millis(180), "{delay:?}");
            assert!(delay <= Duration::from_millis(220), "{delay:?}");
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let handler = service_fn(move |_: Message| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(HandlerError::failed("not yet"))
                } else {
                    Ok(())
                }
            }
        });

        let mut service = RetryLayer::new(fast(3)).layer(handler);
        let result = service
            .ready()
            .await
            .unwrap()
            .call(Message::new("t", vec![]))
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let handler = service_fn(move |_: Message| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(HandlerError::failed("always")) }
        });

        let mut service = RetryLayer::new(fast(2)).layer(handler);
        let result = service
            .ready()
            .await
            .unwrap()
            .call(Message::new("t", vec![]))
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_once_max_elapsed_time_would_be_exceeded() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let handler = service_fn(move |_: Message| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(HandlerError::failed("always")) }
        });

        let config = RetryConfig {
            max_retries: 1_000,
            initial_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(10),
            multiplier: 1.0,
            max_elapsed_time: Duration::from_millis(50),
            randomization_factor: 0.0,
        };
        let mut service = RetryLayer::new(config).layer(handler);
        let result = service
            .ready()
            .await
            .unwrap()
            .call(Message::new("t", vec![]))
            .await;

        assert!(result.is_err());
        // One call up front, then at most one per 10ms slept within 50ms.
        let calls = calls.load(Ordering::SeqCst);
        assert!((2..=6).contains(&calls), "{calls} calls");
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let handler = service_fn(move |_: Message| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(HandlerError::rejected("bad event")) }
        });

        let mut service = RetryLayer::new(fast(5)).layer(handler);
        let result = service
            .ready()
            .await
            .unwrap()
            .call(Message::new("t", vec![]))
            .await;

        assert!(matches!(result, Err(HandlerError::Rejected(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
