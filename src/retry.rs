use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::Feature;
use crate::transport::{FeatureTransport, TransportError};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_timeout: Duration,
    pub max_timeout: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_timeout: Duration::from_secs(30),
            max_timeout: Duration::from_secs(120),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Request timeout for a zero-based attempt.
    pub fn timeout_for(&self, attempt: u32) -> Duration {
        self.base_timeout
            .saturating_mul(pow2(attempt))
            .min(self.max_timeout)
    }

    /// Backoff before retry number `attempt` (1-based), jitter excluded.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.base_delay
            .saturating_mul(pow2(attempt - 1))
            .min(self.max_delay)
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.backoff_delay(attempt);
        let jitter = random_up_to(self.jitter);
        (base + jitter).min(self.max_delay)
    }
}

fn pow2(exp: u32) -> u32 {
    1u32.checked_shl(exp).unwrap_or(u32::MAX)
}

pub(crate) fn random_up_to(bound: Duration) -> Duration {
    if bound.is_zero() {
        return Duration::ZERO;
    }
    let secs = rand::thread_rng().gen_range(0.0..=bound.as_secs_f64());
    Duration::from_secs_f64(secs)
}

#[derive(Debug, Default)]
pub struct ApiStats {
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    timeout_errors: AtomicU64,
    connection_errors: AtomicU64,
    http_errors: AtomicU64,
    retry_attempts: AtomicU64,
}

impl ApiStats {
    pub fn snapshot(&self) -> ApiStatsSnapshot {
        ApiStatsSnapshot {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            successful_calls: self.successful_calls.load(Ordering::Relaxed),
            timeout_errors: self.timeout_errors.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            http_errors: self.http_errors.load(Ordering::Relaxed),
            retry_attempts: self.retry_attempts.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ApiStatsSnapshot {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub timeout_errors: u64,
    pub connection_errors: u64,
    pub http_errors: u64,
    pub retry_attempts: u64,
}

impl ApiStatsSnapshot {
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.successful_calls as f64 / self.total_calls as f64 * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// HTTP 400; the query itself is wrong.
    BadRequest,
    /// 200 with a body that is not a JSON array of features.
    Payload { message: String },
    /// Every attempt hit a retryable condition; `last_status` is the final
    /// HTTP status seen, if the last attempt got a response.
    Exhausted {
        attempts: u32,
        last_status: Option<u16>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    pub success: bool,
    pub features: Vec<Feature>,
    pub failure: Option<FailureKind>,
}

impl CallOutcome {
    fn ok(features: Vec<Feature>) -> Self {
        Self {
            success: true,
            features,
            failure: None,
        }
    }

    fn failed(kind: FailureKind) -> Self {
        Self {
            success: false,
            features: Vec::new(),
            failure: Some(kind),
        }
    }
}

/// Retrying front of a [`FeatureTransport`]. Sole writer of its [`ApiStats`].
pub struct RetryClient<T: FeatureTransport> {
    transport: T,
    policy: RetryPolicy,
    stats: ApiStats,
}

impl<T: FeatureTransport> RetryClient<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            stats: ApiStats::default(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn stats(&self) -> &ApiStats {
        &self.stats
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn call(&self, endpoint: &str, query: &str) -> CallOutcome {
        let max_retries = self.policy.max_retries;
        let mut last_status = None;
        for attempt in 0..=max_retries {
            if attempt > 0 {
                let delay = self.policy.jittered_delay(attempt);
                warn!(
                    attempt,
                    max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "retrying request"
                );
                thread::sleep(delay);
                ApiStats::bump(&self.stats.retry_attempts);
            }

            let timeout = self.policy.timeout_for(attempt);
            ApiStats::bump(&self.stats.total_calls);
            debug!(attempt, timeout_s = timeout.as_secs_f64(), "sending request");

            match self.transport.get(endpoint, query, timeout) {
                Ok(response) if response.status == 200 => {
                    return match serde_json::from_str::<Vec<Feature>>(&response.body) {
                        Ok(features) => {
                            ApiStats::bump(&self.stats.successful_calls);
                            CallOutcome::ok(features)
                        }
                        Err(err) => {
                            warn!(error = %err, "unexpected payload shape");
                            CallOutcome::failed(FailureKind::Payload {
                                message: err.to_string(),
                            })
                        }
                    };
                }
                Ok(response) => {
                    ApiStats::bump(&self.stats.http_errors);
                    let status = response.status;
                    if status == 400 {
                        warn!(status, "bad request, not retrying");
                        return CallOutcome::failed(FailureKind::BadRequest);
                    }
                    last_status = Some(status);
                    warn!(status, "unsuccessful status");
                }
                Err(TransportError::Timeout) => {
                    last_status = None;
                    ApiStats::bump(&self.stats.timeout_errors);
                    warn!(timeout_s = timeout.as_secs_f64(), "request timed out");
                }
                Err(TransportError::Connect(message)) => {
                    last_status = None;
                    ApiStats::bump(&self.stats.connection_errors);
                    warn!(%message, "connection error");
                }
                Err(TransportError::Other(message)) => {
                    last_status = None;
                    warn!(%message, "transport error");
                }
            }
        }

        CallOutcome::failed(FailureKind::Exhausted {
            attempts: max_retries + 1,
            last_status,
        })
    }
}
