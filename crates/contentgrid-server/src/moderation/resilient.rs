//! Fail-open screening around a [`ModerationClient`].
//!
//! The pipeline is built from seatbelt layers, outermost first: overall
//! deadline, retry with exponential backoff, circuit breaker, per-attempt
//! timeout. The per-attempt timeout is bounded by what is left of the
//! overall budget, so a call cut off by the deadline still reaches the
//! breaker as a failure. A caller dropping the screening future is not
//! recorded. Anything short of a successful `isProfane: true` allows the text.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use layered::{DynamicService, DynamicServiceExt, Execute, Layer, Service};
use seatbelt::breaker::{Breaker, HalfOpenMode};
use seatbelt::retry::Retry;
use seatbelt::timeout::Timeout;
use seatbelt::{RecoveryInfo, ResilienceContext};
use tick::Clock;

use super::client::{HttpModerationClient, ModerationClient, ModerationError, ModerationVerdict};
use crate::config::ModerationConfig;

/// Slack for the outer deadline so the per-attempt timeout fires first.
const DEADLINE_GRACE: Duration = Duration::from_millis(100);

type Screened = Result<ModerationVerdict, ModerationError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationDecision {
    Allow,
    Blocked { matches: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// One screening call as it travels through the pipeline.
#[derive(Debug, Clone)]
struct ScreenRequest {
    text: Arc<str>,
    deadline: Instant,
}

#[derive(Clone)]
pub struct ResilientModeration {
    inner: Option<Arc<Guarded>>,
}

struct Guarded {
    service: DynamicService<ScreenRequest, Screened>,
    circuit: Arc<AtomicU8>,
    timeout: Duration,
}

impl ResilientModeration {
    /// Screening that allows everything without calling out.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Must be called inside a tokio runtime; the pipeline's clock is
    /// driven by it.
    pub fn new(client: Arc<dyn ModerationClient>, config: &ModerationConfig) -> Self {
        let timeout = Duration::from_millis(config.timeout_ms);
        let circuit = Arc::new(AtomicU8::new(CircuitState::Closed as u8));
        let clock = Clock::new_tokio();
        let context = ResilienceContext::new(&clock).name("moderation");

        let call = Execute::new(move |req: ScreenRequest| {
            let client = Arc::clone(&client);
            async move { client.check(&req.text).await }
        });

        let attempt_timeout = Timeout::layer("moderation_attempt", &context)
            .timeout(timeout)
            .timeout_override(|req: &ScreenRequest, _| {
                Some(req.deadline.saturating_duration_since(Instant::now()))
            })
            .timeout_error(|args| ModerationError::Timeout(args.timeout()));

        let breaker = Breaker::layer("moderation_breaker", &context)
            .recovery_with(|out: &Screened, _| match out {
                Ok(_) => RecoveryInfo::never(),
                Err(_) => RecoveryInfo::retry(),
            })
            .rejected_input_error(|_, _| ModerationError::CircuitOpen)
            .failure_threshold(config.failure_ratio as f32)
            .min_throughput(config.min_throughput)
            .sampling_duration(Duration::from_millis(config.sampling_window_ms))
            .break_duration(Duration::from_millis(config.break_duration_ms))
            .half_open_mode(HalfOpenMode::quick())
            .on_opened({
                let circuit = Arc::clone(&circuit);
                move |_, _| {
                    tracing::warn!("Moderation circuit opened");
                    circuit.store(CircuitState::Open as u8, Ordering::Relaxed);
                }
            })
            .on_probing({
                let circuit = Arc::clone(&circuit);
                move |_, _| circuit.store(CircuitState::HalfOpen as u8, Ordering::Relaxed)
            })
            .on_closed({
                let circuit = Arc::clone(&circuit);
                move |_, args| {
                    tracing::info!(open_ms = args.open_duration().as_millis() as u64, "Moderation circuit closed");
                    circuit.store(CircuitState::Closed as u8, Ordering::Relaxed);
                }
            });

        let retry = Retry::layer("moderation_retry", &context)
            .clone_input()
            .recovery_with(|out: &Screened, _| match out {
                Err(e) if e.is_transient() => RecoveryInfo::retry(),
                _ => RecoveryInfo::never(),
            })
            .max_retry_attempts(config.max_attempts.max(1) - 1)
            .base_delay(Duration::from_millis(config.backoff_base_ms))
            .use_jitter(false)
            .on_retry(|out, args| {
                if let Err(e) = out {
                    tracing::debug!(
                        delay_ms = args.retry_delay().as_millis() as u64,
                        error = %e,
                        "Retrying moderation call"
                    );
                }
            });

        let deadline = Timeout::layer("moderation_deadline", &context)
            .timeout(timeout + DEADLINE_GRACE)
            .timeout_error(|args| ModerationError::Timeout(args.timeout()));

        let service = deadline
            .layer(retry.layer(breaker.layer(attempt_timeout.layer(call))))
            .into_dynamic();

        Self {
            inner: Some(Arc::new(Guarded {
                service,
                circuit,
                timeout,
            })),
        }
    }

    /// HTTP client when enabled, [`ResilientModeration::disabled`] otherwise.
    pub fn from_config(config: &ModerationConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        Self::new(Arc::new(HttpModerationClient::new(&config.endpoint)), config)
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn circuit_state(&self) -> Option<CircuitState> {
        self.inner
            .as_ref()
            .map(|g| match g.circuit.load(Ordering::Relaxed) {
                s if s == CircuitState::Open as u8 => CircuitState::Open,
                s if s == CircuitState::HalfOpen as u8 => CircuitState::HalfOpen,
                _ => CircuitState::Closed,
            })
    }

    pub async fn screen(&self, text: &str) -> ModerationDecision {
        let Some(guarded) = &self.inner else {
            return ModerationDecision::Allow;
        };

        let request = ScreenRequest {
            text: Arc::from(text),
            deadline: Instant::now() + guarded.timeout,
        };
        match guarded.service.execute(request).await {
            Ok(verdict) if verdict.is_profane => {
                tracing::info!(matches = verdict.matches.len(), "Text rejected by moderation");
                ModerationDecision::Blocked {
                    matches: verdict.matches,
                }
            }
            Ok(_) => ModerationDecision::Allow,
            Err(e) => {
                tracing::warn!(error = %e, "Moderation unavailable, allowing text");
                ModerationDecision::Allow
            }
        }
    }
}
