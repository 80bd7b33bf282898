//! Circuit breaker implementation for resilience
//!
//! 三态熔断器：Closed → Open → HalfOpen → Closed/Open。
//! 状态与结果窗口位于同一把锁之后，所有状态迁移都经过这一个串行化点。
//! 每次迁移都会递增代号，迁移之前发放的调用许可回报的结果只计入窗口，不再触发迁移。
//! 锁内只做计数和状态更新，不跨越 `.await`，因此许可在 `Drop` 中也能同步回报。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use courier_config::{BreakerConfig, CircuitState};
use courier_domain::OutcomeKind;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::observability::MetricsCollector;
use crate::outcome_window::OutcomeWindow;

/// Circuit breaker statistics
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_rate: Option<f64>,
    pub sample_count: usize,
    pub slow_call_count: usize,
    pub short_circuit_count: u64,
    pub last_state_change: Instant,
}

/// 放行一次调用的许可，调用结束后通过 [`CallPermit::report`] 交回结果
///
/// 试探许可未回报就被丢弃时（调用方取消了调用）按失败记录，熔断器回到 Open 并重新计时。
/// 普通许可被丢弃时不记录任何结果。
#[derive(Debug)]
#[must_use = "the outcome of a permitted call must be reported"]
pub struct CallPermit {
    breaker: CircuitBreaker,
    generation: u64,
    trial: bool,
    reported: bool,
}

impl CallPermit {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Records the outcome of the permitted call and applies any resulting transition.
    pub fn report(mut self, kind: OutcomeKind) {
        self.reported = true;
        self.breaker.record(self.generation, self.trial, kind);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if self.reported || !self.trial {
            return;
        }
        warn!(
            breaker = %self.breaker.name,
            "Half-open trial call abandoned before completion, recording failure"
        );
        self.breaker
            .record(self.generation, self.trial, OutcomeKind::Failure);
    }
}

#[derive(Debug)]
pub enum Admission {
    Permitted(CallPermit),
    ShortCircuited,
}

impl Admission {
    pub fn is_short_circuited(&self) -> bool {
        matches!(self, Admission::ShortCircuited)
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    window: OutcomeWindow,
    generation: u64,
    opened_at: Option<Instant>,
    trials_issued: usize,
    short_circuits: u64,
    last_state_change: Instant,
}

/// Circuit breaker implementation
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: BreakerConfig,
    inner: Arc<Mutex<BreakerInner>>,
    metrics: MetricsCollector,
}

impl CircuitBreaker {
    pub fn new(name: &str, config: BreakerConfig) -> Self {
        let inner = BreakerInner {
            state: CircuitState::Closed,
            window: OutcomeWindow::new(config.window_span, config.minimum_calls),
            generation: 0,
            opened_at: None,
            trials_issued: 0,
            short_circuits: 0,
            last_state_change: Instant::now(),
        };
        let metrics = MetricsCollector::new();
        metrics.update_breaker_state(name, CircuitState::Closed);
        Self {
            name: Arc::from(name),
            config,
            inner: Arc::new(Mutex::new(inner)),
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Decides whether a call may proceed. Short circuits are counted but never recorded as outcomes.
    pub async fn try_acquire(&self) -> Admission {
        let mut inner = self.lock();
        let now = Instant::now();
        self.refresh(&mut inner, now);

        let state = inner.state;
        let (generation, trial) = match state {
            CircuitState::Closed => (inner.generation, false),
            CircuitState::HalfOpen if inner.trials_issued < self.config.half_open_trial_calls => {
                inner.trials_issued += 1;
                debug!(
                    breaker = %self.name,
                    trial = inner.trials_issued,
                    "Admitting half-open trial call"
                );
                (inner.generation, true)
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                inner.short_circuits += 1;
                drop(inner);
                self.metrics.record_short_circuit(&self.name);
                return Admission::ShortCircuited;
            }
        };

        Admission::Permitted(CallPermit {
            breaker: self.clone(),
            generation,
            trial,
            reported: false,
        })
    }

    pub async fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.refresh(&mut inner, Instant::now());
        inner.state
    }

    pub async fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.lock();
        let now = Instant::now();
        self.refresh(&mut inner, now);
        BreakerSnapshot {
            state: inner.state,
            failure_rate: inner.window.failure_rate_at(now),
            sample_count: inner.window.sample_count(),
            slow_call_count: inner.window.slow_call_count(),
            short_circuit_count: inner.short_circuits,
            last_state_change: inner.last_state_change,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // 锁内不执行外部代码，中毒时状态仍然一致
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, generation: u64, trial: bool, kind: OutcomeKind) {
        let mut inner = self.lock();
        let now = Instant::now();
        inner.window.record_at(now, kind);

        if generation != inner.generation {
            debug!(
                breaker = %self.name,
                outcome = kind.as_str(),
                "Outcome from a previous breaker generation recorded without transition"
            );
            return;
        }

        let state = inner.state;
        match state {
            CircuitState::Closed => {
                if let Some(rate) = inner.window.failure_rate_at(now) {
                    if rate >= self.config.failure_rate_threshold {
                        warn!(
                            breaker = %self.name,
                            failure_rate = rate,
                            threshold = self.config.failure_rate_threshold,
                            "Failure rate reached threshold"
                        );
                        self.transition(&mut inner, CircuitState::Open, now);
                    }
                }
            }
            CircuitState::HalfOpen if trial => {
                if kind.is_failure() {
                    self.transition(&mut inner, CircuitState::Open, now);
                } else {
                    self.transition(&mut inner, CircuitState::Closed, now);
                }
            }
            _ => {}
        }
    }

    /// Open 状态在 `open_duration` 之后惰性迁移到 HalfOpen
    fn refresh(&self, inner: &mut BreakerInner, now: Instant) {
        if inner.state != CircuitState::Open {
            return;
        }
        let elapsed = inner
            .opened_at
            .map(|opened_at| now.saturating_duration_since(opened_at))
            .unwrap_or(Duration::MAX);
        if elapsed >= self.config.open_duration {
            self.transition(inner, CircuitState::HalfOpen, now);
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState, now: Instant) {
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        inner.trials_issued = 0;
        inner.last_state_change = now;
        match to {
            CircuitState::Open => inner.opened_at = Some(now),
            CircuitState::Closed => {
                inner.opened_at = None;
                inner.window.clear();
            }
            CircuitState::HalfOpen => {}
        }

        info!(breaker = %self.name, from = %from, to = %to, "Circuit breaker state changed");
        self.metrics.update_breaker_state(&self.name, to);
    }
}
