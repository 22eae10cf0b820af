//! 熔断器
//!
//! 状态机：Closed（初始）→ 连续失败达到 `max_failures` 后 Open →
//! 冷却时间过后 HalfOpen（只放行一个探测调用）→ 探测成功回到 Closed，失败重新 Open

pub mod manager;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::BreakerConfig;
use crate::error::MeshError;

pub use manager::CircuitBreakerManager;

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// 正常放行
    Closed,
    /// 快速失败
    Open,
    /// 冷却结束，等待探测结果
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// 熔断器调用错误
#[derive(Error, Debug)]
pub enum BreakerError<E> {
    /// 熔断器打开，被包装的调用没有执行
    #[error("circuit breaker '{name}' is open")]
    Open {
        name: String,
        retry_after: Option<Duration>,
    },

    /// 被包装调用自身返回的错误，原样透传
    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Inner(e) => Some(e),
            BreakerError::Open { .. } => None,
        }
    }
}

impl<E: Into<MeshError>> From<BreakerError<E>> for MeshError {
    fn from(err: BreakerError<E>) -> Self {
        match err {
            BreakerError::Open { name, retry_after } => MeshError::circuit_open(name, retry_after),
            BreakerError::Inner(e) => e.into(),
        }
    }
}

/// 熔断器统计
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub max_failures: u32,
    pub opened_at: Option<DateTime<Utc>>,
    /// 因打开而被拒绝的调用次数
    pub rejected: u64,
}

type StateChangeCallback = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

struct Inner {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    opened_at_utc: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

/// 一次被放行的调用
enum Admission {
    Normal,
    Trial,
}

/// 熔断器
///
/// 可在任意多个并发调用方之间共享，状态由互斥锁保护
pub struct CircuitBreaker {
    name: String,
    max_failures: u32,
    cool_down: Duration,
    inner: Mutex<Inner>,
    rejected: AtomicU64,
    on_state_change: Mutex<Option<StateChangeCallback>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: &BreakerConfig) -> Self {
        Self::with_params(name, config.max_failures, config.cool_down())
    }

    pub fn with_params(name: impl Into<String>, max_failures: u32, cool_down: Duration) -> Self {
        Self {
            name: name.into(),
            max_failures: max_failures.max(1),
            cool_down,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
                opened_at_utc: None,
                trial_in_flight: false,
            }),
            rejected: AtomicU64::new(0),
            on_state_change: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 注册状态变化回调（在锁外调用）
    pub fn on_state_change<F>(&self, callback: F)
    where
        F: Fn(&str, CircuitState, CircuitState) + Send + Sync + 'static,
    {
        *self.on_state_change.lock() = Some(Arc::new(callback));
    }

    /// 以熔断保护执行调用
    ///
    /// Open 期间直接返回 `BreakerError::Open`，`f` 不会被调用
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = self.acquire().map_err(|retry_after| BreakerError::Open {
            name: self.name.clone(),
            retry_after,
        })?;

        let mut guard = TrialGuard {
            breaker: self,
            armed: matches!(admission, Admission::Trial),
        };
        let result = f().await;
        guard.armed = false;

        match result {
            Ok(value) => {
                self.record_success(&admission);
                Ok(value)
            }
            Err(e) => {
                self.record_failure(&admission);
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// 当前状态（只读）
    ///
    /// Open 且冷却时间已过时报告 HalfOpen：下一次调用会作为探测放行
    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock();
        self.effective_state(&inner)
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock();
        BreakerStats {
            name: self.name.clone(),
            state: self.effective_state(&inner),
            failure_count: inner.failure_count,
            max_failures: self.max_failures,
            opened_at: inner.opened_at_utc,
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    /// 强制回到 Closed
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            let from = inner.state;
            inner.failure_count = 0;
            inner.trial_in_flight = false;
            inner.opened_at = None;
            inner.opened_at_utc = None;
            self.transition(&mut inner, CircuitState::Closed)
                .map(|_| (from, CircuitState::Closed))
        };
        self.notify(transition);
    }

    fn effective_state(&self, inner: &Inner) -> CircuitState {
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(at)) if at.elapsed() >= self.cool_down => {
                CircuitState::HalfOpen
            }
            (state, _) => state,
        }
    }

    /// 判断是否放行；拒绝时返回剩余冷却时间
    fn acquire(&self) -> Result<Admission, Option<Duration>> {
        let mut transition = None;
        let admission = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => Ok(Admission::Normal),
                CircuitState::Open => {
                    let elapsed = inner.opened_at.map(|at| at.elapsed());
                    match elapsed {
                        Some(elapsed) if elapsed < self.cool_down => {
                            Err(Some(self.cool_down - elapsed))
                        }
                        _ => {
                            inner.trial_in_flight = true;
                            transition = self
                                .transition(&mut inner, CircuitState::HalfOpen)
                                .map(|_| (CircuitState::Open, CircuitState::HalfOpen));
                            Ok(Admission::Trial)
                        }
                    }
                }
                CircuitState::HalfOpen => {
                    if inner.trial_in_flight {
                        Err(None)
                    } else {
                        inner.trial_in_flight = true;
                        Ok(Admission::Trial)
                    }
                }
            }
        };
        self.notify(transition);

        if admission.is_err() {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(circuit = %self.name, "Circuit breaker is open, rejecting call");
        }
        admission
    }

    fn record_success(&self, admission: &Admission) {
        let transition = {
            let mut inner = self.inner.lock();
            inner.failure_count = 0;
            match admission {
                Admission::Trial => {
                    inner.trial_in_flight = false;
                    inner.opened_at = None;
                    inner.opened_at_utc = None;
                    self.transition(&mut inner, CircuitState::Closed)
                        .map(|from| (from, CircuitState::Closed))
                }
                Admission::Normal => None,
            }
        };
        self.notify(transition);
    }

    fn record_failure(&self, admission: &Admission) {
        let transition = {
            let mut inner = self.inner.lock();
            inner.failure_count = inner.failure_count.saturating_add(1);
            match admission {
                Admission::Trial => {
                    inner.trial_in_flight = false;
                    self.open(&mut inner)
                }
                Admission::Normal
                    if inner.state == CircuitState::Closed
                        && inner.failure_count >= self.max_failures =>
                {
                    self.open(&mut inner)
                }
                Admission::Normal => None,
            }
        };
        self.notify(transition);
    }

    fn open(&self, inner: &mut Inner) -> Option<(CircuitState, CircuitState)> {
        inner.opened_at = Some(Instant::now());
        inner.opened_at_utc = Some(Utc::now());
        warn!(
            circuit = %self.name,
            failures = inner.failure_count,
            "Circuit breaker opened"
        );
        self.transition(inner, CircuitState::Open)
            .map(|from| (from, CircuitState::Open))
    }

    /// 切换状态，返回旧状态；状态未变化时返回 `None`
    fn transition(&self, inner: &mut Inner, to: CircuitState) -> Option<CircuitState> {
        let from = inner.state;
        if from == to {
            return None;
        }
        inner.state = to;
        info!(circuit = %self.name, from = %from, to = %to, "Circuit breaker state changed");
        Some(from)
    }

    fn notify(&self, transition: Option<(CircuitState, CircuitState)>) {
        let Some((from, to)) = transition else {
            return;
        };
        let callback = self.on_state_change.lock().clone();
        if let Some(callback) = callback {
            callback(&self.name, from, to);
        }
    }

    /// 探测调用被取消（future 被丢弃）时释放探测名额
    fn abandon_trial(&self) {
        self.inner.lock().trial_in_flight = false;
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("max_failures", &self.max_failures)
            .field("cool_down", &self.cool_down)
            .finish()
    }
}

struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.abandon_trial();
        }
    }
}
