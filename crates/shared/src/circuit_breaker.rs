//! 外部服务熔断
//!
//! 承运商或支付网关持续故障时，同步任务每轮都会对几百个订单发起注定失败的
//! 请求。熔断器记录连续的"故障型"失败，超过阈值后在冷却期内直接拒绝调用，
//! 冷却结束后只放一个探测请求过去，成功才重新放行。
//!
//! 熔断器包在重试外层，一次完整的重试序列只计一次结果。

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

/// 对外暴露的熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// 熔断参数
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// 外部服务名，出现在日志、指标和错误信息中
    pub name: String,
    /// 连续多少次故障后熔断
    pub failure_threshold: u32,
    /// 熔断后的冷却时长
    pub cooldown: Duration,
}

impl CircuitBreakerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// 内部状态，每个阶段只携带自己需要的数据
#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed { failures: u32 },
    Open { until: Instant },
    /// 冷却结束，已有一个探测请求在途
    Probing,
}

/// 被熔断器拦截或底层调用返回的错误
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("外部服务 {name} 已熔断，暂停调用")]
    Open { name: String },
    #[error("{0}")]
    Inner(E),
}

/// 线程安全的熔断器，Clone 后共享同一份状态
#[derive(Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    phase: Arc<Mutex<Phase>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: Arc::new(config),
            phase: Arc::new(Mutex::new(Phase::Closed { failures: 0 })),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn state(&self) -> CircuitState {
        match *self.phase.lock() {
            Phase::Closed { .. } => CircuitState::Closed,
            Phase::Open { until } if Instant::now() >= until => CircuitState::HalfOpen,
            Phase::Open { .. } => CircuitState::Open,
            Phase::Probing => CircuitState::HalfOpen,
        }
    }

    /// 执行一次受保护的调用
    ///
    /// 只有 `is_failure` 判定为故障的错误才累计；对端明确的业务拒绝说明服务可用，
    /// 按成功处理。
    pub async fn call<F, Fut, T, E>(
        &self,
        is_failure: impl Fn(&E) -> bool,
        f: F,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        if !self.try_acquire() {
            metrics::counter!(
                "circuit_breaker_rejections_total",
                "service" => self.config.name.clone()
            )
            .increment(1);
            return Err(CircuitBreakerError::Open {
                name: self.config.name.clone(),
            });
        }

        let result = f().await;
        let healthy = match &result {
            Ok(_) => true,
            Err(e) => !is_failure(e),
        };
        self.settle(healthy);
        result.map_err(CircuitBreakerError::Inner)
    }

    fn try_acquire(&self) -> bool {
        let mut phase = self.phase.lock();
        match *phase {
            Phase::Closed { .. } => true,
            Phase::Open { until } if Instant::now() >= until => {
                *phase = Phase::Probing;
                self.announce(CircuitState::HalfOpen);
                true
            }
            Phase::Open { .. } | Phase::Probing => false,
        }
    }

    fn settle(&self, healthy: bool) {
        let mut phase = self.phase.lock();
        let next = match (*phase, healthy) {
            (Phase::Closed { failures: 0 }, true) => return,
            (_, true) => Phase::Closed { failures: 0 },
            (Phase::Closed { failures }, false) if failures + 1 < self.config.failure_threshold => {
                Phase::Closed {
                    failures: failures + 1,
                }
            }
            (_, false) => Phase::Open {
                until: Instant::now() + self.config.cooldown,
            },
        };

        let was_closed = matches!(*phase, Phase::Closed { .. });
        *phase = next;
        match next {
            Phase::Open { .. } => self.announce(CircuitState::Open),
            Phase::Closed { .. } if !was_closed => self.announce(CircuitState::Closed),
            _ => {}
        }
    }

    fn announce(&self, to: CircuitState) {
        match to {
            CircuitState::Open => warn!(
                service = %self.config.name,
                cooldown_secs = self.config.cooldown.as_secs(),
                "外部服务连续故障，已熔断"
            ),
            CircuitState::HalfOpen => info!(service = %self.config.name, "冷却结束，放行探测请求"),
            CircuitState::Closed => info!(service = %self.config.name, "外部服务已恢复"),
        }
        metrics::counter!(
            "circuit_breaker_transitions_total",
            "service" => self.config.name.clone(),
            "to" => to.as_str()
        )
        .increment(1);
    }
}
