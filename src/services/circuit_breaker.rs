//! Per-processor circuit breakers
//!
//! Classic three-state machine guarding dispatch: CLOSED passes traffic and
//! counts failures, OPEN rejects until `reset_timeout` has elapsed since the
//! last failure, HALF_OPEN lets probes through and closes again after enough
//! consecutive successes. Breakers are created lazily per processor and live
//! for the process.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::DispatchError;
use crate::models::Processor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => f.write_str("closed"),
            BreakerState::Open => f.write_str("open"),
            BreakerState::HalfOpen => f.write_str("half_open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures in CLOSED that open the breaker.
    pub failure_threshold: u32,
    /// Consecutive successes in HALF_OPEN that close it again.
    pub success_threshold: u32,
    /// How long OPEN rejects before allowing a half-open probe.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    last_fail_time: Option<Instant>,
}

/// Point-in-time view of a breaker, for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failure_count: u32,
    pub success_count: u32,
}

pub struct CircuitBreaker {
    name: Processor,
    config: BreakerConfig,
    inner: RwLock<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: Processor, config: BreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: RwLock::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                last_fail_time: None,
            }),
        }
    }

    /// Whether a call may proceed right now. Promotes OPEN to HALF_OPEN once
    /// `reset_timeout` has elapsed; the promotion re-verifies state and
    /// elapsed time under the exclusive lock.
    pub fn can_execute(&self) -> bool {
        {
            let Ok(inner) = self.inner.read() else {
                return false;
            };
            match inner.state {
                BreakerState::Closed | BreakerState::HalfOpen => return true,
                BreakerState::Open => {
                    let waited_out = inner
                        .last_fail_time
                        .is_some_and(|t| t.elapsed() > self.config.reset_timeout);
                    if !waited_out {
                        return false;
                    }
                }
            }
        }

        let Ok(mut inner) = self.inner.write() else {
            return false;
        };
        if inner.state == BreakerState::Open
            && inner
                .last_fail_time
                .is_some_and(|t| t.elapsed() > self.config.reset_timeout)
        {
            inner.state = BreakerState::HalfOpen;
            inner.success_count = 0;
            info!(processor = %self.name, "circuit breaker half-open, probing upstream");
        }
        inner.state == BreakerState::HalfOpen
    }

    pub fn record_success(&self) {
        let Ok(mut inner) = self.inner.write() else {
            return;
        };
        match inner.state {
            BreakerState::Closed => inner.failure_count = 0,
            BreakerState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = BreakerState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    info!(processor = %self.name, "circuit breaker closed after recovery");
                }
            }
            BreakerState::Open => {}
        }
        debug!(
            processor = %self.name,
            state = %inner.state,
            failures = inner.failure_count,
            "breaker recorded success"
        );
    }

    pub fn record_failure(&self) {
        let Ok(mut inner) = self.inner.write() else {
            return;
        };
        inner.last_fail_time = Some(Instant::now());
        inner.success_count = 0;
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    warn!(
                        processor = %self.name,
                        failures = inner.failure_count,
                        "circuit breaker opened"
                    );
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.failure_count += 1;
                warn!(processor = %self.name, "circuit breaker reopened from half-open");
            }
            BreakerState::Open => {}
        }
        debug!(
            processor = %self.name,
            state = %inner.state,
            failures = inner.failure_count,
            "breaker recorded failure"
        );
    }

    /// Run a send guarded by the breaker: reject outright when it is open,
    /// otherwise record the outcome of `send` on the breaker.
    pub async fn call<T, F, Fut>(&self, send: F) -> Result<T, DispatchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DispatchError>>,
    {
        if !self.can_execute() {
            return Err(DispatchError::BreakerOpen(self.name));
        }
        match send().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = match self.inner.read() {
            Ok(inner) => inner,
            Err(_) => {
                return BreakerSnapshot {
                    state: BreakerState::Open,
                    failure_count: 0,
                    success_count: 0,
                }
            }
        };
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
        }
    }
}

/// Registry of breakers, one per processor, created on first use.
pub struct ProcessorBreakers {
    config: BreakerConfig,
    breakers: RwLock<HashMap<Processor, Arc<CircuitBreaker>>>,
}

impl ProcessorBreakers {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_or_create(&self, processor: Processor) -> Arc<CircuitBreaker> {
        if let Ok(breakers) = self.breakers.read() {
            if let Some(breaker) = breakers.get(&processor) {
                return breaker.clone();
            }
        }

        let mut breakers = match self.breakers.write() {
            Ok(breakers) => breakers,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Double-checked: another caller may have created it meanwhile.
        breakers
            .entry(processor)
            .or_insert_with(|| {
                info!(processor = %processor, "circuit breaker created");
                Arc::new(CircuitBreaker::new(processor, self.config.clone()))
            })
            .clone()
    }
}

impl Default for ProcessorBreakers {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
