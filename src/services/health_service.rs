//! Gateway oracle
//!
//! Owns the per-processor availability view: one probe loop per upstream
//! keeps a `GatewayStatus` record current and mirrors it into the shared
//! cache, and `select_gateway` answers "which processor should this payment
//! go to" from layered sources: local cache, shared cache, recent history,
//! grace period.
//!
//! Two protections against flapping are deliberately separate: the grace
//! period here (a single stumble on a recently-healthy gateway does not
//! evict it from the cache) and the circuit breakers in the dispatch path.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::SelectError;
use crate::infrastructure::http_client::{self, TOKEN_HEADER};
use crate::infrastructure::redis_client::StatusCache;
use crate::models::{HealthResponse, Processor, PROBE_ORDER};

const RESPONSE_HISTORY_LEN: usize = 10;
const LOCAL_CACHE_TTL: Duration = Duration::from_secs(3);
const SLOW_SELECTION: Duration = Duration::from_millis(50);

/// Shared-cache TTLs. The extended TTL rewards a run of clean probes; the
/// degraded TTL is short so a recovering gateway re-asserts itself quickly.
const HEALTHY_TTL: Duration = Duration::from_secs(15);
const EXTENDED_HEALTHY_TTL: Duration = Duration::from_secs(25);
const DEGRADED_TTL: Duration = Duration::from_secs(8);

const INITIAL_PROBE_INTERVAL: Duration = Duration::from_secs(6);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Healthy,
    Degraded,
    Unavailable,
}

impl std::fmt::Display for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayState::Healthy => f.write_str("healthy"),
            GatewayState::Degraded => f.write_str("degraded"),
            GatewayState::Unavailable => f.write_str("unavailable"),
        }
    }
}

#[derive(Debug)]
struct GatewayStatus {
    url: String,
    last_healthy_time: Instant,
    #[allow(dead_code)]
    last_failure_time: Option<Instant>,
    consecutive_failures: u32,
    state: GatewayState,
    response_time_history: VecDeque<Duration>,
    probe_interval: Duration,
}

impl GatewayStatus {
    fn new(url: String, now: Instant) -> Self {
        Self {
            url,
            last_healthy_time: now,
            last_failure_time: None,
            consecutive_failures: 0,
            state: GatewayState::Healthy,
            response_time_history: VecDeque::with_capacity(RESPONSE_HISTORY_LEN),
            probe_interval: INITIAL_PROBE_INTERVAL,
        }
    }
}

enum ProbeOutcome {
    Success(Duration),
    RateLimited,
    Failure(String),
}

/// What the failure handler decided to do to the shared cache, computed
/// under the write lock and executed after it is released.
enum CacheAction {
    Delete,
    SetDegraded,
}

struct LocalEntry {
    status: String,
    expires_at: Instant,
}

pub struct GatewayService {
    cache: StatusCache,
    token: String,
    gateways: RwLock<HashMap<Processor, GatewayStatus>>,
    local_cache: Mutex<HashMap<Processor, LocalEntry>>,
}

impl GatewayService {
    pub fn new(cache: StatusCache, config: &Config) -> Self {
        let now = Instant::now();
        let gateways = HashMap::from([
            (
                Processor::Default,
                GatewayStatus::new(config.default_processor_url.clone(), now),
            ),
            (
                Processor::Fallback,
                GatewayStatus::new(config.fallback_processor_url.clone(), now),
            ),
        ]);
        Self {
            cache,
            token: config.processor_token.clone(),
            gateways: RwLock::new(gateways),
            local_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Startup connectivity check against the shared cache.
    pub async fn cache_ping(&self) -> bool {
        self.cache.ping().await
    }

    /// Base URL of a processor. The table is fixed at startup.
    pub fn gateway_url(&self, gateway: Processor) -> String {
        self.gateways
            .read()
            .ok()
            .and_then(|g| g.get(&gateway).map(|s| s.url.clone()))
            .unwrap_or_default()
    }

    // ── Probing ──────────────────────────────────────────────────────────

    /// Probe one upstream until shutdown, sleeping the current adaptive
    /// interval between probes.
    pub async fn probe_loop(self: Arc<Self>, gateway: Processor, shutdown: CancellationToken) {
        loop {
            let interval = self
                .gateways
                .read()
                .ok()
                .and_then(|g| g.get(&gateway).map(|s| s.probe_interval))
                .unwrap_or(INITIAL_PROBE_INTERVAL);

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = sleep(interval) => {}
            }
            self.probe_once(gateway).await;
        }
    }

    async fn probe_once(&self, gateway: Processor) {
        let (url, timeout) = {
            let Ok(gateways) = self.gateways.read() else {
                return;
            };
            let Some(status) = gateways.get(&gateway) else {
                return;
            };
            (
                status.url.clone(),
                adaptive_timeout(&status.response_time_history),
            )
        };

        match self.issue_probe(&url, timeout).await {
            ProbeOutcome::Success(response_time) => {
                self.handle_probe_success(gateway, response_time).await;
            }
            ProbeOutcome::RateLimited => {
                warn!(gateway = %gateway, "health probe rate-limited, backing off interval");
                self.back_off_interval(gateway);
            }
            ProbeOutcome::Failure(reason) => {
                self.handle_probe_failure(gateway, &reason).await;
            }
        }
    }

    async fn issue_probe(&self, base_url: &str, timeout: Duration) -> ProbeOutcome {
        let url = format!("{}/payments/service-health", base_url);
        let started = Instant::now();
        let response = http_client::probe()
            .get(&url)
            .header(TOKEN_HEADER, self.token.as_str())
            .timeout(timeout)
            .send()
            .await;
        let response_time = started.elapsed();

        let response = match response {
            Ok(response) => response,
            Err(err) => return ProbeOutcome::Failure(format!("request failed: {err}")),
        };

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return ProbeOutcome::RateLimited;
        }
        if response.status() != StatusCode::OK {
            return ProbeOutcome::Failure(format!("HTTP {}", response.status().as_u16()));
        }

        match response.json::<HealthResponse>().await {
            Err(err) => ProbeOutcome::Failure(format!("invalid health body: {err}")),
            Ok(health) if health.failing => {
                ProbeOutcome::Failure("gateway reports failing status".to_string())
            }
            Ok(health) => {
                debug!(min_response_time = health.min_response_time, "health probe ok");
                ProbeOutcome::Success(response_time)
            }
        }
    }

    async fn handle_probe_success(&self, gateway: Processor, response_time: Duration) {
        let (ttl, old_state) = {
            let Ok(mut gateways) = self.gateways.write() else {
                return;
            };
            let Some(status) = gateways.get_mut(&gateway) else {
                return;
            };

            status.last_healthy_time = Instant::now();
            status.consecutive_failures = 0;
            let old_state = status.state;
            status.state = GatewayState::Healthy;

            status.response_time_history.push_back(response_time);
            if status.response_time_history.len() > RESPONSE_HISTORY_LEN {
                status.response_time_history.pop_front();
            }

            status.probe_interval = success_interval(status);
            (shared_cache_ttl(status), old_state)
        };

        self.cache.set_status(gateway, "healthy", ttl).await;

        if old_state != GatewayState::Healthy {
            info!(
                gateway = %gateway,
                from = %old_state,
                response_time = ?response_time,
                "gateway recovered"
            );
        } else {
            debug!(gateway = %gateway, response_time = ?response_time, ttl = ?ttl, "gateway healthy");
        }
    }

    async fn handle_probe_failure(&self, gateway: Processor, reason: &str) {
        let action = {
            let Ok(mut gateways) = self.gateways.write() else {
                return;
            };
            let Some(status) = gateways.get_mut(&gateway) else {
                return;
            };

            status.last_failure_time = Some(Instant::now());
            status.consecutive_failures += 1;
            let old_state = status.state;

            let action = if status.consecutive_failures >= 3 {
                status.state = GatewayState::Unavailable;
                CacheAction::Delete
            } else if status.last_healthy_time.elapsed() > Duration::from_secs(30) {
                status.state = GatewayState::Degraded;
                CacheAction::SetDegraded
            } else {
                // Grace period: a recently-healthy gateway keeps its state
                // and cache entry through a single stumble.
                info!(
                    gateway = %gateway,
                    failures = status.consecutive_failures,
                    reason,
                    "probe failed within grace period"
                );
                return;
            };

            status.probe_interval = failure_interval(status.state);

            if old_state != status.state {
                warn!(
                    gateway = %gateway,
                    from = %old_state,
                    to = %status.state,
                    failures = status.consecutive_failures,
                    reason,
                    "gateway state changed"
                );
            }
            action
        };

        match action {
            CacheAction::Delete => self.cache.delete(gateway).await,
            CacheAction::SetDegraded => {
                self.cache.set_status(gateway, "degraded", DEGRADED_TTL).await
            }
        }
    }

    /// Rate-limit response: widen the probe interval for the current state
    /// without touching failures, state, or the shared cache.
    fn back_off_interval(&self, gateway: Processor) {
        let Ok(mut gateways) = self.gateways.write() else {
            return;
        };
        if let Some(status) = gateways.get_mut(&gateway) {
            status.probe_interval = failure_interval(status.state);
        }
    }

    // ── Selection ────────────────────────────────────────────────────────

    /// Pick the processor for one payment attempt. Layers, first hit wins:
    /// local cache, pipelined shared-cache read, recent-history fallback,
    /// grace-period fallback with a last-resort guess of `default`.
    pub async fn select_gateway(&self) -> Result<Processor, SelectError> {
        let started = Instant::now();

        for gateway in PROBE_ORDER {
            if let Some(status) = self.local_cache_get(gateway) {
                debug!(gateway = %gateway, status, "gateway selected from local cache");
                return Ok(gateway);
            }
        }

        let statuses = self.cache.get_status_batch(&PROBE_ORDER).await;
        for gateway in PROBE_ORDER {
            if let Some(status) = statuses.get(&gateway) {
                self.local_cache_put(gateway, status.clone());
                self.note_selection(started, gateway, "shared_cache");
                return Ok(gateway);
            }
        }

        if let Some(gateway) = self.best_from_history() {
            self.note_selection(started, gateway, "history");
            return Ok(gateway);
        }

        if let Some(gateway) = self.grace_period_candidate() {
            self.note_selection(started, gateway, "grace_period");
            return Ok(gateway);
        }

        // Last resort: guess the default processor and let its circuit
        // breaker short-circuit the send if it is actually broken.
        warn!("all selection layers exhausted, guessing default");
        self.note_selection(started, Processor::Default, "last_resort");
        Ok(Processor::Default)
    }

    fn note_selection(&self, started: Instant, gateway: Processor, method: &'static str) {
        let elapsed = started.elapsed();
        if elapsed > SLOW_SELECTION {
            warn!(gateway = %gateway, method, elapsed = ?elapsed, "slow gateway selection");
        } else {
            debug!(gateway = %gateway, method, "gateway selected");
        }
    }

    fn local_cache_get(&self, gateway: Processor) -> Option<String> {
        let Ok(mut cache) = self.local_cache.lock() else {
            return None;
        };
        match cache.get(&gateway) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.status.clone()),
            Some(_) => {
                cache.remove(&gateway);
                None
            }
            None => None,
        }
    }

    fn local_cache_put(&self, gateway: Processor, status: String) {
        if let Ok(mut cache) = self.local_cache.lock() {
            cache.insert(
                gateway,
                LocalEntry {
                    status,
                    expires_at: Instant::now() + LOCAL_CACHE_TTL,
                },
            );
        }
    }

    /// Among gateways healthy within the last 5 minutes, the most recently
    /// healthy one; ties go to probe order.
    fn best_from_history(&self) -> Option<Processor> {
        let gateways = self.gateways.read().ok()?;
        let cutoff = Duration::from_secs(5 * 60);

        let mut best: Option<(Processor, Instant)> = None;
        for gateway in PROBE_ORDER {
            let Some(status) = gateways.get(&gateway) else {
                continue;
            };
            if status.last_healthy_time.elapsed() > cutoff {
                continue;
            }
            let better = match best {
                Some((_, best_time)) => status.last_healthy_time > best_time,
                None => true,
            };
            if better {
                best = Some((gateway, status.last_healthy_time));
            }
        }
        best.map(|(gateway, _)| gateway)
    }

    /// First gateway in probe order that is degraded, or whose failures are
    /// few and whose last healthy sighting is recent.
    fn grace_period_candidate(&self) -> Option<Processor> {
        let gateways = self.gateways.read().ok()?;
        for gateway in PROBE_ORDER {
            let Some(status) = gateways.get(&gateway) else {
                continue;
            };
            if status.state == GatewayState::Degraded
                || (status.consecutive_failures <= 2
                    && status.last_healthy_time.elapsed() < Duration::from_secs(2 * 60))
            {
                return Some(gateway);
            }
        }
        None
    }
}

/// Probe timeout derived from observed response times:
/// `clamp(3·avg + 2 s, 3 s, 10 s)`, or 5 s with no history yet.
fn adaptive_timeout(history: &VecDeque<Duration>) -> Duration {
    if history.is_empty() {
        return Duration::from_secs(5);
    }
    let total: Duration = history.iter().sum();
    let avg = total / history.len() as u32;
    (avg * 3 + Duration::from_secs(2)).clamp(Duration::from_secs(3), Duration::from_secs(10))
}

fn success_interval(status: &GatewayStatus) -> Duration {
    if status.consecutive_failures == 0 && status.response_time_history.len() >= 3 {
        Duration::from_secs(10)
    } else {
        Duration::from_secs(6)
    }
}

fn failure_interval(state: GatewayState) -> Duration {
    match state {
        GatewayState::Healthy => Duration::from_secs(8),
        GatewayState::Degraded => Duration::from_secs(15),
        GatewayState::Unavailable => Duration::from_secs(30),
    }
}

fn shared_cache_ttl(status: &GatewayStatus) -> Duration {
    if status.consecutive_failures == 0 && status.response_time_history.len() >= 5 {
        EXTENDED_HEALTHY_TTL
    } else {
        HEALTHY_TTL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(default_url: &str, fallback_url: &str) -> Config {
        Config {
            port: 0,
            // Nothing listens here; cache ops degrade to absent.
            redis_url: "redis://127.0.0.1:6390".to_string(),
            default_processor_url: default_url.to_string(),
            fallback_processor_url: fallback_url.to_string(),
            processor_token: "123".to_string(),
            workers: 0,
            queue_capacity: 16,
        }
    }

    fn service(default_url: &str, fallback_url: &str) -> GatewayService {
        let cache = StatusCache::new("redis://127.0.0.1:6390").expect("valid url");
        GatewayService::new(cache, &test_config(default_url, fallback_url))
    }

    fn with_gateway<T>(
        service: &GatewayService,
        gateway: Processor,
        f: impl FnOnce(&mut GatewayStatus) -> T,
    ) -> T {
        let mut gateways = service.gateways.write().unwrap();
        f(gateways.get_mut(&gateway).unwrap())
    }

    async fn healthy_upstream() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/payments/service-health"))
            .and(header(TOKEN_HEADER, "123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "failing": false,
                "minResponseTime": 2
            })))
            .mount(&server)
            .await;
        server
    }

    #[test]
    fn adaptive_timeout_clamps_into_probe_window() {
        let empty = VecDeque::new();
        assert_eq!(adaptive_timeout(&empty), Duration::from_secs(5));

        // Fast upstream: 3·0.1 s + 2 s = 2.3 s, clamped up to 3 s.
        let fast: VecDeque<_> = std::iter::repeat(Duration::from_millis(100)).take(4).collect();
        assert_eq!(adaptive_timeout(&fast), Duration::from_secs(3));

        // 1 s average: 3 + 2 = 5 s, inside the window.
        let medium: VecDeque<_> = std::iter::repeat(Duration::from_secs(1)).take(4).collect();
        assert_eq!(adaptive_timeout(&medium), Duration::from_secs(5));

        // Slow upstream: 3·4 s + 2 s = 14 s, clamped down to 10 s.
        let slow: VecDeque<_> = std::iter::repeat(Duration::from_secs(4)).take(4).collect();
        assert_eq!(adaptive_timeout(&slow), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn successful_probe_marks_healthy_and_records_time() {
        let server = healthy_upstream().await;
        let svc = service(&server.uri(), &server.uri());

        svc.probe_once(Processor::Default).await;

        with_gateway(&svc, Processor::Default, |g| {
            assert_eq!(g.state, GatewayState::Healthy);
            assert_eq!(g.consecutive_failures, 0);
            assert_eq!(g.response_time_history.len(), 1);
            assert_eq!(g.probe_interval, Duration::from_secs(6));
        });
    }

    #[tokio::test]
    async fn probe_interval_widens_after_three_clean_probes() {
        let server = healthy_upstream().await;
        let svc = service(&server.uri(), &server.uri());

        for _ in 0..3 {
            svc.probe_once(Processor::Default).await;
        }
        with_gateway(&svc, Processor::Default, |g| {
            assert_eq!(g.probe_interval, Duration::from_secs(10));
        });
    }

    #[tokio::test]
    async fn response_history_is_bounded() {
        let svc = service("http://unused", "http://unused");
        for _ in 0..12 {
            svc.handle_probe_success(Processor::Default, Duration::from_millis(10))
                .await;
        }
        with_gateway(&svc, Processor::Default, |g| {
            assert_eq!(g.response_time_history.len(), RESPONSE_HISTORY_LEN);
        });
    }

    #[tokio::test]
    async fn shared_cache_ttl_extends_after_five_clean_probes() {
        let svc = service("http://unused", "http://unused");
        for _ in 0..4 {
            svc.handle_probe_success(Processor::Default, Duration::from_millis(5))
                .await;
        }
        with_gateway(&svc, Processor::Default, |g| {
            assert_eq!(shared_cache_ttl(g), HEALTHY_TTL);
        });

        svc.handle_probe_success(Processor::Default, Duration::from_millis(5))
            .await;
        with_gateway(&svc, Processor::Default, |g| {
            assert_eq!(shared_cache_ttl(g), EXTENDED_HEALTHY_TTL);
        });
    }

    #[tokio::test]
    async fn single_failure_on_recently_healthy_gateway_is_grace_period() {
        let svc = service("http://unused", "http://unused");
        svc.handle_probe_failure(Processor::Default, "HTTP 500").await;

        with_gateway(&svc, Processor::Default, |g| {
            assert_eq!(g.state, GatewayState::Healthy);
            assert_eq!(g.consecutive_failures, 1);
            // Grace period leaves the probe interval alone too.
            assert_eq!(g.probe_interval, INITIAL_PROBE_INTERVAL);
        });
    }

    #[tokio::test]
    async fn failure_after_stale_health_degrades() {
        let svc = service("http://unused", "http://unused");
        with_gateway(&svc, Processor::Default, |g| {
            g.last_healthy_time = Instant::now() - Duration::from_secs(31);
        });

        svc.handle_probe_failure(Processor::Default, "request failed").await;

        with_gateway(&svc, Processor::Default, |g| {
            assert_eq!(g.state, GatewayState::Degraded);
            assert_eq!(g.probe_interval, Duration::from_secs(15));
        });
    }

    #[tokio::test]
    async fn three_consecutive_failures_mark_unavailable() {
        let svc = service("http://unused", "http://unused");
        for _ in 0..3 {
            svc.handle_probe_failure(Processor::Default, "HTTP 503").await;
        }
        with_gateway(&svc, Processor::Default, |g| {
            assert_eq!(g.state, GatewayState::Unavailable);
            assert_eq!(g.consecutive_failures, 3);
            assert_eq!(g.probe_interval, Duration::from_secs(30));
        });
    }

    #[tokio::test]
    async fn rate_limited_probe_only_backs_off_interval() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/payments/service-health"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        let svc = service(&server.uri(), &server.uri());

        svc.probe_once(Processor::Default).await;

        with_gateway(&svc, Processor::Default, |g| {
            assert_eq!(g.state, GatewayState::Healthy);
            assert_eq!(g.consecutive_failures, 0);
            assert_eq!(g.probe_interval, Duration::from_secs(8));
        });
    }

    #[tokio::test]
    async fn failing_body_counts_as_probe_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/payments/service-health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "failing": true,
                "minResponseTime": 0
            })))
            .mount(&server)
            .await;
        let svc = service(&server.uri(), &server.uri());

        svc.probe_once(Processor::Default).await;

        with_gateway(&svc, Processor::Default, |g| {
            assert_eq!(g.consecutive_failures, 1);
        });
    }

    #[test]
    fn local_cache_entries_expire() {
        let svc = service("http://unused", "http://unused");

        svc.local_cache_put(Processor::Default, "healthy".to_string());
        assert_eq!(
            svc.local_cache_get(Processor::Default),
            Some("healthy".to_string())
        );

        // Force the entry past its expiry; the next read evicts it.
        {
            let mut cache = svc.local_cache.lock().unwrap();
            cache.get_mut(&Processor::Default).unwrap().expires_at =
                Instant::now() - Duration::from_millis(1);
        }
        assert_eq!(svc.local_cache_get(Processor::Default), None);
        assert!(svc.local_cache.lock().unwrap().is_empty());
    }

    #[test]
    fn history_fallback_prefers_default_on_ties() {
        let svc = service("http://unused", "http://unused");
        // Both initialized with the same last-healthy instant.
        assert_eq!(svc.best_from_history(), Some(Processor::Default));
    }

    #[test]
    fn history_fallback_prefers_most_recently_healthy() {
        let svc = service("http://unused", "http://unused");
        with_gateway(&svc, Processor::Fallback, |g| {
            g.last_healthy_time = Instant::now() + Duration::from_secs(1);
        });
        assert_eq!(svc.best_from_history(), Some(Processor::Fallback));
    }

    #[test]
    fn history_fallback_ignores_stale_gateways() {
        let svc = service("http://unused", "http://unused");
        for gateway in PROBE_ORDER {
            with_gateway(&svc, gateway, |g| {
                g.last_healthy_time = Instant::now() - Duration::from_secs(6 * 60);
            });
        }
        assert_eq!(svc.best_from_history(), None);
    }

    #[test]
    fn grace_candidate_accepts_degraded_or_lightly_failed() {
        let svc = service("http://unused", "http://unused");

        // Fresh service: both have zero failures and recent health.
        assert_eq!(svc.grace_period_candidate(), Some(Processor::Default));

        // Default out, fallback degraded: fallback wins.
        with_gateway(&svc, Processor::Default, |g| {
            g.state = GatewayState::Unavailable;
            g.consecutive_failures = 5;
            g.last_healthy_time = Instant::now() - Duration::from_secs(10 * 60);
        });
        with_gateway(&svc, Processor::Fallback, |g| {
            g.state = GatewayState::Degraded;
            g.consecutive_failures = 2;
            g.last_healthy_time = Instant::now() - Duration::from_secs(10 * 60);
        });
        assert_eq!(svc.grace_period_candidate(), Some(Processor::Fallback));

        // Both down hard and stale: no candidate.
        with_gateway(&svc, Processor::Fallback, |g| {
            g.state = GatewayState::Unavailable;
            g.consecutive_failures = 5;
        });
        assert_eq!(svc.grace_period_candidate(), None);
    }

    #[tokio::test]
    async fn selection_without_cache_falls_back_to_history() {
        let svc = service("http://unused", "http://unused");
        assert_eq!(svc.select_gateway().await, Ok(Processor::Default));
    }

    #[tokio::test]
    async fn selection_guesses_default_when_everything_is_down() {
        let svc = service("http://unused", "http://unused");
        for gateway in PROBE_ORDER {
            with_gateway(&svc, gateway, |g| {
                g.state = GatewayState::Unavailable;
                g.consecutive_failures = 5;
                g.last_healthy_time = Instant::now() - Duration::from_secs(10 * 60);
            });
        }
        assert_eq!(svc.select_gateway().await, Ok(Processor::Default));
    }

    #[tokio::test]
    async fn selection_prefers_local_cache_hit() {
        let svc = service("http://unused", "http://unused");
        svc.local_cache_put(Processor::Fallback, "degraded".to_string());
        // No entry for default; fallback has the only fresh positive entry.
        assert_eq!(svc.select_gateway().await, Ok(Processor::Fallback));
    }

    #[tokio::test]
    async fn default_wins_whenever_it_is_present() {
        let svc = service("http://unused", "http://unused");
        svc.local_cache_put(Processor::Default, "degraded".to_string());
        svc.local_cache_put(Processor::Fallback, "healthy".to_string());
        // Probe order decides: a degraded default still beats a healthy
        // fallback because it is cheaper.
        assert_eq!(svc.select_gateway().await, Ok(Processor::Default));
    }
}
