//! Shared HTTP clients
//!
//! Two reusable reqwest clients: one for payment dispatch and one for health
//! probes. `once_cell` ensures each is built exactly once.

use std::time::Duration;

use once_cell::sync::Lazy;

/// Header carrying the contest token on every upstream request.
pub const TOKEN_HEADER: &str = "X-Rinha-Token";

static DISPATCH_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .pool_max_idle_per_host(50)
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(15))
        .build()
        .expect("Failed to build dispatch client")
});

// No client-level timeout: probes set an adaptive per-request timeout.
static PROBE_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .pool_max_idle_per_host(2)
        .connect_timeout(Duration::from_secs(3))
        .build()
        .expect("Failed to build probe client")
});

/// Client used for `POST /payments` against the processors.
pub fn dispatch() -> &'static reqwest::Client {
    &DISPATCH_CLIENT
}

/// Client used for health probes.
pub fn probe() -> &'static reqwest::Client {
    &PROBE_CLIENT
}
