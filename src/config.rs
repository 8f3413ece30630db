//! Environment configuration
//!
//! All knobs are read once at startup. Every variable has a default so the
//! service boots in a bare docker-compose setup without any configuration.

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP listener binds to.
    pub port: u16,

    /// Address of the shared Redis instance.
    pub redis_url: String,

    /// Base URL of the default (cheap) payment processor.
    pub default_processor_url: String,

    /// Base URL of the fallback (expensive) payment processor.
    pub fallback_processor_url: String,

    /// Token sent as `X-Rinha-Token` on every upstream request.
    pub processor_token: String,

    /// Number of dispatch workers.
    pub workers: usize,

    /// Capacity of the in-memory payment queue.
    pub queue_capacity: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env_or("PORT", 8080),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            default_processor_url: env::var("DEFAULT_PROCESSOR_ENDPOINT")
                .unwrap_or_else(|_| "http://payment-processor-default:8080".to_string()),
            fallback_processor_url: env::var("FALLBACK_PROCESSOR_ENDPOINT")
                .unwrap_or_else(|_| "http://payment-processor-fallback:8080".to_string()),
            processor_token: env::var("PROCESSOR_TOKEN").unwrap_or_else(|_| "123".to_string()),
            workers: env_or("WORKERS", 4),
            queue_capacity: env_or("QUEUE_CAPACITY", 5000),
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_falls_back_on_missing_or_garbage() {
        std::env::remove_var("PAYMENT_ROUTER_TEST_MISSING");
        assert_eq!(env_or("PAYMENT_ROUTER_TEST_MISSING", 8080u16), 8080);

        std::env::set_var("PAYMENT_ROUTER_TEST_GARBAGE", "not-a-number");
        assert_eq!(env_or("PAYMENT_ROUTER_TEST_GARBAGE", 4usize), 4);

        std::env::set_var("PAYMENT_ROUTER_TEST_SET", "16");
        assert_eq!(env_or("PAYMENT_ROUTER_TEST_SET", 4usize), 16);
    }
}
