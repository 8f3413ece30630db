//! Shared availability cache
//!
//! Typed wrapper over the Redis keys that carry asserted gateway
//! availability (`gateway:<name>` -> `"healthy"` | `"degraded"`, with TTL).
//! Key absence means "no asserted availability".
//!
//! The cache is advisory: every operation is bounded by a short timeout and
//! any error degrades to "absent". A Redis outage must never block or abort
//! the payment path: the selection policy has independent fallbacks.

use std::collections::HashMap;
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisResult};
use tokio::time::timeout;
use tracing::warn;

use crate::models::Processor;

/// Upper bound on any single cache operation, connection setup included.
const OP_TIMEOUT: Duration = Duration::from_secs(1);

pub struct StatusCache {
    client: redis::Client,
}

fn status_key(gateway: Processor) -> String {
    format!("gateway:{}", gateway)
}

impl StatusCache {
    /// Build a cache handle. The connection is opened lazily per operation,
    /// so construction succeeds even while Redis is unreachable.
    pub fn new(redis_url: &str) -> Result<Self, redis::RedisError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
        })
    }

    async fn connection(&self) -> Option<MultiplexedConnection> {
        match timeout(OP_TIMEOUT, self.client.get_multiplexed_async_connection()).await {
            Ok(Ok(conn)) => Some(conn),
            Ok(Err(err)) => {
                warn!(error = %err, "redis connection failed");
                None
            }
            Err(_) => {
                warn!("redis connection attempt timed out");
                None
            }
        }
    }

    /// Connectivity check used once at startup.
    pub async fn ping(&self) -> bool {
        let Some(mut conn) = self.connection().await else {
            return false;
        };
        let result: Result<RedisResult<String>, _> =
            timeout(OP_TIMEOUT, redis::cmd("PING").query_async(&mut conn)).await;
        matches!(result, Ok(Ok(_)))
    }

    /// Read one gateway's asserted status. Errors and timeouts map to `None`.
    pub async fn get_status(&self, gateway: Processor) -> Option<String> {
        let mut conn = self.connection().await?;
        let result: Result<RedisResult<Option<String>>, _> =
            timeout(OP_TIMEOUT, conn.get(status_key(gateway))).await;
        match result {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => {
                warn!(gateway = %gateway, error = %err, "redis GET failed");
                None
            }
            Err(_) => {
                warn!(gateway = %gateway, "redis GET timed out");
                None
            }
        }
    }

    /// Assert a gateway status with a bounded TTL.
    pub async fn set_status(&self, gateway: Processor, value: &str, ttl: Duration) {
        let Some(mut conn) = self.connection().await else {
            return;
        };
        let result: Result<RedisResult<()>, _> = timeout(
            OP_TIMEOUT,
            conn.set_ex(status_key(gateway), value, ttl.as_secs()),
        )
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(gateway = %gateway, error = %err, "redis SET failed"),
            Err(_) => warn!(gateway = %gateway, "redis SET timed out"),
        }
    }

    /// Withdraw a gateway's asserted availability.
    pub async fn delete(&self, gateway: Processor) {
        let Some(mut conn) = self.connection().await else {
            return;
        };
        let result: Result<RedisResult<()>, _> =
            timeout(OP_TIMEOUT, conn.del(status_key(gateway))).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(gateway = %gateway, error = %err, "redis DEL failed"),
            Err(_) => warn!(gateway = %gateway, "redis DEL timed out"),
        }
    }

    /// Read several statuses in one pipelined round trip. Missing keys are
    /// simply absent from the result; errors yield an empty map.
    pub async fn get_status_batch(
        &self,
        gateways: &[Processor],
    ) -> HashMap<Processor, String> {
        let Some(mut conn) = self.connection().await else {
            return HashMap::new();
        };

        let mut pipe = redis::pipe();
        for gateway in gateways {
            pipe.get(status_key(*gateway));
        }

        let result: Result<RedisResult<Vec<Option<String>>>, _> =
            timeout(OP_TIMEOUT, pipe.query_async(&mut conn)).await;
        let values = match result {
            Ok(Ok(values)) => values,
            Ok(Err(err)) => {
                warn!(error = %err, "redis pipeline failed");
                return HashMap::new();
            }
            Err(_) => {
                warn!("redis pipeline timed out");
                return HashMap::new();
            }
        };

        gateways
            .iter()
            .zip(values)
            .filter_map(|(gateway, value)| value.map(|v| (*gateway, v)))
            .collect()
    }
}
