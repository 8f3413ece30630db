//! Shared application state
//!
//! Wires the services together once at startup. Cheaply cloneable: handlers
//! get a clone per request, background tasks hold their own.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::infrastructure::redis_client::StatusCache;
use crate::models::PROBE_ORDER;
use crate::services::health_service::GatewayService;
use crate::services::payment_service::PaymentService;

#[derive(Clone)]
pub struct AppState {
    pub gateway_service: Arc<GatewayService>,
    pub payment_service: Arc<PaymentService>,
}

impl AppState {
    pub fn new(config: &Config) -> Result<Self, redis::RedisError> {
        let cache = StatusCache::new(&config.redis_url)?;
        let gateway_service = Arc::new(GatewayService::new(cache, config));
        let payment_service = Arc::new(PaymentService::new(gateway_service.clone(), config));
        Ok(Self {
            gateway_service,
            payment_service,
        })
    }

    /// Spawn the probe loops and the dispatch worker pool. All tasks exit
    /// when `shutdown` is cancelled.
    pub fn spawn_background_tasks(&self, config: &Config, shutdown: &CancellationToken) {
        for gateway in PROBE_ORDER {
            tokio::spawn(
                self.gateway_service
                    .clone()
                    .probe_loop(gateway, shutdown.clone()),
            );
        }
        self.payment_service.spawn_workers(config.workers, shutdown);
    }
}
