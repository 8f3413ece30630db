//! Dispatch pipeline
//!
//! A bounded in-memory queue feeds a pool of workers. Each worker asks the
//! gateway oracle for a processor, guards the POST with that processor's
//! circuit breaker, and re-queues the job on failure: selection failures use
//! a stepped backoff, transport failures wait one second and re-select.
//!
//! Delivery is at-least-once with bounded retry. The queue is not durable:
//! jobs still queued at crash are lost by design, and a job that exhausts
//! its attempts is logged and dropped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{DispatchError, SubmitError};
use crate::infrastructure::http_client::{self, TOKEN_HEADER};
use crate::models::{PaymentJob, PaymentRequest, PaymentsSummary, ProcessorPayment};
use crate::services::circuit_breaker::ProcessorBreakers;
use crate::services::health_service::GatewayService;
use crate::services::stats::StatsAggregator;

const MAX_ATTEMPTS: u32 = 5;

/// Backoff steps while no gateway is selectable, indexed by attempt.
const NO_GATEWAY_BACKOFF_SECS: [u64; 5] = [2, 5, 10, 15, 30];

/// Pause before re-queueing after an upstream rejected or failed.
const TRANSPORT_RETRY_DELAY: Duration = Duration::from_secs(1);

const SLOW_PROCESSING: Duration = Duration::from_millis(500);

pub struct PaymentService {
    gateway_service: Arc<GatewayService>,
    queue_tx: mpsc::Sender<PaymentJob>,
    queue_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<PaymentJob>>>,
    breakers: ProcessorBreakers,
    stats: StatsAggregator,
    token: String,
}

impl PaymentService {
    pub fn new(gateway_service: Arc<GatewayService>, config: &crate::config::Config) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        Self {
            gateway_service,
            queue_tx,
            queue_rx: Arc::new(tokio::sync::Mutex::new(queue_rx)),
            breakers: ProcessorBreakers::default(),
            stats: StatsAggregator::new(),
            token: config.processor_token.clone(),
        }
    }

    /// Start the worker pool. Workers drain the queue until `shutdown` fires.
    pub fn spawn_workers(
        self: &Arc<Self>,
        count: usize,
        shutdown: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|worker| {
                let service = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { service.worker_loop(worker, shutdown).await })
            })
            .collect()
    }

    /// Admit a payment onto the queue. Non-blocking: a full queue is the
    /// caller's problem (surfaced as 503), never a stall.
    pub fn submit(&self, request: PaymentRequest) -> Result<(), SubmitError> {
        let job = PaymentJob {
            payment: ProcessorPayment {
                correlation_id: request.correlation_id,
                amount: request.amount,
                requested_at: Utc::now(),
            },
            processor: None,
            attempts: 0,
            max_attempts: MAX_ATTEMPTS,
        };

        match self.queue_tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => {
                warn!(
                    correlation_id = %job.payment.correlation_id,
                    "payment queue is full, rejecting"
                );
                Err(SubmitError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(SubmitError::QueueClosed),
        }
    }

    /// Lifetime totals for the summary endpoint.
    pub fn summary(&self) -> PaymentsSummary {
        self.stats.summary()
    }

    async fn worker_loop(self: Arc<Self>, worker: usize, shutdown: CancellationToken) {
        debug!(worker, "payment worker started");
        loop {
            let job = {
                let mut queue = self.queue_rx.lock().await;
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    job = queue.recv() => job,
                }
            };
            match job {
                Some(job) => self.process_job(job).await,
                None => break,
            }
        }
        debug!(worker, "payment worker stopped");
    }

    async fn process_job(&self, mut job: PaymentJob) {
        job.attempts += 1;
        let started = Instant::now();
        debug!(
            correlation_id = %job.payment.correlation_id,
            attempt = job.attempts,
            "processing payment"
        );

        let processor = match job.processor {
            Some(processor) => processor,
            None => match self.gateway_service.select_gateway().await {
                Ok(processor) => {
                    job.processor = Some(processor);
                    processor
                }
                Err(err) => {
                    warn!(
                        correlation_id = %job.payment.correlation_id,
                        attempt = job.attempts,
                        error = %err,
                        "no gateway available"
                    );
                    self.retry_no_gateway(job);
                    return;
                }
            },
        };

        let url = format!("{}/payments", self.gateway_service.gateway_url(processor));

        let breaker = self.breakers.get_or_create(processor);
        if !breaker.can_execute() {
            warn!(
                correlation_id = %job.payment.correlation_id,
                processor = %processor,
                "circuit breaker blocked dispatch"
            );
            self.retry_transport(job).await;
            return;
        }

        let payment = &job.payment;
        let token = &self.token;
        let result = breaker
            .call(|| async {
                let response = http_client::dispatch()
                    .post(&url)
                    .header(TOKEN_HEADER, token.as_str())
                    .json(payment)
                    .send()
                    .await?;
                if response.status().is_server_error() {
                    return Err(DispatchError::ServerError(response.status().as_u16()));
                }
                Ok(response)
            })
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                self.stats.add(processor, job.payment.amount);
                info!(
                    correlation_id = %job.payment.correlation_id,
                    processor = %processor,
                    amount = %job.payment.amount,
                    attempt = job.attempts,
                    "payment dispatched"
                );
            }
            Ok(response) => {
                // Upstream rejection (4xx): retried, but the breaker does
                // not count it as an upstream failure.
                warn!(
                    correlation_id = %job.payment.correlation_id,
                    processor = %processor,
                    status = response.status().as_u16(),
                    attempt = job.attempts,
                    "payment rejected by upstream"
                );
                self.retry_transport(job).await;
            }
            Err(err) => {
                warn!(
                    correlation_id = %job.payment.correlation_id,
                    processor = %processor,
                    attempt = job.attempts,
                    error = %err,
                    "payment dispatch failed"
                );
                self.retry_transport(job).await;
            }
        }

        let elapsed = started.elapsed();
        if elapsed > SLOW_PROCESSING {
            warn!(
                processor = %processor,
                elapsed = ?elapsed,
                "slow payment processing"
            );
        }
    }

    /// Selection failed: back off on a widening schedule, then re-enqueue
    /// from a detached task so the worker moves on immediately.
    fn retry_no_gateway(&self, job: PaymentJob) {
        if job.attempts >= job.max_attempts {
            error!(
                correlation_id = %job.payment.correlation_id,
                attempts = job.attempts,
                "payment failed permanently: no gateway"
            );
            return;
        }

        let delay = no_gateway_backoff(job.attempts);
        info!(
            correlation_id = %job.payment.correlation_id,
            attempt = job.attempts,
            delay = ?delay,
            "gateway retry scheduled"
        );

        let queue_tx = self.queue_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match queue_tx.try_send(job) {
                Ok(()) => {}
                Err(TrySendError::Full(job)) | Err(TrySendError::Closed(job)) => {
                    warn!(
                        correlation_id = %job.payment.correlation_id,
                        "dropping gateway retry, queue unavailable"
                    );
                }
            }
        });
    }

    /// The upstream rejected or failed: clear the processor so the next
    /// attempt re-selects, wait briefly, re-enqueue.
    async fn retry_transport(&self, mut job: PaymentJob) {
        if job.attempts >= job.max_attempts {
            error!(
                correlation_id = %job.payment.correlation_id,
                attempts = job.attempts,
                "payment failed permanently"
            );
            return;
        }

        job.processor = None;
        tokio::time::sleep(TRANSPORT_RETRY_DELAY).await;
        if let Err(TrySendError::Full(job)) | Err(TrySendError::Closed(job)) =
            self.queue_tx.try_send(job)
        {
            warn!(
                correlation_id = %job.payment.correlation_id,
                "failed to re-queue payment"
            );
        }
    }

    #[cfg(test)]
    fn breakers(&self) -> &ProcessorBreakers {
        &self.breakers
    }

    #[cfg(test)]
    async fn try_dequeue(&self) -> Option<PaymentJob> {
        self.queue_rx.lock().await.try_recv().ok()
    }
}

fn no_gateway_backoff(attempts: u32) -> Duration {
    let index = (attempts.saturating_sub(1) as usize).min(NO_GATEWAY_BACKOFF_SECS.len() - 1);
    Duration::from_secs(NO_GATEWAY_BACKOFF_SECS[index])
}
