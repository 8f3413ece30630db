use thiserror::Error;

use crate::models::Processor;

/// Gateway selection exhausted every layer of the policy.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("no gateway available")]
    NoGatewayAvailable,
}

/// Admission of a payment onto the dispatch queue failed.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("payment queue is full")]
    QueueFull,
    #[error("payment queue is closed")]
    QueueClosed,
}

/// A single dispatch attempt against an upstream processor failed.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("circuit breaker is open for {0}")]
    BreakerOpen(Processor),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server error: status {0}")]
    ServerError(u16),
}
