//! Business logic services
//!
//! The routing and reliability engine: gateway health oracle, circuit
//! breakers, dispatch pipeline, and success totals.

pub mod circuit_breaker;
pub mod health_service;
pub mod payment_service;
pub mod stats;
