//! Infrastructure layer
//!
//! External concerns: the shared Redis availability cache and the reqwest
//! clients used for probing and dispatch.

pub mod http_client;
pub mod redis_client;
