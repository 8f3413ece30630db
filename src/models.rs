use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The two upstream payment processors, in probe order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Processor {
    Default,
    Fallback,
}

/// Selection and probing always consider `default` before `fallback`:
/// the default processor charges the lower fee, so it wins every tie.
pub const PROBE_ORDER: [Processor; 2] = [Processor::Default, Processor::Fallback];

impl Processor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Processor::Default => "default",
            Processor::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of `POST /payments` from clients.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentRequest {
    #[serde(rename = "correlationId")]
    pub correlation_id: String,
    pub amount: Decimal,
}

/// Payload POSTed to the chosen processor. `requested_at` is fixed at
/// enqueue time and reused verbatim across retries.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessorPayment {
    #[serde(rename = "correlationId")]
    pub correlation_id: String,
    pub amount: Decimal,
    #[serde(rename = "requestedAt")]
    pub requested_at: DateTime<Utc>,
}

/// One unit of work on the dispatch queue.
#[derive(Debug, Clone)]
pub struct PaymentJob {
    pub payment: ProcessorPayment,
    /// `None` means "re-select a processor on the next dequeue".
    pub processor: Option<Processor>,
    pub attempts: u32,
    pub max_attempts: u32,
}

/// Body of `GET /payments/service-health` from a processor.
#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub failing: bool,
    #[serde(rename = "minResponseTime")]
    pub min_response_time: i64,
}

/// Wire shape of one processor's totals in the summary response.
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct ProcessorSummary {
    #[serde(rename = "totalRequests")]
    pub total_requests: i64,
    #[serde(rename = "totalAmount")]
    pub total_amount: f64,
}

/// Response of `GET /payments-summary`.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentsSummary {
    pub default: ProcessorSummary,
    pub fallback: ProcessorSummary,
}
