//! In-memory success totals per processor
//!
//! Counters only grow and cover the process lifetime. The summary endpoint's
//! `from`/`to` parameters are validated at the HTTP boundary but do not
//! filter here.

use std::collections::HashMap;
use std::sync::RwLock;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::models::{PaymentsSummary, Processor, ProcessorSummary, PROBE_ORDER};

#[derive(Debug, Default, Clone)]
struct Totals {
    total_requests: i64,
    total_amount: Decimal,
}

pub struct StatsAggregator {
    totals: RwLock<HashMap<Processor, Totals>>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        let totals = PROBE_ORDER
            .iter()
            .map(|p| (*p, Totals::default()))
            .collect();
        Self {
            totals: RwLock::new(totals),
        }
    }

    /// Record one successfully dispatched payment.
    pub fn add(&self, processor: Processor, amount: Decimal) {
        let Ok(mut totals) = self.totals.write() else {
            return;
        };
        let entry = totals.entry(processor).or_default();
        entry.total_requests += 1;
        entry.total_amount += amount;
    }

    /// Snapshot of the lifetime totals.
    pub fn summary(&self) -> PaymentsSummary {
        let totals = match self.totals.read() {
            Ok(totals) => totals,
            Err(_) => {
                return PaymentsSummary {
                    default: ProcessorSummary::default(),
                    fallback: ProcessorSummary::default(),
                }
            }
        };
        PaymentsSummary {
            default: to_wire(totals.get(&Processor::Default)),
            fallback: to_wire(totals.get(&Processor::Fallback)),
        }
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

fn to_wire(totals: Option<&Totals>) -> ProcessorSummary {
    let Some(totals) = totals else {
        return ProcessorSummary::default();
    };
    ProcessorSummary {
        total_requests: totals.total_requests,
        total_amount: totals.total_amount.to_f64().unwrap_or(0.0),
    }
}
