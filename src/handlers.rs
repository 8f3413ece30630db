//! HTTP endpoint handlers
//!
//! Thin adapters between axum and the services: decode, validate, delegate,
//! map errors to status codes. The submit path answers as soon as the job is
//! queued; dispatch is asynchronous.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::SubmitError;
use crate::models::PaymentRequest;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/payments", post(create_payment))
        .route("/payments-summary", get(payments_summary))
        .with_state(state)
}

type ApiResponse = (StatusCode, Json<serde_json::Value>);

fn error_response(status: StatusCode, message: impl Into<String>) -> ApiResponse {
    (status, Json(json!({ "error": message.into() })))
}

/// `POST /payments`: validate and enqueue; `200 {}` means the payment is
/// admitted for at-least-once processing.
async fn create_payment(
    State(state): State<AppState>,
    payload: Result<Json<PaymentRequest>, JsonRejection>,
) -> ApiResponse {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    if request.correlation_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "correlationId must not be empty");
    }
    if request.amount <= Decimal::ZERO {
        return error_response(StatusCode::BAD_REQUEST, "amount must be greater than zero");
    }

    debug!(
        correlation_id = %request.correlation_id,
        amount = %request.amount,
        "payment request accepted"
    );

    match state.payment_service.submit(request) {
        Ok(()) => (StatusCode::OK, Json(json!({}))),
        Err(SubmitError::QueueFull) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, "queue full")
        }
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct SummaryParams {
    from: Option<String>,
    to: Option<String>,
}

/// `GET /payments-summary?from=&to=`: totals per processor. The window is
/// validated for API compatibility but totals cover the process lifetime.
async fn payments_summary(
    State(state): State<AppState>,
    Query(params): Query<SummaryParams>,
) -> ApiResponse {
    let (Some(from), Some(to)) = (params.from.as_deref(), params.to.as_deref()) else {
        return error_response(StatusCode::BAD_REQUEST, "from and to parameters are required");
    };

    let Ok(from) = DateTime::parse_from_rfc3339(from) else {
        return error_response(StatusCode::BAD_REQUEST, "invalid from date format");
    };
    let Ok(to) = DateTime::parse_from_rfc3339(to) else {
        return error_response(StatusCode::BAD_REQUEST, "invalid to date format");
    };

    let from: DateTime<Utc> = from.into();
    let to: DateTime<Utc> = to.into();
    if to < from {
        return error_response(StatusCode::BAD_REQUEST, "to must not precede from");
    }
    if to - from > Duration::days(365) {
        return error_response(StatusCode::BAD_REQUEST, "time range exceeds 365 days");
    }

    let summary = state.payment_service.summary();
    match serde_json::to_value(&summary) {
        Ok(value) => (StatusCode::OK, Json(value)),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}
