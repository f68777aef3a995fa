use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use relay_core::payment::{PaymentIntent, PaymentOutcome};
use relay_core::CoreError;
use relay_shared::Principal;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::extract::{AppJson, AppPath};
use crate::state::AppState;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

#[derive(Debug, Deserialize)]
pub struct CreateIntentRequest {
    pub booking_id: Uuid,
    /// Paise; defaults to price per seat times seats.
    pub amount: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: PaymentOutcome,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/payments/intent", post(create_intent))
        .route("/v1/payments/{id}/status", post(finalize_intent))
        .route("/v1/payments/{id}/qr", get(intent_qr))
        .route("/v1/payments/by-booking/{booking_id}", get(latest_for_booking))
}

/// `201` for a new intent, `200` when the idempotency key replays one.
async fn create_intent(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    AppJson(req): AppJson<CreateIntentRequest>,
) -> Result<(StatusCode, Json<PaymentIntent>), AppError> {
    let key = match headers.get(IDEMPOTENCY_KEY_HEADER) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| CoreError::validation("Idempotency-Key must be visible ASCII"))?,
        ),
        None => None,
    };

    let issued = state
        .services
        .payments
        .create_intent(&principal, req.booking_id, req.amount, key)
        .await?;
    let status = if issued.created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(issued.intent)))
}

async fn finalize_intent(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppPath(id): AppPath<Uuid>,
    AppJson(req): AppJson<StatusRequest>,
) -> Result<Json<PaymentIntent>, AppError> {
    Ok(Json(state.services.payments.finalize(&principal, id, req.status).await?))
}

async fn intent_qr(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppPath(id): AppPath<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let svg = state.services.payments.qr_svg(&principal, id).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "image/svg+xml; charset=utf-8"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        svg,
    ))
}

async fn latest_for_booking(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppPath(booking_id): AppPath<Uuid>,
) -> Result<Json<PaymentIntent>, AppError> {
    let intent = state
        .services
        .payments
        .latest_for_booking(&principal, booking_id)
        .await?
        .ok_or_else(|| CoreError::not_found("No payment intent for this booking"))?;
    Ok(Json(intent))
}
