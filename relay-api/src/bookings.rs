use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use relay_booking::IssuedOtp;
use relay_core::booking::{Booking, BookingView};
use relay_shared::{Masked, Principal};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::extract::{AppJson, AppPath};
use crate::state::AppState;
use crate::trips::{OtpBody, VerifiedResponse};

#[derive(Debug, Deserialize)]
pub struct ReserveRequest {
    pub trip_id: Uuid,
    #[serde(default = "one_seat")]
    pub seats: i32,
}

fn one_seat() -> i32 {
    1
}

#[derive(Debug, Serialize)]
struct ReserveResponse {
    booking: Booking,
    #[serde(skip_serializing_if = "Option::is_none")]
    otp: Option<Masked<String>>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", post(reserve))
        .route("/v1/bookings/mine", get(my_bookings))
        .route("/v1/bookings/{id}", get(get_booking))
        .route("/v1/bookings/{id}/cancel", post(cancel_booking))
        .route("/v1/bookings/{id}/otp", post(regenerate_otp))
        .route("/v1/bookings/{id}/verify-otp", post(verify_booking))
}

/// `201` with the one-time code when this call created the booking, `200`
/// with the existing booking otherwise.
async fn reserve(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppJson(req): AppJson<ReserveRequest>,
) -> Result<Response, AppError> {
    let result = state.services.reservations.reserve(&principal, req.trip_id, req.seats).await;
    let reservation = match result {
        Ok(r) => r,
        Err(e) => {
            state.metrics.record_booking(e.kind());
            return Err(e.into());
        }
    };

    let status = if reservation.created {
        state.metrics.record_booking("created");
        info!("Booking {} reserved by {}", reservation.booking.id, principal.id);
        StatusCode::CREATED
    } else {
        state.metrics.record_booking("replayed");
        StatusCode::OK
    };

    let body = ReserveResponse { booking: reservation.booking, otp: reservation.otp };
    Ok((status, Json(body)).into_response())
}

async fn my_bookings(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<BookingView>>, AppError> {
    Ok(Json(state.services.reservations.list_mine(&principal).await?))
}

async fn get_booking(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<BookingView>, AppError> {
    Ok(Json(state.services.reservations.get(&principal, id).await?))
}

async fn cancel_booking(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Booking>, AppError> {
    let booking = state.services.reservations.cancel(&principal, id).await?;
    state.metrics.record_booking("cancelled");
    Ok(Json(booking))
}

async fn regenerate_otp(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<IssuedOtp>, AppError> {
    Ok(Json(state.services.otp.issue(&principal, id).await?))
}

async fn verify_booking(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppPath(id): AppPath<Uuid>,
    AppJson(body): AppJson<OtpBody>,
) -> Result<Json<VerifiedResponse>, AppError> {
    let verified_at = state.services.otp.verify(&principal, id, &body.otp).await?;
    Ok(Json(VerifiedResponse { booking_id: id, verified_at }))
}
