use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, patch, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use relay_core::booking::Booking;
use relay_core::trip::{NewTrip, Trip, TripPatch, TripSearch};
use relay_shared::Principal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::extract::{AppJson, AppPath, AppQuery};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct OtpBody {
    pub otp: String,
}

#[derive(Debug, Serialize)]
pub struct VerifiedResponse {
    pub booking_id: Uuid,
    pub verified_at: DateTime<Utc>,
}

/// Anonymous browsing.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/trips/search", get(search_trips))
        .route("/v1/trips/{id}", get(get_trip))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/trips", post(create_trip))
        .route("/v1/trips/mine", get(my_trips))
        .route("/v1/trips/{id}", patch(update_trip))
        .route("/v1/trips/{id}/publish", post(publish_trip))
        .route("/v1/trips/{id}/start", post(start_trip))
        .route("/v1/trips/{id}/complete", post(complete_trip))
        .route("/v1/trips/{id}/cancel", post(cancel_trip))
        .route("/v1/trips/{id}/verify-otp", post(verify_on_trip))
        .route("/v1/trips/{id}/bookings", get(trip_bookings))
}

async fn search_trips(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<TripSearch>,
) -> Result<Json<Vec<Trip>>, AppError> {
    Ok(Json(state.services.trips.search(&query).await?))
}

async fn get_trip(State(state): State<AppState>, AppPath(id): AppPath<Uuid>) -> Result<Json<Trip>, AppError> {
    Ok(Json(state.services.trips.get(id).await?))
}

async fn create_trip(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppJson(input): AppJson<NewTrip>,
) -> Result<(StatusCode, Json<Trip>), AppError> {
    let trip = state.services.trips.create(&principal, input).await?;
    Ok((StatusCode::CREATED, Json(trip)))
}

async fn my_trips(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<Trip>>, AppError> {
    Ok(Json(state.services.trips.list_mine(&principal).await?))
}

async fn update_trip(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppPath(id): AppPath<Uuid>,
    AppJson(patch): AppJson<TripPatch>,
) -> Result<Json<Trip>, AppError> {
    Ok(Json(state.services.trips.update(&principal, id, patch).await?))
}

async fn publish_trip(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Trip>, AppError> {
    Ok(Json(state.services.trips.publish(&principal, id).await?))
}

async fn start_trip(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Trip>, AppError> {
    Ok(Json(state.services.trips.start(&principal, id).await?))
}

async fn complete_trip(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Trip>, AppError> {
    Ok(Json(state.services.trips.complete(&principal, id).await?))
}

async fn cancel_trip(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Trip>, AppError> {
    Ok(Json(state.services.trips.cancel(&principal, id).await?))
}

async fn verify_on_trip(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppPath(id): AppPath<Uuid>,
    AppJson(body): AppJson<OtpBody>,
) -> Result<Json<VerifiedResponse>, AppError> {
    let (booking_id, verified_at) = state.services.otp.verify_by_trip(&principal, id, &body.otp).await?;
    Ok(Json(VerifiedResponse { booking_id, verified_at }))
}

async fn trip_bookings(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Vec<Booking>>, AppError> {
    Ok(Json(state.services.reservations.list_for_trip(&principal, id).await?))
}
