use axum::{
    extract::State,
    http::StatusCode,
    routing::post,
    Extension, Json, Router,
};
use relay_core::location::{LocationPing, NewPing, TrailQuery};
use relay_shared::Principal;
use uuid::Uuid;

use crate::error::AppError;
use crate::extract::{AppJson, AppPath, AppQuery};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/locations/{trip_id}", post(post_ping).get(trail))
}

async fn post_ping(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppPath(trip_id): AppPath<Uuid>,
    AppJson(ping): AppJson<NewPing>,
) -> Result<(StatusCode, Json<LocationPing>), AppError> {
    let ping = state.services.locations.post_ping(&principal, trip_id, ping).await?;
    Ok((StatusCode::CREATED, Json(ping)))
}

async fn trail(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    AppPath(trip_id): AppPath<Uuid>,
    AppQuery(query): AppQuery<TrailQuery>,
) -> Result<Json<Vec<LocationPing>>, AppError> {
    Ok(Json(state.services.locations.trail(&principal, trip_id, &query).await?))
}
