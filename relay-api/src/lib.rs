use axum::{
    http::{header, HeaderName, Method},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod bookings;
pub mod error;
pub mod extract;
pub mod locations;
pub mod metrics;
pub mod middleware;
pub mod payments;
pub mod state;
pub mod trips;

pub use state::AppState;

pub fn app(state: AppState) -> Router {
    // CORS Middleware
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(payments::IDEMPOTENCY_KEY_HEADER),
        ]);

    let authenticated = Router::new()
        .merge(trips::routes())
        .merge(bookings::routes())
        .merge(payments::routes())
        .merge(locations::routes())
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), middleware::auth_middleware));

    Router::new()
        .merge(metrics::routes())
        .merge(trips::public_routes())
        .merge(authenticated)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
