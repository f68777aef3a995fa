use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use serde_json::json;

use crate::error::AppError;
use crate::state::AppState;

/// Process-wide Prometheus registry.
pub struct Metrics {
    registry: Registry,
    booking_outcomes: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let booking_outcomes = IntCounterVec::new(
            Opts::new("relay_booking_outcomes_total", "Booking requests by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(booking_outcomes.clone()))?;
        Ok(Self { registry, booking_outcomes })
    }

    /// `outcome` is `created`, `replayed`, `cancelled` or an error kind.
    pub fn record_booking(&self, outcome: &str) {
        self.booking_outcomes.with_label_values(&[outcome]).inc();
    }

    pub fn booking_count(&self, outcome: &str) -> u64 {
        self.booking_outcomes.with_label_values(&[outcome]).get()
    }

    pub fn render(&self) -> Result<String, AppError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| AppError::InternalServerError(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| AppError::InternalServerError(e.to_string()))
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(export))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn export(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let body = state.metrics.render()?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_outcomes() {
        let metrics = Metrics::new().unwrap();
        metrics.record_booking("created");
        metrics.record_booking("created");
        metrics.record_booking("conflict");

        assert_eq!(metrics.booking_count("created"), 2);
        let text = metrics.render().unwrap();
        assert!(text.contains("relay_booking_outcomes_total{outcome=\"created\"} 2"));
        assert!(text.contains("relay_booking_outcomes_total{outcome=\"conflict\"} 1"));
    }
}
