use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use relay_api::middleware::Claims;
use relay_api::{app, AppState};
use relay_booking::{ServiceSettings, Services};
use relay_core::events::LogPublisher;
use relay_core::otp::OtpHasher;
use relay_core::payment::UpiPayee;
use relay_core::rate_limit::FixedWindowLimiter;
use relay_store::MemoryStore;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "test-secret";

fn test_app() -> Router {
    let store = Arc::new(MemoryStore::with_transactions());
    let mut settings = ServiceSettings::new(UpiPayee { vpa: "relay@upi".into(), name: "Campus Relay".into() });
    settings.hasher = OtpHasher::new(4);
    let services = Services::new(
        store.repositories(),
        Arc::new(LogPublisher),
        Arc::new(FixedWindowLimiter::per_second(2)),
        settings,
    );
    app(AppState::new(services, SECRET).unwrap())
}

fn token(sub: Uuid, role: &str) -> String {
    let claims = Claims {
        sub: sub.to_string(),
        role: role.to_string(),
        exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

async fn call(app: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn trip_body(seats: i32) -> Value {
    json!({
        "origin": { "name": "Main Gate", "lat": 12.97, "lng": 77.59 },
        "destination": { "name": "City Centre", "lat": 12.98, "lng": 77.60 },
        "start_time": (Utc::now() + Duration::hours(3)).to_rfc3339(),
        "price_per_seat": 6000,
        "total_seats": seats,
    })
}

async fn create_trip(app: &Router, driver: &str, seats: i32) -> String {
    let (status, trip) = call(app, Method::POST, "/v1/trips", Some(driver), Some(trip_body(seats))).await;
    assert_eq!(status, StatusCode::CREATED);
    trip["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_and_public_search() {
    let app = test_app();
    let driver = token(Uuid::new_v4(), "driver");
    let trip_id = create_trip(&app, &driver, 3).await;

    let (status, body) = call(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, trips) = call(&app, Method::GET, "/v1/trips/search?q=centre&seats=2", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(trips.as_array().unwrap().len(), 1);

    let (status, trip) = call(&app, Method::GET, &format!("/v1/trips/{}", trip_id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(trip["seats_left"], 3);
}

#[tokio::test]
async fn test_authentication_required() {
    let app = test_app();

    let (status, body) = call(&app, Method::GET, "/v1/bookings/mine", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "unauthorized");

    let (status, _) = call(&app, Method::GET, "/v1/bookings/mine", Some("not.a.jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let forged = {
        let claims = Claims { sub: Uuid::new_v4().to_string(), role: "admin".into(), exp: usize::MAX / 2 };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(b"wrong-secret")).unwrap()
    };
    let (status, _) = call(&app, Method::GET, "/v1/bookings/mine", Some(&forged), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // riders cannot create trips
    let rider = token(Uuid::new_v4(), "rider");
    let (status, body) = call(&app, Method::POST, "/v1/trips", Some(&rider), Some(trip_body(3))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "forbidden");
}

#[tokio::test]
async fn test_malformed_input_is_a_validation_error() {
    let app = test_app();
    let rider = token(Uuid::new_v4(), "rider");
    let trip_id = Uuid::new_v4();

    let (status, body) = call(&app, Method::POST, "/v1/bookings", Some(&rider), Some(json!({ "trip_id": trip_id, "seats": "two" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation_error");
    assert!(body["error"].as_str().unwrap().starts_with("Validation failed"));

    let (status, body) = call(&app, Method::POST, "/v1/bookings/not-a-uuid/verify-otp", Some(&rider), Some(json!({ "otp": "123456" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation_error");

    let (status, body) = call(&app, Method::GET, "/v1/trips/search?seats=lots", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation_error");

    // no content type
    let request = Request::builder()
        .method(Method::POST)
        .uri("/v1/bookings")
        .header("authorization", format!("Bearer {}", rider))
        .body(Body::from(json!({ "trip_id": trip_id }).to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap()).unwrap();
    assert_eq!(body["kind"], "validation_error");
}

#[tokio::test]
async fn test_reservation_and_boarding_flow() {
    let app = test_app();
    let driver = token(Uuid::new_v4(), "driver");
    let rider = token(Uuid::new_v4(), "rider");
    let trip_id = create_trip(&app, &driver, 3).await;
    let request = json!({ "trip_id": trip_id, "seats": 2 });

    let (status, created) = call(&app, Method::POST, "/v1/bookings", Some(&rider), Some(request.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let booking_id = created["booking"]["id"].as_str().unwrap().to_string();
    let otp = created["otp"].as_str().unwrap().to_string();
    assert_eq!(otp.len(), 6);
    assert!(created["booking"].get("otp_hash").is_none());

    // idempotent repeat
    let (status, again) = call(&app, Method::POST, "/v1/bookings", Some(&rider), Some(request)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["booking"]["id"], created["booking"]["id"]);
    assert!(again.get("otp").is_none());

    // only one seat left
    let other = token(Uuid::new_v4(), "rider");
    let (status, body) = call(&app, Method::POST, "/v1/bookings", Some(&other), Some(json!({ "trip_id": trip_id, "seats": 2 }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "conflict");

    let verify_uri = format!("/v1/bookings/{}/verify-otp", booking_id);
    let wrong = format!("{:06}", (otp.parse::<u32>().unwrap() + 1) % 1_000_000);
    let (status, body) = call(&app, Method::POST, &verify_uri, Some(&driver), Some(json!({ "otp": wrong }))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "authentication_mismatch");

    let (status, body) = call(&app, Method::POST, &verify_uri, Some(&rider), Some(json!({ "otp": otp }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "forbidden");

    let (status, body) = call(&app, Method::POST, &verify_uri, Some(&driver), Some(json!({ "otp": otp }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["booking_id"], booking_id.as_str());

    let (_, booking) = call(&app, Method::GET, &format!("/v1/bookings/{}", booking_id), Some(&rider), None).await;
    assert_eq!(booking["status"], "confirmed");
    assert_eq!(booking["trip"]["id"], trip_id.as_str());

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(text.to_vec()).unwrap();
    assert!(text.contains("relay_booking_outcomes_total{outcome=\"created\"} 1"));
    assert!(text.contains("relay_booking_outcomes_total{outcome=\"replayed\"} 1"));
    assert!(text.contains("relay_booking_outcomes_total{outcome=\"conflict\"} 1"));
}

#[tokio::test]
async fn test_cancel_and_trip_lifecycle() {
    let app = test_app();
    let driver = token(Uuid::new_v4(), "driver");
    let rider = token(Uuid::new_v4(), "rider");
    let trip_id = create_trip(&app, &driver, 3).await;

    let (_, created) = call(&app, Method::POST, "/v1/bookings", Some(&rider), Some(json!({ "trip_id": trip_id }))).await;
    let booking_id = created["booking"]["id"].as_str().unwrap().to_string();
    assert_eq!(created["booking"]["seats"], 1);

    let (status, cancelled) = call(&app, Method::POST, &format!("/v1/bookings/{}/cancel", booking_id), Some(&rider), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");

    let (_, trip) = call(&app, Method::GET, &format!("/v1/trips/{}", trip_id), None, None).await;
    assert_eq!(trip["seats_left"], 3);

    let (status, trip) = call(&app, Method::POST, &format!("/v1/trips/{}/start", trip_id), Some(&driver), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(trip["status"], "ongoing");

    let (status, body) = call(&app, Method::POST, &format!("/v1/trips/{}/publish", trip_id), Some(&driver), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "invalid_state");

    let (status, body) = call(&app, Method::GET, &format!("/v1/trips/{}", Uuid::new_v4()), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn test_payment_intent_idempotency_header() {
    let app = test_app();
    let driver = token(Uuid::new_v4(), "driver");
    let rider = token(Uuid::new_v4(), "rider");
    let trip_id = create_trip(&app, &driver, 3).await;
    let (_, created) = call(&app, Method::POST, "/v1/bookings", Some(&rider), Some(json!({ "trip_id": trip_id, "seats": 2 }))).await;
    let booking_id = created["booking"]["id"].as_str().unwrap().to_string();

    let intent_request = |key: &str| {
        Request::builder()
            .method(Method::POST)
            .uri("/v1/payments/intent")
            .header("authorization", format!("Bearer {}", rider))
            .header("content-type", "application/json")
            .header("idempotency-key", key)
            .body(Body::from(json!({ "booking_id": booking_id }).to_string()))
            .unwrap()
    };

    let first = app.clone().oneshot(intent_request("pay-1")).await.unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);
    let first: Value = serde_json::from_slice(&axum::body::to_bytes(first.into_body(), usize::MAX).await.unwrap()).unwrap();
    assert_eq!(first["amount"], 12000);
    assert!(first["upi_uri"].as_str().unwrap().starts_with("upi://pay?"));

    let second = app.clone().oneshot(intent_request("pay-1")).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let second: Value = serde_json::from_slice(&axum::body::to_bytes(second.into_body(), usize::MAX).await.unwrap()).unwrap();
    assert_eq!(second["id"], first["id"]);

    let intent_id = first["id"].as_str().unwrap();
    let (status, done) = call(&app, Method::POST, &format!("/v1/payments/{}/status", intent_id), Some(&driver), Some(json!({ "status": "success" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["status"], "success");

    let (status, latest) = call(&app, Method::GET, &format!("/v1/payments/by-booking/{}", booking_id), Some(&rider), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(latest["id"], first["id"]);

    let qr_request = |who: &str| {
        Request::builder()
            .uri(format!("/v1/payments/{}/qr", intent_id))
            .header("authorization", format!("Bearer {}", who))
            .body(Body::empty())
            .unwrap()
    };
    let qr = app.clone().oneshot(qr_request(&rider)).await.unwrap();
    assert_eq!(qr.status(), StatusCode::OK);
    assert_eq!(qr.headers()["content-type"], "image/svg+xml; charset=utf-8");
    let svg = axum::body::to_bytes(qr.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8(svg.to_vec()).unwrap().contains("<svg"));

    let stranger = token(Uuid::new_v4(), "rider");
    let denied = app.clone().oneshot(qr_request(&stranger)).await.unwrap();
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_location_rate_limit() {
    let app = test_app();
    let driver = token(Uuid::new_v4(), "driver");
    let trip_id = create_trip(&app, &driver, 3).await;
    let uri = format!("/v1/locations/{}", trip_id);
    let ping = json!({ "lat": 12.97, "lng": 77.59 });

    for _ in 0..2 {
        let (status, _) = call(&app, Method::POST, &uri, Some(&driver), Some(ping.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let (status, body) = call(&app, Method::POST, &uri, Some(&driver), Some(ping)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["kind"], "rate_limited");

    let (status, trail) = call(&app, Method::GET, &uri, Some(&driver), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(trail.as_array().unwrap().len(), 2);

    let stranger = token(Uuid::new_v4(), "rider");
    let (status, _) = call(&app, Method::GET, &uri, Some(&stranger), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
