use anyhow::Context;
use chrono::Duration;
use relay_api::{app, AppState};
use relay_booking::{ServiceSettings, Services};
use relay_core::events::{EventPublisher, LogPublisher};
use relay_core::otp::OtpHasher;
use relay_core::rate_limit::{FixedWindowLimiter, RateLimiter};
use relay_core::repository::Repositories;
use relay_store::app_config::Config;
use relay_store::{DbClient, MemoryStore, RedisClient, RedisRateLimiter};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_api=debug,relay_booking=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Campus Relay API on port {}", config.server.port);

    // Persistence
    let repos: Repositories = match &config.database.url {
        Some(url) => {
            let db = DbClient::new(url, config.database.max_connections)
                .await
                .context("Failed to connect to Postgres")?;
            if config.database.run_migrations {
                db.migrate().await.context("Failed to run migrations")?;
            }
            db.repositories()
        }
        None => {
            tracing::warn!("No database configured, using the in-memory store");
            Arc::new(MemoryStore::with_transactions()).repositories()
        }
    };

    // Rate limiting and event fan-out
    let pings_per_second = config.locations.max_pings_per_second;
    let (limiter, publisher): (Arc<dyn RateLimiter>, Arc<dyn EventPublisher>) = match &config.redis.url {
        Some(url) => {
            let redis = RedisClient::new(url).await.context("Failed to create Redis client")?;
            redis.ping().await.context("Failed to connect to Redis")?;
            (
                Arc::new(RedisRateLimiter::new(redis.clone(), pings_per_second, 1)),
                Arc::new(redis),
            )
        }
        None => {
            tracing::warn!("No Redis configured, rate limits are per process and events are only logged");
            (Arc::new(FixedWindowLimiter::per_second(pings_per_second)), Arc::new(LogPublisher))
        }
    };

    let settings = ServiceSettings {
        policy: config.booking_rules.policy(),
        hasher: OtpHasher::new(config.booking_rules.otp_hash_cost),
        payee: config.payments.payee(),
        location_retention: Duration::days(config.locations.retention_days),
    };
    let services = Services::new(repos, publisher, limiter, settings);

    let app_state = AppState::new(services, config.auth.jwt_secret.clone()).context("Failed to set up metrics")?;
    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
