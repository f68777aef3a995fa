use relay_core::repository::Repositories;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::booking_repo::PgBookingRepository;
use crate::location_repo::PgLocationRepository;
use crate::payment_repo::PgPaymentRepository;
use crate::trip_repo::PgTripRepository;

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    /// Postgres-backed repositories sharing this pool.
    pub fn repositories(&self) -> Repositories {
        let bookings = Arc::new(PgBookingRepository::new(self.pool.clone()));
        Repositories {
            trips: Arc::new(PgTripRepository::new(self.pool.clone())),
            bookings: bookings.clone(),
            payments: Arc::new(PgPaymentRepository::new(self.pool.clone())),
            locations: Arc::new(PgLocationRepository::new(self.pool.clone())),
            reservations: Some(bookings),
        }
    }
}
