use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::booking::Booking;
use relay_core::repository::{BookingRepository, RepoError, RepoResult, ReservationTransactions};
use sqlx::{PgPool, Postgres};
use tracing::debug;
use uuid::Uuid;

use crate::{backend, insert_error};

const BOOKING_COLUMNS: &str = "id, rider_id, trip_id, seats, status, otp_hash, otp_expires_at, verified_at, created_at";

pub struct PgBookingRepository {
    pool: PgPool,
}

impl PgBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    rider_id: Uuid,
    trip_id: Uuid,
    seats: i32,
    status: String,
    otp_hash: Option<String>,
    otp_expires_at: Option<DateTime<Utc>>,
    verified_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = RepoError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: row.id,
            rider_id: row.rider_id,
            trip_id: row.trip_id,
            seats: row.seats,
            status: row
                .status
                .parse()
                .map_err(|_| RepoError::Corrupt(format!("booking {} status {}", row.id, row.status)))?,
            otp_hash: row.otp_hash,
            otp_expires_at: row.otp_expires_at,
            verified_at: row.verified_at,
            created_at: row.created_at,
        })
    }
}

fn into_bookings(rows: Vec<BookingRow>) -> RepoResult<Vec<Booking>> {
    rows.into_iter().map(Booking::try_from).collect()
}

async fn insert_with<'e, E>(executor: E, booking: &Booking) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO bookings (id, rider_id, trip_id, seats, status, otp_hash, otp_expires_at, verified_at, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(booking.id)
    .bind(booking.rider_id)
    .bind(booking.trip_id)
    .bind(booking.seats)
    .bind(booking.status.as_str())
    .bind(&booking.otp_hash)
    .bind(booking.otp_expires_at)
    .bind(booking.verified_at)
    .bind(booking.created_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl BookingRepository for PgBookingRepository {
    async fn insert_booking(&self, booking: &Booking) -> RepoResult<()> {
        insert_with(&self.pool, booking).await.map_err(insert_error)
    }

    async fn get_booking(&self, id: Uuid) -> RepoResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(&format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(Booking::try_from).transpose()
    }

    async fn find_active(&self, rider_id: Uuid, trip_id: Uuid) -> RepoResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings WHERE rider_id = $1 AND trip_id = $2 AND status <> 'cancelled' \
             ORDER BY created_at LIMIT 1",
            BOOKING_COLUMNS
        ))
        .bind(rider_id)
        .bind(trip_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(Booking::try_from).transpose()
    }

    async fn list_by_rider(&self, rider_id: Uuid) -> RepoResult<Vec<Booking>> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings WHERE rider_id = $1 ORDER BY created_at DESC",
            BOOKING_COLUMNS
        ))
        .bind(rider_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        into_bookings(rows)
    }

    async fn list_by_trip(&self, trip_id: Uuid) -> RepoResult<Vec<Booking>> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings WHERE trip_id = $1 ORDER BY created_at ASC",
            BOOKING_COLUMNS
        ))
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        into_bookings(rows)
    }

    async fn store_otp(&self, id: Uuid, otp_hash: &str, expires_at: DateTime<Utc>) -> RepoResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            r#"
            UPDATE bookings SET otp_hash = $2, otp_expires_at = $3, verified_at = NULL, status = 'pending'
            WHERE id = $1 AND status <> 'cancelled'
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        ))
        .bind(id)
        .bind(otp_hash)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(Booking::try_from).transpose()
    }

    async fn mark_verified(&self, id: Uuid, at: DateTime<Utc>) -> RepoResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            r#"
            UPDATE bookings SET status = 'confirmed', verified_at = $2
            WHERE id = $1 AND status = 'pending' AND verified_at IS NULL
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        ))
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(Booking::try_from).transpose()
    }

    async fn mark_cancelled(&self, id: Uuid) -> RepoResult<bool> {
        let result = sqlx::query("UPDATE bookings SET status = 'cancelled' WHERE id = $1 AND status <> 'cancelled'")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl ReservationTransactions for PgBookingRepository {
    async fn reserve_atomically(&self, booking: &Booking, now: DateTime<Utc>) -> RepoResult<bool> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let decremented = sqlx::query(
            r#"
            UPDATE trips SET seats_left = seats_left - $2, updated_at = NOW()
            WHERE id = $1 AND status = 'published' AND start_time > $3 AND seats_left >= $2
            "#,
        )
        .bind(booking.trip_id)
        .bind(booking.seats)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        if decremented.rows_affected() != 1 {
            tx.rollback().await.map_err(backend)?;
            return Ok(false);
        }

        // dropping `tx` on error rolls the decrement back
        insert_with(&mut *tx, booking).await.map_err(insert_error)?;
        tx.commit().await.map_err(backend)?;

        debug!("Reserved {} seat(s) on trip {} for booking {}", booking.seats, booking.trip_id, booking.id);
        Ok(true)
    }

    async fn cancel_atomically(&self, booking: &Booking) -> RepoResult<bool> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let seats: Option<i32> = sqlx::query_scalar(
            "UPDATE bookings SET status = 'cancelled' WHERE id = $1 AND status <> 'cancelled' RETURNING seats",
        )
        .bind(booking.id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?;

        let Some(seats) = seats else {
            tx.rollback().await.map_err(backend)?;
            return Ok(false);
        };

        sqlx::query(
            "UPDATE trips SET seats_left = LEAST(seats_left + $2, total_seats), updated_at = NOW() WHERE id = $1",
        )
        .bind(booking.trip_id)
        .bind(seats)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(true)
    }
}
