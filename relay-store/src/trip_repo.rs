use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::repository::{RepoError, RepoResult, TripRepository};
use relay_core::trip::{Place, Trip, TripPatch, TripSearch, TripStatus};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::backend;

const TRIP_COLUMNS: &str = "id, driver_id, vehicle_id, kind, route_name, origin, destination, stops, \
     start_time, price_per_seat, total_seats, seats_left, status, created_at, updated_at";

pub struct PgTripRepository {
    pool: PgPool,
}

impl PgTripRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct TripRow {
    id: Uuid,
    driver_id: Uuid,
    vehicle_id: Option<Uuid>,
    kind: String,
    route_name: Option<String>,
    origin: Json<Place>,
    destination: Json<Place>,
    stops: Json<Vec<Place>>,
    start_time: DateTime<Utc>,
    price_per_seat: i64,
    total_seats: i32,
    seats_left: i32,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TripRow> for Trip {
    type Error = RepoError;

    fn try_from(row: TripRow) -> Result<Self, Self::Error> {
        Ok(Trip {
            id: row.id,
            driver_id: row.driver_id,
            vehicle_id: row.vehicle_id,
            kind: row.kind.parse().map_err(|_| RepoError::Corrupt(format!("trip {} kind {}", row.id, row.kind)))?,
            route_name: row.route_name,
            origin: row.origin.0,
            destination: row.destination.0,
            stops: row.stops.0,
            start_time: row.start_time,
            price_per_seat: row.price_per_seat,
            total_seats: row.total_seats,
            seats_left: row.seats_left,
            status: row
                .status
                .parse()
                .map_err(|_| RepoError::Corrupt(format!("trip {} status {}", row.id, row.status)))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_trips(rows: Vec<TripRow>) -> RepoResult<Vec<Trip>> {
    rows.into_iter().map(Trip::try_from).collect()
}

/// `%q%` with LIKE wildcards in `q` escaped.
fn contains_pattern(q: &str) -> String {
    let escaped = q.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{}%", escaped)
}

#[async_trait]
impl TripRepository for PgTripRepository {
    async fn insert_trip(&self, trip: &Trip) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO trips (id, driver_id, vehicle_id, kind, route_name, origin, destination, stops,
                               start_time, price_per_seat, total_seats, seats_left, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(trip.id)
        .bind(trip.driver_id)
        .bind(trip.vehicle_id)
        .bind(trip.kind.as_str())
        .bind(&trip.route_name)
        .bind(Json(&trip.origin))
        .bind(Json(&trip.destination))
        .bind(Json(&trip.stops))
        .bind(trip.start_time)
        .bind(trip.price_per_seat)
        .bind(trip.total_seats)
        .bind(trip.seats_left)
        .bind(trip.status.as_str())
        .bind(trip.created_at)
        .bind(trip.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn get_trip(&self, id: Uuid) -> RepoResult<Option<Trip>> {
        let row = sqlx::query_as::<_, TripRow>(&format!("SELECT {} FROM trips WHERE id = $1", TRIP_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(Trip::try_from).transpose()
    }

    async fn get_trips(&self, ids: &[Uuid]) -> RepoResult<Vec<Trip>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, TripRow>(&format!("SELECT {} FROM trips WHERE id = ANY($1)", TRIP_COLUMNS))
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        into_trips(rows)
    }

    async fn search_trips(&self, query: &TripSearch) -> RepoResult<Vec<Trip>> {
        let (day_start, day_end) = query.day_window().unzip();
        let sql = format!(
            r#"
            SELECT {} FROM trips
            WHERE status = 'published'
              AND ($1::text IS NULL OR origin->>'name' ILIKE $1 OR destination->>'name' ILIKE $1)
              AND ($2::timestamptz IS NULL OR (start_time >= $2 AND start_time < $3))
              AND ($4::int IS NULL OR seats_left >= $4)
              AND ($5::text IS NULL OR kind = $5)
            ORDER BY start_time ASC
            LIMIT $6
            "#,
            TRIP_COLUMNS
        );
        let rows = sqlx::query_as::<_, TripRow>(&sql)
            .bind(query.text().map(contains_pattern))
            .bind(day_start)
            .bind(day_end)
            .bind(query.min_seats())
            .bind(query.kind.map(|k| k.as_str()))
            .bind(query.effective_limit())
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        into_trips(rows)
    }

    async fn list_by_driver(&self, driver_id: Uuid, limit: i64) -> RepoResult<Vec<Trip>> {
        let rows = sqlx::query_as::<_, TripRow>(&format!(
            "SELECT {} FROM trips WHERE driver_id = $1 ORDER BY start_time DESC LIMIT $2",
            TRIP_COLUMNS
        ))
        .bind(driver_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        into_trips(rows)
    }

    async fn try_reserve_seats(&self, id: Uuid, seats: i32, now: DateTime<Utc>) -> RepoResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE trips SET seats_left = seats_left - $2, updated_at = NOW()
            WHERE id = $1 AND status = 'published' AND start_time > $3 AND seats_left >= $2
            "#,
        )
        .bind(id)
        .bind(seats)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_seats(&self, id: Uuid, seats: i32) -> RepoResult<()> {
        sqlx::query(
            "UPDATE trips SET seats_left = LEAST(seats_left + $2, total_seats), updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(seats)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn transition_status(&self, id: Uuid, from: TripStatus, to: TripStatus) -> RepoResult<bool> {
        let result = sqlx::query("UPDATE trips SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2")
            .bind(id)
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn apply_patch(&self, id: Uuid, patch: &TripPatch, now: DateTime<Utc>) -> RepoResult<Option<Trip>> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        // Row lock keeps concurrent reservations from slipping between the
        // booked-seat check and the write.
        let row = sqlx::query_as::<_, TripRow>(&format!("SELECT {} FROM trips WHERE id = $1 FOR UPDATE", TRIP_COLUMNS))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut trip = Trip::try_from(row)?;
        if trip.apply_patch(patch, now).is_err() {
            return Ok(None);
        }

        sqlx::query(
            r#"
            UPDATE trips SET vehicle_id = $2, route_name = $3, origin = $4, destination = $5, stops = $6,
                             start_time = $7, price_per_seat = $8, total_seats = $9, seats_left = $10, updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(trip.id)
        .bind(trip.vehicle_id)
        .bind(&trip.route_name)
        .bind(Json(&trip.origin))
        .bind(Json(&trip.destination))
        .bind(Json(&trip.stops))
        .bind(trip.start_time)
        .bind(trip.price_per_seat)
        .bind(trip.total_seats)
        .bind(trip.seats_left)
        .bind(trip.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(Some(trip))
    }
}
