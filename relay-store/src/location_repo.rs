use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::location::LocationPing;
use relay_core::repository::{LocationRepository, RepoResult};
use sqlx::PgPool;
use uuid::Uuid;

use crate::backend;

pub struct PgLocationRepository {
    pool: PgPool,
}

impl PgLocationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PingRow {
    id: Uuid,
    trip_id: Uuid,
    lat: f64,
    lng: f64,
    speed: Option<f64>,
    heading: Option<f64>,
    ts: DateTime<Utc>,
}

impl From<PingRow> for LocationPing {
    fn from(row: PingRow) -> Self {
        LocationPing {
            id: row.id,
            trip_id: row.trip_id,
            lat: row.lat,
            lng: row.lng,
            speed: row.speed,
            heading: row.heading,
            ts: row.ts,
        }
    }
}

#[async_trait]
impl LocationRepository for PgLocationRepository {
    async fn insert_ping(&self, ping: &LocationPing) -> RepoResult<()> {
        sqlx::query(
            "INSERT INTO trip_locations (id, trip_id, lat, lng, speed, heading, ts) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(ping.id)
        .bind(ping.trip_id)
        .bind(ping.lat)
        .bind(ping.lng)
        .bind(ping.speed)
        .bind(ping.heading)
        .bind(ping.ts)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn recent_pings(&self, trip_id: Uuid, since: Option<DateTime<Utc>>, limit: i64) -> RepoResult<Vec<LocationPing>> {
        let rows = sqlx::query_as::<_, PingRow>(
            r#"
            SELECT id, trip_id, lat, lng, speed, heading, ts FROM trip_locations
            WHERE trip_id = $1 AND ($2::timestamptz IS NULL OR ts >= $2)
            ORDER BY ts DESC
            LIMIT $3
            "#,
        )
        .bind(trip_id)
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows.into_iter().map(LocationPing::from).collect())
    }

    async fn prune_before(&self, trip_id: Uuid, cutoff: DateTime<Utc>) -> RepoResult<u64> {
        let result = sqlx::query("DELETE FROM trip_locations WHERE trip_id = $1 AND ts < $2")
            .bind(trip_id)
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected())
    }
}
