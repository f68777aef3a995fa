use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CoreError, CoreResult};

pub const DEFAULT_TRAIL_LIMIT: i64 = 100;
pub const MAX_TRAIL_LIMIT: i64 = 500;

/// One live position reported by the driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationPing {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub lat: f64,
    pub lng: f64,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPing {
    pub lat: f64,
    pub lng: f64,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    /// Client timestamp; server time when absent.
    pub ts: Option<DateTime<Utc>>,
}

impl NewPing {
    pub fn validate(&self) -> CoreResult<()> {
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(CoreError::validation("lat must be within -90..90"));
        }
        if !(-180.0..=180.0).contains(&self.lng) {
            return Err(CoreError::validation("lng must be within -180..180"));
        }
        if let Some(speed) = self.speed {
            if !(0.0..=300.0).contains(&speed) {
                return Err(CoreError::validation("speed must be within 0..300"));
            }
        }
        if let Some(heading) = self.heading {
            if !(0.0..=360.0).contains(&heading) {
                return Err(CoreError::validation("heading must be within 0..360"));
            }
        }
        Ok(())
    }

    pub fn into_ping(self, trip_id: Uuid, now: DateTime<Utc>) -> LocationPing {
        LocationPing {
            id: Uuid::new_v4(),
            trip_id,
            lat: self.lat,
            lng: self.lng,
            speed: self.speed,
            heading: self.heading,
            ts: self.ts.unwrap_or(now),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrailQuery {
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl TrailQuery {
    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_TRAIL_LIMIT).clamp(1, MAX_TRAIL_LIMIT)
    }
}
