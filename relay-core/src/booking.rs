use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::trip::TripSummary;
use crate::{CoreError, CoreResult};

pub const MAX_SEATS_PER_BOOKING: i32 = 6;
pub const CANCEL_CUTOFF_MINUTES: i64 = 30;
pub const OTP_GRACE_MINUTES: i64 = 120;

/// Booking status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(CoreError::validation(format!("unknown booking status: {}", other))),
        }
    }
}

/// A rider's reservation of one or more seats on a trip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: Uuid,
    pub rider_id: Uuid,
    pub trip_id: Uuid,
    pub seats: i32,
    pub status: BookingStatus,
    /// bcrypt hash of the boarding code; never serialized.
    #[serde(skip)]
    pub otp_hash: Option<String>,
    pub otp_expires_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    pub fn new_pending(
        rider_id: Uuid,
        trip_id: Uuid,
        seats: i32,
        otp_hash: String,
        otp_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            rider_id,
            trip_id,
            seats,
            status: BookingStatus::Pending,
            otp_hash: Some(otp_hash),
            otp_expires_at: Some(otp_expires_at),
            verified_at: None,
            created_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status != BookingStatus::Cancelled
    }

    /// Open for trip-scoped code matching: active, unverified, unexpired.
    pub fn awaits_boarding(&self, now: DateTime<Utc>) -> bool {
        self.is_active()
            && self.verified_at.is_none()
            && self.otp_hash.is_some()
            && self.otp_expires_at.is_some_and(|exp| exp >= now)
    }
}

/// A booking as returned to clients, with the trip it belongs to.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BookingView {
    #[serde(flatten)]
    pub booking: Booking,
    pub trip: Option<TripSummary>,
}

/// Time windows and limits governing bookings.
#[derive(Debug, Clone, Copy)]
pub struct BookingPolicy {
    pub cancel_cutoff: Duration,
    pub otp_grace: Duration,
    pub max_seats: i32,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            cancel_cutoff: Duration::minutes(CANCEL_CUTOFF_MINUTES),
            otp_grace: Duration::minutes(OTP_GRACE_MINUTES),
            max_seats: MAX_SEATS_PER_BOOKING,
        }
    }
}

impl BookingPolicy {
    pub fn validate_seat_count(&self, seats: i32) -> CoreResult<()> {
        if seats < 1 || seats > self.max_seats {
            return Err(CoreError::validation(format!(
                "seats must be between 1 and {}",
                self.max_seats
            )));
        }
        Ok(())
    }

    /// Cancellations at or after this instant are rejected.
    pub fn cancel_deadline(&self, trip_start: DateTime<Utc>) -> DateTime<Utc> {
        trip_start - self.cancel_cutoff
    }

    pub fn otp_expiry(&self, trip_start: DateTime<Utc>) -> DateTime<Utc> {
        trip_start + self.otp_grace
    }

    /// Regenerated codes re-anchor to `now` once the trip is under way.
    pub fn regenerated_otp_expiry(&self, trip_start: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        trip_start.max(now) + self.otp_grace
    }
}
