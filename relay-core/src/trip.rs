use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{CoreError, CoreResult};

pub const MAX_TOTAL_SEATS: i32 = 60;
pub const MAX_STOPS: usize = 10;
/// New trips must start at least this far in the future.
pub const MIN_LEAD_MINUTES: i64 = 5;
pub const DEFAULT_SEARCH_LIMIT: i64 = 20;
pub const MAX_SEARCH_LIMIT: i64 = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TripKind {
    #[default]
    Carpool,
    Shuttle,
}

impl TripKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripKind::Carpool => "carpool",
            TripKind::Shuttle => "shuttle",
        }
    }
}

impl FromStr for TripKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "carpool" => Ok(TripKind::Carpool),
            "shuttle" => Ok(TripKind::Shuttle),
            other => Err(CoreError::validation(format!("unknown trip kind: {}", other))),
        }
    }
}

/// Trip status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TripStatus {
    Draft,
    Published,
    Ongoing,
    Completed,
    Cancelled,
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Draft => "draft",
            TripStatus::Published => "published",
            TripStatus::Ongoing => "ongoing",
            TripStatus::Completed => "completed",
            TripStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TripStatus::Completed | TripStatus::Cancelled)
    }

    /// Target status of `action` from `self`, or `InvalidState` when the
    /// lifecycle does not allow it. Publishing a published trip is a no-op.
    pub fn apply(self, action: TripAction) -> CoreResult<TripStatus> {
        use TripStatus::*;

        let next = match (action, self) {
            (TripAction::Publish, Draft | Published) => Published,
            (TripAction::Start, Published) => Ongoing,
            (TripAction::Complete, Ongoing) => Completed,
            (TripAction::Cancel, Draft | Published | Ongoing) => Cancelled,
            (TripAction::Publish, _) => {
                return Err(CoreError::invalid_state(format!("Cannot publish a {} trip", self)))
            }
            (TripAction::Start, _) => {
                return Err(CoreError::invalid_state("Trip must be published to start"))
            }
            (TripAction::Complete, _) => {
                return Err(CoreError::invalid_state("Trip must be ongoing to complete"))
            }
            (TripAction::Cancel, _) => {
                return Err(CoreError::invalid_state(format!("Trip already {}", self)))
            }
        };
        Ok(next)
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TripStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(TripStatus::Draft),
            "published" => Ok(TripStatus::Published),
            "ongoing" => Ok(TripStatus::Ongoing),
            "completed" => Ok(TripStatus::Completed),
            "cancelled" => Ok(TripStatus::Cancelled),
            other => Err(CoreError::validation(format!("unknown trip status: {}", other))),
        }
    }
}

/// Driver-initiated lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripAction {
    Publish,
    Start,
    Complete,
    Cancel,
}

/// A named point with coordinates, optionally pinned to a preset hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Place {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub_id: Option<Uuid>,
}

impl Place {
    pub fn validate(&self, field: &str) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::validation(format!("{}.name required", field)));
        }
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(CoreError::validation(format!("{}.lat must be within -90..90", field)));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(CoreError::validation(format!("{}.lng must be within -180..180", field)));
        }
        Ok(())
    }
}

/// A scheduled, priced, seat-limited ride offered by a driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trip {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub vehicle_id: Option<Uuid>,
    pub kind: TripKind,
    pub route_name: Option<String>,
    pub origin: Place,
    pub destination: Place,
    pub stops: Vec<Place>,
    pub start_time: DateTime<Utc>,
    /// Minor units (paise).
    pub price_per_seat: i64,
    pub total_seats: i32,
    pub seats_left: i32,
    pub status: TripStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trip {
    pub fn booked_seats(&self) -> i32 {
        self.total_seats - self.seats_left
    }

    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now
    }

    pub fn summary(&self) -> TripSummary {
        TripSummary {
            id: self.id,
            kind: self.kind,
            route_name: self.route_name.clone(),
            origin: self.origin.clone(),
            destination: self.destination.clone(),
            start_time: self.start_time,
            price_per_seat: self.price_per_seat,
        }
    }

    /// Applies an edit, enforcing the editing window and the booked-seat
    /// floor. `seats_left` is recomputed so the booked count is preserved.
    pub fn apply_patch(&mut self, patch: &TripPatch, now: DateTime<Utc>) -> CoreResult<()> {
        if self.status.is_terminal() {
            return Err(CoreError::invalid_state(format!("Cannot modify a {} trip", self.status)));
        }
        if self.has_started(now) {
            return Err(CoreError::invalid_state("Cannot modify a trip that has started"));
        }

        if let Some(total) = patch.total_seats {
            let booked = self.booked_seats();
            if total < booked {
                return Err(CoreError::invalid_state(format!(
                    "total_seats cannot be less than already booked ({})",
                    booked
                )));
            }
            self.seats_left = total - booked;
            self.total_seats = total;
        }
        if let Some(price) = patch.price_per_seat {
            self.price_per_seat = price;
        }
        if let Some(start) = patch.start_time {
            self.start_time = start;
        }
        if let Some(vehicle) = patch.vehicle_id {
            self.vehicle_id = Some(vehicle);
        }
        if let Some(origin) = &patch.origin {
            self.origin = origin.clone();
        }
        if let Some(destination) = &patch.destination {
            self.destination = destination.clone();
        }
        if let Some(stops) = &patch.stops {
            self.stops = stops.clone();
        }
        if let Some(name) = &patch.route_name {
            self.route_name = Some(name.clone());
        }
        self.updated_at = now;
        Ok(())
    }
}

/// Trip fields shown alongside a booking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TripSummary {
    pub id: Uuid,
    pub kind: TripKind,
    pub route_name: Option<String>,
    pub origin: Place,
    pub destination: Place,
    pub start_time: DateTime<Utc>,
    pub price_per_seat: i64,
}

/// Input for creating a trip.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTrip {
    #[serde(default)]
    pub kind: TripKind,
    pub route_name: Option<String>,
    #[serde(default)]
    pub stops: Vec<Place>,
    pub origin: Place,
    pub destination: Place,
    pub start_time: DateTime<Utc>,
    pub price_per_seat: i64,
    pub total_seats: i32,
    pub vehicle_id: Option<Uuid>,
    /// Keep the trip unpublished after creation.
    #[serde(default)]
    pub draft: bool,
}

impl NewTrip {
    pub fn validate(&self, now: DateTime<Utc>) -> CoreResult<()> {
        self.origin.validate("origin")?;
        self.destination.validate("destination")?;
        validate_stops(self.kind, &self.stops)?;
        validate_route_name(self.route_name.as_deref())?;

        if self.kind == TripKind::Shuttle {
            if self.origin.hub_id.is_none() {
                return Err(CoreError::validation("Shuttle must start at a hub"));
            }
            if self.destination.hub_id.is_none() {
                return Err(CoreError::validation("Shuttle must end at a hub"));
            }
        }
        if self.start_time <= now + Duration::minutes(MIN_LEAD_MINUTES) {
            return Err(CoreError::validation(format!(
                "start_time must be at least {} minutes in the future",
                MIN_LEAD_MINUTES
            )));
        }
        validate_price(self.price_per_seat)?;
        validate_total_seats(self.total_seats)?;
        Ok(())
    }

    pub fn into_trip(self, driver_id: Uuid, now: DateTime<Utc>) -> Trip {
        let route_name = match (self.route_name, self.kind) {
            (Some(name), _) => Some(name),
            (None, TripKind::Shuttle) => Some(format!(
                "{} → {} Shuttle",
                self.origin.name, self.destination.name
            )),
            (None, TripKind::Carpool) => None,
        };

        Trip {
            id: Uuid::new_v4(),
            driver_id,
            vehicle_id: self.vehicle_id,
            kind: self.kind,
            route_name,
            origin: self.origin,
            destination: self.destination,
            stops: self.stops,
            start_time: self.start_time,
            price_per_seat: self.price_per_seat,
            total_seats: self.total_seats,
            seats_left: self.total_seats,
            status: if self.draft { TripStatus::Draft } else { TripStatus::Published },
            created_at: now,
            updated_at: now,
        }
    }
}

/// Editable trip fields; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TripPatch {
    pub price_per_seat: Option<i64>,
    pub total_seats: Option<i32>,
    pub start_time: Option<DateTime<Utc>>,
    pub vehicle_id: Option<Uuid>,
    pub origin: Option<Place>,
    pub destination: Option<Place>,
    pub stops: Option<Vec<Place>>,
    pub route_name: Option<String>,
}

impl TripPatch {
    /// Shape checks that do not depend on the stored trip.
    pub fn validate(&self, kind: TripKind, now: DateTime<Utc>) -> CoreResult<()> {
        if let Some(price) = self.price_per_seat {
            validate_price(price)?;
        }
        if let Some(total) = self.total_seats {
            validate_total_seats(total)?;
        }
        if let Some(start) = self.start_time {
            if start <= now {
                return Err(CoreError::validation("start_time must be in the future"));
            }
        }
        if let Some(origin) = &self.origin {
            origin.validate("origin")?;
        }
        if let Some(destination) = &self.destination {
            destination.validate("destination")?;
        }
        if let Some(stops) = &self.stops {
            validate_stops(kind, stops)?;
        }
        validate_route_name(self.route_name.as_deref())?;
        Ok(())
    }
}

fn validate_stops(kind: TripKind, stops: &[Place]) -> CoreResult<()> {
    if stops.len() > MAX_STOPS {
        return Err(CoreError::validation(format!("at most {} stops allowed", MAX_STOPS)));
    }
    if kind == TripKind::Carpool && !stops.is_empty() {
        return Err(CoreError::validation("Stops are only allowed for shuttle trips"));
    }
    for (i, stop) in stops.iter().enumerate() {
        stop.validate(&format!("stops[{}]", i))?;
    }
    Ok(())
}

fn validate_route_name(name: Option<&str>) -> CoreResult<()> {
    match name {
        Some(n) if n.trim().is_empty() || n.chars().count() > 80 => {
            Err(CoreError::validation("route_name must be 1-80 characters"))
        }
        _ => Ok(()),
    }
}

fn validate_price(price: i64) -> CoreResult<()> {
    if price < 0 {
        return Err(CoreError::validation("price_per_seat cannot be negative"));
    }
    Ok(())
}

fn validate_total_seats(total: i32) -> CoreResult<()> {
    if !(1..=MAX_TOTAL_SEATS).contains(&total) {
        return Err(CoreError::validation(format!(
            "total_seats must be between 1 and {}",
            MAX_TOTAL_SEATS
        )));
    }
    Ok(())
}

/// Public search over published trips.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TripSearch {
    pub q: Option<String>,
    pub date: Option<NaiveDate>,
    pub seats: Option<i32>,
    pub kind: Option<TripKind>,
    pub limit: Option<i64>,
}

impl TripSearch {
    pub fn effective_limit(&self) -> i64 {
        self.limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .min(MAX_SEARCH_LIMIT)
    }

    /// `[start, end)` of the requested UTC day.
    pub fn day_window(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.date.and_then(|d| {
            let start = d.and_hms_opt(0, 0, 0)?.and_utc();
            Some((start, start + Duration::days(1)))
        })
    }

    pub fn text(&self) -> Option<&str> {
        self.q.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }

    pub fn min_seats(&self) -> Option<i32> {
        self.seats.filter(|s| *s > 0)
    }

    /// In-process evaluation, used by stores without a query planner.
    pub fn matches(&self, trip: &Trip) -> bool {
        if trip.status != TripStatus::Published {
            return false;
        }
        if let Some(kind) = self.kind {
            if trip.kind != kind {
                return false;
            }
        }
        if let Some(q) = self.text() {
            let q = q.to_lowercase();
            if !trip.origin.name.to_lowercase().contains(&q)
                && !trip.destination.name.to_lowercase().contains(&q)
            {
                return false;
            }
        }
        if let Some((start, end)) = self.day_window() {
            if trip.start_time < start || trip.start_time >= end {
                return false;
            }
        }
        if let Some(seats) = self.min_seats() {
            if trip.seats_left < seats {
                return false;
            }
        }
        true
    }
}
