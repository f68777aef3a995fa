use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BookingCreatedEvent {
    pub booking_id: Uuid,
    pub trip_id: Uuid,
    pub rider_id: Uuid,
    pub seats: i32,
    pub seats_left: Option<i32>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BookingCancelledEvent {
    pub booking_id: Uuid,
    pub trip_id: Uuid,
    pub seats: i32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BookingConfirmedEvent {
    pub booking_id: Uuid,
    pub trip_id: Uuid,
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TripStatusChangedEvent {
    pub trip_id: Uuid,
    pub from: String,
    pub to: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PaymentFinalizedEvent {
    pub intent_id: Uuid,
    pub booking_id: Uuid,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// Everything the booking core announces after a committed change.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEvent {
    BookingCreated(BookingCreatedEvent),
    BookingCancelled(BookingCancelledEvent),
    BookingConfirmed(BookingConfirmedEvent),
    TripStatusChanged(TripStatusChangedEvent),
    PaymentFinalized(PaymentFinalizedEvent),
}

impl RelayEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            RelayEvent::BookingCreated(_) => "booking.created",
            RelayEvent::BookingCancelled(_) => "booking.cancelled",
            RelayEvent::BookingConfirmed(_) => "booking.confirmed",
            RelayEvent::TripStatusChanged(_) => "trip.status_changed",
            RelayEvent::PaymentFinalized(_) => "payment.finalized",
        }
    }

    /// Partition key: events for one trip stay ordered.
    pub fn key(&self) -> Uuid {
        match self {
            RelayEvent::BookingCreated(e) => e.trip_id,
            RelayEvent::BookingCancelled(e) => e.trip_id,
            RelayEvent::BookingConfirmed(e) => e.trip_id,
            RelayEvent::TripStatusChanged(e) => e.trip_id,
            RelayEvent::PaymentFinalized(e) => e.booking_id,
        }
    }
}
