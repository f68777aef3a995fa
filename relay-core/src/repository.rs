use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::booking::Booking;
use crate::location::LocationPing;
use crate::payment::{PaymentIntent, PaymentStatus};
use crate::trip::{Trip, TripPatch, TripSearch, TripStatus};

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("multi-document transactions are not supported by this store")]
    TransactionUnsupported,
    #[error("corrupt record: {0}")]
    Corrupt(String),
    /// A uniqueness rule rejected the write, e.g. a second active booking
    /// for the same rider and trip.
    #[error("duplicate record: {0}")]
    Duplicate(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository trait for trip data access
#[async_trait]
pub trait TripRepository: Send + Sync {
    async fn insert_trip(&self, trip: &Trip) -> RepoResult<()>;

    async fn get_trip(&self, id: Uuid) -> RepoResult<Option<Trip>>;

    async fn get_trips(&self, ids: &[Uuid]) -> RepoResult<Vec<Trip>>;

    /// Published trips matching `query`, soonest first.
    async fn search_trips(&self, query: &TripSearch) -> RepoResult<Vec<Trip>>;

    /// Latest start first.
    async fn list_by_driver(&self, driver_id: Uuid, limit: i64) -> RepoResult<Vec<Trip>>;

    /// Decrements `seats_left` by `seats` only if the trip is published,
    /// starts after `now` and has enough seats, as one conditional update.
    /// `false` means nothing matched.
    async fn try_reserve_seats(&self, id: Uuid, seats: i32, now: DateTime<Utc>) -> RepoResult<bool>;

    /// Returns seats, never above `total_seats`.
    async fn release_seats(&self, id: Uuid, seats: i32) -> RepoResult<()>;

    /// Compare-and-set on status. `false` when the stored status is not `from`.
    async fn transition_status(&self, id: Uuid, from: TripStatus, to: TripStatus) -> RepoResult<bool>;

    /// Applies `patch` only while the trip is editable (non-terminal, not
    /// started) and the booked-seat floor holds. `None` when a guard failed
    /// or the trip is missing.
    async fn apply_patch(&self, id: Uuid, patch: &TripPatch, now: DateTime<Utc>) -> RepoResult<Option<Trip>>;
}

/// Repository trait for booking data access
#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn insert_booking(&self, booking: &Booking) -> RepoResult<()>;

    async fn get_booking(&self, id: Uuid) -> RepoResult<Option<Booking>>;

    /// The rider's non-cancelled booking on a trip, if any.
    async fn find_active(&self, rider_id: Uuid, trip_id: Uuid) -> RepoResult<Option<Booking>>;

    /// Newest first.
    async fn list_by_rider(&self, rider_id: Uuid) -> RepoResult<Vec<Booking>>;

    /// Oldest first.
    async fn list_by_trip(&self, trip_id: Uuid) -> RepoResult<Vec<Booking>>;

    /// Overwrites the code hash and expiry of a non-cancelled booking,
    /// clearing any verification. `None` if missing or cancelled.
    async fn store_otp(&self, id: Uuid, otp_hash: &str, expires_at: DateTime<Utc>) -> RepoResult<Option<Booking>>;

    /// Sets `confirmed` and `verified_at` only if the booking is pending and
    /// unverified. `None` when another verification (or a cancel) won.
    async fn mark_verified(&self, id: Uuid, at: DateTime<Utc>) -> RepoResult<Option<Booking>>;

    /// Sets `cancelled` unless already cancelled. `true` if this call did it.
    async fn mark_cancelled(&self, id: Uuid) -> RepoResult<bool>;
}

/// Multi-record units of work for stores with native transactions.
#[async_trait]
pub trait ReservationTransactions: Send + Sync {
    /// Conditional seat decrement plus booking insert, all or nothing.
    /// `false` when the conditional update matched nothing.
    async fn reserve_atomically(&self, booking: &Booking, now: DateTime<Utc>) -> RepoResult<bool>;

    /// Booking cancel plus seat return, all or nothing. `false` when the
    /// booking was already cancelled.
    async fn cancel_atomically(&self, booking: &Booking) -> RepoResult<bool>;
}

/// Repository trait for payment intents
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Inserts `intent`, or returns the stored intent that already holds its
    /// (booking, idempotency key) pair.
    async fn insert_or_get(&self, intent: &PaymentIntent) -> RepoResult<PaymentIntent>;

    async fn find_by_key(&self, booking_id: Uuid, key: &str) -> RepoResult<Option<PaymentIntent>>;

    async fn get_intent(&self, id: Uuid) -> RepoResult<Option<PaymentIntent>>;

    async fn latest_for_booking(&self, booking_id: Uuid) -> RepoResult<Option<PaymentIntent>>;

    /// Moves an `initiated` intent to `status`. `None` if it was already final.
    async fn finalize(&self, id: Uuid, status: PaymentStatus, at: DateTime<Utc>) -> RepoResult<Option<PaymentIntent>>;
}

/// Repository trait for live location pings
#[async_trait]
pub trait LocationRepository: Send + Sync {
    async fn insert_ping(&self, ping: &LocationPing) -> RepoResult<()>;

    /// Newest first, at most `limit`.
    async fn recent_pings(&self, trip_id: Uuid, since: Option<DateTime<Utc>>, limit: i64) -> RepoResult<Vec<LocationPing>>;

    /// Deletes pings of `trip_id` older than `cutoff`.
    async fn prune_before(&self, trip_id: Uuid, cutoff: DateTime<Utc>) -> RepoResult<u64>;
}

/// The set of stores the services run against.
#[derive(Clone)]
pub struct Repositories {
    pub trips: Arc<dyn TripRepository>,
    pub bookings: Arc<dyn BookingRepository>,
    pub payments: Arc<dyn PaymentRepository>,
    pub locations: Arc<dyn LocationRepository>,
    /// Absent when the backend cannot run multi-record transactions.
    pub reservations: Option<Arc<dyn ReservationTransactions>>,
}
