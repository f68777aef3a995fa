use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::booking::{Booking, BookingStatus};
use relay_core::events::EventPublisher;
use relay_core::location::LocationPing;
use relay_core::payment::{PaymentIntent, PaymentStatus};
use relay_core::repository::{
    BookingRepository, LocationRepository, PaymentRepository, RepoError, RepoResult, Repositories,
    ReservationTransactions, TripRepository,
};
use relay_core::trip::{Trip, TripPatch, TripSearch, TripStatus};
use relay_shared::models::RelayEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    trips: HashMap<Uuid, Trip>,
    bookings: HashMap<Uuid, Booking>,
    payments: HashMap<Uuid, PaymentIntent>,
    pings: Vec<LocationPing>,
}

/// Process-local store for development and tests. Every operation runs under
/// one write guard, so conditional updates behave like single-row updates in
/// a database.
pub struct MemoryStore {
    inner: RwLock<Inner>,
    transactions: bool,
    fail_booking_inserts: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// A store that reports `TransactionUnsupported`, so callers take the
    /// compensating path.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            transactions: false,
            fail_booking_inserts: AtomicBool::new(false),
        }
    }

    pub fn with_transactions() -> Self {
        Self { transactions: true, ..Self::new() }
    }

    /// Makes subsequent booking inserts fail with a backend error.
    pub fn fail_booking_inserts(&self, fail: bool) {
        self.fail_booking_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn repositories(self: &Arc<Self>) -> Repositories {
        Repositories {
            trips: self.clone(),
            bookings: self.clone(),
            payments: self.clone(),
            locations: self.clone(),
            reservations: Some(self.clone()),
        }
    }

    /// Direct write access for seeding fixtures.
    pub async fn put_trip(&self, trip: Trip) {
        self.inner.write().await.trips.insert(trip.id, trip);
    }

    pub async fn put_booking(&self, booking: Booking) {
        self.inner.write().await.bookings.insert(booking.id, booking);
    }

    pub async fn ping_count(&self, trip_id: Uuid) -> usize {
        self.inner.read().await.pings.iter().filter(|p| p.trip_id == trip_id).count()
    }

    fn check_insert(&self) -> RepoResult<()> {
        if self.fail_booking_inserts.load(Ordering::SeqCst) {
            return Err(RepoError::Backend("injected booking insert failure".into()));
        }
        Ok(())
    }
}

/// Mirrors the partial unique index on active (rider, trip) bookings.
fn check_unique_active(inner: &Inner, booking: &Booking) -> RepoResult<()> {
    let clash = inner.bookings.values().any(|b| {
        b.id != booking.id && b.rider_id == booking.rider_id && b.trip_id == booking.trip_id && b.is_active()
    });
    if clash {
        return Err(RepoError::Duplicate(format!(
            "rider {} already has an active booking on trip {}",
            booking.rider_id, booking.trip_id
        )));
    }
    Ok(())
}

fn reserve_in(inner: &mut Inner, id: Uuid, seats: i32, now: DateTime<Utc>) -> bool {
    match inner.trips.get_mut(&id) {
        Some(trip)
            if trip.status == TripStatus::Published && trip.start_time > now && trip.seats_left >= seats =>
        {
            trip.seats_left -= seats;
            trip.updated_at = now;
            true
        }
        _ => false,
    }
}

fn release_in(inner: &mut Inner, id: Uuid, seats: i32) {
    if let Some(trip) = inner.trips.get_mut(&id) {
        trip.seats_left = (trip.seats_left + seats).min(trip.total_seats);
        trip.updated_at = Utc::now();
    }
}

#[async_trait]
impl TripRepository for MemoryStore {
    async fn insert_trip(&self, trip: &Trip) -> RepoResult<()> {
        self.inner.write().await.trips.insert(trip.id, trip.clone());
        Ok(())
    }

    async fn get_trip(&self, id: Uuid) -> RepoResult<Option<Trip>> {
        Ok(self.inner.read().await.trips.get(&id).cloned())
    }

    async fn get_trips(&self, ids: &[Uuid]) -> RepoResult<Vec<Trip>> {
        let inner = self.inner.read().await;
        Ok(ids.iter().filter_map(|id| inner.trips.get(id).cloned()).collect())
    }

    async fn search_trips(&self, query: &TripSearch) -> RepoResult<Vec<Trip>> {
        let inner = self.inner.read().await;
        let mut found: Vec<Trip> = inner.trips.values().filter(|t| query.matches(t)).cloned().collect();
        found.sort_by_key(|t| t.start_time);
        found.truncate(query.effective_limit() as usize);
        Ok(found)
    }

    async fn list_by_driver(&self, driver_id: Uuid, limit: i64) -> RepoResult<Vec<Trip>> {
        let inner = self.inner.read().await;
        let mut trips: Vec<Trip> = inner.trips.values().filter(|t| t.driver_id == driver_id).cloned().collect();
        trips.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        trips.truncate(limit.max(0) as usize);
        Ok(trips)
    }

    async fn try_reserve_seats(&self, id: Uuid, seats: i32, now: DateTime<Utc>) -> RepoResult<bool> {
        let mut inner = self.inner.write().await;
        Ok(reserve_in(&mut inner, id, seats, now))
    }

    async fn release_seats(&self, id: Uuid, seats: i32) -> RepoResult<()> {
        let mut inner = self.inner.write().await;
        release_in(&mut inner, id, seats);
        Ok(())
    }

    async fn transition_status(&self, id: Uuid, from: TripStatus, to: TripStatus) -> RepoResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.trips.get_mut(&id) {
            Some(trip) if trip.status == from => {
                trip.status = to;
                trip.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn apply_patch(&self, id: Uuid, patch: &TripPatch, now: DateTime<Utc>) -> RepoResult<Option<Trip>> {
        let mut inner = self.inner.write().await;
        let Some(trip) = inner.trips.get_mut(&id) else {
            return Ok(None);
        };
        let mut updated = trip.clone();
        if updated.apply_patch(patch, now).is_err() {
            return Ok(None);
        }
        *trip = updated.clone();
        Ok(Some(updated))
    }
}

#[async_trait]
impl BookingRepository for MemoryStore {
    async fn insert_booking(&self, booking: &Booking) -> RepoResult<()> {
        self.check_insert()?;
        let mut inner = self.inner.write().await;
        if booking.is_active() {
            check_unique_active(&inner, booking)?;
        }
        inner.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn get_booking(&self, id: Uuid) -> RepoResult<Option<Booking>> {
        Ok(self.inner.read().await.bookings.get(&id).cloned())
    }

    async fn find_active(&self, rider_id: Uuid, trip_id: Uuid) -> RepoResult<Option<Booking>> {
        let inner = self.inner.read().await;
        Ok(inner
            .bookings
            .values()
            .find(|b| b.rider_id == rider_id && b.trip_id == trip_id && b.is_active())
            .cloned())
    }

    async fn list_by_rider(&self, rider_id: Uuid) -> RepoResult<Vec<Booking>> {
        let inner = self.inner.read().await;
        let mut bookings: Vec<Booking> = inner.bookings.values().filter(|b| b.rider_id == rider_id).cloned().collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bookings)
    }

    async fn list_by_trip(&self, trip_id: Uuid) -> RepoResult<Vec<Booking>> {
        let inner = self.inner.read().await;
        let mut bookings: Vec<Booking> = inner.bookings.values().filter(|b| b.trip_id == trip_id).cloned().collect();
        bookings.sort_by_key(|b| b.created_at);
        Ok(bookings)
    }

    async fn store_otp(&self, id: Uuid, otp_hash: &str, expires_at: DateTime<Utc>) -> RepoResult<Option<Booking>> {
        let mut inner = self.inner.write().await;
        match inner.bookings.get_mut(&id) {
            Some(booking) if booking.is_active() => {
                booking.otp_hash = Some(otp_hash.to_string());
                booking.otp_expires_at = Some(expires_at);
                booking.verified_at = None;
                booking.status = BookingStatus::Pending;
                Ok(Some(booking.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_verified(&self, id: Uuid, at: DateTime<Utc>) -> RepoResult<Option<Booking>> {
        let mut inner = self.inner.write().await;
        match inner.bookings.get_mut(&id) {
            Some(booking) if booking.status == BookingStatus::Pending && booking.verified_at.is_none() => {
                booking.status = BookingStatus::Confirmed;
                booking.verified_at = Some(at);
                Ok(Some(booking.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_cancelled(&self, id: Uuid) -> RepoResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.bookings.get_mut(&id) {
            Some(booking) if booking.is_active() => {
                booking.status = BookingStatus::Cancelled;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl ReservationTransactions for MemoryStore {
    async fn reserve_atomically(&self, booking: &Booking, now: DateTime<Utc>) -> RepoResult<bool> {
        if !self.transactions {
            return Err(RepoError::TransactionUnsupported);
        }
        let mut inner = self.inner.write().await;
        // checked before the decrement so a failure leaves nothing behind
        self.check_insert()?;
        check_unique_active(&inner, booking)?;
        if !reserve_in(&mut inner, booking.trip_id, booking.seats, now) {
            return Ok(false);
        }
        inner.bookings.insert(booking.id, booking.clone());
        Ok(true)
    }

    async fn cancel_atomically(&self, booking: &Booking) -> RepoResult<bool> {
        if !self.transactions {
            return Err(RepoError::TransactionUnsupported);
        }
        let mut inner = self.inner.write().await;
        let seats = match inner.bookings.get_mut(&booking.id) {
            Some(stored) if stored.is_active() => {
                stored.status = BookingStatus::Cancelled;
                stored.seats
            }
            _ => return Ok(false),
        };
        release_in(&mut inner, booking.trip_id, seats);
        Ok(true)
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn insert_or_get(&self, intent: &PaymentIntent) -> RepoResult<PaymentIntent> {
        let mut inner = self.inner.write().await;
        if let Some(key) = &intent.idempotency_key {
            let existing = inner
                .payments
                .values()
                .find(|p| p.booking_id == intent.booking_id && p.idempotency_key.as_ref() == Some(key));
            if let Some(existing) = existing {
                return Ok(existing.clone());
            }
        }
        inner.payments.insert(intent.id, intent.clone());
        Ok(intent.clone())
    }

    async fn find_by_key(&self, booking_id: Uuid, key: &str) -> RepoResult<Option<PaymentIntent>> {
        let inner = self.inner.read().await;
        Ok(inner
            .payments
            .values()
            .find(|p| p.booking_id == booking_id && p.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn get_intent(&self, id: Uuid) -> RepoResult<Option<PaymentIntent>> {
        Ok(self.inner.read().await.payments.get(&id).cloned())
    }

    async fn latest_for_booking(&self, booking_id: Uuid) -> RepoResult<Option<PaymentIntent>> {
        let inner = self.inner.read().await;
        Ok(inner
            .payments
            .values()
            .filter(|p| p.booking_id == booking_id)
            .max_by_key(|p| p.created_at)
            .cloned())
    }

    async fn finalize(&self, id: Uuid, status: PaymentStatus, at: DateTime<Utc>) -> RepoResult<Option<PaymentIntent>> {
        let mut inner = self.inner.write().await;
        match inner.payments.get_mut(&id) {
            Some(intent) if intent.status == PaymentStatus::Initiated => {
                intent.status = status;
                intent.completed_at = Some(at);
                Ok(Some(intent.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl LocationRepository for MemoryStore {
    async fn insert_ping(&self, ping: &LocationPing) -> RepoResult<()> {
        self.inner.write().await.pings.push(ping.clone());
        Ok(())
    }

    async fn recent_pings(&self, trip_id: Uuid, since: Option<DateTime<Utc>>, limit: i64) -> RepoResult<Vec<LocationPing>> {
        let inner = self.inner.read().await;
        let mut pings: Vec<LocationPing> = inner
            .pings
            .iter()
            .filter(|p| p.trip_id == trip_id && since.map_or(true, |s| p.ts >= s))
            .cloned()
            .collect();
        pings.sort_by(|a, b| b.ts.cmp(&a.ts));
        pings.truncate(limit.max(0) as usize);
        Ok(pings)
    }

    async fn prune_before(&self, trip_id: Uuid, cutoff: DateTime<Utc>) -> RepoResult<u64> {
        let mut inner = self.inner.write().await;
        let before = inner.pings.len();
        inner.pings.retain(|p| p.trip_id != trip_id || p.ts >= cutoff);
        Ok((before - inner.pings.len()) as u64)
    }
}

/// Keeps published events in memory for assertions.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<RelayEvent>>,
}

impl RecordingPublisher {
    pub async fn events(&self) -> Vec<RelayEvent> {
        self.events.lock().await.clone()
    }

    pub async fn topics(&self) -> Vec<&'static str> {
        self.events.lock().await.iter().map(|e| e.topic()).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: RelayEvent) {
        self.events.lock().await.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use relay_core::trip::{Place, TripKind};

    fn trip(seats: i32) -> Trip {
        let now = Utc::now();
        let place = |name: &str| Place { name: name.into(), lat: 12.9, lng: 77.6, address: None, hub_id: None };
        Trip {
            id: Uuid::new_v4(),
            driver_id: Uuid::new_v4(),
            vehicle_id: None,
            kind: TripKind::Carpool,
            route_name: None,
            origin: place("Hostel Block C"),
            destination: place("Airport"),
            stops: vec![],
            start_time: now + Duration::hours(4),
            price_per_seat: 15000,
            total_seats: seats,
            seats_left: seats,
            status: TripStatus::Published,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_conditional_reserve() {
        let store = MemoryStore::new();
        let trip = trip(3);
        store.insert_trip(&trip).await.unwrap();
        let now = Utc::now();

        assert!(store.try_reserve_seats(trip.id, 2, now).await.unwrap());
        assert!(!store.try_reserve_seats(trip.id, 2, now).await.unwrap());
        assert!(store.try_reserve_seats(trip.id, 1, now).await.unwrap());
        assert_eq!(store.get_trip(trip.id).await.unwrap().unwrap().seats_left, 0);

        store.release_seats(trip.id, 5).await.unwrap();
        assert_eq!(store.get_trip(trip.id).await.unwrap().unwrap().seats_left, 3, "clamped to total");
    }

    #[tokio::test]
    async fn test_reserve_refuses_unpublished_or_started() {
        let store = MemoryStore::new();
        let mut draft = trip(3);
        draft.status = TripStatus::Draft;
        store.insert_trip(&draft).await.unwrap();
        assert!(!store.try_reserve_seats(draft.id, 1, Utc::now()).await.unwrap());

        let started = trip(3);
        store.insert_trip(&started).await.unwrap();
        let later = started.start_time + Duration::minutes(1);
        assert!(!store.try_reserve_seats(started.id, 1, later).await.unwrap());
    }

    #[tokio::test]
    async fn test_status_cas() {
        let store = MemoryStore::new();
        let trip = trip(3);
        store.insert_trip(&trip).await.unwrap();

        assert!(store.transition_status(trip.id, TripStatus::Published, TripStatus::Ongoing).await.unwrap());
        assert!(!store.transition_status(trip.id, TripStatus::Published, TripStatus::Cancelled).await.unwrap());
    }

    #[tokio::test]
    async fn test_transactions_unsupported_by_default() {
        let store = MemoryStore::new();
        let trip = trip(3);
        store.insert_trip(&trip).await.unwrap();
        let now = Utc::now();
        let booking = Booking::new_pending(Uuid::new_v4(), trip.id, 1, "h".into(), now, now);

        let err = store.reserve_atomically(&booking, now).await.unwrap_err();
        assert!(matches!(err, RepoError::TransactionUnsupported));
    }

    #[tokio::test]
    async fn test_atomic_reserve_and_cancel() {
        let store = MemoryStore::with_transactions();
        let trip = trip(2);
        store.insert_trip(&trip).await.unwrap();
        let now = Utc::now();
        let booking = Booking::new_pending(Uuid::new_v4(), trip.id, 2, "h".into(), now, now);

        store.fail_booking_inserts(true);
        assert!(store.reserve_atomically(&booking, now).await.is_err());
        assert_eq!(store.get_trip(trip.id).await.unwrap().unwrap().seats_left, 2);

        store.fail_booking_inserts(false);
        assert!(store.reserve_atomically(&booking, now).await.unwrap());
        assert_eq!(store.get_trip(trip.id).await.unwrap().unwrap().seats_left, 0);

        assert!(store.cancel_atomically(&booking).await.unwrap());
        assert!(!store.cancel_atomically(&booking).await.unwrap());
        assert_eq!(store.get_trip(trip.id).await.unwrap().unwrap().seats_left, 2);
    }

    #[tokio::test]
    async fn test_second_active_booking_is_rejected() {
        let store = MemoryStore::with_transactions();
        let trip = trip(3);
        store.insert_trip(&trip).await.unwrap();
        let now = Utc::now();
        let rider = Uuid::new_v4();
        let first = Booking::new_pending(rider, trip.id, 1, "h".into(), now, now);
        let second = Booking::new_pending(rider, trip.id, 1, "h".into(), now, now);

        assert!(store.reserve_atomically(&first, now).await.unwrap());
        let err = store.reserve_atomically(&second, now).await.unwrap_err();
        assert!(matches!(err, RepoError::Duplicate(_)));
        assert_eq!(store.get_trip(trip.id).await.unwrap().unwrap().seats_left, 2);
        assert!(matches!(store.insert_booking(&second).await.unwrap_err(), RepoError::Duplicate(_)));

        // a cancelled booking no longer blocks a new one
        assert!(store.cancel_atomically(&first).await.unwrap());
        assert!(store.reserve_atomically(&second, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_verify_cas_and_otp_reset() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let booking = Booking::new_pending(Uuid::new_v4(), Uuid::new_v4(), 1, "h".into(), now, now);
        store.insert_booking(&booking).await.unwrap();

        let first = store.mark_verified(booking.id, now).await.unwrap().unwrap();
        assert_eq!(first.status, BookingStatus::Confirmed);
        assert!(store.mark_verified(booking.id, now).await.unwrap().is_none());

        let reset = store.store_otp(booking.id, "h2", now).await.unwrap().unwrap();
        assert_eq!(reset.status, BookingStatus::Pending);
        assert!(reset.verified_at.is_none());

        assert!(store.mark_cancelled(booking.id).await.unwrap());
        assert!(store.store_otp(booking.id, "h3", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_payment_key_collapses_duplicates() {
        let store = MemoryStore::new();
        let booking_id = Uuid::new_v4();
        let intent = |id: Uuid| PaymentIntent {
            id,
            booking_id,
            upi_uri: "upi://pay".into(),
            amount: 100,
            reference: "r".into(),
            status: PaymentStatus::Initiated,
            idempotency_key: Some("k1".into()),
            created_at: Utc::now(),
            completed_at: None,
        };
        let first = store.insert_or_get(&intent(Uuid::new_v4())).await.unwrap();
        let second = store.insert_or_get(&intent(Uuid::new_v4())).await.unwrap();
        assert_eq!(first.id, second.id);

        assert!(store.finalize(first.id, PaymentStatus::Success, Utc::now()).await.unwrap().is_some());
        assert!(store.finalize(first.id, PaymentStatus::Failed, Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prune_pings() {
        let store = MemoryStore::new();
        let trip_id = Uuid::new_v4();
        let now = Utc::now();
        for age in [0, 3, 10] {
            let ping = LocationPing {
                id: Uuid::new_v4(),
                trip_id,
                lat: 0.0,
                lng: 0.0,
                speed: None,
                heading: None,
                ts: now - Duration::days(age),
            };
            store.insert_ping(&ping).await.unwrap();
        }

        assert_eq!(store.prune_before(trip_id, now - Duration::days(7)).await.unwrap(), 1);
        let recent = store.recent_pings(trip_id, None, 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].ts > recent[1].ts);
    }
}
