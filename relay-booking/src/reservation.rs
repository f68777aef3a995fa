use chrono::{DateTime, Utc};
use relay_core::booking::{Booking, BookingPolicy, BookingStatus, BookingView};
use relay_core::events::EventPublisher;
use relay_core::otp::{generate_code, OtpHasher};
use relay_core::repository::{RepoError, RepoResult, Repositories};
use relay_core::trip::TripStatus;
use relay_core::{CoreError, CoreResult};
use relay_shared::models::events::{BookingCancelledEvent, BookingCreatedEvent};
use relay_shared::models::RelayEvent;
use relay_shared::{Masked, Principal};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::access::{load_booking, load_trip, require_booking_owner, require_trip_owner};

/// Outcome of a reservation request. `otp` is only present when this call
/// created the booking; it is never recoverable afterwards.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub booking: Booking,
    pub otp: Option<Masked<String>>,
    pub created: bool,
}

/// Seat reservation without overselling.
///
/// The only contended step is the conditional decrement of `seats_left`.
/// When the store offers transactions the decrement and the booking insert
/// commit together; otherwise the decrement is compensated if the insert
/// fails.
pub struct SeatReservationService {
    repos: Repositories,
    publisher: Arc<dyn EventPublisher>,
    policy: BookingPolicy,
    hasher: OtpHasher,
}

impl SeatReservationService {
    pub fn new(
        repos: Repositories,
        publisher: Arc<dyn EventPublisher>,
        policy: BookingPolicy,
        hasher: OtpHasher,
    ) -> Self {
        Self { repos, publisher, policy, hasher }
    }

    #[tracing::instrument(skip(self, principal), fields(rider = %principal.id))]
    pub async fn reserve(&self, principal: &Principal, trip_id: Uuid, seats: i32) -> CoreResult<Reservation> {
        self.policy.validate_seat_count(seats)?;

        // 1. One active booking per rider and trip
        if let Some(existing) = self.repos.bookings.find_active(principal.id, trip_id).await? {
            debug!("Returning existing booking {} for trip {}", existing.id, trip_id);
            return Ok(Reservation { booking: existing, otp: None, created: false });
        }

        // 2. Preconditions
        let trip = load_trip(&self.repos, trip_id).await?;
        let now = Utc::now();
        if trip.status != TripStatus::Published {
            return Err(CoreError::invalid_state(format!("Trip is {}, not open for booking", trip.status)));
        }
        if trip.has_started(now) {
            return Err(CoreError::invalid_state("Trip has already started"));
        }
        if trip.driver_id == principal.id {
            return Err(CoreError::forbidden("Drivers cannot book their own trip"));
        }
        if trip.seats_left < seats {
            return Err(CoreError::Conflict("Not enough seats left".into()));
        }

        // 3. Boarding code, stored only as a hash
        let otp = generate_code();
        let otp_hash = self.hasher.hash(&otp).await?;
        let booking = Booking::new_pending(
            principal.id,
            trip.id,
            seats,
            otp_hash,
            self.policy.otp_expiry(trip.start_time),
            now,
        );

        // 4. Decrement + insert
        let attempt = match &self.repos.reservations {
            Some(tx) => match tx.reserve_atomically(&booking, now).await {
                Err(RepoError::TransactionUnsupported) => self.reserve_with_compensation(&booking, now).await,
                result => result,
            },
            None => self.reserve_with_compensation(&booking, now).await,
        };
        let reserved = match attempt {
            Ok(reserved) => reserved,
            // a concurrent request from the same rider won the race
            Err(RepoError::Duplicate(_)) => {
                return match self.repos.bookings.find_active(principal.id, trip_id).await? {
                    Some(existing) => {
                        debug!("Lost reservation race, returning booking {} for trip {}", existing.id, trip_id);
                        Ok(Reservation { booking: existing, otp: None, created: false })
                    }
                    None => Err(CoreError::Conflict("Booking changed concurrently, try again".into())),
                };
            }
            Err(e) => return Err(e.into()),
        };
        if !reserved {
            return Err(CoreError::Conflict("Seats just sold out, try fewer seats".into()));
        }

        // 5. Announce
        let seats_left = match self.repos.trips.get_trip(trip.id).await {
            Ok(t) => t.map(|t| t.seats_left),
            Err(e) => {
                warn!("Could not re-read trip {} after reservation: {}", trip.id, e);
                None
            }
        };
        self.publisher
            .publish(RelayEvent::BookingCreated(BookingCreatedEvent {
                booking_id: booking.id,
                trip_id: trip.id,
                rider_id: principal.id,
                seats,
                seats_left,
                timestamp: now,
            }))
            .await;

        info!("Booking {} reserved {} seat(s) on trip {}", booking.id, seats, trip.id);
        Ok(Reservation { booking, otp: Some(otp), created: true })
    }

    /// Decrement, then insert; on insert failure the seats go back before
    /// the error surfaces.
    async fn reserve_with_compensation(&self, booking: &Booking, now: DateTime<Utc>) -> RepoResult<bool> {
        if !self.repos.trips.try_reserve_seats(booking.trip_id, booking.seats, now).await? {
            return Ok(false);
        }

        if let Err(err) = self.repos.bookings.insert_booking(booking).await {
            warn!("Booking insert failed after seat decrement on trip {}: {}", booking.trip_id, err);
            if let Err(comp) = self.repos.trips.release_seats(booking.trip_id, booking.seats).await {
                error!(
                    "Compensation failed, {} seat(s) on trip {} remain decremented: {}",
                    booking.seats, booking.trip_id, comp
                );
            }
            return Err(err);
        }
        Ok(true)
    }

    #[tracing::instrument(skip(self, principal), fields(caller = %principal.id))]
    pub async fn cancel(&self, principal: &Principal, booking_id: Uuid) -> CoreResult<Booking> {
        let booking = load_booking(&self.repos, booking_id).await?;
        require_booking_owner(principal, &booking)?;
        let trip = load_trip(&self.repos, booking.trip_id).await?;

        if booking.status == BookingStatus::Cancelled {
            return Ok(booking);
        }
        if Utc::now() >= self.policy.cancel_deadline(trip.start_time) {
            return Err(CoreError::invalid_state(format!(
                "Cancellation closes {} minutes before departure",
                self.policy.cancel_cutoff.num_minutes()
            )));
        }

        let cancelled = match &self.repos.reservations {
            Some(tx) => match tx.cancel_atomically(&booking).await {
                Err(RepoError::TransactionUnsupported) => self.cancel_with_cas(&booking).await?,
                result => result?,
            },
            None => self.cancel_with_cas(&booking).await?,
        };

        if cancelled {
            self.publisher
                .publish(RelayEvent::BookingCancelled(BookingCancelledEvent {
                    booking_id: booking.id,
                    trip_id: booking.trip_id,
                    seats: booking.seats,
                    timestamp: Utc::now(),
                }))
                .await;
            info!("Booking {} cancelled, {} seat(s) returned to trip {}", booking.id, booking.seats, trip.id);
        }

        load_booking(&self.repos, booking_id).await
    }

    /// Seats go back only if this call won the status change.
    async fn cancel_with_cas(&self, booking: &Booking) -> CoreResult<bool> {
        if !self.repos.bookings.mark_cancelled(booking.id).await? {
            return Ok(false);
        }
        if let Err(err) = self.repos.trips.release_seats(booking.trip_id, booking.seats).await {
            error!(
                "Booking {} cancelled but {} seat(s) were not returned to trip {}: {}",
                booking.id, booking.seats, booking.trip_id, err
            );
            return Err(err.into());
        }
        Ok(true)
    }

    pub async fn get(&self, principal: &Principal, booking_id: Uuid) -> CoreResult<BookingView> {
        let booking = load_booking(&self.repos, booking_id).await?;
        require_booking_owner(principal, &booking)?;
        let trip = self.repos.trips.get_trip(booking.trip_id).await?;
        Ok(BookingView { booking, trip: trip.map(|t| t.summary()) })
    }

    /// Newest first, each with its trip.
    pub async fn list_mine(&self, principal: &Principal) -> CoreResult<Vec<BookingView>> {
        let bookings = self.repos.bookings.list_by_rider(principal.id).await?;

        let mut trip_ids: Vec<Uuid> = bookings.iter().map(|b| b.trip_id).collect();
        trip_ids.sort();
        trip_ids.dedup();
        let trips: HashMap<Uuid, _> = self
            .repos
            .trips
            .get_trips(&trip_ids)
            .await?
            .into_iter()
            .map(|t| (t.id, t.summary()))
            .collect();

        Ok(bookings
            .into_iter()
            .map(|booking| {
                let trip = trips.get(&booking.trip_id).cloned();
                BookingView { booking, trip }
            })
            .collect())
    }

    /// Oldest first. Trip driver or admin.
    pub async fn list_for_trip(&self, principal: &Principal, trip_id: Uuid) -> CoreResult<Vec<Booking>> {
        let trip = load_trip(&self.repos, trip_id).await?;
        require_trip_owner(principal, &trip)?;
        Ok(self.repos.bookings.list_by_trip(trip_id).await?)
    }
}
