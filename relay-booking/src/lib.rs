//! Booking workflows: seat reservation, boarding codes, trip lifecycle,
//! payment intents and live location. Every operation takes the caller's
//! `Principal` and authorizes against it before touching the stores.

mod access;
pub mod lifecycle;
pub mod location;
pub mod otp;
pub mod payment;
pub mod reservation;

pub use lifecycle::TripLifecycleController;
pub use location::LocationService;
pub use otp::{IssuedOtp, OtpService};
pub use payment::{IssuedIntent, PaymentIntentService};
pub use reservation::{Reservation, SeatReservationService};

use chrono::Duration;
use relay_core::booking::BookingPolicy;
use relay_core::events::EventPublisher;
use relay_core::otp::OtpHasher;
use relay_core::payment::UpiPayee;
use relay_core::rate_limit::RateLimiter;
use relay_core::repository::Repositories;
use std::sync::Arc;

/// Tunables shared by the services.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub policy: BookingPolicy,
    pub hasher: OtpHasher,
    pub payee: UpiPayee,
    /// Location pings older than this are pruned.
    pub location_retention: Duration,
}

impl ServiceSettings {
    pub fn new(payee: UpiPayee) -> Self {
        Self {
            policy: BookingPolicy::default(),
            hasher: OtpHasher::default(),
            payee,
            location_retention: Duration::days(7),
        }
    }
}

/// All services wired against one set of repositories.
#[derive(Clone)]
pub struct Services {
    pub reservations: Arc<SeatReservationService>,
    pub otp: Arc<OtpService>,
    pub trips: Arc<TripLifecycleController>,
    pub payments: Arc<PaymentIntentService>,
    pub locations: Arc<LocationService>,
}

impl Services {
    pub fn new(
        repos: Repositories,
        publisher: Arc<dyn EventPublisher>,
        limiter: Arc<dyn RateLimiter>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            reservations: Arc::new(SeatReservationService::new(
                repos.clone(),
                publisher.clone(),
                settings.policy,
                settings.hasher,
            )),
            otp: Arc::new(OtpService::new(repos.clone(), publisher.clone(), settings.policy, settings.hasher)),
            trips: Arc::new(TripLifecycleController::new(repos.clone(), publisher.clone())),
            payments: Arc::new(PaymentIntentService::new(repos.clone(), publisher, settings.payee)),
            locations: Arc::new(LocationService::new(repos, limiter, settings.location_retention)),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use chrono::Utc;
    use relay_core::rate_limit::FixedWindowLimiter;
    use relay_core::trip::{Place, Trip, TripKind, TripStatus};
    use relay_shared::{Principal, Role};
    use relay_store::{MemoryStore, RecordingPublisher};
    use uuid::Uuid;

    pub(crate) struct Fixture {
        pub store: Arc<MemoryStore>,
        pub events: Arc<RecordingPublisher>,
        pub services: Services,
        pub driver: Principal,
    }

    impl Fixture {
        /// Compensating path (no transactions), cheap bcrypt.
        pub fn new() -> Self {
            Self::with_store(MemoryStore::new())
        }

        pub fn transactional() -> Self {
            Self::with_store(MemoryStore::with_transactions())
        }

        fn with_store(store: MemoryStore) -> Self {
            let store = Arc::new(store);
            let events = Arc::new(RecordingPublisher::default());
            let mut settings = ServiceSettings::new(UpiPayee { vpa: "relay@upi".into(), name: "Campus Relay".into() });
            settings.hasher = OtpHasher::new(4);
            let services = Services::new(
                store.repositories(),
                events.clone(),
                Arc::new(FixedWindowLimiter::per_second(2)),
                settings,
            );
            Self { store, events, services, driver: Principal::new(Uuid::new_v4(), Role::Driver) }
        }

        /// Published trip owned by `self.driver`, inserted directly.
        pub async fn trip(&self, start_in: Duration, seats: i32) -> Trip {
            let now = Utc::now();
            let place = |name: &str| Place { name: name.into(), lat: 12.97, lng: 77.59, address: None, hub_id: None };
            let trip = Trip {
                id: Uuid::new_v4(),
                driver_id: self.driver.id,
                vehicle_id: None,
                kind: TripKind::Carpool,
                route_name: None,
                origin: place("Main Gate"),
                destination: place("City Centre"),
                stops: vec![],
                start_time: now + start_in,
                price_per_seat: 6000,
                total_seats: seats,
                seats_left: seats,
                status: TripStatus::Published,
                created_at: now,
                updated_at: now,
            };
            self.store.put_trip(trip.clone()).await;
            trip
        }

        pub async fn seats_left(&self, trip_id: Uuid) -> i32 {
            self.services.trips.get(trip_id).await.unwrap().seats_left
        }
    }

    pub(crate) fn rider() -> Principal {
        Principal::new(Uuid::new_v4(), Role::Rider)
    }

    pub(crate) fn admin() -> Principal {
        Principal::new(Uuid::new_v4(), Role::Admin)
    }
}
