use chrono::Utc;
use relay_core::events::EventPublisher;
use relay_core::repository::Repositories;
use relay_core::trip::{NewTrip, Trip, TripAction, TripPatch, TripSearch, MAX_SEARCH_LIMIT};
use relay_core::{CoreError, CoreResult};
use relay_shared::models::events::TripStatusChangedEvent;
use relay_shared::models::RelayEvent;
use relay_shared::Principal;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::access::{load_trip, require_driver_role, require_trip_owner};

/// Creates trips and moves them through `draft → published → ongoing →
/// completed`, with `cancelled` reachable from any non-terminal state.
///
/// Cancelling a trip leaves its bookings as they are.
pub struct TripLifecycleController {
    repos: Repositories,
    publisher: Arc<dyn EventPublisher>,
}

impl TripLifecycleController {
    pub fn new(repos: Repositories, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { repos, publisher }
    }

    #[tracing::instrument(skip(self, principal, input), fields(driver = %principal.id))]
    pub async fn create(&self, principal: &Principal, input: NewTrip) -> CoreResult<Trip> {
        require_driver_role(principal)?;
        let now = Utc::now();
        input.validate(now)?;

        let trip = input.into_trip(principal.id, now);
        self.repos.trips.insert_trip(&trip).await?;

        info!("Trip {} created ({}, {} seats, {})", trip.id, trip.kind.as_str(), trip.total_seats, trip.status);
        Ok(trip)
    }

    pub async fn get(&self, trip_id: Uuid) -> CoreResult<Trip> {
        load_trip(&self.repos, trip_id).await
    }

    pub async fn search(&self, query: &TripSearch) -> CoreResult<Vec<Trip>> {
        Ok(self.repos.trips.search_trips(query).await?)
    }

    /// The caller's own trips, latest start first.
    pub async fn list_mine(&self, principal: &Principal) -> CoreResult<Vec<Trip>> {
        require_driver_role(principal)?;
        Ok(self.repos.trips.list_by_driver(principal.id, MAX_SEARCH_LIMIT).await?)
    }

    #[tracing::instrument(skip(self, principal, patch), fields(caller = %principal.id))]
    pub async fn update(&self, principal: &Principal, trip_id: Uuid, patch: TripPatch) -> CoreResult<Trip> {
        let trip = load_trip(&self.repos, trip_id).await?;
        require_trip_owner(principal, &trip)?;

        let now = Utc::now();
        patch.validate(trip.kind, now)?;
        // surfaces the precise reason before the guarded write
        trip.clone().apply_patch(&patch, now)?;

        let updated = self
            .repos
            .trips
            .apply_patch(trip_id, &patch, now)
            .await?
            .ok_or_else(|| CoreError::invalid_state("Trip changed while updating, retry"))?;

        info!("Trip {} updated", trip_id);
        Ok(updated)
    }

    pub async fn publish(&self, principal: &Principal, trip_id: Uuid) -> CoreResult<Trip> {
        self.transition(principal, trip_id, TripAction::Publish).await
    }

    pub async fn start(&self, principal: &Principal, trip_id: Uuid) -> CoreResult<Trip> {
        self.transition(principal, trip_id, TripAction::Start).await
    }

    pub async fn complete(&self, principal: &Principal, trip_id: Uuid) -> CoreResult<Trip> {
        self.transition(principal, trip_id, TripAction::Complete).await
    }

    pub async fn cancel(&self, principal: &Principal, trip_id: Uuid) -> CoreResult<Trip> {
        self.transition(principal, trip_id, TripAction::Cancel).await
    }

    #[tracing::instrument(skip(self, principal), fields(caller = %principal.id))]
    async fn transition(&self, principal: &Principal, trip_id: Uuid, action: TripAction) -> CoreResult<Trip> {
        let trip = load_trip(&self.repos, trip_id).await?;
        require_trip_owner(principal, &trip)?;

        let target = trip.status.apply(action)?;
        if target == trip.status {
            return Ok(trip);
        }

        if !self.repos.trips.transition_status(trip_id, trip.status, target).await? {
            return Err(CoreError::invalid_state("Trip status changed concurrently"));
        }

        self.publisher
            .publish(RelayEvent::TripStatusChanged(TripStatusChangedEvent {
                trip_id,
                from: trip.status.to_string(),
                to: target.to_string(),
                timestamp: Utc::now(),
            }))
            .await;
        info!("Trip {} {} -> {}", trip_id, trip.status, target);

        load_trip(&self.repos, trip_id).await
    }
}
