use chrono::{Duration, Utc};
use relay_core::location::{LocationPing, NewPing, TrailQuery};
use relay_core::rate_limit::RateLimiter;
use relay_core::repository::Repositories;
use relay_core::trip::TripStatus;
use relay_core::{CoreError, CoreResult};
use relay_shared::Principal;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::access::{load_trip, require_trip_owner};

/// Live driver positions for published and ongoing trips.
pub struct LocationService {
    repos: Repositories,
    limiter: Arc<dyn RateLimiter>,
    retention: Duration,
}

impl LocationService {
    pub fn new(repos: Repositories, limiter: Arc<dyn RateLimiter>, retention: Duration) -> Self {
        Self { repos, limiter, retention }
    }

    pub async fn post_ping(&self, principal: &Principal, trip_id: Uuid, ping: NewPing) -> CoreResult<LocationPing> {
        let trip = load_trip(&self.repos, trip_id).await?;
        require_trip_owner(principal, &trip)?;
        if !matches!(trip.status, TripStatus::Published | TripStatus::Ongoing) {
            return Err(CoreError::invalid_state(format!("Cannot share location for a {} trip", trip.status)));
        }
        ping.validate()?;

        let key = format!("{}:{}", principal.id, trip_id);
        if !self.limiter.check(&key).await? {
            return Err(CoreError::RateLimited("Too many location updates, slow down".into()));
        }

        let now = Utc::now();
        let ping = ping.into_ping(trip_id, now);
        self.repos.locations.insert_ping(&ping).await?;

        // Retention sweep off the request path
        let locations = self.repos.locations.clone();
        let cutoff = now - self.retention;
        tokio::spawn(async move {
            match locations.prune_before(trip_id, cutoff).await {
                Ok(0) => {}
                Ok(n) => debug!("Pruned {} stale location ping(s) for trip {}", n, trip_id),
                Err(e) => warn!("Location prune for trip {} failed: {}", trip_id, e),
            }
        });

        Ok(ping)
    }

    /// Most recent pings, oldest first. Trip driver, admin, or a rider
    /// holding an active booking on the trip.
    pub async fn trail(&self, principal: &Principal, trip_id: Uuid, query: &TrailQuery) -> CoreResult<Vec<LocationPing>> {
        let trip = load_trip(&self.repos, trip_id).await?;

        let allowed = principal.owns_or_admin(trip.driver_id)
            || self.repos.bookings.find_active(principal.id, trip_id).await?.is_some();
        if !allowed {
            return Err(CoreError::forbidden("Not allowed to view this trip's location"));
        }

        let mut pings = self
            .repos
            .locations
            .recent_pings(trip_id, query.since, query.effective_limit())
            .await?;
        pings.reverse();
        Ok(pings)
    }
}
