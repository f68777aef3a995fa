//! Lookups and authorization checks shared by the services.

use relay_core::booking::Booking;
use relay_core::repository::Repositories;
use relay_core::trip::Trip;
use relay_core::{CoreError, CoreResult};
use relay_shared::Principal;
use uuid::Uuid;

pub(crate) async fn load_trip(repos: &Repositories, id: Uuid) -> CoreResult<Trip> {
    repos
        .trips
        .get_trip(id)
        .await?
        .ok_or_else(|| CoreError::not_found("Trip not found"))
}

pub(crate) async fn load_booking(repos: &Repositories, id: Uuid) -> CoreResult<Booking> {
    repos
        .bookings
        .get_booking(id)
        .await?
        .ok_or_else(|| CoreError::not_found("Booking not found"))
}

pub(crate) fn require_driver_role(principal: &Principal) -> CoreResult<()> {
    if !principal.can_drive() {
        return Err(CoreError::forbidden("Driver role required"));
    }
    Ok(())
}

/// The trip's own driver, or an admin.
pub(crate) fn require_trip_owner(principal: &Principal, trip: &Trip) -> CoreResult<()> {
    require_driver_role(principal)?;
    if !principal.owns_or_admin(trip.driver_id) {
        return Err(CoreError::forbidden("Not the driver of this trip"));
    }
    Ok(())
}

pub(crate) fn require_booking_owner(principal: &Principal, booking: &Booking) -> CoreResult<()> {
    if !principal.owns_or_admin(booking.rider_id) {
        return Err(CoreError::forbidden("Not your booking"));
    }
    Ok(())
}
