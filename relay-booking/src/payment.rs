use chrono::Utc;
use relay_core::booking::BookingStatus;
use relay_core::events::EventPublisher;
use relay_core::payment::{
    booking_note, build_upi_uri, generate_reference, render_qr_svg, PaymentIntent, PaymentOutcome, PaymentStatus,
    UpiPayee,
};
use relay_core::repository::Repositories;
use relay_core::{CoreError, CoreResult};
use relay_shared::models::events::PaymentFinalizedEvent;
use relay_shared::models::RelayEvent;
use relay_shared::Principal;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::access::{load_booking, load_trip, require_booking_owner};

const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// A stored intent and whether this call created it.
#[derive(Debug, Clone)]
pub struct IssuedIntent {
    pub intent: PaymentIntent,
    pub created: bool,
}

/// UPI deep-link payment intents for bookings. No gateway is involved; the
/// final status is reported back by a client or operator.
pub struct PaymentIntentService {
    repos: Repositories,
    publisher: Arc<dyn EventPublisher>,
    payee: UpiPayee,
}

impl PaymentIntentService {
    pub fn new(repos: Repositories, publisher: Arc<dyn EventPublisher>, payee: UpiPayee) -> Self {
        Self { repos, publisher, payee }
    }

    /// Builds and stores a UPI intent. With an idempotency key, repeats for
    /// the same booking return the stored intent unchanged.
    #[tracing::instrument(skip(self, principal, idempotency_key), fields(caller = %principal.id))]
    pub async fn create_intent(
        &self,
        principal: &Principal,
        booking_id: Uuid,
        amount: Option<i64>,
        idempotency_key: Option<&str>,
    ) -> CoreResult<IssuedIntent> {
        // 1. Ownership and state
        let booking = load_booking(&self.repos, booking_id).await?;
        require_booking_owner(principal, &booking)?;
        if booking.status == BookingStatus::Cancelled {
            return Err(CoreError::invalid_state("Booking is cancelled"));
        }
        let trip = load_trip(&self.repos, booking.trip_id).await?;
        let now = Utc::now();
        if trip.has_started(now) {
            return Err(CoreError::invalid_state("Trip has already started"));
        }

        // 2. Replay
        let key = normalize_key(idempotency_key)?;
        if let Some(key) = &key {
            if let Some(existing) = self.repos.payments.find_by_key(booking_id, key).await? {
                return Ok(IssuedIntent { intent: existing, created: false });
            }
        }

        // 3. Amount and link
        let amount = match amount {
            Some(a) if a > 0 => a,
            _ => trip
                .price_per_seat
                .checked_mul(i64::from(booking.seats))
                .ok_or_else(|| CoreError::validation("Invalid amount"))?,
        };
        let reference = generate_reference();
        let upi_uri = build_upi_uri(&self.payee, amount, &booking_note(booking_id), &reference)?;

        let intent = PaymentIntent {
            id: Uuid::new_v4(),
            booking_id,
            upi_uri,
            amount,
            reference,
            status: PaymentStatus::Initiated,
            idempotency_key: key,
            created_at: now,
            completed_at: None,
        };

        // 4. Persist; a concurrent duplicate collapses onto the stored row
        let stored = self.repos.payments.insert_or_get(&intent).await?;
        let created = stored.id == intent.id;
        if created {
            info!("Payment intent {} created for booking {} ({} paise)", stored.id, booking_id, amount);
        }
        Ok(IssuedIntent { intent: stored, created })
    }

    /// First reported outcome wins; later reports get the stored record.
    #[tracing::instrument(skip(self, principal), fields(caller = %principal.id))]
    pub async fn finalize(
        &self,
        principal: &Principal,
        intent_id: Uuid,
        outcome: PaymentOutcome,
    ) -> CoreResult<PaymentIntent> {
        let intent = self.load_for_participant(principal, intent_id).await?;
        if intent.status.is_final() {
            return Ok(intent);
        }

        let status = PaymentStatus::from(outcome);
        let now = Utc::now();
        match self.repos.payments.finalize(intent_id, status, now).await? {
            Some(updated) => {
                self.publisher
                    .publish(RelayEvent::PaymentFinalized(PaymentFinalizedEvent {
                        intent_id,
                        booking_id: updated.booking_id,
                        status: status.to_string(),
                        timestamp: now,
                    }))
                    .await;
                info!("Payment intent {} finalized as {}", intent_id, status);
                Ok(updated)
            }
            None => self
                .repos
                .payments
                .get_intent(intent_id)
                .await?
                .ok_or_else(|| CoreError::not_found("Payment intent not found")),
        }
    }

    /// The intent's UPI link as an SVG QR code.
    pub async fn qr_svg(&self, principal: &Principal, intent_id: Uuid) -> CoreResult<String> {
        let intent = self.load_for_participant(principal, intent_id).await?;
        render_qr_svg(&intent.upi_uri)
    }

    /// Booking owner, trip driver or admin.
    async fn load_for_participant(&self, principal: &Principal, intent_id: Uuid) -> CoreResult<PaymentIntent> {
        let intent = self
            .repos
            .payments
            .get_intent(intent_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Payment intent not found"))?;
        let booking = load_booking(&self.repos, intent.booking_id).await?;
        if principal.owns_or_admin(booking.rider_id) {
            return Ok(intent);
        }
        let trip = load_trip(&self.repos, booking.trip_id).await?;
        if trip.driver_id != principal.id {
            return Err(CoreError::forbidden("Not allowed to access this payment"));
        }
        Ok(intent)
    }

    pub async fn latest_for_booking(&self, principal: &Principal, booking_id: Uuid) -> CoreResult<Option<PaymentIntent>> {
        let booking = load_booking(&self.repos, booking_id).await?;
        require_booking_owner(principal, &booking)?;
        Ok(self.repos.payments.latest_for_booking(booking_id).await?)
    }
}

fn normalize_key(raw: Option<&str>) -> CoreResult<Option<String>> {
    match raw.map(str::trim).filter(|k| !k.is_empty()) {
        Some(k) if k.len() > MAX_IDEMPOTENCY_KEY_LEN => Err(CoreError::validation(format!(
            "Idempotency-Key must be at most {} characters",
            MAX_IDEMPOTENCY_KEY_LEN
        ))),
        other => Ok(other.map(str::to_string)),
    }
}
