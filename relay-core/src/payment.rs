use chrono::{DateTime, Utc};
use qrcode::render::svg;
use qrcode::{EcLevel, QrCode};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{CoreError, CoreResult};

pub const UPI_CURRENCY: &str = "INR";
const REFERENCE_BYTES: usize = 12;
const QR_MIN_SIZE: u32 = 240;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Initiated,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Initiated => "initiated",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn is_final(&self) -> bool {
        *self != PaymentStatus::Initiated
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initiated" => Ok(PaymentStatus::Initiated),
            "success" => Ok(PaymentStatus::Success),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(CoreError::validation(format!("unknown payment status: {}", other))),
        }
    }
}

/// Terminal result reported for an intent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentOutcome {
    Success,
    Failed,
}

impl From<PaymentOutcome> for PaymentStatus {
    fn from(outcome: PaymentOutcome) -> Self {
        match outcome {
            PaymentOutcome::Success => PaymentStatus::Success,
            PaymentOutcome::Failed => PaymentStatus::Failed,
        }
    }
}

/// An outstanding request to pay for a booking through a UPI deep link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentIntent {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub upi_uri: String,
    /// Minor units (paise).
    pub amount: i64,
    pub reference: String,
    pub status: PaymentStatus,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Who gets paid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpiPayee {
    pub vpa: String,
    pub name: String,
}

/// `12345` paise -> `"123.45"`.
pub fn format_amount(paise: i64) -> String {
    format!("{}.{:02}", paise / 100, paise % 100)
}

/// Random transaction reference, 24 hex characters.
pub fn generate_reference() -> String {
    let mut bytes = [0u8; REFERENCE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Human-readable note shown in the payer's UPI app.
pub fn booking_note(booking_id: Uuid) -> String {
    let id = booking_id.simple().to_string();
    format!("Booking {}", &id[id.len() - 6..])
}

/// Builds `upi://pay?pa=..&pn=..&am=..&cu=INR&tr=..&tn=..`.
///
/// Pure: the same inputs always give the same URI. Idempotency of the
/// persisted intent is the caller's concern.
pub fn build_upi_uri(payee: &UpiPayee, amount_paise: i64, note: &str, reference: &str) -> CoreResult<String> {
    if amount_paise <= 0 {
        return Err(CoreError::validation("Invalid amount"));
    }
    let amount = format_amount(amount_paise);
    let query = serde_urlencoded::to_string([
        ("pa", payee.vpa.as_str()),
        ("pn", payee.name.as_str()),
        ("am", amount.as_str()),
        ("cu", UPI_CURRENCY),
        ("tr", reference),
        ("tn", note),
    ])
    .map_err(|e| CoreError::InternalError(format!("upi uri encoding failed: {}", e)))?;

    Ok(format!("upi://pay?{}", query))
}

/// Scannable SVG of a UPI link, medium error correction.
pub fn render_qr_svg(upi_uri: &str) -> CoreResult<String> {
    let code = QrCode::with_error_correction_level(upi_uri.as_bytes(), EcLevel::M)
        .map_err(|e| CoreError::InternalError(format!("qr encoding failed: {}", e)))?;
    Ok(code
        .render::<svg::Color>()
        .min_dimensions(QR_MIN_SIZE, QR_MIN_SIZE)
        .quiet_zone(true)
        .build())
}
