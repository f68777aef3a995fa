use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::payment::{PaymentIntent, PaymentStatus};
use relay_core::repository::{PaymentRepository, RepoError, RepoResult};
use sqlx::PgPool;
use uuid::Uuid;

use crate::backend;

const INTENT_COLUMNS: &str =
    "id, booking_id, upi_uri, amount, reference, status, idempotency_key, created_at, completed_at";

pub struct PgPaymentRepository {
    pool: PgPool,
}

impl PgPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct IntentRow {
    id: Uuid,
    booking_id: Uuid,
    upi_uri: String,
    amount: i64,
    reference: String,
    status: String,
    idempotency_key: Option<String>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<IntentRow> for PaymentIntent {
    type Error = RepoError;

    fn try_from(row: IntentRow) -> Result<Self, Self::Error> {
        Ok(PaymentIntent {
            id: row.id,
            booking_id: row.booking_id,
            upi_uri: row.upi_uri,
            amount: row.amount,
            reference: row.reference,
            status: row
                .status
                .parse()
                .map_err(|_| RepoError::Corrupt(format!("payment intent {} status {}", row.id, row.status)))?,
            idempotency_key: row.idempotency_key,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

#[async_trait]
impl PaymentRepository for PgPaymentRepository {
    async fn insert_or_get(&self, intent: &PaymentIntent) -> RepoResult<PaymentIntent> {
        let inserted = sqlx::query_as::<_, IntentRow>(&format!(
            r#"
            INSERT INTO payment_intents (id, booking_id, upi_uri, amount, reference, status, idempotency_key, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (booking_id, idempotency_key) WHERE idempotency_key IS NOT NULL DO NOTHING
            RETURNING {}
            "#,
            INTENT_COLUMNS
        ))
        .bind(intent.id)
        .bind(intent.booking_id)
        .bind(&intent.upi_uri)
        .bind(intent.amount)
        .bind(&intent.reference)
        .bind(intent.status.as_str())
        .bind(&intent.idempotency_key)
        .bind(intent.created_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        if let Some(row) = inserted {
            return PaymentIntent::try_from(row);
        }

        // lost the race to a concurrent request with the same key
        let key = intent.idempotency_key.as_deref().unwrap_or_default();
        self.find_by_key(intent.booking_id, key).await?.ok_or_else(|| {
            RepoError::Backend(format!("payment intent for booking {} vanished after conflict", intent.booking_id))
        })
    }

    async fn find_by_key(&self, booking_id: Uuid, key: &str) -> RepoResult<Option<PaymentIntent>> {
        let row = sqlx::query_as::<_, IntentRow>(&format!(
            "SELECT {} FROM payment_intents WHERE booking_id = $1 AND idempotency_key = $2",
            INTENT_COLUMNS
        ))
        .bind(booking_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(PaymentIntent::try_from).transpose()
    }

    async fn get_intent(&self, id: Uuid) -> RepoResult<Option<PaymentIntent>> {
        let row = sqlx::query_as::<_, IntentRow>(&format!("SELECT {} FROM payment_intents WHERE id = $1", INTENT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(PaymentIntent::try_from).transpose()
    }

    async fn latest_for_booking(&self, booking_id: Uuid) -> RepoResult<Option<PaymentIntent>> {
        let row = sqlx::query_as::<_, IntentRow>(&format!(
            "SELECT {} FROM payment_intents WHERE booking_id = $1 ORDER BY created_at DESC LIMIT 1",
            INTENT_COLUMNS
        ))
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(PaymentIntent::try_from).transpose()
    }

    async fn finalize(&self, id: Uuid, status: PaymentStatus, at: DateTime<Utc>) -> RepoResult<Option<PaymentIntent>> {
        let row = sqlx::query_as::<_, IntentRow>(&format!(
            r#"
            UPDATE payment_intents SET status = $2, completed_at = $3
            WHERE id = $1 AND status = 'initiated'
            RETURNING {}
            "#,
            INTENT_COLUMNS
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(PaymentIntent::try_from).transpose()
    }
}
