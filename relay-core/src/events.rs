use async_trait::async_trait;
use relay_shared::models::RelayEvent;

/// Fan-out of committed changes. Publishing is best effort: implementations
/// log their own failures and never fail the request that produced the event.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: RelayEvent);
}

/// Writes events to the log only. Used when no broker is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, event: RelayEvent) {
        tracing::info!(topic = event.topic(), key = %event.key(), "event: {:?}", event);
    }
}
