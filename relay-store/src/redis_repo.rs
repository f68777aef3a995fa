use async_trait::async_trait;
use redis::{AsyncCommands, RedisResult};
use relay_core::events::EventPublisher;
use relay_core::rate_limit::RateLimiter;
use relay_core::repository::{RepoError, RepoResult};
use relay_shared::models::RelayEvent;
use tracing::{debug, error};

const CHANNEL_PREFIX: &str = "relay";

#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    pub async fn ping(&self) -> RedisResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    /// Fixed-window counter: `true` while `key` has been hit at most `limit`
    /// times in the current window.
    pub async fn check_rate_limit(&self, key: &str, limit: i64, window_seconds: i64) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let (count,): (i64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .expire(key, window_seconds)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(count <= limit)
    }

    pub async fn publish_json(&self, channel: &str, payload: &str) -> RedisResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.publish::<_, _, ()>(channel, payload).await
    }
}

/// Rate limiter shared by every API instance pointing at the same Redis.
#[derive(Clone)]
pub struct RedisRateLimiter {
    client: RedisClient,
    limit: i64,
    window_seconds: i64,
}

impl RedisRateLimiter {
    pub fn new(client: RedisClient, limit: u32, window_seconds: i64) -> Self {
        Self { client, limit: i64::from(limit.max(1)), window_seconds: window_seconds.max(1) }
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check(&self, key: &str) -> RepoResult<bool> {
        let key = format!("ratelimit:{}", key);
        self.client
            .check_rate_limit(&key, self.limit, self.window_seconds)
            .await
            .map_err(|e| RepoError::Backend(e.to_string()))
    }
}

/// Publishes events as JSON on `relay.<topic>` channels.
#[async_trait]
impl EventPublisher for RedisClient {
    async fn publish(&self, event: RelayEvent) {
        let channel = format!("{}.{}", CHANNEL_PREFIX, event.topic());
        let payload = match serde_json::to_string(&event) {
            Ok(p) => p,
            Err(e) => {
                error!("Failed to serialize event for {}: {}", channel, e);
                return;
            }
        };

        match self.publish_json(&channel, &payload).await {
            Ok(()) => debug!("Published event to {} (key {})", channel, event.key()),
            Err(e) => error!("Failed to publish event to {}: {}", channel, e),
        }
    }
}
