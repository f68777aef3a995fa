pub mod app_config;
pub mod booking_repo;
pub mod database;
pub mod location_repo;
pub mod memory;
pub mod payment_repo;
pub mod redis_repo;
pub mod trip_repo;

pub use database::DbClient;
pub use memory::{MemoryStore, RecordingPublisher};
pub use redis_repo::{RedisClient, RedisRateLimiter};

use relay_core::repository::RepoError;

pub(crate) fn backend(err: sqlx::Error) -> RepoError {
    RepoError::Backend(err.to_string())
}

/// Like [`backend`], but a unique violation (`23505`) becomes
/// [`RepoError::Duplicate`].
pub(crate) fn insert_error(err: sqlx::Error) -> RepoError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            RepoError::Duplicate(db.constraint().unwrap_or("unique constraint").to_string())
        }
        _ => backend(err),
    }
}
