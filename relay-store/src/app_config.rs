use chrono::Duration;
use relay_core::booking::{BookingPolicy, CANCEL_CUTOFF_MINUTES, MAX_SEATS_PER_BOOKING, OTP_GRACE_MINUTES};
use relay_core::payment::UpiPayee;
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub booking_rules: BookingRules,
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub locations: LocationsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// In-memory store when unset.
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: None, max_connections: default_max_connections(), run_migrations: true }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RedisConfig {
    /// In-process rate limiting and log-only events when unset.
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BookingRules {
    #[serde(default = "default_cancel_cutoff")]
    pub cancel_cutoff_minutes: i64,
    #[serde(default = "default_otp_grace")]
    pub otp_grace_minutes: i64,
    #[serde(default = "default_max_seats")]
    pub max_seats_per_booking: i32,
    #[serde(default = "default_hash_cost")]
    pub otp_hash_cost: u32,
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            cancel_cutoff_minutes: default_cancel_cutoff(),
            otp_grace_minutes: default_otp_grace(),
            max_seats_per_booking: default_max_seats(),
            otp_hash_cost: default_hash_cost(),
        }
    }
}

impl BookingRules {
    pub fn policy(&self) -> BookingPolicy {
        BookingPolicy {
            cancel_cutoff: Duration::minutes(self.cancel_cutoff_minutes),
            otp_grace: Duration::minutes(self.otp_grace_minutes),
            max_seats: self.max_seats_per_booking,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentsConfig {
    pub upi_vpa: String,
    pub upi_name: String,
}

impl PaymentsConfig {
    pub fn payee(&self) -> UpiPayee {
        UpiPayee { vpa: self.upi_vpa.clone(), name: self.upi_name.clone() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocationsConfig {
    #[serde(default = "default_pings_per_second")]
    pub max_pings_per_second: u32,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

impl Default for LocationsConfig {
    fn default() -> Self {
        Self { max_pings_per_second: default_pings_per_second(), retention_days: default_retention_days() }
    }
}

fn default_max_connections() -> u32 { 10 }
fn default_true() -> bool { true }
fn default_cancel_cutoff() -> i64 { CANCEL_CUTOFF_MINUTES }
fn default_otp_grace() -> i64 { OTP_GRACE_MINUTES }
fn default_max_seats() -> i32 { MAX_SEATS_PER_BOOKING }
fn default_hash_cost() -> u32 { 12 }
fn default_pings_per_second() -> u32 { 2 }
fn default_retention_days() -> i64 { 7 }

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // optional per-environment overrides
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // untracked developer overrides
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `RELAY_DATABASE__URL=postgres://...`
            .add_source(config::Environment::with_prefix("RELAY").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
