use relay_booking::Services;
use std::sync::Arc;

use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub auth: AuthConfig,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(services: Services, jwt_secret: impl Into<String>) -> Result<Self, prometheus::Error> {
        Ok(Self {
            services,
            auth: AuthConfig { secret: jwt_secret.into() },
            metrics: Arc::new(Metrics::new()?),
        })
    }
}
