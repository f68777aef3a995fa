use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
    RequestExt,
};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use jsonwebtoken::{decode, DecodingKey, Validation};
use relay_shared::{Principal, Role};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// JWT Claims
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

impl Claims {
    pub fn principal(&self) -> Result<Principal, AppError> {
        let id = Uuid::parse_str(&self.sub)
            .map_err(|_| AppError::AuthenticationError("Token subject is not a user id".into()))?;
        let role = self
            .role
            .parse::<Role>()
            .map_err(|_| AppError::AuthenticationError("Token carries an unknown role".into()))?;
        Ok(Principal::new(id, role))
    }
}

// ============================================================================
// Bearer Authentication Middleware
// ============================================================================

/// Validates the bearer token and attaches the caller's `Principal` to the
/// request. Role checks happen in the services.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    // 1. Extract token from Authorization header
    let TypedHeader(Authorization(bearer)) = req
        .extract_parts::<TypedHeader<Authorization<Bearer>>>()
        .await
        .map_err(|_| AppError::AuthenticationError("Missing bearer token".into()))?;

    // 2. Decode and validate JWT
    let token_data = decode::<Claims>(
        bearer.token(),
        &DecodingKey::from_secret(state.auth.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        debug!("Rejected token: {}", e);
        AppError::AuthenticationError("Invalid or expired token".into())
    })?;

    // 3. Inject principal into request extensions
    let principal = token_data.claims.principal()?;
    req.extensions_mut().insert(principal);

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(sub: &str, role: &str) -> Claims {
        Claims { sub: sub.into(), role: role.into(), exp: 0 }
    }

    #[test]
    fn test_claims_to_principal() {
        let id = Uuid::new_v4();
        let principal = claims(&id.to_string(), "DRIVER").principal().unwrap();
        assert_eq!(principal, Principal::new(id, Role::Driver));

        assert!(claims("not-a-uuid", "rider").principal().is_err());
        assert!(claims(&id.to_string(), "pilot").principal().is_err());
    }
}
