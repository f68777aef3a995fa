use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use relay_core::CoreError;
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    Core(CoreError),
    AuthenticationError(String),
    InternalServerError(String),
}

impl AppError {
    /// HTTP status and machine-readable kind.
    pub fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::AuthenticationError(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::InternalServerError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            AppError::Core(err) => {
                let status = match err {
                    CoreError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
                    CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
                    CoreError::NotFound(_) => StatusCode::NOT_FOUND,
                    CoreError::InvalidState(_) | CoreError::Conflict(_) => StatusCode::CONFLICT,
                    CoreError::ValidationError(_) => StatusCode::BAD_REQUEST,
                    CoreError::Expired(_) => StatusCode::GONE,
                    CoreError::AuthenticationMismatch(_) => StatusCode::UNAUTHORIZED,
                    CoreError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
                    CoreError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.kind())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        let error_message = match self {
            AppError::AuthenticationError(msg) => msg,
            AppError::Core(CoreError::InternalError(msg)) | AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                "Internal Server Error".to_string()
            }
            AppError::Core(err) => err.to_string(),
        };

        let body = Json(json!({
            "error": error_message,
            "kind": kind,
        }));

        (status, body).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        Self::Core(err)
    }
}

// Malformed input is a validation error whichever extractor caught it.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Core(CoreError::validation(rejection.body_text()))
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        Self::Core(CoreError::validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Core(CoreError::validation(rejection.body_text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (CoreError::forbidden("x"), StatusCode::FORBIDDEN),
            (CoreError::not_found("x"), StatusCode::NOT_FOUND),
            (CoreError::invalid_state("x"), StatusCode::CONFLICT),
            (CoreError::Conflict("x".into()), StatusCode::CONFLICT),
            (CoreError::validation("x"), StatusCode::BAD_REQUEST),
            (CoreError::Expired("x".into()), StatusCode::GONE),
            (CoreError::AuthenticationMismatch("x".into()), StatusCode::UNAUTHORIZED),
            (CoreError::RateLimited("x".into()), StatusCode::TOO_MANY_REQUESTS),
            (CoreError::InternalError("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            let kind = err.kind();
            let (status, mapped_kind) = AppError::from(err).status_and_kind();
            assert_eq!(status, expected, "{}", kind);
            assert_eq!(mapped_kind, kind);
        }
    }

    #[test]
    fn test_internal_detail_is_hidden() {
        let response = AppError::from(CoreError::InternalError("pool timed out".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let (_, kind) = AppError::AuthenticationError("Missing bearer token".into()).status_and_kind();
        assert_eq!(kind, "unauthorized");
    }
}
