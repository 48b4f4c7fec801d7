use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// Errors surfaced on the synchronous request path. Background reconciliation
/// failures never reach this type; they are logged per job and swallowed.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Gateway credential exchange failed")]
    Auth,
    #[error("Payment initiation rejected: {0}")]
    InitiationRejected(String),
    #[error("Malformed callback payload")]
    MalformedCallback,
    #[error("{0} is unreachable")]
    ServiceUnreachable(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failure body shared by every non-200 response.
#[derive(Serialize, ToSchema)]
pub struct ErrorRes {
    pub success: bool,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::Auth => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InitiationRejected(_) => StatusCode::BAD_REQUEST,
            AppError::MalformedCallback => StatusCode::BAD_REQUEST,
            AppError::ServiceUnreachable(_) => StatusCode::BAD_GATEWAY,
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if let AppError::Other(err) = &self {
            tracing::error!("Internal error: {:#}", err);
        }

        let body = ErrorRes {
            success: false,
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_taxonomy() {
        assert_eq!(
            AppError::Auth.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::InitiationRejected("declined".into())
                .into_response()
                .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::MalformedCallback.into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::ServiceUnreachable("Daraja".into())
                .into_response()
                .status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
