//! API error types with structured JSON responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::accounts::AccountError;
use crate::alerts::DispatchError;
use crate::caregivers::CaregiverError;
use crate::core_state::CoreError;

const INTERNAL_MESSAGE: &str = "An internal error occurred";

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthorized,
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Rate limit exceeded")]
    RateLimited { retry_after: u64 },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Cannot invite yourself")]
    SelfInvite,
    #[error("Caregiver already invited")]
    AlreadyInvited,
    #[error("Email already registered")]
    EmailTaken,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "AUTH_REQUIRED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::RateLimited { .. } => "RATE_LIMITED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::SelfInvite => "SELF_INVITE",
            ApiError::AlreadyInvited => "ALREADY_INVITED",
            ApiError::EmailTaken => "EMAIL_TAKEN",
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_)
            | ApiError::SelfInvite
            | ApiError::AlreadyInvited
            | ApiError::EmailTaken => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            ApiError::RateLimited { retry_after } => {
                format!("Rate limit exceeded. Retry after {retry_after}s")
            }
            ApiError::NotFound(detail)
            | ApiError::BadRequest(detail)
            | ApiError::Forbidden(detail) => detail.clone(),
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                if cfg!(debug_assertions) {
                    format!("{INTERNAL_MESSAGE}: {detail}")
                } else {
                    INTERNAL_MESSAGE.to_string()
                }
            }
            other => other.to_string(),
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message,
            },
        };

        let mut response = (self.status(), Json(body)).into_response();
        if let ApiError::RateLimited { retry_after } = &self {
            if let Ok(val) = axum::http::HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert("Retry-After", val);
            }
        }
        response
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::LockPoisoned => ApiError::Internal("lock poisoned".into()),
            CoreError::Database(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<crate::db::DatabaseError> for ApiError {
    fn from(err: crate::db::DatabaseError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::InvalidEmail | AccountError::MissingName | AccountError::WeakPassword => {
                ApiError::BadRequest(err.to_string())
            }
            AccountError::EmailTaken => ApiError::EmailTaken,
            AccountError::InvalidCredentials | AccountError::InvalidSession => {
                ApiError::Unauthorized
            }
            AccountError::Database(e) => e.into(),
        }
    }
}

impl From<CaregiverError> for ApiError {
    fn from(err: CaregiverError) -> Self {
        match err {
            CaregiverError::SelfInvite => ApiError::SelfInvite,
            CaregiverError::AlreadyInvited => ApiError::AlreadyInvited,
            CaregiverError::InvalidEmail | CaregiverError::InvalidTransition(_) => {
                ApiError::BadRequest(err.to_string())
            }
            CaregiverError::NotFound => ApiError::NotFound(err.to_string()),
            CaregiverError::Database(e) => e.into(),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::InvalidLocation(_)
            | DispatchError::MissingMedicine
            | DispatchError::InvalidStatus
            | DispatchError::AlreadyClosed(_) => ApiError::BadRequest(err.to_string()),
            DispatchError::NotFound => ApiError::NotFound(err.to_string()),
            DispatchError::Directory(e) => e.into(),
            DispatchError::Database(e) => e.into(),
        }
    }
}
