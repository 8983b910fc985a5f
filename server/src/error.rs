//! Domain failures surfaced over HTTP.
//!
//! Each variant renders as its stable machine-readable constant; clients
//! match on the constant, not on prose. Infrastructure errors collapse to a
//! bare 500; the details go to the log, never into a response body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ApiError {
    // validation
    #[error("INVALID_PHONE_NUMBER")]
    InvalidPhoneNumber,

    #[error("INVALID_OTP_FORMAT")]
    InvalidOtpFormat,

    #[error("INVALID_PREDICTION_FORMAT")]
    InvalidPredictionFormat,

    // OTP state
    #[error("OTP_NOT_FOUND_OR_EXPIRED")]
    OtpNotFound,

    #[error("OTP_EXPIRED")]
    OtpExpired,

    #[error("INVALID_OTP_CODE")]
    InvalidOtpCode,

    // authentication
    #[error("MISSING_ACCESS_TOKEN")]
    MissingAccessToken,

    #[error("INVALID_OR_EXPIRED_TOKEN")]
    InvalidOrExpiredToken,

    #[error("SESSION_IP_MISMATCH")]
    SessionIpMismatch,

    #[error("INVALID_REFRESH_TOKEN")]
    InvalidRefreshToken,

    // authorization
    #[error("ADMIN_ACCESS_REQUIRED")]
    AdminRequired,

    // throttling
    #[error("EXCEEDED_SEND_LIMIT")]
    ExceededSendLimit,

    #[error("PLEASE_WAIT_BEFORE_NEXT_REQUEST")]
    PleaseWait,

    #[error("EXCEEDED_VERIFICATION_ATTEMPTS")]
    ExceededVerificationAttempts,

    #[error("TOO_MANY_REQUESTS")]
    TooManyRequests,

    #[error("INTERNAL_ERROR")]
    Internal(#[from] contest::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidPhoneNumber
            | ApiError::InvalidOtpFormat
            | ApiError::InvalidPredictionFormat
            | ApiError::OtpNotFound
            | ApiError::OtpExpired
            | ApiError::InvalidOtpCode => StatusCode::BAD_REQUEST,

            ApiError::MissingAccessToken
            | ApiError::InvalidOrExpiredToken
            | ApiError::SessionIpMismatch
            | ApiError::InvalidRefreshToken => StatusCode::UNAUTHORIZED,

            ApiError::AdminRequired => StatusCode::FORBIDDEN,

            ApiError::ExceededSendLimit
            | ApiError::PleaseWait
            | ApiError::ExceededVerificationAttempts
            | ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,

            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(ref err) = self {
            error!(error = %err, "Request failed");
        }

        (self.status(), Json(json!({ "message": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::InvalidOtpCode.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::MissingAccessToken.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::AdminRequired.status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::ExceededSendLimit.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_message_constants_are_stable() {
        assert_eq!(ApiError::OtpNotFound.to_string(), "OTP_NOT_FOUND_OR_EXPIRED");
        assert_eq!(
            ApiError::PleaseWait.to_string(),
            "PLEASE_WAIT_BEFORE_NEXT_REQUEST"
        );
        assert_eq!(
            ApiError::ExceededVerificationAttempts.to_string(),
            "EXCEEDED_VERIFICATION_ATTEMPTS"
        );
    }

    #[test]
    fn test_internal_error_hides_details() {
        let err = ApiError::Internal(contest::Error::Config("secret dsn".into()));
        assert_eq!(err.to_string(), "INTERNAL_ERROR");
    }
}
