//! Remote API error codes and their mapping onto [`MegaError`].

use crate::error::MegaError;

/// Numeric error codes a MEGA-style storage service answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorCode {
    /// Internal error
    Internal = -1,
    /// Invalid arguments
    Args = -2,
    /// Try again (rate limited)
    Again = -3,
    /// Rate limit exceeded
    RateLimit = -4,
    /// Transfer failed
    Failed = -5,
    /// Too many IPs
    TooManyIps = -6,
    /// Access denied
    AccessDenied = -7,
    /// Resource already exists
    Exist = -8,
    /// Resource does not exist
    NotExist = -9,
    /// Circular linking
    Circular = -10,
    /// Access violation
    AccessViolation = -11,
    /// Application key required
    AppKey = -12,
    /// Session expired
    Expired = -13,
    /// Not confirmed
    NotConfirmed = -14,
    /// Resource blocked
    Blocked = -15,
    /// Over quota
    OverQuota = -16,
    /// Temporarily unavailable
    TempUnavail = -17,
    /// Too many connections
    TooManyConnections = -18,
    /// Unknown error
    Unknown = -9999,
}

impl ApiErrorCode {
    /// Get human-readable description of the error.
    pub fn description(&self) -> &'static str {
        match self {
            ApiErrorCode::Internal => "Internal error",
            ApiErrorCode::Args => "Invalid arguments",
            ApiErrorCode::Again => "Try again",
            ApiErrorCode::RateLimit => "Rate limit exceeded",
            ApiErrorCode::Failed => "Transfer failed",
            ApiErrorCode::TooManyIps => "Too many IPs",
            ApiErrorCode::AccessDenied => "Access denied",
            ApiErrorCode::Exist => "Resource already exists",
            ApiErrorCode::NotExist => "Resource does not exist",
            ApiErrorCode::Circular => "Circular linking",
            ApiErrorCode::AccessViolation => "Access violation",
            ApiErrorCode::AppKey => "Application key required",
            ApiErrorCode::Expired => "Session expired",
            ApiErrorCode::NotConfirmed => "Not confirmed",
            ApiErrorCode::Blocked => "Resource blocked",
            ApiErrorCode::OverQuota => "Over quota",
            ApiErrorCode::TempUnavail => "Temporarily unavailable",
            ApiErrorCode::TooManyConnections => "Too many connections",
            ApiErrorCode::Unknown => "Unknown error",
        }
    }

    /// Codes that invalidate the session credentials.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            ApiErrorCode::AccessDenied
                | ApiErrorCode::AppKey
                | ApiErrorCode::Expired
                | ApiErrorCode::NotConfirmed
        )
    }

    /// Codes raised by the data channel of a transfer.
    pub fn is_transfer_failure(&self) -> bool {
        matches!(
            self,
            ApiErrorCode::Failed
                | ApiErrorCode::OverQuota
                | ApiErrorCode::TempUnavail
                | ApiErrorCode::TooManyConnections
                | ApiErrorCode::Again
                | ApiErrorCode::RateLimit
        )
    }

    /// Convert into an engine error, naming the object the call was about.
    pub fn into_error(self, subject: &str) -> MegaError {
        let detail = if subject.is_empty() {
            self.description().to_string()
        } else {
            format!("{}: {}", subject, self.description())
        };
        if self.is_auth_failure() {
            MegaError::Authentication(detail)
        } else if self == ApiErrorCode::NotExist {
            MegaError::NotFound(detail)
        } else if self.is_transfer_failure() {
            MegaError::Transfer(detail)
        } else {
            MegaError::ApiError {
                code: self as i32,
                message: detail,
            }
        }
    }
}

impl From<ApiErrorCode> for MegaError {
    fn from(code: ApiErrorCode) -> Self {
        code.into_error("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(matches!(
            MegaError::from(ApiErrorCode::Expired),
            MegaError::Authentication(_)
        ));
        assert!(matches!(
            MegaError::from(ApiErrorCode::AccessDenied),
            MegaError::Authentication(_)
        ));
        assert!(matches!(
            ApiErrorCode::NotExist.into_error("/docs"),
            MegaError::NotFound(msg) if msg == "/docs: Resource does not exist"
        ));
        assert!(matches!(
            MegaError::from(ApiErrorCode::OverQuota),
            MegaError::Transfer(_)
        ));
        assert!(matches!(
            MegaError::from(ApiErrorCode::Exist),
            MegaError::ApiError { code: -8, .. }
        ));
    }
}
