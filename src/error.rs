//! Error taxonomy and message catalog.
//!
//! Every failure the client reports carries an [`ErrorCode`]. Codes map to a
//! wire string (what servers and other clients call the condition) and, for
//! a handful of codes, a fixed human-readable message. The catalog is a
//! compiled-in `match`, so there is no shared registry to initialise or
//! mutate.

// Rust guideline compliant 2026-02

use std::fmt;

/// Boxed lower-level cause attached to a [`NatsError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convenience result alias used throughout the crate.
pub type Result<T, E = NatsError> = std::result::Result<T, E>;

/// Known error conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The request subject had no active responders.
    NoResponders,
    /// The responder signaled a failure status.
    RequestError,
    /// No reply before the deadline, or the connection closed while waiting.
    Timeout,
    /// Operation attempted on a closed connection.
    ConnectionClosed,
    /// Operation attempted while the connection is draining.
    ConnectionDraining,
    /// No server accepted the connection.
    ConnectionRefused,
    /// The socket was lost.
    Disconnect,
    /// Subject failed validation.
    BadSubject,
    /// Conflicting credentials were supplied.
    BadAuthentication,
    /// A JSON document could not be parsed.
    BadJson,
    /// Payload was rejected before sending.
    InvalidPayload,
    /// Malformed or unexpected server message.
    ProtocolError,
    /// Server refused a publish or subscribe.
    PermissionsViolation,
    /// Server rejected the credentials.
    AuthorizationViolation,
    /// Anything else. Always carries a cause.
    Unknown,
}

impl ErrorCode {
    /// Wire string for this code.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoResponders => "503",
            Self::RequestError => "REQUEST_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::ConnectionClosed => "CONNECTION_CLOSED",
            Self::ConnectionDraining => "CONNECTION_DRAINING",
            Self::ConnectionRefused => "CONNECTION_REFUSED",
            Self::Disconnect => "DISCONNECT",
            Self::BadSubject => "BAD_SUBJECT",
            Self::BadAuthentication => "BAD_AUTHENTICATION",
            Self::BadJson => "BAD_JSON",
            Self::InvalidPayload => "INVALID_PAYLOAD",
            Self::ProtocolError => "NATS_PROTOCOL_ERR",
            Self::PermissionsViolation => "PERMISSIONS_VIOLATION",
            Self::AuthorizationViolation => "AUTHORIZATION_VIOLATION",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    /// Catalog message for this code, falling back to the wire string.
    pub const fn message(self) -> &'static str {
        match self {
            Self::BadAuthentication => "User and Token can not both be provided",
            Self::InvalidPayload => {
                "Invalid payload type - payloads can be 'binary', 'string', or 'json'"
            }
            Self::BadJson => "Bad JSON",
            Self::NoResponders => "no responders",
            Self::Timeout => "timeout",
            other => other.as_str(),
        }
    }

    /// Look up a code by its wire string.
    pub fn from_wire(s: &str) -> Option<Self> {
        const ALL: [ErrorCode; 15] = [
            ErrorCode::NoResponders,
            ErrorCode::RequestError,
            ErrorCode::Timeout,
            ErrorCode::ConnectionClosed,
            ErrorCode::ConnectionDraining,
            ErrorCode::ConnectionRefused,
            ErrorCode::Disconnect,
            ErrorCode::BadSubject,
            ErrorCode::BadAuthentication,
            ErrorCode::BadJson,
            ErrorCode::InvalidPayload,
            ErrorCode::ProtocolError,
            ErrorCode::PermissionsViolation,
            ErrorCode::AuthorizationViolation,
            ErrorCode::Unknown,
        ];
        ALL.into_iter().find(|code| code.as_str() == s)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error reported by the client.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct NatsError {
    code: ErrorCode,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl NatsError {
    /// Create an error with an explicit message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create an error using the catalog message for `code`.
    pub fn for_code(code: ErrorCode) -> Self {
        Self::new(code, code.message())
    }

    /// Create an error using the catalog message and a wrapped cause.
    pub fn with_source(code: ErrorCode, source: impl Into<BoxError>) -> Self {
        Self {
            code,
            message: code.message().to_string(),
            source: Some(source.into()),
        }
    }

    /// Catch-all error wrapping an unexpected lower-level failure.
    pub fn unknown(source: impl Into<BoxError>) -> Self {
        let source = source.into();
        Self {
            code: ErrorCode::Unknown,
            message: format!("{}: {}", ErrorCode::Unknown.as_str(), source),
            source: Some(source),
        }
    }

    /// The error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// True if this is a no-responders error.
    pub fn is_no_responders(&self) -> bool {
        self.code == ErrorCode::NoResponders
    }

    /// True if this is a timeout (including closed-while-pending).
    pub fn is_timeout(&self) -> bool {
        self.code == ErrorCode::Timeout
    }
}

impl From<std::io::Error> for NatsError {
    fn from(e: std::io::Error) -> Self {
        Self::unknown(e)
    }
}

impl From<serde_json::Error> for NatsError {
    fn from(e: serde_json::Error) -> Self {
        Self::with_source(ErrorCode::BadJson, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_catalog_messages() {
        assert_eq!(
            NatsError::for_code(ErrorCode::BadAuthentication).to_string(),
            "User and Token can not both be provided"
        );
        assert_eq!(NatsError::for_code(ErrorCode::BadJson).message(), "Bad JSON");
        assert!(NatsError::for_code(ErrorCode::InvalidPayload)
            .message()
            .starts_with("Invalid payload type"));
    }

    #[test]
    fn test_uncataloged_code_uses_wire_string() {
        let err = NatsError::for_code(ErrorCode::ConnectionClosed);
        assert_eq!(err.message(), "CONNECTION_CLOSED");
        assert_eq!(err.code(), ErrorCode::ConnectionClosed);
    }

    #[test]
    fn test_unknown_carries_cause() {
        let io = std::io::Error::other("socket exploded");
        let err = NatsError::unknown(io);
        assert_eq!(err.code(), ErrorCode::Unknown);
        assert!(err.message().contains("socket exploded"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_from_wire_round_trips_every_code() {
        assert_eq!(ErrorCode::from_wire("503"), Some(ErrorCode::NoResponders));
        assert_eq!(
            ErrorCode::from_wire("NATS_PROTOCOL_ERR"),
            Some(ErrorCode::ProtocolError)
        );
        assert_eq!(ErrorCode::from_wire("nope"), None);
    }

    #[test]
    fn test_predicates() {
        assert!(NatsError::for_code(ErrorCode::NoResponders).is_no_responders());
        assert!(NatsError::for_code(ErrorCode::Timeout).is_timeout());
        assert!(!NatsError::new(ErrorCode::RequestError, "500").is_timeout());
    }
}
