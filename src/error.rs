//! Error types for the resource sync layer.

use serde_json::Value;
use std::fmt;

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Fallback text when the server gives no usable message.
pub const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong. Please try again.";

/// Fallback text for requests that never got a response.
pub const CONNECTIVITY_MESSAGE: &str = "Unable to reach the server. Check your connection.";

/// Error types for the sync layer.
///
/// Every fetch and mutation returns `Result<T>`. The variants mirror how a
/// screen should react to the failure:
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// No response was received.
    ///
    /// Raised for connectivity loss and for requests that exceed the
    /// configured request timeout. Never cached as valid data.
    Network(String),

    /// The server answered 401.
    ///
    /// Reads of the current user turn this into "no user"; listing screens
    /// should show an unauthenticated state rather than the raw error.
    Unauthorized(String),

    /// The server rejected the request (4xx other than 401 and 404).
    ///
    /// The message is the server-provided text and is shown verbatim.
    Validation {
        /// HTTP status code
        status: u16,
        /// Server-provided message
        message: String,
    },

    /// The requested resource does not exist.
    ///
    /// Returned for 404 responses and for item endpoints that answer with an
    /// empty `data` array.
    NotFound(String),

    /// The server failed (5xx).
    Server {
        /// HTTP status code
        status: u16,
        /// Server-provided message, if any
        message: String,
    },

    /// No cached data for a cache-only read.
    CacheMiss,

    /// Converting a payload into the cached JSON form failed.
    SerializationError(String),

    /// Converting cached JSON back into the requested type failed.
    ///
    /// Usually means two callers used the same key with different types.
    DeserializationError(String),

    /// Invalid configuration.
    ConfigError(String),

    /// Generic error with custom message.
    Other(String),
}

impl Error {
    /// Classify a non-2xx response.
    ///
    /// The message is taken from `{ "message": ... }` (a string or an array
    /// of strings) or `{ "error": ... }`, else a generic fallback.
    pub fn from_status(status: u16, body: &Value) -> Self {
        let message =
            extract_message(body).unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string());

        match status {
            401 => Error::Unauthorized(message),
            404 => Error::NotFound(message),
            400..=499 => Error::Validation { status, message },
            _ => Error::Server { status, message },
        }
    }

    /// True for 401 responses.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Unauthorized(_))
    }

    /// True when no response was received.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Network(_))
    }

    /// Text suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            Error::Network(_) => CONNECTIVITY_MESSAGE.to_string(),
            Error::Unauthorized(msg) | Error::NotFound(msg) => msg.clone(),
            Error::Validation { message, .. } => message.clone(),
            _ => GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }
}

/// Pull a human-readable message out of an error body.
pub fn extract_message(body: &Value) -> Option<String> {
    let field = |name: &str| match body.get(name)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Array(parts) => {
            let parts: Vec<&str> = parts.iter().filter_map(Value::as_str).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        _ => None,
    };

    field("message").or_else(|| field("error"))
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Network(msg) => write!(f, "Network error: {}", msg),
            Error::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            Error::Validation { status, message } => {
                write!(f, "Request rejected ({}): {}", status, message)
            }
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::Server { status, message } => {
                write!(f, "Server error ({}): {}", status, message)
            }
            Error::CacheMiss => write!(f, "Cache miss"),
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Error::Network(e.to_string())
        } else if e.is_syntax() || e.is_data() || e.is_eof() {
            Error::DeserializationError(e.to_string())
        } else {
            Error::SerializationError(e.to_string())
        }
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Error::DeserializationError(e.to_string())
        } else if e.is_builder() {
            Error::ConfigError(e.to_string())
        } else {
            Error::Network(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_display() {
        let err = Error::Validation {
            status: 422,
            message: "Phone is required".to_string(),
        };
        assert_eq!(err.to_string(), "Request rejected (422): Phone is required");
    }

    #[test]
    fn test_error_from_string() {
        let err: Error = "test error".into();
        assert!(matches!(err, Error::Other(_)));
    }

    #[test]
    fn test_from_status_classification() {
        let body = json!({ "message": "nope" });
        assert!(Error::from_status(401, &body).is_unauthorized());
        assert_eq!(Error::from_status(404, &body), Error::NotFound("nope".into()));
        assert_eq!(
            Error::from_status(409, &body),
            Error::Validation {
                status: 409,
                message: "nope".into()
            }
        );
        assert!(matches!(
            Error::from_status(503, &body),
            Error::Server { status: 503, .. }
        ));
    }

    #[test]
    fn test_message_extraction() {
        assert_eq!(
            extract_message(&json!({ "message": ["name too short", "price required"] })),
            Some("name too short, price required".to_string())
        );
        assert_eq!(
            extract_message(&json!({ "error": "Bad Request" })),
            Some("Bad Request".to_string())
        );
        assert_eq!(extract_message(&json!({ "message": "" })), None);
        assert_eq!(extract_message(&Value::Null), None);

        let err = Error::from_status(400, &json!({ "detail": "ignored" }));
        assert_eq!(err.user_message(), GENERIC_FAILURE_MESSAGE);
    }

    #[test]
    fn test_user_message() {
        let err = Error::Network("connection reset".into());
        assert_eq!(err.user_message(), CONNECTIVITY_MESSAGE);

        let err = Error::Server {
            status: 500,
            message: "stack trace".into(),
        };
        assert_eq!(err.user_message(), GENERIC_FAILURE_MESSAGE);
    }
}
