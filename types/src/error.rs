use std::{error, fmt};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC error code, carried as the raw integer.
///
/// The protocol's well-known codes are associated constants; anything else
/// (implementation-defined server errors included) travels through
/// untouched, so a peer's custom code survives the round trip bit-exact.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(i64);

impl ErrorCode {
    /// Invalid JSON was received by the server.
    pub const PARSE_ERROR: ErrorCode = ErrorCode(-32700);
    /// The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: ErrorCode = ErrorCode(-32600);
    /// The method does not exist / is not available.
    pub const METHOD_NOT_FOUND: ErrorCode = ErrorCode(-32601);
    /// Invalid method parameter(s).
    pub const INVALID_PARAMS: ErrorCode = ErrorCode(-32602);
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: ErrorCode = ErrorCode(-32603);

    pub const fn new(code: i64) -> ErrorCode {
        ErrorCode(code)
    }

    /// The raw integer value.
    pub const fn code(self) -> i64 {
        self.0
    }

    /// The protocol-assigned reason for the well-known codes; custom codes
    /// have none.
    pub fn reason(self) -> Option<&'static str> {
        match self {
            ErrorCode::PARSE_ERROR => Some("Parse error"),
            ErrorCode::INVALID_REQUEST => Some("Invalid request"),
            ErrorCode::METHOD_NOT_FOUND => Some("Method not found"),
            ErrorCode::INVALID_PARAMS => Some("Invalid params"),
            ErrorCode::INTERNAL_ERROR => Some("Internal error"),
            _ => None,
        }
    }
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        ErrorCode(code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// JSON-RPC error object, carried verbatim in a response's `error` field.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Error {
    /// A number that indicates the error type that occurred.
    pub code: ErrorCode,
    /// A short description of the error.
    pub message: String,
    /// Additional information about the error, defined by the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error {}: {}", self.code, self.message)
    }
}

impl error::Error for Error {}

impl Error {
    /// An error with an explicit message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Error {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// A well-known code with its protocol-assigned message.
    fn protocol(code: ErrorCode) -> Self {
        let message = code.reason().unwrap_or("Server error");
        Error::new(code, message)
    }

    pub fn parse_error() -> Self {
        Self::protocol(ErrorCode::PARSE_ERROR)
    }

    pub fn invalid_request() -> Self {
        Self::protocol(ErrorCode::INVALID_REQUEST)
    }

    pub fn method_not_found() -> Self {
        Self::protocol(ErrorCode::METHOD_NOT_FOUND)
    }

    pub fn invalid_params() -> Self {
        Self::protocol(ErrorCode::INVALID_PARAMS)
    }

    pub fn internal_error() -> Self {
        Self::protocol(ErrorCode::INTERNAL_ERROR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_codes() {
        assert_eq!(ErrorCode::METHOD_NOT_FOUND.code(), -32601);
        assert_eq!(ErrorCode::from(-32700), ErrorCode::PARSE_ERROR);
        assert_eq!(ErrorCode::PARSE_ERROR.reason(), Some("Parse error"));
        assert_eq!(ErrorCode::new(-31999).reason(), None);
    }

    #[test]
    fn error_serialization() {
        let error = Error::method_not_found();
        assert_eq!(
            serde_json::to_string(&error).unwrap(),
            r#"{"code":-32601,"message":"Method not found"}"#
        );

        let error: Error = serde_json::from_str(r#"{"code":-31999,"message":"custom"}"#).unwrap();
        assert_eq!(error.code, ErrorCode::new(-31999));
        assert_eq!(error.message, "custom");
        assert_eq!(error.to_string(), "error -31999: custom");
    }
}
