//! Error taxonomy for Taskdeck API calls.
//!
//! Every way a request can fail (no response, non-2xx status, malformed
//! envelope) is normalized into one [`ApiFailure`] carrying a [`StatusClass`]
//! and the raw message candidates. User-facing text is derived from those
//! candidates with a single precedence list, see [`ApiFailure::message`].

use crate::envelope::{non_empty, Envelope};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Literal used when a failure carries no message at all.
pub const FALLBACK_ERROR_MESSAGE: &str = "An error occurred";

pub const PERMISSION_DENIED_MESSAGE: &str = "You do not have permission to perform this action";
pub const NOT_FOUND_MESSAGE: &str = "The requested resource was not found";
pub const SERVER_ERROR_MESSAGE: &str = "Server error. Please try again later.";

// ============================================================================
// STATUS CLASS
// ============================================================================

/// Classification of a failed operation.
///
/// | Class          | Source                                        |
/// |----------------|-----------------------------------------------|
/// | `Transport`    | no response reached the client (incl. timeout) |
/// | `Validation`   | 4xx other than 401/403/404, `success: false`  |
/// | `Unauthorized` | 401                                           |
/// | `Forbidden`    | 403                                           |
/// | `NotFound`     | 404                                           |
/// | `Server`       | 5xx, unexpected status, malformed envelope    |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    Transport,
    Validation,
    Unauthorized,
    Forbidden,
    NotFound,
    Server,
}

impl StatusClass {
    /// Classify an HTTP status. Returns `None` for 2xx.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            401 => Some(StatusClass::Unauthorized),
            403 => Some(StatusClass::Forbidden),
            404 => Some(StatusClass::NotFound),
            400..=499 => Some(StatusClass::Validation),
            _ => Some(StatusClass::Server),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusClass::Transport => "transport",
            StatusClass::Validation => "validation",
            StatusClass::Unauthorized => "unauthorized",
            StatusClass::Forbidden => "forbidden",
            StatusClass::NotFound => "not_found",
            StatusClass::Server => "server",
        }
    }
}

// ============================================================================
// API FAILURE
// ============================================================================

/// Normalized failure of a single API operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} ({})", self.message(), self.status_class.as_str())]
pub struct ApiFailure {
    pub status_class: StatusClass,
    /// HTTP status when a response was received.
    pub status: Option<u16>,
    /// `message` field of an error envelope.
    pub server_message: Option<String>,
    /// `error` field of an error envelope (usually a code or short reason).
    pub server_code: Option<String>,
    /// Description produced by the client side of the exchange.
    pub transport_message: Option<String>,
}

impl ApiFailure {
    /// No response reached the client.
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status_class: StatusClass::Transport,
            status: None,
            server_message: None,
            server_code: None,
            transport_message: Some(message.into()),
        }
    }

    /// A non-2xx response, optionally with a decoded error envelope.
    pub fn from_response(status: u16, envelope: Option<&Envelope>) -> Self {
        let status_class = StatusClass::from_status(status).unwrap_or(StatusClass::Server);
        Self {
            status_class,
            status: Some(status),
            server_message: envelope
                .and_then(|e| e.server_message())
                .map(str::to_string),
            server_code: envelope.and_then(|e| e.server_error()).map(str::to_string),
            transport_message: Some(format!("Request failed with status code {status}")),
        }
    }

    /// A 2xx response whose envelope reported `success: false`.
    pub fn rejected_envelope(status: u16, envelope: &Envelope) -> Self {
        Self {
            status_class: StatusClass::Validation,
            status: Some(status),
            server_message: envelope.server_message().map(str::to_string),
            server_code: envelope.server_error().map(str::to_string),
            transport_message: None,
        }
    }

    /// A response body that could not be read as an envelope, or whose `data`
    /// did not have the expected shape.
    pub fn malformed(status: Option<u16>, detail: impl Into<String>) -> Self {
        Self {
            status_class: StatusClass::Server,
            status,
            server_message: None,
            server_code: None,
            transport_message: Some(format!("Malformed response envelope: {}", detail.into())),
        }
    }

    /// A request refused before dispatch (unknown operation, bad arguments).
    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self {
            status_class: StatusClass::Validation,
            status: None,
            server_message: None,
            server_code: None,
            transport_message: Some(detail.into()),
        }
    }

    pub fn with_server_message(mut self, message: impl Into<String>) -> Self {
        self.server_message = Some(message.into());
        self
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status_class == StatusClass::Unauthorized
    }

    /// Message with the fixed precedence: server message, server error code,
    /// transport message, then [`FALLBACK_ERROR_MESSAGE`].
    pub fn message(&self) -> String {
        [
            self.server_message.as_deref(),
            self.server_code.as_deref(),
            self.transport_message.as_deref(),
        ]
        .into_iter()
        .find_map(non_empty)
        .unwrap_or(FALLBACK_ERROR_MESSAGE)
        .to_string()
    }

    /// Text shown to the user for this failure.
    ///
    /// Permission and not-found failures fall back to their own wording,
    /// server errors always read as a generic server error, everything else
    /// passes [`message`](Self::message) through verbatim.
    pub fn user_message(&self) -> String {
        let server = non_empty(self.server_message.as_deref());
        match self.status_class {
            StatusClass::Forbidden => server.unwrap_or(PERMISSION_DENIED_MESSAGE).to_string(),
            StatusClass::NotFound => server.unwrap_or(NOT_FOUND_MESSAGE).to_string(),
            StatusClass::Server if self.status.is_some_and(|s| s >= 500) => {
                SERVER_ERROR_MESSAGE.to_string()
            }
            _ => self.message(),
        }
    }
}

/// Result alias for API operations.
pub type ApiResult<T> = Result<T, ApiFailure>;


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// The first non-blank candidate always wins.
        #[test]
        fn prop_message_takes_first_present_candidate(
            server in proptest::option::of("[a-z ]{0,12}"),
            code in proptest::option::of("[A-Z_]{0,8}"),
            transport in proptest::option::of("[a-z ]{0,12}"),
        ) {
            let failure = ApiFailure {
                status_class: StatusClass::Validation,
                status: Some(400),
                server_message: server.clone(),
                server_code: code.clone(),
                transport_message: transport.clone(),
            };
            let expected = [server, code, transport]
                .into_iter()
                .flatten()
                .map(|s| s.trim().to_string())
                .find(|s| !s.is_empty())
                .unwrap_or_else(|| FALLBACK_ERROR_MESSAGE.to_string());
            prop_assert_eq!(failure.message(), expected);
        }

        #[test]
        fn prop_every_non_success_status_is_classified(status in 300u16..600) {
            prop_assert!(StatusClass::from_status(status).is_some());
        }
    }
}
