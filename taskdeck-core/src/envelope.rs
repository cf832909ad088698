//! Response envelope wrapping every Taskdeck API response.
//!
//! ```text
//! { "success": true, "message": "...", "data": ..., "error": "...",
//!   "total": 42, "limit": 20, "offset": 0 }
//! ```
//!
//! The pagination fields only appear on list endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw envelope as sent by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T = Value> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

impl<T> Envelope<T> {
    /// Pagination metadata, present only when the backend reported a total.
    pub fn page(&self) -> Option<PageInfo> {
        self.total.map(|total| PageInfo {
            total,
            limit: self.limit,
            offset: self.offset.unwrap_or(0),
        })
    }

    /// Server message with empty strings treated as absent.
    pub fn server_message(&self) -> Option<&str> {
        non_empty(self.message.as_deref())
    }

    /// Server error code with empty strings treated as absent.
    pub fn server_error(&self) -> Option<&str> {
        non_empty(self.error.as_deref())
    }
}

/// Pagination metadata returned by list endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub total: u64,
    pub limit: Option<u64>,
    pub offset: u64,
}

/// Successful, unwrapped response: the `data` value plus the envelope metadata
/// callers and the notification layer care about.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub data: Value,
    pub message: Option<String>,
    pub page: Option<PageInfo>,
}

impl Payload {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            message: None,
            page: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_page(mut self, page: PageInfo) -> Self {
        self.page = Some(page);
        self
    }

    /// Server message with empty strings treated as absent.
    pub fn server_message(&self) -> Option<&str> {
        non_empty(self.message.as_deref())
    }
}

impl From<Envelope<Value>> for Payload {
    fn from(envelope: Envelope<Value>) -> Self {
        let page = envelope.page();
        let message = envelope.server_message().map(str::to_string);
        Self {
            data: envelope.data.unwrap_or(Value::Null),
            message,
            page,
        }
    }
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}
