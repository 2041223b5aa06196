//! Remediation lookups for published alerts.
//!
//! Every actionable alert is turned into a free-text query and handed to a
//! small worker pool that calls the external lookup service. Results, good or
//! bad, are published on their own output keyed by service. The streaming path
//! only ever waits for the enqueue.

pub mod client;
pub mod dispatcher;
pub mod query;
pub mod result;

use std::time::Duration;

pub use self::client::{LookupAnswer, LookupClient, LookupStats, RemediationLookup};
pub use self::dispatcher::{DispatchAck, Dispatcher, DispatcherConfig, OverflowPolicy};
pub use self::query::RemediationQuery;
pub use self::result::{RemediationBody, RemediationResult, ResultStatus};

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("lookup timed out after {0:?}")]
    Timeout(Duration),

    #[error("cannot reach lookup service: {0}")]
    Connect(String),

    #[error("lookup service answered HTTP {0}")]
    Status(u16),

    #[error("malformed lookup response: {0}")]
    Malformed(String),

    #[error("invalid lookup service url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("remediation queue full")]
    QueueFull,

    #[error("lookup abandoned at shutdown after {0:?} grace")]
    ShutdownTimeout(Duration),
}

impl LookupError {
    /// Short classifier published as `error_type` on failure records.
    pub fn error_type(&self) -> &'static str {
        match self {
            LookupError::Timeout(_) => "Timeout",
            LookupError::Connect(_) => "ConnectError",
            LookupError::Status(_) => "HTTPStatusError",
            LookupError::Malformed(_) => "MalformedResponse",
            LookupError::InvalidUrl { .. } => "InvalidUrl",
            LookupError::QueueFull => "QueueFull",
            LookupError::ShutdownTimeout(_) => "ShutdownTimeout",
        }
    }
}
