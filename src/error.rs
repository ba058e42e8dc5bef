//! Error types shared by the signer, the dispatcher and the batch engine.
//!
//! Retryable conditions never leave the dispatcher: once an [`Error`] is returned
//! the outcome is terminal for that call.

use thiserror::Error;

/// Longest body or payload excerpt carried inside an error message.
const EXCERPT_LEN: usize = 512;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Network-level failure of a single attempt.
///
/// Transports produce this for connect failures, timeouts and broken bodies.
/// The dispatcher always treats it as retryable.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        Self(error.to_string())
    }
}

/// Terminal failure of a request.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid credentials or endpoint settings. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A transport failure that cannot be retried, such as an HTTP client that cannot be built.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The service answered with a non-retryable, non-success status.
    #[error("{target} failed with status {status} (request id: {request_id:?}): {body}")]
    Service {
        /// Target action of the request.
        target: String,
        /// HTTP status code returned by the service.
        status: u16,
        /// Service-assigned request id, when present.
        request_id: Option<String>,
        /// Excerpt of the response body.
        body: String,
    },

    /// Every attempt allowed by the retry policy failed with a retryable outcome.
    #[error(
        "{target} failed after {attempts} attempts (last status: {last_status:?}): {last_failure}; payload: {payload}"
    )]
    ExhaustedRetries {
        /// Target action of the request.
        target: String,
        /// Number of attempts made.
        attempts: u32,
        /// Status of the last attempt, `None` when it failed at the transport level.
        last_status: Option<u16>,
        /// Excerpt of the last response body or transport error.
        last_failure: String,
        /// Excerpt of the request payload.
        payload: String,
    },

    /// Unprocessed items kept coming back past the resubmission depth limit.
    #[error("{target} exceeded the resubmission depth limit of {limit}")]
    RecursionLimitExceeded {
        /// Target action of the request.
        target: String,
        /// The configured depth limit.
        limit: usize,
    },

    /// A batch response body could not be read back while reassembling results.
    #[error("{target} returned a malformed batch response: {message}")]
    Merge {
        /// Target action of the request.
        target: String,
        /// Why the body could not be used.
        message: String,
    },

    /// The caller cancelled the request before it completed.
    #[error("{target} was cancelled")]
    Cancelled {
        /// Target action of the request.
        target: String,
    },

    /// A request body could not be encoded, or a response body decoded.
    #[error("{target} serialization error: {source}")]
    Serialization {
        /// Target action of the request.
        target: String,
        /// The underlying encoding error.
        #[source]
        source: serde_json::Error,
    },

    /// An attempt could not be signed with the current credentials. Never retried.
    #[error("{target} could not be signed: {message}")]
    Signing {
        /// Target action of the request.
        target: String,
        /// What is missing from the credentials.
        message: String,
    },

    /// Two read settings of a typed batch get name the same table.
    #[error("table {table} is read with two different settings in one batch")]
    ConflictingReads {
        /// The table named twice.
        table: String,
    },

    /// A typed value could not be converted into an attribute value.
    #[error("conversion error: {0}")]
    Conversion(#[from] serde_dynamo::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a serialization error for a target.
    pub fn serialization(target: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            target: target.into(),
            source,
        }
    }

    /// Create a signing error for a target.
    pub fn signing(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Signing {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Create a merge error for a batch target.
    pub fn merge(target: impl Into<String>, message: impl ToString) -> Self {
        Self::Merge {
            target: target.into(),
            message: message.to_string(),
        }
    }

    /// Create a cancellation error for a target.
    pub fn cancelled(target: impl Into<String>) -> Self {
        Self::Cancelled {
            target: target.into(),
        }
    }

    /// Status code carried by the error, if the service answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Service { status, .. } => Some(*status),
            Self::ExhaustedRetries { last_status, .. } => *last_status,
            _ => None,
        }
    }
}

/// Lossy UTF-8 excerpt of `bytes`, cut to a bounded length on a character boundary.
pub(crate) fn excerpt(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= EXCERPT_LEN {
        return text.into_owned();
    }
    let mut end = EXCERPT_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
