//! Error taxonomy and the error-to-response boundary.
//!
//! Validation, handler and SQL failures travel up as [`SlimError`] values and
//! are turned into an HTTP response in exactly one place,
//! [`SlimError::into_response`]. Each kind maps to a fixed status and to a
//! JSON body of the shape `{"code": <retcode>, "msg": <text>, "data": <payload>}`.

use crate::response::Response;
use http::StatusCode;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Result type alias for framework operations.
pub type Result<T> = std::result::Result<T, SlimError>;

/// Application-level return codes carried in JSON replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetCode {
    /// Operation succeeded.
    Success,
    /// Generic failure (database errors land here).
    Failed,
    /// No matching record.
    NotFound,
    /// Query parameters rejected.
    InvalidParams,
    /// Request body rejected.
    InvalidPostData,
    /// Request headers rejected.
    InvalidHeaders,
    /// Request body over the configured limit.
    TooLarge,
}

impl RetCode {
    /// Numeric value sent to clients.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failed => -255,
            Self::NotFound => -249,
            Self::InvalidParams => -228,
            Self::InvalidPostData => -227,
            Self::InvalidHeaders => -226,
            Self::TooLarge => -225,
        }
    }
}

impl Serialize for RetCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

/// Structured per-field validation errors: `{field: [message, ...]}`.
///
/// Errors that are not tied to a single field are recorded under
/// [`FieldErrors::ROOT`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    /// Key used for errors about the payload as a whole.
    pub const ROOT: &'static str = "_schema";

    /// Create an empty error set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Create an error set holding one message.
    #[must_use]
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    /// Record a message for a field.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    /// Whether no error was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Messages recorded for a field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    /// `Ok(())` when empty, `Err(self)` otherwise.
    ///
    /// # Errors
    ///
    /// Returns the error set itself when it is not empty.
    pub fn into_result(self) -> std::result::Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{field}: {message}")?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Errors raised while handling a request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SlimError {
    /// Query parameters failed schema validation.
    #[error("invalid query parameters: {0}")]
    InvalidQuery(FieldErrors),

    /// Request body failed schema validation or could not be parsed.
    #[error("invalid post data: {0}")]
    InvalidPostData(FieldErrors),

    /// Request headers failed schema validation.
    #[error("invalid headers: {0}")]
    InvalidHeaders(FieldErrors),

    /// A query value or operator could not be applied.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// A handler expected a keyword argument the route did not provide.
    #[error("missing argument: {0}")]
    MissingArgument(String),

    /// The requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request body exceeded the configured limit.
    #[error("request body larger than {limit} bytes")]
    PayloadTooLarge {
        /// Configured limit in bytes.
        limit: usize,
    },

    /// The database rejected an operation.
    #[error("database error: {0}")]
    Database(String),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SlimError {
    /// Return code reported to the client.
    #[must_use]
    pub const fn retcode(&self) -> RetCode {
        match self {
            Self::InvalidQuery(_) | Self::InvalidParams(_) | Self::MissingArgument(_) => {
                RetCode::InvalidParams
            }
            Self::InvalidPostData(_) => RetCode::InvalidPostData,
            Self::InvalidHeaders(_) => RetCode::InvalidHeaders,
            Self::NotFound(_) => RetCode::NotFound,
            Self::PayloadTooLarge { .. } => RetCode::TooLarge,
            Self::Database(_) | Self::Internal(_) => RetCode::Failed,
        }
    }

    /// HTTP status used when the error becomes a response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidQuery(_)
            | Self::InvalidPostData(_)
            | Self::InvalidHeaders(_)
            | Self::InvalidParams(_)
            | Self::MissingArgument(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short message placed in the `msg` field.
    fn message(&self) -> String {
        match self {
            Self::InvalidQuery(_) => "invalid query parameters".to_string(),
            Self::InvalidPostData(_) => "invalid post data".to_string(),
            Self::InvalidHeaders(_) => "invalid headers".to_string(),
            // Database details stay in the logs.
            Self::Database(_) => "database error".to_string(),
            other => other.to_string(),
        }
    }

    /// Convert into the response sent to the client.
    #[must_use]
    pub fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                code = self.retcode().code(),
                error = %self,
                "Request failed"
            );
        } else {
            tracing::debug!(status = %status, error = %self, "Request rejected");
        }

        let data = match &self {
            Self::InvalidQuery(errors)
            | Self::InvalidPostData(errors)
            | Self::InvalidHeaders(errors) => serde_json::to_value(errors).unwrap_or_default(),
            _ => serde_json::Value::Null,
        };

        Response::json(serde_json::json!({
            "code": self.retcode(),
            "msg": self.message(),
            "data": data,
        }))
        .with_status(status)
    }
}

impl From<anyhow::Error> for SlimError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

/// Failures of the protocol conversation itself.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The server side of the transport went away.
    #[error("transport closed")]
    Closed,

    /// An event arrived that is not valid in the current state.
    #[error("unexpected event {got} while waiting for {expected}")]
    UnexpectedEvent {
        /// What the loop was waiting for.
        expected: &'static str,
        /// What actually arrived.
        got: &'static str,
    },

    /// A shutdown hook failed; shutdown errors are not swallowed.
    #[error("shutdown hook failed")]
    ShutdownHook(#[source] anyhow::Error),
}
