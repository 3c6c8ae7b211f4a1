//! Error types for the HMC client core.
//!
//! # Design
//! Every abnormal outcome of a request maps to exactly one `Error` variant.
//! `HttpError` is its own type because two different sources produce it: a
//! non-success HTTP response, and a completed job whose embedded status code
//! reports a failure. Callers can match on its fields without re-parsing the
//! message.

use thiserror::Error;

use crate::http::HttpMethod;

/// Reason code used when the error did not come from the structured API
/// layer (HTML error pages, unparseable bodies).
pub const REASON_UNAVAILABLE: u32 = 999;

/// HTTP status and reason code the appliance returns for a stale session.
pub const SESSION_EXPIRED_STATUS: u16 = 403;
pub const SESSION_EXPIRED_REASON: u32 = 5;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by `Session` and `Job` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A response body declared as JSON could not be parsed.
    #[error("Parse error in returned JSON: {message}{}", position_suffix(.line, .column))]
    Parse {
        message: String,
        line: Option<usize>,
        column: Option<usize>,
    },

    /// The appliance (or a job it ran) reported a failure.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// `Job::wait_for_completion` ran past its deadline.
    #[error("{message}")]
    Timeout { message: String },

    /// Logon could not establish a usable session.
    #[error("authentication failed: {message}")]
    Auth { message: String },

    /// The request never produced an HTTP response.
    #[error("connection to {url} failed: {message}")]
    Connection { url: String, message: String },

    /// A request body could not be encoded as JSON.
    #[error("failed to encode request body: {0}")]
    Serialization(String),
}

impl Error {
    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Error::Parse {
            message: message.into(),
            line: None,
            column: None,
        }
    }

    /// The `HttpError` carried by this error, if any.
    pub fn as_http(&self) -> Option<&HttpError> {
        match self {
            Error::Http(err) => Some(err),
            _ => None,
        }
    }
}

fn position_suffix(line: &Option<usize>, column: &Option<usize>) -> String {
    match (line, column) {
        (Some(line), Some(column)) => format!(": line {line} column {column}"),
        _ => String::new(),
    }
}

/// A failed HTTP request or a failed job, with the appliance's status and
/// reason code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{http_status},{reason}: {message} [{request_method} {request_uri}]")]
pub struct HttpError {
    pub http_status: u16,
    pub reason: u32,
    pub message: String,
    pub request_uri: String,
    pub request_method: HttpMethod,
}

impl HttpError {
    /// Whether this is the appliance's signal that the session token is stale.
    pub fn is_session_expired(&self) -> bool {
        self.http_status == SESSION_EXPIRED_STATUS && self.reason == SESSION_EXPIRED_REASON
    }
}
