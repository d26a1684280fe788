//! Unified error handling for EdgeLink.
//!
//! Every error carries an [`ErrorKind`] tag, a human readable message and an
//! optional cause. The kind decides the status code surfaced to HTTP and
//! message-bus callers; the message chain is what ends up in the logs.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The request or entity violates the data contract.
    ContractInvalid,
    /// A named entity could not be found.
    EntityDoesNotExist,
    /// An entity with the same name already exists.
    DuplicateName,
    /// The operation is not allowed on the target (e.g. reading a write-only resource).
    NotAllowed,
    /// The service or device is locked, or the device is down.
    ServiceLocked,
    /// A dependency is not reachable.
    ServiceUnavailable,
    /// Generic internal failure, including driver failures.
    ServerError,
    /// The driver does not implement an optional capability.
    NotImplemented,
    /// The request conflicts with an operation already in flight.
    StatusConflict,
    /// No kind was assigned. Wrapping errors inherit the kind of their cause.
    Unknown,
}

impl ErrorKind {
    /// HTTP status code used when surfacing this kind.
    pub const fn http_status(self) -> u16 {
        match self {
            Self::ContractInvalid => 400,
            Self::EntityDoesNotExist => 404,
            Self::NotAllowed => 405,
            Self::DuplicateName | Self::StatusConflict => 409,
            Self::ServiceLocked => 423,
            Self::NotImplemented => 501,
            Self::ServiceUnavailable => 503,
            Self::ServerError | Self::Unknown => 500,
        }
    }

    const fn description(self) -> &'static str {
        match self {
            Self::ContractInvalid => "ContractInvalid",
            Self::EntityDoesNotExist => "EntityDoesNotExist",
            Self::DuplicateName => "DuplicateName",
            Self::NotAllowed => "NotAllowed",
            Self::ServiceLocked => "ServiceLocked",
            Self::ServiceUnavailable => "ServiceUnavailable",
            Self::ServerError => "ServerError",
            Self::NotImplemented => "NotImplemented",
            Self::StatusConflict => "StatusConflict",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

fn render_cause(cause: &Option<Arc<Error>>) -> String {
    match cause {
        Some(cause) => format!(" -> {cause}"),
        None => String::new(),
    }
}

/// Unified error type for EdgeLink.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}{}", render_cause(.cause))]
pub struct Error {
    kind: ErrorKind,
    message: String,
    #[source]
    cause: Option<Arc<Error>>,
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// Creates an error of the given kind wrapping a cause.
    pub fn with_cause(kind: ErrorKind, message: impl Into<String>, cause: impl Into<Error>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: Some(Arc::new(cause.into())),
        }
    }

    /// Wraps `self` with an additional message, keeping its kind.
    pub fn context(self, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Unknown,
            message: message.into(),
            cause: Some(Arc::new(self)),
        }
    }

    /// Resolved kind: the first non-`Unknown` kind along the cause chain.
    pub fn kind(&self) -> ErrorKind {
        let mut current = self;
        loop {
            if current.kind != ErrorKind::Unknown {
                return current.kind;
            }
            match &current.cause {
                Some(cause) => current = cause,
                None => return ErrorKind::Unknown,
            }
        }
    }

    /// Message of this error only, without the cause chain.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// HTTP status code of the resolved kind.
    pub fn http_status(&self) -> u16 {
        self.kind().http_status()
    }

    pub fn contract_invalid(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ContractInvalid, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::EntityDoesNotExist, msg)
    }

    pub fn duplicate(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::DuplicateName, msg)
    }

    pub fn not_allowed(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotAllowed, msg)
    }

    pub fn locked(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServiceLocked, msg)
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServiceUnavailable, msg)
    }

    pub fn server(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServerError, msg)
    }

    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotImplemented, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::StatusConflict, msg)
    }
}

/// Creates an [`Error`] of the given kind with a formatted message.
#[macro_export]
macro_rules! edge_err {
    ($kind:ident, $msg:expr) => {
        $crate::error::Error::new($crate::error::ErrorKind::$kind, $msg)
    };
    ($kind:ident, $fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::new($crate::error::ErrorKind::$kind, format!($fmt, $($arg)*))
    };
}

// Error conversion helpers
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::server(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::contract_invalid(format!("json: {e}"))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::contract_invalid(format!("yaml: {e}"))
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::contract_invalid(format!("toml: {e}"))
    }
}

impl From<regex::Error> for Error {
    fn from(e: regex::Error) -> Self {
        Error::contract_invalid(format!("invalid regular expression: {e}"))
    }
}

impl From<humantime::DurationError> for Error {
    fn from(e: humantime::DurationError) -> Self {
        Error::contract_invalid(format!("invalid duration: {e}"))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::server(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_status() && e.status().map(|s| s.as_u16()) == Some(404) {
            return Error::not_found(e.to_string());
        }
        Error::unavailable(e.to_string())
    }
}
