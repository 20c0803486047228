//! Error handling for spotnet.
//!
//! Every fallible operation returns one [`struct@Error`], which pairs a
//! categorized [`ErrorKind`] with the underlying cause.
//!
//! # Error Categories
//!
//! Kinds group into the classes the engine treats differently:
//! * Transport: a send was attempted on a channel that is not open
//! * Protocol: an inbound message was malformed, untrusted or of unknown kind
//! * Reference: an event or command names a node the registry does not know
//! * Validation: caller-supplied command data fails a local precondition
//!
//! Transport and protocol errors are logged and the message is dropped;
//! validation and reference errors on commands are returned to the caller.
//!
//! # Example
//!
//! ```rust
//! use spotnet::error::{Error, ErrorCategory, Result};
//!
//! fn check(name: &str) -> Result<()> {
//!     if name.is_empty() {
//!         return Err(Error::missing_field("name"));
//!     }
//!     Ok(())
//! }
//!
//! let err = check("").unwrap_err();
//! assert_eq!(err.kind.category(), ErrorCategory::Validation);
//! ```

#![allow(clippy::enum_glob_use)]

use std::fmt;
use thiserror::Error;

/// Main error type combining error kind and details.
#[derive(Debug)]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Details of the underlying error
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

impl Error {
    /// Attempts to downcast the underlying error to a concrete type.
    #[must_use]
    pub fn downcast<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.error.downcast_ref::<E>()
    }

    /// Returns the error class this error belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }
}

/// Standard result type for spotnet operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds.
///
/// The first six variants are the engine's own failure modes; the remaining
/// ones cover ambient failures such as configuration and I/O.
#[expect(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
pub enum ErrorKind {
    /// Send attempted on a channel that is not open.
    #[error("transport error")]
    Transport,

    /// Inbound bytes are not a structurally valid envelope.
    #[error("malformed envelope")]
    MalformedEnvelope,

    /// Inbound envelope does not come from the expected peer.
    #[error("untrusted sender")]
    UntrustedSender,

    /// Inbound envelope carries an event kind this client does not know.
    #[error("unknown event kind")]
    UnknownEventKind,

    /// An event or command refers to a node that is not in the registry.
    #[error("unknown node")]
    UnknownNode,

    /// A required command field is empty.
    #[error("missing field")]
    MissingField,

    /// The command is not allowed in the current cluster state.
    #[error("invalid state")]
    FailedPrecondition,

    /// Configuration or argument value is invalid.
    #[error("invalid argument specified")]
    InvalidArgument,

    /// Unexpected internal failure.
    #[error("internal error")]
    Internal,

    /// Anything that does not fit another kind.
    #[error("unknown error")]
    Unknown,
}

/// Error classes, as handled by the synchronization engine.
#[expect(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorCategory {
    /// Fatal to one send, not to the session.
    Transport,
    /// The offending message is dropped; the session continues.
    Protocol,
    /// The registry stays in its last good state.
    Reference,
    /// Rejected before any send and reported to the caller.
    Validation,
    /// Configuration, I/O and other ambient failures.
    Other,
}

impl ErrorKind {
    /// Maps this kind onto its [`ErrorCategory`].
    #[must_use]
    pub fn category(self) -> ErrorCategory {
        use ErrorKind::*;
        match self {
            Transport => ErrorCategory::Transport,
            MalformedEnvelope | UntrustedSender | UnknownEventKind => ErrorCategory::Protocol,
            UnknownNode => ErrorCategory::Reference,
            MissingField | FailedPrecondition => ErrorCategory::Validation,
            InvalidArgument | Internal | Unknown => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Creates a new error with specified kind and details.
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            error: error.into(),
        }
    }

    /// Creates an error for a send on a channel that is not open.
    pub fn transport<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Transport, error)
    }

    /// Creates an error for inbound bytes that do not form an envelope.
    pub fn malformed_envelope<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::MalformedEnvelope, error)
    }

    /// Creates an error for an envelope whose `sender` is not the master.
    pub fn untrusted_sender<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::UntrustedSender, error)
    }

    /// Creates an error for an envelope with an unrecognized `status`.
    pub fn unknown_event_kind<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::UnknownEventKind, error)
    }

    /// Creates an error for a reference to a node the registry does not know.
    pub fn unknown_node<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::UnknownNode, error)
    }

    /// Creates an error for an empty required field.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::missing_field("password");
    /// assert_eq!(err.to_string(), "missing field: password");
    /// ```
    pub fn missing_field<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::MissingField, error)
    }

    /// Creates an error for a command the current cluster state forbids.
    pub fn failed_precondition<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::FailedPrecondition, error)
    }

    /// Creates an error for invalid arguments or configuration.
    pub fn invalid_argument<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::InvalidArgument, error)
    }

    /// Creates an error for internal errors.
    pub fn internal<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Internal, error)
    }

    /// Creates an error for unknown errors.
    pub fn unknown<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Unknown, error)
    }
}

/// Returns the underlying error source.
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Formats the error for display as `"{kind}: {details}"`.
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: ", self.kind)?;
        self.error.fmt(fmt)
    }
}

/// Converts IO errors into appropriate error kinds.
///
/// Connection-level failures map to `Transport`; malformed input maps to
/// `InvalidArgument`.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            AddrNotAvailable | ConnectionRefused | NotConnected | BrokenPipe
            | ConnectionReset | ConnectionAborted | TimedOut => Self::transport(err),
            InvalidInput | InvalidData | NotFound | PermissionDenied => {
                Self::invalid_argument(err)
            }
            _ => Self::unknown(err),
        }
    }
}

/// Converts WebSocket errors into appropriate error kinds.
///
/// Maps WebSocket errors based on their type:
/// * `Capacity` -> `MalformedEnvelope`
/// * `Url` -> `InvalidArgument`
/// * everything else concerns the connection -> `Transport`
impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error::*;
        match err {
            Capacity(e) => Self::malformed_envelope(e),
            Url(e) => Self::invalid_argument(e),
            _ => Self::transport(err.to_string()),
        }
    }
}

/// Converts JSON errors to `MalformedEnvelope`.
///
/// JSON only ever crosses the wire in this crate, so a JSON failure means
/// the peer sent something that is not an envelope.
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed_envelope(err)
    }
}

/// Converts TOML errors to `InvalidArgument`.
impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::invalid_argument(e)
    }
}

/// Converts URL parsing errors to `InvalidArgument`.
impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::invalid_argument(e)
    }
}

/// Converts timestamp parsing errors to `InvalidArgument`.
impl From<time::error::Parse> for Error {
    fn from(e: time::error::Parse) -> Self {
        Self::invalid_argument(e)
    }
}

/// Converts timestamp formatting errors to `Internal`.
impl From<time::error::Format> for Error {
    fn from(e: time::error::Format) -> Self {
        Self::internal(e.to_string())
    }
}

/// Converts formatting errors to `Unknown`.
impl From<std::fmt::Error> for Error {
    fn from(e: std::fmt::Error) -> Self {
        Self::unknown(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_categories() {
        assert_eq!(ErrorKind::Transport.category(), ErrorCategory::Transport);
        assert_eq!(
            ErrorKind::MalformedEnvelope.category(),
            ErrorCategory::Protocol
        );
        assert_eq!(ErrorKind::UntrustedSender.category(), ErrorCategory::Protocol);
        assert_eq!(
            ErrorKind::UnknownEventKind.category(),
            ErrorCategory::Protocol
        );
        assert_eq!(ErrorKind::UnknownNode.category(), ErrorCategory::Reference);
        assert_eq!(ErrorKind::MissingField.category(), ErrorCategory::Validation);
        assert_eq!(
            ErrorKind::FailedPrecondition.category(),
            ErrorCategory::Validation
        );
        assert_eq!(ErrorKind::InvalidArgument.category(), ErrorCategory::Other);
    }

    #[test]
    fn display_shows_kind_and_details() {
        let err = Error::unknown_node("no node with id `n1`");
        assert_eq!(err.to_string(), "unknown node: no node with id `n1`");
    }

    #[test]
    fn json_errors_are_malformed_envelopes() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert_eq!(err.kind, ErrorKind::MalformedEnvelope);
        assert!(err.downcast::<serde_json::Error>().is_some());
    }
}
