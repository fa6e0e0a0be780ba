//! Error types for ESL connections

use thiserror::Error;

/// Result alias used throughout the crate.
pub type EslResult<T> = Result<T, EslError>;

/// Broad classification of an [`EslError`].
///
/// Every blocking operation returns one of these kinds, so callers can decide
/// between retrying, reconnecting and giving up without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A command field could not be put on the wire.
    Encoding,
    /// The switch sent something that is not valid ESL framing.
    Protocol,
    /// The switch answered `-ERR` (or something other than `+OK`).
    Rejected,
    /// The caller's token fired or the command timeout elapsed.
    Cancelled,
    /// The connection is closed or not ready yet.
    Closed,
    /// The auth handshake was refused.
    Auth,
    /// Socket error outside of a pending command.
    Io,
}

/// Errors produced by the ESL connection and codec.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EslError {
    /// A command field contains characters that would break framing.
    #[error("encoding error: {message}")]
    Encoding { message: String },

    /// Malformed inbound frame; the connection cannot recover from this.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// A header line without a `name: value` shape.
    #[error("invalid header: {header}")]
    InvalidHeader { header: String },

    /// The switch replied `-ERR`; `reply_text` is everything after the prefix.
    #[error("command rejected: {reply_text}")]
    CommandRejected { reply_text: String },

    /// The reply was neither `+OK` nor `-ERR`.
    #[error("unexpected reply: {reply_text}")]
    UnexpectedReply { reply_text: String },

    /// An event lacked a header the caller needed.
    #[error("event missing header: {header}")]
    MissingHeader { header: &'static str },

    /// The caller's cancellation token fired before the operation finished.
    #[error("operation cancelled")]
    Cancelled,

    /// The configured timeout elapsed before the operation finished.
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The connection closed while the command was pending or being sent.
    #[error("connection closed")]
    ConnectionClosed,

    /// The connection has not finished its handshake yet.
    #[error("connection not ready")]
    NotReady,

    /// The switch refused the password.
    #[error("authentication failed: {reason}")]
    AuthFailed { reason: String },

    /// Socket I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A `text/event-json` body could not be parsed.
    #[error("JSON event error: {0}")]
    Json(#[from] serde_json::Error),

    /// A `text/event-xml` body could not be parsed.
    #[error("XML event error: {0}")]
    Xml(#[from] quick_xml::Error),
}

impl EslError {
    pub(crate) fn protocol_error(message: impl Into<String>) -> Self {
        EslError::Protocol {
            message: message.into(),
        }
    }

    pub(crate) fn encoding_error(message: impl Into<String>) -> Self {
        EslError::Encoding {
            message: message.into(),
        }
    }

    pub(crate) fn auth_failed(reason: impl Into<String>) -> Self {
        EslError::AuthFailed {
            reason: reason.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EslError::Encoding { .. } => ErrorKind::Encoding,
            EslError::Protocol { .. }
            | EslError::InvalidHeader { .. }
            | EslError::MissingHeader { .. }
            | EslError::Json(_)
            | EslError::Xml(_) => ErrorKind::Protocol,
            EslError::CommandRejected { .. } | EslError::UnexpectedReply { .. } => {
                ErrorKind::Rejected
            }
            EslError::Cancelled | EslError::Timeout { .. } => ErrorKind::Cancelled,
            EslError::ConnectionClosed | EslError::NotReady => ErrorKind::Closed,
            EslError::AuthFailed { .. } => ErrorKind::Auth,
            EslError::Io(_) => ErrorKind::Io,
        }
    }

    /// `true` when the connection is unusable after this error.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Closed | ErrorKind::Io | ErrorKind::Protocol
        ) && !matches!(self, EslError::MissingHeader { .. })
    }
}
