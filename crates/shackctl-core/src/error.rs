//! Error types for shackctl.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Every variant classifies into one of a
//! small closed set of [`ErrorKind`]s so that callers can branch on the kind
//! while still displaying the backend-specific message.

use std::fmt;

/// The closed set of failure classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The profile or request is invalid before any device is touched.
    Configuration,
    /// A backend failed to start against a valid profile.
    Initialization,
    /// The link to the device is missing, refused, or broken.
    Connection,
    /// The link is alive but the device replied with something unexpected.
    Protocol,
    /// A deadline expired.
    Timeout,
    /// The active backend cannot perform the operation.
    Unsupported,
    /// The device was closed while the command was pending.
    Cancelled,
    /// An invariant inside shackctl itself was violated.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Configuration => "configuration error",
            ErrorKind::Initialization => "initialization error",
            ErrorKind::Connection => "connection error",
            ErrorKind::Protocol => "protocol error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unsupported => "unsupported operation",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal error",
        };
        write!(f, "{s}")
    }
}

/// The error type for all shackctl operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The profile or an argument is invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A CW or device request was made while no profile is configured.
    #[error("no profile selected")]
    NoProfileSelected,

    /// A serial port name does not look like a port on this platform.
    #[error("invalid port name: {0}")]
    InvalidPort(String),

    /// The profile (or the physical resource behind it) is already open.
    #[error("device already open: {0}")]
    AlreadyOpen(String),

    /// A backend could not start against a valid profile.
    #[error("initialization error: {0}")]
    Initialization(String),

    /// The configured local interface has no IPv4 address to bind.
    #[error("no usable IPv4 address on {0}")]
    NoIpv4Address(String),

    /// The local port to bind is already taken.
    #[error("address already in use: {0}")]
    AddressInUse(String),

    /// The peer actively refused the connection.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// The host name could not be resolved.
    #[error("host not found: {0}")]
    HostNotFound(String),

    /// The remote host closed an established connection.
    #[error("host closed the connection")]
    HostClosed,

    /// No connection to the device has been established.
    #[error("not connected")]
    NotConnected,

    /// The connection to the device was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// A keyer command was issued before the keyer finished initializing.
    #[error("keyer is not connected")]
    KeyerNotConnected,

    /// The keyer did not accept text for sending.
    #[error("cannot send text: {0}")]
    CannotSendText(String),

    /// The keyer did not accept the stop request.
    #[error("cannot stop sending: {0}")]
    CannotStopSending(String),

    /// One named remote procedure call failed.
    #[error("cannot send the {call} command: {reason}")]
    RpcCallFailed {
        /// Human-readable name of the failed call, e.g. `"Clear"`.
        call: &'static str,
        /// Why it failed.
        reason: String,
    },

    /// A bridge-hosted rig has been offline longer than the grace period.
    #[error("rig is not connected: {0}")]
    RigOffline(String),

    /// A malformed or unexpected reply from a live device.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for the device.
    #[error("timeout waiting for response")]
    Timeout,

    /// The operation is not in the active backend's capability set.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// The device was closed while the command was queued or in flight.
    #[error("command cancelled")]
    Cancelled,

    /// An invariant inside shackctl was violated.
    #[error("internal error: {0}")]
    Internal(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify this error into its [`ErrorKind`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_)
            | Error::NoProfileSelected
            | Error::InvalidPort(_)
            | Error::AlreadyOpen(_) => ErrorKind::Configuration,
            Error::Initialization(_) | Error::NoIpv4Address(_) | Error::AddressInUse(_) => {
                ErrorKind::Initialization
            }
            Error::ConnectionRefused(_)
            | Error::HostNotFound(_)
            | Error::HostClosed
            | Error::NotConnected
            | Error::ConnectionLost
            | Error::KeyerNotConnected
            | Error::CannotSendText(_)
            | Error::CannotStopSending(_)
            | Error::RpcCallFailed { .. }
            | Error::RigOffline(_)
            | Error::Io(_) => ErrorKind::Connection,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::Timeout => ErrorKind::Timeout,
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand for an [`Error::Unsupported`] naming the operation.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Error::Unsupported(operation.into())
    }

    /// Whether this error means the link itself is gone, as opposed to a
    /// single command failing.
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            Error::HostClosed | Error::NotConnected | Error::ConnectionLost | Error::Io(_)
        )
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
