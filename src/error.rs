use std::error;
use std::fmt;
use std::io;
use std::str::Utf8Error;

use crate::connection::LoopState;
use crate::org_freedesktop_dbus::{NameReply, ReleaseNameReply};

/// Result alias using an [`Error`] as the error type by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The broad category of an [`Error`].
///
/// # Examples
///
/// ```no_run
/// use busline::{ErrorCategory, OwnedMessage};
///
/// # fn main() -> busline::Result<()> {
/// let mut c = busline::create_session_bus_connection(|_: OwnedMessage| {})?;
///
/// let error = c.release_name("se.tedro.NotHeld").unwrap_err();
/// assert_eq!(error.category(), ErrorCategory::InvalidState);
/// # Ok(()) }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// The bus transport failed, such as while connecting, sending,
    /// receiving or closing.
    Transport,
    /// The operation is not legal in the current state of the connection.
    InvalidState,
    /// The bus declined a name request.
    NameUnavailable,
}

/// An error raised by this crate.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    #[inline]
    pub(crate) fn new(kind: ErrorKind) -> Error {
        Self { kind }
    }

    /// Get the category of the error.
    pub fn category(&self) -> ErrorCategory {
        match &self.kind {
            ErrorKind::InvalidState(..)
            | ErrorKind::NameNotHeld(..)
            | ErrorKind::NameNotReleased(..) => ErrorCategory::InvalidState,
            ErrorKind::InvalidBusName(..) | ErrorKind::NameUnavailable(..) => {
                ErrorCategory::NameUnavailable
            }
            _ => ErrorCategory::Transport,
        }
    }

    /// Test if the error is transient, so that the operation which raised it
    /// may be attempted again over the same transport.
    ///
    /// All other transport errors leave the transport unusable.
    pub fn is_transient(&self) -> bool {
        match &self.kind {
            ErrorKind::Io(error) => matches!(
                error.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(error: io::Error) -> Self {
        Self::new(ErrorKind::Io(error))
    }
}

impl From<Utf8Error> for Error {
    #[inline]
    fn from(error: Utf8Error) -> Self {
        Self::new(ErrorKind::Utf8Error(error))
    }
}

impl From<ErrorKind> for Error {
    #[inline]
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for Error {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.kind {
            ErrorKind::Io(error) => error.fmt(f),
            ErrorKind::Utf8Error(error) => error.fmt(f),
            ErrorKind::BufferUnderflow => write!(f, "Buffer underflow"),
            ErrorKind::MissingBus => write!(f, "Missing session bus"),
            ErrorKind::InvalidAddress => write!(f, "Invalid d-bus address"),
            ErrorKind::InvalidSasl => write!(f, "Invalid SASL message"),
            ErrorKind::InvalidSaslResponse => write!(f, "Invalid SASL command"),
            ErrorKind::SaslRejected => write!(f, "SASL authentication rejected"),
            ErrorKind::InvalidProtocol => write!(f, "Invalid protocol"),
            ErrorKind::InvalidHeaderField(code) => {
                write!(f, "Unsupported header field with code {code}")
            }
            ErrorKind::InvalidSignature => write!(f, "Invalid signature"),
            ErrorKind::MissingPath => write!(f, "Missing required PATH header"),
            ErrorKind::MissingMember => write!(f, "Missing required MEMBER header"),
            ErrorKind::MissingReplySerial => write!(f, "Missing required REPLY_SERIAL header"),
            ErrorKind::MissingErrorName => write!(f, "Missing required ERROR_NAME header"),
            ErrorKind::ZeroSerial => write!(f, "Zero in header serial"),
            ErrorKind::NotNullTerminated => write!(f, "String is not null terminated"),
            ErrorKind::ArrayTooLong(length) => {
                write!(f, "Array of length {length} is too long (max is 67108864)")
            }
            ErrorKind::BodyTooLong(length) => {
                write!(f, "Body of length {length} is too long (max is 134217728)")
            }
            ErrorKind::ResponseError(error_name, message) => {
                write!(f, "Response error: {error_name}: {message}")
            }
            ErrorKind::Closed => write!(f, "Transport is closed"),
            ErrorKind::WorkerPanicked(message) => {
                write!(f, "Processing loop panicked: {message}")
            }
            ErrorKind::WorkerLost => write!(f, "Processing loop exited without returning"),
            ErrorKind::InvalidState(state) => {
                write!(f, "Invalid processing loop state `{state}`")
            }
            ErrorKind::NameNotHeld(name) => write!(f, "Name `{name}` is not held"),
            ErrorKind::NameNotReleased(name, reply) => {
                write!(f, "Bus refused to release name `{name}`: {reply:?}")
            }
            ErrorKind::InvalidBusName(name) => write!(f, "Invalid bus name `{name}`"),
            ErrorKind::NameUnavailable(name, reply) => {
                write!(f, "Name `{name}` is unavailable: {reply:?}")
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.kind {
            ErrorKind::Io(error) => Some(error),
            ErrorKind::Utf8Error(error) => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub(crate) enum ErrorKind {
    Io(io::Error),
    Utf8Error(Utf8Error),
    BufferUnderflow,
    MissingBus,
    InvalidAddress,
    InvalidSasl,
    InvalidSaslResponse,
    SaslRejected,
    InvalidProtocol,
    InvalidHeaderField(u8),
    InvalidSignature,
    MissingPath,
    MissingMember,
    MissingReplySerial,
    MissingErrorName,
    ZeroSerial,
    NotNullTerminated,
    BodyTooLong(u32),
    ArrayTooLong(u32),
    ResponseError(Box<str>, Box<str>),
    Closed,
    WorkerPanicked(Box<str>),
    WorkerLost,
    InvalidState(LoopState),
    NameNotHeld(Box<str>),
    NameNotReleased(Box<str>, ReleaseNameReply),
    InvalidBusName(Box<str>),
    NameUnavailable(Box<str>, NameReply),
}
