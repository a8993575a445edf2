//! The bus transport a connection is built on.
//!
//! A [`Connector`] opens a [`Transport`] to a given [`Bus`]. The transport
//! performs the actual I/O, while the connection only drives it.

#[cfg(test)]
pub(crate) mod mock;

pub use self::address::Address;
mod address;

pub use self::unix::{AuthKind, UnixConnector, UnixTransport, UnixWaker};
mod unix;

use std::fmt;

use crate::error::Result;
use crate::org_freedesktop_dbus::{NameFlag, NameReply, ReleaseNameReply};
use crate::OwnedMessage;

/// The bus to connect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bus {
    /// The per-login-session bus.
    Session,
    /// The system-wide bus.
    System,
}

impl fmt::Display for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bus::Session => write!(f, "session"),
            Bus::System => write!(f, "system"),
        }
    }
}

/// The outcome of waiting on a [`Transport`].
#[derive(Debug)]
pub enum Recv {
    /// A message was received.
    Message(OwnedMessage),
    /// The wait was interrupted through a [`Wake`] handle without a message
    /// being received.
    Wakeup,
}

/// A handle which interrupts a blocking [`Transport::recv`] from any thread.
///
/// This is how a stop request reaches a processing loop.
pub trait Wake: Send + Sync + 'static {
    /// Wake up the transport.
    ///
    /// Waking a transport which is not currently waiting makes its next
    /// [`Transport::recv`] return [`Recv::Wakeup`].
    ///
    /// # Errors
    ///
    /// Errors if the wakeup can't be delivered, such as if the transport has
    /// been closed.
    fn wake(&self) -> Result<()>;
}

/// A connection to a message bus.
///
/// A transport is exclusively owned by one connection, but it's moved to the
/// processing loop thread while a background loop runs, so it has to be
/// [`Send`].
pub trait Transport: Send + 'static {
    /// The wakeup handle of this transport.
    type Waker: Wake;

    /// Construct a new handle which interrupts [`Transport::recv`].
    fn waker(&self) -> Result<Self::Waker>;

    /// The unique name assigned to this connection by the bus, if any.
    fn unique_name(&self) -> Option<&str>;

    /// Perform a `RequestName` round-trip.
    fn request_name(&mut self, name: &str, flags: NameFlag) -> Result<NameReply>;

    /// Perform a `ReleaseName` round-trip.
    fn release_name(&mut self, name: &str) -> Result<ReleaseNameReply>;

    /// Block until the next message is received or the transport is woken
    /// up.
    ///
    /// Messages must be returned in the order they were delivered by the bus.
    fn recv(&mut self) -> Result<Recv>;

    /// Close the transport.
    ///
    /// Any subsequent operation on the transport fails.
    fn close(&mut self) -> Result<()>;
}

/// Opens transports to a message bus.
pub trait Connector {
    /// The transport being opened.
    type Transport: Transport;

    /// Open a new transport to the given bus.
    fn connect(&self, bus: Bus) -> Result<Self::Transport>;
}
