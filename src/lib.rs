//! A thread-aware D-Bus connection which owns its bus names and drives a
//! processing loop, either on the calling thread or on a background thread it
//! manages itself.
//!
//! Incoming messages are handed to a [`Dispatch`] target in the order the bus
//! delivers them. The connection is thread-aware but not thread-safe: every
//! operation takes `&mut self`, and the only thing which may cross threads is
//! a [`StopHandle`] used to leave a running loop.
//!
//! # Examples
//!
//! ```no_run
//! use busline::OwnedMessage;
//!
//! # fn main() -> busline::Result<()> {
//! let mut c = busline::create_session_bus_connection_with_name(
//!     "se.tedro.DBusExample",
//!     |message: OwnedMessage| println!("{message:?}"),
//! )?;
//!
//! c.enter_processing_loop_async()?;
//! // ... do other work ...
//! c.leave_processing_loop()?;
//! # Ok(()) }
//! ```

#[macro_use]
mod macros;

#[doc(inline)]
pub use self::error::{Error, ErrorCategory, Result};
mod error;

#[doc(inline)]
pub use self::protocol::{Endianness, Flags};
pub mod protocol;

pub mod org_freedesktop_dbus;

pub mod sasl;

#[doc(inline)]
pub use self::message::{OwnedMessage, OwnedMessageKind};
mod message;

#[doc(inline)]
pub use self::names::NameSet;
mod names;

#[doc(inline)]
pub use self::transport::{Bus, Connector, Recv, Transport, UnixConnector, UnixTransport, Wake};
pub mod transport;

#[doc(inline)]
pub use self::connection::{
    Connection, ConnectionBuilder, Dispatch, LoopState, StopHandle,
};
mod connection;

#[doc(inline)]
pub use self::factory::{
    create_connection, create_connection_with_name, create_session_bus_connection,
    create_session_bus_connection_with_name, create_system_bus_connection,
    create_system_bus_connection_with_name,
};
mod factory;

mod wire;

mod utils;
