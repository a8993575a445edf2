//! Shorthands for connecting with the default configuration.
//!
//! Each function returns a connection which is ready to use, or fails
//! without leaving any transport open. Use a [`ConnectionBuilder`] for
//! anything more involved.

use crate::connection::{Connection, ConnectionBuilder, Dispatch};
use crate::error::Result;

/// Connect to the default bus, which is the system bus.
///
/// This is equivalent to [`create_system_bus_connection()`].
pub fn create_connection<D>(dispatch: D) -> Result<Box<dyn Connection>>
where
    D: Dispatch,
{
    create_system_bus_connection(dispatch)
}

/// Connect to the default bus, which is the system bus, and request the
/// given well-known name.
///
/// This is equivalent to [`create_system_bus_connection_with_name()`].
pub fn create_connection_with_name<D>(name: &str, dispatch: D) -> Result<Box<dyn Connection>>
where
    D: Dispatch,
{
    create_system_bus_connection_with_name(name, dispatch)
}

/// Connect to the system bus.
pub fn create_system_bus_connection<D>(dispatch: D) -> Result<Box<dyn Connection>>
where
    D: Dispatch,
{
    ConnectionBuilder::new().system_bus().connect(dispatch)
}

/// Connect to the system bus and request the given well-known name.
///
/// # Errors
///
/// Errors with [`ErrorCategory::NameUnavailable`] if the name can't be
/// acquired, in which case the transport is closed before returning.
///
/// [`ErrorCategory::NameUnavailable`]: crate::ErrorCategory::NameUnavailable
pub fn create_system_bus_connection_with_name<D>(
    name: &str,
    dispatch: D,
) -> Result<Box<dyn Connection>>
where
    D: Dispatch,
{
    ConnectionBuilder::new()
        .system_bus()
        .name(name)
        .connect(dispatch)
}

/// Connect to the session bus.
///
/// # Examples
///
/// ```no_run
/// use busline::OwnedMessage;
///
/// # fn main() -> busline::Result<()> {
/// let c = busline::create_session_bus_connection(|_: OwnedMessage| {})?;
/// println!("{:?}", c.unique_name());
/// # Ok(()) }
/// ```
pub fn create_session_bus_connection<D>(dispatch: D) -> Result<Box<dyn Connection>>
where
    D: Dispatch,
{
    ConnectionBuilder::new().session_bus().connect(dispatch)
}

/// Connect to the session bus and request the given well-known name.
///
/// # Errors
///
/// Errors with [`ErrorCategory::NameUnavailable`] if the name can't be
/// acquired, in which case the transport is closed before returning.
///
/// [`ErrorCategory::NameUnavailable`]: crate::ErrorCategory::NameUnavailable
pub fn create_session_bus_connection_with_name<D>(
    name: &str,
    dispatch: D,
) -> Result<Box<dyn Connection>>
where
    D: Dispatch,
{
    ConnectionBuilder::new()
        .session_bus()
        .name(name)
        .connect(dispatch)
}
