use tracing::{debug, warn};

use crate::error::Result;
use crate::names;
use crate::org_freedesktop_dbus::NameFlag;
use crate::transport::{AuthKind, Bus, Connector, UnixConnector};

use super::{BusConnection, Connection, Dispatch};

const DEFAULT_THREAD_NAME: &str = "busline-loop";

/// Builder of a [`Connection`].
///
/// # Examples
///
/// ```no_run
/// use busline::{ConnectionBuilder, OwnedMessage};
///
/// # fn main() -> busline::Result<()> {
/// let c = ConnectionBuilder::new()
///     .system_bus()
///     .name("se.tedro.DBusExample")
///     .thread_name("example-loop")
///     .connect(|message: OwnedMessage| println!("{message:?}"))?;
/// # Ok(()) }
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionBuilder {
    bus: Bus,
    connector: UnixConnector,
    name: Option<Box<str>>,
    flags: NameFlag,
    thread_name: Box<str>,
}

impl ConnectionBuilder {
    /// Construct a new connection builder.
    ///
    /// # Examples
    ///
    /// ```
    /// use busline::ConnectionBuilder;
    ///
    /// let c = ConnectionBuilder::new();
    /// ```
    pub fn new() -> Self {
        Self {
            bus: Bus::Session,
            connector: UnixConnector::new(),
            name: None,
            flags: NameFlag::default(),
            thread_name: DEFAULT_THREAD_NAME.into(),
        }
    }

    /// Connect to the session bus (default).
    pub fn session_bus(&mut self) -> &mut Self {
        self.bus = Bus::Session;
        self
    }

    /// Connect to the system bus.
    pub fn system_bus(&mut self) -> &mut Self {
        self.bus = Bus::System;
        self
    }

    /// Connect to the given bus.
    pub fn bus(&mut self, bus: Bus) -> &mut Self {
        self.bus = bus;
        self
    }

    /// Connect to an explicit address, such as `unix:path=/run/my-bus`,
    /// instead of the address of the bus in the environment.
    pub fn address(&mut self, address: &str) -> &mut Self {
        self.connector.address(address);
        self
    }

    /// Set how to authenticate with the bus.
    pub fn auth(&mut self, auth: AuthKind) -> &mut Self {
        self.connector.auth(auth);
        self
    }

    /// Request the given well-known name as part of connecting.
    ///
    /// Connecting fails if the name can't be acquired.
    pub fn name(&mut self, name: &str) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    /// Flags added to every name request made by the connection.
    ///
    /// [`NameFlag::DO_NOT_QUEUE`] is always added.
    pub fn name_flags(&mut self, flags: NameFlag) -> &mut Self {
        self.flags = flags;
        self
    }

    /// Set the name of the thread running the background processing loop.
    pub fn thread_name(&mut self, name: &str) -> &mut Self {
        self.thread_name = name.into();
        self
    }

    /// Construct and connect a [`Connection`] with the current configuration
    /// which dispatches incoming messages to `dispatch`.
    pub fn connect<D>(&self, dispatch: D) -> Result<Box<dyn Connection>>
    where
        D: Dispatch,
    {
        self.connect_with(&self.connector, dispatch)
    }

    /// Construct and connect a [`Connection`] over transports opened by the
    /// given connector.
    ///
    /// The address and authentication configured on this builder are not
    /// used.
    pub fn connect_with<C, D>(&self, connector: &C, dispatch: D) -> Result<Box<dyn Connection>>
    where
        C: Connector,
        D: Dispatch,
    {
        if let Some(name) = &self.name {
            names::check(name)?;
        }

        let transport = connector.connect(self.bus)?;
        let mut c = BusConnection::new(transport, dispatch, self.flags, self.thread_name.clone())?;

        if let Some(name) = &self.name {
            if let Err(error) = c.request_name(name) {
                if let Err(error) = c.shutdown() {
                    warn!(%error, "failed to close connection");
                }

                return Err(error);
            }
        }

        debug!(bus = %self.bus, unique_name = ?c.unique_name(), "connection established");
        Ok(Box::new(c))
    }
}

impl Default for ConnectionBuilder {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
