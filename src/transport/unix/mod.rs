#[cfg(test)]
mod tests;

use std::collections::VecDeque;
use std::env;
use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::num::NonZeroU32;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::UnixStream;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::org_freedesktop_dbus::{self, NameFlag, NameReply, ReleaseNameReply};
use crate::sasl::{self, Auth, SaslRequest, SaslResponse};
use crate::wire::{self, Reader, Writer, PREFIX_LENGTH};
use crate::{OwnedMessage, OwnedMessageKind};

use super::{Address, Bus, Connector, Recv, Transport, Wake};

const ENV_SESSION_BUS: &str = "DBUS_SESSION_BUS_ADDRESS";
const ENV_SYSTEM_BUS: &str = "DBUS_SYSTEM_BUS_ADDRESS";
const DEFAULT_SYSTEM_BUS: &str = "unix:path=/var/run/dbus/system_bus_socket";

/// Longest SASL line the server may send.
const MAX_SASL_LINE: usize = 4096;

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

/// How a [`UnixConnector`] authenticates with the bus.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthKind {
    /// Don't send an `AUTH` command, only `BEGIN`.
    None,
    /// `EXTERNAL` authentication using the uid of the current process.
    #[default]
    Uid,
}

/// Connects to a bus over a unix domain socket.
///
/// The address of the session bus is taken from `DBUS_SESSION_BUS_ADDRESS`.
/// The address of the system bus is taken from `DBUS_SYSTEM_BUS_ADDRESS`,
/// falling back to `unix:path=/var/run/dbus/system_bus_socket`. An address
/// set through [`UnixConnector::address`] takes precedence over both.
#[derive(Debug, Default, Clone)]
pub struct UnixConnector {
    address: Option<Box<str>>,
    auth: AuthKind,
}

impl UnixConnector {
    /// Construct a new connector with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to an explicit address instead of the one in the environment.
    pub fn address(&mut self, address: &str) -> &mut Self {
        self.address = Some(address.into());
        self
    }

    /// Set how to authenticate with the bus.
    pub fn auth(&mut self, auth: AuthKind) -> &mut Self {
        self.auth = auth;
        self
    }

    fn resolve(&self, bus: Bus) -> Result<Address> {
        if let Some(address) = &self.address {
            return Address::parse(address.as_bytes());
        }

        let (env, default) = match bus {
            Bus::Session => (ENV_SESSION_BUS, None),
            Bus::System => (ENV_SYSTEM_BUS, Some(DEFAULT_SYSTEM_BUS)),
        };

        match env::var_os(env) {
            Some(address) => Address::parse(address.as_bytes()),
            None => match default {
                Some(default) => Address::parse(default.as_bytes()),
                None => Err(Error::new(ErrorKind::MissingBus)),
            },
        }
    }
}

impl Connector for UnixConnector {
    type Transport = UnixTransport;

    fn connect(&self, bus: Bus) -> Result<UnixTransport> {
        let address = self.resolve(bus)?;
        debug!(%bus, ?address, "connecting");

        let mut transport = UnixTransport::from_std(address.connect()?)?;
        transport.authenticate(self.auth)?;
        transport.hello()?;

        debug!(%bus, unique_name = ?transport.unique_name, "connected");
        Ok(transport)
    }
}

/// A wakeup handle for a [`UnixTransport`].
#[derive(Debug, Clone)]
pub struct UnixWaker {
    stream: Arc<UnixStream>,
}

impl Wake for UnixWaker {
    fn wake(&self) -> Result<()> {
        let byte = 1u8;

        loop {
            // SAFETY: The buffer is a single valid byte and the descriptor is
            // kept alive by the stream we hold.
            let n = unsafe {
                libc::send(
                    self.stream.as_raw_fd(),
                    (&byte as *const u8).cast(),
                    1,
                    SEND_FLAGS,
                )
            };

            if n >= 0 {
                return Ok(());
            }

            let error = io::Error::last_os_error();

            match error.kind() {
                // A wakeup is already pending.
                io::ErrorKind::WouldBlock => return Ok(()),
                io::ErrorKind::Interrupted => continue,
                _ => return Err(error.into()),
            }
        }
    }
}

/// A connection to a bus over a unix domain socket.
///
/// Blocking receives wait on both the bus socket and an internal socket pair,
/// the latter being written to by [`UnixWaker`].
pub struct UnixTransport {
    /// Stream of the connection.
    stream: UnixStream,
    /// Receiving end of wakeups.
    wakeup: UnixStream,
    /// Sending end of wakeups, shared with wakers.
    waker: Arc<UnixStream>,
    /// Serial of the last message sent.
    serial: u32,
    /// Messages received while waiting for a reply.
    backlog: VecDeque<OwnedMessage>,
    /// The unique name assigned in response to `Hello`.
    unique_name: Option<Box<str>>,
    closed: bool,
}

impl UnixTransport {
    /// Construct a transport directly from a connected unix stream.
    ///
    /// The transport still needs to be authenticated.
    pub(crate) fn from_std(stream: UnixStream) -> Result<Self> {
        let (wakeup, waker) = UnixStream::pair()?;
        wakeup.set_nonblocking(true)?;
        waker.set_nonblocking(true)?;

        Ok(Self {
            stream,
            wakeup,
            waker: Arc::new(waker),
            serial: 0,
            backlog: VecDeque::new(),
            unique_name: None,
            closed: false,
        })
    }

    /// Perform the SASL exchange and transition to the binary protocol.
    fn authenticate(&mut self, auth: AuthKind) -> Result<()> {
        let mut buf = vec![0];

        match auth {
            AuthKind::None => {}
            AuthKind::Uid => {
                let mut auth_buf = [0; 32];
                SaslRequest::Auth(Auth::external_from_uid(&mut auth_buf)).encode(&mut buf);
                self.stream.write_all(&buf)?;
                buf.clear();

                let line = self.recv_line()?;

                match sasl::parse_response(&line)? {
                    SaslResponse::Ok(guid) => {
                        trace!(?guid, "authenticated");
                    }
                }
            }
        }

        SaslRequest::Begin.encode(&mut buf);
        self.stream.write_all(&buf)?;
        Ok(())
    }

    /// Send the `Hello` message and store the unique name it returns.
    fn hello(&mut self) -> Result<()> {
        let reply = self.call("Hello", "", &[])?;

        if !reply.signature().starts_with('s') {
            return Err(Error::new(ErrorKind::InvalidProtocol));
        }

        let name = Reader::new(reply.body(), reply.endianness()).read_str()?;
        self.unique_name = Some(name.into());
        Ok(())
    }

    /// Call a method on the bus and wait for its reply.
    ///
    /// Other messages received in the meantime are queued up for
    /// [`Transport::recv`].
    fn call(&mut self, member: &str, signature: &str, body: &[u8]) -> Result<OwnedMessage> {
        self.ensure_open()?;

        let serial = self.next_serial();

        let message =
            OwnedMessage::method_call(org_freedesktop_dbus::PATH.into(), member.into(), serial)
                .with_interface(org_freedesktop_dbus::INTERFACE.into())
                .with_destination(org_freedesktop_dbus::DESTINATION.into())
                .with_body(signature.into(), body.into());

        let bytes = wire::encode(&message);

        trace!(member, serial = serial.get(), "calling");
        self.stream.write_all(&bytes)?;

        loop {
            let Some(message) = self.recv_message()? else {
                continue;
            };

            if message.kind.reply_serial() != Some(serial) {
                self.backlog.push_back(message);
                continue;
            }

            if let OwnedMessageKind::Error { error_name, .. } = &message.kind {
                let text = if message.signature().starts_with('s') {
                    Reader::new(message.body(), message.endianness())
                        .read_str()
                        .unwrap_or_default()
                } else {
                    ""
                };

                return Err(Error::new(ErrorKind::ResponseError(
                    error_name.clone(),
                    text.into(),
                )));
            }

            return Ok(message);
        }
    }

    fn next_serial(&mut self) -> NonZeroU32 {
        loop {
            self.serial = self.serial.wrapping_add(1);

            if let Some(serial) = NonZeroU32::new(self.serial) {
                return serial;
            }
        }
    }

    /// Receive a single message from the bus.
    ///
    /// Returns `None` for messages which are skipped. Once a complete frame
    /// has been read the stream stays in sync, so a message which fails to
    /// decode is discarded instead of failing the transport.
    fn recv_message(&mut self) -> Result<Option<OwnedMessage>> {
        let mut prefix = [0; PREFIX_LENGTH];
        self.stream.read_exact(&mut prefix)?;

        let rest = wire::frame_length(&prefix)?;

        let mut buf = Vec::with_capacity(PREFIX_LENGTH + rest);
        buf.extend_from_slice(&prefix);
        buf.resize(PREFIX_LENGTH + rest, 0);
        self.stream.read_exact(&mut buf[PREFIX_LENGTH..])?;

        match wire::decode(&buf) {
            Ok(message) => Ok(message),
            Err(error) => {
                warn!(%error, length = buf.len(), "discarding malformed message");
                Ok(None)
            }
        }
    }

    /// Receive a single SASL line.
    ///
    /// This reads one byte at a time so that nothing past the line is
    /// consumed from the stream.
    fn recv_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();
        let mut byte = [0];

        loop {
            if self.stream.read(&mut byte)? == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }

            line.push(byte[0]);

            if byte[0] == b'\n' {
                return Ok(line);
            }

            if line.len() > MAX_SASL_LINE {
                return Err(Error::new(ErrorKind::InvalidSasl));
            }
        }
    }

    /// Consume all pending wakeups.
    fn drain_wakeups(&mut self) -> Result<()> {
        let mut buf = [0; 64];

        loop {
            match self.wakeup.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::new(ErrorKind::Closed));
        }

        Ok(())
    }
}

impl Transport for UnixTransport {
    type Waker = UnixWaker;

    fn waker(&self) -> Result<UnixWaker> {
        self.ensure_open()?;

        Ok(UnixWaker {
            stream: self.waker.clone(),
        })
    }

    fn unique_name(&self) -> Option<&str> {
        self.unique_name.as_deref()
    }

    fn request_name(&mut self, name: &str, flags: NameFlag) -> Result<NameReply> {
        let mut body = Writer::new();
        body.write_str(name);
        body.store_u32(flags.0);

        let reply = self.call("RequestName", "su", &body.into_inner())?;
        Ok(NameReply(load_u32_reply(&reply)?))
    }

    fn release_name(&mut self, name: &str) -> Result<ReleaseNameReply> {
        let mut body = Writer::new();
        body.write_str(name);

        let reply = self.call("ReleaseName", "s", &body.into_inner())?;
        Ok(ReleaseNameReply(load_u32_reply(&reply)?))
    }

    fn recv(&mut self) -> Result<Recv> {
        self.ensure_open()?;

        if let Some(message) = self.backlog.pop_front() {
            return Ok(Recv::Message(message));
        }

        loop {
            let mut fds = [
                libc::pollfd {
                    fd: self.stream.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    fd: self.wakeup.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
            ];

            // SAFETY: The pointer and length describe the initialized array
            // above, which outlives the call.
            let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };

            if n < 0 {
                return Err(io::Error::last_os_error().into());
            }

            // Hangups and errors are reported when reading.
            if fds[0].revents != 0 {
                match self.recv_message()? {
                    Some(message) => return Ok(Recv::Message(message)),
                    None => continue,
                }
            }

            if fds[1].revents != 0 {
                self.drain_wakeups()?;
                return Ok(Recv::Wakeup);
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        self.closed = true;
        self.backlog.clear();

        // Wakers observe a broken pipe from now on.
        shutdown(&self.wakeup)?;
        shutdown(&self.stream)?;
        Ok(())
    }
}

impl AsRawFd for UnixTransport {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

fn shutdown(stream: &UnixStream) -> Result<()> {
    match stream.shutdown(Shutdown::Both) {
        Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e.into()),
        _ => Ok(()),
    }
}

fn load_u32_reply(reply: &OwnedMessage) -> Result<u32> {
    if !reply.signature().starts_with('u') {
        return Err(Error::new(ErrorKind::InvalidProtocol));
    }

    Reader::new(reply.body(), reply.endianness()).load_u32()
}
