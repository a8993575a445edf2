use std::num::NonZeroU32;

use crate::message::OwnedMessageKind;
use crate::{Endianness, Flags};

/// An owned D-Bus message, as handed to a [`Dispatch`] target.
///
/// The body is kept in its marshalled form together with its signature and
/// endianness. Unmarshalling it is up to the dispatch target.
///
/// [`Dispatch`]: crate::Dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedMessage {
    /// The type of the message.
    pub(crate) kind: OwnedMessageKind,
    /// Serial of the message.
    pub(crate) serial: NonZeroU32,
    /// Flags in the message.
    pub(crate) flags: Flags,
    /// The interface of the message.
    pub(crate) interface: Option<Box<str>>,
    /// The destination of the message.
    pub(crate) destination: Option<Box<str>>,
    /// The sender of the message.
    pub(crate) sender: Option<Box<str>>,
    /// The signature of the body.
    pub(crate) signature: Box<str>,
    /// The body associated with the message.
    pub(crate) body: Box<[u8]>,
    /// The endianness of the body.
    pub(crate) endianness: Endianness,
}

impl OwnedMessage {
    /// Construct a method call.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::num::NonZeroU32;
    ///
    /// use busline::{OwnedMessage, OwnedMessageKind};
    ///
    /// let serial = NonZeroU32::new(1).unwrap();
    /// let m = OwnedMessage::method_call("/se/tedro/DBusExample".into(), "Ping".into(), serial);
    /// assert!(matches!(m.kind(), OwnedMessageKind::MethodCall { .. }));
    /// assert_eq!(m.serial(), serial);
    /// ```
    pub fn method_call(path: Box<str>, member: Box<str>, serial: NonZeroU32) -> Self {
        Self::new(OwnedMessageKind::MethodCall { path, member }, serial)
    }

    /// Construct a signal.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::num::NonZeroU32;
    ///
    /// use busline::{OwnedMessage, OwnedMessageKind};
    ///
    /// let serial = NonZeroU32::new(7).unwrap();
    /// let m = OwnedMessage::signal("/org/freedesktop/DBus".into(), "NameAcquired".into(), serial)
    ///     .with_interface("org.freedesktop.DBus".into());
    ///
    /// assert!(matches!(m.kind(), OwnedMessageKind::Signal { .. }));
    /// assert_eq!(m.interface(), Some("org.freedesktop.DBus"));
    /// ```
    pub fn signal(path: Box<str>, member: Box<str>, serial: NonZeroU32) -> Self {
        Self::new(OwnedMessageKind::Signal { path, member }, serial)
    }

    pub(crate) fn new(kind: OwnedMessageKind, serial: NonZeroU32) -> Self {
        Self {
            kind,
            serial,
            flags: Flags::EMPTY,
            interface: None,
            destination: None,
            sender: None,
            signature: Box::from(""),
            body: Box::from([]),
            endianness: Endianness::NATIVE,
        }
    }

    /// Get the kind of the message.
    pub fn kind(&self) -> &OwnedMessageKind {
        &self.kind
    }

    /// Get the serial of the message.
    pub fn serial(&self) -> NonZeroU32 {
        self.serial
    }

    /// Get the flags of the message.
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// Modify the flags of the message.
    pub fn with_flags(self, flags: Flags) -> Self {
        Self { flags, ..self }
    }

    /// Get the interface of the message.
    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    /// Modify the interface of the message.
    pub fn with_interface(self, interface: Box<str>) -> Self {
        Self {
            interface: Some(interface),
            ..self
        }
    }

    /// Get the destination of the message.
    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    /// Modify the destination of the message.
    pub fn with_destination(self, destination: Box<str>) -> Self {
        Self {
            destination: Some(destination),
            ..self
        }
    }

    /// Get the sender of the message.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::num::NonZeroU32;
    ///
    /// use busline::OwnedMessage;
    ///
    /// let m = OwnedMessage::method_call("/".into(), "Ping".into(), NonZeroU32::MIN);
    /// assert_eq!(m.sender(), None);
    ///
    /// let m2 = m.with_sender(":1.131".into());
    /// assert_eq!(m2.sender(), Some(":1.131"));
    /// ```
    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    /// Modify the sender of the message.
    pub fn with_sender(self, sender: Box<str>) -> Self {
        Self {
            sender: Some(sender),
            ..self
        }
    }

    /// Get the signature of the body.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Get the marshalled body of the message.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Get the endianness the body is marshalled in.
    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Modify the body and its signature.
    ///
    /// The body is expected to be marshalled in native endianness.
    pub fn with_body(self, signature: Box<str>, body: Box<[u8]>) -> Self {
        Self {
            signature,
            body,
            endianness: Endianness::NATIVE,
            ..self
        }
    }
}
