use std::num::NonZeroU32;

/// The kind of a D-Bus message.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum OwnedMessageKind {
    MethodCall {
        /// The path being called.
        path: Box<str>,
        /// The member being called.
        member: Box<str>,
    },
    MethodReturn {
        /// The serial this is a reply to.
        reply_serial: NonZeroU32,
    },
    Error {
        /// The name of the error.
        error_name: Box<str>,
        /// The serial this is a reply to.
        reply_serial: NonZeroU32,
    },
    Signal {
        /// The path of the object emitting the signal.
        path: Box<str>,
        /// The member being signalled.
        member: Box<str>,
    },
}

impl OwnedMessageKind {
    /// The serial this message is a reply to, if it is a reply.
    #[inline]
    pub(crate) fn reply_serial(&self) -> Option<NonZeroU32> {
        match *self {
            OwnedMessageKind::MethodReturn { reply_serial } => Some(reply_serial),
            OwnedMessageKind::Error { reply_serial, .. } => Some(reply_serial),
            _ => None,
        }
    }
}
