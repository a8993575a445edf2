pub use self::owned_message::OwnedMessage;
mod owned_message;

pub use self::owned_message_kind::OwnedMessageKind;
mod owned_message_kind;
