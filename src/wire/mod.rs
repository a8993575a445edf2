//! The subset of the D-Bus marshalling format the transport needs to talk to
//! the bus daemon and to frame incoming messages.


use std::num::NonZeroU32;
use std::str;

use crate::error::{Error, ErrorKind, Result};
use crate::protocol::{self, Endianness, Flags, HeaderField, MessageType};
use crate::utils::padding_to;
use crate::{OwnedMessage, OwnedMessageKind};

/// Size of the fixed header together with the length of the header field
/// array which follows it.
pub(crate) const PREFIX_LENGTH: usize = 16;

/// Encode a complete message.
///
/// The header is written in native endianness, which is what the body of a
/// message constructed in this crate is marshalled in. A message with a body
/// in any other endianness is re-encoded with the wrong byte order.
pub(crate) fn encode(message: &OwnedMessage) -> Vec<u8> {
    let message_type = match &message.kind {
        OwnedMessageKind::MethodCall { .. } => MessageType::METHOD_CALL,
        OwnedMessageKind::MethodReturn { .. } => MessageType::METHOD_RETURN,
        OwnedMessageKind::Error { .. } => MessageType::ERROR,
        OwnedMessageKind::Signal { .. } => MessageType::SIGNAL,
    };

    let mut w = Writer::new();

    w.store_u8(Endianness::NATIVE.0);
    w.store_u8(message_type.0);
    w.store_u8(message.flags.0);
    w.store_u8(protocol::VERSION);
    w.store_u32(message.body.len() as u32);
    w.store_u32(message.serial.get());

    let fields_at = w.len();
    w.store_u32(0);

    match &message.kind {
        OwnedMessageKind::MethodCall { path, member }
        | OwnedMessageKind::Signal { path, member } => {
            w.field_str(HeaderField::PATH, "o", path);
            w.field_str(HeaderField::MEMBER, "s", member);
        }
        OwnedMessageKind::MethodReturn { reply_serial } => {
            w.field_u32(HeaderField::REPLY_SERIAL, reply_serial.get());
        }
        OwnedMessageKind::Error {
            error_name,
            reply_serial,
        } => {
            w.field_str(HeaderField::ERROR_NAME, "s", error_name);
            w.field_u32(HeaderField::REPLY_SERIAL, reply_serial.get());
        }
    }

    if let Some(interface) = &message.interface {
        w.field_str(HeaderField::INTERFACE, "s", interface);
    }

    if let Some(destination) = &message.destination {
        w.field_str(HeaderField::DESTINATION, "s", destination);
    }

    if let Some(sender) = &message.sender {
        w.field_str(HeaderField::SENDER, "s", sender);
    }

    if !message.signature.is_empty() {
        w.align(8);
        w.store_u8(HeaderField::SIGNATURE.0);
        w.write_signature("g");
        w.write_signature(&message.signature);
    }

    let fields_length = w.len() - PREFIX_LENGTH;
    w.patch_u32(fields_at, fields_length as u32);
    w.align(8);
    w.extend_from_slice(&message.body);
    w.into_inner()
}

/// Calculate how many bytes follow the given prefix in a complete message.
pub(crate) fn frame_length(prefix: &[u8; PREFIX_LENGTH]) -> Result<usize> {
    let mut r = Reader::new(prefix, endianness(prefix[0])?);
    r.skip(4)?;
    let body_length = r.load_u32()?;
    r.skip(4)?;
    let fields_length = r.load_u32()?;

    if body_length > protocol::MAX_BODY_LENGTH {
        return Err(Error::new(ErrorKind::BodyTooLong(body_length)));
    }

    if fields_length > protocol::MAX_ARRAY_LENGTH {
        return Err(Error::new(ErrorKind::ArrayTooLong(fields_length)));
    }

    let fields_length = fields_length as usize;
    Ok(fields_length + padding_to(fields_length, 8) + body_length as usize)
}

/// Decode a complete message.
///
/// Returns `None` for message types this crate doesn't know about, which the
/// protocol requires to be ignored.
pub(crate) fn decode(bytes: &[u8]) -> Result<Option<OwnedMessage>> {
    let &[endian, message_type, flags, version, ..] = bytes else {
        return Err(Error::new(ErrorKind::BufferUnderflow));
    };

    let endianness = endianness(endian)?;

    if version != protocol::VERSION {
        return Err(Error::new(ErrorKind::InvalidProtocol));
    }

    let mut r = Reader::new(bytes, endianness);
    r.skip(4)?;
    let body_length = r.load_u32()? as usize;

    let Some(serial) = NonZeroU32::new(r.load_u32()?) else {
        return Err(Error::new(ErrorKind::ZeroSerial));
    };

    let fields_end = r.load_u32()? as usize + PREFIX_LENGTH;

    let mut path = None;
    let mut interface = None;
    let mut member = None;
    let mut error_name = None;
    let mut reply_serial = None;
    let mut destination = None;
    let mut sender = None;
    let mut signature = "";

    while r.position() < fields_end {
        r.align(8)?;
        let code = HeaderField(r.load_u8()?);
        let ty = r.read_signature()?;

        match (code, ty) {
            (HeaderField::PATH, "o") => path = Some(r.read_str()?),
            (HeaderField::INTERFACE, "s") => interface = Some(r.read_str()?),
            (HeaderField::MEMBER, "s") => member = Some(r.read_str()?),
            (HeaderField::ERROR_NAME, "s") => error_name = Some(r.read_str()?),
            (HeaderField::REPLY_SERIAL, "u") => reply_serial = NonZeroU32::new(r.load_u32()?),
            (HeaderField::DESTINATION, "s") => destination = Some(r.read_str()?),
            (HeaderField::SENDER, "s") => sender = Some(r.read_str()?),
            (HeaderField::SIGNATURE, "g") => signature = r.read_signature()?,
            (
                HeaderField::PATH
                | HeaderField::INTERFACE
                | HeaderField::MEMBER
                | HeaderField::ERROR_NAME
                | HeaderField::REPLY_SERIAL
                | HeaderField::DESTINATION
                | HeaderField::SENDER
                | HeaderField::SIGNATURE,
                _,
            ) => return Err(Error::new(ErrorKind::InvalidHeaderField(code.0))),
            // Unknown fields are ignored, whatever their type.
            (_, ty) => r.skip_single(ty.as_bytes(), 0)?,
        }
    }

    if r.position() != fields_end {
        return Err(Error::new(ErrorKind::InvalidProtocol));
    }

    r.align(8)?;
    let body = r.take(body_length)?;

    if !r.is_empty() {
        return Err(Error::new(ErrorKind::InvalidProtocol));
    }

    let kind = match MessageType(message_type) {
        MessageType::METHOD_CALL => OwnedMessageKind::MethodCall {
            path: path.ok_or(ErrorKind::MissingPath)?.into(),
            member: member.ok_or(ErrorKind::MissingMember)?.into(),
        },
        MessageType::METHOD_RETURN => OwnedMessageKind::MethodReturn {
            reply_serial: reply_serial.ok_or(ErrorKind::MissingReplySerial)?,
        },
        MessageType::ERROR => OwnedMessageKind::Error {
            error_name: error_name.ok_or(ErrorKind::MissingErrorName)?.into(),
            reply_serial: reply_serial.ok_or(ErrorKind::MissingReplySerial)?,
        },
        MessageType::SIGNAL => OwnedMessageKind::Signal {
            path: path.ok_or(ErrorKind::MissingPath)?.into(),
            member: member.ok_or(ErrorKind::MissingMember)?.into(),
        },
        _ => return Ok(None),
    };

    Ok(Some(OwnedMessage {
        kind,
        serial,
        flags: Flags(flags),
        interface: interface.map(Box::from),
        destination: destination.map(Box::from),
        sender: sender.map(Box::from),
        signature: signature.into(),
        body: body.into(),
        endianness,
    }))
}

/// Maximum nesting of containers in a single value, counting arrays,
/// structs and variants together.
const MAX_DEPTH: usize = 64;

/// The length of the single complete type at the start of a signature.
fn type_length(signature: &[u8], depth: usize) -> Result<usize> {
    if depth > MAX_DEPTH {
        return Err(Error::new(ErrorKind::InvalidSignature));
    }

    let close = match signature.first() {
        Some(
            b'y' | b'b' | b'n' | b'q' | b'i' | b'u' | b'x' | b't' | b'd' | b'h' | b's' | b'o'
            | b'g' | b'v',
        ) => return Ok(1),
        Some(b'a') => return Ok(1 + type_length(&signature[1..], depth + 1)?),
        Some(b'(') => b')',
        Some(b'{') => b'}',
        _ => return Err(Error::new(ErrorKind::InvalidSignature)),
    };

    let mut n = 1;

    loop {
        match signature.get(n) {
            Some(&b) if b == close && n > 1 => return Ok(n + 1),
            Some(_) => n += type_length(&signature[n..], depth + 1)?,
            None => return Err(Error::new(ErrorKind::InvalidSignature)),
        }
    }
}

/// The alignment of values with a type starting with the given code.
fn alignment(code: u8) -> usize {
    match code {
        b'n' | b'q' => 2,
        b'b' | b'i' | b'u' | b'h' | b's' | b'o' | b'a' => 4,
        b'x' | b't' | b'd' | b'(' | b'{' => 8,
        _ => 1,
    }
}

fn endianness(byte: u8) -> Result<Endianness> {
    match Endianness(byte) {
        Endianness::LITTLE => Ok(Endianness::LITTLE),
        Endianness::BIG => Ok(Endianness::BIG),
        _ => Err(Error::new(ErrorKind::InvalidProtocol)),
    }
}

/// A growable buffer which marshals values in native endianness.
///
/// Alignment is relative to the start of the buffer.
pub(crate) struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub(crate) fn new() -> Self {
        Self { buf: Vec::new() }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn align(&mut self, align: usize) {
        let n = padding_to(self.buf.len(), align);
        self.buf.resize(self.buf.len() + n, 0);
    }

    pub(crate) fn store_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub(crate) fn store_u32(&mut self, value: u32) {
        self.align(4);
        self.buf.extend_from_slice(&value.to_ne_bytes());
    }

    /// Write a string or object path.
    pub(crate) fn write_str(&mut self, value: &str) {
        self.store_u32(value.len() as u32);
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.push(0);
    }

    pub(crate) fn write_signature(&mut self, value: &str) {
        self.buf.push(value.len() as u8);
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.push(0);
    }

    fn field_str(&mut self, code: HeaderField, ty: &str, value: &str) {
        self.align(8);
        self.store_u8(code.0);
        self.write_signature(ty);
        self.write_str(value);
    }

    fn field_u32(&mut self, code: HeaderField, value: u32) {
        self.align(8);
        self.store_u8(code.0);
        self.write_signature("u");
        self.store_u32(value);
    }

    fn patch_u32(&mut self, at: usize, value: u32) {
        self.buf[at..at + 4].copy_from_slice(&value.to_ne_bytes());
    }

    fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub(crate) fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// A cursor which unmarshals values in the given endianness.
///
/// Alignment is relative to the start of the slice.
pub(crate) struct Reader<'de> {
    bytes: &'de [u8],
    pos: usize,
    endianness: Endianness,
}

impl<'de> Reader<'de> {
    pub(crate) fn new(bytes: &'de [u8], endianness: Endianness) -> Self {
        Self {
            bytes,
            pos: 0,
            endianness,
        }
    }

    #[inline]
    fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.pos == self.bytes.len()
    }

    fn take(&mut self, n: usize) -> Result<&'de [u8]> {
        let Some(bytes) = self.bytes.get(self.pos..self.pos.saturating_add(n)) else {
            return Err(Error::new(ErrorKind::BufferUnderflow));
        };

        self.pos += n;
        Ok(bytes)
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n)?;
        Ok(())
    }

    fn align(&mut self, align: usize) -> Result<()> {
        self.skip(padding_to(self.pos, align))
    }

    pub(crate) fn load_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn load_u32(&mut self) -> Result<u32> {
        self.align(4)?;
        let mut bytes = [0; 4];
        bytes.copy_from_slice(self.take(4)?);

        Ok(match self.endianness {
            Endianness::BIG => u32::from_be_bytes(bytes),
            _ => u32::from_le_bytes(bytes),
        })
    }

    /// Read a string or an object path.
    pub(crate) fn read_str(&mut self) -> Result<&'de str> {
        let len = self.load_u32()? as usize;
        let bytes = self.take(len)?;
        self.nul()?;
        Ok(str::from_utf8(bytes)?)
    }

    pub(crate) fn read_signature(&mut self) -> Result<&'de str> {
        let len = self.load_u8()? as usize;
        let bytes = self.take(len)?;
        self.nul()?;
        Ok(str::from_utf8(bytes)?)
    }

    /// Skip over a value of the given signature, which must hold exactly
    /// one complete type.
    fn skip_single(&mut self, signature: &[u8], depth: usize) -> Result<()> {
        if type_length(signature, depth)? != signature.len() {
            return Err(Error::new(ErrorKind::InvalidSignature));
        }

        self.skip_value(signature, depth)
    }

    /// Skip over a value of a type already checked by [`type_length`].
    fn skip_value(&mut self, ty: &[u8], depth: usize) -> Result<()> {
        match ty {
            [b'y'] => self.skip(1),
            [b'n' | b'q'] => {
                self.align(2)?;
                self.skip(2)
            }
            [b'b' | b'i' | b'u' | b'h'] => {
                self.load_u32()?;
                Ok(())
            }
            [b'x' | b't' | b'd'] => {
                self.align(8)?;
                self.skip(8)
            }
            [b's' | b'o'] => {
                self.read_str()?;
                Ok(())
            }
            [b'g'] => {
                self.read_signature()?;
                Ok(())
            }
            [b'v'] => {
                let inner = self.read_signature()?;
                self.skip_single(inner.as_bytes(), depth + 1)
            }
            [b'a', element @ ..] => {
                let length = self.load_u32()?;

                if length > protocol::MAX_ARRAY_LENGTH {
                    return Err(Error::new(ErrorKind::ArrayTooLong(length)));
                }

                // Padding up to the first element is there even when empty.
                self.align(alignment(element[0]))?;
                self.skip(length as usize)
            }
            [b'(' | b'{', fields @ .., _] => {
                self.align(8)?;
                let mut fields = fields;

                while !fields.is_empty() {
                    let (field, rest) = fields.split_at(type_length(fields, depth + 1)?);
                    self.skip_value(field, depth + 1)?;
                    fields = rest;
                }

                Ok(())
            }
            _ => Err(Error::new(ErrorKind::InvalidSignature)),
        }
    }

    fn nul(&mut self) -> Result<()> {
        if self.load_u8()? != 0 {
            return Err(Error::new(ErrorKind::NotNullTerminated));
        }

        Ok(())
    }
}
