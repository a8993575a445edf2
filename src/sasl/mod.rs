//! Types related to SASL authentication which D-Bus performs.


use std::fmt;

use crate::error::{Error, ErrorKind, Result};

/// A GUID sent over SASL.
#[repr(transparent)]
pub struct Guid([u8]);

impl Guid {
    #[inline]
    pub(crate) fn new(guid: &[u8]) -> &Guid {
        unsafe {
            // SAFETY: The byte slice is repr transparent over this type.
            &*(guid as *const _ as *const Guid)
        }
    }

    /// Get the raw bytes of the GUID.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Guid {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Guid")
            .field(&String::from_utf8_lossy(&self.0))
            .finish()
    }
}

/// A SASL message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaslRequest<'a> {
    /// The AUTH message.
    Auth(Auth<'a>),
    /// The BEGIN message, after which the binary protocol is used.
    Begin,
}

impl SaslRequest<'_> {
    /// Encode the request as a single line into `buf`.
    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            SaslRequest::Auth(Auth::External(external)) => {
                buf.extend_from_slice(b"AUTH EXTERNAL ");
                buf.extend_from_slice(external);
            }
            SaslRequest::Begin => {
                buf.extend_from_slice(b"BEGIN");
            }
        }

        buf.extend_from_slice(b"\r\n");
    }
}

/// A SASL message.
#[derive(Debug)]
pub enum SaslResponse<'a> {
    /// The OK message.
    Ok(&'a Guid),
}

/// The SASL authentication method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Auth<'a> {
    /// EXTERNAL authentication with literal payload.
    External(&'a [u8]),
}

impl<'a> Auth<'a> {
    /// Construct external authentication from the uid of the current process.
    #[cfg(unix)]
    pub fn external_from_uid(buf: &'a mut [u8; 32]) -> Auth<'a> {
        let id = unsafe { libc::getuid() };
        Self::external_from_u32_ascii_hex(buf, id)
    }

    /// Construct an external authentication from a u32.
    ///
    /// The decimal representation of `id` is hex encoded, which is what the
    /// `EXTERNAL` mechanism expects.
    pub fn external_from_u32_ascii_hex(buf: &'a mut [u8; 32], mut id: u32) -> Auth<'a> {
        const HEX: [u8; 16] = *b"0123456789abcdef";

        let mut n = 0;

        if id == 0 {
            buf[0] = b'3';
            buf[1] = b'0';
            n = 2;
        } else {
            while id > 0 {
                let byte = (id % 10) as u8 + b'0';
                buf[n] = HEX[(byte & 0xf) as usize];
                n += 1;
                buf[n] = HEX[(byte >> 4) as usize];
                n += 1;
                id /= 10;
            }

            buf[..n].reverse();
        }

        Auth::External(&buf[..n])
    }
}

/// Parse a single SASL response line received from the server.
pub(crate) fn parse_response(bytes: &[u8]) -> Result<SaslResponse<'_>> {
    let line = crate::utils::trim_end(bytes);

    let (command, rest) = match crate::utils::split_once(line, b' ') {
        Some((command, rest)) => (command, rest),
        None => (line, &[][..]),
    };

    match command {
        b"OK" if !rest.is_empty() => Ok(SaslResponse::Ok(Guid::new(rest))),
        b"OK" => Err(Error::new(ErrorKind::InvalidSasl)),
        b"REJECTED" | b"ERROR" => Err(Error::new(ErrorKind::SaslRejected)),
        _ => Err(Error::new(ErrorKind::InvalidSaslResponse)),
    }
}
