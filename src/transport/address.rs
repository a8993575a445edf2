use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use crate::error::{Error, ErrorKind, Result};
use crate::utils::split_once;

/// A D-Bus server address.
///
/// Addresses are lists of `transport:key=value,...` entries separated by
/// `;`. The first entry this crate can connect to is used, which is a `unix`
/// entry with either a `path` or (on Linux) an `abstract` key.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
///
/// use busline::transport::Address;
///
/// let address = Address::parse(b"tcp:host=localhost;unix:path=/run/user/1000/bus,guid=1234")?;
/// assert_eq!(address, Address::Unix(PathBuf::from("/run/user/1000/bus")));
/// # Ok::<_, busline::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Address {
    /// A unix socket at the given path.
    Unix(PathBuf),
    /// A unix socket in the abstract namespace.
    Abstract(Vec<u8>),
}

impl Address {
    /// Parse an address.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        for entry in bytes.split(|&b| b == b';') {
            if entry.is_empty() {
                continue;
            }

            let Some((transport, params)) = split_once(entry, b':') else {
                return Err(Error::new(ErrorKind::InvalidAddress));
            };

            if transport != b"unix" {
                continue;
            }

            for param in params.split(|&b| b == b',') {
                let Some((key, value)) = split_once(param, b'=') else {
                    return Err(Error::new(ErrorKind::InvalidAddress));
                };

                match key {
                    b"path" => {
                        let path = OsString::from_vec(unescape(value)?);
                        return Ok(Address::Unix(PathBuf::from(path)));
                    }
                    b"abstract" => {
                        return Ok(Address::Abstract(unescape(value)?));
                    }
                    _ => {}
                }
            }
        }

        Err(Error::new(ErrorKind::InvalidAddress))
    }

    /// Connect a blocking stream to the address.
    pub(crate) fn connect(&self) -> Result<UnixStream> {
        match self {
            Address::Unix(path) => Ok(UnixStream::connect(path)?),
            #[cfg(any(target_os = "linux", target_os = "android"))]
            Address::Abstract(name) => {
                #[cfg(target_os = "android")]
                use std::os::android::net::SocketAddrExt;
                #[cfg(target_os = "linux")]
                use std::os::linux::net::SocketAddrExt;
                use std::os::unix::net::SocketAddr;

                let address = SocketAddr::from_abstract_name(name)?;
                Ok(UnixStream::connect_addr(&address)?)
            }
            #[cfg(not(any(target_os = "linux", target_os = "android")))]
            Address::Abstract(..) => Err(Error::new(ErrorKind::InvalidAddress)),
        }
    }
}

/// Decode `%XX` escapes in an address value.
fn unescape(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut it = bytes.iter().copied();

    while let Some(b) = it.next() {
        if b != b'%' {
            out.push(b);
            continue;
        }

        let (Some(hi), Some(lo)) = (it.next(), it.next()) else {
            return Err(Error::new(ErrorKind::InvalidAddress));
        };

        let (Some(hi), Some(lo)) = (hex(hi), hex(lo)) else {
            return Err(Error::new(ErrorKind::InvalidAddress));
        };

        out.push(hi << 4 | lo);
    }

    Ok(out)
}

fn hex(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::Address;

    #[test]
    fn parse_addresses() {
        assert_eq!(
            Address::parse(b"unix:path=/var/run/dbus/system_bus_socket").unwrap(),
            Address::Unix(PathBuf::from("/var/run/dbus/system_bus_socket"))
        );

        assert_eq!(
            Address::parse(b"unix:guid=abcd,path=/tmp/dbus%2dtest").unwrap(),
            Address::Unix(PathBuf::from("/tmp/dbus-test"))
        );

        assert_eq!(
            Address::parse(b"unix:abstract=/tmp/dbus-XXXX,guid=abcd").unwrap(),
            Address::Abstract(b"/tmp/dbus-XXXX".to_vec())
        );

        assert_eq!(
            Address::parse(b"tcp:host=localhost,port=1234;unix:path=/tmp/bus").unwrap(),
            Address::Unix(PathBuf::from("/tmp/bus"))
        );
    }

    #[test]
    fn invalid_addresses() {
        assert!(Address::parse(b"").is_err());
        assert!(Address::parse(b"/tmp/bus").is_err());
        assert!(Address::parse(b"tcp:host=localhost,port=1234").is_err());
        assert!(Address::parse(b"unix:path").is_err());
        assert!(Address::parse(b"unix:path=/tmp/%zz").is_err());
        assert!(Address::parse(b"unix:path=/tmp/%2").is_err());
        assert!(Address::parse(b"unix:tmpdir=/tmp").is_err());
    }
}
