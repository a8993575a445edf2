use std::io::{BufRead, BufReader, Read, Write};
use std::num::NonZeroU32;
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::Duration;

use anyhow::Result;

use super::{AuthKind, UnixTransport};
use crate::org_freedesktop_dbus::{self, NameFlag, NameReply, ReleaseNameReply};
use crate::transport::{Recv, Transport, Wake};
use crate::wire::{self, Reader, Writer, PREFIX_LENGTH};
use crate::{ErrorCategory, OwnedMessage, OwnedMessageKind};

/// The daemon end of a bus connection.
struct FakeDaemon {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
    serial: u32,
}

impl FakeDaemon {
    fn new(stream: UnixStream) -> crate::Result<Self> {
        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: stream,
            serial: 0,
        })
    }

    fn next_serial(&mut self) -> NonZeroU32 {
        self.serial += 1;
        NonZeroU32::new(self.serial).expect("serial overflowed")
    }

    fn read_line(&mut self) -> crate::Result<Vec<u8>> {
        let mut line = Vec::new();
        self.reader.read_until(b'\n', &mut line)?;
        Ok(line)
    }

    fn write_line(&mut self, line: &[u8]) -> crate::Result<()> {
        self.writer.write_all(line)?;
        Ok(())
    }

    fn read_message(&mut self) -> crate::Result<OwnedMessage> {
        let mut prefix = [0; PREFIX_LENGTH];
        self.reader.read_exact(&mut prefix)?;

        let mut buf = prefix.to_vec();
        buf.resize(PREFIX_LENGTH + wire::frame_length(&prefix)?, 0);
        self.reader.read_exact(&mut buf[PREFIX_LENGTH..])?;

        Ok(wire::decode(&buf)?.expect("client sent a known message type"))
    }

    fn send_raw(&mut self, bytes: &[u8]) -> crate::Result<()> {
        self.writer.write_all(bytes)?;
        Ok(())
    }

    fn send(&mut self, message: &OwnedMessage) -> crate::Result<()> {
        self.writer.write_all(&wire::encode(message))?;
        Ok(())
    }

    fn reply(&mut self, call: &OwnedMessage, signature: &str, body: Writer) -> crate::Result<()> {
        let serial = self.next_serial();

        let message = OwnedMessage::new(
            OwnedMessageKind::MethodReturn {
                reply_serial: call.serial(),
            },
            serial,
        )
        .with_sender(org_freedesktop_dbus::DESTINATION.into())
        .with_body(signature.into(), body.into_inner().into());

        self.send(&message)
    }

    fn reply_u32(&mut self, call: &OwnedMessage, value: u32) -> crate::Result<()> {
        let mut body = Writer::new();
        body.store_u32(value);
        self.reply(call, "u", body)
    }

    fn reply_error(&mut self, call: &OwnedMessage, error_name: &str, text: &str) -> crate::Result<()> {
        let serial = self.next_serial();

        let mut body = Writer::new();
        body.write_str(text);

        let message = OwnedMessage::new(
            OwnedMessageKind::Error {
                error_name: error_name.into(),
                reply_serial: call.serial(),
            },
            serial,
        )
        .with_body("s".into(), body.into_inner().into());

        self.send(&message)
    }

    fn signal(&mut self, member: &str) -> crate::Result<()> {
        let serial = self.next_serial();

        let message = OwnedMessage::signal(org_freedesktop_dbus::PATH.into(), member.into(), serial)
            .with_interface(org_freedesktop_dbus::INTERFACE.into());

        self.send(&message)
    }
}

/// Encode a signal with an extra `ay` header field of a code no version of
/// the protocol defines.
fn signal_with_unknown_field(member: &str, serial: u32) -> Vec<u8> {
    let message = OwnedMessage::signal(
        "/se/tedro/Test".into(),
        member.into(),
        NonZeroU32::new(serial).expect("serial must be non-zero"),
    );

    let bytes = wire::encode(&message);
    let fields_length = u32::from_ne_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);

    let mut w = Writer::new();

    for &b in &bytes[..PREFIX_LENGTH + fields_length as usize] {
        w.store_u8(b);
    }

    w.align(8);
    w.store_u8(200);
    w.write_signature("ay");
    w.store_u32(3);

    for b in [1, 2, 3] {
        w.store_u8(b);
    }

    let fields_length = (w.len() - PREFIX_LENGTH) as u32;
    w.align(8);

    let mut bytes = w.into_inner();
    bytes[12..16].copy_from_slice(&fields_length.to_ne_bytes());
    bytes
}

fn member(message: &OwnedMessage) -> &str {
    match message.kind() {
        OwnedMessageKind::MethodCall { member, .. } | OwnedMessageKind::Signal { member, .. } => {
            &**member
        }
        kind => panic!("expected a call or a signal, got {kind:?}"),
    }
}

/// Spawn a daemon on the other end of a fresh transport.
fn spawn<F>(daemon: F) -> Result<(UnixTransport, thread::JoinHandle<crate::Result<()>>)>
where
    F: FnOnce(FakeDaemon) -> crate::Result<()> + Send + 'static,
{
    let (client, server) = UnixStream::pair()?;
    let transport = UnixTransport::from_std(client)?;
    let handle = thread::spawn(move || daemon(FakeDaemon::new(server)?));
    Ok((transport, handle))
}

#[test]
fn authenticate_and_hello() -> Result<()> {
    let (mut transport, daemon) = spawn(|mut d| {
        let line = d.read_line()?;
        assert!(line.starts_with(b"\0AUTH EXTERNAL "));
        assert!(line.ends_with(b"\r\n"));
        d.write_line(b"OK 1234deadbeef\r\n")?;

        assert_eq!(d.read_line()?, b"BEGIN\r\n");

        let hello = d.read_message()?;
        assert_eq!(member(&hello), "Hello");
        assert_eq!(hello.destination(), Some(org_freedesktop_dbus::DESTINATION));

        let mut body = Writer::new();
        body.write_str(":1.7");
        d.reply(&hello, "s", body)
    })?;

    transport.authenticate(AuthKind::Uid)?;
    transport.hello()?;
    daemon.join().expect("daemon panicked")?;

    assert_eq!(transport.unique_name(), Some(":1.7"));
    Ok(())
}

#[test]
fn authenticate_without_credentials() -> Result<()> {
    let (mut transport, daemon) = spawn(|mut d| {
        assert_eq!(d.read_line()?, b"\0BEGIN\r\n");
        Ok(())
    })?;

    transport.authenticate(AuthKind::None)?;
    daemon.join().expect("daemon panicked")?;
    Ok(())
}

#[test]
fn authentication_rejected() -> Result<()> {
    let (mut transport, daemon) = spawn(|mut d| {
        d.read_line()?;
        d.write_line(b"REJECTED EXTERNAL\r\n")
    })?;

    let error = transport.authenticate(AuthKind::Uid).unwrap_err();
    assert_eq!(error.category(), ErrorCategory::Transport);
    daemon.join().expect("daemon panicked")?;
    Ok(())
}

#[test]
fn request_name_with_interleaved_signal() -> Result<()> {
    let (mut transport, daemon) = spawn(|mut d| {
        let call = d.read_message()?;
        assert_eq!(member(&call), "RequestName");
        assert_eq!(call.interface(), Some(org_freedesktop_dbus::INTERFACE));
        assert_eq!(call.signature(), "su");

        let mut r = Reader::new(call.body(), call.endianness());
        assert_eq!(r.read_str()?, "com.example.Test");
        assert_eq!(r.load_u32()?, NameFlag::DO_NOT_QUEUE.0);

        d.signal("NameAcquired")?;
        d.reply_u32(&call, NameReply::PRIMARY_OWNER.0)?;
        d.signal("Later")
    })?;

    let reply = transport.request_name("com.example.Test", NameFlag::DO_NOT_QUEUE)?;
    assert_eq!(reply, NameReply::PRIMARY_OWNER);
    daemon.join().expect("daemon panicked")?;

    // The signal received while waiting for the reply is delivered first.
    for expected in ["NameAcquired", "Later"] {
        match transport.recv()? {
            Recv::Message(message) => assert_eq!(member(&message), expected),
            Recv::Wakeup => panic!("unexpected wakeup"),
        }
    }

    Ok(())
}

#[test]
fn release_name_reply() -> Result<()> {
    let (mut transport, daemon) = spawn(|mut d| {
        let call = d.read_message()?;
        assert_eq!(member(&call), "ReleaseName");
        assert_eq!(call.signature(), "s");
        d.reply_u32(&call, ReleaseNameReply::NOT_OWNER.0)
    })?;

    let reply = transport.release_name("com.example.Test")?;
    assert_eq!(reply, ReleaseNameReply::NOT_OWNER);
    daemon.join().expect("daemon panicked")?;
    Ok(())
}

#[test]
fn error_reply() -> Result<()> {
    let (mut transport, daemon) = spawn(|mut d| {
        let call = d.read_message()?;
        d.reply_error(
            &call,
            "org.freedesktop.DBus.Error.AccessDenied",
            "Connection is not allowed to own the service",
        )
    })?;

    let error = transport
        .request_name("com.example.Test", NameFlag::DO_NOT_QUEUE)
        .unwrap_err();

    assert_eq!(error.category(), ErrorCategory::Transport);
    assert!(error.to_string().contains("AccessDenied"));
    daemon.join().expect("daemon panicked")?;
    Ok(())
}

#[test]
fn malformed_messages_are_skipped() -> Result<()> {
    let (mut transport, daemon) = spawn(|mut d| {
        d.send_raw(&signal_with_unknown_field("Extended", 1))?;

        // A signal without a path can't be decoded, but it's fully framed.
        let mut broken = signal_with_unknown_field("Broken", 2);
        broken[PREFIX_LENGTH] = 201;
        d.send_raw(&broken)?;

        d.serial = 2;
        d.signal("Plain")
    })?;

    for expected in ["Extended", "Plain"] {
        match transport.recv()? {
            Recv::Message(message) => assert_eq!(member(&message), expected),
            Recv::Wakeup => panic!("unexpected wakeup"),
        }
    }

    daemon.join().expect("daemon panicked")?;
    Ok(())
}

#[test]
fn waker_interrupts_recv() -> Result<()> {
    let (client, _server) = UnixStream::pair()?;
    let mut transport = UnixTransport::from_std(client)?;

    let waker = transport.waker()?;

    let t = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        waker.wake()
    });

    assert!(matches!(transport.recv()?, Recv::Wakeup));
    t.join().expect("waking thread panicked")?;

    // Wakeups raised while not waiting are observed by the next receive, and
    // multiple of them are coalesced.
    let waker = transport.waker()?;
    waker.wake()?;
    waker.wake()?;
    assert!(matches!(transport.recv()?, Recv::Wakeup));
    Ok(())
}

#[test]
fn hangup_is_fatal() -> Result<()> {
    let (client, server) = UnixStream::pair()?;
    let mut transport = UnixTransport::from_std(client)?;
    drop(server);

    let error = transport.recv().unwrap_err();
    assert_eq!(error.category(), ErrorCategory::Transport);
    assert!(!error.is_transient());
    Ok(())
}

#[test]
fn close() -> Result<()> {
    let (client, _server) = UnixStream::pair()?;
    let mut transport = UnixTransport::from_std(client)?;
    let waker = transport.waker()?;

    transport.close()?;
    transport.close()?;

    assert!(waker.wake().is_err());
    assert!(transport.waker().is_err());
    assert!(transport.recv().is_err());
    assert!(transport
        .request_name("com.example.Test", NameFlag::DO_NOT_QUEUE)
        .is_err());
    Ok(())
}
