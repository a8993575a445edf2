//! An in-memory bus used to test connections.

use std::collections::{BTreeSet, VecDeque};
use std::io;
use std::num::NonZeroU32;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::error::{Error, ErrorKind, Result};
use crate::org_freedesktop_dbus::{NameFlag, NameReply, ReleaseNameReply};
use crate::OwnedMessage;

use super::{Bus, Connector, Recv, Transport, Wake};

/// Something the mock bus hands out from `recv`.
enum Incoming {
    Message(OwnedMessage),
    Fail { transient: bool },
}

#[derive(Default)]
struct State {
    opened: Vec<Bus>,
    closed: usize,
    refuse_connect: bool,
    incoming: VecDeque<Incoming>,
    woken: bool,
    waiting: bool,
    wake_fails: bool,
    wake_attempts: usize,
    transport_closed: bool,
    /// Names owned by some other connection.
    taken: BTreeSet<String>,
    /// Names owned by the connection under test.
    owned: BTreeSet<String>,
    requests: Vec<(String, NameFlag)>,
    releases: Vec<String>,
}

/// A mock bus which records everything a connection does with it.
///
/// Clones share the same state, so one clone can be handed to the connection
/// as its [`Connector`] while the test holds onto another.
#[derive(Clone, Default)]
pub(crate) struct MockBus {
    shared: Arc<(Mutex<State>, Condvar)>,
}

impl MockBus {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.shared.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn update<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let output = f(&mut self.lock());
        self.shared.1.notify_all();
        output
    }

    /// Queue up a signal to be received.
    pub(crate) fn push_signal(&self, member: &str, serial: u32) {
        let serial = NonZeroU32::new(serial).expect("serial must be non-zero");
        let message = OwnedMessage::signal("/se/tedro/Test".into(), member.into(), serial)
            .with_interface("se.tedro.Test".into());
        self.update(|s| s.incoming.push_back(Incoming::Message(message)));
    }

    /// Queue up a receive failure.
    pub(crate) fn push_failure(&self, transient: bool) {
        self.update(|s| s.incoming.push_back(Incoming::Fail { transient }));
    }

    /// Mark a name as owned by another connection.
    pub(crate) fn take_name(&self, name: &str) {
        self.update(|s| s.taken.insert(name.to_owned()));
    }

    /// Take away a name from the connection under test without telling it.
    pub(crate) fn revoke(&self, name: &str) {
        self.update(|s| s.owned.remove(name));
    }

    /// Make waking up the transport fail until switched off again.
    pub(crate) fn fail_wake(&self, fail: bool) {
        self.update(|s| s.wake_fails = fail);
    }

    /// Make the next connect attempt fail.
    pub(crate) fn refuse_connect(&self) {
        self.update(|s| s.refuse_connect = true);
    }

    pub(crate) fn opened(&self) -> Vec<Bus> {
        self.lock().opened.clone()
    }

    pub(crate) fn closed(&self) -> usize {
        self.lock().closed
    }

    pub(crate) fn owned(&self) -> Vec<String> {
        self.lock().owned.iter().cloned().collect()
    }

    pub(crate) fn requests(&self) -> Vec<(String, NameFlag)> {
        self.lock().requests.clone()
    }

    pub(crate) fn releases(&self) -> Vec<String> {
        self.lock().releases.clone()
    }

    /// Number of messages and failures not yet received.
    pub(crate) fn pending(&self) -> usize {
        self.lock().incoming.len()
    }

    /// Block until a transport is waiting in `recv` with nothing to receive.
    pub(crate) fn wait_until_idle(&self) {
        let (lock, cond) = &*self.shared;
        let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = cond
            .wait_while(guard, |s| !(s.waiting && s.incoming.is_empty()))
            .unwrap_or_else(|e| e.into_inner());
    }

    /// Block until a transport has been woken up, or failed to be, at least
    /// `count` times in total.
    pub(crate) fn wait_until_wake_attempts(&self, count: usize) {
        let (lock, cond) = &*self.shared;
        let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = cond
            .wait_while(guard, |s| s.wake_attempts < count)
            .unwrap_or_else(|e| e.into_inner());
    }

    /// Block until everything queued up has been received.
    pub(crate) fn wait_until_drained(&self) {
        let (lock, cond) = &*self.shared;
        let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = cond
            .wait_while(guard, |s| !s.incoming.is_empty())
            .unwrap_or_else(|e| e.into_inner());
    }
}

impl Connector for MockBus {
    type Transport = MockTransport;

    fn connect(&self, bus: Bus) -> Result<MockTransport> {
        self.update(|s| {
            if s.refuse_connect {
                return Err(Error::from(io::Error::from(
                    io::ErrorKind::ConnectionRefused,
                )));
            }

            s.opened.push(bus);
            s.transport_closed = false;
            Ok(())
        })?;

        Ok(MockTransport {
            bus: self.clone(),
            closed: false,
        })
    }
}

pub(crate) struct MockWaker {
    bus: MockBus,
}

impl Wake for MockWaker {
    fn wake(&self) -> Result<()> {
        self.bus.update(|s| {
            s.wake_attempts += 1;

            if s.transport_closed {
                return Err(Error::new(ErrorKind::Closed));
            }

            if s.wake_fails {
                return Err(Error::from(io::Error::from(io::ErrorKind::BrokenPipe)));
            }

            s.woken = true;
            Ok(())
        })
    }
}

pub(crate) struct MockTransport {
    bus: MockBus,
    closed: bool,
}

impl MockTransport {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::new(ErrorKind::Closed));
        }

        Ok(())
    }
}

impl Transport for MockTransport {
    type Waker = MockWaker;

    fn waker(&self) -> Result<MockWaker> {
        self.ensure_open()?;

        Ok(MockWaker {
            bus: self.bus.clone(),
        })
    }

    fn unique_name(&self) -> Option<&str> {
        Some(":1.42")
    }

    fn request_name(&mut self, name: &str, flags: NameFlag) -> Result<NameReply> {
        self.ensure_open()?;

        self.bus.update(|s| {
            s.requests.push((name.to_owned(), flags));

            if s.taken.contains(name) {
                return Ok(NameReply::EXISTS);
            }

            if s.owned.insert(name.to_owned()) {
                Ok(NameReply::PRIMARY_OWNER)
            } else {
                Ok(NameReply::ALREADY_OWNER)
            }
        })
    }

    fn release_name(&mut self, name: &str) -> Result<ReleaseNameReply> {
        self.ensure_open()?;

        self.bus.update(|s| {
            s.releases.push(name.to_owned());

            if s.owned.remove(name) {
                Ok(ReleaseNameReply::RELEASED)
            } else {
                Ok(ReleaseNameReply::NOT_OWNER)
            }
        })
    }

    fn recv(&mut self) -> Result<Recv> {
        self.ensure_open()?;

        let (lock, cond) = &*self.bus.shared;
        let mut s = lock.lock().unwrap_or_else(|e| e.into_inner());

        loop {
            if let Some(incoming) = s.incoming.pop_front() {
                s.waiting = false;
                cond.notify_all();

                return match incoming {
                    Incoming::Message(message) => Ok(Recv::Message(message)),
                    Incoming::Fail { transient: true } => {
                        Err(Error::from(io::Error::from(io::ErrorKind::Interrupted)))
                    }
                    Incoming::Fail { transient: false } => {
                        Err(Error::from(io::Error::from(io::ErrorKind::UnexpectedEof)))
                    }
                };
            }

            if s.woken {
                s.woken = false;
                s.waiting = false;
                cond.notify_all();
                return Ok(Recv::Wakeup);
            }

            s.waiting = true;
            cond.notify_all();
            s = cond.wait(s).unwrap_or_else(|e| e.into_inner());
        }
    }

    fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.closed = true;

        self.bus.update(|s| {
            s.closed += 1;
            s.transport_closed = true;
            s.owned.clear();
        });

        Ok(())
    }
}
