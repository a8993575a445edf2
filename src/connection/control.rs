use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::{Error, ErrorKind, Result};
use crate::transport::{Recv, Transport, Wake};

use super::Dispatch;

/// The state of the processing loop of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopState {
    /// No processing loop is running.
    Idle,
    /// A processing loop occupies the thread which entered it.
    Blocking,
    /// A processing loop runs on a background thread owned by the
    /// connection.
    Async,
}

impl LoopState {
    const fn into_raw(self) -> u8 {
        match self {
            LoopState::Idle => 0,
            LoopState::Blocking => 1,
            LoopState::Async => 2,
        }
    }

    const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => LoopState::Blocking,
            2 => LoopState::Async,
            _ => LoopState::Idle,
        }
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Idle => write!(f, "idle"),
            LoopState::Blocking => write!(f, "blocking"),
            LoopState::Async => write!(f, "async"),
        }
    }
}

/// State shared between a connection, its processing loop and any
/// [`StopHandle`].
///
/// Only the owning connection transitions the state. Other threads read it
/// and raise the stop flag.
pub(crate) struct LoopControl {
    state: AtomicU8,
    stop: AtomicBool,
    waker: Box<dyn Wake>,
}

impl LoopControl {
    pub(crate) fn new(waker: Box<dyn Wake>) -> Self {
        Self {
            state: AtomicU8::new(LoopState::Idle.into_raw()),
            stop: AtomicBool::new(false),
            waker,
        }
    }

    #[inline]
    pub(crate) fn state(&self) -> LoopState {
        LoopState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Transition from idle into a running state.
    ///
    /// Stop requests raised before this point are discarded.
    pub(crate) fn begin(&self, state: LoopState) -> Result<()> {
        let current = self.state();

        if current != LoopState::Idle {
            return Err(Error::new(ErrorKind::InvalidState(current)));
        }

        self.stop.store(false, Ordering::SeqCst);
        self.state.store(state.into_raw(), Ordering::SeqCst);
        Ok(())
    }

    /// Transition back into idle.
    pub(crate) fn finish(&self) {
        self.state
            .store(LoopState::Idle.into_raw(), Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Raise the stop flag and wake up the transport.
    ///
    /// Does nothing if no loop is running.
    pub(crate) fn request_stop(&self) -> Result<()> {
        if self.state() == LoopState::Idle {
            return Ok(());
        }

        self.stop.store(true, Ordering::SeqCst);
        self.waker.wake()
    }
}

/// Resets the loop state once a blocking loop is left, including by
/// unwinding out of a dispatch target.
pub(crate) struct ActiveLoop<'a>(pub(crate) &'a LoopControl);

impl Drop for ActiveLoop<'_> {
    #[inline]
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// A handle used to leave a running processing loop.
///
/// This is the only part of a connection which may be used from other
/// threads than the one owning the connection. It can also be moved into the
/// dispatch target, which lets a message handler end the loop it's called
/// from.
///
/// # Examples
///
/// ```no_run
/// use std::thread;
///
/// use busline::{LoopState, OwnedMessage};
///
/// # fn main() -> busline::Result<()> {
/// let mut c = busline::create_session_bus_connection(|_: OwnedMessage| {})?;
/// let stop = c.stop_handle();
///
/// let t = thread::spawn(move || {
///     // Stopping before the loop has been entered does nothing.
///     while stop.loop_state() != LoopState::Blocking {
///         thread::yield_now();
///     }
///
///     stop.stop()
/// });
///
/// c.enter_processing_loop()?;
/// t.join().unwrap()?;
/// # Ok(()) }
/// ```
#[derive(Clone)]
pub struct StopHandle {
    control: Arc<LoopControl>,
}

impl StopHandle {
    pub(crate) fn new(control: Arc<LoopControl>) -> Self {
        Self { control }
    }

    /// Request the running processing loop to stop.
    ///
    /// The loop stops at its next safe point, which is after the message
    /// currently being dispatched (if any) has been handled. This doesn't
    /// wait for the loop to stop.
    ///
    /// Calling it while no loop is running does nothing, and the request is
    /// not remembered for a loop entered later. A thread which is started
    /// before the loop is entered should wait for [`StopHandle::loop_state`]
    /// to leave [`LoopState::Idle`] before stopping it.
    ///
    /// # Errors
    ///
    /// Errors if the stop signal can't be delivered to the transport.
    pub fn stop(&self) -> Result<()> {
        self.control.request_stop()
    }

    /// Get the current state of the processing loop.
    pub fn loop_state(&self) -> LoopState {
        self.control.state()
    }
}

impl fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopHandle")
            .field("state", &self.control.state())
            .finish_non_exhaustive()
    }
}

/// The processing loop itself, shared by both the blocking and the
/// background variant.
///
/// The stop flag is checked before every wait, so a stop request never
/// interrupts a dispatch in progress.
pub(crate) fn run<T, D>(transport: &mut T, dispatch: &mut D, control: &LoopControl) -> Result<()>
where
    T: Transport,
    D: Dispatch,
{
    while !control.should_stop() {
        match transport.recv() {
            Ok(Recv::Message(message)) => {
                trace!(serial = message.serial().get(), kind = ?message.kind(), "dispatching");
                dispatch.dispatch(message);
            }
            Ok(Recv::Wakeup) => {}
            Err(error) if error.is_transient() => {
                debug!(%error, "transient receive failure");
            }
            Err(error) => return Err(error),
        }
    }

    Ok(())
}
