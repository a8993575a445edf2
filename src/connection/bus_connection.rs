use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info_span, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::names::{self, NameSet};
use crate::org_freedesktop_dbus::{NameFlag, ReleaseNameReply};
use crate::transport::Transport;

use super::control::{self, ActiveLoop, LoopControl};
use super::{Connection, Dispatch, LoopState, StopHandle};

/// What the processing loop needs exclusive access to.
struct Parts<T, D> {
    transport: T,
    dispatch: D,
}

/// What a background loop hands back once it exits.
///
/// `None` if the loop exited before it received its parts.
type Worker<T, D> = JoinHandle<Option<(Parts<T, D>, Result<()>)>>;

/// The connection implementation over any [`Transport`].
pub(crate) struct BusConnection<T, D>
where
    T: Transport,
    D: Dispatch,
{
    /// The transport and dispatch target, unless they're owned by a
    /// background loop or the connection has been closed.
    parts: Option<Parts<T, D>>,
    /// The background loop, if one is running.
    worker: Option<Worker<T, D>>,
    names: NameSet,
    /// Flags added to every name request.
    flags: NameFlag,
    control: Arc<LoopControl>,
    unique_name: Option<Box<str>>,
    thread_name: Box<str>,
}

impl<T, D> BusConnection<T, D>
where
    T: Transport,
    D: Dispatch,
{
    /// Construct a connection over an open transport.
    ///
    /// The transport is closed if the connection can't be constructed.
    pub(crate) fn new(
        mut transport: T,
        dispatch: D,
        flags: NameFlag,
        thread_name: Box<str>,
    ) -> Result<Self> {
        let waker = match transport.waker() {
            Ok(waker) => waker,
            Err(error) => {
                if let Err(error) = transport.close() {
                    warn!(%error, "failed to close transport");
                }

                return Err(error);
            }
        };

        let unique_name = transport.unique_name().map(Box::from);

        Ok(Self {
            parts: Some(Parts {
                transport,
                dispatch,
            }),
            worker: None,
            names: NameSet::new(),
            flags: flags | NameFlag::DO_NOT_QUEUE,
            control: Arc::new(LoopControl::new(Box::new(waker))),
            unique_name,
            thread_name,
        })
    }

    /// Leave any running loop and close the transport.
    ///
    /// Calling this more than once does nothing.
    pub(crate) fn shutdown(&mut self) -> Result<()> {
        let mut result = self.leave_processing_loop();

        // The stop flag is raised, so the loop exits once its wait returns.
        if let Some(worker) = self.worker.take() {
            warn!(
                thread = ?worker.thread().name(),
                "waiting for processing loop which could not be woken"
            );

            result = result.and(self.join(worker));
        }

        if let Some(mut parts) = self.parts.take() {
            debug!(names = ?self.names, "closing transport");
            result = result.and(parts.transport.close());
        }

        self.names.clear();
        result
    }

    /// Join a background loop and take back the parts it owned.
    fn join(&mut self, worker: Worker<T, D>) -> Result<()> {
        let joined = worker.join();
        self.control.finish();

        match joined {
            Ok(Some((parts, result))) => {
                self.parts = Some(parts);
                result
            }
            Ok(None) => Err(Error::new(ErrorKind::WorkerLost)),
            Err(payload) => Err(Error::new(ErrorKind::WorkerPanicked(panic_message(
                &*payload,
            )))),
        }
    }

    /// The error raised when the parts are not available.
    fn unavailable(&self) -> Error {
        if self.worker.is_some() {
            Error::new(ErrorKind::InvalidState(LoopState::Async))
        } else {
            Error::new(ErrorKind::Closed)
        }
    }
}

impl<T, D> Connection for BusConnection<T, D>
where
    T: Transport,
    D: Dispatch,
{
    fn request_name(&mut self, name: &str) -> Result<()> {
        names::check(name)?;

        let flags = self.flags;

        let Some(parts) = self.parts.as_mut() else {
            return Err(self.unavailable());
        };

        let reply = parts.transport.request_name(name, flags)?;

        if !reply.is_owner() {
            debug!(name, ?reply, "name request declined");
            return Err(Error::new(ErrorKind::NameUnavailable(name.into(), reply)));
        }

        self.names.insert(name);
        debug!(name, ?reply, "acquired name");
        Ok(())
    }

    fn release_name(&mut self, name: &str) -> Result<()> {
        let Some(parts) = self.parts.as_mut() else {
            return Err(self.unavailable());
        };

        if !self.names.contains(name) {
            return Err(Error::new(ErrorKind::NameNotHeld(name.into())));
        }

        let reply = parts.transport.release_name(name)?;

        if reply != ReleaseNameReply::RELEASED {
            return Err(Error::new(ErrorKind::NameNotReleased(name.into(), reply)));
        }

        self.names.remove(name);
        debug!(name, "released name");
        Ok(())
    }

    fn enter_processing_loop(&mut self) -> Result<()> {
        let Some(Parts {
            transport,
            dispatch,
        }) = self.parts.as_mut()
        else {
            return Err(self.unavailable());
        };

        self.control.begin(LoopState::Blocking)?;
        let _active = ActiveLoop(&self.control);

        let span = info_span!("processing_loop", mode = "blocking");
        let _enter = span.enter();

        debug!("entered");
        let result = control::run(transport, dispatch, &self.control);

        match &result {
            Ok(()) => debug!("left"),
            Err(error) => warn!(%error, "processing loop failed"),
        }

        result
    }

    fn enter_processing_loop_async(&mut self) -> Result<()> {
        if self.parts.is_none() {
            return Err(self.unavailable());
        }

        self.control.begin(LoopState::Async)?;

        let (sender, receiver) = mpsc::sync_channel(1);
        let control = self.control.clone();

        let spawned = thread::Builder::new()
            .name(self.thread_name.to_string())
            .spawn(move || background(receiver, control));

        let worker = match spawned {
            Ok(worker) => worker,
            Err(error) => {
                self.control.finish();
                return Err(Error::from(error));
            }
        };

        if let Some(parts) = self.parts.take() {
            if let Err(mpsc::SendError(parts)) = sender.send(parts) {
                self.parts = Some(parts);
            }
        }

        debug!(thread = &*self.thread_name, "spawned processing loop");
        self.worker = Some(worker);
        Ok(())
    }

    fn leave_processing_loop(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            debug!(state = %self.control.state(), "no background loop to leave");
            return Ok(());
        };

        if let Err(error) = self.control.request_stop() {
            if !worker.is_finished() {
                self.worker = Some(worker);
                return Err(error);
            }
        }

        self.join(worker)
    }

    #[inline]
    fn stop_handle(&self) -> StopHandle {
        StopHandle::new(self.control.clone())
    }

    #[inline]
    fn loop_state(&self) -> LoopState {
        self.control.state()
    }

    #[inline]
    fn held_names(&self) -> &NameSet {
        &self.names
    }

    #[inline]
    fn unique_name(&self) -> Option<&str> {
        self.unique_name.as_deref()
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.shutdown()
    }
}

impl<T, D> Drop for BusConnection<T, D>
where
    T: Transport,
    D: Dispatch,
{
    fn drop(&mut self) {
        if let Err(error) = self.shutdown() {
            warn!(%error, "failed to shut down connection");
        }
    }
}

/// Body of the background thread.
fn background<T, D>(
    receiver: mpsc::Receiver<Parts<T, D>>,
    control: Arc<LoopControl>,
) -> Option<(Parts<T, D>, Result<()>)>
where
    T: Transport,
    D: Dispatch,
{
    let mut parts = receiver.recv().ok()?;

    let span = info_span!("processing_loop", mode = "async");
    let _enter = span.enter();

    debug!("entered");

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        control::run(&mut parts.transport, &mut parts.dispatch, &control)
    }));

    let result = match result {
        Ok(result) => result,
        Err(payload) => Err(Error::new(ErrorKind::WorkerPanicked(panic_message(
            &*payload,
        )))),
    };

    match &result {
        Ok(()) => debug!("left"),
        Err(error) => warn!(%error, "processing loop failed"),
    }

    Some((parts, result))
}

fn panic_message(payload: &(dyn Any + Send)) -> Box<str> {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).into();
    }

    if let Some(message) = payload.downcast_ref::<String>() {
        return message.as_str().into();
    }

    "unknown panic payload".into()
}
