use crate::error::Result;
use crate::NameSet;

use super::{LoopState, StopHandle};

/// A connection to a D-Bus message bus.
///
/// A connection holds a set of well-known names and runs a processing loop
/// which hands incoming messages to its [`Dispatch`] target. The loop runs
/// either on the calling thread through [`enter_processing_loop()`] or on a
/// background thread managed by the connection through
/// [`enter_processing_loop_async()`]; never both at once.
///
/// Connections are thread-aware but not thread-safe. All operations take
/// `&mut self`, and the only interaction with a running loop from another
/// thread goes through a [`StopHandle`].
///
/// Dropping a connection stops any running loop, waits for the background
/// thread to exit and closes the transport. Use [`close()`] to observe
/// failures while doing so.
///
/// Connections are constructed through the factory functions such as
/// [`create_session_bus_connection()`] or through a [`ConnectionBuilder`].
///
/// [`Dispatch`]: crate::Dispatch
/// [`ConnectionBuilder`]: crate::ConnectionBuilder
/// [`create_session_bus_connection()`]: crate::create_session_bus_connection
/// [`enter_processing_loop()`]: Connection::enter_processing_loop
/// [`enter_processing_loop_async()`]: Connection::enter_processing_loop_async
/// [`close()`]: Connection::close
pub trait Connection: Send {
    /// Request the given well-known name on the connection.
    ///
    /// The request never queues behind another owner: if the name is owned
    /// elsewhere and can't be replaced, this fails.
    ///
    /// # Errors
    ///
    /// * [`ErrorCategory::NameUnavailable`] if the name is malformed or the
    ///   bus declines the request.
    /// * [`ErrorCategory::InvalidState`] if a background loop is running.
    /// * [`ErrorCategory::Transport`] if the round-trip to the bus fails.
    ///
    /// The set of held names is unchanged on failure.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use busline::OwnedMessage;
    ///
    /// # fn main() -> busline::Result<()> {
    /// let mut c = busline::create_session_bus_connection(|_: OwnedMessage| {})?;
    /// c.request_name("se.tedro.DBusExample")?;
    /// assert!(c.held_names().contains("se.tedro.DBusExample"));
    /// # Ok(()) }
    /// ```
    ///
    /// [`ErrorCategory::NameUnavailable`]: crate::ErrorCategory::NameUnavailable
    /// [`ErrorCategory::InvalidState`]: crate::ErrorCategory::InvalidState
    /// [`ErrorCategory::Transport`]: crate::ErrorCategory::Transport
    fn request_name(&mut self, name: &str) -> Result<()>;

    /// Release a name previously acquired through
    /// [`request_name()`][Connection::request_name].
    ///
    /// # Errors
    ///
    /// * [`ErrorCategory::InvalidState`] if the name isn't held, if the bus
    ///   says this connection doesn't own it, or if a background loop is
    ///   running.
    /// * [`ErrorCategory::Transport`] if the round-trip to the bus fails.
    ///
    /// The set of held names is unchanged on failure.
    ///
    /// [`ErrorCategory::InvalidState`]: crate::ErrorCategory::InvalidState
    /// [`ErrorCategory::Transport`]: crate::ErrorCategory::Transport
    fn release_name(&mut self, name: &str) -> Result<()>;

    /// Enter the processing loop on the calling thread.
    ///
    /// Incoming messages are dispatched one at a time until the loop is
    /// stopped through a [`StopHandle`], at which point this returns.
    ///
    /// # Errors
    ///
    /// * [`ErrorCategory::InvalidState`] if a loop is already running.
    /// * [`ErrorCategory::Transport`] if receiving fails in a way the
    ///   transport can't recover from. The loop is left before the error is
    ///   returned.
    ///
    /// [`ErrorCategory::InvalidState`]: crate::ErrorCategory::InvalidState
    /// [`ErrorCategory::Transport`]: crate::ErrorCategory::Transport
    fn enter_processing_loop(&mut self) -> Result<()>;

    /// Enter the processing loop on a background thread managed by the
    /// connection, returning immediately.
    ///
    /// While the loop runs, the transport and dispatch target belong to the
    /// background thread. Name requests fail until the loop is left through
    /// [`leave_processing_loop()`][Connection::leave_processing_loop].
    ///
    /// # Errors
    ///
    /// * [`ErrorCategory::InvalidState`] if a loop is already running.
    /// * [`ErrorCategory::Transport`] if the thread can't be spawned.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use busline::{LoopState, OwnedMessage};
    ///
    /// # fn main() -> busline::Result<()> {
    /// let mut c = busline::create_session_bus_connection(|_: OwnedMessage| {})?;
    /// c.enter_processing_loop_async()?;
    /// assert_eq!(c.loop_state(), LoopState::Async);
    ///
    /// c.leave_processing_loop()?;
    /// assert_eq!(c.loop_state(), LoopState::Idle);
    /// # Ok(()) }
    /// ```
    ///
    /// [`ErrorCategory::InvalidState`]: crate::ErrorCategory::InvalidState
    /// [`ErrorCategory::Transport`]: crate::ErrorCategory::Transport
    fn enter_processing_loop_async(&mut self) -> Result<()>;

    /// Leave the background processing loop.
    ///
    /// This signals the loop to stop after the message it's currently
    /// dispatching and blocks until the background thread has exited. Once
    /// this returns the connection is idle again, regardless of the outcome.
    ///
    /// If no background loop is running this does nothing and returns
    /// `Ok(())`. A blocking loop is left through a [`StopHandle`] instead.
    ///
    /// # Errors
    ///
    /// Returns the failure which ended the background loop, if any, such as
    /// an unrecoverable transport error or a panic in the dispatch target.
    ///
    /// Errors with [`ErrorCategory::Transport`] and leaves the loop running
    /// if the stop signal can't be delivered. The stop request stays
    /// pending, so the loop exits after the next message it receives and a
    /// later call joins it.
    ///
    /// [`ErrorCategory::Transport`]: crate::ErrorCategory::Transport
    fn leave_processing_loop(&mut self) -> Result<()>;

    /// Get a handle which can stop a running processing loop from any
    /// thread.
    fn stop_handle(&self) -> StopHandle;

    /// Get the current state of the processing loop.
    ///
    /// A background loop which has failed stays [`LoopState::Async`] until it
    /// is left, at which point the failure is reported.
    fn loop_state(&self) -> LoopState;

    /// The well-known names held by this connection.
    fn held_names(&self) -> &NameSet;

    /// The unique name assigned to this connection by the bus.
    fn unique_name(&self) -> Option<&str>;

    /// Close the connection.
    ///
    /// This is what dropping a connection does, except that failures are
    /// reported instead of logged.
    fn close(self: Box<Self>) -> Result<()>;
}
