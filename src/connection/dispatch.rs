use crate::OwnedMessage;

/// The target incoming messages are dispatched to.
///
/// The processing loop calls [`Dispatch::dispatch`] once for every message it
/// receives, in the order the bus delivered them. Whatever the target does
/// with a message, including failing to handle it, is up to the target.
///
/// This is implemented for closures, so the simplest dispatch target is a
/// function:
///
/// ```no_run
/// use busline::OwnedMessage;
///
/// # fn main() -> busline::Result<()> {
/// let c = busline::create_session_bus_connection(|message: OwnedMessage| {
///     println!("{:?}", message.kind());
/// })?;
/// # Ok(()) }
/// ```
///
/// The target is moved onto the background thread while a background loop
/// runs, so it must be [`Send`].
pub trait Dispatch: Send + 'static {
    /// Handle a single incoming message.
    fn dispatch(&mut self, message: OwnedMessage);
}

impl<F> Dispatch for F
where
    F: FnMut(OwnedMessage) + Send + 'static,
{
    #[inline]
    fn dispatch(&mut self, message: OwnedMessage) {
        self(message)
    }
}
