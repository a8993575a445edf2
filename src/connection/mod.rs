
pub use self::builder::ConnectionBuilder;
mod builder;

pub use self::connection::Connection;
mod connection;

pub(crate) use self::bus_connection::BusConnection;
mod bus_connection;

pub use self::control::{LoopState, StopHandle};
mod control;

pub use self::dispatch::Dispatch;
mod dispatch;
