//! The tcp layer, a bridge between blocking callers and a callback driven engine.
//!
//! The engine (see [`Engine`]) is single threaded and reports everything through callbacks. It is
//! owned by the thread of an [`Executor`] which runs one job at a time. The [`Bridge`] turns each
//! operation into such a job and blocks the caller until it ran, or until the shutdown gate fired.
//!
//! ## Data flow
//!
//! Received segments are queued on the [`Connection`] and read by the socket surface through
//! [`Connection::read`]. Everything else the engine reports is forwarded to a [`Notify`]
//! implementation. Notifications run on the engine thread, so they must neither block nor call
//! into the bridge.
//!
//! ## Teardown
//!
//! A connection whose control block was freed by the engine is *severed*: its handle is `None`
//! and every operation on it reports `Closed`. Fatal errors of the engine are held back until
//! the queued data was read, so a reader sees all data before the error.
//!
//! [`Engine`]: engine/trait.Engine.html
//! [`Executor`]: struct.Executor.html
//! [`Bridge`]: struct.Bridge.html
//! [`Connection`]: struct.Connection.html
//! [`Connection::read`]: struct.Connection.html#method.read
//! [`Notify`]: trait.Notify.html
use std::sync::Arc;

use crate::layer::Result;

mod bridge;
mod connection;
pub mod engine;
mod executor;
mod queue;

pub use self::bridge::Bridge;
pub use self::connection::Connection;
pub use self::executor::{Context, Executor, Job};
pub use self::queue::{PacketQueue, QueuedSegment};

/// Limits of the bridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Operations that may wait on the engine at the same time.
    ///
    /// Further calls fail with `OutOfMemory` without side effects.
    pub max_pending_requests: usize,
}

/// The upper layer, informed about connection events.
///
/// All methods are called on the engine thread.
pub trait Notify<H>: Send + Sync {
    /// New data was queued, or a read will now observe the end of data or an error.
    fn data_available(&self, conn: &Arc<Connection<H>>);

    /// The remote acknowledged data, `space` bytes may be sent.
    fn send_available(&self, conn: &Arc<Connection<H>>, space: usize);

    /// A connection attempt finished.
    fn connect_completed(&self, conn: &Arc<Connection<H>>, result: Result<()>);

    /// A listener has a new connection.
    ///
    /// Return a fresh connection to take it or `None` to have it aborted.
    fn incoming(&self, listener: &Arc<Connection<H>>) -> Option<Arc<Connection<H>>>;

    /// The connection is finished, with the cause.
    fn terminal(&self, conn: &Arc<Connection<H>>, result: Result<()>);
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_pending_requests: 256,
        }
    }
}
