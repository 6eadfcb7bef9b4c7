//! The process logic of the two layers this crate glues together.
//!
//! ## Layering
//!
//! The [`ip`] layer sits behind the link reception path. It receives fragments, puts datagrams
//! back together and forwards them to a receiver conceptually above it. It never blocks and
//! never reports errors upwards since nobody waits on a particular datagram.
//!
//! The [`tcp`] layer sits between a socket surface and a transport engine. Its operations block the
//! calling thread until the engine has executed them. Its notifications travel the other way, from
//! the engine towards the socket surface, and must never block.
//!
//! Both layers share one error type. Transient conditions (`WouldBlock`, `InProgress`) are always
//! returned to the immediate caller and never retried internally.
//!
//! [`ip`]: ip/index.html
//! [`tcp`]: tcp/index.html
pub mod ip;
pub mod tcp;

/// The result type of layer operations.
pub type Result<T> = core::result::Result<T, Error>;

/// The failure kinds of layer operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, thiserror::Error)]
pub enum Error {
    /// The connection was severed from the engine, or never existed.
    ///
    /// This is also what every blocked and every future call sees after the stack began shutting
    /// down, so that upper layers have a single failure path for it.
    #[error("connection closed")]
    Closed,

    /// No data or buffer space is available right now.
    ///
    /// Retry after the corresponding notification arrived.
    #[error("operation would block")]
    WouldBlock,

    /// The operation was started and completes later through a notification.
    #[error("operation in progress")]
    InProgress,

    /// A request object or buffer could not be allocated.
    ///
    /// The operation had no side effects.
    #[error("out of memory")]
    OutOfMemory,

    /// The local address and port combination is taken.
    #[error("address in use")]
    AddressInUse,

    /// The connection was torn down forcefully and queued data was discarded.
    #[error("connection aborted")]
    Aborted,

    /// The remote reset the connection.
    #[error("connection reset")]
    Reset,

    /// The operation requires an established connection.
    #[error("not connected")]
    NotConnected,

    /// The connection is already established.
    #[error("already connected")]
    AlreadyConnected,

    /// The engine gave up on the remote.
    #[error("timed out")]
    TimedOut,

    /// Unable to find a route towards the destination address.
    #[error("unreachable")]
    Unreachable,

    /// The operation was not permitted or had invalid arguments.
    #[error("illegal operation")]
    Illegal,
}

/// A standard wrapper for a function implementing receive traits.
///
/// Keeps the type alias overhead low by providing a single wrapper type that implements the
/// receiver traits of the layers, where applicable.
pub struct FnHandler<F>(pub F);
