//! The interface of the wrapped transport engine.
//!
//! The engine is single threaded. Every method is only ever called from the executor thread, see
//! [`Context`]. Events produced while the engine processes input or executes a call are drained
//! with [`poll_event`] after every job and dispatched to the connections they belong to.
//!
//! [`Context`]: ../struct.Context.html
//! [`poll_event`]: trait.Engine.html#method.poll_event
use core::fmt;
use core::hash::Hash;
use std::net::{Ipv4Addr, SocketAddrV4};

use bytes::Bytes;

use crate::layer::Error;

/// A transport engine driven by the bridge.
pub trait Engine: Send + 'static {
    /// The engine's name for one control block.
    type Handle: Copy + Eq + Hash + fmt::Debug + Send + 'static;

    /// Allocate a new control block in state `Closed`.
    fn new_handle(&mut self) -> Option<Self::Handle>;

    /// Bind the control block to a local address and port.
    fn bind(&mut self, handle: Self::Handle, addr: Ipv4Addr, port: u16) -> Result<(), EngineError>;

    /// Turn a bound control block into a listening one.
    ///
    /// On success the old handle is invalid and replaced by the returned one. On failure the old
    /// handle stays valid.
    fn listen(&mut self, handle: Self::Handle, backlog: u8) -> Option<Self::Handle>;

    /// Tell a listener that one of its pending connections was taken.
    fn accepted(&mut self, listener: Self::Handle);

    /// Start an active open.
    ///
    /// Completion is reported through `Event::Connected`.
    fn connect(&mut self, handle: Self::Handle, addr: Ipv4Addr, port: u16) -> Result<(), EngineError>;

    /// The number of bytes that `write` accepts right now.
    fn send_window(&self, handle: Self::Handle) -> usize;

    /// Queue data for sending.
    ///
    /// `more` indicates that further data follows immediately, so the engine should not push.
    fn write(&mut self, handle: Self::Handle, data: &[u8], more: bool) -> Result<(), EngineError>;

    /// Try to send queued data now.
    fn output(&mut self, handle: Self::Handle) -> Result<(), EngineError>;

    /// Open the receive window by `len` bytes that were taken from the engine.
    fn recved(&mut self, handle: Self::Handle, len: usize);

    /// Shut down one or both directions.
    fn shutdown(&mut self, handle: Self::Handle, rx: bool, tx: bool) -> Result<(), EngineError>;

    /// Begin a graceful close.
    ///
    /// On success the handle must not be used anymore. On failure it stays valid.
    fn close(&mut self, handle: Self::Handle) -> Result<(), EngineError>;

    /// Tear down the connection with a reset.
    ///
    /// Always succeeds. Like any other fatal error this reports `Event::Error` with
    /// `EngineError::Abrt` for the handle.
    fn abort(&mut self, handle: Self::Handle);

    /// The protocol state of a control block.
    fn state(&self, handle: Self::Handle) -> State;

    /// The bound local address.
    fn local_endpoint(&self, handle: Self::Handle) -> Result<SocketAddrV4, EngineError>;

    /// The address of the remote.
    fn remote_endpoint(&self, handle: Self::Handle) -> Result<SocketAddrV4, EngineError>;

    /// Take the next pending event.
    fn poll_event(&mut self) -> Option<(Self::Handle, Event<Self::Handle>)> {
        None
    }
}

/// The connection state of a control block, as in RFC 793.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    /// Not connected and not listening.
    Closed,
    /// Waiting for connection requests.
    Listen,
    /// Sent a connection request.
    SynSent,
    /// Received a connection request, waiting on ack.
    SynReceived,
    /// An open connection.
    Established,
    /// Closed our side of the connection.
    FinWait1,
    /// Our close was acknowledged.
    FinWait2,
    /// The remote closed its side, we have not yet.
    CloseWait,
    /// Both sides closed at the same time.
    Closing,
    /// Closed after the remote, waiting on the final ack.
    LastAck,
    /// Both sides recognized the connection as closed.
    TimeWait,
}

/// The error codes of the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EngineError {
    /// Out of memory.
    Mem,
    /// Buffer error.
    Buf,
    /// Timed out.
    Timeout,
    /// Routing problem.
    Rte,
    /// Operation in progress.
    InProgress,
    /// Illegal value.
    Val,
    /// Operation would block.
    WouldBlock,
    /// Address in use.
    Use,
    /// Already connected.
    IsConn,
    /// Connection aborted.
    Abrt,
    /// Connection reset.
    Rst,
    /// Connection closed.
    Clsd,
    /// Not connected.
    Conn,
    /// Illegal argument.
    Arg,
}

/// A callback of the engine for one control block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event<H> {
    /// Data arrived, or the remote closed when `payload` is `None`.
    Recv {
        /// The received segment.
        payload: Option<Bytes>,
        /// The status of the reception.
        result: Result<(), EngineError>,
    },

    /// The remote acknowledged data, send space is available.
    Sent {
        /// Bytes available in the send window.
        available: usize,
    },

    /// A listener has a new connection.
    Accept {
        /// Handle of the new connection.
        new: H,
        /// The status of the establishment.
        result: Result<(), EngineError>,
    },

    /// An active open finished.
    Connected {
        /// Whether the connection was established.
        result: Result<(), EngineError>,
    },

    /// The control block was freed after a fatal error.
    Error {
        /// The cause.
        error: EngineError,
    },
}

/// The answer to an engine event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// The event was handled.
    Ok,
    /// The connection named in the event must be aborted.
    Abort,
}

impl From<EngineError> for Error {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Mem | EngineError::Buf => Error::OutOfMemory,
            EngineError::Timeout => Error::TimedOut,
            EngineError::Rte => Error::Unreachable,
            EngineError::InProgress => Error::InProgress,
            EngineError::WouldBlock => Error::WouldBlock,
            EngineError::Use => Error::AddressInUse,
            EngineError::IsConn => Error::AlreadyConnected,
            EngineError::Abrt => Error::Aborted,
            EngineError::Rst => Error::Reset,
            EngineError::Clsd => Error::Closed,
            EngineError::Conn => Error::NotConnected,
            EngineError::Val | EngineError::Arg => Error::Illegal,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            State::Closed => "CLOSED",
            State::Listen => "LISTEN",
            State::SynSent => "SYN_SENT",
            State::SynReceived => "SYN_RCVD",
            State::Established => "ESTABLISHED",
            State::FinWait1 => "FIN_WAIT_1",
            State::FinWait2 => "FIN_WAIT_2",
            State::CloseWait => "CLOSE_WAIT",
            State::Closing => "CLOSING",
            State::LastAck => "LAST_ACK",
            State::TimeWait => "TIME_WAIT",
        };
        f.write_str(name)
    }
}
