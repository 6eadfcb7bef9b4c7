use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::layer::{Error, Result};
use super::PacketQueue;

/// The socket side of one connection.
///
/// Shared between the socket surface, which reads from it, and the executor, which fills its
/// queue and updates its flags. All fields sit behind one lock.
pub struct Connection<H> {
    state: Mutex<Inner<H>>,
}

pub(crate) struct Inner<H> {
    /// The engine's control block, `None` once severed.
    pub(crate) handle: Option<H>,
    pub(crate) queue: PacketQueue,
    /// Set when no more data will arrive, with the status reads report after the queue drained.
    pub(crate) read_shutdown: Option<Result<()>>,
    pub(crate) write_shutdown: bool,
}

impl<H: Copy> Connection<H> {
    /// Create a connection not yet attached to the engine.
    ///
    /// Attached by `Context::open` or when it is handed out to accept an incoming connection.
    pub fn new() -> Arc<Self> {
        Arc::new(Connection {
            state: Mutex::new(Inner {
                handle: None,
                queue: PacketQueue::new(),
                read_shutdown: None,
                write_shutdown: false,
            }),
        })
    }

    /// The engine's control block of this connection.
    pub fn handle(&self) -> Option<H> {
        self.state.lock().handle
    }

    /// Check if the connection lost its control block.
    pub fn is_severed(&self) -> bool {
        self.state.lock().handle.is_none()
    }

    /// Read received data into `buf`.
    ///
    /// Takes data across as many queued segments as fit into `buf`. Returns the number of bytes
    /// read, which is `0` only when the remote closed gracefully and everything was read. With
    /// nothing queued this returns `WouldBlock` until the read direction was shut down, and the
    /// stored status afterwards. An empty `buf` with data queued is `WouldBlock` as well.
    ///
    /// The lock is released while copying. Only one thread should read at a time.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        if state.queue.is_empty() {
            return match state.read_shutdown {
                None => Err(Error::WouldBlock),
                Some(status) => status.map(|()| 0),
            };
        }

        if buf.is_empty() {
            return Err(Error::WouldBlock);
        }

        let mut copied = 0;
        while copied < buf.len() {
            let chunk = match state.queue.take_front(buf.len() - copied) {
                Some(chunk) => chunk,
                None => break,
            };

            let target = &mut buf[copied..copied + chunk.len()];
            MutexGuard::unlocked(&mut state, || target.copy_from_slice(&chunk));
            copied += chunk.len();
        }

        Ok(copied)
    }

    /// The number of bytes ready to be read.
    pub fn available(&self) -> usize {
        self.state.lock().queue.remaining()
    }

    /// The number of queued segments.
    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// The status reads report once the queue is drained, if the read direction is shut.
    pub fn read_shutdown(&self) -> Option<Result<()>> {
        self.state.lock().read_shutdown
    }

    /// Check if the write direction is shut.
    pub fn is_write_shutdown(&self) -> bool {
        self.state.lock().write_shutdown
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner<H>> {
        self.state.lock()
    }
}
