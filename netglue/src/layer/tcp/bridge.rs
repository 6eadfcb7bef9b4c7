use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::thread;

use crate::layer::{Error, Result};
use crate::sync::{CancellationGate, Permits, Signal};
use super::{Config, Connection, Context, Executor, Notify};
use super::engine::Engine;

/// The blocking call surface of the engine.
///
/// Every operation is sent to the engine thread and the calling thread blocks until it has been
/// executed there. A wait also ends when the gate fires, in which case the operation reports
/// `Closed`. An operation whose wait was cancelled before the engine got to it is not executed at
/// all. No operation waits on its own gate after it fired.
///
/// Must not be used from the engine thread itself, that deadlocks. Jobs and notifications that
/// run there call the methods of [`Context`] instead.
///
/// [`Context`]: struct.Context.html
pub struct Bridge<E: Engine> {
    executor: Executor<E>,
    gate: Arc<CancellationGate>,
    permits: Arc<Permits>,
}

impl<E: Engine> Bridge<E> {
    /// Start an engine thread for `engine`.
    pub fn new(
        engine: E,
        notify: Arc<dyn Notify<E::Handle>>,
        gate: Arc<CancellationGate>,
        config: Config,
    ) -> io::Result<Self> {
        let executor = Executor::spawn(Context::new(engine, notify))?;
        Ok(Bridge {
            executor,
            gate,
            permits: Permits::new(config.max_pending_requests),
        })
    }

    /// The gate that cancels all waits of this bridge.
    pub fn gate(&self) -> &Arc<CancellationGate> {
        &self.gate
    }

    /// The number of operations currently waiting on the engine.
    pub fn pending(&self) -> usize {
        self.permits.in_flight()
    }

    /// Execute `f` on the engine thread and wait for its result.
    pub fn run<T, F>(&self, f: F) -> Result<T>
        where
            F: FnOnce(&mut Context<E>) -> T + Send + 'static,
            T: Send + 'static,
    {
        let _permit = self.permits.try_acquire().ok_or(Error::OutOfMemory)?;
        if self.gate.is_fired() {
            return Err(Error::Closed);
        }

        let (signal, completer) = Signal::new();
        let gate = self.gate.clone();
        self.executor.post(Box::new(move |cx: &mut Context<E>| {
            // The caller was already told `Closed`, the operation must not happen behind its back.
            if gate.is_fired() || completer.is_cancelled() {
                net_trace!("skipping cancelled request");
                return;
            }

            let value = f(cx);
            // Events caused by the operation reach their connections before the caller resumes.
            cx.pump();
            completer.complete(value)
        }))?;
        signal.wait(&self.gate).ok_or(Error::Closed)
    }

    /// Queue `f` for the engine thread without waiting for it.
    pub fn post<F>(&self, f: F) -> Result<()>
        where F: FnOnce(&mut Context<E>) + Send + 'static,
    {
        if self.gate.is_fired() {
            return Err(Error::Closed);
        }

        self.executor.post(Box::new(f))
    }

    /// Create a connection.
    pub fn open(&self) -> Result<Arc<Connection<E::Handle>>> {
        self.run(|cx| cx.open())?
    }

    /// Bind a connection to a local address.
    pub fn bind(&self, conn: &Arc<Connection<E::Handle>>, addr: Ipv4Addr, port: u16) -> Result<()> {
        let conn = conn.clone();
        self.run(move |cx| cx.bind(&conn, addr, port))?
    }

    /// Make a connection listen, returning its new handle.
    ///
    /// Returns `None` on any failure.
    pub fn listen(&self, conn: &Arc<Connection<E::Handle>>, backlog: u8) -> Option<E::Handle> {
        let conn = conn.clone();
        self.run(move |cx| cx.listen(&conn, backlog)).ok().flatten()
    }

    /// Start connecting to a remote.
    ///
    /// `Ok` means in progress, see [`Context::connect`].
    ///
    /// [`Context::connect`]: struct.Context.html#method.connect
    pub fn connect(&self, conn: &Arc<Connection<E::Handle>>, addr: Ipv4Addr, port: u16) -> Result<()> {
        let conn = conn.clone();
        self.run(move |cx| cx.connect(&conn, addr, port))?
    }

    /// Send a prefix of `data`, returning its length.
    ///
    /// The data is copied before it is handed to the engine thread.
    pub fn send(&self, conn: &Arc<Connection<E::Handle>>, data: &[u8]) -> Result<usize> {
        let conn = conn.clone();
        let data = data.to_vec();
        self.run(move |cx| cx.send(&conn, &data))?
    }

    /// Shut down one or both directions.
    pub fn shutdown(&self, conn: &Arc<Connection<E::Handle>>, rx: bool, tx: bool) -> Result<()> {
        let conn = conn.clone();
        self.run(move |cx| cx.shutdown(&conn, rx, tx))?
    }

    /// Close a connection.
    pub fn close(&self, conn: &Arc<Connection<E::Handle>>, notify: bool) -> Result<()> {
        let conn = conn.clone();
        self.run(move |cx| cx.close(&conn, notify))?
    }

    /// The local address of a connection.
    pub fn local_endpoint(&self, conn: &Arc<Connection<E::Handle>>) -> Result<SocketAddrV4> {
        let conn = conn.clone();
        self.run(move |cx| cx.local_endpoint(&conn))?
    }

    /// The remote address of a connection.
    pub fn peer_endpoint(&self, conn: &Arc<Connection<E::Handle>>) -> Result<SocketAddrV4> {
        let conn = conn.clone();
        self.run(move |cx| cx.peer_endpoint(&conn))?
    }

    /// Fire the gate and stop the engine thread, returning its state.
    pub fn stop(self) -> thread::Result<Context<E>> {
        self.gate.fire();
        self.executor.stop()
    }
}
