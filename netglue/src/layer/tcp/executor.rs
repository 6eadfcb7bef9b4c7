use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::{mpsc, Arc};
use std::thread;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::layer::{Error, Result};
use super::{Connection, Notify};
use super::engine::{Engine, EngineError, Event, State, Verdict};

/// A unit of work for the engine thread.
pub type Job<E> = Box<dyn FnOnce(&mut Context<E>) + Send>;

/// The state owned by the engine thread.
///
/// Every method here is an operation body that runs inline. Code already running on the engine
/// thread, such as a job, calls them directly. Everybody else goes through the [`Bridge`].
///
/// [`Bridge`]: struct.Bridge.html
pub struct Context<E: Engine> {
    engine: E,
    registrations: HashMap<E::Handle, Registration<E::Handle>>,
    notify: Arc<dyn Notify<E::Handle>>,
}

/// The link from a control block back to its connection.
struct Registration<H> {
    conn: Arc<Connection<H>>,
    interest: Interest,
}

/// The engine callbacks attached to one control block.
#[derive(Clone, Copy, Debug, Default)]
struct Interest {
    recv: bool,
    sent: bool,
    accept: bool,
    connected: bool,
    error: bool,
}

/// The thread that owns the engine.
///
/// Runs jobs one at a time in submission order, so that no two operation bodies or callbacks
/// ever execute concurrently.
pub struct Executor<E: Engine> {
    sender: Mutex<mpsc::Sender<Message<E>>>,
    thread: Option<thread::JoinHandle<Context<E>>>,
}

enum Message<E: Engine> {
    Run(Job<E>),
    Stop,
}

impl<E: Engine> Context<E> {
    /// Wrap an engine, reporting to `notify`.
    pub fn new(engine: E, notify: Arc<dyn Notify<E::Handle>>) -> Self {
        Context {
            engine,
            registrations: HashMap::new(),
            notify,
        }
    }

    /// The wrapped engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// The wrapped engine, mutably.
    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// The number of control blocks that still report to a connection.
    pub fn registered(&self) -> usize {
        self.registrations.len()
    }

    /// Create a connection with a fresh control block.
    pub fn open(&mut self) -> Result<Arc<Connection<E::Handle>>> {
        let handle = self.engine.new_handle().ok_or(Error::OutOfMemory)?;
        let conn = Connection::new();
        conn.lock().handle = Some(handle);

        self.registrations.insert(handle, Registration {
            conn: conn.clone(),
            interest: Interest { error: true, ..Interest::default() },
        });

        net_trace!("opened {:?}", handle);
        Ok(conn)
    }

    /// Bind to a local address.
    pub fn bind(&mut self, conn: &Arc<Connection<E::Handle>>, addr: Ipv4Addr, port: u16) -> Result<()> {
        let handle = conn.handle().ok_or(Error::Closed)?;
        self.engine.bind(handle, addr, port)?;
        Ok(())
    }

    /// Start listening, returning the new handle of the connection.
    ///
    /// Returns `None` if the connection was severed or the engine refused.
    pub fn listen(&mut self, conn: &Arc<Connection<E::Handle>>, backlog: u8) -> Option<E::Handle> {
        let old = conn.handle()?;
        let new = self.engine.listen(old, backlog)?;

        let mut registration = self.registrations.remove(&old).unwrap_or_else(|| Registration {
            conn: conn.clone(),
            interest: Interest::default(),
        });
        registration.interest.accept = true;
        self.registrations.insert(new, registration);

        conn.lock().handle = Some(new);
        Some(new)
    }

    /// Start connecting to a remote.
    ///
    /// `Ok` means the attempt is in progress, its outcome is reported through
    /// `Notify::connect_completed`.
    pub fn connect(&mut self, conn: &Arc<Connection<E::Handle>>, addr: Ipv4Addr, port: u16) -> Result<()> {
        let handle = conn.handle().ok_or(Error::Closed)?;

        // Attached before connecting so no data can arrive unregistered.
        let interest = &mut self.register(handle, conn).interest;
        interest.recv = true;
        interest.sent = true;
        interest.connected = true;

        self.engine.connect(handle, addr, port)?;
        Ok(())
    }

    /// Write as much of `data` as the send window allows.
    ///
    /// Returns the number of bytes queued, which may be less than requested. The caller retries
    /// the rest after `Notify::send_available`.
    pub fn send(&mut self, conn: &Arc<Connection<E::Handle>>, data: &[u8]) -> Result<usize> {
        let handle = {
            let state = conn.lock();
            match (state.handle, state.write_shutdown) {
                (Some(handle), false) => handle,
                _ => return Err(Error::Closed),
            }
        };

        let window = self.engine.send_window(handle);
        if window == 0 {
            return Err(Error::WouldBlock);
        }

        let (len, more) = if window < data.len() {
            (window, true)
        } else {
            (data.len(), false)
        };

        match self.engine.write(handle, &data[..len], more) {
            Ok(()) => {
                if let Err(err) = self.engine.output(handle) {
                    net_debug!("output of {:?} failed: {:?}", handle, err);
                }
                Ok(len)
            },
            // The engine's send queue is full.
            Err(EngineError::Mem) => Err(Error::WouldBlock),
            Err(err) => Err(err.into()),
        }
    }

    /// Shut down one or both directions.
    ///
    /// In `CloseWait` the engine frees the control block as a side effect, which severs the
    /// connection. Callers treat that like a completed close.
    pub fn shutdown(&mut self, conn: &Arc<Connection<E::Handle>>, rx: bool, tx: bool) -> Result<()> {
        let handle = conn.handle().ok_or(Error::Closed)?;

        let close_wait = self.engine.state(handle) == State::CloseWait;
        if close_wait {
            net_debug!("shutdown of {:?} in {} severs it", handle, State::CloseWait);
            conn.lock().handle = None;
        }

        if let Err(err) = self.engine.shutdown(handle, rx, tx) {
            if close_wait {
                conn.lock().handle = Some(handle);
            }
            return Err(err.into());
        }

        if close_wait {
            // The control block is gone, no further callback will arrive for it.
            self.registrations.remove(&handle);
        }

        let mut state = conn.lock();
        if rx {
            state.read_shutdown = Some(Err(Error::Closed));
        }
        if tx {
            state.write_shutdown = true;
        }
        Ok(())
    }

    /// Close the connection.
    ///
    /// Frees queued data in any case. Aborts if both directions were shut down already and
    /// closes gracefully otherwise. With `notify` set, a connection that never got established
    /// also gets its terminal notification.
    pub fn close(&mut self, conn: &Arc<Connection<E::Handle>>, notify: bool) -> Result<()> {
        let (handle, freed) = {
            let mut state = conn.lock();
            let freed = state.queue.clear();
            (state.handle.take(), freed)
        };

        let handle = match handle {
            Some(handle) => handle,
            None => return Ok(()),
        };

        net_trace!("closing {:?} in {}, freed {} segments", handle, self.engine.state(handle), freed);

        let result = match self.engine.state(handle) {
            State::Closed | State::Listen | State::SynSent => {
                let result = self.engine.close(handle);
                if result.is_ok() {
                    self.registrations.remove(&handle);
                    if notify {
                        self.notify.terminal(conn, Err(Error::Closed));
                    }
                }
                result
            },
            _ => {
                let both_shut = {
                    let state = conn.lock();
                    state.read_shutdown.is_some() && state.write_shutdown
                };

                if both_shut {
                    self.engine.abort(handle);
                    Ok(())
                } else {
                    self.engine.close(handle)
                }
            },
        };

        if let Err(err) = result {
            // Still attached, a later close may succeed.
            conn.lock().handle = Some(handle);
            return Err(err.into());
        }

        Ok(())
    }

    /// The local address of the connection.
    pub fn local_endpoint(&self, conn: &Connection<E::Handle>) -> Result<SocketAddrV4> {
        let handle = conn.handle().ok_or(Error::Closed)?;
        Ok(self.engine.local_endpoint(handle)?)
    }

    /// The remote address of the connection.
    pub fn peer_endpoint(&self, conn: &Connection<E::Handle>) -> Result<SocketAddrV4> {
        let handle = conn.handle().ok_or(Error::Closed)?;
        Ok(self.engine.remote_endpoint(handle)?)
    }

    /// Dispatch all events the engine has pending.
    ///
    /// Incoming connections that were not accepted are aborted here. Returns the number of
    /// dispatched events.
    pub fn pump(&mut self) -> usize {
        let mut count = 0;
        while let Some((handle, event)) = self.engine.poll_event() {
            let child = match event {
                Event::Accept { new, .. } => Some(new),
                _ => None,
            };

            if let (Verdict::Abort, Some(child)) = (self.dispatch(handle, event), child) {
                net_debug!("aborting unaccepted {:?}", child);
                self.engine.abort(child);
            }

            count += 1;
        }
        count
    }

    /// Handle one engine callback for `handle`.
    ///
    /// Never blocks. Events for control blocks without a connection are dropped, an incoming
    /// connection on one is rejected.
    pub fn dispatch(&mut self, handle: E::Handle, event: Event<E::Handle>) -> Verdict {
        let (conn, interest) = match self.registrations.get(&handle) {
            Some(registration) => (registration.conn.clone(), registration.interest),
            None => {
                net_debug!("event for detached {:?}: {:?}", handle, event);
                return match event {
                    Event::Accept { .. } => Verdict::Abort,
                    _ => Verdict::Ok,
                };
            },
        };

        match event {
            Event::Recv { payload: Some(payload), .. } if interest.recv => {
                self.on_data(handle, &conn, payload);
                Verdict::Ok
            },
            Event::Recv { payload: None, result: Ok(()) } if interest.recv => {
                self.on_remote_close(handle, &conn);
                Verdict::Ok
            },
            Event::Sent { available } if interest.sent => {
                self.notify.send_available(&conn, available);
                Verdict::Ok
            },
            Event::Accept { new, result } if interest.accept => {
                self.on_accept(&conn, new, result)
            },
            Event::Connected { result } if interest.connected => {
                self.notify.connect_completed(&conn, result.map_err(Error::from));
                Verdict::Ok
            },
            Event::Error { error } if interest.error => {
                self.on_error(handle, &conn, error);
                Verdict::Ok
            },
            other => {
                net_trace!("ignored {:?} for {:?}", other, handle);
                Verdict::Ok
            },
        }
    }

    fn on_data(&mut self, handle: E::Handle, conn: &Arc<Connection<E::Handle>>, payload: Bytes) {
        let len = payload.len();
        conn.lock().queue.push(payload);
        self.engine.recved(handle, len);
        self.notify.data_available(conn);
    }

    fn on_remote_close(&mut self, handle: E::Handle, conn: &Arc<Connection<E::Handle>>) {
        let severed = {
            let mut state = conn.lock();
            state.read_shutdown = Some(Ok(()));
            state.handle.is_none()
        };

        if severed {
            // The remote answered our own close.
            self.registrations.remove(&handle);
            self.notify.terminal(conn, Err(Error::Closed));
        } else {
            // Pending reads observe the end of data.
            self.notify.data_available(conn);
        }
    }

    fn on_accept(
        &mut self,
        listener: &Arc<Connection<E::Handle>>,
        new: E::Handle,
        result: core::result::Result<(), EngineError>,
    ) -> Verdict {
        let listening = match listener.handle() {
            Some(handle) => handle,
            None => return Verdict::Abort,
        };

        if let Err(err) = result {
            net_debug!("incoming {:?} on {:?} failed: {:?}", new, listening, err);
            return Verdict::Abort;
        }

        let child = match self.notify.incoming(listener) {
            Some(child) => child,
            None => return Verdict::Abort,
        };

        child.lock().handle = Some(new);
        self.registrations.insert(new, Registration {
            conn: child,
            interest: Interest { recv: true, sent: true, error: true, ..Interest::default() },
        });
        self.engine.accepted(listening);
        Verdict::Ok
    }

    fn on_error(&mut self, handle: E::Handle, conn: &Arc<Connection<E::Handle>>, error: EngineError) {
        // The engine already freed the control block.
        self.registrations.remove(&handle);

        let deferred = {
            let mut state = conn.lock();
            state.handle = None;
            if state.queue.is_empty() {
                false
            } else {
                state.read_shutdown = Some(Err(error.into()));
                true
            }
        };

        if deferred {
            // Reported by the read that drains the queue.
            self.notify.data_available(conn);
        } else {
            self.notify.terminal(conn, Err(error.into()));
        }
    }

    fn register(&mut self, handle: E::Handle, conn: &Arc<Connection<E::Handle>>) -> &mut Registration<E::Handle> {
        self.registrations.entry(handle).or_insert_with(|| Registration {
            conn: conn.clone(),
            interest: Interest { error: true, ..Interest::default() },
        })
    }
}

impl<E: Engine> Executor<E> {
    /// Start the engine thread.
    pub fn spawn(context: Context<E>) -> io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Message<E>>();

        let thread = thread::Builder::new()
            .name("tcp-engine".into())
            .spawn(move || {
                let mut context = context;
                for message in receiver {
                    match message {
                        Message::Run(job) => {
                            job(&mut context);
                            context.pump();
                        },
                        Message::Stop => break,
                    }
                }
                net_debug!("engine thread stopped");
                context
            })?;

        Ok(Executor {
            sender: Mutex::new(sender),
            thread: Some(thread),
        })
    }

    /// Queue a job.
    ///
    /// Fails with `Closed` if the engine thread is gone.
    pub fn post(&self, job: Job<E>) -> Result<()> {
        self.sender
            .lock()
            .send(Message::Run(job))
            .map_err(|_| Error::Closed)
    }

    /// Stop the engine thread after the jobs queued so far and take back its state.
    pub fn stop(mut self) -> thread::Result<Context<E>> {
        let _ = self.sender.lock().send(Message::Stop);
        match self.thread.take() {
            Some(thread) => thread.join(),
            None => Err(Box::new("engine thread already joined")),
        }
    }
}

impl<E: Engine> Drop for Executor<E> {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.sender.lock().send(Message::Stop);
        }
    }
}
