use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Weak;

use parking_lot::{Condvar, Mutex};

use super::{Cancel, CancellationGate};

/// The completion signal of one pending request.
///
/// Written at most once by the engine context through a [`Completer`], read once by the thread
/// that issued the request.
///
/// [`Completer`]: struct.Completer.html
pub struct Signal<T> {
    state: Mutex<SignalState<T>>,
    cond: Condvar,
}

enum SignalState<T> {
    Waiting,
    Done(T),
    Cancelled,
    Taken,
}

/// The write end of a signal.
///
/// Dropping it without completing cancels the signal instead, so that a request whose job never
/// ran can not leave its issuer blocked.
pub struct Completer<T> {
    signal: Option<Arc<Signal<T>>>,
}

/// A bounded pool of request slots.
///
/// Every in-flight request holds one [`Permit`]. Running out of permits is how the bridge reports
/// that it could not allocate a request object.
///
/// [`Permit`]: struct.Permit.html
pub struct Permits {
    in_flight: AtomicUsize,
    limit: usize,
}

/// One slot of a `Permits` pool, released on drop.
pub struct Permit {
    pool: Arc<Permits>,
}

impl<T: Send + 'static> Signal<T> {
    /// Create a signal together with its write end.
    pub fn new() -> (Arc<Self>, Completer<T>) {
        let signal = Arc::new(Signal {
            state: Mutex::new(SignalState::Waiting),
            cond: Condvar::new(),
        });
        let completer = Completer { signal: Some(signal.clone()) };
        (signal, completer)
    }

    /// Block until the signal was completed or cancelled.
    ///
    /// The wait also ends when `gate` fires, now or at any later point. Returns `None` if the
    /// value will never be available.
    pub fn wait(self: &Arc<Self>, gate: &CancellationGate) -> Option<T> {
        let waiter: Weak<dyn Cancel> = Arc::downgrade(self) as Weak<dyn Cancel>;
        let _registration = gate.register(waiter)?;

        let mut state = self.state.lock();
        loop {
            match core::mem::replace(&mut *state, SignalState::Taken) {
                SignalState::Done(value) => return Some(value),
                SignalState::Cancelled | SignalState::Taken => return None,
                SignalState::Waiting => {
                    *state = SignalState::Waiting;
                    self.cond.wait(&mut state);
                },
            }
        }
    }

    fn complete(&self, value: T) {
        let mut state = self.state.lock();
        if let SignalState::Waiting = *state {
            *state = SignalState::Done(value);
            self.cond.notify_all();
        }
    }
}

impl<T: Send> Cancel for Signal<T> {
    fn cancel(&self) {
        let mut state = self.state.lock();
        if let SignalState::Waiting = *state {
            *state = SignalState::Cancelled;
            self.cond.notify_all();
        }
    }
}

impl<T: Send + 'static> Completer<T> {
    /// Check if the waiting side gave up, so the result would be discarded.
    pub fn is_cancelled(&self) -> bool {
        match &self.signal {
            // `Taken` without a value means the waiter observed the cancel and left.
            Some(signal) => matches!(*signal.state.lock(), SignalState::Cancelled | SignalState::Taken),
            None => true,
        }
    }

    /// Deliver the result.
    ///
    /// Has no effect if the signal was cancelled in the meantime.
    pub fn complete(mut self, value: T) {
        if let Some(signal) = self.signal.take() {
            signal.complete(value);
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(signal) = self.signal.take() {
            let mut state = signal.state.lock();
            if let SignalState::Waiting = *state {
                *state = SignalState::Cancelled;
                signal.cond.notify_all();
            }
        }
    }
}

impl Permits {
    /// A pool allowing `limit` concurrent requests.
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Permits {
            in_flight: AtomicUsize::new(0),
            limit,
        })
    }

    /// Try to take one slot.
    pub fn try_acquire(self: &Arc<Self>) -> Option<Permit> {
        let mut current = self.in_flight.load(Ordering::Relaxed);
        loop {
            if current >= self.limit {
                return None;
            }

            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(Permit { pool: self.clone() }),
                Err(actual) => current = actual,
            }
        }
    }

    /// The number of slots currently taken.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.pool.in_flight.fetch_sub(1, Ordering::Release);
    }
}

#[cfg(test)]
mod test {
    use std::thread;
    use super::*;

    #[test]
    fn completed_before_wait() {
        let gate = CancellationGate::new();
        let (signal, completer) = Signal::new();
        completer.complete(7u32);
        assert_eq!(signal.wait(&gate), Some(7));
    }

    #[test]
    fn completed_from_other_thread() {
        let gate = CancellationGate::new();
        let (signal, completer) = Signal::new();
        let worker = thread::spawn(move || completer.complete(String::from("done")));
        assert_eq!(signal.wait(&gate).as_deref(), Some("done"));
        worker.join().unwrap();
        assert_eq!(gate.waiters(), 0);
    }

    #[test]
    fn dropped_completer_cancels() {
        let gate = CancellationGate::new();
        let (signal, completer) = Signal::<u8>::new();
        drop(completer);
        assert_eq!(signal.wait(&gate), None);
    }

    #[test]
    fn fired_gate_refuses_wait() {
        let gate = CancellationGate::new();
        gate.fire();
        let (signal, completer) = Signal::new();
        completer.complete(1u8);
        assert_eq!(signal.wait(&gate), None);
    }

    #[test]
    fn fired_gate_cancels_completer() {
        let gate = std::sync::Arc::new(CancellationGate::new());
        let (signal, completer) = Signal::<u8>::new();
        assert!(!completer.is_cancelled());

        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || signal.wait(&gate))
        };
        while gate.waiters() == 0 {
            thread::yield_now();
        }
        gate.fire();

        assert_eq!(waiter.join().unwrap(), None);
        assert!(completer.is_cancelled());
    }

    #[test]
    fn permits_exhaust() {
        let pool = Permits::new(2);
        let a = pool.try_acquire().unwrap();
        let _b = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());
        drop(a);
        assert_eq!(pool.in_flight(), 1);
        assert!(pool.try_acquire().is_some());
    }
}
