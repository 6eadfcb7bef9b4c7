use std::collections::HashMap;
use std::sync::Weak;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Something blocked that can be released by the gate.
pub trait Cancel: Send + Sync {
    /// Release the waiter.
    ///
    /// Must not block, it is called while the gate walks all of its waiters.
    fn cancel(&self);
}

/// A one-shot, broadcast shutdown signal.
///
/// Once fired it stays fired. Every waiter registered at that time is cancelled immediately and
/// every later attempt to register fails, so no wait can outlive the shutdown.
pub struct CancellationGate {
    state: Mutex<GateState>,
    /// For waiters that block on the gate itself, see [`wait_timeout`].
    ///
    /// [`wait_timeout`]: #method.wait_timeout
    fired_cond: Condvar,
}

struct GateState {
    fired: bool,
    next_key: u64,
    waiters: HashMap<u64, Weak<dyn Cancel>>,
}

/// Membership of one waiter in the gate.
///
/// Dropping it removes the waiter again, on every path out of the wait.
pub struct Registration<'a> {
    gate: &'a CancellationGate,
    key: u64,
}

impl CancellationGate {
    /// Create a gate that has not fired.
    pub fn new() -> Self {
        CancellationGate {
            state: Mutex::new(GateState {
                fired: false,
                next_key: 0,
                waiters: HashMap::new(),
            }),
            fired_cond: Condvar::new(),
        }
    }

    /// Check whether shutdown has begun.
    pub fn is_fired(&self) -> bool {
        self.state.lock().fired
    }

    /// Fire the gate, cancelling all current waiters.
    ///
    /// Firing more than once has no further effect.
    pub fn fire(&self) {
        let waiters = {
            let mut state = self.state.lock();
            if state.fired {
                return;
            }
            state.fired = true;
            core::mem::take(&mut state.waiters)
        };

        net_debug!("cancellation gate fired, releasing {} waiters", waiters.len());
        self.fired_cond.notify_all();

        // Outside the lock so that a waiter may deregister concurrently.
        for waiter in waiters.into_values() {
            if let Some(waiter) = waiter.upgrade() {
                waiter.cancel();
            }
        }
    }

    /// Register a waiter to be cancelled when the gate fires.
    ///
    /// Returns `None` if the gate has already fired, in which case the caller must not wait at
    /// all.
    pub fn register(&self, waiter: Weak<dyn Cancel>) -> Option<Registration<'_>> {
        let mut state = self.state.lock();
        if state.fired {
            return None;
        }

        let key = state.next_key;
        state.next_key += 1;
        state.waiters.insert(key, waiter);
        Some(Registration { gate: self, key })
    }

    /// Block for at most `timeout` or until the gate fires.
    ///
    /// Returns whether the gate has fired. Used by periodic workers to sleep between their
    /// rounds without delaying shutdown.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.fired {
            if self.fired_cond.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.fired
    }

    /// The number of currently registered waiters.
    pub fn waiters(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

impl Default for CancellationGate {
    fn default() -> Self {
        CancellationGate::new()
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.gate.state.lock().waiters.remove(&self.key);
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use super::*;

    #[derive(Default)]
    struct Count(AtomicUsize);

    impl Cancel for Count {
        fn cancel(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn fire_cancels_registered() {
        let gate = CancellationGate::new();
        let count = Arc::new(Count::default());
        let weak: Weak<dyn Cancel> = Arc::downgrade(&count) as Weak<dyn Cancel>;
        let registration = gate.register(weak).unwrap();
        assert_eq!(gate.waiters(), 1);

        gate.fire();
        gate.fire();
        assert_eq!(count.0.load(Ordering::SeqCst), 1);
        drop(registration);
        assert_eq!(gate.waiters(), 0);
    }

    #[test]
    fn deregistered_not_cancelled() {
        let gate = CancellationGate::new();
        let count = Arc::new(Count::default());
        let weak: Weak<dyn Cancel> = Arc::downgrade(&count) as Weak<dyn Cancel>;
        drop(gate.register(weak).unwrap());
        assert_eq!(gate.waiters(), 0);

        gate.fire();
        assert_eq!(count.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn late_registration_refused() {
        let gate = CancellationGate::new();
        gate.fire();
        let count = Arc::new(Count::default());
        let weak: Weak<dyn Cancel> = Arc::downgrade(&count) as Weak<dyn Cancel>;
        assert!(gate.register(weak).is_none());
        assert!(gate.is_fired());
    }

    #[test]
    fn wait_timeout_expires() {
        let gate = CancellationGate::new();
        assert!(!gate.wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn wait_timeout_wakes_on_fire() {
        let gate = Arc::new(CancellationGate::new());
        let waiter = {
            let gate = gate.clone();
            std::thread::spawn(move || gate.wait_timeout(Duration::from_secs(60)))
        };
        gate.fire();
        assert!(waiter.join().unwrap());
    }
}
