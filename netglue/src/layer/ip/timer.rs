use std::io;
use std::sync::Arc;
use std::thread;

use crate::sync::CancellationGate;
use super::Reassembly;

/// The periodic sweep over all datagrams in reassembly.
///
/// Runs on its own thread, sleeping one `sweep_period` between sweeps. The thread exits when the
/// gate fires.
pub struct Timer {
    gate: Arc<CancellationGate>,
    thread: thread::JoinHandle<usize>,
}

impl Timer {
    /// Start sweeping `reassembly` until `gate` fires.
    pub fn spawn(reassembly: Arc<Reassembly>, gate: Arc<CancellationGate>) -> io::Result<Self> {
        let period = reassembly.config().sweep_period;
        let thread_gate = gate.clone();

        let thread = thread::Builder::new()
            .name("reassembly-timer".into())
            .spawn(move || {
                let mut evicted = 0;
                while !thread_gate.wait_timeout(period) {
                    evicted += reassembly.sweep();
                }
                net_debug!("reassembly timer stopped after evicting {} datagrams", evicted);
                evicted
            })?;

        Ok(Timer { gate, thread })
    }

    /// Fire the gate and wait for the thread to exit.
    ///
    /// Returns the number of datagrams the timer evicted over its lifetime.
    pub fn stop(self) -> thread::Result<usize> {
        self.gate.fire();
        self.thread.join()
    }

    /// Wait for the thread to exit after the gate was fired elsewhere.
    pub fn join(self) -> thread::Result<usize> {
        self.thread.join()
    }
}
