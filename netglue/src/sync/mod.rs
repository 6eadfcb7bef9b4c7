//! Blocking and wakeup primitives.
//!
//! Callers of the bridge block on a per-request [`Signal`] and must be released early when the
//! stack goes away. The [`CancellationGate`] is the one-shot broadcast that does so: every signal
//! registers with it for the duration of its wait, and firing the gate cancels every registered
//! signal as well as any registered afterwards.
//!
//! [`Signal`]: struct.Signal.html
//! [`CancellationGate`]: struct.CancellationGate.html
mod gate;
mod signal;

pub use self::gate::{
    Cancel,
    CancellationGate,
    Registration,
};

pub use self::signal::{
    Completer,
    Permit,
    Permits,
    Signal,
};
