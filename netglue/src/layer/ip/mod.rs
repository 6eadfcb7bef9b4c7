//! The ip layer, reduced to fragment reassembly.
//!
//! Fragments are handed to a [`Reassembly`] which tracks one context per datagram identity and
//! forwards every completed datagram to a [`Recv`] handler. A [`Timer`] thread sweeps the
//! contexts periodically so that datagrams whose remaining fragments never arrive are released.
//!
//! Nothing in this layer reports errors to the sender of a fragment. Fragments that can not be
//! used are dropped, counted and logged.
//!
//! [`Reassembly`]: struct.Reassembly.html
//! [`Recv`]: trait.Recv.html
//! [`Timer`]: struct.Timer.html
use core::time::Duration;

use bytes::Bytes;

use crate::wire::{self, Ipv4Packet};
use super::FnHandler;

mod fragment;
mod timer;

pub use self::fragment::{
    Datagram,
    DropReason,
    Fragment,
    FragmentStore,
    Identity,
    Outcome,
    Stats,
};

pub use self::timer::Timer;

/// Limits of the reassembly engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// The largest datagram, in bytes of data, that will be put together.
    pub max_datagram_size: usize,

    /// Number of sweeps a datagram may survive without receiving a fragment.
    ///
    /// The timeout is this many `sweep_period`s. A datagram is evicted by the first sweep that
    /// finds it idle for more than `max_timeout_count` sweeps.
    pub max_timeout_count: u32,

    /// Time between two sweeps of the timer.
    pub sweep_period: Duration,

    /// The number of distinct fragments stored for one datagram.
    pub max_fragments: usize,

    /// The number of datagrams in reassembly at the same time.
    pub max_contexts: usize,
}

/// The next layer, receiving whole datagrams.
pub trait Recv {
    /// Inspect one completed datagram.
    fn receive(&mut self, datagram: Datagram);
}

/// The process wide reassembly state.
///
/// Created once by the owning subsystem and shared with the reception path and the [`Timer`].
/// After [`shutdown`] all contexts are released and every further fragment is dropped.
///
/// [`Timer`]: struct.Timer.html
/// [`shutdown`]: #method.shutdown
pub struct Reassembly {
    store: FragmentStore,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_datagram_size: 65_535,
            max_timeout_count: 3,
            sweep_period: Duration::from_secs(1),
            max_fragments: 64,
            max_contexts: 4_096,
        }
    }
}

impl Reassembly {
    /// Initialize the reassembly state.
    pub fn new(config: Config) -> Self {
        Reassembly {
            store: FragmentStore::new(config),
        }
    }

    /// The underlying store of datagrams.
    pub fn store(&self) -> &FragmentStore {
        &self.store
    }

    /// The configuration in use.
    pub fn config(&self) -> &Config {
        self.store.config()
    }

    /// Handle one fragment.
    ///
    /// See [`FragmentStore::insert`] for the meaning of the arguments.
    ///
    /// [`FragmentStore::insert`]: struct.FragmentStore.html#method.insert
    pub fn on_fragment(
        &self,
        identity: Identity,
        offset: u32,
        size: u32,
        last: bool,
        payload: Bytes,
    ) -> Outcome {
        if self.is_shut_down() {
            return Outcome::Dropped(DropReason::ShutDown);
        }

        self.store.insert(identity, offset, size, last, payload)
    }

    /// Handle one fragment, forwarding its datagram to `recv` if it was the last missing one.
    pub fn deliver(
        &self,
        identity: Identity,
        offset: u32,
        size: u32,
        last: bool,
        payload: Bytes,
        recv: &mut impl Recv,
    ) -> Option<DropReason> {
        Self::forward(self.on_fragment(identity, offset, size, last, payload), recv)
    }

    /// Handle a raw IPv4 packet.
    ///
    /// Unfragmented packets are handed through as a datagram of their own. Fragments are
    /// reassembled and the header of the first one is kept as the header of the datagram, see
    /// [`Datagram::into_packet`].
    ///
    /// [`Datagram::into_packet`]: struct.Datagram.html#method.into_packet
    pub fn on_packet(&self, packet: Bytes) -> wire::Result<Outcome> {
        let repr = Ipv4Packet::new_checked(&packet[..])?.repr();
        let identity = Identity {
            src: repr.src_addr,
            dst: repr.dst_addr,
            protocol: repr.protocol,
            ident: repr.ident,
        };

        let header = packet.slice(..repr.header_len);
        let payload = packet.slice(repr.header_len..repr.header_len + repr.payload_len);

        if self.is_shut_down() {
            return Ok(Outcome::Dropped(DropReason::ShutDown));
        }

        if repr.frag_offset == 0 && !repr.more_frags {
            return Ok(Outcome::Completed(Datagram::whole(identity, Some(header), payload)));
        }

        // The payload length is bounded by the 16-bit total length.
        let size = repr.payload_len as u32;
        Ok(self.store.insert_with_header(
            identity,
            Some(header),
            repr.frag_offset,
            size,
            !repr.more_frags,
            payload))
    }

    /// Handle a raw IPv4 packet, forwarding completed datagrams to `recv`.
    pub fn receive(&self, packet: Bytes, recv: &mut impl Recv) -> wire::Result<Option<DropReason>> {
        let outcome = self.on_packet(packet)?;
        Ok(Self::forward(outcome, recv))
    }

    /// Advance all datagrams by one sweep period.
    pub fn sweep(&self) -> usize {
        self.store.sweep()
    }

    /// Release all datagrams and refuse further fragments.
    ///
    /// Returns the number of released datagrams.
    pub fn shutdown(&self) -> usize {
        let released = self.store.close();
        net_debug!("reassembly shut down, released {} datagrams", released);
        released
    }

    /// Check if `shutdown` was called.
    pub fn is_shut_down(&self) -> bool {
        self.store.is_closed()
    }

    /// A snapshot of the counters.
    pub fn stats(&self) -> Stats {
        self.store.stats()
    }

    fn forward(outcome: Outcome, recv: &mut impl Recv) -> Option<DropReason> {
        match outcome {
            Outcome::Completed(datagram) => {
                recv.receive(datagram);
                None
            },
            Outcome::Pending => None,
            Outcome::Dropped(reason) => Some(reason),
        }
    }
}

impl<F> Recv for FnHandler<F>
    where F: FnMut(Datagram)
{
    fn receive(&mut self, datagram: Datagram) {
        self.0(datagram)
    }
}
