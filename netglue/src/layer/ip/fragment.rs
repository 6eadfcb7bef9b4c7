use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::storage::HoleList;
use crate::wire::{Ipv4Packet, Protocol};
use super::Config;

/// The tuple naming one fragmentable datagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identity {
    /// Source address.
    pub src: Ipv4Addr,
    /// Destination address.
    pub dst: Ipv4Addr,
    /// The encapsulated protocol.
    pub protocol: Protocol,
    /// The identification field.
    pub ident: u16,
}

/// A received byte range of one datagram.
///
/// References its backing buffer instead of copying from it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fragment {
    offset: u32,
    data: Bytes,
}

/// A completely reassembled datagram.
///
/// An ordered view over the stored fragments which together cover the datagram without gaps or
/// overlap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Datagram {
    identity: Identity,
    header: Option<Bytes>,
    fragments: Vec<Fragment>,
    len: u32,
}

/// The result of handing one fragment to the store.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The fragment completed its datagram.
    Completed(Datagram),
    /// The datagram still has holes or its length is not yet known.
    Pending,
    /// The fragment was discarded, possibly together with its whole datagram.
    Dropped(DropReason),
}

/// Why a fragment was discarded.
///
/// None of these are reported upwards. They exist for statistics, logging and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// A fragment without data that does not end the datagram.
    Empty,
    /// The payload is shorter than the declared fragment size.
    Truncated,
    /// The datagram would exceed the configured maximum size. Drops the datagram.
    Oversized,
    /// Two final fragments declared different lengths. Drops the datagram.
    ConflictingLength,
    /// Data lies beyond the declared end of the datagram. Drops the datagram.
    Inconsistent,
    /// The datagram was split into more pieces than allowed. Drops the datagram.
    TooManyFragments,
    /// No further datagram can be tracked right now.
    StoreFull,
    /// Reassembly was shut down.
    ShutDown,
}

/// Counters over the lifetime of a store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// Fragments handed to the store.
    pub received: u64,
    /// Datagrams completed.
    pub reassembled: u64,
    /// Fragments discarded, see [`DropReason`].
    ///
    /// [`DropReason`]: enum.DropReason.html
    pub dropped: u64,
    /// Datagrams removed by the timeout sweep.
    pub evicted: u64,
}

/// All datagrams currently being reassembled.
///
/// The map of datagrams has one lock, each datagram has its own. Arrivals for different
/// datagrams only contend for the short lookup while the sweep and an arrival for the same
/// datagram exclude each other. The map lock is always taken first when both are held.
pub struct FragmentStore {
    config: Config,
    contexts: Mutex<HashMap<Identity, Arc<Mutex<Context>>>>,
    /// Only changed with the map locked, so no context is created after `close` returned.
    closed: AtomicBool,
    counters: Counters,
}

/// The reassembly state of one datagram.
struct Context {
    identity: Identity,
    state: State,
    /// The data length, known once the final fragment arrived.
    total: Option<u32>,
    /// Header of the first fragment, a template for the reassembled packet.
    header: Option<Bytes>,
    /// Received fragments, sorted by offset, pairwise disjoint.
    fragments: Vec<Fragment>,
    holes: HoleList,
    /// Sweeps since the last accepted fragment.
    timeout_count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Partial,
    Complete,
    Evicted,
    Dropped,
}

enum Step {
    Pending,
    Complete(Datagram),
    Drop(DropReason),
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    reassembled: AtomicU64,
    dropped: AtomicU64,
    evicted: AtomicU64,
}

impl Fragment {
    /// Offset of the first byte within the datagram.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// One past the offset of the last byte.
    pub fn end(&self) -> u32 {
        self.offset + self.len()
    }

    /// Number of bytes.
    pub fn len(&self) -> u32 {
        // Fragments are bounded by the datagram size which fits a `u32`.
        self.data.len() as u32
    }

    /// Check if the fragment holds no data.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The bytes of this fragment.
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

impl Datagram {
    /// A datagram that arrived in one piece.
    pub fn whole(identity: Identity, header: Option<Bytes>, payload: Bytes) -> Self {
        let len = payload.len() as u32;
        let fragments = if payload.is_empty() {
            Vec::new()
        } else {
            vec![Fragment { offset: 0, data: payload }]
        };

        Datagram { identity, header, fragments, len }
    }

    /// The identity shared by all fragments.
    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// The total number of data bytes.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Check if the datagram carries no data.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The header of the first fragment, if it was recorded.
    pub fn header(&self) -> Option<&Bytes> {
        self.header.as_ref()
    }

    /// The fragments in ascending order.
    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    /// Iterate over the data in order, one chunk per stored fragment.
    pub fn chunks(&self) -> impl Iterator<Item=&[u8]> + '_ {
        self.fragments.iter().map(|fragment| &fragment.data[..])
    }

    /// Copy the data into one contiguous buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.len());
        self.chunks().for_each(|chunk| data.extend_from_slice(chunk));
        data
    }

    /// Build a complete, unfragmented IPv4 packet.
    ///
    /// The header template gets its length fixed, its fragment fields cleared and a new checksum.
    /// Returns `None` if no header was recorded or the result would not fit an IPv4 packet.
    pub fn into_packet(self) -> Option<Vec<u8>> {
        let header = self.header.as_ref()?;
        let total = u16::try_from(header.len() + self.len()).ok()?;

        let mut packet = Vec::with_capacity(usize::from(total));
        packet.extend_from_slice(header);
        self.chunks().for_each(|chunk| packet.extend_from_slice(chunk));

        let mut view = Ipv4Packet::new_unchecked(&mut packet[..]);
        view.set_total_len(total);
        view.clear_fragmentation();
        view.fill_checksum();
        Some(packet)
    }
}

impl FragmentStore {
    /// Create an empty store.
    pub fn new(config: Config) -> Self {
        FragmentStore {
            config,
            contexts: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    /// The configuration in use.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Hand one fragment to the store.
    ///
    /// `size` bytes of `payload` form the fragment at `offset`. `last` marks the fragment ending
    /// the datagram, which fixes its length.
    pub fn insert(
        &self,
        identity: Identity,
        offset: u32,
        size: u32,
        last: bool,
        payload: Bytes,
    ) -> Outcome {
        self.insert_with_header(identity, None, offset, size, last, payload)
    }

    /// Like `insert` but also records the packet header of the fragment at offset zero.
    pub fn insert_with_header(
        &self,
        identity: Identity,
        header: Option<Bytes>,
        offset: u32,
        size: u32,
        last: bool,
        payload: Bytes,
    ) -> Outcome {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        net_trace!("fragment {:?} at {} size {} last {}", identity, offset, size, last);

        match self.insert_impl(identity, header, offset, size, last, payload) {
            Outcome::Completed(datagram) => {
                self.counters.reassembled.fetch_add(1, Ordering::Relaxed);
                Outcome::Completed(datagram)
            },
            Outcome::Pending => Outcome::Pending,
            Outcome::Dropped(reason) => {
                net_debug!("dropped fragment of {:?}: {:?}", identity, reason);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Outcome::Dropped(reason)
            },
        }
    }

    fn insert_impl(
        &self,
        identity: Identity,
        header: Option<Bytes>,
        offset: u32,
        size: u32,
        last: bool,
        payload: Bytes,
    ) -> Outcome {
        if size == 0 && !last {
            return Outcome::Dropped(DropReason::Empty);
        }

        if payload.len() < size as usize {
            return Outcome::Dropped(DropReason::Truncated);
        }

        let end = match offset.checked_add(size) {
            Some(end) if end as usize <= self.config.max_datagram_size => end,
            _ => {
                self.discard(&identity, State::Dropped);
                return Outcome::Dropped(DropReason::Oversized);
            },
        };

        let payload = payload.slice(..size as usize);
        let header = header.filter(|_| offset == 0);

        loop {
            let context = match self.lookup_or_create(identity) {
                Ok(context) => context,
                Err(reason) => return Outcome::Dropped(reason),
            };

            let step = {
                let mut guard = context.lock();
                if guard.state != State::Partial {
                    // Finished while we looked it up. Unlink it so the retry starts fresh.
                    drop(guard);
                    self.unlink(&identity, &context);
                    continue;
                }

                let step = guard.accept(offset, end, last, &payload, &header, &self.config);
                match step {
                    Step::Pending => {},
                    Step::Complete(_) => guard.state = State::Complete,
                    Step::Drop(_) => guard.release(State::Dropped),
                }
                step
            };

            return match step {
                Step::Pending => Outcome::Pending,
                Step::Complete(datagram) => {
                    self.unlink(&identity, &context);
                    Outcome::Completed(datagram)
                },
                Step::Drop(reason) => {
                    self.unlink(&identity, &context);
                    Outcome::Dropped(reason)
                },
            };
        }
    }

    /// Advance the staleness of every datagram, evicting those that exceed the timeout.
    ///
    /// Returns the number of evicted datagrams.
    pub fn sweep(&self) -> usize {
        let max = self.config.max_timeout_count;
        let mut contexts = self.contexts.lock();
        let before = contexts.len();

        contexts.retain(|identity, context| {
            let mut context = context.lock();
            context.timeout_count += 1;
            if context.timeout_count > max {
                net_debug!("evicting incomplete datagram {:?}", identity);
                context.release(State::Evicted);
                false
            } else {
                true
            }
        });

        let evicted = before - contexts.len();
        self.counters.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    /// Release every datagram and refuse all further fragments.
    ///
    /// Returns the number of released datagrams.
    pub fn close(&self) -> usize {
        let drained: Vec<_> = {
            let mut contexts = self.contexts.lock();
            self.closed.store(true, Ordering::Relaxed);
            contexts.drain().collect()
        };

        for (_, context) in drained.iter() {
            context.lock().release(State::Evicted);
        }
        drained.len()
    }

    /// Check if the store was closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// The number of datagrams in reassembly.
    pub fn len(&self) -> usize {
        self.contexts.lock().len()
    }

    /// Check if no datagram is in reassembly.
    pub fn is_empty(&self) -> bool {
        self.contexts.lock().is_empty()
    }

    /// Check if a datagram is in reassembly.
    pub fn contains(&self, identity: &Identity) -> bool {
        self.contexts.lock().contains_key(identity)
    }

    /// The number of bytes stored for a datagram, if it is in reassembly.
    pub fn stored_bytes(&self, identity: &Identity) -> Option<usize> {
        let context = self.contexts.lock().get(identity)?.clone();
        let context = context.lock();
        Some(context.fragments.iter().map(|fragment| fragment.data.len()).sum())
    }

    /// The holes of a datagram, if it is in reassembly.
    pub fn holes(&self, identity: &Identity) -> Option<HoleList> {
        let context = self.contexts.lock().get(identity)?.clone();
        let holes = context.lock().holes.clone();
        Some(holes)
    }

    /// A snapshot of the counters.
    pub fn stats(&self) -> Stats {
        Stats {
            received: self.counters.received.load(Ordering::Relaxed),
            reassembled: self.counters.reassembled.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
        }
    }

    fn lookup_or_create(&self, identity: Identity) -> Result<Arc<Mutex<Context>>, DropReason> {
        let mut contexts = self.contexts.lock();
        if self.closed.load(Ordering::Relaxed) {
            return Err(DropReason::ShutDown);
        }

        if let Some(context) = contexts.get(&identity) {
            return Ok(context.clone());
        }

        if contexts.len() >= self.config.max_contexts {
            return Err(DropReason::StoreFull);
        }

        let context = Arc::new(Mutex::new(Context::new(identity)));
        contexts.insert(identity, context.clone());
        Ok(context)
    }

    /// Remove the entry for `identity` if it still refers to `context`.
    fn unlink(&self, identity: &Identity, context: &Arc<Mutex<Context>>) {
        let mut contexts = self.contexts.lock();
        if contexts.get(identity).map_or(false, |current| Arc::ptr_eq(current, context)) {
            contexts.remove(identity);
        }
    }

    fn discard(&self, identity: &Identity, state: State) {
        let removed = self.contexts.lock().remove(identity);
        if let Some(context) = removed {
            context.lock().release(state);
        }
    }
}

impl Context {
    fn new(identity: Identity) -> Self {
        Context {
            identity,
            state: State::Partial,
            total: None,
            header: None,
            fragments: Vec::new(),
            holes: HoleList::new(),
            timeout_count: 0,
        }
    }

    /// Hole-filling as described in RFC 815.
    fn accept(
        &mut self,
        offset: u32,
        end: u32,
        last: bool,
        payload: &Bytes,
        header: &Option<Bytes>,
        config: &Config,
    ) -> Step {
        let received_end = self.fragments.last().map_or(0, Fragment::end);

        match (self.total, last) {
            (Some(total), true) if total != end => {
                return Step::Drop(DropReason::ConflictingLength);
            },
            (Some(total), false) if end > total => {
                return Step::Drop(DropReason::Inconsistent);
            },
            (None, true) if received_end > end => {
                return Step::Drop(DropReason::Inconsistent);
            },
            (None, true) => {
                self.total = Some(end);
                self.holes.truncate(end);
            },
            _ => {},
        }

        for (first, covered_end) in self.holes.fill(offset, end) {
            let start = (first - offset) as usize;
            let stop = (covered_end - offset) as usize;
            let fragment = Fragment {
                offset: first,
                data: payload.slice(start..stop),
            };

            let at = self.fragments.partition_point(|stored| stored.offset < first);
            self.fragments.insert(at, fragment);
        }

        if self.fragments.len() > config.max_fragments {
            return Step::Drop(DropReason::TooManyFragments);
        }

        if self.header.is_none() {
            self.header = header.clone();
        }

        self.timeout_count = 0;

        match self.total {
            Some(len) if self.holes.is_empty() => Step::Complete(Datagram {
                identity: self.identity,
                header: self.header.take(),
                fragments: core::mem::take(&mut self.fragments),
                len,
            }),
            _ => Step::Pending,
        }
    }

    fn release(&mut self, state: State) {
        self.state = state;
        self.fragments = Vec::new();
        self.header = None;
    }
}
