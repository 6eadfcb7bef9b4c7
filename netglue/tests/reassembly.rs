use std::net::Ipv4Addr;
use std::sync::{Arc, Barrier};
use std::thread;

use bytes::Bytes;
use netglue::layer::ip::{Config, DropReason, FragmentStore, Identity, Outcome};
use netglue::wire::Protocol;

fn identity(ident: u16) -> Identity {
    Identity {
        src: Ipv4Addr::new(172, 16, 0, 1),
        dst: Ipv4Addr::new(172, 16, 0, 2),
        protocol: Protocol::Udp,
        ident,
    }
}

/// A small deterministic generator, good enough to shuffle.
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn below(&mut self, bound: u32) -> u32 {
        (self.next() % u64::from(bound)) as u32
    }

    fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.below(i as u32 + 1) as usize;
            items.swap(i, j);
        }
    }
}

fn pattern(len: u32) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

/// Split `0..len` into consecutive pieces.
fn split(rng: &mut XorShift, len: u32, max_piece: u32) -> Vec<(u32, u32)> {
    let mut pieces = Vec::new();
    let mut offset = 0;
    while offset < len {
        let size = (1 + rng.below(max_piece)).min(len - offset);
        pieces.push((offset, size));
        offset += size;
    }
    pieces
}

fn insert(store: &FragmentStore, id: Identity, data: &Bytes, offset: u32, size: u32) -> Outcome {
    let last = offset + size == data.len() as u32;
    let payload = data.slice(offset as usize..(offset + size) as usize);
    store.insert(id, offset, size, last, payload)
}

/// Heap's algorithm.
fn permutations(items: &mut Vec<usize>, k: usize, out: &mut Vec<Vec<usize>>) {
    if k <= 1 {
        out.push(items.clone());
        return;
    }
    for i in 0..k {
        permutations(items, k - 1, out);
        if k % 2 == 0 {
            items.swap(i, k - 1);
        } else {
            items.swap(0, k - 1);
        }
    }
}

#[test]
fn every_order_completes_once() {
    let data = Bytes::from(pattern(40));
    let pieces = [(0, 8), (8, 12), (20, 4), (24, 11), (35, 5)];

    let mut orders = Vec::new();
    permutations(&mut (0..pieces.len()).collect(), pieces.len(), &mut orders);
    assert_eq!(orders.len(), 120);

    for order in orders {
        let store = FragmentStore::new(Config::default());
        let id = identity(1);
        let mut completed = 0;

        for (n, &idx) in order.iter().enumerate() {
            let (offset, size) = pieces[idx];
            match insert(&store, id, &data, offset, size) {
                Outcome::Completed(datagram) => {
                    assert_eq!(n, pieces.len() - 1, "Completed early in {:?}", order);
                    assert_eq!(datagram.to_vec(), &data[..]);
                    completed += 1;
                },
                Outcome::Pending => {},
                Outcome::Dropped(reason) => panic!("Dropped {:?} in {:?}", reason, order),
            }
        }

        assert_eq!(completed, 1);
        assert!(store.is_empty());
    }
}

#[test]
fn shuffled_streams_complete() {
    for seed in 1..200 {
        let mut rng = XorShift(seed);
        let len = 1 + rng.below(3000);
        let data = Bytes::from(pattern(len));
        let mut pieces = split(&mut rng, len, 200);
        rng.shuffle(&mut pieces);

        let store = FragmentStore::new(Config::default());
        let id = identity(seed as u16);
        let count = pieces.len();

        for (n, (offset, size)) in pieces.into_iter().enumerate() {
            let outcome = insert(&store, id, &data, offset, size);
            if n + 1 == count {
                match outcome {
                    Outcome::Completed(datagram) => {
                        assert_eq!(datagram.len(), len as usize);
                        assert_eq!(datagram.to_vec(), &data[..]);
                    },
                    other => panic!("Seed {}: not completed: {:?}", seed, other),
                }
            } else {
                assert_eq!(outcome, Outcome::Pending, "Seed {}", seed);
                assert!(store.holes(&id).unwrap().is_well_formed());
            }
        }

        assert_eq!(store.stats().reassembled, 1);
    }
}

#[test]
fn overlaps_keep_first_arrival() {
    for seed in 1..200 {
        let mut rng = XorShift(seed * 7919);
        let len = 16 + rng.below(512);
        let store = FragmentStore::new(Config {
            max_fragments: 1024,
            ..Config::default()
        });
        let id = identity(seed as u16);

        // The first arrival for each byte, `None` while missing.
        let mut expected: Vec<Option<u8>> = vec![None; len as usize];
        let mut final_seen = false;
        let mut arrival = 0u8;

        loop {
            let offset = rng.below(len);
            let size = 1 + rng.below(len - offset);
            let end = offset + size;
            arrival = arrival.wrapping_add(1);

            // Each arrival carries its own tag so the origin of every byte is visible.
            let payload = Bytes::from(vec![arrival; size as usize]);
            let last = end == len;
            final_seen |= last;

            let new_bytes = expected[offset as usize..end as usize].iter().filter(|b| b.is_none()).count();
            for byte in &mut expected[offset as usize..end as usize] {
                byte.get_or_insert(arrival);
            }

            let complete = final_seen && expected.iter().all(Option::is_some);
            match store.insert(id, offset, size, last, payload) {
                Outcome::Completed(datagram) => {
                    assert!(complete, "Seed {}: completed with holes", seed);
                    let expected: Vec<u8> = expected.iter().map(|b| b.unwrap()).collect();
                    assert_eq!(datagram.to_vec(), expected, "Seed {}", seed);
                    break;
                },
                Outcome::Pending => {
                    assert!(!complete, "Seed {}: missed completion", seed);
                    let stored = store.stored_bytes(&id).unwrap();
                    let covered = expected.iter().filter(|b| b.is_some()).count();
                    assert_eq!(stored, covered, "Seed {}: counted {} new bytes twice", seed, new_bytes);
                    assert!(store.holes(&id).unwrap().is_well_formed());
                },
                Outcome::Dropped(reason) => panic!("Seed {}: dropped {:?}", seed, reason),
            }
        }

        assert!(store.is_empty());
    }
}

#[test]
fn eviction_after_configured_sweeps() {
    for max in 0..6 {
        let store = FragmentStore::new(Config {
            max_timeout_count: max,
            ..Config::default()
        });
        let id = identity(3);
        let payload = Bytes::from(vec![0; 64]);
        assert_eq!(store.insert(id, 64, 64, true, payload), Outcome::Pending);

        for _ in 0..max {
            assert_eq!(store.sweep(), 0);
            assert_eq!(store.stored_bytes(&id), Some(64));
        }

        assert_eq!(store.sweep(), 1);
        assert_eq!(store.stored_bytes(&id), None);
        assert!(store.is_empty());
        assert_eq!(store.stats().evicted, 1);
    }
}

#[test]
fn evicted_identity_starts_over() {
    let store = FragmentStore::new(Config {
        max_timeout_count: 0,
        ..Config::default()
    });
    let id = identity(4);
    let data = Bytes::from(pattern(16));

    assert_eq!(insert(&store, id, &data, 8, 8), Outcome::Pending);
    assert_eq!(store.sweep(), 1);
    // The back half was lost with the old context.
    assert_eq!(insert(&store, id, &data, 0, 8), Outcome::Pending);
    match insert(&store, id, &data, 8, 8) {
        Outcome::Completed(datagram) => assert_eq!(datagram.to_vec(), &data[..]),
        other => panic!("Unexpected {:?}", other),
    }
}

#[test]
fn example_two_fragments() {
    let store = FragmentStore::new(Config::default());
    let id = identity(0x4242);

    assert_eq!(store.insert(id, 10, 10, true, Bytes::from(vec![2; 10])), Outcome::Pending);
    match store.insert(id, 0, 10, false, Bytes::from(vec![1; 10])) {
        Outcome::Completed(datagram) => {
            assert_eq!(datagram.len(), 20);
            assert_eq!(datagram.identity(), id);
            assert_eq!(datagram.to_vec()[..10], [1u8; 10]);
            assert_eq!(datagram.to_vec()[10..], [2u8; 10]);
        },
        other => panic!("Unexpected {:?}", other),
    }
}

#[test]
fn oversized_stream_is_dropped() {
    let store = FragmentStore::new(Config::default());
    let id = identity(5);
    let max = store.config().max_datagram_size as u32;

    assert_eq!(store.insert(id, 0, 8, false, Bytes::from(vec![0; 8])), Outcome::Pending);
    assert_eq!(
        store.insert(id, max - 4, 8, false, Bytes::from(vec![0; 8])),
        Outcome::Dropped(DropReason::Oversized));
    assert!(store.is_empty());
}

#[test]
fn concurrent_datagrams_with_sweeps() {
    const THREADS: usize = 4;
    const PER_THREAD: u16 = 50;

    let store = Arc::new(FragmentStore::new(Config {
        max_timeout_count: 1_000,
        ..Config::default()
    }));
    let barrier = Arc::new(Barrier::new(THREADS + 1));

    let workers: Vec<_> = (0..THREADS).map(|t| {
        let (store, barrier) = (store.clone(), barrier.clone());
        thread::spawn(move || {
            barrier.wait();
            let mut rng = XorShift(t as u64 + 11);
            let mut completed = 0;
            for n in 0..PER_THREAD {
                let id = identity(t as u16 * PER_THREAD + n);
                let len = 1 + rng.below(1500);
                let data = Bytes::from(pattern(len));
                let mut pieces = split(&mut rng, len, 100);
                rng.shuffle(&mut pieces);
                for (offset, size) in pieces {
                    if let Outcome::Completed(datagram) = insert(&store, id, &data, offset, size) {
                        assert_eq!(datagram.to_vec(), &data[..]);
                        completed += 1;
                    }
                }
            }
            completed
        })
    }).collect();

    barrier.wait();
    for _ in 0..100 {
        store.sweep();
    }

    let completed: usize = workers.into_iter().map(|worker| worker.join().unwrap()).sum();
    assert_eq!(completed, THREADS * usize::from(PER_THREAD));
    assert!(store.is_empty());
    assert_eq!(store.stats().evicted, 0);
}
