//! Replays a shuffled, lossy stream of IPv4 fragments through the reassembly engine.
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use structopt::StructOpt;

use netglue::layer::FnHandler;
use netglue::layer::ip::{self, Datagram, Reassembly, Timer};
use netglue::sync::CancellationGate;
use netglue::wire::{Ipv4Packet, Protocol};

fn main() {
    let Config {
        datagrams,
        size,
        mtu,
        loss,
        seed,
        sweep_ms,
    } = Config::from_args();

    let reassembly = Arc::new(Reassembly::new(ip::Config {
        sweep_period: Duration::from_millis(sweep_ms),
        ..ip::Config::default()
    }));

    let gate = Arc::new(CancellationGate::new());
    let timer = Timer::spawn(reassembly.clone(), gate)
        .expect("Couldn't start the sweep timer");

    let mut rng = XorShift(seed | 1);
    let mut packets = Vec::new();
    for ident in 0..datagrams {
        let payload: Vec<u8> = (0..size).map(|_| rng.next() as u8).collect();
        packets.extend(fragment(ident, &payload, mtu));
    }

    for i in (1..packets.len()).rev() {
        let j = (rng.next() % (i as u64 + 1)) as usize;
        packets.swap(i, j);
    }

    let mut delivered = 0usize;
    let mut handler = FnHandler(|datagram: Datagram| {
        assert_eq!(datagram.len(), size);
        delivered += 1;
    });

    let mut lost = 0;
    for packet in packets {
        if rng.next() % 100 < u64::from(loss) {
            lost += 1;
            continue;
        }

        reassembly.receive(packet, &mut handler)
            .expect("Generated a malformed packet");
    }
    drop(handler);

    // Give the timer a chance to evict what can not complete anymore.
    let linger = Duration::from_millis(sweep_ms) * (reassembly.config().max_timeout_count + 2);
    std::thread::sleep(linger);

    let evicted = timer.stop().expect("Sweep timer panicked");
    let stats = reassembly.stats();
    println!("fragments lost:     {}", lost);
    println!("datagrams complete: {}/{}", delivered, datagrams);
    println!("datagrams evicted:  {}", evicted);
    println!("still pending:      {}", reassembly.shutdown());
    println!("{:#?}", stats);
}

/// Split a datagram into IPv4 fragments carrying at most `mtu` bytes of payload each.
fn fragment(ident: u16, payload: &[u8], mtu: usize) -> Vec<Bytes> {
    // Offsets count in units of eight octets.
    let step = (mtu.max(8) / 8) * 8;
    payload.chunks(step).enumerate().map(|(n, chunk)| {
        let offset = n * step;
        let more = offset + chunk.len() < payload.len();

        let mut packet = vec![0; 20 + chunk.len()];
        packet[0] = 0x45;
        packet[4..6].copy_from_slice(&ident.to_be_bytes());
        let flags = (if more { 0x2000u16 } else { 0 }) | (offset / 8) as u16;
        packet[6..8].copy_from_slice(&flags.to_be_bytes());
        packet[8] = 64;
        packet[9] = Protocol::Udp.into();
        packet[12..16].copy_from_slice(&Ipv4Addr::new(10, 0, 0, 1).octets());
        packet[16..20].copy_from_slice(&Ipv4Addr::new(10, 0, 0, 2).octets());
        packet[20..].copy_from_slice(chunk);

        let total = packet.len() as u16;
        let mut view = Ipv4Packet::new_unchecked(&mut packet[..]);
        view.set_total_len(total);
        view.fill_checksum();
        Bytes::from(packet)
    }).collect()
}

struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }
}

#[derive(StructOpt)]
struct Config {
    /// Number of datagrams to send.
    #[structopt(short = "n", default_value = "64")]
    datagrams: u16,
    /// Payload bytes of each datagram.
    #[structopt(short = "s", default_value = "4000")]
    size: usize,
    /// Payload bytes per fragment.
    #[structopt(long = "mtu", default_value = "576")]
    mtu: usize,
    /// Percentage of fragments to lose.
    #[structopt(long = "loss", default_value = "5")]
    loss: u8,
    #[structopt(long = "seed", default_value = "1")]
    seed: u64,
    /// Milliseconds between two sweeps.
    #[structopt(long = "sweep-ms", default_value = "50")]
    sweep_ms: u64,
}
