//! Just enough of the IPv4 wire format to feed the reassembly engine.
//!
//! Header validation and checksum verification of received packets belongs to the receive path
//! in front of this crate. What remains here is the extraction of the fields that identify a
//! fragment and the rewrite of a header template once its datagram has been put back together.
use core::fmt;

pub mod ipv4;

pub use self::ipv4::{
    Packet as Ipv4Packet,
    Repr as Ipv4Repr,
};

/// The error type for the wire module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// An operation cannot proceed because a buffer is empty or full.
    #[error("buffer too small")]
    Truncated,

    /// An incoming packet could not be parsed because some of its fields were out of bounds
    /// of the received data.
    #[error("malformed packet")]
    Malformed,

    /// An incoming packet had a version or option this crate does not handle.
    #[error("unsupported packet")]
    Unsupported,
}

/// The result type for the wire module.
pub type Result<T> = core::result::Result<T, Error>;

enum_with_unknown! {
    /// IP datagram encapsulated protocol.
    pub enum Protocol(u8) {
        /// Internet control message protocol.
        Icmp = 0x01,
        /// Internet group management protocol.
        Igmp = 0x02,
        /// Transmission control protocol.
        Tcp  = 0x06,
        /// User datagram protocol.
        Udp  = 0x11,
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Protocol::Icmp => write!(f, "ICMP"),
            Protocol::Igmp => write!(f, "IGMP"),
            Protocol::Tcp  => write!(f, "TCP"),
            Protocol::Udp  => write!(f, "UDP"),
            Protocol::Unknown(id) => write!(f, "0x{:02x}", id),
        }
    }
}

pub(crate) mod checksum {
    use byteorder::{ByteOrder, NetworkEndian};

    fn propagate_carries(word: u32) -> u16 {
        let sum = (word >> 16) + (word & 0xffff);
        ((sum >> 16) as u16) + (sum as u16)
    }

    /// Compute an RFC 1071 compliant checksum (without the final complement).
    pub(crate) fn data(mut data: &[u8]) -> u16 {
        let mut accum = 0;

        while data.len() >= 2 {
            accum += NetworkEndian::read_u16(data) as u32;
            data = &data[2..];
        }

        // Add the last remaining odd byte, if any.
        if let Some(&value) = data.first() {
            accum += (value as u32) << 8;
        }

        propagate_carries(accum)
    }
}
