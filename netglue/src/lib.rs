//! Network-layer reassembly and a blocking bridge onto a callback-driven transport engine.
//!
//! ## Table of contents
//!
//! 1. [Design](#design-and-relevant-core-concepts)
//! 2. [The ip layer: fragment reassembly](layer/ip/index.html)
//! 3. [The tcp layer: the connection bridge](layer/tcp/index.html)
//! 4. Internals
//!    1. [The storage module](storage/index.html)
//!    2. [The sync module](sync/index.html)
//!    3. [The wire module](wire/index.html)
//!
//! ## Design and relevant core concepts
//!
//! This library is the glue between the link reception path, the transport engine and the socket
//! surface of a protocol stack. It does not implement any of those three. The link layer hands in
//! fragments, the next protocol layer receives whole datagrams through a [`layer::ip::Recv`]
//! implementation, and the transport engine is reached exclusively through the
//! [`layer::tcp::engine::Engine`] trait.
//!
//! The transport engine is assumed to be single threaded. All of its state lives on one thread, the
//! engine context, and every operation on it is a job that runs there. Callers on other threads
//! still get ordinary blocking calls: each call is a pending request that is queued into the engine
//! context and waited upon. A process-wide [`sync::CancellationGate`] unblocks every such waiter,
//! present and future, once the stack shuts down.
//!
//! Fragment reassembly is independent of the engine. It is the part facing adversarial input, so
//! every resource it holds is bounded: the size of a datagram, the number of stored fragments, the
//! number of datagrams in flight and the time an incomplete datagram may linger.
#![warn(missing_docs)]
#![warn(unreachable_pub)]

#[macro_use] mod macros;
pub mod layer;
pub mod storage;
pub mod sync;
pub mod wire;
