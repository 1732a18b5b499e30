//! A standalone library implementing the core of a userspace TCP/IP stack.
//!
//! ## Design and relevant core concepts
//!
//! The library is organized in three tiers. The [`wire`] module interprets
//! and constructs packet bytes; it knows nothing about state. The [`layer`]
//! modules hold the per-protocol state machines: IP input/output, the UDP
//! endpoint table and the IGMPv2 group membership machinery. They operate on
//! [`buffer::PacketBuf`] chains handed to them with moved ownership. The
//! [`stack`] module ties the layers to a set of [`iface::Interface`]s, a
//! timer wheel and a random source, and is the single entry point for link
//! input, timer ticks and application sends.
//!
//! Everything behind [`stack::Stack`] runs under one logical lock: all entry
//! points take `&mut self`, so no two handlers ever observe the same
//! endpoint, group or interface concurrently. An implementation may put the
//! `Stack` behind a mutex or drive it from a dedicated worker thread; either
//! satisfies the contract the protocol modules rely on.
//!
//! Buffers are never shared. A pipeline stage that wants to fan a packet out
//! to several receivers clones it explicitly; everyone else receives the
//! buffer by value and is responsible for it from then on.
//!
//! [`wire`]: wire/index.html
//! [`layer`]: layer/index.html
//! [`buffer::PacketBuf`]: buffer/struct.PacketBuf.html
//! [`stack`]: stack/index.html
//! [`iface::Interface`]: iface/struct.Interface.html
//! [`stack::Stack`]: stack/struct.Stack.html
#![warn(unreachable_pub)]

// tests should be able to use `std`
#![cfg_attr(all(
    not(feature = "std"),
    not(test)),
no_std)]

extern crate alloc;

#[macro_use] mod macros;
pub mod buffer;
pub mod iface;
pub mod layer;
pub mod nic;
pub mod rand;
pub mod stack;
pub mod time;
pub mod wire;
