//! PPP link companions for the `ustack` core.
//!
//! Two stateful pieces ride on a PPP link next to the IP traffic and are
//! collected here:
//!
//! * [`chap`]: the MS-CHAP and MS-CHAPv2 authentication exchanges
//!   (RFC 2433, RFC 2759), including the [`mppe`] session key derivation
//!   (RFC 3079) that arms link encryption once authentication succeeds.
//! * [`vj`]: Van Jacobson TCP/IP header compression (RFC 1144), the
//!   stateful wire codec that shrinks interactive TCP headers to a few
//!   octets per packet.
//!
//! Both sides operate on the same [`PacketBuf`] currency as the stack core
//! and run under its serialization contract: nothing in here is
//! re-entrant, nothing blocks.
//!
//! [`chap`]: chap/index.html
//! [`mppe`]: mppe/index.html
//! [`vj`]: vj/index.html
//! [`PacketBuf`]: ../ustack/buffer/struct.PacketBuf.html
#![warn(unreachable_pub)]

// tests should be able to use `std`
#![cfg_attr(all(
    not(feature = "std"),
    not(test)),
no_std)]

extern crate alloc;

pub mod chap;
pub mod mppe;
pub mod vj;
