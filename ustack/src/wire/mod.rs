/*! Low-level packet access and construction.

# An overview over packet representations

The `wire` module deals with the packet *representation*. It provides two
levels of functionality.

 * First, it provides functions to extract fields from sequences of octets,
   and to insert fields into sequences of octets. This happens in the
   lowercase structures, e.g. [`ipv4_packet`] or [`udp_packet`]. These are
   dynamically sized types wrapping the raw octets.
 * Second, it provides a compact, high-level representation of header data
   that can be created from parsing and emitted into a sequence of octets.
   This happens through the `Repr` family of structs and enums, e.g.
   [`Ipv4Repr`] or [`IgmpRepr`].

The `Repr::parse()` methods never panic on buffers accepted by the
corresponding `check_len()`, and `Repr::emit()` never panics as long as the
underlying buffer is at least `Repr::buffer_len()` octets long.

When parsing untrusted input it is *necessary* to use `new_checked`; so long
as the buffer is not modified afterwards, no accessor will fail.

[`ipv4_packet`]: struct.ipv4.html
[`udp_packet`]: struct.udp.html
[`Ipv4Repr`]: struct.Ipv4Repr.html
[`IgmpRepr`]: enum.IgmpRepr.html
*/
#![allow(missing_docs)]

mod field {
    pub(crate) type Field = ::core::ops::Range<usize>;
    pub(crate) type Rest = ::core::ops::RangeFrom<usize>;
}

mod error;
pub(crate) mod ip;
mod ipv4;
mod ipv6;
mod igmp;
mod tcp;
mod udp;

/// Describes how to handle checksums.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Checksum {
    /// Checksum must be computed or checked manually.
    Manual,

    /// The checksum field is filled or checked by the NIC.
    Ignored,
}

pub use self::error::{
    Error,
    Result};

pub use self::ip::{
    Version as IpVersion,
    Protocol as IpProtocol,
    Address as IpAddress,
    Endpoint as IpEndpoint,
    checksum::Accum as ChecksumAccum,
    pseudo_header_checksum,
    pseudo_header_checksum_partial};

pub use self::ipv4::{
    ipv4 as ipv4_packet,
    Address as Ipv4Address,
    Cidr as Ipv4Cidr,
    Subnet as Ipv4Subnet,
    Repr as Ipv4Repr,
    ROUTER_ALERT_OPTION as IPV4_ROUTER_ALERT_OPTION,
    HEADER_LEN as IPV4_HEADER_LEN};

pub use self::ipv6::{
    ipv6 as ipv6_packet,
    Address as Ipv6Address,
    Cidr as Ipv6Cidr,
    Zoned as Ipv6Zoned,
    AddressState as Ipv6AddressState,
    Lifetime as Ipv6Lifetime,
    Repr as Ipv6Repr,
    ZONE_NONE as IPV6_ZONE_NONE,
    HEADER_LEN as IPV6_HEADER_LEN};

pub use self::igmp::{
    igmp as igmp_packet,
    Message as IgmpMessage,
    Repr as IgmpRepr,
    HEADER_LEN as IGMP_HEADER_LEN};

pub use self::tcp::{
    tcp as tcp_packet,
    Flags as TcpFlags,
    HEADER_LEN as TCP_HEADER_LEN};

pub use self::udp::{
    udp as udp_packet,
    Checksum as UdpChecksum,
    Repr as UdpRepr,
    HEADER_LEN as UDP_HEADER_LEN};

impl Checksum {
    /// Check if a checksum should be calculated by the library.
    ///
    /// Otherwise it is ignored due to the assumption that it was offloaded or
    /// is otherwise undesirable to check.
    pub fn manual(self) -> bool {
        match self {
            Checksum::Manual => true,
            Checksum::Ignored => false,
        }
    }
}
