use core::fmt;
use byteorder::{ByteOrder, NetworkEndian};

use super::{Error, Result};

pub(crate) use super::IpProtocol as Protocol;

/// The length of an IPv6 header.
pub const HEADER_LEN: usize = 40;

/// A sixteen-octet IPv6 address.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Address(pub [u8; 16]);

impl Address {
    /// The unspecified address `::`.
    pub const UNSPECIFIED: Address = Address([0x00; 16]);

    /// The loopback address `::1`.
    pub const LOOPBACK: Address =
        Address([0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);

    /// The link-local all-nodes multicast address `ff02::1`.
    pub const LINK_LOCAL_ALL_NODES: Address =
        Address([0xff, 0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);

    /// The link-local all-routers multicast address `ff02::2`.
    pub const LINK_LOCAL_ALL_ROUTERS: Address =
        Address([0xff, 0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2]);

    /// Construct an address from eight 16-bit segments.
    pub fn new(
        a0: u16, a1: u16, a2: u16, a3: u16,
        a4: u16, a5: u16, a6: u16, a7: u16,
    ) -> Address {
        let mut bytes = [0; 16];
        for (chunk, segment) in bytes.chunks_mut(2).zip(&[a0, a1, a2, a3, a4, a5, a6, a7]) {
            NetworkEndian::write_u16(chunk, *segment);
        }
        Address(bytes)
    }

    /// Construct an address from a sequence of octets, in big-endian.
    ///
    /// # Panics
    /// The function panics if `data` is not sixteen octets long.
    pub fn from_bytes(data: &[u8]) -> Address {
        let mut bytes = [0; 16];
        bytes.copy_from_slice(data);
        Address(bytes)
    }

    /// Return the address as a sequence of octets, in big-endian.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Query whether the address is a unicast address.
    pub fn is_unicast(&self) -> bool {
        !(self.is_multicast() || self.is_unspecified())
    }

    /// Query whether the address is a multicast address.
    pub fn is_multicast(&self) -> bool {
        self.0[0] == 0xff
    }

    /// Query whether the address is the unspecified address.
    pub fn is_unspecified(&self) -> bool {
        self.0 == [0x00; 16]
    }

    /// Query whether the address is the loopback address.
    pub fn is_loopback(&self) -> bool {
        *self == Self::LOOPBACK
    }

    /// Query whether the address is a link-local unicast address.
    pub fn is_link_local(&self) -> bool {
        self.0[0] == 0xfe && self.0[1] & 0xc0 == 0x80
    }

    /// Query whether the address is an interface-local multicast address.
    pub fn is_multicast_iflocal(&self) -> bool {
        self.is_multicast() && self.0[1] & 0x0f == 0x01
    }

    /// Query whether the address is a link-local multicast address.
    pub fn is_multicast_linklocal(&self) -> bool {
        self.is_multicast() && self.0[1] & 0x0f == 0x02
    }

    /// Whether the address has constrained scope and is only meaningful
    /// together with a zone.
    ///
    /// Implements the default model of RFC 4007 where exactly the
    /// interface-local and link-local scopes are constrained.
    pub fn is_scoped(&self) -> bool {
        self.is_link_local() || self.is_multicast_iflocal() || self.is_multicast_linklocal()
    }

    /// The solicited-node multicast address corresponding to this address,
    /// `ff02::1:ffXX:XXXX` with the low 24 bits of `self`.
    pub fn solicited_node(&self) -> Address {
        let mut bytes = [0; 16];
        bytes[0] = 0xff;
        bytes[1] = 0x02;
        bytes[11] = 0x01;
        bytes[12] = 0xff;
        bytes[13..16].copy_from_slice(&self.0[13..16]);
        Address(bytes)
    }

    /// Mask the address to some prefix length.
    ///
    /// # Panics
    /// This function panics if `prefix` is greater than 128.
    pub fn mask(&self, prefix: u8) -> Address {
        assert!(prefix <= 128);
        let mut bytes = [0; 16];
        let mut remaining = usize::from(prefix);
        for (index, byte) in self.0.iter().enumerate() {
            if remaining >= 8 {
                bytes[index] = *byte;
                remaining -= 8;
            } else {
                bytes[index] = byte & !(0xffu8 >> remaining);
                break;
            }
        }
        Address(bytes)
    }

    /// The number of leading bits shared with `other`.
    ///
    /// Used as the tie-breaker of source address selection.
    pub fn common_prefix_len(&self, other: &Address) -> u8 {
        let mut prefix = 0;
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            let diff = a ^ b;
            prefix += diff.leading_zeros() as u8;
            if diff != 0 {
                break;
            }
        }
        prefix
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // Uncompressed segment notation.
        for index in 0..8 {
            if index != 0 {
                write!(f, ":")?;
            }
            write!(f, "{:x}", NetworkEndian::read_u16(&self.0[index * 2..]))?;
        }
        Ok(())
    }
}

/// An IPv6 CIDR host: an address and a prefix length.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct Cidr {
    address: Address,
    prefix_len: u8,
}

impl Cidr {
    /// Create a CIDR from the given address and prefix length.
    ///
    /// # Panics
    /// This function panics if the prefix length is larger than 128.
    pub fn new(address: Address, prefix_len: u8) -> Cidr {
        assert!(prefix_len <= 128);
        Cidr { address, prefix_len }
    }

    /// Return the address of this CIDR.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Return the prefix length of this CIDR.
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Query whether the CIDR's network contains the given address.
    pub fn contains(&self, addr: Address) -> bool {
        self.address.mask(self.prefix_len) == addr.mask(self.prefix_len)
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

/// Identifier for "no zone".
pub const ZONE_NONE: u8 = 0;

/// An IPv6 address together with its zone index.
///
/// A scoped address (link-local unicast, interface- and link-local
/// multicast) is only meaningful relative to an interface; the zone index
/// names that interface. Two zoned addresses compare equal only if both the
/// address bits and the zones match. An address may be temporarily unzoned
/// (zone index 0) before a binding or routing decision selects the zone per
/// the RFC 4007 default policy, in which the zone of a scoped address always
/// equals the interface index.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Zoned {
    pub addr: Address,
    pub zone: u8,
}

impl Zoned {
    /// Wrap an address without zone information.
    pub fn unzoned(addr: Address) -> Zoned {
        Zoned { addr, zone: ZONE_NONE }
    }

    /// Wrap an address with an explicit zone.
    pub fn new(addr: Address, zone: u8) -> Zoned {
        Zoned { addr, zone }
    }

    /// Whether a zone has been assigned.
    pub fn has_zone(&self) -> bool {
        self.zone != ZONE_NONE
    }

    /// Whether the address is scoped but no zone has been assigned yet.
    pub fn lacks_zone(&self) -> bool {
        !self.has_zone() && self.addr.is_scoped()
    }

    /// Bind the address to the zone of the given interface index.
    pub fn with_zone(self, zone: u8) -> Zoned {
        Zoned { zone, ..self }
    }

    /// Whether this address may be used through the interface with `index`.
    ///
    /// Unscoped addresses are usable everywhere; scoped addresses only
    /// within their zone.
    pub fn usable_on(&self, index: u8) -> bool {
        if !self.addr.is_scoped() {
            return true;
        }
        self.zone == index
    }
}

impl From<Address> for Zoned {
    fn from(addr: Address) -> Zoned {
        Zoned::unzoned(addr)
    }
}

impl fmt::Display for Zoned {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.has_zone() {
            write!(f, "{}%{}", self.addr, self.zone)
        } else {
            write!(f, "{}", self.addr)
        }
    }
}

/// The state of an address assigned to an interface.
///
/// Only valid states (preferred or deprecated) participate in source
/// selection; a tentative address is still in duplicate detection and a
/// duplicated one failed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressState {
    Invalid,
    Tentative,
    Preferred,
    Deprecated,
    Duplicated,
}

impl AddressState {
    /// Whether the address may be used at all.
    pub fn is_valid(self) -> bool {
        matches!(self, AddressState::Preferred | AddressState::Deprecated)
    }

    /// Whether the address is the first choice for new communication.
    pub fn is_preferred(self) -> bool {
        matches!(self, AddressState::Preferred)
    }
}

/// The remaining validity of an assigned address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    /// Valid for this many more seconds.
    Finite(u32),
    /// Never expires (a statically configured address).
    Infinite,
}

impl Lifetime {
    /// Count down by `seconds`, saturating at zero.
    pub fn advance(self, seconds: u32) -> Lifetime {
        match self {
            Lifetime::Finite(remaining) => Lifetime::Finite(remaining.saturating_sub(seconds)),
            Lifetime::Infinite => Lifetime::Infinite,
        }
    }

    /// Whether the lifetime has run out.
    pub fn is_expired(self) -> bool {
        matches!(self, Lifetime::Finite(0))
    }
}

byte_wrapper! {
    /// A byte sequence representing an IPv6 packet.
    #[derive(Debug, PartialEq, Eq)]
    pub struct ipv6([u8]);
}

mod field {
    use crate::wire::field::Field;

    pub(crate) const VER_TC_FLOW: Field = 0..4;
    pub(crate) const LENGTH: Field = 4..6;
    pub(crate) const NXT_HDR: usize = 6;
    pub(crate) const HOP_LIMIT: usize = 7;
    pub(crate) const SRC_ADDR: Field = 8..24;
    pub(crate) const DST_ADDR: Field = 24..40;
}

impl ipv6 {
    /// Imbue a raw octet buffer with IPv6 packet structure.
    pub fn new_unchecked(buffer: &[u8]) -> &ipv6 {
        Self::__from_macro_new_unchecked(buffer)
    }

    /// Imbue a mutable octet buffer with IPv6 packet structure.
    pub fn new_unchecked_mut(buffer: &mut [u8]) -> &mut ipv6 {
        Self::__from_macro_new_unchecked_mut(buffer)
    }

    /// Shorthand for a combination of [new_unchecked] and [check_len].
    ///
    /// [new_unchecked]: #method.new_unchecked
    /// [check_len]: #method.check_len
    pub fn new_checked(data: &[u8]) -> Result<&ipv6> {
        let packet = Self::new_unchecked(data);
        packet.check_len()?;
        Ok(packet)
    }

    /// View the packet as a raw byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Ensure that no accessor method will panic if called.
    pub fn check_len(&self) -> Result<()> {
        let len = self.0.len();
        if len < field::DST_ADDR.end {
            Err(Error::Truncated)
        } else if len < field::DST_ADDR.end + usize::from(self.payload_len()) {
            Err(Error::Truncated)
        } else {
            Ok(())
        }
    }

    /// Return the version field.
    #[inline]
    pub fn version(&self) -> u8 {
        self.0[0] >> 4
    }

    /// Return the payload length field.
    #[inline]
    pub fn payload_len(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::LENGTH])
    }

    /// Return the next header field.
    #[inline]
    pub fn next_header(&self) -> Protocol {
        Protocol::from(self.0[field::NXT_HDR])
    }

    /// Return the hop limit field.
    #[inline]
    pub fn hop_limit(&self) -> u8 {
        self.0[field::HOP_LIMIT]
    }

    /// Return the source address field.
    #[inline]
    pub fn src_addr(&self) -> Address {
        Address::from_bytes(&self.0[field::SRC_ADDR])
    }

    /// Return the destination address field.
    #[inline]
    pub fn dst_addr(&self) -> Address {
        Address::from_bytes(&self.0[field::DST_ADDR])
    }

    /// Set the version field to 6 and zero traffic class and flow label.
    #[inline]
    pub fn set_version_tc_flow(&mut self) {
        NetworkEndian::write_u32(&mut self.0[field::VER_TC_FLOW], 6 << 28);
    }

    /// Set the payload length field.
    #[inline]
    pub fn set_payload_len(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::LENGTH], value)
    }

    /// Set the next header field.
    #[inline]
    pub fn set_next_header(&mut self, value: Protocol) {
        self.0[field::NXT_HDR] = value.into()
    }

    /// Set the hop limit field.
    #[inline]
    pub fn set_hop_limit(&mut self, value: u8) {
        self.0[field::HOP_LIMIT] = value
    }

    /// Set the source address field.
    #[inline]
    pub fn set_src_addr(&mut self, value: Address) {
        self.0[field::SRC_ADDR].copy_from_slice(value.as_bytes())
    }

    /// Set the destination address field.
    #[inline]
    pub fn set_dst_addr(&mut self, value: Address) {
        self.0[field::DST_ADDR].copy_from_slice(value.as_bytes())
    }
}

impl AsRef<[u8]> for ipv6 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A high-level representation of an IPv6 header.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Repr {
    pub src_addr: Address,
    pub dst_addr: Address,
    pub next_header: Protocol,
    pub payload_len: usize,
    pub hop_limit: u8,
}

impl Repr {
    /// Parse an IPv6 packet and return a high-level representation.
    pub fn parse(packet: &ipv6) -> Result<Repr> {
        packet.check_len()?;
        if packet.version() != 6 {
            return Err(Error::Malformed);
        }

        Ok(Repr {
            src_addr: packet.src_addr(),
            dst_addr: packet.dst_addr(),
            next_header: packet.next_header(),
            payload_len: packet.payload_len().into(),
            hop_limit: packet.hop_limit(),
        })
    }

    /// Return the header length of the emitted packet.
    pub fn buffer_len(&self) -> usize {
        HEADER_LEN
    }

    /// Emit this high-level representation into a packet buffer.
    pub fn emit(&self, packet: &mut ipv6) {
        packet.set_version_tc_flow();
        packet.set_payload_len(self.payload_len as u16);
        packet.set_next_header(self.next_header);
        packet.set_hop_limit(self.hop_limit);
        packet.set_src_addr(self.src_addr);
        packet.set_dst_addr(self.dst_addr);
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "IPv6 src={} dst={} nxt={}", self.src_addr, self.dst_addr, self.next_header)
    }
}
