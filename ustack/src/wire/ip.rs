use core::fmt;

use super::{Ipv4Address, Ipv4Cidr, Ipv6Address};

/// Internet protocol version.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Version {
    Ipv4,
    Ipv6,
}

impl Version {
    /// Return the version of an IP packet stored in the provided buffer.
    ///
    /// Unknown versions result in `Err(Error::Unrecognized)`.
    pub fn of_packet(data: &[u8]) -> super::Result<Version> {
        if data.is_empty() {
            return Err(super::Error::Truncated);
        }
        match data[0] >> 4 {
            4 => Ok(Version::Ipv4),
            6 => Ok(Version::Ipv6),
            _ => Err(super::Error::Unrecognized),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Version::Ipv4 => write!(f, "IPv4"),
            Version::Ipv6 => write!(f, "IPv6"),
        }
    }
}

enum_with_unknown! {
    /// IP datagram encapsulated protocol.
    pub enum Protocol(u8) {
        Icmp    = 0x01,
        Igmp    = 0x02,
        Tcp     = 0x06,
        Udp     = 0x11,
        Icmpv6  = 0x3a,
        UdpLite = 0x88
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Protocol::Icmp        => write!(f, "ICMP"),
            Protocol::Igmp        => write!(f, "IGMP"),
            Protocol::Tcp         => write!(f, "TCP"),
            Protocol::Udp         => write!(f, "UDP"),
            Protocol::Icmpv6      => write!(f, "ICMPv6"),
            Protocol::UdpLite     => write!(f, "UDPLite"),
            Protocol::Unknown(id) => write!(f, "0x{:02x}", id),
        }
    }
}

/// An internetworking address.
///
/// The [`Any`] variant is the dual-stack wildcard: an endpoint whose local
/// address is `Any` listens for both families at once. It is distinct from
/// the per-family unspecified addresses `0.0.0.0` and `::`, which fix the
/// family but leave the host unbound.
///
/// [`Any`]: #variant.Any
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Address {
    /// The dual-stack wildcard, matching either family.
    Any,

    /// An IPv4 address.
    Ipv4(Ipv4Address),

    /// An IPv6 address.
    Ipv6(Ipv6Address),
}

impl Address {
    /// Create an address wrapping an IPv4 address with the given octets.
    pub const fn v4(a0: u8, a1: u8, a2: u8, a3: u8) -> Address {
        Address::Ipv4(Ipv4Address::new(a0, a1, a2, a3))
    }

    /// Create an address wrapping an IPv6 address with the given segments.
    pub fn v6(
        a0: u16, a1: u16, a2: u16, a3: u16,
        a4: u16, a5: u16, a6: u16, a7: u16,
    ) -> Address {
        Address::Ipv6(Ipv6Address::new(a0, a1, a2, a3, a4, a5, a6, a7))
    }

    /// Return an address as a sequence of octets, in big-endian.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Address::Any => &[],
            Address::Ipv4(addr) => addr.as_bytes(),
            Address::Ipv6(addr) => addr.as_bytes(),
        }
    }

    /// The IP version of this address, if it names one.
    pub fn version(&self) -> Option<Version> {
        match self {
            Address::Any => None,
            Address::Ipv4(_) => Some(Version::Ipv4),
            Address::Ipv6(_) => Some(Version::Ipv6),
        }
    }

    /// Whether this is the dual-stack wildcard.
    pub fn is_any_type(&self) -> bool {
        matches!(self, Address::Any)
    }

    /// Whether this address can stand in for `version`.
    ///
    /// The dual-stack wildcard is compatible with both versions.
    pub fn accepts_version(&self, version: Version) -> bool {
        match self.version() {
            None => true,
            Some(own) => own == version,
        }
    }

    /// Query whether the address is a valid unicast address.
    pub fn is_unicast(&self) -> bool {
        match self {
            Address::Any => false,
            Address::Ipv4(addr) => addr.is_unicast(),
            Address::Ipv6(addr) => addr.is_unicast(),
        }
    }

    /// Query whether the address is a valid multicast address.
    pub fn is_multicast(&self) -> bool {
        match self {
            Address::Any => false,
            Address::Ipv4(addr) => addr.is_multicast(),
            Address::Ipv6(addr) => addr.is_multicast(),
        }
    }

    /// Query whether the address is the IPv4 limited broadcast address.
    pub fn is_global_broadcast(&self) -> bool {
        match self {
            Address::Ipv4(addr) => addr.is_broadcast(),
            _ => false,
        }
    }

    /// Query whether the address is unbound.
    ///
    /// True for the dual-stack wildcard and the unspecified address of
    /// either family.
    pub fn is_unspecified(&self) -> bool {
        match self {
            Address::Any => true,
            Address::Ipv4(addr) => addr.is_unspecified(),
            Address::Ipv6(addr) => addr.is_unspecified(),
        }
    }

    /// Whether this is an IPv4 broadcast for the given on-link subnet.
    ///
    /// Covers both the limited broadcast 255.255.255.255 and the directed
    /// broadcast of `subnet`.
    pub fn is_broadcast(&self, subnet: Option<Ipv4Cidr>) -> bool {
        match self {
            Address::Ipv4(addr) => {
                addr.is_broadcast()
                    || subnet
                        .and_then(|cidr| cidr.broadcast())
                        .map_or(false, |bcast| *addr == bcast)
            }
            _ => false,
        }
    }
}

impl Default for Address {
    fn default() -> Address {
        Address::Any
    }
}

impl From<Ipv4Address> for Address {
    fn from(addr: Ipv4Address) -> Self {
        Address::Ipv4(addr)
    }
}

impl From<Ipv6Address> for Address {
    fn from(addr: Ipv6Address) -> Self {
        Address::Ipv6(addr)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Address::Any => write!(f, "*"),
            Address::Ipv4(addr) => write!(f, "{}", addr),
            Address::Ipv6(addr) => write!(f, "{}", addr),
        }
    }
}

/// An internet endpoint address.
///
/// An endpoint can be constructed from a port, in which case the address is
/// the dual-stack wildcard.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Endpoint {
    pub addr: Address,
    pub port: u16,
}

impl Endpoint {
    /// An endpoint with wildcard address and port.
    pub const UNSPECIFIED: Endpoint = Endpoint { addr: Address::Any, port: 0 };

    /// Create an endpoint address from given address and port.
    pub fn new(addr: Address, port: u16) -> Endpoint {
        Endpoint { addr, port }
    }

    /// Query whether the endpoint has a specified address and port.
    pub fn is_specified(&self) -> bool {
        !self.addr.is_unspecified() && self.port != 0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

impl From<u16> for Endpoint {
    fn from(port: u16) -> Endpoint {
        Endpoint { addr: Address::Any, port }
    }
}

impl<T: Into<Address>> From<(T, u16)> for Endpoint {
    fn from((addr, port): (T, u16)) -> Endpoint {
        Endpoint { addr: addr.into(), port }
    }
}

pub(crate) mod checksum {
    use byteorder::{ByteOrder, NetworkEndian};

    fn propagate_carries(word: u32) -> u16 {
        let sum = (word >> 16) + (word & 0xffff);
        ((sum >> 16) as u16) + (sum as u16)
    }

    /// An RFC 1071 checksum accumulator.
    ///
    /// Accepts data in arbitrarily segmented slices, so that a buffer chain
    /// checksums to the same value as the concatenation of its segments. The
    /// parity flag carries the straddling byte across odd-length segments.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct Accum {
        sum: u32,
        odd: bool,
    }

    impl Accum {
        pub fn new() -> Self {
            Accum::default()
        }

        /// Fold the next data segment into the sum.
        pub fn push(&mut self, data: &[u8]) {
            let mut data = data;
            if self.odd && !data.is_empty() {
                // Completes the word whose high octet ended the previous
                // segment.
                self.sum += u32::from(data[0]);
                data = &data[1..];
                self.odd = false;
            }
            while data.len() >= 2 {
                self.sum += u32::from(NetworkEndian::read_u16(data));
                data = &data[2..];
            }
            if let Some(&value) = data.first() {
                self.sum += u32::from(value) << 8;
                self.odd = true;
            }
        }

        /// Fold a ready-made 16-bit word into the sum.
        ///
        /// Must not be interleaved with a pending odd byte.
        pub fn push_word(&mut self, word: u16) {
            debug_assert!(!self.odd);
            self.sum += u32::from(word);
        }

        /// The accumulated checksum, without the final complement.
        pub fn finish(self) -> u16 {
            propagate_carries(self.sum)
        }
    }

    /// Compute an RFC 1071 compliant checksum (without the final complement).
    pub(crate) fn data(data: &[u8]) -> u16 {
        let mut accum = Accum::new();
        accum.push(data);
        accum.finish()
    }

    /// Combine several RFC 1071 compliant checksums.
    pub(crate) fn combine(checksums: &[u16]) -> u16 {
        let mut accum: u32 = 0;
        for &word in checksums {
            accum += u32::from(word);
        }
        propagate_carries(accum)
    }
}

use self::checksum::Accum;

/// Compute an IP pseudo-header checksum (without the final complement).
///
/// The `length` is the value placed into the pseudo-header length field: the
/// transport datagram length for UDP and TCP, the full datagram length for
/// UDPLite.
///
/// # Panics
/// This function panics unless both addresses are concrete and of the same
/// family.
pub fn pseudo_header_checksum(
    src_addr: &Address,
    dst_addr: &Address,
    protocol: Protocol,
    length: u32,
) -> u16 {
    use byteorder::{ByteOrder, NetworkEndian};

    match (src_addr, dst_addr) {
        (Address::Ipv4(src_addr), Address::Ipv4(dst_addr)) => {
            let mut proto_len = [0u8; 4];
            proto_len[1] = protocol.into();
            NetworkEndian::write_u16(&mut proto_len[2..4], length as u16);

            checksum::combine(&[
                checksum::data(src_addr.as_bytes()),
                checksum::data(dst_addr.as_bytes()),
                checksum::data(&proto_len[..]),
            ])
        }

        (Address::Ipv6(src_addr), Address::Ipv6(dst_addr)) => {
            let mut proto_len = [0u8; 8];
            proto_len[7] = protocol.into();
            NetworkEndian::write_u32(&mut proto_len[0..4], length);
            checksum::combine(&[
                checksum::data(src_addr.as_bytes()),
                checksum::data(dst_addr.as_bytes()),
                checksum::data(&proto_len[..]),
            ])
        }

        _ => panic!("Unexpected pseudo header addresses: {}, {}", src_addr, dst_addr),
    }
}

/// Checksum a transport datagram over a segmented buffer with a pseudo
/// header, covering only the first `coverage` bytes of the datagram.
///
/// With `coverage` equal to the total length this is the plain UDP/TCP
/// checksum; a smaller value realizes UDPLite partial coverage. Returns the
/// finished one's-complement sum, i.e. `0` for a datagram that verifies.
pub fn pseudo_header_checksum_partial<'a>(
    src_addr: &Address,
    dst_addr: &Address,
    protocol: Protocol,
    length: u32,
    coverage: usize,
    segments: impl Iterator<Item = &'a [u8]>,
) -> u16 {
    let mut accum = Accum::new();
    accum.push_word(pseudo_header_checksum(src_addr, dst_addr, protocol, length));
    let mut remaining = coverage;
    for segment in segments {
        if remaining == 0 {
            break;
        }
        let take = segment.len().min(remaining);
        accum.push(&segment[..take]);
        remaining -= take;
    }
    !accum.finish()
}
