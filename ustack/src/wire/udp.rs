use core::fmt;
use core::num::NonZeroU16;
use byteorder::{ByteOrder, NetworkEndian};

use super::{Error, IpAddress, IpProtocol, Result};
use super::ip::checksum;
use super::pseudo_header_checksum;

/// The length of a UDP header.
///
/// The UDPLite header has the same layout; its length field carries the
/// checksum coverage instead.
pub const HEADER_LEN: usize = 8;

byte_wrapper! {
    /// A byte sequence representing a UDP or UDPLite datagram header.
    #[derive(Debug, PartialEq, Eq)]
    pub struct udp([u8]);
}

mod field {
    #![allow(non_snake_case)]
    use crate::wire::field::{Field, Rest};

    pub(crate) const SRC_PORT: Field = 0..2;
    pub(crate) const DST_PORT: Field = 2..4;
    pub(crate) const LENGTH: Field = 4..6;
    pub(crate) const CHECKSUM: Field = 6..8;
    pub(crate) const PAYLOAD: Rest = 8..;
}

impl udp {
    pub fn new_unchecked(data: &[u8]) -> &Self {
        Self::__from_macro_new_unchecked(data)
    }

    pub fn new_unchecked_mut(data: &mut [u8]) -> &mut Self {
        Self::__from_macro_new_unchecked_mut(data)
    }

    pub fn new_checked(data: &[u8]) -> Result<&Self> {
        let packet = Self::new_unchecked(data);
        packet.check_len()?;
        Ok(packet)
    }

    pub fn new_checked_mut(data: &mut [u8]) -> Result<&mut Self> {
        Self::new_checked(&data[..])?;
        Ok(Self::new_unchecked_mut(data))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Ensure that no accessor method will panic if called.
    ///
    /// This checks only for the presence of the fixed header; the length
    /// field is interpreted per-protocol since UDPLite reuses it for the
    /// checksum coverage.
    pub fn check_len(&self) -> Result<()> {
        if self.0.len() < field::CHECKSUM.end {
            Err(Error::Truncated)
        } else {
            Ok(())
        }
    }

    /// Return the source port field.
    #[inline]
    pub fn src_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::SRC_PORT])
    }

    /// Return the destination port field.
    #[inline]
    pub fn dst_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::DST_PORT])
    }

    /// Return the length field.
    ///
    /// For UDPLite this is the checksum coverage.
    #[inline]
    pub fn len(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::LENGTH])
    }

    /// Return the raw checksum field.
    ///
    /// A `None` is the on-wire `0x0000`, which over IPv4 means the sender
    /// did not compute a checksum. A computed checksum that comes out as
    /// zero is transmitted as `0xffff` and therefore never maps to `None`.
    #[inline]
    pub fn checksum(&self) -> Option<NonZeroU16> {
        NonZeroU16::new(NetworkEndian::read_u16(&self.0[field::CHECKSUM]))
    }

    /// Set the source port field.
    #[inline]
    pub fn set_src_port(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::SRC_PORT], value)
    }

    /// Set the destination port field.
    #[inline]
    pub fn set_dst_port(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::DST_PORT], value)
    }

    /// Set the length field.
    #[inline]
    pub fn set_len(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::LENGTH], value)
    }

    /// Set the checksum field from a computed sum.
    ///
    /// Maps the "no checksum" sentinel: a computed zero is written as
    /// `0xffff`, `None` writes the `0x0000` sentinel.
    #[inline]
    pub fn set_checksum(&mut self, value: Option<NonZeroU16>) {
        let raw = value.map_or(0, NonZeroU16::get);
        NetworkEndian::write_u16(&mut self.0[field::CHECKSUM], raw)
    }

    /// Write a freshly computed checksum, applying the zero-to-0xffff rule.
    #[inline]
    pub fn set_computed_checksum(&mut self, value: u16) {
        let value = if value == 0 { 0xffff } else { value };
        NetworkEndian::write_u16(&mut self.0[field::CHECKSUM], value)
    }

    /// Compute and fill in the checksum over this contiguous datagram.
    ///
    /// # Panics
    /// This function panics unless `src_addr` and `dst_addr` belong to the
    /// same concrete family.
    pub fn fill_checksum(&mut self, src_addr: IpAddress, dst_addr: IpAddress) {
        self.set_checksum(None);
        let checksum = {
            !checksum::combine(&[
                pseudo_header_checksum(&src_addr, &dst_addr, IpProtocol::Udp,
                                       self.0.len() as u32),
                checksum::data(&self.0),
            ])
        };
        self.set_computed_checksum(checksum)
    }

    /// Validate the checksum of this contiguous datagram.
    ///
    /// # Panics
    /// This function panics unless `src_addr` and `dst_addr` belong to the
    /// same concrete family.
    pub fn verify_checksum(&self, src_addr: IpAddress, dst_addr: IpAddress) -> bool {
        checksum::combine(&[
            pseudo_header_checksum(&src_addr, &dst_addr, IpProtocol::Udp,
                                   self.0.len() as u32),
            checksum::data(&self.0),
        ]) == !0
    }

    pub fn payload_slice(&self) -> &[u8] {
        &self.0[field::PAYLOAD]
    }

    pub fn payload_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0[field::PAYLOAD]
    }
}

impl AsRef<[u8]> for udp {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A high-level representation of a UDP header.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Repr {
    pub src_port: u16,
    pub dst_port: u16,
    pub length: u16,
}

pub enum Checksum {
    Manual {
        src_addr: IpAddress,
        dst_addr: IpAddress,
    },
    Ignored,
}

impl Repr {
    /// Parse a plain UDP datagram and return a high-level representation.
    pub fn parse(packet: &udp, checksum: Checksum) -> Result<Repr> {
        packet.check_len()?;

        // Destination port cannot be omitted (but source port can be).
        if packet.dst_port() == 0 {
            return Err(Error::Malformed);
        }
        if usize::from(packet.len()) < HEADER_LEN || usize::from(packet.len()) > packet.0.len() {
            return Err(Error::Malformed);
        }
        // Valid checksum is expected...
        if let Checksum::Manual { src_addr, dst_addr } = checksum {
            match (src_addr, dst_addr) {
                // ... except on UDP-over-IPv4, where it can be omitted.
                (IpAddress::Ipv4(_), IpAddress::Ipv4(_)) if packet.checksum().is_none() => {}
                _ if !packet.verify_checksum(src_addr, dst_addr) => {
                    return Err(Error::WrongChecksum)
                }
                _ => (),
            }
        }

        Ok(Repr {
            src_port: packet.src_port(),
            dst_port: packet.dst_port(),
            length: packet.len(),
        })
    }

    /// Return the length of a packet that will be emitted from this
    /// high-level representation.
    pub fn buffer_len(&self) -> usize {
        self.length.into()
    }

    /// Emit a high-level representation into a datagram header.
    ///
    /// The checksum is left as the "none" sentinel; transmit paths fill it
    /// according to protocol and socket options.
    pub fn emit(&self, packet: &mut udp) {
        packet.set_src_port(self.src_port);
        packet.set_dst_port(self.dst_port);
        packet.set_len(self.length);
        packet.set_checksum(None);
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "UDP src={} dst={} len={}", self.src_port, self.dst_port, self.length)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::wire::Ipv4Address;

    const SRC_ADDR: Ipv4Address = Ipv4Address([192, 168, 1, 1]);
    const DST_ADDR: Ipv4Address = Ipv4Address([192, 168, 1, 2]);

    static PACKET_BYTES: [u8; 12] =
        [0xbf, 0x00, 0x00, 0x35,
         0x00, 0x0c, 0x12, 0x4d,
         0xaa, 0x00, 0x00, 0xff];

    static PAYLOAD_BYTES: [u8; 4] =
        [0xaa, 0x00, 0x00, 0xff];

    #[test]
    fn test_deconstruct() {
        let packet = udp::new_unchecked(&PACKET_BYTES[..]);
        assert_eq!(packet.src_port(), 48896);
        assert_eq!(packet.dst_port(), 53);
        assert_eq!(packet.len(), 12);
        assert_eq!(packet.checksum(), NonZeroU16::new(0x124d));
        assert_eq!(packet.payload_slice(), &PAYLOAD_BYTES[..]);
        assert!(packet.verify_checksum(SRC_ADDR.into(), DST_ADDR.into()));
    }

    #[test]
    fn test_construct() {
        let mut bytes = alloc::vec![0xa5; 12];
        let packet = udp::new_unchecked_mut(&mut bytes);
        packet.set_src_port(48896);
        packet.set_dst_port(53);
        packet.set_len(12);
        packet.payload_mut_slice().copy_from_slice(&PAYLOAD_BYTES[..]);
        packet.fill_checksum(SRC_ADDR.into(), DST_ADDR.into());
        assert_eq!(packet.as_bytes(), &PACKET_BYTES[..]);
    }

    #[test]
    fn test_impossible_len() {
        let mut bytes = alloc::vec![0; 12];
        let packet = udp::new_unchecked_mut(&mut bytes);
        packet.set_dst_port(53);
        packet.set_len(4);
        assert_eq!(Repr::parse(packet, Checksum::Ignored), Err(Error::Malformed));
    }

    #[test]
    fn test_zero_checksum_becomes_ffff() {
        let mut bytes = alloc::vec![0; 8];
        let packet = udp::new_unchecked_mut(&mut bytes);
        packet.set_src_port(1);
        packet.set_dst_port(31881);
        packet.set_len(8);
        packet.fill_checksum(SRC_ADDR.into(), DST_ADDR.into());
        assert_eq!(packet.checksum(), NonZeroU16::new(0xffff));
    }

    #[test]
    fn test_no_checksum_accepted_over_v4() {
        let mut bytes = alloc::vec![0u8; 8];
        let packet = udp::new_unchecked_mut(&mut bytes);
        packet.set_src_port(1);
        packet.set_dst_port(53);
        packet.set_len(8);
        packet.set_checksum(None);
        assert!(Repr::parse(
            udp::new_unchecked(&bytes),
            Checksum::Manual { src_addr: SRC_ADDR.into(), dst_addr: DST_ADDR.into() },
        ).is_ok());
    }
}
