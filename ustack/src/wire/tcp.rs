use core::fmt;
use byteorder::{ByteOrder, NetworkEndian};

use bitflags::bitflags;

use super::{Error, Result};

/// The length of a TCP header without options.
pub const HEADER_LEN: usize = 20;

bitflags! {
    /// The control flags of a TCP header.
    pub struct Flags: u8 {
        const FIN = 0x01;
        const SYN = 0x02;
        const RST = 0x04;
        const PSH = 0x08;
        const ACK = 0x10;
        const URG = 0x20;
    }
}

byte_wrapper! {
    /// A byte sequence representing a TCP segment header.
    ///
    /// This view exists for the benefit of the stateful header codecs; the
    /// reliable-transport engine itself is an external collaborator.
    #[derive(Debug, PartialEq, Eq)]
    pub struct tcp([u8]);
}

mod field {
    use crate::wire::field::Field;

    pub(crate) const SRC_PORT: Field = 0..2;
    pub(crate) const DST_PORT: Field = 2..4;
    pub(crate) const SEQ_NUM: Field = 4..8;
    pub(crate) const ACK_NUM: Field = 8..12;
    pub(crate) const FLAGS: Field = 12..14;
    pub(crate) const WIN_SIZE: Field = 14..16;
    pub(crate) const CHECKSUM: Field = 16..18;
    pub(crate) const URGENT: Field = 18..20;
}

impl tcp {
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

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Ensure that no accessor method will panic if called.
    pub fn check_len(&self) -> Result<()> {
        let len = self.0.len();
        if len < field::URGENT.end {
            Err(Error::Truncated)
        } else if (self.header_len() as usize) < field::URGENT.end {
            Err(Error::Malformed)
        } else if len < self.header_len() as usize {
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

    /// Return the sequence number field.
    #[inline]
    pub fn seq_number(&self) -> u32 {
        NetworkEndian::read_u32(&self.0[field::SEQ_NUM])
    }

    /// Return the acknowledgement number field.
    #[inline]
    pub fn ack_number(&self) -> u32 {
        NetworkEndian::read_u32(&self.0[field::ACK_NUM])
    }

    /// Return the header length, in octets.
    #[inline]
    pub fn header_len(&self) -> u8 {
        (self.0[field::FLAGS.start] >> 4) * 4
    }

    /// Return the control flags.
    #[inline]
    pub fn flags(&self) -> Flags {
        Flags::from_bits_truncate(self.0[field::FLAGS.start + 1])
    }

    /// Return the window size field.
    #[inline]
    pub fn window_len(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::WIN_SIZE])
    }

    /// Return the checksum field.
    #[inline]
    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::CHECKSUM])
    }

    /// Return the urgent pointer field.
    #[inline]
    pub fn urgent_at(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::URGENT])
    }

    /// The header options, possibly empty.
    pub fn options(&self) -> &[u8] {
        &self.0[field::URGENT.end..self.header_len() as usize]
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

    /// Set the sequence number field.
    #[inline]
    pub fn set_seq_number(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.0[field::SEQ_NUM], value)
    }

    /// Set the acknowledgement number field.
    #[inline]
    pub fn set_ack_number(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.0[field::ACK_NUM], value)
    }

    /// Set the header length, in octets.
    #[inline]
    pub fn set_header_len(&mut self, value: u8) {
        let raw = self.0[field::FLAGS.start];
        self.0[field::FLAGS.start] = (raw & 0x0f) | ((value / 4) << 4);
    }

    /// Set the control flags.
    #[inline]
    pub fn set_flags(&mut self, value: Flags) {
        self.0[field::FLAGS.start + 1] = value.bits();
    }

    /// Set the window size field.
    #[inline]
    pub fn set_window_len(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::WIN_SIZE], value)
    }

    /// Set the checksum field.
    #[inline]
    pub fn set_checksum(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::CHECKSUM], value)
    }

    /// Set the urgent pointer field.
    #[inline]
    pub fn set_urgent_at(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::URGENT], value)
    }
}

impl AsRef<[u8]> for tcp {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (name, flag) in [
            ("FIN", Flags::FIN), ("SYN", Flags::SYN), ("RST", Flags::RST),
            ("PSH", Flags::PSH), ("ACK", Flags::ACK), ("URG", Flags::URG),
        ].iter() {
            if self.contains(*flag) {
                write!(f, "{} ", name)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    static SEGMENT_BYTES: [u8; 20] =
        [0x30, 0x39, 0x00, 0x50,
         0x00, 0x00, 0x04, 0xd2,
         0x00, 0x00, 0x10, 0xe1,
         0x50, 0x18, 0x0f, 0xa0,
         0x00, 0x00, 0x00, 0x00];

    #[test]
    fn test_deconstruct() {
        let packet = tcp::new_checked(&SEGMENT_BYTES[..]).unwrap();
        assert_eq!(packet.src_port(), 12345);
        assert_eq!(packet.dst_port(), 80);
        assert_eq!(packet.seq_number(), 1234);
        assert_eq!(packet.ack_number(), 4321);
        assert_eq!(packet.header_len(), 20);
        assert_eq!(packet.flags(), Flags::PSH | Flags::ACK);
        assert_eq!(packet.window_len(), 4000);
        assert!(packet.options().is_empty());
    }

    #[test]
    fn test_construct() {
        let mut bytes = [0u8; 20];
        let packet = tcp::new_unchecked_mut(&mut bytes);
        packet.set_src_port(12345);
        packet.set_dst_port(80);
        packet.set_seq_number(1234);
        packet.set_ack_number(4321);
        packet.set_header_len(20);
        packet.set_flags(Flags::PSH | Flags::ACK);
        packet.set_window_len(4000);
        assert_eq!(&bytes[..], &SEGMENT_BYTES[..]);
    }
}
