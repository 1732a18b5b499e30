use core::fmt;
use byteorder::{ByteOrder, NetworkEndian};

use super::{Error, Result};
use super::ip::checksum;
use super::Ipv4Address;

/// The length of the IGMPv2 message.
///
/// Received packets may be longer, but only these eight octets are
/// interpreted; the checksum covers the whole IP payload regardless.
pub const HEADER_LEN: usize = 8;

enum_with_unknown! {
    /// The type octet of an IGMP message.
    pub enum Message(u8) {
        MembershipQuery = 0x11,
        MembershipReportV1 = 0x12,
        MembershipReportV2 = 0x16,
        LeaveGroup = 0x17
    }
}

byte_wrapper! {
    /// A byte sequence representing an IGMP message.
    #[derive(Debug, PartialEq, Eq)]
    pub struct igmp([u8]);
}

mod field {
    use crate::wire::field::Field;

    pub(crate) const MSG_TYPE: usize = 0;
    pub(crate) const MAX_RESP: usize = 1;
    pub(crate) const CHECKSUM: Field = 2..4;
    pub(crate) const GROUP: Field = 4..8;
}

impl igmp {
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
        if self.0.len() < field::GROUP.end {
            Err(Error::Truncated)
        } else {
            Ok(())
        }
    }

    /// Return the message type.
    #[inline]
    pub fn msg_type(&self) -> Message {
        Message::from(self.0[field::MSG_TYPE])
    }

    /// Return the maximum response time, in 100 ms units.
    #[inline]
    pub fn max_resp(&self) -> u8 {
        self.0[field::MAX_RESP]
    }

    /// Return the checksum field.
    #[inline]
    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.0[field::CHECKSUM])
    }

    /// Return the group address field.
    #[inline]
    pub fn group_addr(&self) -> Ipv4Address {
        Ipv4Address::from_bytes(&self.0[field::GROUP])
    }

    /// Validate the checksum over the whole message.
    pub fn verify_checksum(&self) -> bool {
        checksum::data(&self.0) == !0
    }

    /// Set the message type.
    #[inline]
    pub fn set_msg_type(&mut self, value: Message) {
        self.0[field::MSG_TYPE] = value.into()
    }

    /// Set the maximum response time.
    #[inline]
    pub fn set_max_resp(&mut self, value: u8) {
        self.0[field::MAX_RESP] = value
    }

    /// Set the checksum field.
    #[inline]
    pub fn set_checksum(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field::CHECKSUM], value)
    }

    /// Set the group address field.
    #[inline]
    pub fn set_group_addr(&mut self, value: Ipv4Address) {
        self.0[field::GROUP].copy_from_slice(value.as_bytes())
    }

    /// Compute and fill in the checksum.
    pub fn fill_checksum(&mut self) {
        self.set_checksum(0);
        let checksum = !checksum::data(&self.0);
        self.set_checksum(checksum)
    }
}

impl AsRef<[u8]> for igmp {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A high-level representation of an IGMPv2 message.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Repr {
    MembershipQuery {
        /// Maximum response time in 100 ms units; `0` identifies an IGMPv1
        /// querier.
        max_resp: u8,
        /// The queried group, unspecified for a general query.
        group_addr: Ipv4Address,
    },
    MembershipReport {
        group_addr: Ipv4Address,
    },
    LeaveGroup {
        group_addr: Ipv4Address,
    },
}

impl Repr {
    /// Parse an IGMP message and return a high-level representation.
    ///
    /// Note that the message may be longer than eight octets; all octets are
    /// covered by the checksum but only the fixed header is interpreted.
    pub fn parse(packet: &igmp) -> Result<Repr> {
        packet.check_len()?;
        if !packet.verify_checksum() {
            return Err(Error::WrongChecksum);
        }

        match packet.msg_type() {
            Message::MembershipQuery => Ok(Repr::MembershipQuery {
                max_resp: packet.max_resp(),
                group_addr: packet.group_addr(),
            }),
            // A V1 report carries no response time either; both report kinds
            // suppress our own pending report the same way.
            Message::MembershipReportV1 | Message::MembershipReportV2 => {
                Ok(Repr::MembershipReport { group_addr: packet.group_addr() })
            }
            Message::LeaveGroup => Ok(Repr::LeaveGroup { group_addr: packet.group_addr() }),
            Message::Unknown(_) => Err(Error::Unrecognized),
        }
    }

    /// Return the length of the emitted message.
    pub fn buffer_len(&self) -> usize {
        HEADER_LEN
    }

    /// Emit this high-level representation into a buffer and checksum it.
    pub fn emit(&self, packet: &mut igmp) {
        let (msg_type, max_resp, group_addr) = match *self {
            Repr::MembershipQuery { max_resp, group_addr } =>
                (Message::MembershipQuery, max_resp, group_addr),
            Repr::MembershipReport { group_addr } =>
                (Message::MembershipReportV2, 0, group_addr),
            Repr::LeaveGroup { group_addr } =>
                (Message::LeaveGroup, 0, group_addr),
        };
        packet.set_msg_type(msg_type);
        packet.set_max_resp(max_resp);
        packet.set_group_addr(group_addr);
        packet.fill_checksum();
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Repr::MembershipQuery { max_resp, group_addr } =>
                write!(f, "IGMP query group={} max_resp={}", group_addr, max_resp),
            Repr::MembershipReport { group_addr } =>
                write!(f, "IGMP report group={}", group_addr),
            Repr::LeaveGroup { group_addr } =>
                write!(f, "IGMP leave group={}", group_addr),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    static GENERAL_QUERY_BYTES: [u8; 8] =
        [0x11, 0x64, 0xee, 0x9b,
         0x00, 0x00, 0x00, 0x00];

    static LEAVE_BYTES: [u8; 8] =
        [0x17, 0x00, 0x07, 0xfe,
         0xe0, 0x00, 0x01, 0x01];

    #[test]
    fn test_parse_general_query() {
        let packet = igmp::new_checked(&GENERAL_QUERY_BYTES[..]).unwrap();
        assert!(packet.verify_checksum());
        assert_eq!(
            Repr::parse(packet).unwrap(),
            Repr::MembershipQuery {
                max_resp: 100,
                group_addr: Ipv4Address::UNSPECIFIED,
            }
        );
    }

    #[test]
    fn test_emit_leave() {
        let repr = Repr::LeaveGroup { group_addr: Ipv4Address::new(224, 0, 1, 1) };
        let mut bytes = alloc::vec![0xa5; repr.buffer_len()];
        repr.emit(igmp::new_unchecked_mut(&mut bytes));
        assert_eq!(&bytes[..], &LEAVE_BYTES[..]);
    }

    #[test]
    fn test_checksum_reject() {
        let mut bytes = GENERAL_QUERY_BYTES;
        bytes[1] = 0x32;
        assert_eq!(Repr::parse(igmp::new_unchecked(&bytes)), Err(Error::WrongChecksum));
    }
}
