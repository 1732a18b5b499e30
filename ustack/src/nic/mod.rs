//! Encapsulates the interface to a link device.
//!
//! The stack never owns a device; every entry point that may transmit takes
//! the device as an argument, so that software emulations (see
//! [`loopback`]) and real drivers plug in the same way.
//!
//! [`loopback`]: loopback/index.html
pub mod loopback;

use crate::buffer::PacketBuf;
use crate::wire::IpAddress;

/// The outcome of handing one frame to a device.
#[derive(Debug)]
pub enum TxResult {
    /// The device consumed the buffer.
    Sent,
    /// The device has no path to the hop; the buffer is handed back.
    NoRoute(PacketBuf),
    /// The device is out of transmit resources; the buffer is handed back.
    NoBuf(PacketBuf),
}

impl TxResult {
    /// Whether the frame left through the device.
    pub fn is_sent(&self) -> bool {
        matches!(self, TxResult::Sent)
    }
}

/// A link-layer transmit device.
///
/// The contract mirrors the rest of the pipeline: the device consumes the
/// buffer on success and must return it inside the error otherwise, so the
/// caller can count, log or retry without copying.
pub trait Device {
    /// Transmit one packet towards the resolved next hop.
    ///
    /// `iface` is the index of the outbound interface, `next_hop` the
    /// on-link address the frame should be delivered to (the destination
    /// itself, a gateway, or a multicast/broadcast address).
    fn transmit(&mut self, iface: u8, pb: PacketBuf, next_hop: IpAddress) -> TxResult;
}

impl<D: Device + ?Sized> Device for &'_ mut D {
    fn transmit(&mut self, iface: u8, pb: PacketBuf, next_hop: IpAddress) -> TxResult {
        (**self).transmit(iface, pb, next_hop)
    }
}
