//! The process logic of protocol layers.
//!
//! Each protocol is split into two parts; the packet logic contained in
//! `wire` and the processing part in this module. The layers hold the
//! per-protocol state (the UDP endpoint table, the IGMP group lists, the
//! IP demultiplexing rules) and are driven by the dispatcher in `stack`.
//! State is open to modification while no packet is being processed,
//! similar to reconfiguration with `ifconfig` on the OS level.
//!
//! All layer entry points receive their packet buffer by value. A function
//! that returns an error has already disposed of the buffer (or never
//! owned one); callers only route successes onward.
use core::fmt;

pub mod igmp;
pub mod ip;
pub mod udp;

pub type Result<T> = core::result::Result<T, Error>;

/// The operational error type of the stack.
///
/// Parsing failures live in [`wire::Error`]; this type covers everything a
/// caller of the stack can get back from an operation. Checksum mismatches
/// and malformed inputs never surface here on the receive path; those are
/// counted and dropped locally.
///
/// [`wire::Error`]: ../wire/enum.Error.html
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    /// No route towards the destination, or no usable source address.
    NoRoute,

    /// Not enough buffer space to complete the operation.
    NoBuf,

    /// An argument violated the operation's contract.
    InvalidArg,

    /// The local address/port pair is held by another endpoint.
    AddrInUse,

    /// The requested address is not assigned to any interface.
    AddrNotAvail,

    /// The operation cannot complete now without blocking.
    WouldBlock,

    /// A checksum did not verify.
    ChecksumMismatch,

    /// The peer rejected an authentication exchange with this code.
    AuthFailure(u16),

    /// The peer violated the protocol.
    ProtocolError,

    /// A deadline passed without the awaited event.
    TimedOut,

    /// The endpoint was closed.
    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NoRoute => write!(f, "no route to destination"),
            Error::NoBuf => write!(f, "out of buffer space"),
            Error::InvalidArg => write!(f, "invalid argument"),
            Error::AddrInUse => write!(f, "address in use"),
            Error::AddrNotAvail => write!(f, "address not available"),
            Error::WouldBlock => write!(f, "operation would block"),
            Error::ChecksumMismatch => write!(f, "checksum mismatch"),
            Error::AuthFailure(code) => write!(f, "authentication failure (code {})", code),
            Error::ProtocolError => write!(f, "protocol violation"),
            Error::TimedOut => write!(f, "timed out"),
            Error::Closed => write!(f, "endpoint closed"),
        }
    }
}

/// Can convert from a wire error.
///
/// This indicates some layer tried to operate on a packet but failed. The
/// only wire errors that escape the receive path's count-and-drop handling
/// are argument violations on the send path.
impl From<crate::wire::Error> for Error {
    fn from(err: crate::wire::Error) -> Self {
        match err {
            crate::wire::Error::WrongChecksum => Error::ChecksumMismatch,
            _ => Error::InvalidArg,
        }
    }
}
