//! The UDP endpoint and the endpoint table.
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use bitflags::bitflags;

use crate::buffer::PacketBuf;
use crate::wire::IpAddress;

/// The default time-to-live of transmitted datagrams.
pub const DEFAULT_TTL: u8 = 255;

/// The default time-to-live of multicast datagrams.
///
/// One, so that multicast does not leave the link unless asked to.
pub const DEFAULT_MCAST_TTL: u8 = 1;

bitflags! {
    /// Option flags of a UDP endpoint.
    #[derive(Default)]
    pub struct SocketFlags: u8 {
        /// Accept and produce broadcast datagrams.
        const BROADCAST = 0x01;
        /// Share the local address with other willing endpoints.
        const REUSEADDR = 0x02;
        /// Deliver own multicast transmissions to local listeners.
        const MULTICAST_LOOP = 0x04;
        /// Speak UDPLite (RFC 3828) instead of UDP.
        const UDPLITE = 0x08;
        /// A remote address is fixed.
        const CONNECTED = 0x10;
        /// Do not generate transmit checksums (IPv4 only).
        const NOCHKSUM = 0x20;
    }
}

/// The receive callback of an endpoint.
///
/// Receives the endpoint itself, the datagram payload with moved ownership,
/// and the source of the datagram. State a classic stack would stash behind
/// a `void*` argument lives in the closure's captures instead.
pub type RecvCallback = Box<dyn FnMut(&mut Socket, PacketBuf, IpAddress, u16)>;

/// A handle naming one endpoint in a [`SocketSet`].
///
/// Stays valid until the endpoint is closed; handles of closed endpoints
/// are never reused.
///
/// [`SocketSet`]: struct.SocketSet.html
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketHandle(pub(crate) usize);

/// A UDP endpoint.
///
/// Created unbound; [`bind`] fixes the local identity, [`connect`]
/// optionally fixes the remote one. The endpoint matures inside a
/// [`SocketSet`] and is operated on through its [`SocketHandle`].
///
/// [`bind`]: ../struct.Stack.html
/// [`connect`]: ../struct.Stack.html
/// [`SocketSet`]: struct.SocketSet.html
/// [`SocketHandle`]: struct.SocketHandle.html
pub struct Socket {
    /// Local address; `Any` is the dual-stack wildcard.
    pub(crate) local_ip: IpAddress,
    pub(crate) local_port: u16,
    /// Zone of a scoped local IPv6 address, 0 when not applicable.
    pub(crate) local_zone: u8,
    pub(crate) remote_ip: IpAddress,
    pub(crate) remote_port: u16,
    pub(crate) remote_zone: u8,
    /// Restrict the endpoint to one interface, 0 for any.
    pub(crate) bound_iface: u8,
    pub ttl: u8,
    pub mcast_ttl: u8,
    /// Outbound interface override for multicast, 0 for none.
    pub mcast_iface: u8,
    /// IPv4 source-route override for multicast transmissions.
    pub mcast_addr4: Option<crate::wire::Ipv4Address>,
    pub flags: SocketFlags,
    /// UDPLite transmit checksum coverage; out-of-range forces full coverage.
    pub coverage_tx: u16,
    /// UDPLite minimum acceptable receive coverage.
    pub coverage_rx: u16,
    pub(crate) recv: Option<RecvCallback>,
}

impl Socket {
    /// A new unbound dual-stack endpoint.
    pub fn new() -> Self {
        Socket {
            local_ip: IpAddress::Any,
            local_port: 0,
            local_zone: 0,
            remote_ip: IpAddress::Any,
            remote_port: 0,
            remote_zone: 0,
            bound_iface: 0,
            ttl: DEFAULT_TTL,
            mcast_ttl: DEFAULT_MCAST_TTL,
            mcast_iface: 0,
            mcast_addr4: None,
            flags: SocketFlags::empty(),
            coverage_tx: 0,
            coverage_rx: 0,
            recv: None,
        }
    }

    /// A new unbound IPv4-only endpoint.
    pub fn new_v4() -> Self {
        let mut socket = Socket::new();
        socket.local_ip = IpAddress::Ipv4(crate::wire::Ipv4Address::UNSPECIFIED);
        socket.remote_ip = socket.local_ip;
        socket
    }

    /// A new unbound IPv6-only endpoint.
    pub fn new_v6() -> Self {
        let mut socket = Socket::new();
        socket.local_ip = IpAddress::Ipv6(crate::wire::Ipv6Address::UNSPECIFIED);
        socket.remote_ip = socket.local_ip;
        socket
    }

    /// Register the receive callback.
    pub fn on_recv(&mut self, callback: RecvCallback) {
        self.recv = Some(callback);
    }

    /// The bound local address and port.
    pub fn local_endpoint(&self) -> (IpAddress, u16) {
        (self.local_ip, self.local_port)
    }

    /// The connected remote address and port.
    pub fn remote_endpoint(&self) -> (IpAddress, u16) {
        (self.remote_ip, self.remote_port)
    }

    /// Whether a remote identity has been fixed.
    pub fn is_connected(&self) -> bool {
        self.flags.contains(SocketFlags::CONNECTED)
    }

    /// The interface this endpoint is restricted to, 0 for any.
    pub fn bound_iface(&self) -> u8 {
        self.bound_iface
    }
}

impl Default for Socket {
    fn default() -> Self {
        Socket::new()
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Socket")
            .field("local", &(self.local_ip, self.local_port))
            .field("remote", &(self.remote_ip, self.remote_port))
            .field("iface", &self.bound_iface)
            .field("flags", &self.flags)
            .finish()
    }
}

struct Entry {
    handle: SocketHandle,
    socket: Socket,
}

/// The endpoint table.
///
/// Iteration order is demultiplexing order. A fully-matched delivery moves
/// its endpoint to the front, so repeat traffic for a connected endpoint
/// finds it first.
#[derive(Default)]
pub struct SocketSet {
    entries: Vec<Entry>,
    next_id: usize,
    /// The cursor of the ephemeral port scan, lazily seeded.
    pub(crate) next_port: Option<u16>,
}

impl SocketSet {
    pub fn new() -> Self {
        SocketSet::default()
    }

    /// Insert an endpoint, returning its handle.
    pub fn insert(&mut self, socket: Socket) -> SocketHandle {
        let handle = SocketHandle(self.next_id);
        self.next_id += 1;
        self.entries.push(Entry { handle, socket });
        handle
    }

    /// Remove an endpoint.
    pub fn remove(&mut self, handle: SocketHandle) -> Option<Socket> {
        let index = self.position(handle)?;
        Some(self.entries.remove(index).socket)
    }

    pub fn get(&self, handle: SocketHandle) -> Option<&Socket> {
        self.entries.iter().find(|entry| entry.handle == handle).map(|entry| &entry.socket)
    }

    pub fn get_mut(&mut self, handle: SocketHandle) -> Option<&mut Socket> {
        self.entries.iter_mut().find(|entry| entry.handle == handle).map(|entry| &mut entry.socket)
    }

    /// The number of endpoints in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate handles and endpoints in demultiplexing order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (SocketHandle, &Socket)> {
        self.entries.iter().map(|entry| (entry.handle, &entry.socket))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (SocketHandle, &mut Socket)> {
        self.entries.iter_mut().map(|entry| (entry.handle, &mut entry.socket))
    }

    fn position(&self, handle: SocketHandle) -> Option<usize> {
        self.entries.iter().position(|entry| entry.handle == handle)
    }

    /// Move the endpoint to the front of the demultiplexing order.
    ///
    /// Returns whether the endpoint actually moved; a front endpoint is a
    /// cache hit.
    pub(crate) fn promote(&mut self, handle: SocketHandle) -> bool {
        match self.position(handle) {
            Some(0) | None => false,
            Some(index) => {
                let entry = self.entries.remove(index);
                self.entries.insert(0, entry);
                true
            }
        }
    }

    /// Run the receive callback of an endpoint, handing over the buffer.
    ///
    /// Drops the buffer if no callback is registered.
    pub(crate) fn deliver(
        &mut self,
        handle: SocketHandle,
        pb: PacketBuf,
        src_addr: IpAddress,
        src_port: u16,
    ) {
        let socket = match self.get_mut(handle) {
            Some(socket) => socket,
            None => return,
        };
        // Detach the callback for the duration of the call so it may borrow
        // its own endpoint.
        let mut callback = match socket.recv.take() {
            Some(callback) => callback,
            None => return,
        };
        callback(socket, pb, src_addr, src_port);
        if socket.recv.is_none() {
            socket.recv = Some(callback);
        }
    }
}

impl fmt::Debug for SocketSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SocketSet")
            .field("sockets", &self.entries.len())
            .finish()
    }
}
