//! The dispatcher gluing links, timers and applications to the layers.
//!
//! A [`Stack`] owns the interface table, the UDP endpoint table, the timer
//! wheel and the random source. Three kinds of entry points drive it: a
//! link handing up a received frame ([`receive`]), the periodic base tick
//! ([`tick`]), and the application socket calls. All of them take
//! `&mut self`, so the borrow rules serialize every entrypoint against
//! every other; that is the whole concurrency contract of the stack ("the
//! core lock"). Wrap the `Stack` in a mutex or drive it from one worker thread;
//! both satisfy the contract, and nothing in here ever blocks.
//!
//! Work for the external collaborators (ICMP message assembly, the TCP
//! engine, raw sockets) is surfaced as [`Event`]s which the embedder
//! drains after each entry point.
//!
//! [`Stack`]: struct.Stack.html
//! [`receive`]: struct.Stack.html#method.receive
//! [`tick`]: struct.Stack.html#method.tick
//! [`Event`]: enum.Event.html
use alloc::vec::Vec;

use crate::buffer::PacketBuf;
use crate::iface::{Interface, Interfaces};
use crate::layer::{igmp, ip, udp, Error, Result};
use crate::nic::Device;
use crate::rand::Rng;
use crate::time::{TimerToken, TimerWheel};
use crate::wire::{Checksum, IpAddress, IpProtocol, Ipv4Address};

pub use crate::layer::udp::{Socket, SocketFlags, SocketHandle};

/// Monotonic counters of one protocol module.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProtoStats {
    pub recv: u32,
    pub xmit: u32,
    pub drop: u32,
    pub chkerr: u32,
    pub lenerr: u32,
    pub proterr: u32,
    pub rterr: u32,
    pub cachehit: u32,
    /// Buffers duplicated for fan-out deliveries.
    pub clones: u32,
}

/// The statistics of all protocol modules.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub ip: ProtoStats,
    pub udp: ProtoStats,
    pub igmp: ProtoStats,
}

/// Addressing context of a packet surfaced in an [`Event`].
///
/// [`Event`]: enum.Event.html
#[derive(Debug, Clone, Copy)]
pub struct PacketMeta {
    /// The receiving interface.
    pub iface: u8,
    pub src: IpAddress,
    pub dst: IpAddress,
    pub protocol: IpProtocol,
}

impl From<ip::Meta> for PacketMeta {
    fn from(meta: ip::Meta) -> PacketMeta {
        PacketMeta {
            iface: meta.iface,
            src: meta.src,
            dst: meta.dst,
            protocol: meta.protocol,
        }
    }
}

/// Work handed to the external collaborators of the stack core.
///
/// Buffer ownership moves out with the event; whoever drains the queue
/// frees (or answers) the packets.
#[derive(Debug)]
pub enum Event {
    /// An ICMP/ICMPv6 message arrived; the cursor is at the ICMP header.
    Icmp { meta: PacketMeta, pb: PacketBuf },
    /// A TCP segment arrived for the external transport engine.
    Tcp { meta: PacketMeta, pb: PacketBuf },
    /// Nobody listens on the addressed UDP port; the buffer is rewound to
    /// the IP header for the port-unreachable answer.
    PortUnreachable { meta: PacketMeta, pb: PacketBuf },
    /// An IP protocol nobody implements; the buffer is rewound to the IP
    /// header for the protocol-unreachable answer.
    ProtocolUnreachable { meta: PacketMeta, protocol: IpProtocol, pb: PacketBuf },
}

/// The stack context.
pub struct Stack {
    interfaces: Interfaces,
    sockets: udp::SocketSet,
    rng: Rng,
    wheel: TimerWheel,
    igmp_token: TimerToken,
    events: Vec<Event>,
    due_scratch: Vec<TimerToken>,
    rx_checksum: Checksum,
    stats: Stats,
}

impl Stack {
    /// Create a stack drawing randomness from `rng`.
    ///
    /// The IGMP tick is registered first, at one base tick (100 ms).
    pub fn new(rng: Rng) -> Self {
        let mut wheel = TimerWheel::new();
        let igmp_token = wheel.register(1);
        Stack {
            interfaces: Interfaces::new(),
            sockets: udp::SocketSet::new(),
            rng,
            wheel,
            igmp_token,
            events: Vec::new(),
            due_scratch: Vec::new(),
            rx_checksum: Checksum::Manual,
            stats: Stats::default(),
        }
    }

    /// Create a stack seeded from the operating system.
    #[cfg(feature = "std")]
    pub fn new_system() -> Self {
        Stack::new(Rng::from_system())
    }

    /// Counters of all protocol modules.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Treat receive checksums as verified by the hardware.
    pub fn set_rx_checksum(&mut self, checksum: Checksum) {
        self.rx_checksum = checksum;
    }

    // --- interfaces ------------------------------------------------------

    /// Add an interface to the table.
    pub fn add_iface(&mut self, iface: Interface) -> Result<()> {
        self.interfaces.add(iface)
    }

    /// Look an interface up by index.
    pub fn iface(&self, index: u8) -> Option<&Interface> {
        self.interfaces.get(index)
    }

    /// Look an interface up by index, mutably.
    ///
    /// Address changes that should follow through to bound endpoints must
    /// go through [`set_iface_ipv4`] instead.
    ///
    /// [`set_iface_ipv4`]: #method.set_iface_ipv4
    pub fn iface_mut(&mut self, index: u8) -> Option<&mut Interface> {
        self.interfaces.get_mut(index)
    }

    /// Change the IPv4 address of an interface.
    ///
    /// Endpoints bound to the previous address move along to the new one.
    pub fn set_iface_ipv4(
        &mut self,
        index: u8,
        cidr: Option<crate::wire::Ipv4Cidr>,
        gateway: Option<Ipv4Address>,
    ) -> Result<()> {
        let iface = self.interfaces.get_mut(index).ok_or(Error::InvalidArg)?;
        let old = iface.ipv4_addr();
        iface.set_ipv4(cidr, gateway);
        let new = iface.ipv4_addr();
        if let (Some(old), Some(new)) = (old, new) {
            udp::addr_changed(
                &mut self.sockets,
                &IpAddress::Ipv4(old),
                &IpAddress::Ipv4(new),
            );
        }
        Ok(())
    }

    // --- input, timers, events -------------------------------------------

    /// Feed one received frame into the stack.
    ///
    /// The payload cursor must point at the IP header. The buffer is
    /// consumed: delivered, evented or counted and dropped.
    pub fn receive(&mut self, iface: u8, pb: PacketBuf) {
        let Stack { interfaces, sockets, rng, events, stats, rx_checksum, .. } = self;
        ip::input(interfaces, sockets, rng, stats, events, *rx_checksum, iface, pb)
    }

    /// Advance the clock by one base tick (100 ms).
    ///
    /// Drives the protocol timers; tokens of additionally registered timers
    /// that came due are returned for the embedder's own handlers, in
    /// registration order.
    pub fn tick<D: Device>(&mut self, device: &mut D) -> Vec<TimerToken> {
        let mut due = core::mem::take(&mut self.due_scratch);
        due.clear();
        self.wheel.advance(&mut due);

        let mut external = Vec::new();
        for token in due.iter() {
            if *token == self.igmp_token {
                let Stack { interfaces, stats, .. } = self;
                for iface in interfaces.iter_mut() {
                    igmp::tick(iface, stats, device);
                }
            } else {
                external.push(*token);
            }
        }

        self.due_scratch = due;
        external
    }

    /// Register an additional periodic timer on the shared wheel.
    pub fn register_tick(&mut self, period_ticks: u32) -> TimerToken {
        self.wheel.register(period_ticks)
    }

    /// The number of base ticks that have elapsed.
    pub fn now_ticks(&self) -> u64 {
        self.wheel.now_ticks()
    }

    /// Take the next piece of work for the external collaborators.
    pub fn poll_event(&mut self) -> Option<Event> {
        if self.events.is_empty() {
            None
        } else {
            Some(self.events.remove(0))
        }
    }

    // --- IGMP ------------------------------------------------------------

    /// Start IGMP processing on an interface.
    pub fn igmp_start(&mut self, iface: u8) -> Result<()> {
        let iface = self.interfaces.get_mut(iface).ok_or(Error::InvalidArg)?;
        igmp::start(iface)
    }

    /// Stop IGMP processing on an interface, dropping all memberships.
    pub fn igmp_stop(&mut self, iface: u8) -> Result<()> {
        let iface = self.interfaces.get_mut(iface).ok_or(Error::InvalidArg)?;
        igmp::stop(iface);
        Ok(())
    }

    /// Join a multicast group on an interface.
    pub fn igmp_join<D: Device>(
        &mut self,
        device: &mut D,
        iface: u8,
        group: Ipv4Address,
    ) -> Result<()> {
        let Stack { interfaces, rng, stats, .. } = self;
        let iface = interfaces.get_mut(iface).ok_or(Error::InvalidArg)?;
        igmp::join(iface, rng, stats, device, group)
    }

    /// Drop one join reference on a multicast group.
    pub fn igmp_leave<D: Device>(
        &mut self,
        device: &mut D,
        iface: u8,
        group: Ipv4Address,
    ) -> Result<()> {
        let Stack { interfaces, stats, .. } = self;
        let iface = interfaces.get_mut(iface).ok_or(Error::InvalidArg)?;
        igmp::leave(iface, stats, device, group)
    }

    /// Re-announce all memberships of an interface.
    pub fn igmp_report_groups(&mut self, iface: u8) -> Result<()> {
        let Stack { interfaces, rng, .. } = self;
        let iface = interfaces.get_mut(iface).ok_or(Error::InvalidArg)?;
        igmp::report_groups(iface, rng);
        Ok(())
    }

    // --- UDP endpoints ---------------------------------------------------

    /// Add an endpoint to the table, unbound.
    pub fn udp_new(&mut self, socket: Socket) -> SocketHandle {
        self.sockets.insert(socket)
    }

    /// Access an endpoint.
    pub fn udp_socket(&self, handle: SocketHandle) -> Option<&Socket> {
        self.sockets.get(handle)
    }

    /// Access an endpoint mutably, e.g. to set options or the callback.
    pub fn udp_socket_mut(&mut self, handle: SocketHandle) -> Option<&mut Socket> {
        self.sockets.get_mut(handle)
    }

    /// Fix the local identity of an endpoint.
    ///
    /// With port 0 an ephemeral port is allocated. Binding the same
    /// endpoint again is an update, never a duplicate.
    pub fn udp_bind(&mut self, handle: SocketHandle, addr: IpAddress, port: u16) -> Result<()> {
        let Stack { interfaces, sockets, rng, .. } = self;
        udp::bind(sockets, interfaces, rng, handle, addr, port)
    }

    /// Restrict an endpoint to one interface, or lift with 0.
    pub fn udp_bind_iface(&mut self, handle: SocketHandle, iface: u8) -> Result<()> {
        udp::bind_iface(&mut self.sockets, handle, iface)
    }

    /// Fix the remote identity of an endpoint, auto-binding if necessary.
    pub fn udp_connect(&mut self, handle: SocketHandle, addr: IpAddress, port: u16) -> Result<()> {
        let Stack { interfaces, sockets, rng, .. } = self;
        udp::connect(sockets, interfaces, rng, handle, addr, port)
    }

    /// Remove the remote identity of an endpoint again.
    pub fn udp_disconnect(&mut self, handle: SocketHandle) -> Result<()> {
        udp::disconnect(&mut self.sockets, handle)
    }

    /// Close an endpoint, removing it from the table synchronously.
    ///
    /// The endpoint is handed back; pending cloned deliveries cannot exist
    /// outside an entry point, so nothing is left to drain.
    pub fn udp_close(&mut self, handle: SocketHandle) -> Result<Socket> {
        self.sockets.remove(handle).ok_or(Error::Closed)
    }

    /// Send a datagram to the connected remote endpoint.
    pub fn udp_send<D: Device>(
        &mut self,
        device: &mut D,
        handle: SocketHandle,
        pb: PacketBuf,
    ) -> Result<()> {
        let Stack { interfaces, sockets, rng, stats, events, .. } = self;
        udp::send(sockets, interfaces, rng, stats, events, device, handle, pb)
    }

    /// Send a datagram to an explicit destination.
    pub fn udp_send_to<D: Device>(
        &mut self,
        device: &mut D,
        handle: SocketHandle,
        pb: PacketBuf,
        dst_addr: IpAddress,
        dst_port: u16,
    ) -> Result<()> {
        let Stack { interfaces, sockets, rng, stats, events, .. } = self;
        udp::send_to(sockets, interfaces, rng, stats, events, device, handle, pb, dst_addr, dst_port)
    }
}

impl core::fmt::Debug for Stack {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Stack")
            .field("interfaces", &self.interfaces)
            .field("sockets", &self.sockets)
            .field("events", &self.events.len())
            .finish()
    }
}
