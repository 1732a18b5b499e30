//! Interface identity, addresses and the interface table.
//!
//! An [`Interface`] carries the per-link state the protocol layers consult:
//! the stable index that also serves as the IPv6 zone of its scoped
//! addresses, one IPv4 address with netmask and gateway, an ordered list of
//! IPv6 addresses with their autoconfiguration state, the link-layer
//! multicast filter hook and the IGMP group list.
//!
//! [`Interface`]: struct.Interface.html
mod route;

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use bitflags::bitflags;

use crate::layer::igmp::Groups;
use crate::wire::{
    Ipv4Address, Ipv4Cidr, Ipv6Address, Ipv6AddressState, Ipv6Cidr, Ipv6Lifetime, IpAddress,
};

pub use route::Route;
pub(crate) use route::route;

/// The reserved "no interface" index.
pub const NO_INDEX: u8 = 0;

/// A six-octet link-layer address.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy, Default)]
pub struct HwAddress(pub [u8; 6]);

impl HwAddress {
    /// Return the address as a sequence of octets.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for HwAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let b = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
               b[0], b[1], b[2], b[3], b[4], b[5])
    }
}

bitflags! {
    /// Capability and state flags of an interface.
    pub struct IfaceFlags: u8 {
        /// The interface is administratively up.
        const UP = 0x01;
        /// The link supports broadcast.
        const BROADCAST = 0x02;
        /// The link supports multicast.
        const MULTICAST = 0x04;
        /// IGMP runs on this interface.
        const IGMP = 0x08;
    }
}

/// Whether to install or remove a multicast filter entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    Add,
    Del,
}

/// The link-layer multicast filter hook.
///
/// Invoked by IGMP when the first reference to a group is created or the
/// last one is dropped, so the driver can program its receive filter.
pub type MacFilter = Box<dyn FnMut(Ipv4Address, FilterAction)>;

/// One IPv6 address assigned to an interface.
#[derive(Debug, Clone, Copy)]
pub struct Ipv6AddrEntry {
    pub addr: Ipv6Address,
    pub prefix_len: u8,
    pub state: Ipv6AddressState,
    pub lifetime: Ipv6Lifetime,
}

impl Ipv6AddrEntry {
    fn cidr(&self) -> Ipv6Cidr {
        Ipv6Cidr::new(self.addr, self.prefix_len)
    }
}

/// A network interface.
pub struct Interface {
    index: u8,
    pub hw_addr: HwAddress,
    pub flags: IfaceFlags,
    ipv4: Option<Ipv4Cidr>,
    gateway4: Option<Ipv4Address>,
    ipv6: Vec<Ipv6AddrEntry>,
    gateway6: Option<Ipv6Address>,
    pub(crate) mac_filter: Option<MacFilter>,
    pub(crate) igmp: Groups,
}

impl Interface {
    /// Create a down interface with the given index.
    ///
    /// # Panics
    /// Panics on the reserved index `0`.
    pub fn new(index: u8) -> Self {
        assert!(index != NO_INDEX, "interface index 0 is reserved");
        Interface {
            index,
            hw_addr: HwAddress::default(),
            flags: IfaceFlags::empty(),
            ipv4: None,
            gateway4: None,
            ipv6: Vec::new(),
            gateway6: None,
            mac_filter: None,
            igmp: Groups::new(),
        }
    }

    /// The stable index, also the zone of this interface's scoped addresses.
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Whether the interface is up.
    pub fn is_up(&self) -> bool {
        self.flags.contains(IfaceFlags::UP)
    }

    /// Install the link-layer multicast filter hook.
    pub fn set_mac_filter(&mut self, filter: MacFilter) {
        self.mac_filter = Some(filter);
    }

    /// Assign the IPv4 address, netmask and gateway.
    pub fn set_ipv4(&mut self, cidr: Option<Ipv4Cidr>, gateway: Option<Ipv4Address>) {
        self.ipv4 = cidr;
        self.gateway4 = gateway;
    }

    /// The assigned IPv4 address with its prefix.
    pub fn ipv4(&self) -> Option<Ipv4Cidr> {
        self.ipv4
    }

    /// The assigned IPv4 address.
    pub fn ipv4_addr(&self) -> Option<Ipv4Address> {
        self.ipv4.map(|cidr| cidr.address())
    }

    /// The configured IPv4 default gateway.
    pub fn gateway4(&self) -> Option<Ipv4Address> {
        self.gateway4
    }

    /// Set the IPv6 default gateway.
    pub fn set_gateway6(&mut self, gateway: Option<Ipv6Address>) {
        self.gateway6 = gateway;
    }

    /// The configured IPv6 default gateway.
    pub fn gateway6(&self) -> Option<Ipv6Address> {
        self.gateway6
    }

    /// The ordered list of assigned IPv6 addresses.
    pub fn ipv6(&self) -> &[Ipv6AddrEntry] {
        &self.ipv6
    }

    /// Append an IPv6 address.
    ///
    /// Rejects a second preferred link-local address; every interface keeps
    /// at most one.
    pub fn add_ipv6(&mut self, entry: Ipv6AddrEntry) -> Result<(), crate::layer::Error> {
        if entry.addr.is_link_local() && entry.state.is_preferred() {
            let exists = self.ipv6.iter()
                .any(|have| have.addr.is_link_local() && have.state.is_preferred());
            if exists {
                return Err(crate::layer::Error::AddrInUse);
            }
        }
        self.ipv6.push(entry);
        Ok(())
    }

    /// Update the state of an assigned address.
    ///
    /// Returns `AddrNotAvail` if the address is not assigned here.
    pub fn set_ipv6_state(
        &mut self,
        addr: Ipv6Address,
        state: Ipv6AddressState,
    ) -> Result<(), crate::layer::Error> {
        match self.ipv6.iter_mut().find(|entry| entry.addr == addr) {
            Some(entry) => {
                entry.state = state;
                Ok(())
            }
            None => Err(crate::layer::Error::AddrNotAvail),
        }
    }

    /// Find the assigned, valid IPv6 address equal to `addr`.
    pub fn ipv6_match(&self, addr: &Ipv6Address) -> Option<&Ipv6AddrEntry> {
        self.ipv6.iter().find(|entry| entry.state.is_valid() && entry.addr == *addr)
    }

    /// Whether `dst` addresses this interface over IPv4.
    ///
    /// Covers the assigned address, directed subnet broadcast and the
    /// limited broadcast, the latter two only on broadcast-capable links.
    pub fn accepts_v4(&self, dst: Ipv4Address) -> bool {
        if let Some(cidr) = self.ipv4 {
            if cidr.address() == dst {
                return true;
            }
            if self.flags.contains(IfaceFlags::BROADCAST)
                && (dst.is_broadcast() || cidr.broadcast() == Some(dst))
            {
                return true;
            }
        } else if dst.is_broadcast() && self.flags.contains(IfaceFlags::BROADCAST) {
            return true;
        }
        false
    }

    /// Whether `dst` addresses this interface over IPv6.
    ///
    /// Matches any valid assigned address, the all-nodes group, and the
    /// solicited-node group of every assigned address; a tentative address
    /// must hear Neighbor Solicitations for its own duplicate detection.
    pub fn accepts_v6(&self, dst: &Ipv6Address) -> bool {
        if *dst == Ipv6Address::LINK_LOCAL_ALL_NODES {
            return true;
        }
        self.ipv6.iter().any(|entry| {
            let assigned = entry.state.is_valid() && entry.addr == *dst;
            let solicited = entry.state != Ipv6AddressState::Invalid
                && entry.addr.solicited_node() == *dst;
            assigned || solicited
        })
    }

    /// Whether the IPv4 destination is a subnet or limited broadcast here.
    pub fn is_broadcast_v4(&self, dst: Ipv4Address) -> bool {
        dst.is_broadcast() || self.ipv4.and_then(|cidr| cidr.broadcast()) == Some(dst)
    }

    /// Select a source address for an IPv6 destination.
    ///
    /// Default address selection: never tentative or duplicated addresses,
    /// link-local destinations take link-local sources, otherwise the
    /// preferred address sharing the longest prefix with the destination
    /// wins over deprecated ones.
    pub fn select_source_v6(&self, dst: &Ipv6Address) -> Option<Ipv6Address> {
        let mut best: Option<(&Ipv6AddrEntry, u8)> = None;
        for entry in self.ipv6.iter().filter(|entry| entry.state.is_valid()) {
            if dst.is_scoped() && !entry.addr.is_link_local() {
                continue;
            }
            if entry.addr == *dst {
                return Some(entry.addr);
            }
            let score = entry.addr.common_prefix_len(dst);
            let better = match best {
                None => true,
                Some((incumbent, incumbent_score)) => {
                    match (entry.state.is_preferred(), incumbent.state.is_preferred()) {
                        (true, false) => true,
                        (false, true) => false,
                        _ => score > incumbent_score,
                    }
                }
            };
            if better {
                best = Some((entry, score));
            }
        }
        best.map(|(entry, _)| entry.addr)
    }

    /// Run the MAC filter hook, if any is installed.
    pub(crate) fn run_mac_filter(&mut self, group: Ipv4Address, action: FilterAction) {
        if let Some(filter) = self.mac_filter.as_mut() {
            filter(group, action);
        }
    }
}

impl fmt::Debug for Interface {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Interface")
            .field("index", &self.index)
            .field("hw_addr", &self.hw_addr)
            .field("flags", &self.flags)
            .field("ipv4", &self.ipv4)
            .field("ipv6", &self.ipv6)
            .finish()
    }
}

/// The process-wide table of interfaces.
#[derive(Debug, Default)]
pub struct Interfaces {
    entries: Vec<Interface>,
}

impl Interfaces {
    pub fn new() -> Self {
        Interfaces { entries: Vec::new() }
    }

    /// Add an interface to the table.
    ///
    /// Returns `InvalidArg` if the index is already taken.
    pub fn add(&mut self, iface: Interface) -> Result<(), crate::layer::Error> {
        if self.get(iface.index()).is_some() {
            return Err(crate::layer::Error::InvalidArg);
        }
        self.entries.push(iface);
        Ok(())
    }

    /// Look an interface up by index.
    pub fn get(&self, index: u8) -> Option<&Interface> {
        if index == NO_INDEX {
            return None;
        }
        self.entries.iter().find(|iface| iface.index() == index)
    }

    /// Look an interface up by index, mutably.
    pub fn get_mut(&mut self, index: u8) -> Option<&mut Interface> {
        if index == NO_INDEX {
            return None;
        }
        self.entries.iter_mut().find(|iface| iface.index() == index)
    }

    /// Iterate over all interfaces.
    pub fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.entries.iter()
    }

    /// Iterate over all interfaces, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Interface> {
        self.entries.iter_mut()
    }

    /// Whether any interface owns the given address.
    pub fn has_addr(&self, addr: &IpAddress) -> bool {
        match addr {
            IpAddress::Any => false,
            IpAddress::Ipv4(v4) => self.iter().any(|iface| iface.ipv4_addr() == Some(*v4)),
            IpAddress::Ipv6(v6) => self.iter().any(|iface| iface.ipv6_match(v6).is_some()),
        }
    }
}
