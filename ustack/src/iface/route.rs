//! Destination routing over the interface table.
//!
//! Route lookup is a three stage process: scoped destinations go to their
//! zone, on-link destinations route directly, everything else takes the
//! default gateway of its family.
use crate::wire::IpAddress;

use super::{Interfaces, IfaceFlags};

/// A routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// The outbound interface index.
    pub iface: u8,
    /// The on-link hop the frame is addressed to.
    pub next_hop: IpAddress,
}

/// Find the route for a destination address.
pub(crate) fn route(interfaces: &Interfaces, dst_addr: &IpAddress) -> Option<Route> {
    match dst_addr {
        IpAddress::Any => None,

        IpAddress::Ipv4(dst) => {
            // Broadcast and multicast are on-link by definition; pick the
            // first capable interface.
            if dst.is_broadcast() || dst.is_multicast() {
                let wanted = if dst.is_broadcast() {
                    IfaceFlags::BROADCAST
                } else {
                    IfaceFlags::MULTICAST
                };
                let iface = interfaces.iter()
                    .find(|iface| iface.is_up() && iface.flags.contains(wanted)
                        && iface.ipv4().is_some())?;
                return Some(Route { iface: iface.index(), next_hop: *dst_addr });
            }

            for iface in interfaces.iter().filter(|iface| iface.is_up()) {
                if let Some(cidr) = iface.ipv4() {
                    if cidr.subnet().contains(*dst) {
                        return Some(Route { iface: iface.index(), next_hop: *dst_addr });
                    }
                }
            }

            for iface in interfaces.iter().filter(|iface| iface.is_up()) {
                if let Some(gateway) = iface.gateway4() {
                    return Some(Route {
                        iface: iface.index(),
                        next_hop: IpAddress::Ipv4(gateway),
                    });
                }
            }
            None
        }

        IpAddress::Ipv6(dst) => {
            if dst.is_scoped() {
                // Without a zone there is nothing to go by; callers zone
                // scoped destinations before routing.
                let iface = interfaces.iter()
                    .find(|iface| iface.is_up() && !iface.ipv6().is_empty())?;
                return Some(Route { iface: iface.index(), next_hop: *dst_addr });
            }

            for iface in interfaces.iter().filter(|iface| iface.is_up()) {
                let on_link = iface.ipv6().iter().any(|entry| {
                    entry.state.is_valid() && entry.cidr().contains(*dst)
                });
                if on_link {
                    return Some(Route { iface: iface.index(), next_hop: *dst_addr });
                }
            }

            for iface in interfaces.iter().filter(|iface| iface.is_up()) {
                if let Some(gateway) = iface.gateway6() {
                    return Some(Route {
                        iface: iface.index(),
                        next_hop: IpAddress::Ipv6(gateway),
                    });
                }
            }
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use super::super::{Interface, Interfaces};
    use crate::wire::{Ipv4Address, Ipv4Cidr, Ipv6Address, Ipv6AddressState, Ipv6Lifetime};
    use super::super::Ipv6AddrEntry;

    fn table() -> Interfaces {
        let mut table = Interfaces::new();
        let mut eth = Interface::new(1);
        eth.flags = IfaceFlags::UP | IfaceFlags::BROADCAST | IfaceFlags::MULTICAST;
        eth.set_ipv4(
            Some(Ipv4Cidr::new(Ipv4Address::new(192, 0, 2, 3), 24)),
            Some(Ipv4Address::new(192, 0, 2, 1)),
        );
        eth.add_ipv6(Ipv6AddrEntry {
            addr: Ipv6Address::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 3),
            prefix_len: 64,
            state: Ipv6AddressState::Preferred,
            lifetime: Ipv6Lifetime::Infinite,
        }).unwrap();
        table.add(eth).unwrap();
        table
    }

    #[test]
    fn on_link_and_gateway() {
        let table = table();
        let direct = route(&table, &IpAddress::v4(192, 0, 2, 200)).unwrap();
        assert_eq!(direct.next_hop, IpAddress::v4(192, 0, 2, 200));

        let routed = route(&table, &IpAddress::v4(198, 51, 100, 1)).unwrap();
        assert_eq!(routed.next_hop, IpAddress::v4(192, 0, 2, 1));
        assert_eq!(routed.iface, 1);
    }

    #[test]
    fn v6_on_link() {
        let table = table();
        let dst = IpAddress::Ipv6(Ipv6Address::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 99));
        let found = route(&table, &dst).unwrap();
        assert_eq!(found.next_hop, dst);
        // No gateway configured for an off-link destination.
        let off = IpAddress::Ipv6(Ipv6Address::new(0x2001, 0xdb8, 1, 0, 0, 0, 0, 1));
        assert_eq!(route(&table, &off), None);
    }

    #[test]
    fn broadcast_needs_capability() {
        let mut table = Interfaces::new();
        let mut ppp = Interface::new(1);
        ppp.flags = IfaceFlags::UP;
        ppp.set_ipv4(Some(Ipv4Cidr::new(Ipv4Address::new(10, 0, 0, 1), 30)), None);
        table.add(ppp).unwrap();
        assert_eq!(route(&table, &IpAddress::Ipv4(Ipv4Address::BROADCAST)), None);
    }
}
