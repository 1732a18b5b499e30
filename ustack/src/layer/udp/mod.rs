//! The UDP endpoint table and datagram processing.
//!
//! Demultiplexing follows the classic rules: a datagram goes to the
//! endpoint fully matched on the remote identity when one exists, otherwise
//! to the best unconnected match, preferring specific local addresses over
//! wildcards and, for global broadcasts, endpoints bound to the receiving
//! interface's address. A full match is promoted to the front of the table
//! so a busy conversation short-circuits the next lookup. Endpoints with
//! `REUSEADDR` share broadcast and multicast deliveries, each receiver
//! getting its own clone.
mod socket;
#[cfg(test)]
mod tests;

use crate::buffer::{Flags as BufFlags, Layer, PacketBuf};
use crate::iface::{Interface, Interfaces};
use crate::layer::ip::{self, Meta};
use crate::layer::{Error, Result};
use crate::nic::Device;
use crate::rand::{Rng, EPHEMERAL_PORT_END, EPHEMERAL_PORT_START};
use crate::stack::{Event, Stats};
use crate::wire::{
    pseudo_header_checksum_partial, udp_packet, Checksum, IpAddress, IpProtocol, UDP_HEADER_LEN,
};

pub use socket::{
    RecvCallback, Socket, SocketFlags, SocketHandle, SocketSet, DEFAULT_MCAST_TTL, DEFAULT_TTL,
};

/// Whether the endpoint's local identity matches the incoming datagram.
///
/// `dst_port` equality is checked by the caller; this covers the interface
/// binding, the zone of a scoped local address, and the local IP rules
/// including the IPv4 broadcast cases.
fn local_match(socket: &Socket, iface: &Interface, meta: &Meta) -> bool {
    // Bound to a specific interface?
    if socket.bound_iface() != 0 && socket.bound_iface() != meta.iface {
        return false;
    }
    // A zoned scoped address only exists on its own link.
    if let IpAddress::Ipv6(local) = socket.local_ip {
        if local.is_scoped() && socket.local_zone != 0 && socket.local_zone != meta.iface {
            return false;
        }
    }

    // Dual-stack: endpoints listening to any IP type also listen to any
    // address, modulo the broadcast permission.
    if socket.local_ip.is_any_type() {
        if meta.broadcast && !socket.flags.contains(SocketFlags::BROADCAST) {
            return false;
        }
        return true;
    }

    match (socket.local_ip, meta.dst) {
        (IpAddress::Ipv4(local), IpAddress::Ipv4(dst)) => {
            if meta.broadcast {
                // All broadcasts, or broadcasts in my subnet.
                if !socket.flags.contains(SocketFlags::BROADCAST) {
                    return false;
                }
                local.is_unspecified()
                    || dst.is_broadcast()
                    || iface.ipv4().map_or(false, |cidr| {
                        crate::wire::Ipv4Cidr::new(local, cidr.prefix_len())
                            .subnet()
                            .contains(dst)
                    })
            } else {
                local.is_unspecified() || local == dst
            }
        }
        (IpAddress::Ipv6(local), IpAddress::Ipv6(dst)) => {
            local.is_unspecified() || local == dst
        }
        _ => false,
    }
}

/// Whether the endpoint's remote identity equals the datagram source.
fn remote_match(socket: &Socket, meta: &Meta, src_port: u16) -> bool {
    socket.remote_port == src_port
        && (socket.remote_ip.is_unspecified() || socket.remote_ip == meta.src)
}

/// Verify the datagram checksum according to protocol and family.
///
/// Returns the UDPLite coverage (or the full length for UDP) on success.
fn verify_checksum(pb: &PacketBuf, meta: &Meta, coverage_field: u16) -> core::result::Result<usize, ()> {
    let tot_len = pb.tot_len();
    match meta.protocol {
        IpProtocol::UdpLite => {
            let mut coverage = usize::from(coverage_field);
            if coverage < UDP_HEADER_LEN {
                if coverage == 0 {
                    // Zero means: checksum over the complete datagram.
                    coverage = tot_len;
                } else {
                    // At least the header must be covered.
                    return Err(());
                }
            }
            if coverage > tot_len {
                return Err(());
            }
            let sum = pseudo_header_checksum_partial(
                &meta.src, &meta.dst, IpProtocol::UdpLite,
                tot_len as u32, coverage, pb.segments(),
            );
            if sum != 0 { Err(()) } else { Ok(coverage) }
        }
        _ => {
            let header = udp_packet::new_unchecked(pb.payload());
            if header.checksum().is_none() {
                // Over IPv4 an absent checksum is legal; over IPv6 it is
                // not.
                return match meta.dst {
                    IpAddress::Ipv4(_) => Ok(tot_len),
                    _ => Err(()),
                };
            }
            let sum = pseudo_header_checksum_partial(
                &meta.src, &meta.dst, IpProtocol::Udp,
                tot_len as u32, tot_len, pb.segments(),
            );
            if sum != 0 { Err(()) } else { Ok(tot_len) }
        }
    }
}

/// Process an incoming UDP or UDPLite datagram.
///
/// The payload cursor points at the UDP header. Finds the owning endpoint
/// and hands the payload to its receive callback; fans out clones to other
/// `REUSEADDR` listeners for broadcast and multicast; surfaces a
/// port-unreachable event when nobody claims a unicast datagram.
pub(crate) fn input(
    sockets: &mut SocketSet,
    interfaces: &Interfaces,
    stats: &mut Stats,
    events: &mut alloc::vec::Vec<Event>,
    rx_checksum: Checksum,
    meta: &Meta,
    mut pb: PacketBuf,
) {
    stats.udp.recv += 1;

    if pb.len() < UDP_HEADER_LEN {
        net_debug!("udp: short datagram discarded");
        stats.udp.lenerr += 1;
        stats.udp.drop += 1;
        return;
    }

    let iface = match interfaces.get(meta.iface) {
        Some(iface) => iface,
        None => {
            stats.udp.drop += 1;
            return;
        }
    };

    let (src_port, dst_port, len_field) = {
        let header = udp_packet::new_unchecked(pb.payload());
        (header.src_port(), header.dst_port(), header.len())
    };

    net_trace!("udp: ({}, {}) <-- ({}, {})", meta.dst, dst_port, meta.src, src_port);

    // Iterate the endpoint list for a matching endpoint. Fully-matched
    // endpoints (connected to the remote port and address) are preferred;
    // without one, the best unconnected local match gets the datagram.
    struct UnconMatch {
        handle: SocketHandle,
        local_ip: IpAddress,
        bound_iface: u8,
    }

    let mut full: Option<SocketHandle> = None;
    let mut uncon: Option<UnconMatch> = None;
    let mut front = true;
    for (handle, socket) in sockets.iter() {
        let matched = socket.local_port != 0
            && socket.local_port == dst_port
            && local_match(socket, iface, meta);
        if matched {
            if !socket.is_connected() {
                let candidate = UnconMatch {
                    handle,
                    local_ip: socket.local_ip,
                    bound_iface: socket.bound_iface(),
                };
                let takes_over = match &uncon {
                    None => true,
                    Some(incumbent) if meta.dst.is_global_broadcast() => {
                        // For the global broadcast address, prefer the
                        // endpoint bound to the receiving interface's own
                        // address or to the interface itself.
                        let iface_addr = iface.ipv4_addr().map(IpAddress::Ipv4);
                        let incumbent_on_iface = Some(incumbent.local_ip) == iface_addr
                            || incumbent.bound_iface == meta.iface;
                        let candidate_on_iface = Some(candidate.local_ip) == iface_addr
                            || candidate.bound_iface == meta.iface;
                        !incumbent_on_iface && candidate_on_iface
                    }
                    Some(incumbent) => {
                        // Prefer an interface-bound endpoint on its own
                        // interface, then specific IPs over catch-all.
                        (candidate.bound_iface == meta.iface
                            && incumbent.bound_iface != meta.iface)
                            || (incumbent.bound_iface == 0
                                && !candidate.local_ip.is_unspecified())
                    }
                };
                if takes_over {
                    uncon = Some(candidate);
                }
            }

            if remote_match(socket, meta, src_port) {
                full = Some(handle);
                break;
            }
        }
        front = false;
    }

    let chosen = match full {
        Some(handle) => {
            // Move the endpoint to the front so that it is found faster
            // next time.
            if front {
                stats.udp.cachehit += 1;
            } else {
                sockets.promote(handle);
            }
            Some(handle)
        }
        None => uncon.map(|found| found.handle),
    };

    if rx_checksum.manual() {
        let coverage_field = match meta.protocol {
            IpProtocol::UdpLite => len_field,
            _ => 0,
        };
        match verify_checksum(&pb, meta, coverage_field) {
            Ok(coverage) => {
                let min_rx = chosen
                    .and_then(|handle| sockets.get(handle))
                    .map_or(0, |socket| usize::from(socket.coverage_rx));
                if meta.protocol == IpProtocol::UdpLite && coverage < min_rx {
                    stats.udp.chkerr += 1;
                    stats.udp.drop += 1;
                    return;
                }
            }
            Err(()) => {
                net_debug!("udp: datagram discarded due to failing checksum");
                stats.udp.chkerr += 1;
                stats.udp.drop += 1;
                return;
            }
        }
    }

    if pb.strip(UDP_HEADER_LEN).is_err() {
        stats.udp.drop += 1;
        return;
    }

    match chosen {
        Some(primary) => {
            let reuse = sockets
                .get(primary)
                .map_or(false, |socket| socket.flags.contains(SocketFlags::REUSEADDR));
            if reuse && (meta.broadcast || meta.dst.is_multicast()) {
                // Pass broadcast and multicast datagrams on to every other
                // local match, each by its own clone.
                let others: alloc::vec::Vec<SocketHandle> = sockets
                    .iter()
                    .filter(|(handle, socket)| {
                        *handle != primary
                            && socket.local_port == dst_port
                            && local_match(socket, iface, meta)
                    })
                    .map(|(handle, _)| handle)
                    .collect();
                for handle in others {
                    stats.udp.clones += 1;
                    sockets.deliver(handle, pb.deep_clone(), meta.src, src_port);
                }
            }
            sockets.deliver(primary, pb, meta.src, src_port);
        }
        None => {
            net_trace!("udp: no endpoint matched");
            stats.udp.proterr += 1;
            stats.udp.drop += 1;
            // No match: answer unicast datagrams with a port unreachable.
            if !meta.broadcast && !meta.dst.is_multicast() {
                if pb.prepend(meta.header_len + UDP_HEADER_LEN).is_ok() {
                    events.push(Event::PortUnreachable { meta: (*meta).into(), pb });
                }
            }
        }
    }
}

/// Fix the local identity of an endpoint.
///
/// An unzoned scoped IPv6 address is zoned here, before the conflict scan.
/// Port zero allocates from the ephemeral range; an explicit port is
/// refused while any other endpoint holds a colliding binding and not both
/// carry `REUSEADDR`.
pub(crate) fn bind(
    sockets: &mut SocketSet,
    interfaces: &Interfaces,
    rng: &mut Rng,
    handle: SocketHandle,
    addr: IpAddress,
    port: u16,
) -> Result<()> {
    let (own_flags, bound_iface) = match sockets.get(handle) {
        Some(socket) => (socket.flags, socket.bound_iface()),
        None => return Err(Error::Closed),
    };

    // Assign a zone if the address needs one but has none yet.
    let mut zone = 0;
    if let IpAddress::Ipv6(v6) = addr {
        if v6.is_scoped() {
            zone = select_zone(interfaces, bound_iface);
        }
    }

    let port = if port == 0 {
        ephemeral_port(sockets, rng, handle)?
    } else {
        for (other, socket) in sockets.iter() {
            if other == handle {
                continue;
            }
            // Binding to a taken pair is allowed only when *both* parties
            // opted into sharing.
            let both_reuse = own_flags.contains(SocketFlags::REUSEADDR)
                && socket.flags.contains(SocketFlags::REUSEADDR);
            if both_reuse {
                continue;
            }
            if socket.local_port == port
                && (socket.local_ip == addr
                    || addr.is_unspecified()
                    || socket.local_ip.is_unspecified())
            {
                net_debug!("udp: local port {} already bound by another endpoint", port);
                return Err(Error::AddrInUse);
            }
        }
        port
    };

    let socket = sockets.get_mut(handle).ok_or(Error::Closed)?;
    socket.local_ip = addr;
    socket.local_port = port;
    socket.local_zone = zone;
    net_trace!("udp: bound to ({}, {})", addr, port);
    Ok(())
}

/// Restrict the endpoint to one interface, or lift the restriction with 0.
pub(crate) fn bind_iface(sockets: &mut SocketSet, handle: SocketHandle, index: u8) -> Result<()> {
    let socket = sockets.get_mut(handle).ok_or(Error::Closed)?;
    socket.bound_iface = index;
    Ok(())
}

/// Fix the remote identity of an endpoint, auto-binding if necessary.
pub(crate) fn connect(
    sockets: &mut SocketSet,
    interfaces: &Interfaces,
    rng: &mut Rng,
    handle: SocketHandle,
    addr: IpAddress,
    port: u16,
) -> Result<()> {
    let needs_bind = match sockets.get(handle) {
        Some(socket) => socket.local_port == 0,
        None => return Err(Error::Closed),
    };
    if needs_bind {
        let local_ip = sockets.get(handle).ok_or(Error::Closed)?.local_ip;
        bind(sockets, interfaces, rng, handle, local_ip, 0)?;
    }

    // Zone the remote address, informed by the bound local address when it
    // already carries a zone.
    let mut zone = 0;
    if let IpAddress::Ipv6(v6) = addr {
        if v6.is_scoped() {
            let socket = sockets.get(handle).ok_or(Error::Closed)?;
            zone = if socket.local_zone != 0 {
                socket.local_zone
            } else {
                select_zone(interfaces, socket.bound_iface())
            };
        }
    }

    let socket = sockets.get_mut(handle).ok_or(Error::Closed)?;
    socket.remote_ip = addr;
    socket.remote_port = port;
    socket.remote_zone = zone;
    socket.flags.insert(SocketFlags::CONNECTED);
    net_trace!("udp: connected to ({}, {})", addr, port);
    Ok(())
}

/// Remove the remote identity again.
pub(crate) fn disconnect(sockets: &mut SocketSet, handle: SocketHandle) -> Result<()> {
    let socket = sockets.get_mut(handle).ok_or(Error::Closed)?;
    socket.remote_ip = match socket.remote_ip {
        IpAddress::Any => IpAddress::Any,
        IpAddress::Ipv4(_) => IpAddress::Ipv4(crate::wire::Ipv4Address::UNSPECIFIED),
        IpAddress::Ipv6(_) => IpAddress::Ipv6(crate::wire::Ipv6Address::UNSPECIFIED),
    };
    socket.remote_port = 0;
    socket.remote_zone = 0;
    socket.bound_iface = 0;
    socket.flags.remove(SocketFlags::CONNECTED);
    Ok(())
}

/// Re-point endpoints bound to an interface address that changed.
pub(crate) fn addr_changed(sockets: &mut SocketSet, old: &IpAddress, new: &IpAddress) {
    if old.is_unspecified() || new.is_unspecified() {
        return;
    }
    for (_, socket) in sockets.iter_mut() {
        if socket.local_ip == *old {
            socket.local_ip = *new;
        }
    }
}

/// Allocate a free local port from the dynamic/private range.
///
/// A bounded scan: the cursor advances at most once around the whole range
/// before the attempt is abandoned.
fn ephemeral_port(sockets: &mut SocketSet, rng: &mut Rng, handle: SocketHandle) -> Result<u16> {
    let range = usize::from(EPHEMERAL_PORT_END - EPHEMERAL_PORT_START) + 1;
    let bound_in_range = sockets
        .iter()
        .filter(|(other, socket)| *other != handle && socket.local_port >= EPHEMERAL_PORT_START)
        .count();
    if bound_in_range >= range {
        net_debug!("udp: out of free local ports");
        return Err(Error::AddrInUse);
    }

    let mut port = match sockets.next_port {
        Some(port) => port,
        None => {
            let seed = rng.ephemeral_port();
            sockets.next_port = Some(seed);
            seed
        }
    };

    for _ in 0..range {
        port = if port == EPHEMERAL_PORT_END {
            EPHEMERAL_PORT_START
        } else {
            port + 1
        };
        let taken = sockets
            .iter()
            .any(|(other, socket)| other != handle && socket.local_port == port);
        if !taken {
            sockets.next_port = Some(port);
            return Ok(port);
        }
    }
    net_debug!("udp: out of free local ports");
    Err(Error::AddrInUse)
}

fn select_zone(interfaces: &Interfaces, hint: u8) -> u8 {
    if hint != 0 {
        return hint;
    }
    interfaces
        .iter()
        .find(|iface| iface.is_up() && !iface.ipv6().is_empty())
        .map(|iface| iface.index())
        .unwrap_or(0)
}

/// Select the source address for a transmission from this endpoint.
fn select_source(socket: &Socket, iface: &Interface, dst: &IpAddress) -> Result<IpAddress> {
    match dst {
        IpAddress::Ipv6(dst6) => {
            match socket.local_ip {
                IpAddress::Ipv6(local) if !local.is_unspecified() && !local.is_multicast() => {
                    // Use the bound address, if it is still valid.
                    if iface.ipv6_match(&local).is_none() {
                        return Err(Error::NoRoute);
                    }
                    Ok(IpAddress::Ipv6(local))
                }
                _ => iface
                    .select_source_v6(dst6)
                    .map(IpAddress::Ipv6)
                    .ok_or(Error::NoRoute),
            }
        }
        IpAddress::Ipv4(_) => {
            match socket.local_ip {
                IpAddress::Ipv4(local) if !local.is_unspecified() && !local.is_multicast() => {
                    // The bound address could be stale if the interface
                    // address has changed since.
                    if iface.ipv4_addr() != Some(local) {
                        return Err(Error::NoRoute);
                    }
                    Ok(IpAddress::Ipv4(local))
                }
                _ => iface
                    .ipv4_addr()
                    .map(IpAddress::Ipv4)
                    .ok_or(Error::NoRoute),
            }
        }
        IpAddress::Any => Err(Error::InvalidArg),
    }
}

/// Send a datagram to the connected remote endpoint.
pub(crate) fn send<D: Device>(
    sockets: &mut SocketSet,
    interfaces: &Interfaces,
    rng: &mut Rng,
    stats: &mut Stats,
    events: &mut alloc::vec::Vec<Event>,
    device: &mut D,
    handle: SocketHandle,
    pb: PacketBuf,
) -> Result<()> {
    let (remote_ip, remote_port) = match sockets.get(handle) {
        Some(socket) => (socket.remote_ip, socket.remote_port),
        None => return Err(Error::Closed),
    };
    if remote_ip.is_any_type() {
        return Err(Error::InvalidArg);
    }
    send_to(sockets, interfaces, rng, stats, events, device, handle, pb, remote_ip, remote_port)
}

/// Send a datagram to an explicit destination.
///
/// The buffer holds the application payload; the UDP header is prepended
/// here (chaining a fresh header buffer in front if the headroom is spent),
/// the checksum filled per protocol and options, and the datagram routed
/// per the endpoint's interface constraints.
#[allow(clippy::too_many_arguments)]
pub(crate) fn send_to<D: Device>(
    sockets: &mut SocketSet,
    interfaces: &Interfaces,
    rng: &mut Rng,
    stats: &mut Stats,
    events: &mut alloc::vec::Vec<Event>,
    device: &mut D,
    handle: SocketHandle,
    mut pb: PacketBuf,
    dst_addr: IpAddress,
    dst_port: u16,
) -> Result<()> {
    let version = match dst_addr.version() {
        Some(version) => version,
        None => return Err(Error::InvalidArg),
    };
    {
        let socket = sockets.get(handle).ok_or(Error::Closed)?;
        if !socket.local_ip.accepts_version(version) {
            return Err(Error::InvalidArg);
        }
    }

    // An unbound endpoint is bound here, to the port the reply will reach.
    let needs_bind = sockets.get(handle).map_or(false, |socket| socket.local_port == 0);
    if needs_bind {
        let local_ip = sockets.get(handle).ok_or(Error::Closed)?.local_ip;
        bind(sockets, interfaces, rng, handle, local_ip, 0)?;
    }

    let socket = sockets.get(handle).ok_or(Error::Closed)?;

    // Interface choice: the endpoint's binding wins, then the multicast
    // overrides, then an ordinary route lookup.
    let mut next_hop = None;
    let iface_idx = if socket.bound_iface() != 0 {
        socket.bound_iface()
    } else if dst_addr.is_multicast() && socket.mcast_iface != 0 {
        socket.mcast_iface
    } else if let (IpAddress::Ipv4(_), Some(mcast_src)) = (dst_addr, socket.mcast_addr4) {
        // The IPv4 multicast override names an interface by one of its
        // addresses; a stale override falls back to the routing table.
        let by_override = if dst_addr.is_multicast()
            && !mcast_src.is_unspecified()
            && !mcast_src.is_broadcast()
        {
            interfaces
                .iter()
                .find(|iface| iface.is_up() && iface.ipv4_addr() == Some(mcast_src))
                .map(|iface| iface.index())
        } else {
            None
        };
        match by_override {
            Some(index) => index,
            None => {
                let route = crate::iface::route(interfaces, &dst_addr).ok_or_else(|| {
                    stats.udp.rterr += 1;
                    Error::NoRoute
                })?;
                next_hop = Some(route.next_hop);
                route.iface
            }
        }
    } else {
        let route = crate::iface::route(interfaces, &dst_addr).ok_or_else(|| {
            stats.udp.rterr += 1;
            Error::NoRoute
        })?;
        next_hop = Some(route.next_hop);
        route.iface
    };

    let iface = interfaces.get(iface_idx).ok_or_else(|| {
        stats.udp.rterr += 1;
        Error::NoRoute
    })?;
    let next_hop = match next_hop {
        Some(next_hop) => next_hop,
        None => ip::next_hop_on(iface, &dst_addr).ok_or_else(|| {
            stats.udp.rterr += 1;
            Error::NoRoute
        })?,
    };

    // Broadcast needs an explicit opt-in.
    if !socket.flags.contains(SocketFlags::BROADCAST) && dst_addr.is_broadcast(iface.ipv4()) {
        net_debug!("udp: broadcast send without BROADCAST option");
        return Err(Error::InvalidArg);
    }

    let src_addr = select_source(socket, iface, &dst_addr)?;

    let local_port = socket.local_port;
    let flags = socket.flags;
    let coverage_tx = socket.coverage_tx;
    let hop_limit = if dst_addr.is_multicast() { socket.mcast_ttl } else { socket.ttl };

    // Add the header in front of the payload; if the headroom is already
    // spent, a separate header buffer is chained before the payload.
    if pb.prepend(UDP_HEADER_LEN).is_err() {
        let mut headed = PacketBuf::alloc(Layer::Ip, UDP_HEADER_LEN);
        if !pb.is_empty() {
            headed.chain(pb);
        }
        pb = headed;
    }

    let tot_len = pb.tot_len();
    if tot_len > usize::from(u16::MAX) {
        return Err(Error::NoBuf);
    }

    let protocol = if flags.contains(SocketFlags::UDPLITE) {
        IpProtocol::UdpLite
    } else {
        IpProtocol::Udp
    };

    // Fill the header; the checksum starts out as the "none" sentinel.
    {
        let header = udp_packet::new_unchecked_mut(pb.payload_mut());
        header.set_src_port(local_port);
        header.set_dst_port(dst_port);
        header.set_checksum(None);
    }

    if protocol == IpProtocol::UdpLite {
        // The length field carries the checksum coverage. An out-of-range
        // coverage in the endpoint falls back to covering the complete
        // datagram, transmitted as the 0 wildcard.
        let mut coverage = usize::from(coverage_tx);
        let mut coverage_field = coverage;
        if coverage < UDP_HEADER_LEN || coverage > tot_len {
            coverage_field = 0;
            coverage = tot_len;
        }
        {
            let header = udp_packet::new_unchecked_mut(pb.payload_mut());
            header.set_len(coverage_field as u16);
        }
        let sum = pseudo_header_checksum_partial(
            &src_addr, &dst_addr, IpProtocol::UdpLite,
            tot_len as u32, coverage, pb.segments(),
        );
        let header = udp_packet::new_unchecked_mut(pb.payload_mut());
        header.set_computed_checksum(sum);
    } else {
        {
            let header = udp_packet::new_unchecked_mut(pb.payload_mut());
            header.set_len(tot_len as u16);
        }
        // The checksum is mandatory over IPv6 and elective over IPv4.
        let elective = matches!(dst_addr, IpAddress::Ipv4(_))
            && flags.contains(SocketFlags::NOCHKSUM);
        if !elective {
            let sum = pseudo_header_checksum_partial(
                &src_addr, &dst_addr, IpProtocol::Udp,
                tot_len as u32, tot_len, pb.segments(),
            );
            let header = udp_packet::new_unchecked_mut(pb.payload_mut());
            header.set_computed_checksum(sum);
        }
    }

    if flags.contains(SocketFlags::MULTICAST_LOOP) && dst_addr.is_multicast() {
        pb.flags.insert(BufFlags::MCAST_LOOP);
        // Local listeners hear the datagram as if it had arrived on the
        // outbound interface.
        let meta = Meta {
            iface: iface_idx,
            src: src_addr,
            dst: dst_addr,
            protocol,
            header_len: 0,
            broadcast: false,
        };
        let echo = pb.deep_clone();
        input(sockets, interfaces, stats, events, Checksum::Manual, &meta, echo);
    }

    let iface = interfaces.get(iface_idx).ok_or(Error::NoRoute)?;
    net_trace!("udp: sending datagram of length {}", tot_len);
    stats.udp.xmit += 1;
    ip::output_on(
        iface, stats, device, pb,
        src_addr, dst_addr, next_hop,
        hop_limit, protocol, &[], Checksum::Manual,
    )
}
