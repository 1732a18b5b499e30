//! IP input and output processing.
//!
//! Input validates the header, enforces TTL, fragmentation and scope rules,
//! establishes whether the packet addresses this host and dispatches upward
//! by protocol number. Output prepends the version-appropriate header and
//! hands the frame to the device. Interface and source selection for
//! endpoint sends live with the endpoint table; this module only ever
//! transmits on an already-chosen interface.
use crate::buffer::PacketBuf;
use crate::iface::{Interface, Interfaces};
use crate::layer::{igmp, udp, Error, Result};
use crate::nic::{Device, TxResult};
use crate::rand::Rng;
use crate::stack::{Event, Stats};
use crate::wire::{
    ipv4_packet, ipv6_packet, Checksum, IpAddress, IpProtocol, Ipv4Repr, Ipv6Repr,
    IPV4_HEADER_LEN, IPV6_HEADER_LEN,
};

/// Where an incoming packet came from and whom it addresses.
///
/// Computed once by IP input and consulted by every transport above it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Meta {
    /// The receiving interface.
    pub iface: u8,
    pub src: IpAddress,
    pub dst: IpAddress,
    pub protocol: IpProtocol,
    /// Octets of IP header in front of the transport payload.
    pub header_len: usize,
    /// The destination is an IPv4 limited or subnet-directed broadcast.
    pub broadcast: bool,
}

/// Process one packet handed up by a link.
///
/// The payload cursor points at the IP header. Invalid packets are counted
/// and dropped; valid ones are dispatched to their protocol or surfaced as
/// an [`Event`] for the external collaborators.
///
/// [`Event`]: ../../stack/enum.Event.html
pub(crate) fn input(
    interfaces: &mut Interfaces,
    sockets: &mut udp::SocketSet,
    rng: &mut Rng,
    stats: &mut Stats,
    events: &mut alloc::vec::Vec<Event>,
    rx_checksum: Checksum,
    iface_idx: u8,
    pb: PacketBuf,
) {
    stats.ip.recv += 1;
    match crate::wire::IpVersion::of_packet(pb.payload()) {
        Ok(crate::wire::IpVersion::Ipv4) => {
            input_v4(interfaces, sockets, rng, stats, events, rx_checksum, iface_idx, pb)
        }
        Ok(crate::wire::IpVersion::Ipv6) => {
            input_v6(interfaces, sockets, stats, events, rx_checksum, iface_idx, pb)
        }
        Err(_) => {
            net_debug!("ip: dropping packet of unknown version");
            stats.ip.drop += 1;
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn input_v4(
    interfaces: &mut Interfaces,
    sockets: &mut udp::SocketSet,
    rng: &mut Rng,
    stats: &mut Stats,
    events: &mut alloc::vec::Vec<Event>,
    rx_checksum: Checksum,
    iface_idx: u8,
    mut pb: PacketBuf,
) {
    let (repr, header_len, broadcast) = {
        let iface = match interfaces.get(iface_idx) {
            Some(iface) => iface,
            None => {
                stats.ip.drop += 1;
                return;
            }
        };

        // The header must be contiguous in the first segment; the payload
        // may continue into the chain.
        if pb.len() < IPV4_HEADER_LEN {
            stats.ip.lenerr += 1;
            stats.ip.drop += 1;
            return;
        }
        let header = ipv4_packet::new_unchecked(pb.payload());
        let header_len = usize::from(header.header_len());
        let total_len = usize::from(header.total_len());
        if header.version() != 4
            || header_len < IPV4_HEADER_LEN
            || header_len > pb.len()
            || total_len < header_len
            || total_len > pb.tot_len()
        {
            stats.ip.lenerr += 1;
            stats.ip.drop += 1;
            return;
        }
        if rx_checksum.manual()
            && crate::wire::ip::checksum::data(&pb.payload()[..header_len]) != !0
        {
            net_debug!("ip: header checksum mismatch");
            stats.ip.chkerr += 1;
            stats.ip.drop += 1;
            return;
        }
        let repr = Ipv4Repr {
            src_addr: header.src_addr(),
            dst_addr: header.dst_addr(),
            protocol: header.protocol(),
            payload_len: total_len - header_len,
            hop_limit: header.hop_limit(),
        };
        if repr.hop_limit == 0 {
            stats.ip.proterr += 1;
            stats.ip.drop += 1;
            return;
        }
        // Reassembly is not ours; fragments are dropped wholesale.
        if header.more_frags() || header.frag_offset() != 0 {
            net_debug!("ip: dropping fragmented datagram");
            stats.ip.proterr += 1;
            stats.ip.drop += 1;
            return;
        }

        let broadcast = iface.is_broadcast_v4(repr.dst_addr);
        let multicast_member = repr.dst_addr.is_multicast()
            && iface.igmp.is_member(repr.dst_addr);
        if !(iface.accepts_v4(repr.dst_addr) || multicast_member) {
            stats.ip.drop += 1;
            return;
        }
        (repr, header_len, broadcast)
    };

    // Cut link padding, then move the cursor to the transport payload.
    pb.truncate_total(header_len + repr.payload_len);
    if pb.strip(header_len).is_err() {
        stats.ip.lenerr += 1;
        stats.ip.drop += 1;
        return;
    }

    let meta = Meta {
        iface: iface_idx,
        src: IpAddress::Ipv4(repr.src_addr),
        dst: IpAddress::Ipv4(repr.dst_addr),
        protocol: repr.protocol,
        header_len,
        broadcast,
    };

    dispatch(interfaces, sockets, rng, stats, events, rx_checksum, meta, pb)
}

fn input_v6(
    interfaces: &mut Interfaces,
    sockets: &mut udp::SocketSet,
    stats: &mut Stats,
    events: &mut alloc::vec::Vec<Event>,
    rx_checksum: Checksum,
    iface_idx: u8,
    mut pb: PacketBuf,
) {
    let repr = {
        let iface = match interfaces.get(iface_idx) {
            Some(iface) => iface,
            None => {
                stats.ip.drop += 1;
                return;
            }
        };

        if pb.len() < IPV6_HEADER_LEN {
            stats.ip.lenerr += 1;
            stats.ip.drop += 1;
            return;
        }
        let header = ipv6_packet::new_unchecked(&pb.payload()[..IPV6_HEADER_LEN]);
        if header.version() != 6 {
            stats.ip.lenerr += 1;
            stats.ip.drop += 1;
            return;
        }
        let repr = Ipv6Repr {
            src_addr: header.src_addr(),
            dst_addr: header.dst_addr(),
            next_header: header.next_header(),
            payload_len: header.payload_len().into(),
            hop_limit: header.hop_limit(),
        };
        if repr.payload_len + IPV6_HEADER_LEN > pb.tot_len() {
            stats.ip.lenerr += 1;
            stats.ip.drop += 1;
            return;
        }
        if repr.hop_limit == 0 {
            stats.ip.proterr += 1;
            stats.ip.drop += 1;
            return;
        }
        // A multicast source never appears on the wire.
        if repr.src_addr.is_multicast() {
            stats.ip.proterr += 1;
            stats.ip.drop += 1;
            return;
        }

        if !(iface.accepts_v6(&repr.dst_addr) || repr.dst_addr.is_multicast()) {
            stats.ip.drop += 1;
            return;
        }
        repr
    };

    pb.truncate_total(IPV6_HEADER_LEN + repr.payload_len);
    if pb.strip(IPV6_HEADER_LEN).is_err() {
        stats.ip.lenerr += 1;
        stats.ip.drop += 1;
        return;
    }

    let meta = Meta {
        iface: iface_idx,
        src: IpAddress::Ipv6(repr.src_addr),
        dst: IpAddress::Ipv6(repr.dst_addr),
        protocol: repr.next_header,
        header_len: IPV6_HEADER_LEN,
        broadcast: false,
    };

    match meta.protocol {
        IpProtocol::Udp | IpProtocol::UdpLite => {
            udp::input(sockets, interfaces, stats, events, rx_checksum, &meta, pb)
        }
        IpProtocol::Icmpv6 => events.push(Event::Icmp { meta: meta.into(), pb }),
        IpProtocol::Tcp => events.push(Event::Tcp { meta: meta.into(), pb }),
        protocol => {
            unknown_protocol(stats, events, &meta, protocol, pb);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn dispatch(
    interfaces: &mut Interfaces,
    sockets: &mut udp::SocketSet,
    rng: &mut Rng,
    stats: &mut Stats,
    events: &mut alloc::vec::Vec<Event>,
    rx_checksum: Checksum,
    meta: Meta,
    pb: PacketBuf,
) {
    match meta.protocol {
        IpProtocol::Igmp => {
            let dst = match meta.dst {
                IpAddress::Ipv4(dst) => dst,
                _ => unreachable!("v4 dispatch with non-v4 destination"),
            };
            let iface = match interfaces.get_mut(meta.iface) {
                Some(iface) => iface,
                None => return,
            };
            igmp::input(iface, rng, stats, pb, dst)
        }
        IpProtocol::Udp | IpProtocol::UdpLite => {
            udp::input(sockets, interfaces, stats, events, rx_checksum, &meta, pb)
        }
        IpProtocol::Icmp => events.push(Event::Icmp { meta: meta.into(), pb }),
        IpProtocol::Tcp => events.push(Event::Tcp { meta: meta.into(), pb }),
        protocol => {
            unknown_protocol(stats, events, &meta, protocol, pb);
        }
    }
}

/// Best-effort signal for a protocol nobody claims.
///
/// Restores the headers and surfaces the datagram so the external ICMP
/// assembly can answer with a protocol-unreachable. Broadcast and
/// multicast are dropped silently instead.
fn unknown_protocol(
    stats: &mut Stats,
    events: &mut alloc::vec::Vec<Event>,
    meta: &Meta,
    protocol: IpProtocol,
    mut pb: PacketBuf,
) {
    stats.ip.proterr += 1;
    if meta.broadcast || meta.dst.is_multicast() {
        stats.ip.drop += 1;
        return;
    }
    if pb.prepend(meta.header_len).is_err() {
        stats.ip.drop += 1;
        return;
    }
    events.push(Event::ProtocolUnreachable { meta: (*meta).into(), protocol, pb });
}

/// The on-link hop a destination resolves to on a fixed interface.
pub(crate) fn next_hop_on(iface: &Interface, dst: &IpAddress) -> Option<IpAddress> {
    match dst {
        IpAddress::Any => None,
        IpAddress::Ipv4(v4) => {
            if v4.is_multicast() || iface.is_broadcast_v4(*v4) {
                return Some(*dst);
            }
            if iface.ipv4().map_or(false, |cidr| cidr.subnet().contains(*v4)) {
                return Some(*dst);
            }
            iface.gateway4().map(IpAddress::Ipv4)
        }
        IpAddress::Ipv6(v6) => {
            if v6.is_multicast() || v6.is_scoped() {
                return Some(*dst);
            }
            let on_link = iface.ipv6().iter().any(|entry| {
                entry.state.is_valid()
                    && crate::wire::Ipv6Cidr::new(entry.addr, entry.prefix_len).contains(*v6)
            });
            if on_link {
                return Some(*dst);
            }
            iface.gateway6().map(IpAddress::Ipv6)
        }
    }
}

/// Transmit a payload on a chosen interface.
///
/// Prepends the IP header for the family of `dst`, applying `options` (IPv4
/// only, used for the Router Alert of IGMP), computes the header checksum
/// and hands the frame to the device addressed at `next_hop`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn output_on<D: Device>(
    iface: &Interface,
    stats: &mut Stats,
    device: &mut D,
    mut pb: PacketBuf,
    src: IpAddress,
    dst: IpAddress,
    next_hop: IpAddress,
    hop_limit: u8,
    protocol: IpProtocol,
    options: &[u8],
    tx_checksum: Checksum,
) -> Result<()> {
    let payload_len = pb.tot_len();
    match (src, dst) {
        (IpAddress::Ipv4(src), IpAddress::Ipv4(dst)) => {
            let repr = Ipv4Repr {
                src_addr: src,
                dst_addr: dst,
                protocol,
                payload_len,
                hop_limit,
            };
            let header_len = IPV4_HEADER_LEN + options.len();
            let header = match pb.prepend(header_len) {
                Ok(header) => header,
                Err(_) => {
                    stats.ip.drop += 1;
                    return Err(Error::NoBuf);
                }
            };
            repr.emit(ipv4_packet::new_unchecked_mut(header), options, tx_checksum);
        }
        (IpAddress::Ipv6(src), IpAddress::Ipv6(dst)) => {
            let repr = Ipv6Repr {
                src_addr: src,
                dst_addr: dst,
                next_header: protocol,
                payload_len,
                hop_limit,
            };
            let header = match pb.prepend(IPV6_HEADER_LEN) {
                Ok(header) => header,
                Err(_) => {
                    stats.ip.drop += 1;
                    return Err(Error::NoBuf);
                }
            };
            repr.emit(ipv6_packet::new_unchecked_mut(header));
        }
        _ => {
            stats.ip.drop += 1;
            return Err(Error::InvalidArg);
        }
    }

    stats.ip.xmit += 1;
    match device.transmit(iface.index(), pb, next_hop) {
        TxResult::Sent => Ok(()),
        TxResult::NoRoute(_) => {
            stats.ip.rterr += 1;
            Err(Error::NoRoute)
        }
        TxResult::NoBuf(_) => {
            stats.ip.drop += 1;
            Err(Error::NoBuf)
        }
    }
}
