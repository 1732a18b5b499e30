use std::cell::RefCell;
use std::rc::Rc;
use std::vec::Vec;

use crate::buffer::{Layer, PacketBuf};
use crate::iface::{IfaceFlags, Interface};
use crate::nic::loopback::Loopback;
use crate::rand::Rng;
use crate::stack::{Event, Stack};
use crate::wire::{
    ipv4_packet, udp_packet, Checksum, IpAddress, IpProtocol, Ipv4Address, Ipv4Cidr, Ipv4Repr,
    UDP_HEADER_LEN,
};

use super::{Socket, SocketFlags, SocketHandle};

const IFACE_ADDR: Ipv4Address = Ipv4Address([192, 0, 2, 3]);
const PEER_ADDR: Ipv4Address = Ipv4Address([192, 0, 2, 9]);

fn stack() -> Stack {
    let mut stack = Stack::new(Rng::from_seed(0x55aa));
    let mut iface = Interface::new(1);
    iface.flags = IfaceFlags::UP | IfaceFlags::BROADCAST | IfaceFlags::MULTICAST | IfaceFlags::IGMP;
    iface.set_ipv4(Some(Ipv4Cidr::new(IFACE_ADDR, 24)), Some(Ipv4Address::new(192, 0, 2, 1)));
    stack.add_iface(iface).unwrap();
    stack
}

/// Assemble a complete IPv4+UDP datagram the way a link would hand it up.
fn datagram(
    src: Ipv4Address, src_port: u16,
    dst: Ipv4Address, dst_port: u16,
    payload: &[u8],
) -> PacketBuf {
    let udp_len = UDP_HEADER_LEN + payload.len();
    let mut bytes = std::vec![0u8; 20 + udp_len];
    let repr = Ipv4Repr {
        src_addr: src,
        dst_addr: dst,
        protocol: IpProtocol::Udp,
        payload_len: udp_len,
        hop_limit: 64,
    };
    repr.emit(ipv4_packet::new_unchecked_mut(&mut bytes[..20]), &[], Checksum::Manual);
    {
        let header = udp_packet::new_unchecked_mut(&mut bytes[20..]);
        header.set_src_port(src_port);
        header.set_dst_port(dst_port);
        header.set_len(udp_len as u16);
        header.payload_mut_slice().copy_from_slice(payload);
        header.fill_checksum(src.into(), dst.into());
    }
    PacketBuf::from_slice(&bytes)
}

type Deliveries = Rc<RefCell<Vec<(SocketHandle, Vec<u8>, bool)>>>;

/// Bind a recording endpoint; deliveries log the payload and whether the
/// buffer still has headroom (true only for the fan-out primary, whose
/// buffer is the arriving original rather than a flattened clone).
fn listener(
    stack: &mut Stack,
    log: &Deliveries,
    flags: SocketFlags,
    port: u16,
) -> SocketHandle {
    let handle = stack.udp_new(Socket::new_v4());
    let socket = stack.udp_socket_mut(handle).unwrap();
    socket.flags = flags;
    let log = Rc::clone(log);
    socket.on_recv(Box::new(move |_socket, mut pb, _src, _src_port| {
        let original = pb.prepend(1).is_ok();
        if original {
            pb.strip(1).unwrap();
        }
        log.borrow_mut().push((handle, pb.to_vec(), original));
    }));
    stack.udp_bind(handle, IpAddress::Ipv4(Ipv4Address::UNSPECIFIED), port).unwrap();
    handle
}

#[test]
fn connected_match_wins_and_promotes() {
    let mut stack = stack();
    let log: Deliveries = Rc::new(RefCell::new(Vec::new()));

    let plain = listener(&mut stack, &log, SocketFlags::REUSEADDR, 7000);
    let connected = listener(
        &mut stack, &log,
        SocketFlags::REUSEADDR, 7000,
    );
    stack.udp_connect(connected, IpAddress::Ipv4(PEER_ADDR), 9).unwrap();

    stack.receive(1, datagram(PEER_ADDR, 9, IFACE_ADDR, 7000, b"hello"));
    {
        let log = log.borrow();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].0, connected);
        assert_eq!(log[0].1, b"hello");
    }

    // The full match moved to the head of the table; the repeat is a cache
    // hit.
    assert_eq!(stack.stats().udp.cachehit, 0);
    stack.receive(1, datagram(PEER_ADDR, 9, IFACE_ADDR, 7000, b"again"));
    assert_eq!(stack.stats().udp.cachehit, 1);

    // Traffic from another source still reaches the unconnected endpoint.
    stack.receive(1, datagram(Ipv4Address::new(192, 0, 2, 77), 9, IFACE_ADDR, 7000, b"other"));
    let log = log.borrow();
    assert_eq!(log.last().unwrap().0, plain);
}

#[test]
fn broadcast_reuseaddr_fanout() {
    let mut stack = stack();
    let log: Deliveries = Rc::new(RefCell::new(Vec::new()));

    let reuse = SocketFlags::REUSEADDR | SocketFlags::BROADCAST;
    let first = listener(&mut stack, &log, reuse, 5000);
    let second = listener(&mut stack, &log, reuse, 5000);

    stack.receive(1, datagram(PEER_ADDR, 4000, Ipv4Address::BROADCAST, 5000, b"to-all"));

    let log = log.borrow();
    let receivers: Vec<SocketHandle> = log.iter().map(|entry| entry.0).collect();
    assert!(receivers.contains(&first) && receivers.contains(&second));
    assert!(log.iter().all(|entry| entry.1 == b"to-all"));
    // One clone for every delivery but the primary one.
    assert_eq!(stack.stats().udp.clones as usize, log.len() - 1);
}

#[test]
fn broadcast_prefers_iface_bound_endpoint() {
    let mut stack = stack();
    let log: Deliveries = Rc::new(RefCell::new(Vec::new()));

    let reuse = SocketFlags::REUSEADDR | SocketFlags::BROADCAST;
    let plain = listener(&mut stack, &log, reuse, 5000);
    let bound = listener(&mut stack, &log, reuse, 5000);
    stack.udp_bind_iface(bound, 1).unwrap();

    stack.receive(1, datagram(PEER_ADDR, 4000, Ipv4Address::BROADCAST, 5000, b"x"));

    let log = log.borrow();
    assert_eq!(log.len(), 2);
    // The interface-bound endpoint is the primary (it received the
    // original buffer), the other one the clone.
    let primary = log.iter().find(|entry| entry.2).unwrap();
    let clone = log.iter().find(|entry| !entry.2).unwrap();
    assert_eq!(primary.0, bound);
    assert_eq!(clone.0, plain);
}

#[test]
fn iface_bound_endpoint_ignores_other_links() {
    let mut stack = stack();
    let mut other = Interface::new(2);
    other.flags = IfaceFlags::UP | IfaceFlags::BROADCAST;
    other.set_ipv4(Some(Ipv4Cidr::new(Ipv4Address::new(198, 51, 100, 1), 24)), None);
    stack.add_iface(other).unwrap();

    let log: Deliveries = Rc::new(RefCell::new(Vec::new()));
    let bound = listener(&mut stack, &log, SocketFlags::empty(), 6000);
    stack.udp_bind_iface(bound, 1).unwrap();

    stack.receive(2, datagram(PEER_ADDR, 1234, Ipv4Address::new(198, 51, 100, 1), 6000, b"no"));
    assert!(log.borrow().is_empty());

    stack.receive(1, datagram(PEER_ADDR, 1234, IFACE_ADDR, 6000, b"yes"));
    assert_eq!(log.borrow().len(), 1);
}

#[test]
fn rebind_is_idempotent() {
    let mut stack = stack();
    let handle = stack.udp_new(Socket::new_v4());
    let addr = IpAddress::Ipv4(IFACE_ADDR);
    stack.udp_bind(handle, addr, 8000).unwrap();
    stack.udp_bind(handle, addr, 8000).unwrap();

    // Still one endpoint holding the pair: an unrelated endpoint is
    // rejected, and close returns the endpoint exactly once.
    let other = stack.udp_new(Socket::new_v4());
    assert_eq!(
        stack.udp_bind(other, addr, 8000),
        Err(crate::layer::Error::AddrInUse)
    );
    assert!(stack.udp_close(handle).is_ok());
    assert!(stack.udp_close(handle).is_err());
}

#[test]
fn unmatched_unicast_surfaces_port_unreachable() {
    let mut stack = stack();
    stack.receive(1, datagram(PEER_ADDR, 4000, IFACE_ADDR, 9999, b"lost"));

    match stack.poll_event() {
        Some(Event::PortUnreachable { meta, pb }) => {
            assert_eq!(meta.dst, IpAddress::Ipv4(IFACE_ADDR));
            // The buffer was rewound to the IP header for the ICMP answer.
            let header = ipv4_packet::new_checked(pb.payload()).unwrap();
            assert_eq!(header.dst_addr(), IFACE_ADDR);
        }
        other => panic!("expected a port unreachable event, got {:?}", other),
    }

    // Broadcast misses stay silent.
    stack.receive(1, datagram(PEER_ADDR, 4000, Ipv4Address::BROADCAST, 9999, b"lost"));
    assert!(stack.poll_event().is_none());
}

#[test]
fn checksum_mismatch_is_counted_and_dropped() {
    let mut stack = stack();
    let log: Deliveries = Rc::new(RefCell::new(Vec::new()));
    listener(&mut stack, &log, SocketFlags::empty(), 5353);

    let pb = datagram(PEER_ADDR, 53, IFACE_ADDR, 5353, b"answer");
    let mut bytes = pb.to_vec();
    // Flip a payload byte after the checksum was computed.
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    stack.receive(1, PacketBuf::from_slice(&bytes));

    assert!(log.borrow().is_empty());
    assert_eq!(stack.stats().udp.chkerr, 1);
    assert_eq!(stack.stats().udp.drop, 1);
}

#[test]
fn send_to_emits_well_formed_datagram() {
    let mut stack = stack();
    let mut device = Loopback::new(4);

    let handle = stack.udp_new(Socket::new_v4());
    stack.udp_bind(handle, IpAddress::Ipv4(IFACE_ADDR), 4433).unwrap();

    let mut pb = PacketBuf::alloc(Layer::Transport, 4);
    pb.payload_mut().copy_from_slice(b"ping");
    stack.udp_send_to(&mut device, handle, pb, IpAddress::Ipv4(PEER_ADDR), 5544).unwrap();

    let sent = device.pop().expect("a frame was transmitted");
    assert_eq!(sent.iface, 1);
    assert_eq!(sent.next_hop, IpAddress::Ipv4(PEER_ADDR));

    let header = ipv4_packet::new_checked(&sent.frame).unwrap();
    assert_eq!(header.protocol(), IpProtocol::Udp);
    assert_eq!(header.src_addr(), IFACE_ADDR);
    assert_eq!(header.dst_addr(), PEER_ADDR);
    assert!(header.verify_checksum());

    let body = udp_packet::new_unchecked(&sent.frame[20..]);
    assert_eq!(body.src_port(), 4433);
    assert_eq!(body.dst_port(), 5544);
    assert_eq!(body.len() as usize, UDP_HEADER_LEN + 4);
    assert!(body.verify_checksum(IFACE_ADDR.into(), PEER_ADDR.into()));
    assert_eq!(body.payload_slice(), b"ping");
}

#[test]
fn send_without_route_fails() {
    let mut stack = Stack::new(Rng::from_seed(1));
    let mut iface = Interface::new(1);
    iface.flags = IfaceFlags::UP;
    iface.set_ipv4(Some(Ipv4Cidr::new(IFACE_ADDR, 24)), None);
    stack.add_iface(iface).unwrap();
    let mut device = Loopback::new(4);

    let handle = stack.udp_new(Socket::new_v4());
    let off_link = IpAddress::v4(203, 0, 113, 7);
    let pb = PacketBuf::alloc(Layer::Transport, 1);
    assert_eq!(
        stack.udp_send_to(&mut device, handle, pb, off_link, 9),
        Err(crate::layer::Error::NoRoute)
    );
    assert!(device.is_empty());
}

#[test]
fn broadcast_send_requires_option() {
    let mut stack = stack();
    let mut device = Loopback::new(4);

    let handle = stack.udp_new(Socket::new_v4());
    let pb = PacketBuf::alloc(Layer::Transport, 1);
    assert_eq!(
        stack.udp_send_to(
            &mut device, handle, pb,
            IpAddress::Ipv4(Ipv4Address::BROADCAST), 9,
        ),
        Err(crate::layer::Error::InvalidArg)
    );

    stack.udp_socket_mut(handle).unwrap().flags.insert(SocketFlags::BROADCAST);
    let pb = PacketBuf::alloc(Layer::Transport, 1);
    stack
        .udp_send_to(&mut device, handle, pb, IpAddress::Ipv4(Ipv4Address::BROADCAST), 9)
        .unwrap();
    assert_eq!(device.len(), 1);
}

#[test]
fn udplite_coverage_rules() {
    let mut stack = stack();
    let log: Deliveries = Rc::new(RefCell::new(Vec::new()));
    {
        let handle = stack.udp_new(Socket::new_v4());
        let socket = stack.udp_socket_mut(handle).unwrap();
        socket.flags = SocketFlags::UDPLITE;
        let log = Rc::clone(&log);
        socket.on_recv(Box::new(move |_socket, pb, _src, _port| {
            log.borrow_mut().push((handle, pb.to_vec(), false));
        }));
        stack.udp_bind(handle, IpAddress::Ipv4(Ipv4Address::UNSPECIFIED), 6363).unwrap();
    }

    // Coverage over the header only: payload corruption goes unnoticed.
    let mut bytes = udplite_datagram(8, b"data");
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    stack.receive(1, PacketBuf::from_slice(&bytes));
    assert_eq!(log.borrow().len(), 1);

    // Coverage 1..7 cannot even cover the header: malformed, dropped.
    let bytes = udplite_datagram(5, b"data");
    stack.receive(1, PacketBuf::from_slice(&bytes));
    assert_eq!(log.borrow().len(), 1);
    assert_eq!(stack.stats().udp.chkerr, 1);

    // Coverage 0 covers everything, like plain UDP.
    let bytes = udplite_datagram(0, b"data");
    stack.receive(1, PacketBuf::from_slice(&bytes));
    assert_eq!(log.borrow().len(), 2);
}

/// A UDPLite datagram with the length field used as checksum coverage.
fn udplite_datagram(coverage: u16, payload: &[u8]) -> std::vec::Vec<u8> {
    let udp_len = UDP_HEADER_LEN + payload.len();
    let mut bytes = std::vec![0u8; 20 + udp_len];
    let repr = Ipv4Repr {
        src_addr: PEER_ADDR,
        dst_addr: IFACE_ADDR,
        protocol: IpProtocol::UdpLite,
        payload_len: udp_len,
        hop_limit: 64,
    };
    repr.emit(ipv4_packet::new_unchecked_mut(&mut bytes[..20]), &[], Checksum::Manual);
    {
        let header = udp_packet::new_unchecked_mut(&mut bytes[20..]);
        header.set_src_port(1234);
        header.set_dst_port(6363);
        header.set_len(coverage);
        header.payload_mut_slice().copy_from_slice(payload);
    }
    let effective = if coverage == 0 { udp_len } else { usize::from(coverage).min(udp_len) };
    let sum = crate::wire::pseudo_header_checksum_partial(
        &IpAddress::Ipv4(PEER_ADDR), &IpAddress::Ipv4(IFACE_ADDR),
        IpProtocol::UdpLite, udp_len as u32, effective,
        core::iter::once(&bytes[20..]).map(|slice| &slice[..]),
    );
    udp_packet::new_unchecked_mut(&mut bytes[20..]).set_computed_checksum(sum);
    bytes
}

#[test]
fn multicast_loop_reaches_local_listener() {
    let mut stack = stack();
    let mut device = Loopback::new(4);
    let group = Ipv4Address::new(224, 0, 1, 20);

    let log: Deliveries = Rc::new(RefCell::new(Vec::new()));
    let sender = stack.udp_new(Socket::new_v4());
    {
        let socket = stack.udp_socket_mut(sender).unwrap();
        socket.flags = SocketFlags::MULTICAST_LOOP | SocketFlags::REUSEADDR;
        socket.mcast_iface = 1;
        let log = Rc::clone(&log);
        socket.on_recv(Box::new(move |_socket, pb, _src, _port| {
            log.borrow_mut().push((sender, pb.to_vec(), false));
        }));
    }
    stack.udp_bind(sender, IpAddress::Ipv4(Ipv4Address::UNSPECIFIED), 7700).unwrap();

    let mut pb = PacketBuf::alloc(Layer::Transport, 4);
    pb.payload_mut().copy_from_slice(b"loop");
    stack
        .udp_send_to(&mut device, sender, pb, IpAddress::Ipv4(group), 7700)
        .unwrap();

    // Once on the wire, once looped back up.
    assert_eq!(device.len(), 1);
    assert_eq!(log.borrow().len(), 1);
    assert_eq!(log.borrow()[0].1, b"loop");

    // The transmitted datagram used the multicast TTL.
    let sent = device.pop().unwrap();
    let header = ipv4_packet::new_checked(&sent.frame).unwrap();
    assert_eq!(header.hop_limit(), super::DEFAULT_MCAST_TTL);
}

#[test]
fn v6_delivery_requires_checksum() {
    use crate::iface::Ipv6AddrEntry;
    use crate::wire::{ipv6_packet, Ipv6Address, Ipv6AddressState, Ipv6Lifetime, Ipv6Repr};

    let mut stack = stack();
    let local = Ipv6Address::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 3);
    let peer = Ipv6Address::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 9);
    stack.iface_mut(1).unwrap().add_ipv6(Ipv6AddrEntry {
        addr: local,
        prefix_len: 64,
        state: Ipv6AddressState::Preferred,
        lifetime: Ipv6Lifetime::Infinite,
    }).unwrap();

    let log: Deliveries = Rc::new(RefCell::new(Vec::new()));
    {
        let handle = stack.udp_new(Socket::new_v6());
        let socket = stack.udp_socket_mut(handle).unwrap();
        let log = Rc::clone(&log);
        socket.on_recv(Box::new(move |_socket, pb, src, _port| {
            log.borrow_mut().push((handle, pb.to_vec(), src == IpAddress::Ipv6(peer)));
        }));
        stack
            .udp_bind(handle, IpAddress::Ipv6(Ipv6Address::UNSPECIFIED), 8125)
            .unwrap();
    }

    let build = |fill_checksum: bool| {
        let udp_len = UDP_HEADER_LEN + 5;
        let mut bytes = std::vec![0u8; 40 + udp_len];
        let repr = Ipv6Repr {
            src_addr: peer,
            dst_addr: local,
            next_header: IpProtocol::Udp,
            payload_len: udp_len,
            hop_limit: 64,
        };
        repr.emit(ipv6_packet::new_unchecked_mut(&mut bytes[..40]));
        {
            let header = udp_packet::new_unchecked_mut(&mut bytes[40..]);
            header.set_src_port(53);
            header.set_dst_port(8125);
            header.set_len(udp_len as u16);
            header.payload_mut_slice().copy_from_slice(b"sixsy");
            if fill_checksum {
                header.fill_checksum(peer.into(), local.into());
            }
        }
        PacketBuf::from_slice(&bytes)
    };

    // Over IPv6 the checksum is mandatory: an omitted one is dropped.
    stack.receive(1, build(false));
    assert!(log.borrow().is_empty());
    assert_eq!(stack.stats().udp.chkerr, 1);

    stack.receive(1, build(true));
    let log = log.borrow();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].1, b"sixsy");
    assert!(log[0].2, "source address survives demultiplexing");
}

#[test]
fn external_timers_ride_the_shared_wheel() {
    let mut stack = stack();
    let mut device = Loopback::new(1);

    // A DHCPv6-style client would tick every 500 ms.
    let token = stack.register_tick(5);
    let mut fired = 0;
    for _ in 0..10 {
        for due in stack.tick(&mut device) {
            assert_eq!(due, token);
            fired += 1;
        }
    }
    assert_eq!(fired, 2);
    assert_eq!(stack.now_ticks(), 10);
}

#[test]
fn ephemeral_ports_exhaust_to_addr_in_use() {
    let mut stack = stack();
    let range = usize::from(crate::rand::EPHEMERAL_PORT_END - crate::rand::EPHEMERAL_PORT_START) + 1;

    let any = IpAddress::Ipv4(Ipv4Address::UNSPECIFIED);
    for _ in 0..range {
        let handle = stack.udp_new(Socket::new_v4());
        stack.udp_bind(handle, any, 0).unwrap();
    }

    let one_more = stack.udp_new(Socket::new_v4());
    assert_eq!(stack.udp_bind(one_more, any, 0), Err(crate::layer::Error::AddrInUse));
}
