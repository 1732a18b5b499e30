use std::cell::RefCell;
use std::rc::Rc;
use std::vec::Vec;

use crate::buffer::PacketBuf;
use crate::iface::{FilterAction, IfaceFlags, Interface};
use crate::nic::loopback::{Captured, Loopback};
use crate::rand::Rng;
use crate::stack::Stack;
use crate::wire::{
    igmp_packet, ipv4_packet, Checksum, IgmpRepr, IpProtocol, Ipv4Address, Ipv4Cidr, Ipv4Repr,
    IGMP_HEADER_LEN, IPV4_ROUTER_ALERT_OPTION,
};

const IFACE_ADDR: Ipv4Address = Ipv4Address([192, 0, 2, 3]);
const GROUP: Ipv4Address = Ipv4Address([224, 0, 1, 1]);

type FilterLog = Rc<RefCell<Vec<(Ipv4Address, FilterAction)>>>;

fn stack_with_filter() -> (Stack, FilterLog) {
    let log: FilterLog = Rc::new(RefCell::new(Vec::new()));
    let mut stack = Stack::new(Rng::from_seed(0x1611));
    let mut iface = Interface::new(1);
    iface.flags = IfaceFlags::UP | IfaceFlags::BROADCAST | IfaceFlags::MULTICAST | IfaceFlags::IGMP;
    iface.set_ipv4(Some(Ipv4Cidr::new(IFACE_ADDR, 24)), None);
    {
        let log = Rc::clone(&log);
        iface.set_mac_filter(Box::new(move |group, action| {
            log.borrow_mut().push((group, action));
        }));
    }
    stack.add_iface(iface).unwrap();
    stack.igmp_start(1).unwrap();
    (stack, log)
}

/// Interpret one captured frame as an IGMP transmission.
fn parse_igmp(sent: &Captured) -> (Ipv4Repr, IgmpRepr, usize) {
    let header = ipv4_packet::new_checked(&sent.frame).unwrap();
    let repr = Ipv4Repr::parse(header, Checksum::Manual).unwrap();
    assert_eq!(repr.protocol, IpProtocol::Igmp);
    let header_len = usize::from(header.header_len());
    let message = IgmpRepr::parse(
        igmp_packet::new_checked(&sent.frame[header_len..]).unwrap(),
    ).unwrap();
    (repr, message, header_len)
}

/// Build a received IGMP message as a full IP datagram.
fn igmp_datagram(src: Ipv4Address, dst: Ipv4Address, repr: IgmpRepr) -> PacketBuf {
    let mut bytes = vec![0u8; 24 + IGMP_HEADER_LEN];
    let ip = Ipv4Repr {
        src_addr: src,
        dst_addr: dst,
        protocol: IpProtocol::Igmp,
        payload_len: IGMP_HEADER_LEN,
        hop_limit: 1,
    };
    ip.emit(
        ipv4_packet::new_unchecked_mut(&mut bytes[..24]),
        &IPV4_ROUTER_ALERT_OPTION,
        Checksum::Manual,
    );
    repr.emit(igmp_packet::new_unchecked_mut(&mut bytes[24..]));
    PacketBuf::from_slice(&bytes)
}

#[test]
fn join_sends_unsolicited_report() {
    let (mut stack, filters) = stack_with_filter();
    let mut device = Loopback::new(8);

    stack.igmp_join(&mut device, 1, GROUP).unwrap();

    let sent = device.pop().expect("join transmits a report");
    let (ip, message, header_len) = parse_igmp(&sent);
    assert_eq!(message, IgmpRepr::MembershipReport { group_addr: GROUP });
    assert_eq!(ip.dst_addr, GROUP);
    assert_eq!(ip.src_addr, IFACE_ADDR);
    assert_eq!(ip.hop_limit, 1);
    // Router Alert rides along in the IP options.
    assert_eq!(header_len, 24);

    // The MAC filter opened for all-systems at start and the group at join.
    assert_eq!(
        filters.borrow().as_slice(),
        &[
            (Ipv4Address::MULTICAST_ALL_SYSTEMS, FilterAction::Add),
            (GROUP, FilterAction::Add),
        ]
    );

    // The loss-tolerant repeat fires within the unsolicited report
    // interval.
    for _ in 0..10 {
        stack.tick(&mut device);
    }
    let repeat = device.pop().expect("delayed repeat report");
    let (_, message, _) = parse_igmp(&repeat);
    assert_eq!(message, IgmpRepr::MembershipReport { group_addr: GROUP });
    assert!(device.is_empty());
}

#[test]
fn second_join_is_reference_counted() {
    let (mut stack, filters) = stack_with_filter();
    let mut device = Loopback::new(8);

    stack.igmp_join(&mut device, 1, GROUP).unwrap();
    let _ = device.pop();
    stack.igmp_join(&mut device, 1, GROUP).unwrap();
    // No second report, no second filter call.
    assert!(device.is_empty());
    assert_eq!(filters.borrow().len(), 2);

    // The first leave only drops the reference.
    stack.igmp_leave(&mut device, 1, GROUP).unwrap();
    assert!(device.is_empty());
    assert_eq!(filters.borrow().len(), 2);
}

#[test]
fn leave_as_last_reporter() {
    let (mut stack, filters) = stack_with_filter();
    let mut device = Loopback::new(8);

    stack.igmp_join(&mut device, 1, GROUP).unwrap();
    let _ = device.pop();

    stack.igmp_leave(&mut device, 1, GROUP).unwrap();
    let sent = device.pop().expect("leave transmits");
    let (ip, message, _) = parse_igmp(&sent);
    assert_eq!(message, IgmpRepr::LeaveGroup { group_addr: GROUP });
    assert_eq!(ip.dst_addr, Ipv4Address::MULTICAST_ALL_ROUTERS);
    assert_eq!(filters.borrow().last(), Some(&(GROUP, FilterAction::Del)));

    // The membership is gone: group traffic no longer passes input.
    assert!(!stack.iface(1).unwrap().igmp.is_member(GROUP));
}

#[test]
fn heard_report_suppresses_own() {
    let (mut stack, _) = stack_with_filter();
    let mut device = Loopback::new(8);

    stack.igmp_join(&mut device, 1, GROUP).unwrap();
    let _ = device.pop();

    // Another member answers first: our delayed repeat is suppressed and
    // the Leave obligation passes to them.
    stack.receive(1, igmp_datagram(
        Ipv4Address::new(192, 0, 2, 200), GROUP,
        IgmpRepr::MembershipReport { group_addr: GROUP },
    ));
    for _ in 0..200 {
        stack.tick(&mut device);
    }
    assert!(device.is_empty());

    stack.igmp_leave(&mut device, 1, GROUP).unwrap();
    assert!(device.is_empty(), "no Leave after losing last-reporter");
}

#[test]
fn general_query_is_answered() {
    let (mut stack, _) = stack_with_filter();
    let mut device = Loopback::new(8);

    stack.igmp_join(&mut device, 1, GROUP).unwrap();
    let _ = device.pop();
    // Settle the join repeat first.
    for _ in 0..10 {
        stack.tick(&mut device);
    }
    let _ = device.pop();

    // General query with a 3 second response window.
    stack.receive(1, igmp_datagram(
        Ipv4Address::new(192, 0, 2, 1), Ipv4Address::MULTICAST_ALL_SYSTEMS,
        IgmpRepr::MembershipQuery { max_resp: 30, group_addr: Ipv4Address::UNSPECIFIED },
    ));
    for _ in 0..30 {
        stack.tick(&mut device);
    }
    let answer = device.pop().expect("query answered within max_resp");
    let (_, message, _) = parse_igmp(&answer);
    assert_eq!(message, IgmpRepr::MembershipReport { group_addr: GROUP });
    // The all-systems group itself is never reported.
    assert!(device.is_empty());
}

#[test]
fn v1_query_uses_ten_second_window() {
    let (mut stack, _) = stack_with_filter();
    let mut device = Loopback::new(8);

    stack.igmp_join(&mut device, 1, GROUP).unwrap();
    let _ = device.pop();
    for _ in 0..10 {
        stack.tick(&mut device);
    }
    let _ = device.pop();

    // max_resp of zero marks an IGMPv1 querier; respond within 10 s.
    stack.receive(1, igmp_datagram(
        Ipv4Address::new(192, 0, 2, 1), Ipv4Address::MULTICAST_ALL_SYSTEMS,
        IgmpRepr::MembershipQuery { max_resp: 0, group_addr: Ipv4Address::UNSPECIFIED },
    ));

    let mut reported = 0;
    for _ in 0..100 {
        stack.tick(&mut device);
        while device.pop().is_some() {
            reported += 1;
        }
    }
    assert_eq!(reported, 1, "exactly one report within the 10 s window");
}

#[test]
fn group_specific_query_with_smaller_window_rearms() {
    let (mut stack, _) = stack_with_filter();
    let mut device = Loopback::new(8);

    stack.igmp_join(&mut device, 1, GROUP).unwrap();
    let _ = device.pop();

    // While the join repeat is pending, a group-specific query with a
    // tighter deadline takes over the timer.
    stack.receive(1, igmp_datagram(
        Ipv4Address::new(192, 0, 2, 1), GROUP,
        IgmpRepr::MembershipQuery { max_resp: 2, group_addr: GROUP },
    ));

    stack.tick(&mut device);
    stack.tick(&mut device);
    let answer = device.pop().expect("answer within the shortened window");
    let (_, message, _) = parse_igmp(&answer);
    assert_eq!(message, IgmpRepr::MembershipReport { group_addr: GROUP });
}

#[test]
fn stop_drops_all_filters() {
    let (mut stack, filters) = stack_with_filter();
    let mut device = Loopback::new(8);

    stack.igmp_join(&mut device, 1, GROUP).unwrap();
    let _ = device.pop();
    stack.igmp_stop(1).unwrap();

    let log = filters.borrow();
    assert!(log.contains(&(GROUP, FilterAction::Del)));
    assert!(log.contains(&(Ipv4Address::MULTICAST_ALL_SYSTEMS, FilterAction::Del)));
    assert!(!stack.iface(1).unwrap().igmp.is_running());
}
