//! The IGMPv2 host state machine (RFC 2236).
//!
//! Every interface keeps a list of joined groups; the first entry is always
//! the all-systems group 224.0.0.1 while IGMP runs, which is never reported
//! or left. Reports are jittered over a random delay so that one member of
//! a group answers a query and the others suppress themselves.
#[cfg(test)]
mod tests;

use alloc::vec::Vec;

use crate::buffer::{Layer, PacketBuf};
use crate::iface::{FilterAction, IfaceFlags, Interface};
use crate::layer::{ip, Error, Result};
use crate::nic::Device;
use crate::rand::Rng;
use crate::stack::Stats;
use crate::wire::{
    igmp_packet, Checksum, IgmpRepr, IpAddress, IpProtocol, Ipv4Address,
    IGMP_HEADER_LEN, IPV4_ROUTER_ALERT_OPTION,
};

/// The period of [`tick`] in milliseconds.
///
/// [`tick`]: fn.tick.html
pub const TMR_INTERVAL_MS: u64 = 100;

/// Upper bound of the delay before the unsolicited report repeat, in ticks.
const JOIN_DELAY_TICKS: u16 = 10;

/// The fixed response delay imposed by an IGMPv1 querier: 10 seconds.
const V1_QUERY_DELAY_TICKS: u16 = 100;

/// Time-to-live of all IGMP transmissions.
const IGMP_TTL: u8 = 1;

/// The membership state of one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    /// Not a member; the transient state of a group entry being created.
    NonMember,
    /// Member with a report pending on the delay timer.
    DelayingMember,
    /// Member with no report outstanding.
    IdleMember,
}

/// One (interface, group) membership entry.
#[derive(Debug)]
pub struct Group {
    pub addr: Ipv4Address,
    pub state: GroupState,
    /// Remaining delay in ticks; 0 is stopped.
    pub timer: u16,
    /// Whether we sent the last report for this group and thus owe the
    /// Leave message.
    pub last_reporter: bool,
    /// Join references held by the application.
    pub use_count: u32,
}

/// The group list of one interface.
#[derive(Debug, Default)]
pub struct Groups {
    entries: Vec<Group>,
}

impl Groups {
    pub fn new() -> Self {
        Groups::default()
    }

    /// Whether IGMP has been started on the owning interface.
    pub fn is_running(&self) -> bool {
        self.entries
            .first()
            .map_or(false, |group| group.addr == Ipv4Address::MULTICAST_ALL_SYSTEMS)
    }

    /// Whether the group is joined (the all-systems entry counts).
    pub fn is_member(&self, addr: Ipv4Address) -> bool {
        self.lookup(addr).is_some()
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = &Group> {
        self.entries.iter()
    }

    fn lookup(&self, addr: Ipv4Address) -> Option<&Group> {
        self.entries.iter().find(|group| group.addr == addr)
    }

    fn lookup_mut(&mut self, addr: Ipv4Address) -> Option<&mut Group> {
        self.entries.iter_mut().find(|group| group.addr == addr)
    }

    /// Find or create the entry for `addr`.
    ///
    /// The all-systems group stays pinned at the head of the list; every
    /// other group is inserted behind it.
    fn lookup_or_create(&mut self, addr: Ipv4Address) -> &mut Group {
        if let Some(index) = self.entries.iter().position(|group| group.addr == addr) {
            return &mut self.entries[index];
        }
        let group = Group {
            addr,
            state: GroupState::NonMember,
            timer: 0,
            last_reporter: false,
            use_count: 0,
        };
        if self.entries.is_empty() {
            debug_assert!(addr == Ipv4Address::MULTICAST_ALL_SYSTEMS,
                          "first group must be all-systems");
            self.entries.push(group);
        } else {
            self.entries.insert(1, group);
        }
        let index = if self.entries.len() == 1 { 0 } else { 1 };
        &mut self.entries[index]
    }

    fn remove(&mut self, addr: Ipv4Address) {
        self.entries.retain(|group| group.addr != addr);
    }
}

/// Start IGMP processing on an interface.
///
/// Creates the pinned all-systems entry and opens the MAC filter for it.
pub(crate) fn start(iface: &mut Interface) -> Result<()> {
    if !iface.flags.contains(IfaceFlags::IGMP) {
        return Err(Error::InvalidArg);
    }
    let group = iface.igmp.lookup_or_create(Ipv4Address::MULTICAST_ALL_SYSTEMS);
    group.state = GroupState::IdleMember;
    group.use_count += 1;
    iface.run_mac_filter(Ipv4Address::MULTICAST_ALL_SYSTEMS, FilterAction::Add);
    Ok(())
}

/// Stop IGMP processing on an interface, dropping all memberships.
pub(crate) fn stop(iface: &mut Interface) {
    let addrs: Vec<Ipv4Address> = iface.igmp.iter().map(|group| group.addr).collect();
    for addr in addrs {
        iface.run_mac_filter(addr, FilterAction::Del);
    }
    iface.igmp.entries.clear();
}

/// Join a group on an interface.
///
/// The first join of a group installs the MAC filter, sends an unsolicited
/// V2 report and schedules the loss-tolerant repeat. Further joins only
/// raise the reference count.
pub(crate) fn join<D: Device>(
    iface: &mut Interface,
    rng: &mut Rng,
    stats: &mut Stats,
    device: &mut D,
    addr: Ipv4Address,
) -> Result<()> {
    if !addr.is_multicast() {
        return Err(Error::InvalidArg);
    }
    if !iface.flags.contains(IfaceFlags::IGMP) || !iface.igmp.is_running() {
        return Err(Error::InvalidArg);
    }

    let is_new = {
        let group = iface.igmp.lookup_or_create(addr);
        let is_new = group.state == GroupState::NonMember;
        group.use_count += 1;
        is_new
    };

    if is_new {
        net_trace!("igmp: join to new group {}", addr);
        // First user: open the group at the MAC level.
        iface.run_mac_filter(addr, FilterAction::Add);

        send_msg(iface, stats, device, IgmpRepr::MembershipReport { group_addr: addr })?;

        let delay = rng.delay_ticks(JOIN_DELAY_TICKS);
        let group = iface.igmp.lookup_mut(addr).expect("group was just created");
        group.last_reporter = true;
        group.timer = delay;
        group.state = GroupState::DelayingMember;
    }
    Ok(())
}

/// Drop one join reference on a group, leaving it on the last.
///
/// When the last reference goes, the Leave is transmitted to the
/// all-routers group if we were the last to report, and the MAC filter
/// entry is removed.
pub(crate) fn leave<D: Device>(
    iface: &mut Interface,
    stats: &mut Stats,
    device: &mut D,
    addr: Ipv4Address,
) -> Result<()> {
    if addr == Ipv4Address::MULTICAST_ALL_SYSTEMS {
        return Err(Error::InvalidArg);
    }
    let (last_use, last_reporter) = match iface.igmp.lookup_mut(addr) {
        Some(group) => (group.use_count <= 1, group.last_reporter),
        None => {
            net_debug!("igmp: leave for a group we are not member of");
            return Err(Error::InvalidArg);
        }
    };

    if last_use {
        iface.igmp.remove(addr);
        if last_reporter {
            net_trace!("igmp: leaving group {}", addr);
            send_msg(iface, stats, device, IgmpRepr::LeaveGroup { group_addr: addr })?;
        }
        iface.run_mac_filter(addr, FilterAction::Del);
    } else {
        let group = iface.igmp.lookup_mut(addr).expect("checked above");
        group.use_count -= 1;
    }
    Ok(())
}

/// Process a received IGMP message.
///
/// The payload cursor points at the IGMP header; `dst` is the destination
/// of the enclosing IP datagram, which a query may address to the group
/// itself or to all-systems.
pub(crate) fn input(
    iface: &mut Interface,
    rng: &mut Rng,
    stats: &mut Stats,
    pb: PacketBuf,
    dst: Ipv4Address,
) {
    stats.igmp.recv += 1;

    // The message may be longer than the fixed header; all of it is in the
    // checksum but only the first eight octets carry meaning.
    if pb.len() < IGMP_HEADER_LEN {
        stats.igmp.lenerr += 1;
        stats.igmp.drop += 1;
        return;
    }
    let repr = match IgmpRepr::parse(igmp_packet::new_unchecked(pb.payload())) {
        Ok(repr) => repr,
        Err(crate::wire::Error::WrongChecksum) => {
            net_debug!("igmp: checksum error");
            stats.igmp.chkerr += 1;
            stats.igmp.drop += 1;
            return;
        }
        Err(_) => {
            stats.igmp.proterr += 1;
            stats.igmp.drop += 1;
            return;
        }
    };

    // Only groups we are member of concern us.
    if !iface.igmp.is_member(dst) {
        net_trace!("igmp: frame not for us");
        stats.igmp.drop += 1;
        return;
    }

    match repr {
        IgmpRepr::MembershipQuery { max_resp, group_addr } => {
            // A querier that cannot name a response time is IGMPv1; respond
            // within its fixed 10 second window.
            let max_resp_ticks = if max_resp == 0 {
                V1_QUERY_DELAY_TICKS
            } else {
                u16::from(max_resp)
            };

            if dst == Ipv4Address::MULTICAST_ALL_SYSTEMS && group_addr.is_unspecified() {
                // General query: every group except the unreported
                // all-systems entry.
                let addrs: Vec<Ipv4Address> = iface.igmp.iter()
                    .skip(1)
                    .map(|group| group.addr)
                    .collect();
                for addr in addrs {
                    if let Some(group) = iface.igmp.lookup_mut(addr) {
                        delaying_member(group, rng, max_resp_ticks);
                    }
                }
            } else if !group_addr.is_unspecified() {
                // Group-specific query, addressed either to the group or to
                // all-systems.
                if let Some(group) = iface.igmp.lookup_mut(group_addr) {
                    delaying_member(group, rng, max_resp_ticks);
                } else {
                    stats.igmp.drop += 1;
                }
            } else {
                stats.igmp.proterr += 1;
            }
        }
        IgmpRepr::MembershipReport { .. } => {
            // Another member reported; suppress our own pending report.
            if let Some(group) = iface.igmp.lookup_mut(dst) {
                if group.state == GroupState::DelayingMember {
                    group.timer = 0;
                    group.state = GroupState::IdleMember;
                    group.last_reporter = false;
                }
            }
        }
        IgmpRepr::LeaveGroup { .. } => {
            // Hosts ignore Leave messages; they are router business.
        }
    }
}

/// Drive the delay timers; call every [`TMR_INTERVAL_MS`].
///
/// [`TMR_INTERVAL_MS`]: constant.TMR_INTERVAL_MS.html
pub(crate) fn tick<D: Device>(
    iface: &mut Interface,
    stats: &mut Stats,
    device: &mut D,
) {
    let mut due: Vec<Ipv4Address> = Vec::new();
    for group in iface.igmp.entries.iter_mut() {
        if group.timer > 0 {
            group.timer -= 1;
            if group.timer == 0 {
                due.push(group.addr);
            }
        }
    }

    for addr in due {
        let report = match iface.igmp.lookup_mut(addr) {
            Some(group)
                if group.state == GroupState::DelayingMember
                    && group.addr != Ipv4Address::MULTICAST_ALL_SYSTEMS =>
            {
                group.state = GroupState::IdleMember;
                true
            }
            _ => false,
        };
        if report {
            net_trace!("igmp: delayed report for group {}", addr);
            let _ = send_msg(iface, stats, device, IgmpRepr::MembershipReport { group_addr: addr });
            if let Some(group) = iface.igmp.lookup_mut(addr) {
                group.last_reporter = true;
            }
        }
    }
}

/// Re-announce all memberships, e.g. after the interface came up.
pub(crate) fn report_groups(iface: &mut Interface, rng: &mut Rng) {
    // Skip the first group in the list, it is always the all-systems entry.
    for group in iface.igmp.entries.iter_mut().skip(1) {
        delaying_member(group, rng, JOIN_DELAY_TICKS);
    }
}

/// Put a group into the delaying state if a (re-)report is called for.
fn delaying_member(group: &mut Group, rng: &mut Rng, max_resp_ticks: u16) {
    if group.state == GroupState::IdleMember
        || (group.state == GroupState::DelayingMember
            && (group.timer == 0 || max_resp_ticks < group.timer))
    {
        group.timer = rng.delay_ticks(max_resp_ticks);
        group.state = GroupState::DelayingMember;
    }
}

/// Emit one IGMP message on the interface.
///
/// Reports go to the group itself, Leaves to all-routers; both carry the
/// Router Alert option and a TTL of 1.
fn send_msg<D: Device>(
    iface: &Interface,
    stats: &mut Stats,
    device: &mut D,
    repr: IgmpRepr,
) -> Result<()> {
    let dst = match repr {
        IgmpRepr::MembershipReport { group_addr } => group_addr,
        IgmpRepr::LeaveGroup { .. } => Ipv4Address::MULTICAST_ALL_ROUTERS,
        IgmpRepr::MembershipQuery { .. } => return Err(Error::InvalidArg),
    };
    let src = iface.ipv4_addr().unwrap_or(Ipv4Address::UNSPECIFIED);

    let mut pb = PacketBuf::alloc(Layer::Transport, IGMP_HEADER_LEN);
    repr.emit(igmp_packet::new_unchecked_mut(pb.payload_mut()));

    stats.igmp.xmit += 1;
    ip::output_on(
        iface, stats, device, pb,
        IpAddress::Ipv4(src), IpAddress::Ipv4(dst), IpAddress::Ipv4(dst),
        IGMP_TTL, IpProtocol::Igmp, &IPV4_ROUTER_ALERT_OPTION, Checksum::Manual,
    )
}
