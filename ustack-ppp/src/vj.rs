//! Van Jacobson TCP/IP header compression (RFC 1144).
//!
//! Interactive TCP conversations repeat almost their entire 40-octet
//! header from packet to packet. The compressor keeps the last header of
//! each of 16 conversations and transmits only the connection id, the TCP
//! checksum and the handful of fields that changed, encoded as deltas of
//! one or three octets each. A packet that cannot be expressed this way is
//! sent as TYPE_UNCOMPRESSED_TCP, a normal packet whose IP protocol octet
//! carries the connection id, and thereby also (re-)synchronizes the
//! receiver's slot.
//!
//! The transmit side keeps its slots in most-recently-used order and
//! evicts the coldest conversation for a new one. The receive side
//! addresses slots by id only and, after any parse error, tosses
//! compressed packets until the next uncompressed header re-synchronizes
//! it.
use alloc::vec::Vec;

use ustack::buffer::{Layer, PacketBuf};
use ustack::layer::Error;
use ustack::wire::{ipv4_packet, tcp_packet, IpProtocol, TcpFlags};

/// Connection slots per direction. Must be > 2 and < 256.
pub const MAX_SLOTS: usize = 16;

/// Largest IP+TCP header a slot can save.
pub const MAX_HDR: usize = 128;

/// Packet types, chosen so that the IP version nibble of an untouched
/// packet reads as TYPE_IP.
pub const TYPE_IP: u8 = 0x40;
pub const TYPE_UNCOMPRESSED_TCP: u8 = 0x70;
pub const TYPE_COMPRESSED_TCP: u8 = 0x80;
pub const TYPE_ERROR: u8 = 0x00;

// Bits in the first octet of a compressed packet.
const NEW_C: u8 = 0x40;
const NEW_I: u8 = 0x20;
const TCP_PUSH_BIT: u8 = 0x10;
const NEW_S: u8 = 0x08;
const NEW_A: u8 = 0x04;
const NEW_W: u8 = 0x02;
const NEW_U: u8 = 0x01;

/// Reserved, special-case values of the change mask.
const SPECIAL_I: u8 = NEW_S | NEW_W | NEW_U; // echoed interactive traffic
const SPECIAL_D: u8 = NEW_S | NEW_A | NEW_W | NEW_U; // unidirectional data
const SPECIALS_MASK: u8 = NEW_S | NEW_A | NEW_W | NEW_U;

/// Counters of one line.
#[derive(Debug, Default, Clone, Copy)]
pub struct VjStats {
    /// Outbound packets offered to the compressor.
    pub packets: u32,
    /// Outbound packets sent compressed.
    pub compressed: u32,
    /// Searches for connection state.
    pub searches: u32,
    /// Times the connection state was not found.
    pub misses: u32,
    /// Inbound uncompressed packets.
    pub uncompressed_in: u32,
    /// Inbound compressed packets.
    pub compressed_in: u32,
    /// Inbound packets of unknown type.
    pub error_in: u32,
    /// Inbound packets tossed because of an earlier error.
    pub tossed: u32,
}

/// One saved conversation header.
#[derive(Clone, Copy)]
struct Slot {
    hdr: [u8; MAX_HDR],
    hlen: usize,
}

impl Slot {
    const EMPTY: Slot = Slot { hdr: [0; MAX_HDR], hlen: 0 };

    fn ip_header_len(&self) -> usize {
        usize::from(self.hdr[0] & 0x0f) * 4
    }
}

/// The compression state of one serial line, both directions.
pub struct Vj {
    tx_slots: [Slot; MAX_SLOTS],
    /// Transmit slot ids, most recently used first.
    tx_order: [u8; MAX_SLOTS],
    last_xmit: u8,
    /// Whether the peer tolerates an omitted connection id octet.
    pub compress_cid: bool,

    rx_slots: [Slot; MAX_SLOTS],
    last_recv: u8,
    /// Tossing received frames because of an input error.
    toss: bool,

    pub stats: VjStats,
}

impl Default for Vj {
    fn default() -> Self {
        Vj::new()
    }
}

/// The fields of the current packet that feed delta computation.
struct Parsed {
    ip_header_len: usize,
    header_len: usize,
    total_len: u16,
    ident: u16,
    seq: u32,
    ack: u32,
    window: u16,
    urgent: u16,
    checksum: u16,
    push: bool,
}

impl Vj {
    pub fn new() -> Self {
        let mut tx_order = [0u8; MAX_SLOTS];
        for (index, cid) in tx_order.iter_mut().enumerate() {
            // Coldest slot 0 at the tail: the first conversations fill the
            // table from slot 0 upward.
            *cid = (MAX_SLOTS - 1 - index) as u8;
        }
        Vj {
            tx_slots: [Slot::EMPTY; MAX_SLOTS],
            tx_order,
            last_xmit: 255,
            compress_cid: true,
            rx_slots: [Slot::EMPTY; MAX_SLOTS],
            last_recv: 255,
            toss: true,
            stats: VjStats::default(),
        }
    }

    fn promote(&mut self, cid: u8) {
        let position = self.tx_order.iter().position(|&have| have == cid)
            .expect("every slot id is in the order list");
        self.tx_order.copy_within(0..position, 1);
        self.tx_order[0] = cid;
    }

    /// Compress one outbound packet in place.
    ///
    /// Returns the packet type to transmit. TYPE_IP leaves the packet
    /// untouched; TYPE_UNCOMPRESSED_TCP replaces the protocol octet with
    /// the connection id; TYPE_COMPRESSED_TCP replaces the whole header
    /// with the delta encoding.
    pub fn compress_tcp(&mut self, pb: &mut PacketBuf) -> u8 {
        self.stats.packets += 1;

        let parsed = {
            let payload = pb.payload();
            if payload.len() < 20 {
                return TYPE_IP;
            }
            let ip = ipv4_packet::new_unchecked(payload);
            let ip_header_len = usize::from(ip.header_len());
            if ip.version() != 4
                || ip.protocol() != IpProtocol::Tcp
                || ip.more_frags()
                || ip.frag_offset() != 0
                || payload.len() < ip_header_len + 20
            {
                return TYPE_IP;
            }
            let tcp = tcp_packet::new_unchecked(&payload[ip_header_len..]);
            let flags = tcp.flags();
            // Connection-management flags always go out in full, and a
            // segment without ACK is not yet an established conversation.
            if flags.intersects(TcpFlags::SYN | TcpFlags::FIN | TcpFlags::RST | TcpFlags::URG)
                || !flags.contains(TcpFlags::ACK)
            {
                return TYPE_IP;
            }
            let header_len = ip_header_len + usize::from(tcp.header_len());
            if header_len > MAX_HDR
                || usize::from(tcp.header_len()) < 20
                || payload.len() < header_len
            {
                return TYPE_IP;
            }
            Parsed {
                ip_header_len,
                header_len,
                total_len: ip.total_len(),
                ident: ip.ident(),
                seq: tcp.seq_number(),
                ack: tcp.ack_number(),
                window: tcp.window_len(),
                urgent: tcp.urgent_at(),
                checksum: tcp.checksum(),
                push: flags.contains(TcpFlags::PSH),
            }
        };

        // Locate the conversation.
        self.stats.searches += 1;
        let found = self.tx_order.iter().map(|&cid| cid).find(|&cid| {
            let slot = &self.tx_slots[usize::from(cid)];
            slot.hlen != 0 && conn_matches(slot, pb.payload(), parsed.ip_header_len)
        });
        let cid = match found {
            Some(cid) => cid,
            None => {
                self.stats.misses += 1;
                let victim = self.tx_order[MAX_SLOTS - 1];
                return self.emit_uncompressed(pb, &parsed, victim);
            }
        };
        self.promote(cid);

        // Anything outside the delta-coded fields must be unchanged,
        // including both option blocks.
        let (deltas, changes) = {
            let slot = &self.tx_slots[usize::from(cid)];
            let payload = pb.payload();
            if slot.hlen != parsed.header_len
                || slot.ip_header_len() != parsed.ip_header_len
                || slot.hdr[20..parsed.ip_header_len] != payload[20..parsed.ip_header_len]
                || slot.hdr[parsed.ip_header_len + 20..parsed.header_len]
                    != payload[parsed.ip_header_len + 20..parsed.header_len]
            {
                return self.emit_uncompressed(pb, &parsed, cid);
            }

            let old_ip = ipv4_packet::new_unchecked(&slot.hdr[..parsed.ip_header_len]);
            let old_tcp = tcp_packet::new_unchecked(&slot.hdr[parsed.ip_header_len..slot.hlen]);

            if parsed.urgent != old_tcp.urgent_at() {
                // An urgent pointer change without URG is implausible;
                // resynchronize.
                return self.emit_uncompressed(pb, &parsed, cid);
            }

            let mut deltas: Vec<u8> = Vec::with_capacity(16);
            let mut changes = 0u8;

            let delta_window = parsed.window.wrapping_sub(old_tcp.window_len());
            if delta_window != 0 {
                encode(&mut deltas, delta_window);
                changes |= NEW_W;
            }

            let delta_ack = parsed.ack.wrapping_sub(old_tcp.ack_number());
            if delta_ack != 0 {
                if delta_ack > 0xffff {
                    return self.emit_uncompressed(pb, &parsed, cid);
                }
                encode(&mut deltas, delta_ack as u16);
                changes |= NEW_A;
            }

            let delta_seq = parsed.seq.wrapping_sub(old_tcp.seq_number());
            if delta_seq != 0 {
                if delta_seq > 0xffff {
                    return self.emit_uncompressed(pb, &parsed, cid);
                }
                encode(&mut deltas, delta_seq as u16);
                changes |= NEW_S;
            }

            let old_payload_len =
                u32::from(old_ip.total_len()).saturating_sub(slot.hlen as u32);
            match changes {
                0 => {
                    // No changes at all: either the first data after an
                    // empty segment, or a retransmission that must go out
                    // in full.
                    if !(parsed.total_len != old_ip.total_len()
                        && old_ip.total_len() == slot.hlen as u16)
                    {
                        return self.emit_uncompressed(pb, &parsed, cid);
                    }
                }
                SPECIAL_I | SPECIAL_D => {
                    // Actual changes collide with the reserved encodings.
                    return self.emit_uncompressed(pb, &parsed, cid);
                }
                _ if changes == NEW_S | NEW_A => {
                    if delta_seq == delta_ack && delta_seq == old_payload_len {
                        // Echoed interactive traffic.
                        changes = SPECIAL_I;
                        deltas.clear();
                    }
                }
                _ if changes == NEW_S => {
                    if delta_seq == old_payload_len {
                        // Unidirectional data transfer.
                        changes = SPECIAL_D;
                        deltas.clear();
                    }
                }
                _ => {}
            }

            let delta_ident = parsed.ident.wrapping_sub(old_ip.ident());
            if delta_ident != 1 {
                encode_z(&mut deltas, delta_ident);
                changes |= NEW_I;
            }
            if parsed.push {
                changes |= TCP_PUSH_BIT;
            }
            (deltas, changes)
        };

        // From here on the packet will go out compressed; bring the slot up
        // to date with the header we are about to elide.
        let slot = &mut self.tx_slots[usize::from(cid)];
        slot.hdr[..parsed.header_len].copy_from_slice(&pb.payload()[..parsed.header_len]);
        slot.hlen = parsed.header_len;

        let mut header: Vec<u8> = Vec::with_capacity(4 + deltas.len());
        if self.last_xmit != cid || !self.compress_cid {
            self.last_xmit = cid;
            header.push(changes | NEW_C);
            header.push(cid);
        } else {
            header.push(changes);
        }
        header.extend_from_slice(&parsed.checksum.to_be_bytes());
        header.extend_from_slice(&deltas);

        pb.strip(parsed.header_len).expect("header length was verified");
        pb.prepend(header.len())
            .expect("stripping the full header freed more than enough room")
            .copy_from_slice(&header);

        self.stats.compressed += 1;
        TYPE_COMPRESSED_TCP
    }

    /// Install the connection in its slot and mark the packet as the
    /// synchronizing uncompressed kind.
    fn emit_uncompressed(&mut self, pb: &mut PacketBuf, parsed: &Parsed, cid: u8) -> u8 {
        let slot = &mut self.tx_slots[usize::from(cid)];
        slot.hdr[..parsed.header_len].copy_from_slice(&pb.payload()[..parsed.header_len]);
        slot.hlen = parsed.header_len;
        self.promote(cid);
        self.last_xmit = cid;

        // The protocol octet carries the connection id on the wire.
        pb.payload_mut()[9] = cid;
        TYPE_UNCOMPRESSED_TCP
    }

    /// Record an input error.
    ///
    /// Compressed packets are dropped until the next uncompressed header
    /// re-synchronizes the slot state.
    pub fn uncompress_err(&mut self) {
        self.toss = true;
        self.stats.error_in += 1;
    }

    /// Process a received TYPE_UNCOMPRESSED_TCP packet in place.
    ///
    /// Restores the protocol octet and installs the slot named by it.
    pub fn uncompress_uncomp(&mut self, pb: &mut PacketBuf) -> Result<(), Error> {
        self.stats.uncompressed_in += 1;

        {
            let payload = pb.payload();
            if payload.len() < 20 {
                self.uncompress_err();
                return Err(Error::ProtocolError);
            }
            let ip = ipv4_packet::new_unchecked(payload);
            let cid = payload[9];
            let ip_header_len = usize::from(ip.header_len());
            if ip.version() != 4
                || usize::from(cid) >= MAX_SLOTS
                || payload.len() < ip_header_len + 20
            {
                self.uncompress_err();
                return Err(Error::ProtocolError);
            }
            let tcp = tcp_packet::new_unchecked(&payload[ip_header_len..]);
            let header_len = ip_header_len + usize::from(tcp.header_len());
            if header_len > MAX_HDR || payload.len() < header_len {
                self.uncompress_err();
                return Err(Error::ProtocolError);
            }

            self.last_recv = cid;
            self.toss = false;
            let slot = &mut self.rx_slots[usize::from(cid)];
            slot.hdr[..header_len].copy_from_slice(&payload[..header_len]);
            slot.hlen = header_len;
            // The saved header reads as a normal TCP packet again.
            slot.hdr[9] = IpProtocol::Tcp.into();
        }

        pb.payload_mut()[9] = IpProtocol::Tcp.into();
        Ok(())
    }

    /// Expand a received TYPE_COMPRESSED_TCP packet.
    ///
    /// On success the buffer is replaced by the reconstructed full packet.
    /// Any parse error sets the toss discipline and drops the packet.
    pub fn uncompress_tcp(&mut self, pb: &mut PacketBuf) -> Result<(), Error> {
        self.stats.compressed_in += 1;

        // While tossing, only a packet that names its connection id (or an
        // uncompressed packet) may resynchronize us.
        let resync = pb.payload().first().map_or(false, |first| first & NEW_C != 0);
        if self.toss && !resync {
            self.stats.tossed += 1;
            return Err(Error::WouldBlock);
        }

        match self.uncompress_tcp_inner(pb) {
            Ok(()) => Ok(()),
            Err(error) => {
                self.uncompress_err();
                Err(error)
            }
        }
    }

    fn uncompress_tcp_inner(&mut self, pb: &mut PacketBuf) -> Result<(), Error> {
        let data = pb.payload();
        if data.is_empty() {
            return Err(Error::ProtocolError);
        }
        let changes = data[0];
        let mut pos = 1;

        if changes & NEW_C != 0 {
            let cid = *data.get(pos).ok_or(Error::ProtocolError)?;
            if usize::from(cid) >= MAX_SLOTS {
                return Err(Error::ProtocolError);
            }
            pos += 1;
            self.last_recv = cid;
            self.toss = false;
        }

        let slot = &self.rx_slots[usize::from(self.last_recv)];
        if slot.hlen == 0 {
            return Err(Error::ProtocolError);
        }
        let header_len = slot.hlen;
        let ip_header_len = slot.ip_header_len();
        let mut hdr = slot.hdr;

        let checksum = u16::from_be_bytes([
            *data.get(pos).ok_or(Error::ProtocolError)?,
            *data.get(pos + 1).ok_or(Error::ProtocolError)?,
        ]);
        pos += 2;

        // Patch the saved header with the transmitted fields.
        let old_total_len;
        {
            let (ip_part, tcp_part) = hdr.split_at_mut(ip_header_len);
            let ip = ipv4_packet::new_unchecked_mut(ip_part);
            let tcp = tcp_packet::new_unchecked_mut(&mut tcp_part[..header_len - ip_header_len]);
            old_total_len = u32::from(ip.total_len());

            tcp.set_checksum(checksum);
            let mut flags = tcp.flags();
            flags.set(TcpFlags::PSH, changes & TCP_PUSH_BIT != 0);

            match changes & SPECIALS_MASK {
                SPECIAL_I => {
                    let delta = old_total_len - header_len as u32;
                    tcp.set_ack_number(tcp.ack_number().wrapping_add(delta));
                    tcp.set_seq_number(tcp.seq_number().wrapping_add(delta));
                }
                SPECIAL_D => {
                    let delta = old_total_len - header_len as u32;
                    tcp.set_seq_number(tcp.seq_number().wrapping_add(delta));
                }
                _ => {
                    if changes & NEW_U != 0 {
                        flags.insert(TcpFlags::URG);
                        tcp.set_urgent_at(decode(data, &mut pos)?);
                    } else {
                        flags.remove(TcpFlags::URG);
                    }
                    if changes & NEW_W != 0 {
                        let delta = decode(data, &mut pos)?;
                        tcp.set_window_len(tcp.window_len().wrapping_add(delta));
                    }
                    if changes & NEW_A != 0 {
                        let delta = decode(data, &mut pos)?;
                        tcp.set_ack_number(tcp.ack_number().wrapping_add(u32::from(delta)));
                    }
                    if changes & NEW_S != 0 {
                        let delta = decode(data, &mut pos)?;
                        tcp.set_seq_number(tcp.seq_number().wrapping_add(u32::from(delta)));
                    }
                }
            }
            tcp.set_flags(flags);

            if changes & NEW_I != 0 {
                let delta = decode(data, &mut pos)?;
                ip.set_ident(ip.ident().wrapping_add(delta));
            } else {
                ip.set_ident(ip.ident().wrapping_add(1));
            }
        }

        // Reassemble: the saved header in front of the remaining payload.
        let payload_len = data.len() - pos;
        let total_len = header_len + payload_len;
        {
            let ip = ipv4_packet::new_unchecked_mut(&mut hdr[..ip_header_len]);
            ip.set_total_len(total_len as u16);
            ip.fill_checksum();
        }

        // The slot must track every applied delta, so that the next
        // compressed packet finds the same baseline the sender used.
        self.rx_slots[usize::from(self.last_recv)] = Slot { hdr, hlen: header_len };

        let mut out = PacketBuf::alloc(Layer::Link, total_len);
        out.payload_mut()[..header_len].copy_from_slice(&hdr[..header_len]);
        out.payload_mut()[header_len..].copy_from_slice(&pb.payload()[pos..]);
        *pb = out;
        Ok(())
    }
}

/// Whether the saved header belongs to the same conversation as the
/// current packet: IP addresses and TCP ports equal.
fn conn_matches(slot: &Slot, payload: &[u8], ip_header_len: usize) -> bool {
    let saved_ip_header_len = slot.ip_header_len();
    slot.hdr[12..20] == payload[12..20]
        && slot.hdr[saved_ip_header_len..saved_ip_header_len + 4]
            == payload[ip_header_len..ip_header_len + 4]
}

/// Emit a nonzero delta: one octet for 1..255, else zero plus two octets.
fn encode(out: &mut Vec<u8>, value: u16) {
    if value >= 256 {
        out.push(0);
        out.extend_from_slice(&value.to_be_bytes());
    } else {
        out.push(value as u8);
    }
}

/// Emit a possibly-zero value in the same coding.
fn encode_z(out: &mut Vec<u8>, value: u16) {
    if value == 0 || value >= 256 {
        out.push(0);
        out.extend_from_slice(&value.to_be_bytes());
    } else {
        out.push(value as u8);
    }
}

fn decode(data: &[u8], pos: &mut usize) -> Result<u16, Error> {
    let first = *data.get(*pos).ok_or(Error::ProtocolError)?;
    *pos += 1;
    if first != 0 {
        return Ok(u16::from(first));
    }
    let hi = *data.get(*pos).ok_or(Error::ProtocolError)?;
    let lo = *data.get(*pos + 1).ok_or(Error::ProtocolError)?;
    *pos += 2;
    Ok(u16::from_be_bytes([hi, lo]))
}

#[cfg(test)]
mod test {
    use super::*;
    use ustack::wire::{Checksum, Ipv4Address, Ipv4Repr};

    const SRC: Ipv4Address = Ipv4Address([10, 0, 0, 1]);
    const DST: Ipv4Address = Ipv4Address([10, 0, 0, 2]);

    /// A full TCP/IPv4 packet with a correct IP header checksum.
    fn tcp_packet_bytes(
        src_port: u16, dst_port: u16,
        seq: u32, ack: u32, window: u16,
        ident: u16, flags: TcpFlags,
        payload: &[u8],
    ) -> Vec<u8> {
        let mut bytes = vec![0u8; 40 + payload.len()];
        let repr = Ipv4Repr {
            src_addr: SRC,
            dst_addr: DST,
            protocol: IpProtocol::Tcp,
            payload_len: 20 + payload.len(),
            hop_limit: 64,
        };
        repr.emit(ipv4_packet::new_unchecked_mut(&mut bytes[..20]), &[], Checksum::Manual);
        {
            let ip = ipv4_packet::new_unchecked_mut(&mut bytes[..20]);
            ip.set_ident(ident);
            ip.fill_checksum();
        }
        {
            let tcp = tcp_packet::new_unchecked_mut(&mut bytes[20..40]);
            tcp.set_src_port(src_port);
            tcp.set_dst_port(dst_port);
            tcp.set_seq_number(seq);
            tcp.set_ack_number(ack);
            tcp.set_header_len(20);
            tcp.set_flags(flags);
            tcp.set_window_len(window);
            tcp.set_checksum(0x1234);
        }
        bytes[40..].copy_from_slice(payload);
        bytes
    }

    fn data_flags() -> TcpFlags {
        TcpFlags::ACK | TcpFlags::PSH
    }

    #[test]
    fn syn_goes_out_as_plain_ip() {
        let mut vj = Vj::new();
        let bytes = tcp_packet_bytes(1000, 80, 1, 0, 8192, 1, TcpFlags::SYN, b"");
        let mut pb = PacketBuf::from_slice(&bytes);
        assert_eq!(vj.compress_tcp(&mut pb), TYPE_IP);
        assert_eq!(pb.to_vec(), bytes);
    }

    #[test]
    fn round_trip_unidirectional_stream() {
        let mut sender = Vj::new();
        let mut receiver = Vj::new();

        let mut seq = 1000u32;
        let mut ident = 7u16;
        for turn in 0..5 {
            let payload = [turn as u8; 100];
            let bytes = tcp_packet_bytes(
                5001, 80, seq, 9999, 4096, ident, data_flags(), &payload,
            );
            let mut pb = PacketBuf::from_slice(&bytes);

            let kind = sender.compress_tcp(&mut pb);
            if turn == 0 {
                assert_eq!(kind, TYPE_UNCOMPRESSED_TCP);
                receiver.uncompress_uncomp(&mut pb).unwrap();
            } else {
                assert_eq!(kind, TYPE_COMPRESSED_TCP);
                // Steady unidirectional data shrinks to the minimum header:
                // change mask plus checksum.
                assert_eq!(pb.tot_len(), 3 + payload.len());
                receiver.uncompress_tcp(&mut pb).unwrap();
            }

            assert_eq!(pb.to_vec(), bytes, "turn {}", turn);
            seq = seq.wrapping_add(payload.len() as u32);
            ident = ident.wrapping_add(1);
        }

        assert_eq!(sender.stats.packets, 5);
        assert_eq!(sender.stats.compressed, 4);
        assert_eq!(sender.stats.misses, 1);
    }

    #[test]
    fn round_trip_with_explicit_deltas() {
        let mut sender = Vj::new();
        let mut receiver = Vj::new();

        // Establish the conversation.
        let first = tcp_packet_bytes(42, 4242, 100, 200, 1024, 50, data_flags(), b"x");
        let mut pb = PacketBuf::from_slice(&first);
        assert_eq!(sender.compress_tcp(&mut pb), TYPE_UNCOMPRESSED_TCP);
        receiver.uncompress_uncomp(&mut pb).unwrap();

        // Ack, window and ip id all move by odd amounts.
        let second = tcp_packet_bytes(42, 4242, 101, 700, 2048, 55, TcpFlags::ACK, b"yy");
        let mut pb = PacketBuf::from_slice(&second);
        assert_eq!(sender.compress_tcp(&mut pb), TYPE_COMPRESSED_TCP);
        receiver.uncompress_tcp(&mut pb).unwrap();
        assert_eq!(pb.to_vec(), second);

        // A window shrink rides the same two's-complement encoding.
        let third = tcp_packet_bytes(42, 4242, 103, 700, 1024, 56, data_flags(), b"zzz");
        let mut pb = PacketBuf::from_slice(&third);
        assert_eq!(sender.compress_tcp(&mut pb), TYPE_COMPRESSED_TCP);
        receiver.uncompress_tcp(&mut pb).unwrap();
        assert_eq!(pb.to_vec(), third);
    }

    #[test]
    fn big_jump_escalates_to_uncompressed() {
        let mut sender = Vj::new();
        let first = tcp_packet_bytes(42, 4242, 100, 200, 1024, 50, data_flags(), b"x");
        let mut pb = PacketBuf::from_slice(&first);
        sender.compress_tcp(&mut pb);

        // A sequence jump beyond 16 bits cannot be delta-coded.
        let second = tcp_packet_bytes(42, 4242, 100 + 0x2_0000, 200, 1024, 51, data_flags(), b"x");
        let mut pb = PacketBuf::from_slice(&second);
        assert_eq!(sender.compress_tcp(&mut pb), TYPE_UNCOMPRESSED_TCP);
    }

    #[test]
    fn retransmission_goes_uncompressed() {
        let mut sender = Vj::new();
        let bytes = tcp_packet_bytes(42, 4242, 100, 200, 1024, 50, data_flags(), b"data");
        let mut pb = PacketBuf::from_slice(&bytes);
        assert_eq!(sender.compress_tcp(&mut pb), TYPE_UNCOMPRESSED_TCP);

        // Identical seq/ack/win with same length: a retransmission, which
        // must resynchronize rather than compress to "no changes".
        let mut pb = PacketBuf::from_slice(&tcp_packet_bytes(
            42, 4242, 100, 200, 1024, 51, data_flags(), b"data",
        ));
        assert_eq!(sender.compress_tcp(&mut pb), TYPE_UNCOMPRESSED_TCP);
    }

    #[test]
    fn seventeenth_connection_evicts_slot_zero() {
        let mut sender = Vj::new();

        for conn in 0..MAX_SLOTS {
            let bytes = tcp_packet_bytes(
                1000 + conn as u16, 80, 1, 1, 512, 1, data_flags(), b"",
            );
            let mut pb = PacketBuf::from_slice(&bytes);
            assert_eq!(sender.compress_tcp(&mut pb), TYPE_UNCOMPRESSED_TCP);
            // Slots fill from 0 upward.
            assert_eq!(pb.payload()[9], conn as u8);
        }

        // Connection 17 takes the coldest slot: slot 0.
        let bytes = tcp_packet_bytes(5000, 80, 1, 1, 512, 1, data_flags(), b"");
        let mut pb = PacketBuf::from_slice(&bytes);
        assert_eq!(sender.compress_tcp(&mut pb), TYPE_UNCOMPRESSED_TCP);
        assert_eq!(pb.payload()[9], 0);

        // The evicted conversation has to resynchronize.
        let bytes = tcp_packet_bytes(1000, 80, 2, 1, 512, 2, data_flags(), b"");
        let mut pb = PacketBuf::from_slice(&bytes);
        assert_eq!(sender.compress_tcp(&mut pb), TYPE_UNCOMPRESSED_TCP);
    }

    #[test]
    fn toss_until_resynchronized() {
        let mut receiver = Vj::new();

        // A compressed packet before any uncompressed one cannot refer to
        // a slot.
        let mut pb = PacketBuf::from_slice(&[0x00, 0x12, 0x34]);
        assert!(receiver.uncompress_tcp(&mut pb).is_err());

        // Resynchronize with a full header...
        let mut sender = Vj::new();
        let first = tcp_packet_bytes(42, 4242, 100, 200, 1024, 50, data_flags(), b"x");
        let mut pb = PacketBuf::from_slice(&first);
        sender.compress_tcp(&mut pb);
        receiver.uncompress_uncomp(&mut pb).unwrap();

        // ...after which compressed packets flow again.
        let second = tcp_packet_bytes(42, 4242, 101, 200, 1024, 51, data_flags(), b"y");
        let mut pb = PacketBuf::from_slice(&second);
        assert_eq!(sender.compress_tcp(&mut pb), TYPE_COMPRESSED_TCP);
        receiver.uncompress_tcp(&mut pb).unwrap();
        assert_eq!(pb.to_vec(), second);
    }
}
