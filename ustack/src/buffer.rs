//! Chained packet buffers with reserved headroom.
//!
//! A [`PacketBuf`] is the single currency of the packet pipeline. On receive
//! the link layer wraps the frame bytes and every layer strips its header
//! from the front; on transmit a buffer is allocated with enough headroom for
//! all headers downstream of the allocating layer, which are then prepended
//! without copying the payload.
//!
//! # Ownership
//!
//! Buffers move. Every pipeline function takes its `PacketBuf` by value and
//! owns it from then on; a stage that fans one packet out to several
//! receivers must [`deep_clone`](PacketBuf::deep_clone) for every receiver
//! but the last. Dropping a buffer releases all segments of the chain in
//! order. This replaces the manual reference counting of classic pbuf
//! designs; the clone operation is the only point where buffer memory is
//! duplicated.
use alloc::vec::Vec;
use core::fmt;

use bitflags::bitflags;

/// The pipeline layer a buffer is allocated for.
///
/// Determines how much headroom is reserved in front of the payload so that
/// all headers of the layers below fit without reallocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    /// No headroom, the buffer holds a complete frame.
    Raw,
    /// Headroom for a link-layer header.
    Link,
    /// Headroom for link plus IP headers (including IPv4 options).
    Ip,
    /// Headroom for link, IP and a transport header.
    Transport,
}

// Maximum link header we prepend ourselves. Generous enough for Ethernet.
const LINK_HEADROOM: usize = 16;
// An IPv4 header may carry up to 40 bytes of options; IPv6 is 40 flat.
const IP_HEADROOM: usize = LINK_HEADROOM + 60;
const TRANSPORT_HEADROOM: usize = IP_HEADROOM + 8;

impl Layer {
    fn headroom(self) -> usize {
        match self {
            Layer::Raw => 0,
            Layer::Link => LINK_HEADROOM,
            Layer::Ip => IP_HEADROOM,
            Layer::Transport => TRANSPORT_HEADROOM,
        }
    }
}

bitflags! {
    /// Per-buffer flags travelling with the packet.
    #[derive(Default)]
    pub struct Flags: u8 {
        /// Loop the packet back to local multicast listeners on transmit.
        const MCAST_LOOP = 0x01;
    }
}

#[derive(Clone)]
struct Segment {
    data: Vec<u8>,
    head: usize,
    len: usize,
}

impl Segment {
    fn payload(&self) -> &[u8] {
        &self.data[self.head..self.head + self.len]
    }

    fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.head..self.head + self.len]
    }
}

/// A possibly-chained byte buffer with headroom and a payload cursor.
pub struct PacketBuf {
    /// Invariant: never empty, and `tot_len` equals the sum of the segment
    /// payload lengths.
    segments: Vec<Segment>,
    tot_len: usize,
    layer: Layer,
    /// Flags travelling with the buffer through the pipeline.
    pub flags: Flags,
}

/// An error from a buffer layout operation.
///
/// Prepending fails when the requested length exceeds the reserved headroom
/// of the first segment, stripping when it exceeds the first segment's
/// payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exhausted;

impl PacketBuf {
    /// Allocate a zeroed buffer of `len` payload bytes for `layer`.
    pub fn alloc(layer: Layer, len: usize) -> Self {
        let headroom = layer.headroom();
        let mut data = Vec::new();
        data.resize(headroom + len, 0);
        PacketBuf {
            segments: alloc::vec![Segment { data, head: headroom, len }],
            tot_len: len,
            layer,
            flags: Flags::empty(),
        }
    }

    /// Wrap received frame bytes without headroom.
    pub fn from_slice(data: &[u8]) -> Self {
        let mut buf = PacketBuf::alloc(Layer::Raw, data.len());
        buf.payload_mut().copy_from_slice(data);
        buf
    }

    /// The layer this buffer was allocated for.
    pub fn layer(&self) -> Layer {
        self.layer
    }

    /// The payload length of the first segment.
    pub fn len(&self) -> usize {
        self.segments[0].len
    }

    /// The payload length of the whole chain.
    pub fn tot_len(&self) -> usize {
        self.tot_len
    }

    /// Whether the chain carries no payload at all.
    pub fn is_empty(&self) -> bool {
        self.tot_len == 0
    }

    /// The contiguous payload of the first segment.
    ///
    /// Protocol headers are always parsed from here; input paths verify that
    /// the first segment covers the header before interpreting it.
    pub fn payload(&self) -> &[u8] {
        self.segments[0].payload()
    }

    /// The contiguous payload of the first segment, mutably.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        self.segments[0].payload_mut()
    }

    /// Iterate over the payload slices of all segments in chain order.
    pub fn segments(&self) -> impl Iterator<Item = &[u8]> {
        self.segments.iter().map(Segment::payload)
    }

    /// Grow the payload at the front by `n` bytes.
    ///
    /// Returns the now-exposed front of the buffer on success. Fails without
    /// modification if the headroom of the first segment is exhausted.
    pub fn prepend(&mut self, n: usize) -> Result<&mut [u8], Exhausted> {
        let first = &mut self.segments[0];
        if first.head < n {
            return Err(Exhausted);
        }
        first.head -= n;
        first.len += n;
        self.tot_len += n;
        Ok(&mut self.segments[0].payload_mut()[..n])
    }

    /// Drop `n` bytes from the front of the payload.
    ///
    /// Fails without modification if the first segment holds fewer than `n`
    /// payload bytes.
    pub fn strip(&mut self, n: usize) -> Result<(), Exhausted> {
        let first = &mut self.segments[0];
        if first.len < n {
            return Err(Exhausted);
        }
        first.head += n;
        first.len -= n;
        self.tot_len -= n;
        Ok(())
    }

    /// Shorten the chain payload to `n` bytes in total.
    ///
    /// Used to cut link padding off a frame once the IP total length is
    /// known. Does nothing if the chain is already no longer than `n`.
    pub fn truncate_total(&mut self, n: usize) {
        if self.tot_len <= n {
            return;
        }
        let mut remaining = n;
        for segment in self.segments.iter_mut() {
            let keep = segment.len.min(remaining);
            segment.len = keep;
            remaining -= keep;
        }
        self.segments.retain(|segment| segment.len > 0);
        if self.segments.is_empty() {
            // Keep the non-empty segments invariant for zero-length chains.
            self.segments.push(Segment { data: Vec::new(), head: 0, len: 0 });
        }
        self.tot_len = n;
    }

    /// Append `tail` to the chain, transferring ownership of its segments.
    pub fn chain(&mut self, tail: PacketBuf) {
        self.tot_len += tail.tot_len;
        self.segments.extend(tail.segments);
    }

    /// Produce an independent copy of the whole chain.
    ///
    /// The clone is flattened into a single segment with `Raw` headroom and
    /// shares no memory with `self`. Fan-out to multiple receivers clones for
    /// every receiver but the last.
    pub fn deep_clone(&self) -> PacketBuf {
        let mut clone = PacketBuf::alloc(Layer::Raw, self.tot_len);
        {
            let mut target = clone.payload_mut();
            for segment in self.segments() {
                let (now, rest) = { target }.split_at_mut(segment.len());
                now.copy_from_slice(segment);
                target = rest;
            }
        }
        clone.flags = self.flags;
        clone
    }

    /// Copy the chain payload into a fresh vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.tot_len);
        for segment in self.segments() {
            out.extend_from_slice(segment);
        }
        out
    }
}

impl fmt::Debug for PacketBuf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PacketBuf")
            .field("segments", &self.segments.len())
            .field("len", &self.len())
            .field("tot_len", &self.tot_len)
            .field("layer", &self.layer)
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn chain_invariant(buf: &PacketBuf) {
        assert_eq!(buf.tot_len(), buf.segments().map(<[u8]>::len).sum::<usize>());
    }

    #[test]
    fn prepend_within_headroom() {
        let mut buf = PacketBuf::alloc(Layer::Transport, 4);
        buf.payload_mut().copy_from_slice(b"data");
        chain_invariant(&buf);

        let header = buf.prepend(8).unwrap();
        header.copy_from_slice(b"udp-head");
        assert_eq!(buf.len(), 12);
        assert_eq!(&buf.payload()[..8], b"udp-head");
        chain_invariant(&buf);
    }

    #[test]
    fn prepend_exhausts() {
        let mut buf = PacketBuf::alloc(Layer::Raw, 4);
        assert_eq!(buf.prepend(1), Err(Exhausted));
        assert_eq!(buf.tot_len(), 4);
        chain_invariant(&buf);
    }

    #[test]
    fn strip_and_restore() {
        let mut buf = PacketBuf::from_slice(b"headpayload");
        buf.strip(4).unwrap();
        assert_eq!(buf.payload(), b"payload");
        // The stripped header stays in the headroom.
        buf.prepend(4).unwrap();
        assert_eq!(buf.payload(), b"headpayload");
        assert_eq!(buf.strip(100), Err(Exhausted));
        chain_invariant(&buf);
    }

    #[test]
    fn chain_totals() {
        let mut head = PacketBuf::from_slice(b"aaaa");
        let tail = PacketBuf::from_slice(b"bb");
        head.chain(tail);
        assert_eq!(head.tot_len(), 6);
        assert_eq!(head.len(), 4);
        assert_eq!(head.to_vec(), b"aaaabb");
        chain_invariant(&head);
    }

    #[test]
    fn clone_is_independent() {
        let mut head = PacketBuf::from_slice(b"xxxx");
        head.chain(PacketBuf::from_slice(b"yy"));
        let clone = head.deep_clone();
        head.payload_mut()[0] = b'z';
        assert_eq!(clone.to_vec(), b"xxxxyy");
        chain_invariant(&clone);
    }

    #[test]
    fn truncate_drops_padding() {
        let mut head = PacketBuf::from_slice(b"ip-payload");
        head.chain(PacketBuf::from_slice(b"padpadpad"));
        head.truncate_total(10);
        assert_eq!(head.to_vec(), b"ip-payload");
        chain_invariant(&head);
    }
}
