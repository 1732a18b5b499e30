//! Implementation of a software loop-back device.
//!
//! Queues every transmitted packet instead of sending it, which makes it
//! the capture device of the layer tests: drive the stack, then inspect
//! what would have gone out on the wire.
use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::buffer::PacketBuf;
use crate::wire::IpAddress;

use super::{Device, TxResult};

/// One captured transmission.
#[derive(Debug)]
pub struct Captured {
    pub iface: u8,
    pub next_hop: IpAddress,
    /// The flattened bytes of the transmitted chain.
    pub frame: Vec<u8>,
}

/// A software loop-back device with a bounded queue.
#[derive(Debug)]
pub struct Loopback {
    queue: VecDeque<Captured>,
    capacity: usize,
}

impl Loopback {
    /// Create a device able to hold `capacity` in-flight packets.
    pub fn new(capacity: usize) -> Self {
        Loopback { queue: VecDeque::new(), capacity }
    }

    /// Take the oldest captured transmission.
    pub fn pop(&mut self) -> Option<Captured> {
        self.queue.pop_front()
    }

    /// The number of captured transmissions waiting.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing was transmitted.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Device for Loopback {
    fn transmit(&mut self, iface: u8, pb: PacketBuf, next_hop: IpAddress) -> TxResult {
        if self.queue.len() >= self.capacity {
            return TxResult::NoBuf(pb);
        }
        self.queue.push_back(Captured { iface, next_hop, frame: pb.to_vec() });
        TxResult::Sent
    }
}
