//! The command queue between the control surfaces and the encoder.

use embedded_time::Clock;
use heapless::Deque;

use crate::config::COMMAND_QUEUE_DEPTH;
use crate::packet::{construct, Packet};
use crate::refresh::RefreshList;

/// Error returned by [`CommandQueue::enqueue`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EnqueueError {
    Full,
}

impl core::fmt::Display for EnqueueError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            EnqueueError::Full => write!(f, "command queue full"),
        }
    }
}

/// Priority FIFO of pending packets.
///
/// Explicit commands outrank refresh traffic: refresh packets are
/// never queued, they are synthesised on demand when the queue runs
/// dry.
#[derive(Default)]
pub struct CommandQueue {
    packets: Deque<Packet, COMMAND_QUEUE_DEPTH>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            packets: Deque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Append a packet, coalescing against an equivalent pending one.
    ///
    /// A pending packet with the same opcode and address is replaced
    /// in place, so hammering a throttle enqueues at most one speed
    /// packet per loco. Bit writes and multi-stage commands are never
    /// coalesced.
    pub fn enqueue(&mut self, packet: Packet) -> Result<(), EnqueueError> {
        if packet.op.coalesces() {
            if let Some(pending) = self
                .packets
                .iter_mut()
                .find(|p| p.op == packet.op && p.adr == packet.adr)
            {
                *pending = packet;
                return Ok(());
            }
        }

        self.packets
            .push_back(packet)
            .map_err(|_| EnqueueError::Full)
    }

    /// Put a packet at the head of the queue.
    ///
    /// Used by multi-stage commands that must continue before anything
    /// else goes out.
    pub fn push_front(&mut self, packet: Packet) -> Result<(), EnqueueError> {
        self.packets
            .push_front(packet)
            .map_err(|_| EnqueueError::Full)
    }

    /// Next packet for the encoder.
    ///
    /// With an empty queue and `refresh` present, a refresh packet is
    /// synthesised from the next live loco.
    pub fn dequeue<C: Clock>(&mut self, refresh: Option<&mut RefreshList<C>>) -> Option<Packet> {
        if let Some(packet) = self.packets.pop_front() {
            return Some(packet);
        }

        let cmd = refresh?.next()?;
        Some(construct::loco::refresh(
            cmd.adr, cmd.format, cmd.speed, &cmd.funcs, cmd.age,
        ))
    }

    /// Drop every queued packet. In-flight buffers are not touched.
    pub fn flush(&mut self) {
        self.packets.clear();
    }
}
