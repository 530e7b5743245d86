//! Packet constructors.
//!
//! One rule per (format, command) pair turns live decoder state into a
//! queued [`Packet`]; the wire encoders consume the result unchanged.

pub mod accessory;
pub mod cv;
pub mod dcca;
pub mod loco;
pub mod m3;
pub mod time;

use heapless::Vec;

use super::{DccBody, Packet, PacketBody, PacketOp};
use dcs_core::format::LocoFormat;

pub(crate) fn dcc_body(bytes: &[u8]) -> DccBody {
    DccBody {
        bytes: Vec::from_slice(bytes).unwrap_or_else(|_| Vec::new()),
        service_mode: false,
        cutout: false,
        dcca: false,
        xpom_seq: None,
    }
}

pub(crate) fn dcc_packet(op: PacketOp, adr: u16, bytes: &[u8]) -> Packet {
    Packet::new(op, adr, LocoFormat::Dcc28, PacketBody::Dcc(dcc_body(bytes)))
}

/// The DCC idle packet; padding between commands when nothing else is
/// pending and refresh is disabled.
pub fn idle() -> Packet {
    dcc_packet(PacketOp::Idle, 0, &[0xFF, 0x00])
}

/// The DCC broadcast reset packet used when entering service mode.
pub fn reset() -> Packet {
    dcc_packet(PacketOp::Reset, 0, &[0x00, 0x00])
}
