//! M3 command constructors.
//!
//! M3 commands are bit runs appended after the address selector; the
//! wire encoder adds the selector, the CRC and the bit stuffing.

use dcs_core::format::LocoFormat;
use dcs_core::message::CvAddress;
use dcs_core::speed::Speed;
use heapless::Vec;

use crate::packet::{
    M3Body, M3Chunk, Packet, PacketBody, PacketOp, ReadbackKind, M3_CHUNKS_MAX,
};

// Command prefixes, value plus bit count.
const CMD_SPEED: (u32, u8) = (0b001, 3);
const CMD_FUNC_F0_F15: (u32, u8) = (0b0111, 4);
const CMD_FUNC_SINGLE: (u32, u8) = (0b100, 3);
const CMD_CV_READ: (u32, u8) = (0b111000, 6);
const CMD_CV_WRITE: (u32, u8) = (0b111001, 6);
const CMD_SEARCH: (u32, u8) = (0b111010, 6);
const CMD_SET_ADDRESS: (u32, u8) = (0b111011, 6);
const CMD_BEACON: (u32, u8) = (0b111101, 6);
const CMD_PING: (u32, u8) = (0b111110, 6);

/// Reply-window half-sync pulses for a one-bit answer.
const REPLY_SLOTS_BIN: u8 = 2;
/// Reply-window half-sync pulses for an 8-byte data answer.
const REPLY_SLOTS_DATA: u8 = 72;

fn body(adr: u16, reply_slots: u8) -> M3Body {
    M3Body {
        adr,
        chunks: Vec::new(),
        reply_slots,
    }
}

fn push(body: &mut M3Body, (value, bits): (u32, u8)) {
    debug_assert!(body.chunks.len() < M3_CHUNKS_MAX);
    body.chunks.push(M3Chunk::new(value, bits)).ok();
}

fn packet(op: PacketOp, adr: u16, body: M3Body) -> Packet {
    Packet::new(op, adr, LocoFormat::M3_126, PacketBody::M3(body))
}

fn speed_chunk(spd: Speed) -> (u32, u8) {
    let step = match spd.step() {
        0 => 0,
        1 => 1,
        s => s.min(127),
    } as u32;
    // Direction bit travels inverted.
    let dir = if spd.is_forward() { 0 } else { 1u32 };
    ((dir << 7) | step, 8)
}

/// Drive command.
pub fn speed(adr: u16, spd: Speed) -> Packet {
    let mut b = body(adr, 0);
    push(&mut b, CMD_SPEED);
    push(&mut b, speed_chunk(spd));
    packet(PacketOp::M3Speed, adr, b)
}

/// Combined drive plus F0..F15 state.
pub fn speed_and_functions(adr: u16, spd: Speed, funcs: &[u32; 4]) -> Packet {
    let mut b = body(adr, 0);
    push(&mut b, CMD_SPEED);
    push(&mut b, speed_chunk(spd));
    push(&mut b, CMD_FUNC_F0_F15);
    push(&mut b, (funcs[0] & 0xFFFF, 16));
    packet(PacketOp::M3SpeedFunc, adr, b)
}

/// Switch one of the 128 functions.
pub fn single_function(adr: u16, fnum: u8, on: bool) -> Packet {
    let mut b = body(adr, 0);
    push(&mut b, CMD_FUNC_SINGLE);
    push(&mut b, ((fnum & 0x7F) as u32, 7));
    push(&mut b, (on as u32, 1));
    packet(PacketOp::M3Func, adr, b)
}

/// Station beacon: announces the station uid and the re-registration
/// counter so decoders can detect a changed layout.
pub fn beacon(station_uid: u32, counter: u16) -> Packet {
    let mut b = body(0, 0);
    push(&mut b, CMD_BEACON);
    push(&mut b, (station_uid, 32));
    push(&mut b, (counter as u32, 16));
    packet(PacketOp::M3Beacon, 0, b)
}

/// Binary-search probe for unregistered decoders.
///
/// Asks every decoder whose uid starts with the top `count` bits of
/// `uid` to answer in the one-bit reply window.
pub fn search(uid: u32, count: u8) -> Packet {
    let count = count.min(32);
    let mut b = body(0, REPLY_SLOTS_BIN);
    push(&mut b, CMD_SEARCH);
    push(&mut b, (count as u32, 6));
    if count > 0 {
        push(&mut b, (uid >> (32 - count), count));
    }
    packet(PacketOp::M3Search, 0, b).with_readback(ReadbackKind::M3Bin)
}

/// Bind a track address to the decoder with this uid.
pub fn set_address(adr: u16, uid: u32) -> Packet {
    let mut b = body(0, 0);
    push(&mut b, CMD_SET_ADDRESS);
    push(&mut b, ((adr & 0x3FFF) as u32, 14));
    push(&mut b, (uid, 32));
    packet(PacketOp::M3SetAddress, adr, b)
}

/// Existence check of a registered decoder.
pub fn ping(adr: u16) -> Packet {
    let mut b = body(adr, REPLY_SLOTS_BIN);
    push(&mut b, CMD_PING);
    packet(PacketOp::M3Ping, adr, b).with_readback(ReadbackKind::M3Bin)
}

/// Read one byte of a configuration variable.
pub fn cv_read(adr: u16, cv: u16, index: u8) -> Packet {
    let mut b = body(adr, REPLY_SLOTS_DATA);
    push(&mut b, CMD_CV_READ);
    push(&mut b, ((cv & 0x3FF) as u32, 10));
    push(&mut b, ((index & 0x3F) as u32, 6));
    packet(PacketOp::M3CvRead, adr, b)
        .with_readback(ReadbackKind::M3Data)
        .with_cv(CvAddress::Cv(cv))
}

/// Write one byte of a configuration variable.
pub fn cv_write(adr: u16, cv: u16, index: u8, value: u8) -> Packet {
    let mut b = body(adr, REPLY_SLOTS_BIN);
    push(&mut b, CMD_CV_WRITE);
    push(&mut b, ((cv & 0x3FF) as u32, 10));
    push(&mut b, ((index & 0x3F) as u32, 6));
    push(&mut b, (value as u32, 8));
    packet(PacketOp::M3CvWrite, adr, b)
        .with_readback(ReadbackKind::M3Bin)
        .with_cv(CvAddress::Cv(cv))
        .with_param(value as u32)
}
