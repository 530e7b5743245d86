//! Configuration-variable access commands.
//!
//! Programming on main (POM, XPOM) addresses a decoder on the live
//! track and reads back through the RailCom cutout; the direct-mode
//! commands run on the isolated programming track and are acknowledged
//! by current pulses.

use dcs_core::address::LocoAddress;
use dcs_core::format::LocoFormat;
use dcs_core::message::CvAddress;
use heapless::Vec;

use crate::packet::{DccBody, Packet, PacketBody, PacketOp, ReadbackKind, DCC_PAYLOAD_MAX};

const POM_READ: u8 = 0xE4;
const POM_WRITE: u8 = 0xEC;
const POM_BIT: u8 = 0xE8;

/// Extended POM commands carry the sequence number in the low bits.
const XPOM_READ: u8 = 0xE0;
const XPOM_WRITE: u8 = 0xF0;

const DIRECT_VERIFY: u8 = 0x74;
const DIRECT_WRITE: u8 = 0x7C;
const DIRECT_BIT: u8 = 0x78;

fn loco_addressed(op: PacketOp, adr: u16, instruction: &[u8]) -> Packet {
    let (adr_bytes, adr_len) = LocoAddress::new(adr).as_dcc_bytes(false);

    let mut bytes: Vec<u8, DCC_PAYLOAD_MAX> = Vec::new();
    bytes.extend_from_slice(&adr_bytes[..adr_len]).ok();
    bytes.extend_from_slice(instruction).ok();

    let body = DccBody {
        bytes,
        service_mode: false,
        cutout: true,
        dcca: false,
        xpom_seq: None,
    };

    Packet::new(op, adr, LocoFormat::Dcc28, PacketBody::Dcc(body))
}

/// Service-mode packets carry no address; every decoder on the
/// programming track listens.
fn service_packet(op: PacketOp, instruction: &[u8]) -> Packet {
    let body = DccBody {
        bytes: Vec::from_slice(instruction).unwrap_or_else(|_| Vec::new()),
        service_mode: true,
        cutout: false,
        dcca: false,
        xpom_seq: None,
    };

    Packet::new(op, 0, LocoFormat::Dcc28, PacketBody::Dcc(body))
}

fn cv_instruction(cmd: u8, cv: u16) -> [u8; 2] {
    let cv0 = cv - 1;
    [cmd | ((cv0 >> 8) & 0x03) as u8, cv0 as u8]
}

/// POM read of one CV; the answer arrives as a RailCom datagram.
pub fn pom_read(adr: u16, cv: u16, repeat: u8) -> Packet {
    let head = cv_instruction(POM_READ, cv);
    loco_addressed(PacketOp::DccPomRead, adr, &[head[0], head[1], 0])
        .with_readback(ReadbackKind::Pom)
        .with_cv(CvAddress::Cv(cv))
        .with_repeat(repeat)
}

/// POM write of one CV, verified against the RailCom echo.
pub fn pom_write(adr: u16, cv: u16, value: u8, repeat: u8) -> Packet {
    let head = cv_instruction(POM_WRITE, cv);
    loco_addressed(PacketOp::DccPomWrite, adr, &[head[0], head[1], value])
        .with_readback(ReadbackKind::PomWriteVerify)
        .with_cv(CvAddress::Cv(cv))
        .with_param(value as u32)
        .with_repeat(repeat)
}

/// POM write of one CV bit.
pub fn pom_write_bit(adr: u16, cv: u16, bit: u8, value: bool, repeat: u8) -> Packet {
    let head = cv_instruction(POM_BIT, cv);
    let data = 0xF0 | ((value as u8) << 3) | (bit & 0x07);
    loco_addressed(PacketOp::DccPomWriteBit, adr, &[head[0], head[1], data])
        .with_readback(ReadbackKind::Pom)
        .with_cv(CvAddress::CvBit { cv, bit })
        .with_repeat(repeat)
}

/// Extended POM read of a 24-bit CV address.
pub fn xpom_read(adr: u16, cv31: u8, cv32: u8, cv: u16, seq: u8) -> Packet {
    let raw = ((cv31 as u32) << 16) | ((cv32 as u32) << 8) | (cv & 0xFF) as u32;
    let mut p = loco_addressed(
        PacketOp::DccXpomRead,
        adr,
        &[XPOM_READ | (seq & 0x03), cv31, cv32, cv as u8],
    );
    if let PacketBody::Dcc(body) = &mut p.body {
        body.xpom_seq = Some(seq & 0x03);
    }
    p.with_readback(ReadbackKind::Xpom)
        .with_cv(CvAddress::Xpom(raw))
}

/// Extended POM write of a 24-bit CV address.
pub fn xpom_write(adr: u16, cv31: u8, cv32: u8, cv: u16, value: u8, seq: u8) -> Packet {
    let raw = ((cv31 as u32) << 16) | ((cv32 as u32) << 8) | (cv & 0xFF) as u32;
    let mut p = loco_addressed(
        PacketOp::DccXpomWrite,
        adr,
        &[XPOM_WRITE | (seq & 0x03), cv31, cv32, cv as u8, value],
    );
    if let PacketBody::Dcc(body) = &mut p.body {
        body.xpom_seq = Some(seq & 0x03);
    }
    p.with_readback(ReadbackKind::Xpom)
        .with_cv(CvAddress::Xpom(raw))
        .with_param(value as u32)
}

/// Direct-mode verify of a whole CV byte.
pub fn direct_verify_byte(cv: u16, value: u8, repeat: u8) -> Packet {
    let head = cv_instruction(DIRECT_VERIFY, cv);
    service_packet(PacketOp::DccProgVerifyByte, &[head[0], head[1], value])
        .with_readback(ReadbackKind::ProgAck)
        .with_cv(CvAddress::Cv(cv))
        .with_param(value as u32)
        .with_repeat(repeat)
}

/// Direct-mode write of a whole CV byte.
pub fn direct_write_byte(cv: u16, value: u8, repeat: u8) -> Packet {
    let head = cv_instruction(DIRECT_WRITE, cv);
    service_packet(PacketOp::DccProgWriteByte, &[head[0], head[1], value])
        .with_readback(ReadbackKind::ProgAck)
        .with_cv(CvAddress::Cv(cv))
        .with_param(value as u32)
        .with_repeat(repeat)
}

fn direct_bit_data(bit: u8, value: bool, write: bool) -> u8 {
    0xE0 | ((write as u8) << 4) | ((value as u8) << 3) | (bit & 0x07)
}

/// Direct-mode verify of one CV bit.
pub fn direct_verify_bit(cv: u16, bit: u8, value: bool, repeat: u8) -> Packet {
    let head = cv_instruction(DIRECT_BIT, cv);
    service_packet(
        PacketOp::DccProgVerifyBit,
        &[head[0], head[1], direct_bit_data(bit, value, false)],
    )
    .with_readback(ReadbackKind::ProgAck)
    .with_cv(CvAddress::CvBit { cv, bit })
    .with_repeat(repeat)
}

/// Direct-mode write of one CV bit.
pub fn direct_write_bit(cv: u16, bit: u8, value: bool, repeat: u8) -> Packet {
    let head = cv_instruction(DIRECT_BIT, cv);
    service_packet(
        PacketOp::DccProgWriteBit,
        &[head[0], head[1], direct_bit_data(bit, value, true)],
    )
    .with_readback(ReadbackKind::ProgAck)
    .with_cv(CvAddress::CvBit { cv, bit })
    .with_repeat(repeat)
}
