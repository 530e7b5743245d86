//! Turnout and accessory command constructors.

use dcs_core::address::AccessoryAddress;
use dcs_core::format::LocoFormat;

use crate::packet::{MmBody, Packet, PacketBody, PacketOp, ReadbackKind};

use super::dcc_body;

/// Motorola turnout command.
///
/// Stationary Motorola decoders listen on the fast telegram timing;
/// the data nibble keys one of eight outputs plus the energize bit.
pub fn mm_turnout(adr: AccessoryAddress, dir: bool, energize: bool) -> Packet {
    let (decoder, port) = adr.decoder_and_port();
    let key = (port << 1) | dir as u8;
    let data = (key << 1) | energize as u8;

    Packet::new(
        PacketOp::MmTurnout,
        adr.raw(),
        LocoFormat::Mm2_14,
        PacketBody::Mm(MmBody::plain(decoder as u8, false, data, true)),
    )
}

/// DCC basic accessory command.
pub fn dcc_accessory(adr: AccessoryAddress, dir: bool, energize: bool) -> Packet {
    let (decoder, port) = adr.decoder_and_port();

    let byte0 = 0x80 | (decoder & 0x3F) as u8;
    let high = ((decoder >> 6) & 0x07) as u8;
    let byte1 = 0x80 | ((!high & 0x07) << 4) | ((energize as u8) << 3) | (port << 1) | dir as u8;

    let mut body = dcc_body(&[byte0, byte1]);
    body.cutout = true;

    Packet::new(
        PacketOp::DccAccessory,
        adr.raw(),
        LocoFormat::Dcc28,
        PacketBody::Dcc(body),
    )
    .with_readback(ReadbackKind::AccSrq)
}

/// DCC extended accessory command carrying an aspect.
pub fn dcc_ext_accessory(adr: AccessoryAddress, aspect: u8) -> Packet {
    let raw = adr.raw() - 1;
    let decoder = raw >> 2;
    let output = (raw & 0x03) as u8;

    let byte0 = 0x80 | (decoder & 0x3F) as u8;
    let high = ((decoder >> 6) & 0x07) as u8;
    let byte1 = ((!high & 0x07) << 4) | (output << 1) | 0x01;

    let mut body = dcc_body(&[byte0, byte1, aspect & 0x7F]);
    body.cutout = true;

    Packet::new(
        PacketOp::DccExtAccessory,
        adr.raw(),
        LocoFormat::Dcc28,
        PacketBody::Dcc(body),
    )
}
