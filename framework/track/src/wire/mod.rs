//! Wire encoders: one module per track format plus the shared bit
//! buffer.

pub mod bitbuf;
pub mod dcc;
pub mod m3;
pub mod mm;

use core::fmt;

use dcs_core::message::DecoderType;

pub use self::bitbuf::{BitBuffer, BufFormat, DccSub, M3Sub, MmSub, Readback, SubState, MAX_SIGNAL_BITS};

use crate::fmtcfg::FormatConfig;
use crate::packet::{Packet, PacketBody, PacketOp, ReadbackKind};

/// Encoding of a packet failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The bit stream does not fit one buffer.
    Overflow,
    EmptyPayload,
    /// The packet carries no track content.
    Unencodable,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Overflow => write!(f, "bit buffer overflow"),
            Error::EmptyPayload => write!(f, "empty payload"),
            Error::Unencodable => write!(f, "no track content"),
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;

fn reply_dectype(packet: &Packet) -> DecoderType {
    match packet.readback {
        ReadbackKind::Pom | ReadbackKind::PomWriteVerify | ReadbackKind::Xpom => {
            DecoderType::DccMobile
        }
        ReadbackKind::AccSrq => DecoderType::DccStationary,
        ReadbackKind::DccaId
        | ReadbackKind::DccaData
        | ReadbackKind::DccaShortInfo
        | ReadbackKind::DccaAck => DecoderType::DccA,
        ReadbackKind::M3Bin | ReadbackKind::M3Data => DecoderType::M3,
        ReadbackKind::ProgAck => DecoderType::Prog,
        ReadbackKind::None => {
            if packet.format.is_m3() {
                DecoderType::M3
            } else {
                DecoderType::DccMobile
            }
        }
    }
}

fn effective_repeat(packet: &Packet, cfg: &FormatConfig) -> u8 {
    if packet.refresh {
        return 1;
    }
    if packet.repeat > 1 {
        return packet.repeat;
    }

    match packet.op {
        op if op.is_service_mode() => cfg.prog_repeat,
        PacketOp::MmTurnout | PacketOp::DccAccessory | PacketOp::DccExtAccessory => cfg.acc_repeat,
        PacketOp::DccPomRead | PacketOp::DccPomWrite | PacketOp::DccPomWriteBit => cfg.pom_repeat,
        PacketOp::DccXpomRead | PacketOp::DccXpomWrite => cfg.pom_repeat,
        // Commands with a reply window clock it exactly once.
        PacketOp::M3CvRead | PacketOp::M3CvWrite | PacketOp::M3Ping | PacketOp::M3Search => 1,
        _ => cfg.loco_repeat,
    }
}

/// Turn a queued packet into a ready-to-clock bit buffer.
///
/// Deterministic: equal packets under an equal config produce equal
/// buffers, bit for bit.
pub fn encode(packet: &Packet, cfg: &FormatConfig) -> Result<BitBuffer> {
    let mut buf = match &packet.body {
        PacketBody::Mm(body) => mm::encode(body, cfg)?,
        PacketBody::Dcc(body) => dcc::encode(body, cfg)?,
        PacketBody::M3(body) => m3::encode(body)?,
        PacketBody::None => return Err(Error::Unencodable),
    };

    if packet.readback == ReadbackKind::PomWriteVerify {
        if let SubState::Dcc(sub) = &mut buf.sub {
            sub.expected = Some(packet.param as u8);
        }
    }

    buf.repeat = effective_repeat(packet, cfg).max(1);
    buf.readback = Readback {
        kind: packet.readback,
        dectype: reply_dectype(packet),
        adr: packet.adr,
        cv: packet.cv,
        param: packet.param,
        hook: packet.hook,
    };

    Ok(buf)
}
