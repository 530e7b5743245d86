//! Automatic-logon (DCC-A) command constructors.
//!
//! Every command travels under the reserved logical address 0xFE and
//! closes with the logon CRC-8 before the regular DCC checksum; the
//! encoder appends the CRC when `dcca` is set on the body.

use dcs_core::format::LocoFormat;
use heapless::Vec;
use zerocopy::{ByteOrder, NetworkEndian};

use crate::packet::{DccBody, Packet, PacketBody, PacketOp, ReadbackKind};

/// Reserved logical address of the logon commands.
pub const DCCA_ADDRESS: u8 = 0xFE;

const CMD_LOGON_ENABLE: u8 = 0xFC;
const CMD_SELECT: u8 = 0xD0;
const CMD_LOGON_ASSIGN: u8 = 0xE0;
const CMD_GET_DATA_START: u8 = 0x00;
const CMD_GET_DATA_CONT: u8 = 0x04;

/// Select sub-commands.
const SELECT_SHORT_INFO: u8 = 0xFF;
const SELECT_CV_BLOCK: u8 = 0x80;

/// Which decoder group a logon-enable round addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LogonGroup {
    All,
    Loco,
    Accessory,
    /// Immediate logon of decoders that skipped the backoff.
    Now,
}

impl LogonGroup {
    const fn bits(&self) -> u8 {
        match self {
            Self::All => 0b00,
            Self::Loco => 0b01,
            Self::Accessory => 0b10,
            Self::Now => 0b11,
        }
    }

    const fn op(&self) -> PacketOp {
        match self {
            Self::All => PacketOp::DccaLogonEnableAll,
            Self::Loco => PacketOp::DccaLogonEnableLoco,
            Self::Accessory => PacketOp::DccaLogonEnableAcc,
            Self::Now => PacketOp::DccaLogonEnableNow,
        }
    }
}

fn dcca_packet(op: PacketOp, bytes: &[u8], readback: ReadbackKind) -> Packet {
    let body = DccBody {
        bytes: Vec::from_slice(bytes).unwrap_or_else(|_| Vec::new()),
        service_mode: false,
        cutout: true,
        dcca: true,
        xpom_seq: None,
    };

    Packet::new(op, DCCA_ADDRESS as u16, LocoFormat::Dcc28, PacketBody::Dcc(body))
        .with_readback(readback)
}

/// Open a logon round for a decoder group.
///
/// `cid` identifies this command station, `session` the logon session;
/// decoders that already logged on under the pair stay silent.
pub fn logon_enable(group: LogonGroup, cid: u16, session: u8) -> Packet {
    let mut bytes = [0u8; 5];
    bytes[0] = DCCA_ADDRESS;
    bytes[1] = CMD_LOGON_ENABLE | group.bits();
    NetworkEndian::write_u16(&mut bytes[2..4], cid);
    bytes[4] = session;

    dcca_packet(group.op(), &bytes, ReadbackKind::DccaId)
}

fn select_bytes(vid: u8, uid: u32, subcmd: u8) -> [u8; 8] {
    let mut bytes = [0u8; 8];
    bytes[0] = DCCA_ADDRESS;
    bytes[1] = CMD_SELECT;
    bytes[2] = vid;
    NetworkEndian::write_u32(&mut bytes[3..7], uid);
    bytes[7] = subcmd;
    bytes
}

/// Ask the selected decoder for its short info block.
pub fn select_short_info(vid: u8, uid: u32) -> Packet {
    dcca_packet(
        PacketOp::DccaSelectShortInfo,
        &select_bytes(vid, uid, SELECT_SHORT_INFO),
        ReadbackKind::DccaShortInfo,
    )
}

/// Select one data space for block readout.
pub fn select_block(vid: u8, uid: u32, space: u8) -> Packet {
    dcca_packet(
        PacketOp::DccaSelectBlock,
        &select_bytes(vid, uid, space & 0x3F),
        ReadbackKind::DccaAck,
    )
    .with_param(space as u32)
}

/// Select the CV space for block readout.
pub fn select_cv_block(vid: u8, uid: u32) -> Packet {
    dcca_packet(
        PacketOp::DccaSelectCvBlock,
        &select_bytes(vid, uid, SELECT_CV_BLOCK),
        ReadbackKind::DccaAck,
    )
}

/// Query or clear the decoder state flags.
///
/// Writing 0xFF clears the change flags after a full readout.
pub fn decoder_state(vid: u8, uid: u32, flags: u8) -> Packet {
    let mut bytes = [0u8; 9];
    bytes[..8].copy_from_slice(&select_bytes(vid, uid, 0));
    bytes[7] = 0x01;
    bytes[8] = flags;

    dcca_packet(PacketOp::DccaDecoderState, &bytes, ReadbackKind::DccaAck)
}

/// Bind the decoder to a coded track address.
pub fn logon_assign(vid: u8, uid: u32, coded_adr: u16) -> Packet {
    let mut bytes = [0u8; 9];
    bytes[0] = DCCA_ADDRESS;
    bytes[1] = CMD_LOGON_ASSIGN;
    bytes[2] = vid;
    NetworkEndian::write_u32(&mut bytes[3..7], uid);
    NetworkEndian::write_u16(&mut bytes[7..9], coded_adr);

    dcca_packet(PacketOp::DccaLogonAssign, &bytes, ReadbackKind::DccaAck)
}

/// First block request of the selected data space.
pub fn get_data_start() -> Packet {
    dcca_packet(
        PacketOp::DccaGetDataStart,
        &[DCCA_ADDRESS, CMD_GET_DATA_START],
        ReadbackKind::DccaData,
    )
}

/// Follow-up block request of the selected data space.
pub fn get_data_cont() -> Packet {
    dcca_packet(
        PacketOp::DccaGetDataCont,
        &[DCCA_ADDRESS, CMD_GET_DATA_CONT],
        ReadbackKind::DccaData,
    )
}

#[cfg(test)]
mod test {
    use super::*;

    fn bytes(p: &Packet) -> &[u8] {
        match &p.body {
            PacketBody::Dcc(b) => {
                assert!(b.dcca);
                assert!(b.cutout);
                &b.bytes
            }
            other => panic!("expected DCC body, got {other:?}"),
        }
    }

    #[test]
    fn test_logon_enable_groups() {
        let p = logon_enable(LogonGroup::All, 0x1234, 7);
        assert_eq!(bytes(&p), &[0xFE, 0xFC, 0x12, 0x34, 0x07]);

        let p = logon_enable(LogonGroup::Now, 0x1234, 7);
        assert_eq!(bytes(&p)[1], 0xFF);
    }

    #[test]
    fn test_select_short_info() {
        let p = select_short_info(0x04, 0x1234_5678);
        assert_eq!(
            bytes(&p),
            &[0xFE, 0xD0, 0x04, 0x12, 0x34, 0x56, 0x78, 0xFF]
        );
        assert_eq!(p.readback, ReadbackKind::DccaShortInfo);
    }

    #[test]
    fn test_logon_assign_carries_coded_address() {
        let p = logon_assign(0x04, 0x1234_5678, 0x3803);
        let b = bytes(&p);
        assert_eq!(&b[7..9], &[0x38, 0x03]);
        assert_eq!(p.op, PacketOp::DccaLogonAssign);
    }

    #[test]
    fn test_block_requests() {
        assert_eq!(bytes(&get_data_start()), &[0xFE, 0x00]);
        assert_eq!(bytes(&get_data_cont()), &[0xFE, 0x04]);
        assert_eq!(select_block(4, 1, 5).param, 5);
    }
}
