pub mod construct;

use dcs_core::format::LocoFormat;
use dcs_core::message::CvAddress;
use heapless::Vec;

use crate::router::ReplyHook;

/// Longest DCC payload a queued command can carry, checksum excluded.
pub const DCC_PAYLOAD_MAX: usize = 12;
/// Bit-run chunks of an M3 command body.
pub const M3_CHUNKS_MAX: usize = 6;

/// The closed set of queued commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PacketOp {
    // Generic
    Idle,
    Reset,

    // Maerklin-Motorola
    MmLocoSpeed,
    MmDirectionPulse,
    MmLocoFunc,
    MmTurnout,

    // DCC
    DccLocoSpeed,
    DccLocoFunc,
    DccAccessory,
    DccExtAccessory,
    DccPomRead,
    DccPomWrite,
    DccPomWriteBit,
    DccXpomRead,
    DccXpomWrite,
    DccProgWriteByte,
    DccProgVerifyByte,
    DccProgWriteBit,
    DccProgVerifyBit,
    DccModelTime,
    DccModelDate,
    DccSysTime,

    // DCC automatic logon
    DccaLogonEnableAll,
    DccaLogonEnableLoco,
    DccaLogonEnableAcc,
    DccaLogonEnableNow,
    DccaSelectShortInfo,
    DccaSelectBlock,
    DccaSelectCvBlock,
    DccaDecoderState,
    DccaLogonAssign,
    DccaGetDataStart,
    DccaGetDataCont,

    // M3
    M3Beacon,
    M3Search,
    M3SetAddress,
    M3Ping,
    M3Speed,
    M3SpeedFunc,
    M3Func,
    M3CvRead,
    M3CvWrite,
}

impl PacketOp {
    /// Whether a newer packet with the same opcode and address may
    /// replace a pending one instead of queueing behind it.
    ///
    /// Bit writes and multi-stage service commands must never be
    /// collapsed.
    pub const fn coalesces(&self) -> bool {
        matches!(
            self,
            Self::MmLocoSpeed
                | Self::MmLocoFunc
                | Self::MmTurnout
                | Self::DccLocoSpeed
                | Self::DccLocoFunc
                | Self::DccAccessory
                | Self::DccExtAccessory
                | Self::M3Speed
                | Self::M3SpeedFunc
                | Self::M3Func
                | Self::M3Beacon
                | Self::DccModelTime
                | Self::DccModelDate
                | Self::DccSysTime
        )
    }

    /// Whether the command belongs on the programming track.
    pub const fn is_service_mode(&self) -> bool {
        matches!(
            self,
            Self::DccProgWriteByte
                | Self::DccProgVerifyByte
                | Self::DccProgWriteBit
                | Self::DccProgVerifyBit
        )
    }
}

/// What kind of answer the read-back path should look for while the
/// encoded buffer is on the track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReadbackKind {
    #[default]
    None,
    Pom,
    /// POM write: answers equal to the old value are filtered until
    /// the target value shows up or the repeats run out.
    PomWriteVerify,
    Xpom,
    DccaId,
    DccaData,
    DccaShortInfo,
    DccaAck,
    AccSrq,
    ProgAck,
    M3Bin,
    M3Data,
}

/// Motorola double-block content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MmBody {
    pub adr: u8,
    /// Control trit value (F0 on Motorola II).
    pub func: bool,
    /// First bits of the four data trits.
    pub data: u8,
    /// Second bits of the four data trits. Equal to `data` for plain
    /// telegrams; Motorola II function telegrams differ.
    pub data2: u8,
    /// Alternate data nibble for the 27A half-step telegram pair.
    pub alt_data: Option<u8>,
    /// Invert the second bit of the control trit (27B half step).
    pub half: bool,
    /// Fast (accessory) bit timing instead of loco timing.
    pub fast: bool,
}

impl MmBody {
    /// Plain telegram: both bits of every data trit carry the nibble.
    pub const fn plain(adr: u8, func: bool, data: u8, fast: bool) -> Self {
        Self {
            adr,
            func,
            data,
            data2: data,
            alt_data: None,
            half: false,
            fast,
        }
    }
}

/// Assembled DCC instruction bytes, checksum excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DccBody {
    pub bytes: Vec<u8, DCC_PAYLOAD_MAX>,
    pub service_mode: bool,
    /// Ask the signal generator for a RailCom cutout after the frame.
    pub cutout: bool,
    /// Automatic-logon frame; gets the CRC-8 appended when encoding.
    pub dcca: bool,
    /// Extended POM sequence bits, when the command is an XPOM.
    pub xpom_seq: Option<u8>,
}

/// One run of literal bits of an M3 command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct M3Chunk {
    pub value: u32,
    pub bits: u8,
}

impl M3Chunk {
    pub const fn new(value: u32, bits: u8) -> Self {
        Self { value, bits }
    }
}

/// M3 frame content: address plus command bit runs.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct M3Body {
    pub adr: u16,
    pub chunks: Vec<M3Chunk, M3_CHUNKS_MAX>,
    /// Half-sync pulses to clock after the frame for a reply.
    pub reply_slots: u8,
}

/// Format-specific command content built by the packet constructors.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PacketBody {
    /// No track content (placeholder for delegated outputs).
    None,
    Mm(MmBody),
    Dcc(DccBody),
    M3(M3Body),
}

/// A queued command on its way to the track.
///
/// Owned exclusively by the queue, then by the encoder, then by the
/// signal generator's buffer chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub op: PacketOp,
    /// Logical decoder address the command targets.
    pub adr: u16,
    pub format: LocoFormat,
    pub body: PacketBody,
    /// Transmissions of the encoded buffer.
    pub repeat: u8,
    pub readback: ReadbackKind,
    pub cv: CvAddress,
    /// Free-form parameter (target value of a verify, logon session, ...).
    pub param: u32,
    /// Invoked for replies attributable to this packet.
    pub hook: Option<ReplyHook>,
    /// Synthesised by the refresh scheduler, not a user command.
    pub refresh: bool,
}

impl Packet {
    pub fn new(op: PacketOp, adr: u16, format: LocoFormat, body: PacketBody) -> Self {
        Self {
            op,
            adr,
            format,
            body,
            repeat: 1,
            readback: ReadbackKind::None,
            cv: CvAddress::None,
            param: 0,
            hook: None,
            refresh: false,
        }
    }

    pub fn with_repeat(mut self, repeat: u8) -> Self {
        self.repeat = repeat.max(1);
        self
    }

    pub fn with_readback(mut self, readback: ReadbackKind) -> Self {
        self.readback = readback;
        self
    }

    pub fn with_cv(mut self, cv: CvAddress) -> Self {
        self.cv = cv;
        self
    }

    pub fn with_param(mut self, param: u32) -> Self {
        self.param = param;
        self
    }

    pub fn with_hook(mut self, hook: ReplyHook) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn as_refresh(mut self) -> Self {
        self.refresh = true;
        self.repeat = 1;
        self
    }
}
