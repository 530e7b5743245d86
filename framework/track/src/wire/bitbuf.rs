use dcs_core::message::{CvAddress, DecoderType};

use crate::packet::ReadbackKind;
use crate::router::ReplyHook;

/// Most signal bits one buffer can hold.
pub const MAX_SIGNAL_BITS: usize = 160;
const BUF_BYTES: usize = MAX_SIGNAL_BITS / 8;

/// Wire format of an encoded buffer.
///
/// The signal generator derives the half-period schedule from this
/// tag; the read-back receivers derive the expected answer framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BufFormat {
    #[default]
    Dcc,
    DccXpom00,
    DccXpom01,
    DccXpom10,
    DccXpom11,
    DccA,
    MmSlow,
    MmFast,
    M3,
}

impl BufFormat {
    pub const fn is_dcc(&self) -> bool {
        matches!(
            self,
            Self::Dcc | Self::DccXpom00 | Self::DccXpom01 | Self::DccXpom10 | Self::DccXpom11 | Self::DccA
        )
    }

    pub const fn is_mm(&self) -> bool {
        matches!(self, Self::MmSlow | Self::MmFast)
    }
}

/// DCC buffer sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DccSub {
    pub preamble: u8,
    pub tail: u8,
    pub half_one_us: u16,
    pub half_zero_us: u16,
    /// Emit the RailCom cutout after every transmission.
    pub cutout: bool,
    /// Target value of a POM write verify.
    pub expected: Option<u8>,
    /// Last POM answer observed while filtering.
    pub last_value: Option<u8>,
    /// The expected value was seen in a cutout.
    pub value_seen: bool,
}

/// Motorola buffer sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MmSub {
    /// Pause between the two blocks of one telegram.
    pub pause_us: u16,
    /// Gap after the double block.
    pub gap_us: u16,
    /// Which half of the double block is on the wire.
    pub pass: u8,
}

/// M3 buffer sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct M3Sub {
    /// Half-sync pulses to clock for the decoder reply.
    pub reply_slots: u8,
    /// Ones run-length at the end of encoding (stuffing context).
    pub stuff_ones: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SubState {
    Dcc(DccSub),
    Mm(MmSub),
    M3(M3Sub),
}

impl Default for SubState {
    fn default() -> Self {
        Self::Dcc(DccSub::default())
    }
}

/// Read-back context travelling with an encoded buffer.
///
/// The receivers use it to produce replies carrying the exact request
/// coordinates, and to find the originator's hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readback {
    pub kind: ReadbackKind,
    pub dectype: DecoderType,
    pub adr: u16,
    pub cv: CvAddress,
    pub param: u32,
    pub hook: Option<ReplyHook>,
}

/// One encoded, ready-to-clock signal buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitBuffer {
    pub format: BufFormat,
    bits: [u8; BUF_BYTES],
    len: u16,
    /// Transmissions left, decremented by the signal generator.
    pub repeat: u8,
    /// Set by the read-back path when a valid answer arrived; the
    /// signal generator then skips the remaining repeats.
    pub ack: bool,
    pub sub: SubState,
    pub readback: Readback,
}

impl BitBuffer {
    pub fn new(format: BufFormat) -> Self {
        Self {
            format,
            bits: [0; BUF_BYTES],
            len: 0,
            repeat: 1,
            ack: false,
            sub: SubState::default(),
            readback: Readback::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append one signal bit. Bits beyond the capacity are refused.
    pub fn push_bit(&mut self, bit: bool) -> bool {
        if self.len as usize >= MAX_SIGNAL_BITS {
            return false;
        }
        if bit {
            self.bits[(self.len / 8) as usize] |= 1 << (self.len % 8);
        }
        self.len += 1;
        true
    }

    /// Append `count` bits of `value`, most significant first.
    pub fn push_bits(&mut self, value: u32, count: u8) -> bool {
        for i in (0..count).rev() {
            if !self.push_bit(value & (1 << i) != 0) {
                return false;
            }
        }
        true
    }

    /// Append one byte, most significant bit first.
    pub fn push_byte(&mut self, byte: u8) -> bool {
        self.push_bits(byte as u32, 8)
    }

    pub fn bit(&self, index: usize) -> bool {
        debug_assert!(index < self.len as usize);
        self.bits[index / 8] & (1 << (index % 8)) != 0
    }

    /// The whole bit stream as a bool iterator, transmission order.
    pub fn iter_bits(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len as usize).map(move |i| self.bit(i))
    }
}
