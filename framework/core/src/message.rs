use core::fmt;
use num_enum::{FromPrimitive, IntoPrimitive};

/// Payload bytes a decoder reply can carry.
pub const REPLY_DATA_MAX: usize = 16;

/// Class of decoder a reply originates from.
#[derive(FromPrimitive, IntoPrimitive, Debug, Clone, PartialEq, Eq, Copy, Default)]
#[repr(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecoderType {
    #[default]
    DccMobile = 0,
    DccStationary = 1,
    DccA = 2,
    M3 = 3,
    /// Programming-track acknowledge pulses.
    Prog = 4,
}

/// Kind of a decoder reply.
///
/// Closed set; receivers map wire identifiers onto it and the reply
/// router filters on it.
#[derive(FromPrimitive, IntoPrimitive, Debug, Clone, PartialEq, Eq, Copy)]
#[repr(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReplyKind {
    /// Programming-on-main CV readout.
    Pom = 0,
    Xpom0 = 1,
    Xpom1 = 2,
    Xpom2 = 3,
    Xpom3 = 4,
    /// Dynamic state (speedometer, fuel, ...).
    Dyn = 5,
    AdrHigh = 6,
    AdrLow = 7,
    Ext = 8,
    Stat1 = 9,
    Time = 10,
    Error = 11,
    /// One block of a DCC-A data space.
    DccaBlock = 12,
    DccaShortInfo = 13,
    /// Decoder unique id seen during logon.
    DccaUnique = 14,
    DccaState = 15,
    /// Stationary decoder service request.
    Srq = 16,
    Ack = 17,
    Nack = 18,
    Collision = 19,
    #[default]
    Timeout = 20,
    NoAnswer = 21,
    M3Bin = 22,
    M3Data = 23,
    ProgAck = 24,
}

/// CV addressing of a request or reply.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CvAddress {
    #[default]
    None,
    Cv(u16),
    CvBit {
        cv: u16,
        bit: u8,
    },
    /// 24-bit extended POM address with the two low select bits.
    Xpom(u32),
}

impl CvAddress {
    pub const fn cv(&self) -> u16 {
        match self {
            Self::Cv(cv) => *cv,
            Self::CvBit { cv, .. } => *cv,
            Self::Xpom(raw) => (*raw >> 8) as u16,
            Self::None => 0,
        }
    }
}

/// One decoded reply from the track.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DecoderMessage {
    pub dectype: DecoderType,
    pub adr: u16,
    pub kind: ReplyKind,
    pub cv: CvAddress,
    /// Free-form parameter; meaning depends on `kind`.
    pub param: u32,
    pub len: u8,
    pub data: [u8; REPLY_DATA_MAX],
}

impl DecoderMessage {
    pub fn new(dectype: DecoderType, adr: u16, kind: ReplyKind) -> Self {
        Self {
            dectype,
            adr,
            kind,
            cv: CvAddress::None,
            param: 0,
            len: 0,
            data: [0; REPLY_DATA_MAX],
        }
    }

    pub fn with_payload(mut self, payload: &[u8]) -> Self {
        let len = payload.len().min(REPLY_DATA_MAX);
        self.data[..len].copy_from_slice(&payload[..len]);
        self.len = len as u8;
        self
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

impl fmt::Display for DecoderMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:?} adr={} kind={:?} len={}",
            self.dectype, self.adr, self.kind, self.len
        )
    }
}
