use byteorder::{ByteOrder, NetworkEndian};
use core::fmt;

use crate::format::LocoFormat;

/// Highest loco address of any format.
pub const LOCO_ADDR_MAX: u16 = 16383;
/// Highest Motorola loco address.
pub const MM_ADDR_MAX: u16 = 255;
/// Highest DCC loco address.
pub const DCC_ADDR_MAX: u16 = 10239;
/// Highest DCC short-form loco address.
pub const DCC_SHORT_MAX: u16 = 127;
/// Highest M3 loco address.
pub const M3_ADDR_MAX: u16 = 16383;
/// Highest turnout / extended accessory address.
pub const TURNOUT_ADDR_MAX: u16 = 2047;

/// A loco address, unique across all track formats.
///
/// Address 0 is reserved for the process-wide default-format template
/// in the decoder database and never reaches the track.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LocoAddress(pub u16);

impl LocoAddress {
    pub const fn new(adr: u16) -> Self {
        Self(adr)
    }

    pub const fn raw(&self) -> u16 {
        self.0
    }

    /// Whether the DCC short address form applies.
    ///
    /// Short form iff `1 ..= 127`; the long form covers `128 ..= 10239`.
    pub const fn is_dcc_short(&self) -> bool {
        self.0 >= 1 && self.0 <= DCC_SHORT_MAX
    }

    /// Check the address against the range of a track format.
    pub const fn is_valid_for(&self, format: LocoFormat) -> bool {
        self.0 >= 1 && self.0 <= format.max_addr()
    }

    /// Return the DCC address as one or two instruction octets.
    ///
    /// 7 bit addresses occupy a single octet. 14 bit addresses have
    /// bits 6,7 of the most significant octet set to 1.
    pub fn as_dcc_bytes(&self, force_long: bool) -> ([u8; 2], usize) {
        let mut bytes = [0u8; 2];

        if self.is_dcc_short() && !force_long {
            bytes[0] = self.0 as u8;
            (bytes, 1)
        } else {
            NetworkEndian::write_u16(&mut bytes, self.0);
            bytes[0] |= 0xC0;
            (bytes, 2)
        }
    }
}

impl fmt::Display for LocoAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for LocoAddress {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<LocoAddress> for u16 {
    fn from(value: LocoAddress) -> Self {
        value.0
    }
}

/// A turnout or extended accessory address, `1 ..= 2047`.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AccessoryAddress(pub u16);

impl AccessoryAddress {
    pub const fn new(adr: u16) -> Self {
        Self(adr)
    }

    pub const fn raw(&self) -> u16 {
        self.0
    }

    pub const fn is_valid(&self) -> bool {
        self.0 >= 1 && self.0 <= TURNOUT_ADDR_MAX
    }

    /// Decoder number and output pair of an MM / DCC basic accessory.
    ///
    /// Four pairs share one stationary decoder.
    pub const fn decoder_and_port(&self) -> (u16, u8) {
        ((self.0 - 1) / 4 + 1, ((self.0 - 1) % 4) as u8)
    }
}

impl fmt::Display for AccessoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for AccessoryAddress {
    fn from(value: u16) -> Self {
        Self(value)
    }
}
