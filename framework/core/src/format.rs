use bitflags::bitflags;
use num_enum::{FromPrimitive, IntoPrimitive};

use crate::address::{DCC_ADDR_MAX, M3_ADDR_MAX, MM_ADDR_MAX};

/// Track format of a mobile decoder.
///
/// The numeric values are the persisted `fmt` codes of the decoder
/// database and must stay stable across firmware versions.
#[derive(FromPrimitive, IntoPrimitive, Debug, Clone, PartialEq, Eq, Copy)]
#[repr(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LocoFormat {
    /// Motorola I, 14 speed steps, direction-change pulse.
    Mm1_14 = 0,
    /// Motorola II, 14 speed steps, F0 in the control trit.
    Mm2_14 = 1,
    /// Motorola II, 27 steps through alternating full-step telegrams.
    Mm2_27a = 2,
    /// Motorola II, 27 steps through the inverted half-step bit.
    Mm2_27b = 3,
    Dcc14 = 4,
    #[default]
    Dcc28 = 5,
    Dcc126 = 6,
    /// DCC with speed/direction/function combined instruction.
    DccSdf = 7,
    M3_126 = 8,
}

impl LocoFormat {
    /// Number of drive steps the format can express on the wire.
    pub const fn speed_steps(&self) -> u8 {
        match self {
            Self::Mm1_14 | Self::Mm2_14 | Self::Dcc14 => 14,
            Self::Mm2_27a | Self::Mm2_27b => 27,
            Self::Dcc28 => 28,
            Self::Dcc126 | Self::DccSdf | Self::M3_126 => 126,
        }
    }

    /// Highest address the format can carry.
    pub const fn max_addr(&self) -> u16 {
        match self {
            Self::Mm1_14 | Self::Mm2_14 | Self::Mm2_27a | Self::Mm2_27b => MM_ADDR_MAX,
            Self::Dcc14 | Self::Dcc28 | Self::Dcc126 | Self::DccSdf => DCC_ADDR_MAX,
            Self::M3_126 => M3_ADDR_MAX,
        }
    }

    /// Highest function number the format can switch.
    pub const fn max_func(&self) -> u8 {
        match self {
            Self::Mm1_14 | Self::Mm2_14 | Self::Mm2_27a | Self::Mm2_27b => 4,
            Self::Dcc14 | Self::Dcc28 | Self::Dcc126 | Self::DccSdf => 31,
            Self::M3_126 => 127,
        }
    }

    pub const fn is_mm(&self) -> bool {
        matches!(
            self,
            Self::Mm1_14 | Self::Mm2_14 | Self::Mm2_27a | Self::Mm2_27b
        )
    }

    pub const fn is_dcc(&self) -> bool {
        matches!(self, Self::Dcc14 | Self::Dcc28 | Self::Dcc126 | Self::DccSdf)
    }

    pub const fn is_m3(&self) -> bool {
        matches!(self, Self::M3_126)
    }
}

/// Format of a stationary (turnout) decoder.
#[derive(FromPrimitive, IntoPrimitive, Debug, Clone, PartialEq, Eq, Copy)]
#[repr(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TurnoutFormat {
    Mm = 0,
    #[default]
    Dcc = 1,
    /// Switched through a mapped BiDiB node instead of the track output.
    BiDiB = 2,
}

bitflags! {
    /// Per-output enables of the track-signal generator.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FormatFlags: u8 {
        /// Emit the RailCom cutout after DCC packets.
        const RAILCOM = 0b0000_0001;
        /// Interleave DCC-A logon traffic.
        const DCCA = 0b0000_0010;
        /// Send accessory NOP packets for stationary RailCom detection.
        const ACC_NOP = 0b0000_0100;
        /// Emit M3 beacon and schedule M3 packets.
        const M3 = 0b0000_1000;
        /// Address locos 1..=127 with the long DCC address form.
        const DCC_LONG_PREFERRED = 0b0001_0000;
    }
}

bitflags! {
    /// System-wide behaviour switches persisted in `config.ini`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SysFlags: u16 {
        /// Use the long historical inter-packet pause for MM.
        const LONG_MM_PAUSE = 0b0000_0000_0000_0001;
        /// Suppress magnet (accessory) packets on the main output.
        const NO_MAGNET_ON_MAIN = 0b0000_0000_0000_0010;
        /// Suppress magnet packets on the CDE booster output.
        const NO_MAGNET_ON_CDE = 0b0000_0000_0000_0100;
        /// Suppress magnet packets on the Maerklin booster output.
        const NO_MAGNET_ON_MKLN = 0b0000_0000_0000_1000;
        const RGB_ENTERTAINMENT = 0b0000_0000_0001_0000;
        /// Accessory addresses are logical (offset by one module).
        const ACC_LOGICAL = 0b0000_0000_0010_0000;
        const RGB_DIM = 0b0000_0000_0100_0000;
        /// Power up into Go instead of Stop.
        const START_STATE_GO = 0b0000_0000_1000_0000;
        /// A BiDiB booster short switches the whole layout off.
        const BIDIB_SHORT_GLOBAL = 0b0000_0001_0000_0000;
        /// Stop/Go keys on BiDiB boosters are honoured.
        const BIDIB_STOPGO_KEYS = 0b0000_0010_0000_0000;
    }
}
