use dcs_core::format::FormatFlags;

/// Wire timings and repeat budgets of the signal generator.
///
/// One instance is shared by every encoder call; equal configs yield
/// byte-identical bit streams for equal packets.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FormatConfig {
    pub flags: FormatFlags,

    /// Preamble one-bits on the main track. At least 14 when RailCom
    /// is enabled.
    pub dcc_preamble: u8,
    /// Preamble one-bits in service mode, at least 20.
    pub dcc_prog_preamble: u8,
    /// Trailing one-bits after the packet end bit.
    pub dcc_tail: u8,
    /// Half period of a DCC one bit in microseconds.
    pub dcc_half_one_us: u16,
    /// Half period of a DCC zero bit in microseconds.
    pub dcc_half_zero_us: u16,

    /// Pause between the two blocks of a slow MM packet.
    pub mm_pause_slow_us: u16,
    /// Pause between the two blocks of a fast MM packet.
    pub mm_pause_fast_us: u16,
    /// Short inter-packet gap after an MM double block.
    pub mm_gap_short_us: u16,
    /// Historical long inter-packet gap.
    pub mm_gap_long_us: u16,
    /// Use the historical long gap instead of the short one.
    pub mm_long_pause: bool,

    /// Transmissions of an explicit loco command.
    pub loco_repeat: u8,
    /// Transmissions of an accessory command.
    pub acc_repeat: u8,
    /// Transmissions of a programming-on-main command.
    pub pom_repeat: u8,
    /// Transmissions of a service-mode command.
    pub prog_repeat: u8,

    /// Idle minutes before a live loco is purged from the refresh list.
    pub purge_minutes: u8,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            flags: FormatFlags::RAILCOM | FormatFlags::DCCA,
            dcc_preamble: 16,
            dcc_prog_preamble: 22,
            dcc_tail: 1,
            dcc_half_one_us: 58,
            dcc_half_zero_us: 100,
            mm_pause_slow_us: 1250,
            mm_pause_fast_us: 625,
            mm_gap_short_us: 1500,
            mm_gap_long_us: 4025,
            mm_long_pause: false,
            loco_repeat: 2,
            acc_repeat: 2,
            pom_repeat: 5,
            prog_repeat: 10,
            purge_minutes: 10,
        }
    }
}

impl FormatConfig {
    /// Preamble length for one transmission class.
    pub fn preamble(&self, service_mode: bool) -> u8 {
        if service_mode {
            self.dcc_prog_preamble.max(20)
        } else if self.flags.contains(FormatFlags::RAILCOM) {
            self.dcc_preamble.max(14)
        } else {
            self.dcc_preamble
        }
    }

    /// Inter-packet gap after an MM double block.
    pub fn mm_gap(&self) -> u16 {
        if self.mm_long_pause {
            self.mm_gap_long_us
        } else {
            self.mm_gap_short_us
        }
    }
}
