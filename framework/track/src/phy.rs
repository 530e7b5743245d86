//! Driver seams towards the power hardware.
//!
//! The signal generator and the mode machine talk to the booster
//! through these traits; the firmware provides implementations on top
//! of its pins and ADCs.

use embedded_hal::digital::OutputPin;

/// The track output bridge.
///
/// Implementations must be callable from interrupt context: no
/// blocking, no allocation.
pub trait TrackOutput {
    /// Drive the bridge to one polarity.
    fn set_level(&mut self, high: bool);

    /// Short the output for the RailCom cutout window.
    fn cutout(&mut self, on: bool);
}

/// The RailCom receiver UART, enabled only inside cutouts.
pub trait RailComUart {
    fn enable(&mut self, on: bool);

    /// One received byte, if any arrived.
    fn read(&mut self) -> Option<u8>;
}

/// The adjustable power stage feeding the outputs.
pub trait PowerStage {
    fn set_voltage_mv(&mut self, mv: u16);
    fn voltage_mv(&self) -> u16;
    fn output(&mut self, on: bool);
    /// Switch the relay between main and programming track.
    fn select_prog(&mut self, prog: bool);
}

/// Track output over a pair of bridge pins.
pub struct PinTrackOutput<H, L> {
    high_side: H,
    low_side: L,
}

impl<H: OutputPin, L: OutputPin> PinTrackOutput<H, L> {
    pub fn new(high_side: H, low_side: L) -> Self {
        Self { high_side, low_side }
    }
}

impl<H: OutputPin, L: OutputPin> TrackOutput for PinTrackOutput<H, L> {
    fn set_level(&mut self, high: bool) {
        if high {
            self.low_side.set_low().ok();
            self.high_side.set_high().ok();
        } else {
            self.high_side.set_low().ok();
            self.low_side.set_high().ok();
        }
    }

    fn cutout(&mut self, on: bool) {
        if on {
            self.high_side.set_low().ok();
            self.low_side.set_low().ok();
        }
    }
}
