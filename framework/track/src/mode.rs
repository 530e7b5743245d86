//! Global track mode and the power-stage interlock.
//!
//! Mode changes drain the signal generator, ramp the power stage and
//! settle the relay before the new mode drives packets again.

use embedded_time::duration::Milliseconds;
use embedded_time::{Clock, Instant};
use num_enum::{FromPrimitive, IntoPrimitive};

use crate::phy::PowerStage;
use crate::signal::SignalGenerator;

/// Voltage ramp step.
const RAMP_STEP_MV: u16 = 100;
/// Time between ramp steps.
const RAMP_STEP_MS: u32 = 5;
/// Discharge wait between switching the output off and on again.
const DISCHARGE_MS: u32 = 1000;
/// Relay settle time after switching main/programming track.
const RELAY_SETTLE_MS: u32 = 50;

/// The global operating mode of the track output.
#[derive(FromPrimitive, IntoPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TrackMode {
    #[default]
    Stop = 0,
    Go = 1,
    /// Powered, but every loco held at speed zero.
    Halt = 2,
    DccProg = 3,
    TamsProg = 4,
    TestDrive = 5,
    OverTemp = 6,
    Short = 7,
    PowerFail = 8,
}

impl TrackMode {
    /// Whether an output carries power in this mode.
    pub const fn is_powered(&self) -> bool {
        matches!(
            self,
            Self::Go | Self::Halt | Self::DccProg | Self::TamsProg | Self::TestDrive
        )
    }

    /// Whether the programming track relay is switched in.
    pub const fn is_prog(&self) -> bool {
        matches!(self, Self::DccProg | Self::TamsProg)
    }
}

enum Phase<C: Clock> {
    Settled,
    /// Wait for the signal generator to run dry.
    Drain,
    RampDown {
        at_mv: u16,
        next: Instant<C>,
    },
    Discharge {
        until: Instant<C>,
    },
    RelaySettle {
        until: Instant<C>,
    },
    RampUp {
        at_mv: u16,
        next: Instant<C>,
    },
}

// Instants are plain tick values; the phases copy freely without
// demanding anything of the clock type.
impl<C: Clock> Copy for Phase<C> {}
impl<C: Clock> Clone for Phase<C> {
    fn clone(&self) -> Self {
        *self
    }
}

/// The mode machine owning the power stage.
pub struct ModeMachine<C: Clock> {
    mode: TrackMode,
    target: TrackMode,
    phase: Phase<C>,
    /// Configured drive voltage.
    track_mv: u16,
    /// The output was powered before the running transition.
    was_powered: bool,
}

impl<C: Clock> ModeMachine<C> {
    pub fn new(track_mv: u16) -> Self {
        Self {
            mode: TrackMode::Stop,
            target: TrackMode::Stop,
            phase: Phase::Settled,
            track_mv,
            was_powered: false,
        }
    }

    pub fn mode(&self) -> TrackMode {
        self.mode
    }

    /// A transition is still in flight.
    pub fn is_busy(&self) -> bool {
        !matches!(self.phase, Phase::Settled)
    }

    pub fn set_track_voltage(&mut self, mv: u16) {
        self.track_mv = mv;
    }

    /// Request a mode change; the transition runs through `poll`.
    pub fn request(&mut self, target: TrackMode) {
        if target == self.mode && !self.is_busy() {
            return;
        }
        self.target = target;
        self.was_powered = self.mode.is_powered();
        self.phase = Phase::Drain;
    }

    fn after(now: Instant<C>, ms: u32) -> Instant<C> {
        now.checked_add(Milliseconds(ms)).unwrap_or(now)
    }

    /// Advance the transition. Returns the newly settled mode when a
    /// transition completes this call.
    pub fn poll(
        &mut self,
        now: Instant<C>,
        signal: &SignalGenerator,
        power: &mut impl PowerStage,
    ) -> Option<TrackMode> {
        loop {
            match self.phase {
                Phase::Settled => return None,

                Phase::Drain => {
                    if !signal.is_drained() {
                        return None;
                    }
                    if self.was_powered {
                        self.phase = Phase::RampDown {
                            at_mv: power.voltage_mv(),
                            next: now,
                        };
                    } else {
                        self.phase = Phase::RelaySettle {
                            until: Self::after(now, RELAY_SETTLE_MS),
                        };
                        power.select_prog(self.target.is_prog());
                    }
                }

                Phase::RampDown { at_mv, next } => {
                    if now.checked_duration_since(&next).is_none() {
                        return None;
                    }
                    let mv = at_mv.saturating_sub(RAMP_STEP_MV);
                    power.set_voltage_mv(mv);
                    if mv == 0 {
                        power.output(false);
                        self.phase = Phase::Discharge {
                            until: Self::after(now, DISCHARGE_MS),
                        };
                    } else {
                        self.phase = Phase::RampDown {
                            at_mv: mv,
                            next: Self::after(now, RAMP_STEP_MS),
                        };
                    }
                }

                Phase::Discharge { until } => {
                    if now.checked_duration_since(&until).is_none() {
                        return None;
                    }
                    power.select_prog(self.target.is_prog());
                    self.phase = Phase::RelaySettle {
                        until: Self::after(now, RELAY_SETTLE_MS),
                    };
                }

                Phase::RelaySettle { until } => {
                    if now.checked_duration_since(&until).is_none() {
                        return None;
                    }
                    if self.target.is_powered() {
                        power.output(true);
                        self.phase = Phase::RampUp {
                            at_mv: 0,
                            next: now,
                        };
                    } else {
                        power.output(false);
                        return self.settle();
                    }
                }

                Phase::RampUp { at_mv, next } => {
                    if now.checked_duration_since(&next).is_none() {
                        return None;
                    }
                    let mv = (at_mv + RAMP_STEP_MV).min(self.track_mv);
                    power.set_voltage_mv(mv);
                    if mv >= self.track_mv {
                        return self.settle();
                    }
                    self.phase = Phase::RampUp {
                        at_mv: mv,
                        next: Self::after(now, RAMP_STEP_MS),
                    };
                }
            }
        }
    }

    fn settle(&mut self) -> Option<TrackMode> {
        self.mode = self.target;
        self.phase = Phase::Settled;
        sig_debug!("track mode settled: {}", self.mode as u8);
        Some(self.mode)
    }
}
