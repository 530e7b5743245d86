//! Programming-track engine.
//!
//! Direct-mode CV access on the isolated programming output: power up,
//! wait for a stable base current, clock the command and watch for the
//! decoder's acknowledge current pulse. Failed attempts retry through
//! a full power cycle.

use dcs_core::error::Error;
use dcs_core::telemetry::Telemetry;
use embedded_time::duration::Milliseconds;
use embedded_time::{Clock, Instant};

use crate::fmtcfg::FormatConfig;
use crate::mode::{ModeMachine, TrackMode};
use crate::packet::construct::cv;
use crate::queue::CommandQueue;
use crate::signal::SignalGenerator;

/// Acknowledge pulse: current rise over the base level.
const ACK_DELTA_MA: u16 = 60;
/// Minimum acknowledge pulse duration.
const ACK_MIN_MS: u32 = 2;
/// Base current must hold still within this tolerance.
const BASE_TOLERANCE_MA: u16 = 3;
/// Base current must be stable for this long.
const BASE_HOLD_MS: u32 = 50;
/// Give up settling the base current after this long.
const SETTLE_LIMIT_MS: u32 = 5_000;
/// Outer per-attempt deadline once the command is on the track.
const SEND_LIMIT_MS: u32 = 5_000;
/// How long to keep sampling for the acknowledge pulse after the
/// command finished clocking out.
const ACK_WAIT_MS: u32 = 50;
/// Short scheduling delay between steps.
const STEP_DELAY_MS: u32 = 5;
/// Full power cycles before the operation fails.
const MAX_ATTEMPTS: u8 = 3;

/// One direct-mode operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProgOp {
    WriteByte { cv: u16, value: u8 },
    VerifyByte { cv: u16, value: u8 },
    WriteBit { cv: u16, bit: u8, value: bool },
    VerifyBit { cv: u16, bit: u8, value: bool },
}

impl ProgOp {
    fn failure(&self) -> Error {
        match self {
            Self::WriteByte { .. } | Self::WriteBit { .. } => Error::CvWriteFailed,
            Self::VerifyByte { .. } | Self::VerifyBit { .. } => Error::CvCompareFailed,
        }
    }
}

enum Phase<C: Clock> {
    Idle,
    AwaitMode,
    BaseSettle {
        limit: Instant<C>,
        base_ma: u16,
        stable_since: Option<Instant<C>>,
    },
    Sending {
        deadline: Instant<C>,
        base_ma: u16,
        ack_since: Option<Instant<C>>,
        sent_at: Option<Instant<C>>,
    },
    PowerCycle,
    Restart {
        at: Instant<C>,
    },
}

// Every field is a plain tick value; the phase copies without
// demanding anything of the clock type.
impl<C: Clock> Copy for Phase<C> {}
impl<C: Clock> Clone for Phase<C> {
    fn clone(&self) -> Self {
        *self
    }
}

/// The per-operation state machine.
///
/// `poll` runs from the slow task; one operation owns the programming
/// output from `start` until the returned result.
pub struct ProgEngine<C: Clock> {
    phase: Phase<C>,
    op: Option<ProgOp>,
    attempts: u8,
    acked: bool,
    any_ack: bool,
}

impl<C: Clock> Default for ProgEngine<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> ProgEngine<C> {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            op: None,
            attempts: 0,
            acked: false,
            any_ack: false,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.op.is_some()
    }

    /// Begin a direct-mode operation.
    ///
    /// Returns `Err(Error::Interrupted)` while another operation runs.
    pub fn start(&mut self, op: ProgOp, mode: &mut ModeMachine<C>) -> Result<(), Error> {
        if self.is_busy() {
            return Err(Error::Interrupted);
        }

        self.op = Some(op);
        self.attempts = 0;
        self.acked = false;
        self.any_ack = false;
        self.phase = Phase::AwaitMode;
        mode.request(TrackMode::DccProg);
        Ok(())
    }

    fn after(now: Instant<C>, ms: u32) -> Instant<C> {
        now.checked_add(Milliseconds(ms)).unwrap_or(now)
    }

    fn passed(now: Instant<C>, at: Instant<C>) -> bool {
        now.checked_duration_since(&at).is_some()
    }

    fn enqueue_op(&self, queue: &mut CommandQueue, cfg: &FormatConfig) {
        let repeat = cfg.prog_repeat;
        let packet = match self.op {
            Some(ProgOp::WriteByte { cv: adr, value }) => cv::direct_write_byte(adr, value, repeat),
            Some(ProgOp::VerifyByte { cv: adr, value }) => {
                cv::direct_verify_byte(adr, value, repeat)
            }
            Some(ProgOp::WriteBit { cv: adr, bit, value }) => {
                cv::direct_write_bit(adr, bit, value, repeat)
            }
            Some(ProgOp::VerifyBit { cv: adr, bit, value }) => {
                cv::direct_verify_bit(adr, bit, value, repeat)
            }
            None => return,
        };
        queue.push_front(packet).ok();
    }

    fn finish(&mut self, result: Result<(), Error>) -> Option<Result<(), Error>> {
        self.op = None;
        self.phase = Phase::Idle;
        Some(result)
    }

    fn fail_or_retry(&mut self, mode: &mut ModeMachine<C>) -> Option<Result<(), Error>> {
        self.attempts += 1;
        if self.attempts >= MAX_ATTEMPTS {
            let err = match (&self.op, self.any_ack) {
                (Some(op), true) => op.failure(),
                (Some(_), false) => Error::NoDecoder,
                (None, _) => Error::Internal,
            };
            return self.finish(Err(err));
        }

        // Full power cycle between attempts.
        self.phase = Phase::PowerCycle;
        mode.request(TrackMode::Stop);
        None
    }

    /// Advance the operation. Returns the final result exactly once.
    pub fn poll(
        &mut self,
        now: Instant<C>,
        mode: &mut ModeMachine<C>,
        queue: &mut CommandQueue,
        signal: &SignalGenerator,
        telemetry: &Telemetry,
        cfg: &FormatConfig,
    ) -> Option<Result<(), Error>> {
        if self.op.is_none() {
            return None;
        }

        match self.phase {
            Phase::Idle => None,

            Phase::AwaitMode => {
                if mode.mode() == TrackMode::DccProg && !mode.is_busy() {
                    self.phase = Phase::BaseSettle {
                        limit: Self::after(now, SETTLE_LIMIT_MS),
                        base_ma: telemetry.prog_ma,
                        stable_since: None,
                    };
                } else if !mode.is_busy() && mode.mode() != TrackMode::DccProg {
                    mode.request(TrackMode::DccProg);
                }
                None
            }

            Phase::BaseSettle {
                limit,
                base_ma,
                stable_since,
            } => {
                if Self::passed(now, limit) {
                    return self.finish(Err(Error::UnstableBaseCurrent));
                }

                let ma = telemetry.prog_ma;
                if ma.abs_diff(base_ma) > BASE_TOLERANCE_MA {
                    self.phase = Phase::BaseSettle {
                        limit,
                        base_ma: ma,
                        stable_since: None,
                    };
                    return None;
                }

                let since = stable_since.unwrap_or(now);
                if Self::passed(now, Self::after(since, BASE_HOLD_MS)) {
                    self.acked = false;
                    self.enqueue_op(queue, cfg);
                    self.phase = Phase::Sending {
                        deadline: Self::after(now, SEND_LIMIT_MS),
                        base_ma: ma,
                        ack_since: None,
                        sent_at: None,
                    };
                } else {
                    self.phase = Phase::BaseSettle {
                        limit,
                        base_ma,
                        stable_since: Some(since),
                    };
                }
                None
            }

            Phase::Sending {
                deadline,
                base_ma,
                ack_since,
                sent_at,
            } => {
                let pulsing = telemetry.prog_ma >= base_ma + ACK_DELTA_MA;

                let ack_since = match (pulsing, ack_since) {
                    (true, None) => Some(now),
                    (true, Some(since)) => {
                        if Self::passed(now, Self::after(since, ACK_MIN_MS)) {
                            self.acked = true;
                            self.any_ack = true;
                        }
                        Some(since)
                    }
                    (false, _) => None,
                };

                let sent = queue.is_empty() && signal.is_drained();
                let sent_at = if sent { Some(sent_at.unwrap_or(now)) } else { None };

                if sent && self.acked {
                    return self.finish(Ok(()));
                }

                // Keep sampling one acknowledge window after the last
                // repeat left the track, then give up on this attempt.
                let ack_window_over = match sent_at {
                    Some(since) => Self::passed(now, Self::after(since, ACK_WAIT_MS)),
                    None => false,
                };
                if Self::passed(now, deadline) || ack_window_over {
                    if self.acked {
                        return self.finish(Ok(()));
                    }
                    return self.fail_or_retry(mode);
                }

                self.phase = Phase::Sending {
                    deadline,
                    base_ma,
                    ack_since,
                    sent_at,
                };
                None
            }

            Phase::PowerCycle => {
                if mode.mode() == TrackMode::Stop && !mode.is_busy() {
                    self.phase = Phase::Restart {
                        at: Self::after(now, STEP_DELAY_MS),
                    };
                    mode.request(TrackMode::DccProg);
                }
                None
            }

            Phase::Restart { at } => {
                if Self::passed(now, at) {
                    self.phase = Phase::AwaitMode;
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::phy::PowerStage;
    use embedded_time::rate::Fraction;

    #[derive(Debug, Clone, Copy)]
    struct TestClock;

    impl Clock for TestClock {
        type T = u64;
        const SCALING_FACTOR: Fraction = Fraction::new(1, 1000);

        fn try_now(&self) -> Result<Instant<Self>, embedded_time::clock::Error> {
            Ok(Instant::new(0))
        }
    }

    fn at(ms: u64) -> Instant<TestClock> {
        Instant::new(ms)
    }

    #[derive(Debug, Default)]
    struct TestPower {
        mv: u16,
    }

    impl PowerStage for TestPower {
        fn set_voltage_mv(&mut self, mv: u16) {
            self.mv = mv;
        }
        fn voltage_mv(&self) -> u16 {
            self.mv
        }
        fn output(&mut self, _on: bool) {}
        fn select_prog(&mut self, _prog: bool) {}
    }

    struct Rig {
        engine: ProgEngine<TestClock>,
        mode: ModeMachine<TestClock>,
        queue: CommandQueue,
        signal: SignalGenerator,
        power: TestPower,
        cfg: FormatConfig,
        telemetry: Telemetry,
        cmd_at: Option<u64>,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                engine: ProgEngine::new(),
                mode: ModeMachine::new(16_000),
                queue: CommandQueue::new(),
                signal: SignalGenerator::new(),
                power: TestPower::default(),
                cfg: FormatConfig::default(),
                telemetry: Telemetry::default(),
                cmd_at: None,
            }
        }

        /// Drive one millisecond tick; drains the queue like the
        /// encoder task would.
        fn tick(&mut self, ms: u64) -> Option<Result<(), Error>> {
            self.mode.poll(at(ms), &self.signal, &mut self.power);
            if self.queue.dequeue::<TestClock>(None).is_some() {
                self.cmd_at = Some(ms);
            }
            self.engine.poll(
                at(ms),
                &mut self.mode,
                &mut self.queue,
                &self.signal,
                &self.telemetry,
                &self.cfg,
            )
        }
    }

    #[test]
    fn test_write_acknowledged() {
        let mut rig = Rig::new();
        rig.telemetry.prog_ma = 12;
        rig.engine
            .start(ProgOp::WriteByte { cv: 1, value: 42 }, &mut rig.mode)
            .unwrap();

        let mut result = None;
        for ms in 0..20_000 {
            // The decoder answers the command with a 10 ms current
            // pulse shortly after it clocks out.
            rig.telemetry.prog_ma = match rig.cmd_at {
                Some(t) if ms >= t + 5 && ms < t + 15 => 12 + ACK_DELTA_MA + 5,
                _ => 12,
            };
            if let Some(r) = rig.tick(ms) {
                result = Some(r);
                break;
            }
        }

        assert_eq!(result, Some(Ok(())));
        assert!(!rig.engine.is_busy());
    }

    #[test]
    fn test_no_decoder_after_three_cycles() {
        let mut rig = Rig::new();
        rig.telemetry.prog_ma = 8;
        rig.engine
            .start(ProgOp::WriteByte { cv: 1, value: 42 }, &mut rig.mode)
            .unwrap();

        let mut result = None;
        for ms in 0..120_000 {
            if let Some(r) = rig.tick(ms) {
                result = Some(r);
                break;
            }
        }

        assert_eq!(result, Some(Err(Error::NoDecoder)));
    }

    #[test]
    fn test_unstable_base_current() {
        let mut rig = Rig::new();
        rig.engine
            .start(ProgOp::VerifyByte { cv: 8, value: 151 }, &mut rig.mode)
            .unwrap();

        let mut result = None;
        for ms in 0..60_000 {
            // Base current never settles.
            rig.telemetry.prog_ma = (ms % 50) as u16;
            if let Some(r) = rig.tick(ms) {
                result = Some(r);
                break;
            }
        }

        assert_eq!(result, Some(Err(Error::UnstableBaseCurrent)));
    }

    #[test]
    fn test_busy_rejects_second_op() {
        let mut rig = Rig::new();
        rig.engine
            .start(ProgOp::WriteByte { cv: 1, value: 1 }, &mut rig.mode)
            .unwrap();
        let err = rig
            .engine
            .start(ProgOp::WriteByte { cv: 2, value: 2 }, &mut rig.mode)
            .unwrap_err();
        assert_eq!(err, Error::Interrupted);
    }
}
