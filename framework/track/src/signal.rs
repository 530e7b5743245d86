//! The timer-driven signal generator.
//!
//! [`SignalGenerator::isr_step`] is the deterministic consumer of
//! encoded bit buffers: every invocation drives the output for the
//! returned number of microseconds and never allocates or blocks. The
//! encoder feeds buffers through an SPSC ring; in firmware the ring
//! ends live on different priorities, here both ends are methods.

use heapless::spsc::Queue;

use crate::config::{
    BIDI_ACK_SAMPLE_US, BITBUF_RING_DEPTH, CUTOUT_DELAY_US, CUTOUT_W1_US, CUTOUT_W2_US,
};
use crate::phy::TrackOutput;
use crate::wire::{BitBuffer, BufFormat, Readback, SubState};

/// Half period of an MM one bit on the slow (loco) timing.
const MM_SLOW_ONE_US: u16 = 182;
const MM_SLOW_ZERO_US: u16 = 26;
const MM_SLOW_BIT_US: u16 = 208;
/// Signal bits per Motorola block.
const MM_BLOCK_BITS: u16 = 18;

/// M3 half-bit duration.
const M3_HALF_US: u16 = 50;
/// Toggle pattern of the M3 sync flag, one entry per half bit.
const M3_FLAG: [bool; 10] = [
    true, false, true, true, false, true, false, true, true, false,
];

/// Idle poll period while no buffer is pending.
const IDLE_POLL_US: u16 = 100;

/// Transmission states of the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SigState {
    Idle,
    Sending,
    CutoutDelay,
    CutoutW1,
    CutoutW2,
    PostCutoutAck,
}

/// Side effect of one ISR step the surrounding firmware must act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Notify {
    #[default]
    None,
    /// Cutout open, RailCom UART on, window 1 running.
    CutoutOpenW1,
    /// Window 1 over, window 2 running.
    CutoutOpenW2,
    /// Cutout over, RailCom UART off.
    CutoutClose,
    /// Sample the BiDi-bus acknowledge line now.
    BidiAckSample,
    /// An M3 reply slot starts now; sample the current detector.
    M3ReplySlot,
    /// The current buffer finished all repeats.
    BufferDone,
}

/// One ISR step: hold the output for `delay_us`, then call again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub delay_us: u16,
    pub notify: Notify,
}

impl Step {
    const fn quiet(delay_us: u16) -> Self {
        Self {
            delay_us,
            notify: Notify::None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Scratch {
    Dcc {
        bit: u16,
        half: u8,
    },
    Mm {
        bit: u16,
        /// 0 first block, 1 second block of the double telegram.
        pass: u8,
        /// Which block chunk of the buffer is on the wire (27A pair).
        chunk: u16,
        phase: u8,
    },
    M3 {
        stage: M3Stage,
        idx: u16,
        level: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum M3Stage {
    FlagIn,
    Data,
    FlagOut,
    Reply,
}

/// The interrupt-side bit-stream consumer.
pub struct SignalGenerator {
    ring: Queue<BitBuffer, BITBUF_RING_DEPTH>,
    current: Option<BitBuffer>,
    scratch: Scratch,
    state: SigState,
    /// Last fully transmitted buffer, for read-back finalisation.
    finished: Option<BitBuffer>,
}

impl Default for SignalGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalGenerator {
    pub fn new() -> Self {
        Self {
            ring: Queue::new(),
            current: None,
            scratch: Scratch::Dcc { bit: 0, half: 0 },
            state: SigState::Idle,
            finished: None,
        }
    }

    /// Producer side: hand an encoded buffer to the generator.
    pub fn offer(&mut self, buf: BitBuffer) -> Result<(), BitBuffer> {
        self.ring.enqueue(buf)
    }

    /// Room left in the ring.
    pub fn free(&self) -> usize {
        self.ring.capacity() - self.ring.len()
    }

    /// Queue empty and nothing on the wire.
    pub fn is_drained(&self) -> bool {
        self.current.is_none() && self.ring.len() == 0
    }

    pub fn state(&self) -> SigState {
        self.state
    }

    /// Read-back context of the buffer currently on the wire.
    pub fn current_readback(&self) -> Option<&Readback> {
        self.current.as_ref().map(|b| &b.readback)
    }

    /// Shortcut the remaining repeats: a valid answer arrived.
    pub fn acknowledge(&mut self) {
        if let Some(buf) = &mut self.current {
            buf.ack = true;
        }
    }

    /// Mutable access for the read-back path (POM filter state).
    pub fn current_mut(&mut self) -> Option<&mut BitBuffer> {
        self.current.as_mut()
    }

    /// Take the last fully transmitted buffer.
    pub fn take_finished(&mut self) -> Option<BitBuffer> {
        self.finished.take()
    }

    fn fetch(&mut self) -> bool {
        match self.ring.dequeue() {
            Some(buf) => {
                self.scratch = match buf.format {
                    BufFormat::M3 => Scratch::M3 {
                        stage: M3Stage::FlagIn,
                        idx: 0,
                        level: false,
                    },
                    f if f.is_mm() => Scratch::Mm {
                        bit: 0,
                        pass: 0,
                        chunk: 0,
                        phase: 0,
                    },
                    _ => Scratch::Dcc { bit: 0, half: 0 },
                };
                self.current = Some(buf);
                self.state = SigState::Sending;
                true
            }
            None => false,
        }
    }

    fn rewind(&mut self) {
        self.scratch = match self.scratch {
            Scratch::Dcc { .. } => Scratch::Dcc { bit: 0, half: 0 },
            Scratch::Mm { .. } => Scratch::Mm {
                bit: 0,
                pass: 0,
                chunk: 0,
                phase: 0,
            },
            Scratch::M3 { .. } => Scratch::M3 {
                stage: M3Stage::FlagIn,
                idx: 0,
                level: false,
            },
        };
    }

    /// Close out one transmission; returns the step ending it.
    fn transmission_done(&mut self, out: &mut impl TrackOutput) -> Step {
        let buf = match &mut self.current {
            Some(buf) => buf,
            None => {
                self.state = SigState::Idle;
                return Step::quiet(IDLE_POLL_US);
            }
        };

        if !buf.ack && buf.repeat > 1 {
            buf.repeat -= 1;
            self.rewind();
            self.state = SigState::Sending;
            return self.emit(out);
        }

        self.finished = self.current.take();
        self.state = SigState::Idle;
        out.set_level(false);
        Step {
            delay_us: IDLE_POLL_US.min(20),
            notify: Notify::BufferDone,
        }
    }

    /// One timer interrupt.
    ///
    /// Bits of one buffer go out in strict order; a buffer's repeats
    /// complete before the next buffer starts.
    pub fn isr_step(&mut self, out: &mut impl TrackOutput) -> Step {
        match self.state {
            SigState::Idle => {
                if self.fetch() {
                    self.emit(out)
                } else {
                    out.set_level(false);
                    Step::quiet(IDLE_POLL_US)
                }
            }
            SigState::Sending => self.emit(out),
            SigState::CutoutDelay => {
                out.cutout(true);
                self.state = SigState::CutoutW1;
                Step {
                    delay_us: CUTOUT_W1_US,
                    notify: Notify::CutoutOpenW1,
                }
            }
            SigState::CutoutW1 => {
                self.state = SigState::CutoutW2;
                Step {
                    delay_us: CUTOUT_W2_US,
                    notify: Notify::CutoutOpenW2,
                }
            }
            SigState::CutoutW2 => {
                out.cutout(false);
                self.state = SigState::PostCutoutAck;
                Step {
                    delay_us: BIDI_ACK_SAMPLE_US,
                    notify: Notify::CutoutClose,
                }
            }
            SigState::PostCutoutAck => {
                let step = self.transmission_done(out);
                Step {
                    delay_us: step.delay_us,
                    notify: if step.notify == Notify::None {
                        Notify::BidiAckSample
                    } else {
                        step.notify
                    },
                }
            }
        }
    }

    fn emit(&mut self, out: &mut impl TrackOutput) -> Step {
        let Some(buf) = self.current.take() else {
            self.state = SigState::Idle;
            return Step::quiet(IDLE_POLL_US);
        };

        let step = match buf.format {
            BufFormat::M3 => self.emit_m3(&buf, out),
            f if f.is_mm() => self.emit_mm(&buf, out),
            _ => self.emit_dcc(&buf, out),
        };

        if self.current.is_none() {
            self.current = Some(buf);
        }

        match step {
            Some(step) => step,
            None => self.after_frame(out),
        }
    }

    /// The frame body finished; enter the cutout or close out.
    fn after_frame(&mut self, out: &mut impl TrackOutput) -> Step {
        let cutout = matches!(
            self.current.as_ref().map(|b| &b.sub),
            Some(SubState::Dcc(sub)) if sub.cutout
        );

        if cutout {
            self.state = SigState::CutoutDelay;
            Step::quiet(CUTOUT_DELAY_US)
        } else {
            self.transmission_done(out)
        }
    }

    fn emit_dcc(&mut self, buf: &BitBuffer, out: &mut impl TrackOutput) -> Option<Step> {
        let Scratch::Dcc { bit, half } = &mut self.scratch else {
            return None;
        };

        if *bit as usize >= buf.len() {
            return None;
        }

        let value = buf.bit(*bit as usize);
        let (one_us, zero_us) = match &buf.sub {
            SubState::Dcc(sub) => (sub.half_one_us, sub.half_zero_us),
            _ => (58, 100),
        };

        out.set_level(*half == 0);
        let delay = if value { one_us } else { zero_us };

        if *half == 0 {
            *half = 1;
        } else {
            *half = 0;
            *bit += 1;
        }

        Some(Step::quiet(delay))
    }

    fn emit_mm(&mut self, buf: &BitBuffer, out: &mut impl TrackOutput) -> Option<Step> {
        let Scratch::Mm {
            bit,
            pass,
            chunk,
            phase,
        } = &mut self.scratch
        else {
            return None;
        };

        let fast = buf.format == BufFormat::MmFast;
        let (pause_us, gap_us) = match &buf.sub {
            SubState::Mm(sub) => (sub.pause_us, sub.gap_us),
            _ => (1250, 1500),
        };

        let chunks = (buf.len() as u16 / MM_BLOCK_BITS).max(1);
        if *chunk >= chunks {
            return None;
        }

        // Phases 2 and 3 are the pause and gap fillers.
        match *phase {
            2 => {
                *phase = 0;
                *pass = 1;
                *bit = 0;
                out.set_level(false);
                return Some(Step::quiet(pause_us));
            }
            3 => {
                *phase = 0;
                *pass = 0;
                *bit = 0;
                *chunk += 1;
                out.set_level(false);
                return Some(Step::quiet(gap_us));
            }
            _ => {}
        }

        let index = (*chunk * MM_BLOCK_BITS + *bit) as usize;
        let value = buf.bit(index);

        let (mut high_us, mut bit_us) = if value {
            (MM_SLOW_ONE_US, MM_SLOW_BIT_US)
        } else {
            (MM_SLOW_ZERO_US, MM_SLOW_BIT_US)
        };
        if fast {
            high_us /= 2;
            bit_us /= 2;
        }

        if *phase == 0 {
            out.set_level(true);
            *phase = 1;
            Some(Step::quiet(high_us))
        } else {
            out.set_level(false);
            *bit += 1;
            if *bit >= MM_BLOCK_BITS {
                // Block over: queue pause (first pass) or gap (second).
                *phase = if *pass == 0 { 2 } else { 3 };
            } else {
                *phase = 0;
            }
            Some(Step::quiet(bit_us - high_us))
        }
    }

    fn emit_m3(&mut self, buf: &BitBuffer, out: &mut impl TrackOutput) -> Option<Step> {
        let Scratch::M3 { stage, idx, level } = &mut self.scratch else {
            return None;
        };

        let reply_slots = match &buf.sub {
            SubState::M3(sub) => sub.reply_slots,
            _ => 0,
        };

        match stage {
            M3Stage::FlagIn | M3Stage::FlagOut => {
                if M3_FLAG[*idx as usize] {
                    *level = !*level;
                    out.set_level(*level);
                }
                *idx += 1;
                if *idx as usize >= M3_FLAG.len() {
                    let leaving = *stage;
                    *idx = 0;
                    *stage = match leaving {
                        M3Stage::FlagIn => M3Stage::Data,
                        _ => M3Stage::Reply,
                    };
                    if leaving == M3Stage::FlagOut && reply_slots == 0 {
                        return None;
                    }
                }
                Some(Step::quiet(M3_HALF_US))
            }
            M3Stage::Data => {
                let bit_idx = (*idx / 2) as usize;
                if bit_idx >= buf.len() {
                    *idx = 0;
                    *stage = M3Stage::FlagOut;
                    return self.emit_m3_reborrow(buf, out);
                }

                let value = buf.bit(bit_idx);
                let first_half = *idx % 2 == 0;
                // Every bit starts with an edge; a one adds a mid-bit
                // edge.
                if first_half || value {
                    *level = !*level;
                    out.set_level(*level);
                }
                *idx += 1;
                Some(Step::quiet(M3_HALF_US))
            }
            M3Stage::Reply => {
                if *idx >= reply_slots as u16 {
                    return None;
                }
                *level = !*level;
                out.set_level(*level);
                *idx += 1;
                Some(Step {
                    delay_us: 2 * M3_HALF_US,
                    notify: Notify::M3ReplySlot,
                })
            }
        }
    }

    fn emit_m3_reborrow(&mut self, buf: &BitBuffer, out: &mut impl TrackOutput) -> Option<Step> {
        self.emit_m3(buf, out)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fmtcfg::FormatConfig;
    use crate::packet::construct;
    use crate::phy::testing::RecordingOutput;
    use crate::wire;
    use dcs_core::format::LocoFormat;
    use dcs_core::speed::Speed;

    fn encoded(step: u8) -> BitBuffer {
        let p = construct::loco::speed(3, LocoFormat::Dcc28, Speed::new(step, true), &[0; 4]);
        wire::encode(&p, &FormatConfig::default()).unwrap()
    }

    fn run_until_done(sgen: &mut SignalGenerator, out: &mut RecordingOutput, max: usize) -> usize {
        for i in 0..max {
            if sgen.isr_step(out).notify == Notify::BufferDone {
                return i;
            }
        }
        panic!("buffer never finished");
    }

    #[test]
    fn test_idle_without_buffers() {
        let mut sgen = SignalGenerator::new();
        let mut out = RecordingOutput::default();
        let step = sgen.isr_step(&mut out);
        assert_eq!(step.notify, Notify::None);
        assert!(sgen.is_drained());
    }

    #[test]
    fn test_dcc_half_periods() {
        let mut sgen = SignalGenerator::new();
        let mut out = RecordingOutput::default();

        let mut buf = encoded(5);
        buf.repeat = 1;
        let bits = buf.len();
        if let SubState::Dcc(sub) = &mut buf.sub {
            sub.cutout = false;
        }
        sgen.offer(buf).ok().unwrap();

        let mut durations = alloc::vec::Vec::new();
        for _ in 0..bits * 2 {
            durations.push(sgen.isr_step(&mut out).delay_us);
        }

        // Preamble: sixteen one bits, two equal 58 us halves each.
        assert!(durations[..32].iter().all(|d| *d == 58));
        // First start bit: two 100 us halves.
        assert_eq!(&durations[32..34], &[100, 100]);
        // Levels alternate high/low per bit.
        assert_eq!(&out.levels[..4], &[true, false, true, false]);
    }

    #[test]
    fn test_repeats_before_next_buffer() {
        let mut sgen = SignalGenerator::new();
        let mut out = RecordingOutput::default();

        let mut first = encoded(5);
        first.repeat = 3;
        if let SubState::Dcc(sub) = &mut first.sub {
            sub.cutout = false;
        }
        let bits = first.len();
        sgen.offer(first).ok().unwrap();

        let mut second = encoded(9);
        second.repeat = 1;
        sgen.offer(second).ok().unwrap();

        // Three transmissions of the first buffer must complete first.
        let steps = run_until_done(&mut sgen, &mut out, 10_000);
        assert!(steps >= bits * 2 * 3);
        assert!(sgen.current_readback().is_none());

        // The next fetch pulls the second buffer.
        sgen.isr_step(&mut out);
        assert!(sgen.current_readback().is_some());
    }

    #[test]
    fn test_ack_shortcuts_repeats() {
        let mut sgen = SignalGenerator::new();
        let mut out = RecordingOutput::default();

        let mut buf = encoded(5);
        buf.repeat = 50;
        if let SubState::Dcc(sub) = &mut buf.sub {
            sub.cutout = false;
        }
        let bits = buf.len();
        sgen.offer(buf).ok().unwrap();

        sgen.isr_step(&mut out);
        sgen.acknowledge();

        let steps = run_until_done(&mut sgen, &mut out, 10_000);
        // Far fewer steps than 50 transmissions would need.
        assert!(steps < bits * 2 * 2);
        assert!(sgen.take_finished().is_some());
    }

    #[test]
    fn test_cutout_sequence() {
        let mut sgen = SignalGenerator::new();
        let mut out = RecordingOutput::default();

        let mut buf = encoded(5);
        buf.repeat = 1;
        sgen.offer(buf).ok().unwrap();

        let mut notifies = alloc::vec::Vec::new();
        for _ in 0..10_000 {
            let step = sgen.isr_step(&mut out);
            if step.notify != Notify::None {
                notifies.push(step.notify);
            }
            if step.notify == Notify::BufferDone || step.notify == Notify::BidiAckSample {
                break;
            }
        }

        assert_eq!(
            notifies,
            [
                Notify::CutoutOpenW1,
                Notify::CutoutOpenW2,
                Notify::CutoutClose,
                Notify::BufferDone,
            ]
        );
        assert_eq!(out.cutouts, 1);
    }

    #[test]
    fn test_mm_block_pause_block_gap() {
        let mut sgen = SignalGenerator::new();
        let mut out = RecordingOutput::default();

        let p = construct::loco::speed(80, LocoFormat::Mm2_14, Speed::new(7, true), &[0; 4]);
        let mut buf = wire::encode(&p, &FormatConfig::default()).unwrap();
        buf.repeat = 1;
        sgen.offer(buf).ok().unwrap();

        let mut durations = alloc::vec::Vec::new();
        for _ in 0..10_000 {
            let step = sgen.isr_step(&mut out);
            durations.push(step.delay_us);
            if step.notify == Notify::BufferDone {
                break;
            }
        }

        // 18 bits, two phases each, then the 1250 us pause, the block
        // again, and the 1500 us gap.
        let pause_pos = durations.iter().position(|d| *d == 1250).unwrap();
        assert_eq!(pause_pos, 36);
        let gap_pos = durations.iter().position(|d| *d == 1500).unwrap();
        assert_eq!(gap_pos, 36 + 36 + 1);

        // Each bit pairs to the 208 us period.
        for pair in durations[..36].chunks(2) {
            assert_eq!(pair[0] + pair[1], 208);
        }
    }

    #[test]
    fn test_m3_reply_slots_notified() {
        let mut sgen = SignalGenerator::new();
        let mut out = RecordingOutput::default();

        let p = construct::m3::ping(9);
        let mut buf = wire::encode(&p, &FormatConfig::default()).unwrap();
        buf.repeat = 1;
        sgen.offer(buf).ok().unwrap();

        let mut slots = 0;
        for _ in 0..10_000 {
            let step = sgen.isr_step(&mut out);
            if step.notify == Notify::M3ReplySlot {
                slots += 1;
            }
            if step.notify == Notify::BufferDone {
                break;
            }
        }
        assert_eq!(slots, 2);
    }
}
