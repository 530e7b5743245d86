//! RailCom cutout receiver.
//!
//! Raw UART bytes arrive during the two cutout windows; each byte is
//! one 4-of-8 symbol carrying six payload bits or a control code. The
//! receiver reassembles the per-window datagrams and hands decoder
//! messages to the reply router.

use dcs_core::message::{CvAddress, DecoderMessage, ReplyKind};
use embedded_time::Clock;
use heapless::Vec;

use crate::packet::ReadbackKind;
use crate::router::ReplyRouter;
use crate::wire::{BitBuffer, SubState};

/// The 64 data codewords of the 8-to-6 code, indexed by data value.
const ENCODE: [u8; 64] = [
    0xAC, 0xAA, 0xA9, 0xA5, 0xA3, 0xA6, 0x9C, 0x9A, 0x99, 0x95, 0x93, 0x96, 0x8E, 0x8D, 0x8B,
    0xB1, 0xB2, 0xB4, 0xB8, 0x74, 0x72, 0x6C, 0x6A, 0x69, 0x65, 0x63, 0x66, 0x5C, 0x5A, 0x59,
    0x55, 0x53, 0x56, 0x4E, 0x4D, 0x4B, 0x47, 0x71, 0xE8, 0xE4, 0xE2, 0xD1, 0xC9, 0xC5, 0xD8,
    0xD4, 0xD2, 0xCA, 0xC6, 0xCC, 0x78, 0x17, 0x1B, 0x1D, 0x1E, 0x2E, 0x36, 0x3A, 0x27, 0x2B,
    0x2D, 0x35, 0x39, 0x33,
];

const SYM_ACK1: u8 = 0x40;
const SYM_ACK2: u8 = 0x41;
const SYM_NACK: u8 = 0x42;
const SYM_RSVD: u8 = 0x43;
const SYM_INVALID: u8 = 0xFF;

/// 256-entry decode table: data value, control code or invalid.
static DECODE: [u8; 256] = build_decode();

const fn build_decode() -> [u8; 256] {
    let mut table = [SYM_INVALID; 256];

    let mut value = 0;
    while value < 64 {
        table[ENCODE[value] as usize] = value as u8;
        value += 1;
    }

    table[0x0F] = SYM_ACK1;
    table[0xF0] = SYM_ACK2;
    table[0xE1] = SYM_NACK;
    // The three remaining 4-of-8 codewords are reserved.
    table[0x3C] = SYM_RSVD;
    table[0x87] = SYM_RSVD;
    table[0xC3] = SYM_RSVD;

    table
}

/// One decoded cutout symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Symbol {
    Data(u8),
    Ack1,
    Ack2,
    Nack,
    Reserved,
    Invalid,
}

pub fn decode_symbol(raw: u8) -> Symbol {
    match DECODE[raw as usize] {
        v if v < 64 => Symbol::Data(v),
        SYM_ACK1 => Symbol::Ack1,
        SYM_ACK2 => Symbol::Ack2,
        SYM_NACK => Symbol::Nack,
        SYM_RSVD => Symbol::Reserved,
        _ => Symbol::Invalid,
    }
}

/// Total datagram bit lengths of the window-2 identifiers.
const ID_LEN_BITS: [u8; 16] = [12, 12, 12, 18, 24, 18, 12, 18, 36, 36, 36, 36, 24, 36, 12, 36];

/// Identifiers whose answers combine all eight raw cutout symbols.
const fn id_combines(id: u8) -> bool {
    id == 13 || id == 15
}

fn id_kind(id: u8) -> ReplyKind {
    match id {
        0 => ReplyKind::Pom,
        1 => ReplyKind::AdrLow,
        2 => ReplyKind::AdrHigh,
        3 => ReplyKind::Ext,
        4 => ReplyKind::Stat1,
        5 => ReplyKind::Time,
        6 => ReplyKind::Error,
        7 => ReplyKind::Dyn,
        8 => ReplyKind::Xpom0,
        9 => ReplyKind::Xpom1,
        10 => ReplyKind::Xpom2,
        11 => ReplyKind::Xpom3,
        12 => ReplyKind::DccaState,
        13 => ReplyKind::DccaBlock,
        14 => ReplyKind::Srq,
        _ => ReplyKind::DccaShortInfo,
    }
}

/// The cutout window a byte arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Window {
    W1,
    W2,
}

/// Per-cutout receiver state.
#[derive(Default)]
pub struct RailComReceiver {
    w1: Vec<u8, 2>,
    w2: Vec<u8, 6>,
}

impl RailComReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw UART byte from the open cutout window.
    pub fn byte(&mut self, window: Window, raw: u8) {
        let dropped = match window {
            Window::W1 => self.w1.push(raw).is_err(),
            Window::W2 => self.w2.push(raw).is_err(),
        };
        if dropped {
            sig_trace!("railcom: window overflow, byte {:02x} dropped", raw);
        }
    }

    fn base_msg(buf: &BitBuffer, kind: ReplyKind) -> DecoderMessage {
        let rb = &buf.readback;
        let mut msg = DecoderMessage::new(rb.dectype, rb.adr, kind);
        msg.cv = rb.cv;
        msg.param = rb.param;
        msg
    }

    /// Combine all eight raw symbols into the six-byte payload form.
    fn combined(&self) -> Option<[u8; 6]> {
        if self.w1.len() + self.w2.len() != 8 {
            return None;
        }

        let mut bits = 0u64;
        for &raw in self.w1.iter().chain(self.w2.iter()) {
            match decode_symbol(raw) {
                Symbol::Data(v) => bits = (bits << 6) | v as u64,
                _ => return None,
            }
        }

        let mut out = [0u8; 6];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = (bits >> (40 - 8 * i)) as u8;
        }
        Some(out)
    }

    fn parse_w1(&self, buf: &BitBuffer, out: &mut Vec<DecoderMessage, 4>) {
        if self.w1.len() < 2 {
            return;
        }
        let (a, b) = match (decode_symbol(self.w1[0]), decode_symbol(self.w1[1])) {
            (Symbol::Data(a), Symbol::Data(b)) => (a, b),
            _ => return,
        };

        let datagram = ((a as u16) << 6) | b as u16;
        let id = (datagram >> 8) as u8;
        let payload = datagram as u8;

        let kind = match id {
            1 => ReplyKind::AdrLow,
            2 => ReplyKind::AdrHigh,
            _ => return,
        };

        let mut msg = Self::base_msg(buf, kind);
        msg.param = payload as u32;
        out.push(msg.with_payload(&[payload])).ok();
    }

    fn parse_w2(&self, buf: &mut BitBuffer, out: &mut Vec<DecoderMessage, 4>) {
        let mut symbols: Vec<u8, 6> = Vec::new();
        let mut acked = false;

        for &raw in self.w2.iter() {
            match decode_symbol(raw) {
                Symbol::Data(v) => symbols.push(v).unwrap_or_default(),
                Symbol::Ack1 | Symbol::Ack2 => acked = true,
                // Anything else ends the window.
                _ => break,
            }
        }

        if acked {
            buf.ack = true;
            if buf.readback.kind == ReadbackKind::DccaAck {
                out.push(Self::base_msg(buf, ReplyKind::Ack)).ok();
            }
        }

        // Greedy datagram walk.
        let mut at = 0usize;
        while at < symbols.len() {
            let id = (symbols[at] >> 2) & 0x0F;
            let total_bits = ID_LEN_BITS[id as usize] as usize;
            let count = total_bits / 6;
            if at + count > symbols.len() {
                break;
            }

            let mut bits = 0u64;
            for &s in &symbols[at..at + count] {
                bits = (bits << 6) | s as u64;
            }
            // Strip the identifier, keep the payload bits.
            let payload_bits = total_bits - 4;
            let payload_bytes = payload_bits.div_ceil(8);
            let payload = bits << (64 - payload_bits) >> (64 - payload_bits);

            let mut data: Vec<u8, 4> = Vec::new();
            for i in (0..payload_bytes).rev() {
                data.push((payload >> (8 * i)) as u8).ok();
            }

            self.emit_w2(buf, id, &data, payload as u32, out);
            at += count;
        }
    }

    fn emit_w2(
        &self,
        buf: &mut BitBuffer,
        id: u8,
        data: &[u8],
        value: u32,
        out: &mut Vec<DecoderMessage, 4>,
    ) {
        let kind = id_kind(id);

        // The POM write filter: swallow echoes of the old value until
        // the target value shows up.
        if buf.readback.kind == ReadbackKind::PomWriteVerify && kind == ReplyKind::Pom {
            if let SubState::Dcc(sub) = &mut buf.sub {
                let answer = value as u8;
                match sub.expected {
                    Some(expected) if expected == answer => {
                        sub.value_seen = true;
                        buf.ack = true;
                    }
                    _ => {
                        sub.last_value = Some(answer);
                        return;
                    }
                }
            }
        } else if buf.readback.kind == ReadbackKind::Pom && kind == ReplyKind::Pom {
            buf.ack = true;
        }

        let mut msg = Self::base_msg(buf, kind);
        msg.param = value;
        out.push(msg.with_payload(data)).ok();
    }

    /// The cutout closed: decode everything collected and route it.
    pub fn window_closed<C: Clock>(
        &mut self,
        buf: &mut BitBuffer,
        router: &mut ReplyRouter<'_, C>,
    ) {
        let mut out: Vec<DecoderMessage, 4> = Vec::new();

        let combine = matches!(
            buf.readback.kind,
            ReadbackKind::DccaShortInfo | ReadbackKind::DccaData | ReadbackKind::DccaId
        ) || self
            .w2
            .first()
            .map(|&raw| match decode_symbol(raw) {
                Symbol::Data(v) => id_combines((v >> 2) & 0x0F),
                _ => false,
            })
            .unwrap_or(false);

        if combine {
            if let Some(payload) = self.combined() {
                let kind = match buf.readback.kind {
                    ReadbackKind::DccaShortInfo => ReplyKind::DccaShortInfo,
                    ReadbackKind::DccaId => ReplyKind::DccaUnique,
                    _ => ReplyKind::DccaBlock,
                };
                buf.ack = true;
                out.push(Self::base_msg(buf, kind).with_payload(&payload)).ok();
            } else if !self.w1.is_empty() || !self.w2.is_empty() {
                // Overlapping answers of several decoders mangle the
                // symbol stream: that is a collision.
                out.push(Self::base_msg(buf, ReplyKind::Collision)).ok();
            }
        } else {
            self.parse_w1(buf, &mut out);
            self.parse_w2(buf, &mut out);
        }

        let hook = buf.readback.hook;
        for msg in out {
            router.deliver(msg, hook);
        }

        self.w1.clear();
        self.w2.clear();
    }

    /// The buffer ran out of repeats: settle a pending POM filter.
    ///
    /// Delivers the last non-matching answer of a write verify, or a
    /// timeout when nothing usable arrived at all.
    pub fn finalize<C: Clock>(&mut self, buf: &BitBuffer, router: &mut ReplyRouter<'_, C>) {
        match buf.readback.kind {
            ReadbackKind::PomWriteVerify => {
                if let SubState::Dcc(sub) = &buf.sub {
                    if sub.value_seen {
                        return;
                    }
                    let msg = match sub.last_value {
                        Some(last) => {
                            let mut msg = Self::base_msg(buf, ReplyKind::Pom);
                            msg.param = last as u32;
                            msg.with_payload(&[last])
                        }
                        None => Self::base_msg(buf, ReplyKind::Timeout),
                    };
                    router.deliver(msg, buf.readback.hook);
                }
            }
            ReadbackKind::Pom | ReadbackKind::Xpom => {
                if !buf.ack {
                    router.deliver(Self::base_msg(buf, ReplyKind::Timeout), buf.readback.hook);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fmtcfg::FormatConfig;
    use crate::packet::construct;
    use crate::router::{Listener, ListenerAction, ReplyFilter};
    use crate::wire;
    use core::sync::atomic::{AtomicU32, Ordering};
    use dcs_core::message::DecoderType;
    use embedded_time::rate::Fraction;
    use embedded_time::Instant;

    #[derive(Debug, Clone, Copy)]
    struct TestClock;

    impl Clock for TestClock {
        type T = u64;
        const SCALING_FACTOR: Fraction = Fraction::new(1, 1000);

        fn try_now(&self) -> Result<Instant<Self>, embedded_time::clock::Error> {
            Ok(Instant::new(0))
        }
    }

    #[test]
    fn test_symbol_table_roundtrip() {
        for value in 0..64u8 {
            assert_eq!(decode_symbol(ENCODE[value as usize]), Symbol::Data(value));
        }
        assert_eq!(decode_symbol(0x0F), Symbol::Ack1);
        assert_eq!(decode_symbol(0xF0), Symbol::Ack2);
        assert_eq!(decode_symbol(0xE1), Symbol::Nack);
        assert_eq!(decode_symbol(0x3C), Symbol::Reserved);
        assert_eq!(decode_symbol(0x00), Symbol::Invalid);
    }

    #[test]
    fn test_every_codeword_has_four_ones() {
        for &code in ENCODE.iter() {
            assert_eq!(code.count_ones(), 4);
        }
    }

    fn pom_buffer(adr: u16, cv: u16) -> BitBuffer {
        let p = construct::cv::pom_read(adr, cv, 5);
        wire::encode(&p, &FormatConfig::default()).unwrap()
    }

    /// Raw symbol pair for a window-2 POM datagram with this value.
    fn pom_datagram(value: u8) -> [u8; 2] {
        // Identifier 0 in the top four bits, value in the low eight.
        let first = (value >> 6) & 0x03;
        let second = value & 0x3F;
        [ENCODE[first as usize], ENCODE[second as usize]]
    }

    static LAST_POM: AtomicU32 = AtomicU32::new(u32::MAX);

    fn capture_pom(_ctx: usize, msg: &DecoderMessage) -> ListenerAction {
        if msg.kind == ReplyKind::Pom {
            LAST_POM.store(msg.param, Ordering::Relaxed);
        }
        ListenerAction::Keep
    }

    #[test]
    fn test_pom_read_reply_routed() {
        LAST_POM.store(u32::MAX, Ordering::Relaxed);
        let mut slots: [Option<Listener<TestClock>>; 2] = [None, None];
        let mut router = ReplyRouter::new(&mut slots[..]);
        router
            .register(
                ReplyFilter::exact(DecoderType::DccMobile, 77, ReplyKind::Pom),
                capture_pom,
                0,
                None,
            )
            .unwrap();

        let mut buf = pom_buffer(77, 8);
        let mut rx = RailComReceiver::new();
        for raw in pom_datagram(42) {
            rx.byte(Window::W2, raw);
        }
        rx.window_closed(&mut buf, &mut router);
        router.poll(Instant::new(0));

        assert_eq!(LAST_POM.load(Ordering::Relaxed), 42);
        assert!(buf.ack);
    }

    #[test]
    fn test_w1_address_datagram() {
        let mut slots: [Option<Listener<TestClock>>; 2] = [None, None];
        let mut router = ReplyRouter::new(&mut slots[..]);

        let mut buf = pom_buffer(77, 8);
        let mut rx = RailComReceiver::new();
        // Identifier 1 (address low), payload 77.
        let datagram: u16 = (1 << 8) | 77;
        rx.byte(Window::W1, ENCODE[(datagram >> 6) as usize]);
        rx.byte(Window::W1, ENCODE[(datagram & 0x3F) as usize]);
        rx.window_closed(&mut buf, &mut router);

        // Nothing crashes and the queue drains.
        assert!(router.poll(Instant::new(0)) >= 1);
    }

    #[test]
    fn test_garbage_abandons_window() {
        let mut slots: [Option<Listener<TestClock>>; 2] = [None, None];
        let mut router = ReplyRouter::new(&mut slots[..]);

        let mut buf = pom_buffer(77, 8);
        let mut rx = RailComReceiver::new();
        rx.byte(Window::W2, 0x00); // invalid symbol
        for raw in pom_datagram(42) {
            rx.byte(Window::W2, raw);
        }
        rx.window_closed(&mut buf, &mut router);

        assert_eq!(router.poll(Instant::new(0)), 0);
        assert!(!buf.ack);
    }

    #[test]
    fn test_pom_write_filter_swallows_old_value() {
        let mut slots: [Option<Listener<TestClock>>; 2] = [None, None];
        let mut router = ReplyRouter::new(&mut slots[..]);

        let p = construct::cv::pom_write(77, 3, 42, 5);
        let mut buf = wire::encode(&p, &FormatConfig::default()).unwrap();

        let mut rx = RailComReceiver::new();
        // Echo of the old value: filtered out.
        for raw in pom_datagram(17) {
            rx.byte(Window::W2, raw);
        }
        rx.window_closed(&mut buf, &mut router);
        assert_eq!(router.poll(Instant::new(0)), 0);
        assert!(!buf.ack);

        // The new value: delivered, transmission acknowledged.
        for raw in pom_datagram(42) {
            rx.byte(Window::W2, raw);
        }
        rx.window_closed(&mut buf, &mut router);
        assert_eq!(router.poll(Instant::new(0)), 1);
        assert!(buf.ack);
    }

    #[test]
    fn test_pom_write_filter_delivers_last_on_exhaustion() {
        LAST_POM.store(u32::MAX, Ordering::Relaxed);
        let mut slots: [Option<Listener<TestClock>>; 2] = [None, None];
        let mut router = ReplyRouter::new(&mut slots[..]);
        router
            .register(ReplyFilter::any(), capture_pom, 0, None)
            .unwrap();

        let p = construct::cv::pom_write(77, 3, 42, 5);
        let mut buf = wire::encode(&p, &FormatConfig::default()).unwrap();

        let mut rx = RailComReceiver::new();
        for raw in pom_datagram(17) {
            rx.byte(Window::W2, raw);
        }
        rx.window_closed(&mut buf, &mut router);
        rx.finalize(&buf, &mut router);
        router.poll(Instant::new(0));

        assert_eq!(LAST_POM.load(Ordering::Relaxed), 17);
    }

    #[test]
    fn test_timeout_when_silent() {
        let mut slots: [Option<Listener<TestClock>>; 2] = [None, None];
        let mut router = ReplyRouter::new(&mut slots[..]);

        let buf = pom_buffer(77, 8);
        let mut rx = RailComReceiver::new();
        rx.finalize(&buf, &mut router);
        assert_eq!(router.poll(Instant::new(0)), 1);
    }

    #[test]
    fn test_combined_shortinfo_payload() {
        let mut slots: [Option<Listener<TestClock>>; 2] = [None, None];
        let mut router = ReplyRouter::new(&mut slots[..]);

        let p = construct::dcca::select_short_info(0x04, 0x1234_5678);
        let mut buf = wire::encode(&p, &FormatConfig::default()).unwrap();

        let mut rx = RailComReceiver::new();
        // Eight data symbols carrying 48 bits counting up.
        for (i, window) in [(0, Window::W1), (1, Window::W1)]
            .into_iter()
            .chain((2..8).map(|i| (i, Window::W2)))
        {
            rx.byte(window, ENCODE[i as usize]);
        }
        rx.window_closed(&mut buf, &mut router);

        assert!(buf.ack);
        assert_eq!(router.poll(Instant::new(0)), 1);
    }
}
