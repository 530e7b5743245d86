//! M3 reply-window receiver.
//!
//! The signal generator clocks half-sync pulses after an M3 frame and
//! raises one notification per slot; the hardware current detector
//! says whether the decoder pulled current in that slot. A binary
//! answer is presence alone, a data answer is eight bytes plus a CRC.

use dcs_core::message::{DecoderMessage, ReplyKind};
use embedded_time::Clock;
use heapless::Vec;

use crate::crc::m3_crc;
use crate::packet::ReadbackKind;
use crate::router::ReplyRouter;
use crate::wire::BitBuffer;

/// Bit slots of a full data reply: eight data bytes and the CRC.
pub const DATA_REPLY_BITS: usize = 72;

/// Collects reply-window samples of the running M3 frame.
#[derive(Default)]
pub struct M3ReplyReceiver {
    bits: Vec<bool, DATA_REPLY_BITS>,
}

impl M3ReplyReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// One sampled reply slot: did the decoder pull current?
    pub fn slot(&mut self, present: bool) {
        if self.bits.push(present).is_err() {
            sig_trace!("m3: reply window overflow");
        }
    }

    fn base_msg(buf: &BitBuffer, kind: ReplyKind) -> DecoderMessage {
        let rb = &buf.readback;
        let mut msg = DecoderMessage::new(rb.dectype, rb.adr, kind);
        msg.cv = rb.cv;
        msg.param = rb.param;
        msg
    }

    /// The frame (and its window) finished; decode and route.
    pub fn window_done<C: Clock>(&mut self, buf: &mut BitBuffer, router: &mut ReplyRouter<'_, C>) {
        match buf.readback.kind {
            ReadbackKind::M3Bin => {
                let present = self.bits.iter().any(|b| *b);
                if present {
                    buf.ack = true;
                }
                let mut msg = Self::base_msg(buf, ReplyKind::M3Bin);
                msg.param = present as u32;
                router.deliver(msg, buf.readback.hook);
            }
            ReadbackKind::M3Data => {
                if self.bits.iter().all(|b| !b) {
                    router.deliver(
                        Self::base_msg(buf, ReplyKind::NoAnswer),
                        buf.readback.hook,
                    );
                } else if self.bits.len() < DATA_REPLY_BITS {
                    router.deliver(Self::base_msg(buf, ReplyKind::Error), buf.readback.hook);
                } else {
                    let mut bytes = [0u8; 9];
                    for (i, bit) in self.bits.iter().enumerate() {
                        if *bit {
                            bytes[i / 8] |= 1 << (7 - i % 8);
                        }
                    }

                    if m3_crc(0, &bytes[..8]) == bytes[8] {
                        buf.ack = true;
                        router.deliver(
                            Self::base_msg(buf, ReplyKind::M3Data).with_payload(&bytes[..8]),
                            buf.readback.hook,
                        );
                    } else {
                        router.deliver(Self::base_msg(buf, ReplyKind::Error), buf.readback.hook);
                    }
                }
            }
            _ => {}
        }

        self.bits.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fmtcfg::FormatConfig;
    use crate::packet::construct;
    use crate::router::Listener;
    use crate::wire;
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

    fn router_slots() -> [Option<Listener<TestClock>>; 2] {
        [None, None]
    }

    #[test]
    fn test_binary_presence() {
        let mut slots = router_slots();
        let mut router = ReplyRouter::new(&mut slots[..]);

        let p = construct::m3::ping(9);
        let mut buf = wire::encode(&p, &FormatConfig::default()).unwrap();

        let mut rx = M3ReplyReceiver::new();
        rx.slot(false);
        rx.slot(true);
        rx.window_done(&mut buf, &mut router);

        assert!(buf.ack);
        assert_eq!(router.poll(Instant::new(0)), 1);
    }

    #[test]
    fn test_data_reply_crc_checked() {
        let mut slots = router_slots();
        let mut router = ReplyRouter::new(&mut slots[..]);

        let p = construct::m3::cv_read(9, 3, 0);
        let mut buf = wire::encode(&p, &FormatConfig::default()).unwrap();

        let data = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let crc = m3_crc(0, &data);

        let mut rx = M3ReplyReceiver::new();
        for byte in data.iter().chain(core::iter::once(&crc)) {
            for i in (0..8).rev() {
                rx.slot(byte & (1 << i) != 0);
            }
        }
        rx.window_done(&mut buf, &mut router);

        assert!(buf.ack);
        assert_eq!(router.poll(Instant::new(0)), 1);
    }

    #[test]
    fn test_data_reply_bad_crc_rejected() {
        let mut slots = router_slots();
        let mut router = ReplyRouter::new(&mut slots[..]);

        let p = construct::m3::cv_read(9, 3, 0);
        let mut buf = wire::encode(&p, &FormatConfig::default()).unwrap();

        let data = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let bad_crc = m3_crc(0, &data) ^ 0x01;

        let mut rx = M3ReplyReceiver::new();
        for byte in data.iter().chain(core::iter::once(&bad_crc)) {
            for i in (0..8).rev() {
                rx.slot(byte & (1 << i) != 0);
            }
        }
        rx.window_done(&mut buf, &mut router);

        assert!(!buf.ack);
        // An error message still reaches the router.
        assert_eq!(router.poll(Instant::new(0)), 1);
    }

    #[test]
    fn test_silent_window_is_no_answer() {
        let mut slots = router_slots();
        let mut router = ReplyRouter::new(&mut slots[..]);

        let p = construct::m3::cv_read(9, 3, 0);
        let mut buf = wire::encode(&p, &FormatConfig::default()).unwrap();

        let mut rx = M3ReplyReceiver::new();
        for _ in 0..DATA_REPLY_BITS {
            rx.slot(false);
        }
        rx.window_done(&mut buf, &mut router);
        assert!(!buf.ack);
    }
}
