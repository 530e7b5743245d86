//! Model-clock broadcasts.
//!
//! The layout clock is broadcast to every decoder so clock-driven
//! accessories stay synchronised; real time rides along for decoders
//! that log events.

use dcs_core::model_time::{ModelDate, ModelTime};
use zerocopy::{ByteOrder, NetworkEndian};

use crate::packet::{Packet, PacketOp};

use super::dcc_packet;

const TIME_CMD: u8 = 0xC1;
const SUB_TIME: u8 = 0x00;
const SUB_DATE: u8 = 0x40;
const SUB_SYSTIME: u8 = 0x80;

/// Broadcast the model clock.
pub fn model_time(time: ModelTime) -> Packet {
    let minute = time.minute & 0x3F;
    let hour = time.hour & 0x1F;
    let weekday = u8::from(time.weekday) & 0x07;

    dcc_packet(
        PacketOp::DccModelTime,
        0,
        &[
            0x00,
            TIME_CMD,
            SUB_TIME | minute,
            (weekday << 5) | hour,
            time.rate & 0x3F,
        ],
    )
}

/// Broadcast the model calendar date.
pub fn model_date(date: ModelDate) -> Packet {
    let day = date.day & 0x1F;
    let month = u8::from(date.month) & 0x0F;

    dcc_packet(
        PacketOp::DccModelDate,
        0,
        &[
            0x00,
            TIME_CMD,
            SUB_DATE | day,
            (month << 4) | ((date.year >> 8) & 0x0F) as u8,
            date.year as u8,
        ],
    )
}

/// Broadcast the real-time clock as seconds since midnight.
pub fn sys_time(seconds: u32) -> Packet {
    let mut b = [0u8; 4];
    NetworkEndian::write_u32(&mut b, seconds % 86_400);

    dcc_packet(
        PacketOp::DccSysTime,
        0,
        &[0x00, TIME_CMD, SUB_SYSTIME, b[1], b[2], b[3]],
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::packet::PacketBody;
    use dcs_core::model_time::ModelWeekday;

    fn bytes(p: &Packet) -> &[u8] {
        match &p.body {
            PacketBody::Dcc(b) => &b.bytes,
            other => panic!("expected DCC body, got {other:?}"),
        }
    }

    #[test]
    fn test_model_time_packing() {
        let t = ModelTime {
            weekday: ModelWeekday::Wednesday,
            hour: 13,
            minute: 37,
            rate: 8,
        };
        let p = model_time(t);
        assert_eq!(bytes(&p), &[0x00, 0xC1, 37, (4 << 5) | 13, 8]);
    }

    #[test]
    fn test_sys_time_wraps_at_midnight() {
        let p = sys_time(86_400 + 61);
        let b = bytes(&p);
        assert_eq!(&b[3..], &[0, 0, 61]);
    }
}
