//! Maerklin-Motorola trit encoder.
//!
//! A telegram is four address trits, the control trit and four data
//! trits, each trit two signal bits; the whole block goes out twice
//! with a pause in between and a gap after.

use super::bitbuf::{BitBuffer, BufFormat, MmSub, SubState};
use super::{Error, Result};
use crate::fmtcfg::FormatConfig;
use crate::packet::MmBody;

/// Signal bits of one Motorola block.
pub const BLOCK_BITS: usize = 18;

/// Packed quaternary address codes.
///
/// Addresses up to 80 use the classic ternary codes with 80 on the
/// all-zero pattern; the codes above 80 are the remaining quaternary
/// patterns, the ones that use the fourth bit-pair state. Two bits per
/// digit, least significant digit first.
static ADDR_CODE: [u8; 256] = build_addr_table();

const fn pack_base3(mut value: u8) -> u8 {
    let mut packed = 0u8;
    let mut i = 0;
    while i < 4 {
        packed |= (value % 3) << (2 * i);
        value /= 3;
        i += 1;
    }
    packed
}

const fn uses_fourth_state(packed: u8) -> bool {
    let mut i = 0;
    while i < 4 {
        if (packed >> (2 * i)) & 0x03 == 0x03 {
            return true;
        }
        i += 1;
    }
    false
}

const fn build_addr_table() -> [u8; 256] {
    let mut table = [0u8; 256];

    let mut adr = 0usize;
    while adr <= 80 {
        let value = if adr == 80 { 0 } else { adr as u8 };
        table[adr] = pack_base3(value);
        adr += 1;
    }

    let mut code = 0u16;
    while adr < 256 {
        while !uses_fourth_state(code as u8) {
            code += 1;
        }
        table[adr] = code as u8;
        code += 1;
        adr += 1;
    }

    table
}

/// First and second signal bit of one quaternary digit.
const fn digit_bits(digit: u8) -> (bool, bool) {
    match digit & 0x03 {
        0 => (false, false),
        1 => (true, true),
        2 => (true, false),
        _ => (false, true),
    }
}

fn push_trit(buf: &mut BitBuffer, first: bool, second: bool) -> Result<()> {
    if buf.push_bit(first) && buf.push_bit(second) {
        Ok(())
    } else {
        Err(Error::Overflow)
    }
}

fn push_block(buf: &mut BitBuffer, body: &MmBody, data: u8) -> Result<()> {
    let code = ADDR_CODE[body.adr as usize];
    for i in 0..4 {
        let (first, second) = digit_bits(code >> (2 * i));
        push_trit(buf, first, second)?;
    }

    // Control trit; the 27B half step shows up as the inverted
    // second bit.
    push_trit(buf, body.func, body.func ^ body.half)?;

    let data2 = if data == body.data { body.data2 } else { data };
    for i in 0..4 {
        push_trit(buf, data & (1 << i) != 0, data2 & (1 << i) != 0)?;
    }

    Ok(())
}

/// Encode one Motorola telegram (or a 27A telegram pair) into a
/// buffer.
pub fn encode(body: &MmBody, cfg: &FormatConfig) -> Result<BitBuffer> {
    let mut buf = BitBuffer::new(if body.fast {
        BufFormat::MmFast
    } else {
        BufFormat::MmSlow
    });

    push_block(&mut buf, body, body.data)?;
    if let Some(alt) = body.alt_data {
        push_block(&mut buf, body, alt)?;
    }

    buf.sub = SubState::Mm(MmSub {
        pause_us: if body.fast {
            cfg.mm_pause_fast_us
        } else {
            cfg.mm_pause_slow_us
        },
        gap_us: cfg.mm_gap(),
        pass: 0,
    });

    Ok(buf)
}
