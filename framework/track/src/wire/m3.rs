//! M3 frame encoder.
//!
//! Shortest-fit address selector, command bit runs, CRC-8 over the
//! whole frame, and a stuffed zero after every six consecutive one
//! bits so a frame can never mimic a DCC preamble. The sync flags
//! around the frame are fixed patterns the signal generator emits
//! itself.

use super::bitbuf::{BitBuffer, BufFormat, M3Sub, SubState};
use super::{Error, Result};
use crate::crc::m3_crc_bit;
use crate::packet::M3Body;

/// Ones in a row after which a zero is stuffed.
const STUFF_LIMIT: u8 = 6;

struct FrameWriter {
    buf: BitBuffer,
    crc: u8,
    ones: u8,
}

impl FrameWriter {
    fn new() -> Self {
        Self {
            buf: BitBuffer::new(BufFormat::M3),
            crc: 0,
            ones: 0,
        }
    }

    fn emit(&mut self, bit: bool) -> Result<()> {
        if !self.buf.push_bit(bit) {
            return Err(Error::Overflow);
        }
        if bit {
            self.ones += 1;
            if self.ones >= STUFF_LIMIT {
                if !self.buf.push_bit(false) {
                    return Err(Error::Overflow);
                }
                self.ones = 0;
            }
        } else {
            self.ones = 0;
        }
        Ok(())
    }

    /// Payload bit: updates the CRC and goes through stuffing.
    fn push(&mut self, bit: bool) -> Result<()> {
        self.crc = m3_crc_bit(self.crc, bit);
        self.emit(bit)
    }

    fn push_bits(&mut self, value: u32, count: u8) -> Result<()> {
        for i in (0..count).rev() {
            self.push(value & (1 << i) != 0)?;
        }
        Ok(())
    }

    /// Append the CRC; stuffed like payload, but fixed at this point.
    fn finish(mut self, reply_slots: u8) -> Result<BitBuffer> {
        let crc = self.crc;
        for i in (0..8).rev() {
            self.emit(crc & (1 << i) != 0)?;
        }

        self.buf.sub = SubState::M3(M3Sub {
            reply_slots,
            stuff_ones: self.ones,
        });
        Ok(self.buf)
    }
}

/// Shortest address selector that fits, prefix plus address bits.
fn addr_selector(adr: u16) -> (u32, u8) {
    if adr < 0x80 {
        ((0b10 << 7) | adr as u32, 9)
    } else if adr < 0x200 {
        ((0b110 << 9) | adr as u32, 12)
    } else if adr < 0x800 {
        ((0b1110 << 11) | adr as u32, 15)
    } else {
        ((0b1111 << 14) | (adr & 0x3FFF) as u32, 18)
    }
}

/// Encode one M3 frame into a buffer.
pub fn encode(body: &M3Body) -> Result<BitBuffer> {
    let mut w = FrameWriter::new();

    let (selector, bits) = addr_selector(body.adr);
    w.push_bits(selector, bits)?;

    for chunk in body.chunks.iter() {
        w.push_bits(chunk.value, chunk.bits)?;
    }

    w.finish(body.reply_slots)
}
