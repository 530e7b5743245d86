//! DCC bit-stream encoder.
//!
//! Preamble, zero-separated data octets, the XOR checksum octet and
//! the packet end bit; automatic-logon frames additionally carry their
//! CRC-8 as the last data octet.

use dcs_core::format::FormatFlags;

use super::bitbuf::{BitBuffer, BufFormat, DccSub, SubState};
use super::{Error, Result};
use crate::crc::{dcc_xor, dcca_crc};
use crate::fmtcfg::FormatConfig;
use crate::packet::DccBody;

/// Seed of the logon frame CRC.
pub const DCCA_CRC_INIT: u8 = 0xFF;

fn buf_format(body: &DccBody) -> BufFormat {
    if body.dcca {
        return BufFormat::DccA;
    }
    match body.xpom_seq {
        Some(0) => BufFormat::DccXpom00,
        Some(1) => BufFormat::DccXpom01,
        Some(2) => BufFormat::DccXpom10,
        Some(3) => BufFormat::DccXpom11,
        _ => BufFormat::Dcc,
    }
}

fn push_octet(buf: &mut BitBuffer, octet: u8) -> Result<()> {
    if !buf.push_bit(false) || !buf.push_byte(octet) {
        return Err(Error::Overflow);
    }
    Ok(())
}

/// Encode one DCC packet into a buffer.
pub fn encode(body: &DccBody, cfg: &FormatConfig) -> Result<BitBuffer> {
    if body.bytes.is_empty() {
        return Err(Error::EmptyPayload);
    }

    let mut buf = BitBuffer::new(buf_format(body));

    let preamble = cfg.preamble(body.service_mode);
    for _ in 0..preamble {
        if !buf.push_bit(true) {
            return Err(Error::Overflow);
        }
    }

    let mut xor = dcc_xor(&body.bytes);
    for &octet in body.bytes.iter() {
        push_octet(&mut buf, octet)?;
    }

    if body.dcca {
        let crc = dcca_crc(DCCA_CRC_INIT, &body.bytes);
        push_octet(&mut buf, crc)?;
        xor ^= crc;
    }

    push_octet(&mut buf, xor)?;

    // Packet end bit plus configured tail.
    for _ in 0..(1 + cfg.dcc_tail) {
        if !buf.push_bit(true) {
            return Err(Error::Overflow);
        }
    }

    buf.sub = SubState::Dcc(DccSub {
        preamble,
        tail: cfg.dcc_tail,
        half_one_us: cfg.dcc_half_one_us,
        half_zero_us: cfg.dcc_half_zero_us,
        cutout: body.cutout
            && !body.service_mode
            && cfg.flags.contains(FormatFlags::RAILCOM),
        expected: None,
        last_value: None,
        value_seen: false,
    });

    Ok(buf)
}

#[cfg(test)]
mod test {
    use super::*;
    use heapless::Vec;

    fn body(bytes: &[u8]) -> DccBody {
        DccBody {
            bytes: Vec::from_slice(bytes).unwrap(),
            service_mode: false,
            cutout: false,
            dcca: false,
            xpom_seq: None,
        }
    }

    /// Split an encoded stream back into octets for inspection.
    fn decode(buf: &BitBuffer) -> (usize, alloc::vec::Vec<u8>) {
        let bits: alloc::vec::Vec<bool> = buf.iter_bits().collect();
        let mut i = 0;
        while bits[i] {
            i += 1;
        }
        let preamble = i;

        let mut octets = alloc::vec::Vec::new();
        while i + 9 <= bits.len() && !bits[i] {
            let mut octet = 0u8;
            for b in &bits[i + 1..i + 9] {
                octet = (octet << 1) | *b as u8;
            }
            octets.push(octet);
            i += 9;
        }

        // Everything after the data must be the end bit and tail.
        assert!(bits[i..].iter().all(|b| *b));
        (preamble, octets)
    }

    #[test]
    fn test_speed_packet_with_checksum() {
        // Loco 3, step 14 forward, with the function octet on board:
        // the checksum closes the frame.
        let buf = encode(&body(&[0x03, 0x7F, 0x90]), &FormatConfig::default()).unwrap();
        let (preamble, octets) = decode(&buf);
        assert_eq!(preamble, 16);
        assert_eq!(octets, [0x03, 0x7F, 0x90, 0x03 ^ 0x7F ^ 0x90]);
    }

    #[test]
    fn test_zero_checksum_case() {
        let buf = encode(&body(&[0x03, 0x7F, 0x7C]), &FormatConfig::default()).unwrap();
        let (_, octets) = decode(&buf);
        assert_eq!(octets, [0x03, 0x7F, 0x7C, 0x00]);
    }

    #[test]
    fn test_service_mode_preamble() {
        let mut b = body(&[0x7C, 0x00, 42]);
        b.service_mode = true;
        let buf = encode(&b, &FormatConfig::default()).unwrap();
        let (preamble, _) = decode(&buf);
        assert_eq!(preamble, 22);
    }

    #[test]
    fn test_dcca_frame_carries_crc8() {
        let payload = [0xFE, 0xFC, 0x12, 0x34, 0x07];
        let mut b = body(&payload);
        b.dcca = true;
        let buf = encode(&b, &FormatConfig::default()).unwrap();
        assert_eq!(buf.format, BufFormat::DccA);

        let (_, octets) = decode(&buf);
        let crc = dcca_crc(DCCA_CRC_INIT, &payload);
        assert_eq!(octets.len(), payload.len() + 2);
        assert_eq!(octets[5], crc);
        // The XOR octet still covers everything including the CRC.
        assert_eq!(dcc_xor(&octets), 0x00);
    }

    #[test]
    fn test_cutout_flag_propagates() {
        let mut b = body(&[0x03, 0x60]);
        b.cutout = true;
        let buf = encode(&b, &FormatConfig::default()).unwrap();
        match buf.sub {
            SubState::Dcc(sub) => assert!(sub.cutout),
            other => panic!("expected DCC sub-state, got {other:?}"),
        }
    }

    #[test]
    fn test_determinism() {
        let cfg = FormatConfig::default();
        let a = encode(&body(&[0x03, 0x7F, 0x7C]), &cfg).unwrap();
        let b = encode(&body(&[0x03, 0x7F, 0x7C]), &cfg).unwrap();
        assert_eq!(a, b);
    }
}
