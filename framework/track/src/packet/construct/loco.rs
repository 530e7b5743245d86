//! Loco drive and function commands.
//!
//! The live speed byte keeps the step in the format's control scale;
//! the rules here translate it into each format's wire form.

use dcs_core::format::LocoFormat;
use dcs_core::speed::{Speed, STEP_ESTOP, STEP_STOP};
use heapless::Vec;

use crate::packet::{M3Body, M3Chunk, MmBody, Packet, PacketBody, PacketOp};

use super::{dcc_body, m3 as m3c};

/// Function state bit out of the packed 4x32 function words.
pub fn func_bit(funcs: &[u32; 4], fnum: u8) -> bool {
    let word = (fnum / 32) as usize % 4;
    funcs[word] & (1 << (fnum % 32)) != 0
}

/// Motorola data nibble of a speed byte.
///
/// The nibble carries the step directly; code 1 doubles as the
/// Motorola I direction pulse, which also halts the loco, so it
/// serves as the emergency stop on the wire.
fn mm_nibble(speed: Speed) -> u8 {
    match speed.step() {
        STEP_STOP => 0,
        STEP_ESTOP => 1,
        step => step.min(15),
    }
}

/// Full-step nibble and half-step flag of a 27-step speed byte.
fn mm27_split(speed: Speed) -> (u8, bool) {
    match speed.step() {
        STEP_STOP => (0, false),
        STEP_ESTOP => (1, false),
        step => {
            let native = step.min(28) - 1;
            let nibble = (native + 1) / 2 + 1;
            (nibble.min(15), native % 2 == 0 && native > 1)
        }
    }
}

/// DCC 28-step intermediate speed value.
///
/// The control scale keeps 14 full steps; the wire form doubles them
/// onto the 28-step code space, so the half-step bit stays free for
/// the 27-style refinements.
fn dcc28_field(speed: Speed) -> u8 {
    match speed.step() {
        STEP_STOP => 0,
        STEP_ESTOP => 1,
        step => (2 * step + 3).min(31),
    }
}

/// Move the intermediate value's lowest bit into the V5 position.
fn dcc28_reorder(field: u8) -> u8 {
    (field >> 1) | ((field & 1) << 4)
}

fn dcc14_field(speed: Speed) -> u8 {
    match speed.step() {
        STEP_STOP => 0,
        STEP_ESTOP => 1,
        step => step.min(15),
    }
}

fn dcc126_field(speed: Speed) -> u8 {
    match speed.step() {
        STEP_STOP => 0,
        STEP_ESTOP => 1,
        step => step.min(127),
    }
}

fn dcc_dir_bit(speed: Speed) -> u8 {
    if speed.is_forward() {
        0x20
    } else {
        0x00
    }
}

/// Speed command for one loco in its own format.
///
/// Motorola II telegrams carry F0 in the control trit; DCC 14-step
/// folds F0 into the speed byte; the other DCC forms pair the speed
/// instruction with nothing else.
pub fn speed(adr: u16, format: LocoFormat, speed: Speed, funcs: &[u32; 4]) -> Packet {
    let f0 = func_bit(funcs, 0);

    match format {
        LocoFormat::Mm1_14 => Packet::new(
            PacketOp::MmLocoSpeed,
            adr,
            format,
            PacketBody::Mm(MmBody::plain(adr as u8, false, mm_nibble(speed), false)),
        ),
        LocoFormat::Mm2_14 => Packet::new(
            PacketOp::MmLocoSpeed,
            adr,
            format,
            PacketBody::Mm(MmBody::plain(adr as u8, f0, mm_nibble(speed), false)),
        ),
        LocoFormat::Mm2_27a => {
            let (nibble, half) = mm27_split(speed);
            let mut body = MmBody::plain(adr as u8, f0, nibble, false);
            if half {
                body.alt_data = Some((nibble + 1).min(15));
            }
            Packet::new(PacketOp::MmLocoSpeed, adr, format, PacketBody::Mm(body))
        }
        LocoFormat::Mm2_27b => {
            let (nibble, half) = mm27_split(speed);
            let mut body = MmBody::plain(adr as u8, f0, nibble, false);
            body.half = half;
            Packet::new(PacketOp::MmLocoSpeed, adr, format, PacketBody::Mm(body))
        }
        LocoFormat::Dcc14 => {
            let byte = 0x40 | dcc_dir_bit(speed) | ((f0 as u8) << 4) | dcc14_field(speed);
            dcc_loco_packet(PacketOp::DccLocoSpeed, adr, &[byte])
        }
        LocoFormat::Dcc28 => {
            let byte = 0x40 | dcc_dir_bit(speed) | dcc28_reorder(dcc28_field(speed));
            dcc_loco_packet(PacketOp::DccLocoSpeed, adr, &[byte])
        }
        LocoFormat::Dcc126 => {
            let dir = if speed.is_forward() { 0x80 } else { 0x00 };
            dcc_loco_packet(PacketOp::DccLocoSpeed, adr, &[0x3F, dir | dcc126_field(speed)])
        }
        LocoFormat::DccSdf => {
            let dir = if speed.is_forward() { 0x80 } else { 0x00 };
            let f_low = (funcs[0] & 0xFF) as u8;
            dcc_loco_packet(
                PacketOp::DccLocoSpeed,
                adr,
                &[0x3C, dir | dcc126_field(speed), f_low],
            )
        }
        LocoFormat::M3_126 => {
            let dir = if speed.is_forward() { 0 } else { 1u32 };
            let mut chunks: Vec<M3Chunk, { crate::packet::M3_CHUNKS_MAX }> = Vec::new();
            chunks.push(M3Chunk::new(0b001, 3)).ok();
            chunks
                .push(M3Chunk::new((dir << 7) | dcc126_field(speed) as u32, 8))
                .ok();
            Packet::new(
                PacketOp::M3Speed,
                adr,
                format,
                PacketBody::M3(M3Body {
                    adr,
                    chunks,
                    reply_slots: 0,
                }),
            )
        }
    }
}

/// Second-half bit patterns of the Motorola II function telegrams,
/// indexed by function number 1..=4 and state.
const MM2_FUNC_PATTERN: [[u8; 2]; 4] = [
    [0b0101, 0b1011],
    [0b0100, 0b1100],
    [0b0110, 0b1110],
    [0b0111, 0b1111],
];

fn dcc_func_bits(funcs: &[u32; 4], from: u8, to: u8) -> u8 {
    let mut bits = 0;
    for (i, f) in (from..=to).enumerate() {
        if func_bit(funcs, f) {
            bits |= 1 << i;
        }
    }
    bits
}

/// Function command covering the group that contains `fnum`.
///
/// Motorola telegrams embed the current speed, so the live speed byte
/// rides along.
pub fn function(
    adr: u16,
    format: LocoFormat,
    fnum: u8,
    funcs: &[u32; 4],
    spd: Speed,
) -> Option<Packet> {
    match format {
        LocoFormat::Mm1_14 => None,
        LocoFormat::Mm2_14 | LocoFormat::Mm2_27a | LocoFormat::Mm2_27b => {
            if fnum == 0 {
                // F0 travels in the control trit of the speed telegram.
                return Some(speed(adr, format, spd, funcs));
            }
            if fnum > 4 {
                return None;
            }

            let state = func_bit(funcs, fnum) as usize;
            let body = MmBody {
                adr: adr as u8,
                func: func_bit(funcs, 0),
                data: mm_nibble(spd),
                data2: MM2_FUNC_PATTERN[(fnum - 1) as usize][state],
                alt_data: None,
                half: false,
                fast: false,
            };
            Some(Packet::new(
                PacketOp::MmLocoFunc,
                adr,
                format,
                PacketBody::Mm(body),
            ))
        }
        LocoFormat::Dcc14 | LocoFormat::Dcc28 | LocoFormat::Dcc126 | LocoFormat::DccSdf => {
            let packet = match fnum {
                0..=4 => {
                    let byte = 0x80
                        | ((func_bit(funcs, 0) as u8) << 4)
                        | dcc_func_bits(funcs, 1, 4);
                    dcc_loco_packet(PacketOp::DccLocoFunc, adr, &[byte])
                }
                5..=8 => {
                    let byte = 0xB0 | dcc_func_bits(funcs, 5, 8);
                    dcc_loco_packet(PacketOp::DccLocoFunc, adr, &[byte])
                }
                9..=12 => {
                    let byte = 0xA0 | dcc_func_bits(funcs, 9, 12);
                    dcc_loco_packet(PacketOp::DccLocoFunc, adr, &[byte])
                }
                13..=20 => dcc_loco_packet(
                    PacketOp::DccLocoFunc,
                    adr,
                    &[0xDE, dcc_func_bits(funcs, 13, 20)],
                ),
                21..=28 => dcc_loco_packet(
                    PacketOp::DccLocoFunc,
                    adr,
                    &[0xDF, dcc_func_bits(funcs, 21, 28)],
                ),
                29..=31 => dcc_loco_packet(
                    PacketOp::DccLocoFunc,
                    adr,
                    &[0xD8, dcc_func_bits(funcs, 29, 31)],
                ),
                _ => return None,
            };
            Some(packet)
        }
        LocoFormat::M3_126 => {
            if fnum > 127 {
                return None;
            }
            Some(m3c::single_function(adr, fnum, func_bit(funcs, fnum)))
        }
    }
}

/// Periodic refresh command.
///
/// Even refresh rounds re-send the drive state, odd rounds cycle
/// through the function groups, so every decoder output converges
/// without flooding the track.
pub fn refresh(adr: u16, format: LocoFormat, spd: Speed, funcs: &[u32; 4], age: u16) -> Packet {
    let packet = if age % 2 == 0 || format == LocoFormat::Mm1_14 {
        speed(adr, format, spd, funcs)
    } else {
        let group = match format {
            LocoFormat::M3_126 => {
                return m3c::speed_and_functions(adr, spd, funcs).as_refresh();
            }
            f if f.is_mm() => ((age / 2) % 4 + 1) as u8,
            _ => match (age / 2) % 5 {
                0 => 0,
                1 => 5,
                2 => 9,
                3 => 13,
                _ => 21,
            },
        };
        function(adr, format, group, funcs, spd)
            .unwrap_or_else(|| speed(adr, format, spd, funcs))
    };

    packet.as_refresh()
}

/// Motorola I direction pulse.
///
/// The only way to turn an MM1 loco around: code 1 flips the decoder
/// relay and halts the motor.
pub fn mm1_direction_pulse(adr: u16) -> Packet {
    Packet::new(
        PacketOp::MmDirectionPulse,
        adr,
        LocoFormat::Mm1_14,
        PacketBody::Mm(MmBody::plain(adr as u8, false, 1, false)),
    )
}

fn dcc_loco_packet(op: PacketOp, adr: u16, instruction: &[u8]) -> Packet {
    let (adr_bytes, adr_len) = dcs_core::address::LocoAddress::new(adr).as_dcc_bytes(false);

    let mut bytes: heapless::Vec<u8, { crate::packet::DCC_PAYLOAD_MAX }> = heapless::Vec::new();
    bytes.extend_from_slice(&adr_bytes[..adr_len]).ok();
    bytes.extend_from_slice(instruction).ok();

    let mut body = dcc_body(&bytes);
    body.cutout = true;
    Packet::new(op, adr, LocoFormat::Dcc28, PacketBody::Dcc(body))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::packet::PacketBody;

    fn dcc_bytes(packet: &Packet) -> alloc::vec::Vec<u8> {
        match &packet.body {
            PacketBody::Dcc(body) => body.bytes.to_vec(),
            other => panic!("expected DCC body, got {other:?}"),
        }
    }

    #[test]
    fn test_dcc28_speed_14_forward() {
        // 28-step drive at step 14 forward doubles onto the top wire
        // code; with the V5 reorder that is 0x7F.
        let funcs = [1, 0, 0, 0];
        let p = speed(3, LocoFormat::Dcc28, Speed::new(14, true), &funcs);
        assert_eq!(dcc_bytes(&p), &[0x03, 0x7F]);
    }

    #[test]
    fn test_dcc28_stop_and_estop() {
        let funcs = [0; 4];
        let p = speed(3, LocoFormat::Dcc28, Speed::stop(true), &funcs);
        assert_eq!(dcc_bytes(&p), &[0x03, 0x60]);

        let p = speed(3, LocoFormat::Dcc28, Speed::emergency_stop(true), &funcs);
        // Intermediate value 1 lands in the V5 position.
        assert_eq!(dcc_bytes(&p), &[0x03, 0x70]);
    }

    #[test]
    fn test_dcc14_folds_f0() {
        let funcs = [1, 0, 0, 0];
        let p = speed(3, LocoFormat::Dcc14, Speed::new(5, true), &funcs);
        assert_eq!(dcc_bytes(&p), &[0x03, 0x75]);

        let p = speed(3, LocoFormat::Dcc14, Speed::new(5, true), &[0; 4]);
        assert_eq!(dcc_bytes(&p), &[0x03, 0x65]);
    }

    #[test]
    fn test_dcc126_two_byte_form() {
        let p = speed(1000, LocoFormat::Dcc126, Speed::new(77, false), &[0; 4]);
        assert_eq!(dcc_bytes(&p), &[0xC3, 0xE8, 0x3F, 0x4D]);
    }

    #[test]
    fn test_mm_speed_nibble_direct() {
        let p = speed(80, LocoFormat::Mm2_14, Speed::new(7, true), &[0; 4]);
        match p.body {
            PacketBody::Mm(body) => {
                assert_eq!(body.adr, 80);
                assert!(!body.func);
                assert_eq!(body.data, 7);
                assert_eq!(body.data2, 7);
            }
            other => panic!("expected MM body, got {other:?}"),
        }
    }

    #[test]
    fn test_mm27a_half_step_pair() {
        // Native step 4 is the half between nibbles 3 and 4; the 27A
        // dialect sends both telegrams alternately.
        let p = speed(24, LocoFormat::Mm2_27a, Speed::new(5, true), &[0; 4]);
        match p.body {
            PacketBody::Mm(body) => {
                assert_eq!(body.data, 3);
                assert_eq!(body.alt_data, Some(4));
            }
            other => panic!("expected MM body, got {other:?}"),
        }

        // A full step needs no alternate telegram.
        let p = speed(24, LocoFormat::Mm2_27a, Speed::new(4, true), &[0; 4]);
        match p.body {
            PacketBody::Mm(body) => {
                assert_eq!(body.data, 3);
                assert_eq!(body.alt_data, None);
            }
            other => panic!("expected MM body, got {other:?}"),
        }
    }

    #[test]
    fn test_mm27b_half_step_flag() {
        let p = speed(24, LocoFormat::Mm2_27b, Speed::new(5, true), &[0; 4]);
        match p.body {
            PacketBody::Mm(body) => {
                assert_eq!(body.data, 3);
                assert!(body.half);
                assert_eq!(body.alt_data, None);
            }
            other => panic!("expected MM body, got {other:?}"),
        }

        let p = speed(24, LocoFormat::Mm2_27b, Speed::new(4, true), &[0; 4]);
        match p.body {
            PacketBody::Mm(body) => {
                assert_eq!(body.data, 3);
                assert!(!body.half);
            }
            other => panic!("expected MM body, got {other:?}"),
        }
    }

    #[test]
    fn test_dcc_function_groups() {
        let mut funcs = [0u32; 4];
        funcs[0] |= 1; // F0
        funcs[0] |= 1 << 6; // F6

        let spd = Speed::stop(true);
        let p = function(3, LocoFormat::Dcc28, 0, &funcs, spd).unwrap();
        assert_eq!(dcc_bytes(&p), &[0x03, 0x90]);

        let p = function(3, LocoFormat::Dcc28, 6, &funcs, spd).unwrap();
        assert_eq!(dcc_bytes(&p), &[0x03, 0xB2]);

        funcs[0] |= 1 << 15;
        let p = function(3, LocoFormat::Dcc28, 15, &funcs, spd).unwrap();
        assert_eq!(dcc_bytes(&p), &[0x03, 0xDE, 0x04]);
    }

    #[test]
    fn test_mm_function_telegram_patterns() {
        let mut funcs = [0u32; 4];
        funcs[0] |= 1 << 2; // F2 on

        let p = function(12, LocoFormat::Mm2_14, 2, &funcs, Speed::new(9, true)).unwrap();
        match p.body {
            PacketBody::Mm(body) => {
                // Speed rides in the first bits, the function selector
                // in the second bits.
                assert_eq!(body.data, 9);
                assert_eq!(body.data2, MM2_FUNC_PATTERN[1][1]);
            }
            other => panic!("expected MM body, got {other:?}"),
        }
    }

    #[test]
    fn test_refresh_alternates() {
        let funcs = [0u32; 4];
        let spd = Speed::new(5, true);

        let even = refresh(3, LocoFormat::Dcc28, spd, &funcs, 0);
        assert_eq!(even.op, PacketOp::DccLocoSpeed);
        assert!(even.refresh);

        let odd = refresh(3, LocoFormat::Dcc28, spd, &funcs, 1);
        assert_eq!(odd.op, PacketOp::DccLocoFunc);
    }

    #[test]
    fn test_determinism() {
        let funcs = [3, 0, 0, 0];
        let a = speed(42, LocoFormat::Dcc28, Speed::new(9, false), &funcs);
        let b = speed(42, LocoFormat::Dcc28, Speed::new(9, false), &funcs);
        assert_eq!(a, b);
    }
}
