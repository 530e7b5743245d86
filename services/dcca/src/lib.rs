#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_code)]

//! The DCC automatic-logon service.
//!
//! Runs the logon round dance: enable rounds, candidate isolation on
//! collisions, short-info readout, address assignment and the
//! data-space scan that enriches the decoder database. One step at a
//! time, one `poll` per scheduler round, every wait bounded.

#[cfg(test)]
extern crate alloc;

use dcs_core::decoder::{ConfigOrigin, DccaInfo, DecoderDirectory};
use dcs_core::format::LocoFormat;
use dcs_core::func::FuncTiming;
use dcs_core::message::{DecoderMessage, DecoderType, ReplyKind};
use dcs_track::crc::dcca_crc;
use dcs_track::packet::construct::dcca::{self, LogonGroup};
use dcs_track::queue::CommandQueue;
use embedded_time::duration::Milliseconds;
use embedded_time::{Clock, Instant};
use heapless::{String, Vec};

/// Per-step reply timeout.
const STEP_TIMEOUT_MS: u32 = 1000;
/// Retries of one step before the machine falls back to idle.
const STEP_RETRIES: u8 = 5;
/// Logon-enable attempts during candidate isolation.
const ISOLATION_BUDGET: u16 = 200;
/// Short and long spacing between isolation attempts; alternating.
const ISOLATION_SHORT_MS: u32 = 20;
const ISOLATION_LONG_MS: u32 = 40;
/// Pacing of enable rounds while idle.
const LOGON_PERIOD_MS: u32 = 300;
/// Fresh addresses are assigned from here upwards.
const ASSIGN_BASE: u16 = 1000;
/// A data-space block shorter than this ends the space readout.
const FULL_BLOCK_LEN: usize = 31;
/// Bytes one cutout answer contributes to a block.
const FRAGMENT_LEN: usize = 6;
/// Whole-space readout retries after a CRC failure.
const SPACE_RETRIES: u8 = 5;
/// Longest data space kept in memory.
const SPACE_BUF: usize = 128;

/// Data spaces pulled after a successful assignment, bitmap order.
const SCAN_SPACES: [u8; 5] = [0, 2, 4, 5, 6];

/// Logon machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LogonState {
    Startup,
    LogonIdle,
    ShortInfo,
    Assign,
    DataSpace,
    ClearChgFlags,
    Isolation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    Request,
    Start,
    Cont,
}

/// What the service reports back to its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DccaEvent {
    /// A decoder was assigned this track address.
    Registered { adr: u16, vid: u8, uid: u32 },
    /// The data-space readout for this decoder completed.
    ReadoutDone { adr: u16 },
    /// The current candidate was abandoned.
    Abandoned,
}

/// The semantic meaning of a coded address wish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressWish {
    LongLoco(u16),
    ExtAccessory(u16),
    BasicAccessory(u16),
    ShortLoco(u8),
    FwUpdate,
}

/// Decode the five-prefix coded address form.
pub fn decode_wish(coded: u16) -> AddressWish {
    match coded {
        0x3F00..=0x3FFF => AddressWish::FwUpdate,
        0x3800..=0x3EFF => AddressWish::ShortLoco((coded & 0xFF) as u8),
        0x3000..=0x37FF => AddressWish::BasicAccessory(coded & 0x07FF),
        0x2800..=0x2FFF => AddressWish::ExtAccessory(coded & 0x07FF),
        _ => AddressWish::LongLoco(coded & 0x3FFF),
    }
}

/// Re-encode an assigned loco address for the track.
///
/// Short stays short when it fits; everything else takes the long
/// form.
pub fn encode_assignment(adr: u16, wish: AddressWish) -> u16 {
    match wish {
        AddressWish::ShortLoco(_) if adr <= 127 => 0x3800 | adr,
        _ => adr & 0x3FFF,
    }
}

struct Candidate {
    vid: u8,
    uid: u32,
    adr: u16,
    coded: u16,
    wish: AddressWish,
}

/// The logon service.
///
/// Replies reach it through [`DccaService::on_reply`]; the owner
/// forwards every routed message with the logon decoder type.
pub struct DccaService<C: Clock> {
    state: LogonState,
    enabled: bool,
    /// Command-station id announced in enable rounds.
    cid: u16,
    session: u8,
    inbox: Option<DecoderMessage>,
    deadline: Option<Instant<C>>,
    next_action: Option<Instant<C>>,
    retries: u8,
    iso_left: u16,
    candidate: Option<Candidate>,
    /// Advertised data spaces, one bit per id.
    spaces: u8,
    scan_at: usize,
    block: BlockState,
    space_id: u8,
    space_buf: Vec<u8, SPACE_BUF>,
    space_retries: u8,
}

impl<C: Clock> DccaService<C> {
    pub fn new(cid: u16, session: u8) -> Self {
        Self {
            state: LogonState::Startup,
            enabled: false,
            cid,
            session,
            inbox: None,
            deadline: None,
            next_action: None,
            retries: 0,
            iso_left: 0,
            candidate: None,
            spaces: 0,
            scan_at: 0,
            block: BlockState::Request,
            space_id: 0,
            space_buf: Vec::new(),
            space_retries: 0,
        }
    }

    pub fn state(&self) -> LogonState {
        self.state
    }

    /// Switch logon rounds on or off.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.reset_to_idle();
        }
    }

    /// Feed one routed decoder reply into the machine.
    pub fn on_reply(&mut self, msg: DecoderMessage) {
        if msg.dectype == DecoderType::DccA {
            self.inbox = Some(msg);
        }
    }

    fn after(now: Instant<C>, ms: u32) -> Instant<C> {
        now.checked_add(Milliseconds(ms)).unwrap_or(now)
    }

    fn passed(now: Instant<C>, at: Option<Instant<C>>) -> bool {
        match at {
            Some(at) => now.checked_duration_since(&at).is_some(),
            None => true,
        }
    }

    fn arm(&mut self, now: Instant<C>) {
        self.deadline = Some(Self::after(now, STEP_TIMEOUT_MS));
    }

    fn reset_to_idle(&mut self) {
        self.state = LogonState::LogonIdle;
        self.candidate = None;
        self.deadline = None;
        self.retries = 0;
        self.space_buf.clear();
        self.inbox = None;
    }

    fn enter_isolation(&mut self) {
        self.state = LogonState::Isolation;
        self.candidate = None;
        self.deadline = None;
        self.iso_left = ISOLATION_BUDGET;
        self.next_action = None;
    }

    /// The assignment rule: wish, existing record, vid/uid reuse, or
    /// a fresh address from the free pool.
    fn choose_address(
        vid: u8,
        uid: u32,
        wish: AddressWish,
        dir: &mut dyn DecoderDirectory,
    ) -> Option<u16> {
        let wished = match wish {
            AddressWish::ShortLoco(a) => a as u16,
            AddressWish::LongLoco(a) => a,
            // Accessory and firmware logons keep their coded wish.
            AddressWish::BasicAccessory(a) | AddressWish::ExtAccessory(a) => return Some(a),
            AddressWish::FwUpdate => return None,
        };

        if let Some(known) = dir.find_by_vid_uid(vid, uid) {
            return Some(known);
        }
        if wished != 0 && !dir.loco_exists(wished) {
            return Some(wished);
        }
        dir.allocate_free(ASSIGN_BASE)
    }

    /// One scheduler round.
    pub fn poll(
        &mut self,
        now: Instant<C>,
        queue: &mut CommandQueue,
        dir: &mut dyn DecoderDirectory,
    ) -> Option<DccaEvent> {
        let msg = self.inbox.take();

        // The corrected isolation predicate: the reply kind decides.
        if let Some(msg) = &msg {
            if matches!(msg.kind, ReplyKind::Collision)
                && !matches!(self.state, LogonState::Isolation)
            {
                self.enter_isolation();
                return Some(DccaEvent::Abandoned);
            }
        }

        match self.state {
            LogonState::Startup => {
                self.reset_to_idle();
                None
            }

            LogonState::LogonIdle => self.poll_idle(now, queue, msg),
            LogonState::Isolation => self.poll_isolation(now, queue, msg),
            LogonState::ShortInfo => self.poll_short_info(now, queue, msg),
            LogonState::Assign => self.poll_assign(now, queue, dir, msg),
            LogonState::DataSpace => self.poll_data_space(now, queue, dir, msg),
            LogonState::ClearChgFlags => self.poll_clear_flags(now, queue, msg),
        }
    }

    fn poll_idle(
        &mut self,
        now: Instant<C>,
        queue: &mut CommandQueue,
        msg: Option<DecoderMessage>,
    ) -> Option<DccaEvent> {
        if let Some(msg) = msg {
            if msg.kind == ReplyKind::DccaUnique && msg.len >= 6 {
                let vid = msg.data[1];
                let uid = u32::from_be_bytes([msg.data[2], msg.data[3], msg.data[4], msg.data[5]]);
                self.candidate = Some(Candidate {
                    vid,
                    uid,
                    adr: 0,
                    coded: 0,
                    wish: AddressWish::LongLoco(0),
                });
                self.state = LogonState::ShortInfo;
                self.retries = 0;
                queue.enqueue(dcca::select_short_info(vid, uid)).ok();
                self.arm(now);
                return None;
            }
        }

        if self.enabled && Self::passed(now, self.next_action) {
            queue
                .enqueue(dcca::logon_enable(LogonGroup::All, self.cid, self.session))
                .ok();
            self.next_action = Some(Self::after(now, LOGON_PERIOD_MS));
        }
        None
    }

    fn poll_isolation(
        &mut self,
        now: Instant<C>,
        queue: &mut CommandQueue,
        msg: Option<DecoderMessage>,
    ) -> Option<DccaEvent> {
        // A clean unique id ends the isolation round.
        if let Some(msg) = &msg {
            if msg.kind == ReplyKind::DccaUnique {
                self.state = LogonState::LogonIdle;
                self.inbox = Some(*msg);
                return None;
            }
        }

        if !Self::passed(now, self.next_action) {
            return None;
        }

        if self.iso_left == 0 {
            self.reset_to_idle();
            return None;
        }

        self.iso_left -= 1;
        queue
            .enqueue(dcca::logon_enable(LogonGroup::All, self.cid, self.session))
            .ok();

        let spacing = if self.iso_left % 2 == 0 {
            ISOLATION_SHORT_MS
        } else {
            ISOLATION_LONG_MS
        };
        self.next_action = Some(Self::after(now, spacing));
        None
    }

    fn step_timeout(&mut self, now: Instant<C>, resend: impl FnOnce(&mut CommandQueue), queue: &mut CommandQueue) -> bool {
        if !Self::passed(now, self.deadline) {
            return false;
        }
        self.retries += 1;
        if self.retries > STEP_RETRIES {
            self.reset_to_idle();
            return true;
        }
        resend(queue);
        self.arm(now);
        false
    }

    fn poll_short_info(
        &mut self,
        now: Instant<C>,
        queue: &mut CommandQueue,
        msg: Option<DecoderMessage>,
    ) -> Option<DccaEvent> {
        let Some(cand) = &mut self.candidate else {
            self.reset_to_idle();
            return None;
        };

        if let Some(msg) = msg {
            if msg.kind == ReplyKind::DccaShortInfo && msg.len >= 3 {
                let coded = u16::from_be_bytes([msg.data[0], msg.data[1]]) & 0x3FFF;
                cand.coded = coded;
                cand.wish = decode_wish(coded);

                self.state = LogonState::Assign;
                self.retries = 0;
                // The assignment packet goes out in the assign step
                // once the address is chosen.
                self.deadline = None;
                return None;
            }
        }

        let (vid, uid) = (cand.vid, cand.uid);
        if self.step_timeout(
            now,
            |q| {
                q.enqueue(dcca::select_short_info(vid, uid)).ok();
            },
            queue,
        ) {
            return Some(DccaEvent::Abandoned);
        }
        None
    }

    fn poll_assign(
        &mut self,
        now: Instant<C>,
        queue: &mut CommandQueue,
        dir: &mut dyn DecoderDirectory,
        msg: Option<DecoderMessage>,
    ) -> Option<DccaEvent> {
        let Some(cand) = &mut self.candidate else {
            self.reset_to_idle();
            return None;
        };

        // First entry: choose and send the assignment.
        if self.deadline.is_none() {
            let Some(adr) = Self::choose_address(cand.vid, cand.uid, cand.wish, dir) else {
                self.reset_to_idle();
                return Some(DccaEvent::Abandoned);
            };
            cand.adr = adr;
            let coded = encode_assignment(adr, cand.wish);
            queue
                .enqueue(dcca::logon_assign(cand.vid, cand.uid, coded))
                .ok();
            self.arm(now);
            return None;
        }

        if let Some(msg) = msg {
            let accepted = matches!(msg.kind, ReplyKind::Ack | ReplyKind::DccaState);
            if accepted {
                let (vid, uid, adr) = (cand.vid, cand.uid, cand.adr);

                dir.register_decoder(adr, LocoFormat::Dcc126, ConfigOrigin::DccA);
                dir.set_vid_uid(adr, vid, uid);
                let mut info = DccaInfo::default();
                info.requested_adr = cand.coded;
                dir.set_dcca_info(adr, &info);

                let changed = if msg.len > 0 { msg.data[0] } else { msg.param as u8 };
                if changed != 0 {
                    // Read the space bitmap, then every advertised
                    // space.
                    self.state = LogonState::DataSpace;
                    self.retries = 0;
                    self.space_retries = 0;
                    self.scan_at = 0;
                    self.spaces = 0;
                    self.start_space(now, queue, 1);
                } else {
                    self.state = LogonState::ClearChgFlags;
                    self.retries = 0;
                    queue
                        .enqueue(dcca::decoder_state(vid, uid, 0xFF))
                        .ok();
                    self.arm(now);
                }
                return Some(DccaEvent::Registered { adr, vid, uid });
            }
        }

        let (vid, uid, coded) = (cand.vid, cand.uid, encode_assignment(cand.adr, cand.wish));
        if self.step_timeout(
            now,
            |q| {
                q.enqueue(dcca::logon_assign(vid, uid, coded)).ok();
            },
            queue,
        ) {
            return Some(DccaEvent::Abandoned);
        }
        None
    }

    fn start_space(&mut self, now: Instant<C>, queue: &mut CommandQueue, space: u8) {
        let Some(cand) = &self.candidate else {
            return;
        };
        self.space_id = space;
        self.space_buf.clear();
        self.block = BlockState::Request;
        queue
            .enqueue(dcca::select_block(cand.vid, cand.uid, space))
            .ok();
        self.arm(now);
    }

    fn next_space(&mut self, now: Instant<C>, queue: &mut CommandQueue) -> Option<DccaEvent> {
        loop {
            if self.scan_at >= SCAN_SPACES.len() {
                let Some(cand) = &self.candidate else {
                    self.reset_to_idle();
                    return None;
                };
                let (vid, uid) = (cand.vid, cand.uid);
                self.state = LogonState::ClearChgFlags;
                self.retries = 0;
                queue.enqueue(dcca::decoder_state(vid, uid, 0xFF)).ok();
                self.arm(now);
                return None;
            }

            let space = SCAN_SPACES[self.scan_at];
            self.scan_at += 1;
            if self.spaces & (1 << space) != 0 {
                self.space_retries = 0;
                self.start_space(now, queue, space);
                return None;
            }
        }
    }

    fn space_complete(
        &mut self,
        now: Instant<C>,
        queue: &mut CommandQueue,
        dir: &mut dyn DecoderDirectory,
    ) -> Option<DccaEvent> {
        let ok = match self.space_buf.split_last() {
            Some((crc, data)) => dcca_crc(self.space_id, data) == *crc,
            None => false,
        };

        if !ok {
            self.space_retries += 1;
            if self.space_retries > SPACE_RETRIES {
                self.reset_to_idle();
                return Some(DccaEvent::Abandoned);
            }
            let space = self.space_id;
            self.start_space(now, queue, space);
            return None;
        }

        self.apply_space(dir);

        if self.space_id == 1 {
            self.spaces = self.space_buf.first().copied().unwrap_or(0);
        }
        self.next_space(now, queue)
    }

    fn apply_space(&mut self, dir: &mut dyn DecoderDirectory) {
        let Some(cand) = &self.candidate else {
            return;
        };
        let adr = cand.adr;
        let data = match self.space_buf.split_last() {
            Some((_, data)) => data,
            None => return,
        };

        match self.space_id {
            // Capabilities: the second byte advertises the function
            // count.
            0 => {
                if data.len() >= 2 {
                    dir.set_maxfunc(adr, data[1].min(127));
                }
            }
            1 => {}
            // Short GUI block: 8-byte short name, picture, symbol,
            // then one switch-type code per function.
            2 => {
                let mut info = DccaInfo::default();
                info.requested_adr = cand.coded;
                if data.len() >= 8 {
                    if let Ok(name) = str_from_padded(&data[..8]) {
                        push_str(&mut info.shortname, name);
                    }
                }
                if data.len() >= 9 {
                    info.picture = data[8] as u16;
                }
                if data.len() >= 10 {
                    info.symbol = data[9] & 0x7F;
                }
                dir.set_dcca_info(adr, &info);

                for (fnum, code) in data.iter().skip(10).enumerate() {
                    let fnum = fnum as u8;
                    dir.set_func_icon(adr, fnum, code & 0x7F);
                    let timing = if code & 0x80 != 0 {
                        FuncTiming::Momentary
                    } else {
                        FuncTiming::Toggle
                    };
                    dir.set_func_timing(adr, fnum, timing);
                }
            }
            // Function icons, one byte per function.
            4 => {
                for (fnum, icon) in data.iter().enumerate() {
                    dir.set_func_icon(adr, fnum as u8, icon & 0x7F);
                }
            }
            // Long name, then the user description.
            5 => {
                if let Ok(name) = str_from_padded(data) {
                    dir.set_name(adr, name);
                }
            }
            // Vendor, product, hardware and firmware strings,
            // zero-separated.
            6 => {
                let mut fields = data.split(|b| *b == 0).filter(|f| !f.is_empty());
                let mut info = DccaInfo::default();
                info.requested_adr = cand.coded;
                for (i, field) in (&mut fields).take(4).enumerate() {
                    if let Ok(text) = core::str::from_utf8(field) {
                        match i {
                            0 => push_str(&mut info.vendor, text),
                            1 => push_str(&mut info.product, text),
                            2 => push_str(&mut info.hw_version, text),
                            _ => push_str(&mut info.fw_version, text),
                        }
                    }
                }
                dir.set_dcca_info(adr, &info);
            }
            _ => {}
        }
    }

    fn poll_data_space(
        &mut self,
        now: Instant<C>,
        queue: &mut CommandQueue,
        dir: &mut dyn DecoderDirectory,
        msg: Option<DecoderMessage>,
    ) -> Option<DccaEvent> {
        if self.candidate.is_none() {
            self.reset_to_idle();
            return None;
        }

        if let Some(msg) = msg {
            match (self.block, msg.kind) {
                (BlockState::Request, ReplyKind::Ack) => {
                    self.block = BlockState::Start;
                    queue.enqueue(dcca::get_data_start()).ok();
                    self.arm(now);
                    return None;
                }
                (BlockState::Start | BlockState::Cont, ReplyKind::DccaBlock) => {
                    let fragment = msg.payload();
                    for byte in fragment {
                        if self.space_buf.push(*byte).is_err() {
                            break;
                        }
                    }

                    let block_done = fragment.len() < FRAGMENT_LEN
                        || self.space_buf.len() >= FULL_BLOCK_LEN
                        || self.space_buf.is_full();
                    if block_done {
                        return self.space_complete(now, queue, dir);
                    }

                    self.block = BlockState::Cont;
                    queue.enqueue(dcca::get_data_cont()).ok();
                    self.arm(now);
                    return None;
                }
                _ => {}
            }
        }

        let space = self.space_id;
        let resend: Option<(u8, u32)> = self.candidate.as_ref().map(|c| (c.vid, c.uid));
        let block = self.block;
        if self.step_timeout(
            now,
            |q| {
                match block {
                    BlockState::Request => {
                        if let Some((vid, uid)) = resend {
                            q.enqueue(dcca::select_block(vid, uid, space)).ok();
                        }
                    }
                    BlockState::Start => {
                        q.enqueue(dcca::get_data_start()).ok();
                    }
                    BlockState::Cont => {
                        q.enqueue(dcca::get_data_cont()).ok();
                    }
                };
            },
            queue,
        ) {
            return Some(DccaEvent::Abandoned);
        }
        None
    }

    fn poll_clear_flags(
        &mut self,
        now: Instant<C>,
        queue: &mut CommandQueue,
        msg: Option<DecoderMessage>,
    ) -> Option<DccaEvent> {
        let Some(cand) = &self.candidate else {
            self.reset_to_idle();
            return None;
        };

        if let Some(msg) = msg {
            if matches!(msg.kind, ReplyKind::Ack | ReplyKind::DccaState) {
                let adr = cand.adr;
                self.reset_to_idle();
                return Some(DccaEvent::ReadoutDone { adr });
            }
        }

        let (vid, uid) = (cand.vid, cand.uid);
        if self.step_timeout(
            now,
            |q| {
                q.enqueue(dcca::decoder_state(vid, uid, 0xFF)).ok();
            },
            queue,
        ) {
            return Some(DccaEvent::Abandoned);
        }
        None
    }
}

fn push_str<const N: usize>(dst: &mut String<N>, src: &str) {
    for ch in src.chars() {
        if dst.push(ch).is_err() {
            break;
        }
    }
}

/// A name field padded with zero bytes.
fn str_from_padded(data: &[u8]) -> Result<&str, core::str::Utf8Error> {
    let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
    core::str::from_utf8(&data[..end])
}

#[cfg(test)]
mod test {
    use super::*;
    use dcs_track::packet::PacketOp;
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

    /// Minimal in-memory decoder directory.
    #[derive(Default)]
    struct TestDir {
        locos: alloc::vec::Vec<(u16, u8, u32)>,
        names: alloc::vec::Vec<(u16, alloc::string::String)>,
    }

    impl DecoderDirectory for TestDir {
        fn find_by_vid_uid(&self, vid: u8, uid: u32) -> Option<u16> {
            if uid == 0 {
                return None;
            }
            self.locos
                .iter()
                .find(|(_, v, u)| *v == vid && *u == uid)
                .map(|(a, _, _)| *a)
        }

        fn loco_exists(&self, adr: u16) -> bool {
            self.locos.iter().any(|(a, _, _)| *a == adr)
        }

        fn allocate_free(&mut self, base: u16) -> Option<u16> {
            (base..0x3FFF).find(|a| !self.loco_exists(*a))
        }

        fn register_decoder(&mut self, adr: u16, _f: LocoFormat, _o: ConfigOrigin) -> bool {
            if !self.loco_exists(adr) {
                self.locos.push((adr, 0, 0));
            }
            true
        }

        fn set_vid_uid(&mut self, adr: u16, vid: u8, uid: u32) {
            if let Some(entry) = self.locos.iter_mut().find(|(a, _, _)| *a == adr) {
                entry.1 = vid;
                entry.2 = uid;
            }
        }

        fn set_name(&mut self, adr: u16, name: &str) {
            self.names.push((adr, name.into()));
        }

        fn set_maxfunc(&mut self, _adr: u16, _maxfunc: u8) {}
        fn set_func_icon(&mut self, _adr: u16, _fnum: u8, _icon: u8) {}
        fn set_func_timing(&mut self, _adr: u16, _fnum: u8, _t: FuncTiming) {}
        fn set_dcca_info(&mut self, _adr: u16, _info: &DccaInfo) {}
    }

    fn reply(kind: ReplyKind, payload: &[u8]) -> DecoderMessage {
        DecoderMessage::new(DecoderType::DccA, 0xFE, kind).with_payload(payload)
    }

    fn unique_reply(vid: u8, uid: u32) -> DecoderMessage {
        let b = uid.to_be_bytes();
        reply(ReplyKind::DccaUnique, &[0, vid, b[0], b[1], b[2], b[3]])
    }

    fn drain_ops(queue: &mut CommandQueue) -> alloc::vec::Vec<PacketOp> {
        let mut ops = alloc::vec::Vec::new();
        while let Some(p) = queue.dequeue::<TestClock>(None) {
            ops.push(p.op);
        }
        ops
    }

    #[test]
    fn test_wish_decoding() {
        assert_eq!(decode_wish(0x3803), AddressWish::ShortLoco(3));
        assert_eq!(decode_wish(0x0123), AddressWish::LongLoco(0x123));
        assert_eq!(decode_wish(0x3001), AddressWish::BasicAccessory(1));
        assert_eq!(decode_wish(0x2801), AddressWish::ExtAccessory(1));
        assert_eq!(decode_wish(0x3F01), AddressWish::FwUpdate);
    }

    #[test]
    fn test_assignment_reencoding() {
        assert_eq!(encode_assignment(3, AddressWish::ShortLoco(3)), 0x3803);
        assert_eq!(encode_assignment(1000, AddressWish::ShortLoco(3)), 1000);
        assert_eq!(encode_assignment(1000, AddressWish::LongLoco(1000)), 1000);
    }

    #[test]
    fn test_idle_sends_enable_rounds() {
        let mut svc: DccaService<TestClock> = DccaService::new(0xABCD, 1);
        let mut queue = CommandQueue::new();
        let mut dir = TestDir::default();

        svc.poll(at(0), &mut queue, &mut dir);
        assert_eq!(svc.state(), LogonState::LogonIdle);

        svc.set_enabled(true);
        svc.poll(at(1), &mut queue, &mut dir);
        assert_eq!(drain_ops(&mut queue), [PacketOp::DccaLogonEnableAll]);

        // Paced: nothing new before the period elapses.
        svc.poll(at(100), &mut queue, &mut dir);
        assert!(drain_ops(&mut queue).is_empty());
        svc.poll(at(400), &mut queue, &mut dir);
        assert_eq!(drain_ops(&mut queue), [PacketOp::DccaLogonEnableAll]);
    }

    #[test]
    fn test_full_logon_with_taken_wish() {
        let mut svc: DccaService<TestClock> = DccaService::new(0xABCD, 1);
        let mut queue = CommandQueue::new();
        let mut dir = TestDir::default();
        // Address 3 is taken by a different decoder.
        dir.locos.push((3, 9, 0xAAAA_AAAA));

        svc.set_enabled(true);
        svc.poll(at(0), &mut queue, &mut dir);
        svc.poll(at(1), &mut queue, &mut dir);
        drain_ops(&mut queue);

        // A decoder answers the enable round.
        svc.on_reply(unique_reply(0x04, 0x1234_5678));
        svc.poll(at(10), &mut queue, &mut dir);
        assert_eq!(svc.state(), LogonState::ShortInfo);
        assert_eq!(drain_ops(&mut queue), [PacketOp::DccaSelectShortInfo]);

        // Short info wishes for short address 3.
        svc.on_reply(reply(ReplyKind::DccaShortInfo, &[0x38, 0x03, 16, 0, 0, 0]));
        svc.poll(at(20), &mut queue, &mut dir);
        assert_eq!(svc.state(), LogonState::Assign);
        svc.poll(at(21), &mut queue, &mut dir);
        assert_eq!(drain_ops(&mut queue), [PacketOp::DccaLogonAssign]);

        // The taken wish forces a fresh address from 1000 up.
        svc.on_reply(reply(ReplyKind::DccaState, &[0x01]));
        let event = svc.poll(at(30), &mut queue, &mut dir);
        assert_eq!(
            event,
            Some(DccaEvent::Registered {
                adr: 1000,
                vid: 0x04,
                uid: 0x1234_5678
            })
        );
        assert_eq!(svc.state(), LogonState::DataSpace);
        assert_eq!(drain_ops(&mut queue), [PacketOp::DccaSelectBlock]);
        assert!(dir.loco_exists(1000));
    }

    #[test]
    fn test_known_uid_reuses_address() {
        let mut dir = TestDir::default();
        dir.locos.push((77, 0x04, 0x1234_5678));
        let chosen = DccaService::<TestClock>::choose_address(
            0x04,
            0x1234_5678,
            AddressWish::ShortLoco(3),
            &mut dir,
        );
        assert_eq!(chosen, Some(77));
    }

    #[test]
    fn test_free_wish_is_granted() {
        let mut dir = TestDir::default();
        let chosen = DccaService::<TestClock>::choose_address(
            0x04,
            0x1234_5678,
            AddressWish::ShortLoco(3),
            &mut dir,
        );
        assert_eq!(chosen, Some(3));
    }

    #[test]
    fn test_collision_enters_isolation() {
        let mut svc: DccaService<TestClock> = DccaService::new(1, 1);
        let mut queue = CommandQueue::new();
        let mut dir = TestDir::default();

        svc.set_enabled(true);
        svc.poll(at(0), &mut queue, &mut dir);
        svc.on_reply(reply(ReplyKind::Collision, &[]));
        let event = svc.poll(at(1), &mut queue, &mut dir);

        assert_eq!(event, Some(DccaEvent::Abandoned));
        assert_eq!(svc.state(), LogonState::Isolation);

        // Isolation hammers enable rounds with bounded spacing.
        drain_ops(&mut queue);
        svc.poll(at(2), &mut queue, &mut dir);
        assert_eq!(drain_ops(&mut queue), [PacketOp::DccaLogonEnableAll]);
        svc.poll(at(3), &mut queue, &mut dir);
        assert!(drain_ops(&mut queue).is_empty());
        svc.poll(at(50), &mut queue, &mut dir);
        assert_eq!(drain_ops(&mut queue), [PacketOp::DccaLogonEnableAll]);
    }

    #[test]
    fn test_short_info_timeout_retries_then_idles() {
        let mut svc: DccaService<TestClock> = DccaService::new(1, 1);
        let mut queue = CommandQueue::new();
        let mut dir = TestDir::default();

        svc.set_enabled(true);
        svc.poll(at(0), &mut queue, &mut dir);
        svc.on_reply(unique_reply(0x04, 0x1234_5678));
        svc.poll(at(1), &mut queue, &mut dir);
        drain_ops(&mut queue);

        // Let every retry time out.
        let mut t = 1;
        let mut abandoned = false;
        for _ in 0..(STEP_RETRIES as u64 + 2) {
            t += 1001;
            if svc.poll(at(t), &mut queue, &mut dir) == Some(DccaEvent::Abandoned) {
                abandoned = true;
                break;
            }
        }
        assert!(abandoned);
        assert_eq!(svc.state(), LogonState::LogonIdle);
    }

    #[test]
    fn test_data_space_block_readout() {
        let mut svc: DccaService<TestClock> = DccaService::new(1, 1);
        let mut queue = CommandQueue::new();
        let mut dir = TestDir::default();

        // Walk to the data-space scan.
        svc.set_enabled(true);
        svc.poll(at(0), &mut queue, &mut dir);
        svc.on_reply(unique_reply(0x04, 0x1234_5678));
        svc.poll(at(1), &mut queue, &mut dir);
        svc.on_reply(reply(ReplyKind::DccaShortInfo, &[0x38, 0x03, 16, 0, 0, 0]));
        svc.poll(at(2), &mut queue, &mut dir);
        svc.poll(at(3), &mut queue, &mut dir);
        svc.on_reply(reply(ReplyKind::DccaState, &[0x01]));
        svc.poll(at(4), &mut queue, &mut dir);
        drain_ops(&mut queue);

        // Space 1 (the bitmap): selected, started, one short block
        // advertising space 5 only.
        svc.on_reply(reply(ReplyKind::Ack, &[]));
        svc.poll(at(5), &mut queue, &mut dir);
        assert_eq!(drain_ops(&mut queue), [PacketOp::DccaGetDataStart]);

        let bitmap: u8 = 1 << 5;
        let crc = dcca_crc(1, &[bitmap]);
        svc.on_reply(reply(ReplyKind::DccaBlock, &[bitmap, crc]));
        svc.poll(at(6), &mut queue, &mut dir);
        // Space 5 is selected next.
        assert_eq!(drain_ops(&mut queue), [PacketOp::DccaSelectBlock]);

        // Space 5: the long name, in one short block.
        svc.on_reply(reply(ReplyKind::Ack, &[]));
        svc.poll(at(7), &mut queue, &mut dir);
        drain_ops(&mut queue);

        let name = b"ICE\0";
        let crc = dcca_crc(5, name);
        let mut block: alloc::vec::Vec<u8> = name.to_vec();
        block.push(crc);
        svc.on_reply(reply(ReplyKind::DccaBlock, &block));
        svc.poll(at(8), &mut queue, &mut dir);

        // All advertised spaces read: the change flags get cleared.
        assert_eq!(svc.state(), LogonState::ClearChgFlags);
        assert_eq!(drain_ops(&mut queue), [PacketOp::DccaDecoderState]);
        assert!(dir.names.iter().any(|(a, n)| *a == 3 && n == "ICE"));

        svc.on_reply(reply(ReplyKind::Ack, &[]));
        let event = svc.poll(at(9), &mut queue, &mut dir);
        assert_eq!(event, Some(DccaEvent::ReadoutDone { adr: 3 }));
        assert_eq!(svc.state(), LogonState::LogonIdle);
    }

    #[test]
    fn test_bad_block_crc_retries_space() {
        let mut svc: DccaService<TestClock> = DccaService::new(1, 1);
        let mut queue = CommandQueue::new();
        let mut dir = TestDir::default();

        svc.set_enabled(true);
        svc.poll(at(0), &mut queue, &mut dir);
        svc.on_reply(unique_reply(0x04, 0x1234_5678));
        svc.poll(at(1), &mut queue, &mut dir);
        svc.on_reply(reply(ReplyKind::DccaShortInfo, &[0x38, 0x03, 16, 0, 0, 0]));
        svc.poll(at(2), &mut queue, &mut dir);
        svc.poll(at(3), &mut queue, &mut dir);
        svc.on_reply(reply(ReplyKind::DccaState, &[0x01]));
        svc.poll(at(4), &mut queue, &mut dir);
        svc.on_reply(reply(ReplyKind::Ack, &[]));
        svc.poll(at(5), &mut queue, &mut dir);
        drain_ops(&mut queue);

        // Corrupt bitmap block: the whole space restarts.
        svc.on_reply(reply(ReplyKind::DccaBlock, &[0x20, 0xBA, 0xD0]));
        svc.poll(at(6), &mut queue, &mut dir);
        assert_eq!(svc.state(), LogonState::DataSpace);
        assert_eq!(drain_ops(&mut queue), [PacketOp::DccaSelectBlock]);
    }
}
