#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_code)]

//! The station core: every subsystem of the track-signal path behind
//! one value and one control-surface API.
//!
//! Control surfaces (front ends, protocol adapters) call the command
//! methods; the firmware wires three entry points to the hardware:
//! [`Station::isr_step`] from the microsecond timer,
//! [`Station::railcom_byte`] from the cutout UART and
//! [`Station::poll`] from the scheduler loop.

#[cfg(test)]
extern crate alloc;

use core::cell::RefCell;

use embedded_storage::Storage as StorageDriver;
use embedded_time::duration::Milliseconds;
use embedded_time::{Clock, Instant};
use heapless::Vec;
use rclite::Rc;

use dcs_core::decoder::ConsistError;
use dcs_core::error::Error;
use dcs_core::event::{Event, EventSink};
use dcs_core::format::{FormatFlags, LocoFormat, SysFlags, TurnoutFormat};
use dcs_core::message::{DecoderType, ReplyKind};
use dcs_core::model_time::{ModelDate, ModelTime};
use dcs_core::speed::Speed;
use dcs_core::telemetry::Telemetry;

use dcs_persistence::config_store::ConfigFile;
use dcs_persistence::{PersistentDb, PersistentStorage};

use dcs_svc_dcca::{DccaEvent, DccaService};

use dcs_track::fmtcfg::FormatConfig;
use dcs_track::mode::{ModeMachine, TrackMode};
use dcs_track::m3reply::M3ReplyReceiver;
use dcs_track::packet::construct;
use dcs_track::packet::ReadbackKind;
use dcs_track::phy::{PowerStage, TrackOutput};
use dcs_track::prog::{ProgEngine, ProgOp};
use dcs_track::queue::CommandQueue;
use dcs_track::railcom::{RailComReceiver, Window};
use dcs_track::refresh::RefreshList;
use dcs_track::router::{Listener, ReplyFilter, ReplyFn, ReplyRouter};
use dcs_track::signal::{Notify, SignalGenerator, Step};
use dcs_track::wire;

/// Listener slots owned by the station's router.
pub const ROUTER_SLOTS: usize = 16;
/// Energized turnout coils tracked at once.
const MAX_ENERGIZED: usize = 16;
/// Timed function switch-offs tracked at once.
const MAX_TIMED_FUNCS: usize = 8;
/// Feedback nodes remembered for new-node detection.
const MAX_FB_NODES: usize = 32;

/// Slow housekeeping period.
const SLOW_TICK_MS: u32 = 100;
/// A turnout coil is released this long after it was energized.
const TURNOUT_ENERGIZE_MS: u32 = 200;
/// Outer timeout of a programming-on-main readout.
const POM_TIMEOUT_MS: u32 = 2_000;
/// M3 beacon period while the format is enabled.
const BEACON_PERIOD_MS: u32 = 500;
/// Main-track current that counts as a short.
const SHORT_LIMIT_MA: u16 = 4_500;
/// Temperature that forces the over-temperature mode.
const OVERTEMP_C: i8 = 85;

pub type ListenerSlots<C> = [Option<Listener<C>>; ROUTER_SLOTS];

struct Energized<C: Clock> {
    adr: u16,
    dir: bool,
    since: Instant<C>,
}

struct TimedOff<C: Clock> {
    adr: u16,
    fnum: u8,
    at: Instant<C>,
}

/// The assembled command-station core.
pub struct Station<'r, C: Clock, S: StorageDriver, E: EventSink> {
    db: PersistentDb<C, S>,
    config: ConfigFile,
    fmtcfg: FormatConfig,
    queue: CommandQueue,
    refresh: RefreshList<C>,
    signal: SignalGenerator,
    railcom: RailComReceiver,
    m3rx: M3ReplyReceiver,
    router: ReplyRouter<'r, C>,
    mode: ModeMachine<C>,
    prog: ProgEngine<C>,
    dcca: DccaService<C>,
    sink: E,

    telemetry: Telemetry,
    cutout_window: Option<Window>,
    energized: Vec<Energized<C>, MAX_ENERGIZED>,
    timed_offs: Vec<TimedOff<C>, MAX_TIMED_FUNCS>,
    fb_nodes: Vec<u8, MAX_FB_NODES>,
    slow_at: Option<Instant<C>>,

    model_time: ModelTime,
    model_date: ModelDate,
    model_minute_at: Option<Instant<C>>,

    m3_uid: u32,
    m3_counter: u16,
    beacon_at: Option<Instant<C>>,

    prog_result: Option<Result<(), Error>>,
}

impl<'r, C: Clock, S: StorageDriver, E: EventSink> Station<'r, C, S, E> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        driver: Rc<RefCell<S>>,
        listener_slots: &'r mut ListenerSlots<C>,
        sink: E,
        station_uid: u32,
        now: Instant<C>,
    ) -> Self {
        let config = ConfigFile::default();
        let fmtcfg = FormatConfig::default();

        Self {
            db: PersistentDb::new(LocoFormat::Dcc28, driver, 0, now),
            refresh: RefreshList::new(config.purge_minutes),
            config,
            fmtcfg,
            queue: CommandQueue::new(),
            signal: SignalGenerator::new(),
            railcom: RailComReceiver::new(),
            m3rx: M3ReplyReceiver::new(),
            router: ReplyRouter::new(&mut listener_slots[..]),
            mode: ModeMachine::new(16_000),
            prog: ProgEngine::new(),
            dcca: DccaService::new((station_uid & 0xFFFF) as u16, 1),
            sink,
            telemetry: Telemetry::default(),
            cutout_window: None,
            energized: Vec::new(),
            timed_offs: Vec::new(),
            fb_nodes: Vec::new(),
            slow_at: None,
            model_time: ModelTime::default(),
            model_date: ModelDate::default(),
            model_minute_at: None,
            m3_uid: station_uid,
            m3_counter: 0,
            beacon_at: None,
            prog_result: None,
        }
    }

    /// Load the persisted state and enter the configured start mode.
    pub fn boot(&mut self, config_ini: &[u8], now: Instant<C>) {
        self.config.load(config_ini);
        self.apply_config();
        self.db.load();
        self.db.set_now(now);

        let start = if self.config.sys_flags.contains(SysFlags::START_STATE_GO) {
            TrackMode::Go
        } else {
            TrackMode::Stop
        };
        self.mode.request(start);
        self.dcca
            .set_enabled(self.fmtcfg.flags.contains(FormatFlags::DCCA));
    }

    fn apply_config(&mut self) {
        self.fmtcfg.mm_gap_short_us = self.config.mm_short_us;
        self.fmtcfg.dcc_half_one_us = self.config.dcc_short_us;
        self.fmtcfg.mm_long_pause = self
            .config
            .sys_flags
            .contains(SysFlags::LONG_MM_PAUSE);
        self.refresh = RefreshList::new(self.config.purge_minutes);
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn format_config(&self) -> &FormatConfig {
        &self.fmtcfg
    }

    pub fn db(&self) -> &PersistentDb<C, S> {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut PersistentDb<C, S> {
        &mut self.db
    }

    pub fn mode(&self) -> TrackMode {
        self.mode.mode()
    }

    /// Queue empty and the signal generator's ring drained.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.signal.is_drained()
    }

    /// Change a turnout's output format.
    pub fn set_turnout_format(&mut self, adr: u16, format: TurnoutFormat) -> Result<(), Error> {
        self.db
            .db_mut()
            .set_turnout_format(adr, format)
            .map_err(|_| Error::Internal)?;
        self.sink.notify(Event::AccFmt);
        Ok(())
    }

    // ---- drive commands ---------------------------------------------

    fn loco_format(&mut self, adr: u16) -> Result<LocoFormat, Error> {
        self.db
            .db_mut()
            .get_or_create(adr)
            .map(|def| def.format)
            .map_err(|_| Error::Internal)
    }

    fn command_speed(&mut self, adr: u16, speed: Speed, now: Instant<C>) -> Result<(), Error> {
        let format = self.loco_format(adr)?;
        let live = self
            .refresh
            .touch(adr, format, now)
            .ok_or(Error::Internal)?;

        // Motorola I decoders turn with a dedicated pulse.
        let needs_pulse =
            format == LocoFormat::Mm1_14 && live.speed.is_forward() != speed.is_forward();

        live.speed = speed.clamped(format.speed_steps());
        let funcs = live.funcs;
        let clamped = live.speed;

        if needs_pulse {
            self.queue
                .enqueue(construct::loco::mm1_direction_pulse(adr))
                .map_err(|_| Error::Internal)?;
        }

        self.queue
            .enqueue(construct::loco::speed(adr, format, clamped, &funcs))
            .map_err(|_| Error::Internal)?;

        self.sink.notify(Event::LocoSpeed {
            adr,
            speed: clamped,
        });
        Ok(())
    }

    /// Set the speed of a loco, or of its whole consist.
    ///
    /// Commands keep their per-address order through the queue; a
    /// consist member receives the command relative to its own
    /// orientation.
    pub fn set_speed(&mut self, adr: u16, speed: Speed, now: Instant<C>) -> Result<(), Error> {
        let consist = self.db.db().consist_of(adr).cloned();

        match consist {
            Some(consist) => {
                let base_reversed = consist.is_reversed(adr);
                for &member in consist.members.iter() {
                    let madr = member.unsigned_abs();
                    let mspeed = if (member < 0) != base_reversed {
                        speed.reversed()
                    } else {
                        speed
                    };
                    self.command_speed(madr, mspeed, now)?;
                }
                Ok(())
            }
            None => self.command_speed(adr, speed, now),
        }
    }

    /// Switch one loco function.
    pub fn set_function(
        &mut self,
        adr: u16,
        fnum: u8,
        on: bool,
        now: Instant<C>,
    ) -> Result<(), Error> {
        let format = self.loco_format(adr)?;
        if fnum > format.max_func() {
            return Err(Error::CvUnsupported);
        }

        let live = self
            .refresh
            .touch(adr, format, now)
            .ok_or(Error::Internal)?;

        let word = (fnum / 32) as usize % 4;
        let mask = 1u32 << (fnum % 32);
        live.funcs[word] = dcs_core::mask_and_insert_value!(
            live.funcs[word],
            if on { mask } else { 0 },
            mask,
            u32
        );
        let funcs = live.funcs;
        let speed = live.speed;

        if let Some(packet) = construct::loco::function(adr, format, fnum, &funcs, speed) {
            self.queue.enqueue(packet).map_err(|_| Error::Internal)?;
        }

        // Timed functions fall back off on the slow tick.
        if on {
            if let Some(dcs_core::func::FuncInfo {
                timing: dcs_core::func::FuncTiming::Timed(tenths),
                ..
            }) = self.db.lookup(adr).and_then(|def| def.func_info(fnum)).copied()
            {
                let at = now
                    .checked_add(Milliseconds(tenths as u32 * 100))
                    .unwrap_or(now);
                self.timed_offs.push(TimedOff { adr, fnum, at }).ok();
            }
        }

        self.sink.notify(Event::LocoFunction { adr, fnum, on });
        Ok(())
    }

    /// Toggle a turnout output.
    pub fn switch_turnout(&mut self, adr: u16, dir: bool, now: Instant<C>) -> Result<(), Error> {
        let format = self
            .db
            .db_mut()
            .turnout_or_create(adr)
            .map(|def| def.format)
            .map_err(|_| Error::Internal)?;

        let accessory = dcs_core::address::AccessoryAddress::new(adr);
        match format {
            TurnoutFormat::Mm => {
                self.queue
                    .enqueue(construct::accessory::mm_turnout(accessory, dir, true))
                    .map_err(|_| Error::Internal)?;
            }
            TurnoutFormat::Dcc => {
                self.queue
                    .enqueue(construct::accessory::dcc_accessory(accessory, dir, true))
                    .map_err(|_| Error::Internal)?;
            }
            // BiDiB outputs switch on their own node; only the event
            // leaves the core.
            TurnoutFormat::BiDiB => {}
        }

        self.energized.retain(|e| e.adr != adr);
        self.energized
            .push(Energized {
                adr,
                dir,
                since: now,
            })
            .ok();

        self.sink.notify(Event::Turnout {
            adr,
            dir,
            energized: true,
        });
        Ok(())
    }

    /// Drive a DCC extended accessory to an aspect.
    pub fn set_ext_accessory(&mut self, adr: u16, aspect: u8) -> Result<(), Error> {
        self.db
            .db_mut()
            .ext_accessory_or_create(adr)
            .map_err(|_| Error::Internal)?;
        self.queue
            .enqueue(construct::accessory::dcc_ext_accessory(
                dcs_core::address::AccessoryAddress::new(adr),
                aspect,
            ))
            .map_err(|_| Error::Internal)
    }

    // ---- consists ----------------------------------------------------

    pub fn consist_couple(&mut self, members: &[i16], now: Instant<C>) -> Result<(), ConsistError> {
        for &m in members {
            let adr = m.unsigned_abs();
            let format = self
                .db
                .db_mut()
                .get_or_create(adr)
                .map(|d| d.format)
                .map_err(|_| ConsistError::NotFound)?;
            self.refresh.touch(adr, format, now);
        }

        self.db.db_mut().consist_couple(members)?;
        self.refresh.link_consist(members);
        self.sink.notify(Event::Consist {
            adr: members[0].unsigned_abs(),
        });
        Ok(())
    }

    pub fn consist_dissolve(&mut self, adr: u16) -> Result<(), ConsistError> {
        let consist = self.db.db_mut().consist_dissolve(adr)?;
        self.refresh.unlink_consist(&consist.members);
        self.sink.notify(Event::Consist { adr });
        Ok(())
    }

    /// Detach one member; a two-member consist dissolves entirely.
    pub fn consist_remove(&mut self, adr: u16) -> Result<(), ConsistError> {
        let before = self.db.db_mut().consist_remove(adr)?;
        self.refresh.unlink_consist(&before.members);
        if let Some(rest) = self.db.db().consist_of(before.members[0].unsigned_abs()) {
            let members: Vec<i16, { dcs_core::decoder::MAX_CONSISTLENGTH }> =
                rest.members.iter().copied().collect();
            self.refresh.link_consist(&members);
        }
        self.sink.notify(Event::Consist { adr });
        Ok(())
    }

    // ---- CV access ---------------------------------------------------

    /// Programming-on-main CV read.
    ///
    /// The answer (or a synthesised timeout) reaches `f` through the
    /// reply router.
    pub fn pom_read(
        &mut self,
        adr: u16,
        cv: u16,
        f: ReplyFn,
        ctx: usize,
        now: Instant<C>,
    ) -> Result<(), Error> {
        let deadline = now.checked_add(Milliseconds(POM_TIMEOUT_MS)).unwrap_or(now);
        self.router
            .register(
                ReplyFilter::exact(DecoderType::DccMobile, adr, ReplyKind::Pom),
                f,
                ctx,
                Some(deadline),
            )
            .map_err(|_| Error::Internal)?;

        self.queue
            .enqueue(construct::cv::pom_read(adr, cv, self.fmtcfg.pom_repeat))
            .map_err(|_| Error::Internal)
    }

    /// Programming-on-main CV write with read-back verification.
    pub fn pom_write(
        &mut self,
        adr: u16,
        cv: u16,
        value: u8,
        f: ReplyFn,
        ctx: usize,
        now: Instant<C>,
    ) -> Result<(), Error> {
        let deadline = now.checked_add(Milliseconds(POM_TIMEOUT_MS)).unwrap_or(now);
        self.router
            .register(
                ReplyFilter::exact(DecoderType::DccMobile, adr, ReplyKind::Pom),
                f,
                ctx,
                Some(deadline),
            )
            .map_err(|_| Error::Internal)?;

        self.queue
            .enqueue(construct::cv::pom_write(
                adr,
                cv,
                value,
                self.fmtcfg.pom_repeat,
            ))
            .map_err(|_| Error::Internal)
    }

    /// M3 configuration read; the decoder answers in the reply window.
    pub fn m3_read_cv(
        &mut self,
        adr: u16,
        cv: u16,
        index: u8,
        f: ReplyFn,
        ctx: usize,
        now: Instant<C>,
    ) -> Result<(), Error> {
        let deadline = now.checked_add(Milliseconds(POM_TIMEOUT_MS)).unwrap_or(now);
        self.router
            .register(
                ReplyFilter::exact(DecoderType::M3, adr, ReplyKind::M3Data),
                f,
                ctx,
                Some(deadline),
            )
            .map_err(|_| Error::Internal)?;

        self.queue
            .enqueue(construct::m3::cv_read(adr, cv, index))
            .map_err(|_| Error::Internal)
    }

    pub fn m3_write_cv(&mut self, adr: u16, cv: u16, index: u8, value: u8) -> Result<(), Error> {
        self.queue
            .enqueue(construct::m3::cv_write(adr, cv, index, value))
            .map_err(|_| Error::Internal)
    }

    /// Start a direct-mode programming-track operation.
    ///
    /// The result arrives through [`Station::take_prog_result`].
    pub fn prog_start(&mut self, op: ProgOp) -> Result<(), Error> {
        self.prog.start(op, &mut self.mode)
    }

    pub fn take_prog_result(&mut self) -> Option<Result<(), Error>> {
        self.prog_result.take()
    }

    // ---- mode and environment ---------------------------------------

    /// Request a track-mode change; the transition completes in
    /// `poll`.
    pub fn request_mode(&mut self, mode: TrackMode) {
        if !mode.is_powered() {
            // Queued commands are dropped, in-flight buffers finish.
            self.queue.flush();
        }
        self.mode.request(mode);
    }

    /// Fresh power-stage measurements; short and over-temperature
    /// trips run here.
    pub fn set_telemetry(&mut self, telemetry: Telemetry) {
        let prev = self.telemetry;
        self.telemetry = telemetry;

        if prev.track_ma != telemetry.track_ma || prev.prog_ma != telemetry.prog_ma {
            self.sink.notify(Event::Current {
                main_ma: telemetry.track_ma,
                prog_ma: telemetry.prog_ma,
            });
        }

        if self.mode.mode().is_powered() {
            if telemetry.track_ma >= SHORT_LIMIT_MA {
                self.queue.flush();
                self.mode.request(TrackMode::Short);
            } else if telemetry.temp_c >= OVERTEMP_C {
                self.queue.flush();
                self.mode.request(TrackMode::OverTemp);
            }
        }
    }

    /// Feedback bus input from an external bus master.
    pub fn feedback(&mut self, node: u8, port: u16, on: bool) {
        if !self.fb_nodes.contains(&node) {
            self.fb_nodes.push(node).ok();
            self.sink.notify(Event::FbNew { node });
        }
        self.sink.notify(Event::Feedback { node, port, on });
    }

    pub fn set_model_time(&mut self, time: ModelTime, date: ModelDate) {
        self.model_time = time;
        self.model_date = date;
        self.queue
            .enqueue(construct::time::model_time(time))
            .ok();
        self.queue
            .enqueue(construct::time::model_date(date))
            .ok();
        self.sink.notify(Event::ModelTime { time });
    }

    pub fn model_clock(&self) -> (ModelTime, ModelDate) {
        (self.model_time, self.model_date)
    }

    /// Enable or disable the automatic-logon rounds.
    pub fn set_dcca_enabled(&mut self, enabled: bool) {
        self.fmtcfg.flags.set(FormatFlags::DCCA, enabled);
        self.dcca.set_enabled(enabled);
    }

    // ---- hardware entry points --------------------------------------

    /// One microsecond-timer interrupt.
    pub fn isr_step(&mut self, out: &mut impl TrackOutput) -> Step {
        let step = self.signal.isr_step(out);

        match step.notify {
            Notify::CutoutOpenW1 => self.cutout_window = Some(Window::W1),
            Notify::CutoutOpenW2 => self.cutout_window = Some(Window::W2),
            Notify::CutoutClose => {
                self.cutout_window = None;
                if let Some(buf) = self.signal.current_mut() {
                    self.railcom.window_closed(buf, &mut self.router);
                }
            }
            _ => {}
        }

        step
    }

    /// One byte from the RailCom UART during an open cutout.
    pub fn railcom_byte(&mut self, raw: u8) {
        if let Some(window) = self.cutout_window {
            self.railcom.byte(window, raw);
        }
    }

    /// One sampled M3 reply slot.
    pub fn m3_sample(&mut self, present: bool) {
        self.m3rx.slot(present);
    }

    // ---- the scheduler round ----------------------------------------

    /// One scheduler round: mode machine, encoder pump, read-back
    /// finalisation, reply routing, services and housekeeping.
    pub fn poll(&mut self, now: Instant<C>, power: &mut impl PowerStage) {
        if let Some(mode) = self.mode.poll(now, &self.signal, power) {
            self.sink.notify(Event::SysStatus { mode: mode.into() });
        }

        self.pump_encoder();
        self.finalize_buffers();

        // Route replies; co-located services tap the stream.
        let dcca = &mut self.dcca;
        let sink = &mut self.sink;
        self.router.poll_with(now, |msg| {
            if msg.dectype == DecoderType::DccA {
                dcca.on_reply(*msg);
            }
            if msg.kind != ReplyKind::Timeout {
                sink.notify(Event::RailCom { adr: msg.adr });
            }
        });

        if let Some(event) = self.dcca.poll(now, &mut self.queue, self.db.db_mut()) {
            match event {
                DccaEvent::Registered { adr, .. } => {
                    self.sink.notify(Event::LocoDb);
                    self.sink.notify(Event::LocoParameter { adr });
                }
                DccaEvent::ReadoutDone { adr } => {
                    self.sink.notify(Event::LocoParameter { adr });
                }
                DccaEvent::Abandoned => {}
            }
        }

        if let Some(result) = self.prog.poll(
            now,
            &mut self.mode,
            &mut self.queue,
            &self.signal,
            &self.telemetry,
            &self.fmtcfg,
        ) {
            self.prog_result = Some(result);
            self.sink.notify(Event::LogMsg);
        }

        if Self::due(now, &mut self.slow_at, SLOW_TICK_MS) {
            self.slow_tick(now);
        }
    }

    fn due(now: Instant<C>, slot: &mut Option<Instant<C>>, period_ms: u32) -> bool {
        match slot {
            Some(at) if now.checked_duration_since(at).is_none() => false,
            _ => {
                *slot = now.checked_add(Milliseconds(period_ms));
                true
            }
        }
    }

    fn pump_encoder(&mut self) {
        if !self.mode.mode().is_powered() || self.mode.is_busy() {
            return;
        }

        let service_mode = self.mode.mode().is_prog();
        let allow_refresh = self.mode.mode() == TrackMode::Go;

        while self.signal.free() > 0 {
            let refresh = if allow_refresh {
                Some(&mut self.refresh)
            } else {
                None
            };
            let Some(packet) = self.queue.dequeue(refresh) else {
                break;
            };

            // The programming track carries only service commands.
            if packet.op.is_service_mode() != service_mode {
                continue;
            }

            match wire::encode(&packet, &self.fmtcfg) {
                Ok(buf) => {
                    if self.signal.offer(buf).is_err() {
                        break;
                    }
                }
                Err(_) => self.sink.notify(Event::LogMsg),
            }
        }
    }

    fn finalize_buffers(&mut self) {
        while let Some(mut buf) = self.signal.take_finished() {
            match buf.readback.kind {
                ReadbackKind::M3Bin | ReadbackKind::M3Data => {
                    self.m3rx.window_done(&mut buf, &mut self.router);
                }
                ReadbackKind::Pom | ReadbackKind::PomWriteVerify | ReadbackKind::Xpom => {
                    self.railcom.finalize(&buf, &mut self.router);
                }
                _ => {}
            }
        }
    }

    fn slow_tick(&mut self, now: Instant<C>) {
        // Stale live locos fall off the refresh list.
        for adr in self.refresh.purge(now) {
            self.sink.notify(Event::LocoDb);
            let _ = adr;
        }

        // Turnout coils are released after their energize interval.
        let mut released: Vec<(u16, bool), MAX_ENERGIZED> = Vec::new();
        self.energized.retain(|e| {
            let deadline = e
                .since
                .checked_add(Milliseconds(TURNOUT_ENERGIZE_MS))
                .unwrap_or(e.since);
            let over = now.checked_duration_since(&deadline).is_some();
            if over {
                released.push((e.adr, e.dir)).ok();
            }
            !over
        });
        for (adr, dir) in released {
            let accessory = dcs_core::address::AccessoryAddress::new(adr);
            let packet = match self.db.db().turnout(adr).map(|t| t.format) {
                Some(TurnoutFormat::Mm) => {
                    Some(construct::accessory::mm_turnout(accessory, dir, false))
                }
                Some(TurnoutFormat::Dcc) => {
                    Some(construct::accessory::dcc_accessory(accessory, dir, false))
                }
                _ => None,
            };
            if let Some(packet) = packet {
                self.queue.enqueue(packet).ok();
            }
            self.sink.notify(Event::Turnout {
                adr,
                dir,
                energized: false,
            });
        }

        // Timed functions switch back off.
        let mut off_due: Vec<(u16, u8), MAX_TIMED_FUNCS> = Vec::new();
        self.timed_offs.retain(|t| {
            let due = now.checked_duration_since(&t.at).is_some();
            if due {
                off_due.push((t.adr, t.fnum)).ok();
            }
            !due
        });
        for (adr, fnum) in off_due {
            let _ = self.set_function(adr, fnum, false, now);
        }

        // Model clock.
        if self.model_time.rate > 0 {
            let interval = 60_000u32 / self.model_time.rate.max(1) as u32;
            if Self::due(now, &mut self.model_minute_at, interval) {
                self.model_time.tick_minute();
                self.queue
                    .enqueue(construct::time::model_time(self.model_time))
                    .ok();
                self.sink.notify(Event::ModelTime {
                    time: self.model_time,
                });
            }
        }

        // M3 beacon keeps registered decoders quiet.
        if self.fmtcfg.flags.contains(FormatFlags::M3)
            && self.mode.mode() == TrackMode::Go
            && Self::due(now, &mut self.beacon_at, BEACON_PERIOD_MS)
        {
            self.queue
                .enqueue(construct::m3::beacon(self.m3_uid, self.m3_counter))
                .ok();
        }

        // The debounced store pass.
        self.db.set_now(now);
        self.db.flush();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use dcs_track::router::ListenerAction;
    use dcs_core::message::DecoderMessage;
    use core::sync::atomic::{AtomicU32, Ordering};
    use embedded_time::rate::Fraction;

    /// Sink that records every event for inspection.
    #[derive(Debug, Default)]
    struct CaptureSink {
        events: alloc::vec::Vec<Event>,
    }

    impl EventSink for CaptureSink {
        fn notify(&mut self, event: Event) {
            self.events.push(event);
        }
    }

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

    struct MemStorage {
        data: alloc::vec::Vec<u8>,
    }

    impl embedded_storage::ReadStorage for MemStorage {
        type Error = ();

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), ()> {
            let offset = offset as usize;
            bytes.copy_from_slice(&self.data[offset..offset + bytes.len()]);
            Ok(())
        }

        fn capacity(&self) -> usize {
            self.data.len()
        }
    }

    impl StorageDriver for MemStorage {
        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), ()> {
            let offset = offset as usize;
            self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct TestOutput;

    impl TrackOutput for TestOutput {
        fn set_level(&mut self, _high: bool) {}
        fn cutout(&mut self, _on: bool) {}
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

    fn driver() -> Rc<RefCell<MemStorage>> {
        Rc::new(RefCell::new(MemStorage {
            data: alloc::vec![0u8; dcs_persistence::STORE_IMAGE_BYTES],
        }))
    }

    fn powered_station<'r>(
        slots: &'r mut ListenerSlots<TestClock>,
    ) -> (Station<'r, TestClock, MemStorage, CaptureSink>, TestPower) {
        let mut station = Station::new(driver(), slots, CaptureSink::default(), 0xDEAD_BEEF, at(0));
        let mut power = TestPower::default();

        station.boot(b"sysflags=80\n", at(0));
        let mut out = TestOutput;
        for ms in 0..2_000 {
            station.poll(at(ms), &mut power);
            // Stand-in for the hardware timer draining the signal.
            for _ in 0..8 {
                station.isr_step(&mut out);
            }
        }
        assert_eq!(station.mode(), TrackMode::Go);
        (station, power)
    }

    #[test]
    fn test_boot_start_state() {
        let mut slots: ListenerSlots<TestClock> = Default::default();
        let (station, _) = powered_station(&mut slots);
        assert!(station
            .db()
            .db()
            .lookup(0)
            .is_some());
    }

    #[test]
    fn test_set_speed_reaches_wire() {
        let mut slots: ListenerSlots<TestClock> = Default::default();
        let (mut station, mut power) = powered_station(&mut slots);

        station
            .set_speed(3, Speed::new(14, true), at(2_000))
            .unwrap();
        station.poll(at(2_001), &mut power);

        // The command is on its way to the signal generator.
        assert!(!station.signal.is_drained());
        assert!(station
            .sink
            .events
            .iter()
            .any(|e| matches!(e, Event::LocoSpeed { adr: 3, .. })));
    }

    #[test]
    fn test_consist_speed_fans_out() {
        let mut slots: ListenerSlots<TestClock> = Default::default();
        let (mut station, _) = powered_station(&mut slots);

        for adr in [5u16, 7] {
            station.db_mut().db_mut().get_or_create(adr).unwrap();
            station
                .db_mut()
                .db_mut()
                .set_format(adr, LocoFormat::Mm2_27b)
                .unwrap();
        }
        station.consist_couple(&[5, -7], at(2_000)).unwrap();

        station
            .set_speed(5, Speed::new(9, true), at(2_001))
            .unwrap();

        // Both members got the command; the reversed member runs the
        // other way.
        let forward_5 = station.refresh.get(5).unwrap().speed.is_forward();
        let forward_7 = station.refresh.get(7).unwrap().speed.is_forward();
        assert!(forward_5);
        assert!(!forward_7);
        assert_eq!(station.refresh.get(7).unwrap().speed.step(), 9);
    }

    #[test]
    fn test_consist_remove_of_pair_dissolves() {
        let mut slots: ListenerSlots<TestClock> = Default::default();
        let (mut station, _) = powered_station(&mut slots);

        for adr in [5u16, 7] {
            station.db_mut().db_mut().get_or_create(adr).unwrap();
            station
                .db_mut()
                .db_mut()
                .set_format(adr, LocoFormat::Mm2_27b)
                .unwrap();
        }
        station.consist_couple(&[5, -7], at(2_000)).unwrap();
        station.consist_remove(7).unwrap();

        assert!(station.db().db().consist_of(5).is_none());
        assert!(station.refresh.get(5).unwrap().consist_next.is_none());
    }

    static POM_VALUE: AtomicU32 = AtomicU32::new(u32::MAX);

    fn pom_listener(_ctx: usize, msg: &DecoderMessage) -> ListenerAction {
        POM_VALUE.store(msg.param, Ordering::Relaxed);
        ListenerAction::Deregister
    }

    #[test]
    fn test_pom_timeout_without_answer() {
        let mut slots: ListenerSlots<TestClock> = Default::default();
        let (mut station, mut power) = powered_station(&mut slots);

        POM_VALUE.store(u32::MAX, Ordering::Relaxed);
        station
            .pom_read(77, 8, pom_listener, 0, at(2_000))
            .unwrap();

        // Nothing answers; the router synthesises the timeout.
        let mut out = TestOutput;
        for ms in 2_000..4_200 {
            station.poll(at(ms), &mut power);
            for _ in 0..8 {
                station.isr_step(&mut out);
            }
        }
        // Timeout messages carry the filter kind in the parameter.
        assert_eq!(
            POM_VALUE.load(Ordering::Relaxed),
            u8::from(ReplyKind::Pom) as u32
        );
    }

    #[test]
    fn test_short_trips_power() {
        let mut slots: ListenerSlots<TestClock> = Default::default();
        let (mut station, mut power) = powered_station(&mut slots);

        let mut t = Telemetry::default();
        t.track_ma = SHORT_LIMIT_MA + 100;
        station.set_telemetry(t);

        let mut out = TestOutput;
        for ms in 2_000..6_000 {
            station.poll(at(ms), &mut power);
            for _ in 0..8 {
                station.isr_step(&mut out);
            }
        }
        assert_eq!(station.mode(), TrackMode::Short);
    }

    #[test]
    fn test_feedback_new_node_event() {
        let mut slots: ListenerSlots<TestClock> = Default::default();
        let (mut station, _) = powered_station(&mut slots);

        station.feedback(4, 12, true);
        station.feedback(4, 13, true);

        let new_nodes = station
            .sink
            .events
            .iter()
            .filter(|e| matches!(e, Event::FbNew { node: 4 }))
            .count();
        assert_eq!(new_nodes, 1);
    }

    #[test]
    fn test_turnout_deenergizes() {
        let mut slots: ListenerSlots<TestClock> = Default::default();
        let (mut station, mut power) = powered_station(&mut slots);

        station.switch_turnout(17, true, at(2_000)).unwrap();
        for ms in 2_000..3_000 {
            station.poll(at(ms), &mut power);
        }

        assert!(station.sink.events.iter().any(|e| matches!(
            e,
            Event::Turnout {
                adr: 17,
                energized: false,
                ..
            }
        )));
    }
}
