//! The decoder database: locos, turnouts, extended accessories and
//! consists, plus their INI representation.

use dcs_core::address::{LocoAddress, DCC_ADDR_MAX, LOCO_ADDR_MAX, TURNOUT_ADDR_MAX};
use dcs_core::decoder::{
    ConfigOrigin, Consist, ConsistError, DccaInfo, DecoderDirectory, ExtAccessoryDef, LocoDef,
    TurnoutDef, BIDIB_UID_SIZE,
};
use dcs_core::format::{LocoFormat, TurnoutFormat};
use dcs_core::func::FuncTiming;
use heapless::{FnvIndexMap, String, Vec};

use crate::ini::{self, Item, Parser, Writer};

/// Loco definitions the database can hold. Power of two, the keyed
/// store requires it.
pub const MAX_LOCOS: usize = 128;
pub const MAX_TURNOUTS: usize = 64;
pub const MAX_EXT_ACCESSORIES: usize = 32;
pub const MAX_CONSISTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Storage has reached its limit.
    Exhausted,
    OutOfRange,
    NotFound,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Error::Exhausted => write!(f, "database full"),
            Error::OutOfRange => write!(f, "value out of range"),
            Error::NotFound => write!(f, "no such entry"),
        }
    }
}

fn set_str<const N: usize>(dst: &mut String<N>, src: &str) {
    dst.clear();
    for ch in src.chars() {
        if dst.push(ch).is_err() {
            break;
        }
    }
}

/// The persistent decoder catalogue.
///
/// Address 0 is the process-wide template holding the default format
/// for newly seen locos; it never reaches the track.
pub struct LocoDb {
    locos: FnvIndexMap<u16, LocoDef, MAX_LOCOS>,
    turnouts: FnvIndexMap<u16, TurnoutDef, MAX_TURNOUTS>,
    ext_accessories: FnvIndexMap<u16, ExtAccessoryDef, MAX_EXT_ACCESSORIES>,
    consists: Vec<Consist, MAX_CONSISTS>,
    template: LocoDef,
    dirty: bool,
}

impl Default for LocoDb {
    fn default() -> Self {
        Self::new(LocoFormat::Dcc28)
    }
}

impl LocoDb {
    pub fn new(default_format: LocoFormat) -> Self {
        Self {
            locos: FnvIndexMap::new(),
            turnouts: FnvIndexMap::new(),
            ext_accessories: FnvIndexMap::new(),
            consists: Vec::new(),
            template: LocoDef::new(LocoAddress::new(0), default_format),
            dirty: false,
        }
    }

    /// Whether a mutation happened since the last store pass.
    pub fn take_dirty(&mut self) -> bool {
        core::mem::replace(&mut self.dirty, false)
    }

    fn touch(&mut self) {
        self.dirty = true;
    }

    // ---- locos -------------------------------------------------------

    pub fn loco_count(&self) -> usize {
        self.locos.len()
    }

    /// Look a definition up; address 0 yields the default template.
    pub fn lookup(&self, adr: u16) -> Option<&LocoDef> {
        if adr == 0 {
            Some(&self.template)
        } else {
            self.locos.get(&adr)
        }
    }

    /// Default format for a fresh loco at this address.
    fn default_format_for(&self, adr: u16) -> LocoFormat {
        if adr <= self.template.format.max_addr() && self.template.format.is_mm() {
            self.template.format
        } else if adr <= DCC_ADDR_MAX {
            LocoFormat::Dcc28
        } else {
            LocoFormat::M3_126
        }
    }

    pub fn get_or_create(&mut self, adr: u16) -> Result<&LocoDef, Error> {
        if adr == 0 || adr > LOCO_ADDR_MAX {
            return Err(Error::OutOfRange);
        }

        if !self.locos.contains_key(&adr) {
            let def = LocoDef::new(LocoAddress::new(adr), self.default_format_for(adr));
            self.locos.insert(adr, def).map_err(|_| Error::Exhausted)?;
            self.touch();
        }

        Ok(&self.locos[&adr])
    }

    /// First unused address at or above `base`.
    pub fn allocate_free(&mut self, base: u16) -> Option<u16> {
        (base.max(1)..=LOCO_ADDR_MAX).find(|adr| !self.locos.contains_key(adr))
    }

    /// Address of the loco matching this vendor/unique id pair.
    ///
    /// A zero unique id never matches anything.
    pub fn find_by_vid_uid(&self, vid: u8, uid: u32) -> Option<u16> {
        if uid == 0 {
            return None;
        }
        self.locos
            .iter()
            .find(|(_, def)| def.vid == vid && def.uid == uid)
            .map(|(adr, _)| *adr)
    }

    pub fn remove_loco(&mut self, adr: u16) -> Result<(), Error> {
        self.locos.remove(&adr).ok_or(Error::NotFound)?;
        let _ = self.consist_remove(adr);
        self.touch();
        Ok(())
    }

    /// Run one mutation on a definition, then legalise it.
    ///
    /// A definition that cannot be legalised (address outside the new
    /// format's range) is deleted outright.
    fn mutate(&mut self, adr: u16, f: impl FnOnce(&mut LocoDef)) -> Result<(), Error> {
        if adr == 0 {
            f(&mut self.template);
            self.template.adr = LocoAddress::new(0);
            self.touch();
            return Ok(());
        }

        self.get_or_create(adr)?;
        let def = self.locos.get_mut(&adr).ok_or(Error::NotFound)?;
        f(def);

        if !def.sanitize() {
            self.locos.remove(&adr);
            let _ = self.consist_remove(adr);
        }
        self.touch();
        Ok(())
    }

    pub fn set_format(&mut self, adr: u16, format: LocoFormat) -> Result<(), Error> {
        self.mutate(adr, |def| def.format = format)
    }

    pub fn set_vid_uid(&mut self, adr: u16, vid: u8, uid: u32) -> Result<(), Error> {
        self.mutate(adr, |def| {
            def.vid = vid;
            def.uid = uid;
        })
    }

    pub fn set_maxfunc(&mut self, adr: u16, maxfunc: u8) -> Result<(), Error> {
        self.mutate(adr, |def| def.maxfunc = maxfunc)
    }

    pub fn set_name(&mut self, adr: u16, name: &str) -> Result<(), Error> {
        self.mutate(adr, |def| set_str(&mut def.name, name))
    }

    pub fn set_origin(&mut self, adr: u16, origin: ConfigOrigin) -> Result<(), Error> {
        self.mutate(adr, |def| def.origin = origin)
    }

    pub fn set_func_icon(&mut self, adr: u16, fnum: u8, icon: u8) -> Result<(), Error> {
        self.mutate(adr, |def| {
            def.set_func_icon(fnum, icon);
        })
    }

    pub fn set_func_timing(&mut self, adr: u16, fnum: u8, timing: FuncTiming) -> Result<(), Error> {
        self.mutate(adr, |def| {
            def.set_func_timing(fnum, timing);
        })
    }

    pub fn set_dcca_info(&mut self, adr: u16, info: &DccaInfo) -> Result<(), Error> {
        self.mutate(adr, |def| def.dcca = Some(info.clone()))
    }

    /// Visit every loco definition, address order.
    pub fn for_each_loco(&self, mut visitor: impl FnMut(&LocoDef)) {
        for adr in self.sorted_by_address() {
            if let Some(def) = self.locos.get(&adr) {
                visitor(def);
            }
        }
    }

    fn sorted_by_address(&self) -> Vec<u16, MAX_LOCOS> {
        let mut addresses: Vec<u16, MAX_LOCOS> = self.locos.keys().copied().collect();
        addresses.sort_unstable();
        addresses
    }

    /// Snapshot of the loco addresses ordered by name, then address.
    ///
    /// Control surfaces page through this with [`Self::next_by_name`]
    /// and [`Self::prev_by_name`].
    pub fn sorted_by_name(&self) -> Vec<u16, MAX_LOCOS> {
        let mut addresses = self.sorted_by_address();
        addresses.sort_unstable_by(|a, b| {
            let name_a = self.locos.get(a).map(|d| d.name.as_str()).unwrap_or("");
            let name_b = self.locos.get(b).map(|d| d.name.as_str()).unwrap_or("");
            name_a.cmp(name_b).then(a.cmp(b))
        });
        addresses
    }

    pub fn next_by_name(&self, adr: u16) -> Option<u16> {
        let snapshot = self.sorted_by_name();
        let pos = snapshot.iter().position(|a| *a == adr)?;
        snapshot.get(pos + 1).copied()
    }

    pub fn prev_by_name(&self, adr: u16) -> Option<u16> {
        let snapshot = self.sorted_by_name();
        let pos = snapshot.iter().position(|a| *a == adr)?;
        pos.checked_sub(1).and_then(|p| snapshot.get(p)).copied()
    }

    // ---- turnouts and accessories -----------------------------------

    pub fn turnout(&self, adr: u16) -> Option<&TurnoutDef> {
        self.turnouts.get(&adr)
    }

    pub fn turnout_or_create(&mut self, adr: u16) -> Result<&TurnoutDef, Error> {
        if adr == 0 || adr > TURNOUT_ADDR_MAX {
            return Err(Error::OutOfRange);
        }
        if !self.turnouts.contains_key(&adr) {
            self.turnouts
                .insert(adr, TurnoutDef::new(adr, TurnoutFormat::Dcc))
                .map_err(|_| Error::Exhausted)?;
            self.touch();
        }
        Ok(&self.turnouts[&adr])
    }

    pub fn set_turnout_format(&mut self, adr: u16, format: TurnoutFormat) -> Result<(), Error> {
        self.turnout_or_create(adr)?;
        if let Some(def) = self.turnouts.get_mut(&adr) {
            def.format = format;
        }
        self.touch();
        Ok(())
    }

    pub fn set_turnout_bidib(
        &mut self,
        adr: u16,
        uid: [u8; BIDIB_UID_SIZE],
        aspect: u8,
    ) -> Result<(), Error> {
        self.turnout_or_create(adr)?;
        if let Some(def) = self.turnouts.get_mut(&adr) {
            def.format = TurnoutFormat::BiDiB;
            def.bidib_uid = uid;
            def.aspect = aspect & 0x7F;
        }
        self.touch();
        Ok(())
    }

    pub fn ext_accessory(&self, adr: u16) -> Option<&ExtAccessoryDef> {
        self.ext_accessories.get(&adr)
    }

    pub fn ext_accessory_or_create(&mut self, adr: u16) -> Result<&ExtAccessoryDef, Error> {
        if adr == 0 || adr > TURNOUT_ADDR_MAX {
            return Err(Error::OutOfRange);
        }
        if !self.ext_accessories.contains_key(&adr) {
            self.ext_accessories
                .insert(adr, ExtAccessoryDef { adr })
                .map_err(|_| Error::Exhausted)?;
            self.touch();
        }
        Ok(&self.ext_accessories[&adr])
    }

    // ---- consists ----------------------------------------------------

    pub fn consist_of(&self, adr: u16) -> Option<&Consist> {
        self.consists.iter().find(|c| c.contains(adr))
    }

    /// Couple locos into a consist.
    ///
    /// Members must exist, share one speed-step system, not be
    /// Motorola I, and not sit in another consist.
    pub fn consist_couple(&mut self, members: &[i16]) -> Result<(), ConsistError> {
        let consist = Consist::from_members(members)?;

        let mut steps: Option<u8> = None;
        for &m in members {
            let adr = m.unsigned_abs();
            let def = self.locos.get(&adr).ok_or(ConsistError::NotFound)?;

            if def.format == LocoFormat::Mm1_14 {
                return Err(ConsistError::Mm1Member);
            }
            match steps {
                None => steps = Some(def.format.speed_steps()),
                Some(s) if s != def.format.speed_steps() => {
                    return Err(ConsistError::StepMismatch)
                }
                _ => {}
            }
            if self.consist_of(adr).is_some() {
                return Err(ConsistError::AlreadyConsisted);
            }
        }

        self.consists
            .push(consist)
            .map_err(|_| ConsistError::TooLong)?;
        self.touch();
        Ok(())
    }

    /// Drop the whole consist a loco belongs to.
    pub fn consist_dissolve(&mut self, adr: u16) -> Result<Consist, ConsistError> {
        let pos = self
            .consists
            .iter()
            .position(|c| c.contains(adr))
            .ok_or(ConsistError::NotFound)?;

        let consist = self.consists.swap_remove(pos);
        self.touch();
        Ok(consist)
    }

    /// Detach one member; the consist dissolves once it would drop
    /// below two members.
    pub fn consist_remove(&mut self, adr: u16) -> Result<Consist, ConsistError> {
        let pos = self
            .consists
            .iter()
            .position(|c| c.contains(adr))
            .ok_or(ConsistError::NotFound)?;

        if self.consists[pos].members.len() <= 2 {
            return self.consist_dissolve(adr);
        }

        let before = self.consists[pos].clone();
        self.consists[pos].remove(adr);
        self.touch();
        Ok(before)
    }

    pub fn for_each_consist(&self, mut visitor: impl FnMut(&Consist)) {
        for consist in self.consists.iter() {
            visitor(consist);
        }
    }

    // ---- INI load ----------------------------------------------------

    /// Rebuild the database from its INI image.
    pub fn load(&mut self, input: &[u8]) {
        self.locos.clear();
        self.turnouts.clear();
        self.ext_accessories.clear();
        self.consists.clear();

        #[derive(Clone, Copy, PartialEq)]
        enum Section {
            None,
            Loco(u16),
            Turnout(u16),
            ExtAcc(u16),
            Consists,
        }

        let mut section = Section::None;

        for item in Parser::from_bytes(input) {
            match item {
                Item::Section(name) => {
                    section = if name == "Consists" {
                        Section::Consists
                    } else if let Some(adr) = name.strip_prefix('L').and_then(ini::parse_u16) {
                        if self.get_or_create(adr).is_ok() {
                            Section::Loco(adr)
                        } else {
                            Section::None
                        }
                    } else if let Some(adr) = name.strip_prefix('T').and_then(ini::parse_u16) {
                        if self.turnout_or_create(adr).is_ok() {
                            Section::Turnout(adr)
                        } else {
                            Section::None
                        }
                    } else if let Some(adr) = name.strip_prefix('X').and_then(ini::parse_u16) {
                        if self.ext_accessory_or_create(adr).is_ok() {
                            Section::ExtAcc(adr)
                        } else {
                            Section::None
                        }
                    } else {
                        Section::None
                    };
                }
                Item::Pair { key, value } => match section {
                    Section::Loco(adr) => self.read_loco_key(adr, key, value),
                    Section::Turnout(adr) => self.read_turnout_key(adr, key, value),
                    Section::ExtAcc(_) => {}
                    Section::Consists => {
                        let mut members: Vec<i16, { dcs_core::decoder::MAX_CONSISTLENGTH }> =
                            Vec::new();
                        for token in value.split([',', ' ']).filter(|t| !t.is_empty()) {
                            if let Some(m) = ini::parse_i16(token) {
                                members.push(m).ok();
                            }
                        }
                        let _ = self.consist_couple(&members);
                    }
                    Section::None => {}
                },
            }
        }

        // Everything in place is legal; loading leaves a clean slate.
        let doomed: Vec<u16, MAX_LOCOS> = self
            .locos
            .iter_mut()
            .filter_map(|(adr, def)| if def.sanitize() { None } else { Some(*adr) })
            .collect();
        for adr in doomed {
            self.locos.remove(&adr);
        }

        self.dirty = false;
    }

    fn read_loco_key(&mut self, adr: u16, key: &str, value: &str) {
        // Indexed keys first, then the flat attribute table.
        if let Some(fnum) = ini::key_index(key, "icon") {
            let _ = self.set_func_icon(adr, fnum, ini::parse_u8(value).unwrap_or(0));
            return;
        }
        if let Some(fnum) = ini::key_index(key, "ftime") {
            let timing = FuncTiming::from_ini(ini::parse_i16(value).unwrap_or(0));
            let _ = self.set_func_timing(adr, fnum, timing);
            return;
        }
        if let Some(slot) = ini::key_index(key, "image") {
            let _ = self.mutate(adr, |def| {
                let dcca = def.dcca.get_or_insert_with(DccaInfo::default);
                match slot {
                    0 => dcca.picture = ini::parse_u16(value).unwrap_or(0),
                    _ => dcca.symbol = ini::parse_u8(value).unwrap_or(0),
                }
            });
            return;
        }

        type Reader = fn(&mut LocoDef, &str);
        const READERS: &[(&str, Reader)] = &[
            ("fmt", |def, v| {
                def.format = LocoFormat::from(v.parse::<u8>().unwrap_or(255));
            }),
            ("config", |def, v| {
                def.origin = ConfigOrigin::from(v.parse::<u8>().unwrap_or(0));
            }),
            ("maxfunc", |def, v| {
                def.maxfunc = v.parse().unwrap_or(def.maxfunc);
            }),
            ("name", |def, v| set_str(&mut def.name, v)),
            ("vid", |def, v| {
                def.vid = u8::from_str_radix(v, 16).unwrap_or(0);
            }),
            ("uid", |def, v| {
                def.uid = u32::from_str_radix(v, 16).unwrap_or(0);
            }),
            ("shortname", |def, v| {
                set_str(
                    &mut def.dcca.get_or_insert_with(DccaInfo::default).shortname,
                    v,
                );
            }),
            ("vendor", |def, v| {
                set_str(&mut def.dcca.get_or_insert_with(DccaInfo::default).vendor, v);
            }),
            ("product", |def, v| {
                set_str(
                    &mut def.dcca.get_or_insert_with(DccaInfo::default).product,
                    v,
                );
            }),
            ("HW", |def, v| {
                set_str(
                    &mut def.dcca.get_or_insert_with(DccaInfo::default).hw_version,
                    v,
                );
            }),
            ("FW", |def, v| {
                set_str(
                    &mut def.dcca.get_or_insert_with(DccaInfo::default).fw_version,
                    v,
                );
            }),
            ("AdrReq", |def, v| {
                def.dcca.get_or_insert_with(DccaInfo::default).requested_adr =
                    v.parse().unwrap_or(0);
            }),
            ("flags", |def, v| {
                for token in v.split(' ').filter(|t| !t.is_empty()) {
                    if token == "DCCA" {
                        def.dcca.get_or_insert_with(DccaInfo::default);
                    }
                }
            }),
        ];

        if let Some((_, reader)) = READERS.iter().find(|(name, _)| *name == key) {
            let _ = self.mutate(adr, |def| reader(def, value));
        }
    }

    fn read_turnout_key(&mut self, adr: u16, key: &str, value: &str) {
        let Some(def) = self.turnouts.get_mut(&adr) else {
            return;
        };
        match key {
            "fmt" => def.format = TurnoutFormat::from(value.parse::<u8>().unwrap_or(1)),
            "uid" => {
                if value.len() == 2 * BIDIB_UID_SIZE {
                    let mut uid = [0u8; BIDIB_UID_SIZE];
                    let ok = uid.iter_mut().enumerate().all(|(i, byte)| {
                        match u8::from_str_radix(&value[2 * i..2 * i + 2], 16) {
                            Ok(v) => {
                                *byte = v;
                                true
                            }
                            Err(_) => false,
                        }
                    });
                    if ok {
                        def.bidib_uid = uid;
                    }
                }
            }
            "aspect" => def.aspect = value.parse::<u8>().unwrap_or(0) & 0x7F,
            _ => {}
        }
    }

    // ---- INI store ---------------------------------------------------

    /// Serialise the whole database in canonical order.
    ///
    /// The order is fixed so that save, load and save again produce
    /// identical bytes.
    pub fn store<'a>(&self, out: &'a mut [u8]) -> Result<&'a [u8], ini::Exhausted> {
        let mut w = Writer::new(out);

        for adr in self.sorted_by_address() {
            let Some(def) = self.locos.get(&adr) else {
                continue;
            };

            w.section_header('L', adr);
            w.pair("fmt", u8::from(def.format));
            w.pair("config", u8::from(def.origin));
            w.pair("maxfunc", def.maxfunc);
            if !def.name.is_empty() {
                w.pair("name", def.name.as_str());
            }
            if def.vid != 0 {
                w.pair_hex("vid", def.vid as u32);
            }
            if def.uid != 0 {
                w.pair_hex("uid", def.uid);
            }
            if let Some(dcca) = &def.dcca {
                w.pair("flags", "DCCA");
                if !dcca.shortname.is_empty() {
                    w.pair("shortname", dcca.shortname.as_str());
                }
                if !dcca.vendor.is_empty() {
                    w.pair("vendor", dcca.vendor.as_str());
                }
                if !dcca.product.is_empty() {
                    w.pair("product", dcca.product.as_str());
                }
                if !dcca.hw_version.is_empty() {
                    w.pair("HW", dcca.hw_version.as_str());
                }
                if !dcca.fw_version.is_empty() {
                    w.pair("FW", dcca.fw_version.as_str());
                }
                if dcca.picture != 0 {
                    w.indexed_pair("image", 0, dcca.picture);
                }
                if dcca.symbol != 0 {
                    w.indexed_pair("image", 1, dcca.symbol);
                }
                if dcca.requested_adr != 0 {
                    w.pair("AdrReq", dcca.requested_adr);
                }
            }
            for func in def.funcs.iter() {
                if func.icon != 0 {
                    w.indexed_pair("icon", func.fnum, func.icon);
                }
                if func.timing != FuncTiming::Toggle {
                    w.indexed_pair("ftime", func.fnum, func.timing.to_ini());
                }
            }
        }

        let mut turnout_addresses: Vec<u16, MAX_TURNOUTS> =
            self.turnouts.keys().copied().collect();
        turnout_addresses.sort_unstable();
        for adr in turnout_addresses {
            let Some(def) = self.turnouts.get(&adr) else {
                continue;
            };
            w.section_header('T', adr);
            w.pair("fmt", u8::from(def.format));
            if def.format == TurnoutFormat::BiDiB {
                w.uid_pair(&def.bidib_uid);
                w.pair("aspect", def.aspect);
            }
        }

        let mut ext_addresses: Vec<u16, MAX_EXT_ACCESSORIES> =
            self.ext_accessories.keys().copied().collect();
        ext_addresses.sort_unstable();
        for adr in ext_addresses {
            w.section_header('X', adr);
            w.pair("fmt", u8::from(TurnoutFormat::Dcc));
        }

        if !self.consists.is_empty() {
            w.section("Consists");
            for consist in self.consists.iter() {
                w.consist_pair(&consist.members);
            }
        }

        w.finish()
    }
}

impl Writer<'_> {
    fn section_header(&mut self, prefix: char, adr: u16) -> &mut Self {
        use core::fmt::Write as _;
        let _ = writeln!(self, "[{prefix}{adr}]");
        self
    }

    fn indexed_pair(&mut self, key: &str, index: u8, value: impl core::fmt::Display) -> &mut Self {
        use core::fmt::Write as _;
        let _ = writeln!(self, "{key}[{index}]={value}");
        self
    }

    fn uid_pair(&mut self, uid: &[u8; BIDIB_UID_SIZE]) -> &mut Self {
        use core::fmt::Write as _;
        let _ = write!(self, "uid=");
        for byte in uid {
            let _ = write!(self, "{byte:02x}");
        }
        let _ = writeln!(self);
        self
    }

    fn consist_pair(&mut self, members: &[i16]) -> &mut Self {
        use core::fmt::Write as _;
        let _ = write!(self, "consist=");
        for (i, m) in members.iter().enumerate() {
            if i > 0 {
                let _ = write!(self, ",");
            }
            let _ = write!(self, "{m}");
        }
        let _ = writeln!(self);
        self
    }
}

impl DecoderDirectory for LocoDb {
    fn find_by_vid_uid(&self, vid: u8, uid: u32) -> Option<u16> {
        LocoDb::find_by_vid_uid(self, vid, uid)
    }

    fn loco_exists(&self, adr: u16) -> bool {
        adr != 0 && self.locos.contains_key(&adr)
    }

    fn allocate_free(&mut self, base: u16) -> Option<u16> {
        LocoDb::allocate_free(self, base)
    }

    fn register_decoder(&mut self, adr: u16, format: LocoFormat, origin: ConfigOrigin) -> bool {
        self.get_or_create(adr).is_ok()
            && self.set_format(adr, format).is_ok()
            && self.set_origin(adr, origin).is_ok()
    }

    fn set_vid_uid(&mut self, adr: u16, vid: u8, uid: u32) {
        let _ = LocoDb::set_vid_uid(self, adr, vid, uid);
    }

    fn set_name(&mut self, adr: u16, name: &str) {
        let _ = LocoDb::set_name(self, adr, name);
    }

    fn set_maxfunc(&mut self, adr: u16, maxfunc: u8) {
        let _ = LocoDb::set_maxfunc(self, adr, maxfunc);
    }

    fn set_func_icon(&mut self, adr: u16, fnum: u8, icon: u8) {
        let _ = LocoDb::set_func_icon(self, adr, fnum, icon);
    }

    fn set_func_timing(&mut self, adr: u16, fnum: u8, timing: FuncTiming) {
        let _ = LocoDb::set_func_timing(self, adr, fnum, timing);
    }

    fn set_dcca_info(&mut self, adr: u16, info: &DccaInfo) {
        let _ = LocoDb::set_dcca_info(self, adr, info);
    }
}
