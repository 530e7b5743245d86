use heapless::{String, Vec};
use num_enum::{FromPrimitive, IntoPrimitive};

use crate::address::LocoAddress;
use crate::format::{LocoFormat, TurnoutFormat};
use crate::func::{FuncInfo, FuncTiming};

/// Longest loco name in UTF-8 bytes.
pub const NAME_MAX: usize = 63;
/// Function metadata records kept per loco.
pub const MAX_FUNC_INFO: usize = 32;
/// Largest number of locos coupled into one consist.
pub const MAX_CONSISTLENGTH: usize = 8;
/// Size of a BiDiB node unique id.
pub const BIDIB_UID_SIZE: usize = 7;

/// How a loco definition entered the database.
#[derive(FromPrimitive, IntoPrimitive, Debug, Clone, PartialEq, Eq, Copy)]
#[repr(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigOrigin {
    #[default]
    Manual = 0,
    DccA = 1,
    M3 = 2,
    RailComPlus = 3,
}

/// Enrichment block read from a DCC-A decoder during logon.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DccaInfo {
    pub shortname: String<15>,
    pub vendor: String<31>,
    pub product: String<31>,
    pub hw_version: String<15>,
    pub fw_version: String<15>,
    pub picture: u16,
    pub symbol: u8,
    /// The track address the decoder asked for at logon.
    pub requested_adr: u16,
}

/// Persistent definition of one loco.
#[derive(Debug, PartialEq, Eq, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LocoDef {
    pub adr: LocoAddress,
    pub format: LocoFormat,
    /// Highest usable function number, `0 ..= format.max_func()`.
    pub maxfunc: u8,
    /// Decoder vendor id, 0 = unknown.
    pub vid: u8,
    /// Decoder unique id, 0 = unknown.
    pub uid: u32,
    pub origin: ConfigOrigin,
    pub name: String<NAME_MAX>,
    /// Sorted by function number, duplicate free.
    pub funcs: Vec<FuncInfo, MAX_FUNC_INFO>,
    pub dcca: Option<DccaInfo>,
}

impl LocoDef {
    pub fn new(adr: LocoAddress, format: LocoFormat) -> Self {
        Self {
            adr,
            format,
            maxfunc: if format.max_func() < 8 {
                format.max_func()
            } else {
                8
            },
            vid: 0,
            uid: 0,
            origin: ConfigOrigin::Manual,
            name: String::new(),
            funcs: Vec::new(),
            dcca: None,
        }
    }

    /// Clamp attributes into their legal ranges.
    ///
    /// Returns `false` when the definition cannot be legalised at all
    /// (address outside the format's range); the database deletes such
    /// entries.
    pub fn sanitize(&mut self) -> bool {
        if !self.adr.is_valid_for(self.format) {
            return false;
        }

        if self.maxfunc > self.format.max_func() {
            self.maxfunc = self.format.max_func();
        }

        self.funcs.retain(|f| f.fnum <= self.maxfunc);
        self.funcs.sort_unstable_by_key(|f| f.fnum);

        let mut last: Option<u8> = None;
        self.funcs.retain(|f| {
            let dup = last == Some(f.fnum);
            last = Some(f.fnum);
            !dup
        });

        true
    }

    fn func_entry(&mut self, fnum: u8) -> Option<&mut FuncInfo> {
        if fnum > self.maxfunc {
            return None;
        }

        match self.funcs.binary_search_by_key(&fnum, |f| f.fnum) {
            Ok(pos) => Some(&mut self.funcs[pos]),
            Err(pos) => {
                self.funcs
                    .insert(pos, FuncInfo::new(fnum, 0, FuncTiming::Toggle))
                    .ok()?;
                Some(&mut self.funcs[pos])
            }
        }
    }

    pub fn set_func_icon(&mut self, fnum: u8, icon: u8) -> bool {
        match self.func_entry(fnum) {
            Some(entry) => {
                entry.icon = icon & 0x7F;
                true
            }
            None => false,
        }
    }

    pub fn set_func_timing(&mut self, fnum: u8, timing: FuncTiming) -> bool {
        match self.func_entry(fnum) {
            Some(entry) => {
                entry.timing = timing;
                true
            }
            None => false,
        }
    }

    pub fn func_info(&self, fnum: u8) -> Option<&FuncInfo> {
        self.funcs
            .binary_search_by_key(&fnum, |f| f.fnum)
            .ok()
            .map(|pos| &self.funcs[pos])
    }
}

/// Persistent definition of one turnout.
#[derive(Debug, PartialEq, Eq, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TurnoutDef {
    pub adr: u16,
    pub format: TurnoutFormat,
    /// BiDiB node carrying the output, when `format` is BiDiB.
    pub bidib_uid: [u8; BIDIB_UID_SIZE],
    /// Extended aspect on the BiDiB node, `0 ..= 127`.
    pub aspect: u8,
}

impl TurnoutDef {
    pub fn new(adr: u16, format: TurnoutFormat) -> Self {
        Self {
            adr,
            format,
            bidib_uid: [0; BIDIB_UID_SIZE],
            aspect: 0,
        }
    }
}

/// Persistent definition of one DCC extended accessory.
#[derive(Debug, PartialEq, Eq, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ExtAccessoryDef {
    pub adr: u16,
}

/// A multiple-traction group.
///
/// Members are signed loco addresses; a negative member runs reversed
/// inside the consist.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Consist {
    pub members: Vec<i16, MAX_CONSISTLENGTH>,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConsistError {
    TooShort,
    TooLong,
    DuplicateMember,
    /// Members mix speed-step systems.
    StepMismatch,
    /// Motorola I locos cannot be consisted.
    Mm1Member,
    AlreadyConsisted,
    NotFound,
}

impl core::fmt::Display for ConsistError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::TooShort => write!(f, "fewer than two members"),
            Self::TooLong => write!(f, "too many members"),
            Self::DuplicateMember => write!(f, "duplicate member"),
            Self::StepMismatch => write!(f, "speed step mismatch"),
            Self::Mm1Member => write!(f, "MM1 loco in consist"),
            Self::AlreadyConsisted => write!(f, "loco already consisted"),
            Self::NotFound => write!(f, "no such consist"),
        }
    }
}

impl Consist {
    /// Build a consist from signed member addresses.
    ///
    /// Checks the member-local invariants; cross-database checks
    /// (step systems, membership elsewhere) are the database's job.
    pub fn from_members(members: &[i16]) -> Result<Self, ConsistError> {
        if members.len() < 2 {
            return Err(ConsistError::TooShort);
        }

        let mut consist = Consist::default();
        for &m in members {
            if consist.contains(m.unsigned_abs()) {
                return Err(ConsistError::DuplicateMember);
            }
            consist
                .members
                .push(m)
                .map_err(|_| ConsistError::TooLong)?;
        }

        Ok(consist)
    }

    pub fn contains(&self, adr: u16) -> bool {
        self.members.iter().any(|m| m.unsigned_abs() == adr)
    }

    /// Whether the member at `adr` runs reversed inside the consist.
    pub fn is_reversed(&self, adr: u16) -> bool {
        self.members
            .iter()
            .any(|m| m.unsigned_abs() == adr && *m < 0)
    }

    /// Drop one member. Returns how many members remain.
    pub fn remove(&mut self, adr: u16) -> usize {
        self.members.retain(|m| m.unsigned_abs() != adr);
        self.members.len()
    }
}

/// Database operations the DCC-A logon machinery needs.
///
/// Implemented by the persistent decoder database; the service crate
/// only sees this seam.
pub trait DecoderDirectory {
    /// Address of the loco with this vendor/unique id pair.
    ///
    /// `uid` 0 never matches.
    fn find_by_vid_uid(&self, vid: u8, uid: u32) -> Option<u16>;

    fn loco_exists(&self, adr: u16) -> bool;

    /// First unused loco address at or above `base`.
    fn allocate_free(&mut self, base: u16) -> Option<u16>;

    /// Create or update the definition of a decoder that logged on.
    fn register_decoder(&mut self, adr: u16, format: LocoFormat, origin: ConfigOrigin) -> bool;

    fn set_vid_uid(&mut self, adr: u16, vid: u8, uid: u32);
    fn set_name(&mut self, adr: u16, name: &str);
    fn set_maxfunc(&mut self, adr: u16, maxfunc: u8);
    fn set_func_icon(&mut self, adr: u16, fnum: u8, icon: u8);
    fn set_func_timing(&mut self, adr: u16, fnum: u8, timing: FuncTiming);
    fn set_dcca_info(&mut self, adr: u16, info: &DccaInfo);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::address::LocoAddress;

    #[test]
    fn test_sanitize_clamps_maxfunc() {
        let mut def = LocoDef::new(LocoAddress::new(12), LocoFormat::Mm2_14);
        def.maxfunc = 31;
        assert!(def.sanitize());
        assert_eq!(def.maxfunc, 4);
    }

    #[test]
    fn test_sanitize_rejects_out_of_range_address() {
        let mut def = LocoDef::new(LocoAddress::new(300), LocoFormat::Mm2_14);
        assert!(!def.sanitize());
    }

    #[test]
    fn test_sanitize_sorts_and_dedups_funcs() {
        let mut def = LocoDef::new(LocoAddress::new(3), LocoFormat::Dcc28);
        def.funcs
            .push(FuncInfo::new(4, 10, FuncTiming::Toggle))
            .unwrap();
        def.funcs
            .push(FuncInfo::new(1, 20, FuncTiming::Momentary))
            .unwrap();
        def.funcs
            .push(FuncInfo::new(4, 30, FuncTiming::Toggle))
            .unwrap();

        assert!(def.sanitize());
        let nums: alloc::vec::Vec<u8> = def.funcs.iter().map(|f| f.fnum).collect();
        assert_eq!(nums, [1, 4]);
    }

    #[test]
    fn test_func_entry_respects_maxfunc() {
        let mut def = LocoDef::new(LocoAddress::new(3), LocoFormat::Dcc28);
        def.maxfunc = 8;
        assert!(def.set_func_icon(8, 5));
        assert!(!def.set_func_icon(9, 5));
        assert_eq!(def.func_info(8).unwrap().icon, 5);
    }

    #[test]
    fn test_consist_invariants() {
        assert_eq!(
            Consist::from_members(&[5]).unwrap_err(),
            ConsistError::TooShort
        );
        assert_eq!(
            Consist::from_members(&[5, -5]).unwrap_err(),
            ConsistError::DuplicateMember
        );

        let consist = Consist::from_members(&[5, -7]).unwrap();
        assert!(consist.contains(7));
        assert!(consist.is_reversed(7));
        assert!(!consist.is_reversed(5));
    }

    #[test]
    fn test_consist_remove() {
        let mut consist = Consist::from_members(&[5, -7, 9]).unwrap();
        assert_eq!(consist.remove(7), 2);
        assert!(!consist.contains(7));
        assert_eq!(consist.remove(5), 1);
    }
}
