//! Station-wide configuration files.
//!
//! `config.ini` carries the network setup, the behaviour flag bitmap
//! and the track timings; `bidib.ini` lists the trusted bus clients.

use dcs_core::format::SysFlags;
use heapless::{String, Vec};

use crate::ini::{self, Item, Parser, Writer};

pub const MAX_BIDIB_CLIENTS: usize = 8;
pub const MAX_S88_MAPPINGS: usize = 8;

/// How the station obtains its IPv4 configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Ipv4Method {
    #[default]
    Dhcp,
    Static,
}

/// BiDiB feedback node mapped onto an S88 base offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct S88Mapping {
    pub node: u8,
    pub base: u16,
}

/// Contents of `config.ini`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub ipv4_method: Ipv4Method,
    pub ip_addr: [u8; 4],
    pub ip_mask: [u8; 4],
    pub ip_gateway: [u8; 4],
    pub p50x_port: u16,
    pub bidib_port: u16,
    pub bidib_user: String<31>,
    pub sys_flags: SysFlags,
    /// Idle minutes before live locos fall off the refresh list.
    pub purge_minutes: u8,
    /// Short MM inter-packet gap in microseconds.
    pub mm_short_us: u16,
    /// DCC one-bit half period in microseconds.
    pub dcc_short_us: u16,
    /// Feedback bus module count.
    pub feedback_modules: u8,
    /// S88 bus module count.
    pub s88_modules: u8,
    /// S88 clock frequency in kHz.
    pub s88_freq_khz: u8,
    pub s88_mappings: Vec<S88Mapping, MAX_S88_MAPPINGS>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            ipv4_method: Ipv4Method::Dhcp,
            ip_addr: [0; 4],
            ip_mask: [255, 255, 255, 0],
            ip_gateway: [0; 4],
            p50x_port: 1234,
            bidib_port: 62875,
            bidib_user: String::new(),
            sys_flags: SysFlags::default(),
            purge_minutes: 10,
            mm_short_us: 1500,
            dcc_short_us: 58,
            feedback_modules: 0,
            s88_modules: 0,
            s88_freq_khz: 20,
            s88_mappings: Vec::new(),
        }
    }
}

fn parse_ip(value: &str) -> Option<[u8; 4]> {
    let mut out = [0u8; 4];
    let mut parts = value.split('.');
    for byte in out.iter_mut() {
        *byte = parts.next()?.trim().parse().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(out)
}

struct Ip<'a>(&'a [u8; 4]);

impl core::fmt::Display for Ip<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "{}.{}.{}.{}", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

impl ConfigFile {
    pub fn load(&mut self, input: &[u8]) {
        for item in Parser::from_bytes(input) {
            let Item::Pair { key, value } = item else {
                continue;
            };

            if let Some(index) = ini::key_index(key, "s88base") {
                if let Some(base) = ini::parse_u16(value) {
                    self.s88_mappings
                        .push(S88Mapping { node: index, base })
                        .ok();
                }
                continue;
            }

            match key {
                "ipv4" => {
                    self.ipv4_method = if value == "static" {
                        Ipv4Method::Static
                    } else {
                        Ipv4Method::Dhcp
                    }
                }
                "ip" => self.ip_addr = parse_ip(value).unwrap_or(self.ip_addr),
                "mask" => self.ip_mask = parse_ip(value).unwrap_or(self.ip_mask),
                "gateway" => self.ip_gateway = parse_ip(value).unwrap_or(self.ip_gateway),
                "p50xport" => self.p50x_port = ini::parse_u16(value).unwrap_or(self.p50x_port),
                "bidibport" => self.bidib_port = ini::parse_u16(value).unwrap_or(self.bidib_port),
                "bidibuser" => {
                    self.bidib_user.clear();
                    for ch in value.chars() {
                        if self.bidib_user.push(ch).is_err() {
                            break;
                        }
                    }
                }
                "sysflags" => {
                    if let Some(bits) = ini::parse_hex_u32(value) {
                        self.sys_flags = SysFlags::from_bits_truncate(bits as u16);
                    }
                }
                "purge" => self.purge_minutes = ini::parse_u8(value).unwrap_or(self.purge_minutes),
                "mmshort" => self.mm_short_us = ini::parse_u16(value).unwrap_or(self.mm_short_us),
                "dccshort" => {
                    self.dcc_short_us = ini::parse_u16(value).unwrap_or(self.dcc_short_us)
                }
                "feedback" => {
                    self.feedback_modules = ini::parse_u8(value).unwrap_or(self.feedback_modules)
                }
                "s88" => self.s88_modules = ini::parse_u8(value).unwrap_or(self.s88_modules),
                "s88freq" => {
                    self.s88_freq_khz = ini::parse_u8(value).unwrap_or(self.s88_freq_khz)
                }
                _ => {}
            }
        }
    }

    pub fn store<'a>(&self, out: &'a mut [u8]) -> Result<&'a [u8], ini::Exhausted> {
        let mut w = Writer::new(out);

        w.section("Network");
        w.pair(
            "ipv4",
            match self.ipv4_method {
                Ipv4Method::Dhcp => "dhcp",
                Ipv4Method::Static => "static",
            },
        );
        w.pair("ip", Ip(&self.ip_addr));
        w.pair("mask", Ip(&self.ip_mask));
        w.pair("gateway", Ip(&self.ip_gateway));
        w.pair("p50xport", self.p50x_port);
        w.pair("bidibport", self.bidib_port);
        if !self.bidib_user.is_empty() {
            w.pair("bidibuser", self.bidib_user.as_str());
        }

        w.section("System");
        w.pair_hex("sysflags", self.sys_flags.bits() as u32);
        w.pair("purge", self.purge_minutes);
        w.pair("mmshort", self.mm_short_us);
        w.pair("dccshort", self.dcc_short_us);

        w.section("Feedback");
        w.pair("feedback", self.feedback_modules);
        w.pair("s88", self.s88_modules);
        w.pair("s88freq", self.s88_freq_khz);
        for mapping in self.s88_mappings.iter() {
            use core::fmt::Write as _;
            let _ = writeln!(w, "s88base[{}]={}", mapping.node, mapping.base);
        }

        w.finish()
    }
}

/// Contents of `bidib.ini`: the trusted clients.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BidibClients {
    pub clients: Vec<String<31>, MAX_BIDIB_CLIENTS>,
}

impl BidibClients {
    pub fn load(&mut self, input: &[u8]) {
        self.clients.clear();
        for item in Parser::from_bytes(input) {
            if let Item::Pair {
                key: "client",
                value,
            } = item
            {
                let mut name: String<31> = String::new();
                for ch in value.chars() {
                    if name.push(ch).is_err() {
                        break;
                    }
                }
                self.clients.push(name).ok();
            }
        }
    }

    pub fn store<'a>(&self, out: &'a mut [u8]) -> Result<&'a [u8], ini::Exhausted> {
        let mut w = Writer::new(out);
        w.section("Clients");
        for client in self.clients.iter() {
            w.pair("client", client.as_str());
        }
        w.finish()
    }

    pub fn is_trusted(&self, name: &str) -> bool {
        self.clients.iter().any(|c| c.as_str() == name)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_config_round_trip() {
        let mut cfg = ConfigFile::default();
        cfg.ipv4_method = Ipv4Method::Static;
        cfg.ip_addr = [192, 168, 0, 30];
        cfg.sys_flags = SysFlags::LONG_MM_PAUSE | SysFlags::START_STATE_GO;
        cfg.purge_minutes = 20;
        cfg.s88_mappings
            .push(S88Mapping { node: 2, base: 16 })
            .unwrap();

        let mut buf = [0u8; 512];
        let first = cfg.store(&mut buf).unwrap().to_vec();

        let mut restored = ConfigFile::default();
        restored.load(&first);
        assert_eq!(restored, cfg);

        let mut buf2 = [0u8; 512];
        let second = restored.store(&mut buf2).unwrap().to_vec();
        assert_eq!(first, second);
    }

    #[test]
    fn test_sysflags_bitmap() {
        let mut cfg = ConfigFile::default();
        cfg.load(b"sysflags=181\n");
        assert!(cfg.sys_flags.contains(SysFlags::LONG_MM_PAUSE));
        assert!(cfg.sys_flags.contains(SysFlags::START_STATE_GO));
        assert!(cfg.sys_flags.contains(SysFlags::BIDIB_SHORT_GLOBAL));
        assert!(!cfg.sys_flags.contains(SysFlags::ACC_LOGICAL));
    }

    #[test]
    fn test_bad_ip_keeps_default(){
        let mut cfg = ConfigFile::default();
        cfg.load(b"ip=300.1.2.3\nmask=1.2.3\n");
        assert_eq!(cfg.ip_addr, [0, 0, 0, 0]);
        assert_eq!(cfg.ip_mask, [255, 255, 255, 0]);
    }

    #[test]
    fn test_trusted_clients() {
        let mut clients = BidibClients::default();
        clients.load(b"[Clients]\nclient=panel-a\nclient=panel-b\n");
        assert!(clients.is_trusted("panel-a"));
        assert!(!clients.is_trusted("panel-c"));

        let mut buf = [0u8; 128];
        let bytes = clients.store(&mut buf).unwrap();
        assert_eq!(
            core::str::from_utf8(bytes).unwrap(),
            "[Clients]\nclient=panel-a\nclient=panel-b\n"
        );
    }
}
