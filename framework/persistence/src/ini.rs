//! Minimal INI reader and writer.
//!
//! The configuration files are plain `key=value` pairs under
//! `[Section]` headers, UTF-8, with `;` or `#` comments. Parsing
//! borrows from the input; writing goes through a bounded byte sink
//! so a full serialisation pass is a single flash write.

use core::fmt::{self, Write as _};
use core::str;

/// One parsed line.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Item<'a> {
    Section(&'a str),
    Pair { key: &'a str, value: &'a str },
}

/// Borrowing line-by-line INI parser.
pub struct Parser<'a> {
    rest: &'a str,
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { rest: input }
    }

    pub fn from_bytes(input: &'a [u8]) -> Self {
        // Persisted files are UTF-8; a corrupt tail parses as far as
        // it stays valid.
        let valid = match str::from_utf8(input) {
            Ok(s) => s,
            Err(err) => str::from_utf8(&input[..err.valid_up_to()]).unwrap_or(""),
        };
        Self::new(valid)
    }
}

impl<'a> Iterator for Parser<'a> {
    type Item = Item<'a>;

    fn next(&mut self) -> Option<Item<'a>> {
        while !self.rest.is_empty() {
            let (line, rest) = match self.rest.find('\n') {
                Some(pos) => (&self.rest[..pos], &self.rest[pos + 1..]),
                None => (self.rest, ""),
            };
            self.rest = rest;

            let line = line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                return Some(Item::Section(name.trim()));
            }

            if let Some((key, value)) = line.split_once('=') {
                return Some(Item::Pair {
                    key: key.trim(),
                    value: value.trim(),
                });
            }
            // Malformed lines are skipped, like unknown keys.
        }
        None
    }
}

/// Writer error: the output buffer is full.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Exhausted;

impl fmt::Display for Exhausted {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ini buffer exhausted")
    }
}

/// Bounded INI writer over a caller-provided byte buffer.
pub struct Writer<'a> {
    out: &'a mut [u8],
    len: usize,
    overflow: bool,
}

impl<'a> Writer<'a> {
    pub fn new(out: &'a mut [u8]) -> Self {
        Self {
            out,
            len: 0,
            overflow: false,
        }
    }

    pub fn section(&mut self, name: &str) -> &mut Self {
        let _ = writeln!(self, "[{name}]");
        self
    }

    pub fn pair(&mut self, key: &str, value: impl fmt::Display) -> &mut Self {
        let _ = writeln!(self, "{key}={value}");
        self
    }

    pub fn pair_hex(&mut self, key: &str, value: u32) -> &mut Self {
        let _ = writeln!(self, "{key}={value:x}");
        self
    }

    pub fn blank(&mut self) -> &mut Self {
        let _ = writeln!(self);
        self
    }

    /// The written bytes, or the overflow error.
    pub fn finish(self) -> Result<&'a [u8], Exhausted> {
        if self.overflow {
            Err(Exhausted)
        } else {
            Ok(&self.out[..self.len])
        }
    }
}

impl fmt::Write for Writer<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        if self.len + bytes.len() > self.out.len() {
            self.overflow = true;
            return Err(fmt::Error);
        }
        self.out[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }
}

/// Parse helpers for the attribute reader tables.
pub fn parse_u16(value: &str) -> Option<u16> {
    value.parse().ok()
}

pub fn parse_u8(value: &str) -> Option<u8> {
    value.parse().ok()
}

pub fn parse_i16(value: &str) -> Option<i16> {
    value.parse().ok()
}

pub fn parse_hex_u32(value: &str) -> Option<u32> {
    u32::from_str_radix(value, 16).ok()
}

/// An index carried in the key, `icon[12]` style.
pub fn key_index(key: &str, prefix: &str) -> Option<u8> {
    key.strip_prefix(prefix)?
        .strip_prefix('[')?
        .strip_suffix(']')?
        .parse()
        .ok()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_sections_and_pairs() {
        let input = "; loco file\n[L42]\nfmt=5\nname = Hobby \n\n# comment\n[Consists]\nc=5 -7\n";
        let items: alloc::vec::Vec<Item> = Parser::new(input).collect();
        assert_eq!(
            items,
            [
                Item::Section("L42"),
                Item::Pair {
                    key: "fmt",
                    value: "5"
                },
                Item::Pair {
                    key: "name",
                    value: "Hobby"
                },
                Item::Section("Consists"),
                Item::Pair {
                    key: "c",
                    value: "5 -7"
                },
            ]
        );
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let items: alloc::vec::Vec<Item> = Parser::new("nonsense\n[ok]\n").collect();
        assert_eq!(items, [Item::Section("ok")]);
    }

    #[test]
    fn test_writer_round_trip() {
        let mut buf = [0u8; 128];
        let mut w = Writer::new(&mut buf);
        w.section("L42").pair("fmt", 5).pair_hex("uid", 0x1234);
        let bytes = w.finish().unwrap();
        assert_eq!(
            core::str::from_utf8(bytes).unwrap(),
            "[L42]\nfmt=5\nuid=1234\n"
        );
    }

    #[test]
    fn test_writer_overflow() {
        let mut buf = [0u8; 4];
        let mut w = Writer::new(&mut buf);
        w.section("toolong");
        assert_eq!(w.finish(), Err(Exhausted));
    }

    #[test]
    fn test_key_index() {
        assert_eq!(key_index("icon[12]", "icon"), Some(12));
        assert_eq!(key_index("ftime[0]", "ftime"), Some(0));
        assert_eq!(key_index("icon12", "icon"), None);
        assert_eq!(key_index("image[x]", "image"), None);
    }
}
