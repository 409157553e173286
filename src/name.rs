//! 8.3 short names.

use core::fmt;

use heapless::String;

/// Characters rejected in short names besides control bytes, space and DEL.
const ILLEGAL_CHARS: &[u8] = b"|<>^+=?/[];,*\"\\";

/// Encoded failure from [`ShortName::new`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvalidName;

/// The 11-byte space-padded on-disk form of a name: 8 base bytes then 3 extension bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShortName([u8; 11]);

impl ShortName {
    pub const DOT: Self = Self(*b".          ");
    pub const DOT_DOT: Self = Self(*b"..         ");

    /// Encodes `name`, upper-casing letters.
    ///
    /// Fails on an empty base, more than one `.`, a base over 8 or an
    /// extension over 3 characters, or any byte outside printable ASCII or in
    /// the reserved set `|<>^+=?/[];,*"\`.
    pub fn new(name: &str) -> Result<Self, InvalidName> {
        let mut raw = [b' '; 11];
        let mut i = 0usize;
        let mut limit = 7usize;
        for &c in name.as_bytes() {
            if c == b'.' {
                if limit == 10 {
                    return Err(InvalidName);
                }
                limit = 10;
                i = 8;
                continue;
            }
            if !(0x21..=0x7E).contains(&c) || ILLEGAL_CHARS.contains(&c) {
                return Err(InvalidName);
            }
            if i > limit {
                return Err(InvalidName);
            }
            raw[i] = c.to_ascii_uppercase();
            i += 1;
        }
        if raw[0] == b' ' {
            return Err(InvalidName);
        }
        Ok(Self(raw))
    }

    pub const fn from_raw(raw: [u8; 11]) -> Self {
        Self(raw)
    }

    pub fn as_bytes(&self) -> &[u8; 11] {
        &self.0
    }

    pub fn base(&self) -> &[u8] {
        trim_padding(&self.0[..8])
    }

    pub fn extension(&self) -> &[u8] {
        trim_padding(&self.0[8..])
    }

    /// `.` or `..`.
    pub fn is_dot(&self) -> bool {
        self.0[0] == b'.'
    }

    /// `BASE.EXT`, or just `BASE` without an extension. Bytes outside
    /// printable ASCII show as `?`.
    pub fn to_display(&self) -> String<12> {
        let mut out = String::new();
        for &b in self.base() {
            let _ = out.push(display_char(b));
        }
        let ext = self.extension();
        if !ext.is_empty() {
            let _ = out.push('.');
            for &b in ext {
                let _ = out.push(display_char(b));
            }
        }
        out
    }
}

fn trim_padding(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
    &bytes[..end]
}

fn display_char(b: u8) -> char {
    if (0x20..=0x7E).contains(&b) {
        b as char
    } else {
        '?'
    }
}

impl fmt::Display for ShortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display())
    }
}

impl fmt::Debug for ShortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShortName({:?})", self.to_display().as_str())
    }
}
