#![no_std]

#[cfg(not(target_os = "none"))]
extern crate std;

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;
use core::cmp::Ordering;
use core::fmt;
use unicode_normalization::UnicodeNormalization;

mod bitmap;
mod btree;
mod catalog;
mod hfs_strings;
pub mod internal;
mod volume;

pub use crate::bitmap::*;
pub use crate::btree::*;
pub use crate::catalog::*;
pub use crate::internal::*;
pub use crate::volume::*;
use hfs_strings::fast_unicode_compare;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("malformed B-tree node")]
    BadNode,
    #[error("unknown catalog record type {0}")]
    InvalidRecordType(i16),
    #[error("record of {len} bytes can never fit a {node_size}-byte node")]
    RecordTooLarge { len: usize, node_size: u16 },
    #[error("record of {len} bytes overflows node with {free} bytes free")]
    NodeOverflow { len: usize, free: usize },
    #[error("no contiguous run of {count} free allocation blocks")]
    NoSpace { count: u32 },
    #[error("block range {start}+{count} lies outside a {total}-block volume")]
    OutOfRange { start: u32, count: u32, total: u32 },
    #[error("volume needs {0} allocation blocks, more than 32-bit block numbers address")]
    VolumeTooLarge(u64),
    #[error("invalid allocation block size {0}")]
    InvalidBlockSize(u32),
    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },
    #[error("duplicate name {name:?} in folder {parent}")]
    DuplicateName {
        parent: HFSCatalogNodeID,
        name: String,
    },
    #[error("catalog node IDs exhausted")]
    CatalogIdsExhausted,
    #[error("content of {name:?} ended after {read} of {expected} bytes")]
    ShortRead {
        name: String,
        read: u64,
        expected: u64,
    },
    #[error("I/O error: {0}")]
    Io(String),
}

pub type Result<T> = core::result::Result<T, Error>;

pub trait Read {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn read_exact(&mut self, mut buf: &mut [u8]) -> Result<()> {
        while !buf.is_empty() {
            match self.read(buf) {
                Ok(0) => break,
                Ok(n) => {
                    let tmp = buf;
                    buf = &mut tmp[n..];
                }
                Err(e) => return Err(e),
            }
        }
        if !buf.is_empty() {
            Err(Error::InvalidData(String::from("Unexpected EOF")))
        } else {
            Ok(())
        }
    }
}

pub trait Write {
    fn write(&mut self, buf: &[u8]) -> Result<usize>;
    fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            match self.write(buf) {
                Ok(0) => break,
                Ok(n) => buf = &buf[n..],
                Err(e) => return Err(e),
            }
        }
        if !buf.is_empty() {
            Err(Error::InvalidData(String::from("Failed to write all data")))
        } else {
            Ok(())
        }
    }
}

impl Read for &[u8] {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = core::cmp::min(buf.len(), self.len());
        let (head, tail) = self.split_at(n);
        buf[..n].copy_from_slice(head);
        *self = tail;
        Ok(n)
    }
}

impl Write for Vec<u8> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.extend_from_slice(buf);
        Ok(buf.len())
    }
}

pub trait ReadExt: Read {
    fn read_u16_be(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }
    fn read_u32_be(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }
    fn read_u64_be(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }
    fn read_i16_be(&mut self) -> Result<i16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(i16::from_be_bytes(buf))
    }
    fn read_i32_be(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(i32::from_be_bytes(buf))
    }
    fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }
    fn read_i8(&mut self) -> Result<i8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0] as i8)
    }
}

impl<T: Read + ?Sized> ReadExt for T {}

pub trait WriteExt: Write {
    fn write_u16_be(&mut self, n: u16) -> Result<()> {
        self.write_all(&n.to_be_bytes())
    }
    fn write_u32_be(&mut self, n: u32) -> Result<()> {
        self.write_all(&n.to_be_bytes())
    }
    fn write_u64_be(&mut self, n: u64) -> Result<()> {
        self.write_all(&n.to_be_bytes())
    }
    fn write_i16_be(&mut self, n: i16) -> Result<()> {
        self.write_all(&n.to_be_bytes())
    }
    fn write_i32_be(&mut self, n: i32) -> Result<()> {
        self.write_all(&n.to_be_bytes())
    }
    fn write_i8(&mut self, n: i8) -> Result<()> {
        self.write_all(&[n as u8])
    }
    fn write_u8(&mut self, n: u8) -> Result<()> {
        self.write_all(&[n])
    }
}

impl<T: Write + ?Sized> WriteExt for T {}

/// Longest catalog name, in UTF-16 units.
pub const HFS_MAX_NAME_UNITS: usize = 255;

/// A catalog node name: big-endian UTF-16 on disk, in the decomposed form
/// HFS+ requires, ordered case-insensitively.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct HFSString(pub Vec<u16>);

impl HFSString {
    /// Encodes a POSIX-style name. Characters are canonically decomposed,
    /// except for the ranges HFS+ leaves untouched, and `:` is stored as
    /// `/` as the catalog expects.
    pub fn from_name(name: &str) -> Self {
        let mut units = Vec::with_capacity(name.len());
        let mut run = String::new();
        for ch in name.chars() {
            if is_decomposition_excluded(ch) {
                push_decomposed(&mut run, &mut units);
                push_char(ch, &mut units);
            } else {
                run.push(if ch == ':' { '/' } else { ch });
            }
        }
        push_decomposed(&mut run, &mut units);
        HFSString(units)
    }

    /// Decodes back to a POSIX-style name, the inverse of [`HFSString::from_name`].
    pub fn to_name(&self) -> String {
        char::decode_utf16(self.0.iter().copied())
            .map(|c| match c {
                Ok('/') => ':',
                Ok(c) => c,
                Err(_) => char::REPLACEMENT_CHARACTER,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.0
    }

    pub fn import(source: &mut dyn Read) -> Result<Self> {
        let count = source.read_u16_be()?;
        let mut units = Vec::with_capacity(count as usize);
        for _ in 0..count {
            units.push(source.read_u16_be()?);
        }
        Ok(HFSString(units))
    }

    /// Writes the length-prefixed form used in keys and thread records.
    pub fn export(&self, source: &mut dyn Write) -> Result<()> {
        source.write_u16_be(self.0.len() as u16)?;
        for &unit in &self.0 {
            source.write_u16_be(unit)?;
        }
        Ok(())
    }
}

fn is_decomposition_excluded(ch: char) -> bool {
    matches!(ch as u32, 0x2000..=0x2FFF | 0xF900..=0xFAFF | 0x2F800..=0x2FAFF)
}

fn push_char(ch: char, units: &mut Vec<u16>) {
    let mut buf = [0u16; 2];
    units.extend_from_slice(ch.encode_utf16(&mut buf));
}

fn push_decomposed(run: &mut String, units: &mut Vec<u16>) {
    for ch in run.nfd() {
        push_char(ch, units);
    }
    run.clear();
}

impl fmt::Debug for HFSString {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for c in char::decode_utf16(self.0.iter().copied()) {
            match c {
                Ok(ch) => write!(f, "{}", ch)?,
                Err(e) => write!(f, "\\u{{{:04X}}}", e.unpaired_surrogate())?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for HFSString {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_name())
    }
}

impl PartialOrd for HFSString {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HFSString {
    fn cmp(&self, other: &Self) -> Ordering {
        fast_unicode_compare(&self.0[..], &other.0[..])
    }
}

pub trait Key: fmt::Debug + Ord + PartialOrd + Eq + PartialEq {
    fn import(source: &mut dyn Read) -> Result<Self>
    where
        Self: Sized;
    fn export(&self, source: &mut dyn Write) -> Result<()>;
}

pub trait Record<K> {
    fn import(source: &mut dyn Read, key: K) -> Result<Self>
    where
        Self: Sized;
    fn export(&self, source: &mut dyn Write) -> Result<()>;
    fn get_key(&self) -> &K;
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn name_round_trip_is_nfd() {
        let names = ["Cafe\u{301}", "caf\u{e9}", "\u{1e9b}\u{323}", "A\u{30a}ngstro\u{308}m"];
        for name in names {
            let encoded = HFSString::from_name(name);
            let expected: String = name.nfd().collect();
            assert_eq!(encoded.to_name(), expected);
        }
    }

    #[test]
    fn precomposed_name_is_decomposed() {
        let encoded = HFSString::from_name("\u{e9}");
        assert_eq!(encoded.0, vec![0x0065, 0x0301]);
    }

    #[test]
    fn colon_is_stored_as_slash() {
        let encoded = HFSString::from_name("a:b");
        assert_eq!(encoded.0, vec![0x61, 0x2F, 0x62]);
        assert_eq!(encoded.to_name(), "a:b");
    }

    #[test]
    fn excluded_ranges_are_not_decomposed() {
        // U+F900 has a canonical decomposition that HFS+ does not apply.
        let encoded = HFSString::from_name("\u{f900}");
        assert_eq!(encoded.0, vec![0xF900]);
    }

    #[test]
    fn names_compare_case_insensitively() {
        assert_eq!(
            HFSString::from_name("README").cmp(&HFSString::from_name("readme")),
            Ordering::Equal
        );
        assert!(HFSString::from_name("apple") < HFSString::from_name("Banana"));
        assert!(HFSString::default() < HFSString::from_name("a"));
    }

    #[test]
    fn export_import_string() -> Result<()> {
        let name = HFSString::from_name("hello.txt");
        let mut bytes = Vec::new();
        name.export(&mut bytes)?;
        assert_eq!(&bytes[..2], &[0, 9]);
        assert_eq!(HFSString::import(&mut &bytes[..])?, name);
        Ok(())
    }
}
