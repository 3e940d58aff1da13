//! MFT attribute headers and resident payload decoding.
//!
//! Dispatch is a tagged variant keyed on the attribute type code; decoders
//! for the recognized resident payloads live next to their types.

use crate::error::{CoreError, Result};
use crate::mft::entry::MftReference;
use byteorder::{ByteOrder, LittleEndian};

pub mod type_code {
    pub const STANDARD_INFORMATION: u32 = 0x10;
    pub const ATTRIBUTE_LIST: u32 = 0x20;
    pub const FILE_NAME: u32 = 0x30;
    pub const DATA: u32 = 0x80;
    pub const END: u32 = 0xFFFF_FFFF;
}

/// `$FILE_NAME` namespaces.
pub mod namespace {
    pub const POSIX: u8 = 0;
    pub const WIN32: u8 = 1;
    pub const DOS: u8 = 2;
    pub const WIN32_AND_DOS: u8 = 3;
}

/// Common attribute header plus the resident/non-resident tail.
#[derive(Debug, Clone)]
pub struct AttrHeader {
    pub type_code: u32,
    pub length: u32,
    pub name: Option<String>,
    pub flags: u16,
    pub id: u16,
    pub body: AttrBody,
}

#[derive(Debug, Clone)]
pub enum AttrBody {
    Resident {
        value_offset: u16,
        value_length: u32,
    },
    NonResident {
        start_vcn: u64,
        last_vcn: u64,
        runs_offset: u16,
        allocated_size: u64,
        real_size: u64,
        initialized_size: u64,
    },
}

impl AttrHeader {
    pub fn is_resident(&self) -> bool {
        matches!(self.body, AttrBody::Resident { .. })
    }

    /// True for the anonymous stream (no name).
    pub fn is_unnamed(&self) -> bool {
        self.name.is_none()
    }

    /// Case-insensitive name match, per the `$UpCase` convention.
    pub fn name_matches(&self, wanted: &str) -> bool {
        match &self.name {
            Some(name) => name.eq_ignore_ascii_case(wanted),
            None => false,
        }
    }
}

/// One attribute as sliced out of an entry buffer.
#[derive(Debug, Clone)]
pub struct ParsedAttr<'a> {
    pub header: AttrHeader,
    raw: &'a [u8],
}

impl<'a> ParsedAttr<'a> {
    /// Resident value bytes, if resident and in bounds.
    pub fn resident_value(&self) -> Option<&'a [u8]> {
        match self.header.body {
            AttrBody::Resident {
                value_offset,
                value_length,
            } => {
                let start = value_offset as usize;
                let end = start.checked_add(value_length as usize)?;
                self.raw.get(start..end)
            }
            AttrBody::NonResident { .. } => None,
        }
    }

    /// Mapping-pairs bytes of a non-resident attribute.
    pub fn mapping_pairs(&self) -> Option<&'a [u8]> {
        match self.header.body {
            AttrBody::NonResident { runs_offset, .. } => self.raw.get(runs_offset as usize..),
            AttrBody::Resident { .. } => None,
        }
    }

    /// Decodes the recognized resident payloads into the tagged variant.
    pub fn value(&self) -> AttrValue {
        match self.header.type_code {
            type_code::STANDARD_INFORMATION => self
                .resident_value()
                .and_then(StandardInformation::parse)
                .map(AttrValue::StandardInformation)
                .unwrap_or(AttrValue::Other(self.header.type_code)),
            type_code::FILE_NAME => self
                .resident_value()
                .and_then(FileName::parse)
                .map(AttrValue::FileName)
                .unwrap_or(AttrValue::Other(self.header.type_code)),
            type_code::ATTRIBUTE_LIST => match self.resident_value() {
                Some(value) => AttrValue::AttributeList(parse_attr_list(value)),
                None => AttrValue::Other(self.header.type_code),
            },
            type_code::DATA => AttrValue::Data,
            other => AttrValue::Other(other),
        }
    }
}

/// Tagged attribute payloads.
#[derive(Debug, Clone)]
pub enum AttrValue {
    StandardInformation(StandardInformation),
    AttributeList(Vec<AttrListEntry>),
    FileName(FileName),
    Data,
    Other(u32),
}

/// `$STANDARD_INFORMATION`, the leading fixed fields.
#[derive(Debug, Clone, Copy)]
pub struct StandardInformation {
    pub created: u64,
    pub modified: u64,
    pub mft_modified: u64,
    pub accessed: u64,
    pub dos_flags: u32,
}

impl StandardInformation {
    pub fn parse(value: &[u8]) -> Option<Self> {
        if value.len() < 36 {
            return None;
        }
        Some(Self {
            created: LittleEndian::read_u64(&value[0..8]),
            modified: LittleEndian::read_u64(&value[8..16]),
            mft_modified: LittleEndian::read_u64(&value[16..24]),
            accessed: LittleEndian::read_u64(&value[24..32]),
            dos_flags: LittleEndian::read_u32(&value[32..36]),
        })
    }
}

/// `$FILE_NAME` payload.
#[derive(Debug, Clone)]
pub struct FileName {
    pub parent: MftReference,
    pub created: u64,
    pub modified: u64,
    pub mft_modified: u64,
    pub accessed: u64,
    pub allocated_size: u64,
    pub real_size: u64,
    pub flags: u32,
    pub namespace: u8,
    pub name: String,
}

impl FileName {
    pub fn parse(value: &[u8]) -> Option<Self> {
        if value.len() < 66 {
            return None;
        }
        let name_len = value[64] as usize;
        let name_bytes = value.get(66..66 + name_len * 2)?;
        Some(Self {
            parent: MftReference::from_raw(LittleEndian::read_u64(&value[0..8])),
            created: LittleEndian::read_u64(&value[8..16]),
            modified: LittleEndian::read_u64(&value[16..24]),
            mft_modified: LittleEndian::read_u64(&value[24..32]),
            accessed: LittleEndian::read_u64(&value[32..40]),
            allocated_size: LittleEndian::read_u64(&value[40..48]),
            real_size: LittleEndian::read_u64(&value[48..56]),
            flags: LittleEndian::read_u32(&value[56..60]),
            namespace: value[65],
            name: utf16le_string(name_bytes),
        })
    }

    /// Selection rank: Win32&DOS, then Win32, then POSIX, then DOS.
    pub fn namespace_rank(&self) -> u8 {
        match self.namespace {
            namespace::WIN32_AND_DOS => 0,
            namespace::WIN32 => 1,
            namespace::POSIX => 2,
            namespace::DOS => 3,
            _ => 4,
        }
    }
}

/// One `$ATTRIBUTE_LIST` entry: where an attribute actually lives.
#[derive(Debug, Clone)]
pub struct AttrListEntry {
    pub type_code: u32,
    pub start_vcn: u64,
    pub base: MftReference,
    pub attr_id: u16,
    pub name: Option<String>,
}

/// Walks `$ATTRIBUTE_LIST` entries; malformed tails are dropped.
pub fn parse_attr_list(value: &[u8]) -> Vec<AttrListEntry> {
    let mut entries = Vec::new();
    let mut pos = 0usize;
    while pos + 26 <= value.len() {
        let rec = &value[pos..];
        let type_code = LittleEndian::read_u32(&rec[0..4]);
        let record_length = LittleEndian::read_u16(&rec[4..6]) as usize;
        if type_code == 0 || record_length < 26 || pos + record_length > value.len() {
            break;
        }
        let name_len = rec[6] as usize;
        let name_off = rec[7] as usize;
        let name = if name_len > 0 && name_off + name_len * 2 <= record_length {
            Some(utf16le_string(&rec[name_off..name_off + name_len * 2]))
        } else {
            None
        };
        entries.push(AttrListEntry {
            type_code,
            start_vcn: LittleEndian::read_u64(&rec[8..16]),
            base: MftReference::from_raw(LittleEndian::read_u64(&rec[16..24])),
            attr_id: LittleEndian::read_u16(&rec[24..26]),
            name,
        });
        pos += record_length;
    }
    entries
}

/// Iterator over the attributes of one fixed-up entry buffer.
pub struct AttrWalker<'a> {
    buf: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> AttrWalker<'a> {
    pub fn new(buf: &'a [u8], first_attr_offset: u16, used_size: u32) -> Self {
        let end = (used_size as usize).min(buf.len());
        Self {
            buf,
            pos: first_attr_offset as usize,
            end,
        }
    }
}

impl<'a> Iterator for AttrWalker<'a> {
    type Item = Result<ParsedAttr<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos + 8 > self.end {
            return None;
        }
        let head = &self.buf[self.pos..];
        let type_code = LittleEndian::read_u32(&head[0..4]);
        if type_code == type_code::END {
            return None;
        }
        let length = LittleEndian::read_u32(&head[4..8]);
        if length < 16 || self.pos + length as usize > self.end {
            self.pos = self.end;
            return Some(Err(CoreError::Truncated(format!(
                "attribute {type_code:#x} length {length} exceeds entry bounds"
            ))));
        }
        let raw = &self.buf[self.pos..self.pos + length as usize];
        self.pos += length as usize;
        Some(parse_attr(raw, type_code, length))
    }
}

fn parse_attr(raw: &[u8], type_code: u32, length: u32) -> Result<ParsedAttr<'_>> {
    if raw.len() < 24 {
        return Err(CoreError::Truncated(format!(
            "attribute {type_code:#x} shorter than its fixed header"
        )));
    }
    let non_resident = raw[8] != 0;
    let name_len = raw[9] as usize;
    let name_off = LittleEndian::read_u16(&raw[10..12]) as usize;
    let flags = LittleEndian::read_u16(&raw[12..14]);
    let id = LittleEndian::read_u16(&raw[14..16]);
    let name = if name_len > 0 {
        let end = name_off + name_len * 2;
        if end > raw.len() {
            return Err(CoreError::Truncated(format!(
                "attribute {type_code:#x} name exceeds bounds"
            )));
        }
        Some(utf16le_string(&raw[name_off..end]))
    } else {
        None
    };

    let body = if non_resident {
        if raw.len() < 64 {
            return Err(CoreError::Truncated(format!(
                "non-resident attribute {type_code:#x} header too short"
            )));
        }
        AttrBody::NonResident {
            start_vcn: LittleEndian::read_u64(&raw[16..24]),
            last_vcn: LittleEndian::read_u64(&raw[24..32]),
            runs_offset: LittleEndian::read_u16(&raw[32..34]),
            allocated_size: LittleEndian::read_u64(&raw[40..48]),
            real_size: LittleEndian::read_u64(&raw[48..56]),
            initialized_size: LittleEndian::read_u64(&raw[56..64]),
        }
    } else {
        AttrBody::Resident {
            value_length: LittleEndian::read_u32(&raw[16..20]),
            value_offset: LittleEndian::read_u16(&raw[20..22]),
        }
    };

    Ok(ParsedAttr {
        header: AttrHeader {
            type_code,
            length,
            name,
            flags,
            id,
            body,
        },
        raw,
    })
}

pub(crate) fn utf16le_string(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes.chunks_exact(2).map(LittleEndian::read_u16).collect();
    String::from_utf16_lossy(&units)
}

pub(crate) fn utf16le_bytes(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a resident attribute with the given type, name, and value.
    pub(crate) fn resident_attr(type_code: u32, name: Option<&str>, value: &[u8]) -> Vec<u8> {
        let name_bytes = name.map(utf16le_bytes).unwrap_or_default();
        let name_off = 24usize;
        let value_off = name_off + name_bytes.len();
        let length = (value_off + value.len() + 7) & !7;
        let mut raw = vec![0u8; length];
        LittleEndian::write_u32(&mut raw[0..4], type_code);
        LittleEndian::write_u32(&mut raw[4..8], length as u32);
        raw[8] = 0;
        raw[9] = name.map(|n| n.encode_utf16().count() as u8).unwrap_or(0);
        LittleEndian::write_u16(&mut raw[10..12], name_off as u16);
        LittleEndian::write_u32(&mut raw[16..20], value.len() as u32);
        LittleEndian::write_u16(&mut raw[20..22], value_off as u16);
        raw[name_off..name_off + name_bytes.len()].copy_from_slice(&name_bytes);
        raw[value_off..value_off + value.len()].copy_from_slice(value);
        raw
    }

    pub(crate) fn file_name_value(
        parent_entry: u64,
        parent_seq: u16,
        namespace: u8,
        name: &str,
    ) -> Vec<u8> {
        let name_bytes = utf16le_bytes(name);
        let mut value = vec![0u8; 66 + name_bytes.len()];
        let parent_raw = (parent_seq as u64) << 48 | parent_entry;
        LittleEndian::write_u64(&mut value[0..8], parent_raw);
        LittleEndian::write_u64(&mut value[48..56], 1234);
        value[64] = name.encode_utf16().count() as u8;
        value[65] = namespace;
        value[66..].copy_from_slice(&name_bytes);
        value
    }

    #[test]
    fn walks_resident_attributes() {
        let mut si = vec![0u8; 48];
        LittleEndian::write_u64(&mut si[0..8], 111);
        LittleEndian::write_u32(&mut si[32..36], 0x20);
        let a1 = resident_attr(type_code::STANDARD_INFORMATION, None, &si);
        let a2 = resident_attr(
            type_code::FILE_NAME,
            None,
            &file_name_value(5, 5, namespace::WIN32, "hello.txt"),
        );

        let mut buf = vec![0u8; 1024];
        let first = 0x38usize;
        buf[first..first + a1.len()].copy_from_slice(&a1);
        buf[first + a1.len()..first + a1.len() + a2.len()].copy_from_slice(&a2);
        let end_off = first + a1.len() + a2.len();
        LittleEndian::write_u32(&mut buf[end_off..end_off + 4], type_code::END);
        let used = (end_off + 8) as u32;

        let attrs: Vec<_> = AttrWalker::new(&buf, first as u16, used)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(attrs.len(), 2);

        match attrs[0].value() {
            AttrValue::StandardInformation(si) => {
                assert_eq!(si.created, 111);
                assert_eq!(si.dos_flags, 0x20);
            }
            other => panic!("unexpected {other:?}"),
        }
        match attrs[1].value() {
            AttrValue::FileName(fname) => {
                assert_eq!(fname.name, "hello.txt");
                assert_eq!(fname.parent.entry, 5);
                assert_eq!(fname.real_size, 1234);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn named_attribute_matches_case_insensitively() {
        let raw = resident_attr(type_code::DATA, Some("$J"), b"xyz");
        let attr = parse_attr(&raw, type_code::DATA, raw.len() as u32).unwrap();
        assert!(attr.header.name_matches("$j"));
        assert!(!attr.header.is_unnamed());
        assert_eq!(attr.resident_value(), Some(&b"xyz"[..]));
    }

    #[test]
    fn oversized_attribute_length_is_an_error() {
        let mut buf = vec![0u8; 64];
        LittleEndian::write_u32(&mut buf[0..4], type_code::DATA);
        LittleEndian::write_u32(&mut buf[4..8], 4096);
        let mut walker = AttrWalker::new(&buf, 0, 64);
        assert!(walker.next().unwrap().is_err());
        assert!(walker.next().is_none());
    }

    #[test]
    fn attr_list_entries_parse() {
        let mut rec = vec![0u8; 32];
        LittleEndian::write_u32(&mut rec[0..4], type_code::DATA);
        LittleEndian::write_u16(&mut rec[4..6], 32);
        LittleEndian::write_u64(&mut rec[16..24], (3u64 << 48) | 20);
        LittleEndian::write_u16(&mut rec[24..26], 7);
        let entries = parse_attr_list(&rec);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].base.entry, 20);
        assert_eq!(entries[0].base.sequence, 3);
        assert_eq!(entries[0].attr_id, 7);
    }
}
