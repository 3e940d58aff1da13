//! Streaming decoder for `$UsnJrnl:$J`.
//!
//! `$J` usually begins with a very large sparse region; record offsets stay
//! meaningful because extraction preserved the sparse footprint, so the
//! decoder skips zero runs in fixed granules instead of erroring out.

use crate::error::{CoreError, Result};
use crate::filetime;
use crate::mft::entry::MftReference;
use crate::stats::ParseStats;
use crate::traits::ImageSource;
use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;
use tracing::debug;

/// Smallest plausible v2 record: fixed header plus an empty name.
pub const MIN_RECORD_LENGTH: u32 = 60;

/// Reason-flag bits and their event names, in bit order.
pub const REASONS: &[(u32, &str)] = &[
    (0x0000_0001, "DATA_OVERWRITE"),
    (0x0000_0002, "DATA_EXTEND"),
    (0x0000_0004, "DATA_TRUNCATION"),
    (0x0000_0010, "NAMED_DATA_OVERWRITE"),
    (0x0000_0020, "NAMED_DATA_EXTEND"),
    (0x0000_0040, "NAMED_DATA_TRUNCATION"),
    (0x0000_0100, "FILE_CREATE"),
    (0x0000_0200, "FILE_DELETE"),
    (0x0000_0400, "EA_CHANGE"),
    (0x0000_0800, "SECURITY_CHANGE"),
    (0x0000_1000, "RENAME_OLD_NAME"),
    (0x0000_2000, "RENAME_NEW_NAME"),
    (0x0000_4000, "INDEXABLE_CHANGE"),
    (0x0000_8000, "BASIC_INFO_CHANGE"),
    (0x0001_0000, "HARD_LINK_CHANGE"),
    (0x0002_0000, "COMPRESSION_CHANGE"),
    (0x0004_0000, "ENCRYPTION_CHANGE"),
    (0x0008_0000, "OBJECT_ID_CHANGE"),
    (0x0010_0000, "REPARSE_POINT_CHANGE"),
    (0x0020_0000, "STREAM_CHANGE"),
    (0x8000_0000, "CLOSE"),
];

/// One v4 extent.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct UsnExtent {
    pub offset: i64,
    pub length: i64,
}

/// One change-journal record, any version.
#[derive(Debug, Clone, Serialize)]
pub struct UsnRecord {
    pub usn: u64,
    pub record_length: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub file_entry: u64,
    pub file_sequence: u16,
    /// Upper half of a v3/v4 128-bit reference; 0 for v2.
    pub file_reference_hi: u64,
    pub parent_entry: u64,
    pub parent_sequence: u16,
    pub parent_reference_hi: u64,
    #[serde(serialize_with = "filetime::serialize")]
    pub timestamp: u64,
    pub reason_flags: u32,
    pub source_info_flags: u32,
    pub security_id: u32,
    pub file_attr_flags: u32,
    pub file_name: String,
    /// v4 extent list; empty otherwise.
    pub extents: Vec<UsnExtent>,
    pub full_path: Option<String>,
}

impl UsnRecord {
    pub fn file_reference(&self) -> MftReference {
        MftReference {
            entry: self.file_entry,
            sequence: self.file_sequence,
        }
    }

    pub fn parent_reference(&self) -> MftReference {
        MftReference {
            entry: self.parent_entry,
            sequence: self.parent_sequence,
        }
    }

    /// Event names for the set reason bits; a record with several bits
    /// emits one row per bit. Unknown-only masks fall back to a hex tag.
    pub fn events(&self) -> Vec<String> {
        let mut events: Vec<String> = REASONS
            .iter()
            .filter(|(bit, _)| self.reason_flags & bit != 0)
            .map(|&(_, name)| name.to_string())
            .collect();
        if events.is_empty() {
            if self.reason_flags == 0 {
                events.push(String::new());
            } else {
                events.push(format!("UNKNOWN_{:#010X}", self.reason_flags));
            }
        }
        events
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UsnDecoderOptions {
    /// Granule for skipping sparse (zero) regions.
    pub skip_granule: u64,
    /// Record lengths above this are treated as corruption.
    pub max_record_length: u32,
}

impl Default for UsnDecoderOptions {
    fn default() -> Self {
        Self {
            skip_granule: 4096,
            max_record_length: 1024 * 1024,
        }
    }
}

/// Forward-only record decoder over a `$J` byte stream.
pub struct UsnDecoder<S> {
    src: S,
    len: u64,
    pos: u64,
    opts: UsnDecoderOptions,
}

impl<S: ImageSource> UsnDecoder<S> {
    pub fn new(src: S, opts: UsnDecoderOptions) -> Self {
        let len = src.size();
        Self {
            src,
            len,
            pos: 0,
            opts,
        }
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn stream_len(&self) -> u64 {
        self.len
    }

    /// Decodes the next record; `None` at end of stream. Corrupt regions
    /// are skipped with the counters updated, never fatal.
    pub fn next_record(&mut self, stats: &mut ParseStats) -> Result<Option<UsnRecord>> {
        loop {
            // Records sit on 8-byte boundaries.
            self.pos = (self.pos + 7) & !7;
            if self.pos + 8 > self.len {
                return Ok(None);
            }

            let head = self.src.read_vec(self.pos, 8)?;
            if head.len() < 8 {
                return Ok(None);
            }
            let record_length = LittleEndian::read_u32(&head[0..4]);

            if record_length == 0 {
                // Sparse/hole region: jump to the next granule boundary.
                let granule = self.opts.skip_granule.max(8);
                let next = (self.pos / granule + 1) * granule;
                stats.sparse_bytes_skipped += next - self.pos;
                self.pos = next;
                continue;
            }

            if record_length < MIN_RECORD_LENGTH || record_length > self.opts.max_record_length {
                debug!(offset = self.pos, record_length, "implausible USN record length");
                stats.usn_corrupt += 1;
                self.pos += 8;
                continue;
            }

            if self.pos + record_length as u64 > self.len {
                // Truncated tail.
                stats.usn_corrupt += 1;
                return Ok(None);
            }

            let buf = self.src.read_vec(self.pos, record_length as usize)?;
            if buf.len() < record_length as usize {
                stats.usn_corrupt += 1;
                return Ok(None);
            }

            let major_version = LittleEndian::read_u16(&buf[4..6]);
            let record = match major_version {
                2 => parse_v2(&buf),
                3 => parse_v3(&buf),
                4 => parse_v4(&buf),
                _ => None,
            };

            match record {
                Some(record) => {
                    // Advance by the record length rounded up to 8.
                    self.pos += (record_length as u64 + 7) & !7;
                    stats.usn_records += 1;
                    return Ok(Some(record));
                }
                None => {
                    stats.usn_corrupt += 1;
                    self.pos += 8;
                }
            }
        }
    }

    /// Convenience wrapper draining the stream.
    pub fn for_each(
        &mut self,
        stats: &mut ParseStats,
        cancel: &crate::traits::CancelToken,
        mut emit: impl FnMut(UsnRecord) -> Result<()>,
    ) -> Result<()> {
        while let Some(record) = {
            cancel.check()?;
            self.next_record(stats)?
        } {
            emit(record)?;
        }
        Ok(())
    }
}

fn base_record(buf: &[u8]) -> UsnRecord {
    UsnRecord {
        usn: 0,
        record_length: LittleEndian::read_u32(&buf[0..4]),
        major_version: LittleEndian::read_u16(&buf[4..6]),
        minor_version: LittleEndian::read_u16(&buf[6..8]),
        file_entry: 0,
        file_sequence: 0,
        file_reference_hi: 0,
        parent_entry: 0,
        parent_sequence: 0,
        parent_reference_hi: 0,
        timestamp: 0,
        reason_flags: 0,
        source_info_flags: 0,
        security_id: 0,
        file_attr_flags: 0,
        file_name: String::new(),
        extents: Vec::new(),
        full_path: None,
    }
}

fn read_name(buf: &[u8], name_offset: u16, name_length: u16) -> Option<String> {
    let start = name_offset as usize;
    let end = start.checked_add(name_length as usize)?;
    if end > buf.len() {
        return None;
    }
    Some(crate::mft::attr::utf16le_string(&buf[start..end]))
}

/// v2: 64-bit references.
fn parse_v2(buf: &[u8]) -> Option<UsnRecord> {
    if buf.len() < 60 {
        return None;
    }
    let mut rec = base_record(buf);
    let file_ref = MftReference::from_raw(LittleEndian::read_u64(&buf[8..16]));
    let parent_ref = MftReference::from_raw(LittleEndian::read_u64(&buf[16..24]));
    rec.file_entry = file_ref.entry;
    rec.file_sequence = file_ref.sequence;
    rec.parent_entry = parent_ref.entry;
    rec.parent_sequence = parent_ref.sequence;
    rec.usn = LittleEndian::read_u64(&buf[24..32]);
    rec.timestamp = LittleEndian::read_u64(&buf[32..40]);
    rec.reason_flags = LittleEndian::read_u32(&buf[40..44]);
    rec.source_info_flags = LittleEndian::read_u32(&buf[44..48]);
    rec.security_id = LittleEndian::read_u32(&buf[48..52]);
    rec.file_attr_flags = LittleEndian::read_u32(&buf[52..56]);
    let name_length = LittleEndian::read_u16(&buf[56..58]);
    let name_offset = LittleEndian::read_u16(&buf[58..60]);
    rec.file_name = read_name(buf, name_offset, name_length)?;
    Some(rec)
}

/// v3: 128-bit references.
fn parse_v3(buf: &[u8]) -> Option<UsnRecord> {
    if buf.len() < 76 {
        return None;
    }
    let mut rec = base_record(buf);
    let file_ref = MftReference::from_raw(LittleEndian::read_u64(&buf[8..16]));
    rec.file_entry = file_ref.entry;
    rec.file_sequence = file_ref.sequence;
    rec.file_reference_hi = LittleEndian::read_u64(&buf[16..24]);
    let parent_ref = MftReference::from_raw(LittleEndian::read_u64(&buf[24..32]));
    rec.parent_entry = parent_ref.entry;
    rec.parent_sequence = parent_ref.sequence;
    rec.parent_reference_hi = LittleEndian::read_u64(&buf[32..40]);
    rec.usn = LittleEndian::read_u64(&buf[40..48]);
    rec.timestamp = LittleEndian::read_u64(&buf[48..56]);
    rec.reason_flags = LittleEndian::read_u32(&buf[56..60]);
    rec.source_info_flags = LittleEndian::read_u32(&buf[60..64]);
    rec.security_id = LittleEndian::read_u32(&buf[64..68]);
    rec.file_attr_flags = LittleEndian::read_u32(&buf[68..72]);
    let name_length = LittleEndian::read_u16(&buf[72..74]);
    let name_offset = LittleEndian::read_u16(&buf[74..76]);
    rec.file_name = read_name(buf, name_offset, name_length)?;
    Some(rec)
}

/// v4: v3-style references, no timestamp or name, trailing extent list.
fn parse_v4(buf: &[u8]) -> Option<UsnRecord> {
    if buf.len() < 64 {
        return None;
    }
    let mut rec = base_record(buf);
    let file_ref = MftReference::from_raw(LittleEndian::read_u64(&buf[8..16]));
    rec.file_entry = file_ref.entry;
    rec.file_sequence = file_ref.sequence;
    rec.file_reference_hi = LittleEndian::read_u64(&buf[16..24]);
    let parent_ref = MftReference::from_raw(LittleEndian::read_u64(&buf[24..32]));
    rec.parent_entry = parent_ref.entry;
    rec.parent_sequence = parent_ref.sequence;
    rec.parent_reference_hi = LittleEndian::read_u64(&buf[32..40]);
    rec.usn = LittleEndian::read_u64(&buf[40..48]);
    rec.reason_flags = LittleEndian::read_u32(&buf[48..52]);
    rec.source_info_flags = LittleEndian::read_u32(&buf[52..56]);
    let number_of_extents = LittleEndian::read_u16(&buf[58..60]) as usize;
    let extent_size = LittleEndian::read_u16(&buf[60..62]) as usize;
    if extent_size >= 16 {
        let mut pos = 64;
        for _ in 0..number_of_extents {
            if pos + 16 > buf.len() {
                break;
            }
            rec.extents.push(UsnExtent {
                offset: LittleEndian::read_i64(&buf[pos..pos + 8]),
                length: LittleEndian::read_i64(&buf[pos + 8..pos + 16]),
            });
            pos += extent_size;
        }
    }
    Some(rec)
}

#[cfg(test)]
pub(crate) fn build_v2_record(
    usn: u64,
    file_ref: (u64, u16),
    parent_ref: (u64, u16),
    timestamp: u64,
    reason: u32,
    name: &str,
) -> Vec<u8> {
    let name_bytes = crate::mft::attr::utf16le_bytes(name);
    let name_offset = 60u16;
    let raw_len = 60 + name_bytes.len();
    let record_length = (raw_len + 7) & !7;
    let mut buf = vec![0u8; record_length];
    LittleEndian::write_u32(&mut buf[0..4], record_length as u32);
    LittleEndian::write_u16(&mut buf[4..6], 2);
    LittleEndian::write_u64(&mut buf[8..16], (file_ref.1 as u64) << 48 | file_ref.0);
    LittleEndian::write_u64(&mut buf[16..24], (parent_ref.1 as u64) << 48 | parent_ref.0);
    LittleEndian::write_u64(&mut buf[24..32], usn);
    LittleEndian::write_u64(&mut buf[32..40], timestamp);
    LittleEndian::write_u32(&mut buf[40..44], reason);
    LittleEndian::write_u32(&mut buf[48..52], 0x103);
    LittleEndian::write_u32(&mut buf[52..56], 0x20);
    LittleEndian::write_u16(&mut buf[56..58], name_bytes.len() as u16);
    LittleEndian::write_u16(&mut buf[58..60], name_offset);
    buf[60..60 + name_bytes.len()].copy_from_slice(&name_bytes);
    buf
}
