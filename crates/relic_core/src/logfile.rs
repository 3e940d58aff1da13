//! Thin `$LogFile` walker: restart area and record page headers only.
//!
//! Transaction-level redo/undo decoding is deliberately not attempted;
//! each page is surfaced with its header fields and a validity note so a
//! downstream analyst can at least see the log's shape.

use crate::error::Result;
use crate::mft::entry::apply_fixup;
use crate::stats::ParseStats;
use crate::traits::ImageSource;
use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

pub const SIG_RESTART: &[u8; 4] = b"RSTR";
pub const SIG_RECORD: &[u8; 4] = b"RCRD";
pub const SIG_CHKDSK: &[u8; 4] = b"CHKD";

const DEFAULT_PAGE_SIZE: u32 = 4096;
const FIXUP_SECTOR: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogPageKind {
    Restart,
    Record,
    Chkdsk,
    Unknown,
}

/// One page header row.
#[derive(Debug, Clone, Serialize)]
pub struct LogFileRecord {
    pub page_index: u64,
    pub offset: u64,
    pub kind: LogPageKind,
    /// `chkdsk_lsn` for restart pages, `last_lsn` for record pages.
    pub lsn: u64,
    /// Restart pages only; 0 elsewhere.
    pub system_page_size: u32,
    pub log_page_size: u32,
    /// Record pages only; 0 elsewhere.
    pub next_record_offset: u16,
    pub last_end_lsn: u64,
    pub flags: u32,
    pub page_count: u16,
    pub page_position: u16,
    pub fixup_ok: bool,
    pub note: Option<String>,
}

/// Sequential page walker over a `$LogFile` byte stream.
pub struct LogFileParser<S> {
    src: S,
    len: u64,
    pos: u64,
    page_index: u64,
    page_size: u32,
}

impl<S: ImageSource> LogFileParser<S> {
    pub fn new(src: S) -> Self {
        let len = src.size();
        Self {
            src,
            len,
            pos: 0,
            page_index: 0,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Reads the next page header; `None` at end of stream.
    pub fn next_page(&mut self, stats: &mut ParseStats) -> Result<Option<LogFileRecord>> {
        if self.pos + FIXUP_SECTOR as u64 > self.len {
            return Ok(None);
        }
        let mut page = self.src.read_vec(self.pos, self.page_size as usize)?;
        if page.len() < FIXUP_SECTOR {
            return Ok(None);
        }

        let kind = match &page[0..4] {
            sig if sig == SIG_RESTART => LogPageKind::Restart,
            sig if sig == SIG_RECORD => LogPageKind::Record,
            sig if sig == SIG_CHKDSK => LogPageKind::Chkdsk,
            _ => LogPageKind::Unknown,
        };

        let mut record = LogFileRecord {
            page_index: self.page_index,
            offset: self.pos,
            kind,
            lsn: 0,
            system_page_size: 0,
            log_page_size: 0,
            next_record_offset: 0,
            last_end_lsn: 0,
            flags: 0,
            page_count: 0,
            page_position: 0,
            fixup_ok: false,
            note: None,
        };

        if kind == LogPageKind::Unknown {
            record.note = Some(format!(
                "unknown page signature {:02x} {:02x} {:02x} {:02x}",
                page[0], page[1], page[2], page[3]
            ));
            self.advance();
            stats.logfile_pages += 1;
            return Ok(Some(record));
        }

        let usa_offset = LittleEndian::read_u16(&page[4..6]);
        let usa_count = LittleEndian::read_u16(&page[6..8]);
        match apply_fixup(&mut page, usa_offset, usa_count, FIXUP_SECTOR, self.page_index) {
            Ok(()) => record.fixup_ok = true,
            Err(e) => {
                record.note = Some(e.to_string());
                stats.fixup_mismatches += 1;
            }
        }

        match kind {
            LogPageKind::Restart | LogPageKind::Chkdsk => {
                record.lsn = LittleEndian::read_u64(&page[8..16]);
                record.system_page_size = LittleEndian::read_u32(&page[16..20]);
                record.log_page_size = LittleEndian::read_u32(&page[20..24]);
                // The restart area fixes the stride for the rest of the log.
                if self.page_index == 0 && plausible_page_size(record.log_page_size) {
                    self.page_size = record.log_page_size;
                }
            }
            LogPageKind::Record => {
                record.lsn = LittleEndian::read_u64(&page[8..16]);
                record.flags = LittleEndian::read_u32(&page[16..20]);
                record.page_count = LittleEndian::read_u16(&page[20..22]);
                record.page_position = LittleEndian::read_u16(&page[22..24]);
                record.next_record_offset = LittleEndian::read_u16(&page[24..26]);
                record.last_end_lsn = LittleEndian::read_u64(&page[32..40]);
                // Full log-record semantics stay undecoded on purpose.
                record.note.get_or_insert_with(|| {
                    "record page header only; log records not decoded".into()
                });
            }
            LogPageKind::Unknown => unreachable!("handled above"),
        }

        self.advance();
        stats.logfile_pages += 1;
        Ok(Some(record))
    }

    fn advance(&mut self) {
        self.pos += self.page_size as u64;
        self.page_index += 1;
    }

    pub fn for_each(
        &mut self,
        stats: &mut ParseStats,
        cancel: &crate::traits::CancelToken,
        mut emit: impl FnMut(LogFileRecord) -> Result<()>,
    ) -> Result<()> {
        while let Some(record) = {
            cancel.check()?;
            self.next_page(stats)?
        } {
            emit(record)?;
        }
        Ok(())
    }
}

fn plausible_page_size(size: u32) -> bool {
    (512..=65536).contains(&size) && size.is_power_of_two()
}
