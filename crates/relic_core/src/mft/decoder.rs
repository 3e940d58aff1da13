//! Decoding MFT entries into normalized records.

use crate::error::Result;
use crate::filetime;
use crate::mft::reader::{gather_entry, Corruption, EntrySource};
use crate::path::{PathFlag, PathResolver};
use crate::stats::ParseStats;
use crate::traits::CancelToken;
use serde::Serialize;

/// Root directory entry number.
pub const ROOT_ENTRY: u64 = 5;

/// One decoded MFT entry.
#[derive(Debug, Clone, Serialize)]
pub struct MftRecord {
    pub entry_number: u64,
    pub sequence_number: u16,
    pub in_use: bool,
    pub is_directory: bool,
    pub corrupt: bool,
    pub file_name: Option<String>,
    pub parent_entry_number: Option<u64>,
    pub parent_sequence_number: Option<u16>,
    pub file_attr_flags: u32,
    #[serde(serialize_with = "filetime::serialize")]
    pub si_created: u64,
    #[serde(serialize_with = "filetime::serialize")]
    pub si_modified: u64,
    #[serde(serialize_with = "filetime::serialize")]
    pub si_mft_modified: u64,
    #[serde(serialize_with = "filetime::serialize")]
    pub si_accessed: u64,
    #[serde(serialize_with = "filetime::serialize")]
    pub fn_created: u64,
    #[serde(serialize_with = "filetime::serialize")]
    pub fn_modified: u64,
    #[serde(serialize_with = "filetime::serialize")]
    pub fn_mft_modified: u64,
    #[serde(serialize_with = "filetime::serialize")]
    pub fn_accessed: u64,
    pub data_size: u64,
    pub is_resident: bool,
    /// Count of named `$DATA` streams (alternate data streams).
    pub ads_count: u32,
    pub full_path: Option<String>,
    pub note: Option<String>,
}

impl MftRecord {
    fn minimal(number: u64, sequence: u16, note: String) -> Self {
        Self {
            entry_number: number,
            sequence_number: sequence,
            in_use: false,
            is_directory: false,
            corrupt: true,
            file_name: None,
            parent_entry_number: None,
            parent_sequence_number: None,
            file_attr_flags: 0,
            si_created: 0,
            si_modified: 0,
            si_mft_modified: 0,
            si_accessed: 0,
            fn_created: 0,
            fn_modified: 0,
            fn_mft_modified: 0,
            fn_accessed: 0,
            data_size: 0,
            is_resident: false,
            ads_count: 0,
            full_path: None,
            note: Some(note),
        }
    }
}

/// Decoder policy, the CLI flags' counterpart.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeOptions {
    /// Emit `BAAD`/unfixable entries with `corrupt=true` instead of
    /// skipping them.
    pub include_corrupt: bool,
    /// Emit only in-use entries.
    pub active_only: bool,
}

/// Walks an `EntrySource` and produces `MftRecord`s.
pub struct MftDecoder<'e, E> {
    src: &'e mut E,
    opts: DecodeOptions,
}

impl<'e, E: EntrySource> MftDecoder<'e, E> {
    pub fn new(src: &'e mut E, opts: DecodeOptions) -> Self {
        Self { src, opts }
    }

    pub fn entry_count(&self) -> u64 {
        self.src.entry_count()
    }

    /// First pass: the entry → (name, parent) map for path resolution.
    pub fn build_resolver(
        &mut self,
        stats: &mut ParseStats,
        cancel: &CancelToken,
    ) -> Result<PathResolver> {
        let mut resolver = PathResolver::new();
        for number in 0..self.src.entry_count() {
            cancel.check()?;
            let raw = match self.src.read_entry(number)? {
                Some(raw) => raw,
                None => break,
            };
            if raw.corrupt.is_some() || raw.is_blank() || !raw.header.base_reference.is_zero() {
                continue;
            }
            let gathered = gather_entry(self.src, &raw, stats)?;
            if let Some(fname) = gathered.best_file_name() {
                resolver.insert(number, raw.header.sequence, &fname.name, fname.parent);
            }
        }
        Ok(resolver)
    }

    /// Decodes one entry, honoring the corrupt/active policy. `Ok(None)`
    /// means the entry was skipped (blank, extension, filtered, or corrupt
    /// without `include_corrupt`).
    pub fn decode_entry(
        &mut self,
        number: u64,
        resolver: Option<&PathResolver>,
        stats: &mut ParseStats,
    ) -> Result<Option<MftRecord>> {
        let raw = match self.src.read_entry(number)? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        stats.entries_scanned += 1;

        if let Some(corruption) = &raw.corrupt {
            stats.corrupt_entries += 1;
            if matches!(corruption, Corruption::FixupMismatch(_)) {
                stats.fixup_mismatches += 1;
            }
            if !self.opts.include_corrupt {
                return Ok(None);
            }
            let record =
                MftRecord::minimal(number, raw.header.sequence, corruption.to_string());
            stats.mft_records += 1;
            return Ok(Some(record));
        }

        if raw.is_blank() {
            return Ok(None);
        }
        // Extension records are reached through their base; do not emit
        // them as records of their own.
        if !raw.header.base_reference.is_zero() {
            return Ok(None);
        }
        if self.opts.active_only && !raw.header.in_use() {
            return Ok(None);
        }

        let header = raw.header;
        let gathered = gather_entry(self.src, &raw, stats)?;
        let mut notes = gathered.notes.clone();

        if header.used_size > header.allocated_size
            || header.allocated_size > self.src.entry_size()
        {
            notes.push(format!(
                "size fields out of order: used {} allocated {}",
                header.used_size, header.allocated_size
            ));
        }

        let best = gathered.best_file_name();
        let unnamed = gathered.unnamed_stream();
        let ads_count = gathered
            .streams
            .iter()
            .filter(|s| s.name.is_some())
            .count() as u32;

        let mut record = MftRecord {
            entry_number: number,
            sequence_number: header.sequence,
            in_use: header.in_use(),
            is_directory: header.is_directory(),
            corrupt: false,
            file_name: best.map(|f| f.name.clone()),
            parent_entry_number: best.map(|f| f.parent.entry),
            parent_sequence_number: best.map(|f| f.parent.sequence),
            file_attr_flags: gathered.std_info.map(|si| si.dos_flags).unwrap_or(0),
            si_created: gathered.std_info.map(|si| si.created).unwrap_or(0),
            si_modified: gathered.std_info.map(|si| si.modified).unwrap_or(0),
            si_mft_modified: gathered.std_info.map(|si| si.mft_modified).unwrap_or(0),
            si_accessed: gathered.std_info.map(|si| si.accessed).unwrap_or(0),
            fn_created: best.map(|f| f.created).unwrap_or(0),
            fn_modified: best.map(|f| f.modified).unwrap_or(0),
            fn_mft_modified: best.map(|f| f.mft_modified).unwrap_or(0),
            fn_accessed: best.map(|f| f.accessed).unwrap_or(0),
            data_size: unnamed.map(|s| s.real_size).unwrap_or(0),
            is_resident: unnamed.map(|s| s.is_resident()).unwrap_or(false),
            ads_count,
            full_path: None,
            note: None,
        };

        if let Some(resolver) = resolver {
            if let Some(resolved) = resolver.resolve(number, header.sequence) {
                record.full_path = Some(resolved.path);
                match resolved.flag {
                    Some(PathFlag::Cycle) => {
                        stats.path_cycles += 1;
                        notes.push("path cycle".into());
                    }
                    Some(PathFlag::Stale) => {
                        stats.stale_parents += 1;
                        notes.push("stale parent".into());
                    }
                    Some(PathFlag::Missing) | None => {}
                }
            }
        }

        if !notes.is_empty() {
            record.note = Some(notes.join("; "));
        }
        stats.mft_records += 1;
        Ok(Some(record))
    }

    /// Decodes every entry in table order into `emit`.
    pub fn decode_all(
        &mut self,
        resolver: Option<&PathResolver>,
        stats: &mut ParseStats,
        cancel: &CancelToken,
        mut emit: impl FnMut(MftRecord) -> Result<()>,
    ) -> Result<()> {
        for number in 0..self.src.entry_count() {
            cancel.check()?;
            if let Some(record) = self.decode_entry(number, resolver, stats)? {
                emit(record)?;
            }
        }
        Ok(())
    }
}
