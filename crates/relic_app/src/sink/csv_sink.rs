//! CSV output: UTF-8 with BOM, RFC-4180 quoting, one header row per file.

use super::RecordKind;
use self::paths::path_for;
use relic_core::{filetime, CoreError, LogFileRecord, MftRecord, RecordSink, Result, UsnRecord};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

mod paths {
    use super::*;

    /// A `.csv` base is used verbatim for the first kind and sprouts
    /// `.{kind}.csv` siblings for the rest; any other base is treated as a
    /// directory of `{kind}.csv` files.
    pub(super) fn path_for(base: &Path, kind: RecordKind, first: bool) -> PathBuf {
        if base.extension().map(|e| e == "csv").unwrap_or(false) {
            if first {
                base.to_path_buf()
            } else {
                base.with_extension(format!("{}.csv", kind.stem()))
            }
        } else {
            base.join(format!("{}.csv", kind.stem()))
        }
    }
}

pub struct CsvSink {
    base: PathBuf,
    writers: HashMap<RecordKind, csv::Writer<File>>,
}

impl CsvSink {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            writers: HashMap::new(),
        }
    }

    fn writer(&mut self, kind: RecordKind) -> Result<&mut csv::Writer<File>> {
        if !self.writers.contains_key(&kind) {
            let path = path_for(&self.base, kind, self.writers.is_empty());
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let mut file = File::create(&path)?;
            file.write_all(UTF8_BOM)?;
            let mut writer = csv::Writer::from_writer(file);
            write_header(&mut writer, kind)?;
            self.writers.insert(kind, writer);
        }
        Ok(self.writers.get_mut(&kind).expect("writer just inserted"))
    }
}

fn csv_err(e: csv::Error) -> CoreError {
    CoreError::Io(std::io::Error::other(e))
}

fn write_header(writer: &mut csv::Writer<File>, kind: RecordKind) -> Result<()> {
    let header: &[&str] = match kind {
        RecordKind::Mft => &[
            "entry_number",
            "sequence_number",
            "in_use",
            "is_directory",
            "corrupt",
            "file_name",
            "parent_entry_number",
            "parent_sequence_number",
            "file_attr_flags",
            "si_created",
            "si_modified",
            "si_mft_modified",
            "si_accessed",
            "fn_created",
            "fn_modified",
            "fn_mft_modified",
            "fn_accessed",
            "data_size",
            "is_resident",
            "ads_count",
            "full_path",
            "note",
        ],
        RecordKind::Usn => &[
            "usn",
            "event",
            "record_length",
            "major_version",
            "minor_version",
            "file_entry",
            "file_sequence",
            "parent_entry",
            "parent_sequence",
            "timestamp",
            "reason_flags",
            "source_info_flags",
            "security_id",
            "file_attr_flags",
            "file_name",
            "full_path",
        ],
        RecordKind::LogFile => &[
            "page_index",
            "offset",
            "kind",
            "lsn",
            "system_page_size",
            "log_page_size",
            "next_record_offset",
            "last_end_lsn",
            "flags",
            "page_count",
            "page_position",
            "fixup_ok",
            "note",
        ],
    };
    writer.write_record(header).map_err(csv_err)
}

impl RecordSink for CsvSink {
    fn mft(&mut self, r: &MftRecord) -> Result<()> {
        let row = [
            r.entry_number.to_string(),
            r.sequence_number.to_string(),
            r.in_use.to_string(),
            r.is_directory.to_string(),
            r.corrupt.to_string(),
            r.file_name.clone().unwrap_or_default(),
            r.parent_entry_number.map(|v| v.to_string()).unwrap_or_default(),
            r.parent_sequence_number.map(|v| v.to_string()).unwrap_or_default(),
            format!("{:#x}", r.file_attr_flags),
            filetime::display(r.si_created),
            filetime::display(r.si_modified),
            filetime::display(r.si_mft_modified),
            filetime::display(r.si_accessed),
            filetime::display(r.fn_created),
            filetime::display(r.fn_modified),
            filetime::display(r.fn_mft_modified),
            filetime::display(r.fn_accessed),
            r.data_size.to_string(),
            r.is_resident.to_string(),
            r.ads_count.to_string(),
            r.full_path.clone().unwrap_or_default(),
            r.note.clone().unwrap_or_default(),
        ];
        self.writer(RecordKind::Mft)?
            .write_record(&row)
            .map_err(csv_err)
    }

    fn usn(&mut self, r: &UsnRecord, event: &str) -> Result<()> {
        let row = [
            r.usn.to_string(),
            event.to_string(),
            r.record_length.to_string(),
            r.major_version.to_string(),
            r.minor_version.to_string(),
            r.file_entry.to_string(),
            r.file_sequence.to_string(),
            r.parent_entry.to_string(),
            r.parent_sequence.to_string(),
            filetime::display(r.timestamp),
            format!("{:#x}", r.reason_flags),
            format!("{:#x}", r.source_info_flags),
            r.security_id.to_string(),
            format!("{:#x}", r.file_attr_flags),
            r.file_name.clone(),
            r.full_path.clone().unwrap_or_default(),
        ];
        self.writer(RecordKind::Usn)?
            .write_record(&row)
            .map_err(csv_err)
    }

    fn logfile(&mut self, r: &LogFileRecord) -> Result<()> {
        let row = [
            r.page_index.to_string(),
            r.offset.to_string(),
            format!("{:?}", r.kind).to_lowercase(),
            r.lsn.to_string(),
            r.system_page_size.to_string(),
            r.log_page_size.to_string(),
            r.next_record_offset.to_string(),
            r.last_end_lsn.to_string(),
            format!("{:#x}", r.flags),
            r.page_count.to_string(),
            r.page_position.to_string(),
            r.fixup_ok.to_string(),
            r.note.clone().unwrap_or_default(),
        ];
        self.writer(RecordKind::LogFile)?
            .write_record(&row)
            .map_err(csv_err)
    }

    fn finish(&mut self) -> Result<()> {
        for writer in self.writers.values_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    fn abort(&mut self, note: &str) -> Result<()> {
        // Partial output keeps what was written, with a marker line.
        for writer in self.writers.values_mut() {
            writer
                .write_record([format!("#cancelled: {note}")])
                .map_err(csv_err)?;
            writer.flush()?;
        }
        Ok(())
    }
}
