//! SQLite output: one table per record kind, batched in one transaction,
//! with btree indexes created at finalization only.

use relic_core::{filetime, CoreError, LogFileRecord, MftRecord, RecordSink, Result, UsnRecord};
use rusqlite::{params, Connection};
use std::path::Path;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS mft_records (
    entry_number INTEGER NOT NULL,
    sequence_number INTEGER NOT NULL,
    in_use INTEGER NOT NULL,
    is_directory INTEGER NOT NULL,
    corrupt INTEGER NOT NULL,
    file_name TEXT,
    parent_entry_number INTEGER,
    parent_sequence_number INTEGER,
    file_attr_flags INTEGER NOT NULL,
    si_created TEXT,
    si_modified TEXT,
    si_mft_modified TEXT,
    si_accessed TEXT,
    fn_created TEXT,
    fn_modified TEXT,
    fn_mft_modified TEXT,
    fn_accessed TEXT,
    data_size INTEGER NOT NULL,
    is_resident INTEGER NOT NULL,
    ads_count INTEGER NOT NULL,
    full_path TEXT,
    note TEXT
);
CREATE TABLE IF NOT EXISTS usn_records (
    usn INTEGER NOT NULL,
    event TEXT NOT NULL,
    record_length INTEGER NOT NULL,
    major_version INTEGER NOT NULL,
    minor_version INTEGER NOT NULL,
    file_entry INTEGER NOT NULL,
    file_sequence INTEGER NOT NULL,
    parent_entry INTEGER NOT NULL,
    parent_sequence INTEGER NOT NULL,
    timestamp TEXT,
    reason_flags INTEGER NOT NULL,
    source_info_flags INTEGER NOT NULL,
    security_id INTEGER NOT NULL,
    file_attr_flags INTEGER NOT NULL,
    file_name TEXT NOT NULL,
    full_path TEXT
);
CREATE TABLE IF NOT EXISTS logfile_pages (
    page_index INTEGER NOT NULL,
    offset INTEGER NOT NULL,
    kind TEXT NOT NULL,
    lsn INTEGER NOT NULL,
    system_page_size INTEGER NOT NULL,
    log_page_size INTEGER NOT NULL,
    next_record_offset INTEGER NOT NULL,
    last_end_lsn INTEGER NOT NULL,
    flags INTEGER NOT NULL,
    page_count INTEGER NOT NULL,
    page_position INTEGER NOT NULL,
    fixup_ok INTEGER NOT NULL,
    note TEXT
);
";

pub struct SqliteSink {
    conn: Connection,
    open_tx: bool,
}

fn sql_err(e: rusqlite::Error) -> CoreError {
    CoreError::Io(std::io::Error::other(e))
}

impl SqliteSink {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(sql_err)?;
        conn.execute_batch(SCHEMA).map_err(sql_err)?;
        conn.execute_batch("BEGIN").map_err(sql_err)?;
        Ok(Self {
            conn,
            open_tx: true,
        })
    }
}

impl RecordSink for SqliteSink {
    fn mft(&mut self, r: &MftRecord) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO mft_records VALUES
                 (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22)",
            )
            .map_err(sql_err)?
            .execute(params![
                r.entry_number as i64,
                r.sequence_number,
                r.in_use,
                r.is_directory,
                r.corrupt,
                r.file_name,
                r.parent_entry_number.map(|v| v as i64),
                r.parent_sequence_number,
                r.file_attr_flags,
                filetime::display(r.si_created),
                filetime::display(r.si_modified),
                filetime::display(r.si_mft_modified),
                filetime::display(r.si_accessed),
                filetime::display(r.fn_created),
                filetime::display(r.fn_modified),
                filetime::display(r.fn_mft_modified),
                filetime::display(r.fn_accessed),
                r.data_size as i64,
                r.is_resident,
                r.ads_count,
                r.full_path,
                r.note,
            ])
            .map_err(sql_err)?;
        Ok(())
    }

    fn usn(&mut self, r: &UsnRecord, event: &str) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO usn_records VALUES
                 (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)",
            )
            .map_err(sql_err)?
            .execute(params![
                r.usn as i64,
                event,
                r.record_length,
                r.major_version,
                r.minor_version,
                r.file_entry as i64,
                r.file_sequence,
                r.parent_entry as i64,
                r.parent_sequence,
                filetime::display(r.timestamp),
                r.reason_flags,
                r.source_info_flags,
                r.security_id,
                r.file_attr_flags,
                r.file_name,
                r.full_path,
            ])
            .map_err(sql_err)?;
        Ok(())
    }

    fn logfile(&mut self, r: &LogFileRecord) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO logfile_pages VALUES
                 (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
            )
            .map_err(sql_err)?
            .execute(params![
                r.page_index as i64,
                r.offset as i64,
                format!("{:?}", r.kind).to_lowercase(),
                r.lsn as i64,
                r.system_page_size,
                r.log_page_size,
                r.next_record_offset,
                r.last_end_lsn as i64,
                r.flags,
                r.page_count,
                r.page_position,
                r.fixup_ok,
                r.note,
            ])
            .map_err(sql_err)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.conn
            .execute_batch(
                "COMMIT;
                 CREATE INDEX IF NOT EXISTS idx_mft_entry_number
                     ON mft_records(entry_number);
                 CREATE INDEX IF NOT EXISTS idx_usn_usn ON usn_records(usn);",
            )
            .map_err(sql_err)?;
        self.open_tx = false;
        Ok(())
    }

    fn abort(&mut self, _note: &str) -> Result<()> {
        // Database sinks commit no finalization step when cancelled.
        if self.open_tx {
            self.conn.execute_batch("ROLLBACK").map_err(sql_err)?;
            self.open_tx = false;
        }
        Ok(())
    }
}
