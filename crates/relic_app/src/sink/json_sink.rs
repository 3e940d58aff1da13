//! JSON output: a single array of record objects tagged with their kind.

use relic_core::{CoreError, LogFileRecord, MftRecord, RecordSink, Result, UsnRecord};
use serde_json::{json, Value};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub struct JsonSink {
    out: BufWriter<File>,
    first: bool,
}

impl JsonSink {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(b"[")?;
        Ok(Self { out, first: true })
    }

    fn push(&mut self, value: Value) -> Result<()> {
        if self.first {
            self.first = false;
            self.out.write_all(b"\n")?;
        } else {
            self.out.write_all(b",\n")?;
        }
        serde_json::to_writer(&mut self.out, &value)
            .map_err(|e| CoreError::Io(std::io::Error::other(e)))?;
        Ok(())
    }

    fn tagged(kind: &str, value: Value) -> Value {
        match value {
            Value::Object(mut map) => {
                map.insert("record_type".into(), json!(kind));
                Value::Object(map)
            }
            other => other,
        }
    }
}

impl RecordSink for JsonSink {
    fn mft(&mut self, r: &MftRecord) -> Result<()> {
        let value = serde_json::to_value(r).map_err(|e| CoreError::Io(std::io::Error::other(e)))?;
        self.push(Self::tagged("mft", value))
    }

    fn usn(&mut self, r: &UsnRecord, event: &str) -> Result<()> {
        let mut value =
            serde_json::to_value(r).map_err(|e| CoreError::Io(std::io::Error::other(e)))?;
        if let Value::Object(map) = &mut value {
            map.insert("event".into(), json!(event));
        }
        self.push(Self::tagged("usn", value))
    }

    fn logfile(&mut self, r: &LogFileRecord) -> Result<()> {
        let value = serde_json::to_value(r).map_err(|e| CoreError::Io(std::io::Error::other(e)))?;
        self.push(Self::tagged("logfile", value))
    }

    fn finish(&mut self) -> Result<()> {
        self.out.write_all(b"\n]\n")?;
        self.out.flush()?;
        Ok(())
    }

    fn abort(&mut self, note: &str) -> Result<()> {
        self.push(json!({ "record_type": "marker", "cancelled": true, "note": note }))?;
        self.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn emits_a_single_tagged_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.json");
        let mut sink = JsonSink::create(&path).unwrap();
        let record = LogFileRecord {
            page_index: 0,
            offset: 0,
            kind: relic_core::LogPageKind::Restart,
            lsn: 7,
            system_page_size: 4096,
            log_page_size: 4096,
            next_record_offset: 0,
            last_end_lsn: 0,
            flags: 0,
            page_count: 0,
            page_position: 0,
            fixup_ok: true,
            note: None,
        };
        sink.logfile(&record).unwrap();
        sink.finish().unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let array = parsed.as_array().unwrap();
        assert_eq!(array.len(), 1);
        assert_eq!(array[0]["record_type"], "logfile");
        assert_eq!(array[0]["lsn"], 7);
        assert_eq!(array[0]["kind"], "restart");
    }

    #[test]
    fn abort_appends_marker_and_closes_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.json");
        let mut sink = JsonSink::create(&path).unwrap();
        sink.abort("cancelled").unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let array = parsed.as_array().unwrap();
        assert_eq!(array[0]["cancelled"], true);
    }
}
