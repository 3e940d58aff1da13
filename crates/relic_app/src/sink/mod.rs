//! Record sink implementations: CSV, JSON, and SQLite.

mod csv_sink;
mod json_sink;
mod sqlite_sink;

pub use csv_sink::CsvSink;
pub use json_sink::JsonSink;
pub use sqlite_sink::SqliteSink;

use anyhow::Result;
use clap::ValueEnum;
use relic_core::RecordSink;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Csv,
    Json,
    Sqlite,
}

/// Record kinds a sink can receive; used for per-kind files and tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Mft,
    Usn,
    LogFile,
}

impl RecordKind {
    pub fn stem(self) -> &'static str {
        match self {
            RecordKind::Mft => "mft",
            RecordKind::Usn => "usn",
            RecordKind::LogFile => "logfile",
        }
    }
}

pub fn make_sink(format: OutputFormat, output: &Path) -> Result<Box<dyn RecordSink>> {
    Ok(match format {
        OutputFormat::Csv => Box::new(CsvSink::new(output)),
        OutputFormat::Json => Box::new(JsonSink::create(output)?),
        OutputFormat::Sqlite => Box::new(SqliteSink::create(output)?),
    })
}
