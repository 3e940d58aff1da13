//! # Relic Core
//!
//! Decoding core of the Relic NTFS artifact engine: partition location,
//! boot-sector geometry, MFT reading and decoding, `$UsnJrnl:$J` streaming,
//! a thin `$LogFile` walker, and artifact extraction.
//!
//! The crate is deliberately free of terminal and output-format concerns:
//! bytes come in through [`ImageSource`], records leave through
//! [`RecordSink`], and progress/cancellation cross the [`ProgressReporter`]
//! and [`CancelToken`] seams.
//!
//! ## Pipeline
//!
//! `ImageSource → partition → volume → {MftReader, extract} →
//! {MftDecoder → PathResolver, UsnDecoder, LogFileParser} → RecordSink`

mod error;
pub mod extract;
pub mod filetime;
pub mod logfile;
pub mod mft;
pub mod partition;
pub mod path;
pub mod runlist;
pub mod stats;
mod traits;
pub mod usn;
pub mod volume;

pub use error::{CoreError, Result};
pub use extract::{extract_logfile, extract_mft, extract_usnjrnl, ExtractedArtifact};
pub use logfile::{LogFileParser, LogFileRecord, LogPageKind};
pub use mft::{
    DecodeOptions, EntrySource, MftDecoder, MftFile, MftReader, MftRecord, MftReference,
};
pub use partition::{locate_partitions, select_ntfs, Partition, TypeTag};
pub use path::{PathFlag, PathResolver, ResolvedPath};
pub use runlist::{decode_runs, DataRun};
pub use stats::ParseStats;
pub use traits::{
    BufSource, CancelToken, ImageSource, ProgressReporter, RecordSink, SilentProgress,
};
pub use usn::{UsnDecoder, UsnDecoderOptions, UsnRecord};
pub use volume::{Geometry, NtfsVolume};
