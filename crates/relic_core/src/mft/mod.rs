//! Master File Table structures and decoding.

pub mod attr;
pub mod decoder;
pub mod entry;
pub mod reader;

pub use attr::{AttrValue, FileName, StandardInformation};
pub use decoder::{DecodeOptions, MftDecoder, MftRecord, ROOT_ENTRY};
pub use entry::{apply_fixup, EntryHeader, MftReference};
pub use reader::{DataStream, EntrySource, MftFile, MftReader, RawEntry};
