//! # Relic IO
//!
//! Image source adapters for the Relic NTFS artifact engine: raw/DD files
//! and block devices with an mmap fast path, plus the E01/EWF capability
//! probe.

mod ewf;
mod reader;

pub use ewf::{is_ewf, open_image, EwfCapability};
pub use reader::{Image, MmapImage, RawImage};
