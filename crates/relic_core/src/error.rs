//! Core error types for the Relic NTFS artifact engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying image source failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// E01 without a backing EWF capability, or an unknown container
    #[error("unsupported image format: {0}")]
    UnsupportedImageFormat(String),

    /// The locator found no NTFS partition matching the selection
    #[error("no NTFS partition matched the selection")]
    NoNtfsPartition,

    /// Signature or invariant violation in the NTFS boot sector
    #[error("bad NTFS boot sector: {0}")]
    BadBootSector(String),

    /// A sector fingerprint disagreed with the update-sequence array
    #[error("fixup mismatch in entry {entry}, sector {sector}: found {found:#06x}, expected {expected:#06x}")]
    FixupMismatch {
        entry: u64,
        sector: usize,
        found: u16,
        expected: u16,
    },

    /// Mapping pairs could not be decoded
    #[error("bad run list: {0}")]
    BadRunList(String),

    /// The extension record chain of an $ATTRIBUTE_LIST loops
    #[error("attribute list cycle at MFT reference {entry}#{sequence}")]
    AttributeListCycle { entry: u64, sequence: u16 },

    /// Implausible USN record length
    #[error("corrupt USN record at offset {offset}: length {length}")]
    UsnCorrupt { offset: u64, length: u32 },

    /// Parent chain of an MFT entry loops
    #[error("path resolution cycle at entry {0}")]
    PathCycle(u64),

    /// Parent entry was reused since the child referenced it
    #[error("stale parent reference for entry {0}")]
    StaleParent(u64),

    /// Read past the end of the image
    #[error("offset {offset} is out of bounds (max: {max})")]
    OutOfBounds { offset: u64, max: u64 },

    /// A fixed-layout structure ended before its required fields
    #[error("truncated structure: {0}")]
    Truncated(String),

    /// Cooperative abort
    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, CoreError>;
