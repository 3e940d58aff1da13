//! Core traits defining the seams of the decoding pipeline.
//!
//! `ImageSource` abstracts the byte source (raw file, mmap, EWF), `RecordSink`
//! is the boundary the output writers implement, and `ProgressReporter` /
//! `CancelToken` keep terminal concerns out of the decoders.

use crate::error::{CoreError, Result};
use crate::logfile::LogFileRecord;
use crate::mft::MftRecord;
use crate::usn::UsnRecord;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A random-access source of image bytes.
///
/// Reads are positioned; there is no shared cursor. A read past the end
/// returns fewer bytes, and callers treat a short read as end-of-stream
/// rather than an error unless a structural minimum is unmet.
pub trait ImageSource: std::fmt::Debug {
    /// Reads at `offset` into `buf`, returning the number of bytes read,
    /// which may be less than `buf.len()` at the end of the source.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Total size of the source in bytes.
    fn size(&self) -> u64;

    /// Reads up to `len` bytes at `offset` into a fresh buffer, truncated
    /// to what was actually available.
    fn read_vec(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let n = self.read_at(offset, &mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }
}

/// An in-memory `ImageSource`, used for resident data and in tests.
#[derive(Debug, Clone, Default)]
pub struct BufSource {
    data: Vec<u8>,
}

impl BufSource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl ImageSource for BufSource {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let start = offset as usize;
        if start >= self.data.len() {
            return Ok(0);
        }
        let end = start.saturating_add(buf.len()).min(self.data.len());
        let n = end - start;
        buf[..n].copy_from_slice(&self.data[start..end]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

impl<T: ImageSource + ?Sized> ImageSource for &mut T {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        (**self).read_at(offset, buf)
    }

    fn size(&self) -> u64 {
        (**self).size()
    }
}

impl<T: ImageSource + ?Sized> ImageSource for Box<T> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        (**self).read_at(offset, buf)
    }

    fn size(&self) -> u64 {
        (**self).size()
    }
}

/// Cooperative cancellation, polled at record and run boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing flag, e.g. one owned by a Ctrl+C handler.
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self(flag)
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Progress reporting boundary. The core never talks to a terminal.
pub trait ProgressReporter {
    fn begin(&mut self, total: u64);
    fn advance(&mut self, n: u64);
    fn end(&mut self);
}

/// Default reporter: does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn begin(&mut self, _total: u64) {}
    fn advance(&mut self, _n: u64) {}
    fn end(&mut self) {}
}

/// Output boundary for decoded records.
///
/// Records are forward-only and never mutated after emission. `finish`
/// commits the output; `abort` leaves partial output with a marker instead
/// of finalizing.
pub trait RecordSink {
    fn mft(&mut self, record: &MftRecord) -> Result<()>;
    fn usn(&mut self, record: &UsnRecord, event: &str) -> Result<()>;
    fn logfile(&mut self, record: &LogFileRecord) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
    fn abort(&mut self, note: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buf_source_short_read() {
        let mut src = BufSource::new(vec![1, 2, 3, 4, 5]);
        let mut buf = [0u8; 4];
        assert_eq!(src.read_at(3, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[4, 5]);
        assert_eq!(src.read_at(5, &mut buf).unwrap(), 0);
        assert_eq!(src.size(), 5);
    }

    #[test]
    fn cancel_token_trips_once_set() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
        token.cancel();
        assert!(matches!(token.check(), Err(CoreError::Cancelled)));
        assert!(token.is_cancelled());
    }
}
