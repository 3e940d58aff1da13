//! Materializing `$MFT`, `$LogFile`, and `$UsnJrnl:$J` from a volume.
//!
//! Sparse runs are written out as zeros so that offsets in the produced
//! files line up with on-disk positions; `$J` in particular leads with a
//! large hole that downstream parsing relies on.

use crate::error::{CoreError, Result};
use crate::mft::decoder::ROOT_ENTRY;
use crate::mft::reader::{gather_entry, DataStream, EntrySource, MftReader};
use crate::stats::ParseStats;
use crate::traits::{CancelToken, ImageSource, ProgressReporter};
use std::io::Write;
use tracing::{debug, info};

/// Well-known entry number of `$LogFile`.
pub const LOGFILE_ENTRY: u64 = 2;
/// Well-known entry number of `$Extend`.
pub const EXTEND_ENTRY: u64 = 11;

const ZERO_CHUNK: usize = 64 * 1024;

/// What one artifact extraction produced.
#[derive(Debug, Clone)]
pub struct ExtractedArtifact {
    pub name: &'static str,
    pub bytes_written: u64,
    pub sparse_bytes: u64,
}

/// Streams one `$DATA` attribute into `out`, preserving the sparse
/// footprint. Returns `(bytes_written, sparse_bytes)`.
pub fn write_stream<S: ImageSource, W: Write>(
    reader: &mut MftReader<'_, S>,
    stream: &DataStream,
    out: &mut W,
    progress: &mut dyn ProgressReporter,
    cancel: &CancelToken,
) -> Result<(u64, u64)> {
    if let Some(value) = &stream.resident {
        out.write_all(value)?;
        return Ok((value.len() as u64, 0));
    }

    let cluster_size = reader.volume().geom.cluster_size();
    progress.begin(stream.real_size);
    let mut remaining = stream.real_size;
    let mut written = 0u64;
    let mut sparse = 0u64;
    let zeros = vec![0u8; ZERO_CHUNK];

    for run in &stream.runs {
        cancel.check()?;
        if remaining == 0 {
            break;
        }
        let run_bytes = (run.length * cluster_size).min(remaining);
        match run.lcn {
            None => {
                // Hole: emit zeros so downstream offset math stays aligned.
                let mut left = run_bytes;
                while left > 0 {
                    cancel.check()?;
                    let n = (left as usize).min(ZERO_CHUNK);
                    out.write_all(&zeros[..n])?;
                    left -= n as u64;
                    progress.advance(n as u64);
                }
                sparse += run_bytes;
            }
            Some(lcn) => {
                let mut cluster_index = 0u64;
                let mut left = run_bytes;
                while left > 0 {
                    cancel.check()?;
                    let data = reader.read_clusters(lcn + cluster_index, 1)?;
                    let n = (left as usize).min(data.len());
                    if n == 0 {
                        return Err(CoreError::OutOfBounds {
                            offset: (lcn + cluster_index) * cluster_size,
                            max: reader.volume().geom.volume_size(),
                        });
                    }
                    out.write_all(&data[..n])?;
                    left -= n as u64;
                    cluster_index += 1;
                    progress.advance(n as u64);
                }
            }
        }
        written += run_bytes;
        remaining -= run_bytes;
    }
    progress.end();
    Ok((written, sparse))
}

/// Extracts `$MFT` using record 0's own runs.
pub fn extract_mft<S: ImageSource, W: Write>(
    reader: &mut MftReader<'_, S>,
    out: &mut W,
    progress: &mut dyn ProgressReporter,
    cancel: &CancelToken,
) -> Result<ExtractedArtifact> {
    let stream = DataStream {
        name: None,
        resident: None,
        runs: reader.mft_runs().to_vec(),
        real_size: reader.mft_size(),
        allocated_size: reader.mft_size(),
        initialized_size: reader.mft_size(),
    };
    let (bytes_written, sparse_bytes) = write_stream(reader, &stream, out, progress, cancel)?;
    info!(bytes_written, "extracted $MFT");
    Ok(ExtractedArtifact {
        name: "$MFT",
        bytes_written,
        sparse_bytes,
    })
}

/// Extracts `$LogFile` from its well-known entry.
pub fn extract_logfile<S: ImageSource, W: Write>(
    reader: &mut MftReader<'_, S>,
    out: &mut W,
    progress: &mut dyn ProgressReporter,
    cancel: &CancelToken,
) -> Result<ExtractedArtifact> {
    let mut stats = ParseStats::default();
    let raw = reader
        .read_entry(LOGFILE_ENTRY)?
        .filter(|e| e.corrupt.is_none() && e.header.is_file())
        .ok_or_else(|| CoreError::BadBootSector("MFT entry 2 ($LogFile) unreadable".into()))?;
    let gathered = gather_entry(reader, &raw, &mut stats)?;
    if !gathered
        .best_file_name()
        .map(|f| f.name.eq_ignore_ascii_case("$LogFile"))
        .unwrap_or(false)
    {
        debug!("entry 2 does not carry the $LogFile name");
    }
    let stream = gathered
        .unnamed_stream()
        .ok_or_else(|| CoreError::BadBootSector("$LogFile has no $DATA stream".into()))?;
    let (bytes_written, sparse_bytes) =
        write_stream(reader, &stream.clone(), out, progress, cancel)?;
    info!(bytes_written, "extracted $LogFile");
    Ok(ExtractedArtifact {
        name: "$LogFile",
        bytes_written,
        sparse_bytes,
    })
}

/// Finds `$UsnJrnl` by scanning for its `$FILE_NAME` under `$Extend`.
pub fn locate_usnjrnl<E: EntrySource>(src: &mut E, stats: &mut ParseStats) -> Result<Option<u64>> {
    for number in ROOT_ENTRY..src.entry_count() {
        let raw = match src.read_entry(number)? {
            Some(raw) => raw,
            None => break,
        };
        if raw.corrupt.is_some() || raw.is_blank() || !raw.header.base_reference.is_zero() {
            continue;
        }
        let gathered = gather_entry(src, &raw, stats)?;
        let found = gathered.file_names.iter().any(|f| {
            f.parent.entry == EXTEND_ENTRY && f.name.eq_ignore_ascii_case("$UsnJrnl")
        });
        if found {
            return Ok(Some(number));
        }
    }
    Ok(None)
}

/// Extracts the `$J` stream of `$UsnJrnl`.
pub fn extract_usnjrnl<S: ImageSource, W: Write>(
    reader: &mut MftReader<'_, S>,
    out: &mut W,
    progress: &mut dyn ProgressReporter,
    cancel: &CancelToken,
) -> Result<ExtractedArtifact> {
    let mut stats = ParseStats::default();
    let entry = locate_usnjrnl(reader, &mut stats)?
        .ok_or_else(|| CoreError::BadBootSector("no $UsnJrnl entry under $Extend".into()))?;
    let raw = reader
        .read_entry(entry)?
        .ok_or_else(|| CoreError::BadBootSector("$UsnJrnl entry unreadable".into()))?;
    let gathered = gather_entry(reader, &raw, &mut stats)?;
    let stream = gathered
        .named_stream("$J")
        .ok_or_else(|| CoreError::BadBootSector("$UsnJrnl has no $J stream".into()))?;
    let (bytes_written, sparse_bytes) =
        write_stream(reader, &stream.clone(), out, progress, cancel)?;
    info!(bytes_written, sparse_bytes, "extracted $UsnJrnl:$J");
    Ok(ExtractedArtifact {
        name: "$J",
        bytes_written,
        sparse_bytes,
    })
}
