//! Reading MFT entries from a volume or from a pre-extracted `$MFT` file.
//!
//! The volume reader bootstraps from record 0, whose own `$DATA` runs
//! describe the rest of the table. Both readers hand out fixed-up entry
//! buffers through the `EntrySource` seam the decoder consumes.

use crate::error::{CoreError, Result};
use crate::mft::attr::{type_code, AttrValue, AttrWalker};
use crate::mft::entry::{apply_fixup, EntryHeader, SIG_BAAD, SIG_FILE};
use crate::runlist::{decode_runs, DataRun};
use crate::traits::ImageSource;
use crate::volume::NtfsVolume;
use tracing::{debug, warn};

/// Largest non-resident `$ATTRIBUTE_LIST` the readers will materialize.
const MAX_ATTR_LIST_BYTES: u64 = 4 * 1024 * 1024;

/// Why an entry cannot be trusted.
#[derive(Debug, Clone)]
pub enum Corruption {
    BaadSignature,
    FixupMismatch(String),
}

impl std::fmt::Display for Corruption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Corruption::BaadSignature => write!(f, "BAAD signature"),
            Corruption::FixupMismatch(detail) => write!(f, "{detail}"),
        }
    }
}

/// One entry as read from disk, fixed up when possible.
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub number: u64,
    pub header: EntryHeader,
    pub data: Vec<u8>,
    /// Why this entry cannot be trusted, when it cannot.
    pub corrupt: Option<Corruption>,
}

impl RawEntry {
    /// Signature is neither `FILE` nor `BAAD`; typically a never-used slot.
    pub fn is_blank(&self) -> bool {
        !self.header.is_file() && !self.header.is_baad()
    }
}

/// Source of MFT entries, either volume-backed or a flat `$MFT` stream.
pub trait EntrySource {
    fn entry_size(&self) -> u32;
    fn entry_count(&self) -> u64;

    /// Reads entry `number`, or `None` past the end of the table.
    /// Fixup mismatches and `BAAD` signatures come back with `corrupt` set
    /// rather than as errors; the pipeline recovers at record scope.
    fn read_entry(&mut self, number: u64) -> Result<Option<RawEntry>>;

    /// Materializes a non-resident attribute value (used for scattered
    /// `$ATTRIBUTE_LIST`s). A flat stream has no clusters to read from.
    fn read_nonresident(&mut self, _runs: &[DataRun], _real_size: u64) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

fn fix_entry(number: u64, mut data: Vec<u8>, bytes_per_sector: usize) -> Result<Option<RawEntry>> {
    let header = EntryHeader::parse(&data)?;
    let mut corrupt = None;
    if header.is_baad() {
        corrupt = Some(Corruption::BaadSignature);
    } else if header.is_file() {
        if let Err(e) = apply_fixup(
            &mut data,
            header.usa_offset,
            header.usa_count,
            bytes_per_sector,
            number,
        ) {
            corrupt = Some(Corruption::FixupMismatch(e.to_string()));
        }
    }
    Ok(Some(RawEntry {
        number,
        header,
        data,
        corrupt,
    }))
}

/// A pre-extracted `$MFT` file (or any flat stream of entries).
pub struct MftFile<S> {
    src: S,
    entry_size: u32,
    count: u64,
}

impl<S: ImageSource> MftFile<S> {
    /// Detects the entry size from record 0's allocated-size field, falling
    /// back to 1024 when it is implausible.
    pub fn new(mut src: S) -> Result<Self> {
        let head = src.read_vec(0, 48)?;
        if head.len() < 48 || (&head[0..4] != SIG_FILE && &head[0..4] != SIG_BAAD) {
            return Err(CoreError::BadBootSector(
                "input does not start with an MFT entry".into(),
            ));
        }
        let header = EntryHeader::parse(&head)?;
        let alloc = header.allocated_size;
        let entry_size = if (256..=65536).contains(&alloc) && alloc.is_power_of_two() {
            alloc
        } else {
            debug!(alloc, "implausible allocated size in entry 0, assuming 1024");
            1024
        };
        let count = src.size() / entry_size as u64;
        Ok(Self {
            src,
            entry_size,
            count,
        })
    }

    fn sector_size(&self, header: &EntryHeader) -> usize {
        // The update sequence array covers one slot per sector.
        if header.usa_count >= 2 {
            let sectors = header.usa_count as u32 - 1;
            if self.entry_size % sectors == 0 {
                let candidate = self.entry_size / sectors;
                if candidate >= 256 && candidate.is_power_of_two() {
                    return candidate as usize;
                }
            }
        }
        512
    }
}

impl<S: ImageSource> EntrySource for MftFile<S> {
    fn entry_size(&self) -> u32 {
        self.entry_size
    }

    fn entry_count(&self) -> u64 {
        self.count
    }

    fn read_entry(&mut self, number: u64) -> Result<Option<RawEntry>> {
        if number >= self.count {
            return Ok(None);
        }
        let offset = number * self.entry_size as u64;
        let data = self.src.read_vec(offset, self.entry_size as usize)?;
        if data.len() < self.entry_size as usize {
            return Ok(None);
        }
        let header = EntryHeader::parse(&data)?;
        let bps = self.sector_size(&header);
        fix_entry(number, data, bps)
    }
}

/// Volume-backed reader, bootstrapped from MFT record 0.
pub struct MftReader<'a, S> {
    src: &'a mut S,
    vol: NtfsVolume,
    runs: Vec<DataRun>,
    mft_size: u64,
}

impl<'a, S: ImageSource> MftReader<'a, S> {
    pub fn new(src: &'a mut S, vol: NtfsVolume) -> Result<Self> {
        let entry_size = vol.geom.mft_entry_size as usize;
        let boot_offset = vol.geom.mft_cluster_lcn * vol.geom.cluster_size();
        let mut data = vol.read_at(src, boot_offset, entry_size)?;
        if data.len() < entry_size {
            return Err(CoreError::BadBootSector(
                "MFT record 0 lies past the end of the volume".into(),
            ));
        }
        let header = EntryHeader::parse(&data)?;
        if !header.is_file() {
            return Err(CoreError::BadBootSector(
                "MFT record 0 has no FILE signature".into(),
            ));
        }
        apply_fixup(
            &mut data,
            header.usa_offset,
            header.usa_count,
            vol.geom.bytes_per_sector as usize,
            0,
        )?;

        let mut runs = Vec::new();
        let mut mft_size = 0u64;
        let mut has_attr_list = false;
        for attr in AttrWalker::new(&data, header.first_attr_offset, header.used_size) {
            let attr = attr?;
            if attr.header.type_code == type_code::ATTRIBUTE_LIST {
                has_attr_list = true;
            }
            if attr.header.type_code != type_code::DATA || !attr.header.is_unnamed() {
                continue;
            }
            if let Some(pairs) = attr.mapping_pairs() {
                runs = decode_runs(pairs)?;
            }
            if let crate::mft::attr::AttrBody::NonResident { real_size, .. } = attr.header.body {
                mft_size = real_size;
            }
        }
        if runs.is_empty() {
            return Err(CoreError::BadBootSector(
                "MFT record 0 carries no non-resident $DATA runs".into(),
            ));
        }
        if has_attr_list {
            debug!("MFT record 0 carries an $ATTRIBUTE_LIST; base runs only");
        }
        Ok(Self {
            src,
            vol,
            runs,
            mft_size,
        })
    }

    pub fn volume(&self) -> &NtfsVolume {
        &self.vol
    }

    /// Total size of the `$MFT` data stream in bytes.
    pub fn mft_size(&self) -> u64 {
        self.mft_size
    }

    pub fn mft_runs(&self) -> &[DataRun] {
        &self.runs
    }

    /// Reads from the virtual (VCN-addressed) byte stream described by
    /// `runs`; sparse extents read as zeros.
    pub fn read_stream(&mut self, runs: &[DataRun], offset: u64, len: usize) -> Result<Vec<u8>> {
        read_virtual(&self.vol, self.src, runs, offset, len)
    }

    pub fn read_clusters(&mut self, lcn: u64, count: u64) -> Result<Vec<u8>> {
        self.vol.read_clusters(self.src, lcn, count)
    }
}

fn read_virtual<S: ImageSource>(
    vol: &NtfsVolume,
    src: &mut S,
    runs: &[DataRun],
    offset: u64,
    len: usize,
) -> Result<Vec<u8>> {
    let cluster = vol.geom.cluster_size();
    let mut out = vec![0u8; len];
    let mut filled = 0usize;
    let mut run_start = 0u64; // byte offset of the current run
    for run in runs {
        let run_len = run.length * cluster;
        let run_end = run_start + run_len;
        let want_start = offset + filled as u64;
        if want_start >= run_end {
            run_start = run_end;
            continue;
        }
        let within = want_start - run_start;
        let take = ((run_len - within) as usize).min(len - filled);
        if let Some(lcn) = run.lcn {
            let abs = lcn * cluster + within;
            let got = vol.read_at(src, abs, take)?;
            out[filled..filled + got.len()].copy_from_slice(&got);
            if got.len() < take {
                // Backing clusters ran past the image; stop here.
                out.truncate(filled + got.len());
                return Ok(out);
            }
        }
        filled += take;
        if filled == len {
            return Ok(out);
        }
        run_start = run_end;
    }
    out.truncate(filled);
    Ok(out)
}

impl<'a, S: ImageSource> EntrySource for MftReader<'a, S> {
    fn entry_size(&self) -> u32 {
        self.vol.geom.mft_entry_size
    }

    fn entry_count(&self) -> u64 {
        self.mft_size / self.vol.geom.mft_entry_size as u64
    }

    fn read_entry(&mut self, number: u64) -> Result<Option<RawEntry>> {
        let entry_size = self.vol.geom.mft_entry_size;
        let offset = number * entry_size as u64;
        if self.mft_size > 0 && offset + entry_size as u64 > self.mft_size {
            return Ok(None);
        }
        let data = read_virtual(&self.vol, self.src, &self.runs, offset, entry_size as usize)?;
        if data.len() < entry_size as usize {
            return Ok(None);
        }
        fix_entry(number, data, self.vol.geom.bytes_per_sector as usize)
    }

    fn read_nonresident(&mut self, runs: &[DataRun], real_size: u64) -> Result<Option<Vec<u8>>> {
        if real_size > MAX_ATTR_LIST_BYTES {
            warn!(real_size, "oversized non-resident attribute value, skipping");
            return Ok(None);
        }
        let data = self.read_stream(runs, 0, real_size as usize)?;
        Ok(Some(data))
    }
}

/// Looks at every attribute of an entry and returns the ones that matter,
/// following `$ATTRIBUTE_LIST` indirection across extension records.
pub fn gather_entry<E: EntrySource>(
    src: &mut E,
    base: &RawEntry,
    stats: &mut crate::stats::ParseStats,
) -> Result<GatheredEntry> {
    let mut gathered = GatheredEntry {
        header: base.header,
        ..GatheredEntry::default()
    };
    let mut list_refs = Vec::new();
    collect_from_buffer(base, &mut gathered, Some(&mut list_refs), src)?;

    if list_refs.is_empty() {
        gathered.finish_streams();
        return Ok(gathered);
    }

    // Extension records named by the attribute list, deduplicated in
    // first-reference order.
    let mut seen = std::collections::HashSet::new();
    seen.insert(base.number);
    let mut fan_out = 0usize;
    for entry_ref in list_refs {
        if entry_ref.entry == base.number {
            continue;
        }
        if !seen.insert(entry_ref.entry) {
            continue;
        }
        fan_out += 1;
        if fan_out > 256 {
            stats.attribute_list_cycles += 1;
            gathered
                .notes
                .push("attribute list fan-out exceeds 256 extension records".into());
            break;
        }
        match src.read_entry(entry_ref.entry)? {
            Some(ext) => {
                if ext.corrupt.is_some() || ext.is_blank() {
                    gathered
                        .notes
                        .push(format!("extension record {} unreadable", entry_ref.entry));
                    continue;
                }
                if ext.header.sequence != entry_ref.sequence {
                    gathered.notes.push(format!(
                        "extension record {} sequence changed",
                        entry_ref.entry
                    ));
                    continue;
                }
                if ext.header.base_reference.entry == entry_ref.entry {
                    // An extension claiming to be its own base would chain
                    // forever through re-gathering; treat as a loop.
                    stats.attribute_list_cycles += 1;
                    gathered
                        .notes
                        .push(format!("extension record {} loops", entry_ref.entry));
                    continue;
                }
                collect_from_buffer(&ext, &mut gathered, None, src)?;
            }
            None => gathered
                .notes
                .push(format!("extension record {} out of range", entry_ref.entry)),
        }
    }
    gathered.finish_streams();
    Ok(gathered)
}

fn collect_from_buffer<E: EntrySource>(
    raw: &RawEntry,
    gathered: &mut GatheredEntry,
    mut list_refs: Option<&mut Vec<crate::mft::entry::MftReference>>,
    src: &mut E,
) -> Result<()> {
    for attr in AttrWalker::new(&raw.data, raw.header.first_attr_offset, raw.header.used_size) {
        let attr = match attr {
            Ok(attr) => attr,
            Err(e) => {
                gathered.notes.push(e.to_string());
                break;
            }
        };
        match attr.value() {
            AttrValue::StandardInformation(si) => {
                gathered.std_info.get_or_insert(si);
            }
            AttrValue::FileName(fname) => gathered.file_names.push(fname),
            AttrValue::AttributeList(entries) => {
                if let Some(refs) = list_refs.as_deref_mut() {
                    refs.extend(entries.into_iter().map(|e| e.base));
                }
            }
            AttrValue::Data => {
                let piece = match stream_piece(&attr) {
                    Ok(piece) => piece,
                    Err(e) => {
                        gathered.notes.push(e.to_string());
                        continue;
                    }
                };
                gathered.pieces.push(piece);
            }
            AttrValue::Other(code) if code == type_code::ATTRIBUTE_LIST => {
                // Non-resident attribute list: materialize it if we can.
                if let Some(refs) = list_refs.as_deref_mut() {
                    match nonresident_attr_list(&attr, src) {
                        Ok(Some(entries)) => refs.extend(entries.into_iter().map(|e| e.base)),
                        Ok(None) => gathered
                            .notes
                            .push("non-resident attribute list unavailable".into()),
                        Err(e) => gathered.notes.push(e.to_string()),
                    }
                }
            }
            AttrValue::Other(_) => {}
        }
    }
    Ok(())
}

fn nonresident_attr_list<E: EntrySource>(
    attr: &crate::mft::attr::ParsedAttr<'_>,
    src: &mut E,
) -> Result<Option<Vec<crate::mft::attr::AttrListEntry>>> {
    let pairs = match attr.mapping_pairs() {
        Some(pairs) => pairs,
        None => return Ok(None),
    };
    let runs = decode_runs(pairs)?;
    let real_size = match attr.header.body {
        crate::mft::attr::AttrBody::NonResident { real_size, .. } => real_size,
        _ => return Ok(None),
    };
    match src.read_nonresident(&runs, real_size)? {
        Some(value) => Ok(Some(crate::mft::attr::parse_attr_list(&value))),
        None => Ok(None),
    }
}

fn stream_piece(attr: &crate::mft::attr::ParsedAttr<'_>) -> Result<StreamPiece> {
    use crate::mft::attr::AttrBody;
    match attr.header.body {
        AttrBody::Resident { value_length, .. } => Ok(StreamPiece {
            name: attr.header.name.clone(),
            start_vcn: 0,
            resident: Some(attr.resident_value().unwrap_or_default().to_vec()),
            runs: Vec::new(),
            real_size: value_length as u64,
            allocated_size: value_length as u64,
            initialized_size: value_length as u64,
        }),
        AttrBody::NonResident {
            start_vcn,
            allocated_size,
            real_size,
            initialized_size,
            ..
        } => {
            let pairs = attr
                .mapping_pairs()
                .ok_or_else(|| CoreError::BadRunList("missing mapping pairs".into()))?;
            Ok(StreamPiece {
                name: attr.header.name.clone(),
                start_vcn,
                resident: None,
                runs: decode_runs(pairs)?,
                real_size,
                allocated_size,
                initialized_size,
            })
        }
    }
}

/// One `$DATA` attribute instance before cross-record merging.
#[derive(Debug, Clone)]
struct StreamPiece {
    name: Option<String>,
    start_vcn: u64,
    resident: Option<Vec<u8>>,
    runs: Vec<DataRun>,
    real_size: u64,
    allocated_size: u64,
    initialized_size: u64,
}

/// A complete `$DATA` stream with its runs in VCN order.
#[derive(Debug, Clone)]
pub struct DataStream {
    pub name: Option<String>,
    pub resident: Option<Vec<u8>>,
    pub runs: Vec<DataRun>,
    pub real_size: u64,
    pub allocated_size: u64,
    pub initialized_size: u64,
}

impl DataStream {
    pub fn is_resident(&self) -> bool {
        self.resident.is_some()
    }
}

/// Everything the decoder and extractor need from one logical entry.
#[derive(Debug, Default)]
pub struct GatheredEntry {
    pub header: EntryHeader,
    pub std_info: Option<crate::mft::attr::StandardInformation>,
    pub file_names: Vec<crate::mft::attr::FileName>,
    pub streams: Vec<DataStream>,
    pub notes: Vec<String>,
    pieces: Vec<StreamPiece>,
}

impl GatheredEntry {
    /// Merges `$DATA` pieces by stream name, ordered by starting VCN.
    fn finish_streams(&mut self) {
        let mut pieces = std::mem::take(&mut self.pieces);
        pieces.sort_by(|a, b| (&a.name, a.start_vcn).cmp(&(&b.name, b.start_vcn)));
        for piece in pieces {
            match self.streams.last_mut() {
                Some(stream) if stream.name == piece.name && piece.start_vcn > 0 => {
                    stream.runs.extend(piece.runs);
                }
                _ => self.streams.push(DataStream {
                    name: piece.name,
                    resident: piece.resident,
                    runs: piece.runs,
                    real_size: piece.real_size,
                    allocated_size: piece.allocated_size,
                    initialized_size: piece.initialized_size,
                }),
            }
        }
    }

    /// The anonymous `$DATA` stream, when present.
    pub fn unnamed_stream(&self) -> Option<&DataStream> {
        self.streams.iter().find(|s| s.name.is_none())
    }

    /// A named `$DATA` stream, matched case-insensitively.
    pub fn named_stream(&self, name: &str) -> Option<&DataStream> {
        self.streams.iter().find(|s| {
            s.name
                .as_deref()
                .map(|n| n.eq_ignore_ascii_case(name))
                .unwrap_or(false)
        })
    }

    /// The `$FILE_NAME` with the best namespace rank.
    pub fn best_file_name(&self) -> Option<&crate::mft::attr::FileName> {
        self.file_names.iter().min_by_key(|f| f.namespace_rank())
    }
}
