//! Partition enumeration from MBR/GPT and NTFS probing.
//!
//! Sector 0 is interpreted in order: a bare NTFS volume dump (boot sector
//! right at offset 0), then a classic or protective MBR, then GPT behind a
//! 0xEE entry. Each enumerated partition's first sector is probed for the
//! NTFS OEM signature.

use crate::error::{CoreError, Result};
use crate::traits::ImageSource;
use byteorder::{ByteOrder, LittleEndian};
use std::fmt;
use tracing::warn;

pub const SECTOR_SIZE: u64 = 512;

/// NTFS boot sector OEM signature at offset 3.
pub const NTFS_OEM_ID: &[u8; 8] = b"NTFS    ";

const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];
const MBR_TABLE_OFFSET: usize = 0x1BE;
const MBR_TYPE_GPT_PROTECTIVE: u8 = 0xEE;
const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";

/// Mixed-endian GUID as stored in GPT structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Guid(pub [u8; 16]);

impl Guid {
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            LittleEndian::read_u32(&b[0..4]),
            LittleEndian::read_u16(&b[4..6]),
            LittleEndian::read_u16(&b[6..8]),
            b[8],
            b[9],
            b[10],
            b[11],
            b[12],
            b[13],
            b[14],
            b[15],
        )
    }
}

/// Where a partition entry came from and its raw type tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeTag {
    /// Image with no partition table; the whole image is the volume.
    WholeImage,
    /// MBR entry with its partition type byte.
    Mbr(u8),
    /// GPT entry with its type GUID and display name.
    Gpt { type_guid: Guid, name: String },
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::WholeImage => write!(f, "whole-image"),
            TypeTag::Mbr(t) => write!(f, "mbr:{t:#04x}"),
            TypeTag::Gpt { type_guid, .. } => write!(f, "gpt:{type_guid}"),
        }
    }
}

/// One enumerated partition.
#[derive(Debug, Clone)]
pub struct Partition {
    /// Position in enumeration order, across the whole table.
    pub index: usize,
    /// Absolute byte offset of the first sector.
    pub start: u64,
    /// Length in bytes.
    pub length: u64,
    pub type_tag: TypeTag,
    /// First sector carries `"NTFS    "` at offset 3.
    pub is_ntfs: bool,
}

/// True when `sector` looks like an NTFS boot sector.
pub fn is_ntfs_boot_sector(sector: &[u8]) -> bool {
    sector.len() >= 11 && &sector[3..11] == NTFS_OEM_ID
}

/// Enumerates partitions of an image and probes each for NTFS.
pub fn locate_partitions<S: ImageSource>(src: &mut S) -> Result<Vec<Partition>> {
    let sector0 = src.read_vec(0, SECTOR_SIZE as usize)?;
    if sector0.len() < SECTOR_SIZE as usize {
        return Err(CoreError::UnsupportedImageFormat(
            "image shorter than one sector".into(),
        ));
    }

    // A volume dump has the boot sector at offset 0; it also carries the
    // 55 AA trailer, so this probe must run before MBR interpretation.
    if is_ntfs_boot_sector(&sector0) {
        return Ok(vec![Partition {
            index: 0,
            start: 0,
            length: src.size(),
            type_tag: TypeTag::WholeImage,
            is_ntfs: true,
        }]);
    }

    if sector0[0x1FE..0x200] != BOOT_SIGNATURE {
        return Err(CoreError::UnsupportedImageFormat(
            "no MBR/GPT boot signature in sector 0".into(),
        ));
    }

    let mbr_entries = parse_mbr_entries(&sector0);
    let mut partitions = if mbr_entries
        .iter()
        .any(|e| e.partition_type == MBR_TYPE_GPT_PROTECTIVE)
    {
        parse_gpt(src)?
    } else {
        mbr_entries
            .into_iter()
            .map(|e| Partition {
                index: 0,
                start: e.lba_start as u64 * SECTOR_SIZE,
                length: e.num_sectors as u64 * SECTOR_SIZE,
                type_tag: TypeTag::Mbr(e.partition_type),
                is_ntfs: false,
            })
            .collect()
    };

    let image_size = src.size();
    partitions.retain(|p| {
        if image_size > 0 && p.start.saturating_add(p.length) > image_size {
            warn!(
                start = p.start,
                length = p.length,
                image_size,
                "partition extends past image end, skipping"
            );
            return false;
        }
        true
    });

    for (index, part) in partitions.iter_mut().enumerate() {
        part.index = index;
        let first = src.read_vec(part.start, SECTOR_SIZE as usize)?;
        part.is_ntfs = is_ntfs_boot_sector(&first);
    }
    Ok(partitions)
}

/// Applies the caller's partition selection: `Some(n)` picks the n-th NTFS
/// partition in enumeration order, `None` keeps them all.
pub fn select_ntfs(partitions: &[Partition], index: Option<usize>) -> Result<Vec<Partition>> {
    let ntfs: Vec<Partition> = partitions.iter().filter(|p| p.is_ntfs).cloned().collect();
    match index {
        None if ntfs.is_empty() => Err(CoreError::NoNtfsPartition),
        None => Ok(ntfs),
        Some(n) => ntfs
            .get(n)
            .cloned()
            .map(|p| vec![p])
            .ok_or(CoreError::NoNtfsPartition),
    }
}

struct MbrEntry {
    partition_type: u8,
    lba_start: u32,
    num_sectors: u32,
}

fn parse_mbr_entries(sector0: &[u8]) -> Vec<MbrEntry> {
    let mut entries = Vec::new();
    for slot in 0..4 {
        let raw = &sector0[MBR_TABLE_OFFSET + slot * 16..MBR_TABLE_OFFSET + (slot + 1) * 16];
        let partition_type = raw[4];
        if partition_type == 0 {
            continue;
        }
        entries.push(MbrEntry {
            partition_type,
            lba_start: LittleEndian::read_u32(&raw[8..12]),
            num_sectors: LittleEndian::read_u32(&raw[12..16]),
        });
    }
    entries
}

fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

fn parse_gpt<S: ImageSource>(src: &mut S) -> Result<Vec<Partition>> {
    let header = src.read_vec(SECTOR_SIZE, SECTOR_SIZE as usize)?;
    if header.len() < 92 || &header[0..8] != GPT_SIGNATURE {
        return Err(CoreError::UnsupportedImageFormat(
            "protective MBR without a GPT header at LBA 1".into(),
        ));
    }

    let header_size = LittleEndian::read_u32(&header[0x0C..0x10]) as usize;
    let header_crc = LittleEndian::read_u32(&header[0x10..0x14]);
    if header_size >= 92 && header_size <= header.len() {
        let mut check = header[..header_size].to_vec();
        check[0x10..0x14].fill(0);
        if crc32(&check) != header_crc {
            warn!("GPT header CRC32 mismatch, continuing");
        }
    }

    let entry_lba = LittleEndian::read_u64(&header[0x48..0x50]);
    let num_entries = LittleEndian::read_u32(&header[0x50..0x54]).min(512);
    let entry_size = LittleEndian::read_u32(&header[0x54..0x58]) as usize;
    let array_crc = LittleEndian::read_u32(&header[0x58..0x5C]);
    if entry_size < 128 || entry_size > 4096 {
        return Err(CoreError::UnsupportedImageFormat(format!(
            "implausible GPT entry size {entry_size}"
        )));
    }

    let array_len = num_entries as usize * entry_size;
    let array = src.read_vec(entry_lba * SECTOR_SIZE, array_len)?;
    if array.len() == array_len && crc32(&array) != array_crc {
        warn!("GPT partition array CRC32 mismatch, continuing");
    }

    let mut partitions = Vec::new();
    for chunk in array.chunks_exact(entry_size) {
        let type_guid = Guid(chunk[0..16].try_into().expect("16-byte slice"));
        if type_guid.is_zero() {
            continue;
        }
        let first_lba = LittleEndian::read_u64(&chunk[0x20..0x28]);
        let last_lba = LittleEndian::read_u64(&chunk[0x28..0x30]);
        if last_lba < first_lba {
            warn!(first_lba, last_lba, "GPT entry with inverted LBAs, skipping");
            continue;
        }
        let name = utf16le_trimmed(&chunk[0x38..entry_size.min(0x38 + 72)]);
        partitions.push(Partition {
            index: 0,
            start: first_lba * SECTOR_SIZE,
            length: (last_lba - first_lba + 1) * SECTOR_SIZE,
            type_tag: TypeTag::Gpt { type_guid, name },
            is_ntfs: false,
        });
    }
    Ok(partitions)
}

fn utf16le_trimmed(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(LittleEndian::read_u16)
        .take_while(|u| *u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}
