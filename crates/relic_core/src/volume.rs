//! NTFS boot sector parsing and cluster-addressed reads.

use crate::error::{CoreError, Result};
use crate::partition::is_ntfs_boot_sector;
use crate::traits::ImageSource;
use byteorder::{ByteOrder, LittleEndian};

/// Parsed boot-sector geometry.
#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub total_sectors: u64,
    pub mft_cluster_lcn: u64,
    pub mft_mirror_lcn: u64,
    /// MFT entry size in bytes, decoded from the signed clusters-per-record.
    pub mft_entry_size: u32,
    /// Index record size in bytes, decoded the same way.
    pub index_entry_size: u32,
    pub volume_serial: u64,
}

impl Geometry {
    pub fn parse(boot: &[u8]) -> Result<Self> {
        if boot.len() < 512 {
            return Err(CoreError::BadBootSector(format!(
                "boot sector truncated at {} bytes",
                boot.len()
            )));
        }
        if !is_ntfs_boot_sector(boot) {
            return Err(CoreError::BadBootSector("missing NTFS OEM signature".into()));
        }

        let bytes_per_sector = LittleEndian::read_u16(&boot[0x0B..0x0D]);
        let sectors_per_cluster = boot[0x0D];
        let total_sectors = LittleEndian::read_u64(&boot[0x28..0x30]);
        let mft_cluster_lcn = LittleEndian::read_u64(&boot[0x30..0x38]);
        let mft_mirror_lcn = LittleEndian::read_u64(&boot[0x38..0x40]);
        let clusters_per_mft_record = boot[0x40] as i8;
        let clusters_per_index_record = boot[0x44] as i8;
        let volume_serial = LittleEndian::read_u64(&boot[0x48..0x50]);

        if !(512..=4096).contains(&bytes_per_sector) || !bytes_per_sector.is_power_of_two() {
            return Err(CoreError::BadBootSector(format!(
                "implausible bytes per sector {bytes_per_sector}"
            )));
        }
        if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() {
            return Err(CoreError::BadBootSector(format!(
                "implausible sectors per cluster {sectors_per_cluster}"
            )));
        }
        if total_sectors == 0 {
            return Err(CoreError::BadBootSector("zero total sectors".into()));
        }

        let cluster_size = bytes_per_sector as u64 * sectors_per_cluster as u64;
        let mft_entry_size = decode_record_size(clusters_per_mft_record, cluster_size)?;
        let index_entry_size = decode_record_size(clusters_per_index_record, cluster_size)?;
        if mft_entry_size % bytes_per_sector as u32 != 0 {
            return Err(CoreError::BadBootSector(format!(
                "MFT entry size {mft_entry_size} is not a sector multiple"
            )));
        }

        Ok(Self {
            bytes_per_sector,
            sectors_per_cluster,
            total_sectors,
            mft_cluster_lcn,
            mft_mirror_lcn,
            mft_entry_size,
            index_entry_size,
            volume_serial,
        })
    }

    pub fn cluster_size(&self) -> u64 {
        self.bytes_per_sector as u64 * self.sectors_per_cluster as u64
    }

    pub fn volume_size(&self) -> u64 {
        self.total_sectors * self.bytes_per_sector as u64
    }
}

/// A signed clusters-per-record byte: non-negative means clusters, negative
/// `k` means `1 << -k` bytes.
fn decode_record_size(raw: i8, cluster_size: u64) -> Result<u32> {
    let size = if raw >= 0 {
        raw as u64 * cluster_size
    } else {
        let shift = -(raw as i64);
        if shift > 31 {
            return Err(CoreError::BadBootSector(format!(
                "record size shift {shift} out of range"
            )));
        }
        1u64 << shift
    };
    if !(256..=65536).contains(&size) {
        return Err(CoreError::BadBootSector(format!(
            "record size {size} out of range"
        )));
    }
    Ok(size as u32)
}

/// Geometry plus the partition's byte offset; all reads go through the
/// shared `ImageSource`.
#[derive(Debug, Clone, Copy)]
pub struct NtfsVolume {
    pub offset: u64,
    pub geom: Geometry,
}

impl NtfsVolume {
    /// Parses the boot sector at `offset` within the image.
    pub fn open<S: ImageSource>(src: &mut S, offset: u64) -> Result<Self> {
        let boot = src.read_vec(offset, 512)?;
        let geom = Geometry::parse(&boot)?;
        Ok(Self { offset, geom })
    }

    /// Reads `len` bytes at a volume-relative byte offset.
    pub fn read_at<S: ImageSource>(
        &self,
        src: &mut S,
        vol_offset: u64,
        len: usize,
    ) -> Result<Vec<u8>> {
        src.read_vec(self.offset + vol_offset, len)
    }

    /// Reads `count` clusters starting at `lcn`.
    pub fn read_clusters<S: ImageSource>(
        &self,
        src: &mut S,
        lcn: u64,
        count: u64,
    ) -> Result<Vec<u8>> {
        let cluster_size = self.geom.cluster_size();
        self.read_at(src, lcn * cluster_size, (count * cluster_size) as usize)
    }
}

#[cfg(test)]
pub(crate) fn test_boot_sector(
    bytes_per_sector: u16,
    sectors_per_cluster: u8,
    total_sectors: u64,
    mft_lcn: u64,
    clusters_per_mft_record: i8,
) -> [u8; 512] {
    let mut boot = [0u8; 512];
    boot[3..11].copy_from_slice(crate::partition::NTFS_OEM_ID);
    LittleEndian::write_u16(&mut boot[0x0B..0x0D], bytes_per_sector);
    boot[0x0D] = sectors_per_cluster;
    LittleEndian::write_u64(&mut boot[0x28..0x30], total_sectors);
    LittleEndian::write_u64(&mut boot[0x30..0x38], mft_lcn);
    boot[0x40] = clusters_per_mft_record as u8;
    boot[0x44] = clusters_per_mft_record as u8;
    LittleEndian::write_u64(&mut boot[0x48..0x50], 0xC0FF_EE00_1234_5678);
    boot[0x1FE] = 0x55;
    boot[0x1FF] = 0xAA;
    boot
}
