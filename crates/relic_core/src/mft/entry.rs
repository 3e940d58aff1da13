//! MFT entry headers and fixup (update sequence array) reconstitution.

use crate::error::{CoreError, Result};
use byteorder::{ByteOrder, LittleEndian};

pub const SIG_FILE: &[u8; 4] = b"FILE";
pub const SIG_BAAD: &[u8; 4] = b"BAAD";

pub const FLAG_IN_USE: u16 = 0x0001;
pub const FLAG_DIRECTORY: u16 = 0x0002;

/// 48-bit entry number plus 16-bit sequence, as packed in file references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MftReference {
    pub entry: u64,
    pub sequence: u16,
}

impl MftReference {
    pub fn from_raw(raw: u64) -> Self {
        Self {
            entry: raw & 0x0000_FFFF_FFFF_FFFF,
            sequence: (raw >> 48) as u16,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.entry == 0 && self.sequence == 0
    }
}

/// Fixed header of one MFT entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntryHeader {
    pub signature: [u8; 4],
    pub usa_offset: u16,
    pub usa_count: u16,
    pub lsn: u64,
    pub sequence: u16,
    pub hard_links: u16,
    pub first_attr_offset: u16,
    pub flags: u16,
    pub used_size: u32,
    pub allocated_size: u32,
    pub base_reference: MftReference,
    pub next_attr_id: u16,
}

impl EntryHeader {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 42 {
            return Err(CoreError::Truncated(format!(
                "MFT entry header at {} bytes",
                buf.len()
            )));
        }
        Ok(Self {
            signature: buf[0..4].try_into().expect("4-byte slice"),
            usa_offset: LittleEndian::read_u16(&buf[4..6]),
            usa_count: LittleEndian::read_u16(&buf[6..8]),
            lsn: LittleEndian::read_u64(&buf[8..16]),
            sequence: LittleEndian::read_u16(&buf[16..18]),
            hard_links: LittleEndian::read_u16(&buf[18..20]),
            first_attr_offset: LittleEndian::read_u16(&buf[20..22]),
            flags: LittleEndian::read_u16(&buf[22..24]),
            used_size: LittleEndian::read_u32(&buf[24..28]),
            allocated_size: LittleEndian::read_u32(&buf[28..32]),
            base_reference: MftReference::from_raw(LittleEndian::read_u64(&buf[32..40])),
            next_attr_id: LittleEndian::read_u16(&buf[40..42]),
        })
    }

    pub fn is_file(&self) -> bool {
        &self.signature == SIG_FILE
    }

    pub fn is_baad(&self) -> bool {
        &self.signature == SIG_BAAD
    }

    pub fn in_use(&self) -> bool {
        self.flags & FLAG_IN_USE != 0
    }

    pub fn is_directory(&self) -> bool {
        self.flags & FLAG_DIRECTORY != 0
    }
}

/// Restores the last two bytes of each sector from the update sequence
/// array, verifying the on-disk fingerprint first. Shared by MFT entries
/// and `$LogFile` pages.
pub fn apply_fixup(
    buf: &mut [u8],
    usa_offset: u16,
    usa_count: u16,
    bytes_per_sector: usize,
    entry: u64,
) -> Result<()> {
    if usa_count < 2 {
        // Nothing to fix up; a single-element array carries only the USN.
        return Ok(());
    }
    let usa_start = usa_offset as usize;
    let usa_end = usa_start + usa_count as usize * 2;
    let sectors = usa_count as usize - 1;
    if usa_end > buf.len() || sectors * bytes_per_sector > buf.len() {
        return Err(CoreError::FixupMismatch {
            entry,
            sector: 0,
            found: 0,
            expected: 0,
        });
    }

    let usn = LittleEndian::read_u16(&buf[usa_start..usa_start + 2]);
    for i in 1..usa_count as usize {
        let slot = i * bytes_per_sector - 2;
        let found = LittleEndian::read_u16(&buf[slot..slot + 2]);
        if found != usn {
            return Err(CoreError::FixupMismatch {
                entry,
                sector: i - 1,
                found,
                expected: usn,
            });
        }
        let replacement = LittleEndian::read_u16(&buf[usa_start + i * 2..usa_start + i * 2 + 2]);
        LittleEndian::write_u16(&mut buf[slot..slot + 2], replacement);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixup_restores_sector_tails() {
        // 1024-byte entry, usa_count=3, usn 0x4242, sector tails stamped
        // with the usn, originals 0xAABB and 0xCCDD in the array.
        let mut buf = vec![0u8; 1024];
        let usa_offset = 0x30u16;
        LittleEndian::write_u16(&mut buf[0x30..0x32], 0x4242);
        LittleEndian::write_u16(&mut buf[0x32..0x34], 0xAABB);
        LittleEndian::write_u16(&mut buf[0x34..0x36], 0xCCDD);
        LittleEndian::write_u16(&mut buf[510..512], 0x4242);
        LittleEndian::write_u16(&mut buf[1022..1024], 0x4242);

        apply_fixup(&mut buf, usa_offset, 3, 512, 0).unwrap();
        assert_eq!(&buf[510..512], &[0xBB, 0xAA]);
        assert_eq!(&buf[1022..1024], &[0xDD, 0xCC]);
    }

    #[test]
    fn fixup_mismatch_is_reported() {
        let mut buf = vec![0u8; 1024];
        LittleEndian::write_u16(&mut buf[0x30..0x32], 0x4242);
        LittleEndian::write_u16(&mut buf[510..512], 0x4242);
        LittleEndian::write_u16(&mut buf[1022..1024], 0x1111);

        let err = apply_fixup(&mut buf, 0x30, 3, 512, 7).unwrap_err();
        match err {
            CoreError::FixupMismatch {
                entry,
                sector,
                found,
                expected,
            } => {
                assert_eq!(entry, 7);
                assert_eq!(sector, 1);
                assert_eq!(found, 0x1111);
                assert_eq!(expected, 0x4242);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn reference_unpacks_entry_and_sequence() {
        let r = MftReference::from_raw(0x0005_0000_0000_002A);
        assert_eq!(r.entry, 42);
        assert_eq!(r.sequence, 5);
    }
}
