//! End-to-end pipeline tests over a synthetic NTFS volume.
//!
//! The fixture is a 512 KiB volume: 512-byte sectors, 2-sector clusters,
//! 1024-byte MFT entries at LCN 4, `$LogFile` at LCN 24, and a `$J` stream
//! that leads with an 8-cluster sparse run before its backed clusters.

use byteorder::{ByteOrder, LittleEndian};
use relic_core::{
    extract_logfile, extract_mft, extract_usnjrnl, locate_partitions, BufSource, CancelToken,
    CoreError, DecodeOptions, LogFileParser, LogPageKind, MftDecoder, MftFile, MftReader,
    MftRecord, NtfsVolume, ParseStats, SilentProgress, UsnDecoder, UsnDecoderOptions,
};

const SECTOR: usize = 512;
const CLUSTER: usize = 1024;
const ENTRY: usize = 1024;
const TOTAL_SECTORS: usize = 1024;
const MFT_LCN: usize = 4;
const MFT_ENTRIES: usize = 16;
const LOG_LCN: usize = 24;
const J_LCN: usize = 40;

const FT_A: u64 = 133_000_000_000_000_000;
const FT_B: u64 = 133_000_000_123_456_789;

fn utf16(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

fn boot_sector() -> [u8; SECTOR] {
    let mut boot = [0u8; SECTOR];
    boot[3..11].copy_from_slice(b"NTFS    ");
    LittleEndian::write_u16(&mut boot[0x0B..0x0D], SECTOR as u16);
    boot[0x0D] = (CLUSTER / SECTOR) as u8;
    LittleEndian::write_u64(&mut boot[0x28..0x30], TOTAL_SECTORS as u64);
    LittleEndian::write_u64(&mut boot[0x30..0x38], MFT_LCN as u64);
    boot[0x40] = 0xF6; // -10: 1 << 10 = 1024-byte entries
    boot[0x44] = 0xF6;
    LittleEndian::write_u64(&mut boot[0x48..0x50], 0x1122_3344_5566_7788);
    boot[0x1FE] = 0x55;
    boot[0x1FF] = 0xAA;
    boot
}

fn std_info(created: u64, modified: u64, dos_flags: u32) -> Vec<u8> {
    let mut value = vec![0u8; 48];
    LittleEndian::write_u64(&mut value[0..8], created);
    LittleEndian::write_u64(&mut value[8..16], modified);
    LittleEndian::write_u64(&mut value[16..24], modified);
    LittleEndian::write_u64(&mut value[24..32], created);
    LittleEndian::write_u32(&mut value[32..36], dos_flags);
    value
}

fn file_name_value(parent: (u64, u16), namespace: u8, name: &str, real_size: u64) -> Vec<u8> {
    let name_bytes = utf16(name);
    let mut value = vec![0u8; 66 + name_bytes.len()];
    LittleEndian::write_u64(&mut value[0..8], (parent.1 as u64) << 48 | parent.0);
    LittleEndian::write_u64(&mut value[8..16], FT_A);
    LittleEndian::write_u64(&mut value[16..24], FT_B);
    LittleEndian::write_u64(&mut value[24..32], FT_B);
    LittleEndian::write_u64(&mut value[32..40], FT_A);
    LittleEndian::write_u64(&mut value[40..48], real_size.next_multiple_of(CLUSTER as u64));
    LittleEndian::write_u64(&mut value[48..56], real_size);
    value[64] = name.encode_utf16().count() as u8;
    value[65] = namespace;
    value[66..].copy_from_slice(&name_bytes);
    value
}

fn resident_attr(type_code: u32, name: Option<&str>, value: &[u8]) -> Vec<u8> {
    let name_bytes = name.map(utf16).unwrap_or_default();
    let name_off = 24usize;
    let value_off = (name_off + name_bytes.len() + 7) & !7;
    let length = (value_off + value.len() + 7) & !7;
    let mut attr = vec![0u8; length];
    LittleEndian::write_u32(&mut attr[0..4], type_code);
    LittleEndian::write_u32(&mut attr[4..8], length as u32);
    attr[9] = name.map(|n| n.encode_utf16().count() as u8).unwrap_or(0);
    LittleEndian::write_u16(&mut attr[10..12], name_off as u16);
    LittleEndian::write_u32(&mut attr[16..20], value.len() as u32);
    LittleEndian::write_u16(&mut attr[20..22], value_off as u16);
    attr[name_off..name_off + name_bytes.len()].copy_from_slice(&name_bytes);
    attr[value_off..value_off + value.len()].copy_from_slice(value);
    attr
}

fn nonresident_attr(
    type_code: u32,
    name: Option<&str>,
    runs: &[u8],
    last_vcn: u64,
    allocated: u64,
    real: u64,
) -> Vec<u8> {
    let name_bytes = name.map(utf16).unwrap_or_default();
    let name_off = 0x40usize;
    let runs_off = (name_off + name_bytes.len() + 7) & !7;
    let length = (runs_off + runs.len() + 7) & !7;
    let mut attr = vec![0u8; length];
    LittleEndian::write_u32(&mut attr[0..4], type_code);
    LittleEndian::write_u32(&mut attr[4..8], length as u32);
    attr[8] = 1;
    attr[9] = name.map(|n| n.encode_utf16().count() as u8).unwrap_or(0);
    LittleEndian::write_u16(&mut attr[10..12], name_off as u16);
    LittleEndian::write_u64(&mut attr[24..32], last_vcn);
    LittleEndian::write_u16(&mut attr[32..34], runs_off as u16);
    LittleEndian::write_u64(&mut attr[40..48], allocated);
    LittleEndian::write_u64(&mut attr[48..56], real);
    LittleEndian::write_u64(&mut attr[56..64], real);
    attr[name_off..name_off + name_bytes.len()].copy_from_slice(&name_bytes);
    attr[runs_off..runs_off + runs.len()].copy_from_slice(runs);
    attr
}

const FLAG_IN_USE: u16 = 0x01;
const FLAG_DIR: u16 = 0x02;

fn build_entry(sequence: u16, flags: u16, attrs: &[Vec<u8>]) -> Vec<u8> {
    let mut entry = vec![0u8; ENTRY];
    entry[0..4].copy_from_slice(b"FILE");
    LittleEndian::write_u16(&mut entry[4..6], 0x30); // usa offset
    LittleEndian::write_u16(&mut entry[6..8], 3); // usa count
    LittleEndian::write_u16(&mut entry[16..18], sequence);
    LittleEndian::write_u16(&mut entry[18..20], 1);
    LittleEndian::write_u16(&mut entry[20..22], 0x38); // first attribute
    LittleEndian::write_u16(&mut entry[22..24], flags);

    let mut pos = 0x38usize;
    for attr in attrs {
        entry[pos..pos + attr.len()].copy_from_slice(attr);
        pos += attr.len();
    }
    LittleEndian::write_u32(&mut entry[pos..pos + 4], 0xFFFF_FFFF);
    LittleEndian::write_u32(&mut entry[24..28], (pos + 8) as u32);
    LittleEndian::write_u32(&mut entry[28..32], ENTRY as u32);

    // Inverse fixup: stash the sector tails in the USA, stamp the USN.
    let usn = 0x0042u16;
    LittleEndian::write_u16(&mut entry[0x30..0x32], usn);
    for i in 1..3usize {
        let slot = i * SECTOR - 2;
        let original = LittleEndian::read_u16(&entry[slot..slot + 2]);
        LittleEndian::write_u16(&mut entry[0x30 + 2 * i..0x30 + 2 * i + 2], original);
        LittleEndian::write_u16(&mut entry[slot..slot + 2], usn);
    }
    entry
}

fn build_v2_usn(usn: u64, file_ref: (u64, u16), parent_ref: (u64, u16), reason: u32, name: &str) -> Vec<u8> {
    let name_bytes = utf16(name);
    let record_length = (60 + name_bytes.len() + 7) & !7;
    let mut buf = vec![0u8; record_length];
    LittleEndian::write_u32(&mut buf[0..4], record_length as u32);
    LittleEndian::write_u16(&mut buf[4..6], 2);
    LittleEndian::write_u64(&mut buf[8..16], (file_ref.1 as u64) << 48 | file_ref.0);
    LittleEndian::write_u64(&mut buf[16..24], (parent_ref.1 as u64) << 48 | parent_ref.0);
    LittleEndian::write_u64(&mut buf[24..32], usn);
    LittleEndian::write_u64(&mut buf[32..40], FT_B);
    LittleEndian::write_u32(&mut buf[40..44], reason);
    LittleEndian::write_u32(&mut buf[52..56], 0x20);
    LittleEndian::write_u16(&mut buf[56..58], name_bytes.len() as u16);
    LittleEndian::write_u16(&mut buf[58..60], 60);
    buf[60..60 + name_bytes.len()].copy_from_slice(&name_bytes);
    buf
}

fn build_log_page(sig: &[u8; 4], lsn: u64) -> Vec<u8> {
    let mut page = vec![0u8; 4096];
    page[0..4].copy_from_slice(sig);
    let usa_offset = 0x28usize;
    let usa_count = 9u16;
    LittleEndian::write_u16(&mut page[4..6], usa_offset as u16);
    LittleEndian::write_u16(&mut page[6..8], usa_count);
    LittleEndian::write_u64(&mut page[8..16], lsn);
    if sig == relic_core::logfile::SIG_RESTART {
        LittleEndian::write_u32(&mut page[16..20], 4096);
        LittleEndian::write_u32(&mut page[20..24], 4096);
    } else {
        LittleEndian::write_u16(&mut page[24..26], 0x40);
        LittleEndian::write_u64(&mut page[32..40], lsn + 1);
    }
    let usn = 0x0107u16;
    LittleEndian::write_u16(&mut page[usa_offset..usa_offset + 2], usn);
    for i in 1..usa_count as usize {
        let slot = i * SECTOR - 2;
        let original = LittleEndian::read_u16(&page[slot..slot + 2]);
        LittleEndian::write_u16(
            &mut page[usa_offset + 2 * i..usa_offset + 2 * i + 2],
            original,
        );
        LittleEndian::write_u16(&mut page[slot..slot + 2], usn);
    }
    page
}

/// The volume fixture. Entry map: 0 `$MFT`, 2 `$LogFile`, 5 root, 7 BAAD,
/// 11 `$Extend`, 12 `$UsnJrnl`, 13 `hello.txt`, 14 `docs/`, 15 `docs/a.doc`.
fn build_volume() -> Vec<u8> {
    let mut img = vec![0u8; TOTAL_SECTORS * SECTOR];
    img[..SECTOR].copy_from_slice(&boot_sector());

    let mft_runs = [0x11u8, MFT_ENTRIES as u8, MFT_LCN as u8, 0x00];
    let log_runs = [0x11u8, 0x08, LOG_LCN as u8, 0x00];
    // 8 sparse clusters, then 4 backed clusters at LCN 40.
    let j_runs = [0x01u8, 0x08, 0x11, 0x04, J_LCN as u8, 0x00];

    let data_type = 0x80u32;
    let si_type = 0x10u32;
    let fn_type = 0x30u32;

    let place = |number: usize, entry: Vec<u8>, img: &mut Vec<u8>| {
        let offset = MFT_LCN * CLUSTER + number * ENTRY;
        img[offset..offset + ENTRY].copy_from_slice(&entry);
    };

    place(
        0,
        build_entry(
            1,
            FLAG_IN_USE,
            &[
                resident_attr(si_type, None, &std_info(FT_A, FT_B, 0x06)),
                resident_attr(fn_type, None, &file_name_value((5, 5), 3, "$MFT", 16384)),
                nonresident_attr(data_type, None, &mft_runs, 15, 16384, 16384),
            ],
        ),
        &mut img,
    );
    place(
        2,
        build_entry(
            1,
            FLAG_IN_USE,
            &[
                resident_attr(si_type, None, &std_info(FT_A, FT_B, 0x06)),
                resident_attr(fn_type, None, &file_name_value((5, 5), 3, "$LogFile", 8192)),
                nonresident_attr(data_type, None, &log_runs, 7, 8192, 8192),
            ],
        ),
        &mut img,
    );
    place(
        5,
        build_entry(
            5,
            FLAG_IN_USE | FLAG_DIR,
            &[
                resident_attr(si_type, None, &std_info(FT_A, FT_A, 0x06)),
                resident_attr(fn_type, None, &file_name_value((5, 5), 3, ".", 0)),
            ],
        ),
        &mut img,
    );
    {
        // Entry 7: BAAD, everything else garbage.
        let mut baad = vec![0u8; ENTRY];
        baad[0..4].copy_from_slice(b"BAAD");
        place(7, baad, &mut img);
    }
    place(
        11,
        build_entry(
            1,
            FLAG_IN_USE | FLAG_DIR,
            &[
                resident_attr(si_type, None, &std_info(FT_A, FT_A, 0x06)),
                resident_attr(fn_type, None, &file_name_value((5, 5), 3, "$Extend", 0)),
            ],
        ),
        &mut img,
    );
    place(
        12,
        build_entry(
            1,
            FLAG_IN_USE,
            &[
                resident_attr(si_type, None, &std_info(FT_A, FT_A, 0x06)),
                resident_attr(fn_type, None, &file_name_value((11, 1), 3, "$UsnJrnl", 12288)),
                nonresident_attr(data_type, Some("$J"), &j_runs, 11, 12288, 12288),
            ],
        ),
        &mut img,
    );
    place(
        13,
        build_entry(
            1,
            FLAG_IN_USE,
            &[
                resident_attr(si_type, None, &std_info(FT_A, FT_B, 0x20)),
                resident_attr(fn_type, None, &file_name_value((5, 5), 2, "HELLO~1.TXT", 5)),
                resident_attr(fn_type, None, &file_name_value((5, 5), 1, "hello_alt.txt", 5)),
                resident_attr(fn_type, None, &file_name_value((5, 5), 3, "hello.txt", 5)),
                resident_attr(data_type, None, b"Hello"),
                resident_attr(data_type, Some("Zone.Identifier"), b"[ZoneTransfer]"),
            ],
        ),
        &mut img,
    );
    place(
        14,
        build_entry(
            1,
            FLAG_IN_USE | FLAG_DIR,
            &[
                resident_attr(si_type, None, &std_info(FT_A, FT_A, 0x10)),
                resident_attr(fn_type, None, &file_name_value((5, 5), 3, "docs", 0)),
            ],
        ),
        &mut img,
    );
    place(
        15,
        build_entry(
            1,
            FLAG_IN_USE,
            &[
                resident_attr(si_type, None, &std_info(FT_B, FT_B, 0x20)),
                resident_attr(fn_type, None, &file_name_value((14, 1), 3, "a.doc", 3)),
                resident_attr(data_type, None, b"doc"),
            ],
        ),
        &mut img,
    );

    // $LogFile content: one restart page, one record page.
    let log_base = LOG_LCN * CLUSTER;
    img[log_base..log_base + 4096]
        .copy_from_slice(&build_log_page(relic_core::logfile::SIG_RESTART, 700));
    img[log_base + 4096..log_base + 8192]
        .copy_from_slice(&build_log_page(relic_core::logfile::SIG_RECORD, 900));

    // $J backed region: one v2 record at stream offset 8192.
    let j_base = J_LCN * CLUSTER;
    let usn_rec = build_v2_usn(8192, (13, 1), (5, 5), 0x101, "s4.txt");
    img[j_base..j_base + usn_rec.len()].copy_from_slice(&usn_rec);

    img
}

fn decode_extracted_mft(
    mft_bytes: Vec<u8>,
    opts: DecodeOptions,
) -> (Vec<MftRecord>, ParseStats) {
    let mut stats = ParseStats::default();
    let cancel = CancelToken::new();
    let mut mft = MftFile::new(BufSource::new(mft_bytes)).unwrap();
    let resolver = {
        let mut decoder = MftDecoder::new(&mut mft, opts);
        decoder.build_resolver(&mut stats, &cancel).unwrap()
    };
    let mut decoder = MftDecoder::new(&mut mft, opts);
    let mut records = Vec::new();
    decoder
        .decode_all(Some(&resolver), &mut stats, &cancel, |r| {
            records.push(r);
            Ok(())
        })
        .unwrap();
    (records, stats)
}

#[test]
fn whole_image_volume_is_located() {
    let mut src = BufSource::new(build_volume());
    let parts = locate_partitions(&mut src).unwrap();
    assert_eq!(parts.len(), 1);
    assert!(parts[0].is_ntfs);
    assert_eq!(parts[0].start, 0);
}

#[test]
fn extract_mft_then_decode_records() {
    let mut src = BufSource::new(build_volume());
    let vol = NtfsVolume::open(&mut src, 0).unwrap();
    assert_eq!(vol.geom.cluster_size(), CLUSTER as u64);
    assert_eq!(vol.geom.mft_entry_size, ENTRY as u32);

    let mut reader = MftReader::new(&mut src, vol).unwrap();
    let mut mft_bytes = Vec::new();
    let artifact = extract_mft(
        &mut reader,
        &mut mft_bytes,
        &mut SilentProgress,
        &CancelToken::new(),
    )
    .unwrap();
    assert_eq!(artifact.bytes_written, (MFT_ENTRIES * ENTRY) as u64);
    assert_eq!(mft_bytes.len(), MFT_ENTRIES * ENTRY);

    let (records, stats) = decode_extracted_mft(mft_bytes, DecodeOptions::default());

    // BAAD entry 7 is skipped but counted, never fatal.
    assert!(records.iter().all(|r| r.entry_number != 7));
    assert_eq!(stats.corrupt_entries, 1);

    let hello = records
        .iter()
        .find(|r| r.entry_number == 13)
        .expect("entry 13 decoded");
    // Win32&DOS wins the namespace selection.
    assert_eq!(hello.file_name.as_deref(), Some("hello.txt"));
    assert_eq!(hello.parent_entry_number, Some(5));
    assert!(hello.is_resident);
    assert_eq!(hello.data_size, 5);
    assert_eq!(hello.ads_count, 1);
    assert_eq!(hello.full_path.as_deref(), Some("/hello.txt"));
    assert_eq!(hello.si_created, FT_A);
    assert_eq!(hello.fn_modified, FT_B);
    assert!(hello.in_use);
    assert!(!hello.is_directory);

    let doc = records
        .iter()
        .find(|r| r.entry_number == 15)
        .expect("entry 15 decoded");
    assert_eq!(doc.full_path.as_deref(), Some("/docs/a.doc"));

    let root = records
        .iter()
        .find(|r| r.entry_number == 5)
        .expect("root decoded");
    assert!(root.is_directory);
    assert_eq!(root.full_path.as_deref(), Some("/"));
}

#[test]
fn corrupt_entries_emitted_when_requested() {
    let mut src = BufSource::new(build_volume());
    let vol = NtfsVolume::open(&mut src, 0).unwrap();
    let mut reader = MftReader::new(&mut src, vol).unwrap();
    let mut mft_bytes = Vec::new();
    extract_mft(
        &mut reader,
        &mut mft_bytes,
        &mut SilentProgress,
        &CancelToken::new(),
    )
    .unwrap();

    let opts = DecodeOptions {
        include_corrupt: true,
        ..Default::default()
    };
    let (records, stats) = decode_extracted_mft(mft_bytes, opts);
    let baad = records
        .iter()
        .find(|r| r.entry_number == 7)
        .expect("corrupt entry emitted");
    assert!(baad.corrupt);
    assert_eq!(baad.si_created, 0);
    assert!(baad.note.as_deref().unwrap().contains("BAAD"));
    assert_eq!(stats.corrupt_entries, 1);
}

#[test]
fn usnjrnl_sparse_footprint_and_events() {
    let mut src = BufSource::new(build_volume());
    let vol = NtfsVolume::open(&mut src, 0).unwrap();
    let mut reader = MftReader::new(&mut src, vol).unwrap();

    let mut j_bytes = Vec::new();
    let artifact = extract_usnjrnl(
        &mut reader,
        &mut j_bytes,
        &mut SilentProgress,
        &CancelToken::new(),
    )
    .unwrap();
    assert_eq!(artifact.name, "$J");
    assert_eq!(j_bytes.len(), 12288);
    assert_eq!(artifact.sparse_bytes, 8192);
    assert!(j_bytes[..8192].iter().all(|b| *b == 0));

    let mut stats = ParseStats::default();
    let mut decoder = UsnDecoder::new(BufSource::new(j_bytes), UsnDecoderOptions::default());
    let mut records = Vec::new();
    while let Some(r) = decoder.next_record(&mut stats).unwrap() {
        records.push(r);
    }
    assert_eq!(records.len(), 1);
    let r = &records[0];
    assert_eq!(r.usn, 8192);
    assert_eq!(r.file_entry, 13);
    assert_eq!(r.file_name, "s4.txt");
    // One event row per set reason bit, all other fields shared.
    assert_eq!(r.events(), vec!["DATA_OVERWRITE", "FILE_CREATE"]);
    assert!(stats.sparse_bytes_skipped >= 8192);
    assert_eq!(stats.usn_corrupt, 0);
}

#[test]
fn logfile_pages_walk() {
    let mut src = BufSource::new(build_volume());
    let vol = NtfsVolume::open(&mut src, 0).unwrap();
    let mut reader = MftReader::new(&mut src, vol).unwrap();

    let mut log_bytes = Vec::new();
    extract_logfile(
        &mut reader,
        &mut log_bytes,
        &mut SilentProgress,
        &CancelToken::new(),
    )
    .unwrap();
    assert_eq!(log_bytes.len(), 8192);

    let mut stats = ParseStats::default();
    let mut parser = LogFileParser::new(BufSource::new(log_bytes));
    let mut pages = Vec::new();
    while let Some(p) = parser.next_page(&mut stats).unwrap() {
        pages.push(p);
    }
    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0].kind, LogPageKind::Restart);
    assert_eq!(pages[0].lsn, 700);
    assert!(pages[0].fixup_ok);
    assert_eq!(pages[1].kind, LogPageKind::Record);
    assert_eq!(pages[1].last_end_lsn, 901);
}

#[test]
fn mbr_wrapped_volume_reads_through_partition_offset() {
    let volume = build_volume();
    let part_offset = 8 * SECTOR;
    let mut img = vec![0u8; part_offset + volume.len()];
    // MBR: one NTFS partition at LBA 8.
    img[0x1BE + 4] = 0x07;
    LittleEndian::write_u32(&mut img[0x1BE + 8..0x1BE + 12], 8);
    LittleEndian::write_u32(&mut img[0x1BE + 12..0x1BE + 16], TOTAL_SECTORS as u32);
    img[0x1FE] = 0x55;
    img[0x1FF] = 0xAA;
    img[part_offset..].copy_from_slice(&volume);

    let mut src = BufSource::new(img);
    let parts = locate_partitions(&mut src).unwrap();
    assert_eq!(parts.len(), 1);
    assert!(parts[0].is_ntfs);
    assert_eq!(parts[0].start, part_offset as u64);

    let vol = NtfsVolume::open(&mut src, parts[0].start).unwrap();
    let mut reader = MftReader::new(&mut src, vol).unwrap();
    let mut mft_bytes = Vec::new();
    extract_mft(
        &mut reader,
        &mut mft_bytes,
        &mut SilentProgress,
        &CancelToken::new(),
    )
    .unwrap();
    assert_eq!(mft_bytes.len(), MFT_ENTRIES * ENTRY);
    assert_eq!(&mft_bytes[0..4], b"FILE");
}

#[test]
fn cancellation_stops_extraction() {
    let mut src = BufSource::new(build_volume());
    let vol = NtfsVolume::open(&mut src, 0).unwrap();
    let mut reader = MftReader::new(&mut src, vol).unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();
    let mut out = Vec::new();
    let err = extract_mft(&mut reader, &mut out, &mut SilentProgress, &cancel).unwrap_err();
    assert!(matches!(err, CoreError::Cancelled));
}

#[test]
fn parsing_twice_is_deterministic() {
    let mut src = BufSource::new(build_volume());
    let vol = NtfsVolume::open(&mut src, 0).unwrap();
    let mut reader = MftReader::new(&mut src, vol).unwrap();
    let mut mft_bytes = Vec::new();
    extract_mft(
        &mut reader,
        &mut mft_bytes,
        &mut SilentProgress,
        &CancelToken::new(),
    )
    .unwrap();

    let (a, _) = decode_extracted_mft(mft_bytes.clone(), DecodeOptions::default());
    let (b, _) = decode_extracted_mft(mft_bytes, DecodeOptions::default());
    let render = |records: &[MftRecord]| {
        records
            .iter()
            .map(|r| format!("{r:?}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    assert_eq!(render(&a), render(&b));
}
