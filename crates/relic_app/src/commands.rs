//! Command implementations: the glue between the CLI surface and the core.

use crate::progress::BarProgress;
use crate::sink::{make_sink, OutputFormat};
use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use humansize::{format_size, BINARY};
use relic_core::{
    extract_logfile, extract_mft, extract_usnjrnl, locate_partitions, select_ntfs, CancelToken,
    CoreError, DecodeOptions, Geometry, ImageSource, LogFileParser, MftDecoder, MftFile,
    MftReader, NtfsVolume, ParseStats, Partition, PathResolver, RecordSink, UsnDecoder,
    UsnDecoderOptions,
};
use relic_io::open_image;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Artifacts `extract` can leave behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SkipArtifact {
    Mft,
    Logfile,
    Usnjrnl,
}

fn open(path: &Path) -> Result<Box<dyn ImageSource>> {
    open_image(path, None).with_context(|| format!("failed to open {}", path.display()))
}

fn ntfs_volumes<S: ImageSource>(
    src: &mut S,
    partition: Option<usize>,
) -> Result<Vec<(Partition, NtfsVolume)>> {
    let partitions = locate_partitions(src)?;
    let selected = select_ntfs(&partitions, partition)?;
    let mut volumes = Vec::new();
    for part in selected {
        let volume = NtfsVolume::open(src, part.start)?;
        volumes.push((part, volume));
    }
    Ok(volumes)
}

/// Runs the parse loop, then finalizes the sink; cancellation still leaves
/// a marked partial output behind.
fn finish_or_abort(
    sink: &mut dyn RecordSink,
    result: relic_core::Result<()>,
) -> relic_core::Result<()> {
    match result {
        Ok(()) => sink.finish(),
        Err(CoreError::Cancelled) => {
            sink.abort("cancelled")?;
            Err(CoreError::Cancelled)
        }
        Err(e) => Err(e),
    }
}

pub fn run_list_partitions(image: &Path) -> Result<ParseStats> {
    let mut src = open(image)?;
    let partitions = locate_partitions(&mut src)?;

    println!("\n📀 Partitions in {}\n", image.display());
    println!(
        "{:<6} {:<14} {:<14} {:<6} TYPE",
        "INDEX", "START", "LENGTH", "NTFS"
    );
    println!("{}", "-".repeat(64));
    for p in &partitions {
        println!(
            "{:<6} {:<14} {:<14} {:<6} {}",
            p.index,
            p.start,
            format_size(p.length, BINARY),
            if p.is_ntfs { "yes" } else { "no" },
            p.type_tag,
        );
    }
    println!();
    Ok(ParseStats::default())
}

pub fn run_info(image: &Path, partition: Option<usize>) -> Result<ParseStats> {
    let mut src = open(image)?;
    let volumes = ntfs_volumes(&mut src, partition)?;

    for (part, volume) in volumes {
        let geom: Geometry = volume.geom;
        println!(
            "\n📊 NTFS volume at partition {} (offset {})\n",
            part.index, part.start
        );
        println!("  Bytes per sector:    {}", geom.bytes_per_sector);
        println!("  Sectors per cluster: {}", geom.sectors_per_cluster);
        println!("  Cluster size:        {}", geom.cluster_size());
        println!("  Total sectors:       {}", geom.total_sectors);
        println!(
            "  Volume size:         {}",
            format_size(geom.volume_size(), BINARY)
        );
        println!("  MFT first LCN:       {}", geom.mft_cluster_lcn);
        println!("  MFT entry size:      {}", geom.mft_entry_size);
        println!("  Index entry size:    {}", geom.index_entry_size);
        println!("  Volume serial:       {:#018x}", geom.volume_serial);
    }
    println!();
    Ok(ParseStats::default())
}

/// Extracts the three artifacts for every selected partition. Returns the
/// written file paths.
pub fn run_extract(
    image: &Path,
    out_dir: &Path,
    partition: Option<usize>,
    skip: &[SkipArtifact],
    cancel: &CancelToken,
) -> Result<(Vec<PathBuf>, ParseStats)> {
    let mut src = open(image)?;
    let volumes = ntfs_volumes(&mut src, partition)?;
    let stats = ParseStats::default();
    let mut written = Vec::new();

    for (part, volume) in volumes {
        cancel.check()?;
        let part_dir = out_dir.join(format!("p{}", part.index));
        std::fs::create_dir_all(&part_dir)
            .with_context(|| format!("failed to create {}", part_dir.display()))?;
        let mut reader = MftReader::new(&mut src, volume)?;

        if !skip.contains(&SkipArtifact::Mft) {
            let path = part_dir.join("$MFT");
            let mut out = BufWriter::new(File::create(&path)?);
            let mut progress = BarProgress::new("Extracting $MFT...");
            let artifact = extract_mft(&mut reader, &mut out, &mut progress, cancel)?;
            println!(
                "  p{}: {} ({})",
                part.index,
                artifact.name,
                format_size(artifact.bytes_written, BINARY)
            );
            written.push(path);
        }

        if !skip.contains(&SkipArtifact::Logfile) {
            let path = part_dir.join("$LogFile");
            let mut out = BufWriter::new(File::create(&path)?);
            let mut progress = BarProgress::new("Extracting $LogFile...");
            match extract_logfile(&mut reader, &mut out, &mut progress, cancel) {
                Ok(artifact) => {
                    println!(
                        "  p{}: {} ({})",
                        part.index,
                        artifact.name,
                        format_size(artifact.bytes_written, BINARY)
                    );
                    written.push(path);
                }
                Err(CoreError::Cancelled) => bail!(CoreError::Cancelled),
                Err(e) => warn!("p{}: $LogFile not extracted: {e}", part.index),
            }
        }

        if !skip.contains(&SkipArtifact::Usnjrnl) {
            let path = part_dir.join("$J");
            let mut out = BufWriter::new(File::create(&path)?);
            let mut progress = BarProgress::new("Extracting $UsnJrnl:$J...");
            match extract_usnjrnl(&mut reader, &mut out, &mut progress, cancel) {
                Ok(artifact) => {
                    println!(
                        "  p{}: {} ({}, {} sparse)",
                        part.index,
                        artifact.name,
                        format_size(artifact.bytes_written, BINARY),
                        format_size(artifact.sparse_bytes, BINARY)
                    );
                    written.push(path);
                }
                Err(CoreError::Cancelled) => bail!(CoreError::Cancelled),
                Err(e) => warn!("p{}: $UsnJrnl:$J not extracted: {e}", part.index),
            }
        }
    }

    Ok((written, stats))
}

pub fn run_parse_mft(
    input: &Path,
    output: &Path,
    format: OutputFormat,
    resolve_paths: bool,
    include_corrupt: bool,
    active_only: bool,
    cancel: &CancelToken,
) -> Result<ParseStats> {
    let src = open(input)?;
    let mut mft = MftFile::new(src).context("input is not an MFT stream")?;
    let mut stats = ParseStats::default();
    let mut sink = make_sink(format, output)?;

    let opts = DecodeOptions {
        include_corrupt,
        active_only,
    };

    let resolver = if resolve_paths {
        let mut decoder = MftDecoder::new(&mut mft, opts);
        Some(decoder.build_resolver(&mut stats, cancel)?)
    } else {
        None
    };

    let mut decoder = MftDecoder::new(&mut mft, opts);
    let result = decoder.decode_all(resolver.as_ref(), &mut stats, cancel, |record| {
        sink.mft(&record)
    });
    finish_or_abort(sink.as_mut(), result)?;

    info!(records = stats.mft_records, "parse-mft finished");
    println!("\n{}", stats.summary());
    Ok(stats)
}

fn build_resolver_from(
    mft_path: &Path,
    stats: &mut ParseStats,
    cancel: &CancelToken,
) -> Result<PathResolver> {
    let src = open(mft_path)?;
    let mut mft = MftFile::new(src).context("MFT input is not an MFT stream")?;
    let mut decoder = MftDecoder::new(&mut mft, DecodeOptions::default());
    Ok(decoder.build_resolver(stats, cancel)?)
}

fn parse_usn_into(
    input: &Path,
    resolver: Option<&PathResolver>,
    sink: &mut dyn RecordSink,
    stats: &mut ParseStats,
    cancel: &CancelToken,
) -> relic_core::Result<()> {
    let src = open_image(input, None)?;
    let mut decoder = UsnDecoder::new(src, UsnDecoderOptions::default());
    let mut usn_rows = 0u64;
    let result = decoder.for_each(stats, cancel, |mut record| {
        if let Some(resolver) = resolver {
            if let Some(resolved) = resolver.resolve(record.file_entry, record.file_sequence) {
                record.full_path = Some(resolved.path);
            }
        }
        for event in record.events() {
            sink.usn(&record, &event)?;
            usn_rows += 1;
        }
        Ok(())
    });
    stats.usn_rows += usn_rows;
    result
}

pub fn run_parse_usnjrnl(
    input: &Path,
    mft: Option<&Path>,
    output: &Path,
    format: OutputFormat,
    cancel: &CancelToken,
) -> Result<ParseStats> {
    let mut stats = ParseStats::default();
    let resolver = match mft {
        Some(path) => Some(build_resolver_from(path, &mut stats, cancel)?),
        None => None,
    };
    let mut sink = make_sink(format, output)?;
    let result = parse_usn_into(input, resolver.as_ref(), sink.as_mut(), &mut stats, cancel);
    finish_or_abort(sink.as_mut(), result)?;

    info!(rows = stats.usn_rows, "parse-usnjrnl finished");
    println!("\n{}", stats.summary());
    Ok(stats)
}

fn parse_logfile_into(
    input: &Path,
    sink: &mut dyn RecordSink,
    stats: &mut ParseStats,
    cancel: &CancelToken,
) -> relic_core::Result<()> {
    let src = open_image(input, None)?;
    let mut parser = LogFileParser::new(src);
    parser.for_each(stats, cancel, |record| sink.logfile(&record))
}

pub fn run_parse_logfile(
    input: &Path,
    output: &Path,
    format: OutputFormat,
    cancel: &CancelToken,
) -> Result<ParseStats> {
    let mut stats = ParseStats::default();
    let mut sink = make_sink(format, output)?;
    let result = parse_logfile_into(input, sink.as_mut(), &mut stats, cancel);
    finish_or_abort(sink.as_mut(), result)?;

    info!(pages = stats.logfile_pages, "parse-logfile finished");
    println!("\n{}", stats.summary());
    Ok(stats)
}

/// Correlated stream: MFT records with paths, then USN rows resolved
/// against the same path cache, then `$LogFile` pages.
pub fn run_analyze(
    mft: &Path,
    usnjrnl: Option<&Path>,
    logfile: Option<&Path>,
    output: &Path,
    format: OutputFormat,
    cancel: &CancelToken,
) -> Result<ParseStats> {
    let mut stats = ParseStats::default();
    let mut sink = make_sink(format, output)?;

    let result = (|| -> relic_core::Result<()> {
        let src = open_image(mft, None)?;
        let mut mft_stream = MftFile::new(src)?;
        let mut decoder = MftDecoder::new(&mut mft_stream, DecodeOptions::default());
        let resolver = decoder.build_resolver(&mut stats, cancel)?;
        decoder.decode_all(Some(&resolver), &mut stats, cancel, |record| {
            sink.mft(&record)
        })?;

        if let Some(usn_path) = usnjrnl {
            parse_usn_into(usn_path, Some(&resolver), sink.as_mut(), &mut stats, cancel)?;
        }
        if let Some(log_path) = logfile {
            parse_logfile_into(log_path, sink.as_mut(), &mut stats, cancel)?;
        }
        Ok(())
    })();
    finish_or_abort(sink.as_mut(), result)?;

    println!("\n{}", stats.summary());
    Ok(stats)
}

/// One-shot pipeline: extract to a temporary directory, analyze, write the
/// sink into `out_dir`. The temporary directory is removed on success and
/// clean cancellation, kept on fatal error and with `--keep-temp`.
pub fn run_extract_analyze(
    image: &Path,
    out_dir: &Path,
    partition: Option<usize>,
    format: OutputFormat,
    keep_temp: bool,
    cancel: &CancelToken,
) -> Result<ParseStats> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let temp_dir = out_dir.join(format!(".extract-{}", std::process::id()));

    let outcome = (|| -> Result<ParseStats> {
        let (paths, _) = run_extract(image, &temp_dir, partition, &[], cancel)?;
        let mut total = ParseStats::default();

        // Group the extracted files per partition directory.
        let mut part_dirs: Vec<PathBuf> = paths
            .iter()
            .filter_map(|p| p.parent().map(Path::to_path_buf))
            .collect();
        part_dirs.dedup();

        for part_dir in part_dirs {
            let label = part_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "p0".into());
            let out_base = match format {
                OutputFormat::Csv => out_dir.join(&label),
                OutputFormat::Json => out_dir.join(format!("{label}.json")),
                OutputFormat::Sqlite => out_dir.join(format!("{label}.db")),
            };
            let mft = part_dir.join("$MFT");
            let usn = part_dir.join("$J");
            let log = part_dir.join("$LogFile");
            let stats = run_analyze(
                &mft,
                usn.exists().then_some(usn.as_path()),
                log.exists().then_some(log.as_path()),
                &out_base,
                format,
                cancel,
            )?;
            total.merge(&stats);
        }
        Ok(total)
    })();

    match &outcome {
        Ok(_) => {
            if keep_temp {
                info!("keeping temporary artifacts at {}", temp_dir.display());
            } else {
                let _ = std::fs::remove_dir_all(&temp_dir);
            }
        }
        Err(e) if matches!(e.downcast_ref::<CoreError>(), Some(CoreError::Cancelled)) => {
            // Clean cancellation never leaves temp files behind.
            let _ = std::fs::remove_dir_all(&temp_dir);
        }
        Err(_) => {
            warn!(
                "keeping temporary artifacts at {} for diagnosis",
                temp_dir.display()
            );
        }
    }
    outcome
}
