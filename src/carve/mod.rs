//! Magic-JPEG carving: locate signature-marked regions in a blob and repair
//! each one into a standalone image file.
//!
//! A KDB container supplies the signature — the decrypted payload of its
//! first `MAGIC`-prefixed entry. Embedded images had their real JPEG header
//! replaced by that signature, so repair writes the fixed header `FF D8 FF`,
//! skips the signature bytes, and streams the rest of the region up to and
//! including the `FF D9` end marker, feeding every written byte through an
//! incremental MD5.
//!
//! ```no_run
//! use kdbcarve::carve::{carve_file, CarveOptions};
//!
//! let report = carve_file("dump.bin", "store.kdb", &CarveOptions::default())?;
//! for image in &report.images {
//!     println!("{:>10}  {}  {}", image.offset, image.md5, image.path.display());
//! }
//! # Ok::<(), kdbcarve::carve::CarveError>(())
//! ```

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::debug;
use md5::{Digest, Md5};
use serde::Serialize;
use thiserror::Error;

use crate::container::{DecodeOptions, Kdb, KdbError};

pub mod scanner;

pub use scanner::{scan, scan_file, ScanOptions, DEFAULT_WINDOW_SIZE};

/// Fixed 3-byte header written at the start of every repaired image.
pub const JPEG_HEADER: [u8; 3] = [0xFF, 0xD8, 0xFF];
/// End-of-image marker; a region's `end` offset includes it.
pub const END_MARKER: [u8; 2] = [0xFF, 0xD9];

#[derive(Error, Debug)]
pub enum CarveError {
    #[error("No MAGIC-prefixed entry in the container")]
    NoSignature,
    #[error("Signature must not be empty")]
    EmptySignature,
    #[error("KDB error: {0}")]
    Kdb(#[from] KdbError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Regions ──────────────────────────────────────────────────────────────────

/// One signature/end-marker pair located by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CarvedRegion {
    /// Offset of the signature's first byte in the blob.
    pub start: u64,
    /// Exclusive end offset, including the 2-byte end marker.
    pub end: u64,
    /// Length of the signature that marked this region.
    pub sig_len: usize,
}

impl CarvedRegion {
    /// Region size in the source blob, end marker included.
    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    /// Bytes the repaired body streams: the region minus the embedded
    /// signature. Saturates when the end marker overlaps the signature tail.
    pub fn body_len(&self) -> u64 {
        self.size().saturating_sub(self.sig_len as u64)
    }
}

// ── Report ───────────────────────────────────────────────────────────────────

/// Metadata for one repaired image.
#[derive(Debug, Clone, Serialize)]
pub struct RepairedImage {
    /// Region start offset in the scanned blob.
    pub offset: u64,
    /// Region size, end marker included.
    pub size: u64,
    /// MD5 of the written file, lowercase hex.
    pub md5: String,
    /// Where the repaired file was written.
    pub path: PathBuf,
}

/// Everything one carve run produced.
#[derive(Debug, Serialize)]
pub struct CarveReport {
    pub blob: PathBuf,
    pub container: PathBuf,
    pub output_dir: PathBuf,
    /// Unix timestamp of the run.
    pub timestamp: i64,
    pub images: Vec<RepairedImage>,
}

impl CarveReport {
    /// Summary line for display.
    pub fn summary(&self) -> String {
        format!(
            "{} image(s) repaired from {} into {}",
            self.images.len(),
            self.blob.display(),
            self.output_dir.display(),
        )
    }
}

// ── Options ──────────────────────────────────────────────────────────────────

/// Configuration for [`carve_file`].
#[derive(Debug, Clone, Default)]
pub struct CarveOptions {
    pub scan: ScanOptions,
    pub decode: DecodeOptions,
    /// Repaired files land here; defaults to `<blob_stem>_repaired/` next to
    /// the blob.
    pub output_dir: Option<PathBuf>,
}

// ── Repair ───────────────────────────────────────────────────────────────────

/// Repair one region from `source` into `out`.
///
/// Writes the fixed `FF D8 FF` header, then streams the region body — the
/// bytes after the embedded signature, up to and including the end marker —
/// in `chunk_size` reads, never holding the whole region in memory. Every
/// written byte feeds the MD5 accumulator, header first; the digest is
/// returned once the region is complete.
pub fn repair_region<R: Read + Seek, W: Write>(
    source: &mut R,
    region: &CarvedRegion,
    out: &mut W,
    chunk_size: usize,
) -> Result<[u8; 16], CarveError> {
    let mut hasher = Md5::new();
    out.write_all(&JPEG_HEADER)?;
    hasher.update(JPEG_HEADER);

    source.seek(SeekFrom::Start(region.start + region.sig_len as u64))?;
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut remaining = region.body_len();
    while remaining > 0 {
        let n = remaining.min(buf.len() as u64) as usize;
        source.read_exact(&mut buf[..n])?;
        out.write_all(&buf[..n])?;
        hasher.update(&buf[..n]);
        remaining -= n as u64;
    }
    Ok(hasher.finalize().into())
}

/// Repair every region into `dir`, one `<start>.jpeg` file per region.
///
/// Regions are independent — each opens its own source handle and owns its
/// output file and digest state — so with the `parallel` feature they are
/// repaired concurrently. Results keep scan order either way.
pub fn repair_all(
    blob_path: &Path,
    regions: &[CarvedRegion],
    dir: &Path,
    chunk_size: usize,
) -> Result<Vec<RepairedImage>, CarveError> {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;

        regions
            .par_iter()
            .map(|region| repair_to_file(blob_path, region, dir, chunk_size))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        regions
            .iter()
            .map(|region| repair_to_file(blob_path, region, dir, chunk_size))
            .collect()
    }
}

fn repair_to_file(
    blob_path: &Path,
    region: &CarvedRegion,
    dir: &Path,
    chunk_size: usize,
) -> Result<RepairedImage, CarveError> {
    let path = dir.join(format!("{}.jpeg", region.start));
    let mut source = File::open(blob_path)?;
    let mut out = File::create(&path)?;
    let digest = repair_region(&mut source, region, &mut out, chunk_size)?;
    Ok(RepairedImage {
        offset: region.start,
        size: region.size(),
        md5: hex::encode(digest),
        path,
    })
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

/// Decode the KDB container, pull the signature entry, scan the blob, and
/// repair every located region.
///
/// The signature is the decrypted payload of the first container entry whose
/// name begins with `MAGIC`. Output files are `<start>.jpeg` under the
/// output directory, which is created if needed.
pub fn carve_file<B, K>(
    blob: B,
    container: K,
    opts: &CarveOptions,
) -> Result<CarveReport, CarveError>
where
    B: AsRef<Path>,
    K: AsRef<Path>,
{
    let blob = blob.as_ref();
    let container = container.as_ref();

    let kdb = Kdb::decode_file_with(container, &opts.decode)?;
    let signature = kdb.find_signature().ok_or(CarveError::NoSignature)?;
    if signature.payload.is_empty() {
        return Err(CarveError::EmptySignature);
    }
    debug!(
        "signature entry {:?}: {} byte(s)",
        signature.display_name(),
        signature.payload.len()
    );

    let regions = scanner::scan_file(blob, &signature.payload, &opts.scan)?;

    let output_dir = match &opts.output_dir {
        Some(dir) => dir.clone(),
        None => default_output_dir(blob),
    };
    fs::create_dir_all(&output_dir)?;

    let images = repair_all(blob, &regions, &output_dir, opts.scan.window_size)?;
    Ok(CarveReport {
        blob: blob.to_path_buf(),
        container: container.to_path_buf(),
        output_dir,
        timestamp: Utc::now().timestamp(),
        images,
    })
}

/// `<blob_stem>_repaired/` next to the blob.
pub fn default_output_dir(blob: &Path) -> PathBuf {
    let stem = blob
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "blob".to_owned());
    blob.with_file_name(format!("{stem}_repaired"))
}
