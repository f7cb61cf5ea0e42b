//! Two-phase signature scanner — locate start/end marker pairs in a blob.
//!
//! # How it works
//!
//! The scanner alternates between two states over one forward pass:
//!
//! | State | Looking for | On match |
//! |-------|-------------|----------|
//! | `SeekSignature` | the signature bytes | record the start offset, switch to `SeekEnd` |
//! | `SeekEnd` | the `FF D9` end marker | record `end = match + 2`, switch back |
//!
//! The source is read in fixed windows (default 2048 bytes). Successive
//! windows overlap by `max_pattern_len - 1` bytes so a match straddling a
//! boundary is seen whole by the next window; within a full window only the
//! positions not re-read later are examined, so every candidate position in
//! the stream is examined exactly once and the result equals a single linear
//! pass. After any match the scan position advances by one byte, not by the
//! pattern length.
//!
//! A signature still open at EOF is dropped silently — an incomplete pair,
//! not an error. A signature longer than the configured window grows the
//! effective window to fit it.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use log::{debug, trace};

use crate::carve::{CarveError, CarvedRegion, END_MARKER};

/// Default scan window size in bytes.
pub const DEFAULT_WINDOW_SIZE: usize = 2048;

/// Scan tuning knobs.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Window size in bytes; grown automatically when the signature is
    /// longer than this.
    pub window_size: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    SeekSignature,
    SeekEnd,
}

/// Scan `reader` for signature/end-marker pairs.
///
/// # Arguments
/// * `reader`    — seekable source; scanned start to finish from offset 0.
/// * `signature` — byte pattern marking a region start; must be non-empty.
/// * `opts`      — window tuning.
///
/// # Returns
/// All complete pairs in ascending start order, `end` exclusive and
/// including the 2-byte marker. A signature with no end marker before the
/// source ends is discarded.
pub fn scan<R: Read + Seek>(
    reader: &mut R,
    signature: &[u8],
    opts: &ScanOptions,
) -> Result<Vec<CarvedRegion>, CarveError> {
    if signature.is_empty() {
        return Err(CarveError::EmptySignature);
    }

    let max_pattern = signature.len().max(END_MARKER.len());
    let window = opts.window_size.max(max_pattern);
    let overlap = max_pattern - 1;

    let mut buf = vec![0u8; window];
    let mut regions = Vec::new();
    let mut state = ScanState::SeekSignature;
    let mut pending_start = 0u64;
    let mut base = 0u64;

    loop {
        reader.seek(SeekFrom::Start(base))?;
        let filled = fill_window(reader, &mut buf)?;
        if filled == 0 {
            break;
        }

        // A full window defers its overlap tail to the next window; the
        // final window scans through its last full-pattern position.
        let scan_limit = if filled == window {
            filled - overlap
        } else {
            filled
        };

        let mut i = 0;
        while i < scan_limit {
            let pattern: &[u8] = match state {
                ScanState::SeekSignature => signature,
                ScanState::SeekEnd => &END_MARKER,
            };
            if i + pattern.len() <= filled && buf[i..i + pattern.len()] == *pattern {
                match state {
                    ScanState::SeekSignature => {
                        pending_start = base + i as u64;
                        trace!("signature at {:#x}", pending_start);
                        state = ScanState::SeekEnd;
                    }
                    ScanState::SeekEnd => {
                        let end = base + i as u64 + END_MARKER.len() as u64;
                        trace!("end marker closes region {:#x}..{:#x}", pending_start, end);
                        regions.push(CarvedRegion {
                            start: pending_start,
                            end,
                            sig_len: signature.len(),
                        });
                        state = ScanState::SeekSignature;
                    }
                }
            }
            i += 1;
        }

        if filled < window {
            break;
        }
        base += (filled - overlap) as u64;
    }

    if state == ScanState::SeekEnd {
        debug!(
            "signature at {:#x} had no end marker before EOF; dropped",
            pending_start
        );
    }
    debug!("scan found {} region(s)", regions.len());
    Ok(regions)
}

/// Convenience: open `path` and scan it.
pub fn scan_file(
    path: &Path,
    signature: &[u8],
    opts: &ScanOptions,
) -> Result<Vec<CarvedRegion>, CarveError> {
    let mut file = File::open(path)?;
    scan(&mut file, signature, opts)
}

/// Fill `buf` from the reader, coming up short only at EOF.
fn fill_window<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn pairs(blob: &[u8], signature: &[u8], window: usize) -> Vec<(u64, u64)> {
        let opts = ScanOptions {
            window_size: window,
        };
        scan(&mut Cursor::new(blob), signature, &opts)
            .unwrap()
            .iter()
            .map(|r| (r.start, r.end))
            .collect()
    }

    #[test]
    fn pairs_signature_with_end_marker() {
        let mut blob = vec![0u8; 64];
        blob[10..13].copy_from_slice(b"SIG");
        blob[50] = 0xFF;
        blob[51] = 0xD9;
        assert_eq!(pairs(&blob, b"SIG", DEFAULT_WINDOW_SIZE), vec![(10, 52)]);
    }

    #[test]
    fn match_straddling_a_window_boundary_is_found() {
        // Window 8, pattern length 3, advance 6: "SIG" starts exactly on the
        // first boundary.
        let mut blob = Vec::new();
        blob.extend_from_slice(b"ABCDEF");
        blob.extend_from_slice(b"SIG");
        blob.extend_from_slice(b"xx");
        blob.extend_from_slice(&END_MARKER);
        blob.extend_from_slice(b"ZZ");
        assert_eq!(pairs(&blob, b"SIG", 8), vec![(6, 13)]);
    }

    #[test]
    fn result_is_window_size_invariant() {
        let mut blob = Vec::new();
        blob.extend_from_slice(b"junkjunk");
        blob.extend_from_slice(b"SIG");
        blob.extend_from_slice(&[0xAA; 20]);
        blob.extend_from_slice(&END_MARKER);
        blob.extend_from_slice(b"gap");
        blob.extend_from_slice(b"SIG");
        blob.extend_from_slice(&[0xBB; 5]);
        blob.extend_from_slice(&END_MARKER);
        blob.extend_from_slice(b"tail");

        let expected = vec![(8, 33), (36, 46)];
        for window in [3, 4, 8, 64, DEFAULT_WINDOW_SIZE] {
            assert_eq!(pairs(&blob, b"SIG", window), expected, "window {window}");
        }
    }

    #[test]
    fn dangling_signature_is_dropped() {
        let blob = [b"prefix" as &[u8], b"SIG", b"no end marker here"].concat();
        assert_eq!(pairs(&blob, b"SIG", 8), vec![]);
    }

    #[test]
    fn end_marker_before_signature_is_ignored() {
        let mut blob = Vec::new();
        blob.extend_from_slice(&END_MARKER);
        blob.extend_from_slice(b"xx");
        blob.extend_from_slice(b"SIG");
        blob.extend_from_slice(b"a");
        // A second signature inside the open region stays unmatched too.
        blob.extend_from_slice(b"SIG");
        blob.extend_from_slice(b"bb");
        blob.extend_from_slice(&END_MARKER);
        blob.extend_from_slice(b"z");
        assert_eq!(pairs(&blob, b"SIG", 16), vec![(4, 15)]);
    }

    #[test]
    fn signature_longer_than_window_grows_the_window() {
        let mut blob = Vec::new();
        blob.extend_from_slice(b"pad");
        blob.extend_from_slice(b"LONGSIGNATURE");
        blob.extend_from_slice(b"body");
        blob.extend_from_slice(&END_MARKER);
        assert_eq!(pairs(&blob, b"LONGSIGNATURE", 4), vec![(3, 22)]);
    }

    #[test]
    fn adjacent_signature_and_end_marker() {
        let blob = [b"SIG" as &[u8], &END_MARKER].concat();
        assert_eq!(pairs(&blob, b"SIG", DEFAULT_WINDOW_SIZE), vec![(0, 5)]);
    }

    #[test]
    fn empty_signature_is_rejected() {
        let err = scan(&mut Cursor::new(b"anything"), b"", &ScanOptions::default()).unwrap_err();
        assert!(matches!(err, CarveError::EmptySignature));
    }

    #[test]
    fn empty_source_yields_no_regions() {
        assert_eq!(pairs(&[], b"SIG", 8), vec![]);
    }
}
