//! KDB container decoding.
//!
//! # Decode flow
//!
//! 1. Header at offset 0: 6-byte magic `CT2018` + u32 LE entry-list offset.
//! 2. Seek to the entry list; collect records until the sentinel or the
//!    entry cap (default 127).
//! 3. Per entry, seek to its block list; collect records until the sentinel
//!    or the block cap (default 255).
//! 4. Per block in record order, seek to `data_offset` and read exactly
//!    `size` ciphertext bytes into the entry's concatenation buffer.
//! 5. Decrypt the whole concatenation in one keystream pass with the fixed
//!    container seed and keep it as the entry payload.
//!
//! Decoding is all-or-nothing: any I/O or format failure on any entry fails
//! the whole decode. The source is only read, never written.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use log::{debug, trace};

use crate::container::{
    read_exact_or_truncated, BlockRecord, EntryRecord, KdbError, KdbHeader, ENTRY_NAME_LEN,
    KDB_SEED, LIST_SENTINEL, MAX_BLOCKS, MAX_ENTRIES, SIGNATURE_PREFIX,
};
use crate::crypto;

/// Decode limits and strictness knobs.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Entry-list cap; collection stops here when no sentinel appears first.
    pub max_entries: usize,
    /// Per-entry block-list cap.
    pub max_blocks: usize,
    /// Treat a cap hit without a sentinel as [`KdbError::MissingSentinel`]
    /// instead of silently truncating the list.
    pub strict: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            max_entries: MAX_ENTRIES,
            max_blocks: MAX_BLOCKS,
            strict: false,
        }
    }
}

/// One decoded container entry.
#[derive(Debug, Clone)]
pub struct KdbEntry {
    /// Fixed-width name field; not guaranteed NUL-terminated.
    pub name: [u8; ENTRY_NAME_LEN],
    pub block_list_offset: u32,
    /// Block records in list order. The raw ciphertext is not retained.
    pub blocks: Vec<BlockRecord>,
    /// The concatenation of all block data, decrypted in one keystream pass.
    /// Raw bytes; not guaranteed to be text.
    pub payload: Vec<u8>,
}

impl KdbEntry {
    /// Name cut at the first NUL and rendered as lossy UTF-8.
    pub fn display_name(&self) -> String {
        crate::container::display_name(&self.name)
    }

    /// Whether the raw name field begins with `prefix`.
    pub fn name_starts_with(&self, prefix: &[u8]) -> bool {
        self.name.starts_with(prefix)
    }
}

/// A decoded KDB container.
#[derive(Debug, Clone)]
pub struct Kdb {
    pub header: KdbHeader,
    pub entries: Vec<KdbEntry>,
}

impl Kdb {
    /// Decode a container from a seekable source with default options.
    pub fn decode<R: Read + Seek>(reader: &mut R) -> Result<Self, KdbError> {
        Self::decode_with(reader, &DecodeOptions::default())
    }

    pub fn decode_with<R: Read + Seek>(
        reader: &mut R,
        opts: &DecodeOptions,
    ) -> Result<Self, KdbError> {
        reader.seek(SeekFrom::Start(0))?;
        let header = KdbHeader::read(&mut *reader)?;
        debug!("KDB header ok, entry list at {:#x}", header.entry_list_offset);

        reader.seek(SeekFrom::Start(header.entry_list_offset as u64))?;
        let records = read_entry_list(reader, opts)?;
        debug!("entry list: {} record(s)", records.len());

        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            entries.push(resolve_entry(reader, record, opts)?);
        }
        Ok(Self { header, entries })
    }

    /// Decode a container file with default options.
    pub fn decode_file<P: AsRef<Path>>(path: P) -> Result<Self, KdbError> {
        Self::decode_file_with(path, &DecodeOptions::default())
    }

    pub fn decode_file_with<P: AsRef<Path>>(
        path: P,
        opts: &DecodeOptions,
    ) -> Result<Self, KdbError> {
        let mut file = File::open(path)?;
        Self::decode_with(&mut file, opts)
    }

    /// First entry whose name begins with the 5-byte `MAGIC` prefix.
    pub fn find_signature(&self) -> Option<&KdbEntry> {
        self.entries
            .iter()
            .find(|e| e.name_starts_with(SIGNATURE_PREFIX))
    }
}

fn read_entry_list<R: Read + Seek>(
    reader: &mut R,
    opts: &DecodeOptions,
) -> Result<Vec<EntryRecord>, KdbError> {
    let mut records = Vec::new();
    loop {
        if records.len() == opts.max_entries {
            check_capped_list(reader, opts, "entry", opts.max_entries)?;
            break;
        }
        match EntryRecord::read_next(&mut *reader)? {
            Some(record) => records.push(record),
            None => break,
        }
    }
    Ok(records)
}

fn resolve_entry<R: Read + Seek>(
    reader: &mut R,
    record: EntryRecord,
    opts: &DecodeOptions,
) -> Result<KdbEntry, KdbError> {
    reader.seek(SeekFrom::Start(record.block_list_offset as u64))?;
    let mut blocks = Vec::new();
    loop {
        if blocks.len() == opts.max_blocks {
            check_capped_list(reader, opts, "block", opts.max_blocks)?;
            break;
        }
        match BlockRecord::read_next(&mut *reader)? {
            Some(block) => blocks.push(block),
            None => break,
        }
    }

    let total: usize = blocks.iter().map(|b| b.size as usize).sum();
    let mut ciphertext = Vec::with_capacity(total);
    for block in &blocks {
        reader.seek(SeekFrom::Start(block.data_offset as u64))?;
        let start = ciphertext.len();
        ciphertext.resize(start + block.size as usize, 0);
        read_exact_or_truncated(reader, &mut ciphertext[start..], "block data")?;
    }

    let entry = KdbEntry {
        name: record.name,
        block_list_offset: record.block_list_offset,
        blocks,
        payload: crypto::apply(&ciphertext, KDB_SEED),
    };
    trace!(
        "entry {:?}: {} block(s), {} payload byte(s)",
        entry.display_name(),
        entry.blocks.len(),
        entry.payload.len()
    );
    Ok(entry)
}

/// At the record cap: lenient mode truncates silently (the capped list may
/// or may not be terminated); strict mode demands the sentinel right here,
/// so a list with exactly `cap` records and a sentinel still passes.
fn check_capped_list<R: Read>(
    reader: &mut R,
    opts: &DecodeOptions,
    list: &'static str,
    cap: usize,
) -> Result<(), KdbError> {
    if !opts.strict {
        trace!("{} cap {} reached, truncating", list, cap);
        return Ok(());
    }
    let mut probe = [0u8; 4];
    match reader.read_exact(&mut probe) {
        Ok(()) if u32::from_le_bytes(probe) == LIST_SENTINEL => Ok(()),
        Ok(()) => Err(KdbError::MissingSentinel { list, cap }),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(KdbError::MissingSentinel { list, cap })
        }
        Err(e) => Err(KdbError::Io(e)),
    }
}
