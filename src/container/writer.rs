//! KDB container writer — the decoder's inverse.
//!
//! [`KdbWriter`] reserves the 10-byte header up front and writes each
//! entry's encrypted data blocks as the entry is added. `finalize()` then
//! lays down the per-entry block lists and the entry list, each terminated
//! by the 4-byte sentinel, and patches the header at offset 0 with the
//! entry-list offset.
//!
//! The cipher is symmetric, so each payload is encrypted in a single
//! keystream pass and the ciphertext split into blocks; concatenating the
//! block data and applying the same keystream yields the payload back.

use std::io::{Seek, SeekFrom, Write};

use log::debug;

use crate::container::{
    display_name, write_sentinel, BlockRecord, EntryRecord, KdbError, KdbHeader, ENTRY_NAME_LEN,
    HEADER_LEN, KDB_SEED, MAX_BLOCKS, MAX_ENTRIES,
};
use crate::crypto;

/// Default ciphertext block size. Block sizes are u16 on disk, so the hard
/// upper bound is 65535.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

pub struct KdbWriter<W: Write + Seek> {
    writer: W,
    block_size: usize,
    pending: Vec<PendingEntry>,
}

struct PendingEntry {
    name: [u8; ENTRY_NAME_LEN],
    blocks: Vec<BlockRecord>,
}

impl<W: Write + Seek> KdbWriter<W> {
    pub fn new(writer: W) -> Result<Self, KdbError> {
        Self::with_block_size(writer, DEFAULT_BLOCK_SIZE)
    }

    pub fn with_block_size(mut writer: W, block_size: usize) -> Result<Self, KdbError> {
        writer.seek(SeekFrom::Start(0))?;
        writer.write_all(&[0u8; HEADER_LEN])?; // reserved; overwritten on finalize
        Ok(Self {
            writer,
            block_size: block_size.clamp(1, u16::MAX as usize),
            pending: Vec::new(),
        })
    }

    /// Add one named entry.
    ///
    /// The payload is encrypted in one keystream pass, split into
    /// `block_size` ciphertext blocks, and written immediately; the list
    /// records follow on `finalize()`. An empty payload produces an entry
    /// with zero blocks.
    pub fn add_entry(&mut self, name: &str, payload: &[u8]) -> Result<(), KdbError> {
        if self.pending.len() == MAX_ENTRIES {
            return Err(KdbError::TooManyEntries);
        }
        let name = encode_name(name)?;

        let ciphertext = crypto::apply(payload, KDB_SEED);
        if ciphertext.len().div_ceil(self.block_size) > MAX_BLOCKS {
            return Err(KdbError::TooManyBlocks(display_name(&name)));
        }

        let mut blocks = Vec::new();
        for chunk in ciphertext.chunks(self.block_size) {
            let data_offset = offset32(self.writer.stream_position()?)?;
            self.writer.write_all(chunk)?;
            blocks.push(BlockRecord {
                size: chunk.len() as u16,
                data_offset,
            });
        }

        self.pending.push(PendingEntry { name, blocks });
        Ok(())
    }

    /// Write the block lists and the entry list, then patch the header at
    /// offset 0. Must be called exactly once.
    pub fn finalize(&mut self) -> Result<(), KdbError> {
        let mut entry_records = Vec::with_capacity(self.pending.len());
        for entry in &self.pending {
            let block_list_offset = offset32(self.writer.stream_position()?)?;
            for block in &entry.blocks {
                block.write(&mut self.writer)?;
            }
            write_sentinel(&mut self.writer)?;
            entry_records.push(EntryRecord {
                name: entry.name,
                block_list_offset,
            });
        }

        let entry_list_offset = offset32(self.writer.stream_position()?)?;
        for record in &entry_records {
            record.write(&mut self.writer)?;
        }
        write_sentinel(&mut self.writer)?;

        self.writer.seek(SeekFrom::Start(0))?;
        KdbHeader::new(entry_list_offset).write(&mut self.writer)?;
        debug!(
            "finalized KDB: {} entry record(s), entry list at {:#x}",
            entry_records.len(),
            entry_list_offset
        );
        Ok(())
    }

    /// Consume the writer and hand back the underlying stream.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn encode_name(name: &str) -> Result<[u8; ENTRY_NAME_LEN], KdbError> {
    let bytes = name.as_bytes();
    if bytes.len() > ENTRY_NAME_LEN {
        return Err(KdbError::NameTooLong(name.to_owned()));
    }
    let mut out = [0u8; ENTRY_NAME_LEN];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

/// KDB addresses everything through u32 file offsets.
fn offset32(pos: u64) -> Result<u32, KdbError> {
    u32::try_from(pos).map_err(|_| KdbError::OffsetOverflow(pos))
}
