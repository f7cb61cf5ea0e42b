use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use thiserror::Error;

pub mod decoder;
pub mod writer;

pub use decoder::{DecodeOptions, Kdb, KdbEntry};
pub use writer::{KdbWriter, DEFAULT_BLOCK_SIZE};

pub const KDB_MAGIC: &[u8; 6] = b"CT2018";
pub const HEADER_LEN: usize = 10;
pub const LIST_SENTINEL: u32 = 0xFFFF_FFFF;
pub const KDB_SEED: u32 = 0x4F57_4154;
pub const MAX_ENTRIES: usize = 127;
pub const MAX_BLOCKS: usize = 255;
pub const ENTRY_NAME_LEN: usize = 16;
pub const SIGNATURE_PREFIX: &[u8; 5] = b"MAGIC";

#[derive(Error, Debug)]
pub enum KdbError {
    #[error("Invalid magic number: {found:02X?}")]
    BadMagic { found: [u8; 6] },
    #[error("{list} list reached {cap} records without a terminating sentinel")]
    MissingSentinel { list: &'static str, cap: usize },
    #[error("Container truncated while reading {context}")]
    Truncated { context: &'static str },
    #[error("Entry name longer than {ENTRY_NAME_LEN} bytes: {0:?}")]
    NameTooLong(String),
    #[error("Entry cap ({MAX_ENTRIES}) exceeded")]
    TooManyEntries,
    #[error("Block cap ({MAX_BLOCKS}) exceeded for entry {0:?}")]
    TooManyBlocks(String),
    #[error("Offset {0:#x} exceeds the u32 addressing limit")]
    OffsetOverflow(u64),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Render a fixed-width name field: cut at the first NUL, lossy UTF-8.
pub fn display_name(name: &[u8; ENTRY_NAME_LEN]) -> String {
    let end = name.iter().position(|&b| b == 0).unwrap_or(ENTRY_NAME_LEN);
    String::from_utf8_lossy(&name[..end]).into_owned()
}

pub(crate) fn read_exact_or_truncated<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    context: &'static str,
) -> Result<(), KdbError> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => KdbError::Truncated { context },
        _ => KdbError::Io(e),
    })
}

pub(crate) fn read_u32_or_truncated<R: Read>(
    reader: &mut R,
    context: &'static str,
) -> Result<u32, KdbError> {
    reader.read_u32::<LittleEndian>().map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => KdbError::Truncated { context },
        _ => KdbError::Io(e),
    })
}

#[derive(Debug, Clone)]
pub struct KdbHeader {
    pub magic: [u8; 6],
    pub entry_list_offset: u32,
}
impl KdbHeader {
    pub fn new(entry_list_offset: u32) -> Self {
        Self {
            magic: *KDB_MAGIC,
            entry_list_offset,
        }
    }
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.magic)?;
        writer.write_u32::<LittleEndian>(self.entry_list_offset)?;
        Ok(())
    }
    pub fn read<R: Read>(mut reader: R) -> Result<Self, KdbError> {
        let mut magic = [0u8; 6];
        read_exact_or_truncated(&mut reader, &mut magic, "header")?;
        if &magic != KDB_MAGIC {
            return Err(KdbError::BadMagic { found: magic });
        }
        let entry_list_offset = read_u32_or_truncated(&mut reader, "header")?;
        Ok(Self {
            magic,
            entry_list_offset,
        })
    }
}

#[derive(Debug, Clone)]
pub struct EntryRecord {
    pub name: [u8; ENTRY_NAME_LEN],
    pub block_list_offset: u32,
}
impl EntryRecord {
    /// Read the next record, or `None` where the 4-byte probe reads as the
    /// list sentinel. Probing before the name keeps a sentinel that sits at
    /// EOF parseable.
    pub fn read_next<R: Read>(mut reader: R) -> Result<Option<Self>, KdbError> {
        let mut probe = [0u8; 4];
        read_exact_or_truncated(&mut reader, &mut probe, "entry record")?;
        if u32::from_le_bytes(probe) == LIST_SENTINEL {
            return Ok(None);
        }
        let mut name = [0u8; ENTRY_NAME_LEN];
        name[..4].copy_from_slice(&probe);
        read_exact_or_truncated(&mut reader, &mut name[4..], "entry name")?;
        let block_list_offset = read_u32_or_truncated(&mut reader, "entry record")?;
        Ok(Some(Self {
            name,
            block_list_offset,
        }))
    }
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.name)?;
        writer.write_u32::<LittleEndian>(self.block_list_offset)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRecord {
    pub size: u16,
    pub data_offset: u32,
}
impl BlockRecord {
    /// Read the next record, or `None` where the first 4 of its 6 bytes read
    /// as the list sentinel.
    pub fn read_next<R: Read>(mut reader: R) -> Result<Option<Self>, KdbError> {
        let mut probe = [0u8; 4];
        read_exact_or_truncated(&mut reader, &mut probe, "block record")?;
        if u32::from_le_bytes(probe) == LIST_SENTINEL {
            return Ok(None);
        }
        let mut tail = [0u8; 2];
        read_exact_or_truncated(&mut reader, &mut tail, "block record")?;
        Ok(Some(Self {
            size: u16::from_le_bytes([probe[0], probe[1]]),
            data_offset: u32::from_le_bytes([probe[2], probe[3], tail[0], tail[1]]),
        }))
    }
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u16::<LittleEndian>(self.size)?;
        writer.write_u32::<LittleEndian>(self.data_offset)?;
        Ok(())
    }
}

/// Write the 4-byte list terminator.
pub fn write_sentinel<W: Write>(mut writer: W) -> io::Result<()> {
    writer.write_u32::<LittleEndian>(LIST_SENTINEL)
}
