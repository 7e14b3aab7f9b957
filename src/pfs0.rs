use std::{
    ffi::CStr,
    io::{Read, Seek, SeekFrom},
};

use log::trace;
use zerocopy::{
    little_endian::{U32, U64},
    FromBytes, Immutable, IntoBytes, KnownLayout,
};

use crate::{
    error::{Error, Result},
    read::{add_offset, ensure_within, read_box_slice, read_from, read_vec},
    static_assert,
};

pub const PFS0_MAGIC: [u8; 4] = *b"PFS0";
pub const HFS0_MAGIC: [u8; 4] = *b"HFS0";

/// PFS0/HFS0 header.
#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, align(8))]
pub struct Pfs0Header {
    pub magic: [u8; 4],
    pub num_files: U32,
    pub string_table_size: U32,
    pub _reserved: U32,
}

static_assert!(size_of::<Pfs0Header>() == 0x10);

/// PFS0 file entry.
#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, align(8))]
pub struct Pfs0FileEntry {
    pub offset: U64,
    pub size: U64,
    pub string_table_offset: U32,
    pub _reserved: U32,
}

static_assert!(size_of::<Pfs0FileEntry>() == 0x18);

/// HFS0 file entry. Carries a hash of the first `hashed_size` bytes of the file.
#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, align(8))]
pub struct Hfs0FileEntry {
    pub offset: U64,
    pub size: U64,
    pub string_table_offset: U32,
    pub hashed_size: U32,
    pub _reserved: U64,
    pub hash: [u8; 0x20],
}

static_assert!(size_of::<Hfs0FileEntry>() == 0x40);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PartitionKind {
    Pfs0,
    Hfs0,
}

impl PartitionKind {
    pub fn entry_size(self) -> u64 {
        match self {
            PartitionKind::Pfs0 => size_of::<Pfs0FileEntry>() as u64,
            PartitionKind::Hfs0 => size_of::<Hfs0FileEntry>() as u64,
        }
    }
}

/// A named file inside a partition.
///
/// `offset` is relative to the start of the partition that contains it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pfs0File {
    pub offset: u64,
    pub size: u64,
    pub name: String,
}

/// A parsed PFS0 or HFS0 partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub kind: PartitionKind,
    /// Length of header, entry table and string table.
    pub header_size: u64,
    pub files: Vec<Pfs0File>,
}

impl Partition {
    pub fn find(&self, name: &str) -> Option<&Pfs0File> {
        self.files.iter().find(|f| f.name == name)
    }

    /// First file whose name contains `needle`, e.g. a content id.
    pub fn find_containing(&self, needle: &str) -> Option<&Pfs0File> {
        self.files.iter().find(|f| f.name.contains(needle))
    }
}

/// Reads a partition whose header begins at `offset`.
///
/// File offsets in the result are relative to `offset`.
pub fn process_pfs0<R>(reader: &mut R, offset: u64) -> Result<Partition>
where R: Read + Seek + ?Sized {
    reader.seek(SeekFrom::Start(offset))?;
    let header: Pfs0Header =
        read_from(reader).map_err(|e| Error::truncated(e, "partition header"))?;
    let kind = match header.magic {
        PFS0_MAGIC => PartitionKind::Pfs0,
        HFS0_MAGIC => PartitionKind::Hfs0,
        magic => return Err(Error::InvalidContainer(String::from_utf8_lossy(&magic).into_owned())),
    };
    let num_files = header.num_files.get() as usize;
    let tables_start = add_offset(offset, size_of::<Pfs0Header>() as u64, "partition tables")?;
    let tables_len = kind.entry_size() * num_files as u64 + header.string_table_size.get() as u64;
    ensure_within(reader, tables_start, tables_len, "partition tables")?;
    reader.seek(SeekFrom::Start(tables_start))?;

    // (offset, size, string table offset)
    let entries: Vec<(u64, u64, u32)> = match kind {
        PartitionKind::Pfs0 => read_vec::<Pfs0FileEntry, _>(reader, num_files)
            .map_err(|e| Error::truncated(e, "PFS0 entries"))?
            .iter()
            .map(|e| (e.offset.get(), e.size.get(), e.string_table_offset.get()))
            .collect(),
        PartitionKind::Hfs0 => read_vec::<Hfs0FileEntry, _>(reader, num_files)
            .map_err(|e| Error::truncated(e, "HFS0 entries"))?
            .iter()
            .map(|e| (e.offset.get(), e.size.get(), e.string_table_offset.get()))
            .collect(),
    };
    let string_table: Box<[u8]> =
        read_box_slice(reader, header.string_table_size.get() as usize)
            .map_err(|e| Error::truncated(e, "partition string table"))?;

    let header_size = size_of::<Pfs0Header>() as u64
        + kind.entry_size() * num_files as u64
        + string_table.len() as u64;
    let mut files = Vec::with_capacity(entries.len());
    for (file_offset, size, name_offset) in entries {
        let name_bytes = string_table
            .get(name_offset as usize..)
            .ok_or_else(|| Error::TruncatedContainer("file name offset".to_string()))?;
        let c_str = CStr::from_bytes_until_nul(name_bytes)
            .map_err(|_| Error::TruncatedContainer("unterminated file name".to_string()))?;
        let name = c_str.to_string_lossy().into_owned();
        let start = add_offset(header_size, file_offset, &name)?;
        trace!("{name}: Offset {start:#X}, size {size:#X}");
        files.push(Pfs0File { offset: start, size, name });
    }
    Ok(Partition { kind, header_size, files })
}
