use zerocopy::{
    little_endian::{U32, U64},
    FromBytes, Immutable, IntoBytes, KnownLayout,
};

use crate::{
    error::{Error, Result},
    read::slice_at,
    static_assert,
};

/// RomFS header.
#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, align(8))]
pub struct RomFsHeader {
    pub header_size: U64,
    pub dir_hash_table_offset: U64,
    pub dir_hash_table_size: U64,
    pub dir_meta_table_offset: U64,
    pub dir_meta_table_size: U64,
    pub file_hash_table_offset: U64,
    pub file_hash_table_size: U64,
    pub file_meta_table_offset: U64,
    pub file_meta_table_size: U64,
    pub data_offset: U64,
}

static_assert!(size_of::<RomFsHeader>() == 0x50);

/// Fixed part of a file metadata entry; the name follows, padded to 4 bytes.
#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct RomFsFileEntry {
    pub parent: U32,
    pub sibling: U32,
    pub offset: U64,
    pub size: U64,
    pub hash: U32,
    pub name_size: U32,
}

static_assert!(size_of::<RomFsFileEntry>() == 0x20);

/// A file in the RomFS metadata table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RomFsFile {
    pub parent: u32,
    pub sibling: u32,
    /// Offset from the start of the data region.
    pub offset: u64,
    pub size: u64,
    pub hash: u32,
    pub name: String,
}

/// A RomFS image held in memory.
pub struct RomFs<'a> {
    pub header: RomFsHeader,
    data: &'a [u8],
}

impl<'a> RomFs<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let header = slice_at(data, 0, size_of::<RomFsHeader>())
            .and_then(|bytes| RomFsHeader::read_from_bytes(bytes).ok())
            .ok_or_else(|| Error::TruncatedContainer("RomFS header".to_string()))?;
        if header.header_size.get() != size_of::<RomFsHeader>() as u64 {
            return Err(Error::InvalidContainer(format!(
                "RomFS header size {:#x}",
                header.header_size.get()
            )));
        }
        Ok(Self { header, data })
    }

    fn file_table(&self) -> Result<&'a [u8]> {
        slice_at(
            self.data,
            self.header.file_meta_table_offset.get() as usize,
            self.header.file_meta_table_size.get() as usize,
        )
        .ok_or_else(|| Error::TruncatedContainer("RomFS file table".to_string()))
    }

    /// Walks the file table, stopping at the first entry for which `f` returns true.
    fn walk<F>(&self, mut f: F) -> Result<Option<RomFsFile>>
    where F: FnMut(&RomFsFile) -> bool {
        let table = self.file_table()?;
        let mut offset = 0usize;
        while offset + size_of::<RomFsFileEntry>() <= table.len() {
            let entry = RomFsFileEntry::read_from_bytes(&table[offset..offset + 0x20])
                .map_err(|_| Error::TruncatedContainer("RomFS file entry".to_string()))?;
            let name_size = entry.name_size.get() as usize;
            let name = slice_at(table, offset + 0x20, name_size)
                .ok_or_else(|| Error::TruncatedContainer(format!("RomFS name at {offset:#X}")))?;
            let file = RomFsFile {
                parent: entry.parent.get(),
                sibling: entry.sibling.get(),
                offset: entry.offset.get(),
                size: entry.size.get(),
                hash: entry.hash.get(),
                name: String::from_utf8_lossy(name).into_owned(),
            };
            if f(&file) {
                return Ok(Some(file));
            }
            offset += 0x20 + name_size.next_multiple_of(4);
        }
        Ok(None)
    }

    pub fn files(&self) -> Result<Vec<RomFsFile>> {
        let mut files = Vec::new();
        self.walk(|file| {
            files.push(file.clone());
            false
        })?;
        Ok(files)
    }

    pub fn find_file(&self, name: &str) -> Result<Option<RomFsFile>> {
        self.walk(|file| file.name == name)
    }

    /// Contents of a file.
    pub fn file_data(&self, file: &RomFsFile) -> Result<&'a [u8]> {
        let start = self.header.data_offset.get().checked_add(file.offset);
        start
            .and_then(|start| slice_at(self.data, start as usize, file.size as usize))
            .ok_or_else(|| Error::TruncatedContainer(format!("RomFS file {}", file.name)))
    }
}
