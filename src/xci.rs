//! Cartridge images: a root HFS0 whose `secure` partition holds the NCAs.

use std::{
    io::{Read, Seek, SeekFrom},
    path::Path,
};

use log::debug;
use zerocopy::{
    little_endian::{U32, U64},
    FromBytes, Immutable, IntoBytes, KnownLayout,
};

use crate::{
    catalog::{read_partition_metadata, ControlLookup, MetadataMap},
    error::{Context, Error, Result},
    file::GameFile,
    keys::KeyRing,
    pfs0::process_pfs0,
    read::{add_offset, read_from},
    static_assert,
    util::WindowedReader,
};

pub const XCI_MAGIC: [u8; 4] = *b"HEAD";
pub const SECURE_PARTITION_NAME: &str = "secure";

/// Cartridge image header.
#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, align(8))]
pub struct XciHeader {
    pub signature: [u8; 0x100],
    pub magic: [u8; 4],
    pub secure_area_start: U32,
    pub backup_area_start: U32,
    pub title_kek_index: u8,
    pub game_card_size: u8,
    pub header_version: u8,
    pub flags: u8,
    pub package_id: U64,
    pub valid_data_end: U64,
    pub iv: [u8; 0x10],
    pub root_partition_offset: U64,
    pub root_partition_header_size: U64,
    pub root_partition_header_hash: [u8; 0x20],
    pub initial_data_hash: [u8; 0x20],
    pub sel_sec: U32,
    pub sel_t1_key: U32,
    pub sel_key: U32,
    pub lim_area: U32,
    pub encrypted_info: [u8; 0x70],
}

static_assert!(size_of::<XciHeader>() == 0x200);

/// Reads every content meta record of a cartridge image.
pub fn read_metadata<R>(keys: &KeyRing, reader: &mut R) -> Result<MetadataMap>
where R: Read + Seek + ?Sized {
    reader.seek(SeekFrom::Start(0))?;
    let header: XciHeader =
        read_from(reader).map_err(|e| Error::truncated(e, "cartridge header"))?;
    if header.magic != XCI_MAGIC {
        return Err(Error::InvalidContainer(String::from_utf8_lossy(&header.magic).into_owned()));
    }

    let root_offset = header.root_partition_offset.get();
    let root = process_pfs0(reader, root_offset).context("root partition")?;
    let secure = root.find(SECURE_PARTITION_NAME).ok_or(Error::MissingSecurePartition)?;
    let secure_offset = add_offset(root_offset, secure.offset, SECURE_PARTITION_NAME)?;
    debug!("Secure partition at {secure_offset:#X}, size {:#X}", secure.size);

    let mut secure_reader = WindowedReader::new(reader, secure_offset, secure.size)?;
    let partition = process_pfs0(&mut secure_reader, 0).context("secure partition")?;
    read_partition_metadata(keys, &mut secure_reader, &partition, 0, ControlLookup::BaseAndUpdate)
}

pub fn read_xci_metadata(keys: &KeyRing, path: &Path) -> Result<MetadataMap> {
    let mut file =
        GameFile::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    read_metadata(keys, &mut file).with_context(|| path.display().to_string())
}
