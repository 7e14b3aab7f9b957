//! Flat packages: a single PFS0 of NCAs at the start of the file.

use std::{
    io::{Read, Seek},
    path::Path,
};

use crate::{
    catalog::{read_partition_metadata, ControlLookup, MetadataMap},
    error::{Context, Result},
    file::GameFile,
    keys::KeyRing,
    pfs0::process_pfs0,
};

/// Reads every content meta record of a package.
pub fn read_metadata<R>(keys: &KeyRing, reader: &mut R) -> Result<MetadataMap>
where R: Read + Seek + ?Sized {
    let partition = process_pfs0(reader, 0)?;
    read_partition_metadata(keys, reader, &partition, 0, ControlLookup::ExceptDlc)
}

pub fn read_nsp_metadata(keys: &KeyRing, path: &Path) -> Result<MetadataMap> {
    let mut file =
        GameFile::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    read_metadata(keys, &mut file).with_context(|| path.display().to_string())
}
