//! Shared record collection for NSP and XCI files.

use std::{
    collections::BTreeMap,
    io::{Cursor, Read, Seek},
    path::Path,
};

use log::debug;

use crate::{
    cnmt::{ContentMetaAttributes, ContentMetaType, MetaRecord, CNMT_NCA_MARKER, CNMT_XML_SUFFIX},
    error::{Context, Error, Result},
    file::is_split_chunk,
    keys::KeyRing,
    nacp::extract_nacp,
    nca::open_data_section,
    nsp, xci,
    pfs0::{process_pfs0, Partition, Pfs0File},
    read::{add_offset, read_bytes_at},
};

/// Decoded records keyed by title id.
pub type MetadataMap = BTreeMap<String, ContentMetaAttributes>;

/// The container formats recognized by file extension.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ContainerFormat {
    /// Flat PFS0 package (`.nsp`, `.nsz`).
    Package,
    /// Cartridge image (`.xci`, `.xcz`).
    Cartridge,
}

impl ContainerFormat {
    /// Picks the format from the extension of `path`. A split-file chunk takes
    /// the extension of the directory holding it.
    pub fn from_path(path: &Path) -> Result<Self> {
        let named = match path.parent() {
            Some(dir) if is_split_chunk(path) && dir.extension().is_some() => dir,
            _ => path,
        };
        let extension = named
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "nsp" | "nsz" => Ok(ContainerFormat::Package),
            "xci" | "xcz" => Ok(ContainerFormat::Cartridge),
            _ => Err(Error::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Reads every content meta record in the file at `path`.
pub fn read_file_metadata(keys: &KeyRing, path: &Path) -> Result<MetadataMap> {
    match ContainerFormat::from_path(path)? {
        ContainerFormat::Package => nsp::read_nsp_metadata(keys, path),
        ContainerFormat::Cartridge => xci::read_xci_metadata(keys, path),
    }
}

/// Which records get their display names looked up.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ControlLookup {
    /// Everything but add-on content.
    ExceptDlc,
    /// Only base titles and updates.
    BaseAndUpdate,
}

impl ControlLookup {
    fn wants(self, content_type: Option<ContentMetaType>) -> bool {
        match self {
            ControlLookup::ExceptDlc => content_type != Some(ContentMetaType::Dlc),
            ControlLookup::BaseAndUpdate => {
                matches!(content_type, Some(ContentMetaType::Base | ContentMetaType::Update))
            }
        }
    }
}

/// Decodes the records of a partition of NCAs that starts at `partition_offset`.
///
/// Binary records from `cnmt.nca` entries are used when present; otherwise the
/// `.cnmt.xml` sidecars are decoded. A later record with the same title id
/// replaces an earlier one.
pub(crate) fn read_partition_metadata<R>(
    keys: &KeyRing,
    reader: &mut R,
    partition: &Partition,
    partition_offset: u64,
    lookup: ControlLookup,
) -> Result<MetadataMap>
where
    R: Read + Seek + ?Sized,
{
    let binary: Vec<&Pfs0File> =
        partition.files.iter().filter(|f| f.name.contains(CNMT_NCA_MARKER)).collect();
    let use_xml = binary.is_empty();
    let entries: Vec<&Pfs0File> = if use_xml {
        partition.files.iter().filter(|f| f.name.ends_with(CNMT_XML_SUFFIX)).collect()
    } else {
        binary
    };
    if entries.is_empty() {
        debug!("No content meta entries among {} files", partition.files.len());
    }

    let mut records = MetadataMap::new();
    for file in entries {
        let mut meta = if use_xml {
            read_xml_record(reader, partition_offset, file)
        } else {
            read_binary_record(keys, reader, partition_offset, file)
        }
        .with_context(|| file.name.clone())?;

        if lookup.wants(meta.content_type) {
            match extract_nacp(keys, &meta, reader, partition, partition_offset) {
                Ok(nacp) => {
                    meta.attach_nacp(nacp);
                }
                Err(e) => debug!("{}: {e}", meta.title_id),
            }
        }
        if let Some(previous) = records.insert(meta.title_id.clone(), meta) {
            debug!("{}: replaced record from an earlier entry", previous.title_id);
        }
    }
    Ok(records)
}

fn read_binary_record<R>(
    keys: &KeyRing,
    reader: &mut R,
    partition_offset: u64,
    file: &Pfs0File,
) -> Result<ContentMetaAttributes>
where
    R: Read + Seek + ?Sized,
{
    let nca_offset = add_offset(partition_offset, file.offset, &file.name)?;
    let section = open_data_section(keys, reader, nca_offset)?;
    let inner = process_pfs0(&mut Cursor::new(&section.data), 0)?;
    MetaRecord::Binary { partition: &inner, data: &section.data }.decode()
}

fn read_xml_record<R>(
    reader: &mut R,
    partition_offset: u64,
    file: &Pfs0File,
) -> Result<ContentMetaAttributes>
where
    R: Read + Seek + ?Sized,
{
    let offset = add_offset(partition_offset, file.offset, &file.name)?;
    let data = read_bytes_at(reader, offset, file.size, &file.name)?;
    MetaRecord::Xml(&data).decode()
}
