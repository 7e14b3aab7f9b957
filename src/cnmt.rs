//! Content meta records: the identity of each title inside a package.
//!
//! Records come in two encodings. Packages carry a binary `.cnmt` file inside
//! the meta NCA; some older dumps also ship a `.cnmt.xml` sidecar with the
//! same scalar fields. Both decode to [`ContentMetaAttributes`].

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
};

use log::{debug, trace};
use quick_xml::{events::Event, Reader};
use zerocopy::{
    little_endian::{U16, U32, U64},
    FromBytes, Immutable, IntoBytes, KnownLayout,
};

use crate::{
    error::{Error, Result},
    nacp::Nacp,
    pfs0::Partition,
    read::slice_at,
    static_assert,
};

pub const CNMT_NCA_MARKER: &str = "cnmt.nca";
pub const CNMT_XML_SUFFIX: &str = ".cnmt.xml";

/// Mask over the low bits of a title id that distinguishes base, update and DLC ids.
pub const TITLE_ID_TYPE_MASK: u64 = 0xFFF;
pub const UPDATE_TITLE_ID_BITS: u64 = 0x800;

/// Binary content meta header.
#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct ContentMetaHeader {
    pub title_id: U64,
    pub version: U32,
    pub meta_type: u8,
    pub _reserved1: u8,
    pub extended_header_size: U16,
    pub content_count: U16,
    pub content_meta_count: U16,
    pub attributes: u8,
    pub storage_id: u8,
    pub install_type: u8,
    pub committed: u8,
    pub required_download_system_version: U32,
    pub _reserved2: [u8; 0x4],
}

static_assert!(size_of::<ContentMetaHeader>() == 0x20);

/// One row of the content table.
#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct PackagedContentInfo {
    pub hash: [u8; 0x20],
    pub content_id: [u8; 0x10],
    pub size: [u8; 0x6],
    pub content_type: u8,
    pub id_offset: u8,
}

static_assert!(size_of::<PackagedContentInfo>() == 0x38);

impl PackagedContentInfo {
    pub fn size(&self) -> u64 {
        let mut bytes = [0u8; 8];
        bytes[..6].copy_from_slice(&self.size);
        u64::from_le_bytes(bytes)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContentMetaType {
    Base,
    Update,
    Dlc,
}

impl ContentMetaType {
    /// Maps a binary meta type marker. System types and deltas are untyped.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x80 => Some(ContentMetaType::Base),
            0x81 => Some(ContentMetaType::Update),
            0x82 => Some(ContentMetaType::Dlc),
            _ => None,
        }
    }

    pub fn from_xml_name(name: &str) -> Option<Self> {
        match name {
            "Application" => Some(ContentMetaType::Base),
            "Patch" => Some(ContentMetaType::Update),
            "AddOnContent" => Some(ContentMetaType::Dlc),
            _ => None,
        }
    }

    /// Classifies by the low bits of the title id.
    pub fn from_title_id(title_id: u64) -> Self {
        match title_id & TITLE_ID_TYPE_MASK {
            0 => ContentMetaType::Base,
            UPDATE_TITLE_ID_BITS => ContentMetaType::Update,
            _ => ContentMetaType::Dlc,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContentMetaType::Base => "BASE",
            ContentMetaType::Update => "UPDATE",
            ContentMetaType::Dlc => "DLC",
        }
    }
}

impl Display for ContentMetaType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ContentRole {
    Meta = 0,
    Program = 1,
    Data = 2,
    Control = 3,
    HtmlDocument = 4,
    LegalInformation = 5,
    DeltaFragment = 6,
}

impl ContentRole {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ContentRole::Meta),
            1 => Some(ContentRole::Program),
            2 => Some(ContentRole::Data),
            3 => Some(ContentRole::Control),
            4 => Some(ContentRole::HtmlDocument),
            5 => Some(ContentRole::LegalInformation),
            6 => Some(ContentRole::DeltaFragment),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Meta" => Some(ContentRole::Meta),
            "Program" => Some(ContentRole::Program),
            "Data" => Some(ContentRole::Data),
            "Control" => Some(ContentRole::Control),
            "HtmlDocument" => Some(ContentRole::HtmlDocument),
            "LegalInformation" => Some(ContentRole::LegalInformation),
            "DeltaFragment" => Some(ContentRole::DeltaFragment),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContentRole::Meta => "Meta",
            ContentRole::Program => "Program",
            ContentRole::Data => "Data",
            ContentRole::Control => "Control",
            ContentRole::HtmlDocument => "HtmlDocument",
            ContentRole::LegalInformation => "LegalInformation",
            ContentRole::DeltaFragment => "DeltaFragment",
        }
    }
}

impl Display for ContentRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

/// An NCA referenced by a content meta record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Content {
    /// Content id as 32 lowercase hex digits; also the NCA's file name stem.
    pub id: String,
    pub size: Option<u64>,
    pub key_generation: Option<u8>,
}

/// Decoded identity of one title in a package.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentMetaAttributes {
    /// 16 lowercase hex digits.
    pub title_id: String,
    pub version: u32,
    pub content_type: Option<ContentMetaType>,
    /// Type byte of a binary record, including values with no [`ContentMetaType`].
    pub meta_type: Option<u8>,
    pub required_system_version: Option<u32>,
    pub contents: BTreeMap<ContentRole, Content>,
    pub nacp: Option<Nacp>,
}

impl ContentMetaAttributes {
    /// Attaches the display name bundle. Only the first bundle is kept.
    pub fn attach_nacp(&mut self, nacp: Nacp) -> bool {
        if self.nacp.is_some() {
            debug!("{}: display name already attached", self.title_id);
            return false;
        }
        self.nacp = Some(nacp);
        true
    }

    pub fn content(&self, role: ContentRole) -> Option<&Content> { self.contents.get(&role) }
}

/// A content meta record in one of its two encodings.
#[derive(Copy, Clone, Debug)]
pub enum MetaRecord<'a> {
    /// The inner partition of a meta NCA section, and the section bytes it was read from.
    Binary { partition: &'a Partition, data: &'a [u8] },
    Xml(&'a [u8]),
}

impl MetaRecord<'_> {
    pub fn decode(self) -> Result<ContentMetaAttributes> {
        match self {
            MetaRecord::Binary { partition, data } => decode_binary(partition, data),
            MetaRecord::Xml(bytes) => decode_xml(bytes),
        }
    }
}

fn malformed(what: impl Into<String>) -> Error { Error::MalformedRecord(what.into()) }

/// Decodes the single `.cnmt` file of a meta NCA's partition.
pub fn decode_binary(partition: &Partition, data: &[u8]) -> Result<ContentMetaAttributes> {
    let [file] = partition.files.as_slice() else {
        return Err(malformed(format!(
            "expected one file in meta partition, found {}",
            partition.files.len()
        )));
    };
    let record = slice_at(data, file.offset as usize, file.size as usize)
        .ok_or_else(|| malformed(format!("{} outside section", file.name)))?;
    let header_bytes = slice_at(record, 0, size_of::<ContentMetaHeader>())
        .ok_or_else(|| malformed("content meta header"))?;
    let header = ContentMetaHeader::read_from_bytes(header_bytes)
        .map_err(|_| malformed("content meta header"))?;

    let content_type = ContentMetaType::from_u8(header.meta_type);
    let extended_header_size = header.extended_header_size.get() as usize;
    let table_offset = size_of::<ContentMetaHeader>() + extended_header_size;

    // Base and update records carry the required system version after the related title id.
    let required_system_version = match content_type {
        Some(ContentMetaType::Base | ContentMetaType::Update) if extended_header_size >= 0xC => {
            let bytes = slice_at(record, size_of::<ContentMetaHeader>() + 8, 4)
                .ok_or_else(|| malformed("extended header"))?;
            U32::read_from_bytes(bytes).ok().map(|v| v.get())
        }
        _ => None,
    };

    let mut contents = BTreeMap::new();
    for i in 0..header.content_count.get() as usize {
        let offset = table_offset + i * size_of::<PackagedContentInfo>();
        let row = slice_at(record, offset, size_of::<PackagedContentInfo>())
            .ok_or_else(|| malformed(format!("content entry {i} at {offset:#X}")))?;
        let info = PackagedContentInfo::read_from_bytes(row)
            .map_err(|_| malformed(format!("content entry {i}")))?;
        let Some(role) = ContentRole::from_u8(info.content_type) else {
            debug!("Skipping content entry {i} with unknown type {}", info.content_type);
            continue;
        };
        let content = Content {
            id: hex::encode(info.content_id),
            size: Some(info.size()),
            key_generation: None,
        };
        trace!("{role}: {}", content.id);
        contents.insert(role, content);
    }

    Ok(ContentMetaAttributes {
        title_id: format!("{:016x}", header.title_id.get()),
        version: header.version.get(),
        content_type,
        meta_type: Some(header.meta_type),
        required_system_version,
        contents,
        nacp: None,
    })
}

#[derive(Default)]
struct XmlContent {
    kind: String,
    id: String,
    size: String,
    key_generation: String,
}

fn parse_title_id(value: &str) -> Result<u64> {
    let digits = value.trim().trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(digits, 16).map_err(|e| malformed(format!("title id {value:?}: {e}")))
}

/// Decodes a `.cnmt.xml` sidecar.
pub fn decode_xml(bytes: &[u8]) -> Result<ContentMetaAttributes> {
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut fields: BTreeMap<String, String> = BTreeMap::new();
    let mut current: Option<XmlContent> = None;
    let mut xml_contents = Vec::new();
    let mut seen_root = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if path.is_empty() {
                    if name != "ContentMeta" {
                        return Err(malformed(format!("unexpected root element {name}")));
                    }
                    seen_root = true;
                } else if path.len() == 1 && name == "Content" {
                    current = Some(XmlContent::default());
                }
                path.push(name);
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|e| malformed(format!("XML text: {e}")))?;
                let text = text.trim();
                match (path.len(), path.last(), current.as_mut()) {
                    _ if text.is_empty() => {}
                    (2, Some(name), _) => {
                        fields.insert(name.clone(), text.to_string());
                    }
                    (3, Some(name), Some(content)) => match name.as_str() {
                        "Type" => content.kind = text.to_string(),
                        "Id" => content.id = text.to_string(),
                        "Size" => content.size = text.to_string(),
                        "KeyGeneration" => content.key_generation = text.to_string(),
                        _ => {}
                    },
                    _ => {}
                }
            }
            Ok(Event::End(_)) => {
                if path.len() == 2 && path.last().map(String::as_str) == Some("Content") {
                    if let Some(content) = current.take() {
                        xml_contents.push(content);
                    }
                }
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(malformed(format!("XML: {e}"))),
            _ => {}
        }
        buf.clear();
    }
    if !seen_root {
        return Err(malformed("no ContentMeta element"));
    }

    let id = fields.get("Id").ok_or_else(|| malformed("missing Id"))?;
    let title_id = parse_title_id(id)?;
    let version = match fields.get("Version") {
        Some(v) => v.parse().map_err(|e| malformed(format!("version {v:?}: {e}")))?,
        None => 0,
    };
    let content_type = match fields.get("Type") {
        Some(name) => Some(
            ContentMetaType::from_xml_name(name)
                .unwrap_or_else(|| ContentMetaType::from_title_id(title_id)),
        ),
        None => Some(ContentMetaType::from_title_id(title_id)),
    };
    let required_system_version =
        fields.get("RequiredSystemVersion").and_then(|v| v.parse().ok());

    let mut contents = BTreeMap::new();
    for content in xml_contents {
        let Some(role) = ContentRole::from_name(&content.kind) else {
            debug!("Skipping content with unknown type {:?}", content.kind);
            continue;
        };
        contents.insert(role, Content {
            id: content.id.to_ascii_lowercase(),
            size: content.size.parse().ok(),
            key_generation: content.key_generation.parse().ok(),
        });
    }

    Ok(ContentMetaAttributes {
        title_id: format!("{title_id:016x}"),
        version,
        content_type,
        meta_type: None,
        required_system_version,
        contents,
        nacp: None,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::{
        error::ErrorKind,
        pfs0::{process_pfs0, tests::build_partition, PartitionKind},
    };

    /// Builds a binary `.cnmt` with the given content rows.
    pub(crate) fn build_cnmt(
        title_id: u64,
        version: u32,
        meta_type: u8,
        contents: &[([u8; 0x10], u8)],
    ) -> Vec<u8> {
        let header = ContentMetaHeader {
            title_id: U64::new(title_id),
            version: U32::new(version),
            meta_type,
            _reserved1: 0,
            extended_header_size: U16::new(0x10),
            content_count: U16::new(contents.len() as u16),
            content_meta_count: U16::ZERO,
            attributes: 0,
            storage_id: 0,
            install_type: 0,
            committed: 0,
            required_download_system_version: U32::ZERO,
            _reserved2: [0; 4],
        };
        let mut out = header.as_bytes().to_vec();
        let mut extended = [0u8; 0x10];
        extended[..8].copy_from_slice(&(title_id ^ 0x800).to_le_bytes());
        extended[8..12].copy_from_slice(&0x1234u32.to_le_bytes());
        out.extend_from_slice(&extended);
        for (id, role) in contents {
            let info = PackagedContentInfo {
                hash: [0xAB; 0x20],
                content_id: *id,
                size: [0x00, 0x10, 0, 0, 0, 0],
                content_type: *role,
                id_offset: 0,
            };
            out.extend_from_slice(info.as_bytes());
        }
        // Digest
        out.extend_from_slice(&[0u8; 0x20]);
        out
    }

    fn decode(cnmt: &[u8]) -> Result<ContentMetaAttributes> {
        let image =
            build_partition(PartitionKind::Pfs0, &[("Application_0100000000010000.cnmt", cnmt)]);
        let partition = process_pfs0(&mut Cursor::new(&image), 0).unwrap();
        MetaRecord::Binary { partition: &partition, data: &image }.decode()
    }

    #[test]
    fn decodes_binary_record() {
        let control = [0x11u8; 0x10];
        let program = [0x22u8; 0x10];
        let rows = [(program, 1), (control, 3), ([0; 0x10], 9)];
        let cnmt = build_cnmt(0x0100000000010000, 65536, 0x80, &rows);
        let meta = decode(&cnmt).unwrap();
        assert_eq!(meta.title_id, "0100000000010000");
        assert_eq!(meta.version, 65536);
        assert_eq!(meta.content_type, Some(ContentMetaType::Base));
        assert_eq!(meta.meta_type, Some(0x80));
        assert_eq!(meta.required_system_version, Some(0x1234));
        assert_eq!(meta.contents.len(), 2);
        let control = meta.content(ContentRole::Control).unwrap();
        assert_eq!(control.id, "11111111111111111111111111111111");
        assert_eq!(control.size, Some(0x1000));
        assert_eq!(meta.content(ContentRole::Program).unwrap().id, hex::encode(program));
        assert!(meta.nacp.is_none());
    }

    #[test]
    fn classifies_meta_types() {
        assert_eq!(ContentMetaType::from_u8(0x80), Some(ContentMetaType::Base));
        assert_eq!(ContentMetaType::from_u8(0x81), Some(ContentMetaType::Update));
        assert_eq!(ContentMetaType::from_u8(0x82), Some(ContentMetaType::Dlc));
        for marker in [0u8, 1, 3, 5, 0x7F, 0x83, 0xFF] {
            assert_eq!(ContentMetaType::from_u8(marker), None, "marker {marker:#x}");
        }
        let meta = decode(&build_cnmt(0x0100000000011000, 1, 0x83, &[])).unwrap();
        assert_eq!(meta.content_type, None);
        assert_eq!(meta.required_system_version, None);

        assert_eq!(ContentMetaType::from_title_id(0x0100000000010000), ContentMetaType::Base);
        assert_eq!(ContentMetaType::from_title_id(0x0100000000010800), ContentMetaType::Update);
        assert_eq!(ContentMetaType::from_title_id(0x0100000000011001), ContentMetaType::Dlc);
        assert_eq!(ContentMetaType::Update.to_string(), "UPDATE");
    }

    #[test]
    fn rejects_malformed_binary_records() {
        // Content table runs past the record
        let mut cnmt = build_cnmt(0x0100000000010000, 0, 0x80, &[([1; 0x10], 3)]);
        cnmt[0x10..0x12].copy_from_slice(&5u16.to_le_bytes());
        assert_eq!(decode(&cnmt).unwrap_err().kind(), ErrorKind::MalformedRecord);

        assert_eq!(decode(&[0u8; 0x10]).unwrap_err().kind(), ErrorKind::MalformedRecord);

        let image = build_partition(PartitionKind::Pfs0, &[("a.cnmt", b"x"), ("b.cnmt", b"y")]);
        let partition = process_pfs0(&mut Cursor::new(&image), 0).unwrap();
        let err = decode_binary(&partition, &image).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedRecord);
    }

    const XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<ContentMeta>
  <Type>Patch</Type>
  <Id>0x0100000000010800</Id>
  <Version>131072</Version>
  <RequiredDownloadSystemVersion>0</RequiredDownloadSystemVersion>
  <Content>
    <Type>Control</Type>
    <Id>0123456789ABCDEF0123456789ABCDEF</Id>
    <Size>4096</Size>
    <Hash>00</Hash>
    <KeyGeneration>5</KeyGeneration>
  </Content>
  <Content>
    <Type>Program</Type>
    <Id>fedcba9876543210fedcba9876543210</Id>
    <Size>8192</Size>
  </Content>
  <Digest>00</Digest>
  <KeyGenerationMin>5</KeyGenerationMin>
  <RequiredSystemVersion>335544320</RequiredSystemVersion>
  <OriginalId>0x0100000000010000</OriginalId>
</ContentMeta>
"#;

    #[test]
    fn decodes_xml_record() {
        let meta = MetaRecord::Xml(XML.as_bytes()).decode().unwrap();
        assert_eq!(meta.title_id, "0100000000010800");
        assert_eq!(meta.version, 131072);
        assert_eq!(meta.content_type, Some(ContentMetaType::Update));
        assert_eq!(meta.required_system_version, Some(335544320));
        let control = meta.content(ContentRole::Control).unwrap();
        assert_eq!(control.id, "0123456789abcdef0123456789abcdef");
        assert_eq!(control.size, Some(4096));
        assert_eq!(control.key_generation, Some(5));
        assert_eq!(meta.content(ContentRole::Program).unwrap().key_generation, None);
    }

    #[test]
    fn xml_type_falls_back_to_title_id() {
        let xml = "<ContentMeta><Type>Unknown</Type><Id>0x0100000000011003</Id>\
                   <Version>7</Version></ContentMeta>";
        let meta = decode_xml(xml.as_bytes()).unwrap();
        assert_eq!(meta.content_type, Some(ContentMetaType::Dlc));
        assert_eq!(meta.version, 7);
        assert!(meta.contents.is_empty());
    }

    #[test]
    fn rejects_malformed_xml() {
        for xml in [
            "<Other><Id>0x01</Id></Other>",
            "<ContentMeta><Version>1</Version></ContentMeta>",
            "<ContentMeta><Id>zz</Id></ContentMeta>",
            "<ContentMeta><Id>0x01</Id><Version>abc</Version></ContentMeta>",
            "",
        ] {
            let err = decode_xml(xml.as_bytes()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedRecord, "{xml}");
        }
    }

    #[test]
    fn nacp_is_write_once() {
        let mut meta = decode(&build_cnmt(0x0100000000010000, 0, 0x80, &[])).unwrap();
        let first = Nacp { display_version: "1.0.0".into(), ..Nacp::default() };
        assert!(meta.attach_nacp(first.clone()));
        assert!(!meta.attach_nacp(Nacp { display_version: "2.0.0".into(), ..Nacp::default() }));
        assert_eq!(meta.nacp, Some(first));
    }
}
