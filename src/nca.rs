use std::{
    fmt::{Display, Formatter},
    io::{Read, Seek},
};

use log::{debug, trace};
use sha2::{Digest, Sha256};
use zerocopy::{
    little_endian::{U16, U32, U64},
    FromBytes, Immutable, IntoBytes, KnownLayout,
};

use crate::{
    aes::{aes_ctr_decrypt, aes_ecb_decrypt, aes_xts_decrypt, SECTOR_SIZE},
    error::{Error, Result},
    hash::{HierarchicalSha256Data, HASH_DATA_SIZE},
    ivfc::IntegrityMetaInfo,
    keys::KeyRing,
    read::{add_offset, read_bytes_at},
    static_assert,
};

pub const NCA2_MAGIC: [u8; 4] = *b"NCA2";
pub const NCA3_MAGIC: [u8; 4] = *b"NCA3";

/// Main header, followed by four FS headers.
pub const NCA_MAIN_HEADER_SIZE: usize = 0x400;
pub const NCA_HEADER_SIZE: usize = 0xC00;
pub const NCA_SECTION_COUNT: usize = 4;

/// NCA section entry.
#[derive(Copy, Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, align(4))]
pub struct NcaFsEntry {
    pub media_start_offset: U32,
    pub media_end_offset: U32,
    pub _reserved: [u8; 0x8],
}

static_assert!(size_of::<NcaFsEntry>() == 0x10);

/// NCA FS header.
#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, align(8))]
pub struct NcaFsHeader {
    pub version: U16,
    pub fs_type: u8,
    pub hash_type: u8,
    pub encryption_type: u8,
    pub metadata_hash_type: u8,
    pub _reserved1: [u8; 0x2],
    pub hash_data: [u8; HASH_DATA_SIZE],
    pub patch_info: [u8; 0x40],
    pub generation: U32,
    pub secure_value: U32,
    pub sparse_info: [u8; 0x30],
    pub compression_info: [u8; 0x28],
    pub metadata_hash_data_info: [u8; 0x30],
    pub _reserved2: [u8; 0x30],
}

static_assert!(size_of::<NcaFsHeader>() == 0x200);

impl NcaFsHeader {
    #[inline]
    pub fn fs_type(&self) -> NcaFsType { NcaFsType::from_u8(self.fs_type) }

    #[inline]
    pub fn encryption_type(&self) -> NcaEncryptionType {
        NcaEncryptionType::from_u8(self.encryption_type)
    }

    #[inline]
    pub fn hash_type(&self) -> NcaHashType { NcaHashType::from_u8(self.hash_type) }

    /// Location of the file system inside the section, from the hash data.
    pub fn hash_info(&self) -> Result<HashInfo> {
        match self.hash_type() {
            NcaHashType::HierarchicalSha256 => {
                let hash_data = HierarchicalSha256Data::read_from_bytes(&self.hash_data)
                    .map_err(|_| Error::UnsupportedHashType(self.hash_type))?;
                let region = hash_data.data_region();
                Ok(HashInfo { offset: region.offset.get(), size: region.size.get() })
            }
            NcaHashType::HierarchicalIntegrity => {
                let hash_data = IntegrityMetaInfo::read_from_bytes(&self.hash_data)
                    .map_err(|_| Error::UnsupportedHashType(self.hash_type))?;
                let level = hash_data.data_level();
                Ok(HashInfo {
                    offset: level.logical_offset.get(),
                    size: level.hash_data_size.get(),
                })
            }
            _ => Err(Error::UnsupportedHashType(self.hash_type)),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NcaFsType {
    RomFs = 0,
    PartitionFs = 1,
    Unknown = u8::MAX,
}

impl NcaFsType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => NcaFsType::RomFs,
            1 => NcaFsType::PartitionFs,
            _ => NcaFsType::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NcaFsType::RomFs => "RomFS",
            NcaFsType::PartitionFs => "PFS0",
            NcaFsType::Unknown => "Unknown",
        }
    }
}

impl Display for NcaFsType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NcaEncryptionType {
    Auto = 0,
    None = 1,
    AesXts = 2,
    AesCtr = 3,
    AesCtrEx = 4,
    AesCtrSkipLayerHash = 5,
    AesCtrExSkipLayerHash = 6,
    Unknown = u8::MAX,
}

impl NcaEncryptionType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => NcaEncryptionType::Auto,
            1 => NcaEncryptionType::None,
            2 => NcaEncryptionType::AesXts,
            3 => NcaEncryptionType::AesCtr,
            4 => NcaEncryptionType::AesCtrEx,
            5 => NcaEncryptionType::AesCtrSkipLayerHash,
            6 => NcaEncryptionType::AesCtrExSkipLayerHash,
            _ => NcaEncryptionType::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NcaEncryptionType::Auto => "Auto",
            NcaEncryptionType::None => "None",
            NcaEncryptionType::AesXts => "XTS",
            NcaEncryptionType::AesCtr => "CTR",
            NcaEncryptionType::AesCtrEx => "BKTR",
            NcaEncryptionType::AesCtrSkipLayerHash => "CTR (Skip Layer Hash)",
            NcaEncryptionType::AesCtrExSkipLayerHash => "BKTR (Skip Layer Hash)",
            NcaEncryptionType::Unknown => "Unknown",
        }
    }
}

impl Display for NcaEncryptionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NcaHashType {
    Auto = 0,
    None = 1,
    HierarchicalSha256 = 2,
    HierarchicalIntegrity = 3,
    AutoSha3 = 4,
    HierarchicalSha3256 = 5,
    HierarchicalIntegritySha3 = 6,
    Unknown = u8::MAX,
}

impl NcaHashType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => NcaHashType::Auto,
            1 => NcaHashType::None,
            2 => NcaHashType::HierarchicalSha256,
            3 => NcaHashType::HierarchicalIntegrity,
            4 => NcaHashType::AutoSha3,
            5 => NcaHashType::HierarchicalSha3256,
            6 => NcaHashType::HierarchicalIntegritySha3,
            _ => NcaHashType::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NcaHashType::Auto => "Auto",
            NcaHashType::None => "None",
            NcaHashType::HierarchicalSha256 => "Hierarchical SHA-256",
            NcaHashType::HierarchicalIntegrity => "Hierarchical Integrity",
            NcaHashType::AutoSha3 => "Auto SHA-3",
            NcaHashType::HierarchicalSha3256 => "Hierarchical SHA3-256",
            NcaHashType::HierarchicalIntegritySha3 => "Hierarchical Integrity SHA-3",
            NcaHashType::Unknown => "Unknown",
        }
    }
}

impl Display for NcaHashType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NcaContentType {
    Program = 0,
    Meta = 1,
    Control = 2,
    Manual = 3,
    Data = 4,
    PublicData = 5,
    Unknown = u8::MAX,
}

impl NcaContentType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => NcaContentType::Program,
            1 => NcaContentType::Meta,
            2 => NcaContentType::Control,
            3 => NcaContentType::Manual,
            4 => NcaContentType::Data,
            5 => NcaContentType::PublicData,
            _ => NcaContentType::Unknown,
        }
    }
}

/// NCA header.
#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, align(8))]
pub struct NcaHeader {
    pub fixed_key_sig: [u8; 0x100],
    pub npdm_key_sig: [u8; 0x100],
    pub magic: [u8; 4],
    pub distribution_type: u8,
    pub content_type: u8,
    pub key_generation_old: u8,
    pub key_area_encryption_key_index: u8,
    pub content_size: U64,
    pub program_id: U64,
    pub content_index: U32,
    pub sdk_addon_version: U32,
    pub key_generation: u8,
    pub signature_key_generation: u8,
    pub _reserved1: [u8; 0xE],
    pub rights_id: [u8; 0x10],
    pub fs_entries: [NcaFsEntry; 4],
    pub fs_header_hashes: [[u8; 0x20]; 4],
    pub encrypted_keys: [[u8; 0x10]; 4],
    pub _reserved2: [u8; 0xC0],
}

static_assert!(size_of::<NcaHeader>() == NCA_MAIN_HEADER_SIZE);

/// Header format, from the magic.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NcaFormat {
    /// FS headers are each encrypted as sector 0.
    Nca2,
    /// The whole 0xC00 header is encrypted with consecutive sectors.
    Nca3,
}

/// Key revision from the two key generation fields.
///
/// Generations 0 and 1 both map to revision 0.
#[inline]
pub fn key_revision(key_generation_old: u8, key_generation: u8) -> u8 {
    key_generation_old.max(key_generation).saturating_sub(1)
}

/// Location of the embedded file system inside a section.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HashInfo {
    pub offset: u64,
    pub size: u64,
}

/// One non-empty section described by an NCA header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NcaSection {
    pub index: usize,
    /// Byte offset of the section from the start of the NCA.
    pub start: u64,
    pub end: u64,
    pub fs_type: NcaFsType,
    pub hash_type: NcaHashType,
    pub encryption_type: NcaEncryptionType,
    pub raw_encryption_type: u8,
    pub generation: u32,
    pub secure_value: u32,
    pub hash_info: HashInfo,
}

impl NcaSection {
    #[inline]
    pub fn size(&self) -> u64 { self.end.saturating_sub(self.start) }
}

/// A decrypted and magic-checked NCA header.
#[derive(Clone, Debug, PartialEq)]
pub struct DecryptedHeader {
    pub format: NcaFormat,
    pub header: NcaHeader,
    pub fs_headers: [NcaFsHeader; NCA_SECTION_COUNT],
}

/// Decrypts the NCA header with the ring's `header_key`.
pub fn decrypt_header(keys: &KeyRing, raw: &[u8]) -> Result<DecryptedHeader> {
    let header_key = keys.header_key()?;
    decrypt_header_with_key(&header_key, raw)
}

/// Decrypts the NCA header. `raw` must hold at least the first 0xC00 bytes of the NCA.
pub fn decrypt_header_with_key(header_key: &[u8; 0x20], raw: &[u8]) -> Result<DecryptedHeader> {
    if raw.len() < NCA_MAIN_HEADER_SIZE {
        return Err(Error::TruncatedInput { expected: NCA_MAIN_HEADER_SIZE, actual: raw.len() });
    }
    let mut decrypted = raw[..NCA_MAIN_HEADER_SIZE].to_vec();
    aes_xts_decrypt(header_key, &mut decrypted, 0);
    let magic: [u8; 4] = [decrypted[0x200], decrypted[0x201], decrypted[0x202], decrypted[0x203]];

    let format = match magic {
        NCA3_MAGIC => NcaFormat::Nca3,
        NCA2_MAGIC => NcaFormat::Nca2,
        magic => return Err(Error::BadMagic(format!("{magic:02x?}"))),
    };
    if raw.len() < NCA_HEADER_SIZE {
        return Err(Error::TruncatedInput { expected: NCA_HEADER_SIZE, actual: raw.len() });
    }
    match format {
        NcaFormat::Nca3 => {
            decrypted = raw[..NCA_HEADER_SIZE].to_vec();
            aes_xts_decrypt(header_key, &mut decrypted, 0);
        }
        NcaFormat::Nca2 => {
            decrypted.extend_from_slice(&raw[NCA_MAIN_HEADER_SIZE..NCA_HEADER_SIZE]);
            for fs_header in decrypted[NCA_MAIN_HEADER_SIZE..].chunks_exact_mut(SECTOR_SIZE) {
                aes_xts_decrypt(header_key, fs_header, 0);
            }
        }
    }

    let header = NcaHeader::read_from_bytes(&decrypted[..NCA_MAIN_HEADER_SIZE]).map_err(|_| {
        Error::TruncatedInput { expected: NCA_MAIN_HEADER_SIZE, actual: decrypted.len() }
    })?;
    let fs_headers =
        <[NcaFsHeader; NCA_SECTION_COUNT]>::read_from_bytes(&decrypted[NCA_MAIN_HEADER_SIZE..])
            .map_err(|_| Error::TruncatedInput {
                expected: NCA_HEADER_SIZE,
                actual: decrypted.len(),
            })?;
    let header = DecryptedHeader { format, header, fs_headers };
    trace!(
        "NCA {:?}: title {}, content type {:?}, distribution {}, key revision {}, \
         size {:#X}, SDK add-on {:#X}",
        header.format,
        header.title_id_hex(),
        header.content_type(),
        header.distribution_type(),
        header.key_revision(),
        header.content_size(),
        header.sdk_addon_version()
    );
    Ok(header)
}

impl DecryptedHeader {
    #[inline]
    pub fn content_type(&self) -> NcaContentType {
        NcaContentType::from_u8(self.header.content_type)
    }

    #[inline]
    pub fn distribution_type(&self) -> u8 { self.header.distribution_type }

    /// Key area encryption key index (0 = application, 1 = ocean, 2 = system).
    #[inline]
    pub fn crypto_type(&self) -> u8 { self.header.key_area_encryption_key_index }

    #[inline]
    pub fn key_revision(&self) -> u8 {
        key_revision(self.header.key_generation_old, self.header.key_generation)
    }

    #[inline]
    pub fn rights_id(&self) -> &[u8; 0x10] { &self.header.rights_id }

    #[inline]
    pub fn has_rights_id(&self) -> bool { self.header.rights_id.iter().any(|&b| b != 0) }

    #[inline]
    pub fn encrypted_keys(&self) -> &[[u8; 0x10]; 4] { &self.header.encrypted_keys }

    #[inline]
    pub fn title_id(&self) -> u64 { self.header.program_id.get() }

    /// Title id as 16 lowercase hex digits.
    #[inline]
    pub fn title_id_hex(&self) -> String { format!("{:016x}", self.title_id()) }

    #[inline]
    pub fn content_size(&self) -> u64 { self.header.content_size.get() }

    #[inline]
    pub fn sdk_addon_version(&self) -> u32 { self.header.sdk_addon_version.get() }

    /// Parses and verifies every non-empty section.
    pub fn sections(&self) -> Result<Vec<NcaSection>> {
        let mut sections = Vec::with_capacity(NCA_SECTION_COUNT);
        for index in 0..NCA_SECTION_COUNT {
            if let Some(section) = self.parse_section(index)? {
                sections.push(section);
            }
        }
        Ok(sections)
    }

    /// Parses one section, failing if the slot is empty.
    pub fn section(&self, index: usize) -> Result<NcaSection> {
        if index >= NCA_SECTION_COUNT {
            return Err(Error::MalformedRecord(format!("section index {index} out of range")));
        }
        self.parse_section(index)?
            .ok_or_else(|| Error::MalformedRecord(format!("section {index} is empty")))
    }

    fn parse_section(&self, index: usize) -> Result<Option<NcaSection>> {
        let expected_hash = &self.header.fs_header_hashes[index];
        let entry = &self.header.fs_entries[index];
        if expected_hash.iter().all(|&b| b == 0) && entry.media_end_offset.get() == 0 {
            // Empty section
            return Ok(None);
        }
        let fs_header = &self.fs_headers[index];
        let digest: [u8; 0x20] = Sha256::digest(fs_header.as_bytes()).into();
        if digest != *expected_hash {
            return Err(Error::HashMismatch { index });
        }
        let hash_info = fs_header.hash_info()?;
        let start = entry.media_start_offset.get() as u64 * SECTOR_SIZE as u64;
        let end = entry.media_end_offset.get() as u64 * SECTOR_SIZE as u64;
        if end < start {
            return Err(Error::MalformedRecord(format!(
                "section {index} ends before it starts: {start:#X}..{end:#X}"
            )));
        }
        Ok(Some(NcaSection {
            index,
            start,
            end,
            fs_type: fs_header.fs_type(),
            hash_type: fs_header.hash_type(),
            encryption_type: fs_header.encryption_type(),
            raw_encryption_type: fs_header.encryption_type,
            generation: fs_header.generation.get(),
            secure_value: fs_header.secure_value.get(),
            hash_info,
        }))
    }

    /// Rejects anything but the standard application key area scheme.
    pub fn check_standard_crypto(&self, section: &NcaSection) -> Result<()> {
        if self.has_rights_id() {
            return Err(Error::UnsupportedCrypto(format!(
                "rights id {} requires a title key",
                hex::encode(self.rights_id())
            )));
        }
        if self.crypto_type() != 0 {
            return Err(Error::UnsupportedCrypto(format!("crypto type {}", self.crypto_type())));
        }
        if section.encryption_type != NcaEncryptionType::AesCtr {
            return Err(Error::UnsupportedCrypto(format!(
                "encryption type {} ({})",
                section.raw_encryption_type, section.encryption_type
            )));
        }
        Ok(())
    }
}

/// Decrypts a section in place. `data` holds the section from its first byte.
pub fn decrypt_section(
    keys: &KeyRing,
    header: &DecryptedHeader,
    section: &NcaSection,
    data: &mut [u8],
) -> Result<()> {
    header.check_standard_crypto(section)?;
    let key_area_key = keys.key_area_key_application(header.key_revision())?;
    let mut key = header.encrypted_keys()[2];
    aes_ecb_decrypt(&key_area_key, &mut key);

    // Upper half: secure value then generation
    let upper = ((section.secure_value as u64) << 32) | section.generation as u64;
    let mut counter = [0u8; 0x10];
    counter[..8].copy_from_slice(&upper.to_be_bytes());
    counter[8..].copy_from_slice(&(section.start >> 4).to_be_bytes());
    aes_ctr_decrypt(&key, &counter, data);
    Ok(())
}

/// The decrypted file system of an NCA's first section.
#[derive(Clone, Debug)]
pub struct SectionData {
    pub header: DecryptedHeader,
    pub section: NcaSection,
    /// Section contents from the file system start given by the hash info.
    pub data: Vec<u8>,
}

/// Reads, decrypts and verifies the NCA at `nca_offset`, then decrypts its first section.
pub fn open_data_section<R>(keys: &KeyRing, reader: &mut R, nca_offset: u64) -> Result<SectionData>
where R: Read + Seek + ?Sized {
    let raw = read_bytes_at(reader, nca_offset, NCA_HEADER_SIZE as u64, "NCA header")?;
    let header = decrypt_header(keys, &raw)?;
    let section = header.section(0)?;
    header.check_standard_crypto(&section)?;
    debug!(
        "NCA at {nca_offset:#X}: section 0 {} {:#X}..{:#X}, {}",
        section.fs_type, section.start, section.end, section.hash_type
    );

    let section_offset = add_offset(nca_offset, section.start, "NCA section")?;
    let mut data = read_bytes_at(reader, section_offset, section.size(), "NCA section")?;
    decrypt_section(keys, &header, &section, &mut data)?;

    let offset = section.hash_info.offset as usize;
    if offset > data.len() {
        return Err(Error::TruncatedContainer(format!(
            "file system offset {offset:#X} outside section of {:#X} bytes",
            data.len()
        )));
    }
    data.drain(..offset);
    data.truncate(section.hash_info.size.min(data.len() as u64) as usize);
    Ok(SectionData { header, section, data })
}
