//! Display names and version text from a title's control data (`control.nacp`).

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
    io::{Read, Seek},
};

use log::debug;

use crate::{
    cnmt::{ContentMetaAttributes, ContentRole},
    error::{Error, Result},
    keys::KeyRing,
    nca::{open_data_section, NcaFsType},
    pfs0::Partition,
    read::{add_offset, fixed_str, slice_at},
    romfs::RomFs,
};

pub const NACP_FILE_NAME: &str = "control.nacp";

const TITLE_ENTRY_SIZE: usize = 0x300;
const TITLE_NAME_SIZE: usize = 0x200;
const TITLE_PUBLISHER_SIZE: usize = 0x100;
const ISBN_OFFSET: usize = 0x3000;
const ISBN_SIZE: usize = 0x25;
const SUPPORTED_LANGUAGE_OFFSET: usize = 0x302C;
const DISPLAY_VERSION_OFFSET: usize = 0x3060;
const DISPLAY_VERSION_SIZE: usize = 0x10;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Language {
    AmericanEnglish = 0,
    BritishEnglish = 1,
    Japanese = 2,
    French = 3,
    German = 4,
    LatinAmericanSpanish = 5,
    Spanish = 6,
    Italian = 7,
    Dutch = 8,
    CanadianFrench = 9,
    Portuguese = 10,
    Russian = 11,
    Korean = 12,
    TraditionalChinese = 13,
    SimplifiedChinese = 14,
    BrazilianPortuguese = 15,
}

impl Language {
    /// Languages in title table order.
    pub const ALL: [Language; 16] = [
        Language::AmericanEnglish,
        Language::BritishEnglish,
        Language::Japanese,
        Language::French,
        Language::German,
        Language::LatinAmericanSpanish,
        Language::Spanish,
        Language::Italian,
        Language::Dutch,
        Language::CanadianFrench,
        Language::Portuguese,
        Language::Russian,
        Language::Korean,
        Language::TraditionalChinese,
        Language::SimplifiedChinese,
        Language::BrazilianPortuguese,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Language::AmericanEnglish => "AmericanEnglish",
            Language::BritishEnglish => "BritishEnglish",
            Language::Japanese => "Japanese",
            Language::French => "French",
            Language::German => "German",
            Language::LatinAmericanSpanish => "LatinAmericanSpanish",
            Language::Spanish => "Spanish",
            Language::Italian => "Italian",
            Language::Dutch => "Dutch",
            Language::CanadianFrench => "CanadianFrench",
            Language::Portuguese => "Portuguese",
            Language::Russian => "Russian",
            Language::Korean => "Korean",
            Language::TraditionalChinese => "TraditionalChinese",
            Language::SimplifiedChinese => "SimplifiedChinese",
            Language::BrazilianPortuguese => "BrazilianPortuguese",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.as_str() == name)
    }
}

impl Display for Language {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NacpTitle {
    pub name: String,
    pub publisher: String,
}

/// Application control properties.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Nacp {
    /// Titles of the languages with a non-empty name.
    pub titles: BTreeMap<Language, NacpTitle>,
    pub isbn: String,
    pub display_version: String,
    pub supported_language_flag: u32,
}

impl Nacp {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let field = |offset: usize, len: usize| {
            slice_at(data, offset, len).ok_or_else(|| {
                Error::ControlDataUnavailable(format!(
                    "{NACP_FILE_NAME} too short for field at {offset:#X}"
                ))
            })
        };

        let mut titles = BTreeMap::new();
        for language in Language::ALL {
            let base = language as usize * TITLE_ENTRY_SIZE;
            let name = fixed_str(field(base, TITLE_NAME_SIZE)?);
            if name.is_empty() {
                continue;
            }
            let publisher = fixed_str(field(base + TITLE_NAME_SIZE, TITLE_PUBLISHER_SIZE)?);
            titles.insert(language, NacpTitle { name, publisher });
        }
        let isbn = fixed_str(field(ISBN_OFFSET, ISBN_SIZE)?);
        let flag = field(SUPPORTED_LANGUAGE_OFFSET, 4)?;
        let supported_language_flag = u32::from_be_bytes([flag[0], flag[1], flag[2], flag[3]]);
        let display_version = fixed_str(field(DISPLAY_VERSION_OFFSET, DISPLAY_VERSION_SIZE)?);
        Ok(Self { titles, isbn, display_version, supported_language_flag })
    }

    pub fn title(&self, language: Language) -> Option<&str> {
        self.titles.get(&language).map(|t| t.name.as_str())
    }

    /// American English name, or the first available one.
    pub fn preferred_title(&self) -> Option<&str> {
        self.title(Language::AmericanEnglish)
            .or_else(|| self.titles.values().next().map(|t| t.name.as_str()))
    }
}

/// Reads `control.nacp` from a decrypted control RomFS.
pub fn read_control_nacp(romfs_data: &[u8]) -> Result<Nacp> {
    let romfs = RomFs::new(romfs_data)?;
    let file = romfs
        .find_file(NACP_FILE_NAME)?
        .ok_or_else(|| Error::ControlDataUnavailable(format!("no {NACP_FILE_NAME} in RomFS")))?;
    Nacp::parse(romfs.file_data(&file)?)
}

/// Extracts the NACP of the control NCA that `meta` references.
///
/// `partition` is the container holding the NCAs, starting at `partition_offset`
/// in `reader`. Every failure is reported as [`Error::ControlDataUnavailable`].
pub fn extract_nacp<R>(
    keys: &KeyRing,
    meta: &ContentMetaAttributes,
    reader: &mut R,
    partition: &Partition,
    partition_offset: u64,
) -> Result<Nacp>
where
    R: Read + Seek + ?Sized,
{
    extract_nacp_inner(keys, meta, reader, partition, partition_offset).map_err(|e| match e {
        Error::ControlDataUnavailable(_) => e,
        e => Error::ControlDataUnavailable(e.to_string()),
    })
}

fn extract_nacp_inner<R>(
    keys: &KeyRing,
    meta: &ContentMetaAttributes,
    reader: &mut R,
    partition: &Partition,
    partition_offset: u64,
) -> Result<Nacp>
where
    R: Read + Seek + ?Sized,
{
    let control = meta.content(ContentRole::Control).ok_or_else(|| {
        Error::ControlDataUnavailable(format!("{} has no control content", meta.title_id))
    })?;
    let file = partition.find_containing(&control.id).ok_or_else(|| {
        Error::ControlDataUnavailable(format!("unable to find control NCA {}", control.id))
    })?;
    debug!("Reading {} from {}", NACP_FILE_NAME, file.name);
    let nca_offset = add_offset(partition_offset, file.offset, &file.name)?;
    let section = open_data_section(keys, reader, nca_offset)?;
    if section.section.fs_type != NcaFsType::RomFs {
        return Err(Error::ControlDataUnavailable(format!(
            "control NCA {} has a {} section",
            control.id, section.section.fs_type
        )));
    }
    read_control_nacp(&section.data)
}
