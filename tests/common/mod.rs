//! Synthetic encrypted packages for the integration tests.
#![allow(dead_code)]

use aes::{
    cipher::{BlockEncryptMut, KeyInit, KeyIvInit, StreamCipher},
    Aes128,
};
use nscatalog::{keys::key_area_key_application_name, KeyRing, Language};
use sha2::{Digest, Sha256};

pub const HEADER_KEY: [u8; 0x20] = [0x11; 0x20];
pub const KEY_AREA_KEY: [u8; 0x10] = [0x33; 0x10];
pub const CONTENT_KEY: [u8; 0x10] = [0x44; 0x10];
/// Key generation written to every NCA; selects key area key revision 4.
pub const KEY_GENERATION: u8 = 5;

pub const TITLE_ID: u64 = 0x0100000000010000;
pub const META_ID: [u8; 0x10] = [0xA0; 0x10];
pub const CONTROL_ID: [u8; 0x10] = [0xC0; 0x10];
pub const PROGRAM_ID: [u8; 0x10] = [0xB0; 0x10];

const SECTION_START: usize = 0xC00;
const FS_OFFSET: usize = 0x200;

const FS_TYPE_ROMFS: u8 = 0;
const FS_TYPE_PARTITION: u8 = 1;
const NCA_CONTENT_META: u8 = 1;
const NCA_CONTENT_CONTROL: u8 = 2;

pub const ROLE_PROGRAM: u8 = 1;
pub const ROLE_CONTROL: u8 = 3;

pub fn keys() -> KeyRing {
    let mut keys = KeyRing::new();
    keys.insert("header_key", hex::encode(HEADER_KEY));
    keys.insert(key_area_key_application_name(KEY_GENERATION - 1), hex::encode(KEY_AREA_KEY));
    keys
}

pub fn content_name(id: &[u8; 0x10]) -> String { hex::encode(id) }

/// Builds a PFS0 (`row_size` 0x18) or HFS0 (`row_size` 0x40) partition.
pub fn build_partition(magic: &[u8; 4], files: &[(&str, &[u8])]) -> Vec<u8> {
    let row_size = if magic == b"HFS0" { 0x40 } else { 0x18 };
    let mut strings = Vec::new();
    let mut rows = Vec::new();
    let mut data = Vec::new();
    for (name, contents) in files {
        let mut row = vec![0u8; row_size];
        row[0..8].copy_from_slice(&(data.len() as u64).to_le_bytes());
        row[8..16].copy_from_slice(&(contents.len() as u64).to_le_bytes());
        row[16..20].copy_from_slice(&(strings.len() as u32).to_le_bytes());
        rows.extend_from_slice(&row);
        strings.extend_from_slice(name.as_bytes());
        strings.push(0);
        data.extend_from_slice(contents);
    }
    strings.resize(strings.len().next_multiple_of(0x10), 0);

    let mut out = Vec::new();
    out.extend_from_slice(magic);
    out.extend_from_slice(&(files.len() as u32).to_le_bytes());
    out.extend_from_slice(&(strings.len() as u32).to_le_bytes());
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(&rows);
    out.extend_from_slice(&strings);
    out.extend_from_slice(&data);
    out
}

/// Builds an NCA3 with one AES-CTR section holding `fs` at offset 0x200.
pub fn build_nca(title_id: u64, content_type: u8, fs_type: u8, fs: &[u8]) -> Vec<u8> {
    let mut section = vec![0u8; FS_OFFSET];
    section.extend_from_slice(fs);
    section.resize(section.len().next_multiple_of(0x200), 0);
    let end = SECTION_START + section.len();

    let mut header = vec![0u8; SECTION_START];
    header[0x200..0x204].copy_from_slice(b"NCA3");
    header[0x205] = content_type;
    header[0x208..0x210].copy_from_slice(&(end as u64).to_le_bytes());
    header[0x210..0x218].copy_from_slice(&title_id.to_le_bytes());
    header[0x220] = KEY_GENERATION;
    header[0x240..0x244].copy_from_slice(&((SECTION_START / 0x200) as u32).to_le_bytes());
    header[0x244..0x248].copy_from_slice(&((end / 0x200) as u32).to_le_bytes());

    let mut wrapped = CONTENT_KEY;
    ecb::Encryptor::<Aes128>::new((&KEY_AREA_KEY).into())
        .encrypt_block_mut((&mut wrapped).into());
    header[0x320..0x330].copy_from_slice(&wrapped);

    let fs_header = &mut header[0x400..0x600];
    fs_header[0] = 2;
    fs_header[2] = fs_type;
    fs_header[3] = 2; // HierarchicalSha256
    fs_header[4] = 3; // AesCtr
    fs_header[8 + 0x38..8 + 0x40].copy_from_slice(&(FS_OFFSET as u64).to_le_bytes());
    fs_header[8 + 0x40..8 + 0x48].copy_from_slice(&(fs.len() as u64).to_le_bytes());
    let digest = Sha256::digest(&header[0x400..0x600]);
    header[0x280..0x2A0].copy_from_slice(&digest);

    header_cipher().encrypt_area(&mut header, 0x200, 0, |i: u128| i.to_be_bytes());

    let mut counter = [0u8; 0x10];
    counter[8..].copy_from_slice(&((SECTION_START as u64) >> 4).to_be_bytes());
    ctr::Ctr128BE::<Aes128>::new((&CONTENT_KEY).into(), (&counter).into())
        .apply_keystream(&mut section);

    header.extend_from_slice(&section);
    header
}

fn header_cipher() -> xts_mode::Xts128<Aes128> {
    xts_mode::Xts128::new(
        Aes128::new_from_slice(&HEADER_KEY[..0x10]).unwrap(),
        Aes128::new_from_slice(&HEADER_KEY[0x10..]).unwrap(),
    )
}

/// Decrypts the header of `nca`, lets `edit` change it, then encrypts it again.
pub fn rewrite_header(nca: &mut [u8], edit: impl FnOnce(&mut [u8])) {
    let header = &mut nca[..SECTION_START];
    header_cipher().decrypt_area(header, 0x200, 0, |i: u128| i.to_be_bytes());
    edit(header);
    header_cipher().encrypt_area(header, 0x200, 0, |i: u128| i.to_be_bytes());
}

/// Builds a binary content meta record.
pub fn build_cnmt(
    title_id: u64,
    version: u32,
    meta_type: u8,
    contents: &[([u8; 0x10], u8)],
) -> Vec<u8> {
    let mut out = vec![0u8; 0x20];
    out[0..8].copy_from_slice(&title_id.to_le_bytes());
    out[8..12].copy_from_slice(&version.to_le_bytes());
    out[0xC] = meta_type;
    out[0xE..0x10].copy_from_slice(&0x10u16.to_le_bytes());
    out[0x10..0x12].copy_from_slice(&(contents.len() as u16).to_le_bytes());
    let mut extended = [0u8; 0x10];
    extended[..8].copy_from_slice(&(title_id | 0x800).to_le_bytes());
    out.extend_from_slice(&extended);
    for (id, role) in contents {
        let mut row = [0u8; 0x38];
        row[0x20..0x30].copy_from_slice(id);
        row[0x30..0x36].copy_from_slice(&[0x00, 0x10, 0, 0, 0, 0]);
        row[0x36] = *role;
        out.extend_from_slice(&row);
    }
    out.extend_from_slice(&[0u8; 0x20]);
    out
}

pub fn build_meta_nca(
    title_id: u64,
    version: u32,
    meta_type: u8,
    contents: &[([u8; 0x10], u8)],
) -> Vec<u8> {
    let cnmt = build_cnmt(title_id, version, meta_type, contents);
    let name = format!("Application_{title_id:016x}.cnmt");
    let fs = build_partition(b"PFS0", &[(&name, &cnmt)]);
    build_nca(title_id, NCA_CONTENT_META, FS_TYPE_PARTITION, &fs)
}

/// Builds a NACP with one title per `(language, name)` pair.
pub fn build_nacp(titles: &[(Language, &str)], display_version: &str) -> Vec<u8> {
    let mut nacp = vec![0u8; 0x4000];
    for (language, name) in titles {
        let base = *language as usize * 0x300;
        nacp[base..base + name.len()].copy_from_slice(name.as_bytes());
    }
    nacp[0x3060..0x3060 + display_version.len()].copy_from_slice(display_version.as_bytes());
    nacp
}

/// Builds a RomFS with files in its root directory.
pub fn build_romfs(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut table = Vec::new();
    let mut data = Vec::new();
    for (name, contents) in files {
        table.extend_from_slice(&0u32.to_le_bytes());
        table.extend_from_slice(&u32::MAX.to_le_bytes());
        table.extend_from_slice(&(data.len() as u64).to_le_bytes());
        table.extend_from_slice(&(contents.len() as u64).to_le_bytes());
        table.extend_from_slice(&u32::MAX.to_le_bytes());
        table.extend_from_slice(&(name.len() as u32).to_le_bytes());
        table.extend_from_slice(name.as_bytes());
        table.resize(table.len().next_multiple_of(4), 0);
        data.extend_from_slice(contents);
        data.resize(data.len().next_multiple_of(0x10), 0);
    }
    let table_offset = 0x200u64;
    let data_offset = (table_offset + table.len() as u64).next_multiple_of(0x200);
    let header = [
        0x50,
        0x50,
        0,
        0x50,
        0,
        table_offset,
        0,
        table_offset,
        table.len() as u64,
        data_offset,
    ];
    let mut out: Vec<u8> = header.iter().flat_map(|v| v.to_le_bytes()).collect();
    out.resize(table_offset as usize, 0);
    out.extend_from_slice(&table);
    out.resize(data_offset as usize, 0);
    out.extend_from_slice(&data);
    out
}

pub fn build_control_nca(title_id: u64, nacp: &[u8]) -> Vec<u8> {
    let romfs = build_romfs(&[("control.nacp", nacp)]);
    build_nca(title_id, NCA_CONTENT_CONTROL, FS_TYPE_ROMFS, &romfs)
}

/// The NCAs of a base title with a control NCA: `(name, bytes)` pairs.
pub fn base_title_files(control_nca: Vec<u8>) -> Vec<(String, Vec<u8>)> {
    let meta = build_meta_nca(TITLE_ID, 65536, 0x80, &[
        (PROGRAM_ID, ROLE_PROGRAM),
        (CONTROL_ID, ROLE_CONTROL),
    ]);
    vec![
        (format!("{}.cnmt.nca", content_name(&META_ID)), meta),
        (format!("{}.nca", content_name(&CONTROL_ID)), control_nca),
    ]
}

pub fn test_title_control() -> Vec<u8> {
    let nacp = build_nacp(&[(Language::AmericanEnglish, "Test Game")], "1.0.0");
    build_control_nca(TITLE_ID, &nacp)
}

pub fn build_nsp(files: &[(String, Vec<u8>)]) -> Vec<u8> {
    let files: Vec<(&str, &[u8])> = files.iter().map(|(n, d)| (n.as_str(), d.as_slice())).collect();
    build_partition(b"PFS0", &files)
}

/// Builds a cartridge image whose root partition holds `root` entries.
pub fn build_xci(root: &[(&str, &[u8])]) -> Vec<u8> {
    let mut image = vec![0u8; 0x200];
    image[0x100..0x104].copy_from_slice(b"HEAD");
    image[0x130..0x138].copy_from_slice(&0x200u64.to_le_bytes());
    image.extend_from_slice(&build_partition(b"HFS0", root));
    image
}
