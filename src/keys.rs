//! Key ring loaded from a `prod.keys`-style file.
//!
//! The file holds `name = hexvalue` lines. Blank lines and lines starting with
//! `;` or `#` are ignored. Values are kept as hex and decoded on lookup, so a
//! malformed key only fails the files that need it.

use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader, Read},
    path::{Path, PathBuf},
};

use log::debug;

use crate::error::{Context, Error, Result};

pub const KEYS_FILE_NAME: &str = "prod.keys";
pub const KEYS_DIR_NAME: &str = ".switch";
pub const HEADER_KEY_NAME: &str = "header_key";

/// Symbolic key name to hex-encoded key bytes.
#[derive(Clone, Debug, Default)]
pub struct KeyRing {
    keys: HashMap<String, String>,
}

impl KeyRing {
    pub fn new() -> Self { Self::default() }

    /// Parses a key file.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut keys = HashMap::new();
        for line in BufReader::new(reader).lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            let Some((name, value)) = line.split_once('=') else {
                continue;
            };
            keys.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
        Ok(Self { keys })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        Self::from_reader(file).with_context(|| format!("Failed to read {}", path.display()))
    }

    /// Loads the first readable key file out of `explicit`, `./prod.keys` and
    /// `~/.switch/prod.keys`.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut last_error = None;
        for path in candidate_paths(explicit) {
            match Self::from_file(&path) {
                Ok(keys) => {
                    debug!("Loaded {} keys from {}", keys.len(), path.display());
                    return Ok(keys);
                }
                Err(e) => {
                    debug!("{e}");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::MissingKey(KEYS_FILE_NAME.to_string())))
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.keys.insert(name.into().to_ascii_lowercase(), value.into());
    }

    pub fn len(&self) -> usize { self.keys.len() }

    pub fn is_empty(&self) -> bool { self.keys.is_empty() }

    pub fn contains(&self, name: &str) -> bool { self.keys.contains_key(name) }

    /// Hex string of a key.
    pub fn get(&self, name: &str) -> Result<&str> {
        self.keys.get(name).map(String::as_str).ok_or_else(|| Error::MissingKey(name.to_string()))
    }

    /// Decodes a key of exactly `N` bytes.
    pub fn key<const N: usize>(&self, name: &str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        hex::decode_to_slice(self.get(name)?, &mut out)
            .map_err(|e| Error::InvalidKey { name: name.to_string(), reason: e.to_string() })?;
        Ok(out)
    }

    /// AES-XTS key pair used for NCA headers.
    pub fn header_key(&self) -> Result<[u8; 0x20]> { self.key(HEADER_KEY_NAME) }

    /// Application key area key for a key revision.
    pub fn key_area_key_application(&self, revision: u8) -> Result<[u8; 0x10]> {
        self.key(&key_area_key_application_name(revision))
    }
}

pub fn key_area_key_application_name(revision: u8) -> String {
    format!("key_area_key_application_{revision:02x}")
}

fn candidate_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = Vec::with_capacity(3);
    if let Some(path) = explicit {
        paths.push(path.to_path_buf());
    }
    paths.push(PathBuf::from(KEYS_FILE_NAME));
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(KEYS_DIR_NAME).join(KEYS_FILE_NAME));
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const KEY_FILE: &str = "; comment\n\
        # another comment\n\
        HEADER_KEY = 000102030405060708090a0b0c0d0e0f000102030405060708090a0b0c0d0e0f\n\
        key_area_key_application_04=00112233445566778899aabbccddeeff\n\
        \n\
        broken_key = zz\n\
        not a key line\n";

    #[test]
    fn parses_key_file() {
        let keys = KeyRing::from_reader(KEY_FILE.as_bytes()).unwrap();
        assert_eq!(keys.len(), 3);
        let header_key = keys.header_key().unwrap();
        assert_eq!(header_key[0x11], 0x01);
        let kak = keys.key_area_key_application(4).unwrap();
        assert_eq!(kak[0xF], 0xFF);
    }

    #[test]
    fn missing_and_invalid_keys() {
        let keys = KeyRing::from_reader(KEY_FILE.as_bytes()).unwrap();
        assert_eq!(keys.key_area_key_application(0).unwrap_err().kind(), ErrorKind::MissingKey);
        assert_eq!(keys.key::<1>("broken_key").unwrap_err().kind(), ErrorKind::InvalidKey);
        // Wrong length
        assert_eq!(
            keys.key::<0x20>("key_area_key_application_04").unwrap_err().kind(),
            ErrorKind::InvalidKey
        );
    }

    #[test]
    fn key_names() {
        assert_eq!(key_area_key_application_name(0), "key_area_key_application_00");
        assert_eq!(key_area_key_application_name(0x10), "key_area_key_application_10");
    }

    #[test]
    fn explicit_path_first() {
        let path = std::env::temp_dir().join(format!("nscatalog-keys-{}", std::process::id()));
        std::fs::write(&path, KEY_FILE).unwrap();
        let keys = KeyRing::load(Some(&path)).unwrap();
        assert!(keys.contains(HEADER_KEY_NAME));
        std::fs::remove_file(&path).unwrap();
    }
}
