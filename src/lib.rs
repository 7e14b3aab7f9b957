//! Metadata reader for NSP packages and XCI cartridge images.
//!
//! Decrypts NCA headers and meta sections to recover each title's id, version,
//! content type and display names.

pub mod aes;
pub mod catalog;
pub mod cnmt;
pub mod error;
pub mod file;
pub mod hash;
pub mod ivfc;
pub mod keys;
pub mod nacp;
pub mod nca;
pub mod nsp;
pub mod pfs0;
pub mod read;
pub mod romfs;
pub mod util;
pub mod xci;

pub use catalog::{read_file_metadata, ContainerFormat, MetadataMap};
pub use cnmt::{Content, ContentMetaAttributes, ContentMetaType, ContentRole, MetaRecord};
pub use error::{Error, ErrorKind, Result};
pub use keys::KeyRing;
pub use nacp::{Language, Nacp, NacpTitle};
