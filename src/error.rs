use std::{fmt, io};

use thiserror::Error;

/// Errors produced while decoding game containers.
#[derive(Debug, Error)]
pub enum Error {
    /// A required key is absent from the key ring.
    #[error("missing key: {0}")]
    MissingKey(String),

    /// A key is present but not valid hex of the expected length.
    #[error("invalid key {name}: {reason}")]
    InvalidKey { name: String, reason: String },

    /// A PFS0/HFS0 container with the wrong signature.
    #[error("invalid container magic: {0:?}")]
    InvalidContainer(String),

    /// A container ended before one of its fixed-size fields.
    #[error("truncated container: {0}")]
    TruncatedContainer(String),

    /// Neither NCA header window carried a known magic.
    #[error("bad NCA magic: {0:?}")]
    BadMagic(String),

    /// Fewer bytes were supplied than a decryption window requires.
    #[error("truncated input: expected {expected:#x} bytes, got {actual:#x}")]
    TruncatedInput { expected: usize, actual: usize },

    /// A section header does not match its declared SHA-256.
    #[error("section {index} header hash mismatch")]
    HashMismatch { index: usize },

    /// An encryption scheme other than the standard application key path.
    #[error("unsupported crypto: {0}")]
    UnsupportedCrypto(String),

    /// A hash type other than HierarchicalSha256 or HierarchicalIntegrity.
    #[error("unsupported hash type: {0}")]
    UnsupportedHashType(u8),

    /// The content meta record could not be walked.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// The NACP could not be located or read.
    #[error("control data unavailable: {0}")]
    ControlDataUnavailable(String),

    /// The cartridge root partition has no `secure` entry.
    #[error("cartridge image has no secure partition")]
    MissingSecurePartition,

    /// The file extension is not a known container format.
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Another error with a description of where it happened.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

/// The kind of an [`Error`], independent of any context it was wrapped in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MissingKey,
    InvalidKey,
    InvalidContainer,
    TruncatedContainer,
    BadMagic,
    TruncatedInput,
    HashMismatch,
    UnsupportedCrypto,
    UnsupportedHashType,
    MalformedRecord,
    ControlDataUnavailable,
    MissingSecurePartition,
    UnsupportedFormat,
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingKey(_) => ErrorKind::MissingKey,
            Error::InvalidKey { .. } => ErrorKind::InvalidKey,
            Error::InvalidContainer(_) => ErrorKind::InvalidContainer,
            Error::TruncatedContainer(_) => ErrorKind::TruncatedContainer,
            Error::BadMagic(_) => ErrorKind::BadMagic,
            Error::TruncatedInput { .. } => ErrorKind::TruncatedInput,
            Error::HashMismatch { .. } => ErrorKind::HashMismatch,
            Error::UnsupportedCrypto(_) => ErrorKind::UnsupportedCrypto,
            Error::UnsupportedHashType(_) => ErrorKind::UnsupportedHashType,
            Error::MalformedRecord(_) => ErrorKind::MalformedRecord,
            Error::ControlDataUnavailable(_) => ErrorKind::ControlDataUnavailable,
            Error::MissingSecurePartition => ErrorKind::MissingSecurePartition,
            Error::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Error::Io(_) => ErrorKind::Io,
            Error::Context { source, .. } => source.kind(),
        }
    }

    /// Maps a short read to [`Error::TruncatedContainer`], anything else to [`Error::Io`].
    pub(crate) fn truncated(err: io::Error, what: &str) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Error::TruncatedContainer(what.to_string())
        } else {
            Error::Io(err)
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Attaches context to errors while keeping their [`ErrorKind`].
pub trait Context<T> {
    fn context<C>(self, context: C) -> Result<T>
    where C: fmt::Display;

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: fmt::Display,
        F: FnOnce() -> C;
}

impl<T, E> Context<T> for std::result::Result<T, E>
where E: Into<Error>
{
    fn context<C>(self, context: C) -> Result<T>
    where C: fmt::Display {
        self.with_context(|| context)
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: fmt::Display,
        F: FnOnce() -> C,
    {
        self.map_err(|e| Error::Context { context: f().to_string(), source: Box::new(e.into()) })
    }
}
