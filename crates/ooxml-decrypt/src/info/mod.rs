//! `EncryptionInfo` stream parsing.
//!
//! The stream starts with an 8-byte version header (`vMajor`, `vMinor`, `flags`). The version
//! selects the layout of the rest:
//!
//! - `2.2`, `3.2`, `4.2`: Standard encryption, a binary header and verifier ([`standard`]).
//! - `4.4`: Agile encryption, an XML descriptor ([`agile`]).
//! - `3.3`, `4.3`: Extensible encryption, recognized but not supported.

pub mod agile;
pub mod standard;

use log::debug;

use crate::algorithm::{CipherAlgorithm, HashAlgorithm};
use crate::error::{DecryptError, Result};
use crate::util::ByteReader;

pub use agile::{AgileDataIntegrity, AgileEncryptedKey, AgileEncryptionInfo, AgileKeyData};
pub use standard::{StandardEncryptionHeader, StandardEncryptionInfo, StandardEncryptionVerifier};

/// Size of the `EncryptedPackage` stream prefix holding the plaintext length.
pub const ENCRYPTED_PACKAGE_HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionScheme {
    Standard,
    Agile,
}

/// `EncryptionVersionInfo` from the start of the `EncryptionInfo` stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionVersion {
    pub major: u16,
    pub minor: u16,
    pub flags: u32,
}

/// Parsed and validated encryption parameters of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptionDescriptor {
    Standard(StandardEncryptionInfo),
    Agile(AgileEncryptionInfo),
}

impl EncryptionDescriptor {
    pub fn scheme(&self) -> EncryptionScheme {
        match self {
            EncryptionDescriptor::Standard(_) => EncryptionScheme::Standard,
            EncryptionDescriptor::Agile(_) => EncryptionScheme::Agile,
        }
    }

    pub fn version(&self) -> EncryptionVersion {
        match self {
            EncryptionDescriptor::Standard(info) => info.version,
            EncryptionDescriptor::Agile(info) => info.version,
        }
    }

    /// Cipher protecting the package payload.
    pub fn cipher_algorithm(&self) -> CipherAlgorithm {
        match self {
            EncryptionDescriptor::Standard(info) => info.header.algorithm,
            EncryptionDescriptor::Agile(info) => info.key_data.cipher_algorithm,
        }
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        match self {
            EncryptionDescriptor::Standard(info) => info.header.hash_algorithm,
            EncryptionDescriptor::Agile(info) => info.key_data.hash_algorithm,
        }
    }

    pub fn key_size_bits(&self) -> u32 {
        match self {
            EncryptionDescriptor::Standard(info) => info.header.key_size_bits,
            EncryptionDescriptor::Agile(info) => info.key_data.key_bits,
        }
    }

    pub fn block_size(&self) -> usize {
        match self {
            EncryptionDescriptor::Standard(info) => info.header.algorithm.block_size(),
            EncryptionDescriptor::Agile(info) => info.key_data.block_size,
        }
    }

    /// Cryptographic service provider name. Only Standard encryption records one.
    pub fn csp_name(&self) -> Option<&str> {
        match self {
            EncryptionDescriptor::Standard(info) => Some(info.header.csp_name.as_str()),
            EncryptionDescriptor::Agile(_) => None,
        }
    }

    pub fn as_standard(&self) -> Option<&StandardEncryptionInfo> {
        match self {
            EncryptionDescriptor::Standard(info) => Some(info),
            EncryptionDescriptor::Agile(_) => None,
        }
    }

    pub fn as_agile(&self) -> Option<&AgileEncryptionInfo> {
        match self {
            EncryptionDescriptor::Agile(info) => Some(info),
            EncryptionDescriptor::Standard(_) => None,
        }
    }
}

/// Parse an `EncryptionInfo` stream.
pub fn parse(bytes: &[u8]) -> Result<EncryptionDescriptor> {
    let mut r = ByteReader::new(bytes);
    let version = EncryptionVersion {
        major: r.read_u16_le("EncryptionVersionInfo.vMajor")?,
        minor: r.read_u16_le("EncryptionVersionInfo.vMinor")?,
        flags: r.read_u32_le("EncryptionVersionInfo.flags")?,
    };

    let descriptor = match (version.major, version.minor) {
        (4, 4) => EncryptionDescriptor::Agile(agile::parse(version, r.remaining())?),
        (2..=4, 2) => EncryptionDescriptor::Standard(standard::parse(version, r.remaining())?),
        (3 | 4, 3) => {
            return Err(DecryptError::UnsupportedScheme(format!(
                "extensible encryption (version {}.{})",
                version.major, version.minor
            )))
        }
        (2..=4, minor) => {
            return Err(DecryptError::UnsupportedScheme(format!(
                "EncryptionInfo version {}.{minor}",
                version.major
            )))
        }
        (major, minor) => {
            return Err(DecryptError::Format(format!(
                "EncryptionInfo version {major}.{minor} is not an OOXML encryption version"
            )))
        }
    };

    debug!(
        "parsed {:?} EncryptionInfo v{}.{}: {}, {}, {}-bit key",
        descriptor.scheme(),
        version.major,
        version.minor,
        descriptor.cipher_algorithm(),
        descriptor.hash_algorithm(),
        descriptor.key_size_bits()
    );
    Ok(descriptor)
}

/// Read the little-endian plaintext size that prefixes the `EncryptedPackage` stream.
pub fn parse_encrypted_package_header(bytes: &[u8]) -> Result<u64> {
    ByteReader::new(bytes).read_u64_le("EncryptedPackage.StreamSize")
}
