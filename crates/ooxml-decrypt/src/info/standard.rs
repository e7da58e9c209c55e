//! Standard (CryptoAPI) `EncryptionInfo`: MS-OFFCRYPTO §2.3.4.5.
//!
//! Layout after the version header, all little-endian:
//!
//! ```text
//! u32 headerSize
//! EncryptionHeader (headerSize bytes):
//!     u32 flags, u32 sizeExtra, u32 algID, u32 algIDHash, u32 keySize,
//!     u32 providerType, u32 reserved1, u32 reserved2, UTF-16LE CSPName (NUL-terminated)
//! EncryptionVerifier:
//!     u32 saltSize (16), salt[16], encryptedVerifier[16], u32 verifierHashSize (20),
//!     encryptedVerifierHash[32]
//! ```

use log::warn;

use crate::algorithm::{
    CipherAlgorithm, HashAlgorithm, AES_BLOCK_SIZE, CALG_RC4, CALG_SHA1,
};
use crate::error::{DecryptError, Result};
use crate::util::{decode_utf16le_nul_terminated, ByteReader};

use super::EncryptionVersion;

/// `fCryptoAPI`: the document is encrypted with a CryptoAPI cipher.
pub const F_CRYPTOAPI: u32 = 0x04;
/// `fExternal`: an external provider handles encryption.
pub const F_EXTERNAL: u32 = 0x10;
/// `fAES`: the cipher is AES.
pub const F_AES: u32 = 0x20;

const FIXED_HEADER_LEN: usize = 8 * 4;
const SALT_LEN: usize = 16;
const SHA1_DIGEST_LEN: u32 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardEncryptionHeader {
    pub flags: u32,
    pub size_extra: u32,
    /// Cipher resolved from `alg_id` (and the flags when `alg_id` is 0).
    pub algorithm: CipherAlgorithm,
    pub hash_algorithm: HashAlgorithm,
    pub alg_id: u32,
    pub alg_id_hash: u32,
    /// Key size in bits; a stored 0 is replaced by the cipher's default.
    pub key_size_bits: u32,
    pub provider_type: u32,
    pub csp_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardEncryptionVerifier {
    pub salt: [u8; 16],
    pub encrypted_verifier: [u8; 16],
    pub verifier_hash_size: u32,
    /// Encrypted SHA-1 of the verifier, padded to the AES block size.
    pub encrypted_verifier_hash: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardEncryptionInfo {
    pub version: EncryptionVersion,
    pub header: StandardEncryptionHeader,
    pub verifier: StandardEncryptionVerifier,
}

struct RawHeader {
    flags: u32,
    size_extra: u32,
    alg_id: u32,
    alg_id_hash: u32,
    key_size: u32,
    provider_type: u32,
    csp_name: String,
}

/// Parse the Standard encryption body (everything after the 8-byte version header).
///
/// Every field is read before any algorithm is validated, so a truncated stream is always
/// reported as a format error.
pub(crate) fn parse(version: EncryptionVersion, bytes: &[u8]) -> Result<StandardEncryptionInfo> {
    let mut r = ByteReader::new(bytes);

    let header_size = r.read_u32_le("EncryptionInfo.headerSize")? as usize;
    if header_size < FIXED_HEADER_LEN {
        return Err(DecryptError::Format(format!(
            "EncryptionHeader size {header_size} is smaller than its fixed fields"
        )));
    }
    let raw = parse_header(r.take(header_size, "EncryptionHeader")?)?;

    let salt_size = r.read_u32_le("EncryptionVerifier.saltSize")?;
    if salt_size as usize != SALT_LEN {
        return Err(DecryptError::Format(format!(
            "EncryptionVerifier.saltSize is {salt_size}, expected {SALT_LEN}"
        )));
    }
    let salt = r.take_array::<16>("EncryptionVerifier.salt")?;
    let encrypted_verifier = r.take_array::<16>("EncryptionVerifier.encryptedVerifier")?;
    let verifier_hash_size = r.read_u32_le("EncryptionVerifier.verifierHashSize")?;
    if verifier_hash_size != SHA1_DIGEST_LEN {
        return Err(DecryptError::Format(format!(
            "EncryptionVerifier.verifierHashSize is {verifier_hash_size}, expected {SHA1_DIGEST_LEN}"
        )));
    }
    // RC4 stores the hash unpadded; block ciphers pad it to a whole block.
    let is_stream_cipher = raw.alg_id == CALG_RC4
        || (raw.alg_id == 0 && (version.flags | raw.flags) & F_AES == 0);
    let stored_hash_len = if is_stream_cipher {
        verifier_hash_size as usize
    } else {
        (verifier_hash_size as usize).div_ceil(AES_BLOCK_SIZE) * AES_BLOCK_SIZE
    };
    let encrypted_verifier_hash = r
        .take(stored_hash_len, "EncryptionVerifier.encryptedVerifierHash")?
        .to_vec();

    let header = validate_header(version, raw)?;
    Ok(StandardEncryptionInfo {
        version,
        header,
        verifier: StandardEncryptionVerifier {
            salt,
            encrypted_verifier,
            verifier_hash_size,
            encrypted_verifier_hash,
        },
    })
}

fn parse_header(bytes: &[u8]) -> Result<RawHeader> {
    let mut hr = ByteReader::new(bytes);
    let flags = hr.read_u32_le("EncryptionHeader.flags")?;
    let size_extra = hr.read_u32_le("EncryptionHeader.sizeExtra")?;
    let alg_id = hr.read_u32_le("EncryptionHeader.algID")?;
    let alg_id_hash = hr.read_u32_le("EncryptionHeader.algIDHash")?;
    let key_size = hr.read_u32_le("EncryptionHeader.keySize")?;
    let provider_type = hr.read_u32_le("EncryptionHeader.providerType")?;
    let _reserved1 = hr.read_u32_le("EncryptionHeader.reserved1")?;
    let _reserved2 = hr.read_u32_le("EncryptionHeader.reserved2")?;

    let csp_bytes = hr.remaining();
    let csp_name = if csp_bytes.is_empty() {
        String::new()
    } else {
        let (name, terminated) = decode_utf16le_nul_terminated(csp_bytes)?;
        if !terminated {
            warn!("EncryptionHeader.CSPName is missing its NUL terminator");
        }
        name
    };

    Ok(RawHeader {
        flags,
        size_extra,
        alg_id,
        alg_id_hash,
        key_size,
        provider_type,
        csp_name,
    })
}

fn validate_header(version: EncryptionVersion, raw: RawHeader) -> Result<StandardEncryptionHeader> {
    let flags = version.flags | raw.flags;
    if flags & F_EXTERNAL != 0 {
        return Err(DecryptError::UnsupportedScheme(
            "externally encrypted document (fExternal)".to_string(),
        ));
    }
    if flags & F_CRYPTOAPI == 0 {
        return Err(DecryptError::UnsupportedScheme(
            "Standard encryption without fCryptoAPI".to_string(),
        ));
    }

    let algorithm = match raw.alg_id {
        0 if flags & F_AES != 0 => CipherAlgorithm::Aes128,
        0 => CipherAlgorithm::from_cryptoapi_id(CALG_RC4)?,
        id => CipherAlgorithm::from_cryptoapi_id(id)?,
    };
    if flags & F_AES == 0 {
        warn!("EncryptionHeader names {algorithm} but fAES is not set");
    }

    let hash_algorithm = match raw.alg_id_hash {
        0 | CALG_SHA1 => HashAlgorithm::Sha1,
        id => {
            let other = HashAlgorithm::from_cryptoapi_id(id)?;
            return Err(DecryptError::UnsupportedScheme(format!(
                "Standard encryption with {other}"
            )));
        }
    };

    let key_size_bits = match raw.key_size {
        0 => algorithm.key_bits(),
        bits if bits == algorithm.key_bits() => bits,
        bits => {
            return Err(DecryptError::UnsupportedScheme(format!(
                "key size {bits} bits with {algorithm}"
            )))
        }
    };

    Ok(StandardEncryptionHeader {
        flags: raw.flags,
        size_extra: raw.size_extra,
        algorithm,
        hash_algorithm,
        alg_id: raw.alg_id,
        alg_id_hash: raw.alg_id_hash,
        key_size_bits,
        provider_type: raw.provider_type,
        csp_name: raw.csp_name,
    })
}
