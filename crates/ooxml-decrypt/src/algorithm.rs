//! Cipher, chaining and hash algorithm identifiers.
//!
//! Standard encryption names algorithms by CryptoAPI `ALG_ID`; Agile encryption names them by
//! string in the XML descriptor. Both are resolved through the static tables below. A table entry
//! of `None` marks an identifier that MS-OFFCRYPTO allows but this crate does not implement.

use core::fmt;
use core::ops::Deref;

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use zeroize::Zeroize;

use crate::error::{DecryptError, Result};

/// AES block size in bytes.
pub const AES_BLOCK_SIZE: usize = 16;

/// Largest digest produced by a supported hash (SHA-512).
pub const MAX_DIGEST_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherAlgorithm {
    Aes128,
    Aes192,
    Aes256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

/// Block chaining mode of the cipher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainingMode {
    /// Used by Standard encryption for the verifier and, as Office writes it, the payload.
    Ecb,
    /// Used by Agile encryption (`ChainingModeCBC`) and by segmented Standard payloads.
    Cbc,
}

// CryptoAPI ALG_ID values (wincrypt.h).
pub(crate) const CALG_RC4: u32 = 0x0000_6801;
pub(crate) const CALG_AES_128: u32 = 0x0000_660E;
pub(crate) const CALG_AES_192: u32 = 0x0000_660F;
pub(crate) const CALG_AES_256: u32 = 0x0000_6610;
pub(crate) const CALG_SHA1: u32 = 0x0000_8004;

const CRYPTOAPI_CIPHERS: &[(u32, &str, Option<CipherAlgorithm>)] = &[
    (CALG_RC4, "RC4", None),
    (0x0000_6601, "DES", None),
    (0x0000_6603, "3DES", None),
    (0x0000_6609, "3DES_112", None),
    (CALG_AES_128, "AES-128", Some(CipherAlgorithm::Aes128)),
    (CALG_AES_192, "AES-192", Some(CipherAlgorithm::Aes192)),
    (CALG_AES_256, "AES-256", Some(CipherAlgorithm::Aes256)),
];

const CRYPTOAPI_HASHES: &[(u32, &str, Option<HashAlgorithm>)] = &[
    (0x0000_8001, "MD2", None),
    (0x0000_8002, "MD4", None),
    (0x0000_8003, "MD5", None),
    (CALG_SHA1, "SHA-1", Some(HashAlgorithm::Sha1)),
    (0x0000_800C, "SHA-256", Some(HashAlgorithm::Sha256)),
    (0x0000_800D, "SHA-384", Some(HashAlgorithm::Sha384)),
    (0x0000_800E, "SHA-512", Some(HashAlgorithm::Sha512)),
];

/// Agile `cipherAlgorithm` names. `AES` is resolved to a key size separately via `keyBits`.
const XML_CIPHERS: &[(&str, bool)] = &[
    ("AES", true),
    ("RC2", false),
    ("RC4", false),
    ("DES", false),
    ("DESX", false),
    ("3DES", false),
    ("3DES112", false),
];

/// Agile `hashAlgorithm` names, compared after upper-casing and dropping `-`/`_`.
const XML_HASHES: &[(&str, Option<HashAlgorithm>)] = &[
    ("SHA1", Some(HashAlgorithm::Sha1)),
    ("SHA256", Some(HashAlgorithm::Sha256)),
    ("SHA384", Some(HashAlgorithm::Sha384)),
    ("SHA512", Some(HashAlgorithm::Sha512)),
    ("MD2", None),
    ("MD4", None),
    ("MD5", None),
    ("RIPEMD128", None),
    ("RIPEMD160", None),
    ("WHIRLPOOL", None),
];

impl CipherAlgorithm {
    /// Resolve a CryptoAPI `ALG_ID`.
    pub fn from_cryptoapi_id(alg_id: u32) -> Result<Self> {
        match CRYPTOAPI_CIPHERS.iter().find(|(id, _, _)| *id == alg_id) {
            Some((_, _, Some(alg))) => Ok(*alg),
            Some((_, name, None)) => Err(DecryptError::UnsupportedScheme(format!(
                "cipher {name} (AlgID {alg_id:#010x})"
            ))),
            None => Err(DecryptError::Format(format!(
                "unknown cipher AlgID {alg_id:#010x}"
            ))),
        }
    }

    /// Resolve an Agile `cipherAlgorithm` name together with its `keyBits`.
    pub fn from_xml_name(name: &str, key_bits: u32) -> Result<Self> {
        let normalized = name.trim().to_ascii_uppercase().replace('_', "");
        match XML_CIPHERS.iter().find(|(n, _)| *n == normalized) {
            Some((_, true)) => Self::aes_for_key_bits(key_bits),
            Some((n, false)) => Err(DecryptError::UnsupportedScheme(format!("cipher {n}"))),
            None => Err(DecryptError::Format(format!(
                "unknown cipherAlgorithm {name:?}"
            ))),
        }
    }

    pub fn aes_for_key_bits(key_bits: u32) -> Result<Self> {
        match key_bits {
            128 => Ok(CipherAlgorithm::Aes128),
            192 => Ok(CipherAlgorithm::Aes192),
            256 => Ok(CipherAlgorithm::Aes256),
            other => Err(DecryptError::UnsupportedScheme(format!(
                "key size {other} bits is not valid for AES"
            ))),
        }
    }

    pub fn key_bits(self) -> u32 {
        match self {
            CipherAlgorithm::Aes128 => 128,
            CipherAlgorithm::Aes192 => 192,
            CipherAlgorithm::Aes256 => 256,
        }
    }

    pub fn key_len(self) -> usize {
        self.key_bits() as usize / 8
    }

    pub fn block_size(self) -> usize {
        AES_BLOCK_SIZE
    }

    pub fn cryptoapi_id(self) -> u32 {
        match self {
            CipherAlgorithm::Aes128 => CALG_AES_128,
            CipherAlgorithm::Aes192 => CALG_AES_192,
            CipherAlgorithm::Aes256 => CALG_AES_256,
        }
    }
}

impl fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AES-{}", self.key_bits())
    }
}

impl HashAlgorithm {
    /// Resolve a CryptoAPI hash `ALG_ID`.
    pub fn from_cryptoapi_id(alg_id: u32) -> Result<Self> {
        match CRYPTOAPI_HASHES.iter().find(|(id, _, _)| *id == alg_id) {
            Some((_, _, Some(alg))) => Ok(*alg),
            Some((_, name, None)) => Err(DecryptError::UnsupportedScheme(format!(
                "hash {name} (AlgID {alg_id:#010x})"
            ))),
            None => Err(DecryptError::Format(format!(
                "unknown hash AlgID {alg_id:#010x}"
            ))),
        }
    }

    /// Resolve an Agile `hashAlgorithm` name (case-insensitive, `SHA-256` and `SHA256` alike).
    pub fn from_xml_name(name: &str) -> Result<Self> {
        let normalized = name.trim().to_ascii_uppercase().replace(['-', '_'], "");
        match XML_HASHES.iter().find(|(n, _)| *n == normalized) {
            Some((_, Some(alg))) => Ok(*alg),
            Some((n, None)) => Err(DecryptError::UnsupportedScheme(format!("hash {n}"))),
            None => Err(DecryptError::Format(format!("unknown hashAlgorithm {name:?}"))),
        }
    }

    pub fn xml_name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "SHA1",
            HashAlgorithm::Sha256 => "SHA256",
            HashAlgorithm::Sha384 => "SHA384",
            HashAlgorithm::Sha512 => "SHA512",
        }
    }

    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    /// Hash the concatenation of `parts` without building the concatenated buffer.
    pub fn digest_parts(self, parts: &[&[u8]]) -> HashOutput {
        fn run<D: Digest>(parts: &[&[u8]]) -> HashOutput {
            let mut hasher = D::new();
            for part in parts {
                hasher.update(part);
            }
            HashOutput::from_slice(&hasher.finalize())
        }

        match self {
            HashAlgorithm::Sha1 => run::<Sha1>(parts),
            HashAlgorithm::Sha256 => run::<Sha256>(parts),
            HashAlgorithm::Sha384 => run::<Sha384>(parts),
            HashAlgorithm::Sha512 => run::<Sha512>(parts),
        }
    }

    pub fn digest(self, data: &[u8]) -> HashOutput {
        self.digest_parts(&[data])
    }

    /// HMAC over `data` keyed with `key`.
    pub fn hmac(self, key: &[u8], data: &[u8]) -> Result<HashOutput> {
        fn run<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> Result<HashOutput> {
            let mut mac = <M as KeyInit>::new_from_slice(key).map_err(|_| {
                DecryptError::Format(format!("invalid {}-byte HMAC key", key.len()))
            })?;
            mac.update(data);
            Ok(HashOutput::from_slice(&mac.finalize().into_bytes()))
        }

        match self {
            HashAlgorithm::Sha1 => run::<Hmac<Sha1>>(key, data),
            HashAlgorithm::Sha256 => run::<Hmac<Sha256>>(key, data),
            HashAlgorithm::Sha384 => run::<Hmac<Sha384>>(key, data),
            HashAlgorithm::Sha512 => run::<Hmac<Sha512>>(key, data),
        }
    }
}

impl ChainingMode {
    /// Resolve an Agile `cipherChaining` value.
    pub fn from_xml_name(name: &str) -> Result<Self> {
        match name.trim() {
            "ChainingModeCBC" => Ok(ChainingMode::Cbc),
            "ChainingModeCFB" => Err(DecryptError::UnsupportedScheme(
                "cipher chaining ChainingModeCFB".to_string(),
            )),
            other => Err(DecryptError::Format(format!(
                "unknown cipherChaining {other:?}"
            ))),
        }
    }

    pub fn xml_name(self) -> &'static str {
        match self {
            ChainingMode::Ecb => "ChainingModeECB",
            ChainingMode::Cbc => "ChainingModeCBC",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HashAlgorithm::Sha1 => "SHA-1",
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Sha384 => "SHA-384",
            HashAlgorithm::Sha512 => "SHA-512",
        })
    }
}

/// A digest held in a fixed stack buffer, wiped on drop.
#[derive(Clone)]
pub struct HashOutput {
    bytes: [u8; MAX_DIGEST_LEN],
    len: usize,
}

impl HashOutput {
    fn from_slice(digest: &[u8]) -> Self {
        let mut bytes = [0u8; MAX_DIGEST_LEN];
        bytes[..digest.len()].copy_from_slice(digest);
        Self {
            bytes,
            len: digest.len(),
        }
    }
}

impl Deref for HashOutput {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

impl AsRef<[u8]> for HashOutput {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl fmt::Debug for HashOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashOutput").field("len", &self.len).finish()
    }
}

impl Drop for HashOutput {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cryptoapi_tables_split_supported_unsupported_and_unknown() {
        assert_eq!(
            CipherAlgorithm::from_cryptoapi_id(0x660E).unwrap(),
            CipherAlgorithm::Aes128
        );
        assert_eq!(
            CipherAlgorithm::from_cryptoapi_id(0x6610).unwrap(),
            CipherAlgorithm::Aes256
        );
        assert!(matches!(
            CipherAlgorithm::from_cryptoapi_id(CALG_RC4),
            Err(DecryptError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            CipherAlgorithm::from_cryptoapi_id(0x1234),
            Err(DecryptError::Format(_))
        ));

        assert_eq!(
            HashAlgorithm::from_cryptoapi_id(CALG_SHA1).unwrap(),
            HashAlgorithm::Sha1
        );
        assert!(matches!(
            HashAlgorithm::from_cryptoapi_id(0x8003),
            Err(DecryptError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn xml_names_are_normalized() {
        assert_eq!(
            HashAlgorithm::from_xml_name("sha-256").unwrap(),
            HashAlgorithm::Sha256
        );
        assert_eq!(
            HashAlgorithm::from_xml_name(" SHA512 ").unwrap(),
            HashAlgorithm::Sha512
        );
        assert!(matches!(
            HashAlgorithm::from_xml_name("MD5"),
            Err(DecryptError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            HashAlgorithm::from_xml_name("SHA3"),
            Err(DecryptError::Format(_))
        ));

        assert_eq!(
            CipherAlgorithm::from_xml_name("AES", 192).unwrap(),
            CipherAlgorithm::Aes192
        );
        assert!(matches!(
            CipherAlgorithm::from_xml_name("3DES_112", 112),
            Err(DecryptError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            CipherAlgorithm::from_xml_name("AES", 100),
            Err(DecryptError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            CipherAlgorithm::from_xml_name("Twofish", 128),
            Err(DecryptError::Format(_))
        ));

        assert_eq!(
            ChainingMode::from_xml_name("ChainingModeCBC").unwrap(),
            ChainingMode::Cbc
        );
        assert!(matches!(
            ChainingMode::from_xml_name("ChainingModeCFB"),
            Err(DecryptError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            ChainingMode::from_xml_name("ChainingModeXYZ"),
            Err(DecryptError::Format(_))
        ));
    }

    #[test]
    fn digest_parts_matches_contiguous_digest() {
        for alg in [
            HashAlgorithm::Sha1,
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha384,
            HashAlgorithm::Sha512,
        ] {
            let split = alg.digest_parts(&[&b"hello "[..], &b"world"[..]]);
            let whole = alg.digest(b"hello world");
            assert_eq!(&split[..], &whole[..]);
            assert_eq!(split.len(), alg.digest_len());
        }
    }

    #[test]
    fn sha1_known_answer() {
        assert_eq!(
            hex::encode(HashAlgorithm::Sha1.digest(b"abc")),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn hmac_sha256_known_answer() {
        // RFC 4231 test case 2.
        let mac = HashAlgorithm::Sha256
            .hmac(b"Jefe", b"what do ya want for nothing?")
            .unwrap();
        assert_eq!(
            hex::encode(&mac),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn hmac_accepts_empty_and_oversized_keys() {
        // RFC 4231 test case 6: a 131-byte key, longer than the SHA-256 block.
        let mac = HashAlgorithm::Sha256
            .hmac(
                &[0xaa; 131],
                b"Test Using Larger Than Block-Size Key - Hash Key First",
            )
            .unwrap();
        assert_eq!(
            hex::encode(&mac),
            "60e431591ee0b67f0d8a26aacbf5b77f8e0bc6213728c5140546040f0ee37f54"
        );

        for alg in [HashAlgorithm::Sha1, HashAlgorithm::Sha384, HashAlgorithm::Sha512] {
            let mac = alg.hmac(&[], b"data").unwrap();
            assert_eq!(mac.len(), alg.digest_len());
            assert!(mac.iter().any(|b| *b != 0), "{alg}");
        }
    }
}
