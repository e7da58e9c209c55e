//! Password → key derivation for MS-OFFCRYPTO Standard and Agile encryption.
//!
//! Both schemes start from the same iterated hash:
//!
//! 1. `H = Hash(salt || UTF-16LE(password))`
//! 2. For `i in 0..spinCount`: `H = Hash(LE32(i) || H)`
//!
//! and then mix a per-purpose *block key* into `H`. Agile hashes `H || blockKey` and fits the
//! result to the key size by truncating or padding with `0x36`. Standard (CryptoAPI) hashes
//! `H || LE32(0)` and expands the result through the `0x36`/`0x5C` construction of
//! `CryptDeriveKey`.

use zeroize::Zeroizing;

use crate::algorithm::{HashAlgorithm, HashOutput, MAX_DIGEST_LEN};
use crate::error::{DecryptError, Result};
use crate::util::password_to_utf16le;

/// Standard encryption always uses 50,000 rounds; the count is not stored in the file.
pub const STANDARD_SPIN_COUNT: u32 = 50_000;

/// Standard encryption derives every key from block number 0.
pub const STANDARD_BLOCK_KEY: [u8; 4] = 0u32.to_le_bytes();

/// Agile block key for the `encryptedVerifierHashInput` key.
pub const VERIFIER_HASH_INPUT_BLOCK_KEY: [u8; 8] = [0xFE, 0xA7, 0xD2, 0x76, 0x3B, 0x4B, 0x9E, 0x79];
/// Agile block key for the `encryptedVerifierHashValue` key.
pub const VERIFIER_HASH_VALUE_BLOCK_KEY: [u8; 8] = [0xD7, 0xAA, 0x0F, 0x6D, 0x30, 0x61, 0x34, 0x4E];
/// Agile block key for the `encryptedKeyValue` key.
pub const KEY_VALUE_BLOCK_KEY: [u8; 8] = [0x14, 0x6E, 0x0B, 0xE7, 0xAB, 0xAC, 0xD0, 0xD6];
/// Agile block key for the `dataIntegrity` HMAC key IV.
pub const HMAC_KEY_BLOCK_KEY: [u8; 8] = [0x5F, 0xB2, 0xAD, 0x01, 0x0C, 0xB9, 0xE1, 0xF6];
/// Agile block key for the `dataIntegrity` HMAC value IV.
pub const HMAC_VALUE_BLOCK_KEY: [u8; 8] = [0xA0, 0x67, 0x7F, 0x02, 0xB2, 0x2C, 0x84, 0x33];

/// Padding byte used when a derived key or IV is shorter than required.
pub const KEY_PAD_BYTE: u8 = 0x36;

const CRYPTOAPI_IPAD: u8 = 0x36;
const CRYPTOAPI_OPAD: u8 = 0x5C;
const CRYPTOAPI_PAD_LEN: usize = 64;

/// Compute the iterated password hash.
///
/// The loop reuses one fixed-size round buffer, so the only heap allocation is the UTF-16
/// password encoding made before the loop.
pub fn iterated_hash(
    password: &str,
    salt: &[u8],
    hash_alg: HashAlgorithm,
    spin_count: u32,
) -> HashOutput {
    let password_utf16 = Zeroizing::new(password_to_utf16le(password));
    let mut h = hash_alg.digest_parts(&[salt, password_utf16.as_slice()]);

    let digest_len = hash_alg.digest_len();
    let mut round = Zeroizing::new([0u8; 4 + MAX_DIGEST_LEN]);
    for i in 0..spin_count {
        round[..4].copy_from_slice(&i.to_le_bytes());
        round[4..4 + digest_len].copy_from_slice(&h);
        h = hash_alg.digest(&round[..4 + digest_len]);
    }
    h
}

/// `Hash(h || block_key)`.
pub fn derive_block_key(h: &[u8], block_key: &[u8], hash_alg: HashAlgorithm) -> HashOutput {
    hash_alg.digest_parts(&[h, block_key])
}

/// Truncate `hblock` to `key_len` bytes, or right-pad it with `0x36`.
pub fn fit_key_length(hblock: &[u8], key_len: usize) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(Vec::with_capacity(key_len));
    let take = hblock.len().min(key_len);
    out.extend_from_slice(&hblock[..take]);
    out.resize(key_len, KEY_PAD_BYTE);
    out
}

/// Agile key for one purpose: `fit_key_length(Hash(h || block_key), key_len)`.
pub fn derive_agile_key(
    h: &[u8],
    block_key: &[u8],
    hash_alg: HashAlgorithm,
    key_len: usize,
) -> Zeroizing<Vec<u8>> {
    fit_key_length(&derive_block_key(h, block_key, hash_alg), key_len)
}

/// Agile IV: `Hash(salt || block_key)` fitted to `block_size` with `0x36` padding.
pub fn derive_iv(
    salt: &[u8],
    block_key: &[u8],
    hash_alg: HashAlgorithm,
    block_size: usize,
) -> Vec<u8> {
    let digest = hash_alg.digest_parts(&[salt, block_key]);
    let take = digest.len().min(block_size);
    let mut iv = digest[..take].to_vec();
    iv.resize(block_size, KEY_PAD_BYTE);
    iv
}

/// IV of `EncryptedPackage` segment `segment_index` (Agile).
pub fn segment_iv(
    salt: &[u8],
    segment_index: u32,
    hash_alg: HashAlgorithm,
    block_size: usize,
) -> Vec<u8> {
    derive_iv(salt, &segment_index.to_le_bytes(), hash_alg, block_size)
}

/// Standard (CryptoAPI) key expansion from the iterated SHA-1 hash `h`.
///
/// `Hfinal = SHA1(h || LE32(0))`, `X1 = SHA1((0x36 * 64) ^ Hfinal)`,
/// `X2 = SHA1((0x5C * 64) ^ Hfinal)`; the key is the first `key_len` bytes of `X1 || X2`.
pub fn standard_derive_key(h: &[u8], key_len: usize) -> Result<Zeroizing<Vec<u8>>> {
    let sha1 = HashAlgorithm::Sha1;
    let available = 2 * sha1.digest_len();
    if key_len == 0 || key_len > available {
        return Err(DecryptError::UnsupportedScheme(format!(
            "key length {key_len} bytes exceeds the {available}-byte CryptoAPI derivation output"
        )));
    }

    let h_final = derive_block_key(h, &STANDARD_BLOCK_KEY, sha1);

    let mut ipad = Zeroizing::new([CRYPTOAPI_IPAD; CRYPTOAPI_PAD_LEN]);
    let mut opad = Zeroizing::new([CRYPTOAPI_OPAD; CRYPTOAPI_PAD_LEN]);
    for (i, b) in h_final.iter().enumerate() {
        ipad[i] ^= b;
        opad[i] ^= b;
    }
    let x1 = sha1.digest(&ipad[..]);
    let x2 = sha1.digest(&opad[..]);

    let mut out = Zeroizing::new(Vec::with_capacity(available));
    out.extend_from_slice(&x1);
    out.extend_from_slice(&x2);
    out.truncate(key_len);
    Ok(out)
}
