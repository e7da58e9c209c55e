//! Encryption of a plaintext package into `EncryptionInfo` + `EncryptedPackage` streams.
//!
//! This exists to produce round-trip fixtures for the decryptor. It writes the same layouts the
//! parser reads and makes no attempt to match Office byte for byte.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::algorithm::{
    ChainingMode, CipherAlgorithm, HashAlgorithm, AES_BLOCK_SIZE, CALG_SHA1,
};
use crate::cipher::{aes_cbc_encrypt_in_place, aes_ecb_encrypt_in_place};
use crate::container::{build_container, ENCRYPTED_PACKAGE_STREAM, ENCRYPTION_INFO_STREAM};
use crate::error::Result;
use crate::info::agile::PASSWORD_KEY_ENCRYPTOR_NS;
use crate::info::standard::{F_AES, F_CRYPTOAPI};
use crate::info::EncryptionScheme;
use crate::kdf::{
    derive_agile_key, derive_iv, iterated_hash, segment_iv, standard_derive_key,
    HMAC_KEY_BLOCK_KEY, HMAC_VALUE_BLOCK_KEY, KEY_VALUE_BLOCK_KEY, STANDARD_SPIN_COUNT,
    VERIFIER_HASH_INPUT_BLOCK_KEY, VERIFIER_HASH_VALUE_BLOCK_KEY,
};
use crate::reader::SEGMENT_SIZE;

const SALT_LEN: usize = 16;
const AGILE_VERSION_FLAGS: u32 = 0x40;
const PROV_RSA_AES: u32 = 0x18;
const STANDARD_CSP_NAME: &str = "Microsoft Enhanced RSA and AES Cryptographic Provider";

/// Parameters for [`encrypt_package`].
///
/// Standard encryption is always SHA-1 with 50,000 rounds, so `hash_algorithm` and
/// `spin_count` only apply to Agile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptOptions {
    pub scheme: EncryptionScheme,
    pub cipher: CipherAlgorithm,
    pub hash_algorithm: HashAlgorithm,
    pub spin_count: u32,
}

impl Default for EncryptOptions {
    fn default() -> Self {
        Self {
            scheme: EncryptionScheme::Agile,
            cipher: CipherAlgorithm::Aes256,
            hash_algorithm: HashAlgorithm::Sha512,
            spin_count: 100_000,
        }
    }
}

/// Encrypt `plaintext`, returning `(EncryptionInfo, EncryptedPackage)` stream bytes.
pub fn encrypt_package(
    plaintext: &[u8],
    password: &str,
    opts: &EncryptOptions,
) -> Result<(Vec<u8>, Vec<u8>)> {
    encrypt_package_with_rng(plaintext, password, opts, &mut rand::rng())
}

/// [`encrypt_package`] with an explicit random source, for reproducible output.
pub fn encrypt_package_with_rng<R: RngCore + CryptoRng + ?Sized>(
    plaintext: &[u8],
    password: &str,
    opts: &EncryptOptions,
    rng: &mut R,
) -> Result<(Vec<u8>, Vec<u8>)> {
    match opts.scheme {
        EncryptionScheme::Standard => encrypt_standard(plaintext, password, opts.cipher, rng),
        EncryptionScheme::Agile => encrypt_agile(plaintext, password, opts, rng),
    }
}

/// Encrypt `plaintext` and wrap both streams in a compound file.
pub fn encrypt_to_container(
    plaintext: &[u8],
    password: &str,
    opts: &EncryptOptions,
) -> Result<Vec<u8>> {
    let (info, package) = encrypt_package(plaintext, password, opts)?;
    build_container(&[
        (ENCRYPTION_INFO_STREAM, info.as_slice()),
        (ENCRYPTED_PACKAGE_STREAM, package.as_slice()),
    ])
}

fn random_bytes<R: RngCore + ?Sized>(rng: &mut R, len: usize) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(vec![0u8; len]);
    rng.fill_bytes(&mut out);
    out
}

/// Zero-pad to a whole number of AES blocks.
fn pad_to_block(bytes: &[u8]) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(bytes.to_vec());
    out.resize(bytes.len().div_ceil(AES_BLOCK_SIZE) * AES_BLOCK_SIZE, 0);
    out
}

fn package_prefix(plaintext: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + plaintext.len() + AES_BLOCK_SIZE);
    out.extend_from_slice(&(plaintext.len() as u64).to_le_bytes());
    out
}

fn encrypt_standard<R: RngCore + ?Sized>(
    plaintext: &[u8],
    password: &str,
    cipher: CipherAlgorithm,
    rng: &mut R,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut salt = [0u8; SALT_LEN];
    rng.fill_bytes(&mut salt);
    let verifier = random_bytes(rng, 16);

    let sha1 = HashAlgorithm::Sha1;
    let h = iterated_hash(password, &salt, sha1, STANDARD_SPIN_COUNT);
    let key = standard_derive_key(&h, cipher.key_len())?;

    let mut encrypted_verifier = verifier.to_vec();
    aes_ecb_encrypt_in_place(&key, &mut encrypted_verifier)?;
    let mut encrypted_verifier_hash = pad_to_block(&sha1.digest(&verifier));
    aes_ecb_encrypt_in_place(&key, &mut encrypted_verifier_hash)?;

    let flags = F_CRYPTOAPI | F_AES;
    let mut header = Vec::new();
    for field in [
        flags,
        0,
        cipher.cryptoapi_id(),
        CALG_SHA1,
        cipher.key_bits(),
        PROV_RSA_AES,
        0,
        0,
    ] {
        header.extend_from_slice(&field.to_le_bytes());
    }
    for unit in STANDARD_CSP_NAME.encode_utf16().chain(std::iter::once(0)) {
        header.extend_from_slice(&unit.to_le_bytes());
    }

    let mut info = Vec::new();
    info.extend_from_slice(&4u16.to_le_bytes());
    info.extend_from_slice(&2u16.to_le_bytes());
    info.extend_from_slice(&flags.to_le_bytes());
    info.extend_from_slice(&(header.len() as u32).to_le_bytes());
    info.extend_from_slice(&header);
    info.extend_from_slice(&(SALT_LEN as u32).to_le_bytes());
    info.extend_from_slice(&salt);
    info.extend_from_slice(&encrypted_verifier);
    info.extend_from_slice(&(sha1.digest_len() as u32).to_le_bytes());
    info.extend_from_slice(&encrypted_verifier_hash);

    let mut package = package_prefix(plaintext);
    let mut body = pad_to_block(plaintext);
    aes_ecb_encrypt_in_place(&key, &mut body)?;
    package.extend_from_slice(&body);

    Ok((info, package))
}

fn encrypt_agile<R: RngCore + ?Sized>(
    plaintext: &[u8],
    password: &str,
    opts: &EncryptOptions,
    rng: &mut R,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let cipher = opts.cipher;
    let hash_alg = opts.hash_algorithm;
    let key_len = cipher.key_len();
    let block_size = cipher.block_size();

    let key_data_salt = random_bytes(rng, SALT_LEN).to_vec();
    let password_salt = random_bytes(rng, SALT_LEN).to_vec();
    let package_key = random_bytes(rng, key_len);
    let verifier_input = random_bytes(rng, SALT_LEN);
    let hmac_key = random_bytes(rng, hash_alg.digest_len());

    // Package payload, segment by segment.
    let mut package = package_prefix(plaintext);
    let mut body = pad_to_block(plaintext);
    for (index, segment) in body.chunks_mut(SEGMENT_SIZE).enumerate() {
        let iv = segment_iv(&key_data_salt, index as u32, hash_alg, block_size);
        aes_cbc_encrypt_in_place(&package_key, &iv, segment)?;
    }
    package.extend_from_slice(&body);

    // Password key encryptor.
    let h = iterated_hash(password, &password_salt, hash_alg, opts.spin_count);
    let encrypt_with = |block_key: &[u8], data: &[u8]| -> Result<Vec<u8>> {
        let key = derive_agile_key(&h, block_key, hash_alg, key_len);
        let mut buf = pad_to_block(data);
        aes_cbc_encrypt_in_place(&key, &password_salt, &mut buf)?;
        Ok(buf.to_vec())
    };
    let encrypted_verifier_hash_input =
        encrypt_with(&VERIFIER_HASH_INPUT_BLOCK_KEY[..], &verifier_input[..])?;
    let encrypted_verifier_hash_value =
        encrypt_with(&VERIFIER_HASH_VALUE_BLOCK_KEY[..], &hash_alg.digest(&verifier_input)[..])?;
    let encrypted_key_value = encrypt_with(&KEY_VALUE_BLOCK_KEY[..], &package_key[..])?;

    // dataIntegrity: HMAC over the whole EncryptedPackage stream.
    let hmac_value = hash_alg.hmac(&hmac_key, &package)?;
    let mut encrypted_hmac_key = pad_to_block(&hmac_key);
    let iv = derive_iv(&key_data_salt, &HMAC_KEY_BLOCK_KEY, hash_alg, block_size);
    aes_cbc_encrypt_in_place(&package_key, &iv, &mut encrypted_hmac_key)?;
    let mut encrypted_hmac_value = pad_to_block(&hmac_value);
    let iv = derive_iv(&key_data_salt, &HMAC_VALUE_BLOCK_KEY, hash_alg, block_size);
    aes_cbc_encrypt_in_place(&package_key, &iv, &mut encrypted_hmac_value)?;

    let params = |salt: &[u8]| {
        format!(
            r#"saltSize="{}" blockSize="{block_size}" keyBits="{}" hashSize="{}" cipherAlgorithm="AES" cipherChaining="{}" hashAlgorithm="{}" saltValue="{}""#,
            salt.len(),
            cipher.key_bits(),
            hash_alg.digest_len(),
            ChainingMode::Cbc.xml_name(),
            hash_alg.xml_name(),
            BASE64.encode(salt),
        )
    };
    let xml = format!(
        concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\r\n",
            "<encryption xmlns=\"http://schemas.microsoft.com/office/2006/encryption\" ",
            "xmlns:p=\"{ns}\">",
            "<keyData {key_data}/>",
            "<dataIntegrity encryptedHmacKey=\"{hmac_key}\" encryptedHmacValue=\"{hmac_value}\"/>",
            "<keyEncryptors><keyEncryptor uri=\"{ns}\">",
            "<p:encryptedKey spinCount=\"{spin}\" {password_key} ",
            "encryptedVerifierHashInput=\"{vhi}\" encryptedVerifierHashValue=\"{vhv}\" ",
            "encryptedKeyValue=\"{ekv}\"/>",
            "</keyEncryptor></keyEncryptors></encryption>"
        ),
        ns = PASSWORD_KEY_ENCRYPTOR_NS,
        key_data = params(&key_data_salt[..]),
        hmac_key = BASE64.encode(&*encrypted_hmac_key),
        hmac_value = BASE64.encode(&*encrypted_hmac_value),
        spin = opts.spin_count,
        password_key = params(&password_salt[..]),
        vhi = BASE64.encode(&encrypted_verifier_hash_input),
        vhv = BASE64.encode(&encrypted_verifier_hash_value),
        ekv = BASE64.encode(&encrypted_key_value),
    );

    let mut info = Vec::with_capacity(8 + xml.len());
    info.extend_from_slice(&4u16.to_le_bytes());
    info.extend_from_slice(&4u16.to_le_bytes());
    info.extend_from_slice(&AGILE_VERSION_FLAGS.to_le_bytes());
    info.extend_from_slice(xml.as_bytes());

    Ok((info, package))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::{parse, EncryptionDescriptor};
    use rand::{rngs::StdRng, SeedableRng as _};

    #[test]
    fn standard_writer_emits_version_4_2_with_cryptoapi_aes_flags() {
        let opts = EncryptOptions {
            scheme: EncryptionScheme::Standard,
            cipher: CipherAlgorithm::Aes192,
            ..EncryptOptions::default()
        };
        let mut rng = StdRng::from_seed([1u8; 32]);
        let (info, package) = encrypt_package_with_rng(b"hello", "pw", &opts, &mut rng).unwrap();

        assert_eq!(&info[..8], &[4, 0, 2, 0, 0x24, 0, 0, 0]);
        let EncryptionDescriptor::Standard(parsed) = parse(&info).unwrap() else {
            panic!("expected Standard");
        };
        assert_eq!(parsed.header.algorithm, CipherAlgorithm::Aes192);
        assert_eq!(parsed.header.csp_name, STANDARD_CSP_NAME);
        assert_eq!(&package[..8], &5u64.to_le_bytes());
        assert_eq!(package.len(), 8 + 16);
    }

    #[test]
    fn agile_writer_output_parses_with_integrity_block() {
        let opts = EncryptOptions {
            cipher: CipherAlgorithm::Aes128,
            hash_algorithm: HashAlgorithm::Sha1,
            spin_count: 10,
            ..EncryptOptions::default()
        };
        let mut rng = StdRng::from_seed([2u8; 32]);
        let (info, package) =
            encrypt_package_with_rng(&[0u8; 5000], "pw", &opts, &mut rng).unwrap();

        let EncryptionDescriptor::Agile(parsed) = parse(&info).unwrap() else {
            panic!("expected Agile");
        };
        assert_eq!(parsed.key_data.cipher_algorithm, CipherAlgorithm::Aes128);
        assert_eq!(parsed.key_data.hash_algorithm, HashAlgorithm::Sha1);
        assert_eq!(parsed.encrypted_key.spin_count, 10);
        // 20-byte SHA-1 values are padded to two AES blocks.
        assert_eq!(parsed.encrypted_key.encrypted_verifier_hash_value.len(), 32);
        assert!(parsed.data_integrity.is_some());
        assert_eq!(package.len(), 8 + 5008);
    }

    #[test]
    fn same_seed_gives_same_output() {
        let opts = EncryptOptions {
            spin_count: 5,
            ..EncryptOptions::default()
        };
        let run = || {
            let mut rng = StdRng::from_seed([9u8; 32]);
            encrypt_package_with_rng(b"data", "pw", &opts, &mut rng).unwrap()
        };
        assert_eq!(run(), run());
    }
}
