//! Password verification and package decryption.

use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use log::debug;
use subtle::ConstantTimeEq as _;
use zeroize::Zeroizing;

use crate::algorithm::{ChainingMode, HashAlgorithm, AES_BLOCK_SIZE};
use crate::cipher::{aes_cbc_decrypt, aes_cbc_decrypt_in_place, aes_ecb_decrypt_in_place};
use crate::container::{Container, ENCRYPTED_PACKAGE_STREAM};
use crate::error::{DecryptError, Result};
use crate::info::{
    parse_encrypted_package_header, AgileEncryptionInfo, EncryptionDescriptor,
    StandardEncryptionInfo, ENCRYPTED_PACKAGE_HEADER_LEN,
};
use crate::kdf::{
    derive_agile_key, derive_iv, iterated_hash, segment_iv, standard_derive_key, HMAC_KEY_BLOCK_KEY,
    HMAC_VALUE_BLOCK_KEY, KEY_VALUE_BLOCK_KEY, STANDARD_SPIN_COUNT,
    VERIFIER_HASH_INPUT_BLOCK_KEY, VERIFIER_HASH_VALUE_BLOCK_KEY,
};
use crate::reader::{ciphertext_len, DecryptedPackageReader, SegmentCipher, SEGMENT_SIZE};
use crate::util::checked_len;

/// Local file header signature every OOXML package starts with.
const ZIP_SIGNATURE: &[u8] = b"PK";

/// Decryption limits and checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecryptOptions {
    /// Largest Agile `spinCount` accepted before any hashing starts.
    pub max_spin_count: u32,
    /// Check the Agile `dataIntegrity` HMAC before [`Decryptor::decrypt_package`] returns
    /// plaintext.
    pub verify_integrity: bool,
}

impl DecryptOptions {
    pub const DEFAULT_MAX_SPIN_COUNT: u32 = 10_000_000;
}

impl Default for DecryptOptions {
    fn default() -> Self {
        Self {
            max_spin_count: Self::DEFAULT_MAX_SPIN_COUNT,
            verify_integrity: false,
        }
    }
}

enum State {
    Unverified,
    Verified { key: Zeroizing<Vec<u8>> },
}

/// Verifies passwords against an [`EncryptionDescriptor`] and decrypts the package once a
/// password has been accepted.
///
/// A `Decryptor` starts unverified. [`verify_password`](Self::verify_password) may be retried
/// any number of times; the first success stores the package key and the decryptor stays
/// verified from then on.
pub struct Decryptor {
    descriptor: Arc<EncryptionDescriptor>,
    options: DecryptOptions,
    state: State,
}

impl fmt::Debug for Decryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decryptor")
            .field("scheme", &self.descriptor.scheme())
            .field("options", &self.options)
            .field("verified", &self.is_verified())
            .finish()
    }
}

impl Decryptor {
    pub fn new(descriptor: impl Into<Arc<EncryptionDescriptor>>) -> Self {
        Self::with_options(descriptor, DecryptOptions::default())
    }

    pub fn with_options(
        descriptor: impl Into<Arc<EncryptionDescriptor>>,
        options: DecryptOptions,
    ) -> Self {
        Self {
            descriptor: descriptor.into(),
            options,
            state: State::Unverified,
        }
    }

    pub fn descriptor(&self) -> &EncryptionDescriptor {
        &self.descriptor
    }

    pub fn options(&self) -> &DecryptOptions {
        &self.options
    }

    pub fn is_verified(&self) -> bool {
        matches!(self.state, State::Verified { .. })
    }

    /// Check `password`. A wrong password is `Ok(false)`, not an error.
    ///
    /// Once verified, later calls still report whether their candidate is correct, but a wrong
    /// candidate does not discard the stored key.
    pub fn verify_password(&mut self, password: &str) -> Result<bool> {
        let key = match self.descriptor.as_ref() {
            EncryptionDescriptor::Standard(info) => verify_standard(info, password)?,
            EncryptionDescriptor::Agile(info) => verify_agile(info, password, &self.options)?,
        };
        match key {
            Some(key) => {
                debug!("{:?} password accepted", self.descriptor.scheme());
                self.state = State::Verified { key };
                Ok(true)
            }
            None => {
                debug!("{:?} password rejected", self.descriptor.scheme());
                Ok(false)
            }
        }
    }

    fn key(&self) -> Result<&Zeroizing<Vec<u8>>> {
        match &self.state {
            State::Verified { key } => Ok(key),
            State::Unverified => Err(DecryptError::State(
                "password has not been verified; call verify_password first",
            )),
        }
    }

    /// Pick the payload cipher. `first_block` is the first ciphertext block, or empty when the
    /// package is empty.
    fn segment_cipher(&self, plaintext_len: u64, first_block: &[u8]) -> Result<SegmentCipher> {
        let key = Zeroizing::new(self.key()?.to_vec());
        Ok(match self.descriptor.as_ref() {
            EncryptionDescriptor::Standard(info) => {
                let salt = info.verifier.salt;
                match standard_package_mode(&key, &salt, plaintext_len, first_block)? {
                    ChainingMode::Ecb => SegmentCipher::StandardEcb { key },
                    ChainingMode::Cbc => SegmentCipher::StandardCbc { key, salt },
                }
            }
            EncryptionDescriptor::Agile(info) => SegmentCipher::AgileCbc {
                key,
                salt: info.key_data.salt.clone(),
                hash_alg: info.key_data.hash_algorithm,
                block_size: info.key_data.block_size,
            },
        })
    }

    /// Streaming plaintext view over an `EncryptedPackage` stream.
    ///
    /// `encrypted_package` is the whole stream, including its 8-byte size prefix. The view
    /// decrypts lazily; only the size prefix and the first cipher block are read here.
    pub fn get_data_stream<R: Read + Seek>(
        &self,
        mut encrypted_package: R,
    ) -> Result<DecryptedPackageReader<R>> {
        self.key()?;

        encrypted_package.seek(SeekFrom::Start(0))?;
        let mut header = [0u8; ENCRYPTED_PACKAGE_HEADER_LEN];
        let header_len = read_up_to(&mut encrypted_package, &mut header)?;
        let plaintext_len = parse_encrypted_package_header(&header[..header_len])?;

        let stream_len = encrypted_package.seek(SeekFrom::End(0))?;
        let available = stream_len.saturating_sub(ENCRYPTED_PACKAGE_HEADER_LEN as u64);
        check_ciphertext_covers(plaintext_len, available)?;

        let mut first_block = Zeroizing::new([0u8; AES_BLOCK_SIZE]);
        let first_len = if plaintext_len == 0 {
            0
        } else {
            encrypted_package.seek(SeekFrom::Start(ENCRYPTED_PACKAGE_HEADER_LEN as u64))?;
            encrypted_package.read_exact(&mut first_block[..])?;
            AES_BLOCK_SIZE
        };
        let cipher = self.segment_cipher(plaintext_len, &first_block[..first_len])?;

        debug!("streaming {plaintext_len}-byte package");
        Ok(DecryptedPackageReader::new(
            encrypted_package,
            cipher,
            plaintext_len,
        ))
    }

    /// Decrypt a whole `EncryptedPackage` stream held in memory.
    pub fn decrypt_package(&self, encrypted_package: &[u8]) -> Result<Vec<u8>> {
        self.key()?;

        if self.options.verify_integrity {
            match self.descriptor.as_ref() {
                EncryptionDescriptor::Agile(_) => {
                    if !self.verify_integrity(encrypted_package)? {
                        return Err(DecryptError::Integrity);
                    }
                }
                EncryptionDescriptor::Standard(_) => {
                    debug!("Standard encryption has no integrity block; skipping HMAC check");
                }
            }
        }

        let plaintext_len = parse_encrypted_package_header(encrypted_package)?;
        let ciphertext = &encrypted_package[ENCRYPTED_PACKAGE_HEADER_LEN..];
        check_ciphertext_covers(plaintext_len, ciphertext.len() as u64)?;

        let out_len = checked_len(plaintext_len, "EncryptedPackage size")?;
        let needed = checked_len(ciphertext_len(plaintext_len), "EncryptedPackage size")?;
        let cipher = self.segment_cipher(plaintext_len, &ciphertext[..needed.min(AES_BLOCK_SIZE)])?;
        let mut out = ciphertext[..needed].to_vec();
        decrypt_segments(&cipher, &mut out)?;
        out.truncate(out_len);

        debug!("decrypted {out_len}-byte package");
        Ok(out)
    }

    /// Read the `EncryptedPackage` stream from `container` and decrypt it.
    pub fn decrypt_container(&self, container: &mut Container<'_>) -> Result<Vec<u8>> {
        // Fail before reading a possibly large stream.
        self.key()?;
        let encrypted_package = container.get_stream(ENCRYPTED_PACKAGE_STREAM)?;
        self.decrypt_package(&encrypted_package)
    }

    /// Check the Agile `dataIntegrity` HMAC over the whole `EncryptedPackage` stream.
    ///
    /// Standard encryption carries no integrity block.
    pub fn verify_integrity(&self, encrypted_package: &[u8]) -> Result<bool> {
        let info = match self.descriptor.as_ref() {
            EncryptionDescriptor::Agile(info) => info,
            EncryptionDescriptor::Standard(_) => {
                return Err(DecryptError::UnsupportedScheme(
                    "Standard encryption has no dataIntegrity block".to_string(),
                ))
            }
        };
        let key = self.key()?;
        let integrity = info.data_integrity.as_ref().ok_or_else(|| {
            DecryptError::Format("EncryptionInfo has no <dataIntegrity> element".to_string())
        })?;

        let kd = &info.key_data;
        let hash_len = kd.hash_size;

        let iv = derive_iv(&kd.salt, &HMAC_KEY_BLOCK_KEY, kd.hash_algorithm, kd.block_size);
        let hmac_key = Zeroizing::new(aes_cbc_decrypt(key, &iv, &integrity.encrypted_hmac_key)?);
        let hmac_key = prefix(&hmac_key, hash_len, "decrypted HMAC key")?;

        let iv = derive_iv(
            &kd.salt,
            &HMAC_VALUE_BLOCK_KEY,
            kd.hash_algorithm,
            kd.block_size,
        );
        let expected = aes_cbc_decrypt(key, &iv, &integrity.encrypted_hmac_value)?;
        let expected = prefix(&expected, hash_len, "decrypted HMAC value")?;

        let actual = kd.hash_algorithm.hmac(hmac_key, encrypted_package)?;
        let ok: bool = actual[..].ct_eq(expected).into();
        debug!("dataIntegrity HMAC {}", if ok { "matches" } else { "mismatch" });
        Ok(ok)
    }
}

fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(filled)
}

fn check_ciphertext_covers(plaintext_len: u64, available: u64) -> Result<()> {
    let needed = ciphertext_len(plaintext_len);
    if available < needed {
        return Err(DecryptError::Format(format!(
            "EncryptedPackage declares {plaintext_len} bytes but holds only {available} bytes of ciphertext (need {needed})"
        )));
    }
    Ok(())
}

fn prefix<'a>(bytes: &'a [u8], len: usize, what: &str) -> Result<&'a [u8]> {
    bytes.get(..len).ok_or_else(|| {
        DecryptError::Format(format!(
            "{what} is {} bytes, expected at least {len}",
            bytes.len()
        ))
    })
}

#[cfg(feature = "parallel")]
fn decrypt_segments(cipher: &SegmentCipher, buf: &mut [u8]) -> Result<()> {
    use rayon::prelude::*;

    buf.par_chunks_mut(SEGMENT_SIZE)
        .enumerate()
        .try_for_each(|(index, segment)| cipher.decrypt_segment(index as u64, segment))
}

#[cfg(not(feature = "parallel"))]
fn decrypt_segments(cipher: &SegmentCipher, buf: &mut [u8]) -> Result<()> {
    for (index, segment) in buf.chunks_mut(SEGMENT_SIZE).enumerate() {
        cipher.decrypt_segment(index as u64, segment)?;
    }
    Ok(())
}

/// Tell which Standard payload layout the package uses.
///
/// Standard `EncryptionInfo` does not record it. Office writes AES-ECB over the whole payload;
/// other CryptoAPI producers write 4096-byte AES-CBC segments. The payload is a ZIP package, so
/// the first block must decrypt to the `PK` signature under exactly the layout that was used.
fn standard_package_mode(
    key: &[u8],
    salt: &[u8],
    plaintext_len: u64,
    first_block: &[u8],
) -> Result<ChainingMode> {
    if plaintext_len == 0 {
        return Ok(ChainingMode::Ecb);
    }
    let signature = if plaintext_len < ZIP_SIGNATURE.len() as u64 {
        &ZIP_SIGNATURE[..plaintext_len as usize]
    } else {
        ZIP_SIGNATURE
    };

    let mut ecb = Zeroizing::new(first_block.to_vec());
    aes_ecb_decrypt_in_place(key, &mut ecb)?;
    if ecb.starts_with(signature) {
        debug!("Standard package uses AES-ECB");
        return Ok(ChainingMode::Ecb);
    }

    let iv = segment_iv(salt, 0, HashAlgorithm::Sha1, AES_BLOCK_SIZE);
    let mut cbc = Zeroizing::new(first_block.to_vec());
    aes_cbc_decrypt_in_place(key, &iv, &mut cbc)?;
    if cbc.starts_with(signature) {
        debug!("Standard package uses segmented AES-CBC");
        return Ok(ChainingMode::Cbc);
    }

    Err(DecryptError::Format(
        "Standard EncryptedPackage is not a ZIP package under AES-ECB or segmented AES-CBC"
            .to_string(),
    ))
}

/// Standard verifier check: MS-OFFCRYPTO §2.3.4.7 and §2.3.4.9.
fn verify_standard(
    info: &StandardEncryptionInfo,
    password: &str,
) -> Result<Option<Zeroizing<Vec<u8>>>> {
    let sha1 = HashAlgorithm::Sha1;
    let h = iterated_hash(password, &info.verifier.salt, sha1, STANDARD_SPIN_COUNT);
    let key = standard_derive_key(&h, info.header.key_size_bits as usize / 8)?;

    let mut verifier = Zeroizing::new(info.verifier.encrypted_verifier);
    aes_ecb_decrypt_in_place(&key, &mut verifier[..])?;
    let mut verifier_hash = Zeroizing::new(info.verifier.encrypted_verifier_hash.clone());
    aes_ecb_decrypt_in_place(&key, &mut verifier_hash)?;

    let hash_len = info.verifier.verifier_hash_size as usize;
    let expected = sha1.digest(&verifier[..]);
    let stored = prefix(&verifier_hash, hash_len, "decrypted verifier hash")?;
    let expected = prefix(&expected, hash_len, "verifier hash")?;

    if bool::from(expected.ct_eq(stored)) {
        Ok(Some(key))
    } else {
        Ok(None)
    }
}

/// Agile password key encryptor check: MS-OFFCRYPTO §2.3.4.13.
fn verify_agile(
    info: &AgileEncryptionInfo,
    password: &str,
    options: &DecryptOptions,
) -> Result<Option<Zeroizing<Vec<u8>>>> {
    let ek = &info.encrypted_key;
    if ek.spin_count > options.max_spin_count {
        return Err(DecryptError::UnsupportedScheme(format!(
            "spinCount {} exceeds the configured maximum {}",
            ek.spin_count, options.max_spin_count
        )));
    }

    let hash_alg = ek.hash_algorithm;
    let key_len = ek.cipher_algorithm.key_len();
    let h = iterated_hash(password, &ek.salt, hash_alg, ek.spin_count);

    let input_key = derive_agile_key(&h, &VERIFIER_HASH_INPUT_BLOCK_KEY, hash_alg, key_len);
    let verifier_input = Zeroizing::new(aes_cbc_decrypt(
        &input_key,
        &ek.salt,
        &ek.encrypted_verifier_hash_input,
    )?);
    let verifier_input = prefix(&verifier_input, ek.salt.len(), "decrypted verifier input")?;

    let value_key = derive_agile_key(&h, &VERIFIER_HASH_VALUE_BLOCK_KEY, hash_alg, key_len);
    let verifier_hash = Zeroizing::new(aes_cbc_decrypt(
        &value_key,
        &ek.salt,
        &ek.encrypted_verifier_hash_value,
    )?);
    let stored = prefix(&verifier_hash, ek.hash_size, "decrypted verifier hash")?;

    let expected = hash_alg.digest(verifier_input);
    if !bool::from(expected[..].ct_eq(stored)) {
        return Ok(None);
    }

    let secret_key_key = derive_agile_key(&h, &KEY_VALUE_BLOCK_KEY, hash_alg, key_len);
    let secret = Zeroizing::new(aes_cbc_decrypt(
        &secret_key_key,
        &ek.salt,
        &ek.encrypted_key_value,
    )?);
    let package_key_len = info.key_data.cipher_algorithm.key_len();
    let package_key = prefix(&secret, package_key_len, "decrypted package key")?;
    Ok(Some(Zeroizing::new(package_key.to_vec())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::parse;
    use crate::writer::{encrypt_package_with_rng, EncryptOptions};
    use crate::EncryptionScheme;
    use rand::{rngs::StdRng, SeedableRng as _};

    fn fixture(scheme: EncryptionScheme, plaintext: &[u8]) -> (EncryptionDescriptor, Vec<u8>) {
        let opts = EncryptOptions {
            scheme,
            spin_count: 1_000,
            ..EncryptOptions::default()
        };
        let mut rng = StdRng::from_seed([3u8; 32]);
        let (info, package) = encrypt_package_with_rng(plaintext, "secret", &opts, &mut rng).unwrap();
        (parse(&info).unwrap(), package)
    }

    #[test]
    fn decrypting_before_verification_is_a_state_error() {
        let (descriptor, package) = fixture(EncryptionScheme::Agile, b"PK payload");
        let decryptor = Decryptor::new(descriptor);
        assert!(matches!(
            decryptor.decrypt_package(&package),
            Err(DecryptError::State(_))
        ));
        assert!(matches!(
            decryptor.get_data_stream(std::io::Cursor::new(&package)),
            Err(DecryptError::State(_))
        ));
        assert!(matches!(
            decryptor.verify_integrity(&package),
            Err(DecryptError::State(_))
        ));
    }

    #[test]
    fn wrong_guess_after_success_keeps_the_key() {
        let (descriptor, package) = fixture(EncryptionScheme::Standard, b"PK payload");
        let mut decryptor = Decryptor::new(descriptor);
        assert!(!decryptor.verify_password("nope").unwrap());
        assert!(!decryptor.is_verified());
        assert!(decryptor.verify_password("secret").unwrap());
        assert!(!decryptor.verify_password("nope").unwrap());
        assert!(decryptor.is_verified());
        assert_eq!(decryptor.decrypt_package(&package).unwrap(), b"PK payload");
    }

    #[test]
    fn spin_count_above_limit_is_rejected_before_hashing() {
        let (descriptor, _) = fixture(EncryptionScheme::Agile, b"PK");
        let options = DecryptOptions {
            max_spin_count: 999,
            ..DecryptOptions::default()
        };
        let mut decryptor = Decryptor::with_options(descriptor, options);
        assert!(matches!(
            decryptor.verify_password("secret"),
            Err(DecryptError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn short_ciphertext_is_format_error() {
        let (descriptor, package) = fixture(EncryptionScheme::Agile, &[0x41; 100]);
        let mut decryptor = Decryptor::new(descriptor);
        assert!(decryptor.verify_password("secret").unwrap());
        let cut = &package[..package.len() - 16];
        assert!(matches!(
            decryptor.decrypt_package(cut),
            Err(DecryptError::Format(_))
        ));
        assert!(matches!(
            decryptor.get_data_stream(std::io::Cursor::new(cut)),
            Err(DecryptError::Format(_))
        ));
        assert!(matches!(
            decryptor.decrypt_package(&package[..5]),
            Err(DecryptError::Format(_))
        ));
    }

    /// Re-encrypt a Standard package as 4096-byte AES-CBC segments under the verified key.
    fn standard_cbc_package(decryptor: &Decryptor, plaintext: &[u8]) -> Vec<u8> {
        let EncryptionDescriptor::Standard(info) = decryptor.descriptor() else {
            panic!("expected Standard");
        };
        let key = decryptor.key().unwrap();
        let mut body = plaintext.to_vec();
        body.resize(ciphertext_len(plaintext.len() as u64) as usize, 0);
        for (i, segment) in body.chunks_mut(SEGMENT_SIZE).enumerate() {
            let iv = segment_iv(&info.verifier.salt, i as u32, HashAlgorithm::Sha1, AES_BLOCK_SIZE);
            crate::cipher::aes_cbc_encrypt_in_place(key, &iv, segment).unwrap();
        }
        let mut package = (plaintext.len() as u64).to_le_bytes().to_vec();
        package.extend_from_slice(&body);
        package
    }

    #[test]
    fn standard_package_in_cbc_segments_decrypts() {
        let mut plaintext = b"PK\x03\x04".to_vec();
        plaintext.extend((0..9_000u32).map(|i| (i % 253) as u8));
        let (descriptor, ecb_package) = fixture(EncryptionScheme::Standard, &plaintext);
        let mut decryptor = Decryptor::new(descriptor);
        assert!(decryptor.verify_password("secret").unwrap());
        assert_eq!(decryptor.decrypt_package(&ecb_package).unwrap(), plaintext);

        let cbc_package = standard_cbc_package(&decryptor, &plaintext);
        assert_ne!(cbc_package, ecb_package);
        assert_eq!(decryptor.decrypt_package(&cbc_package).unwrap(), plaintext);

        let mut out = Vec::new();
        decryptor
            .get_data_stream(std::io::Cursor::new(&cbc_package))
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, plaintext);
    }

    #[test]
    fn standard_package_without_zip_signature_is_format_error() {
        let (descriptor, package) = fixture(EncryptionScheme::Standard, b"not a zip package");
        let mut decryptor = Decryptor::new(descriptor);
        assert!(decryptor.verify_password("secret").unwrap());
        assert!(matches!(
            decryptor.decrypt_package(&package),
            Err(DecryptError::Format(_))
        ));
        assert!(matches!(
            decryptor.get_data_stream(std::io::Cursor::new(&package)),
            Err(DecryptError::Format(_))
        ));

        let cbc_package = standard_cbc_package(&decryptor, b"also not a zip");
        assert!(matches!(
            decryptor.decrypt_package(&cbc_package),
            Err(DecryptError::Format(_))
        ));
    }

    #[test]
    fn single_byte_standard_package_checks_only_the_p() {
        let (descriptor, package) = fixture(EncryptionScheme::Standard, b"P");
        let mut decryptor = Decryptor::new(descriptor);
        assert!(decryptor.verify_password("secret").unwrap());
        assert_eq!(decryptor.decrypt_package(&package).unwrap(), b"P");
    }

    #[test]
    fn options_are_kept_as_given() {
        let (descriptor, _) = fixture(EncryptionScheme::Agile, b"PK");
        let options = DecryptOptions {
            max_spin_count: 1_234,
            ..DecryptOptions::default()
        };
        let decryptor = Decryptor::with_options(descriptor, options);
        assert_eq!(decryptor.options().max_spin_count, 1_234);
        assert!(!decryptor.options().verify_integrity);
    }

    #[test]
    fn integrity_is_agile_only() {
        let (descriptor, package) = fixture(EncryptionScheme::Standard, b"PK");
        let mut decryptor = Decryptor::new(descriptor);
        assert!(decryptor.verify_password("secret").unwrap());
        assert!(matches!(
            decryptor.verify_integrity(&package),
            Err(DecryptError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn debug_output_hides_key_material() {
        let (descriptor, _) = fixture(EncryptionScheme::Standard, b"PK");
        let mut decryptor = Decryptor::new(descriptor);
        decryptor.verify_password("secret").unwrap();
        let rendered = format!("{decryptor:?}");
        assert!(rendered.contains("verified: true"));
        assert!(!rendered.contains("key"));
    }
}
